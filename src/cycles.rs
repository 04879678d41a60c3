use std::collections::{BTreeSet, HashSet};

use chrono::{Datelike, Duration, NaiveDate};

use crate::config::CycleConfig;
use crate::error::HealthError;
use crate::models::{CalendarDay, CalendarMonth, Cycle, CyclePrediction};

pub fn parse_date(raw: &str) -> Result<NaiveDate, HealthError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| HealthError::InvalidDateFormat(raw.to_string()))
}

pub fn parse_dates<'a, I>(raw: I) -> Result<Vec<NaiveDate>, HealthError>
where
    I: IntoIterator<Item = &'a str>,
{
    raw.into_iter().map(parse_date).collect()
}

/// Splits logged bleeding days into periods.
///
/// Duplicates collapse to one entry. A gap larger than
/// `intra_period_gap_days` between neighbouring days starts a new cycle.
pub fn group_into_cycles(dates: &[NaiveDate], config: &CycleConfig) -> Vec<Cycle> {
    let sorted: BTreeSet<NaiveDate> = dates.iter().copied().collect();
    let mut cycles: Vec<Cycle> = Vec::new();
    let mut previous: Option<NaiveDate> = None;

    for date in sorted {
        let starts_new = match previous {
            Some(prev) => (date - prev).num_days() > config.intra_period_gap_days,
            None => true,
        };

        match cycles.last_mut() {
            Some(current) if !starts_new => current.push(date),
            _ => cycles.push(Cycle::starting_at(date)),
        }
        previous = Some(date);
    }

    cycles
}

pub fn cycle_lengths(cycles: &[Cycle]) -> Vec<i64> {
    cycles
        .windows(2)
        .map(|pair| (pair[1].start_date() - pair[0].start_date()).num_days())
        .collect()
}

/// `date` moved by `days`, or `None` past chrono's representable range.
fn shift(date: NaiveDate, days: i64) -> Option<NaiveDate> {
    date.checked_add_signed(Duration::try_days(days)?)
}

/// Returns `None` until at least two cycles have been logged, or when a
/// predicted date would fall outside the representable calendar.
pub fn predict(cycles: &[Cycle], config: &CycleConfig) -> Option<CyclePrediction> {
    let lengths = cycle_lengths(cycles);
    if lengths.is_empty() {
        return None;
    }

    let total: i64 = lengths.iter().sum();
    let average = (total as f64 / lengths.len() as f64).round() as i64;
    let last_start = cycles.last()?.start_date();

    let next_start = shift(last_start, average)?;
    let ovulation = shift(next_start, config.luteal_phase_days.checked_neg()?)?;
    let fertile_window = fertile_window(ovulation, config.fertile_window_lookback_days)?;

    Some(CyclePrediction {
        average_cycle_length_days: average,
        predicted_next_period_start: next_start,
        predicted_ovulation_date: ovulation,
        fertile_window,
    })
}

pub fn predict_from_dates(dates: &[NaiveDate], config: &CycleConfig) -> Option<CyclePrediction> {
    predict(&group_into_cycles(dates, config), config)
}

/// Ovulation day and the `lookback_days` before it, oldest first.
pub fn fertile_window(ovulation: NaiveDate, lookback_days: i64) -> Option<Vec<NaiveDate>> {
    (0..=lookback_days.max(0))
        .rev()
        .map(|offset| shift(ovulation, -offset))
        .collect()
}

pub fn is_date_in_predicted_period_range(
    date: NaiveDate,
    predicted_next_period_start: NaiveDate,
    period_duration_days: i64,
) -> bool {
    if period_duration_days <= 0 {
        return false;
    }
    // A range running past the last representable day has no upper bound.
    let last_day = shift(predicted_next_period_start, period_duration_days - 1);
    date >= predicted_next_period_start && last_day.map_or(true, |last| date <= last)
}

/// Marks every day of a month for the tracker calendar.
pub fn calendar_month(
    year: i32,
    month: u32,
    logged: &[NaiveDate],
    prediction: Option<&CyclePrediction>,
    config: &CycleConfig,
) -> Result<CalendarMonth, HealthError> {
    let invalid = || HealthError::InvalidDateFormat(format!("{year}-{month:02}"));
    let first = NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(invalid)?;
    let next_first = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    }
    .ok_or_else(invalid)?;

    let logged: HashSet<NaiveDate> = logged.iter().copied().collect();
    let fertile: HashSet<NaiveDate> = prediction
        .map(|p| p.fertile_window.iter().copied().collect())
        .unwrap_or_default();

    let days = first
        .iter_days()
        .take_while(|date| *date < next_first)
        .map(|date| CalendarDay {
            date,
            logged: logged.contains(&date),
            predicted_start: prediction.is_some_and(|p| p.predicted_next_period_start == date),
            in_predicted_range: prediction.is_some_and(|p| {
                is_date_in_predicted_period_range(
                    date,
                    p.predicted_next_period_start,
                    config.period_duration_days,
                )
            }),
            ovulation: prediction.is_some_and(|p| p.predicted_ovulation_date == date),
            fertile: fertile.contains(&date),
        })
        .collect();

    Ok(CalendarMonth {
        year,
        month,
        leading_blanks: first.weekday().num_days_from_sunday(),
        days,
    })
}
