use std::fmt::Write;

use chrono::NaiveDate;

use crate::config::CycleConfig;
use crate::cycles;
use crate::models::{DiagnosisRecord, UserProfile};

pub fn build_report(
    profile: &UserProfile,
    diagnosis: Option<&DiagnosisRecord>,
    period_dates: &[NaiveDate],
    generated_on: NaiveDate,
    config: &CycleConfig,
) -> String {
    let grouped = cycles::group_into_cycles(period_dates, config);
    let prediction = cycles::predict(&grouped, config);

    let mut output = String::new();

    let _ = writeln!(output, "Femora PCOS Health Report");
    let _ = writeln!(output, "Patient: {}", profile.display_label());
    if let Some(email) = profile.email.as_deref() {
        let _ = writeln!(output, "Email: {email}");
    }
    let _ = writeln!(output, "Date: {generated_on}");
    let _ = writeln!(output);

    match diagnosis {
        Some(record) => {
            let _ = writeln!(output, "PCOS Probability: {}%", record.probability);
            let _ = writeln!(output, "Confidence: {}%", record.confidence);
            let _ = writeln!(output, "Scan date: {}", record.created_at.date_naive());
            let _ = writeln!(output);
            let _ = writeln!(output, "Key Findings:");
            if record.findings.is_empty() {
                let _ = writeln!(output, "• None recorded");
            }
            for finding in &record.findings {
                let _ = writeln!(output, "• {finding}");
            }
        }
        None => {
            let _ = writeln!(output, "No ultrasound analysis on file.");
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "Cycle Overview:");

    if grouped.is_empty() {
        let _ = writeln!(output, "No periods logged for this window.");
    } else {
        for cycle in grouped.iter().rev().take(6) {
            let _ = writeln!(
                output,
                "• Started {} ({} logged days)",
                cycle.start_date(),
                cycle.dates().len()
            );
        }
    }

    match prediction {
        Some(prediction) => {
            let window = &prediction.fertile_window;
            let _ = writeln!(
                output,
                "Average cycle length: {} days",
                prediction.average_cycle_length_days
            );
            let _ = writeln!(
                output,
                "Next period expected: {}",
                prediction.predicted_next_period_start
            );
            let _ = writeln!(
                output,
                "Estimated ovulation: {}",
                prediction.predicted_ovulation_date
            );
            if let (Some(first), Some(last)) = (window.first(), window.last()) {
                let _ = writeln!(output, "Fertile window: {first} to {last}");
            }
        }
        None if !grouped.is_empty() => {
            let _ = writeln!(output, "Log at least two periods to see predictions.");
        }
        None => {}
    }

    let _ = writeln!(output);
    let _ = writeln!(
        output,
        "This report is informational and is not a medical diagnosis."
    );

    output
}
