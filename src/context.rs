use std::fmt::Write;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use chrono::{DateTime, Months, NaiveDate, Utc};

use crate::config::{ContextConfig, CycleConfig};
use crate::cycles;
use crate::error::HealthError;
use crate::models::{ContextSection, DiagnosisRecord, UserContextSummary, UserProfile};

const UNAVAILABLE: &str = "data unavailable";

#[async_trait]
pub trait DiagnosisReader: Send + Sync {
    async fn latest_diagnosis(&self, user_id: &str) -> anyhow::Result<Option<DiagnosisRecord>>;
}

#[async_trait]
pub trait PeriodLogReader: Send + Sync {
    async fn period_dates(&self, user_id: &str, since: NaiveDate)
        -> anyhow::Result<Vec<NaiveDate>>;
}

#[async_trait]
pub trait ProfileReader: Send + Sync {
    /// `Ok(None)` means the identifier is unknown.
    async fn profile(&self, user_id: &str) -> anyhow::Result<Option<UserProfile>>;
}

pub struct HealthContextAssembler {
    diagnoses: Arc<dyn DiagnosisReader>,
    periods: Arc<dyn PeriodLogReader>,
    profiles: Arc<dyn ProfileReader>,
    cycle_config: CycleConfig,
    context_config: ContextConfig,
}

impl HealthContextAssembler {
    pub fn new(
        diagnoses: Arc<dyn DiagnosisReader>,
        periods: Arc<dyn PeriodLogReader>,
        profiles: Arc<dyn ProfileReader>,
        cycle_config: CycleConfig,
        context_config: ContextConfig,
    ) -> Self {
        Self {
            diagnoses,
            periods,
            profiles,
            cycle_config,
            context_config,
        }
    }

    /// Builds the context block for one chat request.
    ///
    /// The three reads run concurrently, each under `read_timeout`. A failed
    /// read replaces its section with a placeholder; only an unknown user is
    /// an error.
    pub async fn assemble(
        &self,
        user_id: &str,
        as_of: DateTime<Utc>,
    ) -> Result<UserContextSummary, HealthError> {
        let since = window_start(as_of.date_naive(), self.context_config.context_window_months);
        let limit = self.context_config.read_timeout;

        let (profile, diagnosis, periods) = tokio::join!(
            bounded(limit, self.profiles.profile(user_id)),
            bounded(limit, self.diagnoses.latest_diagnosis(user_id)),
            bounded(limit, self.periods.period_dates(user_id, since)),
        );

        let mut degraded = Vec::new();

        let profile = match profile {
            Ok(Some(profile)) => Some(profile),
            Ok(None) => return Err(HealthError::UnresolvedUser(user_id.to_string())),
            Err(err) => {
                note_degraded(user_id, ContextSection::Profile, &err, &mut degraded);
                None
            }
        };
        let diagnosis = diagnosis
            .map_err(|err| note_degraded(user_id, ContextSection::Diagnosis, &err, &mut degraded))
            .ok();
        let periods = periods
            .map_err(|err| note_degraded(user_id, ContextSection::PeriodLog, &err, &mut degraded))
            .ok();

        let text = render_summary(
            profile.as_ref(),
            diagnosis.as_ref(),
            periods.as_deref(),
            self.context_config.context_window_months,
            &self.cycle_config,
        );
        log::debug!(
            "assembled context for {user_id}: {} chars, {} degraded sections",
            text.len(),
            degraded.len()
        );

        Ok(UserContextSummary { text, degraded })
    }
}

async fn bounded<T, F>(limit: Duration, read: F) -> anyhow::Result<T>
where
    F: Future<Output = anyhow::Result<T>>,
{
    tokio::time::timeout(limit, read)
        .await
        .with_context(|| format!("read timed out after {}ms", limit.as_millis()))?
}

fn note_degraded(
    user_id: &str,
    section: ContextSection,
    err: &anyhow::Error,
    degraded: &mut Vec<ContextSection>,
) {
    log::warn!("context fetch degraded for {user_id}: {section} read failed: {err:#}");
    degraded.push(section);
}

pub fn window_start(as_of: NaiveDate, months: u32) -> NaiveDate {
    as_of
        .checked_sub_months(Months::new(months))
        .unwrap_or(NaiveDate::MIN)
}

/// Renders the fixed-structure context block.
///
/// `None` for a section means its read failed.
pub fn render_summary(
    profile: Option<&UserProfile>,
    diagnosis: Option<&Option<DiagnosisRecord>>,
    periods: Option<&[NaiveDate]>,
    window_months: u32,
    config: &CycleConfig,
) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "User context:");
    match profile {
        Some(profile) => {
            let email = profile.email.as_deref().unwrap_or("no email on file");
            let _ = writeln!(output, "- Name: {} ({})", profile.display_label(), email);
        }
        None => {
            let _ = writeln!(output, "- Name: {UNAVAILABLE}");
        }
    }

    match diagnosis {
        Some(Some(record)) => {
            let _ = writeln!(
                output,
                "- Latest PCOS diagnosis: probability {}%, confidence {}% (recorded {})",
                record.probability,
                record.confidence,
                record.created_at.format("%B %-d, %Y")
            );
            if record.findings.is_empty() {
                let _ = writeln!(output, "- Findings: none recorded");
            } else {
                let _ = writeln!(output, "- Findings: {}", record.findings.join("; "));
            }
        }
        Some(None) => {
            let _ = writeln!(output, "- Latest PCOS diagnosis: Not available");
        }
        None => {
            let _ = writeln!(output, "- Latest PCOS diagnosis: {UNAVAILABLE}");
        }
    }

    let _ = writeln!(output, "- Period activity (last {window_months} months):");
    match periods {
        Some(dates) if dates.is_empty() => {
            let _ = writeln!(output, "  No periods logged.");
        }
        Some(dates) => {
            let grouped = cycles::group_into_cycles(dates, config);
            for (index, cycle) in grouped.iter().enumerate() {
                let listed: Vec<String> = cycle.dates().iter().map(|d| human_date(*d)).collect();
                let _ = writeln!(output, "  Cycle {}: {}", index + 1, listed.join(", "));
            }
            match cycles::predict(&grouped, config) {
                Some(prediction) => {
                    let _ = writeln!(
                        output,
                        "  Average cycle length: {} days; next period expected around {}; estimated ovulation {}",
                        prediction.average_cycle_length_days,
                        human_date(prediction.predicted_next_period_start),
                        human_date(prediction.predicted_ovulation_date)
                    );
                }
                None => {
                    let _ = writeln!(output, "  Not enough cycles logged to predict the next period.");
                }
            }
        }
        None => {
            let _ = writeln!(output, "  {UNAVAILABLE}");
        }
    }

    output
}

fn human_date(date: NaiveDate) -> String {
    date.format("%B %-d, %Y").to_string()
}

/// Prefixes the user's question with their context block.
pub fn compose_prompt(summary: &UserContextSummary, question: &str) -> Result<String, HealthError> {
    let question = question.trim();
    if question.is_empty() {
        return Err(HealthError::EmptyPrompt);
    }
    Ok(format!(
        "You are a women's health assistant. Use the context below when it is relevant.\n\n{}\nQuestion: {}\n",
        summary.text, question
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::HashMap;

    struct FakeStore {
        profiles: HashMap<String, UserProfile>,
        diagnosis: Option<DiagnosisRecord>,
        periods: Vec<NaiveDate>,
        fail_periods: bool,
        fail_diagnosis: bool,
        fail_profile: bool,
        read_delay: Option<Duration>,
        slow_periods: Option<Duration>,
        since_seen: std::sync::Mutex<Option<NaiveDate>>,
    }

    impl FakeStore {
        fn with_user() -> Self {
            let mut profiles = HashMap::new();
            profiles.insert(
                "u1".to_string(),
                UserProfile {
                    user_id: "u1".to_string(),
                    display_name: Some("Maya".to_string()),
                    email: Some("maya@example.com".to_string()),
                },
            );
            Self {
                profiles,
                diagnosis: Some(DiagnosisRecord {
                    probability: 72,
                    confidence: 88,
                    findings: vec!["Multiple follicles detected".to_string()],
                    created_at: Utc.with_ymd_and_hms(2024, 2, 20, 9, 30, 0).unwrap(),
                }),
                periods: ["2024-01-01", "2024-01-02", "2024-01-29", "2024-01-30"]
                    .iter()
                    .map(|d| cycles::parse_date(d).unwrap())
                    .collect(),
                fail_periods: false,
                fail_diagnosis: false,
                fail_profile: false,
                read_delay: None,
                slow_periods: None,
                since_seen: std::sync::Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl DiagnosisReader for FakeStore {
        async fn latest_diagnosis(&self, _user_id: &str) -> anyhow::Result<Option<DiagnosisRecord>> {
            if let Some(delay) = self.read_delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail_diagnosis {
                anyhow::bail!("diagnosis store offline");
            }
            Ok(self.diagnosis.clone())
        }
    }

    #[async_trait]
    impl PeriodLogReader for FakeStore {
        async fn period_dates(
            &self,
            _user_id: &str,
            since: NaiveDate,
        ) -> anyhow::Result<Vec<NaiveDate>> {
            *self.since_seen.lock().unwrap() = Some(since);
            if let Some(delay) = self.read_delay.or(self.slow_periods) {
                tokio::time::sleep(delay).await;
            }
            if self.fail_periods {
                anyhow::bail!("period store offline");
            }
            Ok(self.periods.clone())
        }
    }

    #[async_trait]
    impl ProfileReader for FakeStore {
        async fn profile(&self, user_id: &str) -> anyhow::Result<Option<UserProfile>> {
            if let Some(delay) = self.read_delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail_profile {
                anyhow::bail!("auth provider offline");
            }
            Ok(self.profiles.get(user_id).cloned())
        }
    }

    fn assembler(store: FakeStore, read_timeout: Duration) -> (Arc<FakeStore>, HealthContextAssembler) {
        let store = Arc::new(store);
        let assembler = HealthContextAssembler::new(
            store.clone(),
            store.clone(),
            store.clone(),
            CycleConfig::default(),
            ContextConfig {
                read_timeout,
                ..ContextConfig::default()
            },
        );
        (store, assembler)
    }

    fn as_of() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn renders_all_sections() {
        let (store, assembler) = assembler(FakeStore::with_user(), Duration::from_secs(1));
        let summary = assembler.assemble("u1", as_of()).await.unwrap();

        assert!(!summary.is_degraded());
        assert!(summary.text.contains("Maya (maya@example.com)"));
        assert!(summary.text.contains("probability 72%, confidence 88%"));
        assert!(summary.text.contains("Multiple follicles detected"));
        assert!(summary.text.contains("Cycle 1: January 1, 2024, January 2, 2024"));
        assert!(summary.text.contains("Cycle 2: January 29, 2024, January 30, 2024"));
        assert!(summary.text.contains("Average cycle length: 28 days"));
        assert_eq!(
            *store.since_seen.lock().unwrap(),
            Some(cycles::parse_date("2023-09-01").unwrap())
        );
    }

    #[tokio::test]
    async fn failing_period_read_degrades() {
        let mut store = FakeStore::with_user();
        store.fail_periods = true;
        let (_, assembler) = assembler(store, Duration::from_secs(1));

        let summary = assembler.assemble("u1", as_of()).await.unwrap();
        assert_eq!(summary.degraded, vec![ContextSection::PeriodLog]);
        assert!(summary.text.contains("Maya"));
        assert!(summary.text.contains("probability 72%"));
        assert!(summary.text.contains("data unavailable"));
        assert!(!summary.text.contains("Cycle 1"));
    }

    #[tokio::test]
    async fn slow_period_read_times_out() {
        let mut store = FakeStore::with_user();
        store.slow_periods = Some(Duration::from_millis(500));
        let (_, assembler) = assembler(store, Duration::from_millis(20));

        let summary = assembler.assemble("u1", as_of()).await.unwrap();
        assert_eq!(summary.degraded, vec![ContextSection::PeriodLog]);
        assert!(summary.text.contains("probability 72%"));
    }

    #[tokio::test]
    async fn missing_diagnosis_is_not_available() {
        let mut store = FakeStore::with_user();
        store.diagnosis = None;
        let (_, assembler) = assembler(store, Duration::from_secs(1));

        let summary = assembler.assemble("u1", as_of()).await.unwrap();
        assert!(!summary.is_degraded());
        assert!(summary.text.contains("Latest PCOS diagnosis: Not available"));
    }

    #[tokio::test]
    async fn failing_diagnosis_read_degrades() {
        let mut store = FakeStore::with_user();
        store.fail_diagnosis = true;
        let (_, assembler) = assembler(store, Duration::from_secs(1));

        let summary = assembler.assemble("u1", as_of()).await.unwrap();
        assert_eq!(summary.degraded, vec![ContextSection::Diagnosis]);
        assert!(summary.text.contains("Latest PCOS diagnosis: data unavailable"));
        assert!(summary.text.contains("Cycle 2"));
    }

    #[tokio::test]
    async fn failing_profile_read_degrades() {
        let mut store = FakeStore::with_user();
        store.fail_profile = true;
        let (_, assembler) = assembler(store, Duration::from_secs(1));

        let summary = assembler.assemble("u1", as_of()).await.unwrap();
        assert_eq!(summary.degraded, vec![ContextSection::Profile]);
        assert!(summary.text.contains("- Name: data unavailable"));
        assert!(summary.text.contains("probability 72%"));
        assert!(summary.text.contains("Cycle 2"));
    }

    #[tokio::test(start_paused = true)]
    async fn reads_overlap_in_time() {
        let mut store = FakeStore::with_user();
        store.read_delay = Some(Duration::from_millis(200));
        let (_, assembler) = assembler(store, Duration::from_secs(1));

        let started = tokio::time::Instant::now();
        let summary = assembler.assemble("u1", as_of()).await.unwrap();
        let elapsed = started.elapsed();

        assert!(!summary.is_degraded());
        assert!(elapsed >= Duration::from_millis(200), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(400), "{elapsed:?}");
    }

    #[tokio::test]
    async fn unknown_user_is_fatal() {
        let (_, assembler) = assembler(FakeStore::with_user(), Duration::from_secs(1));
        match assembler.assemble("ghost", as_of()).await {
            Err(HealthError::UnresolvedUser(id)) => assert_eq!(id, "ghost"),
            other => panic!("expected UnresolvedUser, got {other:?}"),
        }
    }

    #[test]
    fn single_cycle_has_no_prediction_line() {
        let dates = vec![cycles::parse_date("2024-02-10").unwrap()];
        let text = render_summary(None, Some(&None), Some(dates.as_slice()), 6, &CycleConfig::default());
        assert!(text.contains("- Name: data unavailable"));
        assert!(text.contains("Cycle 1: February 10, 2024"));
        assert!(text.contains("Not enough cycles logged"));
    }

    #[test]
    fn profile_without_name_falls_back() {
        let profile = UserProfile {
            user_id: "u2".to_string(),
            display_name: None,
            email: None,
        };
        let text = render_summary(Some(&profile), Some(&None), Some(&[][..]), 6, &CycleConfig::default());
        assert!(text.contains("- Name: User (no email on file)"));
        assert!(text.contains("No periods logged."));
    }

    #[test]
    fn window_clamps_to_month_end() {
        let as_of = cycles::parse_date("2024-08-31").unwrap();
        assert_eq!(window_start(as_of, 6), cycles::parse_date("2024-02-29").unwrap());
    }

    #[test]
    fn prompt_requires_question() {
        let summary = UserContextSummary {
            text: "User context:\n".to_string(),
            degraded: Vec::new(),
        };
        assert!(matches!(compose_prompt(&summary, "   "), Err(HealthError::EmptyPrompt)));
        let prompt = compose_prompt(&summary, " What do my cycles show? ").unwrap();
        assert!(prompt.contains("User context:"));
        assert!(prompt.ends_with("Question: What do my cycles show?\n"));
    }
}
