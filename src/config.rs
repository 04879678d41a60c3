use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleConfig {
    /// Largest gap (days) between two logged days of the same period.
    pub intra_period_gap_days: i64,
    pub period_duration_days: i64,
    pub luteal_phase_days: i64,
    pub fertile_window_lookback_days: i64,
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            intra_period_gap_days: 10,
            period_duration_days: 5,
            luteal_phase_days: 14,
            fertile_window_lookback_days: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextConfig {
    pub context_window_months: u32,
    /// Applied to each external read separately.
    pub read_timeout: Duration,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            context_window_months: 6,
            read_timeout: Duration::from_secs(3),
        }
    }
}
