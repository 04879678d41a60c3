/// Errors surfaced to callers of the library.
///
/// Missing history is not an error (`predict` returns `None`), and failed
/// context reads are recorded on the summary instead of being raised.
#[derive(Debug, thiserror::Error)]
pub enum HealthError {
    #[error("invalid date format: {0:?} (expected YYYY-MM-DD)")]
    InvalidDateFormat(String),
    #[error("user {0:?} could not be resolved")]
    UnresolvedUser(String),
    #[error("prompt must not be empty")]
    EmptyPrompt,
}
