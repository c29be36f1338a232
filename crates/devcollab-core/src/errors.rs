/// Rule violations raised by the board and habit domain logic.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DomainError {
    #[error("Estimate must be between 1 and 5 Pomodoros")]
    EstimateOutOfRange(i64),
    #[error("Timer already running")]
    TimerAlreadyRunning,
    #[error("No timer running")]
    TimerNotRunning,
    #[error("User already has an active Pomodoro session")]
    SessionAlreadyActive,
    #[error("Cannot pause a completed Pomodoro")]
    SessionCompleted,
    #[error("unknown status: {0}")]
    UnknownStatus(String),
    #[error("unknown frequency: {0}")]
    UnknownFrequency(String),
    #[error("unknown break type: {0}")]
    UnknownBreakType(String),
}

impl DomainError {
    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::EstimateOutOfRange(_) => "estimate_out_of_range",
            Self::TimerAlreadyRunning => "timer_already_running",
            Self::TimerNotRunning => "timer_not_running",
            Self::SessionAlreadyActive => "session_already_active",
            Self::SessionCompleted => "session_completed",
            Self::UnknownStatus(_) => "unknown_status",
            Self::UnknownFrequency(_) => "unknown_frequency",
            Self::UnknownBreakType(_) => "unknown_break_type",
        }
    }
}
