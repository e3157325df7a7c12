use thiserror::Error;

pub type SchedulingResult<T> = Result<T, SchedulingError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulingError {
    #[error("End time must be after start time")]
    InvalidOrder,

    #[error("Timeslot is shorter than the minimum of {minimum_minutes} minutes")]
    TooShort { minimum_minutes: i64 },

    #[error("Date lies in the past")]
    PastDate,

    #[error("A timeslot already exists at this date and start time: {0}")]
    DuplicateSlot(String),

    #[error("Timeslot does not exist: {0}")]
    NotFound(String),

    #[error("Timeslot was already booked: {0}")]
    SlotAlreadyReserved(String),

    #[error("Timeslot to book does not exist: {0}")]
    SlotNotFound(String),

    #[error("Persistence failure: {0}")]
    PersistenceFailure(String),

    #[error("Calendar was modified since it was loaded, reload required")]
    SyncConflict,

    #[error("Operation timed out, outcome unknown")]
    Timeout,

    #[error("There are unsaved changes")]
    UnsavedChanges,
}

impl SchedulingError {
    /// Failures worth resubmitting unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::PersistenceFailure(_) | Self::Timeout)
    }

    /// Outcomes the user has to act on (pick another slot, fix the input),
    /// as opposed to system faults.
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            Self::InvalidOrder
                | Self::TooShort { .. }
                | Self::PastDate
                | Self::DuplicateSlot(_)
                | Self::SlotAlreadyReserved(_)
        )
    }
}

impl From<std::io::Error> for SchedulingError {
    fn from(err: std::io::Error) -> Self {
        Self::PersistenceFailure(err.to_string())
    }
}

impl From<serde_json::Error> for SchedulingError {
    fn from(err: serde_json::Error) -> Self {
        Self::PersistenceFailure(err.to_string())
    }
}
