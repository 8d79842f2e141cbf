use chrono::NaiveDate;
use ulid::Ulid;

#[derive(Debug)]
pub enum EngineError {
    /// Malformed or missing input. `path` names the offending field.
    Validation {
        path: &'static str,
        message: String,
    },
    /// Effective end date precedes the start after merging an update.
    InvalidRange {
        start: NaiveDate,
        end: NaiveDate,
    },
    /// Interval overlaps the active booking carried here.
    Conflict(Ulid),
    NotFound(Ulid),
    AlreadyExists(Ulid),
    HasDependents(Ulid),
    LimitExceeded(&'static str),
    WalError(String),
}

impl EngineError {
    pub(crate) fn validation(path: &'static str, message: impl Into<String>) -> Self {
        EngineError::Validation {
            path,
            message: message.into(),
        }
    }

    /// Whether the caller can fix the request and retry.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            EngineError::Validation { .. }
                | EngineError::InvalidRange { .. }
                | EngineError::Conflict(_)
        )
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Validation { path, message } => {
                write!(f, "invalid {path}: {message}")
            }
            EngineError::InvalidRange { start, end } => {
                write!(f, "end date {end} is before start date {start}")
            }
            EngineError::Conflict(id) => {
                write!(f, "spot already booked in this period (booking {id})")
            }
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::HasDependents(id) => {
                write!(f, "cannot delete {id}: dependent records exist")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
