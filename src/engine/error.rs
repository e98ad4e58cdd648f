use ulid::Ulid;

use crate::model::Day;
use crate::store::StoreError;

#[derive(Debug)]
pub enum EngineError {
    /// Range end is not after its start (check-out on or before check-in).
    InvalidRange { start: Day, end: Day },
    /// The candidate overlaps the record with this id.
    DateConflict(Ulid),
    NotFound(Ulid),
    MissingField(&'static str),
    LimitExceeded(&'static str),
    StoreUnavailable(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::InvalidRange { start, end } => {
                write!(f, "check-out must be after check-in (got {start} to {end})")
            }
            EngineError::DateConflict(id) => {
                write!(f, "these dates conflict with an existing booking or request: {id}")
            }
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::MissingField(field) => write!(f, "{field} is required"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::StoreUnavailable(e) => write!(f, "store unavailable: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Unavailable(msg) => EngineError::StoreUnavailable(msg),
        }
    }
}
