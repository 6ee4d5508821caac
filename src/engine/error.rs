use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Codes at or below this value are warnings, not defects.
pub const WARNING_THRESHOLD: i8 = -100;

/// Result classes reported by the engine.
///
/// The first three are hard failures that point at a configuration or
/// programming defect. The rest are warnings: the caller may simply retry
/// on a later cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error, Serialize, Deserialize)]
pub enum EngineError {
    #[error("generic error")]
    Generic,
    #[error("no runnable state")]
    NoRunnableState,
    #[error("invalid parameter")]
    InvalidParameter,
    #[error("machine paused")]
    Paused,
    #[error("machine stopped")]
    Stopped,
    #[error("waiting")]
    Waiting,
    #[error("event rejected: a higher priority event is pending")]
    NoPriority,
    #[error("busy")]
    Busy,
}

pub type EngineResult<T = ()> = Result<T, EngineError>;

impl EngineError {
    /// Signed result code, negative for every variant.
    pub const fn code(self) -> i8 {
        match self {
            EngineError::Generic => -1,
            EngineError::NoRunnableState => -2,
            EngineError::InvalidParameter => -3,
            EngineError::Paused => -100,
            EngineError::Stopped => -101,
            EngineError::Waiting => -102,
            EngineError::NoPriority => -103,
            EngineError::Busy => -104,
        }
    }

    pub const fn from_code(code: i8) -> Option<Self> {
        match code {
            -1 => Some(EngineError::Generic),
            -2 => Some(EngineError::NoRunnableState),
            -3 => Some(EngineError::InvalidParameter),
            -100 => Some(EngineError::Paused),
            -101 => Some(EngineError::Stopped),
            -102 => Some(EngineError::Waiting),
            -103 => Some(EngineError::NoPriority),
            -104 => Some(EngineError::Busy),
            _ => None,
        }
    }

    pub const fn is_warning(self) -> bool {
        self.code() <= WARNING_THRESHOLD
    }
}

/// Collapses a result into the signed code a C-style caller would read.
pub fn result_code<T>(result: &EngineResult<T>) -> i8 {
    match result {
        Ok(_) => 0,
        Err(e) => e.code(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_warning_classification() {
        assert!(!EngineError::Generic.is_warning());
        assert!(!EngineError::NoRunnableState.is_warning());
        assert!(!EngineError::InvalidParameter.is_warning());
        assert!(EngineError::Paused.is_warning());
        assert!(EngineError::NoPriority.is_warning());
        assert!(EngineError::Busy.is_warning());
    }

    #[test]
    fn test_code_lookup() {
        assert_eq!(EngineError::from_code(-103), Some(EngineError::NoPriority));
        assert_eq!(EngineError::from_code(0), None);
        assert_eq!(result_code(&Ok::<(), EngineError>(())), 0);
        assert_eq!(result_code::<()>(&Err(EngineError::Stopped)), -101);
    }
}
