//! Error taxonomy for a single check run
//!
//! Every failure a mode can produce ends up as a [`TestError`] at the
//! `Check::run_once` boundary, where it is turned into counters and a
//! stored detail string. None of these escape the scheduling loop.

use std::time::Duration;
use thiserror::Error;

use crate::controller::ControllerError;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TestError {
    /// Bad or missing configuration for this check (e.g. no `src` for an
    /// originating mode)
    #[error("configuration error: {0}")]
    Config(String),

    #[error("wrong caller ID: expected {expected}, got {received}")]
    WrongCallerId { expected: String, received: String },

    #[error("DTMF mismatch at position {position}: expected '{expected}', got '{digit}'")]
    Dtmf {
        expected: char,
        digit: char,
        position: usize,
    },

    #[error("run exceeded its timeout of {0:?}")]
    Timeout(Duration),

    /// A second inbound call hit a destination whose leg is already claimed
    #[error("unexpected second inbound call on {0}")]
    Collision(String),

    #[error("run cancelled")]
    Cancelled,

    #[error(transparent)]
    Controller(#[from] ControllerError),
}

impl TestError {
    /// Short stable name of the error kind, used to detect when a failing
    /// check starts failing differently.
    pub fn kind(&self) -> &'static str {
        match self {
            TestError::Config(_) => "ConfigError",
            TestError::WrongCallerId { .. } => "WrongCallerID",
            TestError::Dtmf { .. } => "DTMFError",
            TestError::Timeout(_) => "TimeoutError",
            TestError::Collision(_) => "CollisionError",
            TestError::Cancelled => "Cancelled",
            TestError::Controller(_) => "ControllerError",
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        TestError::Config(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names() {
        assert_eq!(TestError::config("x").kind(), "ConfigError");
        assert_eq!(TestError::Timeout(Duration::from_secs(5)).kind(), "TimeoutError");
        assert_eq!(
            TestError::Dtmf { expected: '1', digit: '2', position: 0 }.kind(),
            "DTMFError"
        );
        assert_eq!(TestError::Collision("l1".into()).kind(), "CollisionError");
    }

    #[test]
    fn test_controller_error_converts() {
        let err: TestError = ControllerError::NotFound("chan-1".into()).into();
        assert_eq!(err.kind(), "ControllerError");
        assert!(err.to_string().contains("chan-1"));
    }

    #[test]
    fn test_dtmf_display() {
        let err = TestError::Dtmf { expected: '5', digit: '7', position: 3 };
        let msg = err.to_string();
        assert!(msg.contains("position 3"));
        assert!(msg.contains("'5'"));
        assert!(msg.contains("'7'"));
    }
}
