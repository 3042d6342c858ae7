// ABOUTME: Error types for the session multiplexer
// Covers registry, connectivity gating, transport and log tail failures

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConsoleError {
    #[error("Target registry fetch failed: {0}")]
    RegistryFetchFailed(String),

    #[error("Authentication expired, reauthentication required")]
    AuthExpired,

    #[error("Backend is unreachable")]
    BackendUnreachable,

    #[error("Unknown target: {0}")]
    UnknownTarget(String),

    #[error("Target has not been created yet: {0}")]
    TargetNotMaterialized(String),

    #[error("Target {id} is not running (status: {status})")]
    TargetNotRunning { id: String, status: String },

    #[error("Failed to open transport for {target}: {reason}")]
    TransportOpenFailed { target: String, reason: String },

    #[error("Transport for {target} closed unexpectedly: {reason}")]
    TransportClosedUnexpectedly { target: String, reason: String },

    #[error("Send on closed channel: {0}")]
    SendOnClosedChannel(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Log fetch failed for {target}: {reason}")]
    LogFetchFailed { target: String, reason: String },

    #[error("Unknown log tail: {0}")]
    UnknownLogTail(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Console has shut down")]
    ConsoleClosed,
}

impl ConsoleError {
    /// Errors that say something about backend reachability as a whole
    pub fn is_global(&self) -> bool {
        matches!(
            self,
            ConsoleError::RegistryFetchFailed(_)
                | ConsoleError::AuthExpired
                | ConsoleError::BackendUnreachable
        )
    }
}

pub type Result<T, E = ConsoleError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_registry_failures_are_global() {
        assert!(ConsoleError::RegistryFetchFailed("timeout".into()).is_global());
        assert!(ConsoleError::AuthExpired.is_global());
        assert!(!ConsoleError::TransportClosedUnexpectedly {
            target: "c1".into(),
            reason: "reset".into(),
        }
        .is_global());
        assert!(!ConsoleError::LogFetchFailed {
            target: "c1".into(),
            reason: "500".into(),
        }
        .is_global());
    }

    #[test]
    fn test_error_messages_name_the_target() {
        let err = ConsoleError::TargetNotRunning {
            id: "c2".into(),
            status: "stopped".into(),
        };
        assert_eq!(err.to_string(), "Target c2 is not running (status: stopped)");
    }
}
