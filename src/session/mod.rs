// ABOUTME: Session management: one interactive channel plus terminal buffer per target
// Provides the session state machine, reconnection policy and resize debouncing

pub mod manager;
pub mod resize;

pub use manager::{SessionManager, SessionSettings};
pub use resize::{ResizeDebouncer, TerminalSize};

use crate::error::ConsoleError;
use crate::models::TargetId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// What happens after a session ends without the user closing it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReconnectPolicy {
    /// Keep the terminal, print a prompt, re-dial when the user presses Enter
    #[default]
    AwaitAcknowledge,
    /// Release everything; the user opens the target again
    Silent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionFault {
    OpenFailed(String),
    ClosedUnexpectedly(String),
    BackendUnreachable,
}

impl SessionFault {
    /// The error surfaced for a session that ended with this fault
    pub fn to_error(&self, target_id: &TargetId) -> ConsoleError {
        match self {
            SessionFault::OpenFailed(reason) => ConsoleError::TransportOpenFailed {
                target: target_id.to_string(),
                reason: reason.clone(),
            },
            SessionFault::ClosedUnexpectedly(reason) => ConsoleError::TransportClosedUnexpectedly {
                target: target_id.to_string(),
                reason: reason.clone(),
            },
            SessionFault::BackendUnreachable => ConsoleError::BackendUnreachable,
        }
    }

    /// Faults local to one transport, as opposed to the backend going away
    pub fn is_transport(&self) -> bool {
        !matches!(self, SessionFault::BackendUnreachable)
    }
}

impl fmt::Display for SessionFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionFault::OpenFailed(reason) => write!(f, "failed to open: {}", reason),
            SessionFault::ClosedUnexpectedly(reason) => write!(f, "closed unexpectedly: {}", reason),
            SessionFault::BackendUnreachable => f.write_str("backend unreachable"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Open,
    Closed,
    Errored(SessionFault),
}

impl SessionState {
    /// Connecting or Open: a second open() is a no-op
    pub fn is_live(&self) -> bool {
        matches!(self, SessionState::Connecting | SessionState::Open)
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Errored(_))
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => f.write_str("idle"),
            SessionState::Connecting => f.write_str("connecting"),
            SessionState::Open => f.write_str("open"),
            SessionState::Closed => f.write_str("closed"),
            SessionState::Errored(fault) => write!(f, "errored ({})", fault),
        }
    }
}

/// Observable outcome of a session operation or channel event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionUpdate {
    StateChanged {
        target_id: TargetId,
        state: SessionState,
    },
    /// Transport and terminal released, mapping removed
    Released { target_id: TargetId },
}
