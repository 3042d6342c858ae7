// ABOUTME: Per-target read-only log tails, independent of interactive sessions
// Polling or push streaming, plus the view model the presentation layer renders

pub mod stream;
pub mod tail;
pub mod view;

pub use stream::{LOG_STREAM_PATH, WsLogStreamer};
pub use tail::{LogStreamer, LogTailEvent, LogTailId, LogTailManager, LogUpdate, LogUpdateSender};
pub use view::LogView;

use serde::{Deserialize, Serialize};

/// How a log tail obtains content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LogMode {
    /// Re-fetch the whole recent log; each fetch replaces the view
    #[default]
    Poll,
    /// Server pushes chunks over a WebSocket; chunks are appended
    Push,
}
