// ABOUTME: Terminal transport module: wire protocol, channel handles and the WebSocket dialer
// Provides the ordered bidirectional stream between a session and its container shell

pub mod buffer;
pub mod channel;
pub mod protocol;
pub mod websocket_client;

pub use buffer::{ScrollbackBuffer, ScrollbackFactory, TerminalFactory, TerminalSink};
pub use channel::{ChannelEvent, ChannelEvents, ChannelState, Dialer, SessionEvent, TransportChannel};
pub use protocol::{Framing, Message, WireFrame};
pub use websocket_client::{websocket_url, WebSocketDialer};
