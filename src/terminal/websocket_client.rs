// ABOUTME: WebSocket dialer for the backend's interactive terminal endpoint
// Runs one I/O task per channel and reports lifecycle through ChannelEvents

use crate::error::{ConsoleError, Result};
use crate::models::TargetId;
use crate::terminal::channel::{ChannelEvent, ChannelEvents, Dialer, TransportChannel};
use crate::terminal::protocol::{Framing, WireFrame};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::Duration;
use tokio_tungstenite::{connect_async, tungstenite};
use tracing::{debug, error, info, warn};
use url::Url;

/// Path of the interactive terminal endpoint
pub const TERMINAL_PATH: &str = "/ws";

impl From<WireFrame> for tungstenite::Message {
    fn from(frame: WireFrame) -> Self {
        match frame {
            WireFrame::Text(text) => tungstenite::Message::Text(text),
            WireFrame::Binary(bytes) => tungstenite::Message::Binary(bytes),
        }
    }
}

/// Build `ws(s)://host{prefix}{path}?container={id}` from the HTTP server URL,
/// keeping any path prefix the server is mounted under
pub fn websocket_url(server: &Url, path: &str, target_id: &TargetId) -> Result<Url> {
    let mut url = server.clone();
    url.set_fragment(None);
    url.path_segments_mut()
        .map_err(|()| ConsoleError::Config(format!("invalid endpoint {} for {}", path, server)))?
        .pop_if_empty()
        .extend(path.split('/').filter(|segment| !segment.is_empty()));

    let scheme = match url.scheme() {
        "https" | "wss" => "wss",
        _ => "ws",
    };
    url.set_scheme(scheme)
        .map_err(|()| ConsoleError::Config(format!("cannot use {} scheme for {}", scheme, server)))?;
    url.query_pairs_mut()
        .clear()
        .append_pair("container", target_id.as_str());
    Ok(url)
}

pub struct WebSocketDialer {
    server: Url,
    connect_timeout: Duration,
}

impl WebSocketDialer {
    /// Create a dialer for the given backend base URL
    pub fn new(server_url: &str, connect_timeout: Duration) -> Result<Self> {
        let server = Url::parse(server_url)
            .map_err(|e| ConsoleError::Config(format!("server url {}: {}", server_url, e)))?;
        Ok(Self {
            server,
            connect_timeout,
        })
    }

    pub fn terminal_url(&self, target_id: &TargetId) -> Result<Url> {
        websocket_url(&self.server, TERMINAL_PATH, target_id)
    }

    /// Handle a single WebSocket connection
    async fn connection_handler(
        url: Url,
        events: ChannelEvents,
        mut outbound: mpsc::UnboundedReceiver<WireFrame>,
        connect_timeout: Duration,
    ) {
        debug!("Attempting WebSocket handshake with {}", url);

        let ws_stream = match tokio::time::timeout(connect_timeout, connect_async(url.as_str())).await {
            Ok(Ok((stream, response))) => {
                debug!("WebSocket response status: {:?}", response.status());
                stream
            }
            Ok(Err(e)) => {
                error!("WebSocket handshake with {} failed: {}", url, e);
                events.emit(ChannelEvent::Failed(e.to_string()));
                return;
            }
            Err(_) => {
                error!("WebSocket handshake with {} timed out", url);
                events.emit(ChannelEvent::Failed(format!(
                    "connection timeout after {}ms",
                    connect_timeout.as_millis()
                )));
                return;
            }
        };

        info!("Terminal channel connected for {}", events.target_id());
        if !events.emit(ChannelEvent::Opened) {
            return;
        }

        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        loop {
            tokio::select! {
                // Outgoing frames, in the order they were queued
                frame = outbound.recv() => match frame {
                    Some(frame) => {
                        if let Err(e) = ws_sender.send(frame.into()).await {
                            error!("Failed to send WebSocket frame: {}", e);
                            events.emit(ChannelEvent::Failed(e.to_string()));
                            return;
                        }
                    }
                    None => {
                        // Local close: the channel handle dropped its queue
                        debug!("Closing terminal channel for {}", events.target_id());
                        let _ = ws_sender.send(tungstenite::Message::Close(None)).await;
                        return;
                    }
                },

                incoming = ws_receiver.next() => match incoming {
                    Some(Ok(tungstenite::Message::Text(text))) => {
                        events.emit(ChannelEvent::Frame(WireFrame::Text(text)));
                    }
                    Some(Ok(tungstenite::Message::Binary(bytes))) => {
                        events.emit(ChannelEvent::Frame(WireFrame::Binary(bytes)));
                    }
                    Some(Ok(tungstenite::Message::Close(_))) | None => {
                        info!("WebSocket closed by server for {}", events.target_id());
                        events.emit(ChannelEvent::Closed);
                        return;
                    }
                    Some(Ok(_)) => {
                        // Ping/Pong are answered by tungstenite
                    }
                    Some(Err(e)) => {
                        warn!("WebSocket error for {}: {}", events.target_id(), e);
                        events.emit(ChannelEvent::Failed(e.to_string()));
                        return;
                    }
                },
            }
        }
    }
}

impl Dialer for WebSocketDialer {
    fn dial(
        &self,
        target_id: &TargetId,
        framing: Framing,
        events: ChannelEvents,
    ) -> Result<TransportChannel> {
        let url = self.terminal_url(target_id)?;
        info!("Dialing terminal channel {} ({} framing)", url, framing);

        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(Self::connection_handler(url, events, rx, self.connect_timeout));

        Ok(TransportChannel::new(target_id.clone(), framing, tx, Some(task)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_url_from_http() {
        let dialer = WebSocketDialer::new("http://localhost:8080", Duration::from_secs(1)).unwrap();
        let url = dialer.terminal_url(&TargetId::new("abc123").unwrap()).unwrap();
        assert_eq!(url.as_str(), "ws://localhost:8080/ws?container=abc123");
    }

    #[test]
    fn test_terminal_url_from_https_keeps_tls() {
        let server = Url::parse("https://console.example.com/").unwrap();
        let url = websocket_url(&server, "/container/logs", &TargetId::new("a b").unwrap()).unwrap();
        assert_eq!(url.as_str(), "wss://console.example.com/container/logs?container=a+b");
    }

    #[test]
    fn test_terminal_url_keeps_server_path_prefix() {
        let server = Url::parse("https://host/console/").unwrap();
        let url = websocket_url(&server, TERMINAL_PATH, &TargetId::new("abc123").unwrap()).unwrap();
        assert_eq!(url.as_str(), "wss://host/console/ws?container=abc123");

        let server = Url::parse("http://host/console?token=x").unwrap();
        let url = websocket_url(&server, "/container/logs", &TargetId::new("abc123").unwrap()).unwrap();
        assert_eq!(url.as_str(), "ws://host/console/container/logs?container=abc123");
    }

    #[test]
    fn test_rejects_invalid_server_url() {
        assert!(WebSocketDialer::new("not a url", Duration::from_secs(1)).is_err());
    }

    #[tokio::test]
    async fn test_unreachable_backend_reports_failure() {
        // Port 9 (discard) is closed on CI machines
        let dialer = WebSocketDialer::new("http://127.0.0.1:9", Duration::from_secs(2)).unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = TargetId::new("c1").unwrap();
        let channel = dialer
            .dial(&id, Framing::Tagged, ChannelEvents::new(id.clone(), 1, tx))
            .unwrap();
        assert!(!channel.is_open());

        let event = rx.recv().await.unwrap();
        assert!(matches!(event.event, ChannelEvent::Failed(_)));
    }
}
