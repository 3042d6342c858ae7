// ABOUTME: WebSocket log streamer for the backend's push log endpoint
// Each text or binary message is one chunk; a server close ends the tail

use crate::error::{ConsoleError, Result};
use crate::logs::tail::{LogStreamer, LogUpdate, LogUpdateSender};
use crate::models::TargetId;
use crate::terminal::websocket_url;
use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::time::Duration;
use tokio_tungstenite::{connect_async, tungstenite};
use tracing::{debug, info};
use url::Url;

/// Path of the push log endpoint
pub const LOG_STREAM_PATH: &str = "/container/logs";

pub struct WsLogStreamer {
    server: Url,
    connect_timeout: Duration,
}

impl WsLogStreamer {
    pub fn new(server_url: &str, connect_timeout: Duration) -> Result<Self> {
        let server = Url::parse(server_url)
            .map_err(|e| ConsoleError::Config(format!("server url {}: {}", server_url, e)))?;
        Ok(Self {
            server,
            connect_timeout,
        })
    }

    pub fn stream_url(&self, target_id: &TargetId) -> Result<Url> {
        websocket_url(&self.server, LOG_STREAM_PATH, target_id)
    }
}

fn failure(target_id: &TargetId, reason: impl ToString) -> ConsoleError {
    ConsoleError::LogFetchFailed {
        target: target_id.to_string(),
        reason: reason.to_string(),
    }
}

#[async_trait]
impl LogStreamer for WsLogStreamer {
    async fn stream(&self, target_id: &TargetId, updates: LogUpdateSender) -> Result<()> {
        let url = self.stream_url(target_id)?;
        debug!("Connecting log stream {}", url);

        let (ws_stream, _) = tokio::time::timeout(self.connect_timeout, connect_async(url.as_str()))
            .await
            .map_err(|_| failure(target_id, "connection timed out"))?
            .map_err(|e| failure(target_id, e))?;

        info!("Log stream connected for {}", target_id);
        let (_sink, mut incoming) = ws_stream.split();

        while let Some(message) = incoming.next().await {
            let chunk = match message.map_err(|e| failure(target_id, e))? {
                tungstenite::Message::Text(text) => text,
                tungstenite::Message::Binary(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                tungstenite::Message::Close(_) => break,
                _ => continue,
            };
            if !updates.send(LogUpdate::Append(chunk)) {
                debug!("Log tail for {} dropped, stopping stream", target_id);
                return Ok(());
            }
        }

        info!("Log stream for {} closed by server", target_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_url() {
        let streamer = WsLogStreamer::new("http://localhost:8080", Duration::from_secs(1)).unwrap();
        let url = streamer.stream_url(&TargetId::new("web-1").unwrap()).unwrap();
        assert_eq!(url.as_str(), "ws://localhost:8080/container/logs?container=web-1");
    }
}
