// ABOUTME: Transport channel handle bound to one target plus the events it reports
// All channel events funnel into one queue owned by the session manager

use crate::error::{ConsoleError, Result};
use crate::models::TargetId;
use crate::terminal::protocol::{Framing, Message, WireFrame};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// Handshake finished, the channel accepts writes
    Opened,
    Frame(WireFrame),
    /// Remote side closed cleanly
    Closed,
    /// Dial or I/O failure
    Failed(String),
}

/// A channel event tagged with the session it belongs to
#[derive(Debug, Clone)]
pub struct SessionEvent {
    pub target_id: TargetId,
    pub generation: u64,
    pub event: ChannelEvent,
}

/// Sender half given to a dialer; stamps every event with the owning session
#[derive(Debug, Clone)]
pub struct ChannelEvents {
    target_id: TargetId,
    generation: u64,
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl ChannelEvents {
    pub fn new(target_id: TargetId, generation: u64, tx: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self {
            target_id,
            generation,
            tx,
        }
    }

    pub fn target_id(&self) -> &TargetId {
        &self.target_id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns false once the session manager is gone
    pub fn emit(&self, event: ChannelEvent) -> bool {
        self.tx
            .send(SessionEvent {
                target_id: self.target_id.clone(),
                generation: self.generation,
                event,
            })
            .is_ok()
    }
}

/// Opens transport channels. Dialing must not block: the handshake completes
/// in the background and is reported as `ChannelEvent::Opened` or `Failed`.
pub trait Dialer: Send + Sync {
    fn dial(
        &self,
        target_id: &TargetId,
        framing: Framing,
        events: ChannelEvents,
    ) -> Result<TransportChannel>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Connecting,
    Open,
    Closed,
}

/// Write half of one persistent, ordered connection to a target
#[derive(Debug)]
pub struct TransportChannel {
    target_id: TargetId,
    framing: Framing,
    state: ChannelState,
    outbound: Option<mpsc::UnboundedSender<WireFrame>>,
    task: Option<JoinHandle<()>>,
}

impl TransportChannel {
    pub fn new(
        target_id: TargetId,
        framing: Framing,
        outbound: mpsc::UnboundedSender<WireFrame>,
        task: Option<JoinHandle<()>>,
    ) -> Self {
        Self {
            target_id,
            framing,
            state: ChannelState::Connecting,
            outbound: Some(outbound),
            task,
        }
    }

    /// Channel whose outbound frames land in the returned receiver
    pub fn pair(target_id: TargetId, framing: Framing) -> (Self, mpsc::UnboundedReceiver<WireFrame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(target_id, framing, tx, None), rx)
    }

    pub fn target_id(&self) -> &TargetId {
        &self.target_id
    }

    pub fn framing(&self) -> Framing {
        self.framing
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == ChannelState::Open
    }

    pub(crate) fn mark_open(&mut self) {
        if self.state == ChannelState::Connecting {
            self.state = ChannelState::Open;
        }
    }

    /// Encode and queue a message. Checks state first, never panics on a dead socket.
    pub fn send(&mut self, message: &Message) -> Result<()> {
        if self.state != ChannelState::Open {
            return Err(ConsoleError::SendOnClosedChannel(self.target_id.to_string()));
        }

        let frame = match self.framing.encode(message) {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                debug!(
                    "{} framing cannot express {} for {}, skipping",
                    self.framing,
                    message.kind(),
                    self.target_id
                );
                return Ok(());
            }
            Err(e) => return Err(ConsoleError::Protocol(e.to_string())),
        };

        let delivered = self
            .outbound
            .as_ref()
            .map(|tx| tx.send(frame).is_ok())
            .unwrap_or(false);

        if delivered {
            Ok(())
        } else {
            warn!("Outbound queue for {} is gone, marking channel closed", self.target_id);
            self.state = ChannelState::Closed;
            self.outbound = None;
            Err(ConsoleError::SendOnClosedChannel(self.target_id.to_string()))
        }
    }

    /// Idempotent. An open channel drains its queue and sends a close frame;
    /// a channel still handshaking is aborted.
    pub fn close(&mut self) {
        if self.state == ChannelState::Closed {
            return;
        }
        let was_connecting = self.state == ChannelState::Connecting;
        self.state = ChannelState::Closed;
        self.outbound = None;

        if let Some(task) = self.task.take() {
            if was_connecting {
                task.abort();
            }
        }
        debug!("Transport channel for {} closed", self.target_id);
    }
}

impl Drop for TransportChannel {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel() -> (TransportChannel, mpsc::UnboundedReceiver<WireFrame>) {
        TransportChannel::pair(TargetId::new("c1").unwrap(), Framing::Tagged)
    }

    #[test]
    fn test_send_before_open_is_rejected() {
        let (mut channel, mut rx) = channel();
        let result = channel.send(&Message::input("ls\n"));
        assert_eq!(result, Err(ConsoleError::SendOnClosedChannel("c1".into())));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_send_preserves_order() {
        let (mut channel, mut rx) = channel();
        channel.mark_open();
        channel.send(&Message::input("a")).unwrap();
        channel.send(&Message::resize(100, 30)).unwrap();
        channel.send(&Message::input("b")).unwrap();

        let kinds: Vec<WireFrame> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert_eq!(kinds.len(), 3);
        assert_eq!(kinds[0], WireFrame::Text(r#"{"type":"input","data":"a"}"#.into()));
        assert_eq!(kinds[2], WireFrame::Text(r#"{"type":"input","data":"b"}"#.into()));
    }

    #[test]
    fn test_close_is_idempotent_and_blocks_sends() {
        let (mut channel, _rx) = channel();
        channel.mark_open();
        channel.close();
        channel.close();
        assert_eq!(channel.state(), ChannelState::Closed);
        assert!(channel.send(&Message::input("x")).is_err());

        // A closed channel never reopens
        channel.mark_open();
        assert_eq!(channel.state(), ChannelState::Closed);
    }

    #[test]
    fn test_send_after_backend_dropped_marks_closed() {
        let (mut channel, rx) = channel();
        channel.mark_open();
        drop(rx);
        assert!(channel.send(&Message::input("x")).is_err());
        assert_eq!(channel.state(), ChannelState::Closed);
    }

    #[test]
    fn test_events_are_stamped_with_generation() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let events = ChannelEvents::new(TargetId::new("c9").unwrap(), 7, tx);
        assert!(events.emit(ChannelEvent::Opened));
        let event = rx.try_recv().unwrap();
        assert_eq!(event.target_id.as_str(), "c9");
        assert_eq!(event.generation, 7);
        assert_eq!(event.event, ChannelEvent::Opened);
    }
}
