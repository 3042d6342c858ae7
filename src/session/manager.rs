// ABOUTME: Session lifecycle management for interactive container shells
// Owns target id → {transport channel, terminal buffer}; drives the per-session state machine

use crate::config::AppConfig;
use crate::connectivity::Connectivity;
use crate::error::{ConsoleError, Result};
use crate::models::{TargetId, TargetSnapshot};
use crate::session::resize::{ResizeDebouncer, TerminalSize};
use crate::session::{ReconnectPolicy, SessionFault, SessionState, SessionUpdate};
use crate::terminal::{
    ChannelEvent, ChannelEvents, Dialer, Framing, Message, SessionEvent, TerminalFactory, TerminalSink,
    TransportChannel,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Written into the terminal when a session ends and awaits acknowledgment
pub const RECONNECT_PROMPT: &str = "\r\n\x1b[33mConnection closed. Press Enter to reconnect...\x1b[0m\r\n";

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub framing: Framing,
    pub reconnect: ReconnectPolicy,
    pub resize_debounce: Duration,
    pub initial_size: TerminalSize,
}

impl SessionSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            framing: config.session.framing,
            reconnect: config.session.reconnect,
            resize_debounce: config.resize_debounce(),
            initial_size: TerminalSize::new(config.session.initial_cols, config.session.initial_rows),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// Transport and terminal live and die together inside a session
struct Session {
    generation: u64,
    state: SessionState,
    channel: TransportChannel,
    terminal: Box<dyn TerminalSink>,
    resize: ResizeDebouncer,
}

impl Session {
    fn release(&mut self) {
        self.channel.close();
        self.terminal.dispose();
        self.resize.cancel();
    }
}

enum InputAction {
    Forward,
    Reconnect,
    Drop,
}

pub struct SessionManager {
    sessions: HashMap<TargetId, Session>,
    dialer: Arc<dyn Dialer>,
    terminals: Arc<dyn TerminalFactory>,
    targets: watch::Receiver<TargetSnapshot>,
    connectivity: watch::Receiver<Connectivity>,
    settings: SessionSettings,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    events_rx: mpsc::UnboundedReceiver<SessionEvent>,
    next_generation: u64,
}

impl SessionManager {
    pub fn new(
        dialer: Arc<dyn Dialer>,
        terminals: Arc<dyn TerminalFactory>,
        targets: watch::Receiver<TargetSnapshot>,
        connectivity: watch::Receiver<Connectivity>,
        settings: SessionSettings,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            sessions: HashMap::new(),
            dialer,
            terminals,
            targets,
            connectivity,
            settings,
            events_tx,
            events_rx,
            next_generation: 0,
        }
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Dial a new session. A live session for the target makes this a no-op.
    pub fn open(&mut self, target_id: &TargetId) -> Result<()> {
        if let Some(existing) = self.sessions.get(target_id) {
            if existing.state.is_live() {
                debug!("Session for {} already {}, ignoring open", target_id, existing.state);
                return Ok(());
            }
        }

        if !self.connectivity.borrow().is_reachable() {
            debug!("Refusing to open {} while backend is unreachable", target_id);
            return Err(ConsoleError::BackendUnreachable);
        }

        let target = self
            .targets
            .borrow()
            .iter()
            .find(|t| t.id == target_id.as_str())
            .cloned()
            .ok_or_else(|| ConsoleError::UnknownTarget(target_id.to_string()))?;

        if !target.status.is_running() {
            return Err(ConsoleError::TargetNotRunning {
                id: target_id.to_string(),
                status: target.status.to_string(),
            });
        }

        // A finished session is replaced by a brand-new one
        self.release(target_id);

        self.next_generation += 1;
        let generation = self.next_generation;
        let events = ChannelEvents::new(target_id.clone(), generation, self.events_tx.clone());

        let channel = self
            .dialer
            .dial(target_id, self.settings.framing, events)
            .map_err(|e| match e {
                ConsoleError::TransportOpenFailed { .. } => e,
                other => ConsoleError::TransportOpenFailed {
                    target: target_id.to_string(),
                    reason: other.to_string(),
                },
            })?;

        let terminal = self.terminals.allocate(&target);
        let session = Session {
            generation,
            state: SessionState::Connecting,
            channel,
            terminal,
            resize: ResizeDebouncer::new(self.settings.initial_size, self.settings.resize_debounce),
        };

        info!(
            "Opening session for {} ({}), generation {}",
            target_id, target.display_name, generation
        );
        self.sessions.insert(target_id.clone(), session);
        Ok(())
    }

    /// Release transport and terminal. Always safe; returns whether a session existed.
    pub fn close(&mut self, target_id: &TargetId) -> bool {
        let released = self.release(target_id);
        if released {
            info!("Closed session for {}", target_id);
        }
        released
    }

    fn release(&mut self, target_id: &TargetId) -> bool {
        match self.sessions.remove(target_id) {
            Some(mut session) => {
                session.release();
                session.state = SessionState::Closed;
                true
            }
            None => false,
        }
    }

    /// Close every session, used on shutdown
    pub fn close_all(&mut self) -> Vec<TargetId> {
        let ids = self.target_ids();
        for id in &ids {
            self.release(id);
        }
        ids
    }

    /// Record a viewport size; transmitted once the debounce window settles
    pub fn on_resize(&mut self, target_id: &TargetId, cols: u16, rows: u16) {
        let Some(session) = self.sessions.get_mut(target_id) else {
            return;
        };
        let size = TerminalSize::new(cols, rows);
        if size.is_empty() {
            return;
        }
        if session.state == SessionState::Open {
            session.resize.schedule(size, Instant::now());
        } else {
            session.resize.observe(size);
        }
    }

    /// Earliest pending resize deadline across all sessions
    pub fn next_resize_deadline(&self) -> Option<Instant> {
        self.sessions
            .values()
            .filter_map(|s| s.resize.deadline())
            .min()
    }

    /// Transmit every resize whose window has elapsed; returns how many were sent
    pub fn flush_resizes(&mut self, now: Instant) -> usize {
        let mut sent = 0;
        for (target_id, session) in &mut self.sessions {
            let Some(size) = session.resize.take_due(now) else {
                continue;
            };
            if session.state != SessionState::Open {
                continue;
            }
            match session.channel.send(&Message::resize(size.cols, size.rows)) {
                Ok(()) => {
                    debug!("Resized {} to {}x{}", target_id, size.cols, size.rows);
                    session.resize.mark_sent(size);
                    sent += 1;
                }
                Err(e) => warn!("Dropping resize for {}: {}", target_id, e),
            }
        }
        sent
    }

    /// Forward keystrokes. Dropped unless the session is open; no buffering across disconnects.
    pub fn on_input(&mut self, target_id: &TargetId, bytes: &[u8]) -> Result<()> {
        let action = match self.sessions.get(target_id) {
            None => InputAction::Drop,
            Some(session) => match session.state {
                SessionState::Open => InputAction::Forward,
                SessionState::Closed | SessionState::Errored(_)
                    if self.settings.reconnect == ReconnectPolicy::AwaitAcknowledge
                        && bytes.iter().any(|b| *b == b'\r' || *b == b'\n') =>
                {
                    InputAction::Reconnect
                }
                _ => InputAction::Drop,
            },
        };

        match action {
            InputAction::Forward => {
                if let Some(session) = self.sessions.get_mut(target_id) {
                    if let Err(e) = session.channel.send(&Message::input(bytes.to_vec())) {
                        warn!("Dropping input for {}: {}", target_id, e);
                    }
                }
                Ok(())
            }
            InputAction::Reconnect => {
                info!("Reconnect acknowledged for {}", target_id);
                self.open(target_id)
            }
            InputAction::Drop => {
                debug!("Dropping {} bytes of input for {}", bytes.len(), target_id);
                Ok(())
            }
        }
    }

    /// Wait for the next channel event from any session
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        self.events_rx.recv().await
    }

    /// Handle every event already queued, without waiting
    pub fn process_pending(&mut self) -> Vec<SessionUpdate> {
        let mut updates = Vec::new();
        while let Ok(event) = self.events_rx.try_recv() {
            updates.extend(self.handle_event(event));
        }
        updates
    }

    /// Single dispatch point for channel events
    pub fn handle_event(&mut self, event: SessionEvent) -> Vec<SessionUpdate> {
        let SessionEvent {
            target_id,
            generation,
            event,
        } = event;

        let Some(session) = self.sessions.get_mut(&target_id) else {
            debug!("Ignoring {:?} for released session {}", event, target_id);
            return Vec::new();
        };
        if session.generation != generation {
            debug!("Ignoring stale event for {} (generation {})", target_id, generation);
            return Vec::new();
        }

        let finished = match (event, session.state.clone()) {
            (ChannelEvent::Opened, SessionState::Connecting) => {
                session.channel.mark_open();
                session.state = SessionState::Open;

                let size = session.resize.current();
                match session.channel.send(&Message::resize(size.cols, size.rows)) {
                    Ok(()) => session.resize.mark_sent(size),
                    Err(e) => warn!("Failed to send initial resize for {}: {}", target_id, e),
                }

                info!("Session for {} is open", target_id);
                return vec![SessionUpdate::StateChanged {
                    target_id,
                    state: SessionState::Open,
                }];
            }
            (ChannelEvent::Frame(frame), SessionState::Open) => {
                let bytes = session.channel.framing().decode(frame);
                session.terminal.write_bytes(&bytes);
                return Vec::new();
            }
            (ChannelEvent::Closed, SessionState::Connecting) => SessionState::Errored(
                SessionFault::OpenFailed("closed during handshake".to_string()),
            ),
            (ChannelEvent::Closed, SessionState::Open) => SessionState::Closed,
            (ChannelEvent::Failed(reason), SessionState::Connecting) => {
                SessionState::Errored(SessionFault::OpenFailed(reason))
            }
            (ChannelEvent::Failed(reason), SessionState::Open) => {
                SessionState::Errored(SessionFault::ClosedUnexpectedly(reason))
            }
            (event, state) => {
                debug!("Ignoring {:?} for {} in state {}", event, target_id, state);
                return Vec::new();
            }
        };

        warn!("Session for {} ended: {}", target_id, finished);
        self.conclude(&target_id, finished)
    }

    /// Tear down every live session after the backend became unreachable
    pub fn on_connectivity_lost(&mut self) -> Vec<SessionUpdate> {
        let live: Vec<TargetId> = self
            .sessions
            .iter()
            .filter(|(_, s)| s.state.is_live())
            .map(|(id, _)| id.clone())
            .collect();

        live.iter()
            .flat_map(|id| {
                self.conclude(id, SessionState::Errored(SessionFault::BackendUnreachable))
            })
            .collect()
    }

    fn conclude(&mut self, target_id: &TargetId, state: SessionState) -> Vec<SessionUpdate> {
        let changed = SessionUpdate::StateChanged {
            target_id: target_id.clone(),
            state: state.clone(),
        };

        match self.settings.reconnect {
            ReconnectPolicy::Silent => {
                self.release(target_id);
                vec![
                    changed,
                    SessionUpdate::Released {
                        target_id: target_id.clone(),
                    },
                ]
            }
            ReconnectPolicy::AwaitAcknowledge => {
                if let Some(session) = self.sessions.get_mut(target_id) {
                    session.channel.close();
                    session.resize.cancel();
                    session.state = state;
                    session.terminal.write_text(RECONNECT_PROMPT);
                }
                vec![changed]
            }
        }
    }

    pub fn state(&self, target_id: &TargetId) -> Option<SessionState> {
        self.sessions.get(target_id).map(|s| s.state.clone())
    }

    pub fn is_open(&self, target_id: &TargetId) -> bool {
        matches!(self.state(target_id), Some(SessionState::Open))
    }

    pub fn contains(&self, target_id: &TargetId) -> bool {
        self.sessions.contains_key(target_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn target_ids(&self) -> Vec<TargetId> {
        let mut ids: Vec<TargetId> = self.sessions.keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        for session in self.sessions.values_mut() {
            session.release();
        }
    }
}
