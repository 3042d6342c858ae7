// ABOUTME: Console actor tying together registry, connectivity, sessions and log tails
// A single select! loop serializes commands, poll results, channel events and timers

use crate::app::notification::{NoticeBoard, Notification};
use crate::config::AppConfig;
use crate::connectivity::{Connectivity, ConnectivityMonitor, Transition};
use crate::error::{ConsoleError, Result};
use crate::inventory::{InventoryClient, TargetDiff, TargetRegistry};
use crate::logs::{LogStreamer, LogTailEvent, LogTailId, LogTailManager, LogUpdate};
use crate::models::{Target, TargetId, TargetSnapshot};
use crate::session::{SessionFault, SessionManager, SessionSettings, SessionState, SessionUpdate};
use crate::terminal::{Dialer, TerminalFactory};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Duration, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub const DISCONNECTED_NOTICE: &str = "Disconnected from server. Target actions are disabled until the connection is restored.";

const HOUSEKEEPING_INTERVAL: Duration = Duration::from_secs(1);

/// What the presentation layer observes
#[derive(Debug, Clone)]
pub enum ConsoleEvent {
    TargetsUpdated {
        targets: TargetSnapshot,
        diff: TargetDiff,
    },
    ConnectivityChanged(Connectivity),
    NoticeRaised(Notification),
    NoticeCleared(Uuid),
    SessionStateChanged {
        target_id: TargetId,
        state: SessionState,
    },
    SessionReleased {
        target_id: TargetId,
    },
    LogUpdated {
        tail_id: LogTailId,
        target_id: TargetId,
        update: LogUpdate,
    },
    ReauthenticationRequired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollRequest {
    /// `GET /targets`, only while connected
    Targets,
    /// `GET /health`, while disconnected or after a failed dial
    Probe,
}

#[derive(Debug)]
pub enum PollOutcome {
    Targets(Result<Vec<Target>>),
    Probe(bool),
}

impl PollRequest {
    pub async fn execute(self, client: Arc<dyn InventoryClient>) -> PollOutcome {
        match self {
            PollRequest::Targets => PollOutcome::Targets(client.fetch_targets().await),
            PollRequest::Probe => PollOutcome::Probe(client.probe().await),
        }
    }
}

enum ConsoleCommand {
    Open {
        target_id: TargetId,
        reply: oneshot::Sender<Result<()>>,
    },
    Close {
        target_id: TargetId,
        reply: oneshot::Sender<bool>,
    },
    Input {
        target_id: TargetId,
        bytes: Vec<u8>,
    },
    Resize {
        target_id: TargetId,
        cols: u16,
        rows: u16,
    },
    OpenLogs {
        target_id: TargetId,
        reply: oneshot::Sender<Result<LogTailId>>,
    },
    SetAutoRefresh {
        tail_id: LogTailId,
        enabled: bool,
        interval: Option<Duration>,
        reply: oneshot::Sender<Result<()>>,
    },
    RefreshLogs {
        tail_id: LogTailId,
        reply: oneshot::Sender<Result<()>>,
    },
    CloseLogs {
        tail_id: LogTailId,
        reply: oneshot::Sender<bool>,
    },
    DownloadLogs {
        target_id: TargetId,
        reply: oneshot::Sender<Result<Vec<u8>>>,
    },
    Refresh,
    DismissNotice {
        id: Uuid,
        reply: oneshot::Sender<bool>,
    },
    Shutdown,
}

/// Cloneable front door to a running console
#[derive(Clone)]
pub struct ConsoleHandle {
    commands: mpsc::UnboundedSender<ConsoleCommand>,
    targets: watch::Receiver<TargetSnapshot>,
    connectivity: watch::Receiver<Connectivity>,
}

impl ConsoleHandle {
    fn send(&self, command: ConsoleCommand) -> Result<()> {
        self.commands.send(command).map_err(|_| ConsoleError::ConsoleClosed)
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> ConsoleCommand) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.send(build(reply))?;
        response.await.map_err(|_| ConsoleError::ConsoleClosed)
    }

    pub async fn open(&self, target_id: &TargetId) -> Result<()> {
        let target_id = target_id.clone();
        self.request(|reply| ConsoleCommand::Open { target_id, reply })
            .await?
    }

    /// Open by registry entry; id-less targets fail with `TargetNotMaterialized`
    pub async fn open_target(&self, target: &Target) -> Result<()> {
        self.open(&target.require_id()?).await
    }

    pub async fn close(&self, target_id: &TargetId) -> Result<bool> {
        let target_id = target_id.clone();
        self.request(|reply| ConsoleCommand::Close { target_id, reply })
            .await
    }

    pub fn input(&self, target_id: &TargetId, bytes: impl Into<Vec<u8>>) -> Result<()> {
        self.send(ConsoleCommand::Input {
            target_id: target_id.clone(),
            bytes: bytes.into(),
        })
    }

    pub fn resize(&self, target_id: &TargetId, cols: u16, rows: u16) -> Result<()> {
        self.send(ConsoleCommand::Resize {
            target_id: target_id.clone(),
            cols,
            rows,
        })
    }

    pub async fn open_logs(&self, target_id: &TargetId) -> Result<LogTailId> {
        let target_id = target_id.clone();
        self.request(|reply| ConsoleCommand::OpenLogs { target_id, reply })
            .await?
    }

    pub async fn set_auto_refresh(
        &self,
        tail_id: LogTailId,
        enabled: bool,
        interval: Option<Duration>,
    ) -> Result<()> {
        self.request(|reply| ConsoleCommand::SetAutoRefresh {
            tail_id,
            enabled,
            interval,
            reply,
        })
        .await?
    }

    pub async fn refresh_logs(&self, tail_id: LogTailId) -> Result<()> {
        self.request(|reply| ConsoleCommand::RefreshLogs { tail_id, reply })
            .await?
    }

    pub async fn close_logs(&self, tail_id: LogTailId) -> Result<bool> {
        self.request(|reply| ConsoleCommand::CloseLogs { tail_id, reply })
            .await
    }

    pub async fn download_logs(&self, target_id: &TargetId) -> Result<Vec<u8>> {
        let target_id = target_id.clone();
        self.request(|reply| ConsoleCommand::DownloadLogs { target_id, reply })
            .await?
    }

    /// Ask for an immediate poll outside the regular schedule
    pub fn refresh(&self) -> Result<()> {
        self.send(ConsoleCommand::Refresh)
    }

    pub async fn dismiss_notice(&self, id: Uuid) -> Result<bool> {
        self.request(|reply| ConsoleCommand::DismissNotice { id, reply })
            .await
    }

    pub fn shutdown(&self) -> Result<()> {
        self.send(ConsoleCommand::Shutdown)
    }

    pub fn targets(&self) -> TargetSnapshot {
        self.targets.borrow().clone()
    }

    pub fn connectivity(&self) -> Connectivity {
        *self.connectivity.borrow()
    }

    pub fn subscribe_targets(&self) -> watch::Receiver<TargetSnapshot> {
        self.targets.clone()
    }

    pub fn subscribe_connectivity(&self) -> watch::Receiver<Connectivity> {
        self.connectivity.clone()
    }
}

pub struct Console {
    config: AppConfig,
    registry: TargetRegistry,
    monitor: ConnectivityMonitor,
    sessions: SessionManager,
    logs: LogTailManager,
    notices: NoticeBoard,
    disconnect_notice: Option<Uuid>,
    commands: mpsc::UnboundedReceiver<ConsoleCommand>,
    events: mpsc::UnboundedSender<ConsoleEvent>,
    poll_tx: mpsc::UnboundedSender<PollOutcome>,
    poll_rx: mpsc::UnboundedReceiver<PollOutcome>,
    poll_in_flight: bool,
    polling_enabled: bool,
    initial_load_done: bool,
}

impl Console {
    pub fn new(
        config: AppConfig,
        client: Arc<dyn InventoryClient>,
        dialer: Arc<dyn Dialer>,
        terminals: Arc<dyn TerminalFactory>,
        log_streamer: Option<Arc<dyn LogStreamer>>,
    ) -> (Self, ConsoleHandle, mpsc::UnboundedReceiver<ConsoleEvent>) {
        let registry = TargetRegistry::new(Arc::clone(&client));
        let monitor = ConnectivityMonitor::new();
        let sessions = SessionManager::new(
            dialer,
            terminals,
            registry.subscribe(),
            monitor.subscribe(),
            SessionSettings::from_config(&config),
        );
        let logs = LogTailManager::new(
            client,
            log_streamer,
            config.logs.mode,
            config.log_refresh_interval(),
        );

        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (events, events_rx) = mpsc::unbounded_channel();
        let (poll_tx, poll_rx) = mpsc::unbounded_channel();

        let handle = ConsoleHandle {
            commands: commands_tx,
            targets: registry.subscribe(),
            connectivity: monitor.subscribe(),
        };

        let console = Self {
            config,
            registry,
            monitor,
            sessions,
            logs,
            notices: NoticeBoard::new(),
            disconnect_notice: None,
            commands,
            events,
            poll_tx,
            poll_rx,
            poll_in_flight: false,
            polling_enabled: true,
            initial_load_done: false,
        };
        (console, handle, events_rx)
    }

    pub fn connectivity(&self) -> Connectivity {
        self.monitor.state()
    }

    pub fn snapshot(&self) -> TargetSnapshot {
        self.registry.snapshot()
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn log_tails(&self) -> &LogTailManager {
        &self.logs
    }

    pub fn notices(&self) -> &NoticeBoard {
        &self.notices
    }

    pub fn is_polling(&self) -> bool {
        self.polling_enabled
    }

    fn emit(&self, event: ConsoleEvent) {
        if self.events.send(event).is_err() {
            debug!("No console event listener");
        }
    }

    /// Targets while connected, the health probe while disconnected
    pub fn next_poll_request(&self) -> PollRequest {
        if self.monitor.is_reachable() {
            PollRequest::Targets
        } else {
            PollRequest::Probe
        }
    }

    /// Run one poll cycle to completion, including the refresh that follows a recovery
    pub async fn poll_once(&mut self) {
        if !self.polling_enabled {
            return;
        }
        let mut request = Some(self.next_poll_request());
        while let Some(next) = request {
            let outcome = next.execute(self.registry.client()).await;
            request = self.apply_poll_outcome(outcome);
        }
    }

    /// Apply a finished poll. Returns a follow-up request when one is needed.
    pub fn apply_poll_outcome(&mut self, outcome: PollOutcome) -> Option<PollRequest> {
        match outcome {
            PollOutcome::Targets(result) => match self.registry.apply(result) {
                Ok(refresh) => {
                    if self.monitor.record_success() == Some(Transition::Recovered) {
                        self.on_recovered();
                    }
                    if !refresh.diff.is_empty() || !self.initial_load_done {
                        self.initial_load_done = true;
                        self.emit(ConsoleEvent::TargetsUpdated {
                            targets: refresh.targets,
                            diff: refresh.diff,
                        });
                    }
                    None
                }
                Err(ConsoleError::AuthExpired) => {
                    self.on_auth_expired();
                    None
                }
                Err(e) => {
                    debug!("Poll failed: {}", e);
                    if self.monitor.record_failure() == Some(Transition::Lost) {
                        self.on_lost();
                    }
                    None
                }
            },
            PollOutcome::Probe(true) => match self.monitor.record_success() {
                Some(Transition::Recovered) => {
                    self.on_recovered();
                    Some(PollRequest::Targets)
                }
                _ => None,
            },
            PollOutcome::Probe(false) => {
                if self.monitor.record_failure() == Some(Transition::Lost) {
                    self.on_lost();
                }
                None
            }
        }
    }

    fn on_lost(&mut self) {
        self.emit(ConsoleEvent::ConnectivityChanged(Connectivity::Disconnected));
        if self.disconnect_notice.is_none() {
            let notice = self
                .notices
                .raise(Notification::warning(DISCONNECTED_NOTICE).persistent());
            self.disconnect_notice = Some(notice.id);
            self.emit(ConsoleEvent::NoticeRaised(notice));
        }
        let updates = self.sessions.on_connectivity_lost();
        self.dispatch_session_updates(updates);
    }

    fn on_recovered(&mut self) {
        self.emit(ConsoleEvent::ConnectivityChanged(Connectivity::Connected));
        if let Some(id) = self.disconnect_notice.take() {
            if self.notices.dismiss(id) {
                self.emit(ConsoleEvent::NoticeCleared(id));
            }
        }
    }

    fn on_auth_expired(&mut self) {
        if !self.polling_enabled {
            return;
        }
        error!("Backend rejected our credentials, stopping polls until reauthentication");
        self.polling_enabled = false;
        self.emit(ConsoleEvent::ReauthenticationRequired);
    }

    fn raise_transient(&mut self, message: String) {
        let notice = self.notices.raise(Notification::error(message));
        self.emit(ConsoleEvent::NoticeRaised(notice));
    }

    fn dismiss_notice(&mut self, id: Uuid) -> bool {
        if self.disconnect_notice == Some(id) {
            self.disconnect_notice = None;
        }
        let dismissed = self.notices.dismiss(id);
        if dismissed {
            self.emit(ConsoleEvent::NoticeCleared(id));
        }
        dismissed
    }

    fn expire_notices(&mut self, now: std::time::Instant) {
        for id in self.notices.expire(now) {
            self.emit(ConsoleEvent::NoticeCleared(id));
        }
    }

    /// Forward session updates; a failed dial schedules a health probe
    fn dispatch_session_updates(&mut self, updates: Vec<SessionUpdate>) -> bool {
        let mut probe = false;
        for update in updates {
            match update {
                SessionUpdate::StateChanged { target_id, state } => {
                    if let SessionState::Errored(fault) = &state {
                        if matches!(fault, SessionFault::OpenFailed(_)) {
                            probe = true;
                        }
                        if fault.is_transport() {
                            let error = fault.to_error(&target_id);
                            warn!("{}", error);
                            self.raise_transient(error.to_string());
                        }
                    }
                    self.emit(ConsoleEvent::SessionStateChanged { target_id, state });
                }
                SessionUpdate::Released { target_id } => {
                    self.emit(ConsoleEvent::SessionReleased { target_id });
                }
            }
        }
        probe
    }

    pub fn open_session(&mut self, target_id: &TargetId) -> Result<()> {
        let had_session = self.sessions.contains(target_id);
        let result = self.sessions.open(target_id);
        // A finished session is disposed before re-dialing, even when the dial fails
        if result.is_err() && had_session && !self.sessions.contains(target_id) {
            self.emit(ConsoleEvent::SessionReleased {
                target_id: target_id.clone(),
            });
        }
        match &result {
            Ok(()) => {
                if let Some(state) = self.sessions.state(target_id) {
                    self.emit(ConsoleEvent::SessionStateChanged {
                        target_id: target_id.clone(),
                        state,
                    });
                }
            }
            Err(ConsoleError::TransportOpenFailed { .. }) => self.request_poll(PollRequest::Probe),
            Err(e) => debug!("Open of {} rejected: {}", target_id, e),
        }
        result
    }

    pub fn close_session(&mut self, target_id: &TargetId) -> bool {
        let closed = self.sessions.close(target_id);
        if closed {
            self.emit(ConsoleEvent::SessionReleased {
                target_id: target_id.clone(),
            });
        }
        closed
    }

    pub fn send_input(&mut self, target_id: &TargetId, bytes: &[u8]) {
        let before = self.sessions.state(target_id);
        match self.sessions.on_input(target_id, bytes) {
            Ok(()) => {
                // Enter on a finished session re-dials
                let after = self.sessions.state(target_id);
                if before != after {
                    if let Some(state) = after {
                        self.emit(ConsoleEvent::SessionStateChanged {
                            target_id: target_id.clone(),
                            state,
                        });
                    }
                }
            }
            Err(e) => {
                warn!("Reconnect of {} failed: {}", target_id, e);
                if before.is_some() && !self.sessions.contains(target_id) {
                    self.emit(ConsoleEvent::SessionReleased {
                        target_id: target_id.clone(),
                    });
                }
                if matches!(e, ConsoleError::TransportOpenFailed { .. }) {
                    self.request_poll(PollRequest::Probe);
                }
            }
        }
    }

    pub fn resize_session(&mut self, target_id: &TargetId, cols: u16, rows: u16) {
        self.sessions.on_resize(target_id, cols, rows);
    }

    /// Handle every queued channel event; returns how many state updates were emitted
    pub fn process_session_events(&mut self) -> usize {
        let updates = self.sessions.process_pending();
        let count = updates.len();
        if self.dispatch_session_updates(updates) {
            self.request_poll(PollRequest::Probe);
        }
        count
    }

    pub fn open_logs(&mut self, target_id: &TargetId) -> Result<LogTailId> {
        if !self.monitor.is_reachable() {
            return Err(ConsoleError::BackendUnreachable);
        }
        Ok(self.logs.open(target_id))
    }

    fn on_log_event(&mut self, event: LogTailEvent) {
        if let LogUpdate::Failed(error) = &event.update {
            if *error == ConsoleError::AuthExpired {
                self.on_auth_expired();
            } else {
                self.raise_transient(format!("Failed to load logs for {}: {}", event.target_id, error));
            }
        }
        self.emit(ConsoleEvent::LogUpdated {
            tail_id: event.tail_id,
            target_id: event.target_id,
            update: event.update,
        });
    }

    /// Start a poll in the background unless one is already running
    fn request_poll(&mut self, request: PollRequest) {
        if self.poll_in_flight || !self.polling_enabled {
            debug!("Skipping {:?} poll", request);
            return;
        }
        self.poll_in_flight = true;
        let client = self.registry.client();
        let results = self.poll_tx.clone();
        tokio::spawn(async move {
            let outcome = request.execute(client).await;
            let _ = results.send(outcome);
        });
    }

    /// Returns false when the console should stop
    fn handle_command(&mut self, command: ConsoleCommand) -> bool {
        match command {
            ConsoleCommand::Open { target_id, reply } => {
                let _ = reply.send(self.open_session(&target_id));
            }
            ConsoleCommand::Close { target_id, reply } => {
                let _ = reply.send(self.close_session(&target_id));
            }
            ConsoleCommand::Input { target_id, bytes } => self.send_input(&target_id, &bytes),
            ConsoleCommand::Resize {
                target_id,
                cols,
                rows,
            } => self.resize_session(&target_id, cols, rows),
            ConsoleCommand::OpenLogs { target_id, reply } => {
                let _ = reply.send(self.open_logs(&target_id));
            }
            ConsoleCommand::SetAutoRefresh {
                tail_id,
                enabled,
                interval,
                reply,
            } => {
                let _ = reply.send(self.logs.set_auto_refresh(tail_id, enabled, interval));
            }
            ConsoleCommand::RefreshLogs { tail_id, reply } => {
                let _ = reply.send(self.logs.refresh(tail_id));
            }
            ConsoleCommand::CloseLogs { tail_id, reply } => {
                let _ = reply.send(self.logs.close(tail_id));
            }
            ConsoleCommand::DownloadLogs { target_id, reply } => {
                if !self.monitor.is_reachable() {
                    let _ = reply.send(Err(ConsoleError::BackendUnreachable));
                } else {
                    let download = self.logs.download(&target_id);
                    tokio::spawn(async move {
                        let _ = reply.send(download.await);
                    });
                }
            }
            ConsoleCommand::Refresh => {
                let request = self.next_poll_request();
                self.request_poll(request);
            }
            ConsoleCommand::DismissNotice { id, reply } => {
                let _ = reply.send(self.dismiss_notice(id));
            }
            ConsoleCommand::Shutdown => return false,
        }
        true
    }

    pub fn shutdown(&mut self) {
        for target_id in self.sessions.close_all() {
            self.emit(ConsoleEvent::SessionReleased { target_id });
        }
        self.logs.close_all();
        info!("Console shut down");
    }

    /// Run until `shutdown` is requested or every handle is dropped
    pub async fn run(mut self) {
        let mut poll_ticker = tokio::time::interval(self.config.poll_interval());
        poll_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut housekeeping = tokio::time::interval(HOUSEKEEPING_INTERVAL);
        housekeeping.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "Console started against {} (poll every {:?})",
            self.config.server.url,
            self.config.poll_interval()
        );

        loop {
            let resize_deadline = self.sessions.next_resize_deadline();

            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => {
                        if !self.handle_command(command) {
                            break;
                        }
                    }
                    None => {
                        debug!("All console handles dropped");
                        break;
                    }
                },

                Some(event) = self.sessions.next_event() => {
                    let updates = self.sessions.handle_event(event);
                    if self.dispatch_session_updates(updates) {
                        self.request_poll(PollRequest::Probe);
                    }
                }

                Some(event) = self.logs.next_update() => self.on_log_event(event),

                Some(outcome) = self.poll_rx.recv() => {
                    self.poll_in_flight = false;
                    if let Some(follow_up) = self.apply_poll_outcome(outcome) {
                        self.request_poll(follow_up);
                    }
                }

                _ = poll_ticker.tick() => {
                    if self.polling_enabled {
                        let request = self.next_poll_request();
                        self.request_poll(request);
                    }
                }

                _ = housekeeping.tick() => self.expire_notices(std::time::Instant::now()),

                _ = sleep_until(resize_deadline) => {
                    self.sessions.flush_resizes(Instant::now());
                }
            }
        }

        self.shutdown();
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
