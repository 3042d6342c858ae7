// ABOUTME: Main entry point for the container console CLI
// A thin presentation layer over the session multiplexer core

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use container_console::app::{Console, ConsoleEvent, ConsoleHandle};
use container_console::config::AppConfig;
use container_console::inventory::{HttpInventoryClient, InventoryClient};
use container_console::logs::{LogMode, LogStreamer, LogView, WsLogStreamer};
use container_console::models::{Target, TargetId};
use container_console::session::SessionState;
use container_console::terminal::{TerminalFactory, TerminalSink, WebSocketDialer};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio::time::Duration;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;
use tracing::{error, info, warn};

/// Ctrl-] detaches from an attached session
const DETACH_BYTE: u8 = 0x1d;

#[derive(Parser)]
#[command(name = "container-console", version, about = "Interactive shells and log tails for remote containers")]
struct Cli {
    /// Path to a config file (defaults to the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Backend base URL, overrides the config file
    #[arg(long, global = true)]
    server: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List targets once
    Targets,
    /// Run the console and print every event
    Watch,
    /// Attach this terminal to a target's shell
    Attach { id: String },
    /// Print a target's recent logs
    Logs {
        id: String,
        /// Keep following new output
        #[arg(short, long)]
        follow: bool,
    },
    /// Download a target's full log
    Download {
        id: String,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging()?;
    setup_panic_handler();

    let mut config = match &cli.config {
        Some(path) => AppConfig::load_from(path)?,
        None => AppConfig::load()?,
    };
    if let Some(server) = cli.server {
        config.server.url = server;
    }

    let result = match cli.command {
        Command::Targets => list_targets(&config).await,
        Command::Watch => watch(&config).await,
        Command::Attach { id } => attach(&config, &parse_id(&id)?).await,
        Command::Logs { id, follow } => logs(&config, &parse_id(&id)?, follow).await,
        Command::Download { id, output } => download(&config, &parse_id(&id)?, output).await,
    };

    if let Err(e) = &result {
        error!("Command failed: {:#}", e);
    }
    result
}

fn parse_id(raw: &str) -> Result<TargetId> {
    TargetId::new(raw).ok_or_else(|| anyhow!("target id must not be empty"))
}

fn http_client(config: &AppConfig) -> Result<Arc<dyn InventoryClient>> {
    Ok(Arc::new(HttpInventoryClient::new(&config.server.url, config.request_timeout())?))
}

fn build_console(
    config: &AppConfig,
    terminals: Arc<dyn TerminalFactory>,
) -> Result<(Console, ConsoleHandle, mpsc::UnboundedReceiver<ConsoleEvent>)> {
    let client = http_client(config)?;
    let dialer = Arc::new(WebSocketDialer::new(&config.server.url, config.connect_timeout())?);
    let streamer: Option<Arc<dyn LogStreamer>> = match config.logs.mode {
        LogMode::Push => Some(Arc::new(WsLogStreamer::new(
            &config.server.url,
            config.connect_timeout(),
        )?)),
        LogMode::Poll => None,
    };
    Ok(Console::new(config.clone(), client, dialer, terminals, streamer))
}

fn summary_line(target: &Target) -> String {
    target.health_summary().replace('\n', ", ")
}

async fn list_targets(config: &AppConfig) -> Result<()> {
    let targets = http_client(config)?.fetch_targets().await?;
    if targets.is_empty() {
        println!("No targets");
        return Ok(());
    }
    println!("{:<2} {:<14} {:<24} {:<12} HEALTH", "", "ID", "NAME", "STATUS");
    for target in &targets {
        let id = if target.is_materialized() {
            target.id.chars().take(12).collect::<String>()
        } else {
            "-".to_string()
        };
        println!(
            "{:<2} {:<14} {:<24} {:<12} {}",
            target.status.indicator(),
            id,
            target.display_name,
            target.status.to_string(),
            summary_line(target)
        );
    }
    Ok(())
}

fn describe(event: &ConsoleEvent) -> String {
    match event {
        ConsoleEvent::TargetsUpdated { targets, diff } => format!(
            "targets: {} total ({} added, {} removed, {} changed)",
            targets.len(),
            diff.added.len(),
            diff.removed.len(),
            diff.changed.len()
        ),
        ConsoleEvent::ConnectivityChanged(state) => format!("backend {}", state),
        ConsoleEvent::NoticeRaised(notice) => format!("notice: {}", notice.message),
        ConsoleEvent::NoticeCleared(id) => format!("notice cleared: {}", id),
        ConsoleEvent::SessionStateChanged { target_id, state } => {
            format!("session {}: {}", target_id, state)
        }
        ConsoleEvent::SessionReleased { target_id } => format!("session {} released", target_id),
        ConsoleEvent::LogUpdated { target_id, .. } => format!("logs updated for {}", target_id),
        ConsoleEvent::ReauthenticationRequired => "reauthentication required".to_string(),
    }
}

async fn watch(config: &AppConfig) -> Result<()> {
    let (console, handle, events) = build_console(config, Arc::new(NullTerminals))?;
    let console_task = tokio::spawn(console.run());
    let mut events = UnboundedReceiverStream::new(events);

    loop {
        tokio::select! {
            event = events.next() => match event {
                Some(event) => {
                    println!("{} {}", chrono::Local::now().format("%H:%M:%S"), describe(&event));
                    if let ConsoleEvent::TargetsUpdated { targets, .. } = &event {
                        for target in targets.iter() {
                            println!("   {} {} ({})", target.status.indicator(), target.display_name, target.status);
                        }
                    }
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    let _ = handle.shutdown();
    console_task.await?;
    Ok(())
}

/// Wait for the first inventory load so sessions can be gated on it
async fn wait_for_targets(events: &mut mpsc::UnboundedReceiver<ConsoleEvent>, timeout: Duration) -> Result<()> {
    let wait = async {
        while let Some(event) = events.recv().await {
            match event {
                ConsoleEvent::TargetsUpdated { .. } => return Ok(()),
                ConsoleEvent::ConnectivityChanged(state) if !state.is_reachable() => {
                    return Err(anyhow!("backend is unreachable"));
                }
                ConsoleEvent::ReauthenticationRequired => {
                    return Err(anyhow!("backend requires reauthentication"));
                }
                _ => {}
            }
        }
        Err(anyhow!("console stopped"))
    };
    tokio::time::timeout(timeout, wait)
        .await
        .map_err(|_| anyhow!("timed out waiting for the target list"))?
}

struct RawModeGuard;

impl RawModeGuard {
    fn enable() -> Result<Self> {
        enable_raw_mode().context("failed to enable raw mode")?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
    }
}

async fn attach(config: &AppConfig, target_id: &TargetId) -> Result<()> {
    let (console, handle, mut events) = build_console(config, Arc::new(StdoutTerminals))?;
    let console_task = tokio::spawn(console.run());

    wait_for_targets(&mut events, config.request_timeout() + config.connect_timeout()).await?;

    let (cols, rows) = crossterm::terminal::size().unwrap_or((80, 24));
    handle.open(target_id).await?;
    handle.resize(target_id, cols, rows)?;
    info!("Attached to {}", target_id);
    eprintln!("Attached to {}. Press Ctrl-] to detach.\r", target_id);

    let guard = RawModeGuard::enable()?;
    let (stdin_tx, mut stdin_rx) = mpsc::unbounded_channel::<Vec<u8>>();
    let stdin_task = tokio::spawn(async move {
        let mut stdin = tokio::io::stdin();
        let mut buf = [0u8; 1024];
        loop {
            match stdin.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if stdin_tx.send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
            }
        }
    });

    let mut size_ticker = tokio::time::interval(Duration::from_millis(250));
    let mut last_size = (cols, rows);
    let mut reason = "detached";

    loop {
        tokio::select! {
            input = stdin_rx.recv() => match input {
                Some(bytes) => {
                    if let Some(pos) = bytes.iter().position(|b| *b == DETACH_BYTE) {
                        if pos > 0 {
                            handle.input(target_id, bytes[..pos].to_vec())?;
                        }
                        break;
                    }
                    handle.input(target_id, bytes)?;
                }
                None => {
                    reason = "stdin closed";
                    break;
                }
            },
            event = events.recv() => match event {
                Some(ConsoleEvent::SessionReleased { target_id: released }) if &released == target_id => {
                    reason = "session released";
                    break;
                }
                Some(ConsoleEvent::SessionStateChanged { target_id: changed, state: SessionState::Errored(fault) })
                    if &changed == target_id =>
                {
                    warn!("Session for {} errored: {}", changed, fault);
                }
                Some(ConsoleEvent::ReauthenticationRequired) => {
                    reason = "reauthentication required";
                    break;
                }
                Some(_) => {}
                None => {
                    reason = "console stopped";
                    break;
                }
            },
            _ = size_ticker.tick() => {
                if let Ok(size) = crossterm::terminal::size() {
                    if size != last_size {
                        last_size = size;
                        handle.resize(target_id, size.0, size.1)?;
                    }
                }
            }
        }
    }

    drop(guard);
    stdin_task.abort();
    eprintln!("\n{} ({})", reason, target_id);

    let _ = handle.close(target_id).await;
    let _ = handle.shutdown();
    console_task.await?;
    Ok(())
}

async fn logs(config: &AppConfig, target_id: &TargetId, follow: bool) -> Result<()> {
    if !follow {
        let text = http_client(config)?.fetch_logs(target_id).await?;
        print!("{}", text);
        return Ok(());
    }

    let (console, handle, mut events) = build_console(config, Arc::new(NullTerminals))?;
    let console_task = tokio::spawn(console.run());

    let tail = handle.open_logs(target_id).await?;
    if config.logs.mode == LogMode::Poll {
        handle.set_auto_refresh(tail, true, None).await?;
    }

    let mut view = LogView::new(config.logs.max_buffer_bytes, usize::MAX);
    let mut printed = String::new();
    let mut stdout = std::io::stdout();

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(ConsoleEvent::LogUpdated { tail_id, update, .. }) if tail_id == tail => {
                    view.apply(&update);
                    if let Some(error) = view.error() {
                        eprintln!("{}", error);
                    }
                    let content = view.content();
                    let fresh = content.strip_prefix(printed.as_str()).unwrap_or(content);
                    stdout.write_all(fresh.as_bytes())?;
                    stdout.flush()?;
                    printed = content.to_string();
                    if view.has_ended() {
                        break;
                    }
                }
                Some(ConsoleEvent::ReauthenticationRequired) | None => break,
                Some(_) => {}
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    let _ = handle.close_logs(tail).await;
    let _ = handle.shutdown();
    console_task.await?;
    Ok(())
}

async fn download(config: &AppConfig, target_id: &TargetId, output: Option<PathBuf>) -> Result<()> {
    let bytes = http_client(config)?.download_logs(target_id).await?;
    let path = output.unwrap_or_else(|| PathBuf::from(format!("{}.log", target_id)));
    std::fs::write(&path, &bytes).with_context(|| format!("failed to write {}", path.display()))?;
    println!("Saved {} bytes to {}", bytes.len(), path.display());
    Ok(())
}

/// Writes session output straight to this process's stdout
struct StdoutTerminal;

impl TerminalSink for StdoutTerminal {
    fn write_bytes(&mut self, bytes: &[u8]) {
        let mut stdout = std::io::stdout();
        if stdout.write_all(bytes).and_then(|()| stdout.flush()).is_err() {
            warn!("Failed to write terminal output");
        }
    }
}

struct StdoutTerminals;

impl TerminalFactory for StdoutTerminals {
    fn allocate(&self, _target: &Target) -> Box<dyn TerminalSink> {
        Box::new(StdoutTerminal)
    }
}

/// For commands that never open sessions
struct NullTerminal;

impl TerminalSink for NullTerminal {
    fn write_bytes(&mut self, _bytes: &[u8]) {}
}

struct NullTerminals;

impl TerminalFactory for NullTerminals {
    fn allocate(&self, _target: &Target) -> Box<dyn TerminalSink> {
        Box::new(NullTerminal)
    }
}

fn setup_logging() -> Result<()> {
    use std::fs::OpenOptions;
    use tracing_subscriber::prelude::*;

    let log_dir = directories::ProjectDirs::from("", "", "container-console")
        .map(|dirs| dirs.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from(".container-console/logs"));
    std::fs::create_dir_all(&log_dir)
        .with_context(|| format!("failed to create log directory {}", log_dir.display()))?;

    let log_file = log_dir.join(format!(
        "container-console-{}.log",
        chrono::Local::now().format("%Y%m%d-%H%M%S")
    ));
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_file)
        .with_context(|| format!("failed to create log file {}", log_file.display()))?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(file)
                .with_ansi(false),
        )
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "container_console=info".into()),
        )
        .init();
    Ok(())
}

fn setup_panic_handler() {
    std::panic::set_hook(Box::new(|panic_info| {
        // Restore the terminal before reporting
        let _ = disable_raw_mode();
        error!("Application panicked: {}", panic_info);
        eprintln!("Application panicked: {}", panic_info);
        eprintln!("Please check the logs for more details.");
    }));
}
