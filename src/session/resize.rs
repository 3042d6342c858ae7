// ABOUTME: Trailing-edge debounce for viewport resizes
// Bursts of layout notifications collapse into one resize carrying the final size

use tokio::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminalSize {
    pub cols: u16,
    pub rows: u16,
}

impl TerminalSize {
    pub fn new(cols: u16, rows: u16) -> Self {
        Self { cols, rows }
    }

    /// Hidden or collapsed viewports report zero cells
    pub fn is_empty(&self) -> bool {
        self.cols == 0 || self.rows == 0
    }
}

#[derive(Debug, Clone)]
pub struct ResizeDebouncer {
    window: Duration,
    current: TerminalSize,
    last_sent: Option<TerminalSize>,
    deadline: Option<Instant>,
}

impl ResizeDebouncer {
    pub fn new(initial: TerminalSize, window: Duration) -> Self {
        Self {
            window,
            current: initial,
            last_sent: None,
            deadline: None,
        }
    }

    pub fn current(&self) -> TerminalSize {
        self.current
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Remember the viewport size without arming a transmission
    pub fn observe(&mut self, size: TerminalSize) {
        self.current = size;
    }

    /// Remember the size and push the deadline out by one window
    pub fn schedule(&mut self, size: TerminalSize, now: Instant) {
        self.current = size;
        self.deadline = Some(now + self.window);
    }

    /// The size to transmit once the window has elapsed, unless it was already sent
    pub fn take_due(&mut self, now: Instant) -> Option<TerminalSize> {
        match self.deadline {
            Some(deadline) if deadline <= now => {
                self.deadline = None;
                if self.last_sent == Some(self.current) {
                    None
                } else {
                    Some(self.current)
                }
            }
            _ => None,
        }
    }

    pub fn mark_sent(&mut self, size: TerminalSize) {
        self.last_sent = Some(size);
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }
}
