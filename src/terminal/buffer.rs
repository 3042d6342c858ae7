// ABOUTME: Terminal buffer seam: the session manager writes decoded output into a sink
// that an external terminal widget renders. Includes a bounded in-memory scrollback.

use crate::models::Target;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// Consumer of terminal output owned by exactly one session
pub trait TerminalSink: Send {
    fn write_bytes(&mut self, bytes: &[u8]);

    fn write_text(&mut self, text: &str) {
        self.write_bytes(text.as_bytes());
    }

    /// Called once when the owning session is released
    fn dispose(&mut self) {}
}

/// Allocates a fresh terminal buffer for each new session
pub trait TerminalFactory: Send + Sync {
    fn allocate(&self, target: &Target) -> Box<dyn TerminalSink>;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[derive(Debug, Default)]
struct Scrollback {
    bytes: Vec<u8>,
    disposed: bool,
}

/// Cloneable handle to a bounded byte scrollback
#[derive(Debug, Clone)]
pub struct ScrollbackBuffer {
    inner: Arc<Mutex<Scrollback>>,
    capacity: usize,
}

impl ScrollbackBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Scrollback::default())),
            capacity: capacity.max(1),
        }
    }

    pub fn contents(&self) -> Vec<u8> {
        lock(&self.inner).bytes.clone()
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&lock(&self.inner).bytes).into_owned()
    }

    pub fn is_disposed(&self) -> bool {
        lock(&self.inner).disposed
    }
}

impl TerminalSink for ScrollbackBuffer {
    fn write_bytes(&mut self, bytes: &[u8]) {
        let mut inner = lock(&self.inner);
        if inner.disposed {
            return;
        }
        inner.bytes.extend_from_slice(bytes);
        if inner.bytes.len() > self.capacity {
            let excess = inner.bytes.len() - self.capacity;
            inner.bytes.drain(..excess);
        }
    }

    fn dispose(&mut self) {
        lock(&self.inner).disposed = true;
    }
}

/// Hands out scrollback buffers and remembers the latest one per target
#[derive(Debug, Clone)]
pub struct ScrollbackFactory {
    capacity: usize,
    buffers: Arc<Mutex<HashMap<String, ScrollbackBuffer>>>,
}

impl ScrollbackFactory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            buffers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn buffer(&self, target_key: &str) -> Option<ScrollbackBuffer> {
        lock(&self.buffers).get(target_key).cloned()
    }
}

impl Default for ScrollbackFactory {
    fn default() -> Self {
        Self::new(256 * 1024)
    }
}

impl TerminalFactory for ScrollbackFactory {
    fn allocate(&self, target: &Target) -> Box<dyn TerminalSink> {
        let buffer = ScrollbackBuffer::new(self.capacity);
        lock(&self.buffers).insert(target.key(), buffer.clone());
        Box::new(buffer)
    }
}
