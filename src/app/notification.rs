// ABOUTME: Notice board for user-facing messages
// Disconnect notices persist until dismissed or cleared; transient failures auto-expire

use std::time::{Duration, Instant};
use uuid::Uuid;

/// Lifetime of an auto-expiring notice
pub const NOTICE_TTL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationType {
    Error,
    Warning,
}

#[derive(Debug, Clone)]
pub struct Notification {
    pub id: Uuid,
    pub message: String,
    pub notification_type: NotificationType,
    pub created_at: Instant,
    /// None for notices that stay until dismissed
    pub duration: Option<Duration>,
}

impl Notification {
    pub fn new(message: impl Into<String>, notification_type: NotificationType) -> Self {
        Self {
            id: Uuid::new_v4(),
            message: message.into(),
            notification_type,
            created_at: Instant::now(),
            duration: Some(NOTICE_TTL),
        }
    }

    pub fn persistent(mut self) -> Self {
        self.duration = None;
        self
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(message, NotificationType::Error)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(message, NotificationType::Warning)
    }

    pub fn is_persistent(&self) -> bool {
        self.duration.is_none()
    }

    pub fn is_expired_at(&self, now: Instant) -> bool {
        match self.duration {
            Some(duration) => now.saturating_duration_since(self.created_at) >= duration,
            None => false,
        }
    }
}

#[derive(Debug, Default)]
pub struct NoticeBoard {
    notices: Vec<Notification>,
}

impl NoticeBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&mut self, notice: Notification) -> Notification {
        self.notices.push(notice.clone());
        notice
    }

    /// Remove a notice; false if it was already gone
    pub fn dismiss(&mut self, id: Uuid) -> bool {
        let before = self.notices.len();
        self.notices.retain(|n| n.id != id);
        self.notices.len() != before
    }

    /// Drop expired notices and return their ids
    pub fn expire(&mut self, now: Instant) -> Vec<Uuid> {
        let expired: Vec<Uuid> = self
            .notices
            .iter()
            .filter(|n| n.is_expired_at(now))
            .map(|n| n.id)
            .collect();
        self.notices.retain(|n| !n.is_expired_at(now));
        expired
    }

    pub fn active(&self) -> &[Notification] {
        &self.notices
    }

    pub fn get(&self, id: Uuid) -> Option<&Notification> {
        self.notices.iter().find(|n| n.id == id)
    }

    pub fn is_empty(&self) -> bool {
        self.notices.is_empty()
    }
}
