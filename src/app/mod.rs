// ABOUTME: Application layer: the console actor and its user-facing notices

pub mod console;
pub mod notification;

pub use console::{Console, ConsoleEvent, ConsoleHandle, PollOutcome, PollRequest};
pub use notification::{NoticeBoard, Notification, NotificationType};
