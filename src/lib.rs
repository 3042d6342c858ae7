// ABOUTME: Library crate for the container console exposing the session multiplexer core

pub mod app;
pub mod config;
pub mod connectivity;
pub mod error;
pub mod inventory;
pub mod logs;
pub mod models;
pub mod session;
pub mod terminal;

pub use app::{Console, ConsoleEvent, ConsoleHandle};
pub use config::AppConfig;
pub use error::{ConsoleError, Result};
