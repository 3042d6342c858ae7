// ABOUTME: Core data models for container targets reported by the inventory endpoint

pub mod target;

pub use target::{Target, TargetId, TargetSnapshot, TargetStatus};
