// ABOUTME: Inventory integration: backend HTTP client and the target registry built on it

pub mod client;
pub mod registry;

pub use client::{HttpInventoryClient, InventoryClient};
pub use registry::{TargetDiff, TargetRefresh, TargetRegistry};
