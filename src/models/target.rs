// ABOUTME: Target data model representing a remote container reported by the inventory endpoint

use crate::error::{ConsoleError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Opaque identifier of a materialized target. Never empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetId(String);

impl TargetId {
    /// Returns `None` for an empty or whitespace-only id
    pub fn new(id: impl Into<String>) -> Option<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            None
        } else {
            Some(Self(id))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TargetStatus {
    Running,
    Stopped,
    Other(String),
}

impl TargetStatus {
    pub fn indicator(&self) -> &'static str {
        match self {
            TargetStatus::Running => "●",
            TargetStatus::Stopped => "⏸",
            TargetStatus::Other(_) => "?",
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, TargetStatus::Running)
    }
}

impl From<String> for TargetStatus {
    fn from(raw: String) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "running" => TargetStatus::Running,
            "stopped" | "exited" => TargetStatus::Stopped,
            _ => TargetStatus::Other(raw),
        }
    }
}

impl From<TargetStatus> for String {
    fn from(status: TargetStatus) -> Self {
        status.to_string()
    }
}

impl fmt::Display for TargetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetStatus::Running => f.write_str("running"),
            TargetStatus::Stopped => f.write_str("stopped"),
            TargetStatus::Other(raw) => f.write_str(raw),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    /// Empty for targets that have not been created yet
    #[serde(default)]
    pub id: String,
    #[serde(rename = "name", alias = "display_name")]
    pub display_name: String,
    pub status: TargetStatus,
    #[serde(default)]
    pub healthy: bool,
    #[serde(default, alias = "ports_healthy", skip_serializing_if = "Option::is_none")]
    pub ports_health: Option<BTreeMap<String, bool>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
}

/// The most recent registry snapshot, replaced wholesale on every refresh
pub type TargetSnapshot = Arc<Vec<Target>>;

impl Target {
    pub fn new(id: &str, display_name: &str, status: TargetStatus) -> Self {
        Self {
            id: id.to_string(),
            display_name: display_name.to_string(),
            status,
            healthy: true,
            ports_health: None,
            service: None,
        }
    }

    pub fn target_id(&self) -> Option<TargetId> {
        TargetId::new(self.id.clone())
    }

    /// The session key, or `TargetNotMaterialized` for targets not created yet
    pub fn require_id(&self) -> Result<TargetId> {
        self.target_id()
            .ok_or_else(|| ConsoleError::TargetNotMaterialized(self.display_name.clone()))
    }

    pub fn is_materialized(&self) -> bool {
        self.target_id().is_some()
    }

    /// Key used for snapshot diffing; falls back to the display name for id-less targets
    pub fn key(&self) -> String {
        match self.target_id() {
            Some(id) => id.0,
            None => format!("name:{}", self.display_name),
        }
    }

    pub fn can_open(&self) -> bool {
        self.is_materialized() && self.status.is_running()
    }

    pub fn can_show_logs(&self) -> bool {
        self.is_materialized()
    }

    /// One line per port, then the service line if known
    pub fn health_summary(&self) -> String {
        let mut details = Vec::new();
        if let Some(ports) = &self.ports_health {
            for (port, healthy) in ports {
                details.push(format!("Port {}: {}", port, if *healthy { "✓" } else { "✗" }));
            }
        }
        if let Some(service) = &self.service {
            details.push(format!(
                "Service {}: {}",
                service,
                if self.healthy { "Healthy" } else { "Unhealthy" }
            ));
        }
        if details.is_empty() {
            "Container Status".to_string()
        } else {
            details.join("\n")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_id_names_the_pending_target() {
        let pending = Target::new("", "worker", TargetStatus::Other("not started".into()));
        assert_eq!(
            pending.require_id(),
            Err(ConsoleError::TargetNotMaterialized("worker".to_string()))
        );
        assert_eq!(
            Target::new("c1", "web", TargetStatus::Running).require_id().map(|id| id.to_string()),
            Ok("c1".to_string())
        );
    }

    #[test]
    fn test_status_parsing_is_case_insensitive() {
        assert_eq!(TargetStatus::from("Running".to_string()), TargetStatus::Running);
        assert_eq!(TargetStatus::from("exited".to_string()), TargetStatus::Stopped);
        assert_eq!(
            TargetStatus::from("not started".to_string()),
            TargetStatus::Other("not started".to_string())
        );
    }

    #[test]
    fn test_deserialize_inventory_record() {
        let json = r#"{
            "id": "abc123",
            "name": "web-1",
            "status": "running",
            "service": "web",
            "ports_health": {"8080": true, "9090": false},
            "healthy": false,
            "labels": {"com.docker.compose.service": "web"},
            "exit_code": 0
        }"#;
        let target: Target = serde_json::from_str(json).unwrap();
        assert_eq!(target.id, "abc123");
        assert_eq!(target.display_name, "web-1");
        assert!(target.can_open());
        assert_eq!(
            target.health_summary(),
            "Port 8080: ✓\nPort 9090: ✗\nService web: Unhealthy"
        );
    }

    #[test]
    fn test_unmaterialized_target_cannot_be_opened() {
        let json = r#"{"id": "", "name": "db (not started)", "status": "not started"}"#;
        let target: Target = serde_json::from_str(json).unwrap();
        assert!(target.target_id().is_none());
        assert!(!target.can_open());
        assert!(!target.can_show_logs());
        assert_eq!(target.key(), "name:db (not started)");
    }

    #[test]
    fn test_target_id_rejects_blank() {
        assert!(TargetId::new("").is_none());
        assert!(TargetId::new("  ").is_none());
        assert_eq!(TargetId::new("c1").unwrap().as_str(), "c1");
    }
}
