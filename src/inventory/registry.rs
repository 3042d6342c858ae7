// ABOUTME: Target registry holding the latest inventory snapshot
// Replaces the snapshot wholesale on success, freezes it on failure, reports a diff

use crate::error::Result;
use crate::inventory::client::InventoryClient;
use crate::models::{Target, TargetId, TargetSnapshot};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Keys (see `Target::key`) that changed between two snapshots
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub changed: Vec<String>,
}

impl TargetDiff {
    pub fn between(previous: &[Target], current: &[Target]) -> Self {
        let before: BTreeMap<String, &Target> = previous.iter().map(|t| (t.key(), t)).collect();
        let after: BTreeMap<String, &Target> = current.iter().map(|t| (t.key(), t)).collect();

        let mut diff = TargetDiff::default();
        for (key, target) in &after {
            match before.get(key) {
                None => diff.added.push(key.clone()),
                Some(old) if *old != *target => diff.changed.push(key.clone()),
                Some(_) => {}
            }
        }
        diff.removed = before
            .keys()
            .filter(|key| !after.contains_key(*key))
            .cloned()
            .collect();
        diff
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct TargetRefresh {
    pub targets: TargetSnapshot,
    pub diff: TargetDiff,
}

pub struct TargetRegistry {
    client: Arc<dyn InventoryClient>,
    snapshot: watch::Sender<TargetSnapshot>,
}

impl TargetRegistry {
    pub fn new(client: Arc<dyn InventoryClient>) -> Self {
        let (snapshot, _) = watch::channel(Arc::new(Vec::new()));
        Self { client, snapshot }
    }

    pub fn client(&self) -> Arc<dyn InventoryClient> {
        self.client.clone()
    }

    pub fn snapshot(&self) -> TargetSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Read-only view for components that gate on target status
    pub fn subscribe(&self) -> watch::Receiver<TargetSnapshot> {
        self.snapshot.subscribe()
    }

    pub fn find(&self, target_id: &TargetId) -> Option<Target> {
        self.snapshot
            .borrow()
            .iter()
            .find(|t| t.id == target_id.as_str())
            .cloned()
    }

    /// Fetch and apply in one step
    pub async fn refresh(&self) -> Result<TargetRefresh> {
        let result = self.client.fetch_targets().await;
        self.apply(result)
    }

    /// Apply the outcome of a fetch performed elsewhere
    pub fn apply(&self, result: Result<Vec<Target>>) -> Result<TargetRefresh> {
        match result {
            Ok(targets) => {
                let current: TargetSnapshot = Arc::new(targets);
                let previous = self.snapshot.send_replace(current.clone());
                let diff = TargetDiff::between(&previous, &current);
                if diff.is_empty() {
                    debug!("Target snapshot unchanged ({} targets)", current.len());
                } else {
                    info!(
                        "Target snapshot updated: {} added, {} removed, {} changed",
                        diff.added.len(),
                        diff.removed.len(),
                        diff.changed.len()
                    );
                }
                Ok(TargetRefresh {
                    targets: current,
                    diff,
                })
            }
            Err(e) => {
                warn!(
                    "Target refresh failed, keeping last snapshot of {} targets: {}",
                    self.snapshot.borrow().len(),
                    e
                );
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConsoleError;
    use crate::inventory::client::MockInventoryClient;
    use crate::models::TargetStatus;

    fn running(id: &str) -> Target {
        Target::new(id, &format!("svc-{}", id), TargetStatus::Running)
    }

    #[test]
    fn test_diff_reports_added_removed_changed() {
        let before = vec![running("a"), running("b")];
        let mut changed_b = running("b");
        changed_b.status = TargetStatus::Stopped;
        let after = vec![changed_b, running("c")];

        let diff = TargetDiff::between(&before, &after);
        assert_eq!(diff.added, vec!["c".to_string()]);
        assert_eq!(diff.removed, vec!["a".to_string()]);
        assert_eq!(diff.changed, vec!["b".to_string()]);
    }

    #[tokio::test]
    async fn test_refresh_replaces_snapshot() {
        let mut client = MockInventoryClient::new();
        client
            .expect_fetch_targets()
            .times(1)
            .returning(|| Ok(vec![running("c1"), running("c2")]));

        let registry = TargetRegistry::new(Arc::new(client));
        let mut view = registry.subscribe();

        let refresh = registry.refresh().await.unwrap();
        assert_eq!(refresh.diff.added.len(), 2);
        assert!(view.has_changed().unwrap());
        assert_eq!(view.borrow_and_update().len(), 2);
        assert!(registry.find(&TargetId::new("c2").unwrap()).is_some());
    }

    #[tokio::test]
    async fn test_failed_refresh_freezes_snapshot() {
        let mut client = MockInventoryClient::new();
        let mut calls = 0;
        client.expect_fetch_targets().times(2).returning(move || {
            calls += 1;
            if calls == 1 {
                Ok(vec![running("c1")])
            } else {
                Err(ConsoleError::RegistryFetchFailed("HTTP 502 Bad Gateway".into()))
            }
        });

        let registry = TargetRegistry::new(Arc::new(client));
        registry.refresh().await.unwrap();
        let err = registry.refresh().await.unwrap_err();

        assert_eq!(err, ConsoleError::RegistryFetchFailed("HTTP 502 Bad Gateway".into()));
        assert_eq!(registry.snapshot().len(), 1);
    }
}
