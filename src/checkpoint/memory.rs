//! In-memory Checkpointer (§4.2) used by tests and local development.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use super::{Checkpoint, Checkpointer, Result};

type Key = (String, String);

#[derive(Default)]
struct Store {
    versions: FxHashMap<Key, BTreeMap<u64, Checkpoint>>,
}

/// Not durable across process restarts; exists purely so tests and the
/// default `RuntimeConfig` (§10.3) don't require a database.
#[derive(Clone, Default)]
pub struct InMemoryCheckpointer {
    store: Arc<RwLock<Store>>,
}

impl InMemoryCheckpointer {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(tenant_id: &str, session_id: &str) -> Key {
        (tenant_id.to_string(), session_id.to_string())
    }
}

#[async_trait]
impl Checkpointer for InMemoryCheckpointer {
    async fn save(&self, checkpoint: Checkpoint) -> Result<u64> {
        let key = Self::key(&checkpoint.tenant_id, &checkpoint.session_id);
        let version = checkpoint.version;
        let mut store = self.store.write();
        store
            .versions
            .entry(key)
            .or_default()
            .insert(version, checkpoint);
        Ok(version)
    }

    async fn load_latest(&self, tenant_id: &str, session_id: &str) -> Result<Option<Checkpoint>> {
        let key = Self::key(tenant_id, session_id);
        let store = self.store.read();
        Ok(store
            .versions
            .get(&key)
            .and_then(|versions| versions.values().next_back())
            .cloned())
    }

    /// Returns the latest version at or before `version` (§4.2) — an
    /// exact match isn't required, since a reader may ask for a version
    /// that was pruned or never written for this session.
    async fn load_at(
        &self,
        tenant_id: &str,
        session_id: &str,
        version: u64,
    ) -> Result<Option<Checkpoint>> {
        let key = Self::key(tenant_id, session_id);
        let store = self.store.read();
        Ok(store
            .versions
            .get(&key)
            .and_then(|versions| versions.range(..=version).next_back())
            .map(|(_, checkpoint)| checkpoint.clone()))
    }

    async fn list_versions(
        &self,
        tenant_id: &str,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<u64>> {
        let key = Self::key(tenant_id, session_id);
        let store = self.store.read();
        Ok(store
            .versions
            .get(&key)
            .map(|versions| versions.keys().rev().take(limit).copied().collect())
            .unwrap_or_default())
    }

    async fn prune(&self, tenant_id: &str, session_id: &str, keep_last: usize) -> Result<usize> {
        let key = Self::key(tenant_id, session_id);
        let mut store = self.store.write();
        let Some(versions) = store.versions.get_mut(&key) else {
            return Ok(0);
        };
        let to_drop = versions.len().saturating_sub(keep_last);
        if to_drop == 0 {
            return Ok(0);
        }
        let drop_keys: Vec<u64> = versions.keys().take(to_drop).copied().collect();
        for k in &drop_keys {
            versions.remove(k);
        }
        Ok(drop_keys.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::state::OrchestratorState;
    use crate::session::Session;
    use crate::session::SessionKey;

    fn checkpoint(version: u64) -> Checkpoint {
        let mut session = Session::fresh(SessionKey::new("acme", "s1"));
        session.version = version;
        session.state = OrchestratorState::Idle;
        Checkpoint::from_session(&session)
    }

    #[tokio::test]
    async fn save_then_load_latest_round_trips() {
        let cp = InMemoryCheckpointer::new();
        cp.save(checkpoint(1)).await.unwrap();
        cp.save(checkpoint(2)).await.unwrap();
        let latest = cp.load_latest("acme", "s1").await.unwrap().unwrap();
        assert_eq!(latest.version, 2);
    }

    #[tokio::test]
    async fn prune_keeps_only_the_most_recent() {
        let cp = InMemoryCheckpointer::new();
        for v in 1..=5 {
            cp.save(checkpoint(v)).await.unwrap();
        }
        let dropped = cp.prune("acme", "s1", 2).await.unwrap();
        assert_eq!(dropped, 3);
        let versions = cp.list_versions("acme", "s1", 10).await.unwrap();
        assert_eq!(versions, vec![5, 4]);
    }
}
