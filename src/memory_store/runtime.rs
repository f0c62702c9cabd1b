//! Runtime tier (§4.3): session-scoped working set holding distilled facts
//! the planner extracted. Lives as long as the session.

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use super::MemoryItem;
use crate::session::SessionKey;

#[derive(Default)]
pub struct RuntimeTier {
    scoped: RwLock<FxHashMap<SessionKey, FxHashMap<String, MemoryItem>>>,
}

impl RuntimeTier {
    pub fn put(&self, session: &SessionKey, item: MemoryItem) {
        self.scoped
            .write()
            .entry(session.clone())
            .or_default()
            .insert(item.key.clone(), item);
    }

    pub fn get(&self, session: &SessionKey, key: &str) -> Option<MemoryItem> {
        self.scoped.read().get(session).and_then(|m| m.get(key)).cloned()
    }

    pub fn all(&self, session: &SessionKey) -> Vec<MemoryItem> {
        self.scoped
            .read()
            .get(session)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn pin(&self, session: &SessionKey, key: &str) {
        if let Some(item) = self.scoped.write().get_mut(session).and_then(|m| m.get_mut(key)) {
            item.pinned = true;
        }
    }

    /// Drop a session's entire working set, e.g. on session close.
    pub fn clear(&self, session: &SessionKey) {
        self.scoped.write().remove(session);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn item(key: &str) -> MemoryItem {
        MemoryItem {
            key: key.to_string(),
            value: serde_json::json!(key),
            embedding: None,
            pinned: false,
            written_at: Utc::now(),
        }
    }

    #[test]
    fn items_are_isolated_per_session() {
        let tier = RuntimeTier::default();
        let a = SessionKey::new("acme", "s1");
        let b = SessionKey::new("acme", "s2");
        tier.put(&a, item("fact"));
        assert!(tier.get(&a, "fact").is_some());
        assert!(tier.get(&b, "fact").is_none());
    }

    #[test]
    fn pin_marks_an_existing_item() {
        let tier = RuntimeTier::default();
        let session = SessionKey::new("acme", "s1");
        tier.put(&session, item("fact"));
        tier.pin(&session, "fact");
        assert!(tier.get(&session, "fact").unwrap().pinned);
    }
}
