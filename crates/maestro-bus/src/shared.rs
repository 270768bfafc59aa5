use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

/// A piece of data published by one agent for others to read until it expires.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataShare {
    /// Entry id.
    pub id: Uuid,
    /// Agent or component that published the data.
    pub source_agent: String,
    /// Free-form category used for lookups.
    pub data_type: String,
    /// Published value.
    pub data: serde_json::Value,
    /// When the entry was published.
    pub created_at: DateTime<Utc>,
    /// Lifetime in seconds from `created_at`.
    pub ttl_seconds: u64,
}

impl DataShare {
    /// New entry created now.
    pub fn new(
        source_agent: impl Into<String>,
        data_type: impl Into<String>,
        data: serde_json::Value,
        ttl_seconds: u64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            source_agent: source_agent.into(),
            data_type: data_type.into(),
            data,
            created_at: Utc::now(),
            ttl_seconds,
        }
    }

    /// First instant at which the entry is no longer readable.
    pub fn expires_at(&self) -> DateTime<Utc> {
        let ttl = i64::try_from(self.ttl_seconds).unwrap_or(i64::MAX);
        chrono::Duration::try_seconds(ttl)
            .and_then(|ttl| self.created_at.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Whether the TTL has run out at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at()
    }
}

/// TTL-bounded table of [`DataShare`] entries.
///
/// Reads and the sweep share one lock: an entry is checked and, if expired,
/// removed in the same critical section, so a reader never gets an entry
/// past its TTL.
pub struct DataShareStore {
    entries: Mutex<HashMap<Uuid, DataShare>>,
}

impl DataShareStore {
    /// An empty store.
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Store an entry and return its id.
    pub fn insert(&self, share: DataShare) -> Uuid {
        let id = share.id;
        self.entries.lock().insert(id, share);
        id
    }

    /// An entry by id, unless it has expired.
    pub fn get(&self, id: Uuid) -> Option<DataShare> {
        self.get_at(id, Utc::now())
    }

    pub(crate) fn get_at(&self, id: Uuid, now: DateTime<Utc>) -> Option<DataShare> {
        let mut entries = self.entries.lock();
        match entries.get(&id) {
            Some(share) if share.is_expired_at(now) => {
                entries.remove(&id);
                None
            }
            Some(share) => Some(share.clone()),
            None => None,
        }
    }

    /// Live entries of `data_type`, optionally restricted to one source,
    /// oldest first.
    pub fn by_type(&self, data_type: &str, source_agent: Option<&str>) -> Vec<DataShare> {
        self.by_type_at(data_type, source_agent, Utc::now())
    }

    pub(crate) fn by_type_at(
        &self,
        data_type: &str,
        source_agent: Option<&str>,
        now: DateTime<Utc>,
    ) -> Vec<DataShare> {
        let mut entries = self.entries.lock();
        entries.retain(|_, share| !share.is_expired_at(now));
        let mut matches: Vec<DataShare> = entries
            .values()
            .filter(|share| share.data_type == data_type)
            .filter(|share| source_agent.map_or(true, |src| share.source_agent == src))
            .cloned()
            .collect();
        matches.sort_by_key(|share| share.created_at);
        matches
    }

    /// Remove every entry expired at `now`. Returns how many were removed.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, share| !share.is_expired_at(now));
        let removed = before - entries.len();
        if removed > 0 {
            debug!(removed, "Purged expired shared data");
        }
        removed
    }

    /// Number of stored entries, expired ones included until swept.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// True when the store holds nothing.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl Default for DataShareStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_get_before_and_at_expiry() {
        let store = DataShareStore::new();
        let share = DataShare::new("analyst", "report", json!({"v": 1}), 30);
        let created = share.created_at;
        let id = store.insert(share);

        let just_before = created + chrono::Duration::seconds(29);
        assert!(store.get_at(id, just_before).is_some());

        let at_ttl = created + chrono::Duration::seconds(30);
        assert!(store.get_at(id, at_ttl).is_none());
        // Expired entries are removed, so they never come back.
        assert!(store.get_at(id, just_before).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_zero_ttl_is_immediately_expired() {
        let store = DataShareStore::new();
        let id = store.insert(DataShare::new("a", "t", json!(1), 0));
        assert!(store.get(id).is_none());
    }

    #[test]
    fn test_by_type_filters_source_and_expiry() {
        let store = DataShareStore::new();
        store.insert(DataShare::new("a", "metrics", json!(1), 60));
        store.insert(DataShare::new("b", "metrics", json!(2), 60));
        store.insert(DataShare::new("a", "other", json!(3), 60));
        store.insert(DataShare::new("a", "metrics", json!(4), 0));

        assert_eq!(store.by_type("metrics", None).len(), 2);
        let from_a = store.by_type("metrics", Some("a"));
        assert_eq!(from_a.len(), 1);
        assert_eq!(from_a[0].data, json!(1));
    }

    #[test]
    fn test_purge_expired() {
        let store = DataShareStore::new();
        store.insert(DataShare::new("a", "t", json!(1), 10));
        store.insert(DataShare::new("a", "t", json!(2), 1000));
        let later = Utc::now() + chrono::Duration::seconds(11);
        assert_eq!(store.purge_expired(later), 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_huge_ttl_does_not_overflow() {
        let share = DataShare::new("a", "t", json!(null), u64::MAX);
        assert!(!share.is_expired_at(Utc::now()));
    }
}
