//! TTL-bounded in-memory cache of workspace records.
//!
//! Hits hand out a deep copy of the stored record, so callers can never
//! mutate cached state through a read result. Expired entries are removed
//! lazily by the read that observes them. Readers share the map; writers
//! are exclusive.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use crate::workspace::Workspace;

struct CacheEntry {
    workspace: Workspace,
    directory_name: String,
    expires_at: Instant,
}

pub struct WorkspaceCache {
    ttl: Duration,
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl WorkspaceCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Look up a workspace snapshot. Returns a deep copy on hit.
    pub fn get(&self, id: &str) -> Option<(Workspace, String)> {
        let expired = {
            let entries = self.entries.read().expect("cache lock poisoned");
            match entries.get(id) {
                Some(entry) if entry.expires_at > Instant::now() => {
                    return Some((entry.workspace.clone(), entry.directory_name.clone()));
                }
                Some(_) => true,
                None => false,
            }
        };

        if expired {
            let mut entries = self.entries.write().expect("cache lock poisoned");
            if let Some(entry) = entries.get(id) {
                if entry.expires_at <= Instant::now() {
                    entries.remove(id);
                }
            }
        }
        None
    }

    /// Store a snapshot under the id. The cache owns its own copy.
    pub fn set(&self, id: &str, workspace: &Workspace, directory_name: &str) {
        let mut entries = self.entries.write().expect("cache lock poisoned");
        entries.insert(
            id.to_string(),
            CacheEntry {
                workspace: workspace.clone(),
                directory_name: directory_name.to_string(),
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    /// Drop the entry for an id. Absent ids are a no-op.
    pub fn invalidate(&self, id: &str) {
        let mut entries = self.entries.write().expect("cache lock poisoned");
        entries.remove(id);
    }

    pub fn invalidate_all(&self) {
        let mut entries = self.entries.write().expect("cache lock poisoned");
        entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().expect("cache lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workspace::RepoRef;

    fn sample() -> Workspace {
        let mut ws = Workspace::new("TEST-1", "TEST-1", "TEST-1");
        ws.add_repo(RepoRef {
            name: "api".into(),
            url: "https://example.com/api.git".into(),
        })
        .unwrap();
        ws
    }

    #[test]
    fn miss_then_hit() {
        let cache = WorkspaceCache::new(Duration::from_secs(30));
        assert!(cache.get("TEST-1").is_none());

        cache.set("TEST-1", &sample(), "TEST-1");
        let (ws, dir) = cache.get("TEST-1").unwrap();
        assert_eq!(ws.id, "TEST-1");
        assert_eq!(dir, "TEST-1");
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn hit_returns_isolated_copy() {
        let cache = WorkspaceCache::new(Duration::from_secs(30));
        cache.set("TEST-1", &sample(), "TEST-1");

        let (mut ws, _) = cache.get("TEST-1").unwrap();
        ws.branch_name = "mutated".into();
        ws.repos[0].name = "mutated".into();
        ws.repos.push(RepoRef {
            name: "extra".into(),
            url: "x".into(),
        });

        let (fresh, _) = cache.get("TEST-1").unwrap();
        assert_eq!(fresh.branch_name, "TEST-1");
        assert_eq!(fresh.repos.len(), 1);
        assert_eq!(fresh.repos[0].name, "api");
    }

    #[test]
    fn expired_entry_is_removed_lazily() {
        let cache = WorkspaceCache::new(Duration::from_millis(20));
        cache.set("TEST-1", &sample(), "TEST-1");
        std::thread::sleep(Duration::from_millis(40));

        assert!(cache.get("TEST-1").is_none());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn invalidate_is_noop_for_absent_ids() {
        let cache = WorkspaceCache::new(Duration::from_secs(30));
        cache.invalidate("nope");
        assert!(cache.is_empty());
    }

    #[test]
    fn invalidate_all_clears() {
        let cache = WorkspaceCache::new(Duration::from_secs(30));
        cache.set("A", &sample(), "A");
        cache.set("B", &sample(), "B");
        cache.invalidate_all();
        assert!(cache.is_empty());
    }
}
