use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::Account;

const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

/// Short-lived memo of the account list, keyed by (workspace, credential
/// hash). Rotating the credential changes the hash, so stale entries for an
/// old token are simply never hit again.
pub struct AccountCache {
    ttl: Duration,
    entries: Mutex<HashMap<(i64, u64), CacheEntry>>,
}

struct CacheEntry {
    fetched_at: Instant,
    accounts: Vec<Account>,
}

impl Default for AccountCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl AccountCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, workspace_id: i64, token: &str) -> Option<Vec<Account>> {
        let entries = self.entries.lock().ok()?;
        let entry = entries.get(&(workspace_id, credential_hash(token)))?;
        if entry.fetched_at.elapsed() >= self.ttl {
            return None;
        }
        Some(entry.accounts.clone())
    }

    pub fn put(&self, workspace_id: i64, token: &str, accounts: Vec<Account>) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(
                (workspace_id, credential_hash(token)),
                CacheEntry {
                    fetched_at: Instant::now(),
                    accounts,
                },
            );
        }
    }
}

fn credential_hash(token: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    token.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn accounts() -> Vec<Account> {
        vec![Account {
            id: "act_1".to_string(),
            name: "VELUNAPETS SI COD $".to_string(),
        }]
    }

    #[test]
    fn test_hit_within_ttl() {
        let cache = AccountCache::new(Duration::from_secs(60));
        cache.put(1, "tok", accounts());
        let hit = cache.get(1, "tok").unwrap();
        assert_eq!(hit.len(), 1);
        assert_eq!(hit[0].id, "act_1");
    }

    #[test]
    fn test_expired_entry_misses() {
        let cache = AccountCache::new(Duration::ZERO);
        cache.put(1, "tok", accounts());
        assert!(cache.get(1, "tok").is_none());
    }

    #[test]
    fn test_keyed_by_workspace_and_credential() {
        let cache = AccountCache::new(Duration::from_secs(60));
        cache.put(1, "tok", accounts());
        assert!(cache.get(2, "tok").is_none());
        assert!(cache.get(1, "rotated").is_none());
    }
}
