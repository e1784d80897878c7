use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

struct CacheEntry {
    value: String,
    stored_at: Instant,
}

/// Process-wide cache of raw AI replies with a fixed time-to-live.
///
/// Expired entries are removed lazily on read and by [`AiCache::purge_expired`],
/// which the scheduler runs hourly. There is no size bound.
#[derive(Clone)]
pub struct AiCache {
    entries: Arc<RwLock<HashMap<String, CacheEntry>>>,
    ttl: Duration,
}

impl AiCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }

    pub fn key(kind: &str, parts: &[&str]) -> String {
        let mut key = kind.to_string();
        for part in parts {
            key.push('\u{1f}');
            key.push_str(&part.trim().to_lowercase());
        }
        key
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(entry) if entry.stored_at.elapsed() < self.ttl => {
                    return Some(entry.value.clone());
                }
                Some(_) => {}
                None => return None,
            }
        }

        let mut entries = self.entries.write().await;
        if entries
            .get(key)
            .is_some_and(|entry| entry.stored_at.elapsed() >= self.ttl)
        {
            entries.remove(key);
        }
        None
    }

    pub async fn insert(&self, key: String, value: String) {
        let mut entries = self.entries.write().await;
        entries.insert(
            key,
            CacheEntry {
                value,
                stored_at: Instant::now(),
            },
        );
    }

    pub async fn purge_expired(&self) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.stored_at.elapsed() < self.ttl);
        before - entries.len()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_normalise_inputs() {
        assert_eq!(
            AiCache::key("questions", &["  Customer Feedback ", "5"]),
            AiCache::key("questions", &["customer feedback", "5"])
        );
        assert_ne!(
            AiCache::key("questions", &["a", "bc"]),
            AiCache::key("questions", &["ab", "c"])
        );
    }

    #[tokio::test]
    async fn returns_fresh_entries() {
        let cache = AiCache::new(Duration::from_secs(60));
        cache.insert("k".into(), "v".into()).await;
        assert_eq!(cache.get("k").await.as_deref(), Some("v"));
        assert_eq!(cache.get("missing").await, None);
    }

    #[tokio::test]
    async fn expires_lazily_and_on_purge() {
        let cache = AiCache::new(Duration::from_millis(50));
        cache.insert("a".into(), "1".into()).await;
        cache.insert("b".into(), "2".into()).await;

        tokio::time::sleep(Duration::from_millis(80)).await;

        assert_eq!(cache.get("a").await, None);
        assert_eq!(cache.len().await, 1);

        cache.insert("c".into(), "3".into()).await;
        assert_eq!(cache.purge_expired().await, 1);
        assert_eq!(cache.len().await, 1);
        assert_eq!(cache.get("c").await.as_deref(), Some("3"));
    }
}
