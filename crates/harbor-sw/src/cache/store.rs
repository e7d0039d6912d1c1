//! Named caches of request → snapshot pairs, shared across request tasks.

use std::collections::VecDeque;
use std::sync::Arc;

use hashbrown::HashMap;
use http::HeaderMap;
use tokio::sync::RwLock;
use tracing::trace;

use super::entry::{CacheEntry, RequestIdentity};
use super::CacheError;

/// A single named cache. Keys keep insertion order; a refresh re-inserts.
#[derive(Debug, Default)]
pub struct Cache {
    pub name: String,
    entries: HashMap<String, CacheEntry>,
    /// Entry keys per request identity, one per header variant, oldest first.
    variants: HashMap<String, Vec<String>>,
    order: VecDeque<String>,
    bytes: usize,
}

impl Cache {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    /// Match a request identity, honoring stored header variance.
    pub fn match_request(
        &self,
        identity: &RequestIdentity,
        headers: &HeaderMap,
    ) -> Option<&CacheEntry> {
        self.variants
            .get(&identity.key())?
            .iter()
            .rev()
            .filter_map(|key| self.entries.get(key))
            .find(|entry| entry.matches_variance(headers))
    }

    /// Store an entry, replacing any previous snapshot of the same identity
    /// and header variant.
    pub fn put(&mut self, entry: CacheEntry) -> Option<CacheEntry> {
        let key = entry.key();
        let previous = self.remove(&key);
        self.variants
            .entry(entry.identity.key())
            .or_default()
            .push(key.clone());
        self.bytes += entry.size();
        self.order.push_back(key.clone());
        self.entries.insert(key, entry);
        previous
    }

    pub fn delete(&mut self, key: &str) -> bool {
        self.remove(key).is_some()
    }

    fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        self.bytes -= entry.size();
        let identity = entry.identity.key();
        if let Some(keys) = self.variants.get_mut(&identity) {
            keys.retain(|k| k != key);
            if keys.is_empty() {
                self.variants.remove(&identity);
            }
        }
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            self.order.remove(pos);
        }
        Some(entry)
    }

    /// Keys, oldest insertion first.
    pub fn keys(&self) -> Vec<String> {
        self.order.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn size_bytes(&self) -> usize {
        self.bytes
    }
}

/// All caches of one origin.
#[derive(Debug, Default)]
pub struct CacheStorage {
    caches: HashMap<String, Cache>,
    quota_bytes: Option<usize>,
}

impl CacheStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Storage whose total body size may not exceed `quota_bytes`.
    pub fn with_quota(quota_bytes: Option<usize>) -> Self {
        Self {
            caches: HashMap::new(),
            quota_bytes,
        }
    }

    /// Open a cache (creates if doesn't exist).
    pub fn open(&mut self, name: &str) -> &mut Cache {
        self.caches
            .entry(name.to_string())
            .or_insert_with(|| Cache::new(name))
    }

    pub fn get(&self, name: &str) -> Option<&Cache> {
        self.caches.get(name)
    }

    pub fn has(&self, name: &str) -> bool {
        self.caches.contains_key(name)
    }

    pub fn delete(&mut self, name: &str) -> bool {
        self.caches.remove(name).is_some()
    }

    /// Cache names, sorted for stable enumeration.
    pub fn keys(&self) -> Vec<String> {
        let mut names: Vec<String> = self.caches.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn usage_bytes(&self) -> usize {
        self.caches.values().map(Cache::size_bytes).sum()
    }

    /// Store into `name`, enforcing the byte quota.
    pub fn put(&mut self, name: &str, entry: CacheEntry) -> Result<(), CacheError> {
        if let Some(quota) = self.quota_bytes {
            let replaced = self
                .caches
                .get(name)
                .and_then(|c| c.entries.get(&entry.key()))
                .map(CacheEntry::size)
                .unwrap_or(0);
            let projected = self.usage_bytes() - replaced + entry.size();
            if projected > quota {
                return Err(CacheError::QuotaExceeded {
                    needed: projected,
                    quota,
                });
            }
        }
        self.open(name).put(entry);
        Ok(())
    }
}

/// Shared handle to the cache storage.
///
/// Each method is one short critical section; nothing holds the lock across
/// a network call.
#[derive(Debug, Clone, Default)]
pub struct CacheStore {
    inner: Arc<RwLock<CacheStorage>>,
}

impl CacheStore {
    pub fn new(quota_bytes: Option<usize>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(CacheStorage::with_quota(quota_bytes))),
        }
    }

    /// Look up an identity in the first of `names` that has it.
    pub async fn match_in(
        &self,
        names: &[String],
        identity: &RequestIdentity,
        headers: &HeaderMap,
    ) -> Option<CacheEntry> {
        let storage = self.inner.read().await;
        names.iter().find_map(|name| {
            storage
                .get(name)
                .and_then(|cache| cache.match_request(identity, headers))
                .cloned()
        })
    }

    pub async fn put(&self, name: &str, entry: CacheEntry) -> Result<(), CacheError> {
        trace!(cache = name, key = %entry.key(), "Cache put");
        self.inner.write().await.put(name, entry)
    }

    pub async fn delete_entry(&self, name: &str, key: &str) -> bool {
        match self.inner.write().await.caches.get_mut(name) {
            Some(cache) => cache.delete(key),
            None => false,
        }
    }

    /// Entry keys of `name`, oldest first; empty if the cache is missing.
    pub async fn entry_keys(&self, name: &str) -> Vec<String> {
        self.inner
            .read()
            .await
            .get(name)
            .map(Cache::keys)
            .unwrap_or_default()
    }

    pub async fn len(&self, name: &str) -> usize {
        self.inner.read().await.get(name).map(Cache::len).unwrap_or(0)
    }

    pub async fn open(&self, name: &str) {
        self.inner.write().await.open(name);
    }

    pub async fn has(&self, name: &str) -> bool {
        self.inner.read().await.has(name)
    }

    pub async fn delete(&self, name: &str) -> bool {
        self.inner.write().await.delete(name)
    }

    pub async fn keys(&self) -> Vec<String> {
        self.inner.read().await.keys()
    }

    pub async fn usage_bytes(&self) -> usize {
        self.inner.read().await.usage_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use harbor_net::{Request, Response, Url};
    use http::{HeaderName, HeaderValue};

    fn entry(url: &str, body: &str) -> CacheEntry {
        let request = Request::get(Url::parse(url).unwrap());
        CacheEntry::capture(&request, &Response::ok_with("text/plain", body.to_string())).unwrap()
    }

    #[test]
    fn test_put_replaces_and_reorders() {
        let mut cache = Cache::new("harbor-runtime-v1");
        cache.put(entry("https://app.test/a", "1"));
        cache.put(entry("https://app.test/b", "2"));
        let previous = cache.put(entry("https://app.test/a", "33"));

        assert!(previous.is_some());
        assert_eq!(cache.len(), 2);
        assert_eq!(
            cache.keys(),
            vec!["GET https://app.test/b", "GET https://app.test/a"]
        );
        assert_eq!(cache.size_bytes(), 3);
    }

    #[test]
    fn test_header_variants_coexist() {
        let response = || {
            Response::ok_with("application/json", "{}")
                .with_header(http::header::VARY, HeaderValue::from_static("Authorization"))
        };
        let as_user = |token: &'static str| {
            Request::get(Url::parse("https://app.test/api/me").unwrap()).header(
                HeaderName::from_static("authorization"),
                HeaderValue::from_static(token),
            )
        };
        let alice = as_user("Bearer alice");
        let bob = as_user("Bearer bob");

        let mut cache = Cache::new("harbor-api-v1");
        cache.put(CacheEntry::capture(&alice, &response()).unwrap());
        let mut second = CacheEntry::capture(&bob, &response()).unwrap();
        second.body = b"bob".to_vec();
        assert!(cache.put(second).is_none());
        assert_eq!(cache.len(), 2);

        let identity = RequestIdentity::of(&alice);
        assert_eq!(cache.match_request(&identity, &alice.headers).unwrap().body, b"{}");
        assert_eq!(cache.match_request(&identity, &bob.headers).unwrap().body, b"bob");
        let anonymous = Request::get(Url::parse("https://app.test/api/me").unwrap());
        assert!(cache.match_request(&identity, &anonymous.headers).is_none());

        assert!(cache.delete("GET https://app.test/api/me authorization=Bearer alice"));
        assert!(cache.match_request(&identity, &alice.headers).is_none());
        assert!(cache.match_request(&identity, &bob.headers).is_some());
    }

    #[test]
    fn test_delete() {
        let mut cache = Cache::new("v1");
        cache.put(entry("https://app.test/style.css", "x"));
        assert!(cache.delete("GET https://app.test/style.css"));
        assert!(!cache.delete("GET https://app.test/style.css"));
        assert!(cache.is_empty());
        assert_eq!(cache.size_bytes(), 0);
    }

    #[test]
    fn test_cache_storage() {
        let mut storage = CacheStorage::new();
        assert!(!storage.has("v1"));
        storage.open("v1");
        assert!(storage.has("v1"));
        assert!(storage.delete("v1"));
        assert!(!storage.has("v1"));
    }

    #[test]
    fn test_quota_rejects_oversized_write() {
        let mut storage = CacheStorage::with_quota(Some(4));
        storage.put("a", entry("https://app.test/1", "abc")).unwrap();
        let err = storage.put("a", entry("https://app.test/2", "de")).unwrap_err();
        assert!(matches!(err, CacheError::QuotaExceeded { .. }));
        // Replacing an entry only counts the difference.
        storage.put("a", entry("https://app.test/1", "abcd")).unwrap();
        assert_eq!(storage.usage_bytes(), 4);
    }

    #[tokio::test]
    async fn test_store_match_in_searches_in_order() {
        let store = CacheStore::new(None);
        store.put("static", entry("https://app.test/", "seed")).await.unwrap();
        store.put("runtime", entry("https://app.test/", "live")).await.unwrap();

        let request = Request::get(Url::parse("https://app.test/").unwrap());
        let identity = RequestIdentity::of(&request);
        let names = vec!["runtime".to_string(), "static".to_string()];
        let hit = store.match_in(&names, &identity, &request.headers).await.unwrap();
        assert_eq!(hit.body, b"live");

        assert!(store
            .match_in(&["missing".to_string()], &identity, &request.headers)
            .await
            .is_none());
    }
}
