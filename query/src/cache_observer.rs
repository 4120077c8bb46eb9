use slotmap::new_key_type;

use crate::{QueryCacheKey, RequestId};

new_key_type! {
    /// Handle of a registered [`CacheObserver`].
    pub struct CacheObserverKey;
}

/// Identifies any cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    /// A query entry.
    Query(QueryCacheKey),
    /// A tracked mutation entry.
    Mutation(RequestId),
}

impl From<QueryCacheKey> for CacheKey {
    fn from(key: QueryCacheKey) -> Self {
        CacheKey::Query(key)
    }
}

impl From<RequestId> for CacheKey {
    fn from(request_id: RequestId) -> Self {
        CacheKey::Mutation(request_id)
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheKey::Query(key) => write!(f, "{key}"),
            CacheKey::Mutation(request_id) => write!(f, "mutation#{request_id}"),
        }
    }
}

/// Subscribing to cache events.
pub trait CacheObserver {
    /// Receive a cache event.
    fn process_cache_event(&self, event: &CacheEvent);
}

impl<F> CacheObserver for F
where
    F: Fn(&CacheEvent),
{
    fn process_cache_event(&self, event: &CacheEvent) {
        self(event)
    }
}

/// The events that can be observed from the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    /// An entry came into existence.
    Added(CacheKey),
    /// An existing entry changed.
    Updated(CacheKey),
    /// An entry was removed. Its data is gone.
    Removed(CacheKey),
}

impl CacheEvent {
    /// The entry the event is about.
    pub fn key(&self) -> &CacheKey {
        match self {
            CacheEvent::Added(key) | CacheEvent::Updated(key) | CacheEvent::Removed(key) => key,
        }
    }
}
