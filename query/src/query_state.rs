use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

use crate::Instant;

/// The lifecycle of a query or mutation cache entry.
///
/// `Uninitialized -> Pending -> (Fulfilled | Rejected)`. Query entries go back to
/// `Pending` on refetch. Mutation entries are terminal once settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryStatus {
    /// No request was ever started for this entry.
    #[default]
    Uninitialized,
    /// A request is in flight. Previous `data` is retained.
    Pending,
    /// The last request succeeded.
    Fulfilled,
    /// The last request failed.
    Rejected,
}

/// Unique id of a single `initiate` call.
///
/// Identifies subscribers of query entries and is the cache key of mutation entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct RequestId(u64);

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

impl RequestId {
    pub(crate) fn next() -> Self {
        RequestId(NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies a query cache entry: one per (endpoint, serialized argument) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryCacheKey {
    /// Endpoint name.
    pub endpoint: String,
    /// Stable string derived from the endpoint's argument.
    pub serialized_query_args: String,
}

impl QueryCacheKey {
    /// Creates a key.
    pub fn new(endpoint: impl Into<String>, serialized_query_args: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            serialized_query_args: serialized_query_args.into(),
        }
    }
}

impl std::fmt::Display for QueryCacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.endpoint, self.serialized_query_args)
    }
}

/// Options a single subscriber attaches to a query entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionOptions {
    /// Refetch the entry on this interval while subscribed.
    pub polling_interval: Option<Duration>,
}

/// A subscriber reference held by a query entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscriber {
    /// The `initiate` call that subscribed.
    pub request_id: RequestId,
    /// Per subscriber options.
    pub options: SubscriptionOptions,
}

/// The cached state for one (endpoint, serialized argument) pair.
#[derive(Debug, Clone, PartialEq)]
pub struct QuerySubState {
    /// Cache key of the entry.
    pub key: QueryCacheKey,
    /// Current status.
    pub status: QueryStatus,
    /// Last argument used.
    pub original_args: Value,
    /// Last successful payload. Survives refetches.
    pub data: Option<Value>,
    /// Error of the last failed request.
    pub error: Option<Value>,
    /// Id of the in-flight or most recent request.
    pub request_id: Option<RequestId>,
    /// When the most recent request started.
    pub started_time_stamp: Option<Instant>,
    /// When the most recent successful request settled.
    pub fulfilled_time_stamp: Option<Instant>,
    /// Subscribers, in subscription order.
    pub subscribers: Vec<Subscriber>,
}

impl QuerySubState {
    pub(crate) fn new(key: QueryCacheKey, original_args: Value) -> Self {
        Self {
            key,
            status: QueryStatus::Uninitialized,
            original_args,
            data: None,
            error: None,
            request_id: None,
            started_time_stamp: None,
            fulfilled_time_stamp: None,
            subscribers: Vec::new(),
        }
    }

    /// Number of live subscriber references.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// The lowest polling interval requested by any subscriber.
    pub fn lowest_polling_interval(&self) -> Option<Duration> {
        self.subscribers
            .iter()
            .filter_map(|s| s.options.polling_interval)
            .filter(|interval| !interval.is_zero())
            .min()
    }
}

/// The cached state of a single mutation request.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationSubState {
    /// Endpoint name.
    pub endpoint: String,
    /// The request this entry belongs to.
    pub request_id: RequestId,
    /// Current status.
    pub status: QueryStatus,
    /// Argument the mutation was triggered with.
    pub original_args: Value,
    /// Successful payload.
    pub data: Option<Value>,
    /// Failure payload.
    pub error: Option<Value>,
    /// When the request started.
    pub started_time_stamp: Option<Instant>,
    /// When the request succeeded.
    pub fulfilled_time_stamp: Option<Instant>,
}

impl MutationSubState {
    pub(crate) fn pending(
        endpoint: impl Into<String>,
        request_id: RequestId,
        original_args: Value,
        started_at: Instant,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            request_id,
            status: QueryStatus::Pending,
            original_args,
            data: None,
            error: None,
            started_time_stamp: Some(started_at),
            fulfilled_time_stamp: None,
        }
    }

    pub(crate) fn fulfill(&mut self, data: Value, fulfilled_at: Instant) {
        self.status = QueryStatus::Fulfilled;
        self.data = Some(data);
        self.error = None;
        self.fulfilled_time_stamp = Some(fulfilled_at);
    }

    pub(crate) fn reject(&mut self, error: Value) {
        self.status = QueryStatus::Rejected;
        self.error = Some(error);
    }
}
