use serde_json::Value;

use crate::{EntityDescription, Instant, QueryCacheKey, RequestId, SubscriptionOptions};

/// Argument of one query execution.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryThunkArg {
    /// Entry being fetched.
    pub key: QueryCacheKey,
    /// Argument the endpoint was called with.
    pub original_args: Value,
    /// Request descriptor derived by the endpoint's `query` function.
    pub request_args: Value,
}

/// Argument of one mutation execution.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationThunkArg {
    /// Endpoint name.
    pub endpoint: String,
    /// Argument the endpoint was called with.
    pub original_args: Value,
    /// Request descriptor derived by the endpoint's `query` function.
    pub request_args: Value,
    /// Whether a selectable entry is kept.
    pub track: bool,
}

/// Everything that can change the cache. Processed one at a time, in dispatch order.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Adds a subscriber reference, creating the entry if needed.
    QuerySubscribed {
        /// Entry to subscribe to.
        key: QueryCacheKey,
        /// Argument of the subscribing call.
        original_args: Value,
        /// Id of the subscribing call.
        request_id: RequestId,
        /// Subscriber options.
        options: SubscriptionOptions,
    },
    /// A query request started.
    QueryPending {
        /// The execution.
        arg: QueryThunkArg,
        /// Request id.
        request_id: RequestId,
        /// Start time.
        started_at: Instant,
    },
    /// A query request succeeded.
    QueryFulfilled {
        /// The execution.
        arg: QueryThunkArg,
        /// Request id.
        request_id: RequestId,
        /// Payload.
        data: Value,
        /// Completion time.
        fulfilled_at: Instant,
    },
    /// A query request failed.
    QueryRejected {
        /// The execution.
        arg: QueryThunkArg,
        /// Request id.
        request_id: RequestId,
        /// Transport error payload.
        error: Value,
    },
    /// A mutation request started.
    MutationPending {
        /// The execution.
        arg: MutationThunkArg,
        /// Request id, also the cache key of the entry.
        request_id: RequestId,
        /// Start time.
        started_at: Instant,
    },
    /// A mutation request succeeded.
    MutationFulfilled {
        /// The execution.
        arg: MutationThunkArg,
        /// Request id.
        request_id: RequestId,
        /// Payload.
        data: Value,
        /// Completion time.
        fulfilled_at: Instant,
    },
    /// A mutation request failed.
    MutationRejected {
        /// The execution.
        arg: MutationThunkArg,
        /// Request id.
        request_id: RequestId,
        /// Transport error payload.
        error: Value,
    },
    /// Drops one subscriber reference from a query entry.
    UnsubscribeQueryResult {
        /// Entry.
        key: QueryCacheKey,
        /// The subscriber to drop.
        request_id: RequestId,
    },
    /// Removes a mutation entry.
    UnsubscribeMutationResult {
        /// The mutation request.
        request_id: RequestId,
    },
    /// Removes a query entry and everything it provided.
    RemoveQueryResult {
        /// Entry.
        key: QueryCacheKey,
    },
    /// Replaces the data of a query entry, if it holds data.
    UpdateQueryData {
        /// Entry.
        key: QueryCacheKey,
        /// New payload.
        data: Value,
    },
    /// Invalidates entities outside of a mutation.
    InvalidateEntities {
        /// Entities to invalidate.
        entities: Vec<EntityDescription>,
    },
    /// Removes every entry.
    ResetApiState,
}

impl Action {
    /// Short name, used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Action::QuerySubscribed { .. } => "query/subscribed",
            Action::QueryPending { .. } => "query/pending",
            Action::QueryFulfilled { .. } => "query/fulfilled",
            Action::QueryRejected { .. } => "query/rejected",
            Action::MutationPending { .. } => "mutation/pending",
            Action::MutationFulfilled { .. } => "mutation/fulfilled",
            Action::MutationRejected { .. } => "mutation/rejected",
            Action::UnsubscribeQueryResult { .. } => "unsubscribeQueryResult",
            Action::UnsubscribeMutationResult { .. } => "unsubscribeMutationResult",
            Action::RemoveQueryResult { .. } => "removeQueryResult",
            Action::UpdateQueryData { .. } => "updateQueryData",
            Action::InvalidateEntities { .. } => "invalidateEntities",
            Action::ResetApiState => "resetApiState",
        }
    }

    /// The query entry the action targets, if any.
    pub fn query_key(&self) -> Option<&QueryCacheKey> {
        match self {
            Action::QuerySubscribed { key, .. }
            | Action::UnsubscribeQueryResult { key, .. }
            | Action::RemoveQueryResult { key }
            | Action::UpdateQueryData { key, .. } => Some(key),
            Action::QueryPending { arg, .. }
            | Action::QueryFulfilled { arg, .. }
            | Action::QueryRejected { arg, .. } => Some(&arg.key),
            _ => None,
        }
    }
}
