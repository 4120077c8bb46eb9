use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::slice::ApiState;
use crate::{Instant, MutationSubState, QueryCacheKey, QueryStatus, QuerySubState, RequestId};

/// Snapshot of a cache entry, as returned by selectors.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    /// Endpoint the entry belongs to.
    pub endpoint_name: String,
    /// Current status.
    pub status: QueryStatus,
    /// Last successful payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Last error payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
    /// Argument of the last request. `None` for an uninitialized snapshot.
    pub original_args: Option<Value>,
    /// Current or most recent request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<RequestId>,
    /// When the most recent request started.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_time_stamp: Option<Instant>,
    /// When the most recent successful request settled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fulfilled_time_stamp: Option<Instant>,
    /// `status == Uninitialized`.
    pub is_uninitialized: bool,
    /// `status == Pending`.
    pub is_loading: bool,
    /// `status == Fulfilled`.
    pub is_success: bool,
    /// `status == Rejected`.
    pub is_error: bool,
}

/// Mutation entries share the query snapshot shape.
pub type MutationResult = QueryResult;

impl QueryResult {
    /// The snapshot of an entry that doesn't exist.
    pub fn uninitialized(endpoint_name: impl Into<String>) -> Self {
        Self::from_parts(endpoint_name.into(), QueryStatus::Uninitialized)
    }

    fn from_parts(endpoint_name: String, status: QueryStatus) -> Self {
        Self {
            endpoint_name,
            status,
            data: None,
            error: None,
            original_args: None,
            request_id: None,
            started_time_stamp: None,
            fulfilled_time_stamp: None,
            is_uninitialized: status == QueryStatus::Uninitialized,
            is_loading: status == QueryStatus::Pending,
            is_success: status == QueryStatus::Fulfilled,
            is_error: status == QueryStatus::Rejected,
        }
    }

    /// Deserializes `data` into `T`. `Ok(None)` if there is no data.
    pub fn data_as<T: DeserializeOwned>(&self) -> Result<Option<T>, crate::Error> {
        self.data
            .clone()
            .map(serde_json::from_value)
            .transpose()
            .map_err(Into::into)
    }

    /// Deserializes `error` into `T`. `Ok(None)` if there is no error.
    pub fn error_as<T: DeserializeOwned>(&self) -> Result<Option<T>, crate::Error> {
        self.error
            .clone()
            .map(serde_json::from_value)
            .transpose()
            .map_err(Into::into)
    }
}

impl From<&QuerySubState> for QueryResult {
    fn from(entry: &QuerySubState) -> Self {
        Self {
            data: entry.data.clone(),
            error: entry.error.clone(),
            original_args: Some(entry.original_args.clone()),
            request_id: entry.request_id,
            started_time_stamp: entry.started_time_stamp,
            fulfilled_time_stamp: entry.fulfilled_time_stamp,
            ..Self::from_parts(entry.key.endpoint.clone(), entry.status)
        }
    }
}

impl From<&MutationSubState> for QueryResult {
    fn from(entry: &MutationSubState) -> Self {
        Self {
            data: entry.data.clone(),
            error: entry.error.clone(),
            original_args: Some(entry.original_args.clone()),
            request_id: Some(entry.request_id),
            started_time_stamp: entry.started_time_stamp,
            fulfilled_time_stamp: entry.fulfilled_time_stamp,
            ..Self::from_parts(entry.endpoint.clone(), entry.status)
        }
    }
}

/// Selects a query entry, or an uninitialized snapshot if it doesn't exist.
pub fn select_query(state: &ApiState, key: &QueryCacheKey) -> QueryResult {
    state
        .query(key)
        .map(QueryResult::from)
        .unwrap_or_else(|| QueryResult::uninitialized(key.endpoint.clone()))
}

/// Selects a tracked mutation entry, or an uninitialized snapshot.
pub fn select_mutation(state: &ApiState, endpoint: &str, request_id: &RequestId) -> MutationResult {
    state
        .mutation(request_id)
        .map(QueryResult::from)
        .unwrap_or_else(|| QueryResult::uninitialized(endpoint))
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;
    use serde_json::json;

    use super::*;

    #[test]
    fn uninitialized_flags() {
        let result = QueryResult::uninitialized("getPost");
        assert!(result.is_uninitialized);
        assert!(!result.is_loading && !result.is_success && !result.is_error);
        assert_eq!(
            serde_json::to_value(&result).unwrap(),
            json!({
                "endpointName": "getPost",
                "status": "uninitialized",
                "originalArgs": null,
                "isUninitialized": true,
                "isLoading": false,
                "isSuccess": false,
                "isError": false,
            })
        );
    }

    #[test]
    fn select_missing_entry() {
        let state = ApiState::default();
        let result = select_query(&state, &QueryCacheKey::new("getPost", "1"));
        assert_eq!(result, QueryResult::uninitialized("getPost"));
    }

    #[test]
    fn snapshot_of_mutation_entry() {
        let request_id = RequestId::next();
        let mut entry =
            MutationSubState::pending("addPost", request_id, json!("arg"), Instant(1_000));
        entry.fulfill(json!({ "id": 1, "title": "hi" }), Instant(1_200));

        let result = QueryResult::from(&entry);
        assert!(result.is_success);
        assert_eq!(result.request_id, Some(request_id));
        assert_eq!(result.original_args, Some(json!("arg")));
        assert_eq!(result.fulfilled_time_stamp, Some(Instant(1_200)));

        #[derive(Debug, PartialEq, Deserialize)]
        struct Post {
            id: u32,
            title: String,
        }
        assert_eq!(
            result.data_as::<Post>().unwrap(),
            Some(Post {
                id: 1,
                title: "hi".into()
            })
        );
        assert!(result.data_as::<String>().is_err());
        assert_eq!(result.error_as::<String>().unwrap(), None);
    }
}
