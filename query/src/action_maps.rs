use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use crate::thunks::{self, SharedOutcome, SharedRequest};
use crate::{
    Api, EndpointKind, Error, InitiateOptions, MutationOptions, MutationResult, QueryCacheKey,
    QueryResult, RequestId,
};

/// Action creators and selectors of one query endpoint.
#[derive(Clone, Debug)]
pub struct QueryEndpoint {
    name: String,
    api: Api,
}

impl QueryEndpoint {
    pub(crate) fn new(name: &str, api: Api) -> Self {
        Self {
            name: name.to_string(),
            api,
        }
    }

    /// Endpoint name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Subscribes to `arg` and fetches it unless cached data can be used.
    ///
    /// Concurrent calls with the same serialized argument share one request.
    pub fn initiate(
        &self,
        arg: impl Serialize,
        options: InitiateOptions,
    ) -> Result<QueryActionHandle, Error> {
        let arg = serde_json::to_value(arg)?;
        thunks::initiate_query(&self.api, &self.name, arg, options)
    }

    /// The cache key `arg` maps to.
    pub fn serialize_args(&self, arg: impl Serialize) -> Result<QueryCacheKey, Error> {
        let arg = serde_json::to_value(arg)?;
        Ok(self.api.query_cache_key(&self.name, &arg))
    }

    /// Current snapshot of `arg`'s entry.
    pub fn select(&self, arg: impl Serialize) -> Result<QueryResult, Error> {
        Ok(self.select_serialized(&self.serialize_args(arg)?.serialized_query_args))
    }

    /// Current snapshot of the entry with these serialized arguments.
    pub fn select_serialized(&self, serialized_query_args: &str) -> QueryResult {
        self.api
            .select_query_key(&QueryCacheKey::new(&self.name, serialized_query_args))
    }

    /// Drops the subscriber reference of `request_id` from `arg`'s entry.
    pub fn unsubscribe(&self, serialized_query_args: &str, request_id: RequestId) {
        self.api.unsubscribe_query_result(
            QueryCacheKey::new(&self.name, serialized_query_args),
            request_id,
        );
    }
}

/// Action creators and selectors of one mutation endpoint.
#[derive(Clone, Debug)]
pub struct MutationEndpoint {
    name: String,
    api: Api,
}

impl MutationEndpoint {
    pub(crate) fn new(name: &str, api: Api) -> Self {
        Self {
            name: name.to_string(),
            api,
        }
    }

    /// Endpoint name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Runs the mutation. Mutations are never deduplicated.
    pub fn initiate(
        &self,
        arg: impl Serialize,
        options: MutationOptions,
    ) -> Result<MutationActionHandle, Error> {
        let arg = serde_json::to_value(arg)?;
        thunks::initiate_mutation(&self.api, &self.name, arg, options)
    }

    /// Current snapshot of a tracked request.
    pub fn select(&self, request_id: &RequestId) -> MutationResult {
        self.api.select_mutation(&self.name, request_id)
    }
}

/// Returned by [`QueryEndpoint::initiate`].
#[derive(Clone)]
pub struct QueryActionHandle {
    api: Api,
    key: QueryCacheKey,
    original_args: Value,
    request_id: RequestId,
    subscribed: bool,
    skipped: bool,
    request: Option<SharedRequest>,
}

impl QueryActionHandle {
    pub(crate) fn new(
        api: Api,
        key: QueryCacheKey,
        original_args: Value,
        request_id: RequestId,
        subscribed: bool,
        request: Option<SharedRequest>,
    ) -> Self {
        Self {
            api,
            key,
            original_args,
            request_id,
            subscribed,
            skipped: false,
            request,
        }
    }

    pub(crate) fn skipped(
        api: Api,
        key: QueryCacheKey,
        original_args: Value,
        request_id: RequestId,
    ) -> Self {
        Self {
            skipped: true,
            ..Self::new(api, key, original_args, request_id, false, None)
        }
    }

    /// Id of this call. Identifies its subscriber reference.
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Cache key of the entry.
    pub fn key(&self) -> &QueryCacheKey {
        &self.key
    }

    /// Serialized argument, the string part of [`QueryActionHandle::key`].
    pub fn serialized_query_args(&self) -> &str {
        &self.key.serialized_query_args
    }

    /// The argument as passed to `initiate`.
    pub fn original_args(&self) -> &Value {
        &self.original_args
    }

    /// Whether this call registered a subscriber.
    pub fn is_subscribed(&self) -> bool {
        self.subscribed
    }

    /// Drops this call's subscriber reference. Doesn't wait for the request.
    pub fn unsubscribe(&self) {
        if self.subscribed {
            self.api
                .unsubscribe_query_result(self.key.clone(), self.request_id);
        }
    }

    /// Waits for the request this call started or joined, then selects the entry.
    pub async fn result(&self) -> QueryResult {
        if let Some(request) = &self.request {
            request.clone().await;
        }
        self.select()
    }

    /// Current snapshot of the entry.
    pub fn select(&self) -> QueryResult {
        if self.skipped {
            return QueryResult::uninitialized(self.key.endpoint.clone());
        }
        self.api.select_query_key(&self.key)
    }
}

impl std::fmt::Debug for QueryActionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryActionHandle")
            .field("key", &self.key)
            .field("request_id", &self.request_id)
            .field("subscribed", &self.subscribed)
            .field("skipped", &self.skipped)
            .finish()
    }
}

/// Returned by [`MutationEndpoint::initiate`].
#[derive(Clone)]
pub struct MutationActionHandle {
    api: Api,
    endpoint: String,
    request_id: RequestId,
    track: bool,
    outcome: SharedOutcome,
}

impl MutationActionHandle {
    pub(crate) fn new(
        api: Api,
        endpoint: String,
        request_id: RequestId,
        track: bool,
        outcome: SharedOutcome,
    ) -> Self {
        Self {
            api,
            endpoint,
            request_id,
            track,
            outcome,
        }
    }

    /// Id of the request. Cache key of its entry.
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Removes the entry of this request.
    pub fn unsubscribe(&self) {
        if self.track {
            self.api.unsubscribe_mutation_result(self.request_id);
        }
    }

    /// Waits for the request to settle.
    ///
    /// Works for untracked requests too, and after [`MutationActionHandle::unsubscribe`].
    pub async fn result(&self) -> MutationResult {
        self.outcome.clone().await
    }

    /// Current snapshot of the entry. Uninitialized for untracked or removed requests.
    pub fn select(&self) -> MutationResult {
        self.api.select_mutation(&self.endpoint, &self.request_id)
    }
}

impl std::fmt::Debug for MutationActionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutationActionHandle")
            .field("endpoint", &self.endpoint)
            .field("request_id", &self.request_id)
            .field("track", &self.track)
            .finish()
    }
}

/// Per endpoint action creators and selectors, keyed by endpoint name.
#[derive(Clone, Debug)]
pub struct ActionMaps {
    /// Query endpoints.
    pub queries: BTreeMap<String, QueryEndpoint>,
    /// Mutation endpoints.
    pub mutations: BTreeMap<String, MutationEndpoint>,
}

impl ActionMaps {
    pub(crate) fn new(api: &Api) -> Self {
        let queries = api
            .endpoint_names(EndpointKind::Query)
            .into_iter()
            .map(|name| {
                let endpoint = QueryEndpoint::new(&name, api.clone());
                (name, endpoint)
            })
            .collect();
        let mutations = api
            .endpoint_names(EndpointKind::Mutation)
            .into_iter()
            .map(|name| {
                let endpoint = MutationEndpoint::new(&name, api.clone());
                (name, endpoint)
            })
            .collect();
        Self { queries, mutations }
    }

    /// A query endpoint.
    pub fn query(&self, name: &str) -> Option<&QueryEndpoint> {
        self.queries.get(name)
    }

    /// A mutation endpoint.
    pub fn mutation(&self, name: &str) -> Option<&MutationEndpoint> {
        self.mutations.get(name)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;
    use std::time::Duration;

    use serde_json::json;
    use tokio::task::LocalSet;

    use super::*;
    use crate::{
        base_query_fn, BaseQueryError, MutationDefinition, QueryDefinition, QueryStatus,
    };

    fn counting_api(calls: Rc<Cell<u32>>) -> Api {
        Api::builder(base_query_fn(move |args, _api, _extra| {
            let calls = calls.clone();
            async move {
                calls.set(calls.get() + 1);
                tokio::time::sleep(Duration::from_millis(100)).await;
                if args == json!("/fail") {
                    Err(BaseQueryError::Failed(json!({ "status": 500 })))
                } else {
                    Ok(json!({ "value": args }))
                }
            }
        }))
        .query("getPost", QueryDefinition::new(|id| json!(format!("/posts/{id}"))))
        .query("broken", QueryDefinition::new(|_| json!("/fail")))
        .mutation("addPost", MutationDefinition::new(|post| post.clone()))
        .build()
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_initiates_share_one_request() {
        LocalSet::new()
            .run_until(async {
                let calls = Rc::new(Cell::new(0));
                let api = counting_api(calls.clone());
                let endpoint = api.query_endpoint("getPost").unwrap();

                let handles: Vec<_> = (0..3)
                    .map(|_| endpoint.initiate(1, InitiateOptions::default()).unwrap())
                    .collect();
                assert_eq!(endpoint.select(1).unwrap().status, QueryStatus::Pending);

                for handle in &handles {
                    let result = handle.result().await;
                    assert!(result.is_success);
                    assert_eq!(result.data, Some(json!({ "value": "/posts/1" })));
                }
                assert_eq!(calls.get(), 1);

                let key = handles[0].key().clone();
                assert_eq!(api.with_state(|state| state.subscriber_count(&key)), 3);
                assert_eq!(handles[0].serialized_query_args(), "1");
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn cached_data_is_reused_unless_forced() {
        LocalSet::new()
            .run_until(async {
                let calls = Rc::new(Cell::new(0));
                let api = counting_api(calls.clone());
                let endpoint = api.query_endpoint("getPost").unwrap();

                endpoint
                    .initiate(1, InitiateOptions::default())
                    .unwrap()
                    .result()
                    .await;
                let cached = endpoint.initiate(1, InitiateOptions::default()).unwrap();
                assert!(cached.result().await.is_success);
                assert_eq!(calls.get(), 1);

                let forced = endpoint
                    .initiate(1, InitiateOptions::default().set_force_refetch(true))
                    .unwrap();
                let pending = endpoint.select(1).unwrap();
                assert!(pending.is_loading);
                assert_eq!(pending.data, Some(json!({ "value": "/posts/1" })));
                forced.result().await;
                assert_eq!(calls.get(), 2);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_queries_keep_the_transport_error() {
        LocalSet::new()
            .run_until(async {
                let api = counting_api(Rc::new(Cell::new(0)));
                let result = api
                    .query_endpoint("broken")
                    .unwrap()
                    .initiate((), InitiateOptions::default())
                    .unwrap()
                    .result()
                    .await;

                assert!(result.is_error);
                assert_eq!(result.error, Some(json!({ "status": 500 })));
                assert_eq!(result.original_args, Some(json!(null)));
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn skip_does_nothing() {
        LocalSet::new()
            .run_until(async {
                let calls = Rc::new(Cell::new(0));
                let api = counting_api(calls.clone());
                let handle = api
                    .query_endpoint("getPost")
                    .unwrap()
                    .initiate(1, InitiateOptions::default().set_skip(true))
                    .unwrap();

                assert!(handle.result().await.is_uninitialized);
                assert_eq!(calls.get(), 0);
                assert!(api.with_state(|state| state.queries().is_empty()));
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn mutations_are_not_deduplicated() {
        LocalSet::new()
            .run_until(async {
                let calls = Rc::new(Cell::new(0));
                let api = counting_api(calls.clone());
                let endpoint = api.mutation_endpoint("addPost").unwrap();

                let first = endpoint
                    .initiate(json!({ "title": "a" }), MutationOptions::default())
                    .unwrap();
                let second = endpoint
                    .initiate(json!({ "title": "a" }), MutationOptions::default())
                    .unwrap();
                assert_ne!(first.request_id(), second.request_id());
                assert!(first.select().is_loading);

                let result = first.result().await;
                second.result().await;
                assert_eq!(calls.get(), 2);
                assert!(result.is_success);
                assert_eq!(result.data, Some(json!({ "value": { "title": "a" } })));
                assert_eq!(first.select(), result);

                first.unsubscribe();
                assert!(first.select().is_uninitialized);
                assert!(first.result().await.is_success);
                assert!(second.select().is_success);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn untracked_mutations_still_report_their_outcome() {
        LocalSet::new()
            .run_until(async {
                let api = counting_api(Rc::new(Cell::new(0)));
                let handle = api
                    .mutation_endpoint("addPost")
                    .unwrap()
                    .initiate("/fail", MutationOptions::default().set_track(false))
                    .unwrap();

                assert!(api.with_state(|state| state.mutations().is_empty()));
                let result = handle.result().await;
                assert!(result.is_error);
                assert_eq!(result.error, Some(json!({ "status": 500 })));
                assert!(handle.select().is_uninitialized);
            })
            .await;
    }

    #[test]
    fn action_maps_cover_every_endpoint() {
        let api = counting_api(Rc::new(Cell::new(0)));
        let maps = api.action_maps();

        assert_eq!(
            maps.queries.keys().collect::<Vec<_>>(),
            vec!["broken", "getPost"]
        );
        assert!(maps.mutation("addPost").is_some());
        assert!(maps.query("addPost").is_none());
        assert_eq!(
            maps.query("getPost")
                .unwrap()
                .serialize_args(json!({ "b": 1, "a": 2 }))
                .unwrap(),
            QueryCacheKey::new("getPost", r#"{"a":2,"b":1}"#)
        );
    }
}
