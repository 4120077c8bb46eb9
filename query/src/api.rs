use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use slotmap::SlotMap;

use crate::action::Action;
use crate::cache_lifecycle::CacheLifecycles;
use crate::cache_observer::{CacheEvent, CacheKey, CacheObserver, CacheObserverKey};
use crate::endpoint::{EndpointDefinition, EndpointDefinitions};
use crate::garbage_collector::GarbageCollector;
use crate::polling::Polling;
use crate::slice::ApiState;
use crate::store::{ListenerKey, Store};
use crate::thunks::RunningQuery;
use crate::{
    invalidation, select_mutation, select_query, thunks, ActionMaps, ApiOptions, BaseQuery,
    EndpointKind, EntityDescription, Error, InitiateOptions, MutationEndpoint, MutationDefinition,
    MutationResult, QueryActionHandle, QueryCacheKey, QueryDefinition, QueryEndpoint, QueryResult,
    RequestId,
};

/// A configured data fetching and caching engine.
///
/// Cheap to clone. All clones share one cache. The api is single threaded: it
/// spawns its requests and timers with [`tokio::task::spawn_local`], so it must
/// be driven from inside a [`tokio::task::LocalSet`].
///
/// ```
/// use rquery::*;
/// use serde_json::json;
///
/// let api = Api::builder(base_query_fn(|args, _api, _extra| async move {
///     Ok(json!({ "url": args }))
/// }))
/// .query("getPost", QueryDefinition::new(|id| json!(format!("/posts/{id}"))))
/// .build();
///
/// assert!(api.query_endpoint("getPost").is_ok());
/// ```
#[derive(Clone)]
pub struct Api {
    pub(crate) inner: Rc<ApiInner>,
}

/// Non owning reference to an [`Api`]. Held by timers and lifecycle tasks.
#[derive(Clone)]
pub struct WeakApi(Weak<ApiInner>);

impl WeakApi {
    /// The api, if it is still alive.
    pub fn upgrade(&self) -> Option<Api> {
        self.0.upgrade().map(|inner| Api { inner })
    }
}

pub(crate) struct ApiInner {
    pub(crate) options: ApiOptions,
    pub(crate) definitions: EndpointDefinitions,
    pub(crate) base_query: Rc<dyn BaseQuery>,
    pub(crate) store: Store,
    pub(crate) running: RefCell<HashMap<QueryCacheKey, RunningQuery>>,
    pub(crate) garbage_collector: GarbageCollector,
    pub(crate) lifecycles: CacheLifecycles,
    pub(crate) polling: Polling,
    observers: RefCell<SlotMap<CacheObserverKey, Rc<dyn CacheObserver>>>,
}

/// Registers endpoints and options, then builds an [`Api`].
pub struct ApiBuilder {
    base_query: Rc<dyn BaseQuery>,
    options: ApiOptions,
    definitions: EndpointDefinitions,
}

impl ApiBuilder {
    /// Registers a query endpoint.
    pub fn query(mut self, name: impl Into<String>, definition: QueryDefinition) -> Self {
        self.definitions
            .insert(name.into(), EndpointDefinition::Query(definition));
        self
    }

    /// Registers a mutation endpoint.
    pub fn mutation(mut self, name: impl Into<String>, definition: MutationDefinition) -> Self {
        self.definitions
            .insert(name.into(), EndpointDefinition::Mutation(definition));
        self
    }

    /// Api wide options.
    pub fn options(self, options: ApiOptions) -> Self {
        ApiBuilder { options, ..self }
    }

    /// Builds the api. Endpoint definitions are fixed from here on.
    pub fn build(self) -> Api {
        Api {
            inner: Rc::new(ApiInner {
                options: self.options,
                definitions: self.definitions,
                base_query: self.base_query,
                store: Store::new(),
                running: RefCell::new(HashMap::new()),
                garbage_collector: GarbageCollector::default(),
                lifecycles: CacheLifecycles::default(),
                polling: Polling::default(),
                observers: RefCell::new(SlotMap::with_key()),
            }),
        }
    }
}

impl Api {
    /// Starts building an api on top of `base_query`.
    pub fn builder(base_query: impl BaseQuery + 'static) -> ApiBuilder {
        ApiBuilder {
            base_query: Rc::new(base_query),
            options: ApiOptions::default(),
            definitions: EndpointDefinitions::default(),
        }
    }

    /// Api wide options.
    pub fn options(&self) -> &ApiOptions {
        &self.inner.options
    }

    /// A non owning reference to this api.
    pub fn downgrade(&self) -> WeakApi {
        WeakApi(Rc::downgrade(&self.inner))
    }

    /// Processes one action: reduce, notify, then run the middlewares.
    ///
    /// Middlewares may dispatch further actions, which are processed to
    /// completion before this call returns.
    pub fn dispatch(&self, action: Action) {
        tracing::debug!(
            api = %self.inner.options.reducer_path,
            action = action.name(),
            key = ?action.query_key(),
            "dispatch"
        );

        let events = self.inner.store.reduce(&action, &self.inner.definitions);

        if !events.is_empty() {
            self.notify_observers(&events);
            self.forget_removed_requests(&events);
            self.inner.store.notify();
        }

        self.inner.garbage_collector.process(self, &action, &events);
        self.inner.lifecycles.process(self, &action, &events);
        invalidation::process(self, &action);
        self.inner.polling.process(self, &action, &events);
    }

    /// Runs `func` against the current state.
    ///
    /// `func` must not dispatch.
    pub fn with_state<R>(&self, func: impl FnOnce(&ApiState) -> R) -> R {
        self.inner.store.with_state(func)
    }

    /// Coalesces every state notification raised inside `func` into one.
    pub fn batch<R>(&self, func: impl FnOnce() -> R) -> R {
        self.inner.store.batch(func)
    }

    /// Calls `listener` after every state change, until the returned guard is dropped.
    pub fn subscribe_state(&self, listener: impl Fn() + 'static) -> StateListener {
        let key = self.inner.store.add_listener(listener);
        StateListener {
            api: self.downgrade(),
            key,
        }
    }

    /// Registers a cache observer.
    pub fn register_cache_observer(&self, observer: impl CacheObserver + 'static) -> CacheObserverKey {
        self.inner
            .observers
            .try_borrow_mut()
            .expect("register_cache_observer borrow mut")
            .insert(Rc::new(observer))
    }

    /// Removes a cache observer. Returns false if it was already removed.
    pub fn unregister_cache_observer(&self, key: CacheObserverKey) -> bool {
        self.inner
            .observers
            .try_borrow_mut()
            .expect("unregister_cache_observer borrow mut")
            .remove(key)
            .is_some()
    }

    fn notify_observers(&self, events: &[CacheEvent]) {
        let observers: Vec<_> = self
            .inner
            .observers
            .try_borrow()
            .expect("notify_observers borrow")
            .values()
            .cloned()
            .collect();

        for event in events {
            for observer in &observers {
                observer.process_cache_event(event);
            }
        }
    }

    // A removed entry no longer has a request to join, even if its network call is still running.
    fn forget_removed_requests(&self, events: &[CacheEvent]) {
        let mut running = self
            .inner
            .running
            .try_borrow_mut()
            .expect("forget_removed_requests borrow mut");
        for event in events {
            if let CacheEvent::Removed(CacheKey::Query(key)) = event {
                running.remove(key);
            }
        }
    }

    /// Action creators and selectors of a query endpoint.
    pub fn query_endpoint(&self, name: &str) -> Result<QueryEndpoint, Error> {
        self.inner.definitions.query(name)?;
        Ok(QueryEndpoint::new(name, self.clone()))
    }

    /// Action creators and selectors of a mutation endpoint.
    pub fn mutation_endpoint(&self, name: &str) -> Result<MutationEndpoint, Error> {
        self.inner.definitions.mutation(name)?;
        Ok(MutationEndpoint::new(name, self.clone()))
    }

    /// Action creators and selectors of every endpoint, keyed by endpoint name.
    pub fn action_maps(&self) -> ActionMaps {
        ActionMaps::new(self)
    }

    /// The cache key `arg` maps to on `endpoint`.
    pub fn query_cache_key(&self, endpoint: &str, arg: &Value) -> QueryCacheKey {
        QueryCacheKey::new(endpoint, (self.inner.options.serialize_query_args)(endpoint, arg))
    }

    /// Selects a query entry by key.
    pub fn select_query_key(&self, key: &QueryCacheKey) -> QueryResult {
        self.with_state(|state| select_query(state, key))
    }

    /// Selects a tracked mutation entry.
    pub fn select_mutation(&self, endpoint: &str, request_id: &RequestId) -> MutationResult {
        self.with_state(|state| select_mutation(state, endpoint, request_id))
    }

    /// Drops one subscriber reference. Does not wait for any request.
    pub fn unsubscribe_query_result(&self, key: QueryCacheKey, request_id: RequestId) {
        self.dispatch(Action::UnsubscribeQueryResult { key, request_id });
    }

    /// Removes a mutation entry.
    pub fn unsubscribe_mutation_result(&self, request_id: RequestId) {
        self.dispatch(Action::UnsubscribeMutationResult { request_id });
    }

    /// Removes a query entry right away, whatever its subscriber count.
    pub fn remove_query_result(&self, key: QueryCacheKey) {
        self.dispatch(Action::RemoveQueryResult { key });
    }

    /// Applies `recipe` to a copy of the cached data of `endpoint(arg)` and
    /// commits it.
    ///
    /// Returns `Ok(false)` without calling `recipe` if the entry holds no data.
    pub fn update_query_data(
        &self,
        endpoint: &str,
        arg: impl Serialize,
        recipe: impl FnOnce(&mut Value),
    ) -> Result<bool, Error> {
        self.inner.definitions.query(endpoint)?;
        let arg = serde_json::to_value(arg)?;
        let key = self.query_cache_key(endpoint, &arg);
        Ok(self.patch_query_data(&key, recipe))
    }

    /// Same as [`Api::update_query_data`], by key.
    pub fn patch_query_data(&self, key: &QueryCacheKey, recipe: impl FnOnce(&mut Value)) -> bool {
        let data = self.with_state(|state| state.query(key).and_then(|entry| entry.data.clone()));
        let Some(mut data) = data else {
            return false;
        };

        recipe(&mut data);
        self.dispatch(Action::UpdateQueryData {
            key: key.clone(),
            data,
        });
        true
    }

    /// Invalidates entities as if a mutation had declared them.
    pub fn invalidate_entities<E: Into<EntityDescription>>(
        &self,
        entities: impl IntoIterator<Item = E>,
    ) {
        self.dispatch(Action::InvalidateEntities {
            entities: entities.into_iter().map(Into::into).collect(),
        });
    }

    /// Fetches `endpoint(arg)` without subscribing to it.
    ///
    /// With `force`, cached data is refetched.
    pub fn prefetch(
        &self,
        endpoint: &str,
        arg: impl Serialize,
        force: bool,
    ) -> Result<QueryActionHandle, Error> {
        self.query_endpoint(endpoint)?.initiate(
            arg,
            InitiateOptions::default()
                .set_subscribe(false)
                .set_force_refetch(force),
        )
    }

    /// Removes every entry. Running cache lifecycles are cleaned up.
    pub fn reset_api_state(&self) {
        self.dispatch(Action::ResetApiState);
    }

    /// Idle eviction delay of a query endpoint.
    pub fn keep_unused_data_for(&self, endpoint: &str) -> Duration {
        self.inner
            .definitions
            .query(endpoint)
            .ok()
            .and_then(|definition| definition.keep_unused_data_for)
            .unwrap_or(self.inner.options.keep_unused_data_for)
    }

    pub(crate) fn endpoint_names(&self, kind: EndpointKind) -> Vec<String> {
        self.inner
            .definitions
            .names(kind)
            .map(str::to_string)
            .collect()
    }

    /// Starts a fresh request for an existing query entry with its stored
    /// argument. Joins the running request if there is one.
    pub(crate) fn refetch_query(&self, key: &QueryCacheKey) -> Result<(), Error> {
        thunks::refetch_query(self, key).map(|_| ())
    }
}

impl std::fmt::Debug for Api {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Api")
            .field("options", &self.inner.options)
            .finish_non_exhaustive()
    }
}

/// Unregisters a state listener on drop.
#[must_use = "the listener is removed when the guard is dropped"]
pub struct StateListener {
    api: WeakApi,
    key: ListenerKey,
}

impl Drop for StateListener {
    fn drop(&mut self) {
        if let Some(api) = self.api.upgrade() {
            api.inner.store.remove_listener(self.key);
        }
    }
}
