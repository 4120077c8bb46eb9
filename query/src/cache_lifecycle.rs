//! Cache entry lifecycles.
//!
//! An endpoint's `on_cache_entry_added` handler runs once for every lifetime of
//! one of its cache entries. A query entry's lifetime starts with its first
//! subscriber. Entries that only exist through an unsubscribed fetch have no
//! lifecycle. Tracked mutation entries start one when they are created. The handler gets a [`LifecycleApi`] that exposes
//! two signals:
//!
//! - [`LifecycleApi::first_value_resolved`] resolves with the first successful
//!   payload of the entry. If the entry is removed before that happens it fails
//!   with [`Error::NeverResolvedBeforeCleanup`].
//! - [`LifecycleApi::cleanup`] resolves once the entry has been removed.
//!
//! A handler that propagates the `NeverResolvedBeforeCleanup` error with `?`
//! simply ends. That error is discarded by the engine, any other error is
//! logged.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use futures::future::{FutureExt, Shared};
use futures_channel::oneshot;
use serde_json::Value;

use crate::action::Action;
use crate::cache_observer::{CacheEvent, CacheKey};
use crate::slice::ApiState;
use crate::{select_mutation, select_query, Api, Error, QueryResult, WeakApi};

struct LifecycleHandle {
    value_sender: Option<oneshot::Sender<Value>>,
    cleanup_sender: oneshot::Sender<()>,
    cleaned_up: Rc<Cell<bool>>,
}

/// Running lifecycles, one per live cache entry whose endpoint has a handler.
#[derive(Default)]
pub(crate) struct CacheLifecycles {
    entries: RefCell<HashMap<CacheKey, LifecycleHandle>>,
}

impl CacheLifecycles {
    pub(crate) fn process(&self, api: &Api, action: &Action, events: &[CacheEvent]) {
        for event in events {
            match event {
                CacheEvent::Added(key @ CacheKey::Mutation(_)) => self.start(api, key),
                CacheEvent::Removed(key) => self.cleanup(key),
                _ => {}
            }
        }

        // Query entries get their lifecycle with a subscriber. Unsubscribed fetches never start one.
        if let Action::QuerySubscribed { key, .. } = action {
            let key = CacheKey::from(key.clone());
            if !self.is_running(&key) {
                self.start(api, &key);
            }
        }

        let fulfilled = match action {
            Action::QueryFulfilled { arg, data, .. } => Some((CacheKey::from(arg.key.clone()), data)),
            Action::MutationFulfilled {
                request_id, data, ..
            } => Some((CacheKey::from(*request_id), data)),
            _ => None,
        };

        // Only results the reducer applied count.
        if let Some((key, data)) = fulfilled {
            if events.contains(&CacheEvent::Updated(key.clone())) {
                self.resolve_first_value(&key, data);
            }
        }
    }

    fn start(&self, api: &Api, key: &CacheKey) {
        let lookup = api.with_state(|state| match key {
            CacheKey::Query(key) => {
                let entry = state.query(key)?;
                Some((key.endpoint.clone(), entry.original_args.clone(), entry.data.clone()))
            }
            CacheKey::Mutation(request_id) => {
                let entry = state.mutation(request_id)?;
                Some((entry.endpoint.clone(), entry.original_args.clone(), None))
            }
        });
        let Some((endpoint, arg, cached)) = lookup else {
            return;
        };

        let handler = match api.inner.definitions.get(&endpoint) {
            Ok(definition) => match definition.on_cache_entry_added() {
                Some(handler) => handler.clone(),
                None => return,
            },
            Err(error) => {
                tracing::error!(%key, %error, "cannot start cache lifecycle");
                return;
            }
        };

        let (value_sender, value_receiver) = oneshot::channel();
        let (cleanup_sender, cleanup_receiver) = oneshot::channel();
        let cleaned_up = Rc::new(Cell::new(false));

        // An entry first subscribed after an unsubscribed fetch already holds its first value.
        let value_sender = match cached {
            Some(data) => {
                let _ = value_sender.send(data);
                None
            }
            None => Some(value_sender),
        };

        let previous = self
            .entries
            .try_borrow_mut()
            .expect("start lifecycle borrow mut")
            .insert(
                key.clone(),
                LifecycleHandle {
                    value_sender,
                    cleanup_sender,
                    cleaned_up: cleaned_up.clone(),
                },
            );
        if previous.is_some() {
            tracing::warn!(%key, "cache lifecycle replaced before cleanup");
        }

        let lifecycle_api = LifecycleApi {
            api: api.downgrade(),
            key: key.clone(),
            endpoint,
            first_value: value_receiver.shared(),
            removed: cleanup_receiver.shared(),
            cleaned_up,
        };

        tracing::debug!(%key, "starting cache lifecycle");
        let task_key = key.clone();
        let task = handler(arg, lifecycle_api);
        tokio::task::spawn_local(async move {
            match task.await {
                Ok(()) => {}
                Err(Error::NeverResolvedBeforeCleanup) => {
                    tracing::debug!(key = %task_key, "entry removed before its first value");
                }
                Err(error) => {
                    tracing::error!(key = %task_key, %error, "cache lifecycle failed");
                }
            }
        });
    }

    fn is_running(&self, key: &CacheKey) -> bool {
        self.entries
            .try_borrow()
            .expect("is_running lifecycle borrow")
            .contains_key(key)
    }

    fn resolve_first_value(&self, key: &CacheKey, data: &Value) {
        let mut entries = self
            .entries
            .try_borrow_mut()
            .expect("resolve_first_value borrow mut");
        if let Some(sender) = entries
            .get_mut(key)
            .and_then(|handle| handle.value_sender.take())
        {
            let _ = sender.send(data.clone());
        }
    }

    fn cleanup(&self, key: &CacheKey) {
        let handle = self
            .entries
            .try_borrow_mut()
            .expect("cleanup lifecycle borrow mut")
            .remove(key);
        let Some(handle) = handle else {
            return;
        };

        tracing::debug!(%key, "cleaning up cache lifecycle");
        handle.cleaned_up.set(true);
        // Drop the value sender first: a pending first value fails before cleanup resolves.
        drop(handle.value_sender);
        let _ = handle.cleanup_sender.send(());
    }
}

/// Handle given to `on_cache_entry_added` handlers.
#[derive(Clone)]
pub struct LifecycleApi {
    api: WeakApi,
    key: CacheKey,
    endpoint: String,
    first_value: Shared<oneshot::Receiver<Value>>,
    removed: Shared<oneshot::Receiver<()>>,
    cleaned_up: Rc<Cell<bool>>,
}

impl LifecycleApi {
    /// The cache entry this lifecycle belongs to.
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// The api, if it is still alive.
    pub fn api(&self) -> Option<Api> {
        self.api.upgrade()
    }

    /// Resolves with the first successful payload of the entry.
    ///
    /// Fails with [`Error::NeverResolvedBeforeCleanup`] if the entry is removed first.
    pub async fn first_value_resolved(&self) -> Result<Value, Error> {
        self.first_value
            .clone()
            .await
            .map_err(|_| Error::NeverResolvedBeforeCleanup)
    }

    /// Resolves once the entry has been removed.
    pub async fn cleanup(&self) {
        let _ = self.removed.clone().await;
    }

    /// True once the entry has been removed.
    pub fn is_cleaned_up(&self) -> bool {
        self.cleaned_up.get()
    }

    /// Current snapshot of the entry.
    pub fn get_cache_entry(&self) -> QueryResult {
        match self.api.upgrade() {
            Some(api) => api.with_state(|state| match &self.key {
                CacheKey::Query(key) => select_query(state, key),
                CacheKey::Mutation(request_id) => select_mutation(state, &self.endpoint, request_id),
            }),
            None => QueryResult::uninitialized(self.endpoint.clone()),
        }
    }

    /// Patches the entry's data through a copy.
    ///
    /// Doesn't call `recipe` once the entry is cleaned up, for mutation entries,
    /// or while the entry holds no data. Returns whether the patch was applied.
    pub fn update_cache_entry(&self, recipe: impl FnOnce(&mut Value)) -> bool {
        if self.cleaned_up.get() {
            return false;
        }
        match (&self.key, self.api.upgrade()) {
            (CacheKey::Query(key), Some(api)) => api.patch_query_data(key, recipe),
            _ => false,
        }
    }

    /// Dispatches an action on the api.
    pub fn dispatch(&self, action: Action) {
        if let Some(api) = self.api.upgrade() {
            api.dispatch(action);
        }
    }

    /// Runs `func` against the current state of the api.
    pub fn with_state<R>(&self, func: impl FnOnce(&ApiState) -> R) -> Option<R> {
        self.api.upgrade().map(|api| api.with_state(func))
    }
}
