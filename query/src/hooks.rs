//! Bindings for view layers.
//!
//! A view unit holds a [`QuerySubscription`] or a [`MutationTrigger`] for as
//! long as it is mounted. Both release their cache references on drop.

use serde::Serialize;

use crate::{
    Error, InitiateOptions, MutationActionHandle, MutationEndpoint, MutationOptions,
    MutationResult, QueryActionHandle, QueryEndpoint, QueryResult,
};

/// Keeps one subscriber reference on the entry of the current argument.
#[derive(Debug)]
pub struct QuerySubscription {
    endpoint: QueryEndpoint,
    options: InitiateOptions,
    handle: QueryActionHandle,
}

impl QuerySubscription {
    /// Subscribes to `arg`.
    pub fn new(
        endpoint: QueryEndpoint,
        arg: impl Serialize,
        options: InitiateOptions,
    ) -> Result<Self, Error> {
        let handle = endpoint.initiate(arg, options.clone())?;
        Ok(Self {
            endpoint,
            options,
            handle,
        })
    }

    /// Moves the subscription to another argument.
    ///
    /// The new entry is subscribed before the old one is released, so an
    /// unchanged argument never loses its data.
    pub fn set_arg(&mut self, arg: impl Serialize) -> Result<(), Error> {
        let arg = serde_json::to_value(arg)?;
        if !self.options.skip && self.endpoint.serialize_args(&arg)? == *self.handle.key() {
            return Ok(());
        }
        self.replace(self.endpoint.initiate(arg, self.options.clone())?);
        Ok(())
    }

    /// Changes the options. Takes effect on the current argument right away.
    pub fn set_options(&mut self, options: InitiateOptions) -> Result<(), Error> {
        self.options = options;
        let arg = self.handle.original_args().clone();
        self.replace(self.endpoint.initiate(arg, self.options.clone())?);
        Ok(())
    }

    /// Fetches the current argument again, even if data is cached.
    pub fn refetch(&mut self) -> Result<(), Error> {
        let arg = self.handle.original_args().clone();
        let options = self.options.clone().set_skip(false).set_force_refetch(true);
        self.replace(self.endpoint.initiate(arg, options)?);
        Ok(())
    }

    fn replace(&mut self, handle: QueryActionHandle) {
        let previous = std::mem::replace(&mut self.handle, handle);
        previous.unsubscribe();
    }

    /// Current snapshot.
    pub fn result(&self) -> QueryResult {
        self.handle.select()
    }

    /// Waits for the request started by the last change, then returns the snapshot.
    pub async fn settled(&self) -> QueryResult {
        self.handle.result().await
    }
}

impl Drop for QuerySubscription {
    fn drop(&mut self) {
        self.handle.unsubscribe();
    }
}

/// Triggers a mutation endpoint, keeping only the entry of the last request.
#[derive(Debug)]
pub struct MutationTrigger {
    endpoint: MutationEndpoint,
    options: MutationOptions,
    current: Option<MutationActionHandle>,
}

impl MutationTrigger {
    /// Creates a trigger. Nothing is sent until [`MutationTrigger::trigger`].
    pub fn new(endpoint: MutationEndpoint, options: MutationOptions) -> Self {
        Self {
            endpoint,
            options,
            current: None,
        }
    }

    /// Runs the mutation. The entry of the previous request is removed first.
    pub fn trigger(&mut self, arg: impl Serialize) -> Result<MutationActionHandle, Error> {
        self.reset();
        let handle = self.endpoint.initiate(arg, self.options)?;
        self.current = Some(handle.clone());
        Ok(handle)
    }

    /// Removes the entry of the last request.
    pub fn reset(&mut self) {
        if let Some(previous) = self.current.take() {
            previous.unsubscribe();
        }
    }

    /// Snapshot of the last request. Uninitialized before the first trigger.
    pub fn result(&self) -> MutationResult {
        match &self.current {
            Some(handle) => handle.select(),
            None => MutationResult::uninitialized(self.endpoint.name()),
        }
    }
}

impl Drop for MutationTrigger {
    fn drop(&mut self) {
        self.reset();
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
    use crate::{base_query_fn, Api, MutationDefinition, QueryCacheKey, QueryDefinition};

    fn api(calls: Rc<Cell<u32>>) -> Api {
        Api::builder(base_query_fn(move |args, _api, _extra| {
            let calls = calls.clone();
            async move {
                calls.set(calls.get() + 1);
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok(args)
            }
        }))
        .query("getPost", QueryDefinition::new(|id| id.clone()))
        .mutation("addPost", MutationDefinition::new(|post| post.clone()))
        .build()
    }

    #[tokio::test(start_paused = true)]
    async fn subscription_follows_its_argument() {
        LocalSet::new()
            .run_until(async {
                let calls = Rc::new(Cell::new(0));
                let api = api(calls.clone());
                let endpoint = api.query_endpoint("getPost").unwrap();
                let first = endpoint.serialize_args(1).unwrap();
                let second = endpoint.serialize_args(2).unwrap();
                let subscribers = |key: &QueryCacheKey| api.with_state(|state| state.subscriber_count(key));

                let mut subscription =
                    QuerySubscription::new(endpoint.clone(), 1, InitiateOptions::default())
                        .unwrap();
                assert_eq!(subscription.settled().await.data, Some(json!(1)));

                subscription.set_arg(1).unwrap();
                assert_eq!(subscribers(&first), 1);
                assert_eq!(calls.get(), 1);

                subscription.set_arg(2).unwrap();
                assert_eq!(subscribers(&first), 0);
                assert_eq!(subscribers(&second), 1);
                assert_eq!(subscription.settled().await.data, Some(json!(2)));

                subscription.refetch().unwrap();
                assert!(subscription.result().is_loading);
                subscription.settled().await;
                assert_eq!(calls.get(), 3);
                assert_eq!(subscribers(&second), 1);

                drop(subscription);
                assert_eq!(subscribers(&second), 0);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn trigger_supersedes_previous_request() {
        LocalSet::new()
            .run_until(async {
                let api = api(Rc::new(Cell::new(0)));
                let mut trigger = MutationTrigger::new(
                    api.mutation_endpoint("addPost").unwrap(),
                    MutationOptions::default(),
                );
                assert!(trigger.result().is_uninitialized);

                let first = trigger.trigger(json!({ "title": "a" })).unwrap();
                first.result().await;
                assert!(trigger.result().is_success);

                let second = trigger.trigger(json!({ "title": "b" })).unwrap();
                assert!(api.with_state(|state| state.mutation(&first.request_id()).is_none()));
                assert!(trigger.result().is_loading);
                second.result().await;
                assert_eq!(trigger.result().data, Some(json!({ "title": "b" })));

                drop(trigger);
                assert!(api.with_state(|state| state.mutations().is_empty()));
            })
            .await;
    }
}
