use std::collections::HashMap;

use crate::action::Action;
use crate::cache_observer::{CacheEvent, CacheKey};
use crate::endpoint::EndpointDefinitions;
use crate::{
    calculate_provided_by, MutationSubState, ProvidedIndex, QueryCacheKey, QueryStatus,
    QuerySubState, RequestId, Subscriber,
};

/// The cache state tree of one api.
///
/// Only the reducer in this module mutates it. Everything else reads snapshots
/// through [`Api::with_state`](crate::Api::with_state) or selectors.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApiState {
    queries: HashMap<QueryCacheKey, QuerySubState>,
    mutations: HashMap<RequestId, MutationSubState>,
    provided: ProvidedIndex,
}

impl ApiState {
    /// All query entries.
    pub fn queries(&self) -> &HashMap<QueryCacheKey, QuerySubState> {
        &self.queries
    }

    /// One query entry.
    pub fn query(&self, key: &QueryCacheKey) -> Option<&QuerySubState> {
        self.queries.get(key)
    }

    /// All tracked mutation entries.
    pub fn mutations(&self) -> &HashMap<RequestId, MutationSubState> {
        &self.mutations
    }

    /// One mutation entry.
    pub fn mutation(&self, request_id: &RequestId) -> Option<&MutationSubState> {
        self.mutations.get(request_id)
    }

    /// Entity -> query entry index.
    pub fn provided(&self) -> &ProvidedIndex {
        &self.provided
    }

    /// Number of subscribers of a query entry. Zero if the entry doesn't exist.
    pub fn subscriber_count(&self, key: &QueryCacheKey) -> usize {
        self.queries
            .get(key)
            .map(QuerySubState::subscriber_count)
            .unwrap_or_default()
    }
}

/// Applies `action` to `state` and reports which entries changed.
///
/// Results of a request are only applied while the request is still the
/// current one of its entry. Anything else is a late result and is dropped.
pub(crate) fn reduce(
    state: &mut ApiState,
    action: &Action,
    definitions: &EndpointDefinitions,
) -> Vec<CacheEvent> {
    match action {
        Action::QuerySubscribed {
            key,
            original_args,
            request_id,
            options,
        } => {
            let mut events = Vec::new();
            let entry = state.queries.entry(key.clone()).or_insert_with(|| {
                events.push(CacheEvent::Added(key.clone().into()));
                QuerySubState::new(key.clone(), original_args.clone())
            });

            match entry
                .subscribers
                .iter_mut()
                .find(|subscriber| subscriber.request_id == *request_id)
            {
                Some(subscriber) => subscriber.options = options.clone(),
                None => entry.subscribers.push(Subscriber {
                    request_id: *request_id,
                    options: options.clone(),
                }),
            }

            if events.is_empty() {
                events.push(CacheEvent::Updated(key.clone().into()));
            }
            events
        }

        Action::QueryPending {
            arg,
            request_id,
            started_at,
        } => {
            let mut events = Vec::new();
            let entry = state.queries.entry(arg.key.clone()).or_insert_with(|| {
                events.push(CacheEvent::Added(arg.key.clone().into()));
                QuerySubState::new(arg.key.clone(), arg.original_args.clone())
            });

            entry.status = QueryStatus::Pending;
            entry.request_id = Some(*request_id);
            entry.started_time_stamp = Some(*started_at);
            entry.original_args = arg.original_args.clone();

            if events.is_empty() {
                events.push(CacheEvent::Updated(arg.key.clone().into()));
            }
            events
        }

        Action::QueryFulfilled {
            arg,
            request_id,
            data,
            fulfilled_at,
        } => {
            let Some(entry) = current_query(state, &arg.key, *request_id) else {
                return Vec::new();
            };

            entry.status = QueryStatus::Fulfilled;
            entry.data = Some(data.clone());
            entry.error = None;
            entry.fulfilled_time_stamp = Some(*fulfilled_at);

            let provided = definitions
                .query(&arg.key.endpoint)
                .and_then(|definition| {
                    calculate_provided_by(&definition.provides, data, &arg.original_args)
                });
            match provided {
                Ok(entities) => state.provided.provide(&arg.key, &entities),
                Err(error) => {
                    tracing::error!(key = %arg.key, %error, "could not calculate provided entities");
                    state.provided.remove_key(&arg.key);
                }
            }

            vec![CacheEvent::Updated(arg.key.clone().into())]
        }

        Action::QueryRejected {
            arg,
            request_id,
            error,
        } => {
            let Some(entry) = current_query(state, &arg.key, *request_id) else {
                return Vec::new();
            };

            entry.status = QueryStatus::Rejected;
            entry.error = Some(error.clone());

            vec![CacheEvent::Updated(arg.key.clone().into())]
        }

        Action::MutationPending {
            arg,
            request_id,
            started_at,
        } => {
            if !arg.track {
                return Vec::new();
            }

            state.mutations.insert(
                *request_id,
                MutationSubState::pending(
                    arg.endpoint.clone(),
                    *request_id,
                    arg.original_args.clone(),
                    *started_at,
                ),
            );
            vec![CacheEvent::Added((*request_id).into())]
        }

        Action::MutationFulfilled {
            request_id,
            data,
            fulfilled_at,
            ..
        } => match state.mutations.get_mut(request_id) {
            Some(entry) => {
                entry.fulfill(data.clone(), *fulfilled_at);
                vec![CacheEvent::Updated((*request_id).into())]
            }
            None => Vec::new(),
        },

        Action::MutationRejected {
            request_id, error, ..
        } => match state.mutations.get_mut(request_id) {
            Some(entry) => {
                entry.reject(error.clone());
                vec![CacheEvent::Updated((*request_id).into())]
            }
            None => Vec::new(),
        },

        Action::UnsubscribeQueryResult { key, request_id } => {
            let Some(entry) = state.queries.get_mut(key) else {
                tracing::warn!(%key, "unsubscribe from unknown query entry");
                return Vec::new();
            };

            let before = entry.subscribers.len();
            entry
                .subscribers
                .retain(|subscriber| subscriber.request_id != *request_id);

            if entry.subscribers.len() == before {
                Vec::new()
            } else {
                vec![CacheEvent::Updated(key.clone().into())]
            }
        }

        Action::UnsubscribeMutationResult { request_id } => {
            match state.mutations.remove(request_id) {
                Some(_) => vec![CacheEvent::Removed((*request_id).into())],
                None => Vec::new(),
            }
        }

        Action::RemoveQueryResult { key } => match state.queries.remove(key) {
            Some(_) => {
                state.provided.remove_key(key);
                vec![CacheEvent::Removed(key.clone().into())]
            }
            None => Vec::new(),
        },

        Action::UpdateQueryData { key, data } => match state.queries.get_mut(key) {
            Some(entry) if entry.data.is_some() => {
                entry.data = Some(data.clone());
                vec![CacheEvent::Updated(key.clone().into())]
            }
            _ => Vec::new(),
        },

        // Handled by the invalidation middleware.
        Action::InvalidateEntities { .. } => Vec::new(),

        Action::ResetApiState => {
            let mut events: Vec<_> = state
                .queries
                .drain()
                .map(|(key, _)| CacheEvent::Removed(key.into()))
                .chain(
                    state
                        .mutations
                        .drain()
                        .map(|(request_id, _)| CacheEvent::Removed(request_id.into())),
                )
                .collect();
            state.provided = ProvidedIndex::default();

            events.sort_by_key(|event| match event.key() {
                CacheKey::Query(key) => (0, Some(key.clone()), None),
                CacheKey::Mutation(request_id) => (1, None, Some(*request_id)),
            });
            events
        }
    }
}

fn current_query<'a>(
    state: &'a mut ApiState,
    key: &QueryCacheKey,
    request_id: RequestId,
) -> Option<&'a mut QuerySubState> {
    match state.queries.get_mut(key) {
        Some(entry) if entry.request_id == Some(request_id) => Some(entry),
        Some(entry) => {
            tracing::warn!(
                %key,
                %request_id,
                current = ?entry.request_id,
                "dropping result of superseded request"
            );
            None
        }
        None => {
            tracing::warn!(%key, %request_id, "dropping result for removed query entry");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::*;
    use crate::action::{MutationThunkArg, QueryThunkArg};
    use crate::endpoint::EndpointDefinition;
    use crate::{
        EntitiesDescriptor, EntityDescription, Instant, QueryDefinition, SubscriptionOptions,
    };

    fn definitions() -> EndpointDefinitions {
        let mut definitions = EndpointDefinitions::default();
        definitions.insert(
            "getPost".into(),
            EndpointDefinition::Query(QueryDefinition::new(|id| id.clone()).provides(
                EntitiesDescriptor::computed(|_, id| {
                    Ok(vec![EntityDescription::with_id(
                        "Post",
                        id.as_i64().unwrap_or_default(),
                    )])
                }),
            )),
        );
        definitions
    }

    fn key() -> QueryCacheKey {
        QueryCacheKey::new("getPost", "1")
    }

    fn thunk_arg() -> QueryThunkArg {
        QueryThunkArg {
            key: key(),
            original_args: json!(1),
            request_args: json!(1),
        }
    }

    fn subscribe(state: &mut ApiState, request_id: RequestId) -> Vec<CacheEvent> {
        reduce(
            state,
            &Action::QuerySubscribed {
                key: key(),
                original_args: json!(1),
                request_id,
                options: SubscriptionOptions::default(),
            },
            &definitions(),
        )
    }

    fn pending(state: &mut ApiState, request_id: RequestId) -> Vec<CacheEvent> {
        reduce(
            state,
            &Action::QueryPending {
                arg: thunk_arg(),
                request_id,
                started_at: Instant::now(),
            },
            &definitions(),
        )
    }

    fn fulfilled(state: &mut ApiState, request_id: RequestId, data: Value) -> Vec<CacheEvent> {
        reduce(
            state,
            &Action::QueryFulfilled {
                arg: thunk_arg(),
                request_id,
                data,
                fulfilled_at: Instant::now(),
            },
            &definitions(),
        )
    }

    #[test]
    fn query_lifecycle() {
        let mut state = ApiState::default();
        let id = RequestId::next();

        assert_eq!(
            subscribe(&mut state, id),
            vec![CacheEvent::Added(key().into())]
        );
        assert_eq!(state.query(&key()).unwrap().status, QueryStatus::Uninitialized);

        assert_eq!(pending(&mut state, id), vec![CacheEvent::Updated(key().into())]);
        assert_eq!(state.query(&key()).unwrap().status, QueryStatus::Pending);

        fulfilled(&mut state, id, json!({ "title": "hello" }));
        let entry = state.query(&key()).unwrap();
        assert_eq!(entry.status, QueryStatus::Fulfilled);
        assert_eq!(entry.data, Some(json!({ "title": "hello" })));
        assert!(entry.fulfilled_time_stamp.is_some());
        assert_eq!(
            state.provided().provided_by(&key()),
            vec![EntityDescription::with_id("Post", 1)]
        );
    }

    #[test]
    fn data_survives_refetch_and_rejection() {
        let mut state = ApiState::default();
        let first = RequestId::next();
        pending(&mut state, first);
        fulfilled(&mut state, first, json!("v1"));

        let second = RequestId::next();
        pending(&mut state, second);
        assert_eq!(state.query(&key()).unwrap().data, Some(json!("v1")));

        reduce(
            &mut state,
            &Action::QueryRejected {
                arg: thunk_arg(),
                request_id: second,
                error: json!({ "status": 500 }),
            },
            &definitions(),
        );
        let entry = state.query(&key()).unwrap();
        assert_eq!(entry.status, QueryStatus::Rejected);
        assert_eq!(entry.data, Some(json!("v1")));
        assert_eq!(entry.error, Some(json!({ "status": 500 })));
    }

    #[test]
    fn late_results_are_dropped() {
        let mut state = ApiState::default();
        let first = RequestId::next();
        let second = RequestId::next();
        pending(&mut state, first);
        pending(&mut state, second);

        assert!(fulfilled(&mut state, first, json!("stale")).is_empty());
        assert_eq!(state.query(&key()).unwrap().data, None);

        reduce(
            &mut state,
            &Action::RemoveQueryResult { key: key() },
            &definitions(),
        );
        assert!(fulfilled(&mut state, second, json!("gone")).is_empty());
        assert!(state.query(&key()).is_none());
    }

    #[test]
    fn subscribers_are_reference_counted() {
        let mut state = ApiState::default();
        let a = RequestId::next();
        let b = RequestId::next();
        subscribe(&mut state, a);
        subscribe(&mut state, b);
        subscribe(&mut state, b);
        assert_eq!(state.subscriber_count(&key()), 2);

        let unsubscribe = |state: &mut ApiState, request_id| {
            reduce(
                state,
                &Action::UnsubscribeQueryResult {
                    key: key(),
                    request_id,
                },
                &definitions(),
            )
        };
        assert_eq!(unsubscribe(&mut state, a).len(), 1);
        assert!(unsubscribe(&mut state, a).is_empty());
        unsubscribe(&mut state, b);
        assert_eq!(state.subscriber_count(&key()), 0);
        assert!(state.query(&key()).is_some());
    }

    #[test]
    fn removal_prunes_provided_index() {
        let mut state = ApiState::default();
        let id = RequestId::next();
        pending(&mut state, id);
        fulfilled(&mut state, id, json!("v1"));
        assert!(!state.provided().is_empty());

        let events = reduce(
            &mut state,
            &Action::RemoveQueryResult { key: key() },
            &definitions(),
        );
        assert_eq!(events, vec![CacheEvent::Removed(key().into())]);
        assert!(state.provided().is_empty());
    }

    #[test]
    fn update_query_data_requires_data() {
        let mut state = ApiState::default();
        let id = RequestId::next();
        pending(&mut state, id);

        let update = Action::UpdateQueryData {
            key: key(),
            data: json!("patched"),
        };
        assert!(reduce(&mut state, &update, &definitions()).is_empty());
        assert_eq!(state.query(&key()).unwrap().data, None);

        fulfilled(&mut state, id, json!("v1"));
        reduce(&mut state, &update, &definitions());
        assert_eq!(state.query(&key()).unwrap().data, Some(json!("patched")));
    }

    #[test]
    fn untracked_mutations_leave_no_entry() {
        let mut state = ApiState::default();
        let arg = |track| MutationThunkArg {
            endpoint: "addPost".into(),
            original_args: json!({ "title": "new" }),
            request_args: json!({ "title": "new" }),
            track,
        };

        let untracked = RequestId::next();
        let events = reduce(
            &mut state,
            &Action::MutationPending {
                arg: arg(false),
                request_id: untracked,
                started_at: Instant::now(),
            },
            &definitions(),
        );
        assert!(events.is_empty());
        assert!(state.mutations().is_empty());

        let tracked = RequestId::next();
        reduce(
            &mut state,
            &Action::MutationPending {
                arg: arg(true),
                request_id: tracked,
                started_at: Instant::now(),
            },
            &definitions(),
        );
        reduce(
            &mut state,
            &Action::MutationFulfilled {
                arg: arg(true),
                request_id: tracked,
                data: json!({ "id": 3 }),
                fulfilled_at: Instant::now(),
            },
            &definitions(),
        );
        let entry = state.mutation(&tracked).unwrap();
        assert_eq!(entry.status, QueryStatus::Fulfilled);
        assert_eq!(entry.data, Some(json!({ "id": 3 })));

        let events = reduce(
            &mut state,
            &Action::UnsubscribeMutationResult {
                request_id: tracked,
            },
            &definitions(),
        );
        assert_eq!(events, vec![CacheEvent::Removed(tracked.into())]);
        assert!(state.mutations().is_empty());
    }

    #[test]
    fn reset_removes_everything() {
        let mut state = ApiState::default();
        let id = RequestId::next();
        subscribe(&mut state, id);
        pending(&mut state, id);
        fulfilled(&mut state, id, json!("v1"));

        let events = reduce(&mut state, &Action::ResetApiState, &definitions());
        assert_eq!(events, vec![CacheEvent::Removed(key().into())]);
        assert_eq!(state, ApiState::default());
    }
}
