//! Execution of query and mutation requests.

use futures::future::{FutureExt, LocalBoxFuture, Shared};
use futures_channel::oneshot;
use serde_json::Value;

use crate::action::{Action, MutationThunkArg, QueryThunkArg};
use crate::{
    Api, BaseQueryApi, EndpointKind, Error, InitiateOptions, Instant, MutationActionHandle,
    MutationOptions, MutationResult, MutationSubState, QueryActionHandle, QueryCacheKey,
    QueryStatus, RequestId, SubscriptionOptions,
};

/// Resolves once a query request has settled and its result was dispatched.
pub(crate) type SharedRequest = Shared<LocalBoxFuture<'static, ()>>;

/// Resolves with the outcome of a mutation request.
pub(crate) type SharedOutcome = Shared<LocalBoxFuture<'static, MutationResult>>;

/// The single in-flight request of a query entry.
pub(crate) struct RunningQuery {
    request_id: RequestId,
    request: SharedRequest,
}

/// Starts a request for `key`, or joins the one already running.
pub(crate) fn start_query(
    api: &Api,
    key: &QueryCacheKey,
    original_args: Value,
    request_id: RequestId,
) -> Result<SharedRequest, Error> {
    if let Some(running) = api
        .inner
        .running
        .try_borrow()
        .expect("start_query borrow")
        .get(key)
    {
        tracing::debug!(%key, request_id = %running.request_id, "joining running request");
        return Ok(running.request.clone());
    }

    let definition = api.inner.definitions.query(&key.endpoint)?;
    let arg = QueryThunkArg {
        key: key.clone(),
        request_args: (definition.query)(&original_args),
        original_args,
    };
    let extra = definition.extra_options.clone();

    let (done, settled) = oneshot::channel::<()>();
    let request = settled.map(|_| ()).boxed_local().shared();

    // Registered before pending is dispatched, so anything reacting to it joins.
    api.inner
        .running
        .try_borrow_mut()
        .expect("start_query borrow mut")
        .insert(
            key.clone(),
            RunningQuery {
                request_id,
                request: request.clone(),
            },
        );

    api.dispatch(Action::QueryPending {
        arg: arg.clone(),
        request_id,
        started_at: Instant::now(),
    });

    let api = api.clone();
    tokio::task::spawn_local(async move {
        let context = BaseQueryApi {
            endpoint: arg.key.endpoint.clone(),
            kind: EndpointKind::Query,
            request_id,
        };
        let result = api
            .inner
            .base_query
            .query(arg.request_args.clone(), context, extra)
            .await;

        finish_running(&api, &arg.key, request_id);

        match result {
            Ok(data) => api.dispatch(Action::QueryFulfilled {
                arg,
                request_id,
                data,
                fulfilled_at: Instant::now(),
            }),
            Err(error) => api.dispatch(Action::QueryRejected {
                arg,
                request_id,
                error: error.into_value(),
            }),
        }

        let _ = done.send(());
    });

    Ok(request)
}

fn finish_running(api: &Api, key: &QueryCacheKey, request_id: RequestId) {
    let mut running = api
        .inner
        .running
        .try_borrow_mut()
        .expect("finish_running borrow mut");
    if running.get(key).map(|running| running.request_id) == Some(request_id) {
        running.remove(key);
    }
}

/// Refetches an existing entry with its stored argument.
///
/// `Ok(None)` if the entry doesn't exist anymore.
pub(crate) fn refetch_query(
    api: &Api,
    key: &QueryCacheKey,
) -> Result<Option<SharedRequest>, Error> {
    let original_args =
        api.with_state(|state| state.query(key).map(|entry| entry.original_args.clone()));
    match original_args {
        Some(original_args) => start_query(api, key, original_args, RequestId::next()).map(Some),
        None => {
            tracing::warn!(%key, "refetch of unknown query entry");
            Ok(None)
        }
    }
}

pub(crate) fn initiate_query(
    api: &Api,
    endpoint: &str,
    original_args: Value,
    options: InitiateOptions,
) -> Result<QueryActionHandle, Error> {
    api.inner.definitions.query(endpoint)?;
    let key = api.query_cache_key(endpoint, &original_args);
    let request_id = RequestId::next();

    if options.skip {
        return Ok(QueryActionHandle::skipped(
            api.clone(),
            key,
            original_args,
            request_id,
        ));
    }

    if options.subscribe {
        api.dispatch(Action::QuerySubscribed {
            key: key.clone(),
            original_args: original_args.clone(),
            request_id,
            options: SubscriptionOptions {
                polling_interval: options.polling_interval,
            },
        });
    }

    let (status, has_data) = api.with_state(|state| {
        state
            .query(&key)
            .map(|entry| (entry.status, entry.data.is_some()))
            .unwrap_or_default()
    });

    let fetch = match status {
        QueryStatus::Pending => true,
        _ if options.force_refetch => true,
        _ => !has_data,
    };

    let request = if fetch {
        Some(start_query(api, &key, original_args.clone(), request_id)?)
    } else {
        None
    };

    Ok(QueryActionHandle::new(
        api.clone(),
        key,
        original_args,
        request_id,
        options.subscribe,
        request,
    ))
}

pub(crate) fn initiate_mutation(
    api: &Api,
    endpoint: &str,
    original_args: Value,
    options: MutationOptions,
) -> Result<MutationActionHandle, Error> {
    let definition = api.inner.definitions.mutation(endpoint)?;
    let request_id = RequestId::next();
    let arg = MutationThunkArg {
        endpoint: endpoint.to_string(),
        request_args: (definition.query)(&original_args),
        original_args,
        track: options.track,
    };
    let extra = definition.extra_options.clone();

    let started_at = Instant::now();
    api.dispatch(Action::MutationPending {
        arg: arg.clone(),
        request_id,
        started_at,
    });

    let (done, outcome) = oneshot::channel::<MutationResult>();
    let outcome: SharedOutcome = {
        let endpoint = endpoint.to_string();
        outcome
            .map(move |outcome| {
                outcome.unwrap_or_else(|_| {
                    tracing::error!(%endpoint, %request_id, "mutation task ended without a result");
                    MutationResult::uninitialized(endpoint)
                })
            })
            .boxed_local()
            .shared()
    };

    let task_api = api.clone();
    tokio::task::spawn_local(async move {
        let api = task_api;
        let context = BaseQueryApi {
            endpoint: arg.endpoint.clone(),
            kind: EndpointKind::Mutation,
            request_id,
        };
        let result = api
            .inner
            .base_query
            .query(arg.request_args.clone(), context, extra)
            .await;

        // Untracked requests have no entry, so the outcome is built here.
        let mut entry = MutationSubState::pending(
            arg.endpoint.clone(),
            request_id,
            arg.original_args.clone(),
            started_at,
        );
        match result {
            Ok(data) => {
                let fulfilled_at = Instant::now();
                entry.fulfill(data.clone(), fulfilled_at);
                api.dispatch(Action::MutationFulfilled {
                    arg,
                    request_id,
                    data,
                    fulfilled_at,
                });
            }
            Err(error) => {
                let error = error.into_value();
                entry.reject(error.clone());
                api.dispatch(Action::MutationRejected {
                    arg,
                    request_id,
                    error,
                });
            }
        }

        let _ = done.send(MutationResult::from(&entry));
    });

    Ok(MutationActionHandle::new(
        api.clone(),
        endpoint.to_string(),
        request_id,
        options.track,
        outcome,
    ))
}
