//! Entity based invalidation.
//!
//! A fulfilled mutation invalidates the entities its endpoint declares. Every
//! query entry that provided one of them is refetched if it has subscribers and
//! removed if it has none.

use std::collections::BTreeSet;

use crate::action::Action;
use crate::{calculate_provided_by, Api, EntityDescription, QueryCacheKey, QueryStatus};

pub(crate) fn process(api: &Api, action: &Action) {
    match action {
        Action::MutationFulfilled { arg, data, .. } => {
            let entities = api
                .inner
                .definitions
                .mutation(&arg.endpoint)
                .and_then(|definition| {
                    calculate_provided_by(&definition.invalidates, data, &arg.original_args)
                });
            match entities {
                Ok(entities) => invalidate(api, &entities),
                // The mutation itself stays fulfilled.
                Err(error) => {
                    tracing::error!(endpoint = %arg.endpoint, %error, "could not calculate invalidated entities");
                }
            }
        }
        Action::InvalidateEntities { entities } => invalidate(api, entities),
        _ => {}
    }
}

fn invalidate(api: &Api, entities: &[EntityDescription]) {
    if entities.is_empty() {
        return;
    }

    let affected: BTreeSet<QueryCacheKey> = api.with_state(|state| {
        entities
            .iter()
            .flat_map(|entity| state.provided().affected_by(entity))
            .collect()
    });

    tracing::debug!(?entities, affected = affected.len(), "invalidating entities");

    api.batch(|| {
        for key in affected {
            let entry = api.with_state(|state| {
                state
                    .query(&key)
                    .map(|entry| (entry.subscriber_count(), entry.status))
            });

            match entry {
                None => {}
                Some((0, _)) => api.dispatch(Action::RemoveQueryResult { key }),
                Some((_, QueryStatus::Uninitialized)) => {}
                Some(_) => {
                    if let Err(error) = api.refetch_query(&key) {
                        tracing::error!(%key, %error, "refetch after invalidation failed");
                    }
                }
            }
        }
    });
}
