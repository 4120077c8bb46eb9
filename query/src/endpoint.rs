use std::collections::HashMap;
use std::future::Future;
use std::rc::Rc;
use std::time::Duration;

use futures::future::{FutureExt, LocalBoxFuture};
use serde_json::Value;

use crate::{EntitiesDescriptor, Error, ExtraOptions, LifecycleApi};

/// Whether an endpoint reads (query) or writes (mutation).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointKind {
    /// Cached, deduplicated by argument.
    Query,
    /// One cache entry per request.
    Mutation,
}

impl std::fmt::Display for EndpointKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EndpointKind::Query => write!(f, "query"),
            EndpointKind::Mutation => write!(f, "mutation"),
        }
    }
}

/// Maps an endpoint argument to the request descriptor handed to the transport.
pub type QueryFn = Rc<dyn Fn(&Value) -> Value>;

/// Cache lifecycle handler, started once per cache entry lifetime.
pub type OnCacheEntryAdded = Rc<dyn Fn(Value, LifecycleApi) -> LocalBoxFuture<'static, Result<(), Error>>>;

fn boxed_handler<F, Fu>(handler: F) -> OnCacheEntryAdded
where
    F: Fn(Value, LifecycleApi) -> Fu + 'static,
    Fu: Future<Output = Result<(), Error>> + 'static,
{
    Rc::new(move |arg, api| handler(arg, api).boxed_local())
}

/// Definition of a query endpoint.
///
/// ```
/// use rquery::*;
/// use serde_json::json;
///
/// let get_post = QueryDefinition::new(|id| json!({ "url": format!("/posts/{id}") }))
///     .provides(EntitiesDescriptor::computed(|_post, id| {
///         Ok(vec![EntityDescription::with_id("Post", id.as_i64().unwrap_or_default())])
///     }));
/// ```
#[derive(Clone)]
pub struct QueryDefinition {
    pub(crate) query: QueryFn,
    pub(crate) provides: EntitiesDescriptor,
    pub(crate) extra_options: ExtraOptions,
    pub(crate) keep_unused_data_for: Option<Duration>,
    pub(crate) on_cache_entry_added: Option<OnCacheEntryAdded>,
}

impl QueryDefinition {
    /// Creates a query endpoint from its request builder.
    pub fn new(query: impl Fn(&Value) -> Value + 'static) -> Self {
        Self {
            query: Rc::new(query),
            provides: EntitiesDescriptor::None,
            extra_options: ExtraOptions::default(),
            keep_unused_data_for: None,
            on_cache_entry_added: None,
        }
    }

    /// Entities the results of this endpoint provide.
    pub fn provides(self, provides: EntitiesDescriptor) -> Self {
        QueryDefinition { provides, ..self }
    }

    /// Options forwarded to the transport.
    pub fn extra_options(self, extra_options: ExtraOptions) -> Self {
        QueryDefinition {
            extra_options,
            ..self
        }
    }

    /// Overrides the api wide idle eviction delay.
    pub fn keep_unused_data_for(self, keep_unused_data_for: Duration) -> Self {
        QueryDefinition {
            keep_unused_data_for: Some(keep_unused_data_for),
            ..self
        }
    }

    /// Runs `handler` once for every lifetime of a cache entry of this endpoint.
    ///
    /// The lifetime starts with the entry's first subscriber.
    pub fn on_cache_entry_added<F, Fu>(self, handler: F) -> Self
    where
        F: Fn(Value, LifecycleApi) -> Fu + 'static,
        Fu: Future<Output = Result<(), Error>> + 'static,
    {
        QueryDefinition {
            on_cache_entry_added: Some(boxed_handler(handler)),
            ..self
        }
    }
}

/// Definition of a mutation endpoint.
#[derive(Clone)]
pub struct MutationDefinition {
    pub(crate) query: QueryFn,
    pub(crate) invalidates: EntitiesDescriptor,
    pub(crate) extra_options: ExtraOptions,
    pub(crate) on_cache_entry_added: Option<OnCacheEntryAdded>,
}

impl MutationDefinition {
    /// Creates a mutation endpoint from its request builder.
    pub fn new(query: impl Fn(&Value) -> Value + 'static) -> Self {
        Self {
            query: Rc::new(query),
            invalidates: EntitiesDescriptor::None,
            extra_options: ExtraOptions::default(),
            on_cache_entry_added: None,
        }
    }

    /// Entities a successful call invalidates.
    pub fn invalidates(self, invalidates: EntitiesDescriptor) -> Self {
        MutationDefinition {
            invalidates,
            ..self
        }
    }

    /// Options forwarded to the transport.
    pub fn extra_options(self, extra_options: ExtraOptions) -> Self {
        MutationDefinition {
            extra_options,
            ..self
        }
    }

    /// Runs `handler` for every tracked request of this endpoint.
    pub fn on_cache_entry_added<F, Fu>(self, handler: F) -> Self
    where
        F: Fn(Value, LifecycleApi) -> Fu + 'static,
        Fu: Future<Output = Result<(), Error>> + 'static,
    {
        MutationDefinition {
            on_cache_entry_added: Some(boxed_handler(handler)),
            ..self
        }
    }
}

#[derive(Clone)]
pub(crate) enum EndpointDefinition {
    Query(QueryDefinition),
    Mutation(MutationDefinition),
}

impl EndpointDefinition {
    pub(crate) fn kind(&self) -> EndpointKind {
        match self {
            EndpointDefinition::Query(_) => EndpointKind::Query,
            EndpointDefinition::Mutation(_) => EndpointKind::Mutation,
        }
    }

    pub(crate) fn on_cache_entry_added(&self) -> Option<&OnCacheEntryAdded> {
        match self {
            EndpointDefinition::Query(definition) => definition.on_cache_entry_added.as_ref(),
            EndpointDefinition::Mutation(definition) => definition.on_cache_entry_added.as_ref(),
        }
    }
}

/// Endpoint definitions, keyed by endpoint name. Immutable once the api is built.
#[derive(Clone, Default)]
pub(crate) struct EndpointDefinitions(HashMap<String, EndpointDefinition>);

impl EndpointDefinitions {
    pub(crate) fn insert(&mut self, name: String, definition: EndpointDefinition) {
        if self.0.insert(name.clone(), definition).is_some() {
            tracing::warn!(endpoint = %name, "endpoint registered twice, keeping the last definition");
        }
    }

    pub(crate) fn get(&self, name: &str) -> Result<&EndpointDefinition, Error> {
        self.0
            .get(name)
            .ok_or_else(|| Error::UnknownEndpoint(name.to_string()))
    }

    pub(crate) fn query(&self, name: &str) -> Result<&QueryDefinition, Error> {
        match self.get(name)? {
            EndpointDefinition::Query(definition) => Ok(definition),
            EndpointDefinition::Mutation(_) => Err(Error::WrongEndpointKind {
                name: name.to_string(),
                expected: EndpointKind::Query,
                actual: EndpointKind::Mutation,
            }),
        }
    }

    pub(crate) fn mutation(&self, name: &str) -> Result<&MutationDefinition, Error> {
        match self.get(name)? {
            EndpointDefinition::Mutation(definition) => Ok(definition),
            EndpointDefinition::Query(_) => Err(Error::WrongEndpointKind {
                name: name.to_string(),
                expected: EndpointKind::Mutation,
                actual: EndpointKind::Query,
            }),
        }
    }

    pub(crate) fn names(&self, kind: EndpointKind) -> impl Iterator<Item = &str> {
        self.0
            .iter()
            .filter(move |(_, definition)| definition.kind() == kind)
            .map(|(name, _)| name.as_str())
    }
}
