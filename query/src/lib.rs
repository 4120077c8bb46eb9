#![warn(missing_docs)]
#![forbid(unsafe_code)]

//! # About rquery
//!
//! rquery is an entity-aware data fetching and caching engine.
//!
//! An [`Api`] is built from a set of named endpoints and a single transport,
//! the [`BaseQuery`]. Query endpoints read data and keep it in a normalized
//! cache keyed by endpoint name and serialized argument. Mutation endpoints
//! change data on the server and declare which entities they invalidate.
//!
//! The engine provides:
//! - caching keyed by serialized arguments
//! - de-duplication of concurrent requests for one entry
//! - entity based invalidation
//! - polling
//! - idle eviction of unused entries
//! - cache entry lifecycles
//! - retries with exponential backoff
//!
//! ## The main entry points are:
//! - [`Api::builder`] - registers endpoints and the transport.
//! - [`QueryEndpoint::initiate`] and [`MutationEndpoint::initiate`] - start requests.
//! - [`QuerySubscription`] and [`MutationTrigger`] - bindings for view layers.
//!
//! The engine is single threaded. All requests and timers are spawned with
//! [`tokio::task::spawn_local`], so an [`Api`] must be used inside a
//! [`tokio::task::LocalSet`].
//!
//! # A Simple Example
//!
//! ```
//! use rquery::*;
//! use serde_json::json;
//!
//! let api = Api::builder(base_query_fn(|args, _api, _extra| async move {
//!     Ok(json!({ "id": 1, "title": "Hello", "url": args }))
//! }))
//! .query(
//!     "getPost",
//!     QueryDefinition::new(|id| json!(format!("/posts/{id}")))
//!         .provides(EntitiesDescriptor::list(["Post"])),
//! )
//! .mutation(
//!     "editPost",
//!     MutationDefinition::new(|post| post.clone())
//!         .invalidates(EntitiesDescriptor::list(["Post"])),
//! )
//! .build();
//!
//! let runtime = tokio::runtime::Builder::new_current_thread()
//!     .enable_time()
//!     .build()
//!     .unwrap();
//!
//! tokio::task::LocalSet::new().block_on(&runtime, async {
//!     let post = api
//!         .query_endpoint("getPost")
//!         .unwrap()
//!         .initiate(1, InitiateOptions::default())
//!         .unwrap();
//!
//!     let result = post.result().await;
//!     assert!(result.is_success);
//!     assert_eq!(result.data.unwrap()["title"], "Hello");
//!
//!     // Refetches every subscribed entry that provided a `Post`.
//!     api.mutation_endpoint("editPost")
//!         .unwrap()
//!         .initiate(json!({ "id": 1 }), MutationOptions::default())
//!         .unwrap()
//!         .result()
//!         .await;
//!     assert!(post.select().is_loading);
//!
//!     post.unsubscribe();
//! });
//! ```

/// Actions dispatched against the cache.
pub mod action;
mod action_maps;
mod api;
mod base_query;
mod cache_lifecycle;
/// Subscriptions to cache-wide entry events.
pub mod cache_observer;
mod endpoint;
mod entities;
mod error;
mod garbage_collector;
mod hooks;
mod instant;
mod invalidation;
mod polling;
mod query_options;
mod query_result;
mod query_state;
/// Retry decorator for base queries.
pub mod retry;
mod slice;
mod store;
mod thunks;

pub use action::{Action, MutationThunkArg, QueryThunkArg};
pub use action_maps::*;
pub use api::*;
pub use base_query::*;
pub use cache_lifecycle::LifecycleApi;
pub use cache_observer::{CacheEvent, CacheKey, CacheObserver, CacheObserverKey};
pub use endpoint::{
    EndpointKind, MutationDefinition, OnCacheEntryAdded, QueryDefinition, QueryFn,
};
pub use entities::*;
pub use error::*;
pub use hooks::*;
pub use instant::*;
pub use query_options::*;
pub use query_result::*;
pub use query_state::*;
pub use retry::{default_backoff, retry, Backoff, Retry, RetryOptions, DEFAULT_MAX_RETRIES};
pub use slice::ApiState;
