use std::rc::Rc;
use std::time::Duration;

use serde_json::Value;

/// Derives the cache key string of a query argument.
pub type SerializeQueryArgs = Rc<dyn Fn(&str, &Value) -> String>;

/// Api wide configuration.
#[derive(Clone)]
pub struct ApiOptions {
    /// Name of the api, used as the root of its state and in logs.
    pub reducer_path: String,
    /// How long an entry without subscribers is kept before it is evicted.
    /// Default is 60 seconds. Endpoints may override it.
    pub keep_unused_data_for: Duration,
    /// Turns an endpoint argument into the string part of its cache key.
    /// Defaults to [`default_serialize_query_args`].
    pub serialize_query_args: SerializeQueryArgs,
}

impl Default for ApiOptions {
    fn default() -> Self {
        Self {
            reducer_path: DEFAULT_REDUCER_PATH.to_string(),
            keep_unused_data_for: DEFAULT_KEEP_UNUSED_DATA_FOR,
            serialize_query_args: Rc::new(default_serialize_query_args),
        }
    }
}

const DEFAULT_REDUCER_PATH: &str = "api";

/// Default idle eviction delay.
pub const DEFAULT_KEEP_UNUSED_DATA_FOR: Duration = Duration::from_secs(60);

impl ApiOptions {
    /// Set the reducer path.
    pub fn set_reducer_path(self, reducer_path: impl Into<String>) -> Self {
        ApiOptions {
            reducer_path: reducer_path.into(),
            ..self
        }
    }

    /// Set the idle eviction delay.
    pub fn set_keep_unused_data_for(self, keep_unused_data_for: Duration) -> Self {
        ApiOptions {
            keep_unused_data_for,
            ..self
        }
    }

    /// Set the argument serializer.
    pub fn set_serialize_query_args(
        self,
        serialize_query_args: impl Fn(&str, &Value) -> String + 'static,
    ) -> Self {
        ApiOptions {
            serialize_query_args: Rc::new(serialize_query_args),
            ..self
        }
    }
}

impl std::fmt::Debug for ApiOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiOptions")
            .field("reducer_path", &self.reducer_path)
            .field("keep_unused_data_for", &self.keep_unused_data_for)
            .field("serialize_query_args", &"...")
            .finish()
    }
}

/// Compact JSON of the argument.
///
/// Object keys are emitted in sorted order, so structurally equal arguments
/// always map to the same cache entry.
pub fn default_serialize_query_args(_endpoint: &str, arg: &Value) -> String {
    arg.to_string()
}

/// Options for initiating a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitiateOptions {
    /// Do nothing. The returned handle reads as uninitialized.
    pub skip: bool,
    /// Fetch even if the entry already holds data.
    pub force_refetch: bool,
    /// Register a subscriber reference. Default is true.
    pub subscribe: bool,
    /// Poll the entry while this subscriber is alive.
    pub polling_interval: Option<Duration>,
}

impl Default for InitiateOptions {
    fn default() -> Self {
        Self {
            skip: false,
            force_refetch: false,
            subscribe: true,
            polling_interval: None,
        }
    }
}

impl InitiateOptions {
    /// Set skip.
    pub fn set_skip(self, skip: bool) -> Self {
        InitiateOptions { skip, ..self }
    }

    /// Set force_refetch.
    pub fn set_force_refetch(self, force_refetch: bool) -> Self {
        InitiateOptions {
            force_refetch,
            ..self
        }
    }

    /// Set subscribe.
    pub fn set_subscribe(self, subscribe: bool) -> Self {
        InitiateOptions { subscribe, ..self }
    }

    /// Set the polling interval.
    pub fn set_polling_interval(self, polling_interval: Option<Duration>) -> Self {
        InitiateOptions {
            polling_interval,
            ..self
        }
    }
}

/// Options for triggering a mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MutationOptions {
    /// Keep a selectable cache entry for the request. Default is true.
    /// Untracked mutations never get an entry or a cache lifecycle.
    pub track: bool,
}

impl Default for MutationOptions {
    fn default() -> Self {
        Self { track: true }
    }
}

impl MutationOptions {
    /// Set track.
    pub fn set_track(self, track: bool) -> Self {
        MutationOptions { track }
    }
}
