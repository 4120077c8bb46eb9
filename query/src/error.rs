use crate::EndpointKind;

/// Errors raised by the engine itself.
///
/// Failures of the underlying transport are never represented here: those are
/// stored verbatim in the cache entry's `error` field (see [`BaseQueryError`](crate::BaseQueryError)).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No endpoint with this name was registered on the api.
    #[error("no endpoint named `{0}` is registered")]
    UnknownEndpoint(String),

    /// The endpoint exists but is of the other kind.
    #[error("endpoint `{name}` is a {actual} endpoint, expected a {expected} endpoint")]
    WrongEndpointKind {
        /// Endpoint name.
        name: String,
        /// The kind the caller asked for.
        expected: EndpointKind,
        /// The kind that was registered.
        actual: EndpointKind,
    },

    /// An argument or payload could not be converted to or from JSON.
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    /// A `provides`/`invalidates` function could not produce entities.
    #[error("invalid entity descriptor: {0}")]
    EntityDescriptor(String),

    /// The cache entry was removed before its first successful value arrived.
    #[error("Promise never resolved before cleanup.")]
    NeverResolvedBeforeCleanup,

    /// A cache lifecycle handler failed.
    ///
    /// Never raised by the engine. Handlers return it for their own failures,
    /// and the engine logs it.
    #[error("cache lifecycle failed: {0}")]
    Lifecycle(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;
