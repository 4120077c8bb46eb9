use std::future::Future;

use async_trait::async_trait;
use serde_json::Value;

use crate::{retry::Backoff, EndpointKind, RequestId};

/// Outcome of a single transport call.
pub type BaseQueryResult = Result<Value, BaseQueryError>;

/// A failed transport call.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BaseQueryError {
    /// An ordinary failure. Stored verbatim as the entry's `error`.
    #[error("request failed: {0}")]
    Failed(Value),
    /// Raised through [`retry::fail`](crate::retry::fail): skips any remaining retries.
    #[error("request failed, retries skipped: {0}")]
    FailFast(Value),
}

impl BaseQueryError {
    /// The error payload.
    pub fn value(&self) -> &Value {
        match self {
            BaseQueryError::Failed(value) | BaseQueryError::FailFast(value) => value,
        }
    }

    /// Consumes the error, returning its payload.
    pub fn into_value(self) -> Value {
        match self {
            BaseQueryError::Failed(value) | BaseQueryError::FailFast(value) => value,
        }
    }
}

/// Execution context handed to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseQueryApi {
    /// Endpoint that issued the request.
    pub endpoint: String,
    /// Whether the endpoint is a query or a mutation.
    pub kind: EndpointKind,
    /// Id of the request.
    pub request_id: RequestId,
}

/// Per endpoint options forwarded to the transport.
#[derive(Clone, Default)]
pub struct ExtraOptions {
    /// Overrides the retry budget of a [`Retry`](crate::retry::Retry) wrapper.
    pub max_retries: Option<u32>,
    /// Overrides the backoff of a [`Retry`](crate::retry::Retry) wrapper.
    pub backoff: Option<Backoff>,
    /// Anything else a custom transport wants to read.
    pub custom: Value,
}

impl ExtraOptions {
    /// Set max_retries.
    pub fn set_max_retries(self, max_retries: u32) -> Self {
        ExtraOptions {
            max_retries: Some(max_retries),
            ..self
        }
    }

    /// Set the backoff.
    pub fn set_backoff(self, backoff: Backoff) -> Self {
        ExtraOptions {
            backoff: Some(backoff),
            ..self
        }
    }

    /// Set the custom payload.
    pub fn set_custom(self, custom: Value) -> Self {
        ExtraOptions { custom, ..self }
    }
}

impl std::fmt::Debug for ExtraOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtraOptions")
            .field("max_retries", &self.max_retries)
            .field("backoff", &self.backoff.as_ref().map(|_| "..."))
            .field("custom", &self.custom)
            .finish()
    }
}

/// The transport seam: turns a request descriptor into data or an error.
///
/// Ordinary failures must be returned as [`BaseQueryError::Failed`], never panicked.
#[async_trait(?Send)]
pub trait BaseQuery {
    /// Perform the request described by `args`.
    async fn query(&self, args: Value, api: BaseQueryApi, extra: ExtraOptions)
        -> BaseQueryResult;
}

/// Adapts an async closure into a [`BaseQuery`].
pub struct BaseQueryFn<F>(F);

/// Creates a [`BaseQuery`] from an async function.
///
/// ```
/// use rquery::*;
/// use serde_json::json;
///
/// let transport = base_query_fn(|args, _api, _extra| async move {
///     if args["url"] == "/fail" {
///         Err(BaseQueryError::Failed(json!({ "status": 500 })))
///     } else {
///         Ok(json!({ "echo": args }))
///     }
/// });
/// ```
pub fn base_query_fn<F, Fu>(func: F) -> BaseQueryFn<F>
where
    F: Fn(Value, BaseQueryApi, ExtraOptions) -> Fu + 'static,
    Fu: Future<Output = BaseQueryResult> + 'static,
{
    BaseQueryFn(func)
}

#[async_trait(?Send)]
impl<F, Fu> BaseQuery for BaseQueryFn<F>
where
    F: Fn(Value, BaseQueryApi, ExtraOptions) -> Fu + 'static,
    Fu: Future<Output = BaseQueryResult> + 'static,
{
    async fn query(
        &self,
        args: Value,
        api: BaseQueryApi,
        extra: ExtraOptions,
    ) -> BaseQueryResult {
        (self.0)(args, api, extra).await
    }
}
