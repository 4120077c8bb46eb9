//! Retrying transport decorator.
//!
//! [`retry`] wraps any [`BaseQuery`]. Failed calls are retried after a backoff
//! until one succeeds, the retry budget is exhausted, or the transport calls
//! [`fail`]. Wrapping a retrying transport again composes multiplicatively: the
//! outer decorator re-runs the entire inner retry sequence.

use std::rc::Rc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::{BaseQuery, BaseQueryApi, BaseQueryError, BaseQueryResult, ExtraOptions};

/// Computes the delay before retry number `attempt` (1 based) out of `max_retries`.
pub type Backoff = Rc<dyn Fn(u32, u32) -> Duration>;

/// Default number of retries after the initial attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

const BASE_DELAY_MS: u64 = 300;

/// Exponential backoff with random jitter: `(rand + 0.4) * 300ms * 2^attempt`.
pub fn default_backoff(attempt: u32, max_retries: u32) -> Duration {
    // Cap the shift so huge budgets can't overflow.
    let attempts = attempt.min(max_retries).min(20);
    let base = (BASE_DELAY_MS << attempts) as f64;
    let jitter = fastrand::f64() + 0.4;
    Duration::from_millis((base * jitter) as u64)
}

/// Configuration of a [`Retry`] wrapper.
#[derive(Clone)]
pub struct RetryOptions {
    /// Retries after the initial attempt. Default is 5.
    pub max_retries: u32,
    /// Delay between attempts. Default is [`default_backoff`].
    pub backoff: Backoff,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            backoff: Rc::new(default_backoff),
        }
    }
}

impl RetryOptions {
    /// Set max_retries.
    pub fn set_max_retries(self, max_retries: u32) -> Self {
        RetryOptions {
            max_retries,
            ..self
        }
    }

    /// Set the backoff.
    pub fn set_backoff(self, backoff: impl Fn(u32, u32) -> Duration + 'static) -> Self {
        RetryOptions {
            backoff: Rc::new(backoff),
            ..self
        }
    }
}

impl std::fmt::Debug for RetryOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryOptions")
            .field("max_retries", &self.max_retries)
            .field("backoff", &"...")
            .finish()
    }
}

/// A [`BaseQuery`] that retries its inner transport.
pub struct Retry<B> {
    inner: B,
    options: RetryOptions,
}

/// Wraps `base_query` with retry behaviour.
///
/// Endpoint level [`ExtraOptions::max_retries`] / [`ExtraOptions::backoff`] win
/// over `options`.
pub fn retry<B: BaseQuery>(base_query: B, options: RetryOptions) -> Retry<B> {
    Retry {
        inner: base_query,
        options,
    }
}

/// Builds the fail-fast signal: return it as the error of a wrapped transport
/// to stop retrying and surface `error` as is.
///
/// ```
/// use rquery::*;
/// use serde_json::json;
///
/// let transport = retry(
///     base_query_fn(|_args, _api, _extra| async move {
///         Err(retry::fail(json!({ "message": "banana" })))
///     }),
///     RetryOptions::default(),
/// );
/// ```
pub fn fail(error: impl Into<Value>) -> BaseQueryError {
    BaseQueryError::FailFast(error.into())
}

#[async_trait(?Send)]
impl<B: BaseQuery> BaseQuery for Retry<B> {
    async fn query(
        &self,
        args: Value,
        api: BaseQueryApi,
        extra: ExtraOptions,
    ) -> BaseQueryResult {
        let max_retries = extra.max_retries.unwrap_or(self.options.max_retries);
        let backoff = extra
            .backoff
            .clone()
            .unwrap_or_else(|| self.options.backoff.clone());

        let mut attempt = 0;
        loop {
            let result = self
                .inner
                .query(args.clone(), api.clone(), extra.clone())
                .await;

            match result {
                Ok(data) => return Ok(data),
                Err(BaseQueryError::FailFast(error)) => {
                    tracing::debug!(endpoint = %api.endpoint, attempt, "retry aborted by fail-fast signal");
                    return Err(BaseQueryError::Failed(error));
                }
                Err(error) => {
                    attempt += 1;
                    if attempt > max_retries {
                        tracing::debug!(endpoint = %api.endpoint, max_retries, "retry budget exhausted");
                        return Err(error);
                    }
                    let delay = backoff(attempt, max_retries);
                    tracing::debug!(
                        endpoint = %api.endpoint,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "retrying request"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
