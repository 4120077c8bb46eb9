use std::cell::RefCell;
use std::collections::HashMap;

use tokio::task::JoinHandle;

use crate::action::Action;
use crate::cache_observer::{CacheEvent, CacheKey};
use crate::{Api, QueryCacheKey};

/// Idle eviction of query entries without subscribers.
///
/// One debounced timer per entry. A new subscriber cancels it.
#[derive(Default)]
pub(crate) struct GarbageCollector {
    handles: RefCell<HashMap<QueryCacheKey, JoinHandle<()>>>,
}

impl GarbageCollector {
    pub(crate) fn process(&self, api: &Api, action: &Action, events: &[CacheEvent]) {
        match action {
            Action::QuerySubscribed { key, .. } => self.disable_gc(key),
            Action::UnsubscribeQueryResult { key, .. } => {
                if is_unused(api, key) {
                    // Restart the countdown.
                    self.disable_gc(key);
                    self.enable_gc(api, key);
                }
            }
            Action::QueryFulfilled { arg, .. } | Action::QueryRejected { arg, .. } => {
                if is_unused(api, &arg.key) {
                    self.enable_gc(api, &arg.key);
                }
            }
            _ => {}
        }

        for event in events {
            if let CacheEvent::Removed(CacheKey::Query(key)) = event {
                self.disable_gc(key);
            }
        }
    }

    /// Schedules eviction of `key`, unless it is already scheduled.
    fn enable_gc(&self, api: &Api, key: &QueryCacheKey) {
        let mut handles = self.handles.try_borrow_mut().expect("enable_gc borrow mut");
        if handles.contains_key(key) {
            return;
        }

        let delay = api.keep_unused_data_for(&key.endpoint);
        tracing::debug!(%key, delay_ms = delay.as_millis() as u64, "scheduling idle eviction");

        let weak = api.downgrade();
        let timer_key = key.clone();
        let handle = tokio::task::spawn_local(async move {
            tokio::time::sleep(delay).await;
            let Some(api) = weak.upgrade() else {
                return;
            };

            api.inner
                .garbage_collector
                .handles
                .try_borrow_mut()
                .expect("gc timer borrow mut")
                .remove(&timer_key);

            if is_unused(&api, &timer_key) {
                tracing::debug!(key = %timer_key, "evicting unused query entry");
                api.dispatch(Action::RemoveQueryResult { key: timer_key });
            }
        });

        handles.insert(key.clone(), handle);
    }

    fn disable_gc(&self, key: &QueryCacheKey) {
        let handle = self
            .handles
            .try_borrow_mut()
            .expect("disable_gc borrow mut")
            .remove(key);
        if let Some(handle) = handle {
            handle.abort();
        }
    }

    #[cfg(test)]
    pub(crate) fn is_scheduled(&self, key: &QueryCacheKey) -> bool {
        self.handles
            .try_borrow()
            .expect("is_scheduled borrow")
            .contains_key(key)
    }
}

fn is_unused(api: &Api, key: &QueryCacheKey) -> bool {
    api.with_state(|state| {
        state
            .query(key)
            .is_some_and(|entry| entry.subscriber_count() == 0)
    })
}
