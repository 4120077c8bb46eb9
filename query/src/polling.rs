use std::cell::RefCell;
use std::collections::HashMap;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::action::Action;
use crate::cache_observer::{CacheEvent, CacheKey};
use crate::{Api, QueryCacheKey, QueryStatus};

/// Polling timers, at most one per query entry.
///
/// The lowest interval among an entry's subscribers wins. The timer is armed
/// after each settled request, so polls never overlap.
#[derive(Default)]
pub(crate) struct Polling {
    timers: RefCell<HashMap<QueryCacheKey, (Duration, JoinHandle<()>)>>,
}

impl Polling {
    pub(crate) fn process(&self, api: &Api, action: &Action, events: &[CacheEvent]) {
        for event in events {
            if let CacheEvent::Removed(CacheKey::Query(key)) = event {
                self.cancel(key);
            }
        }

        match action {
            Action::QueryFulfilled { arg, .. } | Action::QueryRejected { arg, .. }
                if !events.is_empty() =>
            {
                self.schedule(api, &arg.key);
            }
            Action::QuerySubscribed { key, .. } | Action::UnsubscribeQueryResult { key, .. } => {
                self.update(api, key);
            }
            _ => {}
        }
    }

    // Subscribers changed: only touch the timer if the interval did.
    fn update(&self, api: &Api, key: &QueryCacheKey) {
        let Some((status, interval)) = api.with_state(|state| {
            state
                .query(key)
                .map(|entry| (entry.status, entry.lowest_polling_interval()))
        }) else {
            return;
        };

        let current = self
            .timers
            .try_borrow()
            .expect("update polling borrow")
            .get(key)
            .map(|(interval, _)| *interval);

        match interval {
            None => self.cancel(key),
            Some(_) if interval == current => {}
            // The next settle arms the timer.
            Some(_) if matches!(status, QueryStatus::Pending | QueryStatus::Uninitialized) => {}
            Some(_) => self.schedule(api, key),
        }
    }

    fn schedule(&self, api: &Api, key: &QueryCacheKey) {
        self.cancel(key);

        let interval = api.with_state(|state| {
            state
                .query(key)
                .and_then(|entry| entry.lowest_polling_interval())
        });
        let Some(interval) = interval else {
            return;
        };

        tracing::debug!(%key, interval_ms = interval.as_millis() as u64, "scheduling poll");

        let weak = api.downgrade();
        let timer_key = key.clone();
        let handle = tokio::task::spawn_local(async move {
            tokio::time::sleep(interval).await;
            let Some(api) = weak.upgrade() else {
                return;
            };

            api.inner
                .polling
                .timers
                .try_borrow_mut()
                .expect("poll timer borrow mut")
                .remove(&timer_key);

            tracing::debug!(key = %timer_key, "polling");
            if let Err(error) = api.refetch_query(&timer_key) {
                tracing::error!(key = %timer_key, %error, "poll failed to start");
            }
        });

        self.timers
            .try_borrow_mut()
            .expect("schedule polling borrow mut")
            .insert(key.clone(), (interval, handle));
    }

    fn cancel(&self, key: &QueryCacheKey) {
        let timer = self
            .timers
            .try_borrow_mut()
            .expect("cancel polling borrow mut")
            .remove(key);
        if let Some((_, handle)) = timer {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use serde_json::json;
    use tokio::task::LocalSet;

    use super::*;
    use crate::{base_query_fn, InitiateOptions, QueryDefinition};

    fn api(calls: Rc<Cell<u32>>) -> Api {
        Api::builder(base_query_fn(move |args, _api, _extra| {
            let calls = calls.clone();
            async move {
                calls.set(calls.get() + 1);
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok(args)
            }
        }))
        .query("getPost", QueryDefinition::new(|id| id.clone()))
        .build()
    }

    fn polling(seconds: u64) -> InitiateOptions {
        InitiateOptions::default().set_polling_interval(Some(Duration::from_secs(seconds)))
    }

    #[tokio::test(start_paused = true)]
    async fn polls_while_subscribed() {
        LocalSet::new()
            .run_until(async {
                let calls = Rc::new(Cell::new(0));
                let api = api(calls.clone());
                let endpoint = api.query_endpoint("getPost").unwrap();

                let handle = endpoint.initiate(1, polling(10)).unwrap();
                handle.result().await;
                assert_eq!(calls.get(), 1);

                // Each poll starts 10s after the previous request settled.
                tokio::time::sleep(Duration::from_millis(10_050)).await;
                assert_eq!(calls.get(), 2);
                tokio::time::sleep(Duration::from_millis(10_100)).await;
                assert_eq!(calls.get(), 3);

                handle.unsubscribe();
                tokio::time::sleep(Duration::from_secs(30)).await;
                assert_eq!(calls.get(), 3);
                assert_eq!(endpoint.select(1).unwrap().data, Some(json!(1)));
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn lowest_interval_wins() {
        LocalSet::new()
            .run_until(async {
                let calls = Rc::new(Cell::new(0));
                let api = api(calls.clone());
                let endpoint = api.query_endpoint("getPost").unwrap();

                let slow = endpoint.initiate(1, polling(60)).unwrap();
                slow.result().await;
                let fast = endpoint.initiate(1, polling(5)).unwrap();

                tokio::time::sleep(Duration::from_millis(5_050)).await;
                assert_eq!(calls.get(), 2);

                fast.unsubscribe();
                tokio::time::sleep(Duration::from_secs(30)).await;
                assert_eq!(calls.get(), 2);

                tokio::time::sleep(Duration::from_secs(31)).await;
                assert_eq!(calls.get(), 3);
            })
            .await;
    }
}
