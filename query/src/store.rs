use std::cell::{Cell, RefCell};
use std::rc::Rc;

use slotmap::{new_key_type, SlotMap};

use crate::action::Action;
use crate::cache_observer::CacheEvent;
use crate::endpoint::EndpointDefinitions;
use crate::slice::{self, ApiState};

new_key_type! {
    pub(crate) struct ListenerKey;
}

/// Owns the state tree and the listeners notified after it changes.
pub(crate) struct Store {
    state: RefCell<ApiState>,
    listeners: RefCell<SlotMap<ListenerKey, Rc<dyn Fn()>>>,
    batch_depth: Cell<usize>,
    dirty: Cell<bool>,
}

impl Store {
    pub(crate) fn new() -> Self {
        Self {
            state: RefCell::new(ApiState::default()),
            listeners: RefCell::new(SlotMap::with_key()),
            batch_depth: Cell::new(0),
            dirty: Cell::new(false),
        }
    }

    pub(crate) fn with_state<R>(&self, func: impl FnOnce(&ApiState) -> R) -> R {
        let state = self.state.try_borrow().expect("with_state borrow");
        func(&state)
    }

    pub(crate) fn reduce(&self, action: &Action, definitions: &EndpointDefinitions) -> Vec<CacheEvent> {
        let mut state = self.state.try_borrow_mut().expect("reduce borrow mut");
        slice::reduce(&mut state, action, definitions)
    }

    pub(crate) fn add_listener(&self, listener: impl Fn() + 'static) -> ListenerKey {
        self.listeners
            .try_borrow_mut()
            .expect("add_listener borrow_mut")
            .insert(Rc::new(listener))
    }

    pub(crate) fn remove_listener(&self, key: ListenerKey) -> bool {
        self.listeners
            .try_borrow_mut()
            .expect("remove_listener borrow_mut")
            .remove(key)
            .is_some()
    }

    /// Calls every listener, or defers to the end of the outermost batch.
    pub(crate) fn notify(&self) {
        if self.batch_depth.get() > 0 {
            self.dirty.set(true);
            return;
        }

        // Listeners may add or remove listeners.
        let listeners: Vec<_> = self
            .listeners
            .try_borrow()
            .expect("notify borrow")
            .values()
            .cloned()
            .collect();
        for listener in listeners {
            listener();
        }
    }

    pub(crate) fn batch<R>(&self, func: impl FnOnce() -> R) -> R {
        struct BatchGuard<'a>(&'a Store);

        impl Drop for BatchGuard<'_> {
            fn drop(&mut self) {
                let depth = self.0.batch_depth.get() - 1;
                self.0.batch_depth.set(depth);
                if depth == 0 && self.0.dirty.replace(false) {
                    self.0.notify();
                }
            }
        }

        self.batch_depth.set(self.batch_depth.get() + 1);
        let _guard = BatchGuard(self);
        func()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counting_store() -> (Store, Rc<Cell<u32>>) {
        let store = Store::new();
        let count = Rc::new(Cell::new(0));
        store.add_listener({
            let count = count.clone();
            move || count.set(count.get() + 1)
        });
        (store, count)
    }

    #[test]
    fn batch_coalesces_notifications() {
        let (store, count) = counting_store();

        store.batch(|| {
            store.notify();
            store.batch(|| store.notify());
            store.notify();
        });
        assert_eq!(count.get(), 1);

        store.batch(|| {});
        assert_eq!(count.get(), 1);

        store.notify();
        assert_eq!(count.get(), 2);
    }

    #[test]
    fn removed_listeners_are_not_called() {
        let store = Store::new();
        let count = Rc::new(Cell::new(0));
        let key = store.add_listener({
            let count = count.clone();
            move || count.set(count.get() + 1)
        });

        assert!(store.remove_listener(key));
        assert!(!store.remove_listener(key));
        store.notify();
        assert_eq!(count.get(), 0);
    }
}
