//! Interception host abstraction
//!
//! A host supplies three capabilities: a persistence facility, a request hook
//! registration and a storage change subscription. A concrete adapter is
//! picked once at startup; [`start_enforcement`] wires the enforcement state
//! into whichever adapter it is given.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use serde_json::Value;

use crate::config::STORAGE_KEY;
use crate::engine::{EngineOptions, Header};
use crate::state::{EnforcementState, HookResponse, InterceptedRequest};
use crate::store::{ConfigStore, StorageArea, StorageChange, StoreError};

pub type RequestHook = Box<dyn Fn(&InterceptedRequest<'_>) -> HookResponse>;
pub type ChangeListener = Box<dyn Fn(&StorageChange)>;

pub trait HostPlatform {
    type Store: ConfigStore;

    fn store(&self) -> &Self::Store;

    /// Register a hook invoked synchronously before each request is sent.
    fn register_request_hook(&self, hook: RequestHook);

    /// Subscribe to storage change events, delivered in write order.
    fn subscribe_to_change(&self, listener: ChangeListener);
}

/// Start the enforcement context on `host`.
///
/// The hook and the change subscription are registered before the initial
/// read, so requests flow under the built-in default while loading and no
/// change is missed. A failed read leaves the default in place.
pub async fn start_enforcement<H: HostPlatform>(
    host: &H,
    options: EngineOptions,
) -> Rc<RefCell<EnforcementState>> {
    let state = Rc::new(RefCell::new(EnforcementState::with_options(options)));

    let hook_state = Rc::clone(&state);
    host.register_request_hook(Box::new(move |request: &InterceptedRequest<'_>| {
        // The borrow ends before rewriting: a trap mid-rewrite must not leave
        // the state borrowed for the change listener.
        let active = match hook_state.try_borrow() {
            Ok(state) => state.active(),
            Err(_) => return HookResponse::NoChange,
        };
        active.on_before_send_headers(request)
    }));

    let change_state = Rc::clone(&state);
    host.subscribe_to_change(Box::new(move |change: &StorageChange| {
        match change_state.try_borrow_mut() {
            Ok(mut state) => {
                state.on_storage_change(change);
            }
            Err(_) => log::warn!("Dropped storage change for {:?}: state busy", change.key),
        }
    }));

    let stored = match host.store().get(STORAGE_KEY).await {
        Ok(stored) => stored,
        Err(e) => {
            log::warn!("Failed to load configuration, using defaults: {}", e);
            None
        }
    };
    state.borrow_mut().load(stored.as_ref());

    state
}

// =============================================================================
// In-process Host
// =============================================================================

/// In-memory store. Writes notify subscribers synchronously, in write order.
#[derive(Default)]
pub struct MemoryStore {
    values: RefCell<HashMap<String, Value>>,
    listeners: RefCell<Vec<ChangeListener>>,
    fail_writes: Cell<bool>,
}

impl MemoryStore {
    pub fn with_value(key: &str, value: Value) -> Self {
        let store = Self::default();
        store.values.borrow_mut().insert(key.to_string(), value);
        store
    }

    /// Make subsequent writes fail, as a full or revoked store would.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.set(fail);
    }

    pub fn subscribe(&self, listener: ChangeListener) {
        self.listeners.borrow_mut().push(listener);
    }

    /// Deliver a change event to every subscriber without touching stored values.
    pub fn emit(&self, change: &StorageChange) {
        for listener in self.listeners.borrow().iter() {
            listener(change);
        }
    }

    pub fn snapshot(&self, key: &str) -> Option<Value> {
        self.values.borrow().get(key).cloned()
    }
}

impl ConfigStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.snapshot(key))
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        if self.fail_writes.get() {
            return Err(StoreError::Unavailable("writes disabled".to_string()));
        }
        let old_value = self
            .values
            .borrow_mut()
            .insert(key.to_string(), value.clone());
        self.emit(&StorageChange {
            key: key.to_string(),
            old_value,
            new_value: Some(value),
            area: StorageArea::Local,
        });
        Ok(())
    }
}

/// In-process host used by the CLI simulator and tests.
#[derive(Default)]
pub struct MemoryHost {
    store: MemoryStore,
    hooks: RefCell<Vec<RequestHook>>,
}

impl MemoryHost {
    pub fn new(store: MemoryStore) -> Self {
        Self {
            store,
            hooks: RefCell::new(Vec::new()),
        }
    }

    /// Run an outgoing request through every registered hook. Each hook sees
    /// the headers left by the previous one.
    pub fn dispatch(&self, url: &str, headers: &[Header]) -> HookResponse {
        let mut current: Option<Vec<Header>> = None;
        for hook in self.hooks.borrow().iter() {
            let response = hook(&InterceptedRequest {
                url,
                headers: current.as_deref().unwrap_or(headers),
            });
            if let HookResponse::Replace(next) = response {
                current = Some(next);
            }
        }
        match current {
            Some(headers) => HookResponse::Replace(headers),
            None => HookResponse::NoChange,
        }
    }
}

impl HostPlatform for MemoryHost {
    type Store = MemoryStore;

    fn store(&self) -> &MemoryStore {
        &self.store
    }

    fn register_request_hook(&self, hook: RequestHook) {
        self.hooks.borrow_mut().push(hook);
    }

    fn subscribe_to_change(&self, listener: ChangeListener) {
        self.store.subscribe(listener);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use serde_json::json;

    fn x_test_record(value: &str) -> Value {
        json!({
            "enabled": true,
            "urlRegex": "",
            "rules": [{ "id": "a", "enabled": true, "name": "X-Test", "value": value }]
        })
    }

    #[tokio::test]
    async fn test_start_loads_stored_record() {
        let host = MemoryHost::new(MemoryStore::with_value(STORAGE_KEY, x_test_record("1")));
        let state = start_enforcement(&host, EngineOptions::default()).await;

        assert_eq!(state.borrow().config().rules.len(), 1);
        assert_eq!(
            host.dispatch("https://example.com/", &[]),
            HookResponse::Replace(vec![Header::new("X-Test", "1")])
        );
    }

    #[tokio::test]
    async fn test_start_with_empty_store_uses_default() {
        let host = MemoryHost::default();
        let state = start_enforcement(&host, EngineOptions::default()).await;
        assert_eq!(state.borrow().config(), &Config::default());
        assert_eq!(host.dispatch("https://example.com/", &[]), HookResponse::NoChange);
    }

    #[tokio::test]
    async fn test_write_propagates_to_hook() {
        let host = MemoryHost::new(MemoryStore::with_value(STORAGE_KEY, x_test_record("1")));
        let _state = start_enforcement(&host, EngineOptions::default()).await;

        host.store().set(STORAGE_KEY, x_test_record("2")).await.unwrap();
        assert_eq!(
            host.dispatch("https://example.com/", &[Header::new("x-test", "old")]),
            HookResponse::Replace(vec![Header::new("x-test", "2")])
        );

        host.store()
            .set(STORAGE_KEY, json!({ "enabled": false, "rules": [] }))
            .await
            .unwrap();
        assert_eq!(host.dispatch("https://example.com/", &[]), HookResponse::NoChange);
    }

    #[tokio::test]
    async fn test_failed_write_is_not_observed() {
        let host = MemoryHost::new(MemoryStore::with_value(STORAGE_KEY, x_test_record("1")));
        let state = start_enforcement(&host, EngineOptions::default()).await;

        host.store().set_fail_writes(true);
        assert!(host.store().set(STORAGE_KEY, x_test_record("2")).await.is_err());
        assert_eq!(state.borrow().config().rules[0].value, "1");
    }

    #[tokio::test]
    async fn test_other_keys_do_not_disturb_state() {
        let host = MemoryHost::new(MemoryStore::with_value(STORAGE_KEY, x_test_record("1")));
        let state = start_enforcement(&host, EngineOptions::default()).await;

        host.store().set("unrelated", json!({ "enabled": false })).await.unwrap();
        assert!(state.borrow().config().enabled);
        assert_eq!(state.borrow().config().rules[0].value, "1");
    }

    #[test]
    fn test_dispatch_without_hooks() {
        let host = MemoryHost::default();
        assert_eq!(host.dispatch("https://example.com/", &[]), HookResponse::NoChange);
    }
}
