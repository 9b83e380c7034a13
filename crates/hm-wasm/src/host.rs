//! WebExtension host adapter
//!
//! Firefox exposes the extension API as `browser`, Chromium as `chrome`. The
//! namespace is resolved once in [`WebExtensionHost::detect`]; everything
//! after that talks to the resolved object.

use hm_core::host::{ChangeListener, HostPlatform, RequestHook};
use hm_core::{ConfigStore, InterceptedRequest, StorageArea, StorageChange, StoreError};
use js_sys::{Array, Function, Object, Promise, Reflect};
use serde_json::Value;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::JsFuture;

use crate::convert::{js_to_json, json_to_js, request_from_details, response_to_json};

fn host_error(err: JsValue) -> StoreError {
    StoreError::Host(err.as_string().unwrap_or_else(|| format!("{:?}", err)))
}

fn get_path(root: &JsValue, path: &[&str]) -> Result<JsValue, JsValue> {
    let mut current = root.clone();
    for segment in path {
        current = Reflect::get(&current, &JsValue::from_str(segment))?;
        if current.is_undefined() || current.is_null() {
            return Err(JsValue::from_str(&format!("Missing host API: {}", path.join("."))));
        }
    }
    Ok(current)
}

fn call_method(target: &JsValue, name: &str, args: &Array) -> Result<JsValue, JsValue> {
    let method: Function = Reflect::get(target, &JsValue::from_str(name))?.dyn_into()?;
    method.apply(target, args)
}

async fn await_promise(value: JsValue) -> Result<JsValue, JsValue> {
    let promise: Promise = value
        .dyn_into()
        .map_err(|_| JsValue::from_str("Host API did not return a promise"))?;
    JsFuture::from(promise).await
}

// =============================================================================
// Storage
// =============================================================================

/// `storage.local` of the resolved namespace.
pub struct ExtensionStorage {
    local: JsValue,
}

impl ExtensionStorage {
    pub fn new(api: &JsValue) -> Result<Self, JsValue> {
        Ok(Self {
            local: get_path(api, &["storage", "local"])?,
        })
    }
}

impl ConfigStore for ExtensionStorage {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let pending = call_method(&self.local, "get", &Array::of1(&JsValue::from_str(key)))
            .map_err(host_error)?;
        let items = await_promise(pending).await.map_err(host_error)?;
        let value = Reflect::get(&items, &JsValue::from_str(key)).map_err(host_error)?;
        js_to_json(&value).map_err(host_error)
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        let items = Object::new();
        Reflect::set(&items, &JsValue::from_str(key), &json_to_js(&value).map_err(host_error)?)
            .map_err(host_error)?;
        let pending = call_method(&self.local, "set", &Array::of1(&items)).map_err(host_error)?;
        await_promise(pending).await.map_err(host_error)?;
        Ok(())
    }
}

// =============================================================================
// Host
// =============================================================================

pub struct WebExtensionHost {
    api: JsValue,
    storage: ExtensionStorage,
}

impl WebExtensionHost {
    /// Resolve the extension namespace: `browser` if present, else `chrome`.
    pub fn detect() -> Result<Self, JsValue> {
        let global = js_sys::global();
        let api = ["browser", "chrome"]
            .iter()
            .map(|name| Reflect::get(&global, &JsValue::from_str(name)))
            .filter_map(Result::ok)
            .find(|api| !api.is_undefined() && !api.is_null())
            .ok_or_else(|| JsValue::from_str("No WebExtension API namespace found"))?;
        let storage = ExtensionStorage::new(&api)?;
        Ok(Self { api, storage })
    }

    pub fn into_storage(self) -> ExtensionStorage {
        self.storage
    }

    fn add_listener(&self, event: &[&str], args: &Array) -> Result<(), JsValue> {
        let target = get_path(&self.api, event)?;
        call_method(&target, "addListener", args).map(|_| ())
    }
}

impl HostPlatform for WebExtensionHost {
    type Store = ExtensionStorage;

    fn store(&self) -> &ExtensionStorage {
        &self.storage
    }

    fn register_request_hook(&self, hook: RequestHook) {
        let listener = Closure::<dyn Fn(JsValue) -> JsValue>::new(move |details: JsValue| {
            let response = match js_to_json(&details) {
                Ok(Some(details)) => {
                    let (url, headers) = request_from_details(&details);
                    hook(&InterceptedRequest {
                        url: &url,
                        headers: &headers,
                    })
                }
                _ => return Object::new().into(),
            };
            json_to_js(&response_to_json(&response)).unwrap_or_else(|_| Object::new().into())
        });

        let filter = Object::new();
        let urls = Array::of1(&JsValue::from_str("<all_urls>"));
        let _ = Reflect::set(&filter, &"urls".into(), &urls);
        let extra = Array::of2(&"blocking".into(), &"requestHeaders".into());

        let args = Array::of3(listener.as_ref(), &filter, &extra);
        if let Err(e) = self.add_listener(&["webRequest", "onBeforeSendHeaders"], &args) {
            log::error!("Failed to register request hook: {:?}", e);
        }
        listener.forget();
    }

    fn subscribe_to_change(&self, listener: ChangeListener) {
        let callback = Closure::<dyn Fn(JsValue, JsValue)>::new(move |changes: JsValue, area: JsValue| {
            if !changes.is_object() {
                return;
            }
            let area = match area.as_string().as_deref().and_then(StorageArea::parse) {
                Some(area) => area,
                None => return,
            };
            for key in Object::keys(changes.unchecked_ref::<Object>()).iter() {
                let key = match key.as_string() {
                    Some(key) => key,
                    None => continue,
                };
                let entry = Reflect::get(&changes, &JsValue::from_str(&key))
                    .unwrap_or(JsValue::UNDEFINED);
                let field = |name: &str| {
                    Reflect::get(&entry, &JsValue::from_str(name))
                        .ok()
                        .and_then(|value| js_to_json(&value).ok().flatten())
                };
                listener(&StorageChange {
                    old_value: field("oldValue"),
                    new_value: field("newValue"),
                    key,
                    area,
                });
            }
        });

        let args = Array::of1(callback.as_ref());
        if let Err(e) = self.add_listener(&["storage", "onChanged"], &args) {
            log::error!("Failed to subscribe to storage changes: {:?}", e);
        }
        callback.forget();
    }
}
