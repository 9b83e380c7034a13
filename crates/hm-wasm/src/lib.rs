//! WebAssembly bindings for the header modifier extension
//!
//! The background script calls [`start_background`] once. The popup creates a
//! [`RuleEditor`] with [`RuleEditor::open`] and forwards its input events to it.
//!
//! Panics trap on `wasm32-unknown-unknown` rather than unwinding, so the
//! catch in the request hook does not apply here. The hook holds no borrow of
//! the enforcement state while rewriting, which keeps a trapped request from
//! blocking later storage changes.

mod convert;
mod host;
mod logger;

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use hm_core::editor::Editor;
use hm_core::{
    filter, Clock, Config, ConfigStore, EmptyValuePolicy, EngineOptions, RuleId, RulePatch,
    SavePoll, STORAGE_KEY,
};
use js_sys::{Function, Promise, Reflect};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::future_to_promise;

use crate::convert::json_to_js;
use crate::host::{ExtensionStorage, WebExtensionHost};

/// `Date.now()` clock.
#[derive(Debug, Clone, Copy, Default)]
struct JsClock;

impl Clock for JsClock {
    fn now_ms(&self) -> u64 {
        js_sys::Date::now() as u64
    }
}

fn parse_empty_value_policy(name: Option<&str>) -> Result<EmptyValuePolicy, JsValue> {
    match name {
        None | Some("space") => Ok(EmptyValuePolicy::SingleSpace),
        Some("empty") => Ok(EmptyValuePolicy::SendEmpty),
        Some(other) => Err(JsValue::from_str(&format!("Unknown empty value policy: {}", other))),
    }
}

// =============================================================================
// Background
// =============================================================================

/// Start the enforcement context: register the request hook and the storage
/// subscription, then load the stored record.
///
/// `empty_value` selects what an empty rule value sends: `"space"` (default)
/// or `"empty"`.
#[wasm_bindgen(js_name = startBackground)]
pub async fn start_background(
    empty_value: Option<String>,
    debug: Option<bool>,
) -> Result<(), JsValue> {
    logger::init(if debug.unwrap_or(false) {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Warn
    });

    let options = EngineOptions {
        empty_value: parse_empty_value_policy(empty_value.as_deref())?,
    };
    let host = WebExtensionHost::detect()?;
    // The registered listeners keep the state alive.
    let _state = hm_core::start_enforcement(&host, options).await;
    Ok(())
}

/// Validate a URL filter pattern. Returns the hint text, empty when valid.
#[wasm_bindgen(js_name = urlFilterHint)]
pub fn url_filter_hint(pattern: &str) -> String {
    match filter::validate(pattern) {
        Ok(()) => String::new(),
        Err(e) => e.to_string(),
    }
}

// =============================================================================
// Popup
// =============================================================================

/// Persist a record, logging and dropping any failure. The working copy in the
/// editor stays as it is either way.
async fn persist(storage: &ExtensionStorage, record: &Config) {
    let value = match record.to_value() {
        Ok(value) => value,
        Err(e) => {
            log::warn!("Failed to serialize configuration: {}", e);
            return;
        }
    };
    if let Err(e) = storage.set(STORAGE_KEY, value).await {
        log::warn!("Failed to save configuration: {}", e);
    }
}

fn record_to_js(record: &Config) -> Result<JsValue, JsValue> {
    let value = record
        .to_value()
        .map_err(|e| JsValue::from_str(&format!("Failed to serialize: {}", e)))?;
    json_to_js(&value)
}

/// State shared between the popup bindings and the save timer.
struct Session {
    editor: RefCell<Editor<JsClock>>,
    storage: ExtensionStorage,
    /// At most one save timer is armed at a time.
    timer_armed: Cell<bool>,
}

/// Arm the save timer to fire after `delay_ms`, unless one is already armed.
fn arm_save_timer(session: &Rc<Session>, delay_ms: u64) {
    if session.timer_armed.get() {
        return;
    }

    let fired = Rc::clone(session);
    let callback = Closure::once_into_js(move || {
        wasm_bindgen_futures::spawn_local(on_save_timer(fired));
    });

    let set_timeout = Reflect::get(&js_sys::global(), &JsValue::from_str("setTimeout"))
        .ok()
        .and_then(|f| f.dyn_into::<Function>().ok());
    match set_timeout {
        Some(set_timeout) => {
            let delay = JsValue::from_f64(delay_ms as f64);
            match set_timeout.call2(&JsValue::NULL, &callback, &delay) {
                Ok(_) => session.timer_armed.set(true),
                Err(e) => log::warn!("Failed to arm save timer: {:?}", e),
            }
        }
        None => log::warn!("setTimeout unavailable, changes are saved on flush only"),
    }
}

async fn on_save_timer(session: Rc<Session>) {
    session.timer_armed.set(false);
    let poll = session.editor.borrow_mut().poll_save();
    match poll {
        SavePoll::Write(record) => persist(&session.storage, &record).await,
        SavePoll::Wait(remaining) => arm_save_timer(&session, remaining),
        SavePoll::Idle => {}
    }
}

#[wasm_bindgen]
pub struct RuleEditor {
    session: Rc<Session>,
}

#[wasm_bindgen]
impl RuleEditor {
    /// Load the stored record into a new editor session.
    pub async fn open() -> Result<RuleEditor, JsValue> {
        logger::init(log::LevelFilter::Warn);
        let storage = WebExtensionHost::detect()?.into_storage();
        let editor = Editor::open(&storage, JsClock).await;
        Ok(Self {
            session: Rc::new(Session {
                editor: RefCell::new(editor),
                storage,
                timer_armed: Cell::new(false),
            }),
        })
    }

    /// Current working copy in its persisted shape.
    pub fn state(&self) -> Result<JsValue, JsValue> {
        record_to_js(self.session.editor.borrow().config())
    }

    /// Hint for the current filter text, empty when valid.
    #[wasm_bindgen(js_name = filterHint)]
    pub fn filter_hint(&self) -> String {
        match self.session.editor.borrow().filter_status() {
            Ok(()) => String::new(),
            Err(e) => e.to_string(),
        }
    }

    #[wasm_bindgen(js_name = setEnabled)]
    pub fn set_enabled(&self, enabled: bool) {
        self.session.editor.borrow_mut().set_enabled(enabled);
        self.schedule_save();
    }

    /// Returns the hint for the new filter text, empty when valid.
    #[wasm_bindgen(js_name = setUrlRegex)]
    pub fn set_url_regex(&self, pattern: String) -> String {
        let status = self.session.editor.borrow_mut().set_url_regex(pattern);
        self.schedule_save();
        match status {
            Ok(()) => String::new(),
            Err(e) => e.to_string(),
        }
    }

    /// Append an empty rule and return its id.
    #[wasm_bindgen(js_name = addRule)]
    pub fn add_rule(&self) -> String {
        let id = self.session.editor.borrow_mut().add_rule();
        self.schedule_save();
        id.to_string()
    }

    #[wasm_bindgen(js_name = setRuleName)]
    pub fn set_rule_name(&self, id: &str, name: String) -> bool {
        self.patch(
            id,
            RulePatch {
                name: Some(name),
                ..RulePatch::default()
            },
        )
    }

    #[wasm_bindgen(js_name = setRuleValue)]
    pub fn set_rule_value(&self, id: &str, value: String) -> bool {
        self.patch(
            id,
            RulePatch {
                value: Some(value),
                ..RulePatch::default()
            },
        )
    }

    #[wasm_bindgen(js_name = setRuleEnabled)]
    pub fn set_rule_enabled(&self, id: &str, enabled: bool) -> bool {
        let changed = self
            .session
            .editor
            .borrow_mut()
            .set_rule_enabled(&RuleId::from(id), enabled);
        self.schedule_save();
        changed
    }

    #[wasm_bindgen(js_name = deleteRule)]
    pub fn delete_rule(&self, id: &str) -> bool {
        let changed = self.session.editor.borrow_mut().delete_rule(&RuleId::from(id));
        self.schedule_save();
        changed
    }

    /// Write the built-in default immediately, bypassing the debounce.
    /// Resolves to the new working copy.
    pub fn reset(&self) -> Promise {
        let record = self.session.editor.borrow_mut().reset_record();
        let session = Rc::clone(&self.session);
        future_to_promise(async move {
            persist(&session.storage, &record).await;
            record_to_js(&record)
        })
    }

    /// Write any pending change now, e.g. when the popup is about to close.
    pub fn flush(&self) -> Promise {
        let record = self.session.editor.borrow_mut().take_pending_save();
        let session = Rc::clone(&self.session);
        future_to_promise(async move {
            let written = record.is_some();
            if let Some(record) = record {
                persist(&session.storage, &record).await;
            }
            Ok(JsValue::from_bool(written))
        })
    }
}

impl RuleEditor {
    fn patch(&self, id: &str, patch: RulePatch) -> bool {
        let changed = self
            .session
            .editor
            .borrow_mut()
            .update_rule(&RuleId::from(id), patch);
        self.schedule_save();
        changed
    }

    /// Make sure a timer covers the current debounce deadline. An armed timer
    /// that fires before a moved deadline re-arms itself for the remainder.
    fn schedule_save(&self) {
        let delay = self.session.editor.borrow().ms_until_save();
        if let Some(delay) = delay {
            arm_save_timer(&self.session, delay);
        }
    }
}
