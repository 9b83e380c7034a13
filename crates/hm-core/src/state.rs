//! Enforcement state
//!
//! The long-lived view of the configuration record used by the request hook.
//! Lifecycle: [`EnforcementState::new`] (built-in default) ->
//! [`EnforcementState::load`] -> [`EnforcementState::on_storage_change`] for
//! every later write. Each transition builds a new [`ActiveRecord`] with its
//! own compiled URL filter, so a request always sees exactly one record.

use std::borrow::Cow;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use regex::Regex;
use serde_json::Value;

use crate::config::{Config, STORAGE_KEY};
use crate::engine::{apply_rules, EngineOptions, Header};
use crate::filter;
use crate::store::StorageChange;

/// Request as handed over by the interception host.
#[derive(Debug, Clone, Copy)]
pub struct InterceptedRequest<'a> {
    pub url: &'a str,
    pub headers: &'a [Header],
}

/// What the hook hands back to the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookResponse {
    /// Send the request with its original headers.
    NoChange,
    /// Send the request with this full replacement header list.
    Replace(Vec<Header>),
}

/// One record as the request hook sees it: configuration, compiled URL
/// filter and engine options. Immutable once built.
pub struct ActiveRecord {
    config: Config,
    url_filter: Option<Regex>,
    options: EngineOptions,
}

impl ActiveRecord {
    fn new(config: Config, options: EngineOptions) -> Self {
        Self {
            url_filter: filter::compile(&config.url_regex),
            config,
            options,
        }
    }

    /// Per-request hook. Reads in-memory state only.
    ///
    /// A panic while rewriting is caught and the request passes through
    /// unmodified. On `wasm32-unknown-unknown` panics trap instead of
    /// unwinding, so callers must not hold a `RefCell` borrow across this call.
    pub fn on_before_send_headers(&self, request: &InterceptedRequest<'_>) -> HookResponse {
        panic::catch_unwind(AssertUnwindSafe(|| self.rewrite(request))).unwrap_or_else(|_| {
            log::warn!("Header rewrite panicked for {}, passing request through", request.url);
            HookResponse::NoChange
        })
    }

    fn rewrite(&self, request: &InterceptedRequest<'_>) -> HookResponse {
        if !self.config.enabled {
            return HookResponse::NoChange;
        }
        if !filter::matches(self.url_filter.as_ref(), request.url) {
            return HookResponse::NoChange;
        }
        match apply_rules(&self.config.rules, request.headers, &self.options) {
            Cow::Borrowed(_) => HookResponse::NoChange,
            Cow::Owned(headers) => HookResponse::Replace(headers),
        }
    }
}

pub struct EnforcementState {
    active: Rc<ActiveRecord>,
    options: EngineOptions,
    changes_seen: u64,
}

impl Default for EnforcementState {
    fn default() -> Self {
        Self::new()
    }
}

impl EnforcementState {
    /// State under the built-in default: enabled, no rules, all URLs.
    pub fn new() -> Self {
        Self::with_options(EngineOptions::default())
    }

    pub fn with_options(options: EngineOptions) -> Self {
        Self {
            active: Rc::new(ActiveRecord::new(Config::default(), options)),
            options,
            changes_seen: 0,
        }
    }

    pub fn config(&self) -> &Config {
        &self.active.config
    }

    /// Handle on the current record. Later transitions swap in a new record and
    /// leave this one untouched.
    pub fn active(&self) -> Rc<ActiveRecord> {
        Rc::clone(&self.active)
    }

    /// Whether a URL filter is currently in force.
    pub fn has_url_filter(&self) -> bool {
        self.active.url_filter.is_some()
    }

    /// Apply the result of the initial read.
    ///
    /// Ignored once a change notification has been observed, since that
    /// notification carries a newer record than the read. Returns whether the
    /// record was applied.
    pub fn load(&mut self, stored: Option<&Value>) -> bool {
        if self.changes_seen > 0 {
            log::debug!("Initial load superseded by {} change(s), ignoring", self.changes_seen);
            return false;
        }
        self.replace(Config::from_stored(stored));
        true
    }

    /// Handle one storage change event. Events for other keys or areas are
    /// ignored. Returns whether the record was replaced.
    pub fn on_storage_change(&mut self, change: &StorageChange) -> bool {
        if !change.concerns(STORAGE_KEY) {
            return false;
        }
        self.changes_seen += 1;
        self.replace(Config::from_stored(change.new_value.as_ref()));
        true
    }

    fn replace(&mut self, config: Config) {
        let active = ActiveRecord::new(config, self.options);
        log::debug!(
            "Configuration replaced: enabled={}, active rules={}, url filter={}",
            active.config.enabled,
            active.config.active_rule_count(),
            active.url_filter.is_some()
        );
        self.active = Rc::new(active);
    }

    /// Run the request hook against the current record.
    pub fn on_before_send_headers(&self, request: &InterceptedRequest<'_>) -> HookResponse {
        self.active.on_before_send_headers(request)
    }
}
