//! Header Modifier Core Library
//!
//! This crate provides the rule engine behind the header modifier extension.
//! It rewrites the request headers of outgoing browser requests according to a
//! user-maintained list of override rules, optionally restricted to URLs that
//! match a regular expression.
//!
//! # Architecture
//!
//! Two independent contexts share one persisted [`Config`] record:
//!
//! - The enforcement context ([`EnforcementState`]) is long-lived. It keeps a
//!   compiled view of the record and is invoked synchronously for every
//!   outgoing request. It never waits on storage.
//! - The editor context ([`Editor`]) is short-lived. It mutates a working copy
//!   and writes it back through a debounced save.
//!
//! The enforcement context learns about writes only through storage change
//! notifications and recompiles on each one.
//!
//! # Modules
//!
//! - `config`: Persisted configuration record and lenient loading
//! - `engine`: Header rule application
//! - `filter`: URL filter compilation and matching (fail-open)
//! - `state`: Enforcement state and request hook
//! - `store`: Persistence facility abstraction and change events
//! - `host`: Interception host abstraction and the in-process host
//! - `editor`: Editor mutation protocol with debounced saves

pub mod config;
pub mod editor;
pub mod engine;
pub mod filter;
pub mod host;
pub mod state;
pub mod store;

// Re-export commonly used types
pub use config::{Config, Rule, RuleId, STORAGE_KEY};
pub use editor::{Clock, Debouncer, Editor, RulePatch, SavePoll, SystemClock};
pub use engine::{apply_rules, EmptyValuePolicy, EngineOptions, Header};
pub use filter::FilterError;
pub use host::{start_enforcement, HostPlatform, MemoryHost};
pub use state::{ActiveRecord, EnforcementState, HookResponse, InterceptedRequest};
pub use store::{ConfigStore, StorageArea, StorageChange, StoreError};
