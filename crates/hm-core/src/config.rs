//! Persisted configuration record
//!
//! The record is stored as a single JSON value under [`STORAGE_KEY`]. There is
//! no version field: loading coerces each top-level field on its own and falls
//! back to the built-in default for anything missing or malformed.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Storage key of the configuration record.
pub const STORAGE_KEY: &str = "headerModifierState";

// =============================================================================
// Rule Identity
// =============================================================================

/// Opaque rule identifier, used by editors to address a rule.
///
/// Generated once at creation and never derived from rule content. The engine
/// itself ignores it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleId(String);

impl RuleId {
    /// Random hex followed by the creation timestamp in hex.
    pub fn generate(now_ms: u64) -> Self {
        let random = uuid::Uuid::new_v4().as_u128() as u64;
        Self(format!("{:x}{:x}", random, now_ms))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RuleId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for RuleId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Rule
// =============================================================================

/// A single header override.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub id: RuleId,
    pub enabled: bool,
    /// Header name as typed by the user (untrimmed).
    pub name: String,
    /// Header value. An empty value is meaningful and never trimmed.
    pub value: String,
}

impl Rule {
    /// A fresh, enabled rule with empty name and value.
    pub fn new(id: RuleId) -> Self {
        Self {
            id,
            enabled: true,
            name: String::new(),
            value: String::new(),
        }
    }

    /// Trimmed header name if this rule takes part in application.
    ///
    /// Disabled rules and rules whose trimmed name is empty yield `None`.
    pub fn effective_name(&self) -> Option<&str> {
        if !self.enabled {
            return None;
        }
        let name = self.name.trim();
        if name.is_empty() {
            None
        } else {
            Some(name)
        }
    }

    /// Coerce one stored rule entry. Non-object entries are rejected.
    fn from_stored(entry: &Value) -> Option<Self> {
        let obj = entry.as_object()?;
        Some(Self {
            id: RuleId(obj.get("id").map(value_to_text).unwrap_or_default()),
            // Only a literal `true` enables a rule.
            enabled: matches!(obj.get("enabled"), Some(Value::Bool(true))),
            name: match obj.get("name") {
                Some(Value::String(name)) => name.clone(),
                _ => String::new(),
            },
            value: obj.get("value").map(value_to_text).unwrap_or_default(),
        })
    }
}

/// Textual form of a scalar JSON value; `null` becomes the empty string.
fn value_to_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// =============================================================================
// Configuration Record
// =============================================================================

/// The single persisted configuration unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Master switch; when off, requests pass through untouched.
    pub enabled: bool,
    /// Regular expression source restricting which URLs are rewritten.
    /// Empty means every URL.
    #[serde(rename = "urlRegex")]
    pub url_regex: String,
    /// Rules in application order.
    pub rules: Vec<Rule>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enabled: true,
            url_regex: String::new(),
            rules: Vec::new(),
        }
    }
}

impl Config {
    /// Build a record from whatever the store returned. Never fails.
    pub fn from_stored(stored: Option<&Value>) -> Self {
        let obj = match stored.and_then(Value::as_object) {
            Some(obj) => obj,
            None => return Self::default(),
        };

        let enabled = match obj.get("enabled") {
            Some(Value::Bool(enabled)) => *enabled,
            _ => true,
        };
        let url_regex = match obj.get("urlRegex") {
            Some(Value::String(pattern)) => pattern.clone(),
            _ => String::new(),
        };
        let rules = match obj.get("rules") {
            Some(Value::Array(entries)) => entries.iter().filter_map(Rule::from_stored).collect(),
            _ => Vec::new(),
        };

        Self {
            enabled,
            url_regex,
            rules,
        }
    }

    /// Persisted JSON shape of this record.
    pub fn to_value(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }

    pub fn rule(&self, id: &RuleId) -> Option<&Rule> {
        self.rules.iter().find(|rule| &rule.id == id)
    }

    pub fn rule_mut(&mut self, id: &RuleId) -> Option<&mut Rule> {
        self.rules.iter_mut().find(|rule| &rule.id == id)
    }

    /// Number of rules that currently take part in application.
    pub fn active_rule_count(&self) -> usize {
        self.rules.iter().filter(|rule| rule.effective_name().is_some()).count()
    }
}
