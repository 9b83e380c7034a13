//! Header Rule Application
//!
//! Pure transformation from (rules, incoming headers) to outgoing headers.
//! No I/O, no randomness, never fails.

use std::borrow::Cow;

use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};

use crate::config::Rule;

/// Conditional request validators. An empty override for one of these removes
/// the header instead of sending an empty value, because hosts manage them
/// through their cache layer and will not reliably send them empty.
pub const REMOVE_ON_EMPTY: [&str; 5] = [
    "if-none-match",
    "if-modified-since",
    "if-match",
    "if-unmodified-since",
    "if-range",
];

// =============================================================================
// Headers
// =============================================================================

/// One request header as seen by the interception host.
///
/// Serializes with exactly one of `value` or `binaryValue`, as hosts expect.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct Header {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub value: String,
    /// Raw byte form some hosts use instead of `value`.
    #[serde(rename = "binaryValue", default)]
    pub binary_value: Option<Vec<u8>>,
}

impl Header {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            binary_value: None,
        }
    }
}

impl Serialize for Header {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut entry = serializer.serialize_struct("Header", 2)?;
        entry.serialize_field("name", &self.name)?;
        match &self.binary_value {
            Some(bytes) => entry.serialize_field("binaryValue", bytes)?,
            None => entry.serialize_field("value", &self.value)?,
        }
        entry.end()
    }
}

// =============================================================================
// Options
// =============================================================================

/// What to send when a rule's value is empty and the header is not in
/// [`REMOVE_ON_EMPTY`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmptyValuePolicy {
    /// Send a single space. Some hosts silently drop headers set to "".
    #[default]
    SingleSpace,
    /// Send the empty string as-is.
    SendEmpty,
}

impl EmptyValuePolicy {
    fn substitute(self) -> &'static str {
        match self {
            Self::SingleSpace => " ",
            Self::SendEmpty => "",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EngineOptions {
    pub empty_value: EmptyValuePolicy,
}

// =============================================================================
// Application
// =============================================================================

struct EffectiveRule<'r> {
    name: &'r str,
    lower_name: String,
    value: &'r str,
}

fn effective_rules(rules: &[Rule]) -> Vec<EffectiveRule<'_>> {
    rules
        .iter()
        .filter_map(|rule| {
            let name = rule.effective_name()?;
            Some(EffectiveRule {
                name,
                lower_name: name.to_ascii_lowercase(),
                value: rule.value.as_str(),
            })
        })
        .collect()
}

/// Apply `rules` to `headers` in list order.
///
/// Returns the input borrowed when no rule is in effect. Otherwise works on a
/// copy: for each rule, the first header whose name matches case-insensitively
/// is overwritten in place (keeping its original name casing), or a new header
/// is appended. Later rules with the same name therefore win.
pub fn apply_rules<'h>(
    rules: &[Rule],
    headers: &'h [Header],
    options: &EngineOptions,
) -> Cow<'h, [Header]> {
    let effective = effective_rules(rules);
    if effective.is_empty() {
        return Cow::Borrowed(headers);
    }

    let mut out = headers.to_vec();
    for rule in &effective {
        let idx = out
            .iter()
            .position(|h| h.name.eq_ignore_ascii_case(&rule.lower_name));

        let is_empty = rule.value.is_empty();
        if is_empty && REMOVE_ON_EMPTY.contains(&rule.lower_name.as_str()) {
            if let Some(idx) = idx {
                out.remove(idx);
            }
            continue;
        }

        let value_to_send = if is_empty {
            options.empty_value.substitute()
        } else {
            rule.value
        };

        match idx {
            Some(idx) => {
                let header = &mut out[idx];
                header.value = value_to_send.to_string();
                header.binary_value = None;
            }
            None => out.push(Header::new(rule.name, value_to_send)),
        }
    }

    Cow::Owned(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuleId;

    fn rule(name: &str, value: &str) -> Rule {
        Rule {
            id: RuleId::from(name),
            enabled: true,
            name: name.to_string(),
            value: value.to_string(),
        }
    }

    fn apply(rules: &[Rule], headers: &[Header]) -> Vec<Header> {
        apply_rules(rules, headers, &EngineOptions::default()).into_owned()
    }

    #[test]
    fn test_no_rules_is_identity() {
        let headers = vec![Header::new("Accept", "*/*"), Header::new("Host", "example.com")];
        let out = apply_rules(&[], &headers, &EngineOptions::default());
        assert!(matches!(out, Cow::Borrowed(_)));
        assert_eq!(out.as_ref(), headers.as_slice());
    }

    #[test]
    fn test_only_ineffective_rules_is_identity() {
        let mut disabled = rule("X-Test", "1");
        disabled.enabled = false;
        let blank = rule("   ", "1");

        let headers = vec![Header::new("Accept", "*/*")];
        let out = apply_rules(&[disabled, blank], &headers, &EngineOptions::default());
        assert!(matches!(out, Cow::Borrowed(_)));
    }

    #[test]
    fn test_appends_missing_header() {
        let headers = vec![Header::new("Accept", "*/*"), Header::new("Host", "example.com")];
        let out = apply(&[rule("X-Test", "1")], &headers);
        assert_eq!(
            out,
            vec![
                Header::new("Accept", "*/*"),
                Header::new("Host", "example.com"),
                Header::new("X-Test", "1"),
            ]
        );
    }

    #[test]
    fn test_overwrites_in_place_keeping_casing() {
        let headers = vec![
            Header::new("Accept", "*/*"),
            Header::new("x-test", "old"),
            Header::new("Host", "example.com"),
        ];
        let out = apply(&[rule("X-Test", "2")], &headers);
        assert_eq!(
            out,
            vec![
                Header::new("Accept", "*/*"),
                Header::new("x-test", "2"),
                Header::new("Host", "example.com"),
            ]
        );
    }

    #[test]
    fn test_input_not_mutated() {
        let headers = vec![Header::new("x-test", "old")];
        let _ = apply(&[rule("X-Test", "new")], &headers);
        assert_eq!(headers[0].value, "old");
    }

    #[test]
    fn test_remove_on_empty() {
        let headers = vec![
            Header::new("Accept", "*/*"),
            Header::new("If-None-Match", "\"abc\""),
            Header::new("if-modified-since", "Tue, 01 Jan 2030 00:00:00 GMT"),
        ];
        let out = apply(&[rule("If-None-Match", ""), rule("IF-MODIFIED-SINCE", "")], &headers);
        assert_eq!(out, vec![Header::new("Accept", "*/*")]);
    }

    #[test]
    fn test_remove_on_empty_absent_header_is_noop() {
        let headers = vec![Header::new("Accept", "*/*")];
        let out = apply(&[rule("If-Range", "")], &headers);
        assert_eq!(out, headers);
    }

    #[test]
    fn test_remove_on_empty_set_with_value_overwrites() {
        let headers = vec![Header::new("If-Match", "\"a\"")];
        let out = apply(&[rule("If-Match", "\"b\"")], &headers);
        assert_eq!(out, vec![Header::new("If-Match", "\"b\"")]);
    }

    #[test]
    fn test_empty_value_becomes_space() {
        let out = apply(&[rule("X-Empty", "")], &[]);
        assert_eq!(out, vec![Header::new("X-Empty", " ")]);
    }

    #[test]
    fn test_empty_value_send_empty_policy() {
        let options = EngineOptions {
            empty_value: EmptyValuePolicy::SendEmpty,
        };
        let out = apply_rules(&[rule("X-Empty", "")], &[], &options).into_owned();
        assert_eq!(out, vec![Header::new("X-Empty", "")]);
    }

    #[test]
    fn test_value_is_not_trimmed_but_name_is() {
        let out = apply(&[rule("  X-Pad  ", "  v  ")], &[]);
        assert_eq!(out, vec![Header::new("X-Pad", "  v  ")]);
    }

    #[test]
    fn test_disabled_rule_has_no_effect() {
        let mut disabled = rule("Accept", "text/html");
        disabled.enabled = false;
        let headers = vec![Header::new("Accept", "*/*")];
        let out = apply(&[disabled, rule("X-Other", "1")], &headers);
        assert_eq!(out, vec![Header::new("Accept", "*/*"), Header::new("X-Other", "1")]);
    }

    #[test]
    fn test_duplicate_names_last_rule_wins() {
        let headers = vec![Header::new("Accept", "*/*")];
        let out = apply(&[rule("X-Dup", "first"), rule("x-dup", "second")], &headers);
        assert_eq!(out, vec![Header::new("Accept", "*/*"), Header::new("X-Dup", "second")]);
    }

    #[test]
    fn test_only_first_matching_header_is_touched() {
        let headers = vec![Header::new("X-Multi", "a"), Header::new("x-multi", "b")];
        let out = apply(&[rule("X-Multi", "z")], &headers);
        assert_eq!(out, vec![Header::new("X-Multi", "z"), Header::new("x-multi", "b")]);
    }

    #[test]
    fn test_overwrite_clears_binary_value() {
        let headers = vec![Header {
            name: "X-Bin".to_string(),
            value: String::new(),
            binary_value: Some(vec![1, 2, 3]),
        }];
        let out = apply(&[rule("X-Bin", "text")], &headers);
        assert_eq!(out, vec![Header::new("X-Bin", "text")]);
    }

    #[test]
    fn test_header_serializes_one_value_field() {
        let text = Header::new("X-Test", "1");
        assert_eq!(
            serde_json::to_value(&text).unwrap(),
            serde_json::json!({ "name": "X-Test", "value": "1" })
        );

        let binary: Header = serde_json::from_value(serde_json::json!({
            "name": "X-Bin",
            "binaryValue": [104, 105]
        }))
        .unwrap();
        assert_eq!(binary.value, "");
        assert_eq!(
            serde_json::to_value(&binary).unwrap(),
            serde_json::json!({ "name": "X-Bin", "binaryValue": [104, 105] })
        );
    }

    #[test]
    fn test_deterministic() {
        let rules = vec![rule("X-A", "1"), rule("Accept", ""), rule("If-Match", "")];
        let headers = vec![Header::new("accept", "*/*"), Header::new("If-Match", "x")];
        assert_eq!(apply(&rules, &headers), apply(&rules, &headers));
    }
}
