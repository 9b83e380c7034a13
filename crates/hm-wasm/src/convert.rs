//! Conversions between host objects and core types
//!
//! JS values cross the boundary as JSON; everything after that is plain
//! `serde_json` so it can be tested natively.

use hm_core::{Header, HookResponse};
use js_sys::JSON;
use serde_json::{json, Value};
use wasm_bindgen::prelude::*;

/// Deep-copy a JS value into JSON. `undefined` and `null` become `None`.
pub fn js_to_json(value: &JsValue) -> Result<Option<Value>, JsValue> {
    if value.is_undefined() || value.is_null() {
        return Ok(None);
    }
    let text = JSON::stringify(value)?
        .as_string()
        .ok_or_else(|| JsValue::from_str("Value is not JSON-serializable"))?;
    serde_json::from_str(&text)
        .map(Some)
        .map_err(|e| JsValue::from_str(&format!("Invalid JSON from host: {}", e)))
}

pub fn json_to_js(value: &Value) -> Result<JsValue, JsValue> {
    let text = serde_json::to_string(value)
        .map_err(|e| JsValue::from_str(&format!("Failed to serialize: {}", e)))?;
    JSON::parse(&text)
}

/// URL and header list out of a `onBeforeSendHeaders` details object.
///
/// Header entries without a name are kept with an empty name so the
/// replacement list stays aligned with what the host sent.
pub fn request_from_details(details: &Value) -> (String, Vec<Header>) {
    let url = details
        .get("url")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let headers = details
        .get("requestHeaders")
        .and_then(Value::as_array)
        .map(|entries| entries.iter().filter_map(header_from_entry).collect())
        .unwrap_or_default();

    (url, headers)
}

fn header_from_entry(entry: &Value) -> Option<Header> {
    let obj = entry.as_object()?;
    let binary_value = obj.get("binaryValue").and_then(Value::as_array).map(|bytes| {
        bytes
            .iter()
            .filter_map(Value::as_u64)
            .map(|b| b as u8)
            .collect()
    });
    Some(Header {
        name: obj.get("name").and_then(Value::as_str).unwrap_or_default().to_string(),
        value: obj.get("value").and_then(Value::as_str).unwrap_or_default().to_string(),
        binary_value,
    })
}

/// Blocking response object for the host: `{}` or `{ requestHeaders }`.
pub fn response_to_json(response: &HookResponse) -> Value {
    match response {
        HookResponse::NoChange => json!({}),
        HookResponse::Replace(headers) => json!({ "requestHeaders": headers }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_from_details() {
        let details = json!({
            "url": "https://example.com/",
            "method": "GET",
            "requestHeaders": [
                { "name": "Accept", "value": "*/*" },
                { "name": "X-Bin", "binaryValue": [104, 105] },
                "junk"
            ]
        });
        let (url, headers) = request_from_details(&details);
        assert_eq!(url, "https://example.com/");
        assert_eq!(headers.len(), 2);
        assert_eq!(headers[0], Header::new("Accept", "*/*"));
        assert_eq!(headers[1].binary_value, Some(vec![104, 105]));
        assert_eq!(headers[1].value, "");
    }

    #[test]
    fn test_request_from_empty_details() {
        let (url, headers) = request_from_details(&json!({}));
        assert!(url.is_empty());
        assert!(headers.is_empty());
    }

    #[test]
    fn test_response_to_json() {
        assert_eq!(response_to_json(&HookResponse::NoChange), json!({}));

        let mut binary = Header::new("X-Bin", "");
        binary.binary_value = Some(vec![1]);
        let response = HookResponse::Replace(vec![Header::new("X-Test", "1"), binary]);
        assert_eq!(
            response_to_json(&response),
            json!({ "requestHeaders": [
                { "name": "X-Test", "value": "1" },
                { "name": "X-Bin", "binaryValue": [1] }
            ] })
        );
    }
}
