//! Buffered HTTP response and the default failure checks.

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::Error;

/// Fully buffered response. Header names are lowercased.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers
            .insert(name.to_ascii_lowercase(), value.to_string());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, Error> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// The body as a JSON value, or `None` when it is not JSON.
    pub fn json_value(&self) -> Option<Value> {
        serde_json::from_slice(&self.body).ok()
    }

    /// Whether the body is textual (JSON, XML or plain text).
    ///
    /// A response without a content type is treated as text.
    pub fn is_text_like(&self) -> bool {
        match self.header("content-type") {
            None => true,
            Some(content_type) => {
                let content_type = content_type.to_ascii_lowercase();
                content_type.starts_with("text/")
                    || content_type.contains("json")
                    || content_type.contains("xml")
            }
        }
    }
}

/// Default token-expiry check: the platform reports `42001` with an
/// `access_token expired` message.
pub fn default_is_expired(body: &[u8]) -> bool {
    let text = String::from_utf8_lossy(body);
    text.contains("42001") && text.contains("access_token expired")
}

/// Default failure check.
///
/// Textual bodies fail when they carry a non-zero `errcode` or an
/// `error.code` other than `"ok"`. Anything else fails on status >= 400.
pub fn default_is_failure(response: &HttpResponse) -> bool {
    if response.is_text_like() {
        if let Some(value) = response.json_value() {
            if envelope_reports_error(&value) {
                return true;
            }
        }
    }
    response.status >= 400
}

fn envelope_reports_error(value: &Value) -> bool {
    let errcode_set = match value.get("errcode") {
        Some(Value::Number(code)) => code.as_i64() != Some(0),
        Some(Value::String(code)) => code != "0",
        _ => false,
    };

    let error_code_set = value
        .get("error")
        .and_then(|error| error.get("code"))
        .is_some_and(|code| !code.is_null() && code.as_str() != Some("ok"));

    errcode_set || error_code_set
}
