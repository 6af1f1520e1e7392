//! Inbound webhook message.

use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};

use super::chain::EventPayload;
use crate::error::{webhook_error, Error, WebhookErrorKind};

/// A decoded webhook message.
///
/// `raw_body` is the JSON text the fields were parsed from (the decrypted
/// plaintext for encrypted deliveries). `signature`, `nonce` and `timestamp`
/// are set when the delivery was signed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InboundMessage {
    pub raw_body: String,
    pub signature: Option<String>,
    pub nonce: Option<String>,
    pub timestamp: Option<String>,
    pub event: Option<String>,
    pub fields: Map<String, Value>,
}

impl InboundMessage {
    /// Parse a JSON object message.
    pub fn parse(raw_body: &str) -> Result<Self, Error> {
        let value: Value = serde_json::from_str(raw_body).map_err(|e| Error {
            source: Some(Box::new(e)),
            error_kind: crate::error::ErrorKind::Webhook(WebhookErrorKind::InvalidPayload),
        })?;

        let Value::Object(fields) = value else {
            return Err(webhook_error(
                WebhookErrorKind::InvalidPayload,
                "Webhook message is not a JSON object",
            ));
        };

        let event = fields
            .get("event")
            .and_then(Value::as_str)
            .map(str::to_string);

        Ok(Self {
            raw_body: raw_body.to_string(),
            event,
            fields,
            ..Self::default()
        })
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    /// Application the message was sent to.
    pub fn client_key(&self) -> Option<&str> {
        self.get_str("client_key")
    }

    /// The authorizing user.
    pub fn user_openid(&self) -> Option<&str> {
        self.get_str("user_openid")
    }

    /// Event details. The platform sends these as a JSON string, which is
    /// decoded here; an object is returned as is.
    pub fn content(&self) -> Option<Value> {
        match self.fields.get("content")? {
            Value::String(text) => serde_json::from_str(text).ok(),
            other => Some(other.clone()),
        }
    }

    /// A field that must be present.
    pub fn require(&self, key: &str) -> Result<&Value, Error> {
        self.get(key).ok_or_else(|| {
            webhook_error(
                WebhookErrorKind::MissingField,
                &format!("Webhook message has no \"{}\"", key),
            )
        })
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.fields.clone())
    }
}

impl EventPayload for InboundMessage {
    fn event(&self) -> Option<&str> {
        self.event.as_deref()
    }
}

/// Unix time given as an integer or a numeric string.
pub(crate) fn de_timestamp<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Timestamp {
        Number(i64),
        Text(String),
    }

    match Timestamp::deserialize(deserializer)? {
        Timestamp::Number(seconds) => Ok(seconds),
        Timestamp::Text(text) => text.trim().parse().map_err(serde::de::Error::custom),
    }
}
