//! JS-SDK ticket and front-end config signing.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::cache::{get_readable, Cache};
use crate::cipher::random_nonce;
use crate::credential::de_seconds;
use crate::error::{token_fetch_error, Error};
use crate::http::CredentialedClient;
use crate::signature::SignatureCodec;

/// Path of the ticket endpoint, relative to the API base URI.
pub const TICKET_PATH: &str = "/cgi-bin/ticket/getticket";

#[derive(Deserialize)]
struct TicketResponse {
    #[serde(default)]
    ticket: String,
    #[serde(default, deserialize_with = "de_seconds")]
    expires_in: u64,
}

/// Signed configuration for the front-end SDK.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigSignature {
    pub url: String,
    pub nonce_str: String,
    pub timestamp: i64,
    pub app_id: String,
    pub signature: String,
}

/// Cached JS-SDK ticket, fetched with the application's credentials.
pub struct JsApiTicket {
    client_key: String,
    key: Option<String>,
    cache: Arc<dyn Cache>,
    client: Arc<CredentialedClient>,
    codec: SignatureCodec,
}

impl JsApiTicket {
    pub fn new(client_key: &str, cache: Arc<dyn Cache>, client: Arc<CredentialedClient>) -> Self {
        Self {
            client_key: client_key.to_string(),
            key: None,
            cache,
            client,
            codec: SignatureCodec::default(),
        }
    }

    pub fn with_key(mut self, key: &str) -> Self {
        self.key = Some(key.to_string());
        self
    }

    pub fn key(&self) -> String {
        self.key
            .clone()
            .unwrap_or_else(|| format!("official_account.jsapi_ticket.{}", self.client_key))
    }

    /// Cached ticket, fetching a new one on a miss.
    pub async fn get_ticket(&self) -> Result<String, Error> {
        let cached = get_readable(self.cache.as_ref(), &self.key())
            .await?
            .and_then(|bytes| String::from_utf8(bytes).ok())
            .filter(|ticket| !ticket.is_empty());

        match cached {
            Some(ticket) => Ok(ticket),
            None => self.refresh_ticket().await,
        }
    }

    /// Fetch a new ticket and cache it for its reported lifetime.
    pub async fn refresh_ticket(&self) -> Result<String, Error> {
        let response = self
            .client
            .get(TICKET_PATH, &[("type", "jsapi")])
            .await?;

        let parsed = response
            .json::<TicketResponse>()
            .ok()
            .filter(|parsed| !parsed.ticket.is_empty())
            .ok_or_else(|| token_fetch_error(response.status, &response.body))?;

        self.cache
            .set(
                &self.key(),
                parsed.ticket.as_bytes().to_vec(),
                Duration::from_secs(parsed.expires_in),
            )
            .await?;

        debug!("Refreshed JS-SDK ticket for {}", self.client_key);
        Ok(parsed.ticket)
    }

    /// Sign `url` for the front-end SDK.
    pub async fn config_signature(
        &self,
        url: &str,
        nonce: &str,
        timestamp: i64,
    ) -> Result<ConfigSignature, Error> {
        let ticket = self.get_ticket().await?;
        let timestamp_text = timestamp.to_string();
        let signature = self.codec.sign_fields(&[
            ("jsapi_ticket", ticket.as_str()),
            ("noncestr", nonce),
            ("timestamp", timestamp_text.as_str()),
            ("url", url),
        ]);

        Ok(ConfigSignature {
            url: url.to_string(),
            nonce_str: nonce.to_string(),
            timestamp,
            app_id: self.client_key.clone(),
            signature,
        })
    }

    /// Full SDK configuration object with a fresh nonce and timestamp.
    pub async fn build_js_sdk_config(
        &self,
        url: &str,
        js_api_list: &[&str],
        open_tag_list: &[&str],
        debug: bool,
    ) -> Result<Value, Error> {
        let signature = self
            .config_signature(url, &random_nonce(), Utc::now().timestamp())
            .await?;

        let mut config = serde_json::to_value(signature)?;
        if let Value::Object(object) = &mut config {
            object.insert("jsApiList".to_string(), Value::from(js_api_list.to_vec()));
            object.insert("openTagList".to_string(), Value::from(open_tag_list.to_vec()));
            object.insert("debug".to_string(), Value::Bool(debug));
        }
        Ok(config)
    }
}
