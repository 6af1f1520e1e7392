//! Inbound webhook endpoint: handshake, decryption and event dispatch.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use super::chain::{BoxFuture, FnHandler, HandlerChain, HandlerId, Next, OnEvent};
use super::message::InboundMessage;
use crate::cipher::MessageCipher;
use crate::error::{webhook_error, Error, WebhookErrorKind};
use crate::ticket::VerifyTicket;

pub const EVENT_AUTHORIZED: &str = "authorized";
pub const EVENT_UNAUTHORIZED: &str = "authorization.removed";
pub const EVENT_AUTHORIZE_UPDATED: &str = "authorization.updated";
pub const EVENT_VIDEO_UPLOAD_FAILED: &str = "video.upload.failed";
pub const EVENT_VIDEO_PUBLISH_COMPLETED: &str = "video.publish.completed";
pub const EVENT_VERIFY_TICKET: &str = "component_verify_ticket";

const VERIFY_TICKET_FIELDS: [&str; 3] = ["ComponentVerifyTicket", "component_verify_ticket", "ticket"];

/// Result every webhook handler produces.
pub type WebhookResult = Result<ServerResponse, Error>;

/// Continuation type seen by webhook handlers.
pub type WebhookNext<'a> = Next<'a, InboundMessage, WebhookResult>;

/// The parts of an HTTP request the server looks at.
#[derive(Debug, Clone, Default)]
pub struct WebhookRequest {
    pub query: HashMap<String, String>,
    pub body: String,
}

impl WebhookRequest {
    pub fn new(query: HashMap<String, String>, body: impl Into<String>) -> Self {
        Self {
            query,
            body: body.into(),
        }
    }
}

/// Response to send back to the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerResponse {
    pub status: u16,
    pub content_type: String,
    pub body: String,
}

impl ServerResponse {
    pub fn new(status: u16, content_type: &str, body: impl Into<String>) -> Self {
        Self {
            status,
            content_type: content_type.to_string(),
            body: body.into(),
        }
    }

    /// 200 with a plain text body.
    pub fn text(body: impl Into<String>) -> Self {
        Self::new(200, "text/plain; charset=utf-8", body)
    }

    /// The acknowledgement the platform expects.
    pub fn success() -> Self {
        Self::text("success")
    }

    pub fn json(value: &Value) -> Self {
        Self::new(200, "application/json", value.to_string())
    }
}

/// Webhook endpoint for one application.
///
/// Register handlers before sharing the server; `serve` only needs `&self`.
pub struct WebhookServer {
    cipher: Option<MessageCipher>,
    chain: HandlerChain<InboundMessage, WebhookResult>,
    default_verify_ticket: Option<HandlerId>,
}

impl Default for WebhookServer {
    fn default() -> Self {
        Self::new(None)
    }
}

impl WebhookServer {
    /// Create a server. Without a cipher, encrypted deliveries are rejected.
    pub fn new(cipher: Option<MessageCipher>) -> Self {
        Self {
            cipher,
            chain: HandlerChain::new(),
            default_verify_ticket: None,
        }
    }

    pub fn cipher(&self) -> Option<&MessageCipher> {
        self.cipher.as_ref()
    }

    pub fn chain(&self) -> &HandlerChain<InboundMessage, WebhookResult> {
        &self.chain
    }

    /// Direct access to the chain for custom registrations.
    pub fn chain_mut(&mut self) -> &mut HandlerChain<InboundMessage, WebhookResult> {
        &mut self.chain
    }

    /// Handle one delivery.
    ///
    /// An `echostr` query parameter is echoed back verbatim. Otherwise the
    /// body is decoded (and decrypted when it carries `Encrypt`), then run
    /// through the handler chain. When every handler passes it on, the
    /// response is `success`.
    pub async fn serve(&self, request: WebhookRequest) -> WebhookResult {
        if let Some(echostr) = request.query.get("echostr").filter(|s| !s.is_empty()) {
            debug!("Answering webhook handshake");
            return Ok(ServerResponse::text(echostr.as_str()));
        }

        let message = self.decode(&request)?;
        debug!("Dispatching webhook event {:?}", message.event);

        self.chain
            .dispatch(message, |_| Ok(ServerResponse::success()))
            .await
    }

    fn decode(&self, request: &WebhookRequest) -> Result<InboundMessage, Error> {
        let outer = InboundMessage::parse(&request.body)?;
        let Some(ciphertext) = outer.get_str("Encrypt") else {
            return Ok(outer);
        };

        let cipher = self.cipher.as_ref().ok_or_else(|| {
            warn!("Received an encrypted webhook but no cipher is configured");
            webhook_error(
                WebhookErrorKind::InvalidPayload,
                "Encrypted message received without a configured cipher",
            )
        })?;

        let lookup = |body_key: &str, query_key: &str| -> Result<String, Error> {
            outer
                .get(body_key)
                .and_then(value_text)
                .or_else(|| request.query.get(query_key).cloned())
                .filter(|value| !value.is_empty())
                .ok_or_else(|| {
                    webhook_error(
                        WebhookErrorKind::MissingField,
                        &format!("Encrypted message has no \"{}\"", body_key),
                    )
                })
        };

        let signature = lookup("MsgSignature", "msg_signature")?;
        let nonce = lookup("Nonce", "nonce")?;
        let timestamp = lookup("TimeStamp", "timestamp")?;

        let plaintext = cipher.decrypt(ciphertext, &signature, &nonce, &timestamp)?;
        let mut message = InboundMessage::parse(&plaintext)?;
        message.signature = Some(signature);
        message.nonce = Some(nonce);
        message.timestamp = Some(timestamp);
        Ok(message)
    }

    /// Run `f` for messages whose event is `event`.
    pub fn handle_event<F>(&mut self, event: &str, f: F) -> HandlerId
    where
        F: for<'a> Fn(InboundMessage, WebhookNext<'a>) -> BoxFuture<'a, WebhookResult>
            + Send
            + Sync
            + 'static,
    {
        self.chain.append_handler(OnEvent::new(
            event,
            FnHandler::new::<InboundMessage, WebhookResult>(f),
        ))
    }

    pub fn handle_authorized<F>(&mut self, f: F) -> HandlerId
    where
        F: for<'a> Fn(InboundMessage, WebhookNext<'a>) -> BoxFuture<'a, WebhookResult>
            + Send
            + Sync
            + 'static,
    {
        self.handle_event(EVENT_AUTHORIZED, f)
    }

    pub fn handle_unauthorized<F>(&mut self, f: F) -> HandlerId
    where
        F: for<'a> Fn(InboundMessage, WebhookNext<'a>) -> BoxFuture<'a, WebhookResult>
            + Send
            + Sync
            + 'static,
    {
        self.handle_event(EVENT_UNAUTHORIZED, f)
    }

    pub fn handle_authorize_updated<F>(&mut self, f: F) -> HandlerId
    where
        F: for<'a> Fn(InboundMessage, WebhookNext<'a>) -> BoxFuture<'a, WebhookResult>
            + Send
            + Sync
            + 'static,
    {
        self.handle_event(EVENT_AUTHORIZE_UPDATED, f)
    }

    pub fn handle_video_upload_failed<F>(&mut self, f: F) -> HandlerId
    where
        F: for<'a> Fn(InboundMessage, WebhookNext<'a>) -> BoxFuture<'a, WebhookResult>
            + Send
            + Sync
            + 'static,
    {
        self.handle_event(EVENT_VIDEO_UPLOAD_FAILED, f)
    }

    pub fn handle_video_publish_completed<F>(&mut self, f: F) -> HandlerId
    where
        F: for<'a> Fn(InboundMessage, WebhookNext<'a>) -> BoxFuture<'a, WebhookResult>
            + Send
            + Sync
            + 'static,
    {
        self.handle_event(EVENT_VIDEO_PUBLISH_COMPLETED, f)
    }

    /// Handle verify-ticket pushes, replacing the default handler if one
    /// was installed.
    pub fn handle_verify_ticket_refreshed<F>(&mut self, f: F) -> HandlerId
    where
        F: for<'a> Fn(InboundMessage, WebhookNext<'a>) -> BoxFuture<'a, WebhookResult>
            + Send
            + Sync
            + 'static,
    {
        if let Some(id) = self.default_verify_ticket.take() {
            self.chain.remove(id);
        }
        self.handle_event(EVENT_VERIFY_TICKET, f)
    }

    /// Store pushed verify tickets in `ticket`, then acknowledge.
    pub fn with_default_verify_ticket_handler(&mut self, ticket: VerifyTicket) -> HandlerId {
        let ticket = Arc::new(ticket);
        let id = self.handle_verify_ticket_refreshed(move |message, next| {
            let ticket = ticket.clone();
            Box::pin(async move {
                let value = verify_ticket_of(&message).ok_or_else(|| {
                    webhook_error(
                        WebhookErrorKind::MissingField,
                        "Verify ticket message has no ticket",
                    )
                })?;
                ticket.set_ticket(&value).await?;
                next.run(message).await
            })
        });
        self.default_verify_ticket = Some(id);
        id
    }
}

fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

fn verify_ticket_of(message: &InboundMessage) -> Option<String> {
    let top_level = VERIFY_TICKET_FIELDS
        .iter()
        .find_map(|key| message.get_str(key).map(str::to_string));

    top_level.or_else(|| {
        let content = message.content()?;
        VERIFY_TICKET_FIELDS
            .iter()
            .find_map(|key| content.get(*key).and_then(Value::as_str).map(str::to_string))
    })
}
