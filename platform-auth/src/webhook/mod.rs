//! Inbound webhook pipeline.
//!
//! A [`WebhookServer`] answers the platform's `echostr` handshake, verifies
//! and decrypts encrypted deliveries through a [`MessageCipher`], and passes
//! each [`InboundMessage`] through an ordered [`HandlerChain`].
//!
//! [`MessageCipher`]: crate::cipher::MessageCipher

mod chain;
mod message;
mod server;

pub use chain::{BoxFuture, EventPayload, FnHandler, Handler, HandlerChain, HandlerId, Next, OnEvent};
pub use message::InboundMessage;
pub use server::{
    ServerResponse, WebhookNext, WebhookRequest, WebhookResult, WebhookServer, EVENT_AUTHORIZED,
    EVENT_AUTHORIZE_UPDATED, EVENT_UNAUTHORIZED, EVENT_VERIFY_TICKET, EVENT_VIDEO_PUBLISH_COMPLETED,
    EVENT_VIDEO_UPLOAD_FAILED,
};

pub(crate) use message::de_timestamp;
