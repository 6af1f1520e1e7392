//! Tickets: the platform-pushed verify ticket and the JS-SDK ticket.

mod js_api;
mod verify;

pub use js_api::{ConfigSignature, JsApiTicket, TICKET_PATH};
pub use verify::{VerifyTicket, VERIFY_TICKET_TTL};
