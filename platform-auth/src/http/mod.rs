//! Outbound HTTP: transport, retry policy and the credentialed client.

mod client;
mod credentialed;
mod presets;
mod response;
mod retry;
mod transport;

pub use client::{HttpClientConfig, ReqwestTransport, ReqwestTransportBuilder, DEFAULT_BASE_URI};
pub use credentialed::{CredentialedClient, ExpiryCheck, FailureJudge, PendingRequest};
pub use presets::{Presets, Staged};
pub use response::{default_is_expired, default_is_failure, HttpResponse};
pub use retry::{parse_retry_after, RetryDecision, RetryPolicy};
pub use transport::{Body, RequestOptions, Transport};
