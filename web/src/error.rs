use std::error::Error as StdError;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use log::*;

use platform_auth::error::{
    CipherErrorKind, Error as PlatformError, ErrorKind, HttpErrorKind, WebhookErrorKind,
};

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug)]
pub struct Error(PlatformError);

impl StdError for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> core::result::Result<(), std::fmt::Error> {
        write!(fmt, "{self:?}")
    }
}

// List of possible StatusCode variants https://docs.rs/http/latest/http/status/struct.StatusCode.html#associatedconstant.UNPROCESSABLE_ENTITY
impl IntoResponse for Error {
    fn into_response(self) -> Response {
        warn!("Request failed: {}", self.0);

        match self.0.error_kind {
            ErrorKind::Webhook(webhook_error_kind) => match webhook_error_kind {
                WebhookErrorKind::InvalidSignature | WebhookErrorKind::IdentityMismatch => {
                    (StatusCode::UNAUTHORIZED, "UNAUTHORIZED").into_response()
                }
                WebhookErrorKind::InvalidPayload | WebhookErrorKind::MissingField => {
                    (StatusCode::BAD_REQUEST, "BAD REQUEST").into_response()
                }
            },
            ErrorKind::Cipher(cipher_error_kind) => match cipher_error_kind {
                CipherErrorKind::DecryptionFailed => {
                    (StatusCode::BAD_REQUEST, "BAD REQUEST").into_response()
                }
                CipherErrorKind::InvalidKey | CipherErrorKind::EncryptionFailed => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL SERVER ERROR").into_response()
                }
            },
            ErrorKind::Remote(_) => (StatusCode::BAD_GATEWAY, "BAD GATEWAY").into_response(),
            ErrorKind::Http(http_error_kind) => match http_error_kind {
                HttpErrorKind::Network | HttpErrorKind::RequestFailed => {
                    (StatusCode::BAD_GATEWAY, "BAD GATEWAY").into_response()
                }
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL SERVER ERROR").into_response(),
            },
            ErrorKind::Token(_) | ErrorKind::Cache(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL SERVER ERROR").into_response()
            }
        }
    }
}

impl<E> From<E> for Error
where
    E: Into<PlatformError>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
