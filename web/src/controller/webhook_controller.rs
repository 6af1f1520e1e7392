//! Controller for deliveries from the open platform.
//!
//! The platform calls the same URL for the `echostr` handshake (GET) and for
//! event deliveries (POST); both go through the application's webhook server.

use std::collections::HashMap;

use crate::{AppState, Error};

use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use log::*;
use platform_auth::webhook::WebhookRequest;

/// GET|POST /webhook
pub async fn receive(
    State(app_state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
    body: String,
) -> Result<impl IntoResponse, Error> {
    debug!("Received webhook delivery ({} bytes)", body.len());

    let response = app_state
        .webhook_server
        .serve(WebhookRequest::new(query, body))
        .await?;

    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::OK);
    Ok((
        status,
        [(header::CONTENT_TYPE, response.content_type)],
        response.body,
    ))
}
