use crate::controller::{health_check_controller, webhook_controller};
use axum::{routing::get, Router};
use service::AppState;

pub fn define_routes(app_state: AppState) -> Router {
    Router::new()
        .merge(health_routes())
        .merge(webhook_routes(app_state))
}

fn health_routes() -> Router {
    Router::new().route("/health", get(health_check_controller::health_check))
}

fn webhook_routes(app_state: AppState) -> Router {
    Router::new()
        .route(
            "/webhook",
            get(webhook_controller::receive).post(webhook_controller::receive),
        )
        .with_state(app_state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Method, Request, StatusCode},
        response::Response,
    };
    use clap::Parser;
    use platform_auth::cipher::MessageCipher;
    use service::config::Config;
    use tower::ServiceExt;

    const AES_KEY: &str = "abcdefghijklmnopqrstuvwxyz0123456789ABCDEFG";
    const TOKEN: &str = "verify-token";

    fn app_state() -> AppState {
        let config = Config::try_parse_from(["web"])
            .unwrap()
            .set_client_credentials("ck", "secret")
            .set_webhook_encryption(TOKEN, AES_KEY);
        AppState::new(config).unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn post(body: String) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri("/webhook")
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health_check() {
        let app = define_routes(app_state());
        let request = Request::builder().uri("/health").body(Body::empty()).unwrap();

        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "healthy");
    }

    #[tokio::test]
    async fn test_echostr_handshake() {
        let app = define_routes(app_state());
        let request = Request::builder()
            .uri("/webhook?echostr=hello-123")
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "hello-123");
    }

    #[tokio::test]
    async fn test_encrypted_event_is_acknowledged() {
        let state = app_state();
        let app = define_routes(state.clone());

        let cipher = MessageCipher::new(TOKEN, AES_KEY, Some("ck".to_string())).unwrap();
        let envelope = cipher
            .encrypt(
                r#"{"event":"component_verify_ticket","ComponentVerifyTicket":"vt-9"}"#,
                None,
                None,
            )
            .unwrap();

        let response = app
            .oneshot(post(serde_json::to_string(&envelope).unwrap()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "success");
        assert_eq!(state.verify_ticket().get_ticket().await.unwrap(), "vt-9");
    }

    #[tokio::test]
    async fn test_tampered_delivery_is_unauthorized() {
        let app = define_routes(app_state());

        let cipher = MessageCipher::new(TOKEN, AES_KEY, Some("ck".to_string())).unwrap();
        let mut envelope = cipher.encrypt(r#"{"event":"authorized"}"#, None, None).unwrap();
        envelope.signature = "0".repeat(40);

        let response = app
            .oneshot(post(serde_json::to_string(&envelope).unwrap()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_malformed_body_is_bad_request() {
        let app = define_routes(app_state());

        let response = app.oneshot(post("not json".to_string())).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
