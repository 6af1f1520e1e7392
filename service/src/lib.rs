use config::Config;
use log::info;
use platform_auth::cache::{Cache, EncryptedCache, MemoryCache};
use platform_auth::cipher::MessageCipher;
use platform_auth::credential::{AuthorizerAccessToken, CredentialStore};
use platform_auth::error::{token_error, Error, TokenErrorKind};
use platform_auth::http::{CredentialedClient, ReqwestTransport, Transport};
use platform_auth::oauth::OAuthClient;
use platform_auth::ticket::{JsApiTicket, VerifyTicket};
use platform_auth::webhook::WebhookServer;
use secrecy::SecretString;
use std::sync::Arc;

pub mod config;
pub mod logging;

// Service-level state holding every collaborator, assembled once at start-up.
// Needs to implement Clone to be able to be passed into Router as State
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub cache: Arc<dyn Cache>,
    pub transport: Arc<dyn Transport>,
    pub credential_store: Arc<CredentialStore>,
    pub client: Arc<CredentialedClient>,
    pub oauth: Arc<OAuthClient>,
    pub js_api_ticket: Arc<JsApiTicket>,
    pub webhook_server: Arc<WebhookServer>,
}

impl AppState {
    pub fn new(app_config: Config) -> Result<Self, Error> {
        let client_key = app_config
            .client_key()
            .ok_or_else(|| token_error(TokenErrorKind::Invalid, "No client key configured"))?
            .to_string();
        let client_secret = app_config
            .client_secret()
            .ok_or_else(|| token_error(TokenErrorKind::Invalid, "No client secret configured"))?
            .to_string();

        let cache = init_cache(&app_config)?;

        info!(
            "Platform client config: base_uri={}, timeout={}s, retry_enabled={}, max_retries={}",
            app_config.api_base_uri,
            app_config.http_timeout_secs,
            app_config.retry_enabled,
            app_config.retry_max_attempts,
        );
        let transport: Arc<dyn Transport> = Arc::new(
            ReqwestTransport::builder()
                .with_base_uri(&app_config.api_base_uri)
                .with_timeout(app_config.http_timeout())
                .build()?,
        );

        let credential_store = Arc::new(
            CredentialStore::new(
                &client_key,
                SecretString::new(client_secret.clone()),
                cache.clone(),
                transport.clone(),
            )
            .with_token_path(&app_config.token_path),
        );

        let client = Arc::new(
            CredentialedClient::new(transport.clone())
                .with_credential(credential_store.clone())
                .with_retry_policy(app_config.retry_policy())
                .with_throw_on_failure(app_config.throw_on_failure),
        );

        let oauth = Arc::new(
            OAuthClient::new(
                &client_key,
                SecretString::new(client_secret),
                transport.clone(),
            )
            .with_token_path(&app_config.token_path),
        );

        let js_api_ticket = Arc::new(JsApiTicket::new(&client_key, cache.clone(), client.clone()));

        let mut state = Self {
            config: app_config,
            cache,
            transport,
            credential_store,
            client,
            oauth,
            js_api_ticket,
            webhook_server: Arc::new(WebhookServer::default()),
        };
        state.webhook_server = Arc::new(state.build_webhook_server()?);
        Ok(state)
    }

    /// A webhook server with the configured cipher and the default verify
    /// ticket handler. Register further handlers on it, then install it with
    /// [`AppState::with_webhook_server`].
    pub fn build_webhook_server(&self) -> Result<WebhookServer, Error> {
        let cipher = match (self.config.webhook_token(), self.config.webhook_aes_key()) {
            (Some(token), Some(aes_key)) => Some(MessageCipher::new(
                token,
                aes_key,
                self.config.receiver_identity().map(str::to_string),
            )?),
            _ => None,
        };

        let mut server = WebhookServer::new(cipher);
        server.with_default_verify_ticket_handler(self.verify_ticket());
        Ok(server)
    }

    pub fn with_webhook_server(mut self, server: WebhookServer) -> Self {
        self.webhook_server = Arc::new(server);
        self
    }

    pub fn client_key(&self) -> &str {
        self.credential_store.client_key()
    }

    pub fn verify_ticket(&self) -> VerifyTicket {
        VerifyTicket::new(self.client_key(), self.cache.clone())
    }

    /// A client acting on behalf of an authorizing user. Expired user tokens
    /// are refreshed through the OAuth refresh grant.
    pub fn authorizer_client(&self, token: AuthorizerAccessToken) -> CredentialedClient {
        CredentialedClient::new(self.transport.clone())
            .with_credential(Arc::new(token.with_oauth(self.oauth.clone())))
            .with_retry_policy(self.config.retry_policy())
            .with_throw_on_failure(self.config.throw_on_failure)
    }
}

fn init_cache(config: &Config) -> Result<Arc<dyn Cache>, Error> {
    let memory: Arc<dyn Cache> = Arc::new(MemoryCache::new());
    match config.cache_encryption_key() {
        Some(key_hex) => {
            info!("Encrypting cached credentials at rest");
            Ok(Arc::new(EncryptedCache::new(memory, key_hex)?))
        }
        None => Ok(memory),
    }
}
