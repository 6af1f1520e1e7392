use clap::builder::TypedValueParser as _;
use clap::{ArgAction, Parser};
use dotenvy::dotenv;
use log::LevelFilter;
use platform_auth::credential::DEFAULT_TOKEN_PATH;
use platform_auth::http::{RetryPolicy, DEFAULT_BASE_URI};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

#[derive(Clone, Debug, PartialEq)]
pub enum RustEnv {
    Development,
    Production,
    Staging,
}

#[derive(Debug, PartialEq, Eq)]
pub struct RustEnvParseError;

impl FromStr for RustEnv {
    type Err = RustEnvParseError;
    fn from_str(level: &str) -> Result<RustEnv, Self::Err> {
        match level.to_lowercase().as_str() {
            "development" => Ok(RustEnv::Development),
            "production" => Ok(RustEnv::Production),
            "staging" => Ok(RustEnv::Staging),
            _ => Err(RustEnvParseError),
        }
    }
}

impl fmt::Display for RustEnv {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RustEnv::Development => write!(f, "development"),
            RustEnv::Production => write!(f, "production"),
            RustEnv::Staging => write!(f, "staging"),
        }
    }
}

#[derive(Clone, Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// The application's client key on the open platform.
    #[arg(long, env)]
    client_key: Option<String>,

    /// The application's client secret.
    #[arg(long, env)]
    client_secret: Option<String>,

    /// The token shared with the platform for webhook signatures.
    #[arg(long, env)]
    webhook_token: Option<String>,

    /// Base64 AES key (43 characters) for encrypted webhook deliveries.
    #[arg(long, env)]
    webhook_aes_key: Option<String>,

    /// Identity appended to encrypted webhook payloads. Defaults to the client key.
    #[arg(long, env)]
    receiver_identity: Option<String>,

    /// Hex encoded 32-byte key. When set, cached tokens and tickets are encrypted at rest.
    #[arg(long, env)]
    cache_encryption_key: Option<String>,

    /// The base URI of the platform API. Override in tests to point at a mock server.
    #[arg(long, env, default_value = DEFAULT_BASE_URI)]
    pub api_base_uri: String,

    /// Path of the token endpoint, relative to the API base URI.
    #[arg(long, env, default_value = DEFAULT_TOKEN_PATH)]
    pub token_path: String,

    /// Timeout in seconds for outbound API requests
    #[arg(long, env, default_value_t = 30)]
    pub http_timeout_secs: u64,

    /// Retry transient failures (429, 5xx, network errors) of outbound requests
    #[arg(long, env, default_value_t = true, action = ArgAction::Set)]
    pub retry_enabled: bool,

    /// Maximum number of retries after the first attempt
    #[arg(long, env, default_value_t = 3)]
    pub retry_max_attempts: u32,

    /// Delay in milliseconds before the first retry
    #[arg(long, env, default_value_t = 1000)]
    pub retry_base_delay_ms: u64,

    /// Factor applied to the delay after each retry
    #[arg(long, env, default_value_t = 2.0)]
    pub retry_multiplier: f64,

    /// Upper bound in seconds for any single retry delay
    #[arg(long, env, default_value_t = 60)]
    pub retry_max_delay_secs: u64,

    /// Turn API responses judged as failures into errors
    #[arg(long, env, default_value_t = true, action = ArgAction::Set)]
    pub throw_on_failure: bool,

    /// The host interface to listen for incoming connections
    #[arg(short, long, env, default_value = "127.0.0.1")]
    pub interface: Option<String>,

    /// The host TCP port to listen for incoming connections
    #[arg(short, long, env, default_value_t = 4000)]
    pub port: u16,

    /// Set the log level verbosity threshold (level) to control what gets displayed on console output
    #[arg(
        short,
        long,
        env,
        default_value_t = LevelFilter::Info,
        value_parser = clap::builder::PossibleValuesParser::new(["OFF", "ERROR", "WARN", "INFO", "DEBUG", "TRACE"])
            .map(|s| s.parse::<LevelFilter>().unwrap_or(LevelFilter::Info)),
        )]
    pub log_level_filter: LevelFilter,

    /// Set the Rust runtime environment to use.
    #[arg(
    short,
    long,
    env,
    default_value_t = RustEnv::Development,
    value_parser = clap::builder::PossibleValuesParser::new([
        "DEVELOPMENT", "PRODUCTION", "STAGING",
        "development", "production", "staging"
    ])
        .map(|s| s.parse::<RustEnv>().unwrap_or(RustEnv::Development)),
    )]
    pub runtime_env: RustEnv,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn new() -> Self {
        // Load .env file first
        dotenv().ok();
        // Then parse the command line parameters and flags
        Config::parse()
    }

    pub fn set_client_credentials(mut self, client_key: &str, client_secret: &str) -> Self {
        self.client_key = Some(client_key.to_string());
        self.client_secret = Some(client_secret.to_string());
        self
    }

    pub fn set_webhook_encryption(mut self, token: &str, aes_key: &str) -> Self {
        self.webhook_token = Some(token.to_string());
        self.webhook_aes_key = Some(aes_key.to_string());
        self
    }

    pub fn set_cache_encryption_key(mut self, key_hex: &str) -> Self {
        self.cache_encryption_key = Some(key_hex.to_string());
        self
    }

    pub fn set_api_base_uri(mut self, api_base_uri: &str) -> Self {
        self.api_base_uri = api_base_uri.to_string();
        self
    }

    pub fn client_key(&self) -> Option<&str> {
        self.client_key.as_deref()
    }

    pub fn client_secret(&self) -> Option<&str> {
        self.client_secret.as_deref()
    }

    pub fn webhook_token(&self) -> Option<&str> {
        self.webhook_token.as_deref()
    }

    pub fn webhook_aes_key(&self) -> Option<&str> {
        self.webhook_aes_key.as_deref()
    }

    /// Identity checked on decrypted webhook payloads, falling back to the client key.
    pub fn receiver_identity(&self) -> Option<&str> {
        self.receiver_identity
            .as_deref()
            .or(self.client_key.as_deref())
    }

    pub fn cache_encryption_key(&self) -> Option<&str> {
        self.cache_encryption_key.as_deref()
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// The retry policy for outbound requests, or a policy that never retries.
    pub fn retry_policy(&self) -> RetryPolicy {
        if !self.retry_enabled {
            return RetryPolicy::disabled();
        }

        RetryPolicy::new(self.retry_max_attempts)
            .with_base_delay(Duration::from_millis(self.retry_base_delay_ms))
            .with_multiplier(self.retry_multiplier)
            .with_max_delay(Duration::from_secs(self.retry_max_delay_secs))
    }

    pub fn runtime_env(&self) -> RustEnv {
        self.runtime_env.clone()
    }

    pub fn is_production(&self) -> bool {
        self.runtime_env() == RustEnv::Production
    }
}
