use thiserror::Error;

/// The tenant used when a request carries no tenant header and for the
/// bare `token` cookie.
pub const DEFAULT_TENANT: &str = "default";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub cookies: CookieConfig,
    pub node: NodeConfig,
    pub secrets: SecretConfig,
    pub tokens: TokenConfig,
}

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub bind_address: String,
    pub data_dir: String,
}

#[derive(Debug, Clone)]
pub struct SecretConfig {
    /// Signs long-lived refresh credentials.
    pub refresh_secret: String,
    /// Signs short-lived access/session credentials.
    pub session_secret: String,
}

#[derive(Debug, Clone, Default)]
pub struct CookieConfig {
    /// When set, cookies are issued cross-site: Domain=<base>, SameSite=None, Secure.
    pub base_domain: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TokenConfig {
    /// Ceiling on the API-token positive-auth cache TTL (seconds). Also the
    /// tombstone TTL after revocation.
    pub api_token_cache_ttl_seconds: u64,
    /// How long an "already rotated" marker stays visible (seconds).
    pub dedup_ttl_seconds: u64,
    /// Maximum API tokens a single user may hold.
    pub max_api_tokens_per_user: usize,
    /// Lifetime of a refresh credential (seconds).
    pub refresh_ttl_seconds: u64,
    /// Lifetime of a session cookie credential (seconds).
    pub session_ttl_seconds: u64,
    /// Age below which a presented cookie passes through without rotation (seconds).
    pub verification_window_seconds: u64,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            api_token_cache_ttl_seconds: 300,
            dedup_ttl_seconds: 60,
            max_api_tokens_per_user: 10,
            refresh_ttl_seconds: 30 * 86400,
            session_ttl_seconds: 7 * 86400,
            verification_window_seconds: 1800, // 30 minutes
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let bind_address =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

        let data_dir = std::env::var("DATA_DIR").unwrap_or_else(|_| "./data".to_string());

        let session_secret = std::env::var("SESSION_SECRET").unwrap_or_default();
        let refresh_secret = std::env::var("REFRESH_SECRET").unwrap_or_default();

        let base_domain = std::env::var("BASE_COOKIE_DOMAIN")
            .ok()
            .filter(|d| !d.trim().is_empty());

        let defaults = TokenConfig::default();
        let tokens = TokenConfig {
            api_token_cache_ttl_seconds: env_u64(
                "API_TOKEN_CACHE_TTL_SECONDS",
                defaults.api_token_cache_ttl_seconds,
            ),
            dedup_ttl_seconds: env_u64("DEDUP_TTL_SECONDS", defaults.dedup_ttl_seconds),
            max_api_tokens_per_user: env_u64(
                "MAX_API_TOKENS_PER_USER",
                defaults.max_api_tokens_per_user as u64,
            ) as usize,
            refresh_ttl_seconds: env_u64("REFRESH_TTL_SECONDS", defaults.refresh_ttl_seconds),
            session_ttl_seconds: env_u64("SESSION_TTL_SECONDS", defaults.session_ttl_seconds),
            verification_window_seconds: env_u64(
                "VERIFICATION_WINDOW_SECONDS",
                defaults.verification_window_seconds,
            ),
        };

        let config = Config {
            cookies: CookieConfig { base_domain },
            node: NodeConfig {
                bind_address,
                data_dir,
            },
            secrets: SecretConfig {
                refresh_secret,
                session_secret,
            },
            tokens,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.secrets.session_secret.is_empty() {
            return Err(ConfigError::ValidationError(
                "SESSION_SECRET must be set".to_string(),
            ));
        }
        if self.secrets.refresh_secret.is_empty() {
            return Err(ConfigError::ValidationError(
                "REFRESH_SECRET must be set".to_string(),
            ));
        }
        if self.secrets.session_secret == self.secrets.refresh_secret {
            tracing::warn!(
                "SESSION_SECRET and REFRESH_SECRET are identical. Access and refresh \
                 credentials become interchangeable; use distinct secrets."
            );
        }
        if self.tokens.session_ttl_seconds == 0 || self.tokens.refresh_ttl_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "token TTLs must be greater than 0".to_string(),
            ));
        }
        if self.tokens.verification_window_seconds >= self.tokens.session_ttl_seconds {
            tracing::warn!(
                "Verification window ({}s) is not shorter than the session TTL ({}s); \
                 cookies will expire before they are ever rotated.",
                self.tokens.verification_window_seconds,
                self.tokens.session_ttl_seconds
            );
        }
        Ok(())
    }
}

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}
