use std::env;
use std::path::PathBuf;

use ed25519_dalek::SigningKey;
use thiserror::Error;

use licensegate_sdk::codec;

const MIN_ADMIN_KEY_LEN: usize = 32;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{0} is required")]
    Missing(&'static str),

    #[error("{name} is invalid: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Requests per minute for each route class.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    /// Activation, which creates machine bindings
    pub strict_rpm: u32,
    /// Validation and deactivation
    pub standard_rpm: u32,
    /// Config blobs
    pub relaxed_rpm: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            strict_rpm: 10,
            standard_rpm: 30,
            relaxed_rpm: 60,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TlsConfig {
    pub port: u16,
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

#[derive(Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub tls: Option<TlsConfig>,
    pub database_path: String,
    pub admin_key: String,
    pub cors_origins: Vec<String>,
    pub signing_key: SigningKey,
    pub rate_limit: RateLimitConfig,
    pub ready_max_rss_mb: u64,
    pub default_offline_grace_days: u32,
    pub dev_mode: bool,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("tls", &self.tls)
            .field("database_path", &self.database_path)
            .field("admin_key", &"<redacted>")
            .field("cors_origins", &self.cors_origins)
            .field("signing_key", &"<redacted>")
            .field("rate_limit", &self.rate_limit)
            .field("ready_max_rss_mb", &self.ready_max_rss_mb)
            .field("default_offline_grace_days", &self.default_offline_grace_days)
            .field("dev_mode", &self.dev_mode)
            .finish()
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let dev_mode = env::var("LICENSEGATE_ENV")
            .map(|v| v == "dev" || v == "development")
            .unwrap_or(false);

        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = parse_or("PORT", 3000u16)?;

        let admin_key = env::var("ADMIN_KEY").map_err(|_| ConfigError::Missing("ADMIN_KEY"))?;
        if admin_key.len() < MIN_ADMIN_KEY_LEN {
            return Err(ConfigError::Invalid {
                name: "ADMIN_KEY",
                reason: format!("must be at least {} characters", MIN_ADMIN_KEY_LEN),
            });
        }

        let tls = if flag("HTTPS_ENABLED") {
            let cert_path = env::var("TLS_CERT_PATH")
                .map_err(|_| ConfigError::Missing("TLS_CERT_PATH"))?;
            let key_path =
                env::var("TLS_KEY_PATH").map_err(|_| ConfigError::Missing("TLS_KEY_PATH"))?;
            Some(TlsConfig {
                port: parse_or("HTTPS_PORT", 3443u16)?,
                cert_path: cert_path.into(),
                key_path: key_path.into(),
            })
        } else {
            None
        };

        let cors_origins = env::var("CORS_ORIGINS")
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        let rate_limit = RateLimitConfig {
            strict_rpm: parse_rpm("RATE_LIMIT_STRICT_RPM", 10)?,
            standard_rpm: parse_rpm("RATE_LIMIT_STANDARD_RPM", 30)?,
            relaxed_rpm: parse_rpm("RATE_LIMIT_RELAXED_RPM", 60)?,
        };

        Ok(Self {
            host,
            port,
            tls,
            database_path: env::var("DATABASE_PATH")
                .unwrap_or_else(|_| "licensegate.db".to_string()),
            admin_key,
            cors_origins,
            signing_key: load_signing_key()?,
            rate_limit,
            ready_max_rss_mb: parse_or("READY_MAX_RSS_MB", 1024u64)?,
            default_offline_grace_days: parse_or("DEFAULT_OFFLINE_GRACE_DAYS", 7u32)?,
            dev_mode,
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn tls_addr(&self) -> Option<String> {
        self.tls
            .as_ref()
            .map(|tls| format!("{}:{}", self.host, tls.port))
    }
}

/// `SIGNING_KEY_FILE` wins over an inline `SIGNING_KEY`.
fn load_signing_key() -> Result<SigningKey, ConfigError> {
    let encoded = match env::var("SIGNING_KEY_FILE") {
        Ok(path) => std::fs::read_to_string(&path).map_err(|e| ConfigError::Invalid {
            name: "SIGNING_KEY_FILE",
            reason: format!("{}: {}", path, e),
        })?,
        Err(_) => env::var("SIGNING_KEY").map_err(|_| ConfigError::Missing("SIGNING_KEY"))?,
    };
    codec::parse_signing_key(encoded.trim()).map_err(|e| ConfigError::Invalid {
        name: "SIGNING_KEY",
        reason: e.message,
    })
}

fn flag(name: &str) -> bool {
    env::var(name)
        .map(|v| v == "true" || v == "1")
        .unwrap_or(false)
}

fn parse_or<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            reason: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

fn parse_rpm(name: &'static str, default: u32) -> Result<u32, ConfigError> {
    let rpm = parse_or(name, default)?;
    if rpm == 0 {
        return Err(ConfigError::Invalid {
            name,
            reason: "must be greater than 0".to_string(),
        });
    }
    Ok(rpm)
}
