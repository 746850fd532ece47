use anyhow::Context;
use ipnet::IpNet;
use serde::{Deserialize, Serialize};

use crate::models::RedirectType;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub cache: CacheConfig,
    pub signing: SigningConfig,
    pub links: LinkConfig,
    pub analytics: AnalyticsConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    None,
    Proxy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub mode: AuthMode,
    /// Header carrying the caller id set by the upstream authenticator
    pub user_header: String,
    #[serde(default)]
    pub admin_users: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub max_entries: u64,
    /// Lifetime of cached redirect lookups. Writes that bypass this process,
    /// such as `linkctl`, become visible after at most this long.
    pub ttl_secs: u64,
    pub flush_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SigningConfig {
    /// Secret used for cursor and password-proof signatures.
    /// If None, a random key is generated and tokens won't survive restarts.
    pub secret: Option<String>,
    pub password_proof_ttl_secs: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkConfig {
    pub short_code_max_length: usize,
    pub default_redirect_type: RedirectType,
    /// Extra reserved paths on top of the built-in list
    #[serde(default)]
    pub reserved_paths: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TrustedProxyMode {
    None,
    Standard,
    Cloudflare,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsConfig {
    pub geoip_city_db_path: Option<String>,
    pub trusted_proxy_mode: TrustedProxyMode,
    #[serde(default)]
    pub trusted_proxies: Vec<IpNet>,
    pub num_trusted_proxies: Option<usize>,
    /// Extra bot signatures on top of the built-in list
    #[serde(default)]
    pub bot_signatures: Vec<String>,
    pub buffer_size: usize,
    pub flush_interval_ms: u64,
    pub recent_days: u32,
    pub max_range_days: u32,
    pub breakdown_cap: usize,
    pub breakdown_default_limit: usize,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://./linkhop.db".to_string(),
                max_connections: 5,
            },
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            auth: AuthConfig {
                mode: AuthMode::None,
                user_header: "x-forwarded-user".to_string(),
                admin_users: vec![],
            },
            cache: CacheConfig {
                max_entries: 10_000,
                ttl_secs: 30,
                flush_interval_secs: 5,
            },
            signing: SigningConfig {
                secret: None,
                password_proof_ttl_secs: 3600,
            },
            links: LinkConfig {
                short_code_max_length: 50,
                default_redirect_type: RedirectType::Found,
                reserved_paths: vec![],
            },
            analytics: AnalyticsConfig {
                geoip_city_db_path: None,
                trusted_proxy_mode: TrustedProxyMode::None,
                trusted_proxies: vec![],
                num_trusted_proxies: None,
                bot_signatures: vec![],
                buffer_size: 100_000,
                flush_interval_ms: 1_000,
                recent_days: 7,
                max_range_days: 366,
                breakdown_cap: 100,
                breakdown_default_limit: 10,
            },
            logging: LoggingConfig {
                format: LogFormat::Text,
            },
        }
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env_var(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("{key} has an invalid value '{raw}'")),
        None => Ok(default),
    }
}

fn env_parse_opt<T>(key: &str) -> anyhow::Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    env_var(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .with_context(|| format!("{key} has an invalid value '{raw}'"))
        })
        .transpose()
}

fn env_list(key: &str) -> Vec<String> {
    env_var(key)
        .map(|v| {
            v.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = Config::default();

        let auth_mode = match env_var("AUTH_MODE")
            .unwrap_or_else(|| "none".to_string())
            .to_lowercase()
            .as_str()
        {
            "none" => AuthMode::None,
            "proxy" => AuthMode::Proxy,
            other => {
                tracing::warn!(
                    "Unknown AUTH_MODE '{other}', falling back to 'none'. Supported values: none, proxy"
                );
                AuthMode::None
            }
        };

        let trusted_proxy_mode = match env_var("TRUSTED_PROXY_MODE")
            .unwrap_or_else(|| "none".to_string())
            .to_lowercase()
            .as_str()
        {
            "standard" => TrustedProxyMode::Standard,
            "cloudflare" => TrustedProxyMode::Cloudflare,
            _ => TrustedProxyMode::None,
        };

        let trusted_proxies = env_list("TRUSTED_PROXIES")
            .iter()
            .map(|cidr| {
                cidr.parse::<IpNet>()
                    .with_context(|| format!("TRUSTED_PROXIES contains an invalid CIDR '{cidr}'"))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        let default_redirect_type = match env_var("DEFAULT_REDIRECT_TYPE") {
            Some(raw) => {
                let code = raw
                    .parse::<u16>()
                    .with_context(|| format!("DEFAULT_REDIRECT_TYPE has an invalid value '{raw}'"))?;
                RedirectType::try_from(code).map_err(anyhow::Error::msg)?
            }
            None => defaults.links.default_redirect_type,
        };

        let format = match env_var("LOG_FORMAT").as_deref() {
            Some("json") => LogFormat::Json,
            _ => LogFormat::Text,
        };

        Ok(Config {
            database: DatabaseConfig {
                url: env_var("DATABASE_URL").unwrap_or(defaults.database.url),
                max_connections: env_parse(
                    "DATABASE_MAX_CONNECTIONS",
                    defaults.database.max_connections,
                )?,
            },
            server: ServerConfig {
                host: env_var("HOST").unwrap_or(defaults.server.host),
                port: env_parse("PORT", defaults.server.port)?,
            },
            auth: AuthConfig {
                mode: auth_mode,
                user_header: env_var("AUTH_USER_HEADER")
                    .map(|h| h.to_lowercase())
                    .unwrap_or(defaults.auth.user_header),
                admin_users: env_list("AUTH_ADMIN_USERS"),
            },
            cache: CacheConfig {
                max_entries: env_parse("CACHE_MAX_ENTRIES", defaults.cache.max_entries)?,
                ttl_secs: env_parse("CACHE_TTL_SECS", defaults.cache.ttl_secs)?,
                flush_interval_secs: env_parse(
                    "CACHE_FLUSH_INTERVAL_SECS",
                    defaults.cache.flush_interval_secs,
                )?,
            },
            signing: SigningConfig {
                secret: env_var("SIGNING_SECRET"),
                password_proof_ttl_secs: env_parse(
                    "PASSWORD_PROOF_TTL_SECS",
                    defaults.signing.password_proof_ttl_secs,
                )?,
            },
            links: LinkConfig {
                short_code_max_length: env_parse(
                    "SHORT_CODE_MAX_LENGTH",
                    defaults.links.short_code_max_length,
                )?,
                default_redirect_type,
                reserved_paths: env_list("RESERVED_PATHS"),
            },
            analytics: AnalyticsConfig {
                geoip_city_db_path: env_var("GEOIP_CITY_DB_PATH"),
                trusted_proxy_mode,
                trusted_proxies,
                num_trusted_proxies: env_parse_opt("NUM_TRUSTED_PROXIES")?,
                bot_signatures: env_list("BOT_SIGNATURES"),
                buffer_size: env_parse("ANALYTICS_BUFFER_SIZE", defaults.analytics.buffer_size)?,
                flush_interval_ms: env_parse(
                    "ANALYTICS_FLUSH_INTERVAL_MS",
                    defaults.analytics.flush_interval_ms,
                )?,
                recent_days: env_parse("ANALYTICS_RECENT_DAYS", defaults.analytics.recent_days)?,
                max_range_days: env_parse(
                    "ANALYTICS_MAX_RANGE_DAYS",
                    defaults.analytics.max_range_days,
                )?,
                breakdown_cap: env_parse(
                    "ANALYTICS_BREAKDOWN_CAP",
                    defaults.analytics.breakdown_cap,
                )?,
                breakdown_default_limit: env_parse(
                    "ANALYTICS_BREAKDOWN_DEFAULT_LIMIT",
                    defaults.analytics.breakdown_default_limit,
                )?,
            },
            logging: LoggingConfig { format },
        })
    }
}
