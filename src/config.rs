use std::env;
use std::time::Duration;

/// AppConfig
///
/// Holds the application's entire configuration state. Immutable once loaded
/// and pulled into handlers and extractors via `FromRef`.
#[derive(Clone, Debug)]
pub struct AppConfig {
    // Runtime environment marker. Controls fail-fast behaviour and log format.
    pub env: Env,
    // Postgres connection string. `None` selects the in-memory store (local only).
    pub db_url: Option<String>,
    // Address the HTTP listener binds to.
    pub bind_addr: String,
    // HMAC secret used to sign and verify identity tokens.
    pub jwt_secret: String,
    // Lifetime of tokens issued by the login endpoints.
    pub token_ttl: Duration,
    // The static admin account. Never persisted.
    pub admin: AdminCredentials,
    pub mail: MailConfig,
    pub rate_limit: RateLimitConfig,
}

/// Env
///
/// Defines the runtime context.
#[derive(Clone, PartialEq, Debug)]
pub enum Env {
    Local,
    Production,
}

/// AdminCredentials
///
/// The single admin identity, injected at startup.
#[derive(Clone)]
pub struct AdminCredentials {
    pub email: String,
    pub password: String,
}

impl std::fmt::Debug for AdminCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminCredentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// MailConfig
///
/// Outbound notification settings. Without a relay URL, notifications are
/// only logged.
#[derive(Clone, Debug)]
pub struct MailConfig {
    pub relay_url: Option<String>,
    pub from: String,
}

/// RateLimitConfig
///
/// Per-caller quotas: `max_requests` per `window` on every route, and the
/// tighter `login_max_requests` per `window` on the login endpoints.
#[derive(Clone, Debug)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub login_max_requests: u32,
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 100,
            login_max_requests: 5,
            window: Duration::from_secs(15 * 60),
        }
    }
}

pub const DEFAULT_TOKEN_TTL_SECS: u64 = 3600;

impl Default for AppConfig {
    /// default
    ///
    /// Safe, non-panicking configuration for tests: in-memory store, a fixed
    /// test secret and fixed admin credentials.
    fn default() -> Self {
        Self {
            env: Env::Local,
            db_url: None,
            bind_addr: "127.0.0.1:3000".to_string(),
            jwt_secret: "super-secure-test-secret-value-local".to_string(),
            token_ttl: Duration::from_secs(DEFAULT_TOKEN_TTL_SECS),
            admin: AdminCredentials {
                email: "admin@portal.local".to_string(),
                password: "admin-password-1".to_string(),
            },
            mail: MailConfig {
                relay_url: None,
                from: "no-reply@portal.local".to_string(),
            },
            rate_limit: RateLimitConfig::default(),
        }
    }
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!("ignoring unparseable {}={:?}", key, raw);
            default
        }),
        Err(_) => default,
    }
}

// A zero quota or window would make the limiter meaningless; keep the default.
fn positive_or<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + PartialOrd + Default + Copy,
{
    let value = parse_or(key, default);
    if value > T::default() {
        value
    } else {
        tracing::warn!("ignoring {}: must be greater than zero", key);
        default
    }
}

impl AppConfig {
    /// load
    ///
    /// Reads every parameter from environment variables.
    ///
    /// # Panics
    /// In production, panics when `DATABASE_URL`, `JWT_SECRET`, `ADMIN_EMAIL` or
    /// `ADMIN_PASSWORD` is missing, so the service never starts with an
    /// incomplete or insecure configuration.
    pub fn load() -> Self {
        let env_str = env::var("APP_ENV").unwrap_or_else(|_| "local".to_string());
        let env = match env_str.as_str() {
            "production" => Env::Production,
            _ => Env::Local,
        };
        let defaults = AppConfig::default();

        let token_ttl = Duration::from_secs(parse_or("TOKEN_TTL_SECS", DEFAULT_TOKEN_TTL_SECS));
        let rate_limit = RateLimitConfig {
            max_requests: positive_or("RATE_LIMIT_MAX", defaults.rate_limit.max_requests),
            login_max_requests: positive_or(
                "LOGIN_RATE_LIMIT_MAX",
                defaults.rate_limit.login_max_requests,
            ),
            window: Duration::from_secs(positive_or(
                "RATE_LIMIT_WINDOW_SECS",
                defaults.rate_limit.window.as_secs(),
            )),
        };
        let mail = MailConfig {
            relay_url: env::var("MAIL_RELAY_URL").ok(),
            from: env::var("MAIL_FROM").unwrap_or(defaults.mail.from),
        };
        let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());

        match env {
            Env::Local => Self {
                env: Env::Local,
                // Without a database the local run falls back to the in-memory store.
                db_url: env::var("DATABASE_URL").ok(),
                bind_addr,
                jwt_secret: env::var("JWT_SECRET").unwrap_or(defaults.jwt_secret),
                token_ttl,
                admin: AdminCredentials {
                    email: env::var("ADMIN_EMAIL").unwrap_or(defaults.admin.email),
                    password: env::var("ADMIN_PASSWORD").unwrap_or(defaults.admin.password),
                },
                mail,
                rate_limit,
            },
            Env::Production => Self {
                env: Env::Production,
                db_url: Some(
                    env::var("DATABASE_URL").expect("FATAL: DATABASE_URL required in prod"),
                ),
                bind_addr,
                jwt_secret: env::var("JWT_SECRET")
                    .expect("FATAL: JWT_SECRET must be set in production."),
                token_ttl,
                admin: AdminCredentials {
                    email: env::var("ADMIN_EMAIL").expect("FATAL: ADMIN_EMAIL required in prod"),
                    password: env::var("ADMIN_PASSWORD")
                        .expect("FATAL: ADMIN_PASSWORD required in prod"),
                },
                mail,
                rate_limit,
            },
        }
    }
}
