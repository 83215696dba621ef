//! Process configuration.
//!
//! Every setting is read from the environment (the variable names the
//! deployment scripts already export) and can be overridden by a CLI flag.

use clap::{Args, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

pub const DEFAULT_JWT_SECRET: &str = "default-secret-key-change-me";

#[derive(Debug, Clone, Args)]
pub struct Config {
    #[command(flatten)]
    pub server: ServerConfig,
    #[command(flatten)]
    pub database: DatabaseConfig,
    #[command(flatten)]
    pub auth: AuthConfig,
    #[command(flatten)]
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            auth: AuthConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Environment {
    Development,
    Production,
}

#[derive(Debug, Clone, Args)]
pub struct ServerConfig {
    /// Port the HTTP API listens on
    #[arg(long, env = "PORT", default_value_t = default_port())]
    pub port: u16,

    #[arg(long = "env", env = "ENV", value_enum, default_value_t = Environment::Development)]
    pub environment: Environment,

    /// Directory holding the front-end build
    #[arg(long, env = "STATIC_DIR", default_value = "frontend")]
    pub static_dir: PathBuf,

    /// Serve the demo landing page at `/`
    #[arg(long, env = "DEMO_MODE", default_value_t = false)]
    pub demo_mode: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            environment: Environment::Development,
            static_dir: PathBuf::from("frontend"),
            demo_mode: false,
        }
    }
}

impl ServerConfig {
    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }
}

fn default_port() -> u16 {
    8080
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DbType {
    Sqlite,
    Postgres,
}

impl std::fmt::Display for DbType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DbType::Sqlite => write!(f, "sqlite"),
            DbType::Postgres => write!(f, "postgres"),
        }
    }
}

#[derive(Debug, Clone, Args)]
pub struct DatabaseConfig {
    #[arg(long, env = "DB_TYPE", value_enum, default_value_t = DbType::Sqlite)]
    pub db_type: DbType,

    #[arg(long, env = "DB_HOST", default_value = "localhost")]
    pub db_host: String,

    #[arg(long, env = "DB_PORT", default_value_t = 5432)]
    pub db_port: u16,

    #[arg(long, env = "DB_USER", default_value = "classkeeper")]
    pub db_user: String,

    #[arg(long, env = "DB_PASSWORD", default_value = "", hide_env_values = true)]
    pub db_password: String,

    #[arg(long, env = "DB_NAME", default_value = "classkeeper_db")]
    pub db_name: String,

    /// Path of the SQLite database file
    #[arg(long, env = "SQLITE_PATH", default_value = "./classkeeper.db")]
    pub sqlite_path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            db_type: DbType::Sqlite,
            db_host: "localhost".to_string(),
            db_port: 5432,
            db_user: "classkeeper".to_string(),
            db_password: String::new(),
            db_name: "classkeeper_db".to_string(),
            sqlite_path: PathBuf::from("./classkeeper.db"),
        }
    }
}

#[derive(Debug, Clone, Args)]
pub struct AuthConfig {
    /// HMAC secret used to sign bearer tokens
    #[arg(long, env = "JWT_SECRET", default_value = DEFAULT_JWT_SECRET, hide_env_values = true)]
    pub jwt_secret: String,

    /// Access token lifetime, e.g. `15m`
    #[arg(long, env = "JWT_EXPIRY", default_value = "15m")]
    pub jwt_expiry: String,

    /// Refresh token lifetime, e.g. `168h`
    #[arg(long, env = "REFRESH_TOKEN_EXPIRY", default_value = "168h")]
    pub refresh_token_expiry: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: DEFAULT_JWT_SECRET.to_string(),
            jwt_expiry: "15m".to_string(),
            refresh_token_expiry: "168h".to_string(),
        }
    }
}

impl AuthConfig {
    pub fn access_token_ttl(&self) -> Duration {
        duration_or_default(&self.jwt_expiry)
    }

    pub fn refresh_token_ttl(&self) -> Duration {
        duration_or_default(&self.refresh_token_expiry)
    }

    pub fn uses_default_secret(&self) -> bool {
        self.jwt_secret == DEFAULT_JWT_SECRET
    }
}

#[derive(Debug, Clone, Args)]
pub struct LoggingConfig {
    /// Log filter used when RUST_LOG is not set
    #[arg(long = "log-level", env = "LOG_LEVEL")]
    pub level: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: None }
    }
}

impl Config {
    /// Filter directive for the tracing subscriber.
    pub fn log_filter(&self) -> String {
        match &self.logging.level {
            Some(level) => level.clone(),
            None if self.server.is_production() => "info".to_string(),
            None => "classkeeper=debug,tower_http=debug,info".to_string(),
        }
    }
}

fn duration_or_default(value: &str) -> Duration {
    parse_duration(value).unwrap_or_else(|e| {
        warn!(value = value, error = %e, "Invalid duration, using 15m");
        Duration::from_secs(15 * 60)
    })
}

/// Errors from [`parse_duration`]
#[derive(Error, Debug, PartialEq, Eq)]
pub enum DurationError {
    #[error("empty duration")]
    Empty,

    #[error("unknown unit '{unit}' in {value}")]
    UnknownUnit { unit: char, value: String },

    #[error("missing number before '{unit}' in {value}")]
    MissingNumber { unit: &'static str, value: String },

    #[error("missing unit in {0}")]
    MissingUnit(String),

    #[error("duration out of range: {0}")]
    Overflow(String),
}

/// Parse a duration such as `15m`, `168h`, `1h30m` or `90s`.
pub fn parse_duration(value: &str) -> Result<Duration, DurationError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(DurationError::Empty);
    }

    let mut total = 0u64;
    let mut digits = String::new();
    let mut chars = value.chars().peekable();

    while let Some(c) = chars.next() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }

        let unit = if c == 'm' && chars.peek() == Some(&'s') {
            chars.next();
            "ms"
        } else {
            match c {
                'h' => "h",
                'm' => "m",
                's' => "s",
                _ => {
                    return Err(DurationError::UnknownUnit {
                        unit: c,
                        value: value.to_string(),
                    })
                }
            }
        };

        let amount: u64 = digits
            .parse()
            .map_err(|_| DurationError::MissingNumber {
                unit,
                value: value.to_string(),
            })?;
        digits.clear();

        let factor = match unit {
            "h" => 3_600_000,
            "m" => 60_000,
            "s" => 1_000,
            _ => 1,
        };
        total = amount
            .checked_mul(factor)
            .and_then(|millis| total.checked_add(millis))
            .ok_or_else(|| DurationError::Overflow(value.to_string()))?;
    }

    if !digits.is_empty() {
        return Err(DurationError::MissingUnit(value.to_string()));
    }

    Ok(Duration::from_millis(total))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration_units() {
        assert_eq!(parse_duration("15m").unwrap(), Duration::from_secs(900));
        assert_eq!(parse_duration("168h").unwrap(), Duration::from_secs(168 * 3600));
        assert_eq!(parse_duration("1h30m").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_duration("45s").unwrap(), Duration::from_secs(45));
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
    }

    #[test]
    fn test_parse_duration_rejects_garbage() {
        assert_eq!(parse_duration(""), Err(DurationError::Empty));
        assert_eq!(
            parse_duration("15"),
            Err(DurationError::MissingUnit("15".to_string()))
        );
        assert!(matches!(
            parse_duration("m"),
            Err(DurationError::MissingNumber { unit: "m", .. })
        ));
        assert!(matches!(
            parse_duration("10d"),
            Err(DurationError::UnknownUnit { unit: 'd', .. })
        ));
    }

    #[test]
    fn test_parse_duration_overflow() {
        assert_eq!(
            parse_duration("99999999999999999h"),
            Err(DurationError::Overflow("99999999999999999h".to_string()))
        );
        assert!(matches!(
            parse_duration("18446744073709551615ms1ms"),
            Err(DurationError::Overflow(_))
        ));
    }

    #[test]
    fn test_invalid_expiry_falls_back() {
        let auth = AuthConfig {
            jwt_expiry: "soon".to_string(),
            ..AuthConfig::default()
        };
        assert_eq!(auth.access_token_ttl(), Duration::from_secs(900));
        assert_eq!(
            AuthConfig::default().refresh_token_ttl(),
            Duration::from_secs(168 * 3600)
        );
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.database.db_type, DbType::Sqlite);
        assert!(config.auth.uses_default_secret());
        assert!(!config.server.is_production());
    }
}
