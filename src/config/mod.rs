//! Configuration management
//!
//! This module handles loading and parsing configuration for the shortener.
//! Configuration can be loaded from:
//! - config.yml file
//! - Environment variables (override file settings)
//!
//! Missing optional values are filled with sensible defaults. Secrets have no
//! usable default; `Config::validate` rejects a configuration that lacks them
//! so the process fails at startup rather than at first use.

use serde::{Deserialize, Serialize};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Token and session configuration
    #[serde(default)]
    pub auth: AuthConfig,
    /// Outbound email configuration
    #[serde(default)]
    pub email: EmailConfig,
    /// Public front-end configuration
    #[serde(default)]
    pub frontend: FrontendConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
    /// CORS allowed origin (for cookie-based auth)
    #[serde(default = "default_cors_origin")]
    pub cors_origin: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origin: default_cors_origin(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_cors_origin() -> String {
    "http://localhost:5173".to_string()
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database driver (sqlite or mysql)
    #[serde(default)]
    pub driver: DatabaseDriver,
    /// Database connection URL
    #[serde(default = "default_database_url")]
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            driver: DatabaseDriver::default(),
            url: default_database_url(),
        }
    }
}

fn default_database_url() -> String {
    "data/shortener.db".to_string()
}

/// Database driver type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseDriver {
    /// SQLite (default)
    #[default]
    Sqlite,
    /// MySQL
    Mysql,
}

/// Token, cookie and single-use token lifetimes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// HMAC secret used to sign access and refresh tokens
    #[serde(default)]
    pub jwt_secret: String,
    /// Access token (and cookie) lifetime in seconds
    #[serde(default = "default_access_token_ttl")]
    pub access_token_ttl_secs: i64,
    /// Refresh token (and cookie) lifetime in seconds
    #[serde(default = "default_refresh_token_ttl")]
    pub refresh_token_ttl_secs: i64,
    /// Email verification code lifetime in hours
    #[serde(default = "default_single_use_ttl_hours")]
    pub verify_email_ttl_hours: i64,
    /// Password reset token lifetime in hours
    #[serde(default = "default_single_use_ttl_hours")]
    pub password_reset_ttl_hours: i64,
    /// Emit the `Secure` cookie attribute
    #[serde(default = "default_cookie_secure")]
    pub cookie_secure: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            access_token_ttl_secs: default_access_token_ttl(),
            refresh_token_ttl_secs: default_refresh_token_ttl(),
            verify_email_ttl_hours: default_single_use_ttl_hours(),
            password_reset_ttl_hours: default_single_use_ttl_hours(),
            cookie_secure: default_cookie_secure(),
        }
    }
}

/// Upper bounds keep expiry arithmetic far from overflow
const MAX_ACCESS_TOKEN_TTL_SECS: i64 = 24 * 60 * 60;
const MAX_REFRESH_TOKEN_TTL_SECS: i64 = 365 * 24 * 60 * 60;
const MAX_SINGLE_USE_TTL_HOURS: i64 = 30 * 24;

fn default_access_token_ttl() -> i64 {
    15 * 60 // 15 minutes
}

fn default_refresh_token_ttl() -> i64 {
    7 * 24 * 60 * 60 // 7 days
}

fn default_single_use_ttl_hours() -> i64 {
    24
}

fn default_cookie_secure() -> bool {
    true
}

/// SMTP configuration for outbound email
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    /// SMTP relay host
    #[serde(default)]
    pub smtp_host: String,
    /// SMTP port
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    /// SMTP username
    #[serde(default)]
    pub smtp_username: String,
    /// SMTP password
    #[serde(default)]
    pub smtp_password: String,
    /// Envelope sender address
    #[serde(default)]
    pub from_address: String,
    /// Display name of the sender
    #[serde(default = "default_from_name")]
    pub from_name: String,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            smtp_host: String::new(),
            smtp_port: default_smtp_port(),
            smtp_username: String::new(),
            smtp_password: String::new(),
            from_address: String::new(),
            from_name: default_from_name(),
        }
    }
}

fn default_smtp_port() -> u16 {
    587
}

fn default_from_name() -> String {
    "URL SHORTENER".to_string()
}

/// Public front-end location, used to build links sent by email
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FrontendConfig {
    /// Base URL without trailing slash, e.g. `https://sho.rt`
    #[serde(default)]
    pub url: String,
}

/// Error type for configuration parsing
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    FileRead {
        path: String,
        source: std::io::Error,
    },
    #[error("Failed to parse config file '{path}': {message}")]
    ParseError {
        path: String,
        message: String,
    },
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

impl Config {
    /// Load configuration from file
    ///
    /// If the file doesn't exist, returns default configuration.
    /// If the file exists but is invalid YAML, returns an error with details.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.display().to_string(),
            source: e,
        })?;

        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        let config: Config = serde_yaml::from_str(&content).map_err(|e| {
            ConfigError::ParseError {
                path: path.display().to_string(),
                message: format_yaml_error(&e),
            }
        })?;

        Ok(config)
    }

    /// Load configuration from file with environment variable overrides
    ///
    /// Environment variables follow the pattern `SHORTENER_<SECTION>_<FIELD>`,
    /// e.g. `SHORTENER_SERVER_PORT`, `SHORTENER_AUTH_JWT_SECRET`,
    /// `SHORTENER_EMAIL_SMTP_HOST`, `SHORTENER_FRONTEND_URL`.
    pub fn load_with_env(path: &std::path::Path) -> anyhow::Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Check that every secret and URL needed at runtime is present.
    ///
    /// Called once at startup so a misconfigured deployment never starts
    /// serving requests.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("auth.jwt_secret", &self.auth.jwt_secret),
            ("email.smtp_host", &self.email.smtp_host),
            ("email.smtp_username", &self.email.smtp_username),
            ("email.smtp_password", &self.email.smtp_password),
            ("email.from_address", &self.email.from_address),
            ("frontend.url", &self.frontend.url),
        ];

        let missing: Vec<&str> = required
            .iter()
            .filter(|(_, value)| value.trim().is_empty())
            .map(|(name, _)| *name)
            .collect();

        if !missing.is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "missing required settings: {}",
                missing.join(", ")
            )));
        }

        let lifetimes = [
            (
                "auth.access_token_ttl_secs",
                self.auth.access_token_ttl_secs,
                MAX_ACCESS_TOKEN_TTL_SECS,
            ),
            (
                "auth.refresh_token_ttl_secs",
                self.auth.refresh_token_ttl_secs,
                MAX_REFRESH_TOKEN_TTL_SECS,
            ),
            (
                "auth.verify_email_ttl_hours",
                self.auth.verify_email_ttl_hours,
                MAX_SINGLE_USE_TTL_HOURS,
            ),
            (
                "auth.password_reset_ttl_hours",
                self.auth.password_reset_ttl_hours,
                MAX_SINGLE_USE_TTL_HOURS,
            ),
        ];

        for (name, value, max) in lifetimes {
            if !(1..=max).contains(&value) {
                return Err(ConfigError::ValidationError(format!(
                    "{} must be between 1 and {}, got {}",
                    name, max, value
                )));
            }
        }

        if self.auth.access_token_ttl_secs >= self.auth.refresh_token_ttl_secs {
            return Err(ConfigError::ValidationError(
                "auth.access_token_ttl_secs must be shorter than auth.refresh_token_ttl_secs"
                    .to_string(),
            ));
        }

        Ok(())
    }

    /// Apply environment variable overrides to the configuration
    fn apply_env_overrides(&mut self) {
        // Server configuration
        if let Ok(host) = std::env::var("SHORTENER_SERVER_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = std::env::var("SHORTENER_SERVER_PORT") {
            if let Ok(port) = port.parse::<u16>() {
                self.server.port = port;
            }
        }
        if let Ok(cors_origin) = std::env::var("SHORTENER_SERVER_CORS_ORIGIN") {
            self.server.cors_origin = cors_origin;
        }

        // Database configuration
        if let Ok(driver) = std::env::var("SHORTENER_DATABASE_DRIVER") {
            match driver.to_lowercase().as_str() {
                "sqlite" => self.database.driver = DatabaseDriver::Sqlite,
                "mysql" => self.database.driver = DatabaseDriver::Mysql,
                _ => {} // Ignore invalid values
            }
        }
        if let Ok(url) = std::env::var("SHORTENER_DATABASE_URL") {
            self.database.url = url;
        }

        // Auth configuration
        if let Ok(secret) = std::env::var("SHORTENER_AUTH_JWT_SECRET") {
            self.auth.jwt_secret = secret;
        }
        if let Ok(ttl) = std::env::var("SHORTENER_AUTH_ACCESS_TOKEN_TTL_SECS") {
            if let Ok(ttl) = ttl.parse::<i64>() {
                self.auth.access_token_ttl_secs = ttl;
            }
        }
        if let Ok(ttl) = std::env::var("SHORTENER_AUTH_REFRESH_TOKEN_TTL_SECS") {
            if let Ok(ttl) = ttl.parse::<i64>() {
                self.auth.refresh_token_ttl_secs = ttl;
            }
        }
        if let Ok(ttl) = std::env::var("SHORTENER_AUTH_VERIFY_EMAIL_TTL_HOURS") {
            if let Ok(ttl) = ttl.parse::<i64>() {
                self.auth.verify_email_ttl_hours = ttl;
            }
        }
        if let Ok(ttl) = std::env::var("SHORTENER_AUTH_PASSWORD_RESET_TTL_HOURS") {
            if let Ok(ttl) = ttl.parse::<i64>() {
                self.auth.password_reset_ttl_hours = ttl;
            }
        }
        if let Ok(secure) = std::env::var("SHORTENER_AUTH_COOKIE_SECURE") {
            if let Ok(secure) = secure.parse::<bool>() {
                self.auth.cookie_secure = secure;
            }
        }

        // Email configuration
        if let Ok(host) = std::env::var("SHORTENER_EMAIL_SMTP_HOST") {
            self.email.smtp_host = host;
        }
        if let Ok(port) = std::env::var("SHORTENER_EMAIL_SMTP_PORT") {
            if let Ok(port) = port.parse::<u16>() {
                self.email.smtp_port = port;
            }
        }
        if let Ok(username) = std::env::var("SHORTENER_EMAIL_SMTP_USERNAME") {
            self.email.smtp_username = username;
        }
        if let Ok(password) = std::env::var("SHORTENER_EMAIL_SMTP_PASSWORD") {
            self.email.smtp_password = password;
        }
        if let Ok(from) = std::env::var("SHORTENER_EMAIL_FROM_ADDRESS") {
            self.email.from_address = from;
        }
        if let Ok(name) = std::env::var("SHORTENER_EMAIL_FROM_NAME") {
            self.email.from_name = name;
        }

        // Front-end configuration
        if let Ok(url) = std::env::var("SHORTENER_FRONTEND_URL") {
            self.frontend.url = url;
        }
    }
}

/// Format YAML parsing error with location and context
fn format_yaml_error(e: &serde_yaml::Error) -> String {
    if let Some(location) = e.location() {
        format!(
            "at line {}, column {}: {}",
            location.line(),
            location.column(),
            e
        )
    } else {
        e.to_string()
    }
}

// Shared mutex for config tests that modify environment variables.
#[cfg(test)]
static CONFIG_ENV_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());
