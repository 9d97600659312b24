use crate::app_config::{AppConfig, Environment};
use crate::ConfigError;

/// Load application configuration from environment variables.
///
/// Calls `dotenvy::dotenv().ok()` to load `.env` files before reading env vars.
///
/// # Errors
///
/// Returns `ConfigError` if required env vars are missing or values are invalid.
pub fn load_app_config() -> Result<AppConfig, ConfigError> {
    dotenvy::dotenv().ok();
    load_app_config_from_env()
}

/// Load application configuration from environment variables already in the process.
///
/// Unlike [`load_app_config`], this does NOT load `.env` files.
///
/// # Errors
///
/// Returns `ConfigError` if required env vars are missing or values are invalid.
pub fn load_app_config_from_env() -> Result<AppConfig, ConfigError> {
    build_app_config(|key| std::env::var(key))
}

/// Build application configuration using the provided env-var lookup function.
///
/// Decoupled from the real environment so parsing can be tested with a plain
/// `HashMap` lookup.
fn build_app_config<F>(lookup: F) -> Result<AppConfig, ConfigError>
where
    F: Fn(&str) -> Result<String, std::env::VarError>,
{
    use std::net::SocketAddr;

    let require = |var: &str| -> Result<String, ConfigError> {
        lookup(var)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar(var.to_string()))
    };

    let or_default = |var: &str, default: &str| -> String {
        lookup(var).unwrap_or_else(|_| default.to_string())
    };

    let invalid = |var: &str, reason: String| ConfigError::InvalidEnvVar {
        var: var.to_string(),
        reason,
    };

    let parse_addr = |var: &str, default: &str| -> Result<SocketAddr, ConfigError> {
        or_default(var, default)
            .parse::<SocketAddr>()
            .map_err(|e| invalid(var, e.to_string()))
    };

    let parse_u32 = |var: &str, default: &str| -> Result<u32, ConfigError> {
        or_default(var, default)
            .parse::<u32>()
            .map_err(|e| invalid(var, e.to_string()))
    };

    let parse_u64 = |var: &str, default: &str| -> Result<u64, ConfigError> {
        or_default(var, default)
            .parse::<u64>()
            .map_err(|e| invalid(var, e.to_string()))
    };

    let parse_bool = |var: &str, default: &str| -> Result<bool, ConfigError> {
        let raw = or_default(var, default);
        match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(invalid(var, format!("expected a boolean, got '{raw}'"))),
        }
    };

    let database_url = require("DATABASE_URL")?;
    let telegram_bot_token = require("TELEGRAM_BOT_TOKEN")?;
    let storefront_url = require("PREORDER_STOREFRONT_URL")?;

    let env = parse_environment(&or_default("PREORDER_ENV", "development"));
    let bind_addr = parse_addr("PREORDER_BIND_ADDR", "0.0.0.0:3000")?;
    let log_level = or_default("PREORDER_LOG_LEVEL", "info");

    let db_max_connections = parse_u32("PREORDER_DB_MAX_CONNECTIONS", "10")?;
    let db_min_connections = parse_u32("PREORDER_DB_MIN_CONNECTIONS", "1")?;
    let db_acquire_timeout_secs = parse_u64("PREORDER_DB_ACQUIRE_TIMEOUT_SECS", "10")?;

    let poll_interval_secs = parse_u64("PREORDER_POLL_INTERVAL_SECS", "60")?;
    if poll_interval_secs == 0 {
        return Err(invalid(
            "PREORDER_POLL_INTERVAL_SECS",
            "must be at least 1".to_string(),
        ));
    }
    let plain_text_fallback = parse_bool("PREORDER_PLAIN_TEXT_FALLBACK", "true")?;

    let telegram_api_base_url = or_default("TELEGRAM_API_BASE_URL", "https://api.telegram.org");
    let storefront_api_key = lookup("PREORDER_STOREFRONT_API_KEY")
        .ok()
        .filter(|v| !v.trim().is_empty());

    let http_timeout_secs = parse_u64("PREORDER_HTTP_TIMEOUT_SECS", "30")?;
    let http_max_retries = parse_u32("PREORDER_HTTP_MAX_RETRIES", "3")?;
    let http_backoff_base_ms = parse_u64("PREORDER_HTTP_BACKOFF_BASE_MS", "500")?;

    Ok(AppConfig {
        database_url,
        env,
        bind_addr,
        log_level,
        db_max_connections,
        db_min_connections,
        db_acquire_timeout_secs,
        poll_interval_secs,
        plain_text_fallback,
        telegram_bot_token,
        telegram_api_base_url,
        storefront_url,
        storefront_api_key,
        http_timeout_secs,
        http_max_retries,
        http_backoff_base_ms,
    })
}

/// Parse a string into an `Environment` variant.
///
/// Unrecognized values default to `Environment::Development`.
fn parse_environment(s: &str) -> Environment {
    match s {
        "production" => Environment::Production,
        "test" => Environment::Test,
        _ => Environment::Development,
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
