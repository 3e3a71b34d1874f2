//! Small helpers for resolving configuration from the environment.

use std::str::FromStr;

use rust_decimal::Decimal;

use crate::error::ConfigError;

/// Read an environment variable, treating empty values as absent.
pub fn optional_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Parse a string environment variable, falling back to `default`.
pub fn parse_string_env(key: &str, default: &str) -> String {
    optional_env(key).unwrap_or_else(|| default.to_string())
}

/// Parse a numeric environment variable, falling back to `default`.
pub fn parse_number_env<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let Some(raw) = optional_env(key) else {
        return Ok(default);
    };
    raw.parse::<T>().map_err(|e| ConfigError::InvalidValue {
        key: key.to_string(),
        message: e.to_string(),
    })
}

/// Parse a decimal environment variable, falling back to `default`.
pub fn parse_decimal_env(key: &str, default: Decimal) -> Result<Decimal, ConfigError> {
    let Some(raw) = optional_env(key) else {
        return Ok(default);
    };
    raw.parse::<Decimal>().map_err(|e| ConfigError::InvalidValue {
        key: key.to_string(),
        message: e.to_string(),
    })
}
