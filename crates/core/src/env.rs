//! Environment-variable helpers shared by the `from_env` constructors.
//!
//! Unset variables fall back to the default silently; malformed values
//! fall back with a warning so a typo never prevents startup.

use std::str::FromStr;

/// Parse `key` as `T`, falling back to `default`.
pub fn parse_or<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!(key, value = %raw, "Ignoring malformed environment value");
                default
            }
        },
        Err(_) => default,
    }
}

/// Read `key` as a string, falling back to `default`.
pub fn string_or(key: &str, default: &str) -> String {
    optional(key).unwrap_or_else(|| default.to_string())
}

/// Read `key`, treating unset and blank values as absent.
pub fn optional(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Read `key` as a comma-separated list, falling back to `default`.
pub fn list_or(key: &str, default: &[&str]) -> Vec<String> {
    match optional(key) {
        Some(raw) => split_list(&raw),
        None => default.iter().map(|s| s.to_string()).collect(),
    }
}

/// Split a comma-separated list, dropping blank entries.
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
