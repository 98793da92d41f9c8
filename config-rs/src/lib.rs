//! config-rs/lib.rs
//! Shared configuration utilities for the suggestion services.
//! Environment lookups with typed fallbacks, `.env` loading and bind address
//! resolution.

use std::env;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;

/// Load variables from a `.env` file in the working directory or any parent.
///
/// Variables already present in the process environment are never overwritten.
/// Returns the path of the file that was loaded, if any.
pub fn load_dotenv() -> Option<PathBuf> {
    match dotenv::dotenv() {
        Ok(path) => {
            tracing::debug!(path = %path.display(), "Loaded .env file");
            Some(path)
        }
        Err(err) if err.not_found() => None,
        Err(err) => {
            tracing::warn!(error = %err, "Failed to parse .env file, continuing with process environment");
            None
        }
    }
}

/// Read and parse an environment variable, `None` when unset or unparseable.
pub fn env_opt<T: FromStr>(name: &str) -> Option<T> {
    let raw = env::var(name).ok()?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(var = %name, value = %raw, "Ignoring unparseable environment value");
            None
        }
    }
}

/// Read and parse an environment variable with a default value.
pub fn env_or<T: FromStr>(name: &str, default: T) -> T {
    env_opt(name).unwrap_or(default)
}

/// Read a comma separated environment variable into trimmed, non-empty items.
pub fn env_list(name: &str) -> Vec<String> {
    env::var(name)
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Read a boolean flag. Accepts `1/0`, `true/false`, `yes/no`, `on/off`.
pub fn env_flag(name: &str, default: bool) -> bool {
    match env::var(name) {
        Ok(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => {
                tracing::warn!(var = %name, value = %raw, "Invalid boolean, using default {}", default);
                default
            }
        },
        Err(_) => default,
    }
}

/// Get service port from environment variables with proper fallback
///
/// # Arguments
/// * `service_name` - The name of the service (e.g., "API_GATEWAY")
/// * `default_port` - The default port to use if not specified in environment
pub fn get_service_port(service_name: &str, default_port: u16) -> u16 {
    let var_name = format!("{}_SERVICE_PORT", service_name.to_uppercase());
    env::var(&var_name)
        .unwrap_or_else(|_| default_port.to_string())
        .parse::<u16>()
        .unwrap_or_else(|_| {
            tracing::warn!("Invalid port in {}, using default {}", var_name, default_port);
            default_port
        })
}

/// Create a SocketAddr for binding a service
///
/// `{SERVICE}_SERVICE_ADDR` may hold a full `host:port` (optionally prefixed
/// with `http://`); otherwise the service binds all interfaces on the port
/// resolved by [`get_service_port`].
pub fn get_bind_address(service_name: &str, default_port: u16) -> SocketAddr {
    let var_name = format!("{}_SERVICE_ADDR", service_name.to_uppercase());

    if let Ok(addr_str) = env::var(&var_name) {
        let trimmed = addr_str
            .trim_start_matches("http://")
            .trim_start_matches("https://");
        if let Ok(addr) = trimmed.parse::<SocketAddr>() {
            return addr;
        }
        tracing::warn!("Invalid address format in {}, using default", var_name);
    }

    let port = get_service_port(service_name, default_port);
    SocketAddr::from((Ipv4Addr::UNSPECIFIED, port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_service_port() {
        std::env::set_var("CFGTEST_SERVICE_PORT", "9000");
        assert_eq!(get_service_port("CFGTEST", 8000), 9000);

        std::env::remove_var("CFGUNKNOWN_SERVICE_PORT");
        assert_eq!(get_service_port("CFGUNKNOWN", 8000), 8000);
    }

    #[test]
    fn test_get_bind_address() {
        std::env::set_var("CFGBIND_SERVICE_ADDR", "http://127.0.0.1:9100");
        assert_eq!(get_bind_address("CFGBIND", 8000), "127.0.0.1:9100".parse().unwrap());

        std::env::set_var("CFGBIND_SERVICE_ADDR", "not an address");
        assert_eq!(get_bind_address("CFGBIND", 8000), "0.0.0.0:8000".parse().unwrap());
        std::env::remove_var("CFGBIND_SERVICE_ADDR");
    }

    #[test]
    fn test_env_helpers() {
        std::env::set_var("CFGTEST_LIST", " vision-a, ,vision-b ");
        assert_eq!(env_list("CFGTEST_LIST"), vec!["vision-a", "vision-b"]);
        assert!(env_list("CFGTEST_LIST_MISSING").is_empty());

        std::env::set_var("CFGTEST_NUMBER", "not-a-number");
        assert_eq!(env_or("CFGTEST_NUMBER", 42u64), 42);
        std::env::set_var("CFGTEST_NUMBER", "7");
        assert_eq!(env_or("CFGTEST_NUMBER", 42u64), 7);

        std::env::set_var("CFGTEST_FLAG", "Yes");
        assert!(env_flag("CFGTEST_FLAG", false));
        assert!(!env_flag("CFGTEST_FLAG_MISSING", false));
    }
}
