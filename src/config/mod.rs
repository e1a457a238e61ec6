//! Process configuration loaded from environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::cache::{CachePolicy, DEFAULT_CAPACITY};
use crate::edge::{
    DEFAULT_ORIGIN_TIMEOUT, DEFAULT_ROOT_OBJECT, EdgeSettings, OriginProtocolPolicy,
};
use crate::endpoint::{DEFAULT_STORE_TIMEOUT, EndpointSettings};
use crate::security::{AllowedMethods, ViewerProtocolPolicy, ViewerScheme};
use crate::server::DEFAULT_IDLE_TIMEOUT;
use crate::store::DEFAULT_PARAMETER_NAME;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{key}: `{value}` is not a non-negative integer")]
    InvalidNumber { key: &'static str, value: String },

    #[error("{key}: invalid value `{value}`: {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// API listener address (e.g. "127.0.0.1:8081").
    pub api_bind_addr: String,

    /// Edge listener address (e.g. "0.0.0.0:8080").
    pub edge_bind_addr: String,

    /// How long either listener keeps a silent connection open.
    pub idle_timeout: Duration,

    /// Name of the configuration entry the endpoint renders.
    pub parameter_name: String,

    /// JSON file backing the configuration store. `None` uses the seeded
    /// in-memory store.
    pub parameter_store_file: Option<PathBuf>,

    pub store_timeout: Duration,

    /// `Cache-Control` sent by the endpoint on success.
    pub response_cache_control: Option<String>,

    /// Remote API the edge forwards to. `None` calls the endpoint in-process.
    pub edge_origin_url: Option<String>,
    pub edge_origin_protocol: OriginProtocolPolicy,
    pub edge_origin_timeout: Duration,

    pub viewer_protocol: ViewerProtocolPolicy,
    pub listener_scheme: ViewerScheme,
    pub allowed_methods: AllowedMethods,

    /// Object served for `/`. An empty value disables the rewrite.
    pub default_root_object: Option<String>,

    pub cache: CachePolicy,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// All variables are optional:
    /// - `API_BIND_ADDR` (default: "127.0.0.1:8081")
    /// - `EDGE_BIND_ADDR` (default: "0.0.0.0:8080")
    /// - `SERVER_IDLE_TIMEOUT_MS` (default: 30000)
    /// - `PARAMETER_NAME` (default: "/dynamic-html/string")
    /// - `PARAMETER_STORE_FILE`: JSON object file; unset uses an in-memory store
    /// - `STORE_TIMEOUT_MS` (default: 3000)
    /// - `RESPONSE_CACHE_CONTROL`: unset sends no `Cache-Control`
    /// - `EDGE_ORIGIN_URL`: unset forwards to the in-process endpoint
    /// - `EDGE_ORIGIN_PROTOCOL`: `https-only` (default) or `allow-http`
    /// - `EDGE_ORIGIN_TIMEOUT_MS` (default: 10000)
    /// - `EDGE_VIEWER_PROTOCOL`: `allow-all`, `redirect-to-https` (default), `https-only`
    /// - `EDGE_LISTENER_SCHEME`: `http` (default) or `https`
    /// - `EDGE_ALLOWED_METHODS`: `get-head` (default) or `get-head-options`
    /// - `EDGE_DEFAULT_ROOT_OBJECT` (default: "html")
    /// - `EDGE_DEFAULT_TTL_SECS` (default: 0, nothing cached without origin directives)
    /// - `EDGE_MIN_TTL_SECS` (default: 0)
    /// - `EDGE_MAX_TTL_SECS`: unset means no ceiling
    /// - `EDGE_CACHE_CAPACITY` (default: 1000)
    /// - `EDGE_CACHE_VARY_HEADERS`: comma-separated request headers added to the cache key
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_bind_addr = string_or("API_BIND_ADDR", "127.0.0.1:8081");
        let edge_bind_addr = string_or("EDGE_BIND_ADDR", "0.0.0.0:8080");
        let idle_timeout = millis_or("SERVER_IDLE_TIMEOUT_MS", DEFAULT_IDLE_TIMEOUT)?;
        let parameter_name = string_or("PARAMETER_NAME", DEFAULT_PARAMETER_NAME);
        let parameter_store_file = optional("PARAMETER_STORE_FILE").map(PathBuf::from);

        let store_timeout = millis_or("STORE_TIMEOUT_MS", DEFAULT_STORE_TIMEOUT)?;
        let response_cache_control = optional("RESPONSE_CACHE_CONTROL");

        let edge_origin_url = optional("EDGE_ORIGIN_URL");
        let edge_origin_protocol =
            parsed_or("EDGE_ORIGIN_PROTOCOL", OriginProtocolPolicy::default())?;
        let edge_origin_timeout = millis_or("EDGE_ORIGIN_TIMEOUT_MS", DEFAULT_ORIGIN_TIMEOUT)?;

        let viewer_protocol = parsed_or("EDGE_VIEWER_PROTOCOL", ViewerProtocolPolicy::default())?;
        let listener_scheme = parsed_or("EDGE_LISTENER_SCHEME", ViewerScheme::Http)?;
        let allowed_methods = parsed_or("EDGE_ALLOWED_METHODS", AllowedMethods::default())?;

        let default_root_object = match std::env::var("EDGE_DEFAULT_ROOT_OBJECT") {
            Ok(v) => Some(v.trim().trim_start_matches('/').to_string()).filter(|v| !v.is_empty()),
            Err(_) => Some(DEFAULT_ROOT_OBJECT.to_string()),
        };

        let cache = CachePolicy {
            default_ttl: secs_or("EDGE_DEFAULT_TTL_SECS", Duration::ZERO)?,
            min_ttl: secs_or("EDGE_MIN_TTL_SECS", Duration::ZERO)?,
            max_ttl: optional("EDGE_MAX_TTL_SECS")
                .map(|v| number("EDGE_MAX_TTL_SECS", &v).map(Duration::from_secs))
                .transpose()?,
            capacity: match optional("EDGE_CACHE_CAPACITY") {
                Some(v) => number("EDGE_CACHE_CAPACITY", &v)?,
                None => DEFAULT_CAPACITY,
            },
            vary_headers: std::env::var("EDGE_CACHE_VARY_HEADERS")
                .unwrap_or_default()
                .split(',')
                .map(|s| s.trim().to_ascii_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
        };

        if let Some(max) = cache.max_ttl {
            if max < cache.min_ttl {
                return Err(ConfigError::InvalidValue {
                    key: "EDGE_MAX_TTL_SECS",
                    value: max.as_secs().to_string(),
                    reason: "below EDGE_MIN_TTL_SECS".to_string(),
                });
            }
        }

        tracing::info!(
            api_bind_addr = %api_bind_addr,
            edge_bind_addr = %edge_bind_addr,
            parameter_name = %parameter_name,
            file_store = parameter_store_file.is_some(),
            remote_origin = edge_origin_url.is_some(),
            viewer_protocol = ?viewer_protocol,
            default_ttl = ?cache.default_ttl,
            "configuration loaded"
        );

        Ok(Self {
            api_bind_addr,
            edge_bind_addr,
            idle_timeout,
            parameter_name,
            parameter_store_file,
            store_timeout,
            response_cache_control,
            edge_origin_url,
            edge_origin_protocol,
            edge_origin_timeout,
            viewer_protocol,
            listener_scheme,
            allowed_methods,
            default_root_object,
            cache,
        })
    }

    pub fn endpoint_settings(&self) -> EndpointSettings {
        EndpointSettings {
            parameter_name: self.parameter_name.clone(),
            cache_control: self.response_cache_control.clone(),
            store_timeout: self.store_timeout,
        }
    }

    pub fn edge_settings(&self) -> EdgeSettings {
        EdgeSettings {
            viewer_protocol: self.viewer_protocol,
            listener_scheme: self.listener_scheme,
            allowed_methods: self.allowed_methods,
            default_root_object: self.default_root_object.clone(),
            cache: self.cache.clone(),
        }
    }
}

// Unset and blank are treated alike.
fn optional(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn string_or(key: &str, default: &str) -> String {
    optional(key).unwrap_or_else(|| default.to_string())
}

fn number(key: &'static str, value: &str) -> Result<u64, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidNumber {
        key,
        value: value.to_string(),
    })
}

fn millis_or(key: &'static str, default: Duration) -> Result<Duration, ConfigError> {
    match optional(key) {
        Some(v) => number(key, &v).map(Duration::from_millis),
        None => Ok(default),
    }
}

fn secs_or(key: &'static str, default: Duration) -> Result<Duration, ConfigError> {
    match optional(key) {
        Some(v) => number(key, &v).map(Duration::from_secs),
        None => Ok(default),
    }
}

fn parsed_or<T>(key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr<Err = String>,
{
    match optional(key) {
        Some(v) => v.parse().map_err(|reason| ConfigError::InvalidValue {
            key,
            value: v,
            reason,
        }),
        None => Ok(default),
    }
}
