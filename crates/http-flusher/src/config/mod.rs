use std::collections::HashMap;
use std::env;
use std::time::Duration;

use reqwest::header::{HeaderName, HeaderValue};
use thiserror::Error;
use url::Url;

use crate::convert::{ConvertConfig, Encoding, Protocol};
use crate::retry::RetryConfig;

const ENV_PREFIX: &str = "HTTP_FLUSHER_";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    Gzip,
    None,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("HTTP_FLUSHER_REMOTE_URL is required but not set")]
    RemoteUrlMissing,

    #[error("HTTP_FLUSHER_REMOTE_URL is not a valid URL: {0}")]
    RemoteUrlInvalid(String),

    #[error("remote URL must use http or https, got {0}")]
    RemoteUrlScheme(String),

    #[error("{0} has invalid value: {1}")]
    InvalidNumeric(String, String),

    #[error("{0} has invalid value: {1} (expected \"true\" or \"false\")")]
    InvalidBool(String, String),

    #[error("invalid header {0}")]
    InvalidHeader(String),

    #[error("concurrency must be at least 1")]
    ZeroConcurrency,

    #[error("HTTP_FLUSHER_COMPRESSION has invalid value: {0} (expected \"gzip\" or \"none\")")]
    InvalidCompression(String),

    #[error("HTTP_FLUSHER_PROTOCOL has unknown value: {0}")]
    UnknownProtocol(String),

    #[error("HTTP_FLUSHER_ENCODING has unknown value: {0}")]
    UnknownEncoding(String),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub remote_url: Url,
    /// Query key to template, kept in configuration order.
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub timeout: Duration,
    pub concurrency: usize,
    pub retry: RetryConfig,
    pub convert: ConvertConfig,
    pub compression: Compression,
}

impl Config {
    /// Defaults for everything but the endpoint and the serialization setup.
    pub fn new(remote_url: Url, convert: ConvertConfig) -> Self {
        Self {
            remote_url,
            query: Vec::new(),
            headers: Vec::new(),
            timeout: Duration::from_secs(60),
            concurrency: 1,
            retry: RetryConfig::default(),
            convert,
            compression: Compression::None,
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        let vars: HashMap<String, String> = env::vars()
            .filter(|(k, _)| k.starts_with(ENV_PREFIX))
            .collect();
        Self::parse(&vars)
    }

    fn parse(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let remote_url = parse_remote_url(vars)?;
        let convert = ConvertConfig {
            protocol: parse_protocol(vars)?,
            encoding: parse_encoding(vars)?,
            separator: vars
                .get("HTTP_FLUSHER_SEPARATOR")
                .filter(|s| !s.is_empty())
                .map(|s| unescape(s)),
        };

        let retry = RetryConfig {
            enabled: parse_bool(vars, "HTTP_FLUSHER_RETRY_ENABLE", true)?,
            max_attempts: parse_number(vars, "HTTP_FLUSHER_RETRY_MAX_ATTEMPTS", 3)?,
            initial_delay: parse_duration_ms(vars, "HTTP_FLUSHER_RETRY_INITIAL_DELAY_MS", 1000)?,
            max_delay: parse_duration_ms(vars, "HTTP_FLUSHER_RETRY_MAX_DELAY_MS", 30_000)?,
            retry_status_codes: parse_status_codes(vars, "HTTP_FLUSHER_RETRY_STATUS_CODES")?,
        };

        let config = Self {
            remote_url,
            query: vars
                .get("HTTP_FLUSHER_QUERY")
                .map(|raw| parse_key_values(raw))
                .unwrap_or_default(),
            headers: vars
                .get("HTTP_FLUSHER_HEADERS")
                .map(|raw| parse_key_values(raw))
                .unwrap_or_default(),
            timeout: parse_duration_ms(vars, "HTTP_FLUSHER_TIMEOUT_MS", 60_000)?,
            concurrency: parse_number(vars, "HTTP_FLUSHER_CONCURRENCY", 1)?,
            retry,
            convert,
            compression: parse_compression(vars)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks invariants that typed fields cannot express on their own.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.remote_url.scheme() {
            "http" | "https" => {}
            other => return Err(ConfigError::RemoteUrlScheme(other.to_owned())),
        }
        if self.concurrency == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        for (k, v) in &self.headers {
            if HeaderName::from_bytes(k.as_bytes()).is_err() || HeaderValue::from_str(v).is_err() {
                return Err(ConfigError::InvalidHeader(k.clone()));
            }
        }
        Ok(())
    }
}

fn parse_remote_url(vars: &HashMap<String, String>) -> Result<Url, ConfigError> {
    let raw = vars
        .get("HTTP_FLUSHER_REMOTE_URL")
        .filter(|s| !s.trim().is_empty())
        .ok_or(ConfigError::RemoteUrlMissing)?;

    Url::parse(raw).map_err(|_| ConfigError::RemoteUrlInvalid(raw.clone()))
}

fn parse_protocol(vars: &HashMap<String, String>) -> Result<Option<Protocol>, ConfigError> {
    match vars.get("HTTP_FLUSHER_PROTOCOL").map(|s| s.trim()) {
        None | Some("") => Ok(None),
        Some(raw) => Protocol::parse(raw)
            .map(Some)
            .ok_or_else(|| ConfigError::UnknownProtocol(raw.to_owned())),
    }
}

fn parse_encoding(vars: &HashMap<String, String>) -> Result<Option<Encoding>, ConfigError> {
    match vars.get("HTTP_FLUSHER_ENCODING").map(|s| s.trim()) {
        None | Some("") => Ok(None),
        Some(raw) => Encoding::parse(raw)
            .map(Some)
            .ok_or_else(|| ConfigError::UnknownEncoding(raw.to_owned())),
    }
}

fn parse_number<T: std::str::FromStr>(
    vars: &HashMap<String, String>,
    name: &str,
    default: T,
) -> Result<T, ConfigError> {
    match vars.get(name) {
        Some(val) => val
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidNumeric(name.to_owned(), val.clone())),
        None => Ok(default),
    }
}

fn parse_duration_ms(
    vars: &HashMap<String, String>,
    name: &str,
    default_ms: u64,
) -> Result<Duration, ConfigError> {
    parse_number(vars, name, default_ms).map(Duration::from_millis)
}

fn parse_bool(
    vars: &HashMap<String, String>,
    name: &str,
    default: bool,
) -> Result<bool, ConfigError> {
    match vars.get(name).map(|s| s.trim().to_ascii_lowercase()) {
        None => Ok(default),
        Some(val) => match val.as_str() {
            "true" | "1" => Ok(true),
            "false" | "0" => Ok(false),
            _ => Err(ConfigError::InvalidBool(name.to_owned(), val)),
        },
    }
}

fn parse_compression(vars: &HashMap<String, String>) -> Result<Compression, ConfigError> {
    match vars
        .get("HTTP_FLUSHER_COMPRESSION")
        .map(|s| s.as_str())
    {
        Some("none") | None => Ok(Compression::None),
        Some("gzip") => Ok(Compression::Gzip),
        Some(other) => Err(ConfigError::InvalidCompression(other.to_owned())),
    }
}

fn parse_status_codes(
    vars: &HashMap<String, String>,
    name: &str,
) -> Result<Vec<u16>, ConfigError> {
    let Some(raw) = vars.get(name).filter(|s| !s.trim().is_empty()) else {
        return Ok(Vec::new());
    };
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|code| match code.parse::<u16>() {
            Ok(n) if (100..=599).contains(&n) => Ok(n),
            _ => Err(ConfigError::InvalidNumeric(name.to_owned(), code.to_owned())),
        })
        .collect()
}

/// Parse `key=value,key2=value2` into ordered pairs. Entries without `=` or
/// with an empty key are dropped.
pub fn parse_key_values(raw: &str) -> Vec<(String, String)> {
    raw.split(',')
        .filter_map(|pair| {
            let (k, v) = pair.split_once('=')?;
            let k = k.trim();
            let v = v.trim();
            if k.is_empty() {
                return None;
            }
            Some((k.to_owned(), v.to_owned()))
        })
        .collect()
}

/// Expand `\n`, `\r`, `\t` and `\\` so separators can be written in env vars.
fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}
