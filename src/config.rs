//! Server configuration module
//! Handles dynamic configuration parameters for the relay server

use crate::constants::{
    DEFAULT_CLASSIFIER_TIMEOUT_SECS, DEFAULT_HOST, DEFAULT_MODEL, DEFAULT_MODERATION_ENDPOINT,
    DEFAULT_PORT, DEFAULT_SEND_QUEUE_CAPACITY, DEFAULT_WRITE_TIMEOUT_SECS, MAX_IMAGE_BYTES,
};
use crate::core::ip_extractor::IpExtractionConfig;
use crate::error::{RelayError, Result};
use std::env;
use std::net::IpAddr;
use std::time::Duration;

/// Resolved values the relay core runs with
#[derive(Debug, Clone)]
pub struct RelaySettings {
    /// Upper bound on one classifier call; expiry counts as a BLOCK
    pub classifier_timeout: Duration,
    /// Per-recipient outbound queue; a full queue drops the recipient
    pub send_queue_capacity: usize,
    /// Upper bound on writing one frame to a peer socket
    pub write_timeout: Duration,
    /// Whether chat and image events are echoed back to their sender
    pub echo_to_sender: bool,
    pub max_image_bytes: usize,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            classifier_timeout: Duration::from_secs(DEFAULT_CLASSIFIER_TIMEOUT_SECS),
            send_queue_capacity: DEFAULT_SEND_QUEUE_CAPACITY,
            write_timeout: Duration::from_secs(DEFAULT_WRITE_TIMEOUT_SECS),
            echo_to_sender: true,
            max_image_bytes: MAX_IMAGE_BYTES,
        }
    }
}

/// Server configuration parameters
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Moderation-service credential
    pub api_key: String,
    pub model: String,
    pub moderation_endpoint: String,
    pub verbose: bool,
    pub relay: RelaySettings,
    pub ip_extraction: IpExtractionConfig,
    /// TLS configuration
    pub enable_tls: bool,
    pub tls_cert_path: Option<String>,
    pub tls_key_path: Option<String>,
}

fn env_flag(name: &str) -> Option<bool> {
    env::var(name)
        .ok()
        .map(|v| v.to_lowercase() == "true" || v == "1")
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

impl ServerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let host = env::var("MODCHAT_HOST").unwrap_or(DEFAULT_HOST.to_string());
        let port = env_parse("MODCHAT_PORT").unwrap_or(DEFAULT_PORT);

        let api_key = env::var("MODCHAT_GEMINI_API_KEY")
            .or_else(|_| env::var("GEMINI_API_KEY"))
            .map_err(|_| {
                RelayError::ConfigError(
                    "GEMINI_API_KEY environment variable is required for content moderation".to_string(),
                )
            })?;
        if api_key.trim().is_empty() {
            return Err(RelayError::ConfigError("GEMINI_API_KEY must not be empty".to_string()));
        }

        let model = env::var("MODCHAT_MODEL").unwrap_or(DEFAULT_MODEL.to_string());
        let moderation_endpoint =
            env::var("MODCHAT_MODERATION_ENDPOINT").unwrap_or(DEFAULT_MODERATION_ENDPOINT.to_string());
        let verbose = env_flag("MODCHAT_VERBOSE").unwrap_or(false);

        let classifier_timeout_secs: u64 =
            env_parse("MODCHAT_CLASSIFIER_TIMEOUT_SECS").unwrap_or(DEFAULT_CLASSIFIER_TIMEOUT_SECS);
        if classifier_timeout_secs == 0 {
            return Err(RelayError::ConfigError(
                "MODCHAT_CLASSIFIER_TIMEOUT_SECS must be greater than zero".to_string(),
            ));
        }
        let write_timeout_secs: u64 =
            env_parse("MODCHAT_WRITE_TIMEOUT_SECS").unwrap_or(DEFAULT_WRITE_TIMEOUT_SECS);
        let send_queue_capacity: usize =
            env_parse("MODCHAT_SEND_QUEUE").unwrap_or(DEFAULT_SEND_QUEUE_CAPACITY);
        if send_queue_capacity == 0 {
            return Err(RelayError::ConfigError("MODCHAT_SEND_QUEUE must be greater than zero".to_string()));
        }

        let relay = RelaySettings {
            classifier_timeout: Duration::from_secs(classifier_timeout_secs),
            send_queue_capacity,
            write_timeout: Duration::from_secs(write_timeout_secs.max(1)),
            echo_to_sender: env_flag("MODCHAT_ECHO_SENDER").unwrap_or(true),
            max_image_bytes: MAX_IMAGE_BYTES,
        };

        let trust_proxy_headers = env_flag("MODCHAT_TRUST_PROXY").unwrap_or(false);
        let trusted_proxies = Self::parse_proxies(&env::var("MODCHAT_TRUSTED_PROXIES").unwrap_or_default())?;
        if trust_proxy_headers && trusted_proxies.is_empty() {
            return Err(RelayError::ConfigError(
                "MODCHAT_TRUST_PROXY is enabled but MODCHAT_TRUSTED_PROXIES is empty".to_string(),
            ));
        }

        // TLS configuration
        let enable_tls = env_flag("MODCHAT_ENABLE_TLS").unwrap_or(false);
        let tls_cert_path = env::var("MODCHAT_TLS_CERT_PATH").ok();
        let tls_key_path = env::var("MODCHAT_TLS_KEY_PATH").ok();

        if enable_tls {
            match (&tls_cert_path, &tls_key_path) {
                (Some(cert_path), Some(key_path)) => {
                    if !std::path::Path::new(cert_path).exists() {
                        return Err(RelayError::ConfigError(format!(
                            "TLS certificate file does not exist: {}",
                            cert_path
                        )));
                    }
                    if !std::path::Path::new(key_path).exists() {
                        return Err(RelayError::ConfigError(format!(
                            "TLS private key file does not exist: {}",
                            key_path
                        )));
                    }
                }
                _ => {
                    return Err(RelayError::ConfigError(
                        "TLS is enabled but MODCHAT_TLS_CERT_PATH or MODCHAT_TLS_KEY_PATH is not set".to_string(),
                    ))
                }
            }
        }

        Ok(Self {
            host,
            port,
            api_key,
            model,
            moderation_endpoint,
            verbose,
            relay,
            ip_extraction: IpExtractionConfig {
                trust_proxy_headers,
                trusted_proxies,
            },
            enable_tls,
            tls_cert_path,
            tls_key_path,
        })
    }

    /// Parse a comma-separated list of proxy addresses
    fn parse_proxies(raw: &str) -> Result<Vec<IpAddr>> {
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<IpAddr>()
                    .map_err(|e| RelayError::ConfigError(format!("Invalid trusted proxy '{}': {}", s, e)))
            })
            .collect()
    }
}
