//! Configuration module for the callbridge server
//!
//! This module handles server configuration from various sources: .env files,
//! YAML files, and environment variables. Priority: YAML > ENV vars > .env
//! values > defaults.
//!
//! # Modules
//! - `yaml`: YAML configuration file loading
//!
//! # Example
//! ```rust,no_run
//! use callbridge::config::ServerConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = ServerConfig::from_env()?;
//!
//! // Load from YAML file with environment variable base
//! let config_path = PathBuf::from("config.yaml");
//! let config = ServerConfig::from_file(&config_path)?;
//!
//! println!("Server listening on {}", config.address());
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;

mod yaml;

pub use yaml::YamlConfig;

use crate::core::realtime::DEFAULT_CONFIG_SEND_DELAY_MS;

/// Default listening port for the telephony webhook and media stream.
pub const DEFAULT_PORT: u16 = 5050;

/// Default realtime model.
pub const DEFAULT_REALTIME_MODEL: &str = "gpt-4o-realtime-preview-2024-10-01";

/// Default voice for synthesized output.
pub const DEFAULT_REALTIME_VOICE: &str = "alloy";

/// Default sampling temperature.
pub const DEFAULT_REALTIME_TEMPERATURE: f32 = 0.8;

/// Default system instructions for the voice assistant.
pub const DEFAULT_SYSTEM_INSTRUCTIONS: &str = "You are a helpful and bubbly AI assistant \
     who loves to chat about anything the user is interested in and is always ready to \
     offer facts. Always stay positive, but work in a joke when appropriate.";

/// TLS configuration for HTTPS and WSS
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsConfig {
    /// Path to the TLS certificate file (PEM format)
    pub cert_path: PathBuf,
    /// Path to the TLS private key file (PEM format)
    pub key_path: PathBuf,
}

/// Server configuration
///
/// Contains all configuration needed to run the callbridge server, including:
/// - Server settings (host, port, TLS)
/// - OpenAI Realtime API settings (key, model, voice, instructions)
/// - Security settings (CORS, rate limiting, connection limits)
#[derive(Debug, Clone)]
pub struct ServerConfig {
    // Server settings
    pub host: String,
    pub port: u16,

    // TLS configuration (optional)
    pub tls: Option<TlsConfig>,

    /// OpenAI API key for the Realtime API. Required: the server refuses to
    /// start without it (there is nothing to bridge calls to).
    pub openai_api_key: Option<String>,
    /// Realtime model name
    pub realtime_model: String,
    /// Voice for synthesized output (alloy, ash, ballad, coral, echo, sage,
    /// shimmer, verse)
    pub realtime_voice: String,
    /// System instructions sent in the per-call session configuration
    pub system_instructions: String,
    /// Sampling temperature (0.0 - 2.0)
    pub realtime_temperature: f32,
    /// Realtime endpoint override. When unset the public OpenAI endpoint is
    /// used; set for self-hosted gateways and the integration test suite.
    pub realtime_endpoint: Option<String>,
    /// Fallback delay before the per-call configuration send (ms)
    pub config_send_delay_ms: u64,

    // Security configuration
    /// CORS allowed origins (comma-separated list or "*" for all)
    /// Default: None (CORS disabled, same-origin only)
    pub cors_allowed_origins: Option<String>,

    // Rate limiting configuration
    /// Maximum requests per second per IP address
    /// Default: 60
    pub rate_limit_requests_per_second: u32,
    /// Maximum burst size for rate limiting
    /// Default: 10
    pub rate_limit_burst_size: u32,

    // Connection limits
    /// Maximum concurrent WebSocket connections
    /// Default: None (unlimited, matching the reference server)
    pub max_websocket_connections: Option<usize>,
    /// Maximum connections per IP address
    /// Default: 100
    pub max_connections_per_ip: u32,
}

/// Implement Drop to zeroize the API key when ServerConfig is dropped so the
/// secret is cleared from memory immediately after use.
impl Drop for ServerConfig {
    fn drop(&mut self) {
        use zeroize::Zeroize;

        if let Some(ref mut key) = self.openai_api_key {
            key.zeroize();
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            tls: None,
            openai_api_key: None,
            realtime_model: DEFAULT_REALTIME_MODEL.to_string(),
            realtime_voice: DEFAULT_REALTIME_VOICE.to_string(),
            system_instructions: DEFAULT_SYSTEM_INSTRUCTIONS.to_string(),
            realtime_temperature: DEFAULT_REALTIME_TEMPERATURE,
            realtime_endpoint: None,
            config_send_delay_ms: DEFAULT_CONFIG_SEND_DELAY_MS,
            cors_allowed_origins: None,
            rate_limit_requests_per_second: 60,
            rate_limit_burst_size: 10,
            max_websocket_connections: None,
            max_connections_per_ip: 100,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables
    ///
    /// Values not present in the environment fall back to defaults. The .env
    /// file (if any) is loaded in main.rs at application startup, so its
    /// values appear here as ordinary environment variables.
    ///
    /// # Errors
    /// Returns an error if an environment variable has an invalid format or
    /// if validation fails (notably a missing `OPENAI_API_KEY`).
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let config = Self::load_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file with environment variable base
    ///
    /// Priority order (highest to lowest):
    /// 1. YAML file values
    /// 2. Environment variables (actual ENV vars override .env values)
    /// 3. .env file values
    /// 4. Default values
    ///
    /// # Errors
    /// Returns an error if:
    /// - The YAML file cannot be read or is malformed
    /// - Environment variables have invalid formats
    /// - Configuration validation fails
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let yaml_config = YamlConfig::from_file(path)?;
        let mut config = Self::load_env()?;
        config.apply_yaml(yaml_config);
        config.validate()?;
        Ok(config)
    }

    /// Get the server address as a string in the format "host:port"
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check if TLS is enabled
    pub fn is_tls_enabled(&self) -> bool {
        self.tls.is_some()
    }

    /// Build the configuration from environment variables without validating.
    fn load_env() -> Result<Self, Box<dyn std::error::Error>> {
        let mut config = Self::default();

        if let Ok(host) = std::env::var("HOST") {
            config.host = host;
        }
        if let Ok(port) = std::env::var("PORT") {
            config.port = port
                .parse()
                .map_err(|e| format!("Invalid PORT value '{port}': {e}"))?;
        }

        let cert_path = std::env::var("TLS_CERT_PATH").ok();
        let key_path = std::env::var("TLS_KEY_PATH").ok();
        config.tls = match (cert_path, key_path) {
            (Some(cert), Some(key)) => Some(TlsConfig {
                cert_path: PathBuf::from(cert),
                key_path: PathBuf::from(key),
            }),
            (None, None) => None,
            _ => {
                return Err(
                    "TLS_CERT_PATH and TLS_KEY_PATH must be set together to enable TLS".into(),
                );
            }
        };

        config.openai_api_key = std::env::var("OPENAI_API_KEY").ok();
        if let Ok(model) = std::env::var("REALTIME_MODEL") {
            config.realtime_model = model;
        }
        if let Ok(voice) = std::env::var("REALTIME_VOICE") {
            config.realtime_voice = voice;
        }
        if let Ok(instructions) = std::env::var("SYSTEM_INSTRUCTIONS") {
            config.system_instructions = instructions;
        }
        if let Ok(temperature) = std::env::var("REALTIME_TEMPERATURE") {
            config.realtime_temperature = temperature
                .parse()
                .map_err(|e| format!("Invalid REALTIME_TEMPERATURE value '{temperature}': {e}"))?;
        }
        config.realtime_endpoint = std::env::var("REALTIME_ENDPOINT").ok();
        if let Ok(delay) = std::env::var("CONFIG_SEND_DELAY_MS") {
            config.config_send_delay_ms = delay
                .parse()
                .map_err(|e| format!("Invalid CONFIG_SEND_DELAY_MS value '{delay}': {e}"))?;
        }

        config.cors_allowed_origins = std::env::var("CORS_ALLOWED_ORIGINS").ok();
        if let Ok(rps) = std::env::var("RATE_LIMIT_REQUESTS_PER_SECOND") {
            config.rate_limit_requests_per_second = rps.parse().map_err(|e| {
                format!("Invalid RATE_LIMIT_REQUESTS_PER_SECOND value '{rps}': {e}")
            })?;
        }
        if let Ok(burst) = std::env::var("RATE_LIMIT_BURST_SIZE") {
            config.rate_limit_burst_size = burst
                .parse()
                .map_err(|e| format!("Invalid RATE_LIMIT_BURST_SIZE value '{burst}': {e}"))?;
        }
        if let Ok(max) = std::env::var("MAX_WEBSOCKET_CONNECTIONS") {
            config.max_websocket_connections = Some(
                max.parse()
                    .map_err(|e| format!("Invalid MAX_WEBSOCKET_CONNECTIONS value '{max}': {e}"))?,
            );
        }
        if let Ok(max) = std::env::var("MAX_CONNECTIONS_PER_IP") {
            config.max_connections_per_ip = max
                .parse()
                .map_err(|e| format!("Invalid MAX_CONNECTIONS_PER_IP value '{max}': {e}"))?;
        }

        Ok(config)
    }

    /// Overlay YAML values on top of this configuration.
    fn apply_yaml(&mut self, yaml: YamlConfig) {
        if let Some(server) = yaml.server {
            if let Some(host) = server.host {
                self.host = host;
            }
            if let Some(port) = server.port {
                self.port = port;
            }
            if let Some(tls) = server.tls {
                if tls.enabled.unwrap_or(true) {
                    if let (Some(cert), Some(key)) = (tls.cert_path, tls.key_path) {
                        self.tls = Some(TlsConfig {
                            cert_path: PathBuf::from(cert),
                            key_path: PathBuf::from(key),
                        });
                    }
                } else {
                    self.tls = None;
                }
            }
        }

        if let Some(realtime) = yaml.realtime {
            if let Some(api_key) = realtime.api_key {
                self.openai_api_key = Some(api_key);
            }
            if let Some(model) = realtime.model {
                self.realtime_model = model;
            }
            if let Some(voice) = realtime.voice {
                self.realtime_voice = voice;
            }
            if let Some(instructions) = realtime.instructions {
                self.system_instructions = instructions;
            }
            if let Some(temperature) = realtime.temperature {
                self.realtime_temperature = temperature;
            }
            if let Some(endpoint) = realtime.endpoint {
                self.realtime_endpoint = Some(endpoint);
            }
            if let Some(delay) = realtime.config_send_delay_ms {
                self.config_send_delay_ms = delay;
            }
        }

        if let Some(security) = yaml.security {
            if let Some(origins) = security.cors_allowed_origins {
                self.cors_allowed_origins = Some(origins);
            }
            if let Some(rps) = security.rate_limit_requests_per_second {
                self.rate_limit_requests_per_second = rps;
            }
            if let Some(burst) = security.rate_limit_burst_size {
                self.rate_limit_burst_size = burst;
            }
            if let Some(max) = security.max_websocket_connections {
                self.max_websocket_connections = Some(max);
            }
            if let Some(max) = security.max_connections_per_ip {
                self.max_connections_per_ip = max;
            }
        }
    }

    /// Validate the merged configuration.
    ///
    /// The API key check is the process-level half of the credential
    /// contract: the server must refuse to start before binding when the
    /// key is absent, instead of failing every call at bridge time.
    fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        match self.openai_api_key.as_deref() {
            None | Some("") => {
                return Err(
                    "Missing OpenAI API key. Set OPENAI_API_KEY in the environment, \
                     a .env file, or the YAML config."
                        .into(),
                );
            }
            Some(_) => {}
        }

        if !(0.0..=2.0).contains(&self.realtime_temperature) {
            return Err(format!(
                "REALTIME_TEMPERATURE must be between 0.0 and 2.0, got {}",
                self.realtime_temperature
            )
            .into());
        }

        if self.system_instructions.trim().is_empty() {
            return Err("SYSTEM_INSTRUCTIONS must not be empty".into());
        }

        Ok(())
    }
}
