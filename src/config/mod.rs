use std::env;
use std::net::{IpAddr, Ipv4Addr};

use crate::error::RelayError;

/// Default capacity of each connection's outbound queue
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

pub const DEFAULT_PORT: u16 = 8080;

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub relay: RelayConfig,
    pub log_format: LogFormat,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Messages buffered per peer before deliveries to it are skipped
    pub channel_capacity: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: DEFAULT_PORT,
            },
            relay: RelayConfig {
                channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            },
            log_format: LogFormat::Text,
        }
    }
}

impl Config {
    /// Builds the configuration from the process environment and `.env`.
    ///
    /// Recognised variables:
    /// - `SERVER_HOST` (default `0.0.0.0`)
    /// - `SERVER_PORT`, falling back to `PORT` (default `8080`)
    /// - `RELAY_CHANNEL_CAPACITY` (default `256`)
    /// - `LOG_FORMAT`: `text` or `json` (default `text`)
    ///
    /// Invalid values are reported and replaced by their defaults, so the
    /// returned list is empty when everything parsed cleanly.
    pub fn from_env() -> (Self, Vec<RelayError>) {
        dotenv::dotenv().ok();

        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> (Self, Vec<RelayError>) {
        let mut config = Config::default();
        let mut problems = Vec::new();

        if let Some(host) = lookup("SERVER_HOST") {
            config.server.host = host;
        }

        let port = lookup("SERVER_PORT")
            .map(|v| ("SERVER_PORT", v))
            .or_else(|| lookup("PORT").map(|v| ("PORT", v)));
        if let Some((key, value)) = port {
            match value.parse::<u16>() {
                Ok(port) => config.server.port = port,
                Err(_) => problems.push(RelayError::InvalidConfiguration(format!(
                    "{}={} is not a valid port",
                    key, value
                ))),
            }
        }

        if let Some(value) = lookup("RELAY_CHANNEL_CAPACITY") {
            match value.parse::<usize>() {
                Ok(capacity) if capacity > 0 => config.relay.channel_capacity = capacity,
                _ => problems.push(RelayError::InvalidConfiguration(format!(
                    "RELAY_CHANNEL_CAPACITY={} must be a positive integer",
                    value
                ))),
            }
        }

        if let Some(value) = lookup("LOG_FORMAT") {
            match value.to_lowercase().as_str() {
                "json" => config.log_format = LogFormat::Json,
                "text" | "" => config.log_format = LogFormat::Text,
                other => problems.push(RelayError::InvalidConfiguration(format!(
                    "LOG_FORMAT={} is not one of text, json",
                    other
                ))),
            }
        }

        (config, problems)
    }

    pub fn bind_address(&self) -> ([u8; 4], u16) {
        let ip_addr = self.parse_host_to_ipv4();
        (ip_addr.octets(), self.server.port)
    }

    fn parse_host_to_ipv4(&self) -> Ipv4Addr {
        if let Ok(addr) = self.server.host.parse::<IpAddr>() {
            match addr {
                IpAddr::V4(ipv4) => return ipv4,
                IpAddr::V6(_) => {
                    tracing::warn!(
                        host = %self.server.host,
                        "IPv6 address provided but only IPv4 supported, using 0.0.0.0"
                    );
                    return Ipv4Addr::UNSPECIFIED;
                }
            }
        }

        match self.server.host.as_str() {
            "localhost" => Ipv4Addr::LOCALHOST,
            "" | "0.0.0.0" => Ipv4Addr::UNSPECIFIED,
            _ => {
                tracing::warn!(
                    host = %self.server.host,
                    "Unable to parse host as IPv4, using 0.0.0.0"
                );
                Ipv4Addr::UNSPECIFIED
            }
        }
    }
}
