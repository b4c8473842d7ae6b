//! Hub Configuration Settings
//!
//! Sections of the YAML file. Every field has a default so a file only
//! needs to name its data sources.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::application::services::{
    DEFAULT_INGRESS_CAPACITY, DEFAULT_INGRESS_SEND_TIMEOUT, DEFAULT_SHUTDOWN_TIMEOUT, HubConfig,
};
use crate::domain::market_data::Symbol;
use crate::domain::subscription::DEFAULT_SUBSCRIBER_BUFFER;
use crate::infrastructure::yahoo::{DEFAULT_BASE_URL, DEFAULT_REFRESH_INTERVAL, YahooConfig};

/// One polled data source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSourceSettings {
    /// Symbols requested on every poll.
    #[serde(default)]
    pub symbols: Vec<Symbol>,
    /// Time between polls.
    #[serde(default = "default_refresh_interval", with = "super::duration")]
    pub refresh_interval: Duration,
    /// Endpoint root; the public Yahoo endpoint when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

impl DataSourceSettings {
    /// Poller settings for this source.
    #[must_use]
    pub fn yahoo_config(&self) -> YahooConfig {
        YahooConfig {
            base_url: self
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            symbols: self.symbols.clone(),
            refresh_interval: self.refresh_interval,
            ..YahooConfig::default()
        }
    }
}

/// Hub tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSettings {
    /// Capacity of each subscriber queue.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// Capacity of the shared ingress queue.
    #[serde(default = "default_ingress_capacity")]
    pub ingress_capacity: usize,
    /// How long an ingestion loop waits for ingress capacity.
    #[serde(default = "default_ingress_send_timeout", with = "super::duration")]
    pub ingress_send_timeout: Duration,
    /// Bound on the stop sequence.
    #[serde(default = "default_shutdown_timeout", with = "super::duration")]
    pub shutdown_timeout: Duration,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            buffer_size: default_buffer_size(),
            ingress_capacity: default_ingress_capacity(),
            ingress_send_timeout: default_ingress_send_timeout(),
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

impl From<&ServiceSettings> for HubConfig {
    fn from(settings: &ServiceSettings) -> Self {
        Self {
            subscriber_buffer: settings.buffer_size,
            ingress_capacity: settings.ingress_capacity,
            ingress_send_timeout: settings.ingress_send_timeout,
            shutdown_timeout: settings.shutdown_timeout,
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Health check HTTP port.
    #[serde(default = "default_health_port")]
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            health_port: default_health_port(),
        }
    }
}

const fn default_refresh_interval() -> Duration {
    DEFAULT_REFRESH_INTERVAL
}

const fn default_buffer_size() -> usize {
    DEFAULT_SUBSCRIBER_BUFFER
}

const fn default_ingress_capacity() -> usize {
    DEFAULT_INGRESS_CAPACITY
}

const fn default_ingress_send_timeout() -> Duration {
    DEFAULT_INGRESS_SEND_TIMEOUT
}

const fn default_shutdown_timeout() -> Duration {
    DEFAULT_SHUTDOWN_TIMEOUT
}

const fn default_health_port() -> u16 {
    8083
}
