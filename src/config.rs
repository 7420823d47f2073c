// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Broker Configuration
//!
//! Declarative configuration for a broker instance and for the service that
//! assembles several of them. The documents are plain serde structures so they
//! can be read from JSON or TOML files, or built in memory from a
//! `serde_json::Value`.
//!
//! ```json
//! {
//!   "common": { "logger_name": "postiel.rabbitmq" },
//!   "connection": { "host": "localhost", "port": 5672 },
//!   "create": {
//!     "queues": [{ "name": "posts", "durable": true }],
//!     "exchanges": [{ "name": "posts", "type": "direct", "durable": true }],
//!     "bindings": [{ "queue_name": "posts", "exchange_name": "posts", "routing_key": "posts" }]
//!   },
//!   "consumers": [{ "queue_name": "posts", "consumer_name": "post_consumer" }]
//! }
//! ```

use crate::errors::ConfigError;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::{collections::BTreeMap, fs, path::Path, time::Duration};
use tracing::debug;

/// Characters left as-is in URI components. Everything else, including `/`,
/// is percent-encoded.
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Opaque implementation-specific arguments attached to queues and exchanges.
pub type Arguments = BTreeMap<String, Value>;

/// Root configuration of one broker instance.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct BrokerConfig {
    pub common: CommonConfig,

    #[serde(default)]
    pub connection: ConnectionConfig,

    #[serde(default)]
    pub create: CreateConfig,

    #[serde(default)]
    pub consumers: Vec<ConsumerConfig>,

    #[serde(default)]
    pub failed_consumers: Vec<ConsumerConfig>,
}

impl BrokerConfig {
    pub fn from_value(value: Value) -> Result<Self, ConfigError> {
        Ok(serde_json::from_value(value)?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct CommonConfig {
    pub logger_name: String,
}

/// Connection parameters. `url`, when present, overrides every other field
/// used to build the AMQP URI.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ConnectionConfig {
    #[serde(default)]
    pub url: Option<String>,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_credential")]
    pub login: String,

    #[serde(default = "default_credential")]
    pub password: String,

    #[serde(default = "default_virtualhost")]
    pub virtualhost: String,

    #[serde(default)]
    pub ssl: bool,

    #[serde(default)]
    pub ssl_options: Option<SslOptions>,

    /// Connection timeout in seconds.
    #[serde(default)]
    pub timeout: Option<f64>,

    #[serde(default)]
    pub client_properties: Arguments,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: default_host(),
            port: default_port(),
            login: default_credential(),
            password: default_credential(),
            virtualhost: default_virtualhost(),
            ssl: false,
            ssl_options: None,
            timeout: None,
            client_properties: Arguments::default(),
        }
    }
}

impl ConnectionConfig {
    /// Builds the AMQP URI for this connection.
    ///
    /// # Returns
    /// `url` verbatim when set. Otherwise a URI assembled from the individual
    /// fields, with login, password and virtual host percent-encoded so any
    /// character survives parsing.
    pub fn uri(&self) -> String {
        if let Some(url) = &self.url {
            return url.clone();
        }

        let scheme = if self.ssl { "amqps" } else { "amqp" };
        let mut uri = format!(
            "{}://{}:{}@{}:{}/{}",
            scheme,
            utf8_percent_encode(&self.login, URI_COMPONENT),
            utf8_percent_encode(&self.password, URI_COMPONENT),
            self.host,
            self.port,
            utf8_percent_encode(&self.virtualhost, URI_COMPONENT)
        );

        if let Some(timeout) = seconds(self.timeout) {
            uri.push_str(&format!("?connection_timeout={}", timeout.as_millis()));
        }

        uri
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct SslOptions {
    /// PEM bundle used to verify the server certificate.
    #[serde(default)]
    pub ca_file: Option<String>,
}

fn default_host() -> String {
    "localhost".to_owned()
}

fn default_port() -> u16 {
    5672
}

fn default_credential() -> String {
    "guest".to_owned()
}

fn default_virtualhost() -> String {
    "/".to_owned()
}

/// Topology to declare before consumers start.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct CreateConfig {
    #[serde(default)]
    pub queues: Vec<QueueConfig>,

    #[serde(default)]
    pub exchanges: Vec<ExchangeConfig>,

    #[serde(default)]
    pub bindings: Vec<BindingConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct QueueConfig {
    pub name: String,

    #[serde(default)]
    pub durable: bool,

    #[serde(default)]
    pub exclusive: bool,

    #[serde(default)]
    pub passive: bool,

    #[serde(default)]
    pub auto_delete: bool,

    #[serde(default)]
    pub arguments: Arguments,

    #[serde(default)]
    pub timeout: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ExchangeConfig {
    pub name: String,

    #[serde(rename = "type", default = "default_exchange_type")]
    pub kind: String,

    #[serde(default)]
    pub durable: bool,

    #[serde(default)]
    pub auto_delete: bool,

    #[serde(default)]
    pub internal: bool,

    #[serde(default)]
    pub passive: bool,

    #[serde(default)]
    pub arguments: Arguments,

    #[serde(default)]
    pub timeout: Option<f64>,
}

fn default_exchange_type() -> String {
    "direct".to_owned()
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct BindingConfig {
    pub queue_name: String,
    pub exchange_name: String,

    #[serde(default)]
    pub routing_key: String,
}

/// Prefetch limits. Signed so that negative values reach validation instead
/// of failing deserialization with an unhelpful message.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct QosConfig {
    #[serde(default)]
    pub prefetch_count: i64,

    #[serde(default)]
    pub prefetch_size: i64,

    #[serde(default, alias = "global_")]
    pub global: bool,

    #[serde(default)]
    pub timeout: Option<f64>,
}

/// Destination for messages whose handler failed.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RoutingConfig {
    pub routing_key: String,
    pub exchange_name: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ConsumerConfig {
    pub queue_name: String,
    pub consumer_name: String,

    #[serde(default)]
    pub qos: QosConfig,

    #[serde(default)]
    pub failed_message_routing: Option<RoutingConfig>,
}

/// Root configuration of a service owning several named brokers.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub logging: Option<LoggingConfig>,

    #[serde(default)]
    pub message_brokers: BTreeMap<String, MessageBrokerConfig>,
}

impl ServiceConfig {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        load(path)
    }
}

/// One broker entry: which implementation to use and its own configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct MessageBrokerConfig {
    pub class_name: String,
    pub config: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct LoggingConfig {
    pub logger_name: String,

    #[serde(default = "default_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

fn default_level() -> String {
    "info".to_owned()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Full,
    Compact,
    Json,
}

/// Reads a configuration document, choosing the format by file extension.
pub fn load<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T, ConfigError> {
    let path = path.as_ref();
    debug!(path = %path.display(), "loading config");

    let data = fs::read_to_string(path)?;
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => Ok(serde_json::from_str(&data)?),
        Some("toml") => Ok(toml::from_str(&data)?),
        other => Err(ConfigError::UnsupportedFormat(
            other.unwrap_or_default().to_owned(),
        )),
    }
}

/// Converts an optional number of seconds into a duration, ignoring values
/// that cannot be represented (negative, NaN or infinite).
pub(crate) fn seconds(value: Option<f64>) -> Option<Duration> {
    value.and_then(|secs| Duration::try_from_secs_f64(secs).ok())
}
