// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Exchange Management for RabbitMQ
//!
//! This module provides types for defining RabbitMQ exchanges. Exchanges are the
//! routing mechanism in RabbitMQ that determine how messages are distributed to
//! queues. Delayed delivery relies on the `x-delayed-message` exchange plugin.

use crate::{arguments::amqp_arguments, config, config::ExchangeConfig};
use lapin::types::{AMQPValue, ShortString};
use std::{collections::BTreeMap, fmt, str::FromStr, time::Duration};

/// Represents the types of exchanges available in RabbitMQ.
///
/// Each exchange type has specific routing behavior:
/// - Direct: Routes messages to queues based on an exact match of routing keys
/// - Fanout: Broadcasts messages to all bound queues regardless of routing keys
/// - Topic: Routes messages based on wildcard pattern matching of routing keys
/// - Headers: Routes based on message header values instead of routing keys
/// - XMessageDelayed: Extension for delayed message delivery (plugin required)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ExchangeKind {
    #[default]
    Direct,
    Fanout,
    Topic,
    Headers,
    XMessageDelayed,
}

impl ExchangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeKind::Direct => "direct",
            ExchangeKind::Fanout => "fanout",
            ExchangeKind::Topic => "topic",
            ExchangeKind::Headers => "headers",
            ExchangeKind::XMessageDelayed => "x-delayed-message",
        }
    }
}

impl fmt::Display for ExchangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExchangeKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "direct" => Ok(ExchangeKind::Direct),
            "fanout" => Ok(ExchangeKind::Fanout),
            "topic" => Ok(ExchangeKind::Topic),
            "headers" => Ok(ExchangeKind::Headers),
            "x-delayed-message" => Ok(ExchangeKind::XMessageDelayed),
            _ => Err(value.to_owned()),
        }
    }
}

impl From<&ExchangeKind> for lapin::ExchangeKind {
    /// Delayed exchanges are declared as a custom type that requires the
    /// delayed message exchange plugin.
    fn from(kind: &ExchangeKind) -> lapin::ExchangeKind {
        match kind {
            ExchangeKind::Direct => lapin::ExchangeKind::Direct,
            ExchangeKind::Fanout => lapin::ExchangeKind::Fanout,
            ExchangeKind::Headers => lapin::ExchangeKind::Headers,
            ExchangeKind::Topic => lapin::ExchangeKind::Topic,
            ExchangeKind::XMessageDelayed => {
                lapin::ExchangeKind::Custom(ExchangeKind::XMessageDelayed.as_str().to_owned())
            }
        }
    }
}

/// Definition of a RabbitMQ exchange with its configuration parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExchangeDefinition {
    pub(crate) name: String,
    pub(crate) kind: ExchangeKind,
    pub(crate) auto_delete: bool,
    pub(crate) durable: bool,
    pub(crate) passive: bool,
    pub(crate) internal: bool,
    pub(crate) params: BTreeMap<ShortString, AMQPValue>,
    pub(crate) timeout: Option<Duration>,
}

impl ExchangeDefinition {
    /// Creates a new Direct exchange definition with the given name.
    pub fn new(name: &str) -> ExchangeDefinition {
        ExchangeDefinition {
            name: name.to_owned(),
            ..ExchangeDefinition::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Makes the exchange durable, persisting across broker restarts.
    pub fn durable(mut self) -> Self {
        self.durable = true;
        self
    }
}

impl TryFrom<&ExchangeConfig> for ExchangeDefinition {
    type Error = String;

    /// Fails with the offending type name when the exchange type is unknown.
    fn try_from(cfg: &ExchangeConfig) -> Result<Self, Self::Error> {
        Ok(ExchangeDefinition {
            name: cfg.name.clone(),
            kind: cfg.kind.parse()?,
            auto_delete: cfg.auto_delete,
            durable: cfg.durable,
            passive: cfg.passive,
            internal: cfg.internal,
            params: amqp_arguments(&cfg.arguments),
            timeout: config::seconds(cfg.timeout),
        })
    }
}

/// An exchange known to exist on the broker, ready to receive publishes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExchangeHandle {
    name: String,
}

impl ExchangeHandle {
    pub fn new(name: &str) -> Self {
        ExchangeHandle {
            name: name.to_owned(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}
