// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Queue Management for RabbitMQ
//!
//! This module provides the typed queue and binding definitions that the
//! provisioner declares. Definitions are produced from validated configuration.

use crate::{arguments::amqp_arguments, config, config::QueueConfig};
use lapin::types::{AMQPValue, ShortString};
use std::{collections::BTreeMap, time::Duration};

/// Definition of a RabbitMQ queue with its configuration parameters.
///
/// Re-declaring a queue with identical parameters is a no-op on the broker,
/// which makes provisioning idempotent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueueDefinition {
    pub(crate) name: String,
    pub(crate) durable: bool,
    pub(crate) auto_delete: bool,
    pub(crate) exclusive: bool,
    pub(crate) passive: bool,
    pub(crate) arguments: BTreeMap<ShortString, AMQPValue>,
    pub(crate) timeout: Option<Duration>,
}

impl QueueDefinition {
    /// Creates a new queue definition with the given name.
    ///
    /// By default, the queue is created with standard settings (non-durable, non-exclusive, etc.)
    pub fn new(name: &str) -> QueueDefinition {
        QueueDefinition {
            name: name.to_owned(),
            ..QueueDefinition::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Makes the queue durable, persisting across broker restarts.
    pub fn durable(mut self) -> Self {
        self.durable = true;
        self
    }
}

impl From<&QueueConfig> for QueueDefinition {
    fn from(cfg: &QueueConfig) -> Self {
        QueueDefinition {
            name: cfg.name.clone(),
            durable: cfg.durable,
            auto_delete: cfg.auto_delete,
            exclusive: cfg.exclusive,
            passive: cfg.passive,
            arguments: amqp_arguments(&cfg.arguments),
            timeout: config::seconds(cfg.timeout),
        }
    }
}

/// Configuration for binding a queue to an exchange.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueBinding {
    pub(crate) queue_name: String,
    pub(crate) exchange_name: String,
    pub(crate) routing_key: String,
}

impl QueueBinding {
    /// Creates a new queue binding for the given queue.
    ///
    /// By default, the exchange name and routing key are empty strings.
    pub fn new(queue: &str) -> QueueBinding {
        QueueBinding {
            queue_name: queue.to_owned(),
            ..QueueBinding::default()
        }
    }

    /// Sets the exchange to bind the queue to.
    pub fn exchange(mut self, exchange: &str) -> Self {
        self.exchange_name = exchange.to_owned();
        self
    }

    /// Sets the routing key for the binding.
    pub fn routing_key(mut self, key: &str) -> Self {
        self.routing_key = key.to_owned();
        self
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    pub fn exchange_name(&self) -> &str {
        &self.exchange_name
    }

    pub fn key(&self) -> &str {
        &self.routing_key
    }
}
