// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Transport Capability
//!
//! The broker core never talks to the wire directly. It drives a connection
//! (`Transport`) that hands out channels (`TransportChannel`), and each channel
//! exposes the declare, bind, consume, publish, cancel and close primitives the
//! core needs. `channel.rs` implements these traits on top of lapin.

use crate::{
    config::{CommonConfig, ConnectionConfig},
    dispatcher::QosDefinition,
    errors::AmqpError,
    exchange::{ExchangeDefinition, ExchangeHandle},
    queue::{QueueBinding, QueueDefinition},
};
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use lapin::BasicProperties;
use std::{fmt, future::Future, sync::Arc, time::Duration};
use tracing::error;

/// Stream of deliveries for one consumer tag. It ends once the consumer is
/// cancelled or its channel is closed.
pub type DeliveryStream = BoxStream<'static, Result<Incoming, AmqpError>>;

/// Opens transports for broker instances.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        common: &CommonConfig,
        connection: &ConnectionConfig,
    ) -> Result<Arc<dyn Transport>, AmqpError>;
}

/// A connection able to open channels.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    async fn open_channel(&self) -> Result<Arc<dyn TransportChannel>, AmqpError>;

    async fn close(&self) -> Result<(), AmqpError>;
}

/// One AMQP channel.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TransportChannel: Send + Sync {
    async fn declare_queue(&self, def: &QueueDefinition) -> Result<(), AmqpError>;

    async fn declare_exchange(&self, def: &ExchangeDefinition) -> Result<(), AmqpError>;

    async fn bind_queue(&self, binding: &QueueBinding) -> Result<(), AmqpError>;

    /// Resolves an existing queue without modifying it.
    async fn get_queue(&self, name: &str) -> Result<(), AmqpError>;

    /// Resolves an existing exchange without modifying it.
    async fn get_exchange(&self, name: &str) -> Result<ExchangeHandle, AmqpError>;

    async fn qos(&self, qos: &QosDefinition) -> Result<(), AmqpError>;

    async fn consume(&self, queue: &str, consumer_tag: &str) -> Result<DeliveryStream, AmqpError>;

    async fn publish(
        &self,
        exchange: &ExchangeHandle,
        routing_key: &str,
        payload: &[u8],
        properties: BasicProperties,
    ) -> Result<(), AmqpError>;

    async fn cancel(&self, consumer_tag: &str) -> Result<(), AmqpError>;

    async fn close(&self) -> Result<(), AmqpError>;
}

/// Settles one delivery on the broker side.
#[async_trait]
pub trait Acknowledger: Send + Sync {
    async fn ack(&self) -> Result<(), AmqpError>;
}

/// A message delivered to a consumer.
pub struct Incoming {
    pub data: Vec<u8>,
    pub exchange: String,
    pub routing_key: String,
    pub properties: BasicProperties,
    acker: Box<dyn Acknowledger>,
}

impl Incoming {
    pub fn new(
        data: Vec<u8>,
        exchange: &str,
        routing_key: &str,
        properties: BasicProperties,
        acker: Box<dyn Acknowledger>,
    ) -> Self {
        Incoming {
            data,
            exchange: exchange.to_owned(),
            routing_key: routing_key.to_owned(),
            properties,
            acker,
        }
    }

    pub async fn ack(&self) -> Result<(), AmqpError> {
        self.acker.ack().await
    }
}

impl fmt::Debug for Incoming {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Incoming")
            .field("exchange", &self.exchange)
            .field("routing_key", &self.routing_key)
            .field("len", &self.data.len())
            .finish()
    }
}

/// Runs `fut`, failing with `AmqpError::Timeout` if it outlives `timeout`.
pub(crate) async fn bounded<T, F>(
    timeout: Option<Duration>,
    operation: &str,
    fut: F,
) -> Result<T, AmqpError>
where
    F: Future<Output = Result<T, AmqpError>>,
{
    let Some(limit) = timeout else {
        return fut.await;
    };

    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => {
            error!(timeout_ms = limit.as_millis() as u64, operation, "transport call timed out");
            Err(AmqpError::Timeout(operation.to_owned()))
        }
    }
}
