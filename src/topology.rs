// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Topology Management
//!
//! A `Topology` is the validated set of queues, exchanges and bindings a broker
//! declares at startup. Installing it runs three phases in order: every queue,
//! every exchange, then every binding. Calls inside a phase run concurrently;
//! bindings wait for both kinds of endpoints to exist.
//!
//! Declarations are idempotent on the broker side, so installing the same
//! topology twice is harmless. A declaration the broker rejects (for instance
//! a queue re-declared with different arguments) aborts the installation.

use crate::{
    errors::AmqpError,
    exchange::ExchangeDefinition,
    queue::{QueueBinding, QueueDefinition},
    transport::{bounded, TransportChannel},
};
use futures_util::future::try_join_all;
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Topology {
    pub(crate) queues: Vec<QueueDefinition>,
    pub(crate) exchanges: Vec<ExchangeDefinition>,
    pub(crate) bindings: Vec<QueueBinding>,
}

impl Topology {
    pub fn new() -> Self {
        Topology::default()
    }

    /// Adds a queue definition to the topology.
    pub fn queue(mut self, def: QueueDefinition) -> Self {
        self.queues.push(def);
        self
    }

    /// Adds an exchange definition to the topology.
    pub fn exchange(mut self, def: ExchangeDefinition) -> Self {
        self.exchanges.push(def);
        self
    }

    /// Adds a queue-to-exchange binding to the topology.
    pub fn queue_binding(mut self, binding: QueueBinding) -> Self {
        self.bindings.push(binding);
        self
    }

    /// Queues, in declaration order.
    pub fn queues(&self) -> &[QueueDefinition] {
        &self.queues
    }

    pub fn exchanges(&self) -> &[ExchangeDefinition] {
        &self.exchanges
    }

    pub fn bindings(&self) -> &[QueueBinding] {
        &self.bindings
    }

    /// Declares the topology through `channel`.
    ///
    /// # Parameters
    /// * `channel` - Channel used for every declaration
    ///
    /// # Returns
    /// Ok(()) once queues, exchanges and bindings are all declared, or the
    /// first declaration error
    pub async fn install(&self, channel: &dyn TransportChannel) -> Result<(), AmqpError> {
        self.install_queues(channel).await?;
        self.install_exchanges(channel).await?;
        self.binding_queues(channel).await
    }

    async fn install_queues(&self, channel: &dyn TransportChannel) -> Result<(), AmqpError> {
        try_join_all(self.queues.iter().map(|def| async move {
            debug!("creating queue: {}", def.name);
            let operation = format!("declaring queue `{}`", def.name);
            bounded(def.timeout, &operation, channel.declare_queue(def)).await?;
            debug!("queue: {} was created", def.name);
            Ok::<_, AmqpError>(())
        }))
        .await?;

        Ok(())
    }

    async fn install_exchanges(&self, channel: &dyn TransportChannel) -> Result<(), AmqpError> {
        try_join_all(self.exchanges.iter().map(|def| async move {
            debug!("creating exchange: {}", def.name);
            let operation = format!("declaring exchange `{}`", def.name);
            bounded(def.timeout, &operation, channel.declare_exchange(def)).await?;
            debug!("exchange: {} was created", def.name);
            Ok::<_, AmqpError>(())
        }))
        .await?;

        Ok(())
    }

    async fn binding_queues(&self, channel: &dyn TransportChannel) -> Result<(), AmqpError> {
        try_join_all(self.bindings.iter().map(|binding| {
            debug!(
                "binding queue: {} to the exchange: {} with the key: {}",
                binding.queue_name, binding.exchange_name, binding.routing_key
            );
            channel.bind_queue(binding)
        }))
        .await?;

        debug!("queues were bound");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransportChannel;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    fn topology() -> Topology {
        Topology::new()
            .queue(QueueDefinition::new("posts").durable())
            .queue(QueueDefinition::new("dead").durable())
            .exchange(ExchangeDefinition::new("posts").durable())
            .queue_binding(QueueBinding::new("posts").exchange("posts").routing_key("posts"))
    }

    #[tokio::test]
    async fn binds_only_after_every_endpoint_exists() {
        let declared = Arc::new(AtomicUsize::new(0));
        let mut channel = MockTransportChannel::new();

        let counter = declared.clone();
        channel.expect_declare_queue().times(2).returning(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        let counter = declared.clone();
        channel.expect_declare_exchange().times(1).returning(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        let counter = declared.clone();
        channel
            .expect_bind_queue()
            .times(1)
            .withf(|b| b.queue_name() == "posts" && b.exchange_name() == "posts" && b.key() == "posts")
            .returning(move |_| {
                assert_eq!(counter.load(Ordering::SeqCst), 3);
                Ok(())
            });

        topology().install(&channel).await.unwrap();
    }

    #[tokio::test]
    async fn queue_rejection_aborts_before_bindings() {
        let mut channel = MockTransportChannel::new();
        channel.expect_declare_queue().returning(|def| {
            if def.name() == "dead" {
                Err(AmqpError::DeclareQueueError("dead".to_owned()))
            } else {
                Ok(())
            }
        });
        channel.expect_declare_exchange().never();
        channel.expect_bind_queue().never();

        let err = topology().install(&channel).await.unwrap_err();
        assert_eq!(err, AmqpError::DeclareQueueError("dead".to_owned()));
    }

    #[tokio::test]
    async fn installing_twice_redeclares_everything() {
        let mut channel = MockTransportChannel::new();
        channel.expect_declare_queue().times(4).returning(|_| Ok(()));
        channel.expect_declare_exchange().times(2).returning(|_| Ok(()));
        channel.expect_bind_queue().times(2).returning(|_| Ok(()));

        let topology = topology();
        topology.install(&channel).await.unwrap();
        topology.install(&channel).await.unwrap();
    }
}
