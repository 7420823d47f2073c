// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Consumer Dispatcher
//!
//! This module starts the configured consumers. Every consumer gets its own
//! channel so that prefetch limits and channel-level failures stay isolated,
//! a fresh consumer tag, and a background task that feeds its deliveries to
//! the message processor one at a time.
//!
//! Starting a batch is all-or-nothing: if one consumer cannot start, the ones
//! that already started are cancelled and their channels closed before the
//! error is returned.

use crate::{
    config::RoutingConfig,
    consumer::MessageProcessor,
    errors::AmqpError,
    handler::ConsumerRegistry,
    publisher::Publisher,
    shutdown,
    transport::{bounded, DeliveryStream, Transport, TransportChannel},
};
use futures_util::{future::join_all, StreamExt};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn, Instrument, Span};
use uuid::Uuid;

/// Prefetch limits applied to a consumer channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QosDefinition {
    pub(crate) prefetch_count: u16,
    pub(crate) prefetch_size: u32,
    pub(crate) global: bool,
    pub(crate) timeout: Option<Duration>,
}

/// A validated consumer: which queue to read, which handler to feed, and
/// where failed messages go.
///
/// Definitions outlive the consumers started from them, so a broker can tell
/// which registrations a lost connection took down.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumerDefinition {
    pub(crate) queue_name: String,
    pub(crate) consumer_name: String,
    pub(crate) qos: QosDefinition,
    pub(crate) failed_routing: Option<RoutingConfig>,
}

impl ConsumerDefinition {
    /// Creates a definition reading `queue_name` with the handler registered
    /// as `consumer_name`, without prefetch limits or failed-message routing.
    pub fn new(queue_name: &str, consumer_name: &str) -> Self {
        ConsumerDefinition {
            queue_name: queue_name.to_owned(),
            consumer_name: consumer_name.to_owned(),
            qos: QosDefinition::default(),
            failed_routing: None,
        }
    }

    pub fn qos(mut self, qos: QosDefinition) -> Self {
        self.qos = qos;
        self
    }

    /// Reroutes actions whose handler failed to `exchange_name` with
    /// `routing_key`.
    pub fn failed_routing(mut self, exchange_name: &str, routing_key: &str) -> Self {
        self.failed_routing = Some(RoutingConfig {
            exchange_name: exchange_name.to_owned(),
            routing_key: routing_key.to_owned(),
        });
        self
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    pub fn consumer_name(&self) -> &str {
        &self.consumer_name
    }
}

/// A live consumer owned by a broker instance.
pub struct ConsumerHandle {
    pub(crate) channel: Arc<dyn TransportChannel>,
    pub(crate) definition: ConsumerDefinition,
    pub(crate) consumer_tag: String,
    pub(crate) stopping: Arc<AtomicBool>,
    pub(crate) task: JoinHandle<()>,
}

impl ConsumerHandle {
    pub fn consumer_tag(&self) -> &str {
        &self.consumer_tag
    }

    pub fn queue_name(&self) -> &str {
        &self.definition.queue_name
    }

    /// The definition this consumer was started from.
    pub fn definition(&self) -> &ConsumerDefinition {
        &self.definition
    }

    /// Whether the delivery task has stopped.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Flags the end of the delivery stream as expected.
    pub(crate) fn mark_stopping(&self) {
        self.stopping.store(true, Ordering::SeqCst);
    }
}

/// Starts consumers on dedicated channels of one transport.
#[derive(Clone)]
pub struct Dispatcher {
    transport: Arc<dyn Transport>,
    registry: Arc<ConsumerRegistry>,
    publisher: Arc<Publisher>,
    span: Span,
}

impl Dispatcher {
    /// Creates a dispatcher.
    ///
    /// # Parameters
    /// * `transport` - Connection consumer channels are opened on
    /// * `registry` - Handlers, looked up by consumer name
    /// * `publisher` - Publisher used to reroute failed messages
    /// * `span` - Span every delivery task runs in
    pub fn new(
        transport: Arc<dyn Transport>,
        registry: Arc<ConsumerRegistry>,
        publisher: Arc<Publisher>,
        span: Span,
    ) -> Self {
        Dispatcher {
            transport,
            registry,
            publisher,
            span,
        }
    }

    /// Starts every consumer concurrently and returns once all of them are
    /// consuming.
    ///
    /// # Parameters
    /// * `defs` - Consumers to start
    ///
    /// # Returns
    /// One handle per definition, or the first error after every consumer of
    /// the batch that did start has been cancelled and closed
    pub async fn start_consumers(
        &self,
        defs: &[ConsumerDefinition],
    ) -> Result<Vec<ConsumerHandle>, AmqpError> {
        let results = join_all(defs.iter().map(|def| self.start_consumer(def))).await;

        let mut started = Vec::with_capacity(results.len());
        let mut failure = None;
        for result in results {
            match result {
                Ok(handle) => started.push(handle),
                Err(err) if failure.is_none() => failure = Some(err),
                Err(err) => error!(error = err.to_string(), "failure to start consumer"),
            }
        }

        if let Some(err) = failure {
            error!(
                error = err.to_string(),
                started = started.len(),
                "consumer batch failed, unwinding started consumers"
            );
            if let Err(unwind) = shutdown::close_consumers(&started, Duration::ZERO).await {
                error!(error = unwind.to_string(), "failure to unwind consumers");
            }
            return Err(err);
        }

        Ok(started)
    }

    async fn start_consumer(&self, def: &ConsumerDefinition) -> Result<ConsumerHandle, AmqpError> {
        let Some(service_consumer) = self.registry.get(&def.consumer_name) else {
            error!(consumer = def.consumer_name, "consumer is not available");
            return Err(AmqpError::BindingConsumerError(def.consumer_name.clone()));
        };

        let channel = self.transport.open_channel().await?;
        let consumer_tag = new_consumer_tag();

        let stream = match self.subscribe(&channel, def, &consumer_tag).await {
            Ok(stream) => stream,
            Err(err) => {
                if let Err(close) = channel.close().await {
                    error!(error = close.to_string(), "failure to close consumer channel");
                }
                return Err(err);
            }
        };

        let processor = MessageProcessor::new(
            &def.consumer_name,
            service_consumer.clone(),
            def.failed_routing.clone(),
            self.publisher.clone(),
        );

        let stopping = Arc::new(AtomicBool::new(false));
        let task_stopping = stopping.clone();
        let task_tag = consumer_tag.clone();
        let task_consumer = def.consumer_name.clone();
        let task = tokio::spawn(
            async move {
                let mut stream = stream;
                while let Some(result) = stream.next().await {
                    match result {
                        Ok(delivery) => processor.on_delivery(delivery).await,
                        Err(err) => error!(error = err.to_string(), "errors consume msg"),
                    }
                }

                if task_stopping.load(Ordering::SeqCst) {
                    debug!(consumer_tag = task_tag, "consumer stopped");
                } else {
                    warn!(
                        consumer = task_consumer,
                        consumer_tag = task_tag,
                        "delivery stream ended unexpectedly, consumer stopped"
                    );
                }
            }
            .instrument(self.span.clone()),
        );

        debug!(
            consumer = def.consumer_name,
            queue = def.queue_name,
            consumer_tag,
            "consumer started"
        );

        Ok(ConsumerHandle {
            channel,
            definition: def.clone(),
            consumer_tag,
            stopping,
            task,
        })
    }

    async fn subscribe(
        &self,
        channel: &Arc<dyn TransportChannel>,
        def: &ConsumerDefinition,
        consumer_tag: &str,
    ) -> Result<DeliveryStream, AmqpError> {
        let operation = format!("configuring qos for `{}`", def.consumer_name);
        bounded(def.qos.timeout, &operation, channel.qos(&def.qos)).await?;
        channel.get_queue(&def.queue_name).await?;
        channel.consume(&def.queue_name, consumer_tag).await
    }
}

/// Consumer tags are random, so they never repeat within a broker's lifetime.
fn new_consumer_tag() -> String {
    Uuid::new_v4().simple().to_string()
}
