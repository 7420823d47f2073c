// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Message Broker
//!
//! `RabbitMQBroker` ties the pieces together. Initialization validates the
//! configuration before any network call, connects, installs the topology on
//! the shared channel, then starts every configured consumer on its own
//! channel. If any step fails the connection is closed and nothing is left
//! running.
//!
//! The shared channel serves topology declarations and publishing. Consumer
//! channels are never used for anything but their consumer.

use crate::{
    channel::AmqpConnector,
    config::BrokerConfig,
    dispatcher::{ConsumerDefinition, ConsumerHandle, Dispatcher},
    errors::{BrokerError, ConfigError},
    handler::ConsumerRegistry,
    publisher::{Message, Publisher},
    shutdown,
    transport::{Connector, Transport, TransportChannel},
    validation::{validate, ValidatedConfig},
};
use async_trait::async_trait;
use std::{fmt, str::FromStr, sync::Arc, time::Duration};
use tokio::sync::Mutex;
use tracing::{debug, error, info, info_span, Instrument, Span};

/// Capability shared by every broker implementation.
#[async_trait]
pub trait MessageBroker: Send + Sync {
    /// Publishes one message.
    async fn send(&self, msg: &Message) -> Result<(), BrokerError>;

    /// Starts the consumers draining failed messages. Consumers already
    /// running are left alone.
    async fn load_failed(&self) -> Result<(), BrokerError>;

    /// Stops every consumer and closes the connection.
    async fn close(&self) -> Result<(), BrokerError>;
}

/// Broker implementations selectable from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerKind {
    RabbitMq,
}

impl FromStr for BrokerKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RabbitMQ" => Ok(BrokerKind::RabbitMq),
            other => Err(ConfigError::UnknownBrokerClass(other.to_owned())),
        }
    }
}

impl fmt::Display for BrokerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BrokerKind::RabbitMq => f.write_str("RabbitMQ"),
        }
    }
}

impl BrokerKind {
    pub async fn initialize(
        &self,
        config: BrokerConfig,
        connector: &dyn Connector,
        registry: Arc<ConsumerRegistry>,
        close_grace: Duration,
    ) -> Result<Arc<dyn MessageBroker>, BrokerError> {
        match self {
            BrokerKind::RabbitMq => {
                let broker =
                    RabbitMQBroker::initialize_with(config, connector, registry, close_grace)
                        .await?;
                Ok(Arc::new(broker))
            }
        }
    }
}

#[derive(Default)]
struct ConsumerSet {
    running: Vec<ConsumerHandle>,
    failed_loaded: bool,
    closed: bool,
}

/// A RabbitMQ connection with its topology, publisher and consumers.
pub struct RabbitMQBroker {
    transport: Arc<dyn Transport>,
    channel: Arc<dyn TransportChannel>,
    publisher: Arc<Publisher>,
    dispatcher: Dispatcher,
    main_consumers: Vec<ConsumerDefinition>,
    failed_consumers: Vec<ConsumerDefinition>,
    consumers: Mutex<ConsumerSet>,
    close_grace: Duration,
    span: Span,
}

impl RabbitMQBroker {
    /// Initializes a broker over a lapin connection.
    pub async fn initialize(
        config: BrokerConfig,
        registry: Arc<ConsumerRegistry>,
        close_grace: Duration,
    ) -> Result<Self, BrokerError> {
        Self::initialize_with(config, &AmqpConnector, registry, close_grace).await
    }

    /// Initializes a broker over the transport `connector` opens.
    ///
    /// # Parameters
    /// * `config` - Connection, topology and consumers of this broker
    /// * `connector` - Opens the connection once the configuration is valid
    /// * `registry` - Handlers the configured consumers are bound to
    /// * `close_grace` - Time in-flight handlers get when the broker closes
    ///
    /// # Returns
    /// A broker with its topology installed and its main consumers running
    pub async fn initialize_with(
        config: BrokerConfig,
        connector: &dyn Connector,
        registry: Arc<ConsumerRegistry>,
        close_grace: Duration,
    ) -> Result<Self, BrokerError> {
        let span = info_span!("broker", logger = %config.common.logger_name);

        let validated = validate(&config, &registry).map_err(|err| {
            error!(parent: &span, error = err.to_string(), "invalid broker configuration");
            err
        })?;

        let transport = connector
            .connect(&config.common, &config.connection)
            .instrument(span.clone())
            .await?;

        match Self::setup(transport.clone(), validated, registry, close_grace, span.clone())
            .instrument(span.clone())
            .await
        {
            Ok(broker) => {
                info!(parent: &span, "broker initialized");
                Ok(broker)
            }
            Err(err) => {
                error!(parent: &span, error = err.to_string(), "failure to initialize broker");
                if let Err(close) = transport.close().await {
                    error!(parent: &span, error = close.to_string(), "failure to close connection");
                }
                Err(err)
            }
        }
    }

    async fn setup(
        transport: Arc<dyn Transport>,
        validated: ValidatedConfig,
        registry: Arc<ConsumerRegistry>,
        close_grace: Duration,
        span: Span,
    ) -> Result<Self, BrokerError> {
        let channel = transport.open_channel().await?;
        validated.topology.install(channel.as_ref()).await?;

        let publisher = Arc::new(Publisher::new(channel.clone()));
        let dispatcher = Dispatcher::new(
            transport.clone(),
            registry,
            publisher.clone(),
            span.clone(),
        );
        let running = dispatcher.start_consumers(&validated.consumers).await?;
        debug!(count = running.len(), "consumers started");

        Ok(RabbitMQBroker {
            transport,
            channel,
            publisher,
            dispatcher,
            main_consumers: validated.consumers,
            failed_consumers: validated.failed_consumers,
            consumers: Mutex::new(ConsumerSet {
                running,
                ..ConsumerSet::default()
            }),
            close_grace,
            span,
        })
    }

    /// Tags of the consumers currently running.
    pub async fn consumer_tags(&self) -> Vec<String> {
        let consumers = self.consumers.lock().await;
        consumers
            .running
            .iter()
            .map(|c| c.consumer_tag().to_owned())
            .collect()
    }

    /// Consumers this broker is meant to run.
    ///
    /// # Returns
    /// The main consumers, followed by the failed message consumers once
    /// `load_failed` has started them. Empty after `close`.
    pub async fn registrations(&self) -> Vec<ConsumerDefinition> {
        let consumers = self.consumers.lock().await;
        if consumers.closed {
            return vec![];
        }

        let mut registrations = self.main_consumers.clone();
        if consumers.failed_loaded {
            registrations.extend(self.failed_consumers.iter().cloned());
        }
        registrations
    }

    /// Registrations whose delivery stream ended without being cancelled,
    /// which is what a dropped connection leaves behind.
    pub async fn stopped_consumers(&self) -> Vec<ConsumerDefinition> {
        let consumers = self.consumers.lock().await;
        consumers
            .running
            .iter()
            .filter(|c| c.is_finished())
            .map(|c| c.definition().clone())
            .collect()
    }
}

#[async_trait]
impl MessageBroker for RabbitMQBroker {
    async fn send(&self, msg: &Message) -> Result<(), BrokerError> {
        self.publisher.send(msg).instrument(self.span.clone()).await
    }

    async fn load_failed(&self) -> Result<(), BrokerError> {
        let mut consumers = self.consumers.lock().await;
        if consumers.closed || consumers.failed_loaded {
            debug!(parent: &self.span, "failed message consumers already handled");
            return Ok(());
        }

        let started = self
            .dispatcher
            .start_consumers(&self.failed_consumers)
            .instrument(self.span.clone())
            .await?;
        info!(parent: &self.span, count = started.len(), "failed message consumers started");

        consumers.running.extend(started);
        consumers.failed_loaded = true;
        Ok(())
    }

    async fn close(&self) -> Result<(), BrokerError> {
        let running = {
            let mut consumers = self.consumers.lock().await;
            if consumers.closed {
                return Ok(());
            }
            consumers.closed = true;
            std::mem::take(&mut consumers.running)
        };

        info!(parent: &self.span, count = running.len(), "closing broker");
        shutdown::shutdown(
            &running,
            self.close_grace,
            self.channel.as_ref(),
            self.transport.as_ref(),
        )
        .instrument(self.span.clone())
        .await?;
        Ok(())
    }
}
