// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # AMQP Channel Management
//!
//! This module establishes the lapin connection described by the broker
//! configuration and implements the transport capability on top of it.

use crate::{
    arguments::amqp_value,
    config::{CommonConfig, ConnectionConfig},
    dispatcher::QosDefinition,
    errors::AmqpError,
    exchange::{ExchangeDefinition, ExchangeHandle},
    queue::{QueueBinding, QueueDefinition},
    transport::{Acknowledger, Connector, DeliveryStream, Incoming, Transport, TransportChannel},
};
use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::{
    acker::Acker,
    options::{
        BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicPublishOptions,
        BasicQosOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
    },
    tcp::OwnedTLSConfig,
    types::{FieldTable, LongString, ShortString},
    BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind,
};
use std::{fs, sync::Arc};
use tracing::{debug, error};

const REPLY_SUCCESS: u16 = 200;

/// Opens the AMQP connection described by `cfg`.
///
/// The connection is named after the broker's logger name so it can be
/// recognised in the RabbitMQ management UI.
pub async fn new_amqp_connection(
    common: &CommonConfig,
    cfg: &ConnectionConfig,
) -> Result<LapinTransport, AmqpError> {
    debug!("creating amqp connection...");
    let mut options = ConnectionProperties::default()
        .with_connection_name(LongString::from(common.logger_name.clone()));
    for (key, value) in &cfg.client_properties {
        options
            .client_properties
            .insert(ShortString::from(key.clone()), amqp_value(value));
    }

    let mut tls = OwnedTLSConfig::default();
    if let Some(ca_file) = cfg.ssl_options.as_ref().and_then(|o| o.ca_file.as_ref()) {
        tls.cert_chain = Some(fs::read_to_string(ca_file).map_err(|err| {
            error!(error = err.to_string(), ca_file, "failure to read ca file");
            AmqpError::ConnectionError
        })?);
    }

    let connection = Connection::connect_with_config(&cfg.uri(), options, tls)
        .await
        .map_err(|err| {
            error!(error = err.to_string(), "failure to connect");
            AmqpError::ConnectionError
        })?;
    debug!("amqp connected");

    Ok(LapinTransport { connection })
}

/// Connector opening lapin connections.
#[derive(Debug, Clone, Copy, Default)]
pub struct AmqpConnector;

#[async_trait]
impl Connector for AmqpConnector {
    async fn connect(
        &self,
        common: &CommonConfig,
        connection: &ConnectionConfig,
    ) -> Result<Arc<dyn Transport>, AmqpError> {
        Ok(Arc::new(new_amqp_connection(common, connection).await?))
    }
}

/// Transport backed by a lapin connection.
pub struct LapinTransport {
    connection: Connection,
}

#[async_trait]
impl Transport for LapinTransport {
    async fn open_channel(&self) -> Result<Arc<dyn TransportChannel>, AmqpError> {
        match self.connection.create_channel().await {
            Ok(channel) => {
                debug!(id = channel.id(), "channel created");
                Ok(Arc::new(LapinChannel { channel }))
            }
            Err(err) => {
                error!(error = err.to_string(), "error to create the channel");
                Err(AmqpError::ChannelError)
            }
        }
    }

    async fn close(&self) -> Result<(), AmqpError> {
        self.connection
            .close(REPLY_SUCCESS, "OK")
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "failure to close connection");
                AmqpError::CloseConnectionError
            })
    }
}

/// Channel backed by a lapin channel.
pub struct LapinChannel {
    channel: Channel,
}

#[async_trait]
impl TransportChannel for LapinChannel {
    async fn declare_queue(&self, def: &QueueDefinition) -> Result<(), AmqpError> {
        self.channel
            .queue_declare(
                &def.name,
                QueueDeclareOptions {
                    passive: def.passive,
                    durable: def.durable,
                    exclusive: def.exclusive,
                    auto_delete: def.auto_delete,
                    nowait: false,
                },
                FieldTable::from(def.arguments.clone()),
            )
            .await
            .map(|_| ())
            .map_err(|err| {
                error!(error = err.to_string(), name = def.name, "error to declare the queue");
                AmqpError::DeclareQueueError(def.name.clone())
            })
    }

    async fn declare_exchange(&self, def: &ExchangeDefinition) -> Result<(), AmqpError> {
        self.channel
            .exchange_declare(
                &def.name,
                (&def.kind).into(),
                ExchangeDeclareOptions {
                    passive: def.passive,
                    durable: def.durable,
                    auto_delete: def.auto_delete,
                    internal: def.internal,
                    nowait: false,
                },
                FieldTable::from(def.params.clone()),
            )
            .await
            .map_err(|err| {
                error!(error = err.to_string(), name = def.name, "error to declare the exchange");
                AmqpError::DeclareExchangeError(def.name.clone())
            })
    }

    async fn bind_queue(&self, binding: &QueueBinding) -> Result<(), AmqpError> {
        self.channel
            .queue_bind(
                &binding.queue_name,
                &binding.exchange_name,
                &binding.routing_key,
                QueueBindOptions { nowait: false },
                FieldTable::default(),
            )
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "error to bind queue to exchange");
                AmqpError::BindingExchangeToQueueError(
                    binding.exchange_name.clone(),
                    binding.queue_name.clone(),
                )
            })
    }

    async fn get_queue(&self, name: &str) -> Result<(), AmqpError> {
        self.channel
            .queue_declare(
                name,
                QueueDeclareOptions {
                    passive: true,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map(|_| ())
            .map_err(|err| {
                error!(error = err.to_string(), name, "error to get the queue");
                AmqpError::GetQueueError(name.to_owned())
            })
    }

    async fn get_exchange(&self, name: &str) -> Result<ExchangeHandle, AmqpError> {
        // The type is ignored by the broker on passive declarations.
        self.channel
            .exchange_declare(
                name,
                ExchangeKind::Direct,
                ExchangeDeclareOptions {
                    passive: true,
                    ..ExchangeDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map(|_| ExchangeHandle::new(name))
            .map_err(|err| {
                error!(error = err.to_string(), name, "error to get the exchange");
                AmqpError::GetExchangeError(name.to_owned())
            })
    }

    async fn qos(&self, qos: &QosDefinition) -> Result<(), AmqpError> {
        if qos.prefetch_size != 0 {
            debug!(
                prefetch_size = qos.prefetch_size,
                "prefetch size is not supported by the server and is ignored"
            );
        }

        self.channel
            .basic_qos(
                qos.prefetch_count,
                BasicQosOptions {
                    global: qos.global,
                },
            )
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "error to configure qos");
                AmqpError::QoSDeclarationError(err.to_string())
            })
    }

    async fn consume(&self, queue: &str, consumer_tag: &str) -> Result<DeliveryStream, AmqpError> {
        let consumer = self
            .channel
            .basic_consume(
                queue,
                consumer_tag,
                BasicConsumeOptions {
                    no_local: false,
                    no_ack: false,
                    exclusive: false,
                    nowait: false,
                },
                FieldTable::default(),
            )
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "error to create the consumer");
                AmqpError::BindingConsumerError(consumer_tag.to_owned())
            })?;

        Ok(consumer
            .map(|result| match result {
                Ok(delivery) => Ok(Incoming::new(
                    delivery.data,
                    delivery.exchange.as_str(),
                    delivery.routing_key.as_str(),
                    delivery.properties,
                    Box::new(LapinAcker(delivery.acker)),
                )),
                Err(err) => Err(AmqpError::ConsumerError(err.to_string())),
            })
            .boxed())
    }

    async fn publish(
        &self,
        exchange: &ExchangeHandle,
        routing_key: &str,
        payload: &[u8],
        properties: BasicProperties,
    ) -> Result<(), AmqpError> {
        self.channel
            .basic_publish(
                exchange.name(),
                routing_key,
                BasicPublishOptions {
                    immediate: false,
                    mandatory: false,
                },
                payload,
                properties,
            )
            .await
            .map(|_| ())
            .map_err(|err| {
                error!(error = err.to_string(), "error publishing message");
                AmqpError::PublishingError(exchange.name().to_owned())
            })
    }

    async fn cancel(&self, consumer_tag: &str) -> Result<(), AmqpError> {
        self.channel
            .basic_cancel(consumer_tag, BasicCancelOptions::default())
            .await
            .map_err(|err| {
                error!(error = err.to_string(), consumer_tag, "error to cancel consumer");
                AmqpError::CancelConsumerError(consumer_tag.to_owned())
            })
    }

    async fn close(&self) -> Result<(), AmqpError> {
        self.channel
            .close(REPLY_SUCCESS, "OK")
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "error to close channel");
                AmqpError::CloseChannelError
            })
    }
}

struct LapinAcker(Acker);

#[async_trait]
impl Acknowledger for LapinAcker {
    async fn ack(&self) -> Result<(), AmqpError> {
        self.0
            .ack(BasicAckOptions { multiple: false })
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "error whiling ack msg");
                AmqpError::AckMessageError
            })
    }
}
