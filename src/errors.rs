// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Error Types for the Broker Layer
//!
//! The broker distinguishes between failures of the transport (`AmqpError`),
//! inconsistencies found in the declarative configuration (`ValidationErrors`),
//! business failures raised by handlers (`HandlerError`) and failures while
//! encoding or decoding actions (`CodecError`). `BrokerError` is what
//! initialization surfaces to the caller.

use thiserror::Error;

/// Represents errors that can occur during AMQP/RabbitMQ operations.
///
/// This enum covers connection and channel handling, topology declaration,
/// consumer registration, publishing and shutdown. Each variant provides
/// specific context about what operation failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AmqpError {
    /// Error establishing a connection to the RabbitMQ server
    #[error("failure to connect")]
    ConnectionError,

    /// Error creating a channel from an established connection
    #[error("failure to create a channel")]
    ChannelError,

    /// Error declaring an exchange with the given name
    #[error("failure to declare an exchange `{0}`")]
    DeclareExchangeError(String),

    /// Error resolving a previously declared exchange
    #[error("failure to get the exchange `{0}`")]
    GetExchangeError(String),

    /// Error declaring a queue with the given name
    #[error("failure to declare a queue `{0}`")]
    DeclareQueueError(String),

    /// Error resolving a queue for consumption
    #[error("failure to get the queue `{0}`")]
    GetQueueError(String),

    /// Error binding an exchange to a queue
    #[error("failure to binding exchange `{0}` to queue `{1}`")]
    BindingExchangeToQueueError(String, String),

    /// Error binding a consumer to a queue
    #[error("failure to declare consumer `{0}`")]
    BindingConsumerError(String),

    /// Error publishing a message to the given exchange
    #[error("failure to publish to `{0}`")]
    PublishingError(String),

    /// Error acknowledging a message
    #[error("failure to ack message")]
    AckMessageError,

    /// Error configuring Quality of Service parameters
    #[error("failure to configure qos `{0}`")]
    QoSDeclarationError(String),

    /// Error cancelling a consumer by tag
    #[error("failure to cancel consumer `{0}`")]
    CancelConsumerError(String),

    /// Error closing a channel
    #[error("failure to close channel")]
    CloseChannelError,

    /// Error closing the connection
    #[error("failure to close connection")]
    CloseConnectionError,

    /// A transport call did not complete within its configured timeout
    #[error("timeout while {0}")]
    Timeout(String),

    /// Error consuming a message
    #[error("failure to consume message `{0}`")]
    ConsumerError(String),
}

/// A single inconsistency found while validating a broker configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationIssue {
    /// Two entries of `create.queues` share a name.
    #[error("queue `{0}` is declared more than once")]
    DuplicateQueue(String),

    /// Two entries of `create.exchanges` share a name.
    #[error("exchange `{0}` is declared more than once")]
    DuplicateExchange(String),

    /// The exchange type is none of the kinds RabbitMQ knows.
    #[error("exchange `{exchange}` has unknown type `{kind}`")]
    UnknownExchangeType { exchange: String, kind: String },

    /// A binding names a queue missing from `create.queues`.
    #[error("binding references queue `{0}` which is not declared in queues")]
    UndeclaredBindingQueue(String),

    /// A binding names an exchange missing from `create.exchanges`.
    #[error("binding references exchange `{0}` which is not declared in exchanges")]
    UndeclaredBindingExchange(String),

    /// A consumer reads a queue missing from `create.queues`.
    #[error("consumer `{consumer}` reads from queue `{queue}` which is not declared in queues")]
    UndeclaredConsumerQueue { consumer: String, queue: String },

    /// No handler was registered under the consumer name.
    #[error("consumer `{0}` is not available in the handler registry")]
    UnknownConsumer(String),

    /// The failed-message exchange is missing from `create.exchanges`.
    #[error("consumer `{consumer}` routes failed messages to exchange `{exchange}` which is not declared in exchanges")]
    UndeclaredFailedRoutingExchange { consumer: String, exchange: String },

    /// `prefetch_count` or `prefetch_size` is below zero.
    #[error("consumer `{consumer}` has a negative qos `{field}`")]
    NegativeQos { consumer: String, field: &'static str },

    /// `prefetch_count` does not fit 16 bits, or `prefetch_size` 32 bits.
    #[error("consumer `{consumer}` has qos `{field}` out of range")]
    QosOutOfRange { consumer: String, field: &'static str },
}

/// Every inconsistency found in one configuration, in discovery order.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error(
    "invalid broker configuration: {}",
    .0.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
)]
pub struct ValidationErrors(pub Vec<ValidationIssue>);

impl ValidationErrors {
    pub fn issues(&self) -> &[ValidationIssue] {
        &self.0
    }
}

/// Failure raised by a business handler while processing an action.
#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("{0}")]
    Failed(String),

    /// The handler panicked. Carries the panic message when it was a string.
    #[error("handler panicked: {0}")]
    Panicked(String),

    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl HandlerError {
    pub fn failed(msg: impl Into<String>) -> Self {
        HandlerError::Failed(msg.into())
    }
}

/// Errors raised while turning actions into bytes and back.
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("failure to encode action: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("failure to decode action: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("unsupported action encoding version `{0}`")]
    UnsupportedVersion(u32),

    #[error("expected action `{expected}` but received `{found}`")]
    UnexpectedKind { expected: String, found: String },
}

/// Errors raised while loading configuration documents.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failure to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("failure to parse json config: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failure to parse toml config: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("unsupported config format `{0}`")]
    UnsupportedFormat(String),

    #[error("unknown message broker class `{0}`")]
    UnknownBrokerClass(String),
}

/// Errors surfaced by broker initialization and publishing.
#[derive(Error, Debug)]
pub enum BrokerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Validation(#[from] ValidationErrors),

    #[error(transparent)]
    Amqp(#[from] AmqpError),

    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Errors surfaced by the service layer that owns several brokers.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failure to initialize broker `{name}`: {source}")]
    Broker {
        name: String,
        #[source]
        source: BrokerError,
    },

    #[error("failure to install logging: {0}")]
    Logging(String),
}
