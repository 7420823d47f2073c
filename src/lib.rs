// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

mod consumer;
mod otel;

pub mod action;
pub mod arguments;
pub mod broker;
pub mod channel;
pub mod config;
pub mod dispatcher;
pub mod errors;
pub mod exchange;
pub mod handler;
pub mod logging;
pub mod post;
pub mod publisher;
pub mod queue;
pub mod service;
pub mod shutdown;
pub mod topology;
pub mod transport;
pub mod validation;

pub use action::{Action, ActionKind, MoveUsersAction, PostAction};
pub use broker::{BrokerKind, MessageBroker, RabbitMQBroker};
pub use config::{BrokerConfig, ServiceConfig};
pub use errors::{AmqpError, BrokerError, HandlerError, ServiceError, ValidationErrors};
pub use handler::{handler_fn, ActionHandler, ConsumerRegistry};
pub use publisher::Message;
pub use service::{Service, ServiceBuilder};
