// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Message Consumer
//!
//! The processor invoked for every delivery of one consumer. It decodes the
//! payload into the action kind the consumer was registered with, runs the
//! handler and, when the handler fails, reroutes the action to the consumer's
//! failed-message destination if one is configured.
//!
//! Every delivery is acknowledged once processing returns, whatever the
//! outcome. Failed messages are rerouted, never redelivered to the same
//! consumer.

use crate::{
    action::Action,
    config::RoutingConfig,
    errors::HandlerError,
    handler::ServiceConsumer,
    otel,
    publisher::{Message, Publisher},
    transport::Incoming,
};
use futures_util::FutureExt as _;
use opentelemetry::{
    trace::{FutureExt as _, Status, TraceContextExt},
    Context,
};
use std::{any::Any, borrow::Cow, panic::AssertUnwindSafe, sync::Arc};
use tracing::{debug, error};

pub(crate) struct MessageProcessor {
    consumer_name: String,
    consumer: ServiceConsumer,
    failed_routing: Option<RoutingConfig>,
    publisher: Arc<Publisher>,
}

impl MessageProcessor {
    pub(crate) fn new(
        consumer_name: &str,
        consumer: ServiceConsumer,
        failed_routing: Option<RoutingConfig>,
        publisher: Arc<Publisher>,
    ) -> Self {
        MessageProcessor {
            consumer_name: consumer_name.to_owned(),
            consumer,
            failed_routing,
            publisher,
        }
    }

    /// Processes one delivery and acknowledges it.
    ///
    /// Decoding, the handler and the reroute all run under the consumer span,
    /// so anything they publish joins the trace the message arrived with.
    pub(crate) async fn on_delivery(&self, delivery: Incoming) {
        let kind = self.consumer.action_kind();
        let cx = otel::consumer_context(&delivery.properties, kind.as_str());

        debug!(
            consumer = self.consumer_name,
            exchange = delivery.exchange,
            routing_key = delivery.routing_key,
            "received message"
        );

        match Action::decode_as(&delivery.data, kind) {
            Ok(action) => self.process(action, &cx).with_context(cx.clone()).await,
            Err(err) => {
                error!(
                    error = err.to_string(),
                    consumer = self.consumer_name,
                    "removing message from queue - reason: undecodable payload"
                );
                cx.span().record_error(&err);
                cx.span().set_status(Status::Error {
                    description: Cow::from("undecodable payload"),
                });
            }
        }

        if let Err(err) = delivery.ack().await {
            error!(error = err.to_string(), "error whiling ack msg");
            cx.span().record_error(&err);
        }
        cx.span().end();
    }

    async fn process(&self, action: Action, cx: &Context) {
        let Err(err) = self.handle(action.clone()).await else {
            debug!(consumer = self.consumer_name, "message successfully processed");
            cx.span().set_status(Status::Ok);
            return;
        };

        error!(
            error = err.to_string(),
            consumer = self.consumer_name,
            "error whiling handling msg"
        );
        cx.span().record_error(&err);
        cx.span().set_status(Status::Error {
            description: Cow::from("handler failure"),
        });

        let Some(routing) = &self.failed_routing else {
            debug!(
                consumer = self.consumer_name,
                "no failed message routing configured, dropping message"
            );
            return;
        };

        let msg = Message::new(action, &routing.exchange_name, &routing.routing_key);
        if let Err(err) = self.publisher.send(&msg).await {
            error!(
                error = err.to_string(),
                exchange = routing.exchange_name,
                routing_key = routing.routing_key,
                "failure to reroute failed message, message lost"
            );
        }
    }

    /// Runs the handler, turning a panic into a handler failure.
    async fn handle(&self, action: Action) -> Result<(), HandlerError> {
        AssertUnwindSafe(self.consumer.handler.handle(action))
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| Err(HandlerError::Panicked(panic_message(payload))))
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(msg) => *msg,
        Err(payload) => payload
            .downcast_ref::<&str>()
            .map_or_else(|| "non-string panic payload".to_owned(), |msg| (*msg).to_owned()),
    }
}
