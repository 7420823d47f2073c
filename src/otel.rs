// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # OpenTelemetry Propagation over AMQP Headers
//!
//! Outgoing messages carry the caller's trace context in their headers, and
//! every delivery is processed inside a consumer span whose parent is the
//! context found on the message. Without a globally installed propagator both
//! directions are no-ops.

use lapin::{
    protocol::basic::AMQPProperties,
    types::{AMQPValue, ShortString},
};
use opentelemetry::{
    global,
    propagation::{Extractor, Injector},
    trace::{SpanKind, TraceContextExt, Tracer},
    Context,
};
use std::{borrow::Cow, collections::BTreeMap};
use tracing::error;

pub(crate) const TRACER_NAME: &str = "broker";

/// Adapter between AMQP headers and the text map propagator.
pub(crate) struct AmqpHeaderCarrier<'a> {
    headers: &'a mut BTreeMap<ShortString, AMQPValue>,
}

impl<'a> AmqpHeaderCarrier<'a> {
    pub(crate) fn new(headers: &'a mut BTreeMap<ShortString, AMQPValue>) -> Self {
        Self { headers }
    }
}

impl Injector for AmqpHeaderCarrier<'_> {
    fn set(&mut self, key: &str, value: String) {
        self.headers.insert(
            key.to_lowercase().into(),
            AMQPValue::LongString(value.into()),
        );
    }
}

impl Extractor for AmqpHeaderCarrier<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.headers.get(key).and_then(|header_value| {
            if let AMQPValue::LongString(header_value) = header_value {
                std::str::from_utf8(header_value.as_bytes())
                    .map_err(|e| error!("Error decoding header value {:?}", e))
                    .ok()
            } else {
                None
            }
        })
    }

    fn keys(&self) -> Vec<&str> {
        self.headers.keys().map(|header| header.as_str()).collect()
    }
}

/// Writes the current trace context into `headers`.
pub(crate) fn inject_context(headers: &mut BTreeMap<ShortString, AMQPValue>) {
    let ctx = Context::current();
    global::get_text_map_propagator(|propagator| {
        propagator.inject_context(&ctx, &mut AmqpHeaderCarrier::new(headers))
    });
}

/// Starts a consumer span named `name`, child of the context carried by
/// `props`.
///
/// # Returns
/// The extracted context with the new span active. Futures run under it see
/// the consumer span as current, so their publishes continue the trace.
pub(crate) fn consumer_context(props: &AMQPProperties, name: &str) -> Context {
    let mut headers = props
        .headers()
        .as_ref()
        .map(|table| table.inner().clone())
        .unwrap_or_default();

    let ctx = global::get_text_map_propagator(|propagator| {
        propagator.extract(&AmqpHeaderCarrier::new(&mut headers))
    });

    let tracer = global::tracer(TRACER_NAME);
    let span = tracer
        .span_builder(Cow::from(name.to_owned()))
        .with_kind(SpanKind::Consumer)
        .start_with_context(&tracer, &ctx);

    ctx.with_span(span)
}
