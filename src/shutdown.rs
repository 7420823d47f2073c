// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Graceful Shutdown
//!
//! Consumers are stopped in phases: every consumer is cancelled, the grace
//! period lets handlers that are already running finish, then every consumer
//! channel is closed. Calls within a phase run concurrently. Handlers still
//! running when the grace period ends lose their channel.

use crate::{
    dispatcher::ConsumerHandle,
    errors::AmqpError,
    transport::{Transport, TransportChannel},
};
use futures_util::future::join_all;
use std::time::Duration;
use tracing::{debug, error};

/// Cancels `consumers`, waits `grace`, then closes their channels.
///
/// Every step runs even if an earlier one failed; the first error is returned.
pub async fn close_consumers(
    consumers: &[ConsumerHandle],
    grace: Duration,
) -> Result<(), AmqpError> {
    if consumers.is_empty() {
        return Ok(());
    }

    debug!(count = consumers.len(), "cancelling consumers");
    for consumer in consumers {
        consumer.mark_stopping();
    }
    let cancelled = join_all(
        consumers
            .iter()
            .map(|consumer| consumer.channel.cancel(&consumer.consumer_tag)),
    )
    .await;

    if !grace.is_zero() {
        debug!(grace_ms = grace.as_millis() as u64, "waiting for in-flight messages");
        tokio::time::sleep(grace).await;
    }

    debug!("closing consumer channels");
    let closed = join_all(consumers.iter().map(|consumer| consumer.channel.close())).await;

    first_error(cancelled.into_iter().chain(closed))
}

/// Closes the consumers, then the shared channel and the connection.
pub async fn shutdown(
    consumers: &[ConsumerHandle],
    grace: Duration,
    channel: &dyn TransportChannel,
    transport: &dyn Transport,
) -> Result<(), AmqpError> {
    let consumers_closed = close_consumers(consumers, grace).await;
    let channel_closed = channel.close().await;
    let transport_closed = transport.close().await;

    first_error([consumers_closed, channel_closed, transport_closed])
}

fn first_error(results: impl IntoIterator<Item = Result<(), AmqpError>>) -> Result<(), AmqpError> {
    let mut first = None;
    for result in results {
        if let Err(err) = result {
            error!(error = err.to_string(), "failure during shutdown");
            first.get_or_insert(err);
        }
    }

    match first {
        Some(err) => Err(err),
        None => Ok(()),
    }
}
