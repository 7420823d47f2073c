// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Message Publisher
//!
//! Publishes actions on the broker's shared channel. Exchange handles are
//! resolved lazily and cached for the lifetime of the publisher; concurrent
//! first publishes to the same exchange share a single resolution call.
//!
//! A message scheduled for later carries an `x-delay` header with the number
//! of milliseconds until its publish time, as understood by the delayed
//! message exchange plugin.

use crate::{
    action::Action,
    errors::{AmqpError, BrokerError},
    exchange::ExchangeHandle,
    otel,
    transport::TransportChannel,
};
use chrono::{DateTime, Utc};
use lapin::{
    types::{AMQPValue, FieldTable, ShortString},
    BasicProperties,
};
use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, error};
use uuid::Uuid;

/// Default content type for JSON messages
pub const JSON_CONTENT_TYPE: &str = "application/json";
/// Header read by the delayed message exchange plugin
pub const AMQP_HEADERS_DELAY: &str = "x-delay";

/// An outbound action and where it goes.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub action: Action,
    pub exchange_name: String,
    pub routing_key: String,
    pub publish_datetime: Option<DateTime<Utc>>,
}

impl Message {
    /// Creates a message for immediate delivery.
    ///
    /// # Parameters
    /// * `action` - The action to publish
    /// * `exchange_name` - Exchange receiving the message. It must exist on the broker
    /// * `routing_key` - Routing key used by the exchange
    pub fn new(action: impl Into<Action>, exchange_name: &str, routing_key: &str) -> Self {
        Message {
            action: action.into(),
            exchange_name: exchange_name.to_owned(),
            routing_key: routing_key.to_owned(),
            publish_datetime: None,
        }
    }

    /// Holds the message back until `at`.
    pub fn scheduled(mut self, at: DateTime<Utc>) -> Self {
        self.publish_datetime = Some(at);
        self
    }
}

/// Publishes actions on the shared channel of a broker.
///
/// Exchanges are looked up once per name and cached for the life of the
/// publisher. A failed lookup is not cached.
pub struct Publisher {
    channel: Arc<dyn TransportChannel>,
    exchanges: Mutex<HashMap<String, Arc<OnceCell<ExchangeHandle>>>>,
}

impl Publisher {
    /// Creates a publisher.
    ///
    /// # Parameters
    /// * `channel` - Channel every publish goes through
    ///
    /// # Returns
    /// A publisher with an empty exchange cache
    pub fn new(channel: Arc<dyn TransportChannel>) -> Self {
        Publisher {
            channel,
            exchanges: Mutex::new(HashMap::new()),
        }
    }

    /// Publishes `msg`. Failures are returned to the caller, never retried.
    ///
    /// The current trace context travels in the message headers, and a
    /// scheduled message carries its remaining delay in `x-delay`.
    ///
    /// # Returns
    /// Ok(()) once the broker accepted the message, or the encoding, lookup
    /// or publish failure
    pub async fn send(&self, msg: &Message) -> Result<(), BrokerError> {
        let payload = msg.action.encode()?;

        let mut headers = BTreeMap::<ShortString, AMQPValue>::default();
        otel::inject_context(&mut headers);

        if let Some(at) = msg.publish_datetime {
            let delay = delay_millis(at, Utc::now());
            headers.insert(
                ShortString::from(AMQP_HEADERS_DELAY),
                AMQPValue::LongLongInt(delay),
            );
        }

        let exchange = self.exchange(&msg.exchange_name).await?;

        let kind = msg.action.kind();
        debug!(
            exchange = msg.exchange_name,
            routing_key = msg.routing_key,
            kind = kind.as_str(),
            "publishing message"
        );

        self.channel
            .publish(
                &exchange,
                &msg.routing_key,
                &payload,
                BasicProperties::default()
                    .with_content_type(ShortString::from(JSON_CONTENT_TYPE))
                    .with_type(ShortString::from(kind.as_str()))
                    .with_message_id(ShortString::from(Uuid::new_v4().simple().to_string()))
                    .with_headers(FieldTable::from(headers)),
            )
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "error publishing message");
                BrokerError::from(err)
            })
    }

    async fn exchange(&self, name: &str) -> Result<ExchangeHandle, AmqpError> {
        let cell = {
            let mut exchanges = self.exchanges.lock().await;
            exchanges.entry(name.to_owned()).or_default().clone()
        };

        cell.get_or_try_init(|| async {
            debug!(name, "resolving exchange");
            self.channel.get_exchange(name).await
        })
        .await
        .cloned()
    }
}

/// Milliseconds from `now` until `at`. Past instants yield negative values.
pub(crate) fn delay_millis(at: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (at - now).num_milliseconds()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{action::MoveUsersAction, post::ChannelId, transport::MockTransportChannel};
    use chrono::Duration;
    use futures_util::future::join_all;
    use std::sync::Mutex as StdMutex;

    fn message() -> Message {
        Message::new(
            MoveUsersAction {
                channel: ChannelId::Id(1),
                users: vec![ChannelId::from("ana")],
            },
            "posts",
            "posts",
        )
    }

    fn recording_channel(sent: Arc<StdMutex<Vec<BasicProperties>>>) -> MockTransportChannel {
        let mut channel = MockTransportChannel::new();
        channel
            .expect_get_exchange()
            .times(1)
            .returning(|name| Ok(ExchangeHandle::new(name)));
        channel
            .expect_publish()
            .returning(move |exchange, key, _, properties| {
                assert_eq!(exchange.name(), "posts");
                assert_eq!(key, "posts");
                sent.lock().unwrap().push(properties);
                Ok(())
            });
        channel
    }

    fn delay_header(properties: &BasicProperties) -> Option<AMQPValue> {
        properties
            .headers()
            .as_ref()
            .and_then(|headers| headers.inner().get(AMQP_HEADERS_DELAY).cloned())
    }

    #[tokio::test]
    async fn scheduled_messages_carry_a_delay_header() {
        let sent = Arc::new(StdMutex::new(vec![]));
        let publisher = Publisher::new(Arc::new(recording_channel(sent.clone())));

        let at = Utc::now() + Duration::seconds(5);
        publisher.send(&message().scheduled(at)).await.unwrap();
        publisher.send(&message()).await.unwrap();

        let sent = sent.lock().unwrap();
        match delay_header(&sent[0]) {
            Some(AMQPValue::LongLongInt(ms)) => assert!((4_900..=5_000).contains(&ms), "{ms}"),
            other => panic!("unexpected delay header {other:?}"),
        }
        assert_eq!(delay_header(&sent[1]), None);
        assert_eq!(
            sent[1].kind().as_ref().map(|k| k.as_str()),
            Some("move_users")
        );
        assert_eq!(
            sent[1].content_type().as_ref().map(|c| c.as_str()),
            Some(JSON_CONTENT_TYPE)
        );
    }

    #[test]
    fn past_publish_times_are_not_clamped() {
        let now = Utc::now();
        assert_eq!(delay_millis(now - Duration::milliseconds(1_500), now), -1_500);
        assert_eq!(delay_millis(now + Duration::seconds(2), now), 2_000);
    }

    #[tokio::test]
    async fn exchange_is_resolved_once() {
        let sent = Arc::new(StdMutex::new(vec![]));
        let publisher = Publisher::new(Arc::new(recording_channel(sent.clone())));

        let msg = message();
        let results = join_all((0..8).map(|_| publisher.send(&msg))).await;

        assert!(results.iter().all(Result::is_ok));
        assert_eq!(sent.lock().unwrap().len(), 8);
    }

    #[tokio::test]
    async fn publish_failures_reach_the_caller() {
        let mut channel = MockTransportChannel::new();
        channel
            .expect_get_exchange()
            .returning(|name| Ok(ExchangeHandle::new(name)));
        channel
            .expect_publish()
            .times(1)
            .returning(|exchange, _, _, _| {
                Err(AmqpError::PublishingError(exchange.name().to_owned()))
            });

        let publisher = Publisher::new(Arc::new(channel));
        let err = publisher.send(&message()).await.unwrap_err();
        assert!(matches!(
            err,
            BrokerError::Amqp(AmqpError::PublishingError(name)) if name == "posts"
        ));
    }

    #[tokio::test]
    async fn unknown_exchange_is_not_cached_as_resolved() {
        let mut channel = MockTransportChannel::new();
        channel
            .expect_get_exchange()
            .times(2)
            .returning(|name| Err(AmqpError::GetExchangeError(name.to_owned())));
        channel.expect_publish().never();

        let publisher = Publisher::new(Arc::new(channel));
        assert!(publisher.send(&message()).await.is_err());
        assert!(publisher.send(&message()).await.is_err());
    }
}
