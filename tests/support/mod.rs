// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! In-memory broker implementing the transport traits.
//!
//! Routing is direct: a message published on an exchange reaches every queue
//! bound to it with the same routing key, or with an empty one. Messages for a
//! queue without consumers wait in the queue.

#![allow(dead_code)]

use async_trait::async_trait;
use broker::{
    config::{CommonConfig, ConnectionConfig},
    dispatcher::QosDefinition,
    errors::AmqpError,
    exchange::{ExchangeDefinition, ExchangeHandle},
    queue::{QueueBinding, QueueDefinition},
    transport::{
        Acknowledger, Connector, DeliveryStream, Incoming, Transport, TransportChannel,
    },
};
use futures_util::{stream, StreamExt};
use lapin::BasicProperties;
use std::{
    collections::{HashMap, HashSet, VecDeque},
    future::Future,
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::{sync::mpsc, time::Instant};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Connect,
    OpenChannel(usize),
    DeclareQueue(String),
    DeclareExchange(String),
    Bind(String, String),
    Consume { channel: usize, tag: String },
    Cancel { channel: usize, tag: String },
    CloseChannel(usize),
    CloseConnection,
}

#[derive(Debug, Clone)]
pub struct Published {
    pub exchange: String,
    pub routing_key: String,
    pub payload: Vec<u8>,
    pub properties: BasicProperties,
}

struct Message {
    exchange: String,
    routing_key: String,
    payload: Vec<u8>,
    properties: BasicProperties,
}

struct Subscription {
    channel: usize,
    tag: String,
    sender: mpsc::UnboundedSender<Incoming>,
}

#[derive(Default)]
struct Queue {
    ready: VecDeque<Message>,
    subscriptions: Vec<Subscription>,
    next: usize,
}

#[derive(Default)]
struct State {
    queues: HashMap<String, Queue>,
    exchanges: HashSet<String>,
    bindings: Vec<(String, String, String)>,
    events: Vec<(Event, Instant)>,
    published: Vec<Published>,
    exchange_lookups: HashMap<String, usize>,
    acks: usize,
    next_channel: usize,
    broken_queues: HashSet<String>,
}

#[derive(Default)]
pub struct FakeBroker {
    state: Mutex<State>,
}

impl FakeBroker {
    pub fn new() -> Arc<Self> {
        Arc::new(FakeBroker::default())
    }

    pub fn connector(self: &Arc<Self>) -> Arc<dyn Connector> {
        Arc::new(FakeConnector(self.clone()))
    }

    /// Makes every `consume` on `queue` fail.
    pub fn break_queue(&self, queue: &str) {
        self.state().broken_queues.insert(queue.to_owned());
    }

    /// Ends the delivery streams of every consumer of `queue`, the way a
    /// dropped connection does.
    pub fn drop_consumers(&self, queue: &str) {
        if let Some(q) = self.state().queues.get_mut(queue) {
            q.subscriptions.clear();
        }
    }

    pub fn events(&self) -> Vec<Event> {
        self.state().events.iter().map(|(e, _)| e.clone()).collect()
    }

    pub fn timed_events(&self) -> Vec<(Event, Instant)> {
        self.state().events.clone()
    }

    pub fn published(&self) -> Vec<Published> {
        self.state().published.clone()
    }

    pub fn exchange_lookups(&self, name: &str) -> usize {
        self.state().exchange_lookups.get(name).copied().unwrap_or(0)
    }

    pub fn acks(&self) -> usize {
        self.state().acks
    }

    pub fn ready(&self, queue: &str) -> usize {
        self.state().queues.get(queue).map_or(0, |q| q.ready.len())
    }

    pub fn consumers(&self, queue: &str) -> usize {
        self.state()
            .queues
            .get(queue)
            .map_or(0, |q| q.subscriptions.len())
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    fn record(state: &mut State, event: Event) {
        state.events.push((event, Instant::now()));
    }

    fn deliver(self: &Arc<Self>, state: &mut State, queue: &str, msg: Message) {
        let Some(q) = state.queues.get_mut(queue) else {
            return;
        };

        if q.subscriptions.is_empty() {
            q.ready.push_back(msg);
            return;
        }

        let index = q.next % q.subscriptions.len();
        q.next += 1;
        let incoming = Incoming::new(
            msg.payload,
            &msg.exchange,
            &msg.routing_key,
            msg.properties,
            Box::new(FakeAcker(self.clone())),
        );
        let _ = q.subscriptions[index].sender.send(incoming);
    }
}

struct FakeConnector(Arc<FakeBroker>);

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(
        &self,
        _common: &CommonConfig,
        _connection: &ConnectionConfig,
    ) -> Result<Arc<dyn Transport>, AmqpError> {
        FakeBroker::record(&mut self.0.state(), Event::Connect);
        Ok(Arc::new(FakeTransport(self.0.clone())))
    }
}

struct FakeTransport(Arc<FakeBroker>);

#[async_trait]
impl Transport for FakeTransport {
    async fn open_channel(&self) -> Result<Arc<dyn TransportChannel>, AmqpError> {
        let mut state = self.0.state();
        state.next_channel += 1;
        let id = state.next_channel;
        FakeBroker::record(&mut state, Event::OpenChannel(id));
        Ok(Arc::new(FakeChannel {
            id,
            broker: self.0.clone(),
        }))
    }

    async fn close(&self) -> Result<(), AmqpError> {
        FakeBroker::record(&mut self.0.state(), Event::CloseConnection);
        Ok(())
    }
}

struct FakeChannel {
    id: usize,
    broker: Arc<FakeBroker>,
}

#[async_trait]
impl TransportChannel for FakeChannel {
    async fn declare_queue(&self, def: &QueueDefinition) -> Result<(), AmqpError> {
        let mut state = self.broker.state();
        state.queues.entry(def.name().to_owned()).or_default();
        FakeBroker::record(&mut state, Event::DeclareQueue(def.name().to_owned()));
        Ok(())
    }

    async fn declare_exchange(&self, def: &ExchangeDefinition) -> Result<(), AmqpError> {
        let mut state = self.broker.state();
        state.exchanges.insert(def.name().to_owned());
        FakeBroker::record(&mut state, Event::DeclareExchange(def.name().to_owned()));
        Ok(())
    }

    async fn bind_queue(&self, binding: &QueueBinding) -> Result<(), AmqpError> {
        let mut state = self.broker.state();
        let entry = (
            binding.queue_name().to_owned(),
            binding.exchange_name().to_owned(),
            binding.key().to_owned(),
        );
        if !state.bindings.contains(&entry) {
            state.bindings.push(entry);
        }
        FakeBroker::record(
            &mut state,
            Event::Bind(
                binding.queue_name().to_owned(),
                binding.exchange_name().to_owned(),
            ),
        );
        Ok(())
    }

    async fn get_queue(&self, name: &str) -> Result<(), AmqpError> {
        match self.broker.state().queues.contains_key(name) {
            true => Ok(()),
            false => Err(AmqpError::GetQueueError(name.to_owned())),
        }
    }

    async fn get_exchange(&self, name: &str) -> Result<ExchangeHandle, AmqpError> {
        *self
            .broker
            .state()
            .exchange_lookups
            .entry(name.to_owned())
            .or_default() += 1;

        // Leaves room for concurrent lookups to pile up.
        tokio::time::sleep(Duration::from_millis(10)).await;

        match self.broker.state().exchanges.contains(name) {
            true => Ok(ExchangeHandle::new(name)),
            false => Err(AmqpError::GetExchangeError(name.to_owned())),
        }
    }

    async fn qos(&self, _qos: &QosDefinition) -> Result<(), AmqpError> {
        Ok(())
    }

    async fn consume(&self, queue: &str, consumer_tag: &str) -> Result<DeliveryStream, AmqpError> {
        let mut state = self.broker.state();
        if state.broken_queues.contains(queue) {
            return Err(AmqpError::BindingConsumerError(consumer_tag.to_owned()));
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        let ready: Vec<Message> = match state.queues.get_mut(queue) {
            Some(q) => {
                q.subscriptions.push(Subscription {
                    channel: self.id,
                    tag: consumer_tag.to_owned(),
                    sender,
                });
                q.ready.drain(..).collect()
            }
            None => return Err(AmqpError::GetQueueError(queue.to_owned())),
        };
        for msg in ready {
            self.broker.deliver(&mut state, queue, msg);
        }
        FakeBroker::record(
            &mut state,
            Event::Consume {
                channel: self.id,
                tag: consumer_tag.to_owned(),
            },
        );

        Ok(stream::unfold(receiver, |mut receiver| async move {
            receiver.recv().await.map(|incoming| (Ok(incoming), receiver))
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
        let mut state = self.broker.state();
        state.published.push(Published {
            exchange: exchange.name().to_owned(),
            routing_key: routing_key.to_owned(),
            payload: payload.to_vec(),
            properties: properties.clone(),
        });

        let targets: Vec<String> = state
            .bindings
            .iter()
            .filter(|(_, ex, key)| ex == exchange.name() && (key.is_empty() || key == routing_key))
            .map(|(queue, _, _)| queue.clone())
            .collect();
        for queue in targets {
            let msg = Message {
                exchange: exchange.name().to_owned(),
                routing_key: routing_key.to_owned(),
                payload: payload.to_vec(),
                properties: properties.clone(),
            };
            self.broker.deliver(&mut state, &queue, msg);
        }
        Ok(())
    }

    async fn cancel(&self, consumer_tag: &str) -> Result<(), AmqpError> {
        let mut state = self.broker.state();
        for q in state.queues.values_mut() {
            q.subscriptions.retain(|s| s.tag != consumer_tag);
        }
        FakeBroker::record(
            &mut state,
            Event::Cancel {
                channel: self.id,
                tag: consumer_tag.to_owned(),
            },
        );
        Ok(())
    }

    async fn close(&self) -> Result<(), AmqpError> {
        let mut state = self.broker.state();
        for q in state.queues.values_mut() {
            q.subscriptions.retain(|s| s.channel != self.id);
        }
        FakeBroker::record(&mut state, Event::CloseChannel(self.id));
        Ok(())
    }
}

struct FakeAcker(Arc<FakeBroker>);

#[async_trait]
impl Acknowledger for FakeAcker {
    async fn ack(&self) -> Result<(), AmqpError> {
        self.0.state().acks += 1;
        Ok(())
    }
}

/// Polls `condition` until it holds, failing the test after a second.
pub async fn eventually<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..100 {
        if condition().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met in time");
}
