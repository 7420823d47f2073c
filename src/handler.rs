// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Handler Registry
//!
//! Business code registers one handler per consumer name, together with the
//! action kind the handler expects. The registry is assembled once, before any
//! broker is initialized, and shared read-only afterwards.

use crate::{
    action::{Action, ActionKind},
    errors::HandlerError,
};
use async_trait::async_trait;
use std::{collections::HashMap, future::Future, marker::PhantomData, sync::Arc};

/// Processes one decoded action.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn handle(&self, action: Action) -> Result<(), HandlerError>;
}

/// Adapter turning an async closure into an `ActionHandler`.
pub struct FnHandler<F, Fut> {
    func: F,
    _fut: PhantomData<fn() -> Fut>,
}

/// Wraps `func` as a handler.
pub fn handler_fn<F, Fut>(func: F) -> FnHandler<F, Fut>
where
    F: Fn(Action) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send,
{
    FnHandler {
        func,
        _fut: PhantomData,
    }
}

#[async_trait]
impl<F, Fut> ActionHandler for FnHandler<F, Fut>
where
    F: Fn(Action) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send,
{
    async fn handle(&self, action: Action) -> Result<(), HandlerError> {
        (self.func)(action).await
    }
}

/// A registered handler and the action kind it is fed with.
#[derive(Clone)]
pub struct ServiceConsumer {
    pub(crate) handler: Arc<dyn ActionHandler>,
    pub(crate) action_kind: ActionKind,
}

impl ServiceConsumer {
    pub fn new(action_kind: ActionKind, handler: Arc<dyn ActionHandler>) -> Self {
        ServiceConsumer {
            handler,
            action_kind,
        }
    }

    pub fn action_kind(&self) -> ActionKind {
        self.action_kind
    }
}

/// Consumer name to handler mapping.
#[derive(Clone, Default)]
pub struct ConsumerRegistry {
    consumers: HashMap<String, ServiceConsumer>,
}

impl ConsumerRegistry {
    pub fn new() -> Self {
        ConsumerRegistry::default()
    }

    /// Registers `handler` under `name`. A later registration with the same
    /// name replaces the earlier one.
    pub fn register<H>(mut self, name: &str, action_kind: ActionKind, handler: H) -> Self
    where
        H: ActionHandler + 'static,
    {
        self.consumers.insert(
            name.to_owned(),
            ServiceConsumer::new(action_kind, Arc::new(handler)),
        );
        self
    }

    /// The consumer registered under `name`, if any.
    pub fn get(&self, name: &str) -> Option<&ServiceConsumer> {
        self.consumers.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.consumers.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.consumers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.consumers.is_empty()
    }
}
