// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Service Assembly
//!
//! A `Service` owns the named brokers of one process. Handlers are registered
//! on the builder before anything starts; the registry is then shared,
//! read-only, by every broker the service creates.
//!
//! `reload` is the administrative entry point for a new configuration: the new
//! broker set is built completely before it replaces the running one, and the
//! replaced brokers are closed gracefully afterwards. A reload that fails
//! leaves the running brokers untouched.

use crate::{
    action::ActionKind,
    broker::{BrokerKind, MessageBroker},
    channel::AmqpConnector,
    config::{BrokerConfig, ServiceConfig},
    errors::{BrokerError, ServiceError},
    handler::{ActionHandler, ConsumerRegistry},
    logging,
    transport::Connector,
};
use futures_util::future::join_all;
use std::{collections::BTreeMap, path::Path, str::FromStr, sync::Arc, time::Duration};
use tokio::sync::RwLock;
use tracing::{error, info};

/// Grace period granted to in-flight handlers when brokers close.
pub const DEFAULT_CLOSE_GRACE: Duration = Duration::from_secs(5);

type Brokers = BTreeMap<String, Arc<dyn MessageBroker>>;

/// Collects handlers and settings before a `Service` starts.
pub struct ServiceBuilder {
    registry: ConsumerRegistry,
    close_grace: Duration,
    connector: Arc<dyn Connector>,
}

impl Default for ServiceBuilder {
    fn default() -> Self {
        ServiceBuilder {
            registry: ConsumerRegistry::new(),
            close_grace: DEFAULT_CLOSE_GRACE,
            connector: Arc::new(AmqpConnector),
        }
    }
}

impl ServiceBuilder {
    /// Registers the handler of consumer `name`.
    pub fn consumer<H>(mut self, name: &str, action_kind: ActionKind, handler: H) -> Self
    where
        H: ActionHandler + 'static,
    {
        self.registry = self.registry.register(name, action_kind, handler);
        self
    }

    /// Replaces every handler registered so far with `registry`.
    pub fn registry(mut self, registry: ConsumerRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Time consumers get between cancellation and channel close.
    /// Defaults to `DEFAULT_CLOSE_GRACE`.
    pub fn close_grace(mut self, close_grace: Duration) -> Self {
        self.close_grace = close_grace;
        self
    }

    /// Overrides how brokers connect. Defaults to `AmqpConnector`.
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = connector;
        self
    }

    /// Installs logging and initializes every configured broker.
    ///
    /// # Parameters
    /// * `config` - Logging settings and the named broker configurations
    ///
    /// # Returns
    /// The running service, or the first failure. Brokers that did start are
    /// closed before the error is returned
    pub async fn start(self, config: ServiceConfig) -> Result<Service, ServiceError> {
        if let Some(logging) = &config.logging {
            logging::install(logging)?;
        }

        let service = Service {
            registry: Arc::new(self.registry),
            close_grace: self.close_grace,
            connector: self.connector,
            brokers: RwLock::new(Brokers::new()),
        };

        let brokers = service.initialize_brokers(&config).await?;
        info!(count = brokers.len(), "service started");
        *service.brokers.write().await = brokers;

        Ok(service)
    }

    /// Same as `start`, reading the configuration from `path`.
    pub async fn start_from_path(self, path: impl AsRef<Path>) -> Result<Service, ServiceError> {
        let config = ServiceConfig::from_path(path)?;
        self.start(config).await
    }
}

/// The named brokers of one process.
pub struct Service {
    registry: Arc<ConsumerRegistry>,
    close_grace: Duration,
    connector: Arc<dyn Connector>,
    brokers: RwLock<Brokers>,
}

impl Service {
    pub fn builder() -> ServiceBuilder {
        ServiceBuilder::default()
    }

    /// The running broker configured under `name`.
    pub async fn broker(&self, name: &str) -> Option<Arc<dyn MessageBroker>> {
        self.brokers.read().await.get(name).cloned()
    }

    pub async fn broker_names(&self) -> Vec<String> {
        self.brokers.read().await.keys().cloned().collect()
    }

    /// Replaces the running brokers with the ones described by `config`.
    pub async fn reload(&self, config: ServiceConfig) -> Result<(), ServiceError> {
        if let Some(logging) = &config.logging {
            logging::install(logging)?;
        }

        let fresh = self.initialize_brokers(&config).await.map_err(|err| {
            error!(error = err.to_string(), "reload failed, keeping running brokers");
            err
        })?;

        let previous = std::mem::replace(&mut *self.brokers.write().await, fresh);
        info!("config reloaded");

        close_all(previous).await;
        Ok(())
    }

    /// Starts the failed message consumers of every broker.
    pub async fn load_failed(&self) -> Result<(), ServiceError> {
        let brokers = self.brokers.read().await.clone();
        let results = join_all(brokers.iter().map(|(name, broker)| async move {
            broker
                .load_failed()
                .await
                .map_err(|source| ServiceError::Broker {
                    name: name.clone(),
                    source,
                })
        }))
        .await;

        results.into_iter().collect()
    }

    /// Closes every broker.
    pub async fn stop(&self) {
        let brokers = std::mem::take(&mut *self.brokers.write().await);
        close_all(brokers).await;
        info!("service stopped");
    }

    async fn initialize_brokers(&self, config: &ServiceConfig) -> Result<Brokers, ServiceError> {
        let mut pending = Vec::with_capacity(config.message_brokers.len());
        for (name, entry) in &config.message_brokers {
            let kind = BrokerKind::from_str(&entry.class_name)?;
            let broker_config = BrokerConfig::from_value(entry.config.clone()).map_err(|err| {
                ServiceError::Broker {
                    name: name.clone(),
                    source: BrokerError::Config(err),
                }
            })?;
            pending.push((name.clone(), kind, broker_config));
        }

        let results = join_all(pending.into_iter().map(|(name, kind, broker_config)| async move {
            let result = kind
                .initialize(
                    broker_config,
                    self.connector.as_ref(),
                    self.registry.clone(),
                    self.close_grace,
                )
                .await;
            (name, result)
        }))
        .await;

        let mut brokers = Brokers::new();
        let mut failure = None;
        for (name, result) in results {
            match result {
                Ok(broker) => {
                    brokers.insert(name, broker);
                }
                Err(source) => {
                    error!(broker = name, error = source.to_string(), "failure to initialize broker");
                    failure.get_or_insert(ServiceError::Broker { name, source });
                }
            }
        }

        if let Some(err) = failure {
            close_all(brokers).await;
            return Err(err);
        }

        Ok(brokers)
    }
}

async fn close_all(brokers: Brokers) {
    join_all(brokers.into_iter().map(|(name, broker)| async move {
        if let Err(err) = broker.close().await {
            error!(broker = name, error = err.to_string(), "failure to close broker");
        }
    }))
    .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ConfigError;
    use serde_json::json;

    fn config(class_name: &str) -> ServiceConfig {
        serde_json::from_value(json!({
            "message_brokers": {
                "main": {
                    "class_name": class_name,
                    "config": { "common": { "logger_name": "main" } }
                }
            }
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn unknown_broker_class_fails_before_connecting() {
        let err = Service::builder()
            .start(config("Kafka"))
            .await
            .err()
            .unwrap();
        assert!(matches!(
            err,
            ServiceError::Config(ConfigError::UnknownBrokerClass(name)) if name == "Kafka"
        ));
    }

    #[tokio::test]
    async fn empty_service_starts_and_stops() {
        let service = Service::builder().start(ServiceConfig::default()).await.unwrap();
        assert!(service.broker_names().await.is_empty());
        assert!(service.broker("main").await.is_none());
        service.load_failed().await.unwrap();
        service.stop().await;
    }
}
