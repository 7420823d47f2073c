// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Configuration Validation
//!
//! Turns a raw `BrokerConfig` into typed definitions, or reports every
//! inconsistency it finds. Nothing touches the network before validation has
//! passed.

use crate::{
    config::{BrokerConfig, ConsumerConfig, QosConfig},
    dispatcher::{ConsumerDefinition, QosDefinition},
    errors::{ValidationErrors, ValidationIssue},
    exchange::ExchangeDefinition,
    handler::ConsumerRegistry,
    queue::{QueueBinding, QueueDefinition},
    topology::Topology,
};
use std::collections::HashSet;

/// The typed result of validating a broker configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedConfig {
    pub topology: Topology,
    pub consumers: Vec<ConsumerDefinition>,
    pub failed_consumers: Vec<ConsumerDefinition>,
}

pub fn validate(
    cfg: &BrokerConfig,
    registry: &ConsumerRegistry,
) -> Result<ValidatedConfig, ValidationErrors> {
    let mut issues = vec![];
    let mut topology = Topology::new();

    let mut queue_names = HashSet::new();
    for queue in &cfg.create.queues {
        if !queue_names.insert(queue.name.as_str()) {
            issues.push(ValidationIssue::DuplicateQueue(queue.name.clone()));
        }
        topology = topology.queue(QueueDefinition::from(queue));
    }

    let mut exchange_names = HashSet::new();
    for exchange in &cfg.create.exchanges {
        if !exchange_names.insert(exchange.name.as_str()) {
            issues.push(ValidationIssue::DuplicateExchange(exchange.name.clone()));
        }
        match ExchangeDefinition::try_from(exchange) {
            Ok(def) => topology = topology.exchange(def),
            Err(kind) => issues.push(ValidationIssue::UnknownExchangeType {
                exchange: exchange.name.clone(),
                kind,
            }),
        }
    }

    for binding in &cfg.create.bindings {
        if !queue_names.contains(binding.queue_name.as_str()) {
            issues.push(ValidationIssue::UndeclaredBindingQueue(
                binding.queue_name.clone(),
            ));
        }
        if !exchange_names.contains(binding.exchange_name.as_str()) {
            issues.push(ValidationIssue::UndeclaredBindingExchange(
                binding.exchange_name.clone(),
            ));
        }
        topology = topology.queue_binding(
            QueueBinding::new(&binding.queue_name)
                .exchange(&binding.exchange_name)
                .routing_key(&binding.routing_key),
        );
    }

    let mut consumer = |cfg: &ConsumerConfig| {
        validate_consumer(cfg, registry, &queue_names, &exchange_names, &mut issues)
    };
    let consumers: Vec<_> = cfg.consumers.iter().filter_map(&mut consumer).collect();
    let failed_consumers: Vec<_> = cfg
        .failed_consumers
        .iter()
        .filter_map(&mut consumer)
        .collect();

    if !issues.is_empty() {
        return Err(ValidationErrors(issues));
    }

    Ok(ValidatedConfig {
        topology,
        consumers,
        failed_consumers,
    })
}

fn validate_consumer(
    cfg: &ConsumerConfig,
    registry: &ConsumerRegistry,
    queue_names: &HashSet<&str>,
    exchange_names: &HashSet<&str>,
    issues: &mut Vec<ValidationIssue>,
) -> Option<ConsumerDefinition> {
    let before = issues.len();

    if !registry.contains(&cfg.consumer_name) {
        issues.push(ValidationIssue::UnknownConsumer(cfg.consumer_name.clone()));
    }

    if !queue_names.contains(cfg.queue_name.as_str()) {
        issues.push(ValidationIssue::UndeclaredConsumerQueue {
            consumer: cfg.consumer_name.clone(),
            queue: cfg.queue_name.clone(),
        });
    }

    if let Some(routing) = &cfg.failed_message_routing {
        if !exchange_names.contains(routing.exchange_name.as_str()) {
            issues.push(ValidationIssue::UndeclaredFailedRoutingExchange {
                consumer: cfg.consumer_name.clone(),
                exchange: routing.exchange_name.clone(),
            });
        }
    }

    let qos = validate_qos(&cfg.consumer_name, &cfg.qos, issues);

    if issues.len() != before {
        return None;
    }

    let def = ConsumerDefinition::new(&cfg.queue_name, &cfg.consumer_name).qos(qos?);
    Some(match &cfg.failed_message_routing {
        Some(routing) => def.failed_routing(&routing.exchange_name, &routing.routing_key),
        None => def,
    })
}

fn validate_qos(
    consumer: &str,
    cfg: &QosConfig,
    issues: &mut Vec<ValidationIssue>,
) -> Option<QosDefinition> {
    let prefetch_count = bounded_qos::<u16>(consumer, "prefetch_count", cfg.prefetch_count, issues);
    let prefetch_size = bounded_qos::<u32>(consumer, "prefetch_size", cfg.prefetch_size, issues);

    Some(QosDefinition {
        prefetch_count: prefetch_count?,
        prefetch_size: prefetch_size?,
        global: cfg.global,
        timeout: crate::config::seconds(cfg.timeout),
    })
}

fn bounded_qos<T: TryFrom<i64>>(
    consumer: &str,
    field: &'static str,
    value: i64,
    issues: &mut Vec<ValidationIssue>,
) -> Option<T> {
    if value < 0 {
        issues.push(ValidationIssue::NegativeQos {
            consumer: consumer.to_owned(),
            field,
        });
        return None;
    }

    match T::try_from(value) {
        Ok(v) => Some(v),
        Err(_) => {
            issues.push(ValidationIssue::QosOutOfRange {
                consumer: consumer.to_owned(),
                field,
            });
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{action::ActionKind, handler::handler_fn};
    use serde_json::json;

    fn registry() -> ConsumerRegistry {
        ConsumerRegistry::new().register(
            "post_consumer",
            ActionKind::Post,
            handler_fn(|_| async { Ok(()) }),
        )
    }

    fn config(value: serde_json::Value) -> BrokerConfig {
        BrokerConfig::from_value(value).unwrap()
    }

    #[test]
    fn accepts_consistent_config() {
        let cfg = config(json!({
            "common": { "logger_name": "broker" },
            "create": {
                "queues": [{ "name": "posts", "durable": true }, { "name": "dead" }],
                "exchanges": [{ "name": "posts" }, { "name": "dlx", "type": "fanout" }],
                "bindings": [
                    { "queue_name": "posts", "exchange_name": "posts", "routing_key": "posts" },
                    { "queue_name": "dead", "exchange_name": "dlx" }
                ]
            },
            "consumers": [{
                "queue_name": "posts",
                "consumer_name": "post_consumer",
                "qos": { "prefetch_count": 10 },
                "failed_message_routing": { "exchange_name": "dlx", "routing_key": "dead" }
            }],
            "failed_consumers": [{ "queue_name": "dead", "consumer_name": "post_consumer" }]
        }));

        let validated = validate(&cfg, &registry()).unwrap();
        assert_eq!(validated.topology.queues().len(), 2);
        assert_eq!(validated.topology.bindings().len(), 2);
        assert_eq!(validated.consumers.len(), 1);
        assert_eq!(
            validated.consumers[0],
            ConsumerDefinition::new("posts", "post_consumer")
                .qos(QosDefinition {
                    prefetch_count: 10,
                    ..QosDefinition::default()
                })
                .failed_routing("dlx", "dead")
        );
        assert_eq!(validated.failed_consumers[0].queue_name(), "dead");
        assert_eq!(validated.failed_consumers[0].failed_routing, None);
    }

    #[test]
    fn reports_every_issue_not_just_the_first() {
        let cfg = config(json!({
            "common": { "logger_name": "broker" },
            "create": {
                "queues": [{ "name": "posts" }, { "name": "posts" }],
                "exchanges": [{ "name": "posts", "type": "nonsense" }],
                "bindings": [
                    { "queue_name": "inbox", "exchange_name": "posts" },
                    { "queue_name": "posts", "exchange_name": "outbox" }
                ]
            },
            "consumers": [{
                "queue_name": "missing",
                "consumer_name": "ghost",
                "qos": { "prefetch_count": -1, "prefetch_size": -5 },
                "failed_message_routing": { "exchange_name": "dlx", "routing_key": "dead" }
            }]
        }));

        let errors = validate(&cfg, &registry()).unwrap_err();
        assert_eq!(
            errors.issues(),
            &[
                ValidationIssue::DuplicateQueue("posts".to_owned()),
                ValidationIssue::UnknownExchangeType {
                    exchange: "posts".to_owned(),
                    kind: "nonsense".to_owned()
                },
                ValidationIssue::UndeclaredBindingQueue("inbox".to_owned()),
                ValidationIssue::UndeclaredBindingExchange("outbox".to_owned()),
                ValidationIssue::UnknownConsumer("ghost".to_owned()),
                ValidationIssue::UndeclaredConsumerQueue {
                    consumer: "ghost".to_owned(),
                    queue: "missing".to_owned()
                },
                ValidationIssue::UndeclaredFailedRoutingExchange {
                    consumer: "ghost".to_owned(),
                    exchange: "dlx".to_owned()
                },
                ValidationIssue::NegativeQos {
                    consumer: "ghost".to_owned(),
                    field: "prefetch_count"
                },
                ValidationIssue::NegativeQos {
                    consumer: "ghost".to_owned(),
                    field: "prefetch_size"
                },
            ]
        );
    }

    #[test]
    fn unknown_consumer_is_never_skipped() {
        let cfg = config(json!({
            "common": { "logger_name": "broker" },
            "create": { "queues": [{ "name": "posts" }] },
            "consumers": [
                { "queue_name": "posts", "consumer_name": "post_consumer" },
                { "queue_name": "posts", "consumer_name": "billing" }
            ]
        }));

        let errors = validate(&cfg, &registry()).unwrap_err();
        assert_eq!(
            errors.issues(),
            &[ValidationIssue::UnknownConsumer("billing".to_owned())]
        );
    }

    #[test]
    fn failed_consumers_are_checked_too() {
        let cfg = config(json!({
            "common": { "logger_name": "broker" },
            "create": { "queues": [{ "name": "dead" }] },
            "failed_consumers": [{ "queue_name": "dead", "consumer_name": "replayer" }]
        }));

        let errors = validate(&cfg, &registry()).unwrap_err();
        assert_eq!(
            errors.issues(),
            &[ValidationIssue::UnknownConsumer("replayer".to_owned())]
        );
    }

    #[test]
    fn prefetch_count_must_fit_the_wire() {
        let cfg = config(json!({
            "common": { "logger_name": "broker" },
            "create": { "queues": [{ "name": "posts" }] },
            "consumers": [{
                "queue_name": "posts",
                "consumer_name": "post_consumer",
                "qos": { "prefetch_count": 70000 }
            }]
        }));

        let errors = validate(&cfg, &registry()).unwrap_err();
        assert_eq!(
            errors.issues(),
            &[ValidationIssue::QosOutOfRange {
                consumer: "post_consumer".to_owned(),
                field: "prefetch_count"
            }]
        );
    }
}
