// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! Conversion of configuration values into AMQP field values.

use crate::config::Arguments;
use lapin::types::{AMQPValue, FieldArray, FieldTable, LongLongInt, LongString, ShortString};
use serde_json::Value;
use std::collections::BTreeMap;

/// Converts a map of configured arguments into an AMQP argument table.
pub fn amqp_arguments(args: &Arguments) -> BTreeMap<ShortString, AMQPValue> {
    args.iter()
        .map(|(key, value)| (ShortString::from(key.clone()), amqp_value(value)))
        .collect()
}

/// Converts one JSON value into the closest AMQP value.
///
/// Integers become signed 64-bit values, which RabbitMQ accepts for every
/// numeric `x-` argument; unsigned values beyond `i64::MAX` and fractional
/// numbers are sent as doubles.
pub fn amqp_value(value: &Value) -> AMQPValue {
    match value {
        Value::Null => AMQPValue::Void,
        Value::Bool(v) => AMQPValue::Boolean(*v),
        Value::Number(n) => match n.as_i64() {
            Some(v) => AMQPValue::LongLongInt(LongLongInt::from(v)),
            None => AMQPValue::Double(n.as_f64().unwrap_or_default()),
        },
        Value::String(v) => AMQPValue::LongString(LongString::from(v.clone())),
        Value::Array(values) => AMQPValue::FieldArray(FieldArray::from(
            values.iter().map(amqp_value).collect::<Vec<_>>(),
        )),
        Value::Object(map) => AMQPValue::FieldTable(FieldTable::from(
            map.iter()
                .map(|(key, value)| (ShortString::from(key.clone()), amqp_value(value)))
                .collect::<BTreeMap<_, _>>(),
        )),
    }
}
