// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! Post value objects carried by post actions.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Destination channel, either by numeric id or by name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChannelId {
    Id(i64),
    Name(String),
}

impl From<i64> for ChannelId {
    fn from(id: i64) -> Self {
        ChannelId::Id(id)
    }
}

impl From<&str> for ChannelId {
    fn from(name: &str) -> Self {
        ChannelId::Name(name.to_owned())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    En,
    Es,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::En => "en",
            Language::Es => "es",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
}

/// A file either reachable by public url or carried inline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileObject {
    pub url_included: bool,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub public_url: Option<String>,
    #[serde(default)]
    pub data: Option<Vec<u8>>,
}

/// A custom field whose name, and optionally value, is translated.
///
/// When `multi_language_value` is set, `data` is an object keyed by language.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiLanguageField {
    pub field_translations: BTreeMap<Language, String>,
    pub multi_language_value: bool,
    pub mimetype: String,
    pub data: Value,
}

/// A field resolved for one language.
#[derive(Debug, Clone, PartialEq)]
pub struct TranslatedField {
    pub field_name: String,
    pub mimetype: String,
    pub data: Value,
}

impl MultiLanguageField {
    /// Picks the first preferred language with a translation, falling back to
    /// the first translation available.
    pub fn translated(&self, preference: &[Language]) -> Option<TranslatedField> {
        let (language, field_name) = preference
            .iter()
            .find_map(|lang| self.field_translations.get_key_value(lang))
            .or_else(|| self.field_translations.iter().next())?;

        let data = if self.multi_language_value {
            self.data
                .get(language.as_str())
                .cloned()
                .unwrap_or(Value::Null)
        } else {
            self.data.clone()
        };

        Some(TranslatedField {
            field_name: field_name.clone(),
            mimetype: self.mimetype.clone(),
            data,
        })
    }
}

/// Ordered fields keep insertion order through the `Vec` of pairs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub channel_destination: Vec<ChannelId>,
    #[serde(default)]
    pub post_id: Option<ChannelId>,
    #[serde(default)]
    pub author: Option<Author>,
    #[serde(default)]
    pub template: Option<String>,
    #[serde(default)]
    pub data: Vec<(String, MultiLanguageField)>,
    #[serde(default)]
    pub files: Vec<(String, FileObject)>,
}
