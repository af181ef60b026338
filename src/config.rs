//! Chain configuration decoding.
//!
//! Two shapes are accepted: the order-preserving array form
//! `[{"filter": id, "settings": ...}, ...]`, and the legacy object form
//! `{id: settings, ...}`. The object form has no inherent order, so
//! filters are instantiated in lexicographic id order.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SiftError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterEntry {
    pub filter: String,
    #[serde(default)]
    pub settings: Value,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ChainConfig {
    Ordered(Vec<FilterEntry>),
    Legacy(BTreeMap<String, Value>),
}

impl ChainConfig {
    pub fn from_value(value: &Value) -> Result<ChainConfig, SiftError> {
        serde_json::from_value(value.clone())
            .map_err(|e| SiftError::InvalidConfig(e.to_string()))
    }

    pub fn into_entries(self) -> Vec<FilterEntry> {
        match self {
            ChainConfig::Ordered(entries) => entries,
            ChainConfig::Legacy(map) => map
                .into_iter()
                .map(|(filter, settings)| FilterEntry { filter, settings })
                .collect(),
        }
    }
}
