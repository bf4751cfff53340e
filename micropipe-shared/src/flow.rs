//! Tagged values and the end-of-flow sentinel.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Metadata bag carried alongside every value.
pub type MetaData = HashMap<String, serde_json::Value>;

/// A payload plus its metadata.
///
/// Metadata is always present; an untagged value carries an empty map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowValue<T> {
    pub value: T,
    #[serde(default)]
    pub meta: MetaData,
}

impl<T> FlowValue<T> {
    /// Wrap a value with empty metadata.
    pub fn new(value: T) -> Self {
        Self {
            value,
            meta: MetaData::new(),
        }
    }

    pub fn with_meta(value: T, meta: MetaData) -> Self {
        Self { value, meta }
    }

    /// Replace the payload, keeping the metadata.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> FlowValue<U> {
        FlowValue {
            value: f(self.value),
            meta: self.meta,
        }
    }

    pub fn meta_get(&self, key: &str) -> Option<&serde_json::Value> {
        self.meta.get(key)
    }
}

impl<T> From<T> for FlowValue<T> {
    fn from(value: T) -> Self {
        Self::new(value)
    }
}

/// One entry on a flow channel: a tagged value or the end-of-flow sentinel.
///
/// Exactly one `End` travels over each channel per run and it is always the
/// last entry read from that channel.
#[derive(Debug, Clone, PartialEq)]
pub enum Flow<T> {
    Value(FlowValue<T>),
    End,
}

impl<T> Flow<T> {
    pub fn is_end(&self) -> bool {
        matches!(self, Flow::End)
    }

    pub fn into_value(self) -> Option<FlowValue<T>> {
        match self {
            Flow::Value(v) => Some(v),
            Flow::End => None,
        }
    }
}

impl<T> From<FlowValue<T>> for Flow<T> {
    fn from(value: FlowValue<T>) -> Self {
        Flow::Value(value)
    }
}
