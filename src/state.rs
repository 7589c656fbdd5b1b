//! Game state values and the conversion between ingestion channels
//!
//! A [`GameState`] is an immutable bag of JSON values addressed by
//! slash-separated paths (`Player/Health`). Payloads arrive either on the
//! legacy channel (raw key-value JSON) or on the typed channel (a value
//! produced from a known state type). When a payload's channel or type does
//! not match what the owning profile declares, field names are case-folded
//! against the profile's default state instead of rejecting the update.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Ingestion channel a state shape belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateChannel {
    Legacy,
    Typed,
}

/// Declared state shape of a profile
#[derive(Debug, Clone, PartialEq)]
pub struct StateSchema {
    pub type_name: String,
    pub channel: StateChannel,
    pub default: Value,
}

impl StateSchema {
    pub fn legacy(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            channel: StateChannel::Legacy,
            default: Value::Object(Map::new()),
        }
    }

    pub fn typed(type_name: impl Into<String>, default: Value) -> Self {
        Self {
            type_name: type_name.into(),
            channel: StateChannel::Typed,
            default,
        }
    }
}

/// Incoming game-state payload, already deserialized by the listener
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "channel", rename_all = "snake_case")]
pub enum GameStatePayload {
    Legacy { value: Value },
    Typed { type_name: String, value: Value },
}

impl GameStatePayload {
    pub fn legacy(value: Value) -> Self {
        Self::Legacy { value }
    }

    /// Build a typed payload from any serializable state struct
    pub fn typed<T: Serialize>(type_name: &str, state: &T) -> Result<Self, serde_json::Error> {
        Ok(Self::Typed {
            type_name: type_name.to_string(),
            value: serde_json::to_value(state)?,
        })
    }

    pub fn channel(&self) -> StateChannel {
        match self {
            Self::Legacy { .. } => StateChannel::Legacy,
            Self::Typed { .. } => StateChannel::Typed,
        }
    }

    pub fn value(&self) -> &Value {
        match self {
            Self::Legacy { value } | Self::Typed { value, .. } => value,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConversionError {
    #[error("payload root must be an object, got {0}")]
    NotAnObject(&'static str),
}

/// Immutable game state handed to layer handlers
#[derive(Debug, Clone, PartialEq)]
pub struct GameState {
    type_name: String,
    channel: StateChannel,
    root: Value,
}

impl GameState {
    pub fn new(type_name: impl Into<String>, channel: StateChannel, root: Value) -> Self {
        Self {
            type_name: type_name.into(),
            channel,
            root,
        }
    }

    /// Default state for a schema
    pub fn from_schema(schema: &StateSchema) -> Self {
        Self::new(schema.type_name.clone(), schema.channel, schema.default.clone())
    }

    /// Accept a payload for a profile, folding field names when shapes differ
    pub fn conform(payload: GameStatePayload, schema: &StateSchema) -> Result<Self, ConversionError> {
        let same_shape = match (&payload, schema.channel) {
            (GameStatePayload::Legacy { .. }, StateChannel::Legacy) => true,
            (GameStatePayload::Typed { type_name, .. }, StateChannel::Typed) => {
                *type_name == schema.type_name
            }
            _ => false,
        };

        let value = match payload {
            GameStatePayload::Legacy { value } | GameStatePayload::Typed { value, .. } => value,
        };

        if same_shape {
            return Ok(Self::new(schema.type_name.clone(), schema.channel, value));
        }

        if !value.is_object() {
            return Err(ConversionError::NotAnObject(json_kind(&value)));
        }

        let folded = fold_keys(value, &schema.default);
        Ok(Self::new(schema.type_name.clone(), schema.channel, folded))
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn channel(&self) -> StateChannel {
        self.channel
    }

    pub fn root(&self) -> &Value {
        &self.root
    }

    /// Resolve a slash-separated path. Legacy states fall back to a
    /// case-insensitive key match when the exact key is absent.
    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut current = &self.root;
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            current = match current {
                Value::Object(map) => match map.get(segment) {
                    Some(v) => v,
                    None if self.channel == StateChannel::Legacy => map
                        .iter()
                        .find(|(k, _)| k.eq_ignore_ascii_case(segment))
                        .map(|(_, v)| v)?,
                    None => return None,
                },
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    pub fn number(&self, path: &str) -> Option<f64> {
        match self.get(path)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    pub fn boolean(&self, path: &str) -> Option<bool> {
        match self.get(path)? {
            Value::Bool(b) => Some(*b),
            Value::Number(n) => n.as_f64().map(|f| f != 0.0),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn text(&self, path: &str) -> Option<&str> {
        self.get(path)?.as_str()
    }
}

/// Lowercased name with separators removed: `player_state`, `PlayerState`
/// and `player-state` all fold to `playerstate`.
fn fold_name(name: &str) -> String {
    name.chars()
        .filter(|c| *c != '_' && *c != '-')
        .flat_map(char::to_lowercase)
        .collect()
}

fn fold_keys(value: Value, template: &Value) -> Value {
    match (value, template) {
        (Value::Object(map), Value::Object(template_map)) => {
            let mut out = Map::with_capacity(map.len());
            for (key, child) in map {
                let folded = fold_name(&key);
                match template_map.iter().find(|(tk, _)| fold_name(tk) == folded) {
                    Some((template_key, template_child)) => {
                        out.insert(template_key.clone(), fold_keys(child, template_child));
                    }
                    None => {
                        out.insert(key, child);
                    }
                }
            }
            Value::Object(out)
        }
        (Value::Array(items), Value::Array(template_items)) => match template_items.first() {
            Some(element) => Value::Array(items.into_iter().map(|i| fold_keys(i, element)).collect()),
            None => Value::Array(items),
        },
        (value, _) => value,
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
