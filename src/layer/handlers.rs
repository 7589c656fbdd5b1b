//! Generic layer handlers shipped with the engine

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Color, DeviceKey, EffectLayer, LayerError, LayerHandler};
use crate::state::GameState;

/// Paints a fixed color, on a key list or across the whole device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolidColorLayer {
    pub color: Color,
    /// Empty means the whole device
    #[serde(default)]
    pub keys: Vec<DeviceKey>,
}

impl LayerHandler for SolidColorLayer {
    fn kind(&self) -> &'static str {
        "solid"
    }

    fn render(&self, _state: &GameState) -> Result<EffectLayer, LayerError> {
        if self.keys.is_empty() {
            return Ok(EffectLayer::filled(self.kind(), self.color));
        }
        let mut layer = EffectLayer::new(self.kind());
        for key in &self.keys {
            layer.set(*key, self.color);
        }
        Ok(layer)
    }

    fn settings(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Lights a row of keys proportionally to `value_path / max`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PercentLayer {
    pub value_path: String,
    /// Fixed maximum, used when `max_path` is absent or unresolvable
    #[serde(default = "default_max")]
    pub max: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_path: Option<String>,
    pub keys: Vec<DeviceKey>,
    pub foreground: Color,
    #[serde(default)]
    pub background: Color,
}

fn default_max() -> f64 {
    100.0
}

impl PercentLayer {
    fn fraction(&self, state: &GameState) -> Result<f64, LayerError> {
        let value = state
            .number(&self.value_path)
            .ok_or_else(|| LayerError::Render(format!("no numeric value at '{}'", self.value_path)))?;
        let max = self
            .max_path
            .as_deref()
            .and_then(|path| state.number(path))
            .unwrap_or(self.max);
        if max <= 0.0 {
            return Ok(0.0);
        }
        Ok((value / max).clamp(0.0, 1.0))
    }
}

impl LayerHandler for PercentLayer {
    fn kind(&self) -> &'static str {
        "percent"
    }

    fn render(&self, state: &GameState) -> Result<EffectLayer, LayerError> {
        let fraction = self.fraction(state)?;
        let lit = fraction * self.keys.len() as f64;
        let mut layer = EffectLayer::new(self.kind());
        for (i, key) in self.keys.iter().enumerate() {
            let coverage = (lit - i as f64).clamp(0.0, 1.0) as f32;
            layer.set(*key, self.background.lerp(self.foreground, coverage));
        }
        Ok(layer)
    }

    fn settings(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Fills the device with a color blended between two stops by a state value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientByStateLayer {
    pub value_path: String,
    #[serde(default)]
    pub min: f64,
    #[serde(default = "default_max")]
    pub max: f64,
    pub low: Color,
    pub high: Color,
}

impl LayerHandler for GradientByStateLayer {
    fn kind(&self) -> &'static str {
        "gradient_by_state"
    }

    fn render(&self, state: &GameState) -> Result<EffectLayer, LayerError> {
        let Some(value) = state.number(&self.value_path) else {
            return Ok(EffectLayer::new(self.kind()));
        };
        let span = self.max - self.min;
        let t = if span.abs() < f64::EPSILON {
            0.0
        } else {
            ((value - self.min) / span).clamp(0.0, 1.0)
        };
        Ok(EffectLayer::filled(self.kind(), self.low.lerp(self.high, t as f32)))
    }

    fn settings(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}
