//! Layers: one visual effect unit with an enable flag and a handler
//!
//! The handler is the only polymorphic part. Opacity, the exclusion mask and
//! override logic belong to the [`Layer`] and are applied by the compositor
//! after the handler returns, never by the handler itself.

pub mod catalog;
pub mod handlers;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use thiserror::Error;

use crate::state::GameState;

pub use catalog::LayerCatalog;

/// Device key identifier as understood by the device layer
pub type DeviceKey = u32;

/// 8-bit RGBA color
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    #[serde(default = "opaque")]
    pub a: u8,
}

fn opaque() -> u8 {
    u8::MAX
}

impl Color {
    pub const TRANSPARENT: Color = Color { r: 0, g: 0, b: 0, a: 0 };
    pub const BLACK: Color = Color { r: 0, g: 0, b: 0, a: u8::MAX };

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: u8::MAX }
    }

    pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    /// Scale alpha by `factor` (clamped to 0..=1)
    pub fn fade(self, factor: f32) -> Self {
        let factor = factor.clamp(0.0, 1.0);
        Self {
            a: (self.a as f32 * factor).round() as u8,
            ..self
        }
    }

    /// Linear blend towards `other`, `t` clamped to 0..=1
    pub fn lerp(self, other: Color, t: f32) -> Self {
        let t = t.clamp(0.0, 1.0);
        let mix = |a: u8, b: u8| (a as f32 + (b as f32 - a as f32) * t).round() as u8;
        Self {
            r: mix(self.r, other.r),
            g: mix(self.g, other.g),
            b: mix(self.b, other.b),
            a: mix(self.a, other.a),
        }
    }
}

/// Rendered output of one layer
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EffectLayer {
    pub label: String,
    /// Color applied to every key not listed in `keys`
    pub fill: Option<Color>,
    pub keys: BTreeMap<DeviceKey, Color>,
    /// Keys this layer must leave untouched
    pub excluded: BTreeSet<DeviceKey>,
}

impl EffectLayer {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..Self::default()
        }
    }

    pub fn filled(label: impl Into<String>, color: Color) -> Self {
        Self {
            label: label.into(),
            fill: Some(color),
            ..Self::default()
        }
    }

    pub fn set(&mut self, key: DeviceKey, color: Color) {
        self.keys.insert(key, color);
    }

    pub fn is_empty(&self) -> bool {
        self.fill.is_none() && self.keys.is_empty()
    }

    /// Multiply every color's alpha by `opacity`
    pub fn apply_opacity(&mut self, opacity: f32) {
        if opacity >= 1.0 {
            return;
        }
        self.fill = self.fill.map(|c| c.fade(opacity));
        for color in self.keys.values_mut() {
            *color = color.fade(opacity);
        }
    }

    /// Drop masked keys and record them so the fill does not cover them
    pub fn apply_exclusion(&mut self, mask: &BTreeSet<DeviceKey>) {
        if mask.is_empty() {
            return;
        }
        self.keys.retain(|key, _| !mask.contains(key));
        self.excluded.extend(mask.iter().copied());
    }
}

#[derive(Debug, Error)]
pub enum LayerError {
    #[error("unknown layer kind '{0}'")]
    UnknownKind(String),
    #[error("invalid settings for layer kind '{kind}': {source}")]
    InvalidSettings {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("render failed: {0}")]
    Render(String),
}

/// Capability set of a layer handler
///
/// Handlers are rendered only from the scheduler thread but are shared with
/// the editor, hence `Send + Sync` and `&self`.
pub trait LayerHandler: Send + Sync + fmt::Debug {
    /// Catalog kind used to persist and rebuild this handler
    fn kind(&self) -> &'static str;

    fn render(&self, state: &GameState) -> Result<EffectLayer, LayerError>;

    /// Handler-specific settings, round-tripped through [`LayerCatalog`]
    fn settings(&self) -> Value;
}

/// Per-layer overrides evaluated against the current game state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OverrideLogic {
    /// Boolean state path; the layer is skipped while it resolves to false
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled_when: Option<String>,
    /// Numeric state path in 0..=1 multiplied into the layer opacity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opacity_from: Option<String>,
}

impl OverrideLogic {
    pub fn is_enabled(&self, state: &GameState) -> bool {
        match &self.enabled_when {
            Some(path) => state.boolean(path).unwrap_or(true),
            None => true,
        }
    }

    pub fn opacity(&self, state: &GameState) -> f32 {
        match &self.opacity_from {
            Some(path) => state.number(path).map_or(1.0, |v| v.clamp(0.0, 1.0) as f32),
            None => 1.0,
        }
    }
}

#[derive(Debug)]
pub struct Layer {
    pub name: String,
    pub enabled: bool,
    pub opacity: f32,
    pub exclusion: BTreeSet<DeviceKey>,
    pub override_logic: OverrideLogic,
    handler: Box<dyn LayerHandler>,
}

impl Layer {
    pub fn new(name: impl Into<String>, handler: Box<dyn LayerHandler>) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            opacity: 1.0,
            exclusion: BTreeSet::new(),
            override_logic: OverrideLogic::default(),
            handler,
        }
    }

    pub fn handler(&self) -> &dyn LayerHandler {
        self.handler.as_ref()
    }

    /// Swap the handler, e.g. when the layer type is changed in the editor
    pub fn replace_handler(&mut self, handler: Box<dyn LayerHandler>) {
        self.handler = handler;
    }

    pub fn to_document(&self) -> LayerDocument {
        LayerDocument {
            name: self.name.clone(),
            kind: self.handler.kind().to_string(),
            enabled: self.enabled,
            opacity: self.opacity,
            exclusion: self.exclusion.clone(),
            override_logic: self.override_logic.clone(),
            settings: self.handler.settings(),
        }
    }
}

/// Persisted form of a layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerDocument {
    pub name: String,
    pub kind: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_opacity")]
    pub opacity: f32,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub exclusion: BTreeSet<DeviceKey>,
    #[serde(default)]
    pub override_logic: OverrideLogic,
    #[serde(default)]
    pub settings: Value,
}

fn default_enabled() -> bool {
    true
}

fn default_opacity() -> f32 {
    1.0
}
