//! Saved configurations of a profile
//!
//! A variant is a named pair of layer stacks. A profile always owns at least
//! one variant and exactly one of them is selected.

use serde::{Deserialize, Serialize};

use crate::layer::{Layer, LayerCatalog, LayerDocument};

#[derive(Debug)]
pub struct ProfileVariant {
    pub name: String,
    /// Profile-specific layers, index 0 is topmost
    pub layers: Vec<Layer>,
    /// Layers composited whenever the profile's overlay is enabled
    pub overlay_layers: Vec<Layer>,
    pub trigger_keybind: Option<String>,
}

impl ProfileVariant {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            layers: Vec::new(),
            overlay_layers: Vec::new(),
            trigger_keybind: None,
        }
    }

    pub fn with_layers(mut self, layers: Vec<Layer>) -> Self {
        self.layers = layers;
        self
    }

    pub fn with_overlay_layers(mut self, layers: Vec<Layer>) -> Self {
        self.overlay_layers = layers;
        self
    }

    pub fn to_document(&self) -> VariantDocument {
        VariantDocument {
            name: self.name.clone(),
            layers: self.layers.iter().map(Layer::to_document).collect(),
            overlay_layers: self.overlay_layers.iter().map(Layer::to_document).collect(),
            trigger_keybind: self.trigger_keybind.clone(),
        }
    }

    pub fn from_document(doc: &VariantDocument, catalog: &LayerCatalog) -> Self {
        Self {
            name: doc.name.clone(),
            layers: catalog.build_layers(&doc.layers),
            overlay_layers: catalog.build_layers(&doc.overlay_layers),
            trigger_keybind: doc.trigger_keybind.clone(),
        }
    }
}

/// Persisted form of a variant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantDocument {
    pub name: String,
    #[serde(default)]
    pub layers: Vec<LayerDocument>,
    #[serde(default)]
    pub overlay_layers: Vec<LayerDocument>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_keybind: Option<String>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum VariantError {
    #[error("variant '{0}' already exists")]
    Duplicate(String),
    #[error("variant '{0}' not found")]
    NotFound(String),
    #[error("cannot remove the last variant of a profile")]
    LastVariant,
}

/// Non-empty, ordered set of variants with one selected
#[derive(Debug)]
pub struct VariantSet {
    variants: Vec<ProfileVariant>,
    selected: usize,
}

impl VariantSet {
    pub fn new(initial: ProfileVariant) -> Self {
        Self {
            variants: vec![initial],
            selected: 0,
        }
    }

    pub fn selected(&self) -> &ProfileVariant {
        &self.variants[self.selected]
    }

    pub fn get(&self, name: &str) -> Option<&ProfileVariant> {
        self.variants.iter().find(|v| v.name == name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut ProfileVariant> {
        self.variants.iter_mut().find(|v| v.name == name)
    }

    pub fn len(&self) -> usize {
        self.variants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variants.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.variants.iter().map(|v| v.name.clone()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProfileVariant> {
        self.variants.iter()
    }

    pub fn add(&mut self, variant: ProfileVariant) -> Result<(), VariantError> {
        if self.get(&variant.name).is_some() {
            return Err(VariantError::Duplicate(variant.name));
        }
        self.variants.push(variant);
        Ok(())
    }

    pub fn select(&mut self, name: &str) -> Result<(), VariantError> {
        let index = self
            .variants
            .iter()
            .position(|v| v.name == name)
            .ok_or_else(|| VariantError::NotFound(name.to_string()))?;
        self.selected = index;
        Ok(())
    }

    pub fn remove(&mut self, name: &str) -> Result<ProfileVariant, VariantError> {
        if self.variants.len() == 1 {
            return Err(VariantError::LastVariant);
        }
        let index = self
            .variants
            .iter()
            .position(|v| v.name == name)
            .ok_or_else(|| VariantError::NotFound(name.to_string()))?;
        let removed = self.variants.remove(index);
        if self.selected > index || self.selected >= self.variants.len() {
            self.selected = self.selected.saturating_sub(1);
        }
        Ok(removed)
    }
}
