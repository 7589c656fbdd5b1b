//! Compile-time table of layer kinds

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::warn;

use super::handlers::{GradientByStateLayer, PercentLayer, SolidColorLayer};
use super::{Layer, LayerDocument, LayerError, LayerHandler};

type LayerFactory = fn(&Value) -> Result<Box<dyn LayerHandler>, LayerError>;

/// Maps a persisted layer kind to the factory that rebuilds its handler
#[derive(Clone)]
pub struct LayerCatalog {
    entries: Vec<(&'static str, LayerFactory)>,
}

impl std::fmt::Debug for LayerCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.kinds()).finish()
    }
}

fn build<T>(kind: &str, settings: &Value) -> Result<Box<dyn LayerHandler>, LayerError>
where
    T: LayerHandler + DeserializeOwned + 'static,
{
    serde_json::from_value::<T>(settings.clone())
        .map(|handler| Box::new(handler) as Box<dyn LayerHandler>)
        .map_err(|source| LayerError::InvalidSettings {
            kind: kind.to_string(),
            source,
        })
}

fn solid(settings: &Value) -> Result<Box<dyn LayerHandler>, LayerError> {
    build::<SolidColorLayer>("solid", settings)
}

fn percent(settings: &Value) -> Result<Box<dyn LayerHandler>, LayerError> {
    build::<PercentLayer>("percent", settings)
}

fn gradient_by_state(settings: &Value) -> Result<Box<dyn LayerHandler>, LayerError> {
    build::<GradientByStateLayer>("gradient_by_state", settings)
}

impl Default for LayerCatalog {
    fn default() -> Self {
        Self {
            entries: vec![
                ("solid", solid as LayerFactory),
                ("percent", percent as LayerFactory),
                ("gradient_by_state", gradient_by_state as LayerFactory),
            ],
        }
    }
}

impl LayerCatalog {
    pub fn kinds(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.iter().map(|(kind, _)| *kind)
    }

    pub fn create(&self, kind: &str, settings: &Value) -> Result<Box<dyn LayerHandler>, LayerError> {
        let (_, factory) = self
            .entries
            .iter()
            .find(|(k, _)| *k == kind)
            .ok_or_else(|| LayerError::UnknownKind(kind.to_string()))?;
        factory(settings)
    }

    pub fn build_layer(&self, doc: &LayerDocument) -> Result<Layer, LayerError> {
        let handler = self.create(&doc.kind, &doc.settings)?;
        let mut layer = Layer::new(doc.name.clone(), handler);
        layer.enabled = doc.enabled;
        layer.opacity = doc.opacity.clamp(0.0, 1.0);
        layer.exclusion = doc.exclusion.clone();
        layer.override_logic = doc.override_logic.clone();
        Ok(layer)
    }

    /// Rebuild a stack, skipping layers whose kind or settings are unusable
    pub fn build_layers(&self, docs: &[LayerDocument]) -> Vec<Layer> {
        docs.iter()
            .filter_map(|doc| {
                self.build_layer(doc)
                    .inspect_err(|e| warn!(layer = %doc.name, error = %e, "Skipping unusable layer"))
                    .ok()
            })
            .collect()
    }
}
