//! Composited output of one tick

use crate::layer::EffectLayer;

/// Layer stack plus overlay stack, both ordered bottom to top
///
/// Consumed exactly once by the device layer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frame {
    pub layers: Vec<EffectLayer>,
    pub overlays: Vec<EffectLayer>,
}

impl Frame {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty() && self.overlays.is_empty()
    }

    /// Layers then overlays, bottom to top
    pub fn iter(&self) -> impl Iterator<Item = &EffectLayer> {
        self.layers.iter().chain(self.overlays.iter())
    }
}
