//! Layer composition
//!
//! Declaration order has index 0 topmost. Rendering walks the stack in
//! reverse, so the output vector is bottom-to-top and the first declared
//! layer is pushed last. A failing or panicking handler yields an empty layer
//! for that tick; its siblings are unaffected.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use tracing::{trace, warn};

use crate::layer::{EffectLayer, Layer};
use crate::matcher::MatchResult;
use crate::platform::ProcessSource;
use crate::profile::{Profile, ProfileId, ProfileVariant};
use crate::registry::RegistryIndex;
use crate::state::GameState;

/// Inputs for one overlay pass
pub struct OverlayPlan<'a> {
    pub registry: &'a RegistryIndex,
    /// Overlay iteration order
    pub order: &'a [ProfileId],
    pub current: &'a MatchResult,
    pub overlays_in_preview: bool,
    pub processes: &'a dyn ProcessSource,
    /// Idle effect layer, already rendered, if the user is idle
    pub idle: Option<EffectLayer>,
}

#[derive(Debug, Default)]
pub struct OverlayOutcome {
    pub layers: Vec<EffectLayer>,
    /// Profiles whose overlays were rendered
    pub rendered: Vec<ProfileId>,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LayerCompositor;

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

impl LayerCompositor {
    pub fn new() -> Self {
        Self
    }

    /// Render a variant's own layers
    pub fn render(&self, variant: &ProfileVariant, state: &GameState) -> Vec<EffectLayer> {
        self.render_stack(&variant.layers, state)
    }

    /// Render a variant's overlay layers
    pub fn render_overlay_layers(&self, variant: &ProfileVariant, state: &GameState) -> Vec<EffectLayer> {
        self.render_stack(&variant.overlay_layers, state)
    }

    pub fn render_stack(&self, layers: &[Layer], state: &GameState) -> Vec<EffectLayer> {
        layers
            .iter()
            .rev()
            .filter(|layer| layer.enabled && layer.override_logic.is_enabled(state))
            .map(|layer| self.render_layer(layer, state))
            .collect()
    }

    fn render_layer(&self, layer: &Layer, state: &GameState) -> EffectLayer {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| layer.handler().render(state)));
        match outcome {
            Ok(Ok(mut output)) => {
                output.apply_opacity(layer.opacity * layer.override_logic.opacity(state));
                output.apply_exclusion(&layer.exclusion);
                output
            }
            Ok(Err(e)) => {
                warn!(layer = %layer.name, kind = layer.handler().kind(), error = %e, "Layer render failed");
                EffectLayer::new(layer.name.clone())
            }
            Err(payload) => {
                warn!(
                    layer = %layer.name,
                    kind = layer.handler().kind(),
                    panic = panic_message(payload.as_ref()),
                    "Layer handler panicked"
                );
                EffectLayer::new(layer.name.clone())
            }
        }
    }

    /// Overlay layers of one profile's selected variant, `None` while the
    /// profile is still initializing
    fn profile_overlays(&self, profile: &Profile) -> Option<Vec<EffectLayer>> {
        let state = profile.game_state();
        let layers = profile.with_variants(|set| self.render_overlay_layers(set.selected(), &state));
        if layers.is_none() {
            trace!(profile = %profile.id(), "Skipping overlays of uninitialized profile");
        }
        layers
    }

    /// Overlay pass: desktop, then running overlay-enabled profiles in
    /// order, then the previewed profile, then the idle effect
    pub fn compose_overlays(&self, plan: OverlayPlan<'_>) -> OverlayOutcome {
        let mut outcome = OverlayOutcome::default();
        if plan.current.is_preview && !plan.overlays_in_preview {
            return outcome;
        }

        let desktop = plan.registry.desktop();
        if let Some(desktop) = desktop.filter(|d| d.is_overlay_enabled())
            && let Some(layers) = self.profile_overlays(desktop)
        {
            outcome.layers.extend(layers);
            outcome.rendered.push(desktop.id().clone());
        }

        let desktop_id = desktop.map(|d| d.id());
        for id in plan.order {
            if Some(id) == desktop_id {
                continue;
            }
            let Some(profile) = plan.registry.get(id) else {
                continue;
            };
            if !profile.is_overlay_enabled() {
                continue;
            }
            let foreground = !plan.current.is_preview && plan.current.profile == *id;
            if !foreground && !plan.processes.any_running(&profile.process_names()) {
                continue;
            }
            if let Some(layers) = self.profile_overlays(profile) {
                outcome.layers.extend(layers);
                outcome.rendered.push(id.clone());
            }
        }

        if plan.current.is_preview
            && !outcome.rendered.contains(&plan.current.profile)
            && let Some(profile) = plan.registry.get(&plan.current.profile)
            && let Some(layers) = self.profile_overlays(profile)
        {
            outcome.layers.extend(layers);
            outcome.rendered.push(plan.current.profile.clone());
        }

        if let Some(idle) = plan.idle {
            outcome.layers.push(idle);
        }
        outcome
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::layer::{Color, LayerError, LayerHandler};
    use serde_json::Value;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Fills with a fixed color and counts renders
    #[derive(Debug, Default)]
    pub struct CountingLayer {
        pub color: Color,
        pub renders: Arc<AtomicUsize>,
        pub cost: Duration,
    }

    impl LayerHandler for CountingLayer {
        fn kind(&self) -> &'static str {
            "counting"
        }

        fn render(&self, _state: &GameState) -> Result<EffectLayer, LayerError> {
            self.renders.fetch_add(1, Ordering::SeqCst);
            if !self.cost.is_zero() {
                std::thread::sleep(self.cost);
            }
            Ok(EffectLayer::filled("counting", self.color))
        }

        fn settings(&self) -> Value {
            Value::Null
        }
    }

    #[derive(Debug)]
    pub struct FailingLayer;

    impl LayerHandler for FailingLayer {
        fn kind(&self) -> &'static str {
            "failing"
        }

        fn render(&self, _state: &GameState) -> Result<EffectLayer, LayerError> {
            Err(LayerError::Render("always fails".to_string()))
        }

        fn settings(&self) -> Value {
            Value::Null
        }
    }

    #[derive(Debug)]
    pub struct PanickingLayer;

    impl LayerHandler for PanickingLayer {
        fn kind(&self) -> &'static str {
            "panicking"
        }

        fn render(&self, _state: &GameState) -> Result<EffectLayer, LayerError> {
            panic!("handler bug");
        }

        fn settings(&self) -> Value {
            Value::Null
        }
    }

    pub fn solid(name: &str, color: Color) -> Layer {
        Layer::new(name, Box::new(CountingLayer { color, ..Default::default() }))
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::layer::Color;
    use crate::platform::testing::FakeProcesses;
    use crate::profile::{VariantSet, ProfileVariant};
    use crate::registry::ProfileRegistry;
    use crate::state::StateChannel;
    use serde_json::json;
    use std::collections::BTreeSet;

    fn state() -> GameState {
        GameState::new("test", StateChannel::Legacy, json!({ "alive": true, "flash": 0.5 }))
    }

    fn labels(layers: &[EffectLayer]) -> Vec<Color> {
        layers.iter().filter_map(|l| l.fill).collect()
    }

    #[test]
    fn test_first_declared_layer_renders_last() {
        let a = Color::rgb(1, 0, 0);
        let b = Color::rgb(2, 0, 0);
        let c = Color::rgb(3, 0, 0);
        let variant = ProfileVariant::new("v").with_layers(vec![solid("A", a), solid("B", b), solid("C", c)]);

        let stack = LayerCompositor::new().render(&variant, &state());
        assert_eq!(labels(&stack), vec![c, b, a]);

        // Reversing the rendered stack recovers declaration order
        let mut restored = labels(&stack);
        restored.reverse();
        assert_eq!(restored, vec![a, b, c]);
    }

    #[test]
    fn test_disabled_layers_contribute_nothing() {
        let mut hidden = solid("B", Color::rgb(2, 0, 0));
        hidden.enabled = false;
        let mut gated = solid("C", Color::rgb(3, 0, 0));
        gated.override_logic.enabled_when = Some("dead".to_string());
        let variant = ProfileVariant::new("v").with_layers(vec![solid("A", Color::rgb(1, 0, 0)), hidden]);

        let stack = LayerCompositor::new().render(&variant, &state());
        assert_eq!(stack.len(), 1);

        let gated_state = GameState::new("test", StateChannel::Legacy, json!({ "dead": false }));
        assert!(LayerCompositor::new().render_stack(&[gated], &gated_state).is_empty());
    }

    #[test]
    fn test_faulty_layers_render_empty_and_siblings_survive() {
        let good = Color::rgb(9, 9, 9);
        let layers = vec![
            solid("top", good),
            Layer::new("err", Box::new(FailingLayer)),
            Layer::new("panic", Box::new(PanickingLayer)),
            solid("bottom", good),
        ];
        let stack = LayerCompositor::new().render_stack(&layers, &state());
        assert_eq!(stack.len(), 4);
        assert_eq!(stack[0].fill, Some(good));
        assert!(stack[1].is_empty());
        assert_eq!(stack[1].label, "panic");
        assert!(stack[2].is_empty());
        assert_eq!(stack[3].fill, Some(good));
    }

    #[test]
    fn test_opacity_and_exclusion_applied_after_render() {
        let mut layer = solid("A", Color::rgb(10, 10, 10));
        layer.opacity = 0.5;
        layer.override_logic.opacity_from = Some("flash".to_string());
        layer.exclusion = BTreeSet::from([7]);

        let stack = LayerCompositor::new().render_stack(&[layer], &state());
        assert_eq!(stack[0].fill, Some(Color::rgba(10, 10, 10, 64)));
        assert!(stack[0].excluded.contains(&7));
    }

    fn install_overlay(registry: &ProfileRegistry, id: &str, color: Color) {
        let profile = registry.get(&ProfileId::new(id)).unwrap();
        profile.install_variants(VariantSet::new(
            ProfileVariant::new("default").with_overlay_layers(vec![solid(id, color)]),
        ));
        profile.set_overlay_enabled(true);
    }

    #[test]
    fn test_overlay_order_desktop_running_preview_idle() {
        let registry = ProfileRegistry::with_builtins(None).unwrap();
        let desktop = Color::rgb(1, 0, 0);
        let dota = Color::rgb(2, 0, 0);
        let cs2 = Color::rgb(3, 0, 0);
        let minecraft = Color::rgb(4, 0, 0);
        install_overlay(&registry, "desktop", desktop);
        install_overlay(&registry, "dota2", dota);
        install_overlay(&registry, "cs2", cs2);
        install_overlay(&registry, "minecraft", minecraft);

        let processes = FakeProcesses::default();
        processes.start("cs2.exe");
        processes.start("dota2.exe");

        let order = vec![ProfileId::new("dota2"), ProfileId::new("cs2"), ProfileId::new("minecraft")];
        let current = MatchResult { profile: ProfileId::new("minecraft"), is_preview: true };
        let idle = EffectLayer::filled("Idle", Color::BLACK);

        let outcome = LayerCompositor::new().compose_overlays(OverlayPlan {
            registry: &registry.snapshot(),
            order: &order,
            current: &current,
            overlays_in_preview: true,
            processes: &processes,
            idle: Some(idle.clone()),
        });

        assert_eq!(labels(&outcome.layers), vec![desktop, dota, cs2, minecraft, Color::BLACK]);
        assert_eq!(outcome.rendered.len(), 4);
    }

    #[test]
    fn test_overlays_skipped_while_previewing_without_setting() {
        let registry = ProfileRegistry::with_builtins(None).unwrap();
        install_overlay(&registry, "desktop", Color::rgb(1, 0, 0));
        let current = MatchResult { profile: ProfileId::new("cs2"), is_preview: true };

        let outcome = LayerCompositor::new().compose_overlays(OverlayPlan {
            registry: &registry.snapshot(),
            order: &[],
            current: &current,
            overlays_in_preview: false,
            processes: &FakeProcesses::default(),
            idle: Some(EffectLayer::filled("Idle", Color::BLACK)),
        });
        assert!(outcome.layers.is_empty());
        assert!(outcome.rendered.is_empty());
    }

    #[test]
    fn test_foreground_profile_overlay_counts_as_running() {
        let registry = ProfileRegistry::with_builtins(None).unwrap();
        install_overlay(&registry, "cs2", Color::rgb(3, 0, 0));
        let current = MatchResult { profile: ProfileId::new("cs2"), is_preview: false };
        let order = vec![ProfileId::new("cs2")];

        let outcome = LayerCompositor::new().compose_overlays(OverlayPlan {
            registry: &registry.snapshot(),
            order: &order,
            current: &current,
            overlays_in_preview: false,
            processes: &FakeProcesses::default(),
            idle: None,
        });
        assert_eq!(outcome.rendered, vec![ProfileId::new("cs2")]);
    }
}
