//! Profiles: one registered lighting target per application
//!
//! A profile is composed rather than subclassed: an immutable descriptor,
//! runtime flags, the variant set (absent until initialization finishes), a
//! lock-free game-state slot and a [`ProfileBehavior`] trait object carrying
//! the kind-specific hooks.

pub mod builtin;
pub mod variant;

use arc_swap::ArcSwap;
use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::constants::storage::DEFAULT_VARIANT_NAME;
use crate::state::{GameState, StateSchema};

pub use variant::{ProfileVariant, VariantDocument, VariantError, VariantSet};

/// Stable profile identifier (`desktop`, `cs2`, user-chosen ids)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProfileId(String);

impl ProfileId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProfileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProfileId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileOrigin {
    /// Compiled into the engine, cannot be removed
    Builtin,
    /// Created by the user at runtime
    User,
}

/// Kind-specific hooks of a profile
pub trait ProfileBehavior: Send + Sync + fmt::Debug {
    /// Called on the first tick this profile is rendered after not being rendered
    fn on_start(&self, _profile: &ProfileId) {}

    /// Called on the first tick this profile is no longer rendered
    fn on_stop(&self, _profile: &ProfileId) {}

    /// Called every tick the profile is rendered, before its layers
    fn update_tick(&self, _state: &GameState) {}

    /// Variant used when nothing usable exists on disk
    fn default_variant(&self) -> ProfileVariant {
        ProfileVariant::new(DEFAULT_VARIANT_NAME)
    }
}

/// Behavior for profiles with no kind-specific hooks
#[derive(Debug, Default)]
pub struct GenericBehavior;

impl ProfileBehavior for GenericBehavior {}

/// Identity and matching rules of a profile
#[derive(Debug, Clone)]
pub struct ProfileDescriptor {
    pub id: ProfileId,
    pub name: String,
    pub origin: ProfileOrigin,
    pub process_names: Vec<String>,
    pub title_patterns: Vec<String>,
    pub app_id: Option<u32>,
    pub schema: StateSchema,
}

pub struct Profile {
    descriptor: ProfileDescriptor,
    title_matchers: Vec<Regex>,
    process_names: RwLock<Vec<String>>,
    enabled: AtomicBool,
    overlay_enabled: AtomicBool,
    variants: RwLock<Option<VariantSet>>,
    game_state: ArcSwap<GameState>,
    behavior: Box<dyn ProfileBehavior>,
}

impl fmt::Debug for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Profile")
            .field("id", &self.descriptor.id)
            .field("origin", &self.descriptor.origin)
            .field("process_names", &*self.process_names.read())
            .field("enabled", &self.is_enabled())
            .field("overlay_enabled", &self.is_overlay_enabled())
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

impl Profile {
    /// Build a profile; fails if a title pattern is not a valid regex
    pub fn new(descriptor: ProfileDescriptor, behavior: Box<dyn ProfileBehavior>) -> Result<Self, regex::Error> {
        let title_matchers = descriptor
            .title_patterns
            .iter()
            .map(|p| Regex::new(p))
            .collect::<Result<Vec<_>, _>>()?;
        let process_names = normalize_process_names(&descriptor.process_names);
        let game_state = GameState::from_schema(&descriptor.schema);

        Ok(Self {
            descriptor,
            title_matchers,
            process_names: RwLock::new(process_names),
            enabled: AtomicBool::new(true),
            overlay_enabled: AtomicBool::new(false),
            variants: RwLock::new(None),
            game_state: ArcSwap::from_pointee(game_state),
            behavior,
        })
    }

    pub fn id(&self) -> &ProfileId {
        &self.descriptor.id
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn origin(&self) -> ProfileOrigin {
        self.descriptor.origin
    }

    pub fn app_id(&self) -> Option<u32> {
        self.descriptor.app_id
    }

    pub fn schema(&self) -> &StateSchema {
        &self.descriptor.schema
    }

    pub fn behavior(&self) -> &dyn ProfileBehavior {
        self.behavior.as_ref()
    }

    /// Lowercased process names this profile claims
    pub fn process_names(&self) -> Vec<String> {
        self.process_names.read().clone()
    }

    /// Replace the process list; the registry re-indexes this profile afterwards
    pub(crate) fn set_process_names(&self, names: &[String]) {
        *self.process_names.write() = normalize_process_names(names);
    }

    pub fn has_title_patterns(&self) -> bool {
        !self.title_matchers.is_empty()
    }

    pub fn matches_title(&self, title: &str) -> bool {
        self.title_matchers.iter().any(|re| re.is_match(title))
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    pub fn is_overlay_enabled(&self) -> bool {
        self.overlay_enabled.load(Ordering::Acquire)
    }

    pub fn set_overlay_enabled(&self, enabled: bool) {
        self.overlay_enabled.store(enabled, Ordering::Release);
    }

    pub fn is_initialized(&self) -> bool {
        self.variants.read().is_some()
    }

    /// Publish the loaded variants, marking the profile initialized
    pub fn install_variants(&self, variants: VariantSet) {
        *self.variants.write() = Some(variants);
    }

    /// Run `f` against the variants, `None` while uninitialized
    pub fn with_variants<R>(&self, f: impl FnOnce(&VariantSet) -> R) -> Option<R> {
        self.variants.read().as_ref().map(f)
    }

    pub fn with_variants_mut<R>(&self, f: impl FnOnce(&mut VariantSet) -> R) -> Option<R> {
        self.variants.write().as_mut().map(f)
    }

    /// Current game state; cheap, never blocks the writer
    pub fn game_state(&self) -> Arc<GameState> {
        self.game_state.load_full()
    }

    pub fn set_game_state(&self, state: GameState) {
        self.game_state.store(Arc::new(state));
    }

    pub fn reset_game_state(&self) {
        self.set_game_state(GameState::from_schema(&self.descriptor.schema));
    }

    /// Drop loaded variants and state
    pub fn dispose(&self) {
        self.variants.write().take();
        self.reset_game_state();
    }
}

fn normalize_process_names(names: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(names.len());
    for name in names {
        let name = name.trim().to_lowercase();
        if !name.is_empty() && !out.contains(&name) {
            out.push(name);
        }
    }
    out
}
