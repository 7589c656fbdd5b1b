//! Configuration management for the lighting engine

pub mod settings;

pub use settings::{
    DimmingSettings, EngineSettings, IdleEffectKind, IdleSettings, ProfileToggles, UserProfileDefinition,
};
