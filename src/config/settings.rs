//! Engine settings
//!
//! JSON file at `<config dir>/lightstack/settings.json`. Every field has a
//! serde default, so partial files and files written by older versions load
//! cleanly. Values are validated and clamped after loading.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::constants::timing::DEFAULT_UPDATE_INTERVAL_MS;
use crate::layer::Color;
use crate::persistence::write_atomic;
use crate::profile::{ProfileDescriptor, ProfileId, ProfileOrigin};
use crate::registry::RegistryIndex;
use crate::state::StateSchema;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Target interval between tick starts
    #[serde(default = "default_update_interval_ms")]
    pub update_interval_ms: u64,

    /// Overlay iteration order; unlisted profiles follow in registration order
    #[serde(default)]
    pub profile_order: Vec<ProfileId>,

    /// Process names that never select their own profile
    #[serde(default)]
    pub excluded_programs: Vec<String>,

    #[serde(default = "default_true")]
    pub allow_wrappers_in_background: bool,

    #[serde(default)]
    pub overlays_in_preview: bool,

    #[serde(default)]
    pub profiles: BTreeMap<ProfileId, ProfileToggles>,

    #[serde(default)]
    pub idle: IdleSettings,

    #[serde(default)]
    pub dimming: DimmingSettings,

    #[serde(default)]
    pub user_profiles: Vec<UserProfileDefinition>,

    /// Extra sleep per tick, for diagnostics only
    #[serde(default)]
    pub debug_delay_ms: u64,

    #[serde(default = "default_log_level")]
    pub log_level: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProfileToggles {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub overlay_enabled: bool,
}

impl Default for ProfileToggles {
    fn default() -> Self {
        Self {
            enabled: true,
            overlay_enabled: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdleEffectKind {
    #[default]
    None,
    /// Darken everything by `amount`
    Dim,
    /// Cover everything with `color`
    Solid,
    /// `color` fading in and out
    Breathing,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IdleSettings {
    #[serde(default)]
    pub effect: IdleEffectKind,
    /// Seconds without input before the idle effect starts
    #[serde(default = "default_idle_delay_secs")]
    pub delay_secs: u64,
    #[serde(default = "default_idle_color")]
    pub color: Color,
    /// Effect strength, 0..=1
    #[serde(default = "default_idle_amount")]
    pub amount: f32,
}

impl Default for IdleSettings {
    fn default() -> Self {
        Self {
            effect: IdleEffectKind::None,
            delay_secs: default_idle_delay_secs(),
            color: default_idle_color(),
            amount: default_idle_amount(),
        }
    }
}

/// Time-of-day window during which all lighting is turned off
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimmingSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_dim_start_hour")]
    pub start_hour: u32,
    #[serde(default)]
    pub start_minute: u32,
    #[serde(default = "default_dim_end_hour")]
    pub end_hour: u32,
    #[serde(default)]
    pub end_minute: u32,
}

impl Default for DimmingSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            start_hour: default_dim_start_hour(),
            start_minute: 0,
            end_hour: default_dim_end_hour(),
            end_minute: 0,
        }
    }
}

/// Data-driven profile created by the user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfileDefinition {
    pub id: ProfileId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub process_names: Vec<String>,
    #[serde(default)]
    pub title_patterns: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_id: Option<u32>,
}

impl UserProfileDefinition {
    pub fn descriptor(&self) -> ProfileDescriptor {
        let name = if self.name.is_empty() {
            self.id.to_string()
        } else {
            self.name.clone()
        };
        ProfileDescriptor {
            id: self.id.clone(),
            name,
            origin: ProfileOrigin::User,
            process_names: self.process_names.clone(),
            title_patterns: self.title_patterns.clone(),
            app_id: self.app_id,
            schema: StateSchema::legacy(self.id.as_str()),
        }
    }
}

fn default_update_interval_ms() -> u64 {
    DEFAULT_UPDATE_INTERVAL_MS
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_idle_delay_secs() -> u64 {
    300
}

fn default_idle_color() -> Color {
    Color::BLACK
}

fn default_idle_amount() -> f32 {
    0.5
}

fn default_dim_start_hour() -> u32 {
    22
}

fn default_dim_end_hour() -> u32 {
    7
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            update_interval_ms: default_update_interval_ms(),
            profile_order: Vec::new(),
            excluded_programs: Vec::new(),
            allow_wrappers_in_background: true,
            overlays_in_preview: false,
            profiles: BTreeMap::new(),
            idle: IdleSettings::default(),
            dimming: DimmingSettings::default(),
            user_profiles: Vec::new(),
            debug_delay_ms: 0,
            log_level: default_log_level(),
        }
    }
}

impl EngineSettings {
    pub fn default_path() -> PathBuf {
        let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push(crate::constants::config::APP_DIR);
        path.push(crate::constants::config::FILENAME);
        path
    }

    /// Load settings; a missing file yields defaults
    pub fn load(path: &Path) -> Result<Self> {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!(path = %path.display(), "No settings file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read settings from {}", path.display()));
            }
        };

        let mut settings: Self = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse settings from {}", path.display()))?;
        settings.validate_and_clamp();
        info!(
            path = %path.display(),
            interval_ms = settings.update_interval_ms,
            user_profiles = settings.user_profiles.len(),
            "Loaded settings"
        );
        Ok(settings)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self).context("Failed to serialize settings")?;
        write_atomic(path, &json).with_context(|| format!("Failed to write settings to {}", path.display()))?;
        info!(path = %path.display(), "Saved settings");
        Ok(())
    }

    /// Clamp values to safe ranges
    pub fn validate_and_clamp(&mut self) {
        use crate::constants::validation::*;

        if self.update_interval_ms < MIN_UPDATE_INTERVAL_MS {
            warn!(update_interval_ms = self.update_interval_ms, min = MIN_UPDATE_INTERVAL_MS, "update_interval_ms below minimum, clamping");
            self.update_interval_ms = MIN_UPDATE_INTERVAL_MS;
        } else if self.update_interval_ms > MAX_UPDATE_INTERVAL_MS {
            warn!(update_interval_ms = self.update_interval_ms, max = MAX_UPDATE_INTERVAL_MS, "update_interval_ms exceeds maximum, clamping");
            self.update_interval_ms = MAX_UPDATE_INTERVAL_MS;
        }

        if self.debug_delay_ms > MAX_DEBUG_DELAY_MS {
            warn!(debug_delay_ms = self.debug_delay_ms, max = MAX_DEBUG_DELAY_MS, "debug_delay_ms exceeds maximum, clamping");
            self.debug_delay_ms = MAX_DEBUG_DELAY_MS;
        }

        if !(0.0..=1.0).contains(&self.idle.amount) {
            warn!(amount = self.idle.amount, "idle amount outside 0..=1, clamping");
            self.idle.amount = if self.idle.amount.is_nan() { default_idle_amount() } else { self.idle.amount.clamp(0.0, 1.0) };
        }

        let dimming = &mut self.dimming;
        for (field, value, max) in [
            ("start_hour", &mut dimming.start_hour, 23),
            ("start_minute", &mut dimming.start_minute, 59),
            ("end_hour", &mut dimming.end_hour, 23),
            ("end_minute", &mut dimming.end_minute, 59),
        ] {
            if *value > max {
                warn!(field, value = *value, max, "dimming time out of range, clamping");
                *value = max;
            }
        }

        let before = self.excluded_programs.len();
        let mut seen = HashSet::new();
        self.excluded_programs = self
            .excluded_programs
            .iter()
            .map(|p| p.trim().to_lowercase())
            .filter(|p| !p.is_empty() && seen.insert(p.clone()))
            .collect();
        if self.excluded_programs.len() != before {
            info!(count = self.excluded_programs.len(), "Normalized excluded programs");
        }
    }

    pub fn toggles(&self, id: &ProfileId) -> ProfileToggles {
        self.profiles.get(id).copied().unwrap_or_default()
    }

    /// Push the per-profile enable flags into the registered profiles
    pub fn apply_toggles(&self, registry: &RegistryIndex) {
        for profile in registry.iter() {
            let toggles = self.toggles(profile.id());
            profile.set_enabled(toggles.enabled);
            profile.set_overlay_enabled(toggles.overlay_enabled);
        }
    }

    /// Profile ids in overlay order: `profile_order` first, then the rest
    /// in registration order. Unknown ids are dropped.
    pub fn ordered_profiles(&self, registry: &RegistryIndex) -> Vec<ProfileId> {
        let mut ordered: Vec<ProfileId> = Vec::with_capacity(registry.len());
        for id in self.profile_order.iter().chain(registry.ids()) {
            if registry.contains(id) && !ordered.contains(id) {
                ordered.push(id.clone());
            }
        }
        ordered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ProfileRegistry;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let settings = EngineSettings::load(&dir.path().join("settings.json")).unwrap();
        assert_eq!(settings, EngineSettings::default());
        assert_eq!(settings.update_interval_ms, 30);
        assert!(settings.allow_wrappers_in_background);
        assert!(!settings.overlays_in_preview);
    }

    #[test]
    fn test_partial_file_fills_defaults_and_clamps() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(
            &path,
            r#"{ "update_interval_ms": 1, "dimming": { "enabled": true, "start_hour": 30 }, "excluded_programs": ["Game.EXE ", ""] }"#,
        )
        .unwrap();

        let settings = EngineSettings::load(&path).unwrap();
        assert_eq!(settings.update_interval_ms, 5);
        assert!(settings.dimming.enabled);
        assert_eq!(settings.dimming.start_hour, 23);
        assert_eq!(settings.dimming.end_hour, 7);
        assert_eq!(settings.excluded_programs, vec!["game.exe".to_string()]);
    }

    #[test]
    fn test_excluded_programs_drop_scattered_duplicates_in_order() {
        let mut settings = EngineSettings {
            excluded_programs: vec![
                "b.exe".to_string(),
                "A.exe".to_string(),
                "b.EXE".to_string(),
                " a.exe".to_string(),
                "c.exe".to_string(),
            ],
            ..EngineSettings::default()
        };
        settings.validate_and_clamp();
        assert_eq!(settings.excluded_programs, vec!["b.exe", "a.exe", "c.exe"]);
    }

    #[test]
    fn test_invalid_json_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "{ nope").unwrap();
        assert!(EngineSettings::load(&path).is_err());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        let mut settings = EngineSettings::default();
        settings.idle.effect = IdleEffectKind::Breathing;
        settings.user_profiles.push(UserProfileDefinition {
            id: ProfileId::new("mine"),
            name: String::new(),
            process_names: vec!["mine.exe".to_string()],
            title_patterns: Vec::new(),
            app_id: None,
        });

        settings.save(&path).unwrap();
        assert_eq!(EngineSettings::load(&path).unwrap(), settings);
    }

    #[test]
    fn test_ordered_profiles_puts_configured_order_first() {
        let registry = ProfileRegistry::with_builtins(None).unwrap();
        let settings = EngineSettings {
            profile_order: vec![ProfileId::new("dota2"), ProfileId::new("ghost"), ProfileId::new("cs2")],
            ..Default::default()
        };
        let ordered = settings.ordered_profiles(&registry.snapshot());
        assert_eq!(ordered[0].as_str(), "dota2");
        assert_eq!(ordered[1].as_str(), "cs2");
        assert_eq!(ordered[2].as_str(), "desktop");
        assert_eq!(ordered.len(), registry.snapshot().len());
    }

    #[test]
    fn test_apply_toggles() {
        let registry = ProfileRegistry::with_builtins(None).unwrap();
        let mut settings = EngineSettings::default();
        settings.profiles.insert(
            ProfileId::new("cs2"),
            ProfileToggles {
                enabled: false,
                overlay_enabled: true,
            },
        );
        settings.apply_toggles(&registry.snapshot());

        let cs2 = registry.get(&ProfileId::new("cs2")).unwrap();
        assert!(!cs2.is_enabled());
        assert!(cs2.is_overlay_enabled());
        assert!(registry.get(&ProfileId::new("dota2")).unwrap().is_enabled());
    }

    #[test]
    fn test_user_profile_descriptor_defaults_name_to_id() {
        let definition: UserProfileDefinition =
            serde_json::from_str(r#"{ "id": "mine", "process_names": ["Mine.exe"] }"#).unwrap();
        let descriptor = definition.descriptor();
        assert_eq!(descriptor.name, "mine");
        assert_eq!(descriptor.origin, ProfileOrigin::User);
    }
}
