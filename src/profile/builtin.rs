//! Built-in profiles, enumerated once at startup
//!
//! Each entry maps a profile id to its matching rules, state schema and a
//! behavior factory. User profiles go through the same [`ProfileDescriptor`]
//! path without an entry here.

use serde_json::json;
use tracing::debug;

use super::{GenericBehavior, Profile, ProfileBehavior, ProfileDescriptor, ProfileId, ProfileOrigin, ProfileVariant};
use crate::constants::profiles::DESKTOP_ID;
use crate::constants::storage::DEFAULT_VARIANT_NAME;
use crate::layer::handlers::{GradientByStateLayer, PercentLayer, SolidColorLayer};
use crate::layer::{Color, Layer};
use crate::state::{GameState, StateSchema};

pub struct BuiltinProfile {
    pub id: &'static str,
    pub name: &'static str,
    pub process_names: &'static [&'static str],
    pub title_patterns: &'static [&'static str],
    pub app_id: Option<u32>,
    pub schema: fn() -> StateSchema,
    pub behavior: fn() -> Box<dyn ProfileBehavior>,
}

impl BuiltinProfile {
    pub fn descriptor(&self) -> ProfileDescriptor {
        ProfileDescriptor {
            id: ProfileId::new(self.id),
            name: self.name.to_string(),
            origin: ProfileOrigin::Builtin,
            process_names: self.process_names.iter().map(|s| s.to_string()).collect(),
            title_patterns: self.title_patterns.iter().map(|s| s.to_string()).collect(),
            app_id: self.app_id,
            schema: (self.schema)(),
        }
    }

    pub fn instantiate(&self) -> Result<Profile, regex::Error> {
        Profile::new(self.descriptor(), (self.behavior)())
    }
}

/// Function-row keys used by the default variants
const HEALTH_KEYS: [u32; 12] = [59, 60, 61, 62, 63, 64, 65, 66, 67, 68, 87, 88];
const AMMO_KEYS: [u32; 10] = [2, 3, 4, 5, 6, 7, 8, 9, 10, 11];

fn desktop_schema() -> StateSchema {
    StateSchema::legacy("Desktop")
}

fn shooter_schema() -> StateSchema {
    StateSchema::typed(
        "ShooterState",
        json!({
            "Player": { "Health": 100, "Armor": 0, "Flashed": 0, "Burning": 0 },
            "Weapon": { "Clip": 0, "ClipMax": 0 },
            "Round": { "Phase": "" }
        }),
    )
}

fn moba_schema() -> StateSchema {
    StateSchema::typed(
        "MobaState",
        json!({
            "Hero": { "Health": 0, "MaxHealth": 0, "Mana": 0, "MaxMana": 0, "Dead": false },
            "Map": { "GameState": "" }
        }),
    )
}

fn generic_schema() -> StateSchema {
    StateSchema::legacy("Generic")
}

#[derive(Debug)]
struct DesktopBehavior;

impl ProfileBehavior for DesktopBehavior {
    fn default_variant(&self) -> ProfileVariant {
        let background = SolidColorLayer { color: Color::rgb(32, 32, 64), keys: Vec::new() };
        ProfileVariant::new(DEFAULT_VARIANT_NAME).with_layers(vec![Layer::new("Background", Box::new(background))])
    }
}

#[derive(Debug)]
struct ShooterBehavior;

impl ProfileBehavior for ShooterBehavior {
    fn on_start(&self, profile: &ProfileId) {
        debug!(profile = %profile, "Shooter profile active");
    }

    fn default_variant(&self) -> ProfileVariant {
        let health = PercentLayer {
            value_path: "Player/Health".to_string(),
            max: 100.0,
            max_path: None,
            keys: HEALTH_KEYS.to_vec(),
            foreground: Color::rgb(0, 255, 0),
            background: Color::rgb(255, 0, 0),
        };
        let ammo = PercentLayer {
            value_path: "Weapon/Clip".to_string(),
            max: 30.0,
            max_path: Some("Weapon/ClipMax".to_string()),
            keys: AMMO_KEYS.to_vec(),
            foreground: Color::rgb(255, 200, 0),
            background: Color::BLACK,
        };
        let mut flash = Layer::new(
            "Flashbang",
            Box::new(SolidColorLayer { color: Color::rgb(255, 255, 255), keys: Vec::new() }),
        );
        flash.override_logic.opacity_from = Some("Player/Flashed".to_string());

        ProfileVariant::new(DEFAULT_VARIANT_NAME).with_layers(vec![
            flash,
            Layer::new("Health", Box::new(health)),
            Layer::new("Ammo", Box::new(ammo)),
        ])
    }
}

#[derive(Debug)]
struct MobaBehavior;

impl ProfileBehavior for MobaBehavior {
    fn update_tick(&self, state: &GameState) {
        if state.boolean("Hero/Dead") == Some(true) {
            debug!("Hero is dead, respawn effects active");
        }
    }

    fn default_variant(&self) -> ProfileVariant {
        let health = PercentLayer {
            value_path: "Hero/Health".to_string(),
            max: 100.0,
            max_path: Some("Hero/MaxHealth".to_string()),
            keys: HEALTH_KEYS.to_vec(),
            foreground: Color::rgb(0, 255, 0),
            background: Color::rgb(255, 0, 0),
        };
        let mana = PercentLayer {
            value_path: "Hero/Mana".to_string(),
            max: 100.0,
            max_path: Some("Hero/MaxMana".to_string()),
            keys: AMMO_KEYS.to_vec(),
            foreground: Color::rgb(0, 120, 255),
            background: Color::BLACK,
        };
        let mut dead = Layer::new(
            "Dead",
            Box::new(SolidColorLayer { color: Color::rgba(60, 60, 60, 200), keys: Vec::new() }),
        );
        dead.override_logic.enabled_when = Some("Hero/Dead".to_string());

        ProfileVariant::new(DEFAULT_VARIANT_NAME).with_layers(vec![
            dead,
            Layer::new("Health", Box::new(health)),
            Layer::new("Mana", Box::new(mana)),
        ])
    }
}

#[derive(Debug)]
struct RacingBehavior;

impl ProfileBehavior for RacingBehavior {
    fn default_variant(&self) -> ProfileVariant {
        let boost = GradientByStateLayer {
            value_path: "car/boost".to_string(),
            min: 0.0,
            max: 100.0,
            low: Color::rgb(40, 0, 0),
            high: Color::rgb(255, 120, 0),
        };
        ProfileVariant::new(DEFAULT_VARIANT_NAME).with_layers(vec![Layer::new("Boost", Box::new(boost))])
    }
}

fn desktop_behavior() -> Box<dyn ProfileBehavior> {
    Box::new(DesktopBehavior)
}

fn shooter_behavior() -> Box<dyn ProfileBehavior> {
    Box::new(ShooterBehavior)
}

fn moba_behavior() -> Box<dyn ProfileBehavior> {
    Box::new(MobaBehavior)
}

fn racing_behavior() -> Box<dyn ProfileBehavior> {
    Box::new(RacingBehavior)
}

fn generic_behavior() -> Box<dyn ProfileBehavior> {
    Box::new(GenericBehavior)
}

pub const BUILTIN_PROFILES: &[BuiltinProfile] = &[
    BuiltinProfile {
        id: DESKTOP_ID,
        name: "Desktop",
        process_names: &[],
        title_patterns: &[],
        app_id: None,
        schema: desktop_schema,
        behavior: desktop_behavior,
    },
    BuiltinProfile {
        id: "cs2",
        name: "Counter-Strike 2",
        process_names: &["cs2.exe", "cs2"],
        title_patterns: &[],
        app_id: Some(730),
        schema: shooter_schema,
        behavior: shooter_behavior,
    },
    BuiltinProfile {
        id: "dota2",
        name: "Dota 2",
        process_names: &["dota2.exe", "dota2"],
        title_patterns: &[],
        app_id: Some(570),
        schema: moba_schema,
        behavior: moba_behavior,
    },
    BuiltinProfile {
        id: "rocketleague",
        name: "Rocket League",
        process_names: &["rocketleague.exe"],
        title_patterns: &[],
        app_id: Some(252950),
        schema: generic_schema,
        behavior: racing_behavior,
    },
    BuiltinProfile {
        id: "minecraft",
        name: "Minecraft",
        process_names: &["javaw.exe", "java"],
        title_patterns: &["^Minecraft"],
        app_id: None,
        schema: generic_schema,
        behavior: generic_behavior,
    },
];

pub fn desktop() -> &'static BuiltinProfile {
    &BUILTIN_PROFILES[0]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_desktop_is_first_entry() {
        assert_eq!(desktop().id, DESKTOP_ID);
        assert!(desktop().process_names.is_empty());
    }

    #[test]
    fn test_builtin_ids_and_app_ids_are_unique() {
        let ids: HashSet<_> = BUILTIN_PROFILES.iter().map(|p| p.id).collect();
        assert_eq!(ids.len(), BUILTIN_PROFILES.len());

        let app_ids: Vec<_> = BUILTIN_PROFILES.iter().filter_map(|p| p.app_id).collect();
        let unique: HashSet<_> = app_ids.iter().collect();
        assert_eq!(unique.len(), app_ids.len());
    }

    #[test]
    fn test_every_builtin_instantiates_with_a_default_variant() {
        for entry in BUILTIN_PROFILES {
            let profile = entry.instantiate().unwrap();
            assert_eq!(profile.origin(), ProfileOrigin::Builtin);
            let variant = profile.behavior().default_variant();
            assert_eq!(variant.name, DEFAULT_VARIANT_NAME);
        }
    }
}
