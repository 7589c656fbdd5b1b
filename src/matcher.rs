//! Current-profile resolution
//!
//! Pure function of a [`MatchSnapshot`] and a registry index. Precedence,
//! first match wins:
//!
//! 1. enabled profile claiming the foreground process (and title, if it
//!    declares patterns), unless that process is excluded
//! 2. preview override, regardless of the enabled flag
//! 3. excluded foreground process forces desktop
//! 4. connected wrapper's profile, if allowed in background and enabled
//! 5. desktop

use crate::constants::profiles::DESKTOP_ID;
use crate::profile::ProfileId;
use crate::registry::RegistryIndex;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Foreground {
    pub process: String,
    pub title: String,
}

/// Everything the matcher looks at for one tick
#[derive(Debug, Clone, Default)]
pub struct MatchSnapshot {
    pub foreground: Option<Foreground>,
    /// Profile id or process name requested by the editor
    pub preview: Option<String>,
    pub excluded: Vec<String>,
    /// Process name of a connected wrapper
    pub wrapper: Option<String>,
    pub allow_wrappers_in_background: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchResult {
    pub profile: ProfileId,
    pub is_preview: bool,
}

impl MatchResult {
    fn desktop() -> Self {
        Self {
            profile: ProfileId::new(DESKTOP_ID),
            is_preview: false,
        }
    }
}

impl MatchSnapshot {
    fn is_excluded(&self, process: &str) -> bool {
        self.excluded.iter().any(|p| p.eq_ignore_ascii_case(process))
    }
}

/// Preview keys may name a profile id or one of its processes
fn resolve_preview(registry: &RegistryIndex, key: &str) -> Option<ProfileId> {
    let id = ProfileId::new(key);
    if registry.contains(&id) {
        return Some(id);
    }
    registry.resolve_by_process(key)
}

pub fn current_profile(registry: &RegistryIndex, snapshot: &MatchSnapshot) -> MatchResult {
    let excluded_foreground = snapshot
        .foreground
        .as_ref()
        .is_some_and(|fg| snapshot.is_excluded(&fg.process));

    if let Some(fg) = snapshot.foreground.as_ref().filter(|_| !excluded_foreground)
        && let Some(profile) = registry.match_foreground(&fg.process, &fg.title)
    {
        return MatchResult {
            profile: profile.id().clone(),
            is_preview: false,
        };
    }

    if let Some(profile) = snapshot
        .preview
        .as_deref()
        .and_then(|key| resolve_preview(registry, key))
    {
        return MatchResult {
            profile,
            is_preview: true,
        };
    }

    if excluded_foreground {
        return MatchResult::desktop();
    }

    if snapshot.allow_wrappers_in_background
        && let Some(profile) = snapshot
            .wrapper
            .as_deref()
            .and_then(|process| registry.resolve_by_process(process))
            .filter(|id| registry.get(id).is_some_and(|p| p.is_enabled()))
    {
        return MatchResult {
            profile,
            is_preview: false,
        };
    }

    MatchResult::desktop()
}
