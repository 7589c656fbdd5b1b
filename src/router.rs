//! Game-state routing
//!
//! Listeners deliver `(origin, payload)` pairs from their own threads. The
//! origin is an external app id or a process name; legacy payloads that do
//! not resolve by origin are tried once more by their `provider` block.

use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, trace, warn};

use crate::context::EngineContext;
use crate::profile::ProfileId;
use crate::registry::RegistryIndex;
use crate::state::{ConversionError, GameState, GameStatePayload};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RouteError {
    #[error("no profile for origin '{0}'")]
    UnknownOrigin(String),
    #[error("payload for profile '{profile}' could not be converted: {source}")]
    Conversion {
        profile: ProfileId,
        #[source]
        source: ConversionError,
    },
}

#[derive(Clone)]
pub struct GameStateRouter {
    ctx: Arc<EngineContext>,
}

fn resolve_origin(registry: &RegistryIndex, origin: &str) -> Option<ProfileId> {
    let origin = origin.trim();
    if let Ok(app_id) = origin.parse::<u32>()
        && let Some(id) = registry.resolve_by_app_id(app_id)
    {
        return Some(id);
    }
    registry.resolve_by_process(origin)
}

/// `provider.appid`, then `provider.name` (with and without `.exe`)
fn resolve_provider(registry: &RegistryIndex, payload: &GameStatePayload) -> Option<ProfileId> {
    let GameStatePayload::Legacy { value } = payload else {
        return None;
    };
    let provider = value.get("provider")?;

    let app_id = match provider.get("appid") {
        Some(Value::Number(n)) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    };
    if let Some(id) = app_id.and_then(|app_id| registry.resolve_by_app_id(app_id)) {
        return Some(id);
    }

    let name = provider.get("name")?.as_str()?;
    registry
        .resolve_by_process(name)
        .or_else(|| registry.resolve_by_process(&format!("{name}.exe")))
}

impl GameStateRouter {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        Self { ctx }
    }

    /// Resolve the owning profile and swap in the new state
    pub fn route(&self, origin: &str, payload: GameStatePayload) -> Result<ProfileId, RouteError> {
        let registry = self.ctx.registry().snapshot();
        let id = resolve_origin(&registry, origin)
            .or_else(|| resolve_provider(&registry, &payload))
            .ok_or_else(|| RouteError::UnknownOrigin(origin.to_string()))?;
        let profile = registry
            .get(&id)
            .ok_or_else(|| RouteError::UnknownOrigin(origin.to_string()))?;

        let state = GameState::conform(payload, profile.schema()).map_err(|source| RouteError::Conversion {
            profile: id.clone(),
            source,
        })?;
        profile.set_game_state(state);
        trace!(profile = %id, origin, "Game state updated");
        Ok(id)
    }

    /// Fire-and-forget entry point for listeners: misses are expected and
    /// dropped, conversion failures are logged and dropped
    pub fn ingest(&self, origin: &str, payload: GameStatePayload) {
        match self.route(origin, payload) {
            Ok(_) => {}
            Err(RouteError::UnknownOrigin(origin)) => {
                trace!(origin = %origin, "Dropping game state for untracked origin");
            }
            Err(e) => {
                warn!(origin, error = %e, "Dropping game state update");
            }
        }
    }

    /// Reset a profile's state to its default, e.g. when its feed disconnects
    pub fn reset(&self, process: &str) -> Result<ProfileId, RouteError> {
        let id = self
            .ctx
            .registry()
            .resolve_by_process(process)
            .ok_or_else(|| RouteError::UnknownOrigin(process.to_string()))?;
        let profile = self
            .ctx
            .registry()
            .get(&id)
            .ok_or_else(|| RouteError::UnknownOrigin(process.to_string()))?;
        profile.reset_game_state();
        info!(profile = %id, process, "Game state reset");
        Ok(id)
    }
}
