//! Control socket message types

use serde::{Deserialize, Serialize};

use crate::state::GameStatePayload;

/// Requests sent from a control client to the engine
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum EngineRequest {
    /// Deliver a game-state payload from a listener
    GameState { origin: String, payload: GameStatePayload },

    /// Force a profile by id or process name, `None` clears the override
    SetPreview(Option<String>),

    /// Reset the state of the profile owning this process
    ResetGameState(String),

    /// A wrapper process connected, `None` when it disconnects
    WrapperConnected(Option<String>),

    /// Health check
    Ping,

    /// Request graceful shutdown
    Shutdown,
}

/// Responses sent from the engine back to the client
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum EngineResponse {
    /// Health check response
    Pong,

    /// Request was applied
    Ok,

    /// Request was rejected
    Error(String),
}
