//! RGB lighting orchestration engine
//!
//! Picks the active game profile from the foreground process, renders its
//! layer stack against the latest game state, composites overlays and idle
//! effects on top and pushes one frame per tick to the device layer.

#![forbid(unsafe_code)]

pub mod compositor;
pub mod config;
pub mod constants;
pub mod context;
pub mod device;
pub mod frame;
pub mod idle;
pub mod ipc;
pub mod layer;
pub mod lifecycle;
pub mod matcher;
pub mod persistence;
pub mod platform;
pub mod profile;
pub mod registry;
pub mod router;
pub mod scheduler;
pub mod state;
