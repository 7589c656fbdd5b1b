//! Fixed-rate update loop
//!
//! One dedicated thread owns the scheduler. It is the only writer of the
//! current profile and the only caller of the compositor, so the render path
//! takes no locks. Each tick:
//!
//! 1. inside the dimming window: push an empty frame, reconcile, done
//! 2. resolve the current profile
//! 3. desktop fallback disabled: stop devices once and render nothing until
//!    a later tick resolves something enabled
//! 4. render the current profile, then the overlay pass
//! 5. push the frame and fire `on_start`/`on_stop` for profiles whose
//!    rendered state changed
//!
//! After a tick the loop sleeps `max(interval - elapsed, 1ms)`.

use anyhow::{Context, Result, anyhow};
use chrono::{Local, NaiveTime};
use std::collections::BTreeSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::compositor::{LayerCompositor, OverlayPlan};
use crate::constants::profiles::DESKTOP_ID;
use crate::constants::timing::MIN_TICK_SLEEP_MS;
use crate::context::EngineContext;
use crate::frame::Frame;
use crate::idle::{DimmingWindow, idle_effect};
use crate::matcher::{MatchResult, current_profile};
use crate::profile::{Profile, ProfileId};
use crate::registry::RegistryIndex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Ticking,
    /// Last tick fell inside the dimming window
    Dimmed,
    /// Last tick rendered normally
    Active,
}

/// What one tick did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub current: Option<MatchResult>,
    pub dimmed: bool,
    pub profiles_disabled: bool,
    pub layers: usize,
    pub overlays: usize,
    pub started: Vec<ProfileId>,
    pub stopped: Vec<ProfileId>,
}

/// Sleep after a tick that took `elapsed`
pub fn sleep_after_tick(interval: Duration, elapsed: Duration) -> Duration {
    interval
        .saturating_sub(elapsed)
        .max(Duration::from_millis(MIN_TICK_SLEEP_MS))
}

fn run_hook(profile: &Profile, hook: &str, f: impl FnOnce()) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(f)) {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_default();
        warn!(profile = %profile.id(), hook, panic = %message, "Profile hook panicked");
    }
}

pub struct UpdateScheduler {
    ctx: Arc<EngineContext>,
    compositor: LayerCompositor,
    state: SchedulerState,
    /// Profiles rendered on the previous tick
    running: BTreeSet<ProfileId>,
    profiles_disabled: bool,
    /// Propagate tick failures instead of logging them
    strict: bool,
    ticks: u64,
}

impl UpdateScheduler {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        Self {
            ctx,
            compositor: LayerCompositor::new(),
            state: SchedulerState::Idle,
            running: BTreeSet::new(),
            profiles_disabled: false,
            strict: false,
            ticks: 0,
        }
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn running(&self) -> &BTreeSet<ProfileId> {
        &self.running
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Run one tick as if the local time were `now`
    pub fn tick_at(&mut self, now: NaiveTime) -> Result<TickReport> {
        self.state = SchedulerState::Ticking;
        self.ticks += 1;
        let settings = self.ctx.settings();
        let registry = self.ctx.registry().snapshot();

        if DimmingWindow::from_settings(&settings.dimming).is_some_and(|w| w.contains(now)) {
            self.push(Frame::empty());
            let (started, stopped) = self.reconcile(&registry, BTreeSet::new());
            self.state = SchedulerState::Dimmed;
            return Ok(TickReport {
                dimmed: true,
                started,
                stopped,
                ..TickReport::default()
            });
        }

        let snapshot = self.ctx.match_snapshot(&settings);
        let current = current_profile(&registry, &snapshot);
        let profile = registry
            .get(&current.profile)
            .cloned()
            .ok_or_else(|| anyhow!("resolved profile '{}' is not registered", current.profile))?;

        // An explicit preview of the desktop still renders
        if current.profile.as_str() == DESKTOP_ID && !profile.is_enabled() && !current.is_preview {
            if !self.profiles_disabled {
                self.profiles_disabled = true;
                info!("All profiles disabled, stopping devices");
                if let Err(e) = self.ctx.devices().shutdown_devices() {
                    warn!(error = ?e, "Device shutdown failed");
                }
            }
            let (started, stopped) = self.reconcile(&registry, BTreeSet::new());
            self.state = SchedulerState::Idle;
            return Ok(TickReport {
                current: Some(current),
                profiles_disabled: true,
                started,
                stopped,
                ..TickReport::default()
            });
        }

        if self.profiles_disabled {
            self.profiles_disabled = false;
            info!(profile = %current.profile, "Profiles re-enabled, initializing devices");
            if let Err(e) = self.ctx.devices().initialize_devices() {
                warn!(error = ?e, "Device initialization failed");
            }
        }

        let mut frame = Frame::empty();
        let mut rendered = BTreeSet::new();

        if profile.is_enabled() || current.is_preview {
            let state = profile.game_state();
            let layers = profile.with_variants(|set| {
                run_hook(&profile, "update_tick", || profile.behavior().update_tick(&state));
                self.compositor.render(set.selected(), &state)
            });
            match layers {
                Some(layers) => {
                    frame.layers = layers;
                    rendered.insert(current.profile.clone());
                }
                None => debug!(profile = %current.profile, "Profile not initialized yet, skipping render"),
            }
        }

        let order = settings.ordered_profiles(&registry);
        let idle = self
            .ctx
            .idle()
            .idle_time()
            .and_then(|idle_for| idle_effect(&settings.idle, idle_for));
        let overlays = self.compositor.compose_overlays(OverlayPlan {
            registry: &registry,
            order: &order,
            current: &current,
            overlays_in_preview: settings.overlays_in_preview,
            processes: self.ctx.processes(),
            idle,
        });
        frame.overlays = overlays.layers;
        rendered.extend(overlays.rendered);

        let (layer_count, overlay_count) = (frame.layers.len(), frame.overlays.len());
        trace!(profile = %current.profile, layers = layer_count, overlays = overlay_count, "Frame composited");
        self.push(frame);

        let (started, stopped) = self.reconcile(&registry, rendered);
        self.state = SchedulerState::Active;
        Ok(TickReport {
            current: Some(current),
            dimmed: false,
            profiles_disabled: false,
            layers: layer_count,
            overlays: overlay_count,
            started,
            stopped,
        })
    }

    fn push(&self, frame: Frame) {
        if let Err(e) = self.ctx.devices().push_frame(frame) {
            warn!(error = ?e, "Failed to push frame");
        }
    }

    /// Fire hooks for the difference between last tick and this one
    fn reconcile(&mut self, registry: &RegistryIndex, rendered: BTreeSet<ProfileId>) -> (Vec<ProfileId>, Vec<ProfileId>) {
        let stopped: Vec<ProfileId> = self.running.difference(&rendered).cloned().collect();
        let started: Vec<ProfileId> = rendered.difference(&self.running).cloned().collect();

        for id in &stopped {
            if let Some(profile) = registry.get(id) {
                debug!(profile = %id, "Profile stopped");
                run_hook(profile, "on_stop", || profile.behavior().on_stop(id));
            }
        }
        for id in &started {
            if let Some(profile) = registry.get(id) {
                debug!(profile = %id, "Profile started");
                run_hook(profile, "on_start", || profile.behavior().on_start(id));
            }
        }

        self.running = rendered;
        (started, stopped)
    }

    /// Tick with failures and panics contained; strict mode lets them out
    pub fn tick_guarded(&mut self, now: NaiveTime) -> Result<Option<TickReport>> {
        match panic::catch_unwind(AssertUnwindSafe(|| self.tick_at(now))) {
            Ok(Ok(report)) => Ok(Some(report)),
            Ok(Err(e)) if self.strict => Err(e),
            Ok(Err(e)) => {
                error!(error = ?e, tick = self.ticks, "Tick failed");
                self.state = SchedulerState::Idle;
                Ok(None)
            }
            Err(payload) if self.strict => panic::resume_unwind(payload),
            Err(_) => {
                error!(tick = self.ticks, "Tick panicked");
                self.state = SchedulerState::Idle;
                Ok(None)
            }
        }
    }

    /// Tick until cancelled; the current tick always finishes
    pub fn run(&mut self, cancel: &CancellationToken) -> Result<()> {
        info!(interval_ms = self.ctx.settings().update_interval_ms, strict = self.strict, "Update loop started");
        while !cancel.is_cancelled() {
            let started = Instant::now();
            self.tick_guarded(Local::now().time())?;

            let settings = self.ctx.settings();
            let interval = Duration::from_millis(settings.update_interval_ms);
            let mut sleep = sleep_after_tick(interval, started.elapsed());
            if settings.debug_delay_ms > 0 {
                sleep += Duration::from_millis(settings.debug_delay_ms);
            }
            thread::sleep(sleep);
        }

        let registry = self.ctx.registry().snapshot();
        self.reconcile(&registry, BTreeSet::new());
        self.state = SchedulerState::Idle;
        info!(ticks = self.ticks, "Update loop stopped");
        Ok(())
    }

    /// Run on a dedicated named thread
    pub fn spawn(mut self, cancel: CancellationToken) -> Result<JoinHandle<Result<()>>> {
        thread::Builder::new()
            .name("lightstack-scheduler".to_string())
            .spawn(move || self.run(&cancel))
            .context("Failed to spawn scheduler thread")
    }
}
