//! Explicit engine context
//!
//! Everything the components share lives here and is passed by `Arc`: the
//! settings, the registry, the layer catalog, the collaborator probes and the
//! externally settable preview/wrapper keys. There are no statics.

use arc_swap::{ArcSwap, ArcSwapOption};
use std::sync::Arc;
use tracing::info;

use crate::config::EngineSettings;
use crate::device::{DeviceOutput, LoggingDevice};
use crate::idle::{IdleSource, NeverIdle};
use crate::layer::LayerCatalog;
use crate::matcher::MatchSnapshot;
use crate::platform::{ForegroundSource, NoForeground, NoProcesses, Platform, ProcessSource};
use crate::registry::ProfileRegistry;

pub struct EngineContext {
    settings: ArcSwap<EngineSettings>,
    registry: ProfileRegistry,
    catalog: LayerCatalog,
    devices: Arc<dyn DeviceOutput>,
    foreground: Arc<dyn ForegroundSource>,
    processes: Arc<dyn ProcessSource>,
    idle: Arc<dyn IdleSource>,
    preview: ArcSwapOption<String>,
    wrapper: ArcSwapOption<String>,
}

impl EngineContext {
    /// Headless context logging frames; use the `with_*` builders to attach
    /// real collaborators
    pub fn new(settings: EngineSettings, registry: ProfileRegistry) -> Self {
        settings.apply_toggles(&registry.snapshot());
        Self {
            settings: ArcSwap::from_pointee(settings),
            registry,
            catalog: LayerCatalog::default(),
            devices: Arc::new(LoggingDevice::new()),
            foreground: Arc::new(NoForeground),
            processes: Arc::new(NoProcesses),
            idle: Arc::new(NeverIdle),
            preview: ArcSwapOption::empty(),
            wrapper: ArcSwapOption::empty(),
        }
    }

    pub fn with_devices(mut self, devices: Arc<dyn DeviceOutput>) -> Self {
        self.devices = devices;
        self
    }

    pub fn with_foreground(mut self, foreground: Arc<dyn ForegroundSource>) -> Self {
        self.foreground = foreground;
        self
    }

    pub fn with_processes(mut self, processes: Arc<dyn ProcessSource>) -> Self {
        self.processes = processes;
        self
    }

    pub fn with_idle(mut self, idle: Arc<dyn IdleSource>) -> Self {
        self.idle = idle;
        self
    }

    pub fn with_platform(self, platform: Platform) -> Self {
        self.with_foreground(platform.foreground)
            .with_processes(platform.processes)
            .with_idle(platform.idle)
    }

    pub fn settings(&self) -> Arc<EngineSettings> {
        self.settings.load_full()
    }

    /// Publish new settings; observed from the next tick
    pub fn update_settings(&self, settings: EngineSettings) {
        settings.apply_toggles(&self.registry.snapshot());
        self.settings.store(Arc::new(settings));
    }

    /// Copy, modify and publish the settings
    pub fn modify_settings(&self, f: impl FnOnce(&mut EngineSettings)) -> Arc<EngineSettings> {
        let mut next = EngineSettings::clone(&self.settings.load());
        f(&mut next);
        self.update_settings(next);
        self.settings()
    }

    pub fn registry(&self) -> &ProfileRegistry {
        &self.registry
    }

    pub fn catalog(&self) -> &LayerCatalog {
        &self.catalog
    }

    pub fn devices(&self) -> &dyn DeviceOutput {
        self.devices.as_ref()
    }

    pub fn processes(&self) -> &dyn ProcessSource {
        self.processes.as_ref()
    }

    pub fn idle(&self) -> &dyn IdleSource {
        self.idle.as_ref()
    }

    pub fn preview(&self) -> Option<Arc<String>> {
        self.preview.load_full()
    }

    pub fn set_preview(&self, key: Option<String>) {
        info!(preview = ?key, "Preview override changed");
        self.preview.store(key.map(Arc::new));
    }

    pub fn wrapper(&self) -> Option<Arc<String>> {
        self.wrapper.load_full()
    }

    pub fn set_wrapper(&self, process: Option<String>) {
        info!(wrapper = ?process, "Wrapper connection changed");
        self.wrapper.store(process.map(|p| Arc::new(p.to_lowercase())));
    }

    /// Collect the matcher input for this tick
    pub fn match_snapshot(&self, settings: &EngineSettings) -> MatchSnapshot {
        MatchSnapshot {
            foreground: self.foreground.foreground(),
            preview: self.preview().map(|p| p.to_string()),
            excluded: settings.excluded_programs.clone(),
            wrapper: self.wrapper().map(|w| w.to_string()),
            allow_wrappers_in_background: settings.allow_wrappers_in_background,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::testing::FakeForeground;
    use crate::profile::ProfileId;

    #[test]
    fn test_settings_swap_applies_toggles() {
        let ctx = EngineContext::new(EngineSettings::default(), ProfileRegistry::with_builtins(None).unwrap());
        let cs2 = ctx.registry().get(&ProfileId::new("cs2")).unwrap();
        assert!(cs2.is_enabled());

        ctx.modify_settings(|s| {
            s.profiles.entry(ProfileId::new("cs2")).or_default().enabled = false;
        });
        assert!(!cs2.is_enabled());
        assert!(!ctx.settings().toggles(&ProfileId::new("cs2")).enabled);
    }

    #[test]
    fn test_match_snapshot_reflects_overrides() {
        let foreground = Arc::new(FakeForeground::default());
        foreground.set("game.exe", "Game");
        let ctx = EngineContext::new(EngineSettings::default(), ProfileRegistry::with_builtins(None).unwrap())
            .with_foreground(foreground);
        ctx.set_preview(Some("cs2".to_string()));
        ctx.set_wrapper(Some("Dota2.exe".to_string()));

        let snapshot = ctx.match_snapshot(&ctx.settings());
        assert_eq!(snapshot.foreground.unwrap().process, "game.exe");
        assert_eq!(snapshot.preview.as_deref(), Some("cs2"));
        assert_eq!(snapshot.wrapper.as_deref(), Some("dota2.exe"));
        assert!(snapshot.allow_wrappers_in_background);

        ctx.set_preview(None);
        assert!(ctx.match_snapshot(&ctx.settings()).preview.is_none());
    }
}
