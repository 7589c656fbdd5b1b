//! Profile lifecycle: staggered initialization, debounced saves, shutdown
//!
//! All background work runs on the tokio runtime under one cancellation
//! token and one task tracker, so shutdown can cancel everything and wait for
//! it with a bound. Each profile also gets a child token and its own tracker
//! so removing it stops just its work. Disk access goes through
//! `spawn_blocking`.

use anyhow::{Context, Result, bail};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::config::UserProfileDefinition;
use crate::constants::storage::DEFAULT_VARIANT_NAME;
use crate::constants::{timing, workers};
use crate::context::EngineContext;
use crate::layer::LayerCatalog;
use crate::persistence::{ProfileManifest, VariantStore};
use crate::profile::{GenericBehavior, Profile, ProfileId, ProfileOrigin, ProfileVariant, VariantSet};

type SaveKey = (ProfileId, String);

/// Load the selected variant; returns it with the names of the alternates,
/// or `None` if `cancel` fired before anything was written
fn load_selected(
    store: &VariantStore,
    catalog: &LayerCatalog,
    profile: &Profile,
    cancel: &CancellationToken,
) -> Option<(ProfileVariant, Vec<String>)> {
    let id = profile.id();
    if cancel.is_cancelled() {
        return None;
    }
    let manifest = store
        .load_manifest(id)
        .inspect_err(|e| warn!(profile = %id, error = %e, "Failed to read profile manifest"))
        .ok()
        .flatten();

    let (selected, alternates) = match manifest {
        Some(manifest) => {
            let alternates = manifest
                .variants
                .into_iter()
                .filter(|name| *name != manifest.selected)
                .collect();
            (manifest.selected, alternates)
        }
        None => (DEFAULT_VARIANT_NAME.to_string(), Vec::new()),
    };

    match store.load_variant(id, &selected) {
        Ok(Some(doc)) => return Some((ProfileVariant::from_document(&doc, catalog), alternates)),
        Ok(None) => info!(profile = %id, variant = %selected, "No usable variant on disk, creating default"),
        Err(e) => warn!(profile = %id, variant = %selected, error = %e, "Failed to load variant, creating default"),
    }

    // A removed or shut down profile must not leave files behind
    if cancel.is_cancelled() {
        debug!(profile = %id, "Cancelled before writing defaults");
        return None;
    }

    let mut fresh = profile.behavior().default_variant();
    fresh.name = selected;
    if let Err(e) = store.save_variant(id, &fresh.to_document()) {
        error!(profile = %id, error = %e, "Failed to save default variant");
    }
    let mut names = vec![fresh.name.clone()];
    names.extend(alternates.iter().cloned());
    let manifest = ProfileManifest {
        selected: fresh.name.clone(),
        variants: names,
    };
    if let Err(e) = store.save_manifest(id, &manifest) {
        error!(profile = %id, error = %e, "Failed to save profile manifest");
    }
    Some((fresh, alternates))
}

fn load_alternates(store: &VariantStore, catalog: &LayerCatalog, id: &ProfileId, names: &[String]) -> Vec<ProfileVariant> {
    names
        .iter()
        .filter_map(|name| match store.load_variant(id, name) {
            Ok(Some(doc)) => Some(ProfileVariant::from_document(&doc, catalog)),
            Ok(None) => {
                warn!(profile = %id, variant = %name, "Alternate variant missing, skipping");
                None
            }
            Err(e) => {
                warn!(profile = %id, variant = %name, error = %e, "Failed to load alternate variant");
                None
            }
        })
        .collect()
}

/// Cancellation and tracking for one profile's background work
#[derive(Clone)]
struct ProfileScope {
    cancel: CancellationToken,
    tasks: TaskTracker,
}

pub struct LifecycleCoordinator {
    ctx: Arc<EngineContext>,
    store: Arc<VariantStore>,
    cancel: CancellationToken,
    tasks: TaskTracker,
    /// Child of `cancel` per profile, so one profile's work can be stopped alone
    scopes: Mutex<HashMap<ProfileId, ProfileScope>>,
    permits: Arc<Semaphore>,
    /// Latest generation of each variant waiting for its debounced save
    pending_saves: Mutex<HashMap<SaveKey, u64>>,
    generation: AtomicU64,
    debounce: Duration,
    stagger: Duration,
    settings_path: Option<PathBuf>,
}

impl LifecycleCoordinator {
    pub fn new(ctx: Arc<EngineContext>, store: Arc<VariantStore>) -> Self {
        Self {
            ctx,
            store,
            cancel: CancellationToken::new(),
            tasks: TaskTracker::new(),
            scopes: Mutex::new(HashMap::new()),
            permits: Arc::new(Semaphore::new(workers::MAX_CONCURRENT_INITS)),
            pending_saves: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
            debounce: Duration::from_millis(timing::SAVE_DEBOUNCE_MS),
            stagger: Duration::from_millis(timing::INIT_STAGGER_MS),
            settings_path: None,
        }
    }

    pub fn with_timing(mut self, debounce: Duration, stagger: Duration) -> Self {
        self.debounce = debounce;
        self.stagger = stagger;
        self
    }

    /// Persist settings here when user profiles are added or removed
    pub fn with_settings_path(mut self, path: PathBuf) -> Self {
        self.settings_path = Some(path);
        self
    }

    pub fn context(&self) -> &Arc<EngineContext> {
        &self.ctx
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn scope(&self, id: &ProfileId) -> ProfileScope {
        self.scopes
            .lock()
            .entry(id.clone())
            .or_insert_with(|| ProfileScope {
                cancel: self.cancel.child_token(),
                tasks: TaskTracker::new(),
            })
            .clone()
    }

    /// Spawn on the global tracker and the profile's own
    fn spawn_scoped<F>(&self, scope: &ProfileScope, task: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tasks.spawn(scope.tasks.track_future(task))
    }

    /// Bring devices up, register user profiles and kick off initialization
    /// in the background
    pub fn start(self: &Arc<Self>) {
        if let Err(e) = self.ctx.devices().initialize_devices() {
            warn!(error = ?e, "Device initialization failed");
        }

        let settings = self.ctx.settings();
        for definition in &settings.user_profiles {
            match self
                .ctx
                .registry()
                .register_descriptor(definition.descriptor(), Box::new(GenericBehavior))
            {
                Ok(true) => info!(profile = %definition.id, "Registered user profile"),
                Ok(false) => debug!(profile = %definition.id, "User profile already registered"),
                Err(e) => warn!(profile = %definition.id, error = %e, "Skipping invalid user profile"),
            }
        }
        settings.apply_toggles(&self.ctx.registry().snapshot());

        let this = self.clone();
        self.tasks.spawn(async move { this.initialize_all().await });
    }

    /// Initialize every registered profile, staggered, and wait for the
    /// selected variants to be loaded
    pub async fn initialize_all(self: &Arc<Self>) {
        let registry = self.ctx.registry().snapshot();
        let mut handles = Vec::with_capacity(registry.len());

        for (i, profile) in registry.iter().enumerate() {
            if i > 0 {
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => {}
                    _ = tokio::time::sleep(self.stagger) => {}
                }
            }
            if self.cancel.is_cancelled() {
                debug!(started = handles.len(), "Startup cancelled");
                break;
            }
            handles.extend(self.spawn_init(profile.clone()));
        }

        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = ?e, "Initialization task failed");
            }
        }
        info!(count = registry.len(), "Profile initialization finished");
    }

    /// `None` when the profile's work has already been cancelled
    fn spawn_init(self: &Arc<Self>, profile: Arc<Profile>) -> Option<JoinHandle<()>> {
        let scope = self.scope(profile.id());
        if scope.cancel.is_cancelled() {
            return None;
        }
        let this = self.clone();
        let task_scope = scope.clone();
        Some(self.spawn_scoped(&scope, async move {
            if let Err(e) = this.initialize_in(profile.clone(), task_scope).await {
                error!(profile = %profile.id(), error = ?e, "Failed to initialize profile");
            }
        }))
    }

    /// Load the selected variant now and the alternates in the background
    pub async fn initialize_profile(self: &Arc<Self>, profile: Arc<Profile>) -> Result<()> {
        let scope = self.scope(profile.id());
        self.initialize_in(profile, scope).await
    }

    async fn initialize_in(self: &Arc<Self>, profile: Arc<Profile>, scope: ProfileScope) -> Result<()> {
        if profile.is_initialized() {
            return Ok(());
        }

        let permit = tokio::select! {
            biased;
            _ = scope.cancel.cancelled() => {
                debug!(profile = %profile.id(), "Initialization cancelled before start");
                return Ok(());
            }
            permit = self.permits.clone().acquire_owned() => permit.context("Initialization pool closed")?,
        };

        let store = self.store.clone();
        let catalog = self.ctx.catalog().clone();
        let loading = profile.clone();
        let cancel = scope.cancel.clone();
        let loaded = tokio::task::spawn_blocking(move || load_selected(&store, &catalog, &loading, &cancel))
            .await
            .context("Variant loading task failed")?;
        drop(permit);

        let Some((selected, alternates)) = loaded.filter(|_| !scope.cancel.is_cancelled()) else {
            debug!(profile = %profile.id(), "Initialization cancelled");
            return Ok(());
        };

        profile.install_variants(VariantSet::new(selected));
        info!(profile = %profile.id(), alternates = alternates.len(), "Profile initialized");

        if !alternates.is_empty() {
            let this = self.clone();
            let cancel = scope.cancel.clone();
            self.spawn_scoped(&scope, async move {
                this.load_alternates_in_background(profile, alternates, cancel).await
            });
        }
        Ok(())
    }

    async fn load_alternates_in_background(&self, profile: Arc<Profile>, names: Vec<String>, cancel: CancellationToken) {
        if cancel.is_cancelled() {
            return;
        }
        let store = self.store.clone();
        let catalog = self.ctx.catalog().clone();
        let id = profile.id().clone();
        let loaded = match tokio::task::spawn_blocking(move || load_alternates(&store, &catalog, &id, &names)).await {
            Ok(loaded) => loaded,
            Err(e) => {
                error!(profile = %profile.id(), error = ?e, "Alternate loading task failed");
                return;
            }
        };
        if cancel.is_cancelled() {
            return;
        }

        let count = loaded.len();
        profile.with_variants_mut(|set| {
            for variant in loaded {
                if let Err(e) = set.add(variant) {
                    warn!(profile = %profile.id(), error = %e, "Ignoring alternate variant");
                }
            }
        });
        debug!(profile = %profile.id(), count, "Alternate variants loaded");
    }

    /// Schedule a save of one variant; bursts within the debounce window
    /// collapse into a single write
    pub fn mark_dirty(self: &Arc<Self>, profile: &ProfileId, variant: &str) {
        let key: SaveKey = (profile.clone(), variant.to_string());
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        self.pending_saves.lock().insert(key.clone(), generation);

        let scope = self.scope(profile);
        let cancel = scope.cancel.clone();
        let this = self.clone();
        self.spawn_scoped(&scope, async move {
            tokio::select! {
                biased;
                // Flushed by shutdown, dropped with the profile
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(this.debounce) => {}
            }
            {
                let mut pending = this.pending_saves.lock();
                if pending.get(&key) != Some(&generation) {
                    return;
                }
                pending.remove(&key);
            }

            let saver = this.clone();
            match tokio::task::spawn_blocking(move || saver.save_now(&key.0, &key.1)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(error = ?e, "Debounced save failed"),
                Err(e) => error!(error = ?e, "Debounced save task failed"),
            }
        });
    }

    /// Write one variant and the profile manifest immediately
    pub fn save_now(&self, id: &ProfileId, variant: &str) -> Result<()> {
        let Some(profile) = self.ctx.registry().get(id) else {
            debug!(profile = %id, "Profile gone before save");
            return Ok(());
        };
        let snapshot = profile.with_variants(|set| {
            let doc = set.get(variant).map(ProfileVariant::to_document);
            (doc, set.selected().name.clone(), set.names())
        });
        let Some((Some(doc), selected, mut names)) = snapshot else {
            debug!(profile = %id, variant, "Variant gone before save");
            return Ok(());
        };

        self.store
            .save_variant(id, &doc)
            .with_context(|| format!("Failed to save variant '{variant}' of '{id}'"))?;

        // Keep alternates that are still on disk but not loaded yet
        if let Ok(Some(existing)) = self.store.load_manifest(id) {
            for name in existing.variants {
                if !names.contains(&name) && self.store.variant_path(id, &name).exists() {
                    names.push(name);
                }
            }
        }
        self.store
            .save_manifest(id, &ProfileManifest { selected, variants: names })
            .with_context(|| format!("Failed to save manifest of '{id}'"))?;
        debug!(profile = %id, variant, "Variant saved");
        Ok(())
    }

    /// Write every pending save now
    pub fn flush_pending(&self) {
        let pending: Vec<SaveKey> = self.pending_saves.lock().drain().map(|(key, _)| key).collect();
        for (id, variant) in pending {
            if let Err(e) = self.save_now(&id, &variant) {
                error!(profile = %id, variant = %variant, error = ?e, "Failed to flush save");
            }
        }
    }

    pub fn select_variant(self: &Arc<Self>, id: &ProfileId, name: &str) -> Result<()> {
        let profile = self.ctx.registry().get(id).with_context(|| format!("Unknown profile '{id}'"))?;
        match profile.with_variants_mut(|set| set.select(name)) {
            None => bail!("Profile '{id}' is not initialized"),
            Some(result) => result?,
        }
        info!(profile = %id, variant = name, "Variant selected");
        self.mark_dirty(id, name);
        Ok(())
    }

    pub fn add_variant(self: &Arc<Self>, id: &ProfileId, variant: ProfileVariant) -> Result<()> {
        let profile = self.ctx.registry().get(id).with_context(|| format!("Unknown profile '{id}'"))?;
        let name = variant.name.clone();
        match profile.with_variants_mut(|set| set.add(variant)) {
            None => bail!("Profile '{id}' is not initialized"),
            Some(result) => result?,
        }
        self.mark_dirty(id, &name);
        Ok(())
    }

    /// Change one variant in place and schedule its save
    pub fn edit_variant<R>(
        self: &Arc<Self>,
        id: &ProfileId,
        name: &str,
        edit: impl FnOnce(&mut ProfileVariant) -> R,
    ) -> Result<R> {
        let profile = self.ctx.registry().get(id).with_context(|| format!("Unknown profile '{id}'"))?;
        let out = match profile.with_variants_mut(|set| set.get_mut(name).map(edit)) {
            None => bail!("Profile '{id}' is not initialized"),
            Some(None) => bail!("Unknown variant '{name}' of '{id}'"),
            Some(Some(out)) => out,
        };
        self.mark_dirty(id, name);
        Ok(out)
    }

    pub fn remove_variant(self: &Arc<Self>, id: &ProfileId, name: &str) -> Result<()> {
        let profile = self.ctx.registry().get(id).with_context(|| format!("Unknown profile '{id}'"))?;
        let selected = match profile.with_variants_mut(|set| set.remove(name).map(|_| set.selected().name.clone())) {
            None => bail!("Profile '{id}' is not initialized"),
            Some(result) => result?,
        };
        self.pending_saves.lock().remove(&(id.clone(), name.to_string()));
        self.store
            .delete_variant(id, name)
            .with_context(|| format!("Failed to delete variant '{name}' of '{id}'"))?;
        self.mark_dirty(id, &selected);
        Ok(())
    }

    /// Register a data-driven profile, persist it in the settings and
    /// initialize it; returns `false` if the id already exists
    pub fn add_user_profile(self: &Arc<Self>, definition: UserProfileDefinition) -> Result<bool> {
        let added = self
            .ctx
            .registry()
            .register_descriptor(definition.descriptor(), Box::new(GenericBehavior))
            .context("Failed to register user profile")?;
        if !added {
            return Ok(false);
        }

        let id = definition.id.clone();
        self.ctx.modify_settings(|settings| {
            if !settings.user_profiles.iter().any(|p| p.id == definition.id) {
                settings.user_profiles.push(definition);
            }
        });
        self.save_settings()?;

        if let Some(profile) = self.ctx.registry().get(&id) {
            self.spawn_init(profile);
        }
        info!(profile = %id, "User profile added");
        Ok(true)
    }

    /// Unregister a user profile and delete everything persisted for it.
    /// In-flight initialization and saves of the profile are cancelled and
    /// awaited first so nothing is written after its storage is gone.
    pub async fn remove_user_profile(&self, id: &ProfileId) -> Result<()> {
        let profile = self.ctx.registry().get(id).with_context(|| format!("Unknown profile '{id}'"))?;
        if profile.origin() != ProfileOrigin::User {
            bail!("Profile '{id}' is built in and cannot be removed");
        }

        let scope = self.scopes.lock().remove(id);
        if let Some(scope) = scope {
            scope.cancel.cancel();
            scope.tasks.close();
            scope.tasks.wait().await;
            debug!(profile = %id, "Profile tasks stopped");
        }

        self.pending_saves.lock().retain(|(profile, _), _| profile != id);
        self.ctx.registry().unregister(id).context("Failed to remove user profile")?;
        self.ctx.modify_settings(|settings| {
            settings.user_profiles.retain(|p| p.id != *id);
            settings.profiles.remove(id);
            settings.profile_order.retain(|p| p != id);
        });
        self.save_settings()?;
        info!(profile = %id, "User profile removed");
        Ok(())
    }

    fn save_settings(&self) -> Result<()> {
        match &self.settings_path {
            Some(path) => self.ctx.settings().save(path),
            None => Ok(()),
        }
    }

    /// Cancel startup, wait for in-flight work up to `bound`, flush saves,
    /// dispose every profile and release the devices
    pub async fn shutdown(&self, bound: Duration) {
        info!("Shutting down lifecycle");
        self.cancel.cancel();
        self.tasks.close();
        if tokio::time::timeout(bound, self.tasks.wait()).await.is_err() {
            warn!(pending = self.tasks.len(), bound_ms = bound.as_millis() as u64, "Timed out waiting for background tasks");
        }

        self.flush_pending();

        let registry = self.ctx.registry().snapshot();
        for profile in registry.iter() {
            profile.dispose();
        }
        if let Err(e) = self.ctx.devices().shutdown_devices() {
            warn!(error = ?e, "Device shutdown failed");
        }
        info!(profiles = registry.len(), "Lifecycle shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineSettings;
    use crate::constants::storage::{BACKUP_SUFFIX, CORRUPT_SUFFIX};
    use crate::device::testing::{DeviceCall, RecordingDevice};
    use crate::registry::ProfileRegistry;
    use std::fs;
    use tempfile::TempDir;

    struct Harness {
        _dir: TempDir,
        store: Arc<VariantStore>,
        device: Arc<RecordingDevice>,
        lifecycle: Arc<LifecycleCoordinator>,
    }

    fn harness(debounce: Duration) -> Harness {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(VariantStore::new(dir.path().join("profiles")));
        let device = Arc::new(RecordingDevice::default());
        let registry = ProfileRegistry::with_builtins(Some(store.clone())).unwrap();
        let ctx = Arc::new(EngineContext::new(EngineSettings::default(), registry).with_devices(device.clone()));
        let lifecycle = LifecycleCoordinator::new(ctx, store.clone())
            .with_timing(debounce, Duration::from_millis(1))
            .with_settings_path(dir.path().join("settings.json"));
        Harness {
            _dir: dir,
            store,
            device,
            lifecycle: Arc::new(lifecycle),
        }
    }

    fn profile(h: &Harness, id: &str) -> Arc<Profile> {
        h.lifecycle.context().registry().get(&ProfileId::new(id)).unwrap()
    }

    fn with_suffix(path: PathBuf, suffix: &str) -> PathBuf {
        let mut name = path.into_os_string();
        name.push(".");
        name.push(suffix);
        PathBuf::from(name)
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_initialize_all_creates_and_persists_defaults() {
        let h = harness(Duration::from_millis(50));
        h.lifecycle.initialize_all().await;

        let registry = h.lifecycle.context().registry().snapshot();
        assert!(registry.iter().all(|p| p.is_initialized()));

        let cs2 = ProfileId::new("cs2");
        assert!(h.store.variant_path(&cs2, DEFAULT_VARIANT_NAME).exists());
        let manifest = h.store.load_manifest(&cs2).unwrap().unwrap();
        assert_eq!(manifest.selected, DEFAULT_VARIANT_NAME);
        let layers = profile(&h, "cs2").with_variants(|set| set.selected().layers.len()).unwrap();
        assert_eq!(layers, 3);
    }

    #[tokio::test]
    async fn test_selected_variant_first_alternates_in_background() {
        let h = harness(Duration::from_millis(50));
        let id = ProfileId::new("dota2");
        for name in ["default", "night"] {
            h.store.save_variant(&id, &ProfileVariant::new(name).to_document()).unwrap();
        }
        h.store
            .save_manifest(&id, &ProfileManifest {
                selected: "night".to_string(),
                variants: vec!["default".to_string(), "night".to_string()],
            })
            .unwrap();

        let dota = profile(&h, "dota2");
        h.lifecycle.initialize_profile(dota.clone()).await.unwrap();
        assert_eq!(dota.with_variants(|set| set.selected().name.clone()).unwrap(), "night");

        wait_until(|| dota.with_variants(|set| set.len()) == Some(2)).await;
        assert_eq!(dota.with_variants(|set| set.names()).unwrap(), vec!["night", "default"]);
    }

    #[tokio::test]
    async fn test_corrupt_selected_variant_falls_back_to_default() {
        let h = harness(Duration::from_millis(50));
        let id = ProfileId::new("cs2");
        let path = h.store.variant_path(&id, DEFAULT_VARIANT_NAME);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"{ broken").unwrap();

        let cs2 = profile(&h, "cs2");
        h.lifecycle.initialize_profile(cs2.clone()).await.unwrap();

        assert!(cs2.is_initialized());
        assert_eq!(cs2.with_variants(|set| set.selected().layers.len()), Some(3));
        assert_eq!(fs::read(with_suffix(path, CORRUPT_SUFFIX)).unwrap(), b"{ broken");
    }

    #[tokio::test]
    async fn test_mark_dirty_coalesces_bursts_into_one_write() {
        let h = harness(Duration::from_millis(40));
        let id = ProfileId::new("rocketleague");
        profile(&h, "rocketleague").install_variants(VariantSet::new(ProfileVariant::new("default")));

        for _ in 0..5 {
            h.lifecycle.mark_dirty(&id, "default");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let path = h.store.variant_path(&id, "default");
        wait_until(|| path.exists()).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(!with_suffix(path, BACKUP_SUFFIX).exists(), "more than one write happened");
        assert!(h.lifecycle.pending_saves.lock().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_flushes_pending_saves_and_disposes() {
        let h = harness(Duration::from_secs(60));
        let id = ProfileId::new("minecraft");
        let minecraft = profile(&h, "minecraft");
        minecraft.install_variants(VariantSet::new(ProfileVariant::new("default")));
        h.lifecycle.mark_dirty(&id, "default");

        h.lifecycle.shutdown(Duration::from_secs(1)).await;

        assert!(h.store.variant_path(&id, "default").exists());
        assert!(!minecraft.is_initialized());
        assert_eq!(h.device.count(DeviceCall::Shutdown), 1);
    }

    #[tokio::test]
    async fn test_cancelled_startup_initializes_nothing() {
        for _ in 0..20 {
            let h = harness(Duration::from_millis(50));
            h.lifecycle.cancellation_token().cancel();
            h.lifecycle.initialize_all().await;
            h.lifecycle.tasks.close();
            h.lifecycle.tasks.wait().await;

            let registry = h.lifecycle.context().registry().snapshot();
            assert!(registry.iter().all(|p| !p.is_initialized()));
            let root = h.store.root();
            assert!(!root.exists() || fs::read_dir(root).unwrap().next().is_none(), "storage written after cancel");
        }
    }

    fn indie() -> UserProfileDefinition {
        UserProfileDefinition {
            id: ProfileId::new("indie"),
            name: "Indie Game".to_string(),
            process_names: vec!["indie.exe".to_string()],
            title_patterns: Vec::new(),
            app_id: None,
        }
    }

    #[tokio::test]
    async fn test_add_and_remove_user_profile() {
        let h = harness(Duration::from_millis(50));
        assert!(h.lifecycle.add_user_profile(indie()).unwrap());
        assert!(!h.lifecycle.add_user_profile(indie()).unwrap());

        let id = ProfileId::new("indie");
        let indie = profile(&h, "indie");
        wait_until(|| indie.is_initialized()).await;
        assert!(h.store.profile_dir(&id).exists());
        assert_eq!(h.lifecycle.context().settings().user_profiles.len(), 1);

        h.lifecycle.remove_user_profile(&id).await.unwrap();
        assert!(!h.store.profile_dir(&id).exists());
        assert!(h.lifecycle.context().settings().user_profiles.is_empty());
        assert!(h.lifecycle.remove_user_profile(&ProfileId::new("cs2")).await.is_err());
        assert!(h.lifecycle.context().registry().get(&ProfileId::new("cs2")).is_some());
    }

    #[tokio::test]
    async fn test_removing_profile_during_initialization_leaves_no_storage() {
        for _ in 0..10 {
            let h = harness(Duration::from_millis(50));
            let id = ProfileId::new("indie");
            assert!(h.lifecycle.add_user_profile(indie()).unwrap());
            let indie = profile(&h, "indie");
            h.lifecycle.remove_user_profile(&id).await.unwrap();

            h.lifecycle.tasks.close();
            h.lifecycle.tasks.wait().await;
            assert!(!h.store.profile_dir(&id).exists());
            assert!(!indie.is_initialized());
            assert!(h.lifecycle.context().registry().get(&id).is_none());
        }
    }

    #[tokio::test]
    async fn test_removing_one_profile_leaves_other_saves_pending() {
        let h = harness(Duration::from_millis(20));
        let id = ProfileId::new("indie");
        assert!(h.lifecycle.add_user_profile(indie()).unwrap());
        let cs2 = ProfileId::new("cs2");
        profile(&h, "cs2").install_variants(VariantSet::new(ProfileVariant::new("default")));
        h.lifecycle.mark_dirty(&cs2, "default");

        h.lifecycle.remove_user_profile(&id).await.unwrap();
        let path = h.store.variant_path(&cs2, "default");
        wait_until(|| path.exists()).await;
    }

    #[tokio::test]
    async fn test_edit_variant_saves_the_change() {
        let h = harness(Duration::from_secs(60));
        let id = ProfileId::new("cs2");
        h.lifecycle.initialize_profile(profile(&h, "cs2")).await.unwrap();

        let previous = h
            .lifecycle
            .edit_variant(&id, DEFAULT_VARIANT_NAME, |variant| variant.trigger_keybind.replace("F9".to_string()))
            .unwrap();
        assert_eq!(previous, None);
        assert!(h.lifecycle.edit_variant(&id, "missing", |_| ()).is_err());

        h.lifecycle.shutdown(Duration::from_secs(1)).await;
        let doc = h.store.load_variant(&id, DEFAULT_VARIANT_NAME).unwrap().unwrap();
        assert_eq!(doc.trigger_keybind.as_deref(), Some("F9"));
    }

    #[tokio::test]
    async fn test_select_and_remove_variant_update_manifest() {
        let h = harness(Duration::from_millis(10));
        let id = ProfileId::new("cs2");
        let cs2 = profile(&h, "cs2");
        h.lifecycle.initialize_profile(cs2.clone()).await.unwrap();

        h.lifecycle.add_variant(&id, ProfileVariant::new("night")).unwrap();
        h.lifecycle.select_variant(&id, "night").unwrap();
        wait_until(|| {
            h.store
                .load_manifest(&id)
                .ok()
                .flatten()
                .is_some_and(|m| m.selected == "night")
        })
        .await;

        h.lifecycle.remove_variant(&id, "night").unwrap();
        assert!(!h.store.variant_path(&id, "night").exists());
        wait_until(|| {
            h.store
                .load_manifest(&id)
                .ok()
                .flatten()
                .is_some_and(|m| m.selected == DEFAULT_VARIANT_NAME && m.variants == vec![DEFAULT_VARIANT_NAME.to_string()])
        })
        .await;
    }
}
