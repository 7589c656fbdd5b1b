//! Profile registry
//!
//! Readers (the scheduler, the router) take a [`RegistryIndex`] snapshot and
//! work against it without locking. Writers clone the index, modify the copy
//! and publish it, so a registration made while a tick is running becomes
//! visible on the next snapshot.

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::persistence::{StoreError, VariantStore};
use crate::profile::builtin::BUILTIN_PROFILES;
use crate::profile::{Profile, ProfileBehavior, ProfileDescriptor, ProfileId, ProfileOrigin};
use crate::constants::profiles::DESKTOP_ID;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("profile '{id}' has an invalid title pattern: {source}")]
    InvalidPattern {
        id: ProfileId,
        #[source]
        source: regex::Error,
    },
    #[error("profile '{0}' is not registered")]
    NotFound(ProfileId),
    #[error("built-in profile '{0}' cannot be removed")]
    Builtin(ProfileId),
    #[error("failed to delete storage of removed profile: {0}")]
    Store(#[from] StoreError),
}

/// Immutable view of every registered profile and its lookup tables
#[derive(Debug, Clone, Default)]
pub struct RegistryIndex {
    profiles: HashMap<ProfileId, Arc<Profile>>,
    /// Registration order, desktop first
    order: Vec<ProfileId>,
    by_process: HashMap<String, Vec<ProfileId>>,
    by_app_id: HashMap<u32, ProfileId>,
}

impl RegistryIndex {
    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    pub fn get(&self, id: &ProfileId) -> Option<&Arc<Profile>> {
        self.profiles.get(id)
    }

    pub fn contains(&self, id: &ProfileId) -> bool {
        self.profiles.contains_key(id)
    }

    pub fn desktop(&self) -> Option<&Arc<Profile>> {
        self.profiles.get(&ProfileId::new(DESKTOP_ID))
    }

    /// Profiles in registration order
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Profile>> {
        self.order.iter().filter_map(|id| self.profiles.get(id))
    }

    pub fn ids(&self) -> &[ProfileId] {
        &self.order
    }

    /// Process-name index entry, for inspection
    pub fn process_entry(&self, process: &str) -> Option<&[ProfileId]> {
        self.by_process.get(&process.to_lowercase()).map(Vec::as_slice)
    }

    pub fn resolve_by_process(&self, process: &str) -> Option<ProfileId> {
        self.by_process
            .get(&process.to_lowercase())
            .and_then(|ids| ids.first())
            .cloned()
    }

    pub fn resolve_by_title(&self, title: &str) -> Option<ProfileId> {
        self.iter()
            .find(|p| p.has_title_patterns() && p.matches_title(title))
            .map(|p| p.id().clone())
    }

    pub fn resolve_by_app_id(&self, app_id: u32) -> Option<ProfileId> {
        self.by_app_id.get(&app_id).cloned()
    }

    /// First enabled profile claiming `process` whose title patterns, if
    /// any, match `title`
    pub fn match_foreground(&self, process: &str, title: &str) -> Option<&Arc<Profile>> {
        self.by_process
            .get(&process.to_lowercase())?
            .iter()
            .filter_map(|id| self.profiles.get(id))
            .find(|p| p.is_enabled() && (!p.has_title_patterns() || p.matches_title(title)))
    }

    fn insert(&mut self, profile: Arc<Profile>) {
        let id = profile.id().clone();
        self.index_processes(&id, &profile.process_names());
        if let Some(app_id) = profile.app_id() {
            match self.by_app_id.get(&app_id) {
                Some(existing) => warn!(
                    app_id = app_id,
                    profile = %id,
                    existing = %existing,
                    "Duplicate app id, keeping first registrant"
                ),
                None => {
                    self.by_app_id.insert(app_id, id.clone());
                }
            }
        }
        self.order.push(id.clone());
        self.profiles.insert(id, profile);
    }

    fn remove(&mut self, id: &ProfileId) -> Option<Arc<Profile>> {
        let profile = self.profiles.remove(id)?;
        self.unindex_processes(id);
        self.by_app_id.retain(|_, owner| owner != id);
        self.order.retain(|existing| existing != id);
        Some(profile)
    }

    fn index_processes(&mut self, id: &ProfileId, names: &[String]) {
        for name in names {
            let entry = self.by_process.entry(name.clone()).or_default();
            if !entry.contains(id) {
                entry.push(id.clone());
            }
        }
    }

    fn unindex_processes(&mut self, id: &ProfileId) {
        self.by_process.retain(|_, ids| {
            ids.retain(|existing| existing != id);
            !ids.is_empty()
        });
    }
}

#[derive(Debug)]
pub struct ProfileRegistry {
    current: ArcSwap<RegistryIndex>,
    /// Serializes writers; readers never take it
    writer: Mutex<()>,
    store: Option<Arc<VariantStore>>,
}

impl ProfileRegistry {
    /// Registry holding every built-in profile, desktop included
    pub fn with_builtins(store: Option<Arc<VariantStore>>) -> Result<Self, RegistryError> {
        let registry = Self {
            current: ArcSwap::from_pointee(RegistryIndex::default()),
            writer: Mutex::new(()),
            store,
        };
        for entry in BUILTIN_PROFILES {
            let profile = entry.instantiate().map_err(|source| RegistryError::InvalidPattern {
                id: ProfileId::new(entry.id),
                source,
            })?;
            registry.register(profile);
        }
        info!(count = registry.snapshot().len(), "Registered built-in profiles");
        Ok(registry)
    }

    /// Current index; stays valid and unchanged for as long as it is held
    pub fn snapshot(&self) -> Arc<RegistryIndex> {
        self.current.load_full()
    }

    pub fn get(&self, id: &ProfileId) -> Option<Arc<Profile>> {
        self.current.load().get(id).cloned()
    }

    /// Add a profile; returns `false` if the id is already registered
    pub fn register(&self, profile: Profile) -> bool {
        let _guard = self.writer.lock();
        let current = self.current.load_full();
        if current.contains(profile.id()) {
            debug!(profile = %profile.id(), "Profile already registered, ignoring");
            return false;
        }

        let mut next = RegistryIndex::clone(&current);
        debug!(profile = %profile.id(), processes = ?profile.process_names(), "Registering profile");
        next.insert(Arc::new(profile));
        self.current.store(Arc::new(next));
        true
    }

    /// Build a profile from a descriptor and register it
    pub fn register_descriptor(
        &self,
        descriptor: ProfileDescriptor,
        behavior: Box<dyn ProfileBehavior>,
    ) -> Result<bool, RegistryError> {
        let id = descriptor.id.clone();
        let profile = Profile::new(descriptor, behavior)
            .map_err(|source| RegistryError::InvalidPattern { id, source })?;
        Ok(self.register(profile))
    }

    /// Remove a user profile and delete its persisted variants
    pub fn unregister(&self, id: &ProfileId) -> Result<Arc<Profile>, RegistryError> {
        let removed = {
            let _guard = self.writer.lock();
            let current = self.current.load_full();
            let profile = current
                .get(id)
                .ok_or_else(|| RegistryError::NotFound(id.clone()))?;
            if profile.origin() == ProfileOrigin::Builtin {
                return Err(RegistryError::Builtin(id.clone()));
            }

            let mut next = RegistryIndex::clone(&current);
            let removed = next.remove(id).ok_or_else(|| RegistryError::NotFound(id.clone()))?;
            self.current.store(Arc::new(next));
            removed
        };

        removed.dispose();
        info!(profile = %id, "Unregistered profile");

        if let Some(store) = &self.store {
            store.remove_profile(id).inspect_err(|e| {
                error!(profile = %id, error = %e, "Failed to delete profile storage");
            })?;
        }
        Ok(removed)
    }

    /// Replace a profile's process list and re-index only that profile
    pub fn update_process_names(&self, id: &ProfileId, names: &[String]) -> Result<(), RegistryError> {
        let _guard = self.writer.lock();
        let current = self.current.load_full();
        let profile = current
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(id.clone()))?;

        profile.set_process_names(names);
        let mut next = RegistryIndex::clone(&current);
        next.unindex_processes(id);
        next.index_processes(id, &profile.process_names());
        self.current.store(Arc::new(next));
        debug!(profile = %id, processes = ?profile.process_names(), "Re-indexed process names");
        Ok(())
    }

    pub fn resolve_by_process(&self, process: &str) -> Option<ProfileId> {
        self.current.load().resolve_by_process(process)
    }

    pub fn resolve_by_title(&self, title: &str) -> Option<ProfileId> {
        self.current.load().resolve_by_title(title)
    }

    pub fn resolve_by_app_id(&self, app_id: u32) -> Option<ProfileId> {
        self.current.load().resolve_by_app_id(app_id)
    }
}
