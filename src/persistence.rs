//! On-disk storage of profile variants
//!
//! Layout: `<root>/<profile id>/profile.json` (manifest) plus one
//! `<variant>.json` per variant. Every write goes to `<file>.tmp` first, the
//! previous good copy is moved to `<file>.bak`, then the temp file replaces
//! the original, so a crash mid-save never loses the last good copy.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

use crate::constants::storage::{BACKUP_SUFFIX, CORRUPT_SUFFIX, MANIFEST_FILENAME, TEMP_SUFFIX, VARIANT_EXTENSION};
use crate::profile::{ProfileId, VariantDocument};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to serialize document: {0}")]
    Serialize(#[from] serde_json::Error),
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Selected variant and variant order of one profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileManifest {
    pub selected: String,
    pub variants: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct VariantStore {
    root: PathBuf,
}

impl VariantStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `<config dir>/lightstack/profiles`
    pub fn default_root() -> PathBuf {
        let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push(crate::constants::config::APP_DIR);
        path.push(crate::constants::config::PROFILES_DIR);
        path
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn profile_dir(&self, profile: &ProfileId) -> PathBuf {
        self.root.join(sanitize(profile.as_str()))
    }

    pub fn variant_path(&self, profile: &ProfileId, variant: &str) -> PathBuf {
        self.profile_dir(profile)
            .join(format!("{}.{}", sanitize(variant), VARIANT_EXTENSION))
    }

    fn manifest_path(&self, profile: &ProfileId) -> PathBuf {
        self.profile_dir(profile).join(MANIFEST_FILENAME)
    }

    pub fn load_manifest(&self, profile: &ProfileId) -> Result<Option<ProfileManifest>, StoreError> {
        read_with_recovery(&self.manifest_path(profile))
    }

    pub fn save_manifest(&self, profile: &ProfileId, manifest: &ProfileManifest) -> Result<(), StoreError> {
        write_atomic(&self.manifest_path(profile), &serde_json::to_vec_pretty(manifest)?)
    }

    /// Load a variant, recovering from backups; `None` when nothing usable exists
    pub fn load_variant(&self, profile: &ProfileId, variant: &str) -> Result<Option<VariantDocument>, StoreError> {
        read_with_recovery(&self.variant_path(profile, variant))
    }

    pub fn save_variant(&self, profile: &ProfileId, doc: &VariantDocument) -> Result<(), StoreError> {
        let path = self.variant_path(profile, &doc.name);
        write_atomic(&path, &serde_json::to_vec_pretty(doc)?)
    }

    pub fn delete_variant(&self, profile: &ProfileId, variant: &str) -> Result<(), StoreError> {
        let path = self.variant_path(profile, variant);
        for candidate in [path.clone(), sibling(&path, BACKUP_SUFFIX), sibling(&path, TEMP_SUFFIX)] {
            remove_if_exists(&candidate)?;
        }
        Ok(())
    }

    /// Delete everything persisted for a profile
    pub fn remove_profile(&self, profile: &ProfileId) -> Result<(), StoreError> {
        let dir = self.profile_dir(profile);
        match fs::remove_dir_all(&dir) {
            Ok(()) => {
                info!(profile = %profile, path = %dir.display(), "Removed profile storage");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_err(&dir)(e)),
        }
    }
}

/// Keep file names portable; ids and variant names are user-chosen
fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if cleaned.is_empty() { "_".to_string() } else { cleaned }
}

/// `foo.json` + `bak` → `foo.json.bak`
fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

fn remove_if_exists(path: &Path) -> Result<(), StoreError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(io_err(path)(e)),
    }
}

/// Write to a temp file, move the current copy to `.bak`, then swap in
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_err(parent))?;
    }

    let tmp = sibling(path, TEMP_SUFFIX);
    {
        let mut file = fs::File::create(&tmp).map_err(io_err(&tmp))?;
        file.write_all(bytes).map_err(io_err(&tmp))?;
        file.sync_all().map_err(io_err(&tmp))?;
    }

    if path.exists() {
        let backup = sibling(path, BACKUP_SUFFIX);
        fs::rename(path, &backup).map_err(io_err(path))?;
    }
    fs::rename(&tmp, path).map_err(io_err(&tmp))?;
    Ok(())
}

/// Rename an unparseable file out of the way, never deleting it
fn quarantine(path: &Path) {
    let target = sibling(path, CORRUPT_SUFFIX);
    match fs::rename(path, &target) {
        Ok(()) => warn!(path = %path.display(), moved_to = %target.display(), "Renamed corrupt file aside"),
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to rename corrupt file aside"),
    }
}

fn parse_file<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(io_err(path)(e)),
    };
    match serde_json::from_slice(&bytes) {
        Ok(doc) => Ok(Some(doc)),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to parse persisted document");
            quarantine(path);
            Ok(None)
        }
    }
}

/// Read `path`; if it is missing or corrupt, restore the most recent
/// parseable backup in its place and delete the leftover candidates.
pub fn read_with_recovery<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    if let Some(doc) = parse_file(path)? {
        return Ok(Some(doc));
    }

    let mut candidates: Vec<(PathBuf, std::time::SystemTime)> = [BACKUP_SUFFIX, TEMP_SUFFIX]
        .iter()
        .map(|suffix| sibling(path, suffix))
        .filter_map(|candidate| {
            let modified = fs::metadata(&candidate).and_then(|m| m.modified()).ok()?;
            Some((candidate, modified))
        })
        .collect();
    candidates.sort_by(|a, b| b.1.cmp(&a.1));

    let mut restored = None;
    for (candidate, _) in &candidates {
        if restored.is_some() {
            remove_if_exists(candidate)?;
            continue;
        }
        if let Some(doc) = parse_file::<T>(candidate)? {
            fs::rename(candidate, path).map_err(io_err(candidate))?;
            info!(path = %path.display(), from = %candidate.display(), "Recovered document from backup");
            restored = Some(doc);
        }
    }
    Ok(restored)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    fn doc(name: &str) -> VariantDocument {
        VariantDocument {
            name: name.to_string(),
            layers: vec![],
            overlay_layers: vec![],
            trigger_keybind: Some("Ctrl+F1".to_string()),
        }
    }

    fn set_mtime(path: &Path, secs_ago: u64) {
        let file = fs::OpenOptions::new().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() - Duration::from_secs(secs_ago)).unwrap();
    }

    #[test]
    fn test_save_then_load_variant() {
        let dir = TempDir::new().unwrap();
        let store = VariantStore::new(dir.path());
        let id = ProfileId::new("cs2");

        store.save_variant(&id, &doc("default")).unwrap();
        assert_eq!(store.load_variant(&id, "default").unwrap(), Some(doc("default")));
    }

    #[test]
    fn test_second_save_keeps_backup_of_previous() {
        let dir = TempDir::new().unwrap();
        let store = VariantStore::new(dir.path());
        let id = ProfileId::new("cs2");

        store.save_variant(&id, &doc("default")).unwrap();
        let mut updated = doc("default");
        updated.trigger_keybind = None;
        store.save_variant(&id, &updated).unwrap();

        let path = store.variant_path(&id, "default");
        assert!(sibling(&path, BACKUP_SUFFIX).exists());
        assert!(!sibling(&path, TEMP_SUFFIX).exists());
        assert_eq!(store.load_variant(&id, "default").unwrap(), Some(updated));
    }

    #[test]
    fn test_missing_primary_recovers_from_newest_backup() {
        let dir = TempDir::new().unwrap();
        let store = VariantStore::new(dir.path());
        let id = ProfileId::new("dota2");
        let path = store.variant_path(&id, "default");
        fs::create_dir_all(path.parent().unwrap()).unwrap();

        let mut older = doc("default");
        older.trigger_keybind = Some("old".to_string());
        let mut newer = doc("default");
        newer.trigger_keybind = Some("new".to_string());

        let bak = sibling(&path, BACKUP_SUFFIX);
        let tmp = sibling(&path, TEMP_SUFFIX);
        fs::write(&bak, serde_json::to_vec(&older).unwrap()).unwrap();
        fs::write(&tmp, serde_json::to_vec(&newer).unwrap()).unwrap();
        set_mtime(&bak, 60);
        set_mtime(&tmp, 5);

        let loaded = store.load_variant(&id, "default").unwrap();
        assert_eq!(loaded, Some(newer));
        assert!(path.exists());
        assert!(!bak.exists(), "extra backups are deleted after recovery");
        assert!(!tmp.exists());
    }

    #[test]
    fn test_corrupt_primary_is_renamed_aside_not_deleted() {
        let dir = TempDir::new().unwrap();
        let store = VariantStore::new(dir.path());
        let id = ProfileId::new("minecraft");
        let path = store.variant_path(&id, "default");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"{ not json").unwrap();

        assert_eq!(store.load_variant(&id, "default").unwrap(), None);
        assert!(!path.exists());
        assert_eq!(fs::read(sibling(&path, CORRUPT_SUFFIX)).unwrap(), b"{ not json");
    }

    #[test]
    fn test_corrupt_primary_falls_back_to_backup() {
        let dir = TempDir::new().unwrap();
        let store = VariantStore::new(dir.path());
        let id = ProfileId::new("minecraft");
        store.save_variant(&id, &doc("default")).unwrap();
        store.save_variant(&id, &doc("default")).unwrap();

        let path = store.variant_path(&id, "default");
        fs::write(&path, b"garbage").unwrap();

        assert_eq!(store.load_variant(&id, "default").unwrap(), Some(doc("default")));
        assert!(sibling(&path, CORRUPT_SUFFIX).exists());
    }

    #[test]
    fn test_manifest_round_trip_and_profile_removal() {
        let dir = TempDir::new().unwrap();
        let store = VariantStore::new(dir.path());
        let id = ProfileId::new("user-game");
        let manifest = ProfileManifest {
            selected: "night".to_string(),
            variants: vec!["default".to_string(), "night".to_string()],
        };

        store.save_manifest(&id, &manifest).unwrap();
        assert_eq!(store.load_manifest(&id).unwrap(), Some(manifest));

        store.remove_profile(&id).unwrap();
        assert!(!store.profile_dir(&id).exists());
        // Removing again is not an error
        store.remove_profile(&id).unwrap();
    }

    #[test]
    fn test_sanitize_replaces_path_separators() {
        assert_eq!(sanitize("../evil/name"), "___evil_name");
        assert_eq!(sanitize(""), "_");
    }
}
