use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use tempfile::{Builder, TempDir};

use crate::config::ConfigLoader;
use crate::domain::{Assignment, BIN_DIR, Registry};
use crate::error::RegistryError;
use crate::fs_util;
use crate::remote::REGISTRY_MARKER;

const COMPLETE_MARKER: &str = ".complete.json";
const STAGING_DIR: &str = ".staging";

#[derive(Debug, Clone)]
pub struct Cache {
    root: Utf8PathBuf,
}

impl Cache {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn open_default() -> Result<Self, RegistryError> {
        Ok(Self::new(ConfigLoader::default_cache_root()?))
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn ensure_root(&self) -> Result<(), RegistryError> {
        fs::create_dir_all(self.root.as_std_path())
            .map_err(|err| RegistryError::Filesystem(err.to_string()))
    }

    pub fn remote_dir(&self, remote: &str) -> Utf8PathBuf {
        self.root.join(remote)
    }

    pub fn slot(&self, remote: &str, registry: &Registry, assignment: &Assignment) -> CacheSlot {
        let dir = assignment
            .segments()
            .iter()
            .fold(self.remote_dir(remote).join(registry.name()), |dir, segment| {
                dir.join(segment)
            });
        CacheSlot {
            dir,
            remote: remote.to_string(),
            registry: registry.name().to_string(),
            assignment: assignment.to_string(),
        }
    }

    fn schema_path(&self, remote: &str, registry: &str) -> Utf8PathBuf {
        self.remote_dir(remote).join(registry).join(REGISTRY_MARKER)
    }

    pub fn store_schema(&self, remote: &str, registry: &Registry) -> Result<(), RegistryError> {
        let content = serde_json::to_vec_pretty(registry)
            .map_err(|err| RegistryError::Filesystem(err.to_string()))?;
        fs_util::write_bytes_atomic(&self.schema_path(remote, registry.name()), &content)
    }

    pub fn cached_schema(&self, remote: &str, registry: &str) -> Option<Registry> {
        let content = fs::read(self.schema_path(remote, registry).as_std_path()).ok()?;
        serde_json::from_slice(&content).ok()
    }

    pub fn staging_dir(&self) -> Result<TempDir, RegistryError> {
        let staging = self.root.join(STAGING_DIR);
        fs::create_dir_all(staging.as_std_path())
            .map_err(|err| RegistryError::Filesystem(err.to_string()))?;
        Builder::new()
            .prefix("binreg-download")
            .tempdir_in(staging.as_std_path())
            .map_err(|err| RegistryError::Filesystem(err.to_string()))
    }

    pub fn clear_remote(&self, remote: &str) -> Result<(), RegistryError> {
        fs_util::remove_dir_if_exists(&self.remote_dir(remote))
    }

    pub fn clear(&self) -> Result<(), RegistryError> {
        fs_util::remove_dir_if_exists(&self.root)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotMetadata {
    pub remote: String,
    pub registry: String,
    pub assignment: String,
    pub fetched_at: String,
}

// The cache entry for one `(remote, registry, assignment)`. A slot only
// counts as present once its completion marker has been written.
#[derive(Debug, Clone)]
pub struct CacheSlot {
    dir: Utf8PathBuf,
    remote: String,
    registry: String,
    assignment: String,
}

impl CacheSlot {
    pub fn dir(&self) -> &Utf8Path {
        &self.dir
    }

    pub fn bin_dir(&self) -> Utf8PathBuf {
        self.dir.join(BIN_DIR)
    }

    fn marker_path(&self) -> Utf8PathBuf {
        self.dir.join(COMPLETE_MARKER)
    }

    pub fn is_complete(&self) -> bool {
        self.marker_path().as_std_path().is_file() && self.bin_dir().as_std_path().is_dir()
    }

    pub fn metadata(&self) -> Option<SlotMetadata> {
        let content = fs::read(self.marker_path().as_std_path()).ok()?;
        serde_json::from_slice(&content).ok()
    }

    pub fn install(&self, staged: &Utf8Path) -> Result<(), RegistryError> {
        self.invalidate()?;
        fs::create_dir_all(self.dir.as_std_path())
            .map_err(|err| RegistryError::Filesystem(err.to_string()))?;
        fs_util::atomic_rename_dir(staged.as_std_path(), self.bin_dir().as_std_path())
            .map_err(|err| RegistryError::Filesystem(err.to_string()))?;
        self.mark_complete()
    }

    pub fn store_copy(&self, source: &Utf8Path) -> Result<(), RegistryError> {
        self.invalidate()?;
        fs_util::copy_dir_atomic(source, &self.bin_dir())?;
        self.mark_complete()
    }

    pub fn copy_to(&self, dest: &Utf8Path) -> Result<(), RegistryError> {
        fs_util::copy_dir_atomic(&self.bin_dir(), dest)
    }

    pub fn invalidate(&self) -> Result<(), RegistryError> {
        match fs::remove_file(self.marker_path().as_std_path()) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(RegistryError::Filesystem(err.to_string())),
        }
        fs_util::remove_dir_if_exists(&self.bin_dir())
    }

    fn mark_complete(&self) -> Result<(), RegistryError> {
        let metadata = SlotMetadata {
            remote: self.remote.clone(),
            registry: self.registry.clone(),
            assignment: self.assignment.clone(),
            fetched_at: chrono::Utc::now().to_rfc3339(),
        };
        let content = serde_json::to_vec_pretty(&metadata)
            .map_err(|err| RegistryError::Filesystem(err.to_string()))?;
        fs_util::write_bytes_atomic(&self.marker_path(), &content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Param, PartialAssignment};

    #[test]
    fn layout_paths() {
        let cache = Cache::new("/tmp/binreg-cache");
        let registry = Registry::new(
            "compiler-pkg",
            vec![
                Param::new("os", Some("linux")),
                Param::new("arch", Some("x64")),
            ],
        )
        .unwrap();
        let assignment = registry.resolve(&PartialAssignment::new()).unwrap();
        let slot = cache.slot("origin", &registry, &assignment);
        assert!(
            slot.bin_dir()
                .ends_with("origin/compiler-pkg/os=linux/arch=x64/bin")
        );
        assert!(
            cache
                .schema_path("origin", "compiler-pkg")
                .ends_with("origin/compiler-pkg/.registry.json")
        );
    }
}
