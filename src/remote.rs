use std::collections::BTreeSet;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::{debug, info, warn};

use crate::backend::{Backend, FileBackend, open_backend};
use crate::cache::{Cache, CacheSlot};
use crate::config::{BackendKind, RemoteSpec};
use crate::domain::{Assignment, BIN_DIR, PartialAssignment, Registry, validate_registry_name};
use crate::error::RegistryError;

pub const REGISTRY_MARKER: &str = ".registry.json";

pub struct Remote {
    name: String,
    spec: RemoteSpec,
    kind: BackendKind,
    backend: Backend,
    cache: Cache,
    offline: bool,
}

impl Remote {
    pub fn open(name: &str, spec: &RemoteSpec, cache: Cache) -> Result<Self, RegistryError> {
        validate_registry_name(name)?;
        let config = spec.resolve()?;
        let backend = open_backend(name, &config)?;
        Ok(Self {
            name: name.to_string(),
            spec: spec.clone(),
            kind: config.kind(),
            backend,
            cache,
            offline: false,
        })
    }

    pub fn with_backend(name: &str, spec: RemoteSpec, backend: Backend, cache: Cache) -> Self {
        let kind = match &backend {
            Backend::Local(_) => BackendKind::Local,
            Backend::WebDav(_) => BackendKind::WebDav,
            Backend::Nexus2(_) => BackendKind::Nexus2,
            Backend::Nexus3(_) => BackendKind::Nexus3,
        };
        Self {
            name: name.to_string(),
            spec,
            kind,
            backend,
            cache,
            offline: false,
        }
    }

    pub fn probe(&mut self) -> bool {
        match self.backend.ls() {
            Ok(_) => self.offline = false,
            Err(err) if err.is_not_found() => self.offline = false,
            Err(err @ RegistryError::Connection { .. }) => {
                warn!(remote = %self.name, error = %err, "remote unreachable, serving cached binaries only");
                self.offline = true;
            }
            Err(err) => {
                warn!(remote = %self.name, error = %err, "remote probe failed");
            }
        }
        !self.offline
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn spec(&self) -> &RemoteSpec {
        &self.spec
    }

    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    pub fn location(&self) -> String {
        self.backend.location()
    }

    pub fn is_offline(&self) -> bool {
        self.offline
    }

    pub fn cache_slot(&self, registry: &Registry, assignment: &Assignment) -> CacheSlot {
        self.cache.slot(&self.name, registry, assignment)
    }

    fn ensure_online(&self) -> Result<(), RegistryError> {
        if self.offline {
            return Err(RegistryError::connection(
                &self.name,
                "remote is offline (cache-only mode)",
            ));
        }
        Ok(())
    }

    pub fn create_registry(&self, registry: &Registry) -> Result<(), RegistryError> {
        self.ensure_online()?;
        self.backend.mkdir(registry.name())?;
        let dir = self.backend.scoped(registry.name());
        match dir.read_file(REGISTRY_MARKER) {
            Ok(content) => {
                let existing = parse_marker(&dir, &content)?;
                if existing.params() == registry.params() {
                    self.remember_schema(registry);
                    return Ok(());
                }
                if !self.list_binaries(&existing)?.is_empty() {
                    return Err(RegistryError::SchemaMismatch(registry.name().to_string()));
                }
                warn!(remote = %self.name, registry = registry.name(), "replacing schema of empty registry");
            }
            Err(err) if err.is_not_found() => {
                info!(remote = %self.name, registry = registry.name(), "creating registry");
            }
            Err(err) => return Err(err),
        }
        let content = serde_json::to_vec_pretty(registry)
            .map_err(|err| RegistryError::Filesystem(err.to_string()))?;
        dir.write_file(REGISTRY_MARKER, &content)?;
        self.remember_schema(registry);
        Ok(())
    }

    pub fn registry(&self, name: &str) -> Result<Registry, RegistryError> {
        validate_registry_name(name)?;
        match self.fetch_registry(name) {
            Ok(registry) => {
                self.remember_schema(&registry);
                Ok(registry)
            }
            Err(err @ RegistryError::Connection { .. }) => {
                match self.cache.cached_schema(&self.name, name) {
                    Some(registry) => {
                        warn!(remote = %self.name, registry = name, error = %err, "using cached schema");
                        Ok(registry)
                    }
                    None => Err(err),
                }
            }
            Err(err) => Err(err),
        }
    }

    fn fetch_registry(&self, name: &str) -> Result<Registry, RegistryError> {
        self.ensure_online()?;
        let dir = self.backend.scoped(name);
        let content = dir.read_file(REGISTRY_MARKER).map_err(|err| match err {
            RegistryError::NotFound(_) => {
                RegistryError::NotFound(format!("registry {name} on remote {}", self.name))
            }
            other => other,
        })?;
        parse_marker(&dir, &content)
    }

    fn remember_schema(&self, registry: &Registry) {
        if let Err(err) = self.cache.store_schema(&self.name, registry) {
            warn!(remote = %self.name, registry = registry.name(), error = %err, "failed to cache schema");
        }
    }

    pub fn list_registries(&self) -> Result<Vec<String>, RegistryError> {
        self.ensure_online()?;
        let entries = match self.backend.ls() {
            Ok(entries) => entries,
            Err(err) if err.is_not_found() => BTreeSet::new(),
            Err(err) => return Err(err),
        };
        Ok(entries
            .into_iter()
            .filter(|entry| entry.is_dir() && !entry.name.starts_with('.'))
            .map(|entry| entry.name)
            .collect())
    }

    pub fn list_binaries(&self, registry: &Registry) -> Result<Vec<Assignment>, RegistryError> {
        self.ensure_online()?;
        let dir = self.backend.dispatch_subdir(registry.name())?;
        let mut found = Vec::new();
        collect_binaries(registry, &dir, &mut Vec::new(), &mut found)?;
        Ok(found)
    }

    // Fetches the binary into `dest`. `Ok(false)` means the remote
    // confirmed it does not hold this assignment.
    pub fn try_download(
        &self,
        registry: &Registry,
        partial: &PartialAssignment,
        fresh: bool,
        dest: &Utf8Path,
    ) -> Result<bool, RegistryError> {
        let assignment = registry.resolve(partial)?;
        let slot = self.cache_slot(registry, &assignment);
        if !fresh && slot.is_complete() {
            debug!(remote = %self.name, registry = registry.name(), %assignment, "cache hit");
            slot.copy_to(dest)?;
            return Ok(true);
        }
        self.ensure_online()?;

        let bin = match self.locate(registry, &assignment) {
            Ok(bin) => bin,
            Err(err) if err.is_not_found() => {
                debug!(remote = %self.name, registry = registry.name(), %assignment, "not on remote");
                slot.invalidate()?;
                return Ok(false);
            }
            Err(err) => return Err(err),
        };

        self.cache.ensure_root()?;
        let staging = self.cache.staging_dir()?;
        let staged = utf8(staging.path().join(BIN_DIR))?;
        info!(remote = %self.name, source = %bin.location(), "downloading");
        match bin.download_dir(&staged) {
            Ok(()) => {}
            Err(err) if err.is_not_found() => {
                slot.invalidate()?;
                return Ok(false);
            }
            Err(err) => return Err(err),
        }
        slot.install(&staged)?;
        self.remember_schema(registry);
        slot.copy_to(dest)?;
        Ok(true)
    }

    pub fn download(
        &self,
        registry: &Registry,
        partial: &PartialAssignment,
        fresh: bool,
        dest: &Utf8Path,
    ) -> Result<(), RegistryError> {
        if self.try_download(registry, partial, fresh, dest)? {
            return Ok(());
        }
        let assignment = registry.resolve(partial)?;
        Err(RegistryError::NotFound(format!(
            "{} ({assignment}) on remote {}",
            registry.name(),
            self.name
        )))
    }

    pub fn upload(
        &self,
        registry: &Registry,
        partial: &PartialAssignment,
        local_dir: &Utf8Path,
    ) -> Result<Assignment, RegistryError> {
        let assignment = registry.resolve(partial)?;
        if !local_dir.as_std_path().is_dir() {
            return Err(RegistryError::Filesystem(format!(
                "{local_dir} is not a directory"
            )));
        }
        self.ensure_online()?;
        self.create_registry(registry)?;

        let mut dir = self.backend.scoped(registry.name());
        for segment in assignment.segments() {
            dir.mkdir(&segment)?;
            dir = dir.scoped(&segment);
        }
        dir.mkdir(BIN_DIR)?;
        let bin = dir.scoped(BIN_DIR);
        info!(remote = %self.name, target = %bin.location(), "uploading");
        bin.upload_dir(local_dir)?;

        self.cache.ensure_root()?;
        self.cache_slot(registry, &assignment)
            .store_copy(local_dir)?;
        Ok(assignment)
    }

    // Moves a binary to another assignment. The old copy is only deleted
    // once the new one has been uploaded.
    pub fn reassign(
        &self,
        registry: &Registry,
        old: &PartialAssignment,
        new: &PartialAssignment,
    ) -> Result<Assignment, RegistryError> {
        self.ensure_online()?;
        let old_assignment = registry.resolve(old)?;
        let new_assignment = registry.resolve(new)?;
        if old_assignment == new_assignment {
            return Ok(new_assignment);
        }

        self.cache.ensure_root()?;
        let staging = self.cache.staging_dir()?;
        let staged = utf8(staging.path().join(BIN_DIR))?;
        if !self.try_download(registry, &old_assignment.to_partial(), true, &staged)? {
            return Err(RegistryError::NotFound(format!(
                "{} ({old_assignment}) on remote {}",
                registry.name(),
                self.name
            )));
        }
        self.upload(registry, &new_assignment.to_partial(), &staged)?;
        self.remove(registry, &old_assignment.to_partial())?;
        info!(
            remote = %self.name,
            registry = registry.name(),
            from = %old_assignment,
            to = %new_assignment,
            "reassigned"
        );
        Ok(new_assignment)
    }

    pub fn remove(
        &self,
        registry: &Registry,
        partial: &PartialAssignment,
    ) -> Result<(), RegistryError> {
        self.ensure_online()?;
        let assignment = registry.resolve(partial)?;
        let segments = assignment.segments();

        let mut chain = vec![self.backend.dispatch_subdir(registry.name())?];
        for segment in &segments {
            let next = chain[chain.len() - 1].dispatch_subdir(segment)?;
            chain.push(next);
        }
        let leaf = &chain[chain.len() - 1];
        if !leaf.has_dir(BIN_DIR)? {
            return Err(RegistryError::NotFound(format!(
                "{} ({assignment}) on remote {}",
                registry.name(),
                self.name
            )));
        }

        match segments.split_last() {
            None => leaf.rmdir(BIN_DIR)?,
            Some((last, _)) => chain[segments.len() - 1].rmdir(last)?,
        }
        info!(remote = %self.name, registry = registry.name(), %assignment, "removed");

        for depth in (1..segments.len()).rev() {
            match chain[depth].ls() {
                Ok(entries) if entries.is_empty() => {
                    if let Err(err) = chain[depth - 1].rmdir(&segments[depth - 1]) {
                        warn!(remote = %self.name, error = %err, "failed to prune empty directory");
                        break;
                    }
                }
                Ok(_) => break,
                Err(err) => {
                    warn!(remote = %self.name, error = %err, "failed to inspect directory");
                    break;
                }
            }
        }

        self.cache_slot(registry, &assignment).invalidate()
    }

    fn locate(&self, registry: &Registry, assignment: &Assignment) -> Result<Backend, RegistryError> {
        let mut dir = self.backend.dispatch_subdir(registry.name())?;
        for segment in assignment.segments() {
            dir = dir.dispatch_subdir(&segment)?;
        }
        dir.dispatch_subdir(BIN_DIR)
    }
}

fn collect_binaries(
    registry: &Registry,
    dir: &Backend,
    prefix: &mut Vec<String>,
    found: &mut Vec<Assignment>,
) -> Result<(), RegistryError> {
    let entries = dir.ls()?;
    let depth = prefix.len();
    let Some(param) = registry.params().get(depth) else {
        if entries.iter().any(|entry| entry.is_dir() && entry.name == BIN_DIR) {
            found.push(Assignment::from_segments(registry, prefix)?);
        }
        return Ok(());
    };
    let wanted = format!("{}=", param.name);
    for entry in entries {
        if !entry.is_dir() || !entry.name.starts_with(&wanted) {
            continue;
        }
        prefix.push(entry.name.clone());
        collect_binaries(registry, &dir.scoped(&entry.name), prefix, found)?;
        prefix.pop();
    }
    Ok(())
}

fn parse_marker(dir: &Backend, content: &[u8]) -> Result<Registry, RegistryError> {
    serde_json::from_slice(content).map_err(|err| {
        RegistryError::ConfigParse(format!("{}/{REGISTRY_MARKER}: {err}", dir.location()))
    })
}

fn utf8(path: std::path::PathBuf) -> Result<Utf8PathBuf, RegistryError> {
    Utf8PathBuf::from_path_buf(path)
        .map_err(|_| RegistryError::Filesystem("non-utf8 cache directory".to_string()))
}
