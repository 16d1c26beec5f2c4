use std::collections::HashSet;

use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use tracing::{debug, info, warn};

use crate::backend::Backend;
use crate::cache::Cache;
use crate::config::{ConfigFile, ConfigLoader, RemoteSpec};
use crate::domain::{PartialAssignment, Registry};
use crate::error::RegistryError;
use crate::remote::Remote;

enum Configured {
    Usable(Remote),
    Unusable { spec: RemoteSpec, reason: String },
}

impl Configured {
    fn spec(&self) -> &RemoteSpec {
        match self {
            Self::Usable(remote) => remote.spec(),
            Self::Unusable { spec, .. } => spec,
        }
    }
}

pub struct RemoteManager {
    config_path: Option<Utf8PathBuf>,
    cache: Cache,
    remotes: IndexMap<String, Configured>,
    default: Vec<String>,
}

impl RemoteManager {
    pub fn load(config_path: impl Into<Utf8PathBuf>, cache: Cache) -> Result<Self, RegistryError> {
        let config_path = config_path.into();
        let config = ConfigLoader::load(&config_path)?;
        let mut manager = Self::from_config(config, cache)?;
        manager.config_path = Some(config_path);
        Ok(manager)
    }

    pub fn in_memory(cache: Cache) -> Self {
        Self {
            config_path: None,
            cache,
            remotes: IndexMap::new(),
            default: Vec::new(),
        }
    }

    // A remote that fails to open stays in the catalogue as unusable.
    pub fn from_config(config: ConfigFile, cache: Cache) -> Result<Self, RegistryError> {
        let mut remotes = IndexMap::new();
        for (name, spec) in config.remotes {
            let entry = match Remote::open(&name, &spec, cache.clone()) {
                Ok(remote) => Configured::Usable(remote),
                Err(err) => {
                    warn!(remote = %name, error = %err, "skipping unusable remote");
                    Configured::Unusable {
                        spec,
                        reason: err.to_string(),
                    }
                }
            };
            remotes.insert(name, entry);
        }
        let mut manager = Self {
            config_path: None,
            cache,
            remotes,
            default: Vec::new(),
        };
        manager.check_default(&config.default)?;
        manager.default = config.default;
        Ok(manager)
    }

    pub fn config_path(&self) -> Option<&Utf8Path> {
        self.config_path.as_deref()
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    pub fn to_config(&self) -> ConfigFile {
        ConfigFile {
            remotes: self
                .remotes
                .iter()
                .map(|(name, entry)| (name.clone(), entry.spec().clone()))
                .collect(),
            default: self.default.clone(),
        }
    }

    pub fn save(&self) -> Result<(), RegistryError> {
        self.persist(&self.to_config())
    }

    fn persist(&self, config: &ConfigFile) -> Result<(), RegistryError> {
        match &self.config_path {
            Some(path) => {
                debug!(path = %path, "saving remote catalogue");
                ConfigLoader::save(path, config)
            }
            None => Ok(()),
        }
    }

    pub fn add_remote(&mut self, name: &str, spec: RemoteSpec) -> Result<&Remote, RegistryError> {
        if self.remotes.contains_key(name) {
            return Err(RegistryError::NameConflict(name.to_string()));
        }
        let mut remote = Remote::open(name, &spec, self.cache.clone())?;
        if let Backend::Local(local) = remote.backend() {
            local.create_root()?;
        }
        remote.probe();
        self.insert(remote)
    }

    pub fn insert_remote(&mut self, remote: Remote) -> Result<&Remote, RegistryError> {
        if self.remotes.contains_key(remote.name()) {
            return Err(RegistryError::NameConflict(remote.name().to_string()));
        }
        self.insert(remote)
    }

    fn insert(&mut self, remote: Remote) -> Result<&Remote, RegistryError> {
        let name = remote.name().to_string();
        let mut config = self.to_config();
        config.remotes.insert(name.clone(), remote.spec().clone());
        self.persist(&config)?;
        info!(remote = %name, kind = %remote.kind(), "added remote");
        self.remotes.insert(name.clone(), Configured::Usable(remote));
        self.remote(&name)
    }

    pub fn remove_remote(&mut self, name: &str) -> Result<(), RegistryError> {
        if !self.remotes.contains_key(name) {
            return Err(RegistryError::NotFound(format!("remote {name}")));
        }
        if self.default.iter().any(|entry| entry == name) {
            return Err(RegistryError::InUse(name.to_string()));
        }
        let mut config = self.to_config();
        config.remotes.shift_remove(name);
        self.persist(&config)?;
        self.remotes.shift_remove(name);
        info!(remote = %name, "removed remote");
        self.cache.clear_remote(name)
    }

    pub fn list_remotes(&self) -> Vec<&Remote> {
        self.remotes
            .values()
            .filter_map(|entry| match entry {
                Configured::Usable(remote) => Some(remote),
                Configured::Unusable { .. } => None,
            })
            .collect()
    }

    pub fn unusable_remotes(&self) -> Vec<(&str, &str)> {
        self.remotes
            .iter()
            .filter_map(|(name, entry)| match entry {
                Configured::Unusable { reason, .. } => Some((name.as_str(), reason.as_str())),
                Configured::Usable(_) => None,
            })
            .collect()
    }

    pub fn remote(&self, name: &str) -> Result<&Remote, RegistryError> {
        match self.remotes.get(name) {
            Some(Configured::Usable(remote)) => Ok(remote),
            Some(Configured::Unusable { reason, .. }) => Err(RegistryError::Configuration(
                format!("remote {name} is unusable: {reason}"),
            )),
            None => Err(RegistryError::NotFound(format!("remote {name}"))),
        }
    }

    pub fn default_list(&self) -> &[String] {
        &self.default
    }

    pub fn set_default(&mut self, names: Vec<String>) -> Result<(), RegistryError> {
        self.check_default(&names)?;
        let mut config = self.to_config();
        config.default = names.clone();
        self.persist(&config)?;
        info!(default = ?names, "set default remotes");
        self.default = names;
        Ok(())
    }

    fn check_default(&self, names: &[String]) -> Result<(), RegistryError> {
        let mut seen = HashSet::new();
        for name in names {
            if !self.remotes.contains_key(name) {
                return Err(RegistryError::NotFound(format!("remote {name}")));
            }
            if !seen.insert(name.as_str()) {
                return Err(RegistryError::Configuration(format!(
                    "remote {name} appears twice in the default list"
                )));
            }
        }
        Ok(())
    }

    pub fn find_registry(&self, name: &str) -> Result<Registry, RegistryError> {
        for remote_name in &self.default {
            match self.remote(remote_name)?.registry(name) {
                Ok(registry) => return Ok(registry),
                Err(err) if err.is_not_found() => continue,
                Err(err) => return Err(err),
            }
        }
        Err(RegistryError::NotFound(format!(
            "registry {name} on any default remote"
        )))
    }

    // Downloads from the first default remote that holds the binary and
    // returns that remote's name. Only a confirmed absence moves on to
    // the next remote; a connection failure aborts the whole lookup.
    pub fn default_download(
        &self,
        registry: &Registry,
        partial: &PartialAssignment,
        dest: &Utf8Path,
        fresh: bool,
    ) -> Result<String, RegistryError> {
        let assignment = registry.resolve(partial)?;
        for name in &self.default {
            let remote = self.remote(name)?;
            debug!(remote = remote.name(), registry = registry.name(), %assignment, "trying remote");
            if remote.try_download(registry, partial, fresh, dest)? {
                info!(remote = remote.name(), registry = registry.name(), %assignment, "downloaded");
                return Ok(remote.name().to_string());
            }
        }
        Err(RegistryError::NotFoundAnywhere {
            registry: registry.name().to_string(),
            assignment: assignment.to_string(),
        })
    }
}
