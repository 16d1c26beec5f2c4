use std::collections::BTreeSet;
use std::fs;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};

use crate::backend::{Entry, FileBackend};
use crate::error::RegistryError;
use crate::fs_util;

#[derive(Debug, Clone)]
pub struct LocalBackend {
    base: Utf8PathBuf,
    root: Utf8PathBuf,
}

impl LocalBackend {
    pub fn new(root: &Utf8Path) -> Result<Self, RegistryError> {
        if root.as_str().trim().is_empty() {
            return Err(RegistryError::Configuration(
                "local remote path is empty".to_string(),
            ));
        }
        if root.as_std_path().exists() && !root.as_std_path().is_dir() {
            return Err(RegistryError::Configuration(format!(
                "local remote path {root} is not a directory"
            )));
        }
        Ok(Self {
            base: root.to_path_buf(),
            root: root.to_path_buf(),
        })
    }

    pub fn create_root(&self) -> Result<(), RegistryError> {
        fs::create_dir_all(self.base.as_std_path())
            .map_err(|err| RegistryError::Configuration(format!("create {}: {err}", self.base)))
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    // An unmounted share must not read as an empty store.
    fn check_base(&self) -> Result<(), RegistryError> {
        if self.base.as_std_path().is_dir() {
            return Ok(());
        }
        Err(RegistryError::connection(
            self.base.as_str(),
            format!("local root {} is missing", self.base),
        ))
    }

    fn missing(&self, path: &Utf8Path) -> RegistryError {
        RegistryError::NotFound(path.to_string())
    }

    fn child(&self, root: Utf8PathBuf) -> Self {
        Self {
            base: self.base.clone(),
            root,
        }
    }
}

impl FileBackend for LocalBackend {
    fn ls(&self) -> Result<BTreeSet<Entry>, RegistryError> {
        self.check_base()?;
        let entries = match fs::read_dir(self.root.as_std_path()) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(self.missing(&self.root));
            }
            Err(err) => return Err(RegistryError::Filesystem(err.to_string())),
        };
        let mut listing = BTreeSet::new();
        for entry in entries {
            let entry = entry.map_err(|err| RegistryError::Filesystem(err.to_string()))?;
            let Ok(name) = entry.file_name().into_string() else {
                tracing::warn!(dir = %self.root, "skipping non-utf8 entry");
                continue;
            };
            let file_type = entry
                .file_type()
                .map_err(|err| RegistryError::Filesystem(err.to_string()))?;
            if file_type.is_dir() {
                listing.insert(Entry::dir(name));
            } else {
                listing.insert(Entry::file(name));
            }
        }
        Ok(listing)
    }

    fn mkdir(&self, name: &str) -> Result<(), RegistryError> {
        self.check_base()?;
        fs::create_dir_all(self.root.join(name).as_std_path())
            .map_err(|err| RegistryError::Filesystem(err.to_string()))
    }

    fn rmdir(&self, name: &str) -> Result<(), RegistryError> {
        self.check_base()?;
        let target = self.root.join(name);
        if !target.as_std_path().is_dir() {
            return Err(self.missing(&target));
        }
        fs::remove_dir_all(target.as_std_path())
            .map_err(|err| RegistryError::Filesystem(err.to_string()))
    }

    fn scoped(&self, name: &str) -> Self {
        self.child(self.root.join(name))
    }

    fn dispatch_subdir(&self, name: &str) -> Result<Self, RegistryError> {
        self.check_base()?;
        let target = self.root.join(name);
        if !target.as_std_path().is_dir() {
            return Err(self.missing(&target));
        }
        Ok(self.child(target))
    }

    fn download_dir(&self, local: &Utf8Path) -> Result<(), RegistryError> {
        self.check_base()?;
        if !self.root.as_std_path().is_dir() {
            return Err(self.missing(&self.root));
        }
        fs_util::copy_dir_recursive(&self.root, local)
    }

    fn upload_dir(&self, local: &Utf8Path) -> Result<(), RegistryError> {
        self.check_base()?;
        fs_util::remove_dir_if_exists(&self.root)?;
        fs::create_dir_all(self.root.as_std_path())
            .map_err(|err| RegistryError::Filesystem(err.to_string()))?;
        fs_util::copy_dir_recursive(local, &self.root)
    }

    fn read_file(&self, name: &str) -> Result<Vec<u8>, RegistryError> {
        self.check_base()?;
        let path = self.root.join(name);
        match fs::read(path.as_std_path()) {
            Ok(content) => Ok(content),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Err(self.missing(&path)),
            Err(err) => Err(RegistryError::Filesystem(err.to_string())),
        }
    }

    fn write_file(&self, name: &str, content: &[u8]) -> Result<(), RegistryError> {
        self.check_base()?;
        fs_util::write_bytes_atomic(&self.root.join(name), content)
    }

    fn location(&self) -> String {
        self.root.to_string()
    }
}
