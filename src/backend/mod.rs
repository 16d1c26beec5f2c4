pub mod http;
pub mod local;
pub mod nexus2;
pub mod nexus3;
pub mod webdav;

use std::collections::BTreeSet;
use std::sync::Arc;

use camino::Utf8Path;

use crate::config::BackendConfig;
use crate::error::RegistryError;

pub use http::{Credentials, HttpRequest, HttpResponse, ReqwestTransport, Transport};
pub use local::LocalBackend;
pub use nexus2::Nexus2Backend;
pub use nexus3::Nexus3Backend;
pub use webdav::WebDavBackend;

// Zero-byte file standing in for a directory on stores that only hold
// files. Never reported by `ls`.
pub const DIR_MARKER: &str = ".binreg-dir";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EntryKind {
    Dir,
    File,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Entry {
    pub name: String,
    pub kind: EntryKind,
}

impl Entry {
    pub fn dir(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: EntryKind::Dir,
        }
    }

    pub fn file(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: EntryKind::File,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Dir
    }
}

pub trait FileBackend {
    fn ls(&self) -> Result<BTreeSet<Entry>, RegistryError>;

    fn mkdir(&self, name: &str) -> Result<(), RegistryError>;

    fn rmdir(&self, name: &str) -> Result<(), RegistryError>;

    fn scoped(&self, name: &str) -> Self
    where
        Self: Sized;

    fn download_dir(&self, local: &Utf8Path) -> Result<(), RegistryError>;

    fn upload_dir(&self, local: &Utf8Path) -> Result<(), RegistryError>;

    fn read_file(&self, name: &str) -> Result<Vec<u8>, RegistryError>;

    fn write_file(&self, name: &str, content: &[u8]) -> Result<(), RegistryError>;

    fn location(&self) -> String;

    fn dispatch_subdir(&self, name: &str) -> Result<Self, RegistryError>
    where
        Self: Sized,
    {
        if !self.has_dir(name)? {
            return Err(RegistryError::NotFound(format!(
                "{}/{name}",
                self.location()
            )));
        }
        Ok(self.scoped(name))
    }

    fn has_dir(&self, name: &str) -> Result<bool, RegistryError> {
        Ok(self.ls()?.contains(&Entry::dir(name)))
    }

    fn has_file(&self, name: &str) -> Result<bool, RegistryError> {
        Ok(self.ls()?.contains(&Entry::file(name)))
    }
}

#[derive(Debug, Clone)]
pub enum Backend {
    Local(LocalBackend),
    WebDav(WebDavBackend),
    Nexus2(Nexus2Backend),
    Nexus3(Nexus3Backend),
}

pub fn open_backend(name: &str, config: &BackendConfig) -> Result<Backend, RegistryError> {
    match config {
        BackendConfig::Local { path } => Ok(Backend::Local(LocalBackend::new(path)?)),
        BackendConfig::WebDav {
            url,
            root,
            credentials,
        } => {
            let transport = ReqwestTransport::new(name, credentials.clone())?;
            Ok(Backend::WebDav(WebDavBackend::new(
                Arc::new(transport),
                url,
                root,
            )))
        }
        BackendConfig::Nexus2 {
            host,
            repository,
            credentials,
        } => {
            let transport = ReqwestTransport::new(name, credentials.clone())?;
            Ok(Backend::Nexus2(Nexus2Backend::new(
                Arc::new(transport),
                host,
                repository,
            )))
        }
        BackendConfig::Nexus3 {
            host,
            repository,
            credentials,
        } => {
            let transport = ReqwestTransport::new(name, credentials.clone())?;
            Ok(Backend::Nexus3(Nexus3Backend::new(
                Arc::new(transport),
                host,
                repository,
            )))
        }
    }
}

impl FileBackend for Backend {
    fn ls(&self) -> Result<BTreeSet<Entry>, RegistryError> {
        match self {
            Backend::Local(inner) => inner.ls(),
            Backend::WebDav(inner) => inner.ls(),
            Backend::Nexus2(inner) => inner.ls(),
            Backend::Nexus3(inner) => inner.ls(),
        }
    }

    fn mkdir(&self, name: &str) -> Result<(), RegistryError> {
        match self {
            Backend::Local(inner) => inner.mkdir(name),
            Backend::WebDav(inner) => inner.mkdir(name),
            Backend::Nexus2(inner) => inner.mkdir(name),
            Backend::Nexus3(inner) => inner.mkdir(name),
        }
    }

    fn rmdir(&self, name: &str) -> Result<(), RegistryError> {
        match self {
            Backend::Local(inner) => inner.rmdir(name),
            Backend::WebDav(inner) => inner.rmdir(name),
            Backend::Nexus2(inner) => inner.rmdir(name),
            Backend::Nexus3(inner) => inner.rmdir(name),
        }
    }

    fn scoped(&self, name: &str) -> Self {
        match self {
            Backend::Local(inner) => Backend::Local(inner.scoped(name)),
            Backend::WebDav(inner) => Backend::WebDav(inner.scoped(name)),
            Backend::Nexus2(inner) => Backend::Nexus2(inner.scoped(name)),
            Backend::Nexus3(inner) => Backend::Nexus3(inner.scoped(name)),
        }
    }

    fn dispatch_subdir(&self, name: &str) -> Result<Self, RegistryError> {
        match self {
            Backend::Local(inner) => inner.dispatch_subdir(name).map(Backend::Local),
            Backend::WebDav(inner) => inner.dispatch_subdir(name).map(Backend::WebDav),
            Backend::Nexus2(inner) => inner.dispatch_subdir(name).map(Backend::Nexus2),
            Backend::Nexus3(inner) => inner.dispatch_subdir(name).map(Backend::Nexus3),
        }
    }

    fn download_dir(&self, local: &Utf8Path) -> Result<(), RegistryError> {
        match self {
            Backend::Local(inner) => inner.download_dir(local),
            Backend::WebDav(inner) => inner.download_dir(local),
            Backend::Nexus2(inner) => inner.download_dir(local),
            Backend::Nexus3(inner) => inner.download_dir(local),
        }
    }

    fn upload_dir(&self, local: &Utf8Path) -> Result<(), RegistryError> {
        match self {
            Backend::Local(inner) => inner.upload_dir(local),
            Backend::WebDav(inner) => inner.upload_dir(local),
            Backend::Nexus2(inner) => inner.upload_dir(local),
            Backend::Nexus3(inner) => inner.upload_dir(local),
        }
    }

    fn read_file(&self, name: &str) -> Result<Vec<u8>, RegistryError> {
        match self {
            Backend::Local(inner) => inner.read_file(name),
            Backend::WebDav(inner) => inner.read_file(name),
            Backend::Nexus2(inner) => inner.read_file(name),
            Backend::Nexus3(inner) => inner.read_file(name),
        }
    }

    fn write_file(&self, name: &str, content: &[u8]) -> Result<(), RegistryError> {
        match self {
            Backend::Local(inner) => inner.write_file(name, content),
            Backend::WebDav(inner) => inner.write_file(name, content),
            Backend::Nexus2(inner) => inner.write_file(name, content),
            Backend::Nexus3(inner) => inner.write_file(name, content),
        }
    }

    fn location(&self) -> String {
        match self {
            Backend::Local(inner) => inner.location(),
            Backend::WebDav(inner) => inner.location(),
            Backend::Nexus2(inner) => inner.location(),
            Backend::Nexus3(inner) => inner.location(),
        }
    }
}
