use std::fmt;
use std::fs;
use std::str::FromStr;

use camino::{Utf8Path, Utf8PathBuf};
use directories::ProjectDirs;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::backend::http::Credentials;
use crate::error::RegistryError;

pub const CONFIG_FILE_NAME: &str = "binreg.json";
pub const CONFIG_ENV: &str = "BINREG_CONFIG";
pub const CACHE_ENV: &str = "BINREG_CACHE";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Local,
    WebDav,
    Nexus2,
    Nexus3,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Local => "local",
            BackendKind::WebDav => "webdav",
            BackendKind::Nexus2 => "nexus2",
            BackendKind::Nexus3 => "nexus3",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = RegistryError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(BackendKind::Local),
            "webdav" => Ok(BackendKind::WebDav),
            "nexus2" => Ok(BackendKind::Nexus2),
            "nexus3" => Ok(BackendKind::Nexus3),
            other => Err(RegistryError::Configuration(format!(
                "unknown remote_type `{other}` (expected local, webdav, nexus2 or nexus3)"
            ))),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct RemoteSpec {
    pub remote_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendConfig {
    Local {
        path: Utf8PathBuf,
    },
    WebDav {
        url: String,
        root: String,
        credentials: Option<Credentials>,
    },
    Nexus2 {
        host: String,
        repository: String,
        credentials: Option<Credentials>,
    },
    Nexus3 {
        host: String,
        repository: String,
        credentials: Option<Credentials>,
    },
}

impl BackendConfig {
    pub fn kind(&self) -> BackendKind {
        match self {
            BackendConfig::Local { .. } => BackendKind::Local,
            BackendConfig::WebDav { .. } => BackendKind::WebDav,
            BackendConfig::Nexus2 { .. } => BackendKind::Nexus2,
            BackendConfig::Nexus3 { .. } => BackendKind::Nexus3,
        }
    }
}

impl RemoteSpec {
    pub fn local(path: impl Into<String>) -> Self {
        Self {
            remote_type: BackendKind::Local.as_str().to_string(),
            path: Some(path.into()),
            ..Self::default()
        }
    }

    pub fn webdav(url: impl Into<String>, root: impl Into<String>) -> Self {
        Self {
            remote_type: BackendKind::WebDav.as_str().to_string(),
            url: Some(url.into()),
            root: Some(root.into()),
            ..Self::default()
        }
    }

    pub fn nexus(
        kind: BackendKind,
        host: impl Into<String>,
        repository: impl Into<String>,
    ) -> Self {
        Self {
            remote_type: kind.as_str().to_string(),
            host: Some(host.into()),
            repository: Some(repository.into()),
            ..Self::default()
        }
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: Option<String>) -> Self {
        self.username = Some(username.into());
        self.password = password;
        self
    }

    pub fn resolve(&self) -> Result<BackendConfig, RegistryError> {
        let kind: BackendKind = self.remote_type.parse()?;
        match kind {
            BackendKind::Local => {
                let path = required(&self.path, kind, "path")?;
                Ok(BackendConfig::Local {
                    path: Utf8PathBuf::from(path),
                })
            }
            BackendKind::WebDav => {
                let url = required(&self.url, kind, "url")?;
                check_http_url(url)?;
                let root = self.root.as_deref().unwrap_or("").trim_matches('/');
                Ok(BackendConfig::WebDav {
                    url: url.trim_end_matches('/').to_string(),
                    root: root.to_string(),
                    credentials: self.credentials()?,
                })
            }
            BackendKind::Nexus2 | BackendKind::Nexus3 => {
                let host = required(&self.host, kind, "host")?;
                check_http_url(host)?;
                let repository = required(&self.repository, kind, "repository")?;
                if repository.contains('/') {
                    return Err(RegistryError::Configuration(format!(
                        "repository must be a single name, got `{repository}`"
                    )));
                }
                let host = host.trim_end_matches('/').to_string();
                let repository = repository.to_string();
                let credentials = self.credentials()?;
                Ok(if kind == BackendKind::Nexus2 {
                    BackendConfig::Nexus2 {
                        host,
                        repository,
                        credentials,
                    }
                } else {
                    BackendConfig::Nexus3 {
                        host,
                        repository,
                        credentials,
                    }
                })
            }
        }
    }

    fn credentials(&self) -> Result<Option<Credentials>, RegistryError> {
        match (&self.username, &self.password) {
            (Some(username), password) if !username.trim().is_empty() => Ok(Some(Credentials {
                username: username.trim().to_string(),
                password: password.clone(),
            })),
            (_, Some(_)) => Err(RegistryError::Configuration(
                "password given without username".to_string(),
            )),
            _ => Ok(None),
        }
    }
}

fn required<'a>(
    field: &'a Option<String>,
    kind: BackendKind,
    name: &str,
) -> Result<&'a str, RegistryError> {
    field
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| {
            RegistryError::Configuration(format!("{kind} remote requires field `{name}`"))
        })
}

fn check_http_url(value: &str) -> Result<(), RegistryError> {
    let url = reqwest::Url::parse(value)
        .map_err(|err| RegistryError::Configuration(format!("invalid url `{value}`: {err}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(RegistryError::Configuration(format!(
            "unsupported url scheme `{}` in {value}",
            url.scheme()
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub remotes: IndexMap<String, RemoteSpec>,
    #[serde(default)]
    pub default: Vec<String>,
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn default_path() -> Result<Utf8PathBuf, RegistryError> {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            if !path.trim().is_empty() {
                return Ok(Utf8PathBuf::from(path.trim()));
            }
        }
        let dirs = project_dirs()?;
        Utf8PathBuf::from_path_buf(dirs.config_dir().join(CONFIG_FILE_NAME))
            .map_err(|_| RegistryError::Filesystem("non-utf8 config directory".to_string()))
    }

    pub fn default_cache_root() -> Result<Utf8PathBuf, RegistryError> {
        if let Ok(path) = std::env::var(CACHE_ENV) {
            if !path.trim().is_empty() {
                return Ok(Utf8PathBuf::from(path.trim()));
            }
        }
        let dirs = project_dirs()?;
        Utf8PathBuf::from_path_buf(dirs.cache_dir().to_path_buf())
            .map_err(|_| RegistryError::Filesystem("non-utf8 cache directory".to_string()))
    }

    pub fn load(path: &Utf8Path) -> Result<ConfigFile, RegistryError> {
        if !path.as_std_path().exists() {
            return Ok(ConfigFile::default());
        }
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|err| RegistryError::ConfigRead(format!("{path}: {err}")))?;
        serde_json::from_str(&content).map_err(|err| RegistryError::ConfigParse(err.to_string()))
    }

    pub fn save(path: &Utf8Path, config: &ConfigFile) -> Result<(), RegistryError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent.as_std_path())
                .map_err(|err| RegistryError::Filesystem(err.to_string()))?;
        }
        let tmp_path = path.with_extension("json.tmp");
        let content = serde_json::to_vec_pretty(config)
            .map_err(|err| RegistryError::Filesystem(err.to_string()))?;
        fs::write(tmp_path.as_std_path(), &content)
            .map_err(|err| RegistryError::Filesystem(err.to_string()))?;
        fs::rename(tmp_path.as_std_path(), path.as_std_path())
            .map_err(|err| RegistryError::Filesystem(err.to_string()))?;
        Ok(())
    }
}

fn project_dirs() -> Result<ProjectDirs, RegistryError> {
    ProjectDirs::from("", "", "binreg").ok_or_else(|| {
        RegistryError::Filesystem("unable to resolve home directory".to_string())
    })
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn unknown_remote_type() {
        let spec = RemoteSpec {
            remote_type: "ftp".to_string(),
            ..RemoteSpec::default()
        };
        assert_matches!(spec.resolve(), Err(RegistryError::Configuration(_)));
    }

    #[test]
    fn nexus_requires_repository() {
        let mut spec = RemoteSpec::nexus(BackendKind::Nexus3, "https://nexus.example", "raw");
        spec.repository = None;
        assert_matches!(spec.resolve(), Err(RegistryError::Configuration(_)));
    }

    #[test]
    fn webdav_root_is_normalized() {
        let spec = RemoteSpec::webdav("https://dav.example/", "/packages/");
        let resolved = spec.resolve().unwrap();
        assert_eq!(
            resolved,
            BackendConfig::WebDav {
                url: "https://dav.example".to_string(),
                root: "packages".to_string(),
                credentials: None,
            }
        );
    }
}
