use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::sync::Arc;

use camino::Utf8Path;
use serde::Deserialize;

use crate::backend::http::{
    HttpRequest, HttpResponse, Transport, check_status, encode_segment, join_url, split_path,
};
use crate::backend::{DIR_MARKER, Entry, FileBackend};
use crate::error::RegistryError;
use crate::fs_util;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Asset {
    pub id: String,
    pub path: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AssetPage {
    #[serde(default)]
    items: Vec<Asset>,
    #[serde(default)]
    continuation_token: Option<String>,
}

#[derive(Clone)]
pub struct Nexus3Backend {
    transport: Arc<dyn Transport>,
    host: String,
    repository: String,
    path: Vec<String>,
}

impl fmt::Debug for Nexus3Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Nexus3Backend")
            .field("location", &self.location())
            .finish()
    }
}

impl Nexus3Backend {
    pub fn new(transport: Arc<dyn Transport>, host: &str, repository: &str) -> Self {
        Self {
            transport,
            host: host.trim_end_matches('/').to_string(),
            repository: repository.to_string(),
            path: Vec::new(),
        }
    }

    fn child_path(&self, name: &str) -> Vec<String> {
        let mut path = self.path.clone();
        path.push(name.to_string());
        path
    }

    fn send(&self, request: HttpRequest) -> Result<HttpResponse, RegistryError> {
        self.transport.send(&request)
    }

    fn content_url(&self, path: &[String]) -> String {
        join_url(
            &format!("{}/repository/{}", self.host, self.repository),
            path,
        )
    }

    fn search_url(&self, prefix: &[String], token: Option<&str>) -> String {
        let mut url = format!(
            "{}/service/rest/v1/search/assets?repository={}",
            self.host,
            encode_segment(&self.repository)
        );
        if !prefix.is_empty() {
            url.push_str("&name=");
            url.push_str(&encode_query(&format!("{}/*", prefix.join("/"))));
        }
        if let Some(token) = token {
            url.push_str("&continuationToken=");
            url.push_str(&encode_query(token));
        }
        url
    }

    fn assets_under(&self, prefix: &[String]) -> Result<Vec<Asset>, RegistryError> {
        let wanted = if prefix.is_empty() {
            String::new()
        } else {
            format!("{}/", prefix.join("/"))
        };
        let mut assets = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let url = self.search_url(prefix, token.as_deref());
            let response =
                check_status(&self.location(), &url, self.send(HttpRequest::get(&url))?)?;
            let page: AssetPage = serde_json::from_slice(&response.body).map_err(|err| {
                RegistryError::connection(
                    self.location(),
                    format!("unexpected search response: {err}"),
                )
            })?;
            assets.extend(page.items.into_iter().filter_map(|mut asset| {
                asset.path = asset.path.trim_start_matches('/').to_string();
                asset.path.starts_with(&wanted).then_some(asset)
            }));
            match page.continuation_token {
                Some(next) if !next.is_empty() => token = Some(next),
                _ => break,
            }
        }
        Ok(assets)
    }

    fn existing_assets(&self, prefix: &[String]) -> Result<Vec<Asset>, RegistryError> {
        let assets = self.assets_under(prefix)?;
        if assets.is_empty() && !prefix.is_empty() {
            return Err(RegistryError::NotFound(self.content_url(prefix)));
        }
        Ok(assets)
    }

    fn delete_asset(&self, asset: &Asset) -> Result<(), RegistryError> {
        let url = format!(
            "{}/service/rest/v1/assets/{}",
            self.host,
            encode_segment(&asset.id)
        );
        let response = self.send(HttpRequest::delete(&url))?;
        match check_status(&self.location(), &url, response) {
            Ok(_) => Ok(()),
            Err(err) if err.is_not_found() => Ok(()),
            Err(err) => Err(err),
        }
    }

    fn put(&self, path: &[String], content: Vec<u8>) -> Result<(), RegistryError> {
        let url = self.content_url(path);
        let response = self.send(HttpRequest::put(&url, content))?;
        check_status(&self.location(), &url, response).map(|_| ())
    }

    fn put_marker(&self, dir: &[String]) -> Result<(), RegistryError> {
        let mut path = dir.to_vec();
        path.push(DIR_MARKER.to_string());
        self.put(&path, Vec::new())
    }

    fn relative_segments(&self, asset: &Asset) -> Vec<String> {
        split_path(&asset.path)
            .into_iter()
            .skip(self.path.len())
            .collect()
    }
}

impl FileBackend for Nexus3Backend {
    fn ls(&self) -> Result<BTreeSet<Entry>, RegistryError> {
        let mut entries = BTreeSet::new();
        for asset in self.existing_assets(&self.path)? {
            let segments = self.relative_segments(&asset);
            match segments.as_slice() {
                [] => {}
                [name] if name == DIR_MARKER => {}
                [name] => {
                    entries.insert(Entry::file(name.clone()));
                }
                [dir, ..] => {
                    entries.insert(Entry::dir(dir.clone()));
                }
            }
        }
        Ok(entries)
    }

    fn mkdir(&self, name: &str) -> Result<(), RegistryError> {
        self.put_marker(&self.child_path(name))
    }

    fn rmdir(&self, name: &str) -> Result<(), RegistryError> {
        for asset in self.existing_assets(&self.child_path(name))? {
            self.delete_asset(&asset)?;
        }
        Ok(())
    }

    fn scoped(&self, name: &str) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            host: self.host.clone(),
            repository: self.repository.clone(),
            path: self.child_path(name),
        }
    }

    fn download_dir(&self, local: &Utf8Path) -> Result<(), RegistryError> {
        let assets = self.existing_assets(&self.path)?;
        fs::create_dir_all(local.as_std_path())
            .map_err(|err| RegistryError::Filesystem(err.to_string()))?;
        for asset in assets {
            let segments = self.relative_segments(&asset);
            let Some((last, parents)) = segments.split_last() else {
                continue;
            };
            let dir = parents
                .iter()
                .fold(local.to_path_buf(), |dir, segment| dir.join(segment));
            fs::create_dir_all(dir.as_std_path())
                .map_err(|err| RegistryError::Filesystem(err.to_string()))?;
            if last == DIR_MARKER {
                continue;
            }
            let url = self.content_url(&split_path(&asset.path));
            let response =
                check_status(&self.location(), &url, self.send(HttpRequest::get(&url))?)?;
            fs::write(dir.join(last).as_std_path(), response.body)
                .map_err(|err| RegistryError::Filesystem(err.to_string()))?;
        }
        Ok(())
    }

    fn upload_dir(&self, local: &Utf8Path) -> Result<(), RegistryError> {
        let tree = fs_util::local_tree(local)?;
        for asset in self.assets_under(&self.path)? {
            self.delete_asset(&asset)?;
        }
        self.put_marker(&self.path)?;
        for entry in tree {
            let mut path = self.path.clone();
            path.extend(entry.segments.iter().cloned());
            if entry.is_dir {
                self.put_marker(&path)?;
            } else {
                let content = fs::read(entry.path.as_std_path())
                    .map_err(|err| RegistryError::Filesystem(err.to_string()))?;
                self.put(&path, content)?;
            }
        }
        Ok(())
    }

    fn read_file(&self, name: &str) -> Result<Vec<u8>, RegistryError> {
        let url = self.content_url(&self.child_path(name));
        let response = check_status(&self.location(), &url, self.send(HttpRequest::get(&url))?)?;
        Ok(response.body)
    }

    fn write_file(&self, name: &str, content: &[u8]) -> Result<(), RegistryError> {
        self.put(&self.child_path(name), content.to_vec())
    }

    fn location(&self) -> String {
        self.content_url(&self.path)
    }
}

fn encode_query(value: &str) -> String {
    percent_encoding::utf8_percent_encode(value, percent_encoding::NON_ALPHANUMERIC).to_string()
}
