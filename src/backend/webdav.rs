use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::sync::{Arc, OnceLock};

use camino::Utf8Path;
use regex::Regex;
use reqwest::Method;

use crate::backend::http::{
    HttpRequest, HttpResponse, Transport, check_status, decode_segment, join_url, split_path,
};
use crate::backend::{Entry, FileBackend};
use crate::error::RegistryError;
use crate::fs_util;

const PROPFIND_BODY: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<D:propfind xmlns:D="DAV:"><D:prop><D:resourcetype/></D:prop></D:propfind>"#;

#[derive(Clone)]
pub struct WebDavBackend {
    transport: Arc<dyn Transport>,
    url: String,
    path: Vec<String>,
}

impl fmt::Debug for WebDavBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebDavBackend")
            .field("location", &self.location())
            .finish()
    }
}

impl WebDavBackend {
    pub fn new(transport: Arc<dyn Transport>, url: &str, root: &str) -> Self {
        Self {
            transport,
            url: url.trim_end_matches('/').to_string(),
            path: split_path(root),
        }
    }

    fn child_path(&self, name: &str) -> Vec<String> {
        let mut path = self.path.clone();
        path.push(name.to_string());
        path
    }

    fn collection_url(path: &[String], base: &str) -> String {
        format!("{}/", join_url(base, path))
    }

    fn send(&self, request: HttpRequest) -> Result<HttpResponse, RegistryError> {
        self.transport.send(&request)
    }

    fn propfind(&self) -> Result<String, RegistryError> {
        let url = Self::collection_url(&self.path, &self.url);
        let request = HttpRequest::new(propfind_method(), &url)
            .header("Depth", "1")
            .header("Content-Type", "application/xml; charset=utf-8")
            .body(PROPFIND_BODY.as_bytes().to_vec());
        let response = check_status(&self.location(), &url, self.send(request)?)?;
        Ok(response.text())
    }

    fn mkcol(&self, path: &[String]) -> Result<(), RegistryError> {
        let url = Self::collection_url(path, &self.url);
        let response = self.send(HttpRequest::new(mkcol_method(), &url))?;
        match response.status {
            // 405: the collection already exists
            405 => Ok(()),
            409 => Err(RegistryError::NotFound(format!("parent of {url}"))),
            _ => check_status(&self.location(), &url, response).map(|_| ()),
        }
    }

    fn delete_collection(&self, path: &[String]) -> Result<(), RegistryError> {
        let url = Self::collection_url(path, &self.url);
        let response = self.send(HttpRequest::delete(&url))?;
        check_status(&self.location(), &url, response).map(|_| ())
    }

    fn put_file(&self, path: &[String], content: Vec<u8>) -> Result<(), RegistryError> {
        let url = join_url(&self.url, path);
        let response = self.send(HttpRequest::put(&url, content))?;
        check_status(&self.location(), &url, response).map(|_| ())
    }

    fn get_file(&self, path: &[String]) -> Result<Vec<u8>, RegistryError> {
        let url = join_url(&self.url, path);
        let response = check_status(&self.location(), &url, self.send(HttpRequest::get(&url))?)?;
        Ok(response.body)
    }

    fn own_href_path(&self) -> String {
        let url = Self::collection_url(&self.path, &self.url);
        href_path(&url)
    }
}

impl FileBackend for WebDavBackend {
    fn ls(&self) -> Result<BTreeSet<Entry>, RegistryError> {
        let body = self.propfind()?;
        Ok(parse_multistatus(&body, &self.own_href_path()))
    }

    fn mkdir(&self, name: &str) -> Result<(), RegistryError> {
        self.mkcol(&self.child_path(name))
    }

    fn rmdir(&self, name: &str) -> Result<(), RegistryError> {
        self.delete_collection(&self.child_path(name))
    }

    fn scoped(&self, name: &str) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            url: self.url.clone(),
            path: self.child_path(name),
        }
    }

    fn download_dir(&self, local: &Utf8Path) -> Result<(), RegistryError> {
        let listing = self.ls()?;
        fs::create_dir_all(local.as_std_path())
            .map_err(|err| RegistryError::Filesystem(err.to_string()))?;
        for entry in listing {
            let target = local.join(&entry.name);
            if entry.is_dir() {
                self.scoped(&entry.name).download_dir(&target)?;
            } else {
                let content = self.get_file(&self.child_path(&entry.name))?;
                fs::write(target.as_std_path(), content)
                    .map_err(|err| RegistryError::Filesystem(err.to_string()))?;
            }
        }
        Ok(())
    }

    fn upload_dir(&self, local: &Utf8Path) -> Result<(), RegistryError> {
        let tree = fs_util::local_tree(local)?;
        match self.delete_collection(&self.path) {
            Ok(()) => {}
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(err),
        }
        self.mkcol(&self.path)?;
        for entry in tree {
            let mut path = self.path.clone();
            path.extend(entry.segments.iter().cloned());
            if entry.is_dir {
                self.mkcol(&path)?;
            } else {
                let content = fs::read(entry.path.as_std_path())
                    .map_err(|err| RegistryError::Filesystem(err.to_string()))?;
                self.put_file(&path, content)?;
            }
        }
        Ok(())
    }

    fn read_file(&self, name: &str) -> Result<Vec<u8>, RegistryError> {
        self.get_file(&self.child_path(name))
    }

    fn write_file(&self, name: &str, content: &[u8]) -> Result<(), RegistryError> {
        self.put_file(&self.child_path(name), content.to_vec())
    }

    fn location(&self) -> String {
        join_url(&self.url, &self.path)
    }
}

fn propfind_method() -> Method {
    Method::from_bytes(b"PROPFIND").unwrap()
}

fn mkcol_method() -> Method {
    Method::from_bytes(b"MKCOL").unwrap()
}

fn href_path(href: &str) -> String {
    let path = match reqwest::Url::parse(href) {
        Ok(url) => url.path().to_string(),
        Err(_) => href.to_string(),
    };
    split_path(&path)
        .iter()
        .map(|segment| decode_segment(segment))
        .collect::<Vec<_>>()
        .join("/")
}

fn response_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)<(?:[a-z0-9_]+:)?response\b.*?</(?:[a-z0-9_]+:)?response\s*>").unwrap()
    })
}

fn href_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)<(?:[a-z0-9_]+:)?href\s*>\s*([^<]*?)\s*</(?:[a-z0-9_]+:)?href\s*>")
            .unwrap()
    })
}

fn collection_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)<(?:[a-z0-9_]+:)?collection\s*/?>").unwrap())
}

pub fn parse_multistatus(body: &str, own_path: &str) -> BTreeSet<Entry> {
    let mut entries = BTreeSet::new();
    for block in response_re().find_iter(body) {
        let block = block.as_str();
        let Some(href) = href_re()
            .captures(block)
            .and_then(|captures| captures.get(1))
            .map(|value| value.as_str().replace("&amp;", "&"))
        else {
            continue;
        };
        let path = href_path(&href);
        if path == own_path {
            continue;
        }
        let Some(name) = path.rsplit('/').next().filter(|name| !name.is_empty()) else {
            continue;
        };
        if collection_re().is_match(block) {
            entries.insert(Entry::dir(name));
        } else {
            entries.insert(Entry::file(name));
        }
    }
    entries
}
