#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

use camino::{Utf8Path, Utf8PathBuf};
use serde_json::json;

use binreg::backend::http::{decode_segment, encode_segment};
use binreg::backend::{
    Backend, HttpRequest, HttpResponse, Nexus2Backend, Nexus3Backend, Transport, WebDavBackend,
};
use binreg::cache::Cache;
use binreg::config::{BackendKind, RemoteSpec};
use binreg::domain::{Param, PartialAssignment, Registry};
use binreg::error::RegistryError;
use binreg::remote::Remote;

pub const DAV_URL: &str = "http://dav.test/dav";
pub const NEXUS2_HOST: &str = "http://nexus2.test";
pub const NEXUS2_REPO: &str = "releases";
pub const NEXUS3_HOST: &str = "http://nexus3.test";
pub const NEXUS3_REPO: &str = "raw-bin";

/// Request counter plus an outage switch, shared by every fake server.
#[derive(Clone, Default)]
pub struct Wire {
    calls: Arc<Mutex<usize>>,
    down: Arc<Mutex<bool>>,
}

impl Wire {
    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }

    pub fn set_down(&self, down: bool) {
        *self.down.lock().unwrap() = down;
    }

    fn enter(&self, label: &str) -> Result<(), RegistryError> {
        *self.calls.lock().unwrap() += 1;
        if *self.down.lock().unwrap() {
            return Err(RegistryError::connection(label, "connection refused"));
        }
        Ok(())
    }
}

fn url_path(url: &str) -> (Vec<String>, reqwest::Url) {
    let parsed = reqwest::Url::parse(url).unwrap();
    let segments = parsed
        .path()
        .split('/')
        .filter(|segment| !segment.is_empty())
        .map(decode_segment)
        .collect();
    (segments, parsed)
}

fn parent_of(path: &str) -> &str {
    path.rsplit_once('/').map(|(parent, _)| parent).unwrap_or("")
}

fn href(path: &str, collection: bool) -> String {
    let mut href = String::from("/");
    href.push_str(
        &path
            .split('/')
            .filter(|segment| !segment.is_empty())
            .map(encode_segment)
            .collect::<Vec<_>>()
            .join("/"),
    );
    if collection && !path.is_empty() {
        href.push('/');
    }
    href
}

#[derive(Default)]
struct DavState {
    collections: BTreeSet<String>,
    files: BTreeMap<String, Vec<u8>>,
}

/// In-memory WebDAV server keyed by decoded URL path.
#[derive(Clone, Default)]
pub struct FakeWebDav {
    pub wire: Wire,
    state: Arc<Mutex<DavState>>,
    broken_puts: Arc<Mutex<Option<String>>>,
}

impl FakeWebDav {
    /// Server whose collections up to `dav/<root>` already exist.
    pub fn new(root: &str) -> Self {
        let server = Self::default();
        {
            let mut state = server.state.lock().unwrap();
            let mut path = String::new();
            state.collections.insert(String::new());
            for segment in ["dav"].into_iter().chain(root.split('/')) {
                if segment.is_empty() {
                    continue;
                }
                if !path.is_empty() {
                    path.push('/');
                }
                path.push_str(segment);
                state.collections.insert(path.clone());
            }
        }
        server
    }

    pub fn backend(&self, root: &str) -> WebDavBackend {
        WebDavBackend::new(Arc::new(self.clone()), DAV_URL, root)
    }

    pub fn has_collection(&self, path: &str) -> bool {
        self.state.lock().unwrap().collections.contains(path)
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.state.lock().unwrap().files.get(path).cloned()
    }

    /// Every later PUT whose path contains `fragment` gets a 500.
    pub fn fail_puts_under(&self, fragment: &str) {
        *self.broken_puts.lock().unwrap() = Some(fragment.to_string());
    }

    fn put_is_broken(&self, path: &str) -> bool {
        self.broken_puts
            .lock()
            .unwrap()
            .as_deref()
            .is_some_and(|fragment| path.contains(fragment))
    }

    fn propfind(state: &DavState, path: &str) -> HttpResponse {
        if !state.collections.contains(path) {
            return HttpResponse::new(404, "");
        }
        let mut body = String::from(
            r#"<?xml version="1.0" encoding="utf-8"?><D:multistatus xmlns:D="DAV:">"#,
        );
        let collection = |href: String| {
            format!(
                "<D:response><D:href>{href}</D:href><D:propstat><D:prop><D:resourcetype><D:collection/></D:resourcetype></D:prop><D:status>HTTP/1.1 200 OK</D:status></D:propstat></D:response>"
            )
        };
        body.push_str(&collection(href(path, true)));
        for child in state
            .collections
            .iter()
            .filter(|child| !child.is_empty() && parent_of(child) == path)
        {
            body.push_str(&collection(href(child, true)));
        }
        for child in state.files.keys().filter(|child| parent_of(child) == path) {
            body.push_str(&format!(
                "<D:response><D:href>{}</D:href><D:propstat><D:prop><D:resourcetype/></D:prop><D:status>HTTP/1.1 200 OK</D:status></D:propstat></D:response>",
                href(child, false)
            ));
        }
        body.push_str("</D:multistatus>");
        HttpResponse::new(207, body)
    }
}

impl Transport for FakeWebDav {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, RegistryError> {
        self.wire.enter("dav")?;
        let (segments, _) = url_path(&request.url);
XX => Self::propfind(&state, &path),
            "MKCOL" => {
                if state.collections.contains(&path) || state.files.contains_key(&path) {
                    HttpResponse::new(405, "")
                } else if !state.collections.contains(parent_of(&path)) {
                    HttpResponse::new(409, "")
                } else {
                    state.collections.insert(path);
                    HttpResponse::new(201, "")
                }
            }
            "PUT" => {
                if self.put_is_broken(&path) {
                    HttpResponse::new(500, "disk full")
                } else if !state.collections.contains(parent_of(&path)) {
                    HttpResponse::new(409, "")
                } else {
                    state
                        .files
                        .insert(path, request.body.clone().unwrap_or_default());
                    HttpResponse::new(201, "")
                }
            }
            "GET" => match state.files.get(&path) {
                Some(content) => HttpResponse::new(200, content.clone()),
                None => HttpResponse::new(404, ""),
            },
            "DELETE" => {
                if state.collections.contains(&path) {
                    let prefix = format!("{path}/");
                    state
                        .collections
                        .retain(|item| item != &path && !item.starts_with(&prefix));
                    state.files.retain(|item, _| !item.starts_with(&prefix));
                    HttpResponse::new(204, "")
                } else if state.files.remove(&path).is_some() {
                    HttpResponse::new(204, "")
                } else {
                    HttpResponse::new(404, "")
                }
            }
            _ => HttpResponse::new(405, ""),
        };
        Ok(response)
    }
}

/// In-memory Nexus 2 site repository serving HTML directory pages.
#[derive(Clone, Default)]
pub struct FakeNexus2 {
    pub wire: Wire,
    files: Arc<Mutex<BTreeMap<String, Vec<u8>>>>,
}

impl FakeNexus2 {
    pub fn backend(&self) -> Nexus2Backend {
        Nexus2Backend::new(Arc::new(self.clone()), NEXUS2_HOST, NEXUS2_REPO)
    }

    pub fn paths(&self) -> Vec<String> {
        self.files.lock().unwrap().keys().cloned().collect()
    }

    fn listing(files: &BTreeMap<String, Vec<u8>>, path: &str) -> Option<String> {
        let prefix = if path.is_empty() {
            String::new()
        } else {
            format!("{path}/")
        };
        let children: BTreeSet<String> = files
            .keys()
            .filter_map(|key| key.strip_prefix(&prefix))
            .map(|rest| match rest.split_once('/') {
                Some((dir, _)) => format!("{dir}/"),
                None => rest.to_string(),
            })
            .collect();
        if children.is_empty() && !path.is_empty() {
            return None;
        }
        let base = format!("{NEXUS2_HOST}/content/sites/{NEXUS2_REPO}/{prefix}");
        let mut html = format!(
            "<html><head><title>Index of /{prefix}</title></head><body><table>\n<tr><td><a href=\"{base}../\">Parent Directory</a></td></tr>\n"
        );
        for child in children {
            html.push_str(&format!(
                "<tr><td><a href=\"{base}{child}\">{child}</a></td><td>2024-01-01</td></tr>\n"
            ));
        }
        html.push_str("</table></body></html>");
        Some(html)
    }
}

impl Transport for FakeNexus2 {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, RegistryError> {
        self.wire.enter("nexus2")?;
        let (segments, parsed) = url_path(&request.url);
        let is_dir = parsed.path().ends_with('/');
        let Some(rest) = segments.strip_prefix(&[
            "content".to_string(),
            "sites".to_string(),
            NEXUS2_REPO.to_string(),
        ]) else {
            return Ok(HttpResponse::new(404, ""));
        };
        let path = rest.join("/");
        let mut files = self.files.lock().unwrap();
        let response = match (request.method.as_str(), is_dir) {
            ("GET", true) => match Self::listing(&files, &path) {
                Some(html) => HttpResponse::new(200, html),
                None => HttpResponse::new(404, ""),
            },
            ("GET", false) => match files.get(&path) {
                Some(content) => HttpResponse::new(200, content.clone()),
                None => HttpResponse::new(404, ""),
            },
            ("PUT", false) => {
                files.insert(path, request.body.clone().unwrap_or_default());
                HttpResponse::new(201, "")
            }
            ("DELETE", true) => {
                let prefix = format!("{path}/");
                let before = files.len();
                files.retain(|key, _| !key.starts_with(&prefix));
                if files.len() == before {
                    HttpResponse::new(404, "")
                } else {
                    HttpResponse::new(204, "")
                }
            }
            ("DELETE", false) => match files.remove(&path) {
                Some(_) => HttpResponse::new(204, ""),
                None => HttpResponse::new(404, ""),
            },
            _ => HttpResponse::new(405, ""),
        };
        Ok(response)
    }
}

#[derive(Default)]
struct Nexus3State {
    next_id: usize,
    assets: BTreeMap<String, (String, Vec<u8>)>,
}

/// In-memory Nexus 3 raw repository with the search and assets REST API.
/// Search results come back two per page.
#[derive(Clone, Default)]
pub struct FakeNexus3 {
    pub wire: Wire,
    state: Arc<Mutex<Nexus3State>>,
}

impl FakeNexus3 {
    const PAGE_SIZE: usize = 2;

    pub fn backend(&self) -> Nexus3Backend {
        Nexus3Backend::new(Arc::new(self.clone()), NEXUS3_HOST, NEXUS3_REPO)
    }

    pub fn paths(&self) -> Vec<String> {
        self.state.lock().unwrap().assets.keys().cloned().collect()
    }

    fn search(state: &Nexus3State, parsed: &reqwest::Url) -> HttpResponse {
        let query: BTreeMap<String, String> = parsed.query_pairs().into_owned().collect();
        if query.get("repository").map(String::as_str) != Some(NEXUS3_REPO) {
            return HttpResponse::new(200, json!({ "items": [] }).to_string());
        }
        let prefix = query
            .get("name")
            .map(|name| name.trim_end_matches('*').to_string())
            .unwrap_or_default();
        let offset: usize = query
            .get("continuationToken")
            .and_then(|token| token.parse().ok())
            .unwrap_or(0);
        let matching: Vec<_> = state
            .assets
            .iter()
            .filter(|(path, _)| path.starts_with(&prefix))
            .collect();
        let items: Vec<_> = matching
            .iter()
            .skip(offset)
            .take(Self::PAGE_SIZE)
            .map(|(path, (id, _))| {
                json!({
                    "id": id,
                    "path": format!("/{path}"),
                    "repository": NEXUS3_REPO,
                    "downloadUrl": format!("{NEXUS3_HOST}/repository/{NEXUS3_REPO}/{path}"),
                })
            })
            .collect();
        let next = offset + Self::PAGE_SIZE;
        let token = (next < matching.len()).then(|| next.to_string());
        HttpResponse::new(
            200,
            json!({ "items": items, "continuationToken": token }).to_string(),
        )
    }
}

impl Transport for FakeNexus3 {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, RegistryError> {
        self.wire.enter("nexus3")?;
        let (segments, parsed) = url_path(&request.url);
        let segments: Vec<&str> = segments.iter().map(String::as_str).collect();
        let mut state = self.state.lock().unwrap();
        let response = match (request.method.as_str(), segments.as_slice()) {
            ("GET", ["service", "rest", "v1", "search", "assets"]) => {
                Self::search(&state, &parsed)
            }
            ("DELETE", ["service", "rest", "v1", "assets", id]) => {
                let found = state
                    .assets
                    .iter()
                    .find(|(_, (asset_id, _))| asset_id == id)
                    .map(|(path, _)| path.clone());
                match found {
                    Some(path) => {
                        state.assets.remove(&path);
                        HttpResponse::new(204, "")
                    }
                    None => HttpResponse::new(404, ""),
                }
            }
            ("PUT", ["repository", repo, rest @ ..]) if *repo == NEXUS3_REPO => {
                state.next_id += 1;
                let id = format!("asset-{}", state.next_id);
                state
                    .assets
                    .insert(rest.join("/"), (id, request.body.clone().unwrap_or_default()));
                HttpResponse::new(201, "")
            }
            ("GET", ["repository", repo, rest @ ..]) if *repo == NEXUS3_REPO => {
                match state.assets.get(&rest.join("/")) {
                    Some((_, content)) => HttpResponse::new(200, content.clone()),
                    None => HttpResponse::new(404, ""),
                }
            }
            _ => HttpResponse::new(404, ""),
        };
        Ok(response)
    }
}

pub fn webdav_remote(name: &str, server: &FakeWebDav, root: &str, cache: &Cache) -> Remote {
    Remote::with_backend(
        name,
        RemoteSpec::webdav(DAV_URL, root),
        Backend::WebDav(server.backend(root)),
        cache.clone(),
    )
}

pub fn nexus2_remote(name: &str, server: &FakeNexus2, cache: &Cache) -> Remote {
    Remote::with_backend(
        name,
        RemoteSpec::nexus(BackendKind::Nexus2, NEXUS2_HOST, NEXUS2_REPO),
        Backend::Nexus2(server.backend()),
        cache.clone(),
    )
}

pub fn nexus3_remote(name: &str, server: &FakeNexus3, cache: &Cache) -> Remote {
    Remote::with_backend(
        name,
        RemoteSpec::nexus(BackendKind::Nexus3, NEXUS3_HOST, NEXUS3_REPO),
        Backend::Nexus3(server.backend()),
        cache.clone(),
    )
}

pub fn utf8(path: &Path) -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(path.to_path_buf()).unwrap()
}

/// Registry from the compiler package scenario: `[os=linux, arch=x64]`.
pub fn compiler_pkg() -> Registry {
    Registry::new(
        "compiler-pkg",
        vec![
            Param::new("os", Some("linux")),
            Param::new("arch", Some("x64")),
        ],
    )
    .unwrap()
}

pub fn partial(pairs: &[(&str, &str)]) -> PartialAssignment {
    pairs
        .iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}

/// A small binary tree with a nested directory and an empty one.
pub fn write_sample_tree(root: &Utf8Path, flavour: &str) {
    fs::create_dir_all(root.join("lib").as_std_path()).unwrap();
    fs::create_dir_all(root.join("share/doc").as_std_path()).unwrap();
    fs::create_dir_all(root.join("empty").as_std_path()).unwrap();
    fs::write(root.join("cc").as_std_path(), format!("#!compiler {flavour}")).unwrap();
    fs::write(root.join("lib/libcc.so").as_std_path(), [0u8, 1, 2, 3, 255]).unwrap();
    fs::write(
        root.join("share/doc/README").as_std_path(),
        format!("compiler build {flavour}\n"),
    )
    .unwrap();
}

/// Every file and directory below `root`, keyed by relative path.
/// Directories map to `None`.
pub fn read_tree(root: &Utf8Path) -> BTreeMap<String, Option<Vec<u8>>> {
    fn walk(root: &Path, dir: &Path, out: &mut BTreeMap<String, Option<Vec<u8>>>) {
        for entry in fs::read_dir(dir).unwrap() {
            let path = entry.unwrap().path();
            let relative = path
                .strip_prefix(root)
                .unwrap()
                .to_string_lossy()
                .replace('\\', "/");
            if path.is_dir() {
                out.insert(relative, None);
                walk(root, &path, out);
            } else {
                out.insert(relative, Some(fs::read(&path).unwrap()));
            }
        }
    }
    let mut out = BTreeMap::new();
    walk(root.as_std_path(), root.as_std_path(), &mut out);
    out
}
