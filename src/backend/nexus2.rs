use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::sync::{Arc, OnceLock};

use camino::Utf8Path;
use regex::Regex;

use crate::backend::http::{HttpRequest, HttpResponse, Transport, check_status, join_url};
use crate::backend::{DIR_MARKER, Entry, FileBackend};
use crate::error::RegistryError;
use crate::fs_util;

#[derive(Clone)]
pub struct Nexus2Backend {
    transport: Arc<dyn Transport>,
    base: String,
    path: Vec<String>,
}

impl fmt::Debug for Nexus2Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Nexus2Backend")
            .field("location", &self.location())
            .finish()
    }
}

impl Nexus2Backend {
    pub fn new(transport: Arc<dyn Transport>, host: &str, repository: &str) -> Self {
        Self {
            transport,
            base: format!(
                "{}/content/sites/{}",
                host.trim_end_matches('/'),
                repository
            ),
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

    fn put(&self, path: &[String], content: Vec<u8>) -> Result<(), RegistryError> {
        let url = join_url(&self.base, path);
        let response = self.send(HttpRequest::put(&url, content))?;
        check_status(&self.location(), &url, response).map(|_| ())
    }

    fn delete(&self, url: &str) -> Result<(), RegistryError> {
        let response = self.send(HttpRequest::delete(url))?;
        match check_status(&self.location(), url, response) {
            Ok(_) => Ok(()),
            Err(err) if err.is_not_found() => Ok(()),
            Err(err) => Err(err),
        }
    }

    fn put_marker(&self, dir: &[String]) -> Result<(), RegistryError> {
        let mut path = dir.to_vec();
        path.push(DIR_MARKER.to_string());
        self.put(&path, Vec::new())
    }

    fn clear(&self) -> Result<(), RegistryError> {
        for entry in self.ls()? {
            if entry.is_dir() {
                self.rmdir(&entry.name)?;
            } else {
                self.delete(&join_url(&self.base, &self.child_path(&entry.name)))?;
            }
        }
        Ok(())
    }
}

impl FileBackend for Nexus2Backend {
    fn ls(&self) -> Result<BTreeSet<Entry>, RegistryError> {
        let url = format!("{}/", join_url(&self.base, &self.path));
        let response = check_status(&self.location(), &url, self.send(HttpRequest::get(&url))?)?;
        Ok(parse_listing(&response.text()))
    }

    fn mkdir(&self, name: &str) -> Result<(), RegistryError> {
        self.put_marker(&self.child_path(name))
    }

    fn rmdir(&self, name: &str) -> Result<(), RegistryError> {
        let child = self.scoped(name);
        child.clear()?;
        let mut marker = child.path.clone();
        marker.push(DIR_MARKER.to_string());
        self.delete(&join_url(&self.base, &marker))?;
        self.delete(&format!("{}/", join_url(&self.base, &child.path)))
    }

    fn scoped(&self, name: &str) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            base: self.base.clone(),
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
                continue;
            }
            let url = join_url(&self.base, &self.child_path(&entry.name));
            let response =
                check_status(&self.location(), &url, self.send(HttpRequest::get(&url))?)?;
            fs::write(target.as_std_path(), response.body)
                .map_err(|err| RegistryError::Filesystem(err.to_string()))?;
        }
        Ok(())
    }

    fn upload_dir(&self, local: &Utf8Path) -> Result<(), RegistryError> {
        let tree = fs_util::local_tree(local)?;
        match self.clear() {
            Ok(()) => {}
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(err),
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
        let url = join_url(&self.base, &self.child_path(name));
        let response = check_status(&self.location(), &url, self.send(HttpRequest::get(&url))?)?;
        Ok(response.body)
    }

    fn write_file(&self, name: &str, content: &[u8]) -> Result<(), RegistryError> {
        self.put(&self.child_path(name), content.to_vec())
    }

    fn location(&self) -> String {
        join_url(&self.base, &self.path)
    }
}

fn link_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?is)<a\s[^>]*href\s*=\s*"[^"]*"[^>]*>\s*([^<]*?)\s*</a>"#).unwrap())
}

// The link text carries the stored name verbatim; only the href is
// percent-encoded.
pub fn parse_listing(html: &str) -> BTreeSet<Entry> {
    let mut entries = BTreeSet::new();
    for captures in link_re().captures_iter(html) {
        let text = unescape_html(&captures[1]);
        if text.is_empty() || text.starts_with("..") || text.eq_ignore_ascii_case("Parent Directory")
        {
            continue;
        }
        let (name, is_dir) = match text.strip_suffix('/') {
            Some(name) => (name, true),
            None => (text.as_str(), false),
        };
        if name.is_empty() || name.contains('/') || name == DIR_MARKER {
            continue;
        }
        if is_dir {
            entries.insert(Entry::dir(name.to_string()));
        } else {
            entries.insert(Entry::file(name.to_string()));
        }
    }
    entries
}

fn unescape_html(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_directory_page() {
        let html = r#"<html><body><table>
<tr><td><a href="https://nexus.example/content/sites/pkgs/">Parent Directory</a></td></tr>
<tr><td><a href="https://nexus.example/content/sites/pkgs/compiler-pkg/os=linux/">os=linux/</a></td></tr>
<tr><td><a href="https://nexus.example/content/sites/pkgs/compiler-pkg/.registry.json">.registry.json</a></td></tr>
<tr><td><a href="https://nexus.example/content/sites/pkgs/compiler-pkg/.binreg-dir">.binreg-dir</a></td></tr>
</table></body></html>"#;
        let entries = parse_listing(html);
        assert_eq!(entries.len(), 2);
        assert!(entries.contains(&Entry::dir("os=linux")));
        assert!(entries.contains(&Entry::file(".registry.json")));
    }

    #[test]
    fn percent_in_link_text_is_kept() {
        let html = r#"<a href="https://nexus.example/content/sites/pkgs/compiler-pkg/os=a%2520b/">os=a%20b/</a>
<a href="https://nexus.example/content/sites/pkgs/compiler-pkg/a%26b.txt">a&amp;b.txt</a>"#;
        let entries = parse_listing(html);
        assert!(entries.contains(&Entry::dir("os=a%20b")));
        assert!(entries.contains(&Entry::file("a&b.txt")));
        assert!(!entries.contains(&Entry::dir("os=a b")));
    }
}
