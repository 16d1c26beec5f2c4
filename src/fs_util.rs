use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use camino::{Utf8Path, Utf8PathBuf};
use tempfile::Builder;

use crate::error::RegistryError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub segments: Vec<String>,
    pub path: Utf8PathBuf,
    pub is_dir: bool,
}

impl TreeEntry {
    pub fn relative(&self) -> String {
        self.segments.join("/")
    }
}

pub fn local_tree(root: &Utf8Path) -> Result<Vec<TreeEntry>, RegistryError> {
    if !root.as_std_path().is_dir() {
        return Err(RegistryError::Filesystem(format!(
            "{root} is not a directory"
        )));
    }
    let mut entries = Vec::new();
    for path in walk_dir(root.as_std_path())? {
        let path = Utf8PathBuf::from_path_buf(path)
            .map_err(|path| RegistryError::Filesystem(format!("non-utf8 path {}", path.display())))?;
        let relative = path
            .strip_prefix(root)
            .map_err(|err| RegistryError::Filesystem(err.to_string()))?;
        let segments = relative
            .components()
            .map(|component| component.as_str().to_string())
            .collect();
        let is_dir = path.as_std_path().is_dir();
        entries.push(TreeEntry {
            segments,
            path,
            is_dir,
        });
    }
    entries.sort_by(|left, right| left.segments.cmp(&right.segments));
    Ok(entries)
}

pub fn copy_dir_recursive(source: &Utf8Path, dest: &Utf8Path) -> Result<(), RegistryError> {
    fs::create_dir_all(dest.as_std_path())
        .map_err(|err| RegistryError::Filesystem(err.to_string()))?;
    for entry in local_tree(source)? {
        let target = dest.join(entry.relative());
        if entry.is_dir {
            fs::create_dir_all(target.as_std_path())
                .map_err(|err| RegistryError::Filesystem(err.to_string()))?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent.as_std_path())
                    .map_err(|err| RegistryError::Filesystem(err.to_string()))?;
            }
            fs::copy(entry.path.as_std_path(), target.as_std_path())
                .map_err(|err| RegistryError::Filesystem(err.to_string()))?;
        }
    }
    Ok(())
}

pub fn copy_dir_atomic(source: &Utf8Path, dest: &Utf8Path) -> Result<(), RegistryError> {
    let parent = dest
        .parent()
        .ok_or_else(|| RegistryError::Filesystem("invalid destination path".to_string()))?;
    fs::create_dir_all(parent.as_std_path())
        .map_err(|err| RegistryError::Filesystem(err.to_string()))?;
    let temp_dir = Builder::new()
        .prefix(".binreg-copy")
        .tempdir_in(parent.as_std_path())
        .map_err(|err| RegistryError::Filesystem(err.to_string()))?;
    let temp_path = Utf8PathBuf::from_path_buf(temp_dir.path().to_path_buf())
        .map_err(|_| RegistryError::Filesystem("invalid temp dir".to_string()))?;
    copy_dir_recursive(source, &temp_path)?;
    atomic_rename_dir(temp_path.as_std_path(), dest.as_std_path())
        .map_err(|err| RegistryError::Filesystem(err.to_string()))?;
    Ok(())
}

pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), RegistryError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| RegistryError::Filesystem(err.to_string()))?;
    }
    let tmp_path = path.with_extension("tmp");
    fs::write(tmp_path.as_std_path(), content)
        .map_err(|err| RegistryError::Filesystem(err.to_string()))?;
    fs::rename(tmp_path.as_std_path(), path.as_std_path())
        .map_err(|err| RegistryError::Filesystem(err.to_string()))?;
    Ok(())
}

pub fn remove_dir_if_exists(path: &Utf8Path) -> Result<(), RegistryError> {
    match fs::remove_dir_all(path.as_std_path()) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(RegistryError::Filesystem(format!("remove {path}: {err}"))),
    }
}

pub fn atomic_rename_dir(from: &Path, to: &Path) -> io::Result<()> {
    if to.exists() {
        fs::remove_dir_all(to)?;
    }
    fs::rename(from, to)
}

fn walk_dir(root: &Path) -> Result<Vec<PathBuf>, RegistryError> {
    let mut items = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(path) = stack.pop() {
        let entries =
            fs::read_dir(&path).map_err(|err| RegistryError::Filesystem(err.to_string()))?;
        for entry in entries {
            let entry = entry.map_err(|err| RegistryError::Filesystem(err.to_string()))?;
            let path = entry.path();
            if path.is_dir() {
                stack.push(path.clone());
            }
            items.push(path);
        }
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tree_lists_parents_first() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        fs::create_dir_all(root.join("lib/nested").as_std_path()).unwrap();
        fs::write(root.join("lib/nested/a.so").as_std_path(), b"a").unwrap();
        fs::write(root.join("tool").as_std_path(), b"t").unwrap();

        let tree = local_tree(&root).unwrap();
        let names: Vec<_> = tree.iter().map(TreeEntry::relative).collect();
        assert_eq!(names, vec!["lib", "lib/nested", "lib/nested/a.so", "tool"]);
        assert!(tree[0].is_dir);
        assert!(!tree[3].is_dir);
    }

    #[test]
    fn atomic_copy_replaces_destination() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let source = root.join("source");
        let dest = root.join("dest");
        fs::create_dir_all(source.as_std_path()).unwrap();
        fs::write(source.join("new").as_std_path(), b"new").unwrap();
        fs::create_dir_all(dest.as_std_path()).unwrap();
        fs::write(dest.join("stale").as_std_path(), b"old").unwrap();

        copy_dir_atomic(&source, &dest).unwrap();
        assert!(dest.join("new").as_std_path().exists());
        assert!(!dest.join("stale").as_std_path().exists());
    }
}
