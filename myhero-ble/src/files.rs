//! Storage sandbox: every peer-supplied path is resolved below one root

use std::fs;
use std::path::{Component, Path, PathBuf};

use log::*;
use myhero_proto::{FileEntry, FileKind};

use crate::{Error, Result};

#[derive(Debug, Clone)]
pub struct Storage {
    root: PathBuf,
    mount_prefix: String,
}

impl Storage {
    pub fn new(root: impl Into<PathBuf>, mount_prefix: impl Into<String>) -> Self {
        let mut mount_prefix = mount_prefix.into();
        while mount_prefix.ends_with('/') {
            mount_prefix.pop();
        }
        Self { root: root.into(), mount_prefix }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn ensure_root(&self) -> Result<()> {
        fs::create_dir_all(&self.root)?;
        Ok(())
    }

    /// Map a peer path to a path under the root.
    ///
    /// Relative paths are taken from the root, `<mount_prefix>/...` is
    /// accepted as an alias of it. Any other absolute path, `..`, or an
    /// empty name is rejected.
    pub fn resolve(&self, name: &str) -> Result<PathBuf> {
        let relative = match name.strip_prefix(self.mount_prefix.as_str()) {
            Some(rest) if !self.mount_prefix.is_empty() && rest.starts_with('/') => &rest[1..],
            _ => name,
        };
        if relative.starts_with('/') || relative.starts_with('\\') {
            return Err(Error::InvalidArgument(format!("path outside storage: {name}")));
        }

        let mut path = self.root.clone();
        let mut depth = 0;
        for component in Path::new(relative).components() {
            match component {
                Component::Normal(part) => {
                    path.push(part);
                    depth += 1;
                }
                Component::CurDir => {}
                _ => return Err(Error::InvalidArgument(format!("unsafe path: {name}"))),
            }
        }
        if depth == 0 {
            return Err(Error::InvalidArgument("empty path".to_string()));
        }
        Ok(path)
    }

    /// Whether two resolved paths name the same file on the device.
    /// The storage partition is FAT, where names are case-insensitive.
    pub fn same_file(a: &Path, b: &Path) -> bool {
        a.as_os_str().eq_ignore_ascii_case(b.as_os_str())
    }

    /// Every file and directory below the root, sorted by relative name
    pub fn list(&self) -> Result<Vec<FileEntry>> {
        let mut entries = Vec::new();
        if self.root.is_dir() {
            self.walk(&self.root, &mut entries)?;
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn walk(&self, dir: &Path, out: &mut Vec<FileEntry>) -> Result<()> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            let meta = entry.metadata()?;
            let Some(name) = self.relative_name(&path) else {
                continue;
            };
            if meta.is_dir() {
                out.push(FileEntry { kind: FileKind::Directory, size: 0, name });
                self.walk(&path, out)?;
            } else if meta.is_file() {
                let size = u32::try_from(meta.len()).unwrap_or(u32::MAX);
                out.push(FileEntry { kind: FileKind::File, size, name });
            }
        }
        Ok(())
    }

    fn relative_name(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.root).ok()?;
        let parts: Option<Vec<&str>> = rel.components().map(|c| c.as_os_str().to_str()).collect();
        Some(parts?.join("/"))
    }

    /// Delete a regular file
    pub fn remove(&self, path: &Path) -> Result<()> {
        let meta = match fs::metadata(path) {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotFound(path.to_path_buf()));
            }
            Err(e) => return Err(e.into()),
        };
        if !meta.is_file() {
            return Err(Error::InvalidArgument(format!("not a file: {}", path.display())));
        }
        fs::remove_file(path)?;
        info!("File deleted: {}", path.display());
        Ok(())
    }
}
