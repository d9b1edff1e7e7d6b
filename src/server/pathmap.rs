//! Guest-relative path <-> host-native path translation.
//!
//! An incoming guest path `/a/b/c` resolves to `<root>/a/b/c`; the leading
//! slash is stripped and the POSIX separator is swapped for the host's. `/`
//! resolves to the root directory itself. Resolved paths are checked to stay
//! within the root before any host-FS call is made.

use std::path::{Component, Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("path escapes the exported root")]
    Escapes,
}

#[derive(Debug, Clone)]
pub struct PathMap {
    root: PathBuf,
}

impl PathMap {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves a guest-relative path (always starting with `/`) to a host
    /// path, rejecting any path that would escape the exported root via `..`.
    pub fn to_host(&self, guest_path: &str) -> Result<PathBuf, Error> {
        let relative = guest_path.trim_start_matches('/');
        if relative.is_empty() {
            return Ok(self.root.clone());
        }

        let mut resolved = self.root.clone();
        for component in Path::new(relative).components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(Error::Escapes);
                }
            }
        }
        Ok(resolved)
    }

    /// Translates a host path inside the exported tree back into a
    /// guest-relative path (strips the root prefix, converts separators).
    pub fn to_guest(&self, host_path: &Path) -> Option<String> {
        let relative = host_path.strip_prefix(&self.root).ok()?;
        if relative.as_os_str().is_empty() {
            return Some("/".to_string());
        }
        let mut guest = String::from("/");
        for (i, component) in relative.components().enumerate() {
            if i > 0 {
                guest.push('/');
            }
            guest.push_str(&component.as_os_str().to_string_lossy());
        }
        Some(guest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_maps_to_root_directory() {
        let map = PathMap::new(PathBuf::from("/export"));
        assert_eq!(map.to_host("/").unwrap(), PathBuf::from("/export"));
    }

    #[test]
    fn nested_path_maps_under_root() {
        let map = PathMap::new(PathBuf::from("/export"));
        assert_eq!(map.to_host("/a/b").unwrap(), PathBuf::from("/export/a/b"));
    }

    #[test]
    fn rejects_parent_dir_escape() {
        let map = PathMap::new(PathBuf::from("/export"));
        assert!(map.to_host("/../etc/passwd").is_err());
    }

    #[test]
    fn round_trips_to_guest() {
        let map = PathMap::new(PathBuf::from("/export"));
        let host = map.to_host("/a/b").unwrap();
        assert_eq!(map.to_guest(&host).as_deref(), Some("/a/b"));
    }
}
