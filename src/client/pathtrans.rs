//! Mountpoint-relative path classification for symlink targets.
//!
//! Mirrors the original `relativeToMountpoint`/`makeLocalPath` pair: a
//! symlink target is "local" when it falls under the guest mountpoint and no
//! path segment escapes it via `.`/`..`; otherwise it is "external".

/// If `target` is expressible relative to `mountpoint` (starts with it, and
/// no segment after the prefix is `.` or `..`), returns the mountpoint-relative
/// remainder (always starting with `/`). Otherwise returns `None`.
pub fn strip_mountpoint(mountpoint: &str, target: &str) -> Option<String> {
    let rest = target.strip_prefix(mountpoint)?;
    let rest = if rest.is_empty() { "/" } else { rest };
    if !rest.starts_with('/') {
        return None;
    }

    for segment in rest.split('/') {
        if segment == "." || segment == ".." {
            return None;
        }
    }

    Some(rest.to_string())
}

/// Prepends the mountpoint to a local (mountpoint-relative) symlink target
/// returned by READLINK, so the guest resolver sees a path inside the mount.
pub fn prepend_mountpoint(mountpoint: &str, relative: &str) -> String {
    if relative == "/" {
        mountpoint.to_string()
    } else {
        format!("{mountpoint}{relative}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_mountpoint_prefix() {
        assert_eq!(strip_mountpoint("/mnt", "/mnt/target").as_deref(), Some("/target"));
    }

    #[test]
    fn rejects_dot_dot_segments() {
        assert_eq!(strip_mountpoint("/mnt", "/mnt/../etc/passwd"), None);
    }

    #[test]
    fn rejects_paths_outside_mountpoint() {
        assert_eq!(strip_mountpoint("/mnt", "/etc/hosts"), None);
    }

    #[test]
    fn round_trips_with_prepend() {
        let stripped = strip_mountpoint("/mnt", "/mnt/a/b").unwrap();
        assert_eq!(prepend_mountpoint("/mnt", &stripped), "/mnt/a/b");
    }
}
