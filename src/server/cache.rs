//! Server-side attribute cache fronting ATTR lookups.
//!
//! Exists because the invalidation channel's entire purpose is to let a
//! cache be safe; bounded by entry count and a short TTL, with explicit
//! invalidation driven by filesystem-watch events.

use std::path::{Path, PathBuf};
use std::time::Duration;

use moka::sync::Cache;

use crate::wire::Attributes;

const DEFAULT_TTL: Duration = Duration::from_secs(2);
const MAX_ENTRIES: u64 = 10_000;

pub struct AttrCache {
    cache: Cache<PathBuf, Attributes>,
}

impl AttrCache {
    pub fn new() -> Self {
        let cache = Cache::builder().max_capacity(MAX_ENTRIES).time_to_live(DEFAULT_TTL).build();
        Self { cache }
    }

    pub fn get(&self, path: &Path) -> Option<Attributes> {
        self.cache.get(path)
    }

    pub fn put(&self, path: PathBuf, attrs: Attributes) {
        self.cache.insert(path, attrs);
    }

    pub fn invalidate(&self, path: &Path) {
        self.cache.invalidate(path);
    }
}

impl Default for AttrCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::EntryType;

    fn sample() -> Attributes {
        Attributes {
            fsid: 0,
            fileid: 1,
            size: 0,
            used: 0,
            kind: EntryType::RegularFile.as_u32(),
            mode: EntryType::RegularFile.mode_bits(),
            nlink: 1,
            uid: 0,
            gid: 0,
            atime: 0,
            mtime: 0,
            ctime: 0,
        }
    }

    #[test]
    fn put_then_get_round_trips() {
        let cache = AttrCache::new();
        let path = PathBuf::from("/a");
        cache.put(path.clone(), sample());
        assert!(cache.get(&path).is_some());
    }

    #[test]
    fn invalidate_removes_entry() {
        let cache = AttrCache::new();
        let path = PathBuf::from("/a");
        cache.put(path.clone(), sample());
        cache.invalidate(&path);
        assert!(cache.get(&path).is_none());
    }
}
