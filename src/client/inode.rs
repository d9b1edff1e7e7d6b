//! Bridges the kernel framework's inode addressing to the wire protocol's
//! path addressing.
//!
//! `fuser`'s [`fuser::Filesystem`] callbacks are addressed by inode number;
//! every wire request is addressed by a guest-relative path. This table is
//! the adapter between the two, populated on `lookup`/`readdir` and trimmed
//! on `forget`.

use std::sync::Mutex;

use whirlwind::ShardMap;

/// The mount root is always inode 1, matching FUSE convention.
pub const ROOT_INO: u64 = 1;

struct Entry {
    path: String,
    lookups: u64,
}

/// Concurrent inode <-> path map plus a per-inode lookup reference count.
pub struct InodeTable {
    by_ino: ShardMap<u64, Mutex<Entry>>,
    by_path: ShardMap<String, u64>,
    next_ino: std::sync::atomic::AtomicU64,
}

impl InodeTable {
    pub fn new() -> Self {
        let table = InodeTable {
            by_ino: ShardMap::new(),
            by_path: ShardMap::new(),
            next_ino: std::sync::atomic::AtomicU64::new(ROOT_INO + 1),
        };
        table
    }

    /// Call once at startup to seed the root inode.
    pub async fn init_root(&self) {
        self.by_ino.insert(ROOT_INO, Mutex::new(Entry { path: "/".to_string(), lookups: 1 })).await;
        self.by_path.insert("/".to_string(), ROOT_INO).await;
    }

    pub async fn path_of(&self, ino: u64) -> Option<String> {
        if ino == ROOT_INO {
            return Some("/".to_string());
        }
        let guard = self.by_ino.get(&ino).await?;
        Some(guard.lock().unwrap().path.clone())
    }

    /// Returns the inode currently assigned to `path`, if any, without
    /// minting a new one and without touching the lookup count. Used by the
    /// invalidation reader, which must not keep an entry alive on the
    /// kernel's behalf just by observing a server-pushed path.
    pub async fn ino_of(&self, path: &str) -> Option<u64> {
        if path == "/" {
            return Some(ROOT_INO);
        }
        self.by_path.get(path).await.map(|ino| *ino)
    }

    /// Looks up or assigns an inode for `path`, incrementing its lookup count.
    /// Called on `lookup`, `create`, and anywhere else a reply carries an
    /// entry the kernel will later `forget`.
    pub async fn lookup(&self, path: &str) -> u64 {
        if path == "/" {
            if let Some(guard) = self.by_ino.get(&ROOT_INO).await {
                guard.lock().unwrap().lookups += 1;
            }
            return ROOT_INO;
        }

        if let Some(ino) = self.by_path.get(path).await {
            let ino = *ino;
            if let Some(guard) = self.by_ino.get(&ino).await {
                guard.lock().unwrap().lookups += 1;
            }
            return ino;
        }

        let ino = self.next_ino.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        self.by_ino.insert(ino, Mutex::new(Entry { path: path.to_string(), lookups: 1 })).await;
        self.by_path.insert(path.to_string(), ino).await;
        ino
    }

    /// Looks up or mints an inode number for `path` without touching its
    /// lookup count. Used by `readdir`, whose entries (unlike `lookup` or
    /// `create`) are never paired with a kernel `forget` -- bumping the
    /// refcount here would leak it forever on repeated directory listings.
    pub async fn assign(&self, path: &str) -> u64 {
        if path == "/" {
            return ROOT_INO;
        }
        if let Some(ino) = self.by_path.get(path).await {
            return *ino;
        }

        let ino = self.next_ino.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        self.by_ino.insert(ino, Mutex::new(Entry { path: path.to_string(), lookups: 0 })).await;
        self.by_path.insert(path.to_string(), ino).await;
        ino
    }

    /// Decrements the lookup count by `n`; removes the mapping once it
    /// reaches zero. The root inode is never forgotten.
    pub async fn forget(&self, ino: u64, n: u64) {
        if ino == ROOT_INO {
            return;
        }
        let should_remove = if let Some(guard) = self.by_ino.get(&ino).await {
            let mut entry = guard.lock().unwrap();
            entry.lookups = entry.lookups.saturating_sub(n);
            entry.lookups == 0
        } else {
            false
        };
        if should_remove {
            if let Some(path) = self.path_of(ino).await {
                self.by_path.remove(&path).await;
            }
            self.by_ino.remove(&ino).await;
        }
    }

    /// Reassigns `old_path` -> `new_path` in place after a successful rename,
    /// keeping any existing inode stable instead of minting a new one.
    pub async fn rename(&self, old_path: &str, new_path: &str) {
        if let Some(ino) = self.by_path.get(old_path).await {
            let ino = *ino;
            self.by_path.remove(old_path).await;
            self.by_path.insert(new_path.to_string(), ino).await;
            if let Some(guard) = self.by_ino.get(&ino).await {
                guard.lock().unwrap().path = new_path.to_string();
            }
        }
    }

}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lookup_assigns_stable_inode_and_forget_removes_it() {
        let table = InodeTable::new();
        table.init_root().await;

        let ino = table.lookup("/a").await;
        assert_eq!(table.lookup("/a").await, ino);
        assert_eq!(table.path_of(ino).await.as_deref(), Some("/a"));

        table.forget(ino, 2).await;
        assert_eq!(table.path_of(ino).await, None);
    }

    #[tokio::test]
    async fn rename_preserves_inode_identity() {
        let table = InodeTable::new();
        table.init_root().await;

        let ino = table.lookup("/old").await;
        table.rename("/old", "/new").await;
        assert_eq!(table.path_of(ino).await.as_deref(), Some("/new"));
        assert_eq!(table.lookup("/new").await, ino);
    }
}
