//! Per-opcode host filesystem operations.
//!
//! Each handler resolves its guest path(s) through [`PathMap`], performs the
//! corresponding host-FS call, and returns either a [`Response`] or a
//! [`Status`] derived from the real `io::Error`/errno rather than collapsing
//! every failure to ENOENT.

use std::io::SeekFrom;
use std::path::Path;

use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::warn;

use crate::server::attrs;
use crate::server::cache::AttrCache;
use crate::server::pathmap::PathMap;
use crate::wire::{Attributes, DirEntry, Request, Response, Status, TargetKind};

/// Caps a single READDIR response so a pathological directory cannot build
/// an unbounded response body; entries past the cap are dropped with a
/// warning rather than silently, since the wire protocol has no pagination.
const MAX_READDIR_ENTRIES: usize = 65536;

pub struct Handler<'a> {
    pub pathmap: &'a PathMap,
    pub attr_cache: &'a AttrCache,
}

impl<'a> Handler<'a> {
    fn to_host(&self, guest_path: &str) -> Result<std::path::PathBuf, Status> {
        self.pathmap.to_host(guest_path).map_err(|_| Status(libc::ENOENT as u16))
    }

    async fn probe_cached(&self, host_path: &Path) -> std::io::Result<Attributes> {
        if let Some(attrs) = self.attr_cache.get(host_path) {
            return Ok(attrs);
        }
        let attrs = attrs::probe(host_path).await?;
        self.attr_cache.put(host_path.to_path_buf(), attrs);
        Ok(attrs)
    }

    pub async fn dispatch(&self, request: Request) -> Result<Response, Status> {
        match request {
            Request::Attr { path } => self.attr(&path).await,
            Request::ReadDir { path } => self.readdir(&path).await,
            Request::Read { path, size, offset } => self.read(&path, size, offset).await,
            Request::Create { path, mode } => self.create(&path, mode).await,
            Request::Write { path, offset, data } => self.write(&path, offset, &data).await,
            Request::Unlink { path } => self.unlink(&path).await,
            Request::Truncate { path, new_size } => self.truncate(&path, new_size).await,
            Request::Mkdir { path, mode } => self.mkdir(&path, mode).await,
            Request::Rmdir { path } => self.rmdir(&path).await,
            Request::Rename { from, to } => self.rename(&from, &to).await,
            Request::Symlink { from, to, kind } => self.symlink(&from, &to, kind).await,
            Request::Link { from, to } => self.link(&from, &to).await,
            Request::Readlink { path } => self.readlink(&path).await,
        }
    }

    async fn attr(&self, path: &str) -> Result<Response, Status> {
        let host_path = self.to_host(path)?;
        let attrs = self.probe_cached(&host_path).await.map_err(|e| Status::from_io_error(&e))?;
        Ok(Response::Attr(attrs))
    }

    async fn readdir(&self, path: &str) -> Result<Response, Status> {
        let host_path = self.to_host(path)?;
        let mut read_dir =
            tokio::fs::read_dir(&host_path).await.map_err(|e| Status::from_io_error(&e))?;

        let mut entries = Vec::new();
        loop {
            let next = read_dir.next_entry().await.map_err(|e| Status::from_io_error(&e))?;
            let Some(entry) = next else { break };
            if entries.len() >= MAX_READDIR_ENTRIES {
                warn!(path, "directory truncated at entry cap");
                break;
            }
            let child_path = entry.path();
            match self.probe_cached(&child_path).await {
                Ok(attrs) => entries.push(DirEntry {
                    name: entry.file_name().to_string_lossy().to_string(),
                    attrs,
                }),
                Err(_) => continue,
            }
        }
        Ok(Response::ReadDir(entries))
    }

    async fn read(&self, path: &str, size: u64, offset: i64) -> Result<Response, Status> {
        let host_path = self.to_host(path)?;
        let mut file = tokio::fs::File::open(&host_path).await.map_err(|e| Status::from_io_error(&e))?;
        file.seek(SeekFrom::Start(offset as u64)).await.map_err(|e| Status::from_io_error(&e))?;

        let mut buf = vec![0u8; size as usize];
        let mut total = 0usize;
        while total < buf.len() {
            let n = file.read(&mut buf[total..]).await.map_err(|e| Status::from_io_error(&e))?;
            if n == 0 {
                break;
            }
            total += n;
        }
        buf.truncate(total);
        Ok(Response::Read(buf))
    }

    async fn write(&self, path: &str, offset: i64, data: &[u8]) -> Result<Response, Status> {
        let host_path = self.to_host(path)?;
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .open(&host_path)
            .await
            .map_err(|e| Status::from_io_error(&e))?;
        file.seek(SeekFrom::Start(offset as u64)).await.map_err(|e| Status::from_io_error(&e))?;
        file.write_all(data).await.map_err(|e| Status::from_io_error(&e))?;
        self.attr_cache.invalidate(&host_path);
        Ok(Response::Write { bytes_written: data.len() as u64 })
    }

    async fn create(&self, path: &str, mode: u32) -> Result<Response, Status> {
        let host_path = self.to_host(path)?;
        let umask = 0o022u32;
        let file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&host_path)
            .await
            .map_err(|e| Status::from_io_error(&e))?;
        drop(file);
        set_permissions(&host_path, mode & !umask).await;
        self.attr_cache.invalidate(&host_path);
        Ok(Response::Empty)
    }

    async fn unlink(&self, path: &str) -> Result<Response, Status> {
        let host_path = self.to_host(path)?;
        tokio::fs::remove_file(&host_path).await.map_err(|e| Status::from_io_error(&e))?;
        self.attr_cache.invalidate(&host_path);
        Ok(Response::Empty)
    }

    async fn truncate(&self, path: &str, new_size: i64) -> Result<Response, Status> {
        let host_path = self.to_host(path)?;
        let file = tokio::fs::OpenOptions::new()
            .write(true)
            .open(&host_path)
            .await
            .map_err(|e| Status::from_io_error(&e))?;
        file.set_len(new_size.max(0) as u64).await.map_err(|e| Status::from_io_error(&e))?;
        self.attr_cache.invalidate(&host_path);
        Ok(Response::Empty)
    }

    async fn mkdir(&self, path: &str, mode: u32) -> Result<Response, Status> {
        let host_path = self.to_host(path)?;
        let umask = 0o022u32;
        tokio::fs::create_dir(&host_path).await.map_err(|e| Status::from_io_error(&e))?;
        set_permissions(&host_path, mode & !umask).await;
        self.attr_cache.invalidate(&host_path);
        Ok(Response::Empty)
    }

    async fn rmdir(&self, path: &str) -> Result<Response, Status> {
        let host_path = self.to_host(path)?;
        tokio::fs::remove_dir(&host_path).await.map_err(|e| Status::from_io_error(&e))?;
        self.attr_cache.invalidate(&host_path);
        Ok(Response::Empty)
    }

    async fn rename(&self, from: &str, to: &str) -> Result<Response, Status> {
        let host_from = self.to_host(from)?;
        let host_to = self.to_host(to)?;
        tokio::fs::rename(&host_from, &host_to).await.map_err(|e| Status::from_io_error(&e))?;
        self.attr_cache.invalidate(&host_from);
        self.attr_cache.invalidate(&host_to);
        Ok(Response::Empty)
    }

    async fn link(&self, from: &str, to: &str) -> Result<Response, Status> {
        let host_from = self.to_host(from)?;
        let host_to = self.to_host(to)?;
        tokio::fs::hard_link(&host_from, &host_to).await.map_err(|e| Status::from_io_error(&e))?;
        self.attr_cache.invalidate(&host_from);
        self.attr_cache.invalidate(&host_to);
        Ok(Response::Empty)
    }

    async fn symlink(&self, from: &str, to: &str, kind: TargetKind) -> Result<Response, Status> {
        let host_to = self.to_host(to)?;
        if tokio::fs::symlink_metadata(&host_to).await.is_ok() {
            return Err(Status(libc::EEXIST as u16));
        }

        let link_target: std::path::PathBuf = match kind {
            TargetKind::External => from.into(),
            TargetKind::Local => self.to_host(from)?,
        };

        tokio::fs::symlink(&link_target, &host_to).await.map_err(|e| Status::from_io_error(&e))?;
        self.attr_cache.invalidate(&host_to);
        Ok(Response::Empty)
    }

    async fn readlink(&self, path: &str) -> Result<Response, Status> {
        let host_path = self.to_host(path)?;
        let target =
            tokio::fs::read_link(&host_path).await.map_err(|e| Status::from_io_error(&e))?;
        let target_str = target.to_string_lossy().to_string();

        if target_str.starts_with('/') && target.is_absolute() && !target.starts_with(self.pathmap.root())
        {
            return Ok(Response::Readlink { target: target_str, kind: TargetKind::External });
        }

        match self.pathmap.to_guest(&target) {
            Some(guest_relative) => {
                Ok(Response::Readlink { target: guest_relative, kind: TargetKind::Local })
            }
            None => Ok(Response::Readlink { target: target_str, kind: TargetKind::External }),
        }
    }
}

async fn set_permissions(path: &Path, mode: u32) {
    use std::os::unix::fs::PermissionsExt;
    let perms = std::fs::Permissions::from_mode(mode);
    if let Err(err) = tokio::fs::set_permissions(path, perms).await {
        warn!(?path, %err, "failed to apply requested mode");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::EntryType;
    use tempfile::TempDir;

    struct Fixture {
        _tempdir: TempDir,
        pathmap: PathMap,
        attr_cache: AttrCache,
    }

    impl Fixture {
        fn new() -> Self {
            let tempdir = TempDir::new().expect("create temp dir");
            let pathmap = PathMap::new(tempdir.path().to_path_buf());
            Self { _tempdir: tempdir, pathmap, attr_cache: AttrCache::new() }
        }

        fn handler(&self) -> Handler<'_> {
            Handler { pathmap: &self.pathmap, attr_cache: &self.attr_cache }
        }
    }

    #[tokio::test]
    async fn write_then_read_round_trips_data() {
        let fixture = Fixture::new();
        let handler = fixture.handler();

        handler.create("/a", 0o644).await.expect("create");
        let data = b"hello".to_vec();
        let write = handler.write("/a", 0, &data).await.expect("write");
        assert!(matches!(write, Response::Write { bytes_written } if bytes_written == data.len() as u64));

        let read = handler.read("/a", data.len() as u64, 0).await.expect("read");
        match read {
            Response::Read(bytes) => assert_eq!(bytes, data),
            other => panic!("expected Read, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn read_past_eof_returns_zero_bytes_not_an_error() {
        let fixture = Fixture::new();
        let handler = fixture.handler();

        handler.create("/a", 0o644).await.expect("create");
        handler.write("/a", 0, b"abc").await.expect("write");

        let read = handler.read("/a", 16, 3).await.expect("read at eof");
        match read {
            Response::Read(bytes) => assert!(bytes.is_empty()),
            other => panic!("expected Read, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn create_getattr_unlink_then_getattr_is_enoent() {
        let fixture = Fixture::new();
        let handler = fixture.handler();

        handler.create("/a", 0o644).await.expect("create");
        match handler.attr("/a").await.expect("attr") {
            Response::Attr(attrs) => assert_eq!(attrs.entry_type(), EntryType::RegularFile),
            other => panic!("expected Attr, got {other:?}"),
        }

        handler.unlink("/a").await.expect("unlink");
        let err = handler.attr("/a").await.expect_err("attr after unlink fails");
        assert_eq!(err.errno(), libc::ENOENT);
    }

    #[tokio::test]
    async fn create_of_existing_path_is_eexist() {
        let fixture = Fixture::new();
        let handler = fixture.handler();

        handler.create("/a", 0o644).await.expect("first create");
        let err = handler.create("/a", 0o644).await.expect_err("second create collides");
        assert_eq!(err.errno(), libc::EEXIST);
    }

    #[tokio::test]
    async fn mkdir_lists_in_parent_and_rmdir_removes_it() {
        let fixture = Fixture::new();
        let handler = fixture.handler();

        handler.mkdir("/sub", 0o755).await.expect("mkdir");
        let names: Vec<String> = match handler.readdir("/").await.expect("readdir") {
            Response::ReadDir(entries) => entries.into_iter().map(|e| e.name).collect(),
            other => panic!("expected ReadDir, got {other:?}"),
        };
        assert!(names.contains(&"sub".to_string()));

        handler.rmdir("/sub").await.expect("rmdir");
        let names: Vec<String> = match handler.readdir("/").await.expect("readdir") {
            Response::ReadDir(entries) => entries.into_iter().map(|e| e.name).collect(),
            other => panic!("expected ReadDir, got {other:?}"),
        };
        assert!(!names.contains(&"sub".to_string()));
    }

    #[tokio::test]
    async fn rename_moves_the_entry() {
        let fixture = Fixture::new();
        let handler = fixture.handler();

        handler.create("/a", 0o644).await.expect("create");
        handler.rename("/a", "/b").await.expect("rename");

        handler.attr("/a").await.expect_err("old path is gone");
        handler.attr("/b").await.expect("new path exists");
    }

    #[tokio::test]
    async fn rename_with_flags_is_rejected_client_side_not_reachable_here() {
        // The EINVAL-on-flags short-circuit lives entirely in the client VFS
        // adapter (rename never reaches the wire with nonzero flags), so
        // there is nothing to exercise on the handler side; documented here
        // so the absence of a handler-level test isn't mistaken for a gap.
    }

    #[tokio::test]
    async fn local_symlink_round_trips_through_readlink() {
        let fixture = Fixture::new();
        let handler = fixture.handler();

        handler.create("/target", 0o644).await.expect("create target");
        handler
            .symlink("/target", "/link", TargetKind::Local)
            .await
            .expect("symlink");

        match handler.readlink("/link").await.expect("readlink") {
            Response::Readlink { target, kind } => {
                assert_eq!(kind, TargetKind::Local);
                assert_eq!(target, "/target");
            }
            other => panic!("expected Readlink, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn external_symlink_round_trips_verbatim() {
        let fixture = Fixture::new();
        let handler = fixture.handler();

        handler
            .symlink("/etc/hosts", "/link", TargetKind::External)
            .await
            .expect("symlink");

        match handler.readlink("/link").await.expect("readlink") {
            Response::Readlink { target, kind } => {
                assert_eq!(kind, TargetKind::External);
                assert_eq!(target, "/etc/hosts");
            }
            other => panic!("expected Readlink, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn symlink_target_must_not_already_exist() {
        let fixture = Fixture::new();
        let handler = fixture.handler();

        handler.create("/link", 0o644).await.expect("create collides with link name");
        let err = handler
            .symlink("/etc/hosts", "/link", TargetKind::External)
            .await
            .expect_err("symlink over existing entry fails");
        assert_eq!(err.errno(), libc::EEXIST);
    }

    #[tokio::test]
    async fn zero_size_symlink_is_reported_at_placeholder_size() {
        let fixture = Fixture::new();
        let handler = fixture.handler();

        handler
            .symlink("nonexistent-target", "/link", TargetKind::Local)
            .await
            .expect("symlink");

        match handler.attr("/link").await.expect("attr") {
            Response::Attr(attrs) => {
                assert_eq!(attrs.entry_type(), EntryType::Symlink);
                assert!(attrs.size >= crate::wire::SYMLINK_PLACEHOLDER_SIZE);
            }
            other => panic!("expected Attr, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn write_invalidates_the_attr_cache_entry() {
        let fixture = Fixture::new();
        let handler = fixture.handler();

        handler.create("/a", 0o644).await.expect("create");
        handler.attr("/a").await.expect("warms the cache");

        let host_path = fixture.pathmap.to_host("/a").unwrap();
        assert!(fixture.attr_cache.get(&host_path).is_some());

        handler.write("/a", 0, b"xyz").await.expect("write");
        assert!(fixture.attr_cache.get(&host_path).is_none());
    }

    #[tokio::test]
    async fn path_escaping_root_is_rejected() {
        let fixture = Fixture::new();
        let handler = fixture.handler();

        let err = handler.attr("/../outside").await.expect_err("escape rejected");
        assert_eq!(err.errno(), libc::ENOENT);
    }
}
