//! Adapts [`fuser::Filesystem`]'s inode-addressed synchronous callbacks to
//! the path-addressed async wire protocol.
//!
//! Each callback resolves its inode argument(s) to a guest-relative path via
//! [`InodeTable`], performs the opcode round-trip by blocking the calling
//! (fuser-owned) thread on the tokio runtime, then translates the result
//! back into the shape `fuser` expects.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use fuser::{
    FileAttr, FileType, Filesystem, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory, ReplyEmpty,
    ReplyEntry, ReplyOpen, ReplyWrite, Request as FuseRequest,
};
use tracing::warn;

use crate::client::dircursor::DirCursor;
use crate::client::inode::{InodeTable, ROOT_INO};
use crate::client::pathtrans::{prepend_mountpoint, strip_mountpoint};
use crate::client::pool::Pool;
use crate::client::roundtrip::{roundtrip, Outcome};
use crate::wire::{Attributes, EntryType, Request as WireRequest, Response, TargetKind};

const NO_TTL: Duration = Duration::ZERO;

/// Runtime state backing one mounted filesystem: the pool, the inode table,
/// the set of open directory cursors, and the guest mountpoint string used
/// for symlink translation.
pub struct HvShareFs {
    runtime: tokio::runtime::Handle,
    pool: Arc<Pool>,
    inodes: Arc<InodeTable>,
    mountpoint: String,
    dir_handles: Mutex<HashMap<u64, DirCursor>>,
    next_fh: AtomicU64,
}

impl HvShareFs {
    pub fn new(
        runtime: tokio::runtime::Handle,
        pool: Arc<Pool>,
        inodes: Arc<InodeTable>,
        mountpoint: String,
    ) -> Self {
        Self {
            runtime,
            pool,
            inodes,
            mountpoint,
            dir_handles: Mutex::new(HashMap::new()),
            next_fh: AtomicU64::new(1),
        }
    }

    fn path_of(&self, ino: u64) -> Option<String> {
        self.runtime.block_on(self.inodes.path_of(ino))
    }

    fn child_path(&self, parent: u64, name: &OsStr) -> Option<String> {
        let parent_path = self.path_of(parent)?;
        let name = name.to_str()?;
        Some(join_guest_path(&parent_path, name))
    }

    fn lookup_ino(&self, path: &str) -> u64 {
        self.runtime.block_on(self.inodes.lookup(path))
    }

    /// Assigns an inode number for a `readdir` entry without incrementing its
    /// lookup refcount (readdir entries get no matching kernel `forget`).
    fn assign_ino(&self, path: &str) -> u64 {
        self.runtime.block_on(self.inodes.assign(path))
    }

    fn roundtrip(&self, request: WireRequest) -> Outcome {
        self.runtime.block_on(roundtrip(&self.pool, request))
    }

    fn alloc_fh(&self) -> u64 {
        self.next_fh.fetch_add(1, Ordering::Relaxed)
    }
}

fn join_guest_path(parent: &str, name: &str) -> String {
    if parent == "/" {
        format!("/{name}")
    } else {
        format!("{parent}/{name}")
    }
}

fn to_file_attr(ino: u64, attrs: &Attributes, uid: u32, gid: u32) -> FileAttr {
    let kind = match attrs.entry_type() {
        EntryType::Directory => FileType::Directory,
        EntryType::RegularFile => FileType::RegularFile,
        EntryType::Symlink => FileType::Symlink,
    };
    let epoch = |secs: u32| UNIX_EPOCH + Duration::from_secs(secs as u64);
    FileAttr {
        ino,
        size: attrs.size,
        blocks: attrs.used.div_ceil(512),
        atime: epoch(attrs.atime),
        mtime: epoch(attrs.mtime),
        ctime: epoch(attrs.ctime),
        crtime: SystemTime::UNIX_EPOCH,
        kind,
        perm: (attrs.mode & 0o7777) as u16,
        nlink: attrs.nlink,
        uid,
        gid,
        rdev: 0,
        blksize: 4096,
        flags: 0,
    }
}

impl Filesystem for HvShareFs {
    fn init(
        &mut self,
        _req: &FuseRequest<'_>,
        _config: &mut fuser::KernelConfig,
    ) -> Result<(), libc::c_int> {
        Ok(())
    }

    fn lookup(&mut self, req: &FuseRequest<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let Some(path) = self.child_path(parent, name) else {
            reply.error(libc::ENOENT);
            return;
        };

        match self.roundtrip(WireRequest::Attr { path: path.clone() }) {
            Outcome::Ok(Response::Attr(attrs)) => {
                let ino = self.lookup_ino(&path);
                let attr = to_file_attr(ino, &attrs, req.uid(), req.gid());
                reply.entry(&NO_TTL, &attr, 0);
            }
            Outcome::Ok(_) => reply.error(libc::EIO),
            Outcome::Errno(errno) => reply.error(errno),
        }
    }

    fn forget(&mut self, _req: &FuseRequest<'_>, ino: u64, nlookup: u64) {
        self.runtime.block_on(self.inodes.forget(ino, nlookup));
    }

    fn getattr(&mut self, req: &FuseRequest<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        let Some(path) = self.path_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };

        match self.roundtrip(WireRequest::Attr { path }) {
            Outcome::Ok(Response::Attr(attrs)) => {
                let attr = to_file_attr(ino, &attrs, req.uid(), req.gid());
                reply.attr(&NO_TTL, &attr);
            }
            Outcome::Ok(_) => reply.error(libc::EIO),
            Outcome::Errno(errno) => reply.error(errno),
        }
    }

    fn setattr(
        &mut self,
        req: &FuseRequest<'_>,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        _atime: Option<fuser::TimeOrNow>,
        _mtime: Option<fuser::TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        if mode.is_some() || uid.is_some() || gid.is_some() {
            reply.error(libc::ENOSYS);
            return;
        }

        let Some(path) = self.path_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };

        if let Some(new_size) = size {
            match self.roundtrip(WireRequest::Truncate { path: path.clone(), new_size: new_size as i64 }) {
                Outcome::Ok(_) => {}
                Outcome::Errno(errno) => {
                    reply.error(errno);
                    return;
                }
            }
        }

        match self.roundtrip(WireRequest::Attr { path }) {
            Outcome::Ok(Response::Attr(attrs)) => {
                let attr = to_file_attr(ino, &attrs, req.uid(), req.gid());
                reply.attr(&NO_TTL, &attr);
            }
            Outcome::Ok(_) => reply.error(libc::EIO),
            Outcome::Errno(errno) => reply.error(errno),
        }
    }

    fn readlink(&mut self, _req: &FuseRequest<'_>, ino: u64, reply: ReplyData) {
        let Some(path) = self.path_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };

        match self.roundtrip(WireRequest::Readlink { path }) {
            Outcome::Ok(Response::Readlink { target, kind }) => {
                let resolved = match kind {
                    TargetKind::Local => prepend_mountpoint(&self.mountpoint, &target),
                    TargetKind::External => target,
                };
                reply.data(resolved.as_bytes());
            }
            Outcome::Ok(_) => reply.error(libc::EIO),
            Outcome::Errno(errno) => reply.error(errno),
        }
    }

    fn mkdir(
        &mut self,
        req: &FuseRequest<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        let Some(path) = self.child_path(parent, name) else {
            reply.error(libc::ENOENT);
            return;
        };

        match self.roundtrip(WireRequest::Mkdir { path: path.clone(), mode }) {
            Outcome::Ok(_) => self.reply_fresh_entry(&path, req.uid(), req.gid(), reply),
            Outcome::Errno(errno) => reply.error(errno),
        }
    }

    fn unlink(&mut self, _req: &FuseRequest<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let Some(path) = self.child_path(parent, name) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.roundtrip(WireRequest::Unlink { path }) {
            Outcome::Ok(_) => reply.ok(),
            Outcome::Errno(errno) => reply.error(errno),
        }
    }

    fn rmdir(&mut self, _req: &FuseRequest<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let Some(path) = self.child_path(parent, name) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.roundtrip(WireRequest::Rmdir { path }) {
            Outcome::Ok(_) => reply.ok(),
            Outcome::Errno(errno) => reply.error(errno),
        }
    }

    fn symlink(
        &mut self,
        req: &FuseRequest<'_>,
        parent: u64,
        link_name: &OsStr,
        target: &std::path::Path,
        reply: ReplyEntry,
    ) {
        let Some(to) = self.child_path(parent, link_name) else {
            reply.error(libc::ENOENT);
            return;
        };
        let Some(target) = target.to_str() else {
            reply.error(libc::EINVAL);
            return;
        };

        let (from, kind) = match strip_mountpoint(&self.mountpoint, target) {
            Some(relative) => (relative, TargetKind::Local),
            None => (target.to_string(), TargetKind::External),
        };

        match self.roundtrip(WireRequest::Symlink { from, to: to.clone(), kind }) {
            Outcome::Ok(_) => self.reply_fresh_entry(&to, req.uid(), req.gid(), reply),
            Outcome::Errno(errno) => reply.error(errno),
        }
    }

    fn rename(
        &mut self,
        _req: &FuseRequest<'_>,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        flags: u32,
        reply: ReplyEmpty,
    ) {
        if flags != 0 {
            reply.error(libc::EINVAL);
            return;
        }
        let (Some(from), Some(to)) = (self.child_path(parent, name), self.child_path(newparent, newname))
        else {
            reply.error(libc::ENOENT);
            return;
        };

        match self.roundtrip(WireRequest::Rename { from: from.clone(), to: to.clone() }) {
            Outcome::Ok(_) => {
                self.runtime.block_on(self.inodes.rename(&from, &to));
                reply.ok();
            }
            Outcome::Errno(errno) => reply.error(errno),
        }
    }

    fn link(
        &mut self,
        req: &FuseRequest<'_>,
        ino: u64,
        newparent: u64,
        newname: &OsStr,
        reply: ReplyEntry,
    ) {
        let (Some(from), Some(to)) = (self.path_of(ino), self.child_path(newparent, newname)) else {
            reply.error(libc::ENOENT);
            return;
        };

        match self.roundtrip(WireRequest::Link { from, to: to.clone() }) {
            Outcome::Ok(_) => self.reply_fresh_entry(&to, req.uid(), req.gid(), reply),
            Outcome::Errno(errno) => reply.error(errno),
        }
    }

    fn open(&mut self, _req: &FuseRequest<'_>, _ino: u64, _flags: i32, reply: ReplyOpen) {
        reply.opened(self.alloc_fh(), 0);
    }

    fn read(
        &mut self,
        _req: &FuseRequest<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let Some(path) = self.path_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };

        match self.roundtrip(WireRequest::Read { path, size: size as u64, offset }) {
            Outcome::Ok(Response::Read(data)) => reply.data(&data),
            Outcome::Ok(_) => reply.error(libc::EIO),
            Outcome::Errno(errno) => reply.error(errno),
        }
    }

    fn write(
        &mut self,
        _req: &FuseRequest<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        let Some(path) = self.path_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };

        match self.roundtrip(WireRequest::Write { path, offset, data: data.to_vec() }) {
            Outcome::Ok(Response::Write { bytes_written }) => reply.written(bytes_written as u32),
            Outcome::Ok(_) => reply.error(libc::EIO),
            Outcome::Errno(errno) => reply.error(errno),
        }
    }

    fn create(
        &mut self,
        req: &FuseRequest<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        _flags: i32,
        reply: ReplyCreate,
    ) {
        let Some(path) = self.child_path(parent, name) else {
            reply.error(libc::ENOENT);
            return;
        };

        match self.roundtrip(WireRequest::Create { path: path.clone(), mode }) {
            Outcome::Ok(_) => match self.roundtrip(WireRequest::Attr { path: path.clone() }) {
                Outcome::Ok(Response::Attr(attrs)) => {
                    let ino = self.lookup_ino(&path);
                    let attr = to_file_attr(ino, &attrs, req.uid(), req.gid());
                    reply.created(&NO_TTL, &attr, 0, self.alloc_fh(), 0);
                }
                Outcome::Ok(_) => reply.error(libc::EIO),
                Outcome::Errno(errno) => reply.error(errno),
            },
            Outcome::Errno(errno) => reply.error(errno),
        }
    }

    fn opendir(&mut self, _req: &FuseRequest<'_>, _ino: u64, _flags: i32, reply: ReplyOpen) {
        let fh = self.alloc_fh();
        self.dir_handles.lock().unwrap().insert(fh, DirCursor::new());
        reply.opened(fh, 0);
    }

    fn readdir(
        &mut self,
        _req: &FuseRequest<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let Some(path) = self.path_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };

        let needs_fetch = {
            let handles = self.dir_handles.lock().unwrap();
            !handles.get(&fh).map(DirCursor::is_loaded).unwrap_or(false)
        };

        if needs_fetch {
            match self.roundtrip(WireRequest::ReadDir { path }) {
                Outcome::Ok(Response::ReadDir(entries)) => {
                    let mut handles = self.dir_handles.lock().unwrap();
                    if let Some(cursor) = handles.get_mut(&fh) {
                        cursor.load(entries);
                    }
                }
                Outcome::Ok(_) => {
                    reply.error(libc::EIO);
                    return;
                }
                Outcome::Errno(errno) => {
                    reply.error(errno);
                    return;
                }
            }
        }

        let handles = self.dir_handles.lock().unwrap();
        let Some(cursor) = handles.get(&fh) else {
            reply.error(libc::EBADF);
            return;
        };

        let mut next_offset = offset;
        for entry in cursor.entries_from(offset) {
            next_offset += 1;
            let child_path = join_guest_path(&path, &entry.name);
            let child_ino = if entry.name == "." {
                ino
            } else if entry.name == ".." {
                ROOT_INO
            } else {
                self.assign_ino(&child_path)
            };
            let kind = match entry.attrs.entry_type() {
                EntryType::Directory => FileType::Directory,
                EntryType::RegularFile => FileType::RegularFile,
                EntryType::Symlink => FileType::Symlink,
            };
            if reply.add(child_ino, next_offset, kind, &entry.name) {
                break;
            }
        }
        reply.ok();
    }

    fn releasedir(
        &mut self,
        _req: &FuseRequest<'_>,
        _ino: u64,
        fh: u64,
        _flags: i32,
        reply: ReplyEmpty,
    ) {
        self.dir_handles.lock().unwrap().remove(&fh);
        reply.ok();
    }

    fn access(&mut self, _req: &FuseRequest<'_>, _ino: u64, _mask: i32, reply: ReplyEmpty) {
        reply.ok();
    }

    fn fsync(&mut self, _req: &FuseRequest<'_>, _ino: u64, _fh: u64, _datasync: bool, reply: ReplyEmpty) {
        reply.ok();
    }

    fn release(
        &mut self,
        _req: &FuseRequest<'_>,
        _ino: u64,
        _fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        reply.ok();
    }

    fn statfs(&mut self, _req: &FuseRequest<'_>, _ino: u64, reply: fuser::ReplyStatfs) {
        reply.error(libc::ENOSYS);
    }

    fn mknod(
        &mut self,
        _req: &FuseRequest<'_>,
        _parent: u64,
        _name: &OsStr,
        _mode: u32,
        _umask: u32,
        _rdev: u32,
        reply: ReplyEntry,
    ) {
        reply.error(libc::ENOSYS);
    }
}

impl HvShareFs {
    fn reply_fresh_entry(&self, path: &str, uid: u32, gid: u32, reply: ReplyEntry) {
        match self.roundtrip(WireRequest::Attr { path: path.to_string() }) {
            Outcome::Ok(Response::Attr(attrs)) => {
                let ino = self.lookup_ino(path);
                let attr = to_file_attr(ino, &attrs, uid, gid);
                reply.entry(&NO_TTL, &attr, 0);
            }
            Outcome::Ok(_) => reply.error(libc::EIO),
            Outcome::Errno(errno) => {
                warn!(path, errno, "post-create attr fetch failed");
                reply.error(errno);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_guest_path_handles_root_parent() {
        assert_eq!(join_guest_path("/", "a"), "/a");
        assert_eq!(join_guest_path("/sub", "a"), "/sub/a");
    }

    #[test]
    fn to_file_attr_maps_entry_type_to_file_type() {
        let attrs = Attributes {
            fsid: 0,
            fileid: 7,
            size: 3,
            used: 3,
            kind: EntryType::RegularFile.as_u32(),
            mode: EntryType::RegularFile.mode_bits(),
            nlink: 1,
            uid: 0,
            gid: 0,
            atime: 0,
            mtime: 0,
            ctime: 0,
        };
        let attr = to_file_attr(7, &attrs, 1000, 1000);
        assert_eq!(attr.kind, FileType::RegularFile);
        assert_eq!(attr.ino, 7);
    }
}
