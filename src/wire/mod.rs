//! Wire protocol: framed little-endian messages exchanged between the client
//! and the server, plus the fixed-layout attributes record.
//!
//! Every message starts with an 8-byte little-endian `total_size` (header
//! inclusive) followed by a 2-byte opcode (requests) or status (responses).

mod buffer;
mod cursor;
mod framing;
mod message;

pub use buffer::MessageBuilder;
pub use cursor::MessageCursor;
pub use framing::{read_frame, write_frame, HEADER_LEN};
pub use message::{Request, Response};

use num_derive::{FromPrimitive, ToPrimitive};
use thiserror::Error;

/// Errors raised while encoding or decoding wire messages.
#[derive(Debug, Error)]
pub enum Error {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("peer closed the connection")]
    PeerClosed,
    #[error("malformed frame: {0}")]
    Malformed(&'static str),
    #[error("unknown opcode {0}")]
    UnknownOpcode(u16),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Request opcodes, stepping by 10 in protocol order.
#[derive(Debug, Copy, Clone, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u16)]
pub enum Opcode {
    Attr = 10,
    ReadDir = 20,
    Read = 30,
    Create = 40,
    Write = 50,
    Unlink = 60,
    Truncate = 70,
    Mkdir = 80,
    Rmdir = 90,
    Rename = 100,
    Symlink = 110,
    Link = 120,
    Readlink = 130,
}

impl Opcode {
    pub fn from_u16(value: u16) -> Result<Self> {
        num_traits::FromPrimitive::from_u16(value).ok_or(Error::UnknownOpcode(value))
    }
}

/// Response status: 0 is success, anything else is a POSIX errno the client
/// surfaces (negated) to the kernel.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Status(pub u16);

impl Status {
    pub const OK: Status = Status(0);

    pub fn is_ok(self) -> bool {
        self.0 == 0
    }

    /// Builds a status from a host [`std::io::Error`], preserving its errno
    /// where the platform exposes one instead of collapsing every failure to
    /// ENOENT.
    pub fn from_io_error(err: &std::io::Error) -> Status {
        let errno = err.raw_os_error().unwrap_or(libc::ENOENT as i32);
        Status(errno as u16)
    }

    pub fn errno(self) -> i32 {
        self.0 as i32
    }

    /// Encodes a bodyless response frame carrying just this status.
    pub fn encode_frame(self) -> Vec<u8> {
        let mut buf = MessageBuilder::new();
        buf.tag(self.0);
        buf.finish()
    }
}

/// Local target vs. external target flag carried by SYMLINK and READLINK.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TargetKind {
    Local,
    External,
}

impl TargetKind {
    pub fn as_u16(self) -> u16 {
        match self {
            TargetKind::Local => 0,
            TargetKind::External => 1,
        }
    }

    pub fn from_u16(value: u16) -> TargetKind {
        if value == 0 {
            TargetKind::Local
        } else {
            TargetKind::External
        }
    }
}

/// Entry kind as carried in the attributes record's `type` field.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum EntryType {
    Directory = 0,
    RegularFile = 1,
    Symlink = 2,
}

impl EntryType {
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    pub fn mode_bits(self) -> u32 {
        match self {
            EntryType::Directory => 0o040755,
            EntryType::RegularFile => 0o100644,
            EntryType::Symlink => 0o120644,
        }
    }
}

/// The special size substituted for zero-size symlinks so the kernel
/// allocates a usable readlink buffer.
pub const SYMLINK_PLACEHOLDER_SIZE: u64 = 4096;

/// Fixed 64-byte stat-equivalent record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attributes {
    pub fsid: u64,
    pub fileid: u64,
    pub size: u64,
    pub used: u64,
    pub kind: u32,
    pub mode: u32,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub atime: u32,
    pub mtime: u32,
    pub ctime: u32,
}

/// Byte length of the encoded attributes record.
pub const ATTRIBUTES_LEN: usize = 64;

impl Attributes {
    pub fn write_to(&self, buf: &mut MessageBuilder) {
        buf.u64(self.fsid);
        buf.u64(self.fileid);
        buf.u64(self.size);
        buf.u64(self.used);
        buf.u32(self.kind);
        buf.u32(self.mode);
        buf.u32(self.nlink);
        buf.u32(self.uid);
        buf.u32(self.gid);
        buf.u32(self.atime);
        buf.u32(self.mtime);
        buf.u32(self.ctime);
    }

    pub fn read_from(cur: &mut MessageCursor) -> Result<Attributes> {
        Ok(Attributes {
            fsid: cur.u64()?,
            fileid: cur.u64()?,
            size: cur.u64()?,
            used: cur.u64()?,
            kind: cur.u32()?,
            mode: cur.u32()?,
            nlink: cur.u32()?,
            uid: cur.u32()?,
            gid: cur.u32()?,
            atime: cur.u32()?,
            mtime: cur.u32()?,
            ctime: cur.u32()?,
        })
    }

    pub fn entry_type(&self) -> EntryType {
        match self.kind {
            0 => EntryType::Directory,
            2 => EntryType::Symlink,
            _ => EntryType::RegularFile,
        }
    }
}

/// One entry in a READDIR response: `{name_len, name (NUL-terminated), attrs}`.
#[derive(Debug, Clone)]
pub struct DirEntry {
    pub name: String,
    pub attrs: Attributes,
}

impl DirEntry {
    pub fn write_to(&self, buf: &mut MessageBuilder) {
        let name_len = (self.name.len() + 1) as u16;
        buf.u16(name_len);
        buf.cstr(&self.name);
        self.attrs.write_to(buf);
    }

    pub fn read_from(cur: &mut MessageCursor) -> Result<DirEntry> {
        let name_len = cur.u16()? as usize;
        let name = cur.cstr(name_len)?;
        let attrs = Attributes::read_from(cur)?;
        Ok(DirEntry { name, attrs })
    }
}
