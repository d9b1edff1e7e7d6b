//! Typed request/response bodies per opcode, encoded/decoded against
//! [`super::MessageBuilder`]/[`super::MessageCursor`].

use super::{Attributes, DirEntry, MessageBuilder, MessageCursor, Opcode, Result, TargetKind};

/// A fully decoded request, one variant per [`Opcode`].
#[derive(Debug, Clone)]
pub enum Request {
    Attr { path: String },
    ReadDir { path: String },
    Read { path: String, size: u64, offset: i64 },
    Create { path: String, mode: u32 },
    Write { path: String, offset: i64, data: Vec<u8> },
    Unlink { path: String },
    Truncate { path: String, new_size: i64 },
    Mkdir { path: String, mode: u32 },
    Rmdir { path: String },
    Rename { from: String, to: String },
    Symlink { from: String, to: String, kind: TargetKind },
    Link { from: String, to: String },
    Readlink { path: String },
}

impl Request {
    pub fn opcode(&self) -> Opcode {
        match self {
            Request::Attr { .. } => Opcode::Attr,
            Request::ReadDir { .. } => Opcode::ReadDir,
            Request::Read { .. } => Opcode::Read,
            Request::Create { .. } => Opcode::Create,
            Request::Write { .. } => Opcode::Write,
            Request::Unlink { .. } => Opcode::Unlink,
            Request::Truncate { .. } => Opcode::Truncate,
            Request::Mkdir { .. } => Opcode::Mkdir,
            Request::Rmdir { .. } => Opcode::Rmdir,
            Request::Rename { .. } => Opcode::Rename,
            Request::Symlink { .. } => Opcode::Symlink,
            Request::Link { .. } => Opcode::Link,
            Request::Readlink { .. } => Opcode::Readlink,
        }
    }

    /// Encodes this request into a fully framed wire message.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = MessageBuilder::new();
        buf.tag(self.opcode() as u16);
        match self {
            Request::Attr { path }
            | Request::ReadDir { path }
            | Request::Unlink { path }
            | Request::Rmdir { path }
            | Request::Readlink { path } => {
                buf.prefixed_cstr(path);
            }
            Request::Read { path, size, offset } => {
                buf.prefixed_cstr(path);
                buf.u64(*size);
                buf.i64(*offset);
            }
            Request::Create { path, mode } | Request::Mkdir { path, mode } => {
                buf.prefixed_cstr(path);
                buf.u32(*mode);
            }
            Request::Write { path, offset, data } => {
                buf.prefixed_cstr(path);
                buf.u64(data.len() as u64);
                buf.i64(*offset);
                buf.raw(data);
            }
            Request::Truncate { path, new_size } => {
                buf.prefixed_cstr(path);
                buf.i64(*new_size);
            }
            Request::Rename { from, to } | Request::Link { from, to } => {
                buf.prefixed_cstr(from);
                buf.prefixed_cstr(to);
            }
            Request::Symlink { from, to, kind } => {
                buf.prefixed_cstr(from);
                buf.prefixed_cstr(to);
                buf.u16(kind.as_u16());
            }
        }
        buf.finish()
    }

    /// Decodes a request body given its opcode tag, as read off the wire by
    /// the server dispatcher.
    pub fn decode(opcode: Opcode, body: &[u8]) -> Result<Request> {
        let mut cur = MessageCursor::new(body);
        let request = match opcode {
            Opcode::Attr => Request::Attr { path: cur.prefixed_cstr()? },
            Opcode::ReadDir => Request::ReadDir { path: cur.prefixed_cstr()? },
            Opcode::Unlink => Request::Unlink { path: cur.prefixed_cstr()? },
            Opcode::Rmdir => Request::Rmdir { path: cur.prefixed_cstr()? },
            Opcode::Readlink => Request::Readlink { path: cur.prefixed_cstr()? },
            Opcode::Read => {
                let path = cur.prefixed_cstr()?;
                let size = cur.u64()?;
                let offset = cur.i64()?;
                Request::Read { path, size, offset }
            }
            Opcode::Create => {
                let path = cur.prefixed_cstr()?;
                let mode = cur.u32()?;
                Request::Create { path, mode }
            }
            Opcode::Mkdir => {
                let path = cur.prefixed_cstr()?;
                let mode = cur.u32()?;
                Request::Mkdir { path, mode }
            }
            Opcode::Write => {
                let path = cur.prefixed_cstr()?;
                let size = cur.u64()? as usize;
                let offset = cur.i64()?;
                let data = cur.take_bytes(size)?.to_vec();
                Request::Write { path, offset, data }
            }
            Opcode::Truncate => {
                let path = cur.prefixed_cstr()?;
                let new_size = cur.i64()?;
                Request::Truncate { path, new_size }
            }
            Opcode::Rename => {
                let from = cur.prefixed_cstr()?;
                let to = cur.prefixed_cstr()?;
                Request::Rename { from, to }
            }
            Opcode::Link => {
                let from = cur.prefixed_cstr()?;
                let to = cur.prefixed_cstr()?;
                Request::Link { from, to }
            }
            Opcode::Symlink => {
                let from = cur.prefixed_cstr()?;
                let to = cur.prefixed_cstr()?;
                let kind = TargetKind::from_u16(cur.u16()?);
                Request::Symlink { from, to, kind }
            }
        };
        Ok(request)
    }
}

/// A fully decoded, successful response body. Error responses carry no
/// payload and are represented purely by [`super::Status`] at the framing layer.
#[derive(Debug, Clone)]
pub enum Response {
    Attr(Attributes),
    ReadDir(Vec<DirEntry>),
    Read(Vec<u8>),
    Write { bytes_written: u64 },
    Readlink { target: String, kind: TargetKind },
    Empty,
}

impl Response {
    /// Encodes this response into a fully framed wire message carrying
    /// `status` in the header's tag slot (0 for success).
    pub fn encode(&self, status: super::Status) -> Vec<u8> {
        let mut buf = MessageBuilder::new();
        buf.tag(status.0);
        match self {
            Response::Attr(attrs) => attrs.write_to(&mut buf),
            Response::ReadDir(entries) => {
                for entry in entries {
                    entry.write_to(&mut buf);
                }
            }
            Response::Read(data) => {
                buf.u64(data.len() as u64);
                buf.raw(data);
            }
            Response::Write { bytes_written } => {
                buf.u64(*bytes_written);
            }
            Response::Readlink { target, kind } => {
                buf.u16(kind.as_u16());
                buf.prefixed_cstr(target);
            }
            Response::Empty => {}
        }
        buf.finish()
    }

    pub fn decode(opcode: Opcode, body: &[u8]) -> Result<Response> {
        let mut cur = MessageCursor::new(body);
        let response = match opcode {
            Opcode::Attr => Response::Attr(Attributes::read_from(&mut cur)?),
            Opcode::ReadDir => {
                let mut entries = Vec::new();
                while !cur.is_empty() {
                    entries.push(DirEntry::read_from(&mut cur)?);
                }
                Response::ReadDir(entries)
            }
            Opcode::Read => {
                let len = cur.u64()? as usize;
                let data = cur.take_bytes(len)?.to_vec();
                Response::Read(data)
            }
            Opcode::Write => Response::Write { bytes_written: cur.u64()? },
            Opcode::Readlink => {
                let kind = TargetKind::from_u16(cur.u16()?);
                let target = cur.prefixed_cstr()?;
                Response::Readlink { target, kind }
            }
            Opcode::Create
            | Opcode::Unlink
            | Opcode::Mkdir
            | Opcode::Rmdir
            | Opcode::Truncate
            | Opcode::Rename
            | Opcode::Link
            | Opcode::Symlink => Response::Empty,
        };
        Ok(response)
    }
}
