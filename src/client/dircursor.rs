//! Per-open-directory client state.
//!
//! Owns the decoded listing buffer for the duration of an
//! opendir-readdir*-releasedir sequence, transferring ownership from the
//! per-call response to the cursor on the first `readdir` and releasing it
//! on `releasedir`.

use crate::wire::DirEntry;

pub struct DirCursor {
    entries: Option<Vec<DirEntry>>,
}

impl DirCursor {
    pub fn new() -> Self {
        Self { entries: None }
    }

    pub fn is_loaded(&self) -> bool {
        self.entries.is_some()
    }

    pub fn load(&mut self, entries: Vec<DirEntry>) {
        self.entries = Some(entries);
    }

    /// Entries starting at 1-based `offset` (i.e. skip the first `offset`
    /// entries already handed to the kernel).
    pub fn entries_from(&self, offset: i64) -> &[DirEntry] {
        let skip = offset.max(0) as usize;
        match &self.entries {
            Some(entries) if skip < entries.len() => &entries[skip..],
            _ => &[],
        }
    }
}

impl Default for DirCursor {
    fn default() -> Self {
        Self::new()
    }
}
