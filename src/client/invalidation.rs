//! Background reader for the dedicated invalidation connection.
//!
//! Unidirectional, server -> client: each message carries a guest-relative
//! path whose cached attributes/entries the kernel must evict. The client
//! never sends on this connection.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::client::inode::InodeTable;
use crate::transport::BoxedStream;
use crate::wire::read_frame;

/// Spawns the invalidation reader loop. Returns a handle the mount driver can
/// await at shutdown.
pub fn spawn(
    mut connection: BoxedStream,
    notifier: fuser::Notifier,
    inodes: Arc<InodeTable>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match read_frame(&mut connection).await {
                Ok((_tag, body)) => {
                    let mut cur = crate::wire::MessageCursor::new(&body);
                    let path = match cur.prefixed_cstr() {
                        Ok(path) => path,
                        Err(_) => {
                            warn!("invalidation channel carried a malformed path, ignoring");
                            continue;
                        }
                    };
                    invalidate(&notifier, &inodes, &path).await;
                }
                Err(_) => {
                    debug!("invalidation channel closed, host is gone");
                    break;
                }
            }
        }
    })
}

async fn invalidate(notifier: &fuser::Notifier, inodes: &InodeTable, path: &str) {
    let (parent, name) = match path.rsplit_once('/') {
        Some((parent, name)) if !name.is_empty() => {
            (if parent.is_empty() { "/" } else { parent }, name)
        }
        _ => return,
    };

    if let Some(parent_ino) = inodes.ino_of(parent).await {
        let _ = notifier.inval_entry(parent_ino, std::ffi::OsStr::new(name));
    }
    if let Some(ino) = inodes.ino_of(path).await {
        let _ = notifier.inval_inode(ino, 0, 0);
    }
}
