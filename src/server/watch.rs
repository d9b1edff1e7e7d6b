//! Filesystem-watch invalidation producer.
//!
//! Watches the exported root recursively and turns change events into
//! guest-relative paths fed to an [`async_channel`], drained by both the
//! attribute cache (to evict stale entries) and the invalidation-channel
//! writer (to push them to the client).

use std::sync::Arc;

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tracing::warn;

use crate::server::cache::AttrCache;
use crate::server::pathmap::PathMap;

/// Owns the underlying OS watch handle so it is not dropped (and stopped)
/// while the server is running.
pub struct FsWatch {
    _watcher: RecommendedWatcher,
}

/// Starts watching `pathmap`'s root. Each changed path evicts the attribute
/// cache entry keyed on its host path directly (no round-trip through the
/// channel needed for that), and its guest-relative translation is sent on
/// `events` for the invalidation-channel writer to push to the client.
pub fn spawn(
    pathmap: PathMap,
    attr_cache: Arc<AttrCache>,
    events: async_channel::Sender<String>,
) -> notify::Result<FsWatch> {
    let watcher_pathmap = pathmap.clone();
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
        let event = match res {
            Ok(event) => event,
            Err(err) => {
                warn!(%err, "filesystem watch error");
                return;
            }
        };
        for host_path in event.paths {
            attr_cache.invalidate(&host_path);
            if let Some(guest_path) = watcher_pathmap.to_guest(&host_path) {
                if events.send_blocking(guest_path).is_err() {
                    // Receiver dropped; the server is shutting down.
                    break;
                }
            }
        }
    })?;

    watcher.watch(pathmap.root(), RecursiveMode::Recursive)?;

    Ok(FsWatch { _watcher: watcher })
}
