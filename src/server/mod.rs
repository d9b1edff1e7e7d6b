//! Host-side half: translates wire requests into native filesystem calls
//! against an exported directory tree.

mod attrs;
mod cache;
mod dispatcher;
mod handlers;
pub mod pathmap;
mod watch;

use std::sync::Arc;

use tracing::{error, info};

use crate::config::ServerConfig;
use crate::transport::Listener;
use cache::AttrCache;
use dispatcher::Dispatcher;
use pathmap::PathMap;

/// Binds the configured port and serves guest sessions until the process is
/// killed.
pub async fn run(config: ServerConfig) -> anyhow::Result<()> {
    let root = config.root.canonicalize()?;
    info!(root = %root.display(), port = config.port, pool_size = config.pool_size, "starting server");

    let pathmap = PathMap::new(root);
    let attr_cache = Arc::new(AttrCache::new());

    let (tx, rx) = async_channel::unbounded();
    let watch = watch::spawn(pathmap.clone(), attr_cache.clone(), tx).map_err(|err| {
        error!(%err, "failed to start filesystem watch");
        err
    })?;

    let dispatcher = Dispatcher::new(pathmap, attr_cache, config.pool_size);
    let listener = Listener::bind(config.port).await?;

    let result = dispatcher.run(listener, rx).await;
    drop(watch);
    result
}
