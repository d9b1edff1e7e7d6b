//! Guest-side peer: registers with the guest kernel's FUSE framework and
//! forwards each VFS callback over the wire to the host.

mod dircursor;
mod filesystem;
mod inode;
pub mod invalidation;
mod pathtrans;
pub mod pool;
mod roundtrip;

pub use filesystem::HvShareFs;
pub use pool::Pool;

use std::path::Path;
use std::sync::Arc;

use fuser::MountOption;
use tracing::info;

use crate::config::ClientConfig;
use crate::transport::Endpoint;
use inode::InodeTable;

/// Connects the data pool and invalidation channel, then blocks the calling
/// thread mounting the filesystem until it is unmounted. This is the body of
/// `hvshare-client`'s `main`.
pub async fn run(config: ClientConfig) -> anyhow::Result<()> {
    let endpoint = Endpoint::Tcp { host: config.host.clone(), port: config.port };

    let pool = Arc::new(Pool::connect(&endpoint, config.pool_size).await?);
    let invalidation_conn = endpoint.connect().await?;

    let inodes = Arc::new(InodeTable::new());
    inodes.init_root().await;

    let options = vec![
        MountOption::FSName("hvshare".to_string()),
        MountOption::DefaultPermissions,
        MountOption::AutoUnmount,
    ];

    let runtime = tokio::runtime::Handle::current();
    let fs = HvShareFs::new(runtime, pool.clone(), inodes.clone(), config.mountpoint.clone());

    info!(mountpoint = %config.mountpoint, "mounting");

    let mountpoint = config.mountpoint.clone();
    let session = tokio::task::spawn_blocking(move || {
        fuser::Session::new(fs, Path::new(&mountpoint), &options)
    })
    .await??;

    let notifier = session.notifier();
    let invalidation_task = invalidation::spawn(invalidation_conn, notifier, inodes.clone());

    let run_result = tokio::task::spawn_blocking(move || session.run()).await?;

    pool.shutdown();
    invalidation_task.abort();
    run_result?;
    Ok(())
}
