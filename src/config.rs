//! CLI surface and optional TOML configuration file for both binaries.
//!
//! CLI flags always override values loaded from `--config`; the config file
//! itself is entirely optional and its absence is not an error.

use std::path::PathBuf;

use clap::Parser;
use serde::Deserialize;

/// Settings shared by both binaries that can also come from a TOML file.
#[derive(Debug, Deserialize, Default)]
struct FileConfig {
    root: Option<PathBuf>,
    host: Option<String>,
    port: Option<u16>,
    pool_size: Option<usize>,
    log_filter: Option<String>,
}

fn load_file_config(path: Option<&PathBuf>) -> anyhow::Result<FileConfig> {
    let Some(path) = path else {
        return Ok(FileConfig::default());
    };
    if !path.exists() {
        return Ok(FileConfig::default());
    }
    let contents = std::fs::read_to_string(path)?;
    Ok(toml::from_str(&contents)?)
}

/// Installs a `tracing_subscriber` with an `EnvFilter` driven by `RUST_LOG`,
/// falling back to `default_filter` when unset.
pub fn init_logging(default_filter: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[derive(Debug, Parser)]
#[command(name = "hvshare-server", about = "Exports a host directory tree to a guest over HyperV sockets")]
struct ServerArgs {
    /// Directory to export.
    #[arg(long)]
    root: Option<PathBuf>,

    /// TCP port to listen on.
    #[arg(long)]
    port: Option<u16>,

    /// Number of concurrent data connections to accept (must match the
    /// client's pool size).
    #[arg(long)]
    pool_size: Option<usize>,

    /// Optional TOML config file; CLI flags override its values.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub root: PathBuf,
    pub port: u16,
    pub pool_size: usize,
}

impl ServerConfig {
    pub const DEFAULT_PORT: u16 = 5001;
    pub const DEFAULT_POOL_SIZE: usize = 4;

    pub fn from_args() -> anyhow::Result<ServerConfig> {
        let args = ServerArgs::parse();
        let file = load_file_config(args.config.as_ref())?;

        let root = args
            .root
            .or(file.root)
            .ok_or_else(|| anyhow::anyhow!("--root (or config `root`) is required"))?;
        let port = args.port.or(file.port).unwrap_or(Self::DEFAULT_PORT);
        let pool_size = args.pool_size.or(file.pool_size).unwrap_or(Self::DEFAULT_POOL_SIZE);

        Ok(ServerConfig { root, port, pool_size })
    }
}

#[derive(Debug, Parser)]
#[command(name = "hvshare-client", about = "Mounts a host-exported directory tree inside the guest")]
struct ClientArgs {
    /// Where to mount the exported tree.
    mountpoint: PathBuf,

    /// Server host (ignored when built with the `vsock` feature in favor of `--cid`).
    #[arg(long)]
    host: Option<String>,

    /// Server port.
    #[arg(long)]
    port: Option<u16>,

    /// Number of persistent pool connections to hold for the mount's lifetime.
    #[arg(long)]
    pool_size: Option<usize>,

    /// Run in the foreground instead of daemonizing.
    #[arg(long)]
    foreground: bool,

    /// Optional TOML config file; CLI flags override its values.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub mountpoint: String,
    pub host: String,
    pub port: u16,
    pub pool_size: usize,
    pub foreground: bool,
}

impl ClientConfig {
    pub const DEFAULT_PORT: u16 = 5001;
    pub const DEFAULT_POOL_SIZE: usize = 4;
    pub const DEFAULT_HOST: &'static str = "127.0.0.1";

    pub fn from_args() -> anyhow::Result<ClientConfig> {
        let args = ClientArgs::parse();
        let file = load_file_config(args.config.as_ref())?;

        let mountpoint = args
            .mountpoint
            .to_str()
            .ok_or_else(|| anyhow::anyhow!("mountpoint must be valid utf-8"))?
            .to_string();
        let host = args.host.or(file.host).unwrap_or_else(|| Self::DEFAULT_HOST.to_string());
        let port = args.port.or(file.port).unwrap_or(Self::DEFAULT_PORT);
        let pool_size = args.pool_size.or(file.pool_size).unwrap_or(Self::DEFAULT_POOL_SIZE);

        Ok(ClientConfig { mountpoint, host, port, pool_size, foreground: args.foreground })
    }
}
