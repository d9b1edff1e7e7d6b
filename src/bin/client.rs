use hvshare::config::{self, ClientConfig};

#[tokio::main]
async fn main() {
    config::init_logging("hvshare_client=info,hvshare=info");

    let config = match ClientConfig::from_args() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("hvshare-client: {err}");
            std::process::exit(1);
        }
    };

    if !std::path::Path::new(&config.mountpoint).is_dir() {
        eprintln!("hvshare-client: mountpoint does not exist or is not a directory");
        std::process::exit(1);
    }

    if let Err(err) = hvshare::client::run(config).await {
        tracing::error!(%err, "mount exited with an error");
        std::process::exit(1);
    }
}
