use hvshare::config::{self, ServerConfig};

#[tokio::main]
async fn main() {
    config::init_logging("hvshare_server=info,hvshare=info");

    let config = match ServerConfig::from_args() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("hvshare-server: {err}");
            std::process::exit(1);
        }
    };

    if let Err(err) = hvshare::server::run(config).await {
        tracing::error!(%err, "server exited with an error");
        std::process::exit(1);
    }
}
