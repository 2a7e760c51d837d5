use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};

use shared_chat::{cli::StoreArgs, logging, server::StoreServer};

#[tokio::main]
async fn main() -> Result<()> {
    logging::init_server();

    let args = StoreArgs::parse();
    let listener = TcpListener::bind(args.listen)
        .await
        .with_context(|| format!("failed to bind {}", args.listen))?;
    let server = StoreServer::new(listener);
    let addr = server.local_addr()?;
    info!("store listening on {}", addr);

    if let Err(err) = server.run_until_ctrl_c().await {
        warn!("store exited with error: {err:?}");
        return Err(err);
    }

    Ok(())
}
