use std::{io::IsTerminal, process};

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::BufReader;
use tracing::warn;

use shared_chat::{
    cli::ChatArgs,
    logging,
    session::{Session, SessionConfig},
    store::RemoteStore,
};

#[tokio::main]
async fn main() {
    logging::init_client();

    let args = ChatArgs::parse();
    let code = match run(args).await {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("{err:#}");
            1
        }
    };

    // The stdin reader may still be parked on a blocking read; exiting the
    // process is what ends it.
    process::exit(code);
}

async fn run(args: ChatArgs) -> Result<()> {
    let config: SessionConfig = args
        .session_config()?
        .with_prompt(std::io::stdin().is_terminal());

    let store = RemoteStore::connect(args.store)
        .await
        .with_context(|| format!("failed to connect to store at {}", args.store))?;

    let input = BufReader::new(tokio::io::stdin());
    Session::new(config, store, tokio::io::stdout())
        .run_until(input, interrupted())
        .await?;

    Ok(())
}

async fn interrupted() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        warn!(?error, "ctrl-c handler failed");
        std::future::pending::<()>().await;
    }
}
