mod ambience;
mod args;
mod capture;
mod error;
mod ffmpeg;
mod mix;
mod narration;
mod panel;
mod pipeline;
mod provider;
mod score;
mod speech;
mod surface;
mod timeline;

use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::args::{Args, Options};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("info") // set to "debug" for more logs
        .init();

    dotenvy::dotenv().ok();

    let args = Args::parse();
    let opts = match Options::resolve(args) {
        Ok(opts) => opts,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    info!(
        "Starting explainer video pipeline for '{}' ({} formats)",
        opts.explainer,
        opts.formats.len()
    );

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; canceling the run");
            let _ = cancel_tx.send(true);
        }
    });

    if let Err(e) = pipeline::run(&opts, cancel_rx).await {
        error!("{:#}", e);
        std::process::exit(1);
    }

    info!("Process complete.");
    Ok(())
}
