//! 🚀 ingx-cli: the front door, the bouncer, the maitre d' of ingx.
//!
//! 🎬 *[narrator voice]* "It all started with a simple main() function..."
//! 📦 Thin wrapper: parse args, set up logging, load config, hand off to the
//! library, and explain what went wrong if it did. Like a manager. 🦆

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ingx::error::IngestError;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "ingx-cli", version, about = "Bulk-load files or stream payloads into a cluster table")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// 🚀 Run the mode described by the config (Queued, Streaming or Resume).
    Run {
        /// 🔧 TOML config, merged over INGX_* env vars. Omit to use env vars only.
        #[arg(long, short)]
        config: Option<PathBuf>,
    },
    /// ⏳ Poll one serialized operation handle until it is terminal.
    Poll {
        /// 🎟️ The handle JSON a queued run logged or wrote to its handle file.
        #[arg(long)]
        handle: String,
        #[arg(long, short)]
        config: Option<PathBuf>,
    },
}

/// 🕵️ Does anything in the chain smell like "the other side isn't there"?
fn smells_like_connection_trouble(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        let cause_str = cause.to_string();
        cause_str.contains("error sending request")
            || cause_str.contains("connection refused")
            || cause_str.contains("Connection refused")
            || cause_str.contains("tcp connect error")
            || cause_str.contains("dns error")
            || cause_str.contains("never made it")
    })
}

fn was_cancelled(err: &anyhow::Error) -> bool {
    err.chain()
        .any(|cause| matches!(cause.downcast_ref::<IngestError>(), Some(IngestError::Cancelled)))
}

fn load_config(config: Option<&PathBuf>) -> Result<ingx::app_config::AppConfig> {
    // 🔒 Validate the config file exists before we get too emotionally attached
    if let Some(path) = config {
        let exists = path.try_exists().with_context(|| {
            format!(
                "💀 couldn't check whether the configuration file exists at '{}'",
                path.display()
            )
        })?;
        if !exists {
            anyhow::bail!(
                "💀 Configuration file not found at '{}'. If it's a relative path, \
                 double-check the working directory, or use an absolute path.",
                path.display()
            );
        }
    }
    ingx::app_config::load_config(config.map(PathBuf::as_path))
        .context("💀 In ingx-cli we couldn't load the config. Take a look at the file and the INGX_* env vars.")
}

async fn execute(cli: Cli, cancel: CancellationToken) -> Result<bool> {
    match cli.command {
        Command::Run { config } => {
            let app_config = load_config(config.as_ref())?;
            let outcome = ingx::run(app_config, cancel).await?;
            for line in outcome.to_string().lines() {
                info!("🏁 {line}");
            }
            Ok(outcome.is_success())
        }
        Command::Poll { handle, config } => {
            let app_config = load_config(config.as_ref())?;
            let outcome = ingx::poll_handle(app_config, &handle, cancel).await?;
            info!("🏁 {}: {}", outcome.handle.id, outcome.summary);
            Ok(outcome.summary.status == ingx::common::IngestStatus::Succeeded)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    // 🛑 Ctrl-C flips the token; pollers and the pump notice and wind down
    let cancel = CancellationToken::new();
    let the_ctrl_c_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("🛑 Ctrl-C received, cancelling. In-flight operations keep running on the cluster.");
            the_ctrl_c_token.cancel();
        }
    });

    match execute(cli, cancel).await {
        Ok(true) => Ok(()),
        Ok(false) => {
            warn!("⚠️ finished, but not everything succeeded");
            std::process::exit(1);
        }
        Err(err) if was_cancelled(&err) => {
            warn!("🛑 cancelled before reaching a terminal state: {err}");
            std::process::exit(130);
        }
        Err(err) => {
            error!("💀 error: {}", err);
            // -- 🧅 peel the onion of sadness, one layer at a time
            for cause in err.chain().skip(1) {
                error!("⚠️  cause: {}", cause);
            }
            if smells_like_connection_trouble(&err) {
                error!(
                    "🔧 hint: looks like a service isn't reachable. Double-check the cluster \
                     and object store URLs, and that whatever answers them is actually running. ☕"
                );
            }
            std::process::exit(1);
        }
    }
}
