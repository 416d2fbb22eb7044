mod client;
mod protocol;
mod stream;
mod transcript;
mod ui;

use clap::Parser;
use client::ChatClient;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Terminal chat client for a streaming RAG backend.
#[derive(Parser)]
#[command(name = "ragline", version)]
struct Cli {
    /// Base URL of the chat backend.
    #[arg(long, env = "RAGLINE_URL", default_value = "http://localhost:8000")]
    url: String,

    /// Where to write logs; the terminal itself belongs to the UI.
    #[arg(long, env = "RAGLINE_LOG", default_value = "ragline.log")]
    log_file: PathBuf,
}

fn init_logging(path: &Path) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ragline=info")),
        )
        .with_writer(std::sync::Mutex::new(file))
        .with_ansi(false)
        .init();

    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    init_logging(&cli.log_file)?;
    tracing::info!(url = %cli.url, "starting ragline");

    let client = ChatClient::new(&cli.url);
    ui::run_tui(client)
}
