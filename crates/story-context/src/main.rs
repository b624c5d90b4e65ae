// story-context/src/main.rs

#[cfg(feature = "cli")]
use clap::Parser;
#[cfg(feature = "cli")]
use story_context::{config::Config, run_server, telemetry};

/// Story chat server with incremental summaries and token-budgeted context.
#[cfg(feature = "cli")]
#[derive(Debug, Parser)]
#[command(name = "story-context", version, about)]
struct Args {
    /// Address to bind (overrides API_HOST)
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (overrides API_PORT)
    #[arg(long)]
    port: Option<u16>,

    /// SQLite database file (overrides DB_PATH)
    #[arg(long)]
    db_path: Option<std::path::PathBuf>,
}

#[cfg(feature = "cli")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init_tracing();
    let args = Args::parse();

    let mut cfg = Config::from_env()?;
    if let Some(host) = args.host {
        cfg.api_host = host;
    }
    if let Some(port) = args.port {
        cfg.api_port = port;
    }
    if let Some(db_path) = args.db_path {
        cfg.db_path = db_path;
    }

    run_server(cfg).await
}

#[cfg(not(feature = "cli"))]
fn main() {
    println!("CLI feature not enabled. Enable with --features cli");
}
