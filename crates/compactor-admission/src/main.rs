//! admission-controller - DNC-based admission control worker.

use anyhow::Result;
use clap::Parser;
use compactor_admission::{server, AdmissionEngine};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "admission-controller")]
#[command(author, version, about = "Admission control worker for latency-SLO storage workloads")]
struct Cli {
    /// Address to listen on
    #[arg(short, long, default_value = "0.0.0.0:9001")]
    listen: String,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let listener = TcpListener::bind(&cli.listen).await?;
    let engine = Arc::new(Mutex::new(AdmissionEngine::new()));
    server::serve(listener, engine).await
}
