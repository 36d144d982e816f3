//! placement-controller - first-fit workload placement across admission
//! workers.

use anyhow::{Context, Result};
use clap::Parser;
use compactor_placement::{server, ConcretizeContext, PlacementController};
use compactor_proto::AdmissionClient;
use compactor_trace::DeviceProfile;
use std::path::PathBuf;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "placement-controller")]
#[command(author, version, about = "Places latency-SLO workloads onto storage servers first-fit")]
struct Cli {
    /// Admission worker address; repeat for placement parallelism
    #[arg(short = 'a', long = "admission", required = true)]
    admission: Vec<String>,

    /// Enable the fast-first-fit overload pre-check on trials
    #[arg(short = 'f', long)]
    fast_first_fit: bool,

    /// Address to listen on
    #[arg(short, long, default_value = "0.0.0.0:9002")]
    listen: String,

    /// Storage device profile
    #[arg(long, default_value = "profileSSD.txt")]
    profile: PathBuf,

    /// Directory for cached arrival curves
    #[arg(long, default_value = "arrivalCurves")]
    curve_cache: PathBuf,

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

    let profile = DeviceProfile::load(&cli.profile)
        .with_context(|| format!("loading device profile {}", cli.profile.display()))?;

    let mut workers = Vec::with_capacity(cli.admission.len());
    for addr in &cli.admission {
        let client = AdmissionClient::connect(addr)
            .await
            .with_context(|| format!("connecting to admission worker {addr}"))?;
        workers.push(client);
    }

    let controller = PlacementController::start(
        workers,
        ConcretizeContext {
            curve_cache: cli.curve_cache,
            profile,
        },
        cli.fast_first_fit,
    );
    let listener = TcpListener::bind(&cli.listen).await?;
    server::serve(listener, controller).await
}
