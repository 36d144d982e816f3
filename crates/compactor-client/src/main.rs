//! placement-client - drives workload placement from a topology file.
//!
//! Registers the topology's VM pools with the placement controller, then
//! adds (or removes) workloads according to an optional events file. The
//! topology, updated with each placement result, is written to the output
//! path at the end and on SIGINT/SIGTERM.

mod events;

use anyhow::{Context, Result};
use clap::Parser;
use compactor_placement::Topology;
use compactor_proto::PlacementClient;
use events::{default_events, parse_events};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::warn;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "placement-client")]
#[command(author, version, about = "Places the workloads of a topology file onto the fleet")]
struct Cli {
    /// Topology file describing workloads and VM pools
    #[arg(short = 't', long = "topology")]
    topology: PathBuf,

    /// Output file for the topology with placement results
    #[arg(short = 'o', long = "output")]
    output: PathBuf,

    /// Placement controller address
    #[arg(short = 's', long = "server")]
    server: String,

    /// Events file of add/remove cycles; default adds every workload once
    #[arg(short = 'e', long = "events")]
    events: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn write_output(topology: &Mutex<Topology>, path: &PathBuf) {
    let topology = match topology.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    if let Err(e) = topology.store(path) {
        warn!(output = %path.display(), error = %e, "failed to write placement results");
    }
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

    let topology = Topology::load(&cli.topology)
        .with_context(|| format!("loading topology {}", cli.topology.display()))?;
    let events = match &cli.events {
        Some(path) => parse_events(path)
            .with_context(|| format!("loading events {}", path.display()))?,
        None => default_events(topology.clients.len()),
    };

    let topology = Arc::new(Mutex::new(topology));

    // Partial results survive an interrupted experiment.
    {
        let topology = topology.clone();
        let output = cli.output.clone();
        tokio::spawn(async move {
            let interrupted = async {
                #[cfg(unix)]
                {
                    let mut term =
                        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
                    tokio::select! {
                        r = tokio::signal::ctrl_c() => r,
                        _ = term.recv() => Ok(()),
                    }
                }
                #[cfg(not(unix))]
                {
                    tokio::signal::ctrl_c().await
                }
            };
            if interrupted.await.is_ok() {
                write_output(&topology, &output);
                std::process::exit(0);
            }
        });
    }

    let mut client = PlacementClient::connect(&cli.server)
        .await
        .with_context(|| format!("connecting to placement controller {}", cli.server))?;

    // Register the VM pools.
    let (client_vms, server_vms) = {
        let topology = topology.lock().unwrap_or_else(|p| p.into_inner());
        (topology.client_vms.clone(), topology.server_vms.clone())
    };
    for vm in &client_vms {
        client.add_client_vm(&vm.client_host, &vm.client_vm).await?;
    }
    for vm in &server_vms {
        client.add_server_vm(&vm.server_host, &vm.server_vm).await?;
    }

    // Drive the event schedule.
    for event in events {
        let (workload, addr_prefix, enforce) = {
            let topology = topology.lock().unwrap_or_else(|p| p.into_inner());
            let Some(workload) = topology.clients.get(event.index) else {
                warn!(index = event.index, "event references a workload outside the topology");
                continue;
            };
            (workload.clone(), topology.addr_prefix.clone(), topology.enforce)
        };
        if event.add {
            let response = client
                .add_clients(std::slice::from_ref(&workload), &addr_prefix, enforce)
                .await?;
            if let Some(record) = response.placements.first().filter(|_| response.admitted) {
                println!(
                    "Placed {} ({}, {}) -> ({}, {})",
                    workload.name,
                    record.client_host,
                    record.client_vm,
                    record.server_host,
                    record.server_vm
                );
                let mut topology = topology.lock().unwrap_or_else(|p| p.into_inner());
                let w = &mut topology.clients[event.index];
                w.admitted = true;
                w.client_host = Some(record.client_host.clone());
                w.client_vm = Some(record.client_vm.clone());
                w.server_host = Some(record.server_host.clone());
                w.server_vm = Some(record.server_vm.clone());
            } else {
                println!("Rejected {}", workload.name);
            }
        } else {
            client.del_clients(&[workload.name.clone()]).await?;
            let mut topology = topology.lock().unwrap_or_else(|p| p.into_inner());
            let w = &mut topology.clients[event.index];
            w.admitted = false;
            w.client_host = None;
            w.client_vm = None;
            w.server_host = None;
            w.server_vm = None;
        }
    }

    write_output(&topology, &cli.output);
    Ok(())
}
