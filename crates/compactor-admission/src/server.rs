//! Framed RPC loop for the admission worker.
//!
//! Connections are accepted concurrently, but every request takes the one
//! engine lock, so graph mutations and LP solves are serialized exactly as
//! if the worker were single-threaded. Solves can run for minutes on dense
//! groups; handlers run on the blocking pool so the accept loop stays live.

use crate::engine::{AdmissionEngine, EnforcerPush};
use compactor_proto::{read_message, write_message, AdmissionRequest, EnforcerClient};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

/// Serves admission RPCs forever.
pub async fn serve(listener: TcpListener, engine: Arc<Mutex<AdmissionEngine>>) -> anyhow::Result<()> {
    info!(addr = %listener.local_addr()?, "admission worker listening");
    loop {
        let (stream, peer) = listener.accept().await?;
        debug!(%peer, "connection accepted");
        let engine = engine.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, engine).await {
                warn!(%peer, error = %e, "connection failed");
            }
        });
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    engine: Arc<Mutex<AdmissionEngine>>,
) -> anyhow::Result<()> {
    while let Some(request) = read_message::<_, AdmissionRequest>(&mut stream).await? {
        let engine = engine.clone();
        let (response, pushes) =
            tokio::task::spawn_blocking(move || engine.lock().handle(request)).await?;
        write_message(&mut stream, &response).await?;
        for push in pushes {
            tokio::spawn(deliver_push(push));
        }
    }
    Ok(())
}

/// Delivers one enforcer update. Enforcement is best-effort from the
/// admission worker's point of view; failures are logged, not propagated.
async fn deliver_push(push: EnforcerPush) {
    let client = EnforcerClient::new();
    let addr = push.enforcer.addr.clone();
    let result = match &push.parameters {
        Some(parameters) => client
            .update_client(&addr, &push.enforcer, parameters)
            .await
            .map(|_| ()),
        None => client.remove_client(&addr, &push.enforcer).await.map(|_| ()),
    };
    if let Err(e) = result {
        warn!(enforcer = %addr, error = %e, "enforcer push failed");
    }
}
