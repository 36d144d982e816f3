//! Framed RPC loop for the placement controller.

use crate::controller::PlacementController;
use crate::PlacementError;
use compactor_proto::{
    read_message, write_message, PlacementRequest, PlacementResponse, PlacementStatus,
};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

/// Serves placement RPCs forever.
pub async fn serve(listener: TcpListener, controller: Arc<PlacementController>) -> anyhow::Result<()> {
    info!(addr = %listener.local_addr()?, workers = controller.worker_count(), "placement controller listening");
    loop {
        let (stream, peer) = listener.accept().await?;
        debug!(%peer, "connection accepted");
        let controller = controller.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, controller).await {
                warn!(%peer, error = %e, "connection failed");
            }
        });
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    controller: Arc<PlacementController>,
) -> anyhow::Result<()> {
    while let Some(request) = read_message::<_, PlacementRequest>(&mut stream).await? {
        let response = dispatch(&controller, request).await;
        write_message(&mut stream, &response).await?;
    }
    Ok(())
}

async fn dispatch(controller: &PlacementController, request: PlacementRequest) -> PlacementResponse {
    match request {
        PlacementRequest::AddClients {
            clients,
            addr_prefix,
            enforce,
        } => match controller.add_clients(&clients, &addr_prefix, enforce).await {
            Ok((admitted, placements)) => PlacementResponse {
                status: PlacementStatus::Success,
                admitted,
                placements,
            },
            Err(e) => {
                warn!(error = %e, "placement batch failed");
                PlacementResponse::status(error_status(&e))
            }
        },
        PlacementRequest::DelClients { names } => match controller.del_clients(&names).await {
            Ok(()) => PlacementResponse::status(PlacementStatus::Success),
            Err(e) => {
                warn!(error = %e, "delete batch failed");
                PlacementResponse::status(error_status(&e))
            }
        },
        PlacementRequest::AddClientVm { host, vm } => {
            vm_response(controller.add_client_vm(&host, &vm).await)
        }
        PlacementRequest::DelClientVm { host, vm } => {
            vm_response(controller.del_client_vm(&host, &vm).await)
        }
        PlacementRequest::AddServerVm { host, vm } => {
            vm_response(controller.add_server_vm(&host, &vm).await)
        }
        PlacementRequest::DelServerVm { host, vm } => {
            vm_response(controller.del_server_vm(&host, &vm).await)
        }
    }
}

fn vm_response(result: crate::Result<PlacementStatus>) -> PlacementResponse {
    match result {
        Ok(status) => PlacementResponse::status(status),
        Err(e) => {
            warn!(error = %e, "VM management failed");
            PlacementResponse::status(error_status(&e))
        }
    }
}

fn error_status(_e: &PlacementError) -> PlacementStatus {
    // The placement wire has no internal-error code; anything that is not a
    // clean status comes back as an invalid-argument failure.
    PlacementStatus::ErrInvalidArgument
}
