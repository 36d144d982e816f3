//! Request, response, and status types.

use compactor_dnc::{ClientConfig, EnforcerConfig, FlowParameters, QueueConfig, WorkloadSpec};
use serde::{Deserialize, Serialize};

/// Admission service status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdmissionStatus {
    #[serde(rename = "SUCCESS")]
    Success,
    #[serde(rename = "ERR_MISSING_ARGUMENT")]
    ErrMissingArgument,
    #[serde(rename = "ERR_INVALID_ARGUMENT")]
    ErrInvalidArgument,
    #[serde(rename = "ERR_FLOW_NAME_IN_USE")]
    ErrFlowNameInUse,
    #[serde(rename = "ERR_FLOW_NAME_NONEXISTENT")]
    ErrFlowNameNonexistent,
    #[serde(rename = "ERR_CLIENT_NAME_IN_USE")]
    ErrClientNameInUse,
    #[serde(rename = "ERR_CLIENT_NAME_NONEXISTENT")]
    ErrClientNameNonexistent,
    #[serde(rename = "ERR_QUEUE_NAME_IN_USE")]
    ErrQueueNameInUse,
    #[serde(rename = "ERR_QUEUE_NAME_NONEXISTENT")]
    ErrQueueNameNonexistent,
    #[serde(rename = "ERR_QUEUE_HAS_ACTIVE_FLOWS")]
    ErrQueueHasActiveFlows,
}

/// Placement service status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlacementStatus {
    #[serde(rename = "SUCCESS")]
    Success,
    #[serde(rename = "ERR_INVALID_ARGUMENT")]
    ErrInvalidArgument,
    #[serde(rename = "ERR_CLIENT_VM_ALREADY_EXISTS")]
    ErrClientVmAlreadyExists,
    #[serde(rename = "ERR_CLIENT_VM_NONEXISTENT")]
    ErrClientVmNonexistent,
    #[serde(rename = "ERR_SERVER_VM_ALREADY_EXISTS")]
    ErrServerVmAlreadyExists,
    #[serde(rename = "ERR_SERVER_VM_NONEXISTENT")]
    ErrServerVmNonexistent,
    #[serde(rename = "ERR_SERVER_VM_IN_USE")]
    ErrServerVmInUse,
}

/// Requests accepted by an admission worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum AdmissionRequest {
    /// Register a queue.
    AddQueue { queue: QueueConfig },
    /// Remove an empty queue.
    DelQueue { name: String },
    /// Admission-check a batch of clients and add them if they fit.
    #[serde(rename_all = "camelCase")]
    AddClients {
        clients: Vec<ClientConfig>,
        fast_first_fit: bool,
    },
    /// Remove a client and its flows.
    DelClient { name: String },
}

/// Response from an admission worker.
///
/// `admitted` only carries meaning for [`AdmissionRequest::AddClients`]:
/// a status of `SUCCESS` with `admitted: false` is a valid "no".
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AdmissionResponse {
    pub status: AdmissionStatus,
    #[serde(default)]
    pub admitted: bool,
}

/// One committed placement, echoed back to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlacementRecord {
    pub client_host: String,
    pub client_vm: String,
    pub server_host: String,
    pub server_vm: String,
}

/// Requests accepted by the placement controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum PlacementRequest {
    /// Place a batch of workloads, first fit across the server pool.
    #[serde(rename_all = "camelCase")]
    AddClients {
        clients: Vec<WorkloadSpec>,
        addr_prefix: String,
        enforce: bool,
    },
    /// Remove placed workloads.
    DelClients { names: Vec<String> },
    /// Register a client VM.
    #[serde(rename_all = "camelCase")]
    AddClientVm { host: String, vm: String },
    /// Unregister a client VM.
    #[serde(rename_all = "camelCase")]
    DelClientVm { host: String, vm: String },
    /// Register a server VM.
    #[serde(rename_all = "camelCase")]
    AddServerVm { host: String, vm: String },
    /// Unregister a server VM.
    #[serde(rename_all = "camelCase")]
    DelServerVm { host: String, vm: String },
}

/// Response from the placement controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlacementResponse {
    pub status: PlacementStatus,
    #[serde(default)]
    pub admitted: bool,
    /// Per-client placements, in request order; empty on rejection.
    #[serde(default)]
    pub placements: Vec<PlacementRecord>,
}

impl PlacementResponse {
    /// A plain status reply with no placements.
    pub fn status(status: PlacementStatus) -> Self {
        Self {
            status,
            admitted: false,
            placements: Vec::new(),
        }
    }
}

/// Push messages to a traffic enforcer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum EnforcerRequest {
    /// Configure priority and rate limiters for one flow.
    UpdateClient {
        enforcer: EnforcerConfig,
        parameters: FlowParameters,
    },
    /// Drop enforcement state for one flow.
    RemoveClient { enforcer: EnforcerConfig },
}

/// Acknowledgment from an enforcer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EnforcerResponse {
    pub ok: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_wire_names() {
        assert_eq!(
            serde_json::to_string(&AdmissionStatus::Success).unwrap(),
            "\"SUCCESS\""
        );
        assert_eq!(
            serde_json::to_string(&AdmissionStatus::ErrQueueHasActiveFlows).unwrap(),
            "\"ERR_QUEUE_HAS_ACTIVE_FLOWS\""
        );
        assert_eq!(
            serde_json::to_string(&PlacementStatus::ErrServerVmInUse).unwrap(),
            "\"ERR_SERVER_VM_IN_USE\""
        );
    }

    #[test]
    fn test_add_clients_request_shape() {
        let json = r#"{
            "op": "addClients",
            "clients": [],
            "fastFirstFit": true
        }"#;
        let request: AdmissionRequest = serde_json::from_str(json).unwrap();
        assert!(matches!(
            request,
            AdmissionRequest::AddClients { fast_first_fit: true, clients } if clients.is_empty()
        ));
    }

    #[test]
    fn test_placement_response_defaults() {
        let response: PlacementResponse = serde_json::from_str(r#"{"status":"SUCCESS"}"#).unwrap();
        assert_eq!(response.status, PlacementStatus::Success);
        assert!(!response.admitted);
        assert!(response.placements.is_empty());
    }

    #[test]
    fn test_placement_record_field_names() {
        let record = PlacementRecord {
            client_host: "c0".into(),
            client_vm: "1".into(),
            server_host: "s0".into(),
            server_vm: "2".into(),
        };
        let text = serde_json::to_string(&record).unwrap();
        assert!(text.contains("\"clientHost\""));
        assert!(text.contains("\"serverVM\"") || text.contains("\"serverVm\""));
    }
}
