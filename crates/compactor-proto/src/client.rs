//! Async clients for the three wire peers.
//!
//! Each client owns one TCP connection and issues strictly serialized
//! request/response exchanges on it. Deadlines default to hours: trial
//! admissions can legitimately sit behind minutes of LP solving.

use crate::framing::{read_message, write_message};
use crate::message::{
    AdmissionRequest, AdmissionResponse, AdmissionStatus, EnforcerRequest, EnforcerResponse,
    PlacementRequest, PlacementResponse,
};
use crate::{ProtoError, Result};
use compactor_dnc::{ClientConfig, EnforcerConfig, FlowParameters, QueueConfig, WorkloadSpec};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tokio::net::{TcpStream, ToSocketAddrs};

/// Default RPC deadline; dense coupling groups can take minutes per solve.
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(12 * 60 * 60);

async fn call<Req, Resp>(stream: &mut TcpStream, timeout: Duration, request: &Req) -> Result<Resp>
where
    Req: Serialize,
    Resp: DeserializeOwned,
{
    let exchange = async {
        write_message(stream, request).await?;
        read_message::<_, Resp>(stream)
            .await?
            .ok_or(ProtoError::UnexpectedEof)
    };
    tokio::time::timeout(timeout, exchange)
        .await
        .map_err(|_| ProtoError::Timeout(timeout))?
}

/// Connection to one admission worker.
pub struct AdmissionClient {
    stream: TcpStream,
    timeout: Duration,
}

impl AdmissionClient {
    /// Connects to an admission worker.
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self> {
        Ok(Self {
            stream: TcpStream::connect(addr).await?,
            timeout: DEFAULT_RPC_TIMEOUT,
        })
    }

    /// Overrides the RPC deadline.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Registers a queue.
    pub async fn add_queue(&mut self, queue: &QueueConfig) -> Result<AdmissionStatus> {
        let response: AdmissionResponse = call(
            &mut self.stream,
            self.timeout,
            &AdmissionRequest::AddQueue { queue: queue.clone() },
        )
        .await?;
        Ok(response.status)
    }

    /// Removes an empty queue.
    pub async fn del_queue(&mut self, name: &str) -> Result<AdmissionStatus> {
        let response: AdmissionResponse = call(
            &mut self.stream,
            self.timeout,
            &AdmissionRequest::DelQueue { name: name.to_string() },
        )
        .await?;
        Ok(response.status)
    }

    /// Admission-checks a batch of clients; they stay in the worker's graph
    /// when admitted.
    pub async fn add_clients(
        &mut self,
        clients: &[ClientConfig],
        fast_first_fit: bool,
    ) -> Result<AdmissionResponse> {
        call(
            &mut self.stream,
            self.timeout,
            &AdmissionRequest::AddClients {
                clients: clients.to_vec(),
                fast_first_fit,
            },
        )
        .await
    }

    /// Convenience wrapper for single-client trials.
    pub async fn add_client(
        &mut self,
        client: &ClientConfig,
        fast_first_fit: bool,
    ) -> Result<AdmissionResponse> {
        self.add_clients(std::slice::from_ref(client), fast_first_fit)
            .await
    }

    /// Removes a client and its flows.
    pub async fn del_client(&mut self, name: &str) -> Result<AdmissionStatus> {
        let response: AdmissionResponse = call(
            &mut self.stream,
            self.timeout,
            &AdmissionRequest::DelClient { name: name.to_string() },
        )
        .await?;
        Ok(response.status)
    }
}

/// Connection to the placement controller.
pub struct PlacementClient {
    stream: TcpStream,
    timeout: Duration,
}

impl PlacementClient {
    /// Connects to the placement controller.
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self> {
        Ok(Self {
            stream: TcpStream::connect(addr).await?,
            timeout: DEFAULT_RPC_TIMEOUT,
        })
    }

    /// Overrides the RPC deadline.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Places a batch of workloads first-fit across the server pool.
    pub async fn add_clients(
        &mut self,
        clients: &[WorkloadSpec],
        addr_prefix: &str,
        enforce: bool,
    ) -> Result<PlacementResponse> {
        call(
            &mut self.stream,
            self.timeout,
            &PlacementRequest::AddClients {
                clients: clients.to_vec(),
                addr_prefix: addr_prefix.to_string(),
                enforce,
            },
        )
        .await
    }

    /// Removes placed workloads.
    pub async fn del_clients(&mut self, names: &[String]) -> Result<PlacementResponse> {
        call(
            &mut self.stream,
            self.timeout,
            &PlacementRequest::DelClients { names: names.to_vec() },
        )
        .await
    }

    /// Registers a client VM.
    pub async fn add_client_vm(&mut self, host: &str, vm: &str) -> Result<PlacementResponse> {
        call(
            &mut self.stream,
            self.timeout,
            &PlacementRequest::AddClientVm {
                host: host.to_string(),
                vm: vm.to_string(),
            },
        )
        .await
    }

    /// Unregisters a client VM.
    pub async fn del_client_vm(&mut self, host: &str, vm: &str) -> Result<PlacementResponse> {
        call(
            &mut self.stream,
            self.timeout,
            &PlacementRequest::DelClientVm {
                host: host.to_string(),
                vm: vm.to_string(),
            },
        )
        .await
    }

    /// Registers a server VM.
    pub async fn add_server_vm(&mut self, host: &str, vm: &str) -> Result<PlacementResponse> {
        call(
            &mut self.stream,
            self.timeout,
            &PlacementRequest::AddServerVm {
                host: host.to_string(),
                vm: vm.to_string(),
            },
        )
        .await
    }

    /// Unregisters a server VM.
    pub async fn del_server_vm(&mut self, host: &str, vm: &str) -> Result<PlacementResponse> {
        call(
            &mut self.stream,
            self.timeout,
            &PlacementRequest::DelServerVm {
                host: host.to_string(),
                vm: vm.to_string(),
            },
        )
        .await
    }
}

/// One-shot pushes to a traffic enforcer. Enforcers are external; each push
/// opens a fresh connection to the configured address.
pub struct EnforcerClient {
    timeout: Duration,
}

impl Default for EnforcerClient {
    fn default() -> Self {
        Self::new()
    }
}

impl EnforcerClient {
    pub fn new() -> Self {
        Self {
            timeout: Duration::from_secs(60),
        }
    }

    /// Pushes priority and rate-limiter configuration for one flow.
    pub async fn update_client(
        &self,
        addr: &str,
        enforcer: &EnforcerConfig,
        parameters: &FlowParameters,
    ) -> Result<EnforcerResponse> {
        let mut stream = TcpStream::connect(addr).await?;
        call(
            &mut stream,
            self.timeout,
            &EnforcerRequest::UpdateClient {
                enforcer: enforcer.clone(),
                parameters: parameters.clone(),
            },
        )
        .await
    }

    /// Drops enforcement state for one flow.
    pub async fn remove_client(
        &self,
        addr: &str,
        enforcer: &EnforcerConfig,
    ) -> Result<EnforcerResponse> {
        let mut stream = TcpStream::connect(addr).await?;
        call(
            &mut stream,
            self.timeout,
            &EnforcerRequest::RemoveClient {
                enforcer: enforcer.clone(),
            },
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::AdmissionStatus;
    use tokio::net::TcpListener;

    /// A minimal admission peer that answers every request with a canned
    /// status.
    async fn canned_server(listener: TcpListener, status: AdmissionStatus) {
        let (mut stream, _) = listener.accept().await.unwrap();
        while let Some(_request) = read_message::<_, AdmissionRequest>(&mut stream)
            .await
            .unwrap()
        {
            let response = AdmissionResponse {
                status,
                admitted: status == AdmissionStatus::Success,
            };
            write_message(&mut stream, &response).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_admission_client_exchanges() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(canned_server(listener, AdmissionStatus::Success));

        let mut client = AdmissionClient::connect(addr).await.unwrap();
        let status = client
            .add_queue(&QueueConfig { name: "Q0".into(), bandwidth: 1.0 })
            .await
            .unwrap();
        assert_eq!(status, AdmissionStatus::Success);
        let response = client.add_clients(&[], false).await.unwrap();
        assert!(response.admitted);
        let status = client.del_client("C0").await.unwrap();
        assert_eq!(status, AdmissionStatus::Success);
        drop(client);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_error_status_passthrough() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(canned_server(listener, AdmissionStatus::ErrQueueNameInUse));

        let mut client = AdmissionClient::connect(addr).await.unwrap();
        let status = client
            .add_queue(&QueueConfig { name: "Q0".into(), bandwidth: 1.0 })
            .await
            .unwrap();
        assert_eq!(status, AdmissionStatus::ErrQueueNameInUse);
        drop(client);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_server_hangup_is_unexpected_eof() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            drop(stream);
        });
        let mut client = AdmissionClient::connect(addr).await.unwrap();
        let got = client.del_client("C0").await;
        assert!(matches!(
            got,
            Err(ProtoError::UnexpectedEof) | Err(ProtoError::Io(_))
        ));
        server.await.unwrap();
    }
}
