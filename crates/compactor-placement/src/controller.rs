//! The placement controller.
//!
//! One controller fronts N admission workers, each pinned to its own
//! connection for the life of the process. A placement publishes a work
//! queue of candidate `(server_host, server_vm)` slots in deterministic
//! order; worker tasks pop indices, run a trial admission on their worker,
//! roll the trial back, and report. The lowest successful index wins,
//! independent of interleaving. Once any success lands, the rest of the
//! queue is cancelled by advancing `next_index` past the end; in-flight
//! trials still finish and roll back.
//!
//! Workloads sharing a server are steered onto the same client host: their
//! performance is already correlated through the server, so co-locating
//! them avoids spreading that correlation to more machines.

use crate::concretize::{ConcretizeContext, PlacementSlot};
use crate::{PlacementError, Result};
use compactor_dnc::config as naming;
use compactor_dnc::config::{NETWORK_BANDWIDTH, STORAGE_BANDWIDTH};
use compactor_dnc::{QueueConfig, WorkloadSpec};
use compactor_proto::{AdmissionClient, AdmissionStatus, PlacementRecord, PlacementStatus};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};
use tracing::{info, warn};

/// A workload currently placed in the system.
#[derive(Debug, Clone)]
struct PlacedWorkload {
    name: String,
    client_host: String,
    client_vm: String,
    server_host: String,
    server_vm: String,
}

/// State behind the controller mutex.
#[derive(Default)]
struct State {
    /// serverHost -> serverVMs.
    servers: BTreeMap<String, BTreeSet<String>>,
    /// clientHost -> free clientVMs.
    clients: BTreeMap<String, BTreeSet<String>>,
    /// serverHost -> clientHost grouping for correlated workloads.
    grouping: HashMap<String, String>,
    /// Workloads currently placed.
    workloads: Vec<PlacedWorkload>,
    /// The workload being placed, while a placement is in flight.
    current: Option<CurrentPlacement>,
    /// Candidate slots for the current placement.
    work_queue: Vec<(String, String)>,
    /// Next queue index to hand to a worker.
    next_index: usize,
    /// Trials currently in flight.
    outstanding: usize,
    /// Lowest fitting index seen so far; `work_queue.len()` means none.
    best_index: usize,
    /// First infrastructure error seen during the current placement.
    error: Option<String>,
}

struct CurrentPlacement {
    workload: WorkloadSpec,
    addr_prefix: String,
}

struct Shared {
    state: Mutex<State>,
    work_available: Notify,
    work_complete: Notify,
    ctx: ConcretizeContext,
    fast_first_fit: bool,
}

/// One unit of trial work handed to a worker task.
struct WorkItem {
    index: usize,
    workload: WorkloadSpec,
    addr_prefix: String,
    slot: PlacementSlot,
}

/// The placement controller. Cheap to clone handles are not provided; wrap
/// in `Arc` to share with the RPC server.
pub struct PlacementController {
    shared: Arc<Shared>,
    /// Worker connections, index-aligned with the spawned worker tasks.
    connections: Vec<Arc<Mutex<AdmissionClient>>>,
    /// Serializes placements; trials for different workloads never overlap.
    placement_gate: Mutex<()>,
}

impl PlacementController {
    /// Creates a controller over already-connected admission workers and
    /// spawns one trial task per worker.
    pub fn start(
        workers: Vec<AdmissionClient>,
        ctx: ConcretizeContext,
        fast_first_fit: bool,
    ) -> Arc<Self> {
        let shared = Arc::new(Shared {
            state: Mutex::new(State::default()),
            work_available: Notify::new(),
            work_complete: Notify::new(),
            ctx,
            fast_first_fit,
        });
        let connections: Vec<Arc<Mutex<AdmissionClient>>> = workers
            .into_iter()
            .map(|w| Arc::new(Mutex::new(w)))
            .collect();
        for (index, connection) in connections.iter().enumerate() {
            tokio::spawn(worker_loop(index, shared.clone(), connection.clone()));
        }
        Arc::new(Self {
            shared,
            connections,
            placement_gate: Mutex::new(()),
        })
    }

    /// Number of admission workers.
    pub fn worker_count(&self) -> usize {
        self.connections.len()
    }

    /// Places a batch of workloads, first fit each. A failed placement
    /// reverts the batch's earlier placements and reports rejection.
    pub async fn add_clients(
        &self,
        workloads: &[WorkloadSpec],
        addr_prefix: &str,
        enforce: bool,
    ) -> Result<(bool, Vec<PlacementRecord>)> {
        let _gate = self.placement_gate.lock().await;
        let mut records = Vec::with_capacity(workloads.len());
        for (i, workload) in workloads.iter().enumerate() {
            match self.place_one(workload, addr_prefix, enforce).await? {
                Some(record) => records.push(record),
                None => {
                    info!(client = %workload.name, "placement rejected");
                    for placed in workloads.iter().take(i) {
                        self.remove_one(&placed.name).await?;
                    }
                    return Ok((false, Vec::new()));
                }
            }
        }
        Ok((true, records))
    }

    /// Removes a batch of placed workloads.
    pub async fn del_clients(&self, names: &[String]) -> Result<()> {
        let _gate = self.placement_gate.lock().await;
        for name in names {
            self.remove_one(name).await?;
        }
        Ok(())
    }

    /// Places one workload; `None` means no server admitted it.
    async fn place_one(
        &self,
        workload: &WorkloadSpec,
        addr_prefix: &str,
        enforce: bool,
    ) -> Result<Option<PlacementRecord>> {
        let preplaced = workload.admitted
            && workload.server_host.is_some()
            && workload.server_vm.is_some();
        {
            let mut state = self.shared.state.lock().await;
            debug_assert!(state.current.is_none() && state.work_queue.is_empty());
            state.error = None;
            if preplaced {
                // Already admitted elsewhere; replay onto the recorded slot
                // without trials.
                state.work_queue = vec![(
                    workload.server_host.clone().unwrap_or_default(),
                    workload.server_vm.clone().unwrap_or_default(),
                )];
                state.next_index = state.work_queue.len();
                state.best_index = 0;
            } else {
                let candidates: Vec<(String, String)> = state
                    .servers
                    .iter()
                    .flat_map(|(host, vms)| vms.iter().map(move |vm| (host.clone(), vm.clone())))
                    .collect();
                state.work_queue = candidates;
                state.best_index = state.work_queue.len();
                state.next_index = 0;
                state.current = Some(CurrentPlacement {
                    workload: workload.clone(),
                    addr_prefix: addr_prefix.to_string(),
                });
            }
        }
        if !preplaced {
            self.shared.work_available.notify_waiters();
            self.wait_placement_complete().await;
        }

        // Harvest results and reset the queue for the next placement.
        let (best, queue_len, slot, error) = {
            let mut state = self.shared.state.lock().await;
            let best = state.best_index;
            let queue_len = state.work_queue.len();
            let slot = if best < queue_len {
                let (server_host, server_vm) = state.work_queue[best].clone();
                let (client_host, client_vm) = pick_client_slot(&state, &server_host)?;
                Some(PlacementSlot {
                    client_host,
                    client_vm,
                    server_host,
                    server_vm,
                })
            } else {
                None
            };
            let error = state.error.take();
            state.current = None;
            state.work_queue.clear();
            state.next_index = 0;
            state.best_index = 0;
            (best, queue_len, slot, error)
        };
        if best >= queue_len {
            // Distinguish "nothing fits" from "the trials themselves broke".
            if let Some(message) = error {
                return Err(PlacementError::TrialFailed(message));
            }
            return Ok(None);
        }
        let slot = slot.ok_or(PlacementError::OutOfClientMachines)?;
        self.commit(workload, &slot, addr_prefix, enforce).await?;
        Ok(Some(PlacementRecord {
            client_host: slot.client_host,
            client_vm: slot.client_vm,
            server_host: slot.server_host,
            server_vm: slot.server_vm,
        }))
    }

    async fn wait_placement_complete(&self) {
        loop {
            let notified = self.shared.work_complete.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let state = self.shared.state.lock().await;
                if state.outstanding == 0 && state.next_index >= state.work_queue.len() {
                    return;
                }
            }
            notified.await;
        }
    }

    /// Commits a chosen placement: one authoritative add on worker 0
    /// (enforcer-addressed when enforcement is on), replicated plain to the
    /// rest, then the controller's own bookkeeping.
    async fn commit(
        &self,
        workload: &WorkloadSpec,
        slot: &PlacementSlot,
        addr_prefix: &str,
        enforce: bool,
    ) -> Result<()> {
        let mut committed = workload.clone();
        committed.admitted = true;
        committed.client_host = Some(slot.client_host.clone());
        committed.client_vm = Some(slot.client_vm.clone());
        committed.server_host = Some(slot.server_host.clone());
        committed.server_vm = Some(slot.server_vm.clone());

        let plain = self
            .shared
            .ctx
            .client_config(&committed, slot, addr_prefix, false)?;
        for (index, connection) in self.connections.iter().enumerate() {
            let config = if index == 0 && enforce {
                self.shared
                    .ctx
                    .client_config(&committed, slot, addr_prefix, true)?
            } else {
                plain.clone()
            };
            let response = connection
                .lock()
                .await
                .add_client(&config, self.shared.fast_first_fit)
                .await?;
            if response.status != AdmissionStatus::Success || !response.admitted {
                return Err(PlacementError::CommitRejected {
                    client: workload.name.clone(),
                    worker: index,
                });
            }
        }

        let mut state = self.shared.state.lock().await;
        state
            .grouping
            .insert(slot.server_host.clone(), slot.client_host.clone());
        if let Some(vms) = state.clients.get_mut(&slot.client_host) {
            vms.remove(&slot.client_vm);
        }
        state.workloads.push(PlacedWorkload {
            name: workload.name.clone(),
            client_host: slot.client_host.clone(),
            client_vm: slot.client_vm.clone(),
            server_host: slot.server_host.clone(),
            server_vm: slot.server_vm.clone(),
        });
        info!(
            client = %workload.name,
            server = %naming::server_name(&slot.server_host, &slot.server_vm),
            client_vm = %naming::server_name(&slot.client_host, &slot.client_vm),
            "workload placed"
        );
        Ok(())
    }

    /// Removes one placed workload from every worker and frees its VM.
    async fn remove_one(&self, name: &str) -> Result<()> {
        let placed = {
            let state = self.shared.state.lock().await;
            state.workloads.iter().find(|w| w.name == name).cloned()
        };
        let Some(placed) = placed else {
            return Ok(());
        };
        for connection in &self.connections {
            let status = connection.lock().await.del_client(name).await?;
            if status != AdmissionStatus::Success {
                warn!(client = name, ?status, "worker delete returned non-success");
            }
        }
        let mut state = self.shared.state.lock().await;
        state.grouping.remove(&placed.server_host);
        if let Some(vms) = state.clients.get_mut(&placed.client_host) {
            vms.insert(placed.client_vm.clone());
        }
        if let Some(pos) = state.workloads.iter().position(|w| w.name == name) {
            state.workloads.remove(pos);
        }
        Ok(())
    }

    /// Registers a client VM, creating the host's link queues on every
    /// worker when the host is new.
    pub async fn add_client_vm(&self, host: &str, vm: &str) -> Result<PlacementStatus> {
        let _gate = self.placement_gate.lock().await;
        let is_new_host = {
            let state = self.shared.state.lock().await;
            !state.clients.contains_key(host)
        };
        if is_new_host {
            self.add_host_queues(host).await?;
        }
        let mut state = self.shared.state.lock().await;
        let vms = state.clients.entry(host.to_string()).or_default();
        if vms.contains(vm) {
            return Ok(PlacementStatus::ErrClientVmAlreadyExists);
        }
        let in_use = state
            .workloads
            .iter()
            .any(|w| w.client_host == host && w.client_vm == vm);
        if in_use {
            return Ok(PlacementStatus::ErrClientVmAlreadyExists);
        }
        if let Some(vms) = state.clients.get_mut(host) {
            vms.insert(vm.to_string());
        }
        Ok(PlacementStatus::Success)
    }

    /// Unregisters a client VM; the host's link queues go with its last VM.
    pub async fn del_client_vm(&self, host: &str, vm: &str) -> Result<PlacementStatus> {
        let _gate = self.placement_gate.lock().await;
        let remove_host = {
            let mut state = self.shared.state.lock().await;
            let Some(vms) = state.clients.get_mut(host) else {
                return Ok(PlacementStatus::ErrClientVmNonexistent);
            };
            if !vms.remove(vm) {
                return Ok(PlacementStatus::ErrClientVmNonexistent);
            }
            vms.is_empty() && !state.workloads.iter().any(|w| w.client_host == host)
        };
        if remove_host {
            self.del_host_queues(host).await?;
            let mut state = self.shared.state.lock().await;
            state.clients.remove(host);
        }
        Ok(PlacementStatus::Success)
    }

    /// Registers a server VM: link queues on a new host, a storage queue
    /// per VM.
    pub async fn add_server_vm(&self, host: &str, vm: &str) -> Result<PlacementStatus> {
        let _gate = self.placement_gate.lock().await;
        let is_new_host = {
            let state = self.shared.state.lock().await;
            !state.servers.contains_key(host)
        };
        if is_new_host {
            self.add_host_queues(host).await?;
        }
        {
            let state = self.shared.state.lock().await;
            if state.servers.get(host).is_some_and(|vms| vms.contains(vm)) {
                return Ok(PlacementStatus::ErrServerVmAlreadyExists);
            }
        }
        let storage_queue = QueueConfig {
            name: naming::server_name(host, vm),
            bandwidth: STORAGE_BANDWIDTH,
        };
        for connection in &self.connections {
            let status = connection.lock().await.add_queue(&storage_queue).await?;
            if status != AdmissionStatus::Success {
                warn!(queue = %storage_queue.name, ?status, "storage queue add returned non-success");
            }
        }
        let mut state = self.shared.state.lock().await;
        state
            .servers
            .entry(host.to_string())
            .or_default()
            .insert(vm.to_string());
        Ok(PlacementStatus::Success)
    }

    /// Unregisters a server VM unless a workload still lives there.
    pub async fn del_server_vm(&self, host: &str, vm: &str) -> Result<PlacementStatus> {
        let _gate = self.placement_gate.lock().await;
        {
            let state = self.shared.state.lock().await;
            let Some(vms) = state.servers.get(host) else {
                return Ok(PlacementStatus::ErrServerVmNonexistent);
            };
            if !vms.contains(vm) {
                return Ok(PlacementStatus::ErrServerVmNonexistent);
            }
            if state
                .workloads
                .iter()
                .any(|w| w.server_host == host && w.server_vm == vm)
            {
                return Ok(PlacementStatus::ErrServerVmInUse);
            }
        }
        let storage_queue = naming::server_name(host, vm);
        for connection in &self.connections {
            let status = connection.lock().await.del_queue(&storage_queue).await?;
            if status != AdmissionStatus::Success {
                warn!(queue = %storage_queue, ?status, "storage queue delete returned non-success");
            }
        }
        let remove_host = {
            let mut state = self.shared.state.lock().await;
            let Some(vms) = state.servers.get_mut(host) else {
                return Ok(PlacementStatus::ErrServerVmNonexistent);
            };
            vms.remove(vm);
            vms.is_empty()
        };
        if remove_host {
            self.del_host_queues(host).await?;
            let mut state = self.shared.state.lock().await;
            state.servers.remove(host);
        }
        Ok(PlacementStatus::Success)
    }

    async fn add_host_queues(&self, host: &str) -> Result<()> {
        for name in [naming::queue_in_name(host), naming::queue_out_name(host)] {
            let queue = QueueConfig {
                name,
                bandwidth: NETWORK_BANDWIDTH,
            };
            for connection in &self.connections {
                let status = connection.lock().await.add_queue(&queue).await?;
                if status != AdmissionStatus::Success {
                    warn!(queue = %queue.name, ?status, "link queue add returned non-success");
                }
            }
        }
        Ok(())
    }

    async fn del_host_queues(&self, host: &str) -> Result<()> {
        for name in [naming::queue_in_name(host), naming::queue_out_name(host)] {
            for connection in &self.connections {
                let status = connection.lock().await.del_queue(&name).await?;
                if status != AdmissionStatus::Success {
                    warn!(queue = %name, ?status, "link queue delete returned non-success");
                }
            }
        }
        Ok(())
    }
}

/// Picks the client VM for a server, preferring hosts already correlated
/// with it.
fn pick_client_slot(state: &State, server_host: &str) -> Result<(String, String)> {
    if let Some(client_host) = state.grouping.get(server_host) {
        if let Some(vm) = state
            .clients
            .get(client_host)
            .and_then(|vms| vms.iter().next())
        {
            return Ok((client_host.clone(), vm.clone()));
        }
    }
    for placed in &state.workloads {
        if placed.server_host == server_host {
            if let Some(vm) = state
                .clients
                .get(&placed.client_host)
                .and_then(|vms| vms.iter().next())
            {
                return Ok((placed.client_host.clone(), vm.clone()));
            }
        }
    }
    let mut best: Option<(&String, usize)> = None;
    for (host, vms) in &state.clients {
        if best.map_or(true, |(_, count)| vms.len() > count) {
            best = Some((host, vms.len()));
        }
    }
    match best {
        Some((host, count)) if count > 0 => {
            let vm = state.clients[host]
                .iter()
                .next()
                .cloned()
                .unwrap_or_default();
            Ok((host.clone(), vm))
        }
        _ => Err(PlacementError::OutOfClientMachines),
    }
}

/// One worker's trial loop: pop an index, concretize, trial-add on this
/// worker's connection, roll back, report.
async fn worker_loop(index: usize, shared: Arc<Shared>, connection: Arc<Mutex<AdmissionClient>>) {
    loop {
        let item = next_work(&shared).await;
        let (admitted, error) = run_trial(&shared, &connection, &item).await;
        if let Some(message) = &error {
            warn!(worker = index, candidate = item.index, error = %message, "trial failed");
        }
        finish_work(&shared, item.index, admitted, error).await;
    }
}

async fn next_work(shared: &Arc<Shared>) -> WorkItem {
    loop {
        let notified = shared.work_available.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        {
            let mut state = shared.state.lock().await;
            if state.next_index < state.work_queue.len() {
                if let Some(current) = &state.current {
                    let index = state.next_index;
                    let workload = current.workload.clone();
                    let addr_prefix = current.addr_prefix.clone();
                    let (server_host, server_vm) = state.work_queue[index].clone();
                    let client = pick_client_slot(&state, &server_host);
                    state.next_index += 1;
                    state.outstanding += 1;
                    match client {
                        Ok((client_host, client_vm)) => {
                            return WorkItem {
                                index,
                                workload,
                                addr_prefix,
                                slot: PlacementSlot {
                                    client_host,
                                    client_vm,
                                    server_host,
                                    server_vm,
                                },
                            };
                        }
                        Err(e) => {
                            // No client machine available: the trial cannot
                            // even be formed. Report it failed.
                            state.outstanding -= 1;
                            state.next_index = state.work_queue.len();
                            if state.error.is_none() {
                                state.error = Some(e.to_string());
                            }
                            if state.outstanding == 0 {
                                shared.work_complete.notify_waiters();
                            }
                            continue;
                        }
                    }
                }
            }
        }
        notified.await;
    }
}

/// Runs one trial admission and rolls it back. Returns whether the
/// candidate fits, plus any infrastructure error.
async fn run_trial(
    shared: &Arc<Shared>,
    connection: &Arc<Mutex<AdmissionClient>>,
    item: &WorkItem,
) -> (bool, Option<String>) {
    // Concretization reads trace and cache files; keep it off the reactor.
    let ctx_workload = item.workload.clone();
    let slot = item.slot.clone();
    let prefix = item.addr_prefix.clone();
    let shared_for_config = shared.clone();
    let config = tokio::task::spawn_blocking(move || {
        shared_for_config
            .ctx
            .client_config(&ctx_workload, &slot, &prefix, false)
    })
    .await;
    let config = match config {
        Ok(Ok(config)) => config,
        Ok(Err(e)) => return (false, Some(e.to_string())),
        Err(e) => return (false, Some(e.to_string())),
    };

    let mut client = connection.lock().await;
    match client.add_client(&config, shared.fast_first_fit).await {
        Ok(response) => {
            let admitted = response.status == AdmissionStatus::Success && response.admitted;
            if admitted {
                match client.del_client(&config.name).await {
                    Ok(AdmissionStatus::Success) => (true, None),
                    Ok(status) => (true, Some(format!("trial rollback returned {status:?}"))),
                    Err(e) => (true, Some(e.to_string())),
                }
            } else {
                (false, None)
            }
        }
        Err(e) => (false, Some(e.to_string())),
    }
}

async fn finish_work(shared: &Arc<Shared>, index: usize, admitted: bool, error: Option<String>) {
    let mut state = shared.state.lock().await;
    state.outstanding -= 1;
    if let Some(message) = error {
        if state.error.is_none() {
            state.error = Some(message);
        }
    }
    if admitted {
        // Cancel the remainder of the queue; later indices cannot beat an
        // earlier fit that already landed.
        state.next_index = state.work_queue.len();
        if index < state.best_index {
            state.best_index = index;
        }
    }
    if state.outstanding == 0 && state.next_index >= state.work_queue.len() {
        shared.work_complete.notify_waiters();
    }
}
