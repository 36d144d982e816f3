//! The admission model: queues, flows, and clients.
//!
//! A [`Network`] owns the whole graph. Queues are created at bring-up and
//! live until empty; clients arrive with their flows on admission and leave
//! on deletion or rollback. Flows reference queues by id along their path,
//! and every queue keeps the back-references `(flow, hop)` needed by the
//! analysis.
//!
//! All mutation happens through `&mut self` on a single owner; the admission
//! worker serializes RPC handlers on one engine, so the graph needs no
//! internal locking.

use crate::analyzer::Analyzer;
use crate::config::{ClientConfig, QueueConfig};
use crate::curve::{Curve, PointSlope};
use crate::ops::RateBurst;
use crate::{DncError, Result};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Opaque queue identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QueueId(u64);

/// Opaque flow identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FlowId(u64);

/// Opaque client identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClientId(u64);

/// Back-reference from a queue to a flow crossing it at a given hop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FlowHop {
    /// The crossing flow.
    pub flow: FlowId,
    /// Which hop of the flow's path this queue is.
    pub hop: usize,
}

/// A scheduling queue with a fixed service bandwidth.
#[derive(Debug)]
pub struct Queue {
    pub name: String,
    /// Work units per second.
    pub bandwidth: f64,
    /// Flows crossing this queue, in attachment order.
    pub flows: Vec<FlowHop>,
}

/// One flow of a client's workload.
#[derive(Debug)]
pub struct Flow {
    pub name: String,
    /// Owning client.
    pub client: ClientId,
    /// Ordered queue path.
    pub queues: Vec<QueueId>,
    /// Scheduling priority, lower is served first.
    pub priority: u32,
    /// Piecewise-linear arrival bound, origin point included.
    pub arrival_curve: Curve,
    /// Configured rate limiter; `(0, 0)` until optimized.
    pub shaper: RateBurst,
    /// Cached worst-case latency from the last analysis.
    pub latency: f64,
    /// Excluded from latency accounting.
    pub ignore_latency: bool,
}

/// A tenant workload with a latency objective.
#[derive(Debug)]
pub struct Client {
    pub name: String,
    /// Tail-latency objective, seconds.
    pub slo: f64,
    /// Percentile the objective refers to.
    pub slo_percentile: Option<f64>,
    /// Owned flows, in descriptor order.
    pub flows: Vec<FlowId>,
    /// Cached sum of flow latencies from the last analysis.
    pub latency: f64,
}

/// The flow/queue/client graph plus the analyzer that prices it.
pub struct Network {
    analyzer: Analyzer,
    queues: BTreeMap<QueueId, Queue>,
    flows: BTreeMap<FlowId, Flow>,
    clients: BTreeMap<ClientId, Client>,
    queues_by_name: HashMap<String, QueueId>,
    flows_by_name: HashMap<String, FlowId>,
    clients_by_name: HashMap<String, ClientId>,
    /// Queues touched by add/delete since the last shaper optimization.
    pub(crate) dirty_queues: BTreeSet<QueueId>,
    next_id: u64,
}

impl Network {
    /// Creates an empty graph under the given analyzer.
    pub fn new(analyzer: Analyzer) -> Self {
        Self {
            analyzer,
            queues: BTreeMap::new(),
            flows: BTreeMap::new(),
            clients: BTreeMap::new(),
            queues_by_name: HashMap::new(),
            flows_by_name: HashMap::new(),
            clients_by_name: HashMap::new(),
            dirty_queues: BTreeSet::new(),
            next_id: 0,
        }
    }

    /// The analyzer this graph was built for.
    pub fn analyzer(&self) -> Analyzer {
        self.analyzer
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Registers a queue.
    pub fn add_queue(&mut self, config: &QueueConfig) -> Result<QueueId> {
        if self.queues_by_name.contains_key(&config.name) {
            return Err(DncError::QueueNameInUse(config.name.clone()));
        }
        if config.bandwidth <= 0.0 {
            return Err(DncError::InvalidBandwidth {
                name: config.name.clone(),
                bandwidth: config.bandwidth,
            });
        }
        let id = QueueId(self.next_id());
        self.queues.insert(
            id,
            Queue {
                name: config.name.clone(),
                bandwidth: config.bandwidth,
                flows: Vec::new(),
            },
        );
        self.queues_by_name.insert(config.name.clone(), id);
        Ok(id)
    }

    /// Removes an empty queue.
    pub fn del_queue(&mut self, id: QueueId) -> Result<()> {
        let queue = self.queues.get(&id).ok_or(DncError::StaleId { kind: "queue" })?;
        if !queue.flows.is_empty() {
            return Err(DncError::QueueHasActiveFlows(queue.name.clone()));
        }
        let queue = self.queues.remove(&id).ok_or(DncError::StaleId { kind: "queue" })?;
        self.queues_by_name.remove(&queue.name);
        self.dirty_queues.remove(&id);
        Ok(())
    }

    /// Adds a client and all of its flows.
    ///
    /// Validation is complete before any mutation, so a failed add leaves
    /// the graph untouched.
    pub fn add_client(&mut self, config: &ClientConfig) -> Result<ClientId> {
        if self.clients_by_name.contains_key(&config.name) {
            return Err(DncError::ClientNameInUse(config.name.clone()));
        }
        let mut batch_names = BTreeSet::new();
        for flow in &config.flows {
            if self.flows_by_name.contains_key(&flow.name) || !batch_names.insert(&flow.name) {
                return Err(DncError::FlowNameInUse(flow.name.clone()));
            }
            if flow.arrival.is_empty() {
                return Err(DncError::EmptyArrivalCurve(flow.name.clone()));
            }
            for queue_name in &flow.queues {
                if !self.queues_by_name.contains_key(queue_name) {
                    return Err(DncError::QueueNonexistent(queue_name.clone()));
                }
            }
        }

        let client_id = ClientId(self.next_id());
        let mut flow_ids = Vec::with_capacity(config.flows.len());
        for flow in &config.flows {
            let flow_id = FlowId(self.next_id());
            let queue_ids: Vec<QueueId> = flow
                .queues
                .iter()
                .map(|name| self.queues_by_name[name])
                .collect();
            for (hop, &queue_id) in queue_ids.iter().enumerate() {
                self.queues
                    .get_mut(&queue_id)
                    .ok_or(DncError::StaleId { kind: "queue" })?
                    .flows
                    .push(FlowHop { flow: flow_id, hop });
                self.mark_dirty(queue_id);
            }
            let mut arrival_curve: Curve = Vec::with_capacity(flow.arrival.len() + 1);
            arrival_curve.push(PointSlope::origin());
            arrival_curve.extend_from_slice(&flow.arrival);
            self.flows.insert(
                flow_id,
                Flow {
                    name: flow.name.clone(),
                    client: client_id,
                    queues: queue_ids,
                    priority: flow.priority.unwrap_or(0),
                    arrival_curve,
                    shaper: RateBurst::ZERO,
                    latency: 0.0,
                    ignore_latency: flow.ignore_latency,
                },
            );
            self.flows_by_name.insert(flow.name.clone(), flow_id);
            flow_ids.push(flow_id);
        }
        self.clients.insert(
            client_id,
            Client {
                name: config.name.clone(),
                slo: config.slo,
                slo_percentile: config.slo_percentile,
                flows: flow_ids,
                latency: 0.0,
            },
        );
        self.clients_by_name.insert(config.name.clone(), client_id);
        Ok(client_id)
    }

    /// Removes a client, detaching all of its flows from their queues.
    pub fn del_client(&mut self, id: ClientId) -> Result<()> {
        let client = self
            .clients
            .remove(&id)
            .ok_or(DncError::StaleId { kind: "client" })?;
        self.clients_by_name.remove(&client.name);
        for flow_id in client.flows {
            let flow = self
                .flows
                .remove(&flow_id)
                .ok_or(DncError::StaleId { kind: "flow" })?;
            self.flows_by_name.remove(&flow.name);
            for queue_id in flow.queues {
                self.mark_dirty(queue_id);
                if let Some(queue) = self.queues.get_mut(&queue_id) {
                    queue.flows.retain(|hop| hop.flow != flow_id);
                }
            }
        }
        Ok(())
    }

    fn mark_dirty(&mut self, queue_id: QueueId) {
        if self.analyzer == Analyzer::Compactor {
            self.dirty_queues.insert(queue_id);
        }
    }

    /// Looks up a queue id by name.
    pub fn queue_id(&self, name: &str) -> Option<QueueId> {
        self.queues_by_name.get(name).copied()
    }

    /// Looks up a flow id by name.
    pub fn flow_id(&self, name: &str) -> Option<FlowId> {
        self.flows_by_name.get(name).copied()
    }

    /// Looks up a client id by name.
    pub fn client_id(&self, name: &str) -> Option<ClientId> {
        self.clients_by_name.get(name).copied()
    }

    /// Queue by id.
    pub fn queue(&self, id: QueueId) -> Option<&Queue> {
        self.queues.get(&id)
    }

    /// Flow by id.
    pub fn flow(&self, id: FlowId) -> Option<&Flow> {
        self.flows.get(&id)
    }

    /// Client by id.
    pub fn client(&self, id: ClientId) -> Option<&Client> {
        self.clients.get(&id)
    }

    /// All queues in creation order.
    pub fn queues(&self) -> impl Iterator<Item = (QueueId, &Queue)> {
        self.queues.iter().map(|(&id, q)| (id, q))
    }

    /// All flows in creation order.
    pub fn flows(&self) -> impl Iterator<Item = (FlowId, &Flow)> {
        self.flows.iter().map(|(&id, f)| (id, f))
    }

    /// All clients in creation order.
    pub fn clients(&self) -> impl Iterator<Item = (ClientId, &Client)> {
        self.clients.iter().map(|(&id, c)| (id, c))
    }

    /// Overrides a flow's scheduling priority.
    pub fn set_flow_priority(&mut self, id: FlowId, priority: u32) -> Result<()> {
        self.flows
            .get_mut(&id)
            .ok_or(DncError::StaleId { kind: "flow" })?
            .priority = priority;
        Ok(())
    }

    /// Overrides a flow's shaper curve.
    pub fn set_shaper(&mut self, id: FlowId, shaper: RateBurst) -> Result<()> {
        self.flows
            .get_mut(&id)
            .ok_or(DncError::StaleId { kind: "flow" })?
            .shaper = shaper;
        Ok(())
    }

    /// Presets a flow's latency; only meaningful under [`Analyzer::Fixed`].
    pub fn set_fixed_latency(&mut self, id: FlowId, latency: f64) -> Result<()> {
        self.flows
            .get_mut(&id)
            .ok_or(DncError::StaleId { kind: "flow" })?
            .latency = latency;
        Ok(())
    }

    pub(crate) fn flow_ref(&self, id: FlowId) -> &Flow {
        &self.flows[&id]
    }

    pub(crate) fn flow_mut(&mut self, id: FlowId) -> &mut Flow {
        self.flows.get_mut(&id).expect("flow id tracked by graph")
    }

    pub(crate) fn queue_ref(&self, id: QueueId) -> &Queue {
        &self.queues[&id]
    }

    pub(crate) fn client_mut(&mut self, id: ClientId) -> &mut Client {
        self.clients.get_mut(&id).expect("client id tracked by graph")
    }

    /// Recomputes and caches a client's latency: the sum over its flows.
    pub fn calc_client_latency(&mut self, id: ClientId) -> Result<f64> {
        let flow_ids = self
            .clients
            .get(&id)
            .ok_or(DncError::StaleId { kind: "client" })?
            .flows
            .clone();
        let mut latency = 0.0;
        for flow_id in flow_ids {
            latency += self.calc_flow_latency(flow_id)?;
        }
        self.client_mut(id).latency = latency;
        Ok(latency)
    }

    /// Recomputes every client's cached latency.
    pub fn calc_all_latency(&mut self) -> Result<()> {
        let ids: Vec<ClientId> = self.clients.keys().copied().collect();
        for id in ids {
            self.calc_client_latency(id)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FlowConfig;

    fn queue(name: &str, bandwidth: f64) -> QueueConfig {
        QueueConfig {
            name: name.into(),
            bandwidth,
        }
    }

    fn client(name: &str, slo: f64, flows: Vec<FlowConfig>) -> ClientConfig {
        ClientConfig {
            name: name.into(),
            slo,
            slo_percentile: None,
            flows,
            admitted: false,
        }
    }

    fn flow(name: &str, queues: &[&str]) -> FlowConfig {
        FlowConfig {
            name: name.into(),
            queues: queues.iter().map(|q| q.to_string()).collect(),
            arrival: vec![PointSlope {
                x: 0.0,
                y: 1.0,
                slope: 0.5,
            }],
            priority: None,
            ignore_latency: false,
            enforcer: None,
        }
    }

    #[test]
    fn test_add_queue_rejects_duplicates_and_bad_bandwidth() {
        let mut net = Network::new(Analyzer::HopByHop);
        net.add_queue(&queue("Q0", 1.0)).unwrap();
        assert!(matches!(
            net.add_queue(&queue("Q0", 2.0)),
            Err(DncError::QueueNameInUse(_))
        ));
        assert!(matches!(
            net.add_queue(&queue("Q1", 0.0)),
            Err(DncError::InvalidBandwidth { .. })
        ));
    }

    #[test]
    fn test_del_queue_refuses_active_flows() {
        let mut net = Network::new(Analyzer::HopByHop);
        let q0 = net.add_queue(&queue("Q0", 1.0)).unwrap();
        let c0 = net.add_client(&client("C0", 1.0, vec![flow("F0", &["Q0"])])).unwrap();
        assert!(matches!(
            net.del_queue(q0),
            Err(DncError::QueueHasActiveFlows(_))
        ));
        net.del_client(c0).unwrap();
        net.del_queue(q0).unwrap();
        assert!(net.queue_id("Q0").is_none());
    }

    #[test]
    fn test_add_client_attaches_hops() {
        let mut net = Network::new(Analyzer::HopByHop);
        let q0 = net.add_queue(&queue("Q0", 1.0)).unwrap();
        let q1 = net.add_queue(&queue("Q1", 1.0)).unwrap();
        let c0 = net
            .add_client(&client("C0", 1.0, vec![flow("F0", &["Q0", "Q1"])]))
            .unwrap();
        let f0 = net.flow_id("F0").unwrap();
        assert_eq!(net.client(c0).unwrap().flows, vec![f0]);
        assert_eq!(net.queue(q0).unwrap().flows, vec![FlowHop { flow: f0, hop: 0 }]);
        assert_eq!(net.queue(q1).unwrap().flows, vec![FlowHop { flow: f0, hop: 1 }]);
        assert_eq!(net.flow(f0).unwrap().arrival_curve.len(), 2);
        assert!(net.flow(f0).unwrap().arrival_curve[0].slope.is_infinite());
    }

    #[test]
    fn test_add_client_validation_is_atomic() {
        let mut net = Network::new(Analyzer::HopByHop);
        net.add_queue(&queue("Q0", 1.0)).unwrap();
        // Second flow references a queue that does not exist; nothing of the
        // client may survive.
        let bad = client("C0", 1.0, vec![flow("F0", &["Q0"]), flow("F1", &["Qmissing"])]);
        assert!(matches!(
            net.add_client(&bad),
            Err(DncError::QueueNonexistent(_))
        ));
        assert!(net.client_id("C0").is_none());
        assert!(net.flow_id("F0").is_none());
        assert!(net.queue(net.queue_id("Q0").unwrap()).unwrap().flows.is_empty());
    }

    #[test]
    fn test_add_client_rejects_duplicate_flow_names_in_batch() {
        let mut net = Network::new(Analyzer::HopByHop);
        net.add_queue(&queue("Q0", 1.0)).unwrap();
        let bad = client("C0", 1.0, vec![flow("F0", &["Q0"]), flow("F0", &["Q0"])]);
        assert!(matches!(net.add_client(&bad), Err(DncError::FlowNameInUse(_))));
    }

    #[test]
    fn test_long_paths_accepted_under_any_analyzer() {
        // Paths beyond two hops are admitted even under the aggregate
        // analyzers; the analysis charges them no queueing latency rather
        // than refusing them.
        for analyzer in [Analyzer::AggregateTwoHop, Analyzer::Compactor, Analyzer::HopByHop] {
            let mut net = Network::new(analyzer);
            for name in ["Q0", "Q1", "Q2"] {
                net.add_queue(&queue(name, 1.0)).unwrap();
            }
            net.add_client(&client("C0", 1.0, vec![flow("F0", &["Q0", "Q1", "Q2"])]))
                .unwrap();
            let f0 = net.flow_id("F0").unwrap();
            assert_eq!(net.flow(f0).unwrap().queues.len(), 3);
        }
    }

    #[test]
    fn test_del_client_detaches_everything() {
        let mut net = Network::new(Analyzer::HopByHop);
        let q0 = net.add_queue(&queue("Q0", 1.0)).unwrap();
        let c0 = net
            .add_client(&client("C0", 1.0, vec![flow("F0", &["Q0"]), flow("F1", &["Q0"])]))
            .unwrap();
        net.del_client(c0).unwrap();
        assert!(net.client_id("C0").is_none());
        assert!(net.flow_id("F0").is_none());
        assert!(net.flow_id("F1").is_none());
        assert!(net.queue(q0).unwrap().flows.is_empty());
    }

    #[test]
    fn test_compactor_marks_dirty_queues() {
        let mut net = Network::new(Analyzer::Compactor);
        let q0 = net.add_queue(&queue("Q0", 1.0)).unwrap();
        assert!(net.dirty_queues.is_empty());
        let c0 = net.add_client(&client("C0", 1.0, vec![flow("F0", &["Q0"])])).unwrap();
        assert!(net.dirty_queues.contains(&q0));
        net.dirty_queues.clear();
        net.del_client(c0).unwrap();
        assert!(net.dirty_queues.contains(&q0));
    }

    #[test]
    fn test_non_compactor_does_not_track_dirty() {
        let mut net = Network::new(Analyzer::HopByHop);
        net.add_queue(&queue("Q0", 1.0)).unwrap();
        net.add_client(&client("C0", 1.0, vec![flow("F0", &["Q0"])])).unwrap();
        assert!(net.dirty_queues.is_empty());
    }
}
