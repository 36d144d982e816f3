//! Worst-case flow latency.
//!
//! Queues serve under strict priority with FIFO inside a priority level, so
//! a flow's service is whatever the queue has left after every higher- or
//! equal-priority competitor. Two analyses are available:
//!
//! - **Hop-by-hop**: price each queue on the path independently, propagating
//!   the flow's departure bound to the next hop and summing the per-hop
//!   delays.
//! - **Aggregate two-hop**: for the canonical client-link/server-link paths,
//!   aggregate the equal-priority FIFO share into the arrival, pre-subtract
//!   every cross-path's second-hop contribution, and price the convolved
//!   end-to-end service once. Tighter than hop-by-hop on these paths.
//!
//! Either way, the shaper's own queueing delay (the gap between the flow's
//! real arrival curve and its `(rate, burst)` limiter) is added on top.

use crate::curve::shaper_latency;
use crate::graph::{FlowId, Network, QueueId};
use crate::ops::{latency_bound, RateBurst, RateLatency};
use crate::Result;
use std::collections::BTreeMap;

/// Latency analysis strategy for a [`Network`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Analyzer {
    /// Every flow reports its preset latency; for harnesses and tests.
    Fixed,
    /// Per-hop leftover-service analysis, any path length.
    HopByHop,
    /// Aggregate analysis, modeled for paths of one or two hops (the
    /// end-host link case). Longer paths contribute no queueing latency;
    /// see [`Network::calc_flow_latency`].
    AggregateTwoHop,
    /// [`Analyzer::AggregateTwoHop`] preceded by shaper re-optimization of
    /// dirty coupling groups.
    Compactor,
}

impl Network {
    /// Recomputes and caches a flow's worst-case latency in seconds.
    ///
    /// Under [`Analyzer::Compactor`], stale shaper configuration is
    /// re-optimized first.
    pub fn calc_flow_latency(&mut self, flow_id: FlowId) -> Result<f64> {
        if self.analyzer() == Analyzer::Compactor && !self.dirty_queues.is_empty() {
            crate::optimizer::recompute_shapers(self)?;
        }
        if self.flow_ref(flow_id).ignore_latency {
            self.flow_mut(flow_id).latency = 0.0;
            return Ok(0.0);
        }
        let latency = match self.analyzer() {
            Analyzer::Fixed => return Ok(self.flow_ref(flow_id).latency),
            Analyzer::HopByHop => self.hop_by_hop_latency(flow_id),
            Analyzer::AggregateTwoHop | Analyzer::Compactor => self.aggregate_latency(flow_id),
        };
        let flow = self.flow_ref(flow_id);
        let total = latency + shaper_latency(&flow.arrival_curve, flow.shaper);
        self.flow_mut(flow_id).latency = total;
        Ok(total)
    }

    /// The flow's arrival bound entering hop `index`, propagated through the
    /// services of the preceding hops.
    fn arrival_at_hop(&self, flow_id: FlowId, index: usize) -> RateBurst {
        if index == 0 {
            return self.flow_ref(flow_id).shaper;
        }
        let arrival = self.arrival_at_hop(flow_id, index - 1);
        let service = self.service_at_hop(flow_id, index - 1);
        arrival.output(service)
    }

    /// The service left for the flow at hop `index` after all higher- or
    /// equal-priority competitors on that queue.
    fn service_at_hop(&self, flow_id: FlowId, index: usize) -> RateLatency {
        let flow = self.flow_ref(flow_id);
        let queue = self.queue_ref(flow.queues[index]);
        let mut service = RateLatency::constant(queue.bandwidth);
        for hop in &queue.flows {
            if hop.flow == flow_id {
                continue;
            }
            let other = self.flow_ref(hop.flow);
            if other.priority <= flow.priority {
                let arrival = self.arrival_at_hop(hop.flow, hop.hop);
                service = service.leftover(arrival);
            }
        }
        service
    }

    fn hop_by_hop_latency(&self, flow_id: FlowId) -> f64 {
        let hops = self.flow_ref(flow_id).queues.len();
        let mut arrival = self.flow_ref(flow_id).shaper;
        let mut latency = 0.0;
        for index in 0..hops {
            let service = self.service_at_hop(flow_id, index);
            latency += latency_bound(arrival, service);
            arrival = arrival.output(service);
        }
        latency
    }

    /// Queueing latency under the aggregate analysis.
    ///
    /// Only one- and two-hop paths are modeled, covering the end-host link
    /// topologies this analysis was built for. Longer paths fall through to
    /// zero queueing latency, leaving the shaper term as the flow's whole
    /// bound; callers that route such flows get an optimistic number, not
    /// an error.
    fn aggregate_latency(&self, flow_id: FlowId) -> f64 {
        match self.flow_ref(flow_id).queues.len() {
            1 => self.aggregate_one_hop(flow_id),
            2 => self.aggregate_two_hop(flow_id),
            _ => 0.0,
        }
    }

    fn aggregate_one_hop(&self, flow_id: FlowId) -> f64 {
        let flow = self.flow_ref(flow_id);
        let queue = self.queue_ref(flow.queues[0]);
        // Equal-priority flows share FIFO, so the flow waits behind their
        // aggregate (its own traffic included); strictly higher priorities
        // eat into the service.
        let mut arrival = RateBurst::ZERO;
        let mut service = RateLatency::constant(queue.bandwidth);
        for hop in &queue.flows {
            let f = self.flow_ref(hop.flow);
            if f.priority < flow.priority {
                service = service.leftover(f.shaper);
            } else if f.priority == flow.priority {
                arrival = f.shaper.aggregate(arrival);
            }
        }
        latency_bound(arrival, service)
    }

    fn aggregate_two_hop(&self, flow_id: FlowId) -> f64 {
        let flow = self.flow_ref(flow_id);
        let first_queue_id = flow.queues[0];
        let second_queue_id = flow.queues[1];
        let second_queue = self.queue_ref(second_queue_id);

        // Cross paths: first queues feeding competing traffic into our
        // second queue, mapped to the lowest competing priority seen there.
        let mut cross_paths: BTreeMap<QueueId, u32> = BTreeMap::new();
        for hop in &second_queue.flows {
            let f = self.flow_ref(hop.flow);
            if f.queues[0] == first_queue_id || f.priority > flow.priority {
                continue;
            }
            cross_paths
                .entry(f.queues[0])
                .and_modify(|p| *p = (*p).max(f.priority))
                .or_insert(f.priority);
        }

        // Each cross path contributes the output bound of its competing
        // aggregate, which the second queue must serve before us.
        let mut second_service = RateLatency::constant(second_queue.bandwidth);
        for (&queue_id, &threshold) in &cross_paths {
            let queue = self.queue_ref(queue_id);
            let mut cross_arrival = RateBurst::ZERO;
            let mut cross_service = RateLatency::constant(queue.bandwidth);
            for hop in &queue.flows {
                let f = self.flow_ref(hop.flow);
                if f.priority > threshold {
                    continue;
                }
                if f.queues.get(1) == Some(&second_queue_id) {
                    cross_arrival = f.shaper.aggregate(cross_arrival);
                } else {
                    cross_service = cross_service.leftover(f.shaper);
                }
            }
            second_service = second_service.leftover(cross_arrival.output(cross_service));
        }

        // First hop: split competitors into the FIFO aggregate travelling
        // with us, the higher-priority share also headed to our second
        // queue, and traffic that peels off after the first hop.
        let first_queue = self.queue_ref(first_queue_id);
        let mut arrival = RateBurst::ZERO;
        let mut share_arrival = RateBurst::ZERO;
        let mut first_service = RateLatency::constant(first_queue.bandwidth);
        for hop in &first_queue.flows {
            let f = self.flow_ref(hop.flow);
            if f.priority > flow.priority {
                continue;
            }
            if f.queues.get(1) == Some(&second_queue_id) {
                if f.priority == flow.priority {
                    arrival = f.shaper.aggregate(arrival);
                } else {
                    share_arrival = f.shaper.aggregate(share_arrival);
                }
            } else {
                first_service = first_service.leftover(f.shaper);
            }
        }

        let end_to_end = first_service.convolve(second_service);
        latency_bound(arrival, end_to_end.leftover(share_arrival))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ClientConfig, FlowConfig, QueueConfig};
    use crate::curve::PointSlope;

    /// Builds a client whose single flow has a fixed `(rate, burst)` shaper
    /// and a straight-line arrival curve matching it, so the shaper itself
    /// adds no latency.
    fn shaped_client(
        net: &mut Network,
        name: &str,
        queues: &[&str],
        priority: u32,
        rate: f64,
        burst: f64,
    ) -> crate::graph::ClientId {
        let flow_name = format!("F{name}");
        let config = ClientConfig {
            name: name.into(),
            slo: 1.0,
            slo_percentile: Some(99.9),
            flows: vec![FlowConfig {
                name: flow_name.clone(),
                queues: queues.iter().map(|q| q.to_string()).collect(),
                arrival: vec![PointSlope { x: 0.0, y: burst, slope: rate }],
                priority: Some(priority),
                ignore_latency: false,
                enforcer: None,
            }],
            admitted: false,
        };
        let id = net.add_client(&config).unwrap();
        let flow_id = net.flow_id(&flow_name).unwrap();
        net.set_shaper(flow_id, RateBurst::new(rate, burst)).unwrap();
        id
    }

    fn add_queues(net: &mut Network, names: &[&str]) {
        for name in names {
            net.add_queue(&QueueConfig {
                name: name.to_string(),
                bandwidth: 1.0,
            })
            .unwrap();
        }
    }

    fn assert_close(a: f64, b: f64) {
        assert!((a - b).abs() < 1e-9, "{a} != {b}");
    }

    #[test]
    fn test_one_hop_two_priority_classes() {
        let mut net = Network::new(Analyzer::AggregateTwoHop);
        add_queues(&mut net, &["Q0"]);
        let c0 = shaped_client(&mut net, "C0", &["Q0"], 1, 0.25, 0.5);
        let c1 = shaped_client(&mut net, "C1", &["Q0"], 1, 0.125, 1.0);
        let c2 = shaped_client(&mut net, "C2", &["Q0"], 2, 0.125, 0.25);
        let c3 = shaped_client(&mut net, "C3", &["Q0"], 2, 0.5, 2.25);
        assert_close(net.calc_client_latency(c0).unwrap(), 1.5);
        assert_close(net.calc_client_latency(c1).unwrap(), 1.5);
        assert_close(net.calc_client_latency(c2).unwrap(), 6.4);
        assert_close(net.calc_client_latency(c3).unwrap(), 6.4);
    }

    #[test]
    fn test_two_hop_diamond() {
        let mut net = Network::new(Analyzer::AggregateTwoHop);
        add_queues(&mut net, &["Q0", "Q1", "Q2", "Q3"]);
        let a = ["Q0", "Q2"];
        let b = ["Q0", "Q3"];
        let c = ["Q1", "Q2"];
        let d = ["Q1", "Q3"];
        let c0 = shaped_client(&mut net, "C0", &a, 1, 0.25, 0.5);
        let c1 = shaped_client(&mut net, "C1", &a, 1, 0.125, 1.0);
        let c2 = shaped_client(&mut net, "C2", &b, 2, 0.125, 0.25);
        let c3 = shaped_client(&mut net, "C3", &b, 2, 0.5, 2.25);
        let c4 = shaped_client(&mut net, "C4", &c, 3, 0.125, 0.25);
        let c5 = shaped_client(&mut net, "C5", &c, 3, 0.125, 0.75);
        let c6 = shaped_client(&mut net, "C6", &d, 4, 0.125, 0.25);
        let c7 = shaped_client(&mut net, "C7", &d, 4, 0.125, 1.25);
        let c8 = shaped_client(&mut net, "C8", &d, 5, 0.0, 0.25);
        let c9 = shaped_client(&mut net, "C9", &d, 5, 0.0, 0.25);
        assert_close(net.calc_client_latency(c0).unwrap(), 1.5);
        assert_close(net.calc_client_latency(c1).unwrap(), 1.5);
        assert_close(net.calc_client_latency(c2).unwrap(), 6.4);
        assert_close(net.calc_client_latency(c3).unwrap(), 6.4);
        assert_close(net.calc_client_latency(c4).unwrap(), 4.0);
        assert_close(net.calc_client_latency(c5).unwrap(), 4.0);
        assert_close(net.calc_client_latency(c6).unwrap(), 16.0);
        assert_close(net.calc_client_latency(c7).unwrap(), 16.0);
        assert_close(net.calc_client_latency(c8).unwrap(), 52.0);
        assert_close(net.calc_client_latency(c9).unwrap(), 52.0);
    }

    #[test]
    fn test_hop_by_hop_single_queue() {
        let mut net = Network::new(Analyzer::HopByHop);
        add_queues(&mut net, &["Q0"]);
        let c0 = shaped_client(&mut net, "C0", &["Q0"], 1, 0.25, 0.5);
        let _c1 = shaped_client(&mut net, "C1", &["Q0"], 1, 0.125, 1.0);
        // Hop-by-hop subtracts the equal-priority competitor instead of
        // aggregating with it: leftover is (0.875, 1/0.875), bound adds
        // b/R = 0.5/0.875.
        let expected = 1.0 / 0.875 + 0.5 / 0.875;
        assert_close(net.calc_client_latency(c0).unwrap(), expected);
    }

    #[test]
    fn test_hop_by_hop_propagates_output_burst() {
        let mut net = Network::new(Analyzer::HopByHop);
        add_queues(&mut net, &["Q0", "Q1"]);
        let c0 = shaped_client(&mut net, "C0", &["Q0", "Q1"], 1, 0.25, 0.5);
        // Alone in the network: both hops give full service, latency is
        // b/R at each hop with no burst growth (T = 0).
        assert_close(net.calc_client_latency(c0).unwrap(), 1.0);
    }

    #[test]
    fn test_aggregate_long_path_falls_through_to_shaper_latency() {
        let mut net = Network::new(Analyzer::AggregateTwoHop);
        add_queues(&mut net, &["Q0", "Q1", "Q2"]);
        let c0 = shaped_client(&mut net, "C0", &["Q0", "Q1", "Q2"], 1, 0.25, 0.5);
        // Three hops sit outside the aggregate model: no queueing latency
        // is charged, leaving only the (here zero) shaper delay.
        assert_close(net.calc_client_latency(c0).unwrap(), 0.0);
    }

    #[test]
    fn test_ignore_latency_short_circuits() {
        let mut net = Network::new(Analyzer::AggregateTwoHop);
        add_queues(&mut net, &["Q0"]);
        let c0 = shaped_client(&mut net, "C0", &["Q0"], 1, 0.25, 0.5);
        let f0 = net.flow_id("FC0").unwrap();
        net.flow_mut(f0).ignore_latency = true;
        assert_close(net.calc_client_latency(c0).unwrap(), 0.0);
    }

    #[test]
    fn test_saturated_queue_is_infinite() {
        let mut net = Network::new(Analyzer::AggregateTwoHop);
        add_queues(&mut net, &["Q0"]);
        let _c0 = shaped_client(&mut net, "C0", &["Q0"], 1, 1.0, 0.5);
        let c1 = shaped_client(&mut net, "C1", &["Q0"], 2, 0.125, 0.25);
        assert!(net.calc_client_latency(c1).unwrap().is_infinite());
    }

    #[test]
    fn test_fixed_analyzer_reports_preset() {
        let mut net = Network::new(Analyzer::Fixed);
        add_queues(&mut net, &["Q0"]);
        let c0 = shaped_client(&mut net, "C0", &["Q0"], 1, 0.25, 0.5);
        let f0 = net.flow_id("FC0").unwrap();
        net.set_fixed_latency(f0, 0.125).unwrap();
        assert_close(net.calc_client_latency(c0).unwrap(), 0.125);
    }
}
