//! Operators over simple arrival and service curves.
//!
//! The analysis stays closed over two shapes: token-bucket arrival curves
//! `y = burst + rate * t` and rate-latency service curves
//! `y = rate * max(0, t - latency)`. Every operator takes and returns these,
//! which keeps the per-hop algebra O(1).

use serde::{Deserialize, Serialize};

/// A token-bucket arrival bound: at most `burst + rate * t` work in any
/// window of length `t`. Doubles as a flow's shaper configuration, where
/// `(0, 0)` means "not yet optimized".
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RateBurst {
    pub rate: f64,
    pub burst: f64,
}

impl RateBurst {
    /// The arrival curve of a flow that never sends.
    pub const ZERO: RateBurst = RateBurst { rate: 0.0, burst: 0.0 };

    pub fn new(rate: f64, burst: f64) -> Self {
        Self { rate, burst }
    }

    /// Whether this is the uninitialized `(0, 0)` shaper.
    pub fn is_zero(&self) -> bool {
        self.rate == 0.0 && self.burst == 0.0
    }

    /// Aggregate of two arrival curves sharing a queue.
    pub fn aggregate(self, other: RateBurst) -> RateBurst {
        RateBurst {
            rate: self.rate + other.rate,
            burst: self.burst + other.burst,
        }
    }

    /// Departure bound after receiving service `s`: the burst grows by the
    /// work that can pile up during the service delay.
    pub fn output(self, s: RateLatency) -> RateBurst {
        RateBurst {
            rate: self.rate,
            burst: self.burst + self.rate * s.latency,
        }
    }
}

/// A rate-latency service bound: at least `rate * (t - latency)` work served
/// by time `t`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLatency {
    pub rate: f64,
    pub latency: f64,
}

impl RateLatency {
    /// The constant service of a queue draining at `bandwidth`.
    pub fn constant(bandwidth: f64) -> Self {
        Self {
            rate: bandwidth,
            latency: 0.0,
        }
    }

    /// Convolution of two services in series: the bottleneck rate, delays
    /// added.
    pub fn convolve(self, other: RateLatency) -> RateLatency {
        RateLatency {
            rate: self.rate.min(other.rate),
            latency: self.latency + other.latency,
        }
    }

    /// Service left over after this server has absorbed arrival `a`.
    ///
    /// If the arrival rate meets or exceeds the service rate there is no
    /// leftover; the result is a dead service with infinite delay.
    pub fn leftover(self, a: RateBurst) -> RateLatency {
        let rate = self.rate - a.rate;
        if rate <= 0.0 {
            return RateLatency {
                rate: 0.0,
                latency: f64::INFINITY,
            };
        }
        RateLatency {
            rate,
            latency: self.latency + (a.burst + a.rate * self.latency) / rate,
        }
    }
}

/// Worst-case delay of arrival `a` under service `s`.
pub fn latency_bound(a: RateBurst, s: RateLatency) -> f64 {
    if a.rate > s.rate || s.rate <= 0.0 {
        f64::INFINITY
    } else {
        s.latency + a.burst / s.rate
    }
}
