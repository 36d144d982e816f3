//! Piecewise-linear arrival curves.
//!
//! An arrival curve is the upper envelope of cumulative work over every
//! sub-interval of a trace: for any window of length `t`, the work arriving
//! inside it is at most `A(t)`. Curves are represented as breakpoints with
//! outgoing slopes, concave with non-increasing slopes, and always begin
//! with the synthetic `(0, 0, +inf)` origin point.
//!
//! Fitting works by simulating a virtual token bucket at a sweep of drain
//! rates: each rate yields the smallest burst that would have kept the
//! bucket from overflowing, and the `(rate, burst)` set folds into the
//! concave envelope.

use crate::{DncError, RateBurst, Result};
use compactor_trace::ProcessedTrace;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

/// Breakpoints kept by [`prune_arrival_curve`] when fitting from a trace.
pub const PRUNED_POINTS: usize = 12;

/// Breakpoints beyond this x are dropped before other pruning; windows this
/// long only matter for latency targets far above anything we admit.
const PRUNE_X_THRESHOLD: f64 = 30.0;

/// An (x, y) point with the slope of the segment leaving it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PointSlope {
    pub x: f64,
    pub y: f64,
    pub slope: f64,
}

impl PointSlope {
    /// The synthetic origin point every curve starts with.
    pub fn origin() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            slope: f64::INFINITY,
        }
    }

    /// y-intercept of the line through this point at its slope.
    pub fn y_intercept(&self) -> f64 {
        self.y - self.slope * self.x
    }
}

/// A piecewise-linear curve as a breakpoint list.
pub type Curve = Vec<PointSlope>;

/// Intersection of the lines through `p1` and `p2`.
///
/// The result carries `p1`'s slope; if the slopes are equal, `p1` is
/// returned unchanged.
pub fn intersection(p1: &PointSlope, p2: &PointSlope) -> PointSlope {
    let mut point = *p1;
    if p1.slope != p2.slope {
        if p1.slope.is_infinite() {
            point.x = p1.x;
            point.y = p2.y - p2.slope * (p2.x - p1.x);
        } else if p2.slope.is_infinite() {
            point.x = p2.x;
            point.y = p1.y - p1.slope * (p1.x - p2.x);
        } else {
            let b1 = p1.y_intercept();
            let b2 = p2.y_intercept();
            point.x = (b2 - b1) / (p1.slope - p2.slope);
            point.y = p1.slope * point.x + b1;
        }
    }
    point
}

/// Average work rate over the whole trace, the floor of any feasible shaper.
pub fn calc_min_rate(trace: &mut ProcessedTrace) -> Result<f64> {
    trace.reset()?;
    let Some(first) = trace.next_entry()? else {
        return Err(DncError::EmptyTrace {
            path: trace.path().to_path_buf(),
        });
    };
    let first_ns = first.arrival_ns;
    let mut last_ns = first.arrival_ns;
    let mut total_work = first.work;
    while let Some(entry) = trace.next_entry()? {
        total_work += entry.work;
        last_ns = entry.arrival_ns;
    }
    Ok(total_work / seconds(last_ns.saturating_sub(first_ns)))
}

/// Smallest burst sustaining each drain rate.
///
/// Simulates one virtual token bucket per rate over the trace: inter-arrival
/// time drains the bucket (clamped at zero), each request deposits its work,
/// and the high-water mark is the required burst. Returned bursts parallel
/// `rates`.
pub fn rb_gen(trace: &mut ProcessedTrace, rates: &[f64]) -> Result<Vec<f64>> {
    let mut buckets = vec![0.0f64; rates.len()];
    let mut bursts = vec![0.0f64; rates.len()];
    trace.reset()?;
    let mut prev_ns = 0u64;
    while let Some(entry) = trace.next_entry()? {
        let interarrival = seconds(entry.arrival_ns.saturating_sub(prev_ns));
        for (i, &rate) in rates.iter().enumerate() {
            buckets[i] = (buckets[i] - rate * interarrival).max(0.0);
            buckets[i] += entry.work;
            if buckets[i] > bursts[i] {
                bursts[i] = buckets[i];
            }
        }
        prev_ns = entry.arrival_ns;
    }
    Ok(bursts)
}

/// Folds a `(rate, burst)` set, rates strictly decreasing, into the concave
/// envelope curve.
///
/// Each pair contributes the line `y = burst + rate * x`; a segment whose
/// intersection with the running envelope does not advance in x is dominated
/// and popped.
pub fn rb_curve_to_arrival_curve(points: &[(f64, f64)]) -> Curve {
    let mut curve: Curve = vec![PointSlope::origin()];
    for &(rate, burst) in points {
        let mut point = PointSlope {
            x: 0.0,
            y: burst,
            slope: rate,
        };
        while curve.len() > 1 {
            let last = &curve[curve.len() - 1];
            let candidate = intersection(&point, last);
            if candidate.x > last.x {
                point = candidate;
                break;
            }
            curve.pop();
        }
        curve.push(point);
    }
    curve
}

/// Approximates a curve in place by one with at most `n` breakpoints
/// (excluding the origin point).
///
/// Tail breakpoints beyond the x threshold go first; after that, the
/// interior breakpoint with the smallest rise to its right neighbor is
/// repeatedly folded into the intersection of the surrounding segments.
pub fn prune_arrival_curve(curve: &mut Curve, n: usize) {
    let n = n.max(1) + 1;
    while curve.len() > n {
        if curve[curve.len() - 1].x < PRUNE_X_THRESHOLD {
            break;
        }
        curve.pop();
    }
    while curve.len() > n {
        let mut to_remove = 1;
        let mut min_dy = f64::INFINITY;
        for i in 1..curve.len() - 1 {
            let dy = curve[i + 1].y - curve[i].y;
            if dy < min_dy {
                min_dy = dy;
                to_remove = i;
            }
        }
        curve.remove(to_remove);
        curve[to_remove] = intersection(&curve[to_remove], &curve[to_remove - 1]);
    }
}

/// Fits an arrival curve from a trace.
///
/// Sweeps candidate rates from `max_rate` down to the trace's average rate
/// in steps of `0.001 * max_rate`, then folds and prunes.
pub fn calc_arrival_curve(trace: &mut ProcessedTrace, max_rate: f64) -> Result<Curve> {
    let min_rate = calc_min_rate(trace)?;
    let mut rates = Vec::new();
    let mut rate = max_rate;
    while rate >= min_rate {
        rates.push(rate);
        rate -= 0.001 * max_rate;
    }
    let bursts = rb_gen(trace, &rates)?;
    let points: Vec<(f64, f64)> = rates.into_iter().zip(bursts).collect();
    let mut curve = rb_curve_to_arrival_curve(&points);
    prune_arrival_curve(&mut curve, PRUNED_POINTS);
    Ok(curve)
}

/// Worst-case delay between a piecewise-linear arrival and service curve.
///
/// The delay is the maximum horizontal distance from the arrival curve to
/// the service curve. For piecewise-linear curves the maximum sits at a
/// breakpoint of one of them, so both breakpoint lists are scanned in
/// ascending y, projecting each onto the opposite curve.
pub fn curve_latency(arrival: &[PointSlope], service: &[PointSlope]) -> f64 {
    let mut max_latency = 0.0f64;
    let mut ai = 0usize;
    let mut si = 0usize;
    while ai < arrival.len() || si < service.len() {
        let ay = arrival.get(ai).map_or(f64::INFINITY, |p| p.y);
        let sy = service.get(si).map_or(f64::INFINITY, |p| p.y);
        let latency = if ay < sy {
            let ap = &arrival[ai];
            ai += 1;
            if si == 0 {
                0.0
            } else {
                let sp = &service[si - 1];
                let dx = (ap.y - sp.y) / sp.slope;
                (sp.x + dx) - ap.x
            }
        } else if ay > sy {
            let sp = &service[si];
            si += 1;
            if ai == 0 {
                0.0
            } else {
                let ap = &arrival[ai - 1];
                let dx = (sp.y - ap.y) / ap.slope;
                sp.x - (ap.x + dx)
            }
        } else {
            let l = service[si].x - arrival[ai].x;
            ai += 1;
            si += 1;
            l
        };
        if latency > max_latency {
            max_latency = latency;
        }
    }
    max_latency
}

/// Delay a `(rate, burst)` limiter adds in front of the given arrival curve.
///
/// The limiter admits at most `burst + rate * t`, so the added delay is the
/// maximum horizontal distance from the full arrival curve to that line.
pub fn shaper_latency(arrival: &[PointSlope], shaper: RateBurst) -> f64 {
    let service = [
        PointSlope::origin(),
        PointSlope {
            x: 0.0,
            y: shaper.burst,
            slope: shaper.rate,
        },
    ];
    curve_latency(arrival, &service)
}

/// Reads a cached arrival curve.
///
/// Returns `Ok(None)` when the file does not exist. Lines are
/// `x,y,slope`; lines that do not parse are skipped. The origin point is
/// prepended on load since the file stores only real breakpoints.
pub fn load_arrival_curve(path: impl AsRef<Path>) -> Result<Option<Curve>> {
    let path = path.as_ref();
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(DncError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    let mut curve: Curve = vec![PointSlope::origin()];
    for line in BufReader::new(file).lines() {
        let line = line.map_err(|source| DncError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut fields = line.split(',').map(str::trim).map(str::parse::<f64>);
        let (Some(Ok(x)), Some(Ok(y)), Some(Ok(slope))) =
            (fields.next(), fields.next(), fields.next())
        else {
            continue;
        };
        curve.push(PointSlope { x, y, slope });
    }
    Ok(Some(curve))
}

/// Writes an arrival curve to its cache file, origin point excluded.
///
/// Values are rendered at 15 significant digits, the cache format's
/// documented precision.
pub fn store_arrival_curve(curve: &[PointSlope], path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let io_err = |source| DncError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }
    let mut file = BufWriter::new(File::create(path).map_err(io_err)?);
    for point in curve.iter().skip(1) {
        writeln!(
            file,
            "{},{},{}",
            format_sig15(point.x),
            format_sig15(point.y),
            format_sig15(point.slope)
        )
        .map_err(io_err)?;
    }
    file.flush().map_err(io_err)?;
    Ok(())
}

/// Renders a value at 15 significant digits with trailing zeros trimmed,
/// switching to scientific notation for very small or very large
/// magnitudes.
fn format_sig15(value: f64) -> String {
    if value == 0.0 || !value.is_finite() {
        return value.to_string();
    }
    let sci = format!("{:.*e}", 14, value);
    let Some((mantissa, exponent)) = sci.split_once('e') else {
        return sci;
    };
    let exponent: i32 = exponent.parse().unwrap_or(0);
    let negative = mantissa.starts_with('-');
    let digits: String = mantissa.chars().filter(char::is_ascii_digit).collect();
    let digits = digits.trim_end_matches('0');
    let digits = if digits.is_empty() { "0" } else { digits };
    let body = if !(-4..15).contains(&exponent) {
        match digits.split_at(1) {
            (first, "") => format!("{first}e{exponent}"),
            (first, rest) => format!("{first}.{rest}e{exponent}"),
        }
    } else if exponent < 0 {
        let zeros = "0".repeat((-exponent - 1) as usize);
        format!("0.{zeros}{digits}")
    } else {
        let point = (exponent + 1) as usize;
        if digits.len() <= point {
            format!("{}{}", digits, "0".repeat(point - digits.len()))
        } else {
            format!("{}.{}", &digits[..point], &digits[point..])
        }
    };
    if negative {
        format!("-{body}")
    } else {
        body
    }
}

/// Loads a flow's arrival curve from cache, or fits it from the trace and
/// populates the cache.
///
/// A cache write failure only loses the cache, not the placement, so it is
/// logged and swallowed.
pub fn arrival_curve_for_trace(
    trace_path: impl AsRef<Path>,
    estimator: &compactor_trace::EstimatorSpec,
    max_rate: f64,
    cache_path: Option<&Path>,
) -> Result<Curve> {
    if let Some(cache) = cache_path {
        if let Some(curve) = load_arrival_curve(cache)? {
            return Ok(curve);
        }
    }
    let mut trace = ProcessedTrace::open(trace_path.as_ref(), estimator.build())?;
    let curve = calc_arrival_curve(&mut trace, max_rate)?;
    if let Some(cache) = cache_path {
        if let Err(e) = store_arrival_curve(&curve, cache) {
            tracing::warn!(cache = %cache.display(), error = %e, "failed to cache arrival curve");
        }
    }
    Ok(curve)
}

fn seconds(ns: u64) -> f64 {
    ns as f64 / 1e9
}
