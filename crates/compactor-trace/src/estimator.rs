//! Work estimators.
//!
//! An estimator maps `(request_size, is_read)` onto scalar work units for one
//! device. Network estimators keep work in bytes but weight the size by
//! direction: writes carry the data on the way in, reads carry it on the way
//! out, and the light direction only sees headers. Storage estimators
//! convert a request into device-seconds via a profiled bandwidth table.

use crate::{Result, TraceError};
use serde::{Deserialize, Serialize};

/// Serialized estimator configuration.
///
/// The `type` tag selects the estimator; the remaining fields are
/// per-variant. Network estimators model work as the affine function
/// `constant + factor * request_size` with separate parameters for the
/// data-heavy and non-data-heavy request directions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EstimatorSpec {
    /// Traffic from the client VM toward the server (writes carry data).
    #[serde(rename = "networkIn")]
    NetworkIn {
        #[serde(rename = "nonDataConstant")]
        non_data_constant: f64,
        #[serde(rename = "nonDataFactor")]
        non_data_factor: f64,
        #[serde(rename = "dataConstant")]
        data_constant: f64,
        #[serde(rename = "dataFactor")]
        data_factor: f64,
    },
    /// Traffic from the server back to the client VM (reads carry data).
    #[serde(rename = "networkOut")]
    NetworkOut {
        #[serde(rename = "nonDataConstant")]
        non_data_constant: f64,
        #[serde(rename = "nonDataFactor")]
        non_data_factor: f64,
        #[serde(rename = "dataConstant")]
        data_constant: f64,
        #[serde(rename = "dataFactor")]
        data_factor: f64,
    },
    /// SSD storage at the server, profiled by request size.
    #[serde(rename = "storageSSD")]
    StorageSsd {
        #[serde(rename = "bandwidthTable")]
        bandwidth_table: Vec<crate::profile::BandwidthRow>,
    },
}

impl EstimatorSpec {
    /// The `type` tag, used to key arrival-curve cache files.
    pub fn type_name(&self) -> &'static str {
        match self {
            EstimatorSpec::NetworkIn { .. } => "networkIn",
            EstimatorSpec::NetworkOut { .. } => "networkOut",
            EstimatorSpec::StorageSsd { .. } => "storageSSD",
        }
    }

    /// Builds the runtime estimator for this spec.
    pub fn build(&self) -> Estimator {
        match self {
            EstimatorSpec::NetworkIn {
                non_data_constant,
                non_data_factor,
                data_constant,
                data_factor,
            } => Estimator::NetworkIn(AffinePair {
                non_data_constant: *non_data_constant,
                non_data_factor: *non_data_factor,
                data_constant: *data_constant,
                data_factor: *data_factor,
            }),
            EstimatorSpec::NetworkOut {
                non_data_constant,
                non_data_factor,
                data_constant,
                data_factor,
            } => Estimator::NetworkOut(AffinePair {
                non_data_constant: *non_data_constant,
                non_data_factor: *non_data_factor,
                data_constant: *data_constant,
                data_factor: *data_factor,
            }),
            EstimatorSpec::StorageSsd { bandwidth_table } => Estimator::StorageSsd(SsdTable {
                rows: bandwidth_table.clone(),
            }),
        }
    }
}

/// Affine size-to-work parameters for one network direction.
#[derive(Debug, Clone, Copy)]
pub struct AffinePair {
    non_data_constant: f64,
    non_data_factor: f64,
    data_constant: f64,
    data_factor: f64,
}

impl AffinePair {
    fn data(&self, request_size: u32) -> f64 {
        self.data_constant + self.data_factor * f64::from(request_size)
    }

    fn non_data(&self, request_size: u32) -> f64 {
        self.non_data_constant + self.non_data_factor * f64::from(request_size)
    }
}

/// Profiled SSD bandwidth lookup.
#[derive(Debug, Clone)]
pub struct SsdTable {
    rows: Vec<crate::profile::BandwidthRow>,
}

impl SsdTable {
    /// Interpolated bandwidth (bytes/sec) for a request.
    ///
    /// Sizes beyond the table use the largest-size row; sizes between rows
    /// interpolate linearly between the adjacent entries.
    fn bandwidth(&self, request_size: u32, is_read: bool) -> Result<f64> {
        let pick = |row: &crate::profile::BandwidthRow| {
            if is_read {
                row.read_bandwidth
            } else {
                row.write_bandwidth
            }
        };
        let last = self
            .rows
            .last()
            .ok_or_else(|| TraceError::InvalidProfile("empty bandwidth table".into()))?;
        let mut bandwidth = pick(last);
        for i in 1..self.rows.len() {
            if request_size < self.rows[i].request_size {
                let x0 = f64::from(self.rows[i - 1].request_size);
                let x1 = f64::from(self.rows[i].request_size);
                let y0 = pick(&self.rows[i - 1]);
                let y1 = pick(&self.rows[i]);
                bandwidth = linear_interpolate(f64::from(request_size), x0, x1, y0, y1);
                break;
            }
        }
        Ok(bandwidth)
    }
}

/// A configured work estimator.
#[derive(Debug, Clone)]
pub enum Estimator {
    /// Client-to-server network direction.
    NetworkIn(AffinePair),
    /// Server-to-client network direction.
    NetworkOut(AffinePair),
    /// SSD storage at the server.
    StorageSsd(SsdTable),
}

impl Estimator {
    /// Maps one request onto work units.
    pub fn estimate_work(&self, request_size: u32, is_read: bool) -> Result<f64> {
        match self {
            Estimator::NetworkIn(p) => Ok(if is_read {
                p.non_data(request_size)
            } else {
                p.data(request_size)
            }),
            Estimator::NetworkOut(p) => Ok(if is_read {
                p.data(request_size)
            } else {
                p.non_data(request_size)
            }),
            Estimator::StorageSsd(table) => {
                let bandwidth = table.bandwidth(request_size, is_read)?;
                if bandwidth <= 0.0 {
                    return Err(TraceError::NonPositiveBandwidth {
                        request_size,
                        bandwidth,
                    });
                }
                Ok(f64::from(request_size) / bandwidth)
            }
        }
    }
}

fn linear_interpolate(x: f64, x0: f64, x1: f64, y0: f64, y1: f64) -> f64 {
    y0 + (y1 - y0) * (x - x0) / (x1 - x0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::BandwidthRow;

    fn network_spec(kind: &str) -> EstimatorSpec {
        let json = format!(
            r#"{{"type":"{kind}","nonDataConstant":1024.0,"nonDataFactor":0.5,"dataConstant":512.0,"dataFactor":2.0}}"#
        );
        serde_json::from_str(&json).unwrap()
    }

    fn ssd_rows() -> Vec<BandwidthRow> {
        vec![
            BandwidthRow { request_size: 1, read_bandwidth: 0.5, write_bandwidth: 0.5 },
            BandwidthRow { request_size: 2, read_bandwidth: 1.0, write_bandwidth: 0.5 },
            BandwidthRow { request_size: 4, read_bandwidth: 2.0, write_bandwidth: 1.0 },
            BandwidthRow { request_size: 6, read_bandwidth: 3.0, write_bandwidth: 1.5 },
        ]
    }

    #[test]
    fn test_network_in_directions() {
        let est = network_spec("networkIn").build();
        // Reads into the server are header-only traffic.
        assert_eq!(est.estimate_work(1024, true).unwrap(), 1536.0);
        // Writes carry the payload.
        assert_eq!(est.estimate_work(512, false).unwrap(), 1536.0);
    }

    #[test]
    fn test_network_out_directions() {
        let est = network_spec("networkOut").build();
        assert_eq!(est.estimate_work(1024, false).unwrap(), 1536.0);
        assert_eq!(est.estimate_work(512, true).unwrap(), 1536.0);
    }

    #[test]
    fn test_ssd_exact_and_interpolated() {
        let est = Estimator::StorageSsd(SsdTable { rows: ssd_rows() });
        // Size 3 reads interpolate between (2, 1.0) and (4, 2.0) -> bw 1.5.
        assert_eq!(est.estimate_work(3, true).unwrap(), 2.0);
        // Size 3 writes interpolate between (2, 0.5) and (4, 1.0) -> bw 0.75.
        assert_eq!(est.estimate_work(3, false).unwrap(), 4.0);
    }

    #[test]
    fn test_ssd_beyond_table_uses_last_row() {
        let est = Estimator::StorageSsd(SsdTable { rows: ssd_rows() });
        assert_eq!(est.estimate_work(12, true).unwrap(), 4.0); // 12 / 3.0
        assert_eq!(est.estimate_work(12, false).unwrap(), 8.0); // 12 / 1.5
    }

    #[test]
    fn test_ssd_non_positive_bandwidth() {
        let rows = vec![
            BandwidthRow { request_size: 4, read_bandwidth: 1.0, write_bandwidth: 1.0 },
            BandwidthRow { request_size: 8, read_bandwidth: 3.0, write_bandwidth: 3.0 },
        ];
        let est = Estimator::StorageSsd(SsdTable { rows });
        // Extrapolating below the first row drives the bandwidth negative.
        assert!(matches!(
            est.estimate_work(1, true),
            Err(TraceError::NonPositiveBandwidth { .. })
        ));
    }

    #[test]
    fn test_spec_type_names() {
        assert_eq!(network_spec("networkIn").type_name(), "networkIn");
        assert_eq!(network_spec("networkOut").type_name(), "networkOut");
        let ssd = EstimatorSpec::StorageSsd { bandwidth_table: ssd_rows() };
        assert_eq!(ssd.type_name(), "storageSSD");
    }
}
