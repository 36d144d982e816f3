//! Device bandwidth profiles.
//!
//! Profiles are produced offline by the device-profiling tool and consumed
//! here to configure storage estimators. The multiprogramming-level and
//! outstanding-byte fields are carried for the enforcement side and are not
//! used by the analysis.

use crate::{EstimatorSpec, Result, TraceError};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One row of a storage bandwidth table, sorted by request size.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BandwidthRow {
    /// Request size in bytes.
    #[serde(rename = "requestSize")]
    pub request_size: u32,
    /// Read bandwidth at this request size (bytes/sec).
    #[serde(rename = "readBandwidth")]
    pub read_bandwidth: f64,
    /// Write bandwidth at this request size (bytes/sec).
    #[serde(rename = "writeBandwidth")]
    pub write_bandwidth: f64,
}

/// A profiled storage device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceProfile {
    /// Device type tag; only `storageSSD` is recognized.
    #[serde(rename = "type")]
    pub device_type: String,
    /// Bandwidth rows sorted by request size.
    #[serde(rename = "bandwidthTable")]
    pub bandwidth_table: Vec<BandwidthRow>,
    /// Read multiprogramming level, if profiled.
    #[serde(rename = "readMPL", default, skip_serializing_if = "Option::is_none")]
    pub read_mpl: Option<u32>,
    /// Write multiprogramming level, if profiled.
    #[serde(rename = "writeMPL", default, skip_serializing_if = "Option::is_none")]
    pub write_mpl: Option<u32>,
    /// Outstanding read byte cap, if profiled.
    #[serde(
        rename = "maxOutstandingReadBytes",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub max_outstanding_read_bytes: Option<u64>,
    /// Outstanding write byte cap, if profiled.
    #[serde(
        rename = "maxOutstandingWriteBytes",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub max_outstanding_write_bytes: Option<u64>,
}

impl DeviceProfile {
    /// Loads and validates a profile from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| TraceError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let profile: DeviceProfile = serde_json::from_str(&text)
            .map_err(|e| TraceError::InvalidProfile(e.to_string()))?;
        profile.validate()?;
        Ok(profile)
    }

    /// Checks structural invariants of the profile.
    pub fn validate(&self) -> Result<()> {
        if self.device_type != "storageSSD" {
            return Err(TraceError::InvalidProfile(format!(
                "unsupported device type {:?}",
                self.device_type
            )));
        }
        if self.bandwidth_table.is_empty() {
            return Err(TraceError::InvalidProfile("empty bandwidth table".into()));
        }
        for pair in self.bandwidth_table.windows(2) {
            if pair[1].request_size <= pair[0].request_size {
                return Err(TraceError::InvalidProfile(
                    "bandwidth table not sorted by request size".into(),
                ));
            }
        }
        Ok(())
    }

    /// Estimator spec backed by this profile's bandwidth table.
    pub fn storage_estimator(&self) -> EstimatorSpec {
        EstimatorSpec::StorageSsd {
            bandwidth_table: self.bandwidth_table.clone(),
        }
    }
}
