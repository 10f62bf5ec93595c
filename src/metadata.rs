//! Reproducibility fingerprints for runs and their input data.

use crate::error::{Result, SimulationError};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::debug;

/// Fingerprint of the historical data file a run was fed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataFileMetadata {
    pub path: String,
    /// File size in bytes.
    pub size: u64,
    /// SHA-256 of the file contents.
    pub checksum: String,
}

/// SHA-256 of arbitrary bytes, lowercase hex.
pub fn compute_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// SHA-256 of a file's contents.
pub fn compute_file_checksum(path: impl AsRef<Path>) -> Result<String> {
    let data = std::fs::read(path)?;
    Ok(compute_hash(&data))
}

/// SHA-256 of a value's JSON serialization.
///
/// Two configurations hash equal exactly when they serialize equal, so a
/// report can be matched to the configuration that produced it.
pub fn compute_config_hash<T: Serialize>(config: &T) -> Result<String> {
    let bytes = serde_json::to_vec(config)?;
    Ok(compute_hash(&bytes))
}

/// Size and checksum of a data file.
pub fn track_data_file(path: impl AsRef<Path>) -> Result<DataFileMetadata> {
    let path = path.as_ref();
    let metadata = std::fs::metadata(path).map_err(|e| {
        SimulationError::DataError(format!("cannot read {}: {}", path.display(), e))
    })?;
    let checksum = compute_file_checksum(path)?;
    debug!("Data file {} sha256={}", path.display(), checksum);

    Ok(DataFileMetadata {
        path: path.display().to_string(),
        size: metadata.len(),
        checksum,
    })
}
