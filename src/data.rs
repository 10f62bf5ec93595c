//! Historical trade samples and their loaders.
//!
//! A [`TradeSampleStore`] is loaded once per simulation run and is read-only
//! afterwards. Row order is kept as-is: it only matters for block bootstrap,
//! where contiguous windows are copied out of the store.

use crate::error::{Result, SimulationError};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use csv::ReaderBuilder;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tracing::{debug, info};

/// Header names accepted for the return column.
const RETURN_COLUMNS: &[&str] = &["return", "Return", "returns", "ret", "r"];
/// Header names accepted for the notional column.
const NOTIONAL_COLUMNS: &[&str] = &["notional", "Notional", "notional_usd", "size", "usd"];

/// One historical unit of evidence.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Realized return as a fraction (0.1 = +10%).
    #[serde(rename = "return")]
    pub ret: f64,
    /// Notional size of the historical trade.
    pub notional: f64,
    /// Time of the observation, if the source carries one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    /// Coherence proxy, used only for regime filtering.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coherence: Option<f64>,
    /// Energy proxy, used only for regime filtering.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub energy: Option<f64>,
}

impl Observation {
    /// Create an observation with no auxiliary fields.
    pub fn new(ret: f64, notional: f64) -> Self {
        Self {
            ret,
            notional,
            timestamp: None,
            coherence: None,
            energy: None,
        }
    }

    /// Attach a timestamp.
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Attach a coherence reading.
    pub fn with_coherence(mut self, coherence: f64) -> Self {
        self.coherence = Some(coherence);
        self
    }

    /// Attach an energy reading.
    pub fn with_energy(mut self, energy: f64) -> Self {
        self.energy = Some(energy);
        self
    }

    fn check_finite(&self, row: usize) -> Result<()> {
        let fields = [
            ("return", Some(self.ret)),
            ("notional", Some(self.notional)),
            ("coherence", self.coherence),
            ("energy", self.energy),
        ];
        for (name, value) in fields {
            if let Some(v) = value {
                if !v.is_finite() {
                    return Err(SimulationError::DataError(format!(
                        "non-finite value {} in column '{}' at row {}",
                        v, name, row
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Raw row shared by the CSV and JSON loaders.
#[derive(Debug, Deserialize)]
struct RawRow {
    #[serde(
        rename = "return",
        alias = "Return",
        alias = "returns",
        alias = "ret",
        alias = "r"
    )]
    ret: f64,
    #[serde(
        alias = "Notional",
        alias = "notional_usd",
        alias = "size",
        alias = "usd"
    )]
    notional: f64,
    #[serde(
        default,
        alias = "Timestamp",
        alias = "time",
        alias = "Time",
        alias = "date",
        alias = "Date",
        alias = "datetime"
    )]
    timestamp: Option<String>,
    #[serde(default, alias = "Coherence")]
    coherence: Option<f64>,
    #[serde(default, alias = "Energy")]
    energy: Option<f64>,
}

impl RawRow {
    fn into_observation(self, row: usize, date_format: Option<&str>) -> Result<Observation> {
        let timestamp = match self.timestamp.as_deref().map(str::trim) {
            Some(s) if !s.is_empty() => Some(parse_datetime(s, date_format).map_err(|e| {
                SimulationError::DataError(format!("row {}: {}", row, e))
            })?),
            _ => None,
        };

        let obs = Observation {
            ret: self.ret,
            notional: self.notional,
            timestamp,
            coherence: self.coherence,
            energy: self.energy,
        };
        obs.check_finite(row)?;
        Ok(obs)
    }
}

/// Loader options.
#[derive(Debug, Clone)]
pub struct DataConfig {
    /// CSV delimiter character.
    pub delimiter: u8,
    /// Explicit timestamp format, tried before the built-in formats.
    pub date_format: Option<String>,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            delimiter: b',',
            date_format: None,
        }
    }
}

/// Parse a date string with multiple format attempts.
fn parse_datetime(s: &str, format: Option<&str>) -> Result<DateTime<Utc>> {
    if let Some(fmt) = format {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(Utc.from_utc_datetime(&dt));
        }
        if let Some(dt) = NaiveDate::parse_from_str(s, fmt)
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
        {
            return Ok(Utc.from_utc_datetime(&dt));
        }
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    let datetime_formats = [
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y/%m/%d %H:%M:%S",
    ];
    for fmt in &datetime_formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(Utc.from_utc_datetime(&dt));
        }
    }

    for fmt in &["%Y-%m-%d", "%Y/%m/%d", "%d/%m/%Y"] {
        if let Some(dt) = NaiveDate::parse_from_str(s, fmt)
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
        {
            return Ok(Utc.from_utc_datetime(&dt));
        }
    }

    // Unix seconds
    if let Ok(ts) = s.parse::<i64>() {
        if let Some(dt) = DateTime::from_timestamp(ts, 0) {
            return Ok(dt);
        }
    }

    Err(SimulationError::DataError(format!(
        "could not parse timestamp: '{}'",
        s
    )))
}

/// Summary statistics of a loaded store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreStats {
    pub count: usize,
    pub mean_return: f64,
    pub std_return: f64,
    pub min_return: f64,
    pub max_return: f64,
    pub win_rate: f64,
    pub mean_notional: f64,
}

/// Immutable, ordered collection of historical observations.
#[derive(Debug, Clone)]
pub struct TradeSampleStore {
    observations: Vec<Observation>,
    source: Option<String>,
}

impl TradeSampleStore {
    /// Build a store from observations already in memory.
    pub fn from_observations(observations: Vec<Observation>) -> Result<Self> {
        if observations.is_empty() {
            return Err(SimulationError::DataError(
                "historical sample is empty".to_string(),
            ));
        }
        for (i, obs) in observations.iter().enumerate() {
            obs.check_finite(i + 1)?;
        }
        Ok(Self {
            observations,
            source: None,
        })
    }

    /// Build a store from plain returns, with a constant notional.
    pub fn from_returns(returns: &[f64], notional: f64) -> Result<Self> {
        Self::from_observations(
            returns
                .iter()
                .map(|&r| Observation::new(r, notional))
                .collect(),
        )
    }

    /// Load a store, picking the format from the file extension.
    ///
    /// - `.csv` -> CSV
    /// - `.tsv` -> CSV, tab-delimited unless another delimiter was set
    /// - `.json` -> JSON array of objects
    pub fn load(path: impl AsRef<Path>, config: &DataConfig) -> Result<Self> {
        let path = path.as_ref();
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());

        match ext.as_deref() {
            Some("csv") => Self::load_csv(path, config),
            Some("tsv") if config.delimiter == b',' => {
                let tabbed = DataConfig {
                    delimiter: b'\t',
                    ..config.clone()
                };
                Self::load_csv(path, &tabbed)
            }
            Some("tsv") => Self::load_csv(path, config),
            Some("json") => Self::load_json(path, config),
            _ => Err(SimulationError::DataError(format!(
                "unknown file format for: {}. Supported: .csv, .tsv, .json",
                path.display()
            ))),
        }
    }

    /// Load observations from a CSV file with a header row.
    pub fn load_csv(path: impl AsRef<Path>, config: &DataConfig) -> Result<Self> {
        let path = path.as_ref();
        ensure_exists(path)?;
        info!("Loading trade samples from: {}", path.display());

        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .delimiter(config.delimiter)
            .trim(csv::Trim::All)
            .from_path(path)?;

        let headers = reader.headers()?.clone();
        let has = |names: &[&str]| headers.iter().any(|h| names.contains(&h));
        if !has(RETURN_COLUMNS) {
            return Err(SimulationError::DataError(format!(
                "{}: missing required column 'return' (accepted: {})",
                path.display(),
                RETURN_COLUMNS.join(", ")
            )));
        }
        if !has(NOTIONAL_COLUMNS) {
            return Err(SimulationError::DataError(format!(
                "{}: missing required column 'notional' (accepted: {})",
                path.display(),
                NOTIONAL_COLUMNS.join(", ")
            )));
        }

        let mut observations = Vec::new();
        for (i, record) in reader.deserialize::<RawRow>().enumerate() {
            let row = i + 1;
            let raw = record.map_err(|e| {
                SimulationError::DataError(format!("{}: row {}: {}", path.display(), row, e))
            })?;
            observations.push(raw.into_observation(row, config.date_format.as_deref())?);
        }

        Self::finish(observations, path)
    }

    /// Load observations from a JSON array of objects.
    pub fn load_json(path: impl AsRef<Path>, config: &DataConfig) -> Result<Self> {
        let path = path.as_ref();
        ensure_exists(path)?;
        info!("Loading trade samples from: {}", path.display());

        let file = File::open(path)?;
        let rows: Vec<RawRow> = serde_json::from_reader(BufReader::new(file)).map_err(|e| {
            SimulationError::DataError(format!("{}: {}", path.display(), e))
        })?;

        let observations = rows
            .into_iter()
            .enumerate()
            .map(|(i, raw)| raw.into_observation(i + 1, config.date_format.as_deref()))
            .collect::<Result<Vec<_>>>()?;

        Self::finish(observations, path)
    }

    fn finish(observations: Vec<Observation>, path: &Path) -> Result<Self> {
        if observations.is_empty() {
            return Err(SimulationError::DataError(format!(
                "{}: no observations found",
                path.display()
            )));
        }
        info!("Loaded {} observations", observations.len());
        Ok(Self {
            observations,
            source: Some(path.display().to_string()),
        })
    }

    /// Observation at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index >= self.size()`; callers derive indices from `size()`.
    pub fn get(&self, index: usize) -> &Observation {
        assert!(
            index < self.observations.len(),
            "observation index {} out of range for store of size {}",
            index,
            self.observations.len()
        );
        &self.observations[index]
    }

    /// Number of observations.
    pub fn size(&self) -> usize {
        self.observations.len()
    }

    /// All observations in load order.
    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    /// Where the store was loaded from, if it came from a file.
    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    /// True when every observation carries a coherence reading.
    pub fn has_coherence(&self) -> bool {
        self.observations.iter().all(|o| o.coherence.is_some())
    }

    /// True when every observation carries an energy reading.
    pub fn has_energy(&self) -> bool {
        self.observations.iter().all(|o| o.energy.is_some())
    }

    /// First timestamp in load order, if any observation has one.
    pub fn first_timestamp(&self) -> Option<DateTime<Utc>> {
        self.observations.iter().find_map(|o| o.timestamp)
    }

    /// Every start offset `i` in `[0, size - window_size]` whose window
    /// `[i, i + window_size)` satisfies `predicate`.
    ///
    /// Returns an empty list when `window_size` is zero or exceeds the store.
    pub fn filter_start_indices<F>(&self, window_size: usize, predicate: F) -> Vec<usize>
    where
        F: Fn(&[Observation]) -> bool,
    {
        if window_size == 0 || window_size > self.observations.len() {
            return Vec::new();
        }
        let indices: Vec<usize> = self
            .observations
            .windows(window_size)
            .enumerate()
            .filter(|(_, w)| predicate(w))
            .map(|(i, _)| i)
            .collect();
        debug!(
            "{} of {} windows of size {} pass the filter",
            indices.len(),
            self.observations.len() - window_size + 1,
            window_size
        );
        indices
    }

    /// Descriptive statistics of the return column.
    pub fn stats(&self) -> StoreStats {
        let n = self.observations.len() as f64;
        let returns: Vec<f64> = self.observations.iter().map(|o| o.ret).collect();
        let mean = returns.iter().sum::<f64>() / n;
        let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;

        StoreStats {
            count: self.observations.len(),
            mean_return: mean,
            std_return: variance.sqrt(),
            min_return: returns.iter().copied().fold(f64::INFINITY, f64::min),
            max_return: returns.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            win_rate: returns.iter().filter(|&&r| r > 0.0).count() as f64 / n,
            mean_notional: self.observations.iter().map(|o| o.notional).sum::<f64>() / n,
        }
    }
}

fn ensure_exists(path: &Path) -> Result<()> {
    if !path.exists() {
        return Err(SimulationError::DataError(format!(
            "historical trade file not found: {}",
            path.display()
        )));
    }
    Ok(())
}
