//! riskpath - Monte Carlo equity-path simulation from realized trades.
//!
//! # Overview
//!
//! riskpath answers "how likely is this sizing rule to reach a target balance
//! before it ruins the account?" by replaying bootstrap resamples of a
//! historical trade record:
//!
//! - **Seeded resampling**: independent draws or block bootstrap, with optional
//!   multiplicative noise and regime-conditioned block starts
//! - **Pluggable sizing**: fixed-fraction and empirical-notional policies behind
//!   one [`risk::PositionSizer`] trait
//! - **Explicit outcomes**: every path ends as target reached, ruined or censored
//! - **Reproducible reports**: byte-identical JSON for a fixed seed, with config
//!   and data fingerprints
//! - **Parallel trials**: rayon with per-trial RNG streams
//!
//! # Quick Start
//!
//! ```no_run
//! use riskpath::{
//!     config::SimulationConfig,
//!     data::{DataConfig, TradeSampleStore},
//!     monte_carlo::TrialAggregator,
//! };
//!
//! let store = TradeSampleStore::load("data/trades.csv", &DataConfig::default()).unwrap();
//! let config = SimulationConfig::default()
//!     .with_starting_capitals(vec![100.0, 1_000.0])
//!     .with_fixed_fraction(0.05);
//!
//! let report = TrialAggregator::new(config, &store).unwrap().run().unwrap();
//! for summary in &report.summaries {
//!     println!(
//!         "{} @ {}: success {:.1}%, ruin {:.1}%",
//!         summary.policy,
//!         summary.starting_capital,
//!         summary.success_rate * 100.0,
//!         summary.ruin_rate * 100.0
//!     );
//! }
//! ```
//!
//! # Custom Sizing
//!
//! ```
//! use riskpath::data::Observation;
//! use riskpath::risk::PositionSizer;
//!
//! struct HalfKelly {
//!     edge: f64,
//! }
//!
//! impl PositionSizer for HalfKelly {
//!     fn name(&self) -> &str {
//!         "half-kelly"
//!     }
//!
//!     fn size_fraction(&self, _equity: f64, _observation: &Observation) -> f64 {
//!         self.edge / 2.0
//!     }
//! }
//! ```
//!
//! # Modules
//!
//! - [`rng`]: Seeded linear congruential generator
//! - [`data`]: Historical trade loading (CSV, JSON)
//! - [`resample`]: Independent and block-bootstrap resampling
//! - [`risk`]: Position sizing policies
//! - [`path`]: Single-trial equity path state machine
//! - [`monte_carlo`]: Trial aggregation and summary statistics
//! - [`config`]: Runtime and TOML configuration
//! - [`export`]: Report persistence and formatting
//! - [`metadata`]: Config and data fingerprints

pub mod config;
pub mod data;
pub mod error;
pub mod export;
pub mod metadata;
pub mod monte_carlo;
pub mod path;
pub mod resample;
pub mod risk;
pub mod rng;

pub use config::{SimulationConfig, SimulationFileConfig};
pub use data::{Observation, TradeSampleStore};
pub use error::{Result, SimulationError};
pub use export::{ReportFormatter, SimulationReport};
pub use monte_carlo::{percentile, SimulationSummary, TrialAggregator};
pub use path::{PathOutcome, PathSimulator, TrialResult};
pub use resample::{ResampleMode, Resampler};
pub use risk::{PositionSizer, SizingPolicy};
pub use rng::SeededRng;
