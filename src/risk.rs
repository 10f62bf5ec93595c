//! Position sizing policies.
//!
//! A sizer maps `(current equity, sampled observation)` to the fraction of
//! equity put at risk on one step. Sizers are pure and hold no mutable state,
//! so one instance can be shared by every trial, including across threads.

use crate::data::Observation;
use crate::error::{Result, SimulationError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Maps equity and a sampled observation to a risk fraction.
pub trait PositionSizer: Send + Sync {
    /// Short label used in reports.
    fn name(&self) -> &str;

    /// Fraction of equity to risk on this step. Callers clamp the result
    /// with [`clamp_fraction`] before applying it.
    fn size_fraction(&self, equity: f64, observation: &Observation) -> f64;
}

/// Clamp a requested fraction into `[0, 1]`.
///
/// NaN passes through unchanged so the caller can treat it as an integrity
/// failure instead of silently sizing to zero.
pub fn clamp_fraction(fraction: f64) -> f64 {
    if fraction.is_nan() {
        fraction
    } else {
        fraction.clamp(0.0, 1.0)
    }
}

/// Risks a constant fraction of equity on every step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixedFraction {
    fraction: f64,
}

impl FixedFraction {
    /// `fraction` must lie in `(0, 1]`.
    pub fn new(fraction: f64) -> Result<Self> {
        if !(fraction.is_finite() && fraction > 0.0 && fraction <= 1.0) {
            return Err(SimulationError::ConfigError(format!(
                "fixed fraction must be in (0, 1], got {}",
                fraction
            )));
        }
        Ok(Self { fraction })
    }

    /// Build from a percentage, e.g. `2.0` for 2% per step.
    pub fn from_risk_percent(percent: f64) -> Result<Self> {
        Self::new(percent / 100.0)
    }

    pub fn fraction(&self) -> f64 {
        self.fraction
    }
}

impl PositionSizer for FixedFraction {
    fn name(&self) -> &str {
        "fixed-fraction"
    }

    fn size_fraction(&self, _equity: f64, _observation: &Observation) -> f64 {
        self.fraction
    }
}

/// Sizes each step like the historical trade was sized: the observation's
/// notional relative to a reference equity, clamped to `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EmpiricalNotionalFraction {
    base_equity: f64,
}

impl EmpiricalNotionalFraction {
    /// `base_equity` must be finite and positive.
    pub fn new(base_equity: f64) -> Result<Self> {
        if !(base_equity.is_finite() && base_equity > 0.0) {
            return Err(SimulationError::ConfigError(format!(
                "base equity must be positive, got {}",
                base_equity
            )));
        }
        Ok(Self { base_equity })
    }
}

impl PositionSizer for EmpiricalNotionalFraction {
    fn name(&self) -> &str {
        "empirical-notional"
    }

    fn size_fraction(&self, _equity: f64, observation: &Observation) -> f64 {
        clamp_fraction(observation.notional / self.base_equity)
    }
}

/// Sizing policy selector used by configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SizingPolicy {
    FixedFraction,
    EmpiricalNotional,
}

impl SizingPolicy {
    /// Both reference policies, in report order.
    pub fn all() -> Vec<SizingPolicy> {
        vec![SizingPolicy::FixedFraction, SizingPolicy::EmpiricalNotional]
    }

    pub fn label(&self) -> &'static str {
        match self {
            SizingPolicy::FixedFraction => "fixed-fraction",
            SizingPolicy::EmpiricalNotional => "empirical-notional",
        }
    }

    /// Instantiate the policy.
    ///
    /// `fixed_fraction` feeds [`FixedFraction`]; `base_equity` feeds
    /// [`EmpiricalNotionalFraction`].
    pub fn build(&self, fixed_fraction: f64, base_equity: f64) -> Result<Box<dyn PositionSizer>> {
        Ok(match self {
            SizingPolicy::FixedFraction => Box::new(FixedFraction::new(fixed_fraction)?),
            SizingPolicy::EmpiricalNotional => {
                Box::new(EmpiricalNotionalFraction::new(base_equity)?)
            }
        })
    }
}

impl fmt::Display for SizingPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}
