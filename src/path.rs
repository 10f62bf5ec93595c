//! Single equity-path simulation.
//!
//! A trial runs as a small state machine:
//!
//! ```text
//! RUNNING -> TARGET_REACHED | RUINED | CENSORED
//! ```
//!
//! Every terminal state is final. Censored paths (step budget exhausted) are
//! reported separately from both success and ruin.

use crate::error::{Result, SimulationError};
use crate::resample::ObservationSource;
use crate::risk::{clamp_fraction, PositionSizer};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::trace;

/// Terminal state of one trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PathOutcome {
    /// Equity reached the target balance.
    TargetReached,
    /// Equity fell to zero or below.
    Ruined,
    /// The step budget ran out first.
    Censored,
}

impl fmt::Display for PathOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathOutcome::TargetReached => write!(f, "target-reached"),
            PathOutcome::Ruined => write!(f, "ruined"),
            PathOutcome::Censored => write!(f, "censored"),
        }
    }
}

/// Mutable state of one running trial.
#[derive(Debug, Clone, PartialEq)]
pub struct EquityPath {
    pub equity: f64,
    pub steps: usize,
    pub peak: f64,
    pub max_drawdown: f64,
}

impl EquityPath {
    pub fn new(starting_capital: f64) -> Self {
        Self {
            equity: starting_capital,
            steps: 0,
            peak: starting_capital,
            max_drawdown: 0.0,
        }
    }

    /// Refresh the running peak and peak-to-trough drawdown.
    fn mark(&mut self) {
        self.peak = self.peak.max(self.equity);
        let drawdown = if self.peak > 0.0 {
            (self.peak - self.equity) / self.peak
        } else {
            0.0
        };
        self.max_drawdown = self.max_drawdown.max(drawdown);
    }
}

/// Immutable record of a completed trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialResult {
    pub outcome: PathOutcome,
    pub starting_capital: f64,
    /// Equity at the terminal step; zero for ruined paths.
    pub final_balance: f64,
    /// Largest peak-to-trough drawdown as a fraction of the peak.
    pub max_drawdown: f64,
    pub net_pnl: f64,
    /// Steps taken before the terminal state.
    pub steps: usize,
}

impl TrialResult {
    pub fn reached_target(&self) -> bool {
        self.outcome == PathOutcome::TargetReached
    }

    /// Steps needed to hit the target, if the target was hit.
    pub fn steps_to_target(&self) -> Option<usize> {
        self.reached_target().then_some(self.steps)
    }
}

/// Advances equity paths until a terminal condition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PathSimulator {
    target_balance: f64,
    max_steps: usize,
}

impl PathSimulator {
    /// `max_steps` must be positive and `target_balance` finite and positive.
    pub fn new(target_balance: f64, max_steps: usize) -> Result<Self> {
        if max_steps == 0 {
            return Err(SimulationError::ConfigError(
                "max_steps must be greater than 0".to_string(),
            ));
        }
        if !(target_balance.is_finite() && target_balance > 0.0) {
            return Err(SimulationError::ConfigError(format!(
                "target_balance must be positive, got {}",
                target_balance
            )));
        }
        Ok(Self {
            target_balance,
            max_steps,
        })
    }

    /// Run one trial from `starting_capital`.
    ///
    /// Returns [`SimulationError::NumericIntegrity`] if a sizer fraction or the
    /// equity value turns non-finite; the trial is aborted at that step.
    pub fn run<S>(
        &self,
        starting_capital: f64,
        sizer: &dyn PositionSizer,
        source: &mut S,
    ) -> Result<TrialResult>
    where
        S: ObservationSource + ?Sized,
    {
        if !(starting_capital.is_finite() && starting_capital > 0.0) {
            return Err(SimulationError::ConfigError(format!(
                "starting capital must be positive, got {}",
                starting_capital
            )));
        }

        let mut path = EquityPath::new(starting_capital);
        if path.equity >= self.target_balance {
            return Ok(self.finish(starting_capital, path, PathOutcome::TargetReached));
        }

        loop {
            let Some(obs) = source.next_observation() else {
                trace!("Observation source exhausted after {} steps", path.steps);
                return Ok(self.finish(starting_capital, path, PathOutcome::Censored));
            };

            let step = path.steps + 1;
            let fraction = clamp_fraction(sizer.size_fraction(path.equity, &obs));
            if !fraction.is_finite() {
                return Err(SimulationError::NumericIntegrity {
                    step,
                    equity: path.equity,
                    detail: format!("{} returned a non-finite fraction", sizer.name()),
                });
            }

            let pnl = path.equity * fraction * obs.ret;
            let equity = path.equity + pnl;
            if !equity.is_finite() {
                return Err(SimulationError::NumericIntegrity {
                    step,
                    equity: path.equity,
                    detail: format!(
                        "equity became {} (fraction {}, return {})",
                        equity, fraction, obs.ret
                    ),
                });
            }

            // A ruined account holds nothing.
            path.equity = equity.max(0.0);
            path.mark();
            path.steps = step;

            if path.equity >= self.target_balance {
                return Ok(self.finish(starting_capital, path, PathOutcome::TargetReached));
            }
            if path.equity <= 0.0 {
                return Ok(self.finish(starting_capital, path, PathOutcome::Ruined));
            }
            if path.steps == self.max_steps {
                return Ok(self.finish(starting_capital, path, PathOutcome::Censored));
            }
        }
    }

    fn finish(&self, starting_capital: f64, path: EquityPath, outcome: PathOutcome) -> TrialResult {
        TrialResult {
            outcome,
            starting_capital,
            final_balance: path.equity,
            max_drawdown: path.max_drawdown,
            net_pnl: path.equity - starting_capital,
            steps: path.steps,
        }
    }
}
