//! Monte Carlo trial aggregation.
//!
//! [`TrialAggregator`] runs `trials` equity paths for every
//! `(starting capital, sizing policy)` pair and reduces them to a
//! [`SimulationSummary`]:
//!
//! - **Success rate**: share of trials that reached the target balance
//! - **Loss probability**: share of trials finishing below the loss threshold
//! - **Percentiles**: 5th/50th/95th final balance by linear interpolation
//! - **Steps to target**: mean/median over successful trials only
//!
//! # Example
//!
//! ```ignore
//! use riskpath::config::SimulationConfig;
//! use riskpath::data::TradeSampleStore;
//! use riskpath::monte_carlo::TrialAggregator;
//!
//! let store = TradeSampleStore::from_returns(&[0.1, -0.05, 0.2, -0.1, 0.15], 100.0)?;
//! let config = SimulationConfig::default().with_fixed_fraction(0.5);
//! let report = TrialAggregator::new(config, &store)?.run()?;
//! for summary in &report.summaries {
//!     println!("{} @ {}: {:.1}%", summary.policy, summary.starting_capital,
//!         summary.success_rate * 100.0);
//! }
//! ```

use crate::config::SimulationConfig;
use crate::data::TradeSampleStore;
use crate::error::{Result, SimulationError};
use crate::export::{RegimeReport, SimulationReport};
use crate::metadata::compute_config_hash;
use crate::path::{PathOutcome, PathSimulator, TrialResult};
use crate::resample::{IndependentDraws, ResampleMode, Resampler, StartPool, SyntheticSeries};
use crate::risk::{PositionSizer, SizingPolicy};
use crate::rng::SeededRng;
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Percentile of ascending `sorted` data by linear interpolation between
/// order statistics (rank `p * (n - 1)`).
///
/// Returns `None` for empty input.
pub fn percentile(sorted: &[f64], p: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let rank = p.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let weight = rank - lower as f64;
    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * weight)
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

fn sorted(mut values: Vec<f64>) -> Vec<f64> {
    values.sort_by(|a, b| a.total_cmp(b));
    values
}

/// 5th, 50th and 95th percentiles of a distribution.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Percentiles {
    pub p5: f64,
    pub p50: f64,
    pub p95: f64,
}

impl Percentiles {
    /// Percentiles of ascending `sorted` data, `None` if empty.
    pub fn from_sorted(sorted: &[f64]) -> Option<Self> {
        Some(Self {
            p5: percentile(sorted, 0.05)?,
            p50: percentile(sorted, 0.50)?,
            p95: percentile(sorted, 0.95)?,
        })
    }
}

/// A trial aborted by a non-finite value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialAnomaly {
    pub starting_capital: f64,
    pub policy: SizingPolicy,
    /// Trial index within its configuration.
    pub trial: usize,
    /// Step at which the value turned non-finite.
    pub step: usize,
    /// Last finite equity.
    pub equity: f64,
    pub detail: String,
}

/// Reduced outcome of all trials for one `(starting capital, policy)` pair.
///
/// Rates use `trials` as the denominator, so anomalies count against every
/// rate. Distribution statistics cover completed trials only and are `None`
/// when there are none.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationSummary {
    pub starting_capital: f64,
    pub policy: SizingPolicy,
    pub trials: usize,
    pub reached: usize,
    pub ruined: usize,
    pub censored: usize,
    pub anomalies: usize,
    pub success_rate: f64,
    pub ruin_rate: f64,
    pub censored_rate: f64,
    pub loss_threshold: f64,
    pub loss_probability: f64,
    pub final_balance: Option<Percentiles>,
    pub mean_final_balance: Option<f64>,
    pub mean_net_pnl: Option<f64>,
    /// Over trials that reached the target; `None` if none did.
    pub mean_steps_to_target: Option<f64>,
    /// Over trials that reached the target; `None` if none did.
    pub median_steps_to_target: Option<f64>,
    pub mean_max_drawdown: Option<f64>,
    pub p95_max_drawdown: Option<f64>,
}

impl SimulationSummary {
    /// Reduce completed trial results.
    pub fn from_results(
        starting_capital: f64,
        policy: SizingPolicy,
        trials: usize,
        loss_threshold: f64,
        results: &[TrialResult],
        anomalies: usize,
    ) -> Self {
        let count = |outcome: PathOutcome| results.iter().filter(|r| r.outcome == outcome).count();
        let reached = count(PathOutcome::TargetReached);
        let ruined = count(PathOutcome::Ruined);
        let censored = count(PathOutcome::Censored);
        let losses = results
            .iter()
            .filter(|r| r.final_balance < loss_threshold)
            .count();

        let rate = |n: usize| {
            if trials == 0 {
                0.0
            } else {
                n as f64 / trials as f64
            }
        };

        let balances = sorted(results.iter().map(|r| r.final_balance).collect());
        let drawdowns = sorted(results.iter().map(|r| r.max_drawdown).collect());
        let pnls: Vec<f64> = results.iter().map(|r| r.net_pnl).collect();
        let steps = sorted(
            results
                .iter()
                .filter_map(|r| r.steps_to_target())
                .map(|s| s as f64)
                .collect(),
        );

        Self {
            starting_capital,
            policy,
            trials,
            reached,
            ruined,
            censored,
            anomalies,
            success_rate: rate(reached),
            ruin_rate: rate(ruined),
            censored_rate: rate(censored),
            loss_threshold,
            loss_probability: rate(losses),
            final_balance: Percentiles::from_sorted(&balances),
            mean_final_balance: mean(&balances),
            mean_net_pnl: mean(&pnls),
            mean_steps_to_target: mean(&steps),
            median_steps_to_target: percentile(&steps, 0.5),
            mean_max_drawdown: mean(&drawdowns),
            p95_max_drawdown: percentile(&drawdowns, 0.95),
        }
    }
}

/// Runs every configured trial and builds the report.
pub struct TrialAggregator<'a> {
    config: SimulationConfig,
    store: &'a TradeSampleStore,
    simulator: PathSimulator,
}

impl<'a> TrialAggregator<'a> {
    /// Validate `config` against `store` and prepare a run.
    pub fn new(config: SimulationConfig, store: &'a TradeSampleStore) -> Result<Self> {
        config.validate_against(store)?;
        let simulator = PathSimulator::new(config.target_balance, config.max_steps)?;
        Ok(Self {
            config,
            store,
            simulator,
        })
    }

    /// Run all trials.
    ///
    /// Configurations are enumerated in `(starting capital, policy)` order. In
    /// sequential mode every trial draws from one shared RNG stream in that
    /// order; in parallel mode each trial gets its own stream derived from the
    /// seed and its global index. Either way the report is deterministic.
    ///
    /// Trials aborted by a numeric integrity failure are recorded as
    /// anomalies. Any other error aborts the run as
    /// [`SimulationError::TrialFailed`], naming the capital, policy and trial.
    pub fn run(&self) -> Result<SimulationReport> {
        let config = &self.config;
        let resampler = Resampler::new(self.store)
            .with_noise_bound(config.max_noise_sigma)
            .with_time_step(config.synthetic_step_secs);

        let filter = config.regime_filter();
        let (pool, eligible_starts) = match config.mode {
            ResampleMode::Block => {
                let pool = resampler.start_pool(config.window_size, &filter)?;
                let eligible = pool.eligible(resampler.valid_starts(config.window_size));
                (pool, eligible)
            }
            ResampleMode::Independent => (StartPool::default(), self.store.size()),
        };

        let jobs: Vec<(f64, SizingPolicy)> = config
            .starting_capitals
            .iter()
            .flat_map(|&capital| config.policies.iter().map(move |&policy| (capital, policy)))
            .collect();

        info!(
            "Running {} configurations x {} trials ({} mode, {})",
            jobs.len(),
            config.trials,
            config.mode,
            if config.parallel { "parallel" } else { "sequential" }
        );

        let progress = if config.show_progress {
            let pb = ProgressBar::new((jobs.len() * config.trials) as u64);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
                    .map_err(|e| SimulationError::ConfigError(e.to_string()))?
                    .progress_chars("#>-"),
            );
            Some(pb)
        } else {
            None
        };

        let mut rng = SeededRng::new(config.seed);
        let mut summaries = Vec::with_capacity(jobs.len());
        let mut anomalies = Vec::new();
        let mut warnings = Vec::new();

        if pool.fallback {
            warnings.push(format!(
                "regime filter (coherence >= {}, energy >= {}) matched no window; sampled unfiltered",
                filter.coherence_threshold, filter.energy_threshold
            ));
        }

        for (config_index, &(capital, policy)) in jobs.iter().enumerate() {
            let sizer = policy.build(
                config.effective_fixed_fraction(),
                config.base_equity_for(capital),
            )?;

            let outcomes: Vec<Result<TrialResult>> = if config.parallel {
                (0..config.trials)
                    .into_par_iter()
                    .map(|trial| {
                        let index = (config_index * config.trials + trial) as u64;
                        let mut trial_rng = SeededRng::for_trial(config.seed, index);
                        let outcome =
                            self.run_trial(&resampler, &mut trial_rng, capital, sizer.as_ref(), &pool);
                        if let Some(pb) = &progress {
                            pb.inc(1);
                        }
                        outcome
                    })
                    .collect()
            } else {
                (0..config.trials)
                    .map(|_| {
                        let outcome =
                            self.run_trial(&resampler, &mut rng, capital, sizer.as_ref(), &pool);
                        if let Some(pb) = &progress {
                            pb.inc(1);
                        }
                        outcome
                    })
                    .collect()
            };

            let mut results = Vec::with_capacity(outcomes.len());
            let mut anomaly_count = 0;
            for (trial, outcome) in outcomes.into_iter().enumerate() {
                match outcome {
                    Ok(result) => results.push(result),
                    Err(SimulationError::NumericIntegrity {
                        step,
                        equity,
                        detail,
                    }) => {
                        warn!(
                            "Trial {} ({} @ {}) aborted at step {}: {}",
                            trial, policy, capital, step, detail
                        );
                        anomaly_count += 1;
                        anomalies.push(TrialAnomaly {
                            starting_capital: capital,
                            policy,
                            trial,
                            step,
                            equity,
                            detail,
                        });
                    }
                    Err(e) => {
                        return Err(SimulationError::TrialFailed {
                            starting_capital: capital,
                            policy,
                            trial,
                            source: Box::new(e),
                        })
                    }
                }
            }

            let summary = SimulationSummary::from_results(
                capital,
                policy,
                config.trials,
                config.loss_threshold_for(capital),
                &results,
                anomaly_count,
            );
            if summary.censored == summary.trials {
                warn!(
                    "Every trial for {} @ {} hit the {}-step budget; consider raising max_steps",
                    policy, capital, config.max_steps
                );
            }
            debug!(
                "{} @ {}: reached={} ruined={} censored={} anomalies={}",
                policy, capital, summary.reached, summary.ruined, summary.censored, summary.anomalies
            );
            summaries.push(summary);
        }

        if let Some(pb) = progress {
            pb.finish_with_message("Simulation complete");
        }

        info!(
            "Simulation finished: {} summaries, {} anomalies",
            summaries.len(),
            anomalies.len()
        );

        Ok(SimulationReport {
            seed: config.seed,
            mode: config.mode,
            window_size: config.window_size,
            noise_sigma: config.noise_sigma,
            parallel: config.parallel,
            observations: self.store.size(),
            regime: RegimeReport {
                coherence_threshold: filter.coherence_threshold,
                energy_threshold: filter.energy_threshold,
                eligible_starts,
                fallback: pool.fallback,
            },
            // Progress display does not change results.
            config_hash: compute_config_hash(&SimulationConfig {
                show_progress: false,
                ..config.clone()
            })?,
            data_checksum: None,
            summaries,
            anomalies,
            warnings,
        })
    }

    fn run_trial(
        &self,
        resampler: &Resampler<'_>,
        rng: &mut SeededRng,
        starting_capital: f64,
        sizer: &dyn PositionSizer,
        pool: &StartPool,
    ) -> Result<TrialResult> {
        match self.config.mode {
            ResampleMode::Independent => {
                let mut source = IndependentDraws::new(resampler, rng);
                self.simulator.run(starting_capital, sizer, &mut source)
            }
            ResampleMode::Block => {
                let series = resampler.generate(
                    rng,
                    self.config.window_size,
                    self.config.max_steps,
                    self.config.noise_sigma,
                    &pool.indices,
                )?;
                let mut source = SyntheticSeries::from(series);
                self.simulator.run(starting_capital, sizer, &mut source)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(outcome: PathOutcome, final_balance: f64, steps: usize) -> TrialResult {
        TrialResult {
            outcome,
            starting_capital: 100.0,
            final_balance,
            max_drawdown: 0.1,
            net_pnl: final_balance - 100.0,
            steps,
        }
    }

    #[test]
    fn test_percentile_interpolation() {
        let data = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(percentile(&data, 0.0), Some(1.0));
        assert_eq!(percentile(&data, 1.0), Some(4.0));
        assert_eq!(percentile(&data, 0.5), Some(2.5));
        // rank 0.05 * 3 = 0.15
        assert!((percentile(&data, 0.05).unwrap() - 1.15).abs() < 1e-12);
        assert_eq!(percentile(&[], 0.5), None);
        assert_eq!(percentile(&[7.0], 0.95), Some(7.0));
    }

    #[test]
    fn test_percentile_odd_median() {
        let data = [1.0, 3.0, 8.0, 10.0, 50.0];
        assert_eq!(percentile(&data, 0.5), Some(8.0));

        let p = Percentiles::from_sorted(&data).unwrap();
        assert!(p.p5 <= p.p50 && p.p50 <= p.p95);
    }

    #[test]
    fn test_summary_counts_and_rates() {
        let results = vec![
            result(PathOutcome::TargetReached, 1000.0, 10),
            result(PathOutcome::TargetReached, 1200.0, 20),
            result(PathOutcome::Ruined, 0.0, 3),
            result(PathOutcome::Censored, 50.0, 100),
        ];
        let summary =
            SimulationSummary::from_results(100.0, SizingPolicy::FixedFraction, 5, 100.0, &results, 1);

        assert_eq!(summary.reached, 2);
        assert_eq!(summary.ruined, 1);
        assert_eq!(summary.censored, 1);
        assert_eq!(summary.anomalies, 1);
        assert!((summary.success_rate - 0.4).abs() < 1e-12);
        assert!((summary.ruin_rate - 0.2).abs() < 1e-12);
        assert!((summary.loss_probability - 0.4).abs() < 1e-12);
        assert_eq!(summary.mean_steps_to_target, Some(15.0));
        assert_eq!(summary.median_steps_to_target, Some(15.0));
        assert_eq!(summary.final_balance.unwrap().p50, 525.0);
    }

    #[test]
    fn test_summary_without_successes() {
        let results = vec![
            result(PathOutcome::Ruined, 0.0, 1),
            result(PathOutcome::Censored, 80.0, 50),
        ];
        let summary =
            SimulationSummary::from_results(100.0, SizingPolicy::FixedFraction, 2, 100.0, &results, 0);
        assert_eq!(summary.success_rate, 0.0);
        assert_eq!(summary.mean_steps_to_target, None);
        assert_eq!(summary.median_steps_to_target, None);
    }

    #[test]
    fn test_summary_of_nothing() {
        let summary =
            SimulationSummary::from_results(100.0, SizingPolicy::FixedFraction, 3, 100.0, &[], 3);
        assert_eq!(summary.final_balance, None);
        assert_eq!(summary.mean_final_balance, None);
        assert_eq!(summary.loss_probability, 0.0);
        assert_eq!(summary.anomalies, 3);
    }

    #[test]
    fn test_aggregator_deterministic() {
        let store = TradeSampleStore::from_returns(&[0.1, -0.05, 0.2, -0.1, 0.15], 100.0).unwrap();
        let config = SimulationConfig::default()
            .with_trials(50)
            .with_max_steps(200)
            .with_target(10_000.0)
            .with_fixed_fraction(0.5);

        let a = TrialAggregator::new(config.clone(), &store).unwrap().run().unwrap();
        let b = TrialAggregator::new(config, &store).unwrap().run().unwrap();
        assert_eq!(a.summaries, b.summaries);
        assert_eq!(a.config_hash, b.config_hash);
        assert_eq!(a.summaries.len(), 2);
    }

    #[test]
    fn test_aggregator_enumeration_order() {
        let store = TradeSampleStore::from_returns(&[0.1, -0.05], 100.0).unwrap();
        let config = SimulationConfig::default()
            .with_trials(5)
            .with_max_steps(10)
            .with_starting_capitals(vec![100.0, 200.0]);
        let report = TrialAggregator::new(config, &store).unwrap().run().unwrap();

        let order: Vec<(f64, SizingPolicy)> = report
            .summaries
            .iter()
            .map(|s| (s.starting_capital, s.policy))
            .collect();
        assert_eq!(
            order,
            vec![
                (100.0, SizingPolicy::FixedFraction),
                (100.0, SizingPolicy::EmpiricalNotional),
                (200.0, SizingPolicy::FixedFraction),
                (200.0, SizingPolicy::EmpiricalNotional),
            ]
        );
    }

    #[test]
    fn test_numeric_overflow_becomes_anomaly() {
        let store = TradeSampleStore::from_returns(&[1e300], 1.0).unwrap();
        let config = SimulationConfig::default()
            .with_trials(4)
            .with_target(f64::MAX)
            .with_starting_capitals(vec![1e10])
            .with_policies(vec![SizingPolicy::FixedFraction])
            .with_fixed_fraction(1.0);

        let report = TrialAggregator::new(config, &store).unwrap().run().unwrap();
        let summary = &report.summaries[0];
        assert_eq!(summary.anomalies, 4);
        assert_eq!(summary.success_rate, 0.0);
        assert_eq!(summary.final_balance, None);
        assert_eq!(report.anomalies.len(), 4);
        assert_eq!(report.anomalies[2].trial, 2);
        assert_eq!(report.anomalies[0].step, 1);
    }

    #[test]
    fn test_parallel_is_deterministic() {
        let store = TradeSampleStore::from_returns(&[0.1, -0.05, 0.2, -0.1, 0.15], 100.0).unwrap();
        let config = SimulationConfig::default()
            .with_trials(40)
            .with_max_steps(100)
            .with_target(1_000.0)
            .with_fixed_fraction(0.5)
            .with_parallel(true);

        let a = TrialAggregator::new(config.clone(), &store).unwrap().run().unwrap();
        let b = TrialAggregator::new(config, &store).unwrap().run().unwrap();
        assert_eq!(a.summaries, b.summaries);
        assert!(a.parallel);
    }

    #[test]
    fn test_block_mode_runs() {
        let store = TradeSampleStore::from_returns(&[0.1, -0.05, 0.2, -0.1, 0.15], 100.0).unwrap();
        let config = SimulationConfig::default()
            .with_trials(20)
            .with_max_steps(50)
            .with_target(1_000.0)
            .with_fixed_fraction(0.5)
            .with_block_bootstrap(3, 0.1);

        let report = TrialAggregator::new(config, &store).unwrap().run().unwrap();
        assert_eq!(report.mode, ResampleMode::Block);
        assert_eq!(report.regime.eligible_starts, 3);
        assert!(!report.regime.fallback);
        for s in &report.summaries {
            assert_eq!(s.reached + s.ruined + s.censored + s.anomalies, s.trials);
        }
    }

    #[test]
    fn test_trial_failure_carries_context() {
        let store = TradeSampleStore::from_returns(&[0.1, -0.05, 0.2], 100.0).unwrap();
        let mut config = SimulationConfig::default()
            .with_trials(5)
            .with_max_steps(10)
            .with_starting_capitals(vec![100.0])
            .with_policies(vec![SizingPolicy::FixedFraction])
            .with_block_bootstrap(2, 0.0);
        config.synthetic_step_secs = i64::MAX / 2;
        config.show_progress = false;
        assert!(TrialAggregator::new(config.clone(), &store).is_err());

        // Skip validation to reach the per-trial failure path.
        let aggregator = TrialAggregator {
            simulator: PathSimulator::new(config.target_balance, config.max_steps).unwrap(),
            config,
            store: &store,
        };
        match aggregator.run() {
            Err(SimulationError::TrialFailed {
                starting_capital,
                policy,
                trial,
                source,
            }) => {
                assert_eq!(starting_capital, 100.0);
                assert_eq!(policy, SizingPolicy::FixedFraction);
                assert_eq!(trial, 0);
                assert!(matches!(*source, SimulationError::ConfigError(_)));
            }
            other => panic!("expected TrialFailed, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_config_rejected_before_running() {
        let store = TradeSampleStore::from_returns(&[0.1, 0.2], 100.0).unwrap();
        let config = SimulationConfig::default().with_block_bootstrap(5, 0.0);
        assert!(matches!(
            TrialAggregator::new(config, &store),
            Err(SimulationError::ConfigError(_))
        ));
    }
}
