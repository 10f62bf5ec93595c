//! Integration tests for the risk simulator.

use riskpath::config::{SimulationConfig, SimulationFileConfig};
use riskpath::data::{DataConfig, Observation, TradeSampleStore};
use riskpath::error::SimulationError;
use riskpath::export::SimulationReport;
use riskpath::metadata::track_data_file;
use riskpath::monte_carlo::TrialAggregator;
use riskpath::path::{PathOutcome, PathSimulator};
use riskpath::resample::{ResampleMode, Resampler, SyntheticSeries};
use riskpath::risk::{EmpiricalNotionalFraction, FixedFraction, SizingPolicy};
use riskpath::rng::SeededRng;
use std::io::Write;
use tempfile::{NamedTempFile, TempDir};

/// The five-trade record used throughout the scenario tests.
fn scenario_store() -> TradeSampleStore {
    TradeSampleStore::from_returns(&[0.1, -0.05, 0.2, -0.1, 0.15], 100.0).unwrap()
}

fn run(config: SimulationConfig, store: &TradeSampleStore) -> SimulationReport {
    TrialAggregator::new(config, store).unwrap().run().unwrap()
}

fn write_csv(content: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
    write!(file, "{}", content).unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn test_same_seed_same_json() {
    let store = scenario_store();
    let config = SimulationConfig::default()
        .with_trials(100)
        .with_max_steps(500)
        .with_target(5_000.0)
        .with_fixed_fraction(0.5)
        .with_starting_capitals(vec![100.0, 250.0]);

    let a = run(config.clone(), &store).to_json().unwrap();
    let b = run(config, &store).to_json().unwrap();
    assert_eq!(a, b);
}

#[test]
fn test_same_seed_same_persisted_bytes() {
    let store = scenario_store();
    let config = SimulationConfig::default()
        .with_trials(30)
        .with_max_steps(200)
        .with_block_bootstrap(2, 0.2);

    let dir = TempDir::new().unwrap();
    let first = dir.path().join("a.json");
    let second = dir.path().join("b.json");
    run(config.clone(), &store).persist(&first).unwrap();
    run(config, &store).persist(&second).unwrap();

    assert_eq!(
        std::fs::read(&first).unwrap(),
        std::fs::read(&second).unwrap()
    );
}

#[test]
fn test_different_seed_changes_outcomes() {
    let store = scenario_store();
    let config = SimulationConfig::default()
        .with_trials(200)
        .with_max_steps(300)
        .with_target(2_000.0)
        .with_fixed_fraction(0.5)
        .with_policies(vec![SizingPolicy::FixedFraction]);

    let a = run(config.clone(), &store);
    let b = run(config.with_seed(7), &store);
    assert_ne!(a.config_hash, b.config_hash);
    assert_ne!(
        a.summaries[0].mean_final_balance,
        b.summaries[0].mean_final_balance
    );
}

#[test]
fn test_instant_ruin() {
    let store = TradeSampleStore::from_returns(&[-1.0, -1.0, -1.0], 100.0).unwrap();
    let config = SimulationConfig::default()
        .with_trials(50)
        .with_fixed_fraction(1.0)
        .with_policies(vec![SizingPolicy::FixedFraction]);

    let report = run(config, &store);
    let summary = &report.summaries[0];
    assert_eq!(summary.ruined, 50);
    assert_eq!(summary.success_rate, 0.0);
    assert_eq!(summary.loss_probability, 1.0);
    assert_eq!(summary.final_balance.unwrap().p95, 0.0);
    assert_eq!(summary.mean_steps_to_target, None);

    // Every path ends at step 1
    let mut rng = SeededRng::new(42);
    let resampler = Resampler::new(&store);
    let sizer = FixedFraction::new(1.0).unwrap();
    let sim = PathSimulator::new(1_000_000.0, 100).unwrap();
    let mut draws = riskpath::resample::IndependentDraws::new(&resampler, &mut rng);
    let result = sim.run(100.0, &sizer, &mut draws).unwrap();
    assert_eq!(result.outcome, PathOutcome::Ruined);
    assert_eq!(result.steps, 1);
}

#[test]
fn test_instant_target() {
    let store = scenario_store();
    let config = SimulationConfig::default()
        .with_trials(25)
        .with_target(1_000.0)
        .with_starting_capitals(vec![1_000.0, 5_000.0]);

    let report = run(config, &store);
    for summary in &report.summaries {
        assert_eq!(summary.reached, 25);
        assert_eq!(summary.success_rate, 1.0);
        assert_eq!(summary.mean_steps_to_target, Some(0.0));
        assert_eq!(summary.median_steps_to_target, Some(0.0));
        assert_eq!(summary.mean_max_drawdown, Some(0.0));
    }
}

#[test]
fn test_zero_fraction_never_succeeds() {
    // Empirical sizing on zero notional risks nothing.
    let store = TradeSampleStore::from_returns(&[0.1, 0.2, 0.3], 0.0).unwrap();
    let config = SimulationConfig::default()
        .with_trials(20)
        .with_max_steps(100)
        .with_target(200.0)
        .with_policies(vec![SizingPolicy::EmpiricalNotional]);

    let report = run(config, &store);
    let summary = &report.summaries[0];
    assert_eq!(summary.success_rate, 0.0);
    assert_eq!(summary.censored, 20);
    assert_eq!(summary.final_balance.unwrap().p50, 100.0);
}

#[test]
fn test_success_rate_monotone_in_fraction() {
    let store = TradeSampleStore::from_returns(&[0.01, 0.02, 0.03, 0.05], 100.0).unwrap();
    let base = SimulationConfig::default()
        .with_trials(200)
        .with_max_steps(40)
        .with_target(150.0)
        .with_policies(vec![SizingPolicy::FixedFraction])
        .with_parallel(true);

    let mut previous = 0.0;
    for fraction in [0.1, 0.25, 0.5, 0.75, 1.0] {
        let report = run(base.clone().with_fixed_fraction(fraction), &store);
        let rate = report.summaries[0].success_rate;
        assert!(
            rate >= previous,
            "success rate fell from {} to {} at fraction {}",
            previous,
            rate,
            fraction
        );
        previous = rate;
    }
    assert!(previous > 0.0);
}

#[test]
fn test_concrete_scenario() {
    let store = scenario_store();
    let config = SimulationConfig::default()
        .with_trials(1_000)
        .with_seed(42)
        .with_max_steps(20_000)
        .with_target(1_000_000.0)
        .with_fixed_fraction(0.5)
        .with_loss_threshold(1_000.0)
        .with_policies(vec![SizingPolicy::FixedFraction]);

    let report = run(config, &store);
    let summary = &report.summaries[0];

    // The worst step keeps 95% of equity, so no path can ruin, and the
    // expected log-growth of about 0.028 per step clears 1e4x well within budget.
    assert_eq!(summary.ruined, 0);
    assert!(summary.success_rate > 0.99, "{}", summary.success_rate);
    assert!(summary.loss_probability < 0.01, "{}", summary.loss_probability);
    let mean_steps = summary.mean_steps_to_target.unwrap();
    assert!(mean_steps > 250.0 && mean_steps < 450.0, "{}", mean_steps);

    let p = summary.final_balance.unwrap();
    assert!(p.p5 <= p.p50 && p.p50 <= p.p95);
    assert!(p.p5 >= 1_000_000.0);
}

#[test]
fn test_regime_fallback_is_flagged() {
    let observations: Vec<Observation> = [0.1, -0.05, 0.2, -0.1, 0.15]
        .iter()
        .map(|&r| Observation::new(r, 100.0).with_coherence(0.1))
        .collect();
    let store = TradeSampleStore::from_observations(observations).unwrap();
    let config = SimulationConfig::default()
        .with_trials(20)
        .with_max_steps(50)
        .with_block_bootstrap(3, 0.0)
        .with_regime(0.9, 0.0);

    let report = run(config, &store);
    assert!(report.regime.fallback);
    assert_eq!(report.regime.eligible_starts, 3);
    assert!(!report.warnings.is_empty());
    for summary in &report.summaries {
        assert_eq!(
            summary.reached + summary.ruined + summary.censored + summary.anomalies,
            summary.trials
        );
    }
}

#[test]
fn test_regime_filter_restricts_blocks() {
    // Only the window starting at 0 has high coherence; its returns are positive.
    let observations = vec![
        Observation::new(0.1, 100.0).with_coherence(1.0),
        Observation::new(0.1, 100.0).with_coherence(1.0),
        Observation::new(-0.5, 100.0).with_coherence(0.0),
        Observation::new(-0.5, 100.0).with_coherence(0.0),
    ];
    let store = TradeSampleStore::from_observations(observations).unwrap();
    let config = SimulationConfig::default()
        .with_trials(10)
        .with_max_steps(100)
        .with_target(1_000.0)
        .with_fixed_fraction(1.0)
        .with_policies(vec![SizingPolicy::FixedFraction])
        .with_block_bootstrap(2, 0.0)
        .with_regime(0.9, 0.0);

    let report = run(config, &store);
    assert!(!report.regime.fallback);
    assert_eq!(report.regime.eligible_starts, 1);
    assert_eq!(report.summaries[0].success_rate, 1.0);
}

#[test]
fn test_block_series_feeds_path() {
    let store = scenario_store();
    let resampler = Resampler::new(&store);
    let mut rng = SeededRng::new(42);
    let series = resampler.generate(&mut rng, 2, 5, 0.0, &[]).unwrap();
    assert_eq!(series.len(), 5);

    let sim = PathSimulator::new(1_000_000.0, 100).unwrap();
    let sizer = EmpiricalNotionalFraction::new(100.0).unwrap();
    let mut source = SyntheticSeries::from(series);
    let result = sim.run(100.0, &sizer, &mut source).unwrap();
    assert_eq!(result.outcome, PathOutcome::Censored);
    assert_eq!(result.steps, 5);
}

#[test]
fn test_parallel_and_sequential_agree_on_deterministic_data() {
    // A single observation makes every path identical.
    let store = TradeSampleStore::from_returns(&[0.1], 100.0).unwrap();
    let config = SimulationConfig::default()
        .with_trials(16)
        .with_target(150.0)
        .with_fixed_fraction(0.5);

    let sequential = run(config.clone(), &store);
    let parallel = run(config.with_parallel(true), &store);
    for (s, p) in sequential.summaries.iter().zip(&parallel.summaries) {
        assert_eq!(s.reached, p.reached);
        assert_eq!(s.mean_steps_to_target, p.mean_steps_to_target);
        assert_eq!(s.final_balance, p.final_balance);
    }
}

#[test]
fn test_end_to_end_from_csv() {
    let file = write_csv(
        "timestamp,return,notional,coherence\n\
         2024-01-01,0.1,100,0.8\n\
         2024-01-02,-0.05,120,0.7\n\
         2024-01-03,0.2,80,0.9\n\
         2024-01-04,-0.1,100,0.2\n\
         2024-01-05,0.15,90,0.3\n",
    );

    let store = TradeSampleStore::load(file.path(), &DataConfig::default()).unwrap();
    assert_eq!(store.size(), 5);
    assert!(store.has_coherence());
    assert!(!store.has_energy());

    let config = SimulationConfig::default()
        .with_trials(50)
        .with_max_steps(1_000)
        .with_target(10_000.0)
        .with_block_bootstrap(2, 0.1)
        .with_regime(0.75, 0.0);

    let checksum = track_data_file(file.path()).unwrap().checksum;
    let report = run(config, &store).with_data_checksum(checksum.clone());
    assert_eq!(report.mode, ResampleMode::Block);
    assert_eq!(report.observations, 5);
    assert_eq!(report.data_checksum.as_deref(), Some(checksum.as_str()));
    assert_eq!(report.summaries.len(), 2);
}

#[test]
fn test_json_input() {
    let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
    write!(
        file,
        r#"[{{"return": 0.1, "notional": 50}}, {{"ret": -0.02, "size": 25, "energy": 1.5}}]"#
    )
    .unwrap();
    file.flush().unwrap();

    let store = TradeSampleStore::load(file.path(), &DataConfig::default()).unwrap();
    assert_eq!(store.size(), 2);
    assert!(!store.has_energy());
    assert_eq!(store.get(1).notional, 25.0);
}

#[test]
fn test_missing_file_names_path() {
    let err = TradeSampleStore::load("/nonexistent/history.csv", &DataConfig::default())
        .unwrap_err();
    match err {
        SimulationError::DataError(msg) => assert!(msg.contains("/nonexistent/history.csv")),
        other => panic!("expected DataError, got {:?}", other),
    }
}

#[test]
fn test_missing_column_rejected() {
    let file = write_csv("return,price\n0.1,10\n");
    let err = TradeSampleStore::load(file.path(), &DataConfig::default()).unwrap_err();
    assert!(matches!(err, SimulationError::DataError(ref m) if m.contains("notional")));
}

#[test]
fn test_config_errors_before_any_trial() {
    let store = scenario_store();

    let too_wide = SimulationConfig::default().with_block_bootstrap(6, 0.0);
    assert!(matches!(
        TrialAggregator::new(too_wide, &store),
        Err(SimulationError::ConfigError(_))
    ));

    let no_trials = SimulationConfig::default().with_trials(0);
    assert!(matches!(
        TrialAggregator::new(no_trials, &store),
        Err(SimulationError::ConfigError(_))
    ));

    // Synthetic clock that cannot cover the step budget
    let mut far_clock = SimulationConfig::default()
        .with_trials(5)
        .with_max_steps(10)
        .with_block_bootstrap(2, 0.0);
    far_clock.synthetic_step_secs = i64::MAX / 2;
    assert!(matches!(
        TrialAggregator::new(far_clock, &store),
        Err(SimulationError::ConfigError(_))
    ));

    // Coherence filter on data without a coherence column
    let filtered = SimulationConfig::default()
        .with_block_bootstrap(2, 0.0)
        .with_regime(0.5, 0.0);
    assert!(matches!(
        TrialAggregator::new(filtered, &store),
        Err(SimulationError::ConfigError(_))
    ));
}

#[test]
fn test_persistence_failure_keeps_report() {
    let store = scenario_store();
    let config = SimulationConfig::default().with_trials(10).with_max_steps(20);
    let mut report = run(config, &store);
    let summaries = report.summaries.clone();

    let dir = TempDir::new().unwrap();
    let bad_path = dir.path().join("no_such_dir").join("report.json");
    assert!(!report.persist_or_warn(&bad_path));
    assert_eq!(report.warnings.len(), 1);
    assert_eq!(report.summaries, summaries);

    let good_path = dir.path().join("report.json");
    assert!(report.persist_or_warn(&good_path));
    assert!(good_path.exists());
}

#[test]
fn test_file_config_round_trip_run() {
    let data = write_csv("return,notional\n0.1,100\n-0.05,100\n0.2,100\n");
    let dir = TempDir::new().unwrap();
    let config_path = dir.path().join("riskpath.toml");
    std::fs::write(
        &config_path,
        format!(
            "[simulation]\ntrials = 20\nmax_steps = 100\ntarget_balance = 1000.0\n\n\
             [sizing]\npolicies = [\"fixed-fraction\"]\nrisk_percent = 10.0\n\n\
             [data]\npath = {:?}\n",
            data.path().display().to_string()
        ),
    )
    .unwrap();

    let file_config = SimulationFileConfig::load(&config_path).unwrap();
    let config = file_config.to_simulation_config().unwrap();
    assert!((config.effective_fixed_fraction() - 0.1).abs() < 1e-12);

    let data_path = file_config.data.path.clone().unwrap();
    let store =
        TradeSampleStore::load(&data_path, &file_config.data.to_data_config().unwrap()).unwrap();
    let report = run(config, &store);
    assert_eq!(report.summaries.len(), 1);
    assert_eq!(report.summaries[0].trials, 20);
}
