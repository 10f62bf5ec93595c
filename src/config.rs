//! Simulation configuration.
//!
//! [`SimulationConfig`] is the validated runtime configuration handed to the
//! aggregator. [`SimulationFileConfig`] is its TOML file form, loaded for
//! reproducible runs and converted with [`SimulationFileConfig::to_simulation_config`].

use crate::data::{DataConfig, TradeSampleStore};
use crate::error::{Result, SimulationError};
use crate::resample::{
    RegimeFilter, ResampleMode, Resampler, DEFAULT_MAX_NOISE_SIGMA, DEFAULT_SYNTHETIC_STEP_SECS,
};
use crate::risk::SizingPolicy;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

/// Validated runtime configuration for one simulation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Trials per (starting capital, policy) pair.
    pub trials: usize,
    /// Seed of the simulation RNG.
    pub seed: u64,
    /// Step budget per trial.
    pub max_steps: usize,
    /// Equity at which a trial counts as successful.
    pub target_balance: f64,
    /// Starting capitals to evaluate.
    pub starting_capitals: Vec<f64>,
    /// Final balances below this count as a loss. `None` uses each starting capital.
    pub loss_threshold: Option<f64>,
    /// Sizing policies to evaluate, in report order.
    pub policies: Vec<SizingPolicy>,
    /// Fraction risked per step by the fixed-fraction policy.
    pub fixed_fraction: f64,
    /// Percentage override for the fixed fraction. 0 disables.
    pub risk_percent: f64,
    /// Reference equity for empirical sizing. `None` uses each starting capital.
    pub base_equity: Option<f64>,
    /// Resampling mode.
    pub mode: ResampleMode,
    /// Block length for block bootstrap.
    pub window_size: usize,
    /// Multiplicative noise sigma for block bootstrap.
    pub noise_sigma: f64,
    /// Largest accepted noise sigma; must stay below 1 so noise cannot flip a sign.
    pub max_noise_sigma: f64,
    /// Minimum window-mean coherence for eligible blocks. 0 disables.
    pub coherence_threshold: f64,
    /// Minimum window-mean energy for eligible blocks. 0 disables.
    pub energy_threshold: f64,
    /// Spacing of re-timed synthetic observations, in seconds.
    pub synthetic_step_secs: i64,
    /// Run trials on the rayon pool with per-trial RNG streams.
    pub parallel: bool,
    /// Show a progress bar.
    pub show_progress: bool,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            trials: 250,
            seed: 42,
            max_steps: 10_000,
            target_balance: 1_000_000.0,
            starting_capitals: vec![100.0],
            loss_threshold: None,
            policies: SizingPolicy::all(),
            fixed_fraction: 0.02,
            risk_percent: 0.0,
            base_equity: None,
            mode: ResampleMode::Independent,
            window_size: 10,
            noise_sigma: 0.0,
            max_noise_sigma: DEFAULT_MAX_NOISE_SIGMA,
            coherence_threshold: 0.0,
            energy_threshold: 0.0,
            synthetic_step_secs: DEFAULT_SYNTHETIC_STEP_SECS,
            parallel: false,
            show_progress: false,
        }
    }
}

impl SimulationConfig {
    /// Set number of trials.
    pub fn with_trials(mut self, trials: usize) -> Self {
        self.trials = trials;
        self
    }

    /// Set the RNG seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Set the step budget.
    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn with_target(mut self, target_balance: f64) -> Self {
        self.target_balance = target_balance;
        self
    }

    pub fn with_starting_capitals(mut self, capitals: Vec<f64>) -> Self {
        self.starting_capitals = capitals;
        self
    }

    pub fn with_policies(mut self, policies: Vec<SizingPolicy>) -> Self {
        self.policies = policies;
        self
    }

    pub fn with_fixed_fraction(mut self, fraction: f64) -> Self {
        self.fixed_fraction = fraction;
        self
    }

    pub fn with_loss_threshold(mut self, threshold: f64) -> Self {
        self.loss_threshold = Some(threshold);
        self
    }

    /// Switch to block bootstrap with the given window and noise.
    pub fn with_block_bootstrap(mut self, window_size: usize, noise_sigma: f64) -> Self {
        self.mode = ResampleMode::Block;
        self.window_size = window_size;
        self.noise_sigma = noise_sigma;
        self
    }

    /// Restrict block starts to a regime.
    pub fn with_regime(mut self, coherence_threshold: f64, energy_threshold: f64) -> Self {
        self.coherence_threshold = coherence_threshold;
        self.energy_threshold = energy_threshold;
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Fraction used by the fixed-fraction policy after the percent override.
    pub fn effective_fixed_fraction(&self) -> f64 {
        if self.risk_percent > 0.0 {
            self.risk_percent / 100.0
        } else {
            self.fixed_fraction
        }
    }

    /// Loss threshold applied to trials starting from `starting_capital`.
    pub fn loss_threshold_for(&self, starting_capital: f64) -> f64 {
        self.loss_threshold.unwrap_or(starting_capital)
    }

    /// Empirical-sizing reference equity for trials starting from `starting_capital`.
    pub fn base_equity_for(&self, starting_capital: f64) -> f64 {
        self.base_equity.unwrap_or(starting_capital)
    }

    pub fn regime_filter(&self) -> RegimeFilter {
        RegimeFilter {
            coherence_threshold: self.coherence_threshold,
            energy_threshold: self.energy_threshold,
        }
    }

    /// Check every parameter that does not depend on the data.
    pub fn validate(&self) -> Result<()> {
        let err = |msg: String| Err(SimulationError::ConfigError(msg));

        if self.trials == 0 {
            return err("trials must be greater than 0".to_string());
        }
        if self.max_steps == 0 {
            return err("max_steps must be greater than 0".to_string());
        }
        if !(self.target_balance.is_finite() && self.target_balance > 0.0) {
            return err(format!(
                "target_balance must be positive, got {}",
                self.target_balance
            ));
        }
        if self.starting_capitals.is_empty() {
            return err("starting_capitals must not be empty".to_string());
        }
        if let Some(&bad) = self
            .starting_capitals
            .iter()
            .find(|c| !(c.is_finite() && **c > 0.0))
        {
            return err(format!("starting capital must be positive, got {}", bad));
        }
        if let Some(t) = self.loss_threshold {
            if !t.is_finite() {
                return err(format!("loss_threshold must be finite, got {}", t));
            }
        }

        if self.policies.is_empty() {
            return err("at least one sizing policy is required".to_string());
        }
        let unique: HashSet<_> = self.policies.iter().collect();
        if unique.len() != self.policies.len() {
            return err("sizing policies must not repeat".to_string());
        }
        if !(self.risk_percent.is_finite() && (0.0..=100.0).contains(&self.risk_percent)) {
            return err(format!(
                "risk_percent must be within [0, 100], got {}",
                self.risk_percent
            ));
        }
        let fraction = self.effective_fixed_fraction();
        if !(fraction.is_finite() && fraction > 0.0 && fraction <= 1.0) {
            return err(format!("fixed_fraction must be in (0, 1], got {}", fraction));
        }
        if let Some(base) = self.base_equity {
            if !(base.is_finite() && base > 0.0) {
                return err(format!("base_equity must be positive, got {}", base));
            }
        }

        if self.window_size == 0 {
            return err("window_size must be greater than 0".to_string());
        }
        if !(self.max_noise_sigma > 0.0 && self.max_noise_sigma < 1.0) {
            return err(format!(
                "max_noise_sigma must be in (0, 1), got {}",
                self.max_noise_sigma
            ));
        }
        if !(self.noise_sigma.is_finite()
            && self.noise_sigma >= 0.0
            && self.noise_sigma <= self.max_noise_sigma)
        {
            return err(format!(
                "noise_sigma must be within [0, {}], got {}",
                self.max_noise_sigma, self.noise_sigma
            ));
        }
        for (name, value) in [
            ("coherence_threshold", self.coherence_threshold),
            ("energy_threshold", self.energy_threshold),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return err(format!("{} must be >= 0, got {}", name, value));
            }
        }
        if self.synthetic_step_secs <= 0 {
            return err(format!(
                "synthetic_step_secs must be positive, got {}",
                self.synthetic_step_secs
            ));
        }

        if self.mode == ResampleMode::Independent {
            if self.regime_filter().is_active() {
                return err("regime filters require block bootstrap mode".to_string());
            }
            if self.noise_sigma > 0.0 {
                return err("noise_sigma requires block bootstrap mode".to_string());
            }
        }

        for &capital in &self.starting_capitals {
            if capital >= self.target_balance {
                warn!(
                    "Starting capital {} already meets target {}; every trial ends at step 0",
                    capital, self.target_balance
                );
            }
        }

        Ok(())
    }

    /// Check parameters that depend on the loaded data.
    pub fn validate_against(&self, store: &TradeSampleStore) -> Result<()> {
        self.validate()?;

        if self.mode == ResampleMode::Block && self.window_size > store.size() {
            return Err(SimulationError::ConfigError(format!(
                "window_size {} exceeds the {} available observations",
                self.window_size,
                store.size()
            )));
        }
        if self.mode == ResampleMode::Block {
            Resampler::new(store)
                .with_time_step(self.synthetic_step_secs)
                .check_clock(self.max_steps)?;
        }
        if self.coherence_threshold > 0.0 && !store.has_coherence() {
            return Err(SimulationError::ConfigError(
                "coherence_threshold is set but the data has no complete coherence column"
                    .to_string(),
            ));
        }
        if self.energy_threshold > 0.0 && !store.has_energy() {
            return Err(SimulationError::ConfigError(
                "energy_threshold is set but the data has no complete energy column".to_string(),
            ));
        }
        Ok(())
    }
}

/// `[simulation]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationSettings {
    pub trials: usize,
    pub seed: u64,
    pub max_steps: usize,
    pub target_balance: f64,
    pub starting_capitals: Vec<f64>,
    pub loss_threshold: Option<f64>,
    pub parallel: bool,
    pub show_progress: bool,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        let d = SimulationConfig::default();
        Self {
            trials: d.trials,
            seed: d.seed,
            max_steps: d.max_steps,
            target_balance: d.target_balance,
            starting_capitals: d.starting_capitals,
            loss_threshold: d.loss_threshold,
            parallel: d.parallel,
            show_progress: d.show_progress,
        }
    }
}

/// `[sizing]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SizingSettings {
    pub policies: Vec<SizingPolicy>,
    pub fixed_fraction: f64,
    pub risk_percent: f64,
    pub base_equity: Option<f64>,
}

impl Default for SizingSettings {
    fn default() -> Self {
        let d = SimulationConfig::default();
        Self {
            policies: d.policies,
            fixed_fraction: d.fixed_fraction,
            risk_percent: d.risk_percent,
            base_equity: d.base_equity,
        }
    }
}

/// `[resampling]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResamplingSettings {
    pub mode: ResampleMode,
    pub window_size: usize,
    pub noise_sigma: f64,
    pub max_noise_sigma: f64,
    pub coherence_threshold: f64,
    pub energy_threshold: f64,
    pub synthetic_step_secs: i64,
}

impl Default for ResamplingSettings {
    fn default() -> Self {
        let d = SimulationConfig::default();
        Self {
            mode: d.mode,
            window_size: d.window_size,
            noise_sigma: d.noise_sigma,
            max_noise_sigma: d.max_noise_sigma,
            coherence_threshold: d.coherence_threshold,
            energy_threshold: d.energy_threshold,
            synthetic_step_secs: d.synthetic_step_secs,
        }
    }
}

/// `[data]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSettings {
    /// Path to the historical trade file (CSV or JSON).
    pub path: Option<String>,
    /// CSV delimiter.
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
    /// Explicit timestamp format.
    pub date_format: Option<String>,
}

fn default_delimiter() -> char {
    ','
}

impl Default for DataSettings {
    fn default() -> Self {
        Self {
            path: None,
            delimiter: ',',
            date_format: None,
        }
    }
}

impl DataSettings {
    /// Loader options for this section.
    pub fn to_data_config(&self) -> Result<DataConfig> {
        if !self.delimiter.is_ascii() {
            return Err(SimulationError::ConfigError(format!(
                "delimiter must be a single ASCII character, got {:?}",
                self.delimiter
            )));
        }
        Ok(DataConfig {
            delimiter: self.delimiter as u8,
            date_format: self.date_format.clone(),
        })
    }
}

/// `[output]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutputSettings {
    /// Where to persist the JSON report.
    pub report_path: Option<String>,
}

/// Complete simulation configuration loaded from a file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SimulationFileConfig {
    #[serde(default)]
    pub simulation: SimulationSettings,
    #[serde(default)]
    pub sizing: SizingSettings,
    #[serde(default)]
    pub resampling: ResamplingSettings,
    #[serde(default)]
    pub data: DataSettings,
    #[serde(default)]
    pub output: OutputSettings,
}

impl SimulationFileConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());

        let content = fs::read_to_string(path)?;
        let config: SimulationFileConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| SimulationError::ConfigError(e.to_string()))?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Convert to a validated [`SimulationConfig`].
    pub fn to_simulation_config(&self) -> Result<SimulationConfig> {
        let s = &self.simulation;
        let z = &self.sizing;
        let r = &self.resampling;

        let config = SimulationConfig {
            trials: s.trials,
            seed: s.seed,
            max_steps: s.max_steps,
            target_balance: s.target_balance,
            starting_capitals: s.starting_capitals.clone(),
            loss_threshold: s.loss_threshold,
            policies: z.policies.clone(),
            fixed_fraction: z.fixed_fraction,
            risk_percent: z.risk_percent,
            base_equity: z.base_equity,
            mode: r.mode,
            window_size: r.window_size,
            noise_sigma: r.noise_sigma,
            max_noise_sigma: r.max_noise_sigma,
            coherence_threshold: r.coherence_threshold,
            energy_threshold: r.energy_threshold,
            synthetic_step_secs: r.synthetic_step_secs,
            parallel: s.parallel,
            show_progress: s.show_progress,
        };
        config.validate()?;
        Ok(config)
    }

    /// Generate an example configuration file content.
    pub fn example() -> String {
        r#"# riskpath simulation configuration

[simulation]
trials = 250
seed = 42
max_steps = 10000
target_balance = 1000000.0
starting_capitals = [100.0, 1000.0]
# loss_threshold = 1000.0   # defaults to each starting capital
parallel = false
show_progress = true

[sizing]
policies = ["fixed-fraction", "empirical-notional"]
fixed_fraction = 0.02
risk_percent = 0.0          # > 0 overrides fixed_fraction (2.0 = 2%)
# base_equity = 10000.0     # defaults to each starting capital

[resampling]
mode = "independent"        # or "block"
window_size = 10
noise_sigma = 0.0
max_noise_sigma = 0.5
coherence_threshold = 0.0   # block mode only, 0 disables
energy_threshold = 0.0      # block mode only, 0 disables
synthetic_step_secs = 60

[data]
path = "data/trades.csv"
delimiter = ","

[output]
report_path = "risk_report.json"
"#
        .to_string()
    }
}
