//! Command-line interface for the risk simulator.

use riskpath::config::{DataSettings, SimulationConfig, SimulationFileConfig};
use riskpath::data::{DataConfig, TradeSampleStore};
use riskpath::error::{Result, SimulationError};
use riskpath::export::{ReportFormatter, SimulationReport};
use riskpath::metadata::track_data_file;
use riskpath::monte_carlo::TrialAggregator;
use riskpath::resample::{ResampleMode, DEFAULT_MAX_NOISE_SIGMA, DEFAULT_SYNTHETIC_STEP_SECS};
use riskpath::risk::SizingPolicy;

use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// riskpath - Monte Carlo risk-of-ruin simulation from realized trades.
#[derive(Parser)]
#[command(name = "riskpath")]
#[command(version)]
#[command(about = "Monte Carlo equity-path simulator for position sizing and risk of ruin")]
#[command(long_about = None)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    pub output: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a simulation over a historical trade file
    Run {
        /// Path to historical trades (CSV or JSON)
        #[arg(short, long)]
        data: PathBuf,

        /// Trials per starting capital and policy
        #[arg(short, long, default_value = "250")]
        trials: usize,

        /// RNG seed
        #[arg(long, default_value = "42")]
        seed: u64,

        /// Step budget per trial
        #[arg(long, default_value = "10000")]
        max_steps: usize,

        /// Target balance
        #[arg(long, default_value = "1000000")]
        target: f64,

        /// Starting capitals, comma separated
        #[arg(short, long, value_delimiter = ',', default_value = "100")]
        capital: Vec<f64>,

        /// Final balances below this count as a loss (default: each starting capital)
        #[arg(long)]
        loss_threshold: Option<f64>,

        /// Sizing policies, comma separated
        #[arg(short, long, value_enum, value_delimiter = ',', default_values = ["fixed-fraction", "empirical-notional"])]
        policy: Vec<PolicyArg>,

        /// Fraction of equity risked per step (fixed-fraction policy)
        #[arg(short, long, default_value = "0.02")]
        fraction: f64,

        /// Risk percent per step; overrides --fraction when > 0
        #[arg(long, default_value = "0")]
        risk_percent: f64,

        /// Reference equity for empirical sizing (default: each starting capital)
        #[arg(long)]
        base_equity: Option<f64>,

        /// Resampling mode
        #[arg(short, long, value_enum, default_value = "independent")]
        mode: ModeArg,

        /// Block length for block bootstrap
        #[arg(short, long, default_value = "10")]
        window: usize,

        /// Multiplicative noise sigma for block bootstrap
        #[arg(long, default_value = "0")]
        noise: f64,

        /// Largest accepted noise sigma
        #[arg(long, default_value_t = DEFAULT_MAX_NOISE_SIGMA)]
        max_noise: f64,

        /// Minimum window-mean coherence (block mode, 0 disables)
        #[arg(long, default_value = "0")]
        coherence: f64,

        /// Minimum window-mean energy (block mode, 0 disables)
        #[arg(long, default_value = "0")]
        energy: f64,

        /// Spacing of re-timed synthetic observations in seconds
        #[arg(long, default_value_t = DEFAULT_SYNTHETIC_STEP_SECS)]
        step_secs: i64,

        /// Run trials in parallel with per-trial RNG streams
        #[arg(long)]
        parallel: bool,

        /// Show a progress bar
        #[arg(long)]
        progress: bool,

        /// Persist the JSON report here
        #[arg(short, long)]
        report: Option<PathBuf>,

        /// CSV delimiter
        #[arg(long, default_value = ",")]
        delimiter: char,
    },

    /// Run a simulation from a configuration file
    RunConfig {
        /// Path to TOML configuration file
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Generate an example configuration file
    Init {
        /// Output path for config file
        #[arg(short, long, default_value = "riskpath.toml")]
        output: PathBuf,
    },

    /// Validate a historical trade file
    Validate {
        /// Path to historical trades (CSV, TSV or JSON)
        #[arg(short, long)]
        data: PathBuf,

        /// CSV delimiter
        #[arg(long, default_value = ",")]
        delimiter: char,
    },
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
    Csv,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum PolicyArg {
    FixedFraction,
    EmpiricalNotional,
}

impl From<PolicyArg> for SizingPolicy {
    fn from(arg: PolicyArg) -> Self {
        match arg {
            PolicyArg::FixedFraction => SizingPolicy::FixedFraction,
            PolicyArg::EmpiricalNotional => SizingPolicy::EmpiricalNotional,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    Independent,
    Block,
}

impl From<ModeArg> for ResampleMode {
    fn from(arg: ModeArg) -> Self {
        match arg {
            ModeArg::Independent => ResampleMode::Independent,
            ModeArg::Block => ResampleMode::Block,
        }
    }
}

impl Cli {
    /// Initialize logging based on verbosity level.
    pub fn init_logging(&self) {
        let level = match self.verbose {
            0 => Level::WARN,
            1 => Level::INFO,
            2 => Level::DEBUG,
            _ => Level::TRACE,
        };

        // Logs go to stderr so JSON and CSV output stay parseable.
        let subscriber = FmtSubscriber::builder()
            .with_max_level(level)
            .with_target(false)
            .with_writer(std::io::stderr)
            .finish();

        if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
            eprintln!("Failed to set tracing subscriber: {}", e);
        }
    }
}

/// Run the CLI application.
pub fn run() -> Result<()> {
    let cli = Cli::parse();
    cli.init_logging();
    execute(&cli)
}

fn execute(cli: &Cli) -> Result<()> {
    match &cli.command {
        Commands::Run {
            data,
            trials,
            seed,
            max_steps,
            target,
            capital,
            loss_threshold,
            policy,
            fraction,
            risk_percent,
            base_equity,
            mode,
            window,
            noise,
            max_noise,
            coherence,
            energy,
            step_secs,
            parallel,
            progress,
            report,
            delimiter,
        } => {
            let config = SimulationConfig {
                trials: *trials,
                seed: *seed,
                max_steps: *max_steps,
                target_balance: *target,
                starting_capitals: capital.clone(),
                loss_threshold: *loss_threshold,
                policies: policy.iter().map(|&p| p.into()).collect(),
                fixed_fraction: *fraction,
                risk_percent: *risk_percent,
                base_equity: *base_equity,
                mode: (*mode).into(),
                window_size: *window,
                noise_sigma: *noise,
                max_noise_sigma: *max_noise,
                coherence_threshold: *coherence,
                energy_threshold: *energy,
                synthetic_step_secs: *step_secs,
                parallel: *parallel,
                show_progress: *progress,
            };
            let data_config = DataSettings {
                path: None,
                delimiter: *delimiter,
                date_format: None,
            }
            .to_data_config()?;
            run_simulation(config, data, &data_config, report.as_deref(), cli.output)
        }

        Commands::RunConfig { config } => run_from_config(config, cli.output),

        Commands::Init { output } => init_config(output),

        Commands::Validate { data, delimiter } => {
            let data_config = DataSettings {
                path: None,
                delimiter: *delimiter,
                date_format: None,
            }
            .to_data_config()?;
            validate_data(data, &data_config)
        }
    }
}

fn run_simulation(
    config: SimulationConfig,
    data_path: &Path,
    data_config: &DataConfig,
    report_path: Option<&Path>,
    output: OutputFormat,
) -> Result<()> {
    config.validate()?;

    info!("Loading historical trades from: {}", data_path.display());
    let store = TradeSampleStore::load(data_path, data_config)?;
    let data_file = track_data_file(data_path)?;

    let mut report = TrialAggregator::new(config, &store)?
        .run()?
        .with_data_checksum(data_file.checksum);

    if let Some(path) = report_path {
        report.persist_or_warn(path);
    }

    print_report(&report, output)
}

fn print_report(report: &SimulationReport, output: OutputFormat) -> Result<()> {
    match output {
        OutputFormat::Text => ReportFormatter::print_report(report),
        OutputFormat::Json => println!("{}", ReportFormatter::to_json(report)?),
        OutputFormat::Csv => print!("{}", ReportFormatter::summaries_to_csv(report)),
    }
    Ok(())
}

fn init_config(output: &Path) -> Result<()> {
    let example = SimulationFileConfig::example();
    fs::write(output, example)?;
    println!("Created example configuration file: {}", output.display());
    println!("\nEdit this file to point at your trade history, then run:");
    println!("  riskpath run-config -c {}", output.display());
    Ok(())
}

fn run_from_config(config_path: &Path, output: OutputFormat) -> Result<()> {
    let file_config = SimulationFileConfig::load(config_path)?;
    let config = file_config.to_simulation_config()?;
    let data_config = file_config.data.to_data_config()?;

    let data_path = file_config.data.path.as_deref().ok_or_else(|| {
        SimulationError::ConfigError("No data path specified in config".to_string())
    })?;

    run_simulation(
        config,
        Path::new(data_path),
        &data_config,
        file_config.output.report_path.as_deref().map(Path::new),
        output,
    )
}

fn validate_data(data_path: &Path, data_config: &DataConfig) -> Result<()> {
    println!("Validating trade file: {}", data_path.display());

    let store = TradeSampleStore::load(data_path, data_config)?;
    let stats = store.stats();

    println!("\nData Summary:");
    println!("  Observations:  {}", stats.count);
    println!("  Mean Return:   {:.6}", stats.mean_return);
    println!("  Std Return:    {:.6}", stats.std_return);
    println!(
        "  Return Range:  {:.6} - {:.6}",
        stats.min_return, stats.max_return
    );
    println!("  Win Rate:      {:.1}%", stats.win_rate * 100.0);
    println!("  Mean Notional: {:.2}", stats.mean_notional);
    println!(
        "  Regime Columns: coherence={} energy={}",
        store.has_coherence(),
        store.has_energy()
    );
    if let Some(ts) = store.first_timestamp() {
        println!("  First Timestamp: {}", ts);
    }

    println!("\nValidation: PASSED");
    Ok(())
}
