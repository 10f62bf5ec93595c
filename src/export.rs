//! Simulation report and its output formats.
//!
//! | Format | Use Case |
//! |--------|----------|
//! | JSON | Persisted report, reproducible byte-for-byte for a fixed seed |
//! | CSV | One row per summary, for spreadsheets |
//! | Console | Colored human-readable summary |
//!
//! # Example
//!
//! ```ignore
//! use riskpath::export::ReportFormatter;
//!
//! let mut report = aggregator.run()?;
//! if !report.persist_or_warn("risk_report.json") {
//!     eprintln!("{}", report.warnings.last().unwrap());
//! }
//! ReportFormatter::print_report(&report);
//! ```

use crate::error::Result;
use crate::monte_carlo::{SimulationSummary, TrialAnomaly};
use crate::resample::ResampleMode;
use colored::Colorize;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::{info, warn};

/// Regime filter outcome for a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeReport {
    pub coherence_threshold: f64,
    pub energy_threshold: f64,
    /// Block starts sampling could draw from.
    pub eligible_starts: usize,
    /// The filter matched nothing and sampling fell back to every start.
    pub fallback: bool,
}

/// Full result of one simulation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationReport {
    pub seed: u64,
    pub mode: ResampleMode,
    pub window_size: usize,
    pub noise_sigma: f64,
    pub parallel: bool,
    /// Observations in the historical store.
    pub observations: usize,
    pub regime: RegimeReport,
    /// SHA-256 of the serialized configuration.
    pub config_hash: String,
    /// SHA-256 of the historical data file, when loaded from disk.
    pub data_checksum: Option<String>,
    pub summaries: Vec<SimulationSummary>,
    pub anomalies: Vec<TrialAnomaly>,
    pub warnings: Vec<String>,
}

impl SimulationReport {
    pub fn with_data_checksum(mut self, checksum: impl Into<String>) -> Self {
        self.data_checksum = Some(checksum.into());
        self
    }

    /// Summary for a given starting capital and policy label.
    pub fn summary_for(&self, starting_capital: f64, policy: &str) -> Option<&SimulationSummary> {
        self.summaries
            .iter()
            .find(|s| s.starting_capital == starting_capital && s.policy.label() == policy)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Write the report as pretty JSON.
    pub fn persist(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writeln!(writer)?;
        writer.flush()?;
        info!("Report written to {}", path.display());
        Ok(())
    }

    /// Persist the report, recording a failure in `warnings` instead of
    /// returning it. Returns whether the write succeeded.
    pub fn persist_or_warn(&mut self, path: impl AsRef<Path>) -> bool {
        let path = path.as_ref();
        match self.persist(path) {
            Ok(()) => true,
            Err(e) => {
                warn!("Could not persist report to {}: {}", path.display(), e);
                self.warnings
                    .push(format!("report not persisted to {}: {}", path.display(), e));
                false
            }
        }
    }

    /// Write one CSV row per summary.
    pub fn export_summaries_csv(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        write!(writer, "{}", ReportFormatter::summaries_to_csv(self))?;
        writer.flush()?;
        Ok(())
    }
}

/// Renders reports for people and scripts.
pub struct ReportFormatter;

impl ReportFormatter {
    /// Print the report to stdout.
    pub fn print_report(report: &SimulationReport) {
        println!();
        println!("{}", "═".repeat(60).blue());
        println!("{}", " RISK-OF-RUIN SIMULATION ".bold().blue());
        println!("{}", "═".repeat(60).blue());
        println!();

        println!("{}", "Run".bold().underline());
        println!("  Seed:            {}", report.seed);
        println!("  Mode:            {}", report.mode);
        if report.mode == ResampleMode::Block {
            println!("  Window Size:     {}", report.window_size);
            println!("  Noise Sigma:     {:.4}", report.noise_sigma);
            println!(
                "  Eligible Starts: {}{}",
                report.regime.eligible_starts,
                if report.regime.fallback {
                    "  (regime fallback)".yellow().to_string()
                } else {
                    String::new()
                }
            );
        }
        println!("  Observations:    {}", report.observations);
        println!("  Config Hash:     {}", &report.config_hash[..report.config_hash.len().min(16)]);
        println!();

        for summary in &report.summaries {
            Self::print_summary(summary);
        }

        if !report.anomalies.is_empty() {
            println!(
                "{}",
                format!("{} trial(s) aborted by numeric anomalies", report.anomalies.len())
                    .red()
                    .bold()
            );
        }
        for warning in &report.warnings {
            println!("{} {}", "warning:".yellow().bold(), warning);
        }

        println!("{}", "═".repeat(60).blue());
    }

    fn print_summary(summary: &SimulationSummary) {
        println!(
            "{}",
            format!("{} @ ${:.2}", summary.policy, summary.starting_capital)
                .bold()
                .underline()
        );
        println!(
            "  Success Rate:    {:>12}",
            Self::format_rate(summary.success_rate, true)
        );
        println!(
            "  Ruin Rate:       {:>12}",
            Self::format_rate(summary.ruin_rate, false)
        );
        println!("  Censored Rate:   {:>11.2}%", summary.censored_rate * 100.0);
        println!(
            "  P(< ${:.2}):{:>width$}",
            summary.loss_threshold,
            Self::format_rate(summary.loss_probability, false),
            width = 12
        );
        match summary.final_balance {
            Some(p) => println!(
                "  Final Balance:   p5 ${:.2} | p50 ${:.2} | p95 ${:.2}",
                p.p5, p.p50, p.p95
            ),
            None => println!("  Final Balance:   n/a"),
        }
        println!(
            "  Steps to Target: mean {} | median {}",
            Self::format_optional(summary.mean_steps_to_target, 1),
            Self::format_optional(summary.median_steps_to_target, 1)
        );
        println!(
            "  Max Drawdown:    mean {} | p95 {}",
            Self::format_optional(summary.mean_max_drawdown.map(|d| d * 100.0), 2),
            Self::format_optional(summary.p95_max_drawdown.map(|d| d * 100.0), 2)
        );
        if summary.anomalies > 0 {
            println!("  Anomalies:       {:>12}", summary.anomalies.to_string().red());
        }
        println!();
    }

    /// Rate as a colored percentage; `higher_is_better` picks the color direction.
    fn format_rate(rate: f64, higher_is_better: bool) -> String {
        let text = format!("{:.2}%", rate * 100.0);
        let good = if higher_is_better { rate >= 0.5 } else { rate < 0.5 };
        if good {
            text.green().to_string()
        } else {
            text.red().to_string()
        }
    }

    fn format_optional(value: Option<f64>, precision: usize) -> String {
        match value {
            Some(v) => format!("{:.prec$}", v, prec = precision),
            None => "n/a".to_string(),
        }
    }

    /// Serialize the report to pretty JSON.
    pub fn to_json(report: &SimulationReport) -> Result<String> {
        report.to_json()
    }

    /// CSV header for [`summary_to_csv_line`](Self::summary_to_csv_line).
    pub fn csv_header() -> &'static str {
        "starting_capital,policy,trials,reached,ruined,censored,anomalies,success_rate,ruin_rate,\
         censored_rate,loss_threshold,loss_probability,final_p5,final_p50,final_p95,\
         mean_final_balance,mean_net_pnl,mean_steps_to_target,median_steps_to_target,\
         mean_max_drawdown,p95_max_drawdown"
    }

    /// One summary as a CSV row. Missing values are empty fields.
    pub fn summary_to_csv_line(s: &SimulationSummary) -> String {
        let opt = |v: Option<f64>| v.map(|x| format!("{:.6}", x)).unwrap_or_default();
        format!(
            "{:.2},{},{},{},{},{},{},{:.6},{:.6},{:.6},{:.2},{:.6},{},{},{},{},{},{},{},{},{}",
            s.starting_capital,
            s.policy,
            s.trials,
            s.reached,
            s.ruined,
            s.censored,
            s.anomalies,
            s.success_rate,
            s.ruin_rate,
            s.censored_rate,
            s.loss_threshold,
            s.loss_probability,
            opt(s.final_balance.map(|p| p.p5)),
            opt(s.final_balance.map(|p| p.p50)),
            opt(s.final_balance.map(|p| p.p95)),
            opt(s.mean_final_balance),
            opt(s.mean_net_pnl),
            opt(s.mean_steps_to_target),
            opt(s.median_steps_to_target),
            opt(s.mean_max_drawdown),
            opt(s.p95_max_drawdown),
        )
    }

    /// Header plus one row per summary.
    pub fn summaries_to_csv(report: &SimulationReport) -> String {
        let mut out = String::from(Self::csv_header());
        out.push('\n');
        for summary in &report.summaries {
            out.push_str(&Self::summary_to_csv_line(summary));
            out.push('\n');
        }
        out
    }
}
