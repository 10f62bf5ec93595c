//! Bootstrap resampling of historical observations.
//!
//! Two modes share one [`Resampler`]:
//!
//! - **Independent draw**: one uniformly random observation per call.
//! - **Block bootstrap**: contiguous windows copied from random start offsets,
//!   optionally restricted to regime-eligible starts and perturbed with bounded
//!   multiplicative noise, then re-timed onto a fixed synthetic clock.
//!
//! The resampler never owns randomness; every call takes the caller's
//! [`SeededRng`] so draw order stays under the caller's control.

use crate::data::{Observation, TradeSampleStore};
use crate::error::{Result, SimulationError};
use crate::rng::SeededRng;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

/// Default upper bound on the block-bootstrap noise sigma.
///
/// Any bound below 1.0 keeps `1 + u * sigma` strictly positive, so noise can
/// rescale a return but never flip its sign.
pub const DEFAULT_MAX_NOISE_SIGMA: f64 = 0.5;

/// Default spacing of re-timed synthetic observations, in seconds.
pub const DEFAULT_SYNTHETIC_STEP_SECS: i64 = 60;

/// How synthetic observations are drawn for each trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResampleMode {
    /// One independent draw per step.
    #[default]
    Independent,
    /// Contiguous windows of historical observations.
    Block,
}

impl fmt::Display for ResampleMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResampleMode::Independent => write!(f, "independent"),
            ResampleMode::Block => write!(f, "block"),
        }
    }
}

/// Regime predicate over a window of observations.
///
/// A threshold of zero disables that leg of the filter. An active leg requires
/// the window mean of its auxiliary field to be at least the threshold.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RegimeFilter {
    pub coherence_threshold: f64,
    pub energy_threshold: f64,
}

impl RegimeFilter {
    /// Filter that accepts every window.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.coherence_threshold > 0.0 || self.energy_threshold > 0.0
    }

    /// Whether `window` satisfies every active threshold.
    pub fn accepts(&self, window: &[Observation]) -> bool {
        if window.is_empty() {
            return false;
        }
        mean_at_least(window, self.coherence_threshold, |o| o.coherence)
            && mean_at_least(window, self.energy_threshold, |o| o.energy)
    }
}

/// Window mean of `field` is at least `threshold`; always true when the
/// threshold is disabled, always false when a reading is missing.
fn mean_at_least<F>(window: &[Observation], threshold: f64, field: F) -> bool
where
    F: Fn(&Observation) -> Option<f64>,
{
    if threshold <= 0.0 {
        return true;
    }
    let mut sum = 0.0;
    for obs in window {
        match field(obs) {
            Some(v) => sum += v,
            None => return false,
        }
    }
    sum / window.len() as f64 >= threshold
}

/// Eligible block-bootstrap start offsets.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StartPool {
    /// Eligible offsets. Empty means every valid start is eligible.
    pub indices: Vec<usize>,
    /// A regime filter was requested but matched no window, so sampling fell
    /// back to the unfiltered range.
    pub fallback: bool,
}

impl StartPool {
    /// Number of eligible starts given `valid_starts` total.
    pub fn eligible(&self, valid_starts: usize) -> usize {
        if self.indices.is_empty() {
            valid_starts
        } else {
            self.indices.len()
        }
    }
}

/// Draws synthetic observations from a [`TradeSampleStore`].
#[derive(Debug, Clone)]
pub struct Resampler<'a> {
    store: &'a TradeSampleStore,
    max_noise_sigma: f64,
    step_secs: i64,
}

impl<'a> Resampler<'a> {
    pub fn new(store: &'a TradeSampleStore) -> Self {
        Self {
            store,
            max_noise_sigma: DEFAULT_MAX_NOISE_SIGMA,
            step_secs: DEFAULT_SYNTHETIC_STEP_SECS,
        }
    }

    /// Set the largest noise sigma `generate` accepts.
    pub fn with_noise_bound(mut self, max_noise_sigma: f64) -> Self {
        self.max_noise_sigma = max_noise_sigma;
        self
    }

    /// Set the synthetic clock step used when re-timing generated series.
    pub fn with_time_step(mut self, step_secs: i64) -> Self {
        self.step_secs = step_secs;
        self
    }

    /// One uniformly random observation.
    pub fn draw(&self, rng: &mut SeededRng) -> Observation {
        *self.store.get(rng.next_index(self.store.size()))
    }

    /// Number of valid block starts for `window_size` (zero if the window
    /// does not fit).
    pub fn valid_starts(&self, window_size: usize) -> usize {
        if window_size == 0 || window_size > self.store.size() {
            0
        } else {
            self.store.size() - window_size + 1
        }
    }

    /// Start offsets eligible under `filter`.
    ///
    /// An inactive filter yields an unrestricted pool. An active filter that no
    /// window satisfies also yields an unrestricted pool, flagged as a fallback.
    pub fn start_pool(&self, window_size: usize, filter: &RegimeFilter) -> Result<StartPool> {
        self.check_window(window_size)?;
        if !filter.is_active() {
            return Ok(StartPool::default());
        }

        let indices = self
            .store
            .filter_start_indices(window_size, |w| filter.accepts(w));
        if indices.is_empty() {
            warn!(
                "Regime filter (coherence >= {}, energy >= {}) matched no window of size {}; \
                 falling back to unfiltered sampling",
                filter.coherence_threshold, filter.energy_threshold, window_size
            );
            return Ok(StartPool {
                indices,
                fallback: true,
            });
        }

        debug!(
            "Regime filter kept {} of {} starts",
            indices.len(),
            self.valid_starts(window_size)
        );
        Ok(StartPool {
            indices,
            fallback: false,
        })
    }

    /// Block-bootstrap a synthetic series of `target_length` observations.
    ///
    /// Each block starts at a random offset from `start_pool` (or from every
    /// valid start when the pool is empty). The final block is truncated to
    /// fit. When `noise_sigma > 0` each copied return is scaled by
    /// `1 + u * noise_sigma` with `u ~ U(-1, 1)`. The result is re-timed so
    /// timestamps increase by a fixed step.
    pub fn generate(
        &self,
        rng: &mut SeededRng,
        window_size: usize,
        target_length: usize,
        noise_sigma: f64,
        start_pool: &[usize],
    ) -> Result<Vec<Observation>> {
        self.check_window(window_size)?;
        self.check_noise(noise_sigma)?;

        let valid_starts = self.valid_starts(window_size);
        if let Some(&bad) = start_pool.iter().find(|&&i| i >= valid_starts) {
            return Err(SimulationError::ConfigError(format!(
                "start offset {} is outside the valid range [0, {})",
                bad, valid_starts
            )));
        }

        if target_length == 0 {
            return Ok(Vec::new());
        }

        let observations = self.store.observations();
        let mut series = Vec::with_capacity(target_length);

        while series.len() < target_length {
            let start = if start_pool.is_empty() {
                rng.next_index(valid_starts)
            } else {
                start_pool[rng.next_index(start_pool.len())]
            };
            let take = window_size.min(target_length - series.len());

            for obs in &observations[start..start + take] {
                let mut obs = *obs;
                if noise_sigma > 0.0 {
                    obs.ret *= 1.0 + rng.uniform_symmetric() * noise_sigma;
                }
                series.push(obs);
            }
        }

        self.retime(&mut series)?;
        Ok(series)
    }

    /// Overwrite timestamps with a strictly increasing synthetic clock.
    fn retime(&self, series: &mut [Observation]) -> Result<()> {
        let origin = self.clock_origin();
        for (i, obs) in series.iter_mut().enumerate() {
            obs.timestamp = Some(self.clock_at(origin, i)?);
        }
        Ok(())
    }

    /// Check that a series of `length` items can be re-timed without
    /// overflowing the synthetic clock.
    pub fn check_clock(&self, length: usize) -> Result<()> {
        if length == 0 {
            return Ok(());
        }
        self.clock_at(self.clock_origin(), length - 1).map(|_| ())
    }

    fn clock_origin(&self) -> DateTime<Utc> {
        self.store
            .first_timestamp()
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
    }

    fn clock_at(&self, origin: DateTime<Utc>, i: usize) -> Result<DateTime<Utc>> {
        i64::try_from(i)
            .ok()
            .and_then(|i| self.step_secs.checked_mul(i))
            .and_then(Duration::try_seconds)
            .and_then(|d| origin.checked_add_signed(d))
            .ok_or_else(|| {
                SimulationError::ConfigError(format!(
                    "synthetic clock overflows at item {} with step {}s",
                    i, self.step_secs
                ))
            })
    }

    fn check_window(&self, window_size: usize) -> Result<()> {
        if window_size == 0 {
            return Err(SimulationError::ConfigError(
                "window_size must be greater than 0".to_string(),
            ));
        }
        if window_size > self.store.size() {
            return Err(SimulationError::ConfigError(format!(
                "window_size {} exceeds the {} available observations",
                window_size,
                self.store.size()
            )));
        }
        Ok(())
    }

    fn check_noise(&self, noise_sigma: f64) -> Result<()> {
        if !noise_sigma.is_finite() || noise_sigma < 0.0 || noise_sigma > self.max_noise_sigma {
            return Err(SimulationError::ConfigError(format!(
                "noise_sigma {} must be within [0, {}]",
                noise_sigma, self.max_noise_sigma
            )));
        }
        Ok(())
    }
}

/// Supplies the next observation to a running path.
pub trait ObservationSource {
    /// Next observation, or `None` when the source is exhausted.
    fn next_observation(&mut self) -> Option<Observation>;
}

/// Independent draws pulled from a resampler on demand.
pub struct IndependentDraws<'r, 'a> {
    resampler: &'r Resampler<'a>,
    rng: &'r mut SeededRng,
}

impl<'r, 'a> IndependentDraws<'r, 'a> {
    pub fn new(resampler: &'r Resampler<'a>, rng: &'r mut SeededRng) -> Self {
        Self { resampler, rng }
    }
}

impl ObservationSource for IndependentDraws<'_, '_> {
    fn next_observation(&mut self) -> Option<Observation> {
        Some(self.resampler.draw(self.rng))
    }
}

/// A pre-generated synthetic series, consumed in order.
#[derive(Debug, Clone)]
pub struct SyntheticSeries {
    inner: std::vec::IntoIter<Observation>,
}

impl From<Vec<Observation>> for SyntheticSeries {
    fn from(series: Vec<Observation>) -> Self {
        Self {
            inner: series.into_iter(),
        }
    }
}

impl ObservationSource for SyntheticSeries {
    fn next_observation(&mut self) -> Option<Observation> {
        self.inner.next()
    }
}
