use std::sync::Arc;

use chrono::{DateTime, SecondsFormat};
use foundation::Clock;
use serde::{Deserialize, Serialize};

/// Tuning for [`EtaEstimator`].
#[derive(Debug, Clone, PartialEq)]
pub struct EtaConfig {
    /// Units that must be observed before an estimate is produced...
    pub min_samples_units: u64,
    /// ...or wall-clock time, whichever comes first.
    pub min_samples_ms: u64,
    /// EWMA half-life, in units of work rather than time.
    pub ewma_half_life_units: f64,
    /// Optional prior ms/unit from similar runs, used to steady early estimates.
    pub prior_ms_per_unit: Option<f64>,
    /// Strength of the prior as synthetic units; fades as real units accrue.
    pub prior_weight_units: f64,
}

impl Default for EtaConfig {
    fn default() -> Self {
        Self {
            min_samples_units: 20,
            min_samples_ms: 2_000,
            ewma_half_life_units: 100.0,
            prior_ms_per_unit: None,
            prior_weight_units: 100.0,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Med,
    High,
}

/// Snapshot returned by every estimator call.
#[derive(Debug, Clone, PartialEq)]
pub struct EtaState {
    /// Milliseconds remaining; `None` until ready.
    pub remaining_ms: Option<u64>,
    /// Estimated completion time, epoch milliseconds; `None` until ready.
    pub eta_at_ms: Option<u64>,
    pub ms_per_unit: Option<f64>,
    /// Units observed past the baseline.
    pub samples: u64,
    pub confidence: Confidence,
}

impl EtaState {
    /// Completion time as an RFC 3339 UTC timestamp with millisecond precision.
    pub fn eta_iso(&self) -> Option<String> {
        let ms = i64::try_from(self.eta_at_ms?).ok()?;
        DateTime::from_timestamp_millis(ms).map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true))
    }
}

/// EWMA time-to-completion estimator over a fixed unit range `[0, total]`.
///
/// Feed it cumulative done-units; regressions are ignored. Units at or below
/// the baseline are excluded from the rate sample population, and timing
/// restarts once progress first moves past it.
pub struct EtaEstimator {
    cfg: EtaConfig,
    clock: Arc<dyn Clock>,
    total_units: u64,
    baseline_units: u64,
    start_ms: u64,
    last_tick_ms: u64,
    last_done: u64,
    ewma_ms_per_unit: Option<f64>,
    seen_units: u64,
}

impl std::fmt::Debug for EtaEstimator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EtaEstimator")
            .field("total_units", &self.total_units)
            .field("baseline_units", &self.baseline_units)
            .field("last_done", &self.last_done)
            .field("ewma_ms_per_unit", &self.ewma_ms_per_unit)
            .field("seen_units", &self.seen_units)
            .finish()
    }
}

impl EtaEstimator {
    pub fn new(total_units: u64, cfg: EtaConfig, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now_ms();
        Self {
            cfg,
            clock,
            total_units: total_units.max(1),
            baseline_units: 0,
            start_ms: now,
            last_tick_ms: now,
            last_done: 0,
            ewma_ms_per_unit: None,
            seen_units: 0,
        }
    }

    /// Excludes the first `units` of the range from rate sampling.
    pub fn with_baseline(mut self, units: u64) -> Self {
        self.baseline_units = units.min(self.total_units);
        self
    }

    pub fn total_units(&self) -> u64 {
        self.total_units
    }

    pub fn update(&mut self, done_units: u64) -> EtaState {
        let now = self.clock.now_ms();
        let done = done_units.min(self.total_units);
        if done < self.last_done {
            return self.state_at(now);
        }

        if done <= self.baseline_units || self.last_done < self.baseline_units {
            // Not yet in the measured range, or just crossed into it: restart
            // timing from here without taking a rate sample.
            if done > self.baseline_units || done > self.last_done {
                self.start_ms = now;
            }
            self.last_done = done;
            self.last_tick_ms = now;
            self.seen_units = done.saturating_sub(self.baseline_units);
            return self.state_at(now);
        }

        if done > self.last_done {
            let dt = now.saturating_sub(self.last_tick_ms);
            let dn = done - self.last_done;
            if dt > 0 {
                let inst = dt as f64 / dn as f64;
                let alpha = 1.0 - (-(dn as f64) / self.cfg.ewma_half_life_units).exp();
                self.ewma_ms_per_unit = Some(match self.ewma_ms_per_unit {
                    None => inst,
                    Some(prev) => (1.0 - alpha) * prev + alpha * inst,
                });
            }
            self.seen_units = done - self.baseline_units;
            self.last_done = done;
            self.last_tick_ms = now;
        }

        self.state_at(now)
    }

    /// Current estimate without recording a sample.
    pub fn state(&self) -> EtaState {
        self.state_at(self.clock.now_ms())
    }

    fn state_at(&self, now: u64) -> EtaState {
        let elapsed = now.saturating_sub(self.start_ms);
        let ready = self.seen_units >= self.cfg.min_samples_units
            || elapsed >= self.cfg.min_samples_ms;

        let ewma = match self.ewma_ms_per_unit {
            Some(v) if ready => v,
            other => {
                return EtaState {
                    remaining_ms: None,
                    eta_at_ms: None,
                    ms_per_unit: other,
                    samples: self.seen_units,
                    confidence: Confidence::Low,
                }
            }
        };

        let ms_per_unit = match self.cfg.prior_ms_per_unit {
            Some(prior) => {
                let w = (self.cfg.prior_weight_units / self.seen_units.max(1) as f64).min(1.0);
                w * prior + (1.0 - w) * ewma
            }
            None => ewma,
        };

        let remaining_units = self.total_units.saturating_sub(self.last_done);
        let remaining_ms = (remaining_units as f64 * ms_per_unit.max(0.0)).round() as u64;

        let min = self.cfg.min_samples_units;
        let confidence = if self.seen_units > min.saturating_mul(3) {
            Confidence::High
        } else if self.seen_units >= min {
            Confidence::Med
        } else {
            Confidence::Low
        };

        EtaState {
            remaining_ms: Some(remaining_ms),
            eta_at_ms: Some(now + remaining_ms),
            ms_per_unit: Some(ms_per_unit),
            samples: self.seen_units,
            confidence,
        }
    }
}
