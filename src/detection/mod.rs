//! # Detection loop
//!
//! Iterative search for companions, one signal at a time:
//!
//! ```text
//!             ┌────────────── refit ok ─────────────┐
//!             ▼                                     │
//!        Searching ── FAP < threshold ──▶ SignalFound
//!             │                                     │
//!   FAP ≥ threshold or                         refit error
//!   max_companions reached                          │
//!             ▼                                     ▼
//!         Converged                              Failed
//! ```
//!
//! In `Searching` the periodogram of the current model is computed over the configured
//! period range and its highest peak is tested. In `SignalFound` a Keplerian component is
//! added at the peak period, seeded over eccentricity × periastron phase, and the whole
//! model is refitted. Both terminal states are absorbing.
//!
//! Accepted companions stay in Thiele-Innes form; their Campbell elements are available from
//! [`AstrometricModel::solution`].
//!
//! ## Example
//!
//! ```rust,no_run
//! use astrofit::{
//!     astrometric_model::AstrometricModel,
//!     detection::{DetectionLoop, DetectionParams},
//! };
//! # let model: AstrometricModel = unimplemented!();
//!
//! let params = DetectionParams::builder()
//!     .fap_threshold(1e-4)
//!     .max_companions(2)
//!     .build()
//!     .unwrap();
//! let report = DetectionLoop::new(model, params).run();
//! for detection in &report.detections {
//!     println!("companion {} at P = {:.2} d", detection.label, detection.candidate.period);
//! }
//! ```

use std::fmt;

use serde::Serialize;
use tracing::info;

use crate::{
    astrofit_errors::AstroFitError,
    astrometric_model::{periodogram::FrequencyGrid, AstrometricModel},
    constants::{Day, Label, RadPerDay},
};

/// Configuration of the [`DetectionLoop`].
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionParams {
    /// A peak is accepted when its false-alarm probability is below this value.
    pub fap_threshold: f64,
    /// Upper bound on the number of companions added by the loop.
    pub max_companions: usize,
    /// Shortest period searched (days).
    pub min_period: Day,
    /// Longest period searched (days); `None` uses the time span of the data.
    pub max_period: Option<Day>,
    /// Grid points per independent frequency.
    pub oversampling: f64,
}

impl DetectionParams {
    pub fn builder() -> DetectionParamsBuilder {
        DetectionParamsBuilder::new()
    }

    /// Frequency grid for a data set spanning `time_span` days.
    pub fn frequency_grid(&self, time_span: Day) -> Result<FrequencyGrid, AstroFitError> {
        let max_period = self.max_period.unwrap_or(time_span);
        FrequencyGrid::from_periods(self.min_period, max_period, time_span, self.oversampling)
    }
}

impl Default for DetectionParams {
    fn default() -> Self {
        DetectionParams {
            fap_threshold: 1e-3,
            max_companions: 3,
            min_period: 10.0,
            max_period: None,
            oversampling: 10.0,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DetectionParamsBuilder {
    params: DetectionParams,
}

impl DetectionParamsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fap_threshold(mut self, v: f64) -> Self {
        self.params.fap_threshold = v;
        self
    }

    pub fn max_companions(mut self, v: usize) -> Self {
        self.params.max_companions = v;
        self
    }

    pub fn min_period(mut self, v: Day) -> Self {
        self.params.min_period = v;
        self
    }

    pub fn max_period(mut self, v: Day) -> Self {
        self.params.max_period = Some(v);
        self
    }

    pub fn oversampling(mut self, v: f64) -> Self {
        self.params.oversampling = v;
        self
    }

    pub fn build(self) -> Result<DetectionParams, AstroFitError> {
        let p = &self.params;
        if !(p.fap_threshold > 0.0 && p.fap_threshold < 1.0) {
            return Err(AstroFitError::InvalidDetectionParameter(format!(
                "fap_threshold must lie in (0, 1), got {}",
                p.fap_threshold
            )));
        }
        if !(p.min_period.is_finite() && p.min_period > 0.0) {
            return Err(AstroFitError::InvalidDetectionParameter(format!(
                "min_period must be positive, got {}",
                p.min_period
            )));
        }
        if let Some(max) = p.max_period {
            if !(max.is_finite() && max > p.min_period) {
                return Err(AstroFitError::InvalidDetectionParameter(format!(
                    "max_period ({max}) must exceed min_period ({})",
                    p.min_period
                )));
            }
        }
        if !(p.oversampling.is_finite() && p.oversampling >= 1.0) {
            return Err(AstroFitError::InvalidDetectionParameter(format!(
                "oversampling must be >= 1, got {}",
                p.oversampling
            )));
        }
        Ok(self.params)
    }
}

/// Highest periodogram peak of one search, with its significance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DetectionCandidate {
    pub period: Day,
    pub frequency: RadPerDay,
    pub power: f64,
    pub fap: f64,
}

/// A candidate that was accepted and fitted as companion `label`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Detection {
    pub label: Label,
    pub candidate: DetectionCandidate,
}

#[derive(Debug, PartialEq)]
pub enum DetectionState {
    Searching,
    SignalFound(DetectionCandidate),
    Converged,
    Failed(AstroFitError),
}

impl DetectionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DetectionState::Converged | DetectionState::Failed(_))
    }
}

impl fmt::Display for DetectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DetectionState::Searching => write!(f, "searching"),
            DetectionState::SignalFound(c) => {
                write!(f, "signal found (P = {:.3} d, FAP = {:.2e})", c.period, c.fap)
            }
            DetectionState::Converged => write!(f, "converged"),
            DetectionState::Failed(err) => write!(f, "failed: {err}"),
        }
    }
}

/// Outcome of [`DetectionLoop::run`].
#[derive(Debug)]
pub struct DetectionReport {
    pub model: AstrometricModel,
    /// `Converged` or `Failed`.
    pub state: DetectionState,
    pub detections: Vec<Detection>,
    /// Peak examined by the last search, accepted or not.
    pub last_candidate: Option<DetectionCandidate>,
}

impl DetectionReport {
    pub fn is_converged(&self) -> bool {
        self.state == DetectionState::Converged
    }
}

#[derive(Debug)]
pub struct DetectionLoop {
    model: AstrometricModel,
    params: DetectionParams,
    state: DetectionState,
    detections: Vec<Detection>,
    last_candidate: Option<DetectionCandidate>,
}

impl DetectionLoop {
    /// A loop in the `Searching` state over `model`, taken as already fitted.
    pub fn new(model: AstrometricModel, params: DetectionParams) -> Self {
        DetectionLoop {
            model,
            params,
            state: DetectionState::Searching,
            detections: Vec::new(),
            last_candidate: None,
        }
    }

    pub fn state(&self) -> &DetectionState {
        &self.state
    }

    pub fn model(&self) -> &AstrometricModel {
        &self.model
    }

    pub fn params(&self) -> &DetectionParams {
        &self.params
    }

    pub fn detections(&self) -> &[Detection] {
        &self.detections
    }

    fn transition(&mut self, next: DetectionState) {
        info!(from = %self.state, to = %next, "detection loop transition");
        self.state = next;
    }

    /// Highest peak of the current residual periodogram.
    fn search(&mut self) -> Result<Option<DetectionCandidate>, AstroFitError> {
        let grid = self
            .params
            .frequency_grid(self.model.observations().time_span())?;
        let periodogram = self.model.periodogram_on(&grid)?;
        let Some(peak) = periodogram.peak() else {
            return Ok(None);
        };
        let candidate = DetectionCandidate {
            period: peak.period,
            frequency: peak.frequency,
            power: peak.power,
            fap: self.model.fap(peak.power, grid.nu_max())?,
        };
        self.last_candidate = Some(candidate);
        Ok(Some(candidate))
    }

    /// Add, seed and fit a companion at the candidate period on a copy of the model.
    fn accept(
        &self,
        candidate: &DetectionCandidate,
    ) -> Result<(AstrometricModel, Label), AstroFitError> {
        let mut work = self.model.clone();
        let label = work.add_keplerian_from_period(candidate.period)?;
        work.seed_orbit_grid(label)?;
        work.fit()?;
        Ok((work, label))
    }

    /// Perform one transition and return the new state.
    pub fn step(&mut self) -> &DetectionState {
        let next = match self.state {
            DetectionState::Converged | DetectionState::Failed(_) => return &self.state,
            DetectionState::Searching if self.detections.len() >= self.params.max_companions => {
                DetectionState::Converged
            }
            DetectionState::Searching => match self.search() {
                Ok(Some(c)) if c.fap < self.params.fap_threshold => DetectionState::SignalFound(c),
                Ok(_) => DetectionState::Converged,
                Err(err) => DetectionState::Failed(err),
            },
            DetectionState::SignalFound(candidate) => match self.accept(&candidate) {
                Ok((model, label)) => {
                    self.model = model;
                    self.detections.push(Detection { label, candidate });
                    DetectionState::Searching
                }
                Err(err) => DetectionState::Failed(err),
            },
        };
        self.transition(next);
        &self.state
    }

    /// Fit the baseline model, then step until a terminal state.
    pub fn run(mut self) -> DetectionReport {
        if let Err(err) = self.model.fit() {
            self.transition(DetectionState::Failed(err));
        }
        while !self.state.is_terminal() {
            self.step();
        }
        DetectionReport {
            model: self.model,
            state: self.state,
            detections: self.detections,
            last_candidate: self.last_candidate,
        }
    }
}

#[cfg(test)]
mod detection_test {
    use super::*;
    use crate::astrometric_model::astrometric_model_test::synthetic_model;

    #[test]
    fn test_params_validation() {
        assert_eq!(DetectionParams::builder().build().unwrap(), DetectionParams::default());
        assert!(matches!(
            DetectionParams::builder().fap_threshold(0.0).build(),
            Err(AstroFitError::InvalidDetectionParameter(_))
        ));
        assert!(DetectionParams::builder().min_period(-1.0).build().is_err());
        assert!(DetectionParams::builder()
            .min_period(100.0)
            .max_period(50.0)
            .build()
            .is_err());
        assert!(DetectionParams::builder().oversampling(0.5).build().is_err());
    }

    #[test]
    fn test_zero_companion_budget_converges_immediately() {
        let params = DetectionParams::builder().max_companions(0).build().unwrap();
        let mut detection = DetectionLoop::new(synthetic_model(51, true), params);
        assert_eq!(detection.step(), &DetectionState::Converged);
        assert_eq!(detection.step(), &DetectionState::Converged);
        assert!(detection.detections().is_empty());
    }

    #[test]
    fn test_step_by_step_detection() {
        let mut model = synthetic_model(52, true);
        model.fit().unwrap();
        let params = DetectionParams::builder().max_companions(1).build().unwrap();
        let mut detection = DetectionLoop::new(model, params);

        let candidate = match detection.step() {
            DetectionState::SignalFound(c) => *c,
            other => panic!("expected a signal, got {other}"),
        };
        assert!(candidate.fap < 1e-3);
        assert_eq!(detection.step(), &DetectionState::Searching);
        assert_eq!(detection.model().components().len(), 1);
        assert_eq!(detection.step(), &DetectionState::Converged);
    }

    #[test]
    fn test_invalid_grid_fails() {
        let params = DetectionParams::builder().min_period(5000.0).build().unwrap();
        let mut detection = DetectionLoop::new(synthetic_model(53, false), params);
        assert!(matches!(
            detection.step(),
            DetectionState::Failed(AstroFitError::InvalidParameter(_))
        ));
    }
}
