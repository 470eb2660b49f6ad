//! # Residual periodogram and false-alarm probability
//!
//! At each trial angular frequency `ν` the current free linear design is extended with the
//! four along-scan regressors of a circular orbit,
//!
//! ```text
//! cos ντ·sin ψ    sin ντ·sin ψ    cos ντ·cos ψ    sin ντ·cos ψ       τ = t − t_ref
//! ```
//!
//! and re-solved. The power is the fractional chi-square reduction
//! `z(ν) = (χ²₀ − χ²(ν)) / χ²₀ ∈ [0, 1]`. No nonlinear refit happens at any frequency.
//!
//! The significance of a peak follows from the single-frequency tail of `z ~ Beta(2, b)` with
//! `b = (N − p − 4)/2`, corrected for `M = max(1, T·ν_max / 2π)` independent frequencies:
//!
//! ```text
//! p₁  = (1 − z)^b · (1 + b·z)
//! FAP = 1 − (1 − p₁)^M
//! ```

use nalgebra::DMatrix;
use rayon::prelude::*;
use serde::Serialize;
use tracing::warn;

use crate::{
    astrofit_errors::AstroFitError,
    astrometric_model::AstrometricModel,
    constants::{Day, RadPerDay, DPI, HARMONIC_REGRESSORS},
    linear_design::weighted_chi_square,
    observations::Observations,
};

/// Uniform grid in angular frequency.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FrequencyGrid {
    pub nu_min: RadPerDay,
    pub step: RadPerDay,
    pub n: usize,
}

impl FrequencyGrid {
    pub fn new(nu_min: RadPerDay, step: RadPerDay, n: usize) -> Result<Self, AstroFitError> {
        if !(nu_min.is_finite() && nu_min > 0.0) {
            return Err(AstroFitError::InvalidParameter(format!(
                "minimum frequency must be positive, got {nu_min}"
            )));
        }
        if !(step.is_finite() && step > 0.0) {
            return Err(AstroFitError::InvalidParameter(format!(
                "frequency step must be positive, got {step}"
            )));
        }
        if n == 0 {
            return Err(AstroFitError::InvalidParameter(
                "frequency grid needs at least one point".into(),
            ));
        }
        Ok(FrequencyGrid { nu_min, step, n })
    }

    /// Grid covering periods `[min_period, max_period]`.
    ///
    /// The step is `2π / (time_span · oversampling)`, i.e. `oversampling` points per
    /// independent frequency.
    pub fn from_periods(
        min_period: Day,
        max_period: Day,
        time_span: Day,
        oversampling: f64,
    ) -> Result<Self, AstroFitError> {
        if !(min_period > 0.0 && max_period > min_period) {
            return Err(AstroFitError::InvalidParameter(format!(
                "period range must satisfy 0 < min < max, got [{min_period}, {max_period}]"
            )));
        }
        if !(time_span > 0.0 && oversampling > 0.0) {
            return Err(AstroFitError::InvalidParameter(format!(
                "time span ({time_span}) and oversampling ({oversampling}) must be positive"
            )));
        }
        let nu_min = DPI / max_period;
        let nu_max = DPI / min_period;
        let step = DPI / (time_span * oversampling);
        let n = ((nu_max - nu_min) / step).floor() as usize + 1;
        Self::new(nu_min, step, n)
    }

    /// Highest frequency on the grid.
    pub fn nu_max(&self) -> RadPerDay {
        self.nu_min + self.step * (self.n - 1) as f64
    }

    pub fn frequencies(&self) -> Vec<RadPerDay> {
        (0..self.n)
            .map(|k| self.nu_min + self.step * k as f64)
            .collect()
    }
}

/// Highest point of a [`Periodogram`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PeriodogramPeak {
    pub index: usize,
    pub frequency: RadPerDay,
    pub period: Day,
    pub power: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Periodogram {
    pub frequencies: Vec<RadPerDay>,
    pub power: Vec<f64>,
    /// Chi-square of the current linear design without any trial term.
    pub chi_square_base: f64,
}

impl Periodogram {
    pub fn len(&self) -> usize {
        self.frequencies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frequencies.is_empty()
    }

    /// Frequency of maximal power; the first one on ties.
    pub fn peak(&self) -> Option<PeriodogramPeak> {
        let (index, power) = self
            .power
            .iter()
            .copied()
            .enumerate()
            .fold(None, |best: Option<(usize, f64)>, (k, p)| match best {
                Some((_, bp)) if bp >= p => best,
                _ => Some((k, p)),
            })?;
        let frequency = self.frequencies[index];
        Some(PeriodogramPeak {
            index,
            frequency,
            period: DPI / frequency,
            power,
        })
    }
}

impl AstrometricModel {
    /// Periodogram of the current model at `n` frequencies `ν_min + k·Δν`.
    ///
    /// The current nonlinear parameters and jitter are kept; only linear solves are performed.
    ///
    /// Errors
    /// ----------
    /// * [`AstroFitError::InvalidParameter`] for a non-positive `ν_min`, `Δν` or `n = 0`.
    /// * Any error of the base linear solve. A trial frequency whose extended design is
    ///   singular gets power 0 instead.
    pub fn periodogram(
        &self,
        nu_min: RadPerDay,
        dnu: RadPerDay,
        n: usize,
    ) -> Result<Periodogram, AstroFitError> {
        let grid = FrequencyGrid::new(nu_min, dnu, n)?;
        self.periodogram_on(&grid)
    }

    pub fn periodogram_on(&self, grid: &FrequencyGrid) -> Result<Periodogram, AstroFitError> {
        let covariance = self.covariance()?;
        let target = self.linear_target()? - self.design.fixed_contribution();
        let base = self.design.design_matrix();
        let rcond_min = self.params.rcond_min;

        let chi_square_base = weighted_chi_square(&base, &target, &covariance, rcond_min)?;
        let frequencies = grid.frequencies();
        if chi_square_base <= f64::EPSILON * target.len() as f64 {
            return Ok(Periodogram {
                power: vec![0.0; frequencies.len()],
                frequencies,
                chi_square_base,
            });
        }

        let (n_obs, p) = base.shape();
        let power = frequencies
            .par_iter()
            .map(|&nu| {
                let trial = harmonic_regressors(&self.observations, nu);
                let design = DMatrix::from_fn(n_obs, p + HARMONIC_REGRESSORS, |i, j| {
                    if j < p {
                        base[(i, j)]
                    } else {
                        trial[(i, j - p)]
                    }
                });
                match weighted_chi_square(&design, &target, &covariance, rcond_min) {
                    Ok(chi2) => Ok(((chi_square_base - chi2) / chi_square_base).clamp(0.0, 1.0)),
                    Err(AstroFitError::SingularDesign { rcond }) => {
                        warn!(frequency = nu, rcond, "degenerate trial frequency skipped");
                        Ok(0.0)
                    }
                    Err(err) => Err(err),
                }
            })
            .collect::<Result<Vec<f64>, AstroFitError>>()?;

        Ok(Periodogram {
            frequencies,
            power,
            chi_square_base,
        })
    }

    /// False-alarm probability of a peak of power `z` found anywhere up to `ν_max`.
    ///
    /// Non-increasing in `z`; 1 when too few degrees of freedom remain to judge.
    ///
    /// Errors
    /// ----------
    /// * [`AstroFitError::InvalidParameter`] if `z ∉ [0, 1]` or `ν_max ≤ 0`.
    pub fn fap(&self, z: f64, nu_max: RadPerDay) -> Result<f64, AstroFitError> {
        if !(0.0..=1.0).contains(&z) {
            return Err(AstroFitError::InvalidParameter(format!(
                "periodogram power must lie in [0, 1], got {z}"
            )));
        }
        if !(nu_max.is_finite() && nu_max > 0.0) {
            return Err(AstroFitError::InvalidParameter(format!(
                "maximum frequency must be positive, got {nu_max}"
            )));
        }
        let n_obs = self.observations.len() as f64;
        let n_free = self.design.n_free() as f64;
        let b = (n_obs - n_free - HARMONIC_REGRESSORS as f64) / 2.0;
        if b <= 0.0 {
            return Ok(1.0);
        }
        let single = ((1.0 - z).powf(b) * (1.0 + b * z)).clamp(0.0, 1.0);
        let independent = (self.observations.time_span() * nu_max / DPI).max(1.0);
        let fap = -(independent * (-single).ln_1p()).exp_m1();
        Ok(fap.clamp(0.0, 1.0))
    }
}

/// The four circular-orbit regressors at angular frequency `nu`, one row per observation.
fn harmonic_regressors(observations: &Observations, nu: RadPerDay) -> DMatrix<f64> {
    let t_ref = observations.reference_epoch();
    let records = observations.records();
    DMatrix::from_fn(records.len(), HARMONIC_REGRESSORS, |i, j| {
        let o = &records[i];
        let (s, c) = (nu * (o.epoch - t_ref)).sin_cos();
        match j {
            0 => c * o.sin_psi,
            1 => s * o.sin_psi,
            2 => c * o.cos_psi,
            _ => s * o.cos_psi,
        }
    })
}

#[cfg(test)]
mod periodogram_test {
    use super::*;
    use crate::astrometric_model::astrometric_model_test::synthetic_model;
    use approx::assert_relative_eq;

    #[test]
    fn test_frequency_grid_from_periods() {
        let grid = FrequencyGrid::from_periods(10.0, 1000.0, 1000.0, 5.0).unwrap();
        assert_relative_eq!(grid.nu_min, DPI / 1000.0);
        assert_relative_eq!(grid.step, DPI / 5000.0);
        assert!(grid.nu_max() <= DPI / 10.0 + 1e-12);
        assert!(grid.nu_max() + grid.step > DPI / 10.0);
        assert_eq!(grid.frequencies().len(), grid.n);
        assert!(FrequencyGrid::from_periods(100.0, 10.0, 1000.0, 5.0).is_err());
        assert!(FrequencyGrid::new(0.0, 0.1, 3).is_err());
    }

    #[test]
    fn test_peak_at_injected_orbit() {
        let mut model = synthetic_model(31, true);
        model.fit().unwrap();
        let span = model.observations().time_span();
        let grid = FrequencyGrid::from_periods(20.0, span, span, 10.0).unwrap();
        let pgram = model.periodogram_on(&grid).unwrap();
        assert_eq!(pgram.len(), grid.n);
        assert!(pgram.power.iter().all(|p| (0.0..=1.0).contains(p)));

        let peak = pgram.peak().unwrap();
        assert!((peak.period - 500.0).abs() < 50.0, "peak at {}", peak.period);
        assert!(peak.power > 0.5);
        assert!(model.fap(peak.power, grid.nu_max()).unwrap() < 1e-3);
    }

    #[test]
    fn test_fap_is_monotone_and_bounded() {
        let model = synthetic_model(32, false);
        let nu_max = DPI / 10.0;
        let mut last = 1.0;
        for k in 0..=100 {
            let z = k as f64 / 100.0;
            let fap = model.fap(z, nu_max).unwrap();
            assert!((0.0..=1.0).contains(&fap));
            assert!(fap <= last + 1e-15);
            last = fap;
        }
        assert_eq!(model.fap(0.0, nu_max).unwrap(), 1.0);
        assert_eq!(model.fap(1.0, nu_max).unwrap(), 0.0);
        assert!(model.fap(1.5, nu_max).is_err());
        assert!(model.fap(0.5, 0.0).is_err());
    }

    #[test]
    fn test_harmonic_regressors_at_reference_epoch() {
        let model = synthetic_model(33, false);
        let m = harmonic_regressors(model.observations(), 0.1);
        assert_eq!(m.shape(), (model.observations().len(), HARMONIC_REGRESSORS));
        for row in m.row_iter() {
            assert_relative_eq!(row.norm_squared(), 1.0, epsilon = 1e-12);
        }
    }
}
