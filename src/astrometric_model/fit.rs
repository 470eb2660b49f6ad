//! # Joint nonlinear fit
//!
//! [`AstrometricModel::fit`] maximizes the Gaussian likelihood over every free parameter.
//! The problem is split the way its structure suggests:
//!
//! 1. **Levenberg–Marquardt** over the free nonlinear orbital parameters (`P`, `T0`, `e` and,
//!    for Campbell-form companions, `a0, i, Ω, ω`). At each evaluation the free linear
//!    coefficients are re-solved in closed form and the whitened residuals of that solve are
//!    handed to the optimizer (variable projection). The Jacobian is a central finite
//!    difference, its columns evaluated in parallel.
//! 2. **Jitter update**: with the orbital parameters fixed, the jitter variance is set to its
//!    maximum-likelihood value and the linear coefficients are re-solved.
//!
//! The two steps alternate until the relative change of `−2 ln L` falls below
//! `objective_tol`. Each step cannot increase `−2 ln L`; an increase larger than
//! `monotonic_tol` is reported as non-convergence.
//!
//! ## Internal coordinates
//!
//! The optimizer works on unconstrained coordinates:
//!
//! ```text
//! P = exp(x)     T0 = t_ref + x     e = 0.99 · sin²(x)     everything else: identity
//! ```
//!
//! The eccentricity map is flat at `e = 0`. A companion entering the fit with a free, exactly
//! circular orbit is first grid-seeded (see [`AstrometricModel::seed_orbit_grid`]).
//!
//! Campbell elements may wander outside their canonical ranges during the search; they are
//! folded back at the end, which leaves the signal unchanged.

use levenberg_marquardt::{LeastSquaresProblem, LevenbergMarquardt, TerminationReason};
use nalgebra::{storage::Owned, DMatrix, DVector, Dyn, Matrix, Vector};
use rayon::prelude::*;
use tracing::debug;

use crate::{
    astrofit_errors::AstroFitError,
    astrometric_model::{AstrometricModel, FitStatistics},
    constants::MAX_ECCENTRICITY,
    parameters::ParamName,
};

fn to_internal(name: ParamName, value: f64, reference_epoch: f64) -> f64 {
    match name {
        ParamName::Period(_) => value.ln(),
        ParamName::PeriastronEpoch(_) => value - reference_epoch,
        ParamName::Eccentricity(_) => (value / MAX_ECCENTRICITY).clamp(0.0, 1.0).sqrt().asin(),
        _ => value,
    }
}

fn from_internal(name: ParamName, x: f64, reference_epoch: f64) -> f64 {
    match name {
        ParamName::Period(_) => x.exp(),
        ParamName::PeriastronEpoch(_) => x + reference_epoch,
        ParamName::Eccentricity(_) => MAX_ECCENTRICITY * x.sin().powi(2),
        _ => x,
    }
}

impl AstrometricModel {
    /// Current values of `names` in optimizer coordinates.
    pub(crate) fn internal_vector(&self, names: &[ParamName]) -> Result<DVector<f64>, AstroFitError> {
        let t_ref = self.observations.reference_epoch();
        let values = names
            .iter()
            .map(|n| self.value(*n).map(|v| to_internal(*n, v, t_ref)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(DVector::from_vec(values))
    }

    /// Write optimizer coordinates back and refresh the companion regressors.
    pub(crate) fn set_internal_vector(
        &mut self,
        names: &[ParamName],
        x: &DVector<f64>,
    ) -> Result<(), AstroFitError> {
        let t_ref = self.observations.reference_epoch();
        self.set_raw_values(
            names
                .iter()
                .zip(x.iter())
                .map(|(n, xi)| (*n, from_internal(*n, *xi, t_ref))),
        )
    }

    fn set_raw_values(
        &mut self,
        values: impl IntoIterator<Item = (ParamName, f64)>,
    ) -> Result<(), AstroFitError> {
        for (name, value) in values {
            if !value.is_finite() {
                return Err(AstroFitError::NumericalFailure(format!(
                    "non-finite trial value for {name}"
                )));
            }
            let label = name
                .label()
                .ok_or_else(|| AstroFitError::UnknownParameter(name.to_string()))?;
            let idx = self.component_index(label)?;
            self.components[idx].set_raw(name, value)?;
        }
        self.refresh_bases()
    }

    fn probe_internal(
        &self,
        names: &[ParamName],
        x: &DVector<f64>,
    ) -> Result<DVector<f64>, AstroFitError> {
        let mut probe = self.clone();
        probe.set_internal_vector(names, x)?;
        probe.whitened_residuals()
    }

    /// Maximum-likelihood jitter for the current residuals, followed by a linear re-solve.
    fn update_jitter(&mut self) -> Result<(), AstroFitError> {
        let residuals = self.residuals()?;
        let jitter = self.noise.max_likelihood_jitter(
            &residuals,
            self.params.jitter_eps,
            self.params.jitter_max_iter,
        )?;
        self.noise.set_jitter(jitter)?;
        self.solve_linear()?;
        Ok(())
    }

    fn snapshot_statistics(&self, outer_iterations: usize) -> Result<FitStatistics, AstroFitError> {
        let covariance = self.covariance()?;
        let residuals = self.residuals()?;
        Ok(FitStatistics {
            chi_square: covariance.chi_square(&residuals),
            neg2_log_likelihood: covariance.neg2_log_likelihood(&residuals),
            jitter: self.noise.jitter(),
            n_obs: self.observations.len(),
            n_linear: self.design.n_free(),
            n_nonlinear: self.nonlinear_free_names().len()
                + usize::from(self.noise.is_jitter_free()),
            outer_iterations,
        })
    }

    /// Fold the nonlinear parameters onto their conventional ranges.
    fn normalize_components(&mut self) -> Result<(), AstroFitError> {
        let reference_epoch = self.observations.reference_epoch();
        for comp in &mut self.components {
            comp.normalize(reference_epoch);
        }
        self.refresh_bases()?;
        self.solve_linear()?;
        Ok(())
    }

    /// Magnitude a finite-difference step on `name` is made relative to.
    fn step_scale(&self, name: ParamName, value: f64) -> f64 {
        match name {
            ParamName::PeriastronEpoch(_) => (value - self.observations.reference_epoch()).abs(),
            _ => value.abs(),
        }
        .max(1.0)
    }

    /// Finite-difference uncertainties of the free nonlinear parameters, in natural units.
    ///
    /// Uses `(JᵀJ)⁻¹` of the whitened, linearly-projected residuals. Parameters are left out
    /// when the matrix cannot be inverted.
    fn update_nonlinear_uncertainties(&mut self, names: &[ParamName]) -> Result<(), AstroFitError> {
        self.nonlinear_uncertainties.clear();
        if names.is_empty() {
            return Ok(());
        }

        let base = self.whitened_residuals()?;
        let values = names
            .iter()
            .map(|n| self.value(*n))
            .collect::<Result<Vec<_>, _>>()?;
        let step = self.params.fd_step.sqrt();

        let columns = (0..names.len())
            .into_par_iter()
            .map(|j| -> Result<DVector<f64>, AstroFitError> {
                let mut h = step * self.step_scale(names[j], values[j]);
                if matches!(names[j], ParamName::Eccentricity(_))
                    && values[j] + h >= MAX_ECCENTRICITY
                {
                    h = -h;
                }
                let mut probe = self.clone();
                probe.set_raw_values(std::iter::once((names[j], values[j] + h)))?;
                Ok((probe.whitened_residuals()? - &base) / h)
            })
            .collect::<Result<Vec<DVector<f64>>, AstroFitError>>()?;

        let jacobian = DMatrix::from_columns(&columns);
        if let Some(cov) = (jacobian.transpose() * &jacobian).try_inverse() {
            for (j, name) in names.iter().enumerate() {
                let var = cov[(j, j)];
                if var.is_finite() && var >= 0.0 {
                    self.nonlinear_uncertainties.insert(*name, var.sqrt());
                }
            }
        }
        Ok(())
    }

    /// Jointly fit every free parameter.
    ///
    /// Return
    /// ----------
    /// * The [`FitStatistics`] at the solution; all free parameters are overwritten in place.
    ///
    /// Errors
    /// ----------
    /// * [`AstroFitError::NonConvergence`] if the optimizer loses patience, the outer budget is
    ///   exhausted, or `−2 ln L` increases beyond `monotonic_tol`. The best estimate reached so
    ///   far is kept in the model.
    /// * Any numerical error of the inner solves; the model is left untouched.
    pub fn fit(&mut self) -> Result<FitStatistics, AstroFitError> {
        let names = self.nonlinear_free_names();

        let mut work = self.clone();
        work.seed_circular_orbits()?;
        work.solve_linear()?;
        let mut objective = work.neg2_log_likelihood()?;
        let mut best = (work.clone(), objective);

        for iteration in 1..=self.params.max_outer_iter {
            if !names.is_empty() {
                let before = work.clone();
                let problem = OrbitProblem::new(work, names.clone())?;
                let solver = LevenbergMarquardt::new()
                    .with_patience(self.params.lm_patience)
                    .with_ftol(self.params.lm_ftol)
                    .with_xtol(self.params.lm_xtol);
                let (problem, report) = solver.minimize(problem);

                let x = problem.params();
                work = problem.model;
                work.set_internal_vector(&names, &x)?;
                work.solve_linear()?;
                if work.neg2_log_likelihood()? > objective {
                    work = before;
                }

                match &report.termination {
                    t if t.was_successful() => {}
                    TerminationReason::LostPatience => {
                        let reached = work.neg2_log_likelihood()?;
                        if reached < best.1 {
                            best = (work, reached);
                        }
                        return Err(self.commit_best(
                            best.0,
                            iteration,
                            "Levenberg-Marquardt lost patience".into(),
                        ));
                    }
                    TerminationReason::User(msg) => {
                        return Err(AstroFitError::NumericalFailure(format!(
                            "orbit evaluation failed during optimization: {msg}"
                        )))
                    }
                    other => debug!(?other, "Levenberg-Marquardt stopped"),
                }
            }

            if work.noise.is_jitter_free() {
                work.update_jitter()?;
            }

            let next = work.neg2_log_likelihood()?;
            debug!(
                iteration,
                neg2_log_likelihood = next,
                jitter = work.noise.jitter(),
                "outer fit iteration"
            );

            let scale = objective.abs().max(1.0);
            if next > objective + self.params.monotonic_tol * scale {
                return Err(self.commit_best(
                    best.0,
                    iteration,
                    format!("-2 lnL increased from {objective} to {next}"),
                ));
            }
            if next < best.1 {
                best = (work.clone(), next);
            }

            let converged = (objective - next).abs() <= self.params.objective_tol * scale;
            objective = next;
            if converged {
                work.normalize_components()?;
                if let Err(err) = work.update_nonlinear_uncertainties(&names) {
                    debug!(%err, "nonlinear uncertainties unavailable");
                }
                let statistics = work.snapshot_statistics(iteration)?;
                work.statistics = Some(statistics.clone());
                *self = work;
                return Ok(statistics);
            }
        }

        Err(self.commit_best(
            best.0,
            self.params.max_outer_iter,
            "outer iteration budget exhausted".into(),
        ))
    }

    fn commit_best(
        &mut self,
        mut best: AstrometricModel,
        iterations: usize,
        reason: String,
    ) -> AstroFitError {
        if best.normalize_components().is_ok() {
            best.statistics = None;
            *self = best;
        }
        AstroFitError::NonConvergence { iterations, reason }
    }
}

/// Levenberg–Marquardt view of the model: nonlinear parameters in, whitened residuals out.
struct OrbitProblem {
    model: AstrometricModel,
    names: Vec<ParamName>,
    x: DVector<f64>,
    fd_step: f64,
    residuals: Option<DVector<f64>>,
}

impl OrbitProblem {
    fn new(model: AstrometricModel, names: Vec<ParamName>) -> Result<Self, AstroFitError> {
        let x = model.internal_vector(&names)?;
        let fd_step = model.params.fd_step;
        let mut problem = OrbitProblem {
            model,
            names,
            x: x.clone(),
            fd_step,
            residuals: None,
        };
        problem.set_params(&x);
        Ok(problem)
    }
}

impl LeastSquaresProblem<f64, Dyn, Dyn> for OrbitProblem {
    type ResidualStorage = Owned<f64, Dyn>;
    type JacobianStorage = Owned<f64, Dyn, Dyn>;
    type ParameterStorage = Owned<f64, Dyn>;

    fn set_params(&mut self, x: &Vector<f64, Dyn, Self::ParameterStorage>) {
        self.x = x.clone();
        let model = &mut self.model;
        self.residuals = model
            .set_internal_vector(&self.names, x)
            .and_then(|_| model.solve_linear())
            .map(|solution| solution.whitened_residuals)
            .ok();
    }

    fn params(&self) -> Vector<f64, Dyn, Self::ParameterStorage> {
        self.x.clone()
    }

    fn residuals(&self) -> Option<Vector<f64, Dyn, Self::ResidualStorage>> {
        self.residuals.clone()
    }

    fn jacobian(&self) -> Option<Matrix<f64, Dyn, Dyn, Self::JacobianStorage>> {
        let n_res = self.residuals.as_ref()?.len();
        let columns = (0..self.names.len())
            .into_par_iter()
            .map(|j| {
                let h = self.fd_step * self.x[j].abs().max(1.0);
                let mut plus = self.x.clone();
                let mut minus = self.x.clone();
                plus[j] += h;
                minus[j] -= h;
                let r_plus = self.model.probe_internal(&self.names, &plus).ok()?;
                let r_minus = self.model.probe_internal(&self.names, &minus).ok()?;
                Some((r_plus - r_minus) / (2.0 * h))
            })
            .collect::<Option<Vec<DVector<f64>>>>()?;

        let mut jacobian = DMatrix::zeros(n_res, self.names.len());
        for (j, col) in columns.iter().enumerate() {
            jacobian.set_column(j, col);
        }
        Some(jacobian)
    }
}

#[cfg(test)]
mod fit_test {
    use super::*;
    use crate::astrometric_model::astrometric_model_test::synthetic_model;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_internal_coordinates_round_trip() {
        for (name, value) in [
            (ParamName::Period(1), 512.3),
            (ParamName::Eccentricity(1), 0.42),
            (ParamName::Eccentricity(1), 0.0),
            (ParamName::PeriastronEpoch(1), -37.0),
        ] {
            assert_abs_diff_eq!(
                from_internal(name, to_internal(name, value, 100.0), 100.0),
                value,
                epsilon = 1e-12
            );
        }
        assert!(from_internal(ParamName::Eccentricity(1), 123.4, 0.0) <= MAX_ECCENTRICITY);
    }

    #[test]
    fn test_single_star_fit_is_linear() {
        let mut model = synthetic_model(11, false);
        model.fix(ParamName::Jitter).unwrap();
        let stats = model.fit().unwrap();
        assert_eq!(stats.outer_iterations, 1);
        assert_eq!(stats.n_linear, 5);
        assert_eq!(stats.n_nonlinear, 0);
        assert_abs_diff_eq!(model.value(ParamName::Parallax).unwrap(), 10.0, epsilon = 0.1);
        assert!(model.uncertainty(ParamName::Parallax).unwrap() > 0.0);
        let chi2 = model.chi_square().unwrap();
        assert_abs_diff_eq!(chi2, stats.chi_square, epsilon = 1e-9);
    }

    #[test]
    fn test_orbit_fit_recovers_eccentricity() {
        let mut model = synthetic_model(12, true);
        model.fit().unwrap();
        let label = model.add_keplerian_from_period(505.0).unwrap();
        model.seed_orbit_grid(label).unwrap();
        let start = model.neg2_log_likelihood().unwrap();
        let stats = model.fit().unwrap();

        assert!(stats.neg2_log_likelihood <= start + 1e-6);
        assert_abs_diff_eq!(model.value(ParamName::Period(label)).unwrap(), 500.0, epsilon = 5.0);
        assert_abs_diff_eq!(
            model.value(ParamName::Eccentricity(label)).unwrap(),
            0.3,
            epsilon = 0.05
        );
        let campbell = model.component(label).unwrap().campbell().unwrap();
        assert_abs_diff_eq!(campbell.semi_major_axis, 2.0, epsilon = 0.1);
        assert!(model.uncertainty(ParamName::Period(label)).is_some());
    }

    #[test]
    fn test_fit_leaves_circular_start() {
        let mut model = synthetic_model(12, true);
        model.fit().unwrap();
        let label = model.add_keplerian_from_period(500.0).unwrap();
        let mut seeded = model.clone();

        let stats = model.fit().unwrap();
        let e = model.value(ParamName::Eccentricity(label)).unwrap();
        assert!(e > 0.0);
        assert_abs_diff_eq!(e, 0.3, epsilon = 0.05);

        seeded.seed_orbit_grid(label).unwrap();
        let reference = seeded.fit().unwrap();
        assert_abs_diff_eq!(
            stats.neg2_log_likelihood,
            reference.neg2_log_likelihood,
            epsilon = 1e-6 * reference.neg2_log_likelihood.abs().max(1.0)
        );
    }

    #[test]
    fn test_campbell_fit_matches_thiele_innes_fit() {
        let mut model = synthetic_model(13, true);
        model.fit().unwrap();
        let label = model.add_keplerian_from_period(500.0).unwrap();
        model.seed_orbit_grid(label).unwrap();
        model.fit().unwrap();
        let nll_ti = model.neg2_log_likelihood().unwrap();

        model
            .set_keplerian_param(label, &ParamName::campbell(label))
            .unwrap();
        let stats = model.fit().unwrap();
        assert!(stats.neg2_log_likelihood <= nll_ti + 1e-6 * nll_ti.abs().max(1.0));

        let c = model.component(label).unwrap().campbell().unwrap();
        assert!(c.semi_major_axis > 0.0);
        assert!((0.0..std::f64::consts::PI).contains(&c.ascending_node));
    }
}
