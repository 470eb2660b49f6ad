//! # Astrometric model
//!
//! [`AstrometricModel`] is the aggregate the fitting engine works on:
//!
//! * the validated [`Observations`],
//! * a [`CovarianceModel`] (measurement variances plus jitter),
//! * a [`LinearDesign`] holding the five single-star regressors and the Thiele-Innes
//!   regressors of every companion in Thiele-Innes form,
//! * zero or more [`KeplerianComponent`]s, identified by a [`Label`] starting at 1.
//!
//! The along-scan prediction is
//!
//! ```text
//! w(t) = Σ_k β_k x_k(t) + Σ_{Campbell companions} orbit_c(t)
//! ```
//!
//! ## Parameters
//!
//! Every quantity is addressed by a [`ParamName`]. Linear names live in the design and are
//! solved in closed form; nonlinear names (`P`, `T0`, `e`, Campbell elements) and the jitter
//! are handled by [`AstrometricModel::fit`]. Any parameter can be fixed with
//! [`AstrometricModel::fix`] and released with [`AstrometricModel::free`].
//!
//! ## Value semantics
//!
//! The model owns all of its state. [`Clone`] produces an independent deep copy, which is how
//! exploratory edits are made: operations that can fail midway work on a clone and commit it
//! only on success.
//!
//! ## Example
//!
//! ```rust,no_run
//! use astrofit::astrometric_model::AstrometricModel;
//! # use astrofit::observations::Observations;
//! # let observations: Observations = unimplemented!();
//!
//! let mut model = AstrometricModel::new(observations).unwrap();
//! model.fit().unwrap();
//! let label = model.add_keplerian_from_period(480.0).unwrap();
//! model.seed_orbit_grid(label).unwrap();
//! model.fit().unwrap();
//! println!("{}", model.solution(Some(1.0)).unwrap());
//! ```

use std::collections::BTreeMap;

use nalgebra::DVector;
use serde::Serialize;

use crate::{
    astrofit_errors::AstroFitError,
    constants::Label,
    covariance::{Covariance, CovarianceModel},
    kepler::KeplerSolver,
    keplerian_component::{KeplerianComponent, Parametrization},
    linear_design::{LinearDesign, LinearSolution},
    observations::Observations,
    orbit_type::thiele_innes::ThieleInnes,
    parameters::ParamName,
};

use self::fit_params::FitParams;

/// Nonlinear fit: Levenberg–Marquardt with embedded linear solve and jitter update.
pub mod fit;

/// Configuration of the nonlinear fit.
pub mod fit_params;

/// Periodogram of the residuals and false-alarm probability.
pub mod periodogram;

/// Grid seeding of a companion orbit at fixed period.
pub mod seed;

/// Goodness-of-fit summary of the last successful fit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FitStatistics {
    /// `rᵀ C⁻¹ r` at the solution.
    pub chi_square: f64,
    pub neg2_log_likelihood: f64,
    /// Jitter variance at the solution (mas²).
    pub jitter: f64,
    pub n_obs: usize,
    /// Free linear regressors.
    pub n_linear: usize,
    /// Free nonlinear parameters, jitter included.
    pub n_nonlinear: usize,
    pub outer_iterations: usize,
}

impl FitStatistics {
    /// Degrees of freedom `N − n_linear − n_nonlinear`.
    pub fn degrees_of_freedom(&self) -> isize {
        self.n_obs as isize - self.n_linear as isize - self.n_nonlinear as isize
    }

    /// Chi-square per degree of freedom, `None` when there is none left.
    pub fn reduced_chi_square(&self) -> Option<f64> {
        let dof = self.degrees_of_freedom();
        (dof > 0).then(|| self.chi_square / dof as f64)
    }
}

#[derive(Debug, Clone)]
pub struct AstrometricModel {
    observations: Observations,
    design: LinearDesign,
    noise: CovarianceModel,
    components: Vec<KeplerianComponent>,
    next_label: Label,
    params: FitParams,
    solver: KeplerSolver,
    statistics: Option<FitStatistics>,
    nonlinear_uncertainties: BTreeMap<ParamName, f64>,
}

impl AstrometricModel {
    /// Single-star model over `observations`, with zero jitter and default [`FitParams`].
    ///
    /// Every single-star regressor and the jitter start free. No solve is performed.
    pub fn new(observations: Observations) -> Result<Self, AstroFitError> {
        let mut design = LinearDesign::new(observations.len());
        for name in ParamName::SINGLE_STAR {
            let basis = observations
                .single_star_basis(name)
                .ok_or_else(|| AstroFitError::UnknownParameter(name.to_string()))?;
            design.add_regressor(name, basis)?;
        }
        let noise = CovarianceModel::new(observations.variances())?;
        let params = FitParams::default();
        Ok(AstrometricModel {
            solver: params.kepler_solver(),
            observations,
            design,
            noise,
            components: Vec::new(),
            next_label: 1,
            params,
            statistics: None,
            nonlinear_uncertainties: BTreeMap::new(),
        })
    }

    pub fn with_fit_params(mut self, params: FitParams) -> Self {
        self.set_fit_params(params);
        self
    }

    pub fn set_fit_params(&mut self, params: FitParams) {
        self.solver = params.kepler_solver();
        self.params = params;
    }

    pub fn fit_params(&self) -> &FitParams {
        &self.params
    }

    pub fn observations(&self) -> &Observations {
        &self.observations
    }

    pub fn design(&self) -> &LinearDesign {
        &self.design
    }

    pub fn noise(&self) -> &CovarianceModel {
        &self.noise
    }

    pub fn components(&self) -> &[KeplerianComponent] {
        &self.components
    }

    pub fn labels(&self) -> Vec<Label> {
        self.components.iter().map(|c| c.label()).collect()
    }

    pub fn kepler_solver(&self) -> &KeplerSolver {
        &self.solver
    }

    /// Statistics of the last successful [`fit`](Self::fit); cleared by structural edits.
    pub fn statistics(&self) -> Option<&FitStatistics> {
        self.statistics.as_ref()
    }

    fn component_index(&self, label: Label) -> Result<usize, AstroFitError> {
        self.components
            .iter()
            .position(|c| c.label() == label)
            .ok_or(AstroFitError::UnknownComponent(label))
    }

    pub fn component(&self, label: Label) -> Result<&KeplerianComponent, AstroFitError> {
        Ok(&self.components[self.component_index(label)?])
    }

    pub fn covariance(&self) -> Result<Covariance, AstroFitError> {
        self.noise.build()
    }

    /// Summed along-scan signal of the companions in Campbell form.
    fn nonlinear_contribution(&self) -> Result<DVector<f64>, AstroFitError> {
        let mut total = DVector::zeros(self.observations.len());
        for comp in &self.components {
            if comp.parametrization() == Parametrization::Campbell {
                total += comp.contribution(&self.observations, &self.solver)?;
            }
        }
        Ok(total)
    }

    /// Data the linear design is solved against: observations minus Campbell-form orbits.
    fn linear_target(&self) -> Result<DVector<f64>, AstroFitError> {
        Ok(self.observations.along_scan() - self.nonlinear_contribution()?)
    }

    /// Model prediction at every observation with the current parameter values.
    pub fn prediction(&self) -> Result<DVector<f64>, AstroFitError> {
        Ok(self.design.prediction() + self.nonlinear_contribution()?)
    }

    /// Observed minus predicted along-scan displacement (mas).
    pub fn residuals(&self) -> Result<DVector<f64>, AstroFitError> {
        Ok(self.observations.along_scan() - self.prediction()?)
    }

    pub fn chi_square(&self) -> Result<f64, AstroFitError> {
        Ok(self.covariance()?.chi_square(&self.residuals()?))
    }

    /// `−2 ln L` of the current residuals under the current noise model.
    pub fn neg2_log_likelihood(&self) -> Result<f64, AstroFitError> {
        Ok(self.covariance()?.neg2_log_likelihood(&self.residuals()?))
    }

    /// Current value of any parameter.
    ///
    /// `jitter` is the jitter variance in mas². Thiele-Innes and Campbell names of a companion
    /// are both readable whatever the active form.
    pub fn value(&self, name: ParamName) -> Result<f64, AstroFitError> {
        if name == ParamName::Jitter {
            return Ok(self.noise.jitter());
        }
        if self.design.contains(name) {
            return self.design.value(name);
        }
        match name.label() {
            Some(label) => self.component(label)?.get(name),
            None => Err(AstroFitError::UnknownParameter(name.to_string())),
        }
    }

    /// Set the value of a parameter.
    ///
    /// Orbit-shape changes refresh the companion's regressors. Orientation names can only be
    /// set in the companion's active form.
    pub fn set_value(&mut self, name: ParamName, value: f64) -> Result<(), AstroFitError> {
        if name == ParamName::Jitter {
            return self.noise.set_jitter(value);
        }
        if self.design.contains(name) {
            self.design.set_value(name, value)?;
            return self.sync_thiele_innes();
        }
        let label = name
            .label()
            .ok_or_else(|| AstroFitError::UnknownParameter(name.to_string()))?;
        let idx = self.component_index(label)?;
        self.components[idx].set(name, value)?;
        self.refresh_component_basis(idx)
    }

    /// 1σ uncertainty of a parameter from the last solve or fit, if available.
    pub fn uncertainty(&self, name: ParamName) -> Option<f64> {
        self.design
            .get(name)
            .and_then(|r| r.uncertainty)
            .or_else(|| self.nonlinear_uncertainties.get(&name).copied())
    }

    pub fn is_free(&self, name: ParamName) -> Result<bool, AstroFitError> {
        if name == ParamName::Jitter {
            return Ok(self.noise.is_jitter_free());
        }
        if let Some(regressor) = self.design.get(name) {
            return Ok(regressor.free);
        }
        let label = name
            .label()
            .ok_or_else(|| AstroFitError::UnknownParameter(name.to_string()))?;
        let comp = self.component(label)?;
        if comp.nonlinear_names().contains(&name) {
            Ok(comp.is_free(name))
        } else {
            Err(AstroFitError::UnknownParameter(name.to_string()))
        }
    }

    fn set_freedom(&mut self, name: ParamName, free: bool) -> Result<(), AstroFitError> {
        if name == ParamName::Jitter {
            self.noise.set_jitter_free(free);
            return Ok(());
        }
        if self.design.contains(name) {
            return self.design.set_free(name, free);
        }
        let label = name
            .label()
            .ok_or_else(|| AstroFitError::UnknownParameter(name.to_string()))?;
        let idx = self.component_index(label)?;
        self.components[idx].set_free(name, free)
    }

    /// Keep `name` at its current value during subsequent fits.
    pub fn fix(&mut self, name: ParamName) -> Result<(), AstroFitError> {
        self.set_freedom(name, false)
    }

    /// Let subsequent fits adjust `name`.
    pub fn free(&mut self, name: ParamName) -> Result<(), AstroFitError> {
        self.set_freedom(name, true)
    }

    /// All free parameters: linear regressors, then jitter, then companion nonlinear names.
    pub fn free_parameters(&self) -> Vec<ParamName> {
        let mut names = self.design.free_names();
        if self.noise.is_jitter_free() {
            names.push(ParamName::Jitter);
        }
        names.extend(self.nonlinear_free_names());
        names
    }

    /// Free nonlinear orbital parameters, jitter excluded.
    pub fn nonlinear_free_names(&self) -> Vec<ParamName> {
        self.components
            .iter()
            .flat_map(|c| c.free_nonlinear_names())
            .collect()
    }

    /// Recompute the Thiele-Innes regressors of component `idx` if it is in Thiele-Innes form.
    fn refresh_component_basis(&mut self, idx: usize) -> Result<(), AstroFitError> {
        let comp = &self.components[idx];
        if comp.parametrization() != Parametrization::ThieleInnes {
            return Ok(());
        }
        let regressors = comp.thiele_innes_regressors(&self.observations, &self.solver)?;
        for (name, basis) in ParamName::thiele_innes(comp.label())
            .into_iter()
            .zip(regressors)
        {
            self.design.set_basis(name, basis)?;
        }
        Ok(())
    }

    pub(crate) fn refresh_bases(&mut self) -> Result<(), AstroFitError> {
        (0..self.components.len()).try_for_each(|idx| self.refresh_component_basis(idx))
    }

    /// Copy the solved Thiele-Innes coefficients into their components.
    fn sync_thiele_innes(&mut self) -> Result<(), AstroFitError> {
        for comp in &mut self.components {
            if comp.parametrization() == Parametrization::ThieleInnes {
                let mut values = [0.0; 4];
                for (slot, name) in values.iter_mut().zip(ParamName::thiele_innes(comp.label())) {
                    *slot = self.design.value(name)?;
                }
                comp.set_thiele_innes(ThieleInnes::from_array(values))?;
            }
        }
        Ok(())
    }

    /// Solve the free linear coefficients at the current nonlinear parameters and store them.
    pub fn solve_linear(&mut self) -> Result<LinearSolution, AstroFitError> {
        let covariance = self.covariance()?;
        let target = self.linear_target()?;
        let solution = self
            .design
            .solve(&target, &covariance, self.params.rcond_min)?;
        self.design.apply(&solution)?;
        self.sync_thiele_innes()?;
        Ok(solution)
    }

    /// Whitened residuals after a linear solve, without touching the model.
    pub(crate) fn whitened_residuals(&self) -> Result<DVector<f64>, AstroFitError> {
        let covariance = self.covariance()?;
        let target = self.linear_target()?;
        self.design
            .solve(&target, &covariance, self.params.rcond_min)
            .map(|s| s.whitened_residuals)
    }

    /// Add a Keplerian component at a fixed period.
    ///
    /// The component starts circular (`e = 0`) with periastron at the reference epoch, in
    /// Thiele-Innes form. Its four coefficients come from a linear solve at that period; all of
    /// its parameters are free.
    ///
    /// Return
    /// ----------
    /// * The label of the new component.
    ///
    /// Errors
    /// ----------
    /// * [`AstroFitError::InvalidParameter`] if `period ≤ 0`.
    /// * Any numerical error of the linear solve; the model is unchanged in that case.
    pub fn add_keplerian_from_period(&mut self, period: f64) -> Result<Label, AstroFitError> {
        let label = self.next_label;
        let component = KeplerianComponent::new(
            label,
            period,
            self.observations.reference_epoch(),
            0.0,
            ThieleInnes::new(0.0, 0.0, 0.0, 0.0).into(),
        )?;

        let mut work = self.clone();
        let regressors = component.thiele_innes_regressors(&work.observations, &work.solver)?;
        for (name, basis) in ParamName::thiele_innes(label).into_iter().zip(regressors) {
            work.design.add_regressor(name, basis)?;
        }
        work.components.push(component);
        work.next_label += 1;
        work.solve_linear()?;
        work.statistics = None;

        *self = work;
        Ok(label)
    }

    /// Remove a companion and its regressors from the model.
    pub fn remove_keplerian(&mut self, label: Label) -> Result<KeplerianComponent, AstroFitError> {
        let idx = self.component_index(label)?;
        if self.components[idx].parametrization() == Parametrization::ThieleInnes {
            for name in ParamName::thiele_innes(label) {
                self.design.remove_regressor(name)?;
            }
        }
        self.nonlinear_uncertainties
            .retain(|name, _| name.label() != Some(label));
        self.statistics = None;
        Ok(self.components.remove(idx))
    }

    /// Switch the active parametrization of companion `label` to the form named by
    /// `param_names` (its four Thiele-Innes or its four Campbell names, any order).
    ///
    /// The newly active names become free. See [`Self::set_parametrization`].
    pub fn set_keplerian_param(
        &mut self,
        label: Label,
        param_names: &[ParamName],
    ) -> Result<(), AstroFitError> {
        let target = Parametrization::from_names(label, param_names)?;
        self.set_parametrization(label, target)
    }

    /// Switch companion `label` between Thiele-Innes and Campbell form.
    ///
    /// * Thiele-Innes → Campbell: closed-form conversion; the four regressors leave the design
    ///   and `a0, i, Ω, ω` join the nonlinear parameters.
    /// * Campbell → Thiele-Innes: the regressors are re-registered with the converted values.
    ///
    /// The predicted signal is unchanged. On error (e.g. [`AstroFitError::DegenerateOrbit`])
    /// the model is left untouched.
    pub fn set_parametrization(
        &mut self,
        label: Label,
        target: Parametrization,
    ) -> Result<(), AstroFitError> {
        let idx = self.component_index(label)?;
        if self.components[idx].parametrization() == target {
            return Ok(());
        }

        let mut work = self.clone();
        match target {
            Parametrization::Campbell => {
                work.sync_thiele_innes()?;
                work.components[idx].to_parametrization(Parametrization::Campbell)?;
                for name in ParamName::thiele_innes(label) {
                    work.design.remove_regressor(name)?;
                }
            }
            Parametrization::ThieleInnes => {
                let values = work.components[idx].thiele_innes().to_array();
                work.components[idx].to_parametrization(Parametrization::ThieleInnes)?;
                let regressors =
                    work.components[idx].thiele_innes_regressors(&work.observations, &work.solver)?;
                for ((name, basis), value) in ParamName::thiele_innes(label)
                    .into_iter()
                    .zip(regressors)
                    .zip(values)
                {
                    work.design.add_regressor(name, basis)?;
                    work.design.set_value(name, value)?;
                }
            }
        }
        work.nonlinear_uncertainties
            .retain(|name, _| name.label() != Some(label));
        work.statistics = None;

        *self = work;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod astrometric_model_test {
    use super::*;
    use crate::{
        orbit_type::campbell_element::CampbellElements,
        simulation::{SimulatedCompanion, SyntheticStar},
    };
    use approx::assert_abs_diff_eq;
    use rand::{rngs::StdRng, SeedableRng};

    pub(crate) fn synthetic_model(seed: u64, with_orbit: bool) -> AstrometricModel {
        let mut builder = SyntheticStar::builder()
            .n_obs(100)
            .time_span(1800.0)
            .sigma(0.1);
        if with_orbit {
            builder = builder.companion(
                SimulatedCompanion::new(
                    500.0,
                    0.3,
                    0.3,
                    CampbellElements::new(2.0, 1.05, 0.7, 1.75).unwrap(),
                )
                .unwrap(),
            );
        }
        let star = builder.build().unwrap();
        let observations = star.simulate(&mut StdRng::seed_from_u64(seed)).unwrap();
        AstrometricModel::new(observations).unwrap()
    }

    #[test]
    fn test_new_model_has_single_star_regressors() {
        let model = synthetic_model(1, false);
        assert_eq!(model.design().names(), ParamName::SINGLE_STAR.to_vec());
        assert_eq!(
            model.free_parameters(),
            vec![
                ParamName::Ra,
                ParamName::Dec,
                ParamName::Parallax,
                ParamName::MuRa,
                ParamName::MuDec,
                ParamName::Jitter
            ]
        );
    }

    #[test]
    fn test_fix_and_free() {
        let mut model = synthetic_model(1, false);
        model.fix(ParamName::Parallax).unwrap();
        model.fix(ParamName::Jitter).unwrap();
        assert!(!model.is_free(ParamName::Parallax).unwrap());
        assert_eq!(model.free_parameters().len(), 4);
        model.free(ParamName::Parallax).unwrap();
        assert!(model.is_free(ParamName::Parallax).unwrap());
        assert_eq!(
            model.fix(ParamName::Period(3)),
            Err(AstroFitError::UnknownComponent(3))
        );
    }

    #[test]
    fn test_add_keplerian_registers_thiele_innes() {
        let mut model = synthetic_model(2, true);
        model.solve_linear().unwrap();
        let label = model.add_keplerian_from_period(500.0).unwrap();
        assert_eq!(label, 1);
        for name in ParamName::thiele_innes(label) {
            assert!(model.design().contains(name));
            assert!(model.is_free(name).unwrap());
        }
        assert_eq!(model.value(ParamName::Eccentricity(1)).unwrap(), 0.0);
        assert!(model.value(ParamName::ThieleInnesA(1)).unwrap().abs() > 0.0);
        assert!(model.add_keplerian_from_period(-3.0).is_err());
        assert_eq!(model.components().len(), 1);
    }

    #[test]
    fn test_parametrization_switch_preserves_prediction() {
        let mut model = synthetic_model(3, true);
        let label = model.add_keplerian_from_period(500.0).unwrap();
        model.set_value(ParamName::Eccentricity(label), 0.3).unwrap();
        model.solve_linear().unwrap();
        let before = model.prediction().unwrap();

        model
            .set_keplerian_param(label, &ParamName::campbell(label))
            .unwrap();
        assert!(!model.design().contains(ParamName::ThieleInnesA(label)));
        assert!(model
            .nonlinear_free_names()
            .contains(&ParamName::SemiMajorAxis(label)));
        assert_abs_diff_eq!(model.prediction().unwrap(), before, epsilon = 1e-9);

        model
            .set_keplerian_param(label, &ParamName::thiele_innes(label))
            .unwrap();
        assert!(model.design().contains(ParamName::ThieleInnesG(label)));
        assert_abs_diff_eq!(model.prediction().unwrap(), before, epsilon = 1e-9);
    }

    #[test]
    fn test_thiele_innes_edit_survives_parametrization_switch() {
        let mut model = synthetic_model(6, true);
        let label = model.add_keplerian_from_period(500.0).unwrap();
        model.set_value(ParamName::ThieleInnesA(label), 3.0).unwrap();
        assert_eq!(model.component(label).unwrap().thiele_innes().a, 3.0);
        let before = model.prediction().unwrap();

        model
            .set_keplerian_param(label, &ParamName::campbell(label))
            .unwrap();
        assert_abs_diff_eq!(model.prediction().unwrap(), before, epsilon = 1e-9);
        assert_abs_diff_eq!(
            model.value(ParamName::ThieleInnesA(label)).unwrap(),
            3.0,
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_remove_keplerian() {
        let mut model = synthetic_model(4, true);
        let label = model.add_keplerian_from_period(300.0).unwrap();
        model.remove_keplerian(label).unwrap();
        assert!(model.components().is_empty());
        assert_eq!(model.design().len(), 5);
        assert_eq!(
            model.remove_keplerian(label),
            Err(AstroFitError::UnknownComponent(label))
        );
        assert_eq!(model.add_keplerian_from_period(300.0).unwrap(), 2);
    }

    #[test]
    fn test_value_round_trip_by_name() {
        let mut model = synthetic_model(5, false);
        let name: ParamName = "parallax".parse().unwrap();
        model.set_value(name, 12.5).unwrap();
        assert_eq!(model.value(name).unwrap(), 12.5);
        model.set_value(ParamName::Jitter, 0.04).unwrap();
        assert_eq!(model.value(ParamName::Jitter).unwrap(), 0.04);
        assert!(model.set_value(ParamName::Jitter, -1.0).is_err());
        assert!(model.value(ParamName::Period(1)).is_err());
    }
}
