//! # Keplerian component
//!
//! One orbital companion's contribution to the along-scan signal. The orbit shape
//! `(P, T0, e)` is always nonlinear. The orientation is carried by an
//! [`OrbitOrientation`], whose active variant decides how the fit treats it:
//!
//! | [`Parametrization`] | Orientation parameters | Solved by |
//! |---|---|---|
//! | `ThieleInnes` | `A, B, F, G` | closed-form linear solve |
//! | `Campbell` | `a0, i, Ω, ω` | nonlinear optimizer |
//!
//! The normalized rectangular coordinates `X(t)`, `Y(t)` come from Kepler's equation and
//! are projected on the scan direction to give the four Thiele-Innes regressors
//!
//! ```text
//! A : X·cos ψ     B : X·sin ψ     F : Y·cos ψ     G : Y·sin ψ
//! ```

use std::{collections::BTreeSet, fmt, str::FromStr};

use nalgebra::DVector;
use serde::Serialize;

use crate::{
    astrofit_errors::AstroFitError,
    constants::{Day, Label, Mas, DPI},
    kepler::{principal_angle, KeplerSolver},
    observations::Observations,
    orbit_type::{campbell_element::CampbellElements, thiele_innes::ThieleInnes, OrbitOrientation},
    parameters::ParamName,
};

/// Which orientation form is active for fitting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Parametrization {
    ThieleInnes,
    Campbell,
}

impl Parametrization {
    /// Orientation parameter names of companion `label` under this form.
    pub fn names(&self, label: Label) -> [ParamName; 4] {
        match self {
            Parametrization::ThieleInnes => ParamName::thiele_innes(label),
            Parametrization::Campbell => ParamName::campbell(label),
        }
    }

    /// Identify the form from a complete set of orientation names of companion `label`.
    pub fn from_names(label: Label, names: &[ParamName]) -> Result<Self, AstroFitError> {
        let given: BTreeSet<ParamName> = names.iter().copied().collect();
        [Parametrization::ThieleInnes, Parametrization::Campbell]
            .into_iter()
            .find(|p| given == p.names(label).into_iter().collect::<BTreeSet<_>>())
            .ok_or_else(|| {
                AstroFitError::InvalidParameter(format!(
                    "{names:?} is neither the Thiele-Innes nor the Campbell set of companion {label}"
                ))
            })
    }
}

impl fmt::Display for Parametrization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Parametrization::ThieleInnes => write!(f, "thiele-innes"),
            Parametrization::Campbell => write!(f, "campbell"),
        }
    }
}

impl FromStr for Parametrization {
    type Err = AstroFitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "thiele-innes" | "thiele_innes" | "ti" => Ok(Parametrization::ThieleInnes),
            "campbell" => Ok(Parametrization::Campbell),
            _ => Err(AstroFitError::InvalidParameter(format!(
                "unknown parametrization: {s}"
            ))),
        }
    }
}

/// One companion orbit.
///
/// Units
/// -----
/// * `period`, `periastron_epoch`: days.
/// * `eccentricity`: unitless, in `[0, 1)`.
#[derive(Debug, Clone, PartialEq)]
pub struct KeplerianComponent {
    label: Label,
    period: Day,
    periastron_epoch: Day,
    eccentricity: f64,
    orientation: OrbitOrientation,
    fixed: BTreeSet<ParamName>,
}

fn check_period(period: Day) -> Result<(), AstroFitError> {
    if period.is_finite() && period > 0.0 {
        Ok(())
    } else {
        Err(AstroFitError::InvalidParameter(format!(
            "period must be positive, got {period}"
        )))
    }
}

fn check_eccentricity(e: f64) -> Result<(), AstroFitError> {
    if (0.0..1.0).contains(&e) {
        Ok(())
    } else {
        Err(AstroFitError::InvalidParameter(format!(
            "eccentricity must lie in [0, 1), got {e}"
        )))
    }
}

impl KeplerianComponent {
    /// Build a validated component with every parameter free.
    ///
    /// Errors
    /// ----------
    /// * [`AstroFitError::InvalidParameter`] for `P ≤ 0`, `e ∉ [0, 1)`, a non-finite `T0`
    ///   or invalid Campbell elements.
    pub fn new(
        label: Label,
        period: Day,
        periastron_epoch: Day,
        eccentricity: f64,
        orientation: OrbitOrientation,
    ) -> Result<Self, AstroFitError> {
        check_period(period)?;
        check_eccentricity(eccentricity)?;
        if !periastron_epoch.is_finite() {
            return Err(AstroFitError::InvalidParameter(format!(
                "periastron epoch must be finite, got {periastron_epoch}"
            )));
        }
        if let OrbitOrientation::Campbell(c) = &orientation {
            c.validate()?;
        }
        Ok(KeplerianComponent {
            label,
            period,
            periastron_epoch,
            eccentricity,
            orientation,
            fixed: BTreeSet::new(),
        })
    }

    pub fn label(&self) -> Label {
        self.label
    }

    pub fn period(&self) -> Day {
        self.period
    }

    pub fn periastron_epoch(&self) -> Day {
        self.periastron_epoch
    }

    pub fn eccentricity(&self) -> f64 {
        self.eccentricity
    }

    pub fn orientation(&self) -> &OrbitOrientation {
        &self.orientation
    }

    pub fn parametrization(&self) -> Parametrization {
        match self.orientation {
            OrbitOrientation::ThieleInnes(_) => Parametrization::ThieleInnes,
            OrbitOrientation::Campbell(_) => Parametrization::Campbell,
        }
    }

    pub fn thiele_innes(&self) -> ThieleInnes {
        self.orientation.to_thiele_innes()
    }

    pub fn campbell(&self) -> Result<CampbellElements, AstroFitError> {
        self.orientation.to_campbell()
    }

    /// Overwrite the Thiele-Innes constants. Only valid while Thiele-Innes is active.
    pub(crate) fn set_thiele_innes(&mut self, ti: ThieleInnes) -> Result<(), AstroFitError> {
        match self.orientation {
            OrbitOrientation::ThieleInnes(_) => {
                self.orientation = OrbitOrientation::ThieleInnes(ti);
                Ok(())
            }
            OrbitOrientation::Campbell(_) => Err(AstroFitError::InvalidParameter(format!(
                "companion {} is in Campbell form",
                self.label
            ))),
        }
    }

    /// Switch the active orientation form through the closed-form conversion.
    ///
    /// Newly active orientation parameters start free. The component is unchanged on error.
    pub fn to_parametrization(&mut self, target: Parametrization) -> Result<(), AstroFitError> {
        if target == self.parametrization() {
            return Ok(());
        }
        let orientation = match target {
            Parametrization::ThieleInnes => {
                OrbitOrientation::ThieleInnes(self.orientation.to_thiele_innes())
            }
            Parametrization::Campbell => OrbitOrientation::Campbell(self.orientation.to_campbell()?),
        };
        for name in self.parametrization().names(self.label) {
            self.fixed.remove(&name);
        }
        self.orientation = orientation;
        Ok(())
    }

    /// Nonlinear names of this component: `P, T0, e` plus `a0, i, Ω, ω` in Campbell form.
    pub fn nonlinear_names(&self) -> Vec<ParamName> {
        let mut names = ParamName::orbit_shape(self.label).to_vec();
        if self.parametrization() == Parametrization::Campbell {
            names.extend(ParamName::campbell(self.label));
        }
        names
    }

    pub fn free_nonlinear_names(&self) -> Vec<ParamName> {
        self.nonlinear_names()
            .into_iter()
            .filter(|n| !self.fixed.contains(n))
            .collect()
    }

    fn check_owns_nonlinear(&self, name: ParamName) -> Result<(), AstroFitError> {
        if self.nonlinear_names().contains(&name) {
            Ok(())
        } else {
            Err(AstroFitError::UnknownParameter(format!(
                "{name} is not a nonlinear parameter of companion {} ({} form)",
                self.label,
                self.parametrization()
            )))
        }
    }

    pub fn is_free(&self, name: ParamName) -> bool {
        self.nonlinear_names().contains(&name) && !self.fixed.contains(&name)
    }

    pub fn set_free(&mut self, name: ParamName, free: bool) -> Result<(), AstroFitError> {
        self.check_owns_nonlinear(name)?;
        if free {
            self.fixed.remove(&name);
        } else {
            self.fixed.insert(name);
        }
        Ok(())
    }

    /// Value of any parameter of this component, orientation names in either form.
    pub fn get(&self, name: ParamName) -> Result<f64, AstroFitError> {
        if name.label() != Some(self.label) {
            return Err(AstroFitError::UnknownParameter(name.to_string()));
        }
        let ti = || self.thiele_innes();
        Ok(match name {
            ParamName::Period(_) => self.period,
            ParamName::PeriastronEpoch(_) => self.periastron_epoch,
            ParamName::Eccentricity(_) => self.eccentricity,
            ParamName::ThieleInnesA(_) => ti().a,
            ParamName::ThieleInnesB(_) => ti().b,
            ParamName::ThieleInnesF(_) => ti().f,
            ParamName::ThieleInnesG(_) => ti().g,
            ParamName::SemiMajorAxis(_) => self.campbell()?.semi_major_axis,
            ParamName::Inclination(_) => self.campbell()?.inclination,
            ParamName::AscendingNode(_) => self.campbell()?.ascending_node,
            ParamName::PeriastronArgument(_) => self.campbell()?.periastron_argument,
            _ => return Err(AstroFitError::UnknownParameter(name.to_string())),
        })
    }

    /// Set a nonlinear parameter with domain validation.
    pub fn set(&mut self, name: ParamName, value: f64) -> Result<(), AstroFitError> {
        self.check_owns_nonlinear(name)?;
        match name {
            ParamName::Period(_) => check_period(value)?,
            ParamName::Eccentricity(_) => check_eccentricity(value)?,
            _ if !value.is_finite() => {
                return Err(AstroFitError::InvalidParameter(format!(
                    "{name} must be finite, got {value}"
                )))
            }
            _ => {}
        }
        let previous = self.orientation;
        self.set_raw(name, value)?;
        if let OrbitOrientation::Campbell(c) = &self.orientation {
            if let Err(err) = c.validate() {
                self.orientation = previous;
                return Err(err);
            }
        }
        Ok(())
    }

    /// Set a nonlinear parameter without domain checks on the orientation.
    ///
    /// Campbell values may leave their canonical ranges (negative `a0`, `i ∉ [0, π]`): the
    /// Thiele-Innes projection stays well defined and [`Self::normalize`] folds them back.
    pub(crate) fn set_raw(&mut self, name: ParamName, value: f64) -> Result<(), AstroFitError> {
        match (name, &mut self.orientation) {
            (ParamName::Period(_), _) => self.period = value,
            (ParamName::PeriastronEpoch(_), _) => self.periastron_epoch = value,
            (ParamName::Eccentricity(_), _) => self.eccentricity = value,
            (ParamName::SemiMajorAxis(_), OrbitOrientation::Campbell(c)) => c.semi_major_axis = value,
            (ParamName::Inclination(_), OrbitOrientation::Campbell(c)) => c.inclination = value,
            (ParamName::AscendingNode(_), OrbitOrientation::Campbell(c)) => c.ascending_node = value,
            (ParamName::PeriastronArgument(_), OrbitOrientation::Campbell(c)) => {
                c.periastron_argument = value
            }
            _ => return Err(AstroFitError::UnknownParameter(name.to_string())),
        }
        Ok(())
    }

    /// Fold the parameters back onto their conventional ranges without changing the signal.
    ///
    /// * `T0` is moved into `[t_ref, t_ref + P)`.
    /// * Campbell: `a0 ≥ 0`, `i ∈ [0, π]`, `Ω ∈ [0, π)`, `ω ∈ [0, 2π)`.
    pub(crate) fn normalize(&mut self, reference_epoch: Day) {
        self.periastron_epoch =
            reference_epoch + (self.periastron_epoch - reference_epoch).rem_euclid(self.period);

        if let OrbitOrientation::Campbell(c) = &mut self.orientation {
            if c.semi_major_axis < 0.0 {
                c.semi_major_axis = -c.semi_major_axis;
                c.periastron_argument += std::f64::consts::PI;
            }
            let i = principal_angle(c.inclination);
            c.inclination = if i > std::f64::consts::PI { DPI - i } else { i };
            *c = c.canonical();
        }
    }

    /// Normalized rectangular coordinates `X(t)`, `Y(t)` at every observation epoch.
    pub fn basis(
        &self,
        observations: &Observations,
        solver: &KeplerSolver,
    ) -> Result<(DVector<f64>, DVector<f64>), AstroFitError> {
        let n = observations.len();
        let mut x = DVector::zeros(n);
        let mut y = DVector::zeros(n);
        for (k, obs) in observations.iter().enumerate() {
            let (xk, yk) = solver.rectangular_coordinates(
                obs.epoch,
                self.period,
                self.periastron_epoch,
                self.eccentricity,
            )?;
            x[k] = xk;
            y[k] = yk;
        }
        Ok((x, y))
    }

    /// The four along-scan Thiele-Innes regressors, in order `A, B, F, G`.
    pub fn thiele_innes_regressors(
        &self,
        observations: &Observations,
        solver: &KeplerSolver,
    ) -> Result<[DVector<f64>; 4], AstroFitError> {
        let (x, y) = self.basis(observations, solver)?;
        let sin_psi = DVector::from_iterator(observations.len(), observations.iter().map(|o| o.sin_psi));
        let cos_psi = DVector::from_iterator(observations.len(), observations.iter().map(|o| o.cos_psi));
        Ok([
            x.component_mul(&cos_psi),
            x.component_mul(&sin_psi),
            y.component_mul(&cos_psi),
            y.component_mul(&sin_psi),
        ])
    }

    /// Along-scan displacement produced by this orbit at every observation (mas).
    pub fn contribution(
        &self,
        observations: &Observations,
        solver: &KeplerSolver,
    ) -> Result<DVector<f64>, AstroFitError> {
        let ti = self.thiele_innes();
        let (x, y) = self.basis(observations, solver)?;
        Ok(DVector::from_iterator(
            observations.len(),
            observations
                .iter()
                .zip(x.iter().zip(y.iter()))
                .map(|(o, (xk, yk))| ti.along_scan(*xk, *yk, o.sin_psi, o.cos_psi)),
        ))
    }

    /// Photocentre offsets `(Δα*, Δδ)` in mas at epoch `t`.
    pub fn sky_offsets(&self, t: Day, solver: &KeplerSolver) -> Result<(Mas, Mas), AstroFitError> {
        let (x, y) =
            solver.rectangular_coordinates(t, self.period, self.periastron_epoch, self.eccentricity)?;
        Ok(self.thiele_innes().sky_offsets(x, y))
    }
}

#[cfg(test)]
mod keplerian_component_test {
    use super::*;
    use crate::observations::Observation;
    use approx::assert_abs_diff_eq;

    fn observations() -> Observations {
        let records = (0..40)
            .map(|k| {
                let t = 25.0 * k as f64;
                Observation::from_scan_angle(t, 0.37 * k as f64, 0.0, 0.1, 0.0).unwrap()
            })
            .collect();
        Observations::new(records, 0.0).unwrap()
    }

    fn component() -> KeplerianComponent {
        let campbell = CampbellElements::new(2.0, 1.0, 0.7, 1.9).unwrap();
        KeplerianComponent::new(1, 500.0, 120.0, 0.3, campbell.into()).unwrap()
    }

    #[test]
    fn test_validation() {
        let ti = OrbitOrientation::ThieleInnes(ThieleInnes::new(1.0, 0.0, 0.0, 1.0));
        assert!(KeplerianComponent::new(1, -1.0, 0.0, 0.1, ti).is_err());
        assert!(KeplerianComponent::new(1, 100.0, 0.0, 1.0, ti).is_err());
        assert!(KeplerianComponent::new(1, 100.0, f64::NAN, 0.1, ti).is_err());
    }

    #[test]
    fn test_regressors_reproduce_contribution() {
        let comp = component();
        let obs = observations();
        let solver = KeplerSolver::default();
        let regs = comp.thiele_innes_regressors(&obs, &solver).unwrap();
        let ti = comp.thiele_innes();
        let from_regressors =
            &regs[0] * ti.a + &regs[1] * ti.b + &regs[2] * ti.f + &regs[3] * ti.g;
        let direct = comp.contribution(&obs, &solver).unwrap();
        assert_abs_diff_eq!(from_regressors, direct, epsilon = 1e-12);
    }

    #[test]
    fn test_switch_parametrization_keeps_signal() {
        let mut comp = component();
        let obs = observations();
        let solver = KeplerSolver::default();
        let before = comp.contribution(&obs, &solver).unwrap();

        comp.to_parametrization(Parametrization::ThieleInnes).unwrap();
        assert_eq!(comp.nonlinear_names().len(), 3);
        comp.to_parametrization(Parametrization::Campbell).unwrap();
        assert_eq!(comp.nonlinear_names().len(), 7);

        let after = comp.contribution(&obs, &solver).unwrap();
        assert_abs_diff_eq!(before, after, epsilon = 1e-10);
    }

    #[test]
    fn test_normalize_folds_without_changing_signal() {
        let mut comp = component();
        let obs = observations();
        let solver = KeplerSolver::default();
        let before = comp.contribution(&obs, &solver).unwrap();

        comp.set_raw(ParamName::SemiMajorAxis(1), -2.0).unwrap();
        comp.set_raw(ParamName::PeriastronArgument(1), 1.9 + std::f64::consts::PI)
            .unwrap();
        comp.set_raw(ParamName::Inclination(1), -1.0).unwrap();
        comp.set_raw(ParamName::PeriastronEpoch(1), 120.0 - 3.0 * 500.0)
            .unwrap();
        comp.normalize(0.0);

        let c = comp.campbell().unwrap();
        assert!(c.semi_major_axis > 0.0);
        assert!((0.0..=std::f64::consts::PI).contains(&c.inclination));
        assert_abs_diff_eq!(comp.periastron_epoch(), 120.0, epsilon = 1e-9);
        let after = comp.contribution(&obs, &solver).unwrap();
        assert_abs_diff_eq!(before, after, epsilon = 1e-10);
    }

    #[test]
    fn test_parametrization_from_names() {
        let names = [
            ParamName::ThieleInnesG(2),
            ParamName::ThieleInnesA(2),
            ParamName::ThieleInnesF(2),
            ParamName::ThieleInnesB(2),
        ];
        assert_eq!(
            Parametrization::from_names(2, &names).unwrap(),
            Parametrization::ThieleInnes
        );
        assert_eq!(
            Parametrization::from_names(2, &ParamName::campbell(2)).unwrap(),
            Parametrization::Campbell
        );
        assert!(Parametrization::from_names(1, &names).is_err());
        assert_eq!(
            "Campbell".parse::<Parametrization>().unwrap(),
            Parametrization::Campbell
        );
    }

    #[test]
    fn test_sky_offsets_at_periastron() {
        let comp = component();
        let ti = comp.thiele_innes();
        let (d_ra, d_dec) = comp.sky_offsets(120.0, &KeplerSolver::default()).unwrap();
        assert_abs_diff_eq!(d_ra, ti.b * 0.7, epsilon = 1e-12);
        assert_abs_diff_eq!(d_dec, ti.a * 0.7, epsilon = 1e-12);
    }
}
