//! # Fit output records
//!
//! [`AstrometricModel::solution`] freezes the current state of a model into plain,
//! serializable records: single-star astrometry, noise level, goodness of fit and one
//! [`CompanionSolution`] per Keplerian component.
//!
//! For each companion both orientation forms are reported. The Campbell elements are
//! missing for an unresolved orbit (`a0 ≈ 0`). When a primary mass is supplied and the
//! parallax is positive, the photocentric semi-major axis is converted to AU and the
//! companion mass is solved from the exact mass function (dark-companion assumption).

use std::fmt;

use serde::Serialize;

use crate::{
    astrofit_errors::AstroFitError,
    astrometric_model::{AstrometricModel, FitStatistics},
    constants::{AstronomicalUnit, Label, SolarMass},
    keplerian_component::{KeplerianComponent, Parametrization},
    mass::{angular_to_linear, mass_function},
    orbit_type::{campbell_element::CampbellElements, thiele_innes::ThieleInnes},
    parameters::ParamName,
};

/// A value and its 1σ uncertainty, when one is known.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Estimate {
    pub value: f64,
    pub uncertainty: Option<f64>,
}

impl Estimate {
    fn of(model: &AstrometricModel, name: ParamName) -> Result<Self, AstroFitError> {
        Ok(Estimate {
            value: model.value(name)?,
            uncertainty: model.uncertainty(name),
        })
    }
}

impl fmt::Display for Estimate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.uncertainty {
            Some(u) => write!(f, "{:.6} ± {:.6}", self.value, u),
            None => write!(f, "{:.6}", self.value),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompanionSolution {
    pub label: Label,
    pub parametrization: Parametrization,
    pub period: Estimate,
    pub periastron_epoch: Estimate,
    pub eccentricity: Estimate,
    pub thiele_innes: ThieleInnes,
    /// Uncertainties of `A, B, F, G` when they were fitted linearly.
    pub thiele_innes_uncertainties: [Option<f64>; 4],
    pub campbell: Option<CampbellElements>,
    /// Uncertainties of `a0, i, Ω, ω` when they were fitted in Campbell form.
    pub campbell_uncertainties: [Option<f64>; 4],
    /// Photocentric semi-major axis `a0 / ϖ`.
    pub semi_major_axis_au: Option<AstronomicalUnit>,
    pub companion_mass: Option<SolarMass>,
}

impl CompanionSolution {
    fn new(
        model: &AstrometricModel,
        component: &KeplerianComponent,
        parallax: f64,
        primary_mass: Option<SolarMass>,
    ) -> Result<Self, AstroFitError> {
        let label = component.label();
        let uncertainties = |names: [ParamName; 4]| names.map(|n| model.uncertainty(n));
        let campbell = component.campbell().ok();

        let semi_major_axis_au = match campbell {
            Some(c) if parallax > 0.0 => Some(angular_to_linear(c.semi_major_axis, parallax)?),
            _ => None,
        };
        let companion_mass = match (primary_mass, semi_major_axis_au) {
            (Some(m1), Some(a1)) => Some(mass_function(m1, a1, component.period())?),
            (Some(_), None) if parallax <= 0.0 => {
                return Err(AstroFitError::InvalidParameter(format!(
                    "companion mass needs a positive parallax, got {parallax}"
                )))
            }
            _ => None,
        };

        Ok(CompanionSolution {
            label,
            parametrization: component.parametrization(),
            period: Estimate::of(model, ParamName::Period(label))?,
            periastron_epoch: Estimate::of(model, ParamName::PeriastronEpoch(label))?,
            eccentricity: Estimate::of(model, ParamName::Eccentricity(label))?,
            thiele_innes: component.thiele_innes(),
            thiele_innes_uncertainties: uncertainties(ParamName::thiele_innes(label)),
            campbell,
            campbell_uncertainties: uncertainties(ParamName::campbell(label)),
            semi_major_axis_au,
            companion_mass,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AstrometricSolution {
    pub ra: Estimate,
    pub dec: Estimate,
    pub parallax: Estimate,
    pub mura: Estimate,
    pub mudec: Estimate,
    /// Jitter variance (mas²).
    pub jitter: f64,
    pub statistics: Option<FitStatistics>,
    pub companions: Vec<CompanionSolution>,
}

impl AstrometricModel {
    /// Snapshot of the current parameter values as output records.
    ///
    /// Arguments
    /// -----------------
    /// * `primary_mass`: mass of the primary (M☉); companion masses are computed when given.
    ///
    /// Errors
    /// ----------
    /// * [`AstroFitError::InvalidParameter`] if a primary mass is given but the parallax is not
    ///   positive, or the primary mass itself is not.
    pub fn solution(
        &self,
        primary_mass: Option<SolarMass>,
    ) -> Result<AstrometricSolution, AstroFitError> {
        let parallax = Estimate::of(self, ParamName::Parallax)?;
        let companions = self
            .components()
            .iter()
            .map(|c| CompanionSolution::new(self, c, parallax.value, primary_mass))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(AstrometricSolution {
            ra: Estimate::of(self, ParamName::Ra)?,
            dec: Estimate::of(self, ParamName::Dec)?,
            parallax,
            mura: Estimate::of(self, ParamName::MuRa)?,
            mudec: Estimate::of(self, ParamName::MuDec)?,
            jitter: self.noise().jitter(),
            statistics: self.statistics().cloned(),
            companions,
        })
    }
}

impl fmt::Display for AstrometricSolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Astrometric Solution")?;
        writeln!(f, "====================")?;
        writeln!(f, "  ra       = {} mas", self.ra)?;
        writeln!(f, "  dec      = {} mas", self.dec)?;
        writeln!(f, "  parallax = {} mas", self.parallax)?;
        writeln!(f, "  mura     = {} mas/yr", self.mura)?;
        writeln!(f, "  mudec    = {} mas/yr", self.mudec)?;
        writeln!(f, "  jitter   = {:.6} mas²", self.jitter)?;
        if let Some(stats) = &self.statistics {
            writeln!(
                f,
                "  chi2     = {:.3} (dof {}, -2lnL {:.3}, {} iterations)",
                stats.chi_square,
                stats.degrees_of_freedom(),
                stats.neg2_log_likelihood,
                stats.outer_iterations
            )?;
        }
        for c in &self.companions {
            writeln!(f)?;
            writeln!(f, "Companion {} ({})", c.label, c.parametrization)?;
            writeln!(f, "  P  = {} d", c.period)?;
            writeln!(f, "  T0 = {} d", c.periastron_epoch)?;
            writeln!(f, "  e  = {}", c.eccentricity)?;
            writeln!(f, "  {}", c.thiele_innes)?;
            match &c.campbell {
                Some(campbell) => write!(f, "{campbell}")?,
                None => writeln!(f, "  (unresolved orbit, no Campbell elements)")?,
            }
            if let Some(a) = c.semi_major_axis_au {
                writeln!(f, "  a1 = {a:.6} AU")?;
            }
            if let Some(m) = c.companion_mass {
                writeln!(f, "  m2 = {m:.6} M☉")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod solution_test {
    use super::*;
    use crate::astrometric_model::astrometric_model_test::synthetic_model;

    #[test]
    fn test_single_star_solution() {
        let mut model = synthetic_model(41, false);
        model.fit().unwrap();
        let sol = model.solution(None).unwrap();
        assert!((sol.parallax.value - 10.0).abs() < 0.1);
        assert!(sol.parallax.uncertainty.unwrap() > 0.0);
        assert!(sol.companions.is_empty());
        assert!(sol.statistics.is_some());
        assert!(sol.to_string().contains("parallax"));
    }

    #[test]
    fn test_companion_mass_requires_positive_parallax() {
        let mut model = synthetic_model(42, true);
        model.solve_linear().unwrap();
        let label = model.add_keplerian_from_period(500.0).unwrap();
        let sol = model.solution(Some(1.0)).unwrap();
        let companion = &sol.companions[0];
        assert_eq!(companion.label, label);
        assert!(companion.campbell.is_some());
        assert!(companion.companion_mass.unwrap() > 0.0);
        assert!(companion.thiele_innes_uncertainties.iter().all(Option::is_some));

        model.fix(ParamName::Parallax).unwrap();
        model.set_value(ParamName::Parallax, -1.0).unwrap();
        assert!(matches!(
            model.solution(Some(1.0)),
            Err(AstroFitError::InvalidParameter(_))
        ));
        assert!(model.solution(None).unwrap().companions[0]
            .semi_major_axis_au
            .is_none());
    }
}
