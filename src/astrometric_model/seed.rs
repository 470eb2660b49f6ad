//! Grid seeding of a companion orbit.
//!
//! At `e = 0` the periastron epoch is absorbed by the Thiele-Innes constants and the
//! eccentricity gradient vanishes, so a freshly added circular component is a poor starting
//! point for a local optimizer. [`AstrometricModel::seed_orbit_grid`] scans eccentricity ×
//! periastron phase at the component's fixed period, each point costing one linear solve, and
//! keeps the lowest chi-square.

use tracing::debug;

use crate::{
    astrofit_errors::AstroFitError,
    astrometric_model::AstrometricModel,
    constants::Label,
    parameters::ParamName,
};

impl AstrometricModel {
    /// Seed `(e, T0)` of companion `label` from a grid at fixed period.
    ///
    /// The grid holds `seed_eccentricities` values in `[0.05, seed_max_eccentricity]` times
    /// `seed_phases` periastron epochs `t_ref + k·P/seed_phases`. The current state competes
    /// with the grid, so seeding never increases the chi-square. A Thiele-Innes companion has
    /// its coefficients re-solved at every grid point; a Campbell companion keeps its
    /// orientation.
    ///
    /// Return
    /// ----------
    /// * The chi-square of the retained orbit.
    ///
    /// Errors
    /// ----------
    /// * [`AstroFitError::UnknownComponent`] for an unknown label.
    pub fn seed_orbit_grid(&mut self, label: Label) -> Result<f64, AstroFitError> {
        self.seed_grid(label, true)
    }

    /// Grid-seed every companion whose free eccentricity sits at exactly zero.
    ///
    /// A fixed periastron epoch is kept; only the eccentricity is scanned then.
    pub(crate) fn seed_circular_orbits(&mut self) -> Result<(), AstroFitError> {
        let circular: Vec<(Label, bool)> = self
            .components
            .iter()
            .filter(|c| c.eccentricity() == 0.0 && c.is_free(ParamName::Eccentricity(c.label())))
            .map(|c| (c.label(), c.is_free(ParamName::PeriastronEpoch(c.label()))))
            .collect();
        for (label, vary_epoch) in circular {
            self.seed_grid(label, vary_epoch)?;
        }
        Ok(())
    }

    fn seed_grid(&mut self, label: Label, vary_epoch: bool) -> Result<f64, AstroFitError> {
        let component = self.component(label)?;
        let period = component.period();
        let current_epoch = component.periastron_epoch();
        let t_ref = self.observations.reference_epoch();
        let epochs: Vec<f64> = if vary_epoch {
            let n_phases = self.params.seed_phases;
            (0..n_phases)
                .map(|k| t_ref + period * k as f64 / n_phases as f64)
                .collect()
        } else {
            vec![current_epoch]
        };

        let mut work = self.clone();
        work.solve_linear()?;
        let mut best_chi2 = work.chi_square()?;
        let mut best = (
            work.value(ParamName::Eccentricity(label))?,
            work.value(ParamName::PeriastronEpoch(label))?,
        );

        for e in self.params.seed_eccentricity_grid() {
            for &t0 in &epochs {
                work.set_value(ParamName::Eccentricity(label), e)?;
                work.set_value(ParamName::PeriastronEpoch(label), t0)?;
                let chi2 = match work.whitened_residuals() {
                    Ok(r) => r.norm_squared(),
                    Err(AstroFitError::SingularDesign { .. }) => continue,
                    Err(err) => return Err(err),
                };
                if chi2 < best_chi2 {
                    best_chi2 = chi2;
                    best = (e, t0);
                }
            }
        }

        work.set_value(ParamName::Eccentricity(label), best.0)?;
        work.set_value(ParamName::PeriastronEpoch(label), best.1)?;
        work.solve_linear()?;
        debug!(
            label,
            eccentricity = best.0,
            periastron_epoch = best.1,
            chi_square = best_chi2,
            "orbit seed"
        );

        work.statistics = None;
        *self = work;
        Ok(best_chi2)
    }
}
