//! # Along-scan observations
//!
//! A scanning astrometric satellite measures one-dimensional positions along its
//! instantaneous scan direction. Each [`Observation`] carries the epoch, the scan
//! direction `(sin ψ, cos ψ)`, the measured along-scan displacement, its uncertainty,
//! and the parallax factor at that epoch.
//!
//! [`Observations`] is the validated, epoch-ordered set consumed by the fitting engine.
//! It also builds the five single-star basis vectors:
//!
//! ```text
//! ra       : sin ψ
//! dec      : cos ψ
//! parallax : f_ϖ
//! mura     : τ·sin ψ        τ = (t − t_ref) / 365.25
//! mudec    : τ·cos ψ
//! ```
//!
//! Observations are immutable once loaded; how they are loaded (file, archive query,
//! generator) is the caller's business.

use itertools::{Itertools, MinMaxResult};
use nalgebra::DVector;

use crate::{
    astrofit_errors::AstroFitError,
    constants::{Day, Mas, DAYS_PER_JULIAN_YEAR},
    parameters::ParamName,
};

/// Tolerance on `sin²ψ + cos²ψ = 1` accepted at construction.
const UNIT_VECTOR_TOL: f64 = 1e-6;

/// One along-scan measurement.
///
/// # Fields
///
/// * `epoch` - Observation epoch (days)
/// * `sin_psi`, `cos_psi` - Components of the along-scan unit vector
/// * `along_scan` - Measured along-scan displacement (mas)
/// * `sigma` - Along-scan measurement uncertainty (mas, > 0)
/// * `parallax_factor` - Along-scan parallax factor (dimensionless)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    pub epoch: Day,
    pub sin_psi: f64,
    pub cos_psi: f64,
    pub along_scan: Mas,
    pub sigma: Mas,
    pub parallax_factor: f64,
}

impl Observation {
    /// Create a new validated observation.
    ///
    /// Errors
    /// ----------
    /// * [`AstroFitError::InvalidParameter`] if any field is non-finite, `sigma <= 0`, or the
    ///   scan direction is not a unit vector.
    pub fn new(
        epoch: Day,
        sin_psi: f64,
        cos_psi: f64,
        along_scan: Mas,
        sigma: Mas,
        parallax_factor: f64,
    ) -> Result<Self, AstroFitError> {
        let obs = Observation {
            epoch,
            sin_psi,
            cos_psi,
            along_scan,
            sigma,
            parallax_factor,
        };
        obs.validate()?;
        Ok(obs)
    }

    /// Build an observation from a scan angle `ψ` (radians).
    pub fn from_scan_angle(
        epoch: Day,
        psi: f64,
        along_scan: Mas,
        sigma: Mas,
        parallax_factor: f64,
    ) -> Result<Self, AstroFitError> {
        Self::new(
            epoch,
            psi.sin(),
            psi.cos(),
            along_scan,
            sigma,
            parallax_factor,
        )
    }

    fn validate(&self) -> Result<(), AstroFitError> {
        let fields = [
            self.epoch,
            self.sin_psi,
            self.cos_psi,
            self.along_scan,
            self.sigma,
            self.parallax_factor,
        ];
        if fields.iter().any(|v| !v.is_finite()) {
            return Err(AstroFitError::InvalidParameter(format!(
                "observation at epoch {} has non-finite fields",
                self.epoch
            )));
        }
        if self.sigma <= 0.0 {
            return Err(AstroFitError::InvalidParameter(format!(
                "observation at epoch {} has non-positive uncertainty {}",
                self.epoch, self.sigma
            )));
        }
        let norm = self.sin_psi.powi(2) + self.cos_psi.powi(2);
        if (norm - 1.0).abs() > UNIT_VECTOR_TOL {
            return Err(AstroFitError::InvalidParameter(format!(
                "scan direction at epoch {} is not a unit vector (|u|² = {norm})",
                self.epoch
            )));
        }
        Ok(())
    }
}

/// Validated, epoch-ordered set of along-scan observations.
#[derive(Debug, Clone, PartialEq)]
pub struct Observations {
    records: Vec<Observation>,
    reference_epoch: Day,
}

impl Observations {
    /// Build the observation set.
    ///
    /// Records are re-validated and sorted by epoch.
    ///
    /// Arguments
    /// -----------------
    /// * `records`: the measurements, in any order.
    /// * `reference_epoch`: epoch (days) at which positions and proper motions are referred.
    ///
    /// Errors
    /// ----------
    /// * [`AstroFitError::InvalidParameter`] if the set is empty, a record is invalid, or the
    ///   reference epoch is not finite.
    pub fn new(mut records: Vec<Observation>, reference_epoch: Day) -> Result<Self, AstroFitError> {
        if records.is_empty() {
            return Err(AstroFitError::InvalidParameter(
                "observation set is empty".into(),
            ));
        }
        if !reference_epoch.is_finite() {
            return Err(AstroFitError::InvalidParameter(format!(
                "reference epoch must be finite, got {reference_epoch}"
            )));
        }
        for obs in &records {
            obs.validate()?;
        }
        records.sort_by(|a, b| a.epoch.total_cmp(&b.epoch));
        Ok(Observations {
            records,
            reference_epoch,
        })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Observation> {
        self.records.iter()
    }

    pub fn records(&self) -> &[Observation] {
        &self.records
    }

    pub fn reference_epoch(&self) -> Day {
        self.reference_epoch
    }

    /// Time between the first and the last observation (days).
    pub fn time_span(&self) -> Day {
        match self.records.iter().map(|o| o.epoch).minmax() {
            MinMaxResult::MinMax(first, last) => last - first,
            MinMaxResult::OneElement(_) | MinMaxResult::NoElements => 0.0,
        }
    }

    pub fn epochs(&self) -> DVector<f64> {
        DVector::from_iterator(self.len(), self.records.iter().map(|o| o.epoch))
    }

    pub fn along_scan(&self) -> DVector<f64> {
        DVector::from_iterator(self.len(), self.records.iter().map(|o| o.along_scan))
    }

    /// Per-observation measurement variances `σ²` (mas²).
    pub fn variances(&self) -> DVector<f64> {
        DVector::from_iterator(self.len(), self.records.iter().map(|o| o.sigma * o.sigma))
    }

    /// Basis vector of a single-star regressor.
    ///
    /// Returns `None` for names that are not single-star regressors.
    pub fn single_star_basis(&self, name: ParamName) -> Option<DVector<f64>> {
        let t_ref = self.reference_epoch;
        let column = |f: &dyn Fn(&Observation) -> f64| {
            DVector::from_iterator(self.len(), self.records.iter().map(f))
        };
        match name {
            ParamName::Ra => Some(column(&|o: &Observation| o.sin_psi)),
            ParamName::Dec => Some(column(&|o: &Observation| o.cos_psi)),
            ParamName::Parallax => Some(column(&|o: &Observation| o.parallax_factor)),
            ParamName::MuRa => {
                Some(column(&|o: &Observation| (o.epoch - t_ref) / DAYS_PER_JULIAN_YEAR * o.sin_psi))
            }
            ParamName::MuDec => {
                Some(column(&|o: &Observation| (o.epoch - t_ref) / DAYS_PER_JULIAN_YEAR * o.cos_psi))
            }
            _ => None,
        }
    }
}

impl<'a> IntoIterator for &'a Observations {
    type Item = &'a Observation;
    type IntoIter = std::slice::Iter<'a, Observation>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}
