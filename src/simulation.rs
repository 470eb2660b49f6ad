//! # Synthetic along-scan data
//!
//! [`SyntheticStar`] generates reproducible along-scan time series of a star with optional
//! orbiting companions, for tests, benchmarks and injection-recovery studies.
//!
//! * Epochs are drawn uniformly over `[start_epoch, start_epoch + time_span]`.
//! * Scan angles `ψ` are uniform in `[0, 2π)`.
//! * The parallax factor is `sin(2π (t − t_ref)/365.25 + ψ)`, a crude but smooth stand-in for
//!   the true Earth-orbit projection.
//! * Gaussian noise of variance `σ² + jitter` is added to every measurement.
//!
//! ```rust
//! use astrofit::simulation::SyntheticStar;
//! use rand::{rngs::StdRng, SeedableRng};
//!
//! let star = SyntheticStar::builder().n_obs(80).sigma(0.2).build().unwrap();
//! let observations = star.simulate(&mut StdRng::seed_from_u64(7)).unwrap();
//! assert_eq!(observations.len(), 80);
//! ```

use rand::Rng;
use rand_distr::{Distribution, Normal};

use crate::{
    astrofit_errors::AstroFitError,
    constants::{Day, Mas, DAYS_PER_JULIAN_YEAR, DPI},
    kepler::KeplerSolver,
    keplerian_component::KeplerianComponent,
    observations::{Observation, Observations},
    orbit_type::campbell_element::CampbellElements,
};

/// Orbit injected into a [`SyntheticStar`].
///
/// The periastron epoch is given as a phase: `T0 = t_ref + periastron_phase · P`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulatedCompanion {
    pub period: Day,
    pub eccentricity: f64,
    pub periastron_phase: f64,
    pub campbell: CampbellElements,
}

impl SimulatedCompanion {
    pub fn new(
        period: Day,
        eccentricity: f64,
        periastron_phase: f64,
        campbell: CampbellElements,
    ) -> Result<Self, AstroFitError> {
        if !(period.is_finite() && period > 0.0) {
            return Err(AstroFitError::InvalidParameter(format!(
                "simulated period must be positive, got {period}"
            )));
        }
        if !(0.0..1.0).contains(&eccentricity) {
            return Err(AstroFitError::InvalidParameter(format!(
                "simulated eccentricity must lie in [0, 1), got {eccentricity}"
            )));
        }
        if !(0.0..1.0).contains(&periastron_phase) {
            return Err(AstroFitError::InvalidParameter(format!(
                "periastron phase must lie in [0, 1), got {periastron_phase}"
            )));
        }
        Ok(SimulatedCompanion {
            period,
            eccentricity,
            periastron_phase,
            campbell,
        })
    }

    pub fn periastron_epoch(&self, reference_epoch: Day) -> Day {
        reference_epoch + self.periastron_phase * self.period
    }

    /// The injected orbit as a Campbell-form [`KeplerianComponent`].
    pub fn to_component(
        &self,
        label: usize,
        reference_epoch: Day,
    ) -> Result<KeplerianComponent, AstroFitError> {
        KeplerianComponent::new(
            label,
            self.period,
            self.periastron_epoch(reference_epoch),
            self.eccentricity,
            self.campbell.into(),
        )
    }
}

/// Truth parameters and sampling of a simulated star.
#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticStar {
    pub n_obs: usize,
    pub start_epoch: Day,
    pub time_span: Day,
    pub reference_epoch: Day,
    pub sigma: Mas,
    /// Extra white-noise variance (mas²).
    pub jitter: f64,
    pub ra: Mas,
    pub dec: Mas,
    pub parallax: Mas,
    pub mura: f64,
    pub mudec: f64,
    pub companions: Vec<SimulatedCompanion>,
}

impl SyntheticStar {
    pub fn builder() -> SyntheticStarBuilder {
        SyntheticStarBuilder::default()
    }

    /// Noise-free along-scan displacement of the star at one scan.
    pub fn expected_along_scan(
        &self,
        epoch: Day,
        psi: f64,
        parallax_factor: f64,
        solver: &KeplerSolver,
    ) -> Result<Mas, AstroFitError> {
        let (sin_psi, cos_psi) = psi.sin_cos();
        let tau = (epoch - self.reference_epoch) / DAYS_PER_JULIAN_YEAR;
        let mut w = (self.ra + self.mura * tau) * sin_psi
            + (self.dec + self.mudec * tau) * cos_psi
            + self.parallax * parallax_factor;
        for (k, companion) in self.companions.iter().enumerate() {
            let (dra, ddec) = companion
                .to_component(k + 1, self.reference_epoch)?
                .sky_offsets(epoch, solver)?;
            w += dra * sin_psi + ddec * cos_psi;
        }
        Ok(w)
    }

    /// Draw one noisy realization of the time series.
    pub fn simulate<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Observations, AstroFitError> {
        let noise = Normal::new(0.0, (self.sigma * self.sigma + self.jitter).sqrt())?;
        let solver = KeplerSolver::default();
        let end_epoch = self.start_epoch + self.time_span;

        let records = (0..self.n_obs)
            .map(|_| {
                let epoch = rng.random_range(self.start_epoch..=end_epoch);
                let psi = rng.random_range(0.0..DPI);
                let parallax_factor =
                    (DPI * (epoch - self.reference_epoch) / DAYS_PER_JULIAN_YEAR + psi).sin();
                let w = self.expected_along_scan(epoch, psi, parallax_factor, &solver)?
                    + noise.sample(&mut *rng);
                Observation::from_scan_angle(epoch, psi, w, self.sigma, parallax_factor)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Observations::new(records, self.reference_epoch)
    }
}

#[derive(Debug, Clone)]
pub struct SyntheticStarBuilder {
    n_obs: usize,
    start_epoch: Day,
    time_span: Day,
    reference_epoch: Option<Day>,
    sigma: Mas,
    jitter: f64,
    astrometry: [f64; 5],
    companions: Vec<SimulatedCompanion>,
}

impl Default for SyntheticStarBuilder {
    fn default() -> Self {
        SyntheticStarBuilder {
            n_obs: 100,
            start_epoch: 56_863.0,
            time_span: 1800.0,
            reference_epoch: None,
            sigma: 0.1,
            jitter: 0.0,
            astrometry: [0.5, -0.3, 10.0, 5.0, -3.0],
            companions: Vec::new(),
        }
    }
}

impl SyntheticStarBuilder {
    pub fn n_obs(mut self, v: usize) -> Self {
        self.n_obs = v;
        self
    }

    pub fn start_epoch(mut self, v: Day) -> Self {
        self.start_epoch = v;
        self
    }

    pub fn time_span(mut self, v: Day) -> Self {
        self.time_span = v;
        self
    }

    /// Defaults to the middle of the observing window.
    pub fn reference_epoch(mut self, v: Day) -> Self {
        self.reference_epoch = Some(v);
        self
    }

    pub fn sigma(mut self, v: Mas) -> Self {
        self.sigma = v;
        self
    }

    pub fn jitter(mut self, v: f64) -> Self {
        self.jitter = v;
        self
    }

    /// Single-star parameters `(ra, dec, parallax, mura, mudec)` in mas and mas/yr.
    pub fn astrometry(mut self, ra: Mas, dec: Mas, parallax: Mas, mura: f64, mudec: f64) -> Self {
        self.astrometry = [ra, dec, parallax, mura, mudec];
        self
    }

    pub fn companion(mut self, companion: SimulatedCompanion) -> Self {
        self.companions.push(companion);
        self
    }

    pub fn build(self) -> Result<SyntheticStar, AstroFitError> {
        if self.n_obs == 0 {
            return Err(AstroFitError::InvalidParameter(
                "a simulated star needs at least one observation".into(),
            ));
        }
        if !(self.time_span.is_finite() && self.time_span > 0.0) {
            return Err(AstroFitError::InvalidParameter(format!(
                "time span must be positive, got {}",
                self.time_span
            )));
        }
        if !(self.sigma.is_finite() && self.sigma > 0.0) {
            return Err(AstroFitError::InvalidParameter(format!(
                "sigma must be positive, got {}",
                self.sigma
            )));
        }
        if !(self.jitter.is_finite() && self.jitter >= 0.0) {
            return Err(AstroFitError::InvalidParameter(format!(
                "jitter must be non-negative, got {}",
                self.jitter
            )));
        }
        if !self.start_epoch.is_finite() || self.astrometry.iter().any(|v| !v.is_finite()) {
            return Err(AstroFitError::InvalidParameter(
                "simulated epochs and astrometry must be finite".into(),
            ));
        }
        let [ra, dec, parallax, mura, mudec] = self.astrometry;
        Ok(SyntheticStar {
            n_obs: self.n_obs,
            start_epoch: self.start_epoch,
            time_span: self.time_span,
            reference_epoch: self
                .reference_epoch
                .unwrap_or(self.start_epoch + self.time_span / 2.0),
            sigma: self.sigma,
            jitter: self.jitter,
            ra,
            dec,
            parallax,
            mura,
            mudec,
            companions: self.companions,
        })
    }
}

#[cfg(test)]
mod simulation_test {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn test_simulation_is_reproducible() {
        let star = SyntheticStar::builder().n_obs(50).build().unwrap();
        let a = star.simulate(&mut StdRng::seed_from_u64(42)).unwrap();
        let b = star.simulate(&mut StdRng::seed_from_u64(42)).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 50);
        assert!(a.time_span() <= 1800.0);
        assert_abs_diff_eq!(a.reference_epoch(), 56_863.0 + 900.0);
    }

    #[test]
    fn test_noise_level() {
        let star = SyntheticStar::builder()
            .n_obs(4000)
            .sigma(0.5)
            .astrometry(0.0, 0.0, 0.0, 0.0, 0.0)
            .build()
            .unwrap();
        let obs = star.simulate(&mut StdRng::seed_from_u64(1)).unwrap();
        let rms = (obs.along_scan().norm_squared() / obs.len() as f64).sqrt();
        assert_abs_diff_eq!(rms, 0.5, epsilon = 0.03);
    }

    #[test]
    fn test_companion_signal_matches_component() {
        let campbell = CampbellElements::new(1.5, 0.4, 1.0, 2.0).unwrap();
        let companion = SimulatedCompanion::new(300.0, 0.2, 0.25, campbell).unwrap();
        let star = SyntheticStar::builder()
            .astrometry(0.0, 0.0, 0.0, 0.0, 0.0)
            .companion(companion)
            .build()
            .unwrap();
        let solver = KeplerSolver::default();
        let t = star.reference_epoch + 0.25 * 300.0;
        // at periastron X = 1 − e, Y = 0
        let w = star.expected_along_scan(t, 0.0, 0.0, &solver).unwrap();
        let ti = companion
            .to_component(1, star.reference_epoch)
            .unwrap()
            .thiele_innes();
        assert_abs_diff_eq!(w, ti.a * 0.8, epsilon = 1e-9);
    }

    #[test]
    fn test_builder_validation() {
        assert!(SyntheticStar::builder().n_obs(0).build().is_err());
        assert!(SyntheticStar::builder().sigma(0.0).build().is_err());
        assert!(SyntheticStar::builder().jitter(-1.0).build().is_err());
        let campbell = CampbellElements::new(1.0, 0.1, 0.1, 0.1).unwrap();
        assert!(SimulatedCompanion::new(-1.0, 0.1, 0.0, campbell).is_err());
        assert!(SimulatedCompanion::new(10.0, 1.0, 0.0, campbell).is_err());
        assert!(SimulatedCompanion::new(10.0, 0.1, 1.0, campbell).is_err());
    }
}
