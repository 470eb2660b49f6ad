//! # Fit configuration
//!
//! [`FitParams`] gathers every tolerance and budget used by
//! [`AstrometricModel::fit`](crate::astrometric_model::AstrometricModel::fit),
//! [`AstrometricModel::seed_orbit_grid`](crate::astrometric_model::AstrometricModel::seed_orbit_grid)
//! and the embedded linear and Kepler solves. Build it with [`FitParams::builder`]; the
//! builder validates the values.
//!
//! ```rust
//! use astrofit::astrometric_model::fit_params::FitParams;
//!
//! let params = FitParams::builder()
//!     .max_outer_iter(100)
//!     .objective_tol(1e-10)
//!     .build()
//!     .unwrap();
//! println!("{params:#}");
//! ```

use std::fmt;

use crate::{astrofit_errors::AstroFitError, constants::MAX_ECCENTRICITY, kepler::KeplerSolver};

/// Configuration of the nonlinear fit.
///
/// Fields
/// -----------------
/// **Outer loop**
/// * `max_outer_iter` – budget of (Levenberg–Marquardt, jitter) alternations.
/// * `objective_tol` – relative change of `−2 ln L` below which the fit has converged.
/// * `monotonic_tol` – relative increase of `−2 ln L` tolerated before reporting non-convergence.
///
/// **Levenberg–Marquardt**
/// * `lm_patience` – evaluation budget factor passed to the optimizer.
/// * `lm_ftol`, `lm_xtol` – relative objective and step tolerances.
/// * `fd_step` – relative step of the central finite-difference Jacobian.
///
/// **Inner solves**
/// * `kepler_eps`, `kepler_max_iter` – Newton–Raphson controls for Kepler's equation.
/// * `jitter_eps`, `jitter_max_iter` – Brent controls for the jitter update.
/// * `rcond_min` – smallest accepted reciprocal condition number of the linear design.
///
/// **Orbit seeding**
/// * `seed_eccentricities`, `seed_phases` – grid size of [`seed_orbit_grid`](crate::astrometric_model::AstrometricModel::seed_orbit_grid).
/// * `seed_max_eccentricity` – largest eccentricity of the seeding grid.
#[derive(Debug, Clone, PartialEq)]
pub struct FitParams {
    pub max_outer_iter: usize,
    pub objective_tol: f64,
    pub monotonic_tol: f64,

    pub lm_patience: usize,
    pub lm_ftol: f64,
    pub lm_xtol: f64,
    pub fd_step: f64,

    pub kepler_eps: f64,
    pub kepler_max_iter: usize,
    pub jitter_eps: f64,
    pub jitter_max_iter: usize,
    pub rcond_min: f64,

    pub seed_eccentricities: usize,
    pub seed_phases: usize,
    pub seed_max_eccentricity: f64,
}

impl FitParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> FitParamsBuilder {
        FitParamsBuilder::new()
    }

    /// Kepler solver configured from `kepler_eps` and `kepler_max_iter`.
    pub fn kepler_solver(&self) -> KeplerSolver {
        KeplerSolver::new(self.kepler_eps, self.kepler_max_iter)
    }

    /// Eccentricities probed by the seeding grid, evenly spaced in `[0.05, seed_max_eccentricity]`.
    pub fn seed_eccentricity_grid(&self) -> Vec<f64> {
        let lo = 0.05_f64.min(self.seed_max_eccentricity);
        let n = self.seed_eccentricities;
        match n {
            0 => Vec::new(),
            1 => vec![lo],
            _ => (0..n)
                .map(|k| lo + (self.seed_max_eccentricity - lo) * k as f64 / (n - 1) as f64)
                .collect(),
        }
    }
}

impl Default for FitParams {
    fn default() -> Self {
        FitParams {
            max_outer_iter: 50,
            objective_tol: 1e-9,
            monotonic_tol: 1e-6,

            lm_patience: 200,
            lm_ftol: 1e-12,
            lm_xtol: 1e-12,
            fd_step: 1e-7,

            kepler_eps: 1e-12,
            kepler_max_iter: 100,
            jitter_eps: 1e-12,
            jitter_max_iter: 200,
            rcond_min: 1e-12,

            seed_eccentricities: 10,
            seed_phases: 16,
            seed_max_eccentricity: 0.9,
        }
    }
}

/// Builder for [`FitParams`], with validation.
#[derive(Debug, Clone)]
pub struct FitParamsBuilder {
    params: FitParams,
}

impl Default for FitParamsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl FitParamsBuilder {
    pub fn new() -> Self {
        Self {
            params: FitParams::default(),
        }
    }

    pub fn max_outer_iter(mut self, v: usize) -> Self {
        self.params.max_outer_iter = v;
        self
    }
    pub fn objective_tol(mut self, v: f64) -> Self {
        self.params.objective_tol = v;
        self
    }
    pub fn monotonic_tol(mut self, v: f64) -> Self {
        self.params.monotonic_tol = v;
        self
    }

    pub fn lm_patience(mut self, v: usize) -> Self {
        self.params.lm_patience = v;
        self
    }
    pub fn lm_ftol(mut self, v: f64) -> Self {
        self.params.lm_ftol = v;
        self
    }
    pub fn lm_xtol(mut self, v: f64) -> Self {
        self.params.lm_xtol = v;
        self
    }
    pub fn fd_step(mut self, v: f64) -> Self {
        self.params.fd_step = v;
        self
    }

    pub fn kepler_eps(mut self, v: f64) -> Self {
        self.params.kepler_eps = v;
        self
    }
    pub fn kepler_max_iter(mut self, v: usize) -> Self {
        self.params.kepler_max_iter = v;
        self
    }
    pub fn jitter_eps(mut self, v: f64) -> Self {
        self.params.jitter_eps = v;
        self
    }
    pub fn jitter_max_iter(mut self, v: usize) -> Self {
        self.params.jitter_max_iter = v;
        self
    }
    pub fn rcond_min(mut self, v: f64) -> Self {
        self.params.rcond_min = v;
        self
    }

    pub fn seed_eccentricities(mut self, v: usize) -> Self {
        self.params.seed_eccentricities = v;
        self
    }
    pub fn seed_phases(mut self, v: usize) -> Self {
        self.params.seed_phases = v;
        self
    }
    pub fn seed_max_eccentricity(mut self, v: f64) -> Self {
        self.params.seed_max_eccentricity = v;
        self
    }

    #[inline]
    fn gt0(x: f64) -> bool {
        x.is_finite() && x > 0.0
    }

    #[inline]
    fn ge0(x: f64) -> bool {
        x.is_finite() && x >= 0.0
    }

    /// Validate and return the parameters.
    ///
    /// Errors
    /// ----------
    /// * [`AstroFitError::InvalidFitParameter`] naming the first offending field.
    pub fn build(self) -> Result<FitParams, AstroFitError> {
        let p = &self.params;
        let fail = |msg: &str| Err(AstroFitError::InvalidFitParameter(msg.into()));

        if p.max_outer_iter == 0 {
            return fail("max_outer_iter must be >= 1");
        }
        if !Self::gt0(p.objective_tol) {
            return fail("objective_tol must be > 0");
        }
        if !Self::ge0(p.monotonic_tol) {
            return fail("monotonic_tol must be >= 0");
        }

        if p.lm_patience == 0 {
            return fail("lm_patience must be >= 1");
        }
        if !Self::gt0(p.lm_ftol) || !Self::gt0(p.lm_xtol) {
            return fail("lm_ftol and lm_xtol must be > 0");
        }
        if !(Self::gt0(p.fd_step) && p.fd_step < 1.0) {
            return fail("fd_step must lie in (0, 1)");
        }

        if !Self::gt0(p.kepler_eps) || !Self::gt0(p.jitter_eps) || !Self::gt0(p.rcond_min) {
            return fail("kepler_eps, jitter_eps and rcond_min must be > 0");
        }
        if p.kepler_max_iter == 0 || p.jitter_max_iter == 0 {
            return fail("kepler_max_iter and jitter_max_iter must be >= 1");
        }

        if !(Self::gt0(p.seed_max_eccentricity) && p.seed_max_eccentricity <= MAX_ECCENTRICITY) {
            return fail("seed_max_eccentricity must lie in (0, 0.99]");
        }

        Ok(self.params)
    }
}

impl fmt::Display for FitParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if f.alternate() {
            const PARAM_COL: usize = 40;
            writeln!(f, "Astrometric Fit Parameters")?;
            writeln!(f, "--------------------------")?;

            macro_rules! line {
                ($fmt:expr, $val:expr, $comment:expr) => {{
                    let s = format!($fmt, $val);
                    let pad = if s.len() < PARAM_COL {
                        " ".repeat(PARAM_COL - s.len())
                    } else {
                        " ".to_string()
                    };
                    writeln!(f, "  {}{}# {}", s, pad, $comment)
                }};
            }

            writeln!(f, "[Outer loop]")?;
            line!("max_outer_iter   = {}", self.max_outer_iter, "LM / jitter alternations")?;
            line!("objective_tol    = {:.1e}", self.objective_tol, "Relative change of -2 lnL")?;
            line!("monotonic_tol    = {:.1e}", self.monotonic_tol, "Tolerated -2 lnL increase")?;

            writeln!(f, "\n[Levenberg-Marquardt]")?;
            line!("lm_patience      = {}", self.lm_patience, "Evaluation budget factor")?;
            line!("lm_ftol          = {:.1e}", self.lm_ftol, "Relative objective tolerance")?;
            line!("lm_xtol          = {:.1e}", self.lm_xtol, "Relative step tolerance")?;
            line!("fd_step          = {:.1e}", self.fd_step, "Finite-difference step")?;

            writeln!(f, "\n[Inner solves]")?;
            line!("kepler_eps       = {:.1e}", self.kepler_eps, "Kepler equation tolerance")?;
            line!("kepler_max_iter  = {}", self.kepler_max_iter, "Newton iterations")?;
            line!("jitter_eps       = {:.1e}", self.jitter_eps, "Brent tolerance")?;
            line!("jitter_max_iter  = {}", self.jitter_max_iter, "Brent iterations")?;
            line!("rcond_min        = {:.1e}", self.rcond_min, "Singular design threshold")?;

            writeln!(f, "\n[Orbit seeding]")?;
            line!("seed_eccentricities = {}", self.seed_eccentricities, "Eccentricity samples")?;
            line!("seed_phases      = {}", self.seed_phases, "Periastron phase samples")?;
            line!(
                "seed_max_eccentricity = {:.2}",
                self.seed_max_eccentricity,
                "Largest seeded eccentricity"
            )?;
            Ok(())
        } else {
            write!(
                f,
                "FitParams(max_outer_iter={}, objective_tol={:.1e}, lm_patience={}, fd_step={:.1e}, rcond_min={:.1e}, seed={}x{})",
                self.max_outer_iter,
                self.objective_tol,
                self.lm_patience,
                self.fd_step,
                self.rcond_min,
                self.seed_eccentricities,
                self.seed_phases,
            )
        }
    }
}
