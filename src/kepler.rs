//! # Kepler's equation
//!
//! Solves `E − e·sin(E) = M` for the eccentric anomaly `E` of an elliptic orbit and
//! evaluates the normalized elliptical rectangular coordinates
//!
//! ```text
//! X = cos(E) − e
//! Y = √(1 − e²)·sin(E)
//! ```
//!
//! used as basis functions by the Thiele-Innes regressors.
//!
//! The mean anomaly is first reduced to `[−π, π)`. Newton–Raphson then starts from
//! Danby's guess `M + 0.85·e·sign(sin M)`; if that fails the solve is retried from `±π`,
//! which converges for every `e ∈ [0, 1)`. The returned anomaly lives on the same branch
//! as the unreduced `M`.

use std::f64::consts::PI;

use roots::{find_root_newton_raphson, SimpleConvergency};

use crate::{
    astrofit_errors::AstroFitError,
    constants::{Day, Radian, DPI},
};

/// Return the principal value of an angle in `[0, 2π)`.
pub fn principal_angle(a: f64) -> f64 {
    a.rem_euclid(DPI)
}

/// Return the principal difference between two angles in `[-π, π)`.
pub fn angle_diff(a: f64, b: f64) -> f64 {
    let diff = principal_angle(a) - principal_angle(b);
    if diff >= PI {
        diff - DPI
    } else if diff < -PI {
        diff + DPI
    } else {
        diff
    }
}

/// Mean anomaly `2π (t − T0) / P` (unreduced).
pub fn mean_anomaly(t: Day, period: Day, periastron_epoch: Day) -> Radian {
    DPI * (t - periastron_epoch) / period
}

/// Newton–Raphson configuration for Kepler's equation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeplerSolver {
    /// Absolute tolerance on both the equation residual and the Newton step (radians).
    pub eps: f64,
    /// Maximum Newton iterations per starting guess.
    pub max_iter: usize,
}

impl Default for KeplerSolver {
    fn default() -> Self {
        KeplerSolver {
            eps: 1e-12,
            max_iter: 100,
        }
    }
}

impl KeplerSolver {
    pub fn new(eps: f64, max_iter: usize) -> Self {
        KeplerSolver { eps, max_iter }
    }

    /// Solve Kepler's equation for the eccentric anomaly.
    ///
    /// Arguments
    /// -----------------
    /// * `mean_anomaly`: mean anomaly `M` (radians, any branch).
    /// * `eccentricity`: `e ∈ [0, 1)`.
    ///
    /// Return
    /// ----------
    /// * The eccentric anomaly `E` with `E − e·sin E = M` on the branch of `M`.
    ///
    /// Errors
    /// ----------
    /// * [`AstroFitError::InvalidParameter`] if `e ∉ [0, 1)` or `M` is not finite.
    /// * [`AstroFitError::KeplerNonConvergence`] if neither starting guess converges.
    pub fn eccentric_anomaly(
        &self,
        mean_anomaly: Radian,
        eccentricity: f64,
    ) -> Result<Radian, AstroFitError> {
        if !(0.0..1.0).contains(&eccentricity) {
            return Err(AstroFitError::InvalidParameter(format!(
                "eccentricity must lie in [0, 1), got {eccentricity}"
            )));
        }
        if !mean_anomaly.is_finite() {
            return Err(AstroFitError::InvalidParameter(format!(
                "mean anomaly must be finite, got {mean_anomaly}"
            )));
        }

        let m_red = angle_diff(mean_anomaly, 0.0);
        let branch = mean_anomaly - m_red;

        if eccentricity == 0.0 {
            return Ok(mean_anomaly);
        }

        let f = |e_anom: f64| e_anom - eccentricity * e_anom.sin() - m_red;
        let df = |e_anom: f64| 1.0 - eccentricity * e_anom.cos();

        let sign = if m_red.sin() >= 0.0 { 1.0 } else { -1.0 };
        let starters = [m_red + 0.85 * eccentricity * sign, sign * PI];

        for x0 in starters {
            let mut tol = SimpleConvergency {
                eps: self.eps,
                max_iter: self.max_iter,
            };
            if let Ok(e_anom) = find_root_newton_raphson(x0, &f, &df, &mut tol) {
                if f(e_anom).abs() <= 10.0 * self.eps.max(f64::EPSILON) {
                    return Ok(e_anom + branch);
                }
            }
        }

        Err(AstroFitError::KeplerNonConvergence {
            mean_anomaly,
            eccentricity,
        })
    }

    /// Normalized elliptical rectangular coordinates `(X, Y)` at epoch `t`.
    pub fn rectangular_coordinates(
        &self,
        t: Day,
        period: Day,
        periastron_epoch: Day,
        eccentricity: f64,
    ) -> Result<(f64, f64), AstroFitError> {
        if !(period.is_finite() && period > 0.0) {
            return Err(AstroFitError::InvalidParameter(format!(
                "period must be positive, got {period}"
            )));
        }
        let e_anom =
            self.eccentric_anomaly(mean_anomaly(t, period, periastron_epoch), eccentricity)?;
        let x = e_anom.cos() - eccentricity;
        let y = (1.0 - eccentricity * eccentricity).sqrt() * e_anom.sin();
        Ok((x, y))
    }
}

#[cfg(test)]
mod kepler_test {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_principal_angle_and_diff() {
        assert_abs_diff_eq!(principal_angle(-0.5), DPI - 0.5, epsilon = 1e-15);
        assert_abs_diff_eq!(principal_angle(7.0), 7.0 - DPI, epsilon = 1e-15);
        assert_abs_diff_eq!(angle_diff(0.1, DPI - 0.1), 0.2, epsilon = 1e-12);
        assert_abs_diff_eq!(angle_diff(DPI - 0.1, 0.1), -0.2, epsilon = 1e-12);
    }

    #[test]
    fn test_kepler_residual_over_grid() {
        let solver = KeplerSolver::default();
        for i in 0..=99 {
            let e = 0.99 * i as f64 / 99.0;
            for j in 0..=200 {
                let m = -10.0 + 20.0 * j as f64 / 200.0;
                let e_anom = solver.eccentric_anomaly(m, e).unwrap();
                let residual = e_anom - e * e_anom.sin() - m;
                assert!(residual.abs() < 1e-9, "e={e}, M={m}, residual={residual}");
            }
        }
    }

    #[test]
    fn test_kepler_circular_identity() {
        let solver = KeplerSolver::default();
        assert_eq!(solver.eccentric_anomaly(1.234, 0.0).unwrap(), 1.234);
    }

    #[test]
    fn test_kepler_rejects_unbound_orbits() {
        let solver = KeplerSolver::default();
        assert!(matches!(
            solver.eccentric_anomaly(0.3, 1.0),
            Err(AstroFitError::InvalidParameter(_))
        ));
        assert!(matches!(
            solver.eccentric_anomaly(0.3, -0.1),
            Err(AstroFitError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_rectangular_coordinates_at_periastron() {
        let solver = KeplerSolver::default();
        let (x, y) = solver
            .rectangular_coordinates(100.0, 500.0, 100.0, 0.3)
            .unwrap();
        assert_abs_diff_eq!(x, 0.7, epsilon = 1e-12);
        assert_abs_diff_eq!(y, 0.0, epsilon = 1e-12);

        // Half a period later the body sits at apoastron: E = π.
        let (x, y) = solver
            .rectangular_coordinates(350.0, 500.0, 100.0, 0.3)
            .unwrap();
        assert_abs_diff_eq!(x, -1.3, epsilon = 1e-10);
        assert_abs_diff_eq!(y, 0.0, epsilon = 1e-9);
    }
}
