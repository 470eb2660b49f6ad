//! # Noise model
//!
//! The along-scan noise is modelled as independent Gaussian errors with variance
//!
//! ```text
//! v_i = σ_i² + s²
//! ```
//!
//! where `σ_i` is the quoted measurement uncertainty and `s²` a global *jitter*
//! variance absorbing unmodelled noise. The resulting diagonal [`Covariance`] is used to
//! whiten the least-squares problem and to evaluate the Gaussian log-likelihood
//!
//! ```text
//! −2 ln L = Σ r_i² / v_i + Σ ln v_i + N ln 2π
//! ```
//!
//! [`CovarianceModel`] owns the fixed variances and the jitter, and provides the
//! maximum-likelihood jitter update used by the nonlinear fit.

use nalgebra::{DMatrix, DVector};
use roots::{find_root_brent, SimpleConvergency};

use crate::astrofit_errors::AstroFitError;

/// Diagonal covariance matrix of the along-scan residuals.
#[derive(Debug, Clone, PartialEq)]
pub struct Covariance {
    diagonal: DVector<f64>,
    inv_sqrt: DVector<f64>,
    log_det: f64,
}

impl Covariance {
    /// Build the covariance from measurement variances and a jitter variance.
    ///
    /// Arguments
    /// -----------------
    /// * `variances`: per-observation measurement variances `σ_i²` (all > 0).
    /// * `jitter`: additional variance `s² ≥ 0` added to every observation.
    ///
    /// Return
    /// ----------
    /// * The covariance and its log-determinant `Σ ln(σ_i² + s²)`.
    ///
    /// Errors
    /// ----------
    /// * [`AstroFitError::InvalidParameter`] for negative / non-finite jitter or
    ///   non-positive variances.
    pub fn build(variances: &DVector<f64>, jitter: f64) -> Result<(Self, f64), AstroFitError> {
        if !(jitter.is_finite() && jitter >= 0.0) {
            return Err(AstroFitError::InvalidParameter(format!(
                "jitter variance must be finite and non-negative, got {jitter}"
            )));
        }
        if let Some(bad) = variances.iter().find(|v| !(v.is_finite() && **v > 0.0)) {
            return Err(AstroFitError::InvalidParameter(format!(
                "measurement variances must be positive, got {bad}"
            )));
        }

        let diagonal = variances.add_scalar(jitter);
        let inv_sqrt = diagonal.map(|v| 1.0 / v.sqrt());
        let log_det = diagonal.iter().map(|v| v.ln()).sum::<f64>();
        Ok((
            Covariance {
                diagonal,
                inv_sqrt,
                log_det,
            },
            log_det,
        ))
    }

    pub fn len(&self) -> usize {
        self.diagonal.len()
    }

    pub fn is_empty(&self) -> bool {
        self.diagonal.is_empty()
    }

    pub fn diagonal(&self) -> &DVector<f64> {
        &self.diagonal
    }

    pub fn log_det(&self) -> f64 {
        self.log_det
    }

    /// Dense covariance matrix `C`.
    pub fn to_matrix(&self) -> DMatrix<f64> {
        DMatrix::from_diagonal(&self.diagonal)
    }

    /// Dense inverse `C⁻¹`.
    pub fn inverse_matrix(&self) -> DMatrix<f64> {
        DMatrix::from_diagonal(&self.inv_sqrt.map(|w| w * w))
    }

    /// Apply `C^{-1/2}` to a vector.
    pub fn whiten_vector(&self, v: &DVector<f64>) -> DVector<f64> {
        v.component_mul(&self.inv_sqrt)
    }

    /// Apply `C^{-1/2}` to every column of a matrix.
    pub fn whiten_matrix(&self, m: &DMatrix<f64>) -> DMatrix<f64> {
        let mut out = m.clone();
        for (mut row, w) in out.row_iter_mut().zip(self.inv_sqrt.iter()) {
            row *= *w;
        }
        out
    }

    /// Weighted chi-square `rᵀ C⁻¹ r`.
    pub fn chi_square(&self, residuals: &DVector<f64>) -> f64 {
        self.whiten_vector(residuals).norm_squared()
    }

    /// `−2 ln L` of the residuals under this covariance.
    pub fn neg2_log_likelihood(&self, residuals: &DVector<f64>) -> f64 {
        self.chi_square(residuals)
            + self.log_det
            + self.len() as f64 * (2.0 * std::f64::consts::PI).ln()
    }
}

/// Fixed measurement variances plus a fittable jitter variance.
#[derive(Debug, Clone, PartialEq)]
pub struct CovarianceModel {
    variances: DVector<f64>,
    jitter: f64,
    jitter_free: bool,
}

impl CovarianceModel {
    /// New noise model with zero jitter, marked free.
    pub fn new(variances: DVector<f64>) -> Result<Self, AstroFitError> {
        Covariance::build(&variances, 0.0)?;
        Ok(CovarianceModel {
            variances,
            jitter: 0.0,
            jitter_free: true,
        })
    }

    pub fn variances(&self) -> &DVector<f64> {
        &self.variances
    }

    /// Current jitter variance `s²` (mas²).
    pub fn jitter(&self) -> f64 {
        self.jitter
    }

    pub fn set_jitter(&mut self, jitter: f64) -> Result<(), AstroFitError> {
        if !(jitter.is_finite() && jitter >= 0.0) {
            return Err(AstroFitError::InvalidParameter(format!(
                "jitter variance must be finite and non-negative, got {jitter}"
            )));
        }
        self.jitter = jitter;
        Ok(())
    }

    pub fn is_jitter_free(&self) -> bool {
        self.jitter_free
    }

    pub fn set_jitter_free(&mut self, free: bool) {
        self.jitter_free = free;
    }

    pub fn build(&self) -> Result<Covariance, AstroFitError> {
        Covariance::build(&self.variances, self.jitter).map(|(cov, _)| cov)
    }

    /// Maximum-likelihood jitter variance for fixed residuals.
    ///
    /// The stationarity condition of `−2 ln L` with respect to `s²` reads
    ///
    /// ```text
    /// g(s²) = Σ r_i² / v_i² − Σ 1 / v_i = 0,     v_i = σ_i² + s²
    /// ```
    ///
    /// If `g(0) ≤ 0` the optimum sits on the boundary `s² = 0`. Otherwise `g` changes sign
    /// on `[0, max r_i²]` (at the upper end every term `r_i²/v_i² ≤ 1/v_i`) and the root is
    /// bracketed with Brent's method.
    ///
    /// Errors
    /// ----------
    /// * [`AstroFitError::LengthMismatch`] if `residuals` has the wrong length.
    /// * [`AstroFitError::RootFindingError`] if Brent's method fails.
    pub fn max_likelihood_jitter(
        &self,
        residuals: &DVector<f64>,
        eps: f64,
        max_iter: usize,
    ) -> Result<f64, AstroFitError> {
        if residuals.len() != self.variances.len() {
            return Err(AstroFitError::LengthMismatch {
                expected: self.variances.len(),
                found: residuals.len(),
            });
        }

        let g = |s2: f64| -> f64 {
            self.variances
                .iter()
                .zip(residuals.iter())
                .map(|(var, r)| {
                    let v = var + s2;
                    r * r / (v * v) - 1.0 / v
                })
                .sum()
        };

        if g(0.0) <= 0.0 {
            return Ok(0.0);
        }

        let upper = residuals.iter().map(|r| r * r).fold(0.0, f64::max);
        if g(upper) >= 0.0 {
            return Ok(upper);
        }

        let mut tol = SimpleConvergency { eps, max_iter };
        let root = find_root_brent(0.0, upper, &g, &mut tol)?;
        Ok(root.max(0.0))
    }
}
