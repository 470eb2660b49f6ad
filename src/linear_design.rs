//! # Linear design and generalized least squares
//!
//! The linear part of the astrometric model is a set of named **regressors**, each a basis
//! vector evaluated at every observation epoch, multiplied by a scalar coefficient:
//!
//! ```text
//! w ≈ Σ_k β_k · x_k
//! ```
//!
//! [`LinearDesign`] keeps the regressors in insertion order and solves the free coefficients
//! by generalized least squares,
//!
//! ```text
//! β̂ = argmin (w − Xβ)ᵀ C⁻¹ (w − Xβ) = (XᵀC⁻¹X)⁻¹ XᵀC⁻¹ w
//! ```
//!
//! Fixed regressors keep their value and their contribution is subtracted from the data
//! before solving.
//!
//! ## Numerics
//!
//! The normal equations are never formed. The system is whitened with `C^{-1/2}` and solved
//! through a singular value decomposition of the whitened design; the coefficient covariance
//! is `V·diag(1/s²)·Vᵀ`. A reciprocal condition number `s_min/s_max` below the configured
//! threshold is reported as [`AstroFitError::SingularDesign`], and fewer observations than
//! free regressors as [`AstroFitError::Underdetermined`].

use nalgebra::{DMatrix, DVector};

use crate::{astrofit_errors::AstroFitError, covariance::Covariance, parameters::ParamName};

/// One named column of the design matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct Regressor {
    pub name: ParamName,
    pub basis: DVector<f64>,
    pub value: f64,
    /// 1σ uncertainty from the last solve, if the regressor was free.
    pub uncertainty: Option<f64>,
    pub free: bool,
}

impl Regressor {
    pub fn contribution(&self) -> DVector<f64> {
        &self.basis * self.value
    }
}

/// Result of a generalized least-squares solve.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearSolution {
    /// Names of the solved coefficients, in column order.
    pub names: Vec<ParamName>,
    pub coefficients: DVector<f64>,
    /// Coefficient covariance `(XᵀC⁻¹X)⁻¹`.
    pub covariance: DMatrix<f64>,
    /// `(w − Xβ̂)ᵀ C⁻¹ (w − Xβ̂)`
    pub chi_square: f64,
    /// `C^{-1/2} (w − Xβ̂)`
    pub whitened_residuals: DVector<f64>,
}

impl LinearSolution {
    fn position(&self, name: ParamName) -> Option<usize> {
        self.names.iter().position(|n| *n == name)
    }

    pub fn coefficient(&self, name: ParamName) -> Option<f64> {
        self.position(name).map(|k| self.coefficients[k])
    }

    pub fn uncertainty(&self, name: ParamName) -> Option<f64> {
        self.position(name)
            .map(|k| self.covariance[(k, k)].max(0.0).sqrt())
    }
}

/// Whitened SVD solve shared by [`weighted_least_squares`] and [`weighted_chi_square`].
///
/// Returns `(β̂, cov(β̂), C^{-1/2}(y − Xβ̂))`.
fn solve_whitened(
    design: &DMatrix<f64>,
    y: &DVector<f64>,
    covariance: &Covariance,
    rcond_min: f64,
) -> Result<(DVector<f64>, DMatrix<f64>, DVector<f64>), AstroFitError> {
    let (n_obs, n_params) = design.shape();
    for found in [y.len(), covariance.len()] {
        if found != n_obs {
            return Err(AstroFitError::LengthMismatch {
                expected: n_obs,
                found,
            });
        }
    }

    let yw = covariance.whiten_vector(y);
    if n_params == 0 {
        return Ok((DVector::zeros(0), DMatrix::zeros(0, 0), yw));
    }
    if n_obs < n_params {
        return Err(AstroFitError::Underdetermined { n_obs, n_params });
    }

    let xw = covariance.whiten_matrix(design);
    let svd = xw.clone().svd(true, true);
    let s = &svd.singular_values;

    let s_max = s.iter().cloned().fold(0.0, f64::max);
    let s_min = s.iter().cloned().fold(f64::INFINITY, f64::min);
    let rcond = if s_max > 0.0 { s_min / s_max } else { 0.0 };
    if !(rcond.is_finite() && rcond >= rcond_min) {
        return Err(AstroFitError::SingularDesign { rcond });
    }

    let (u, v_t) = match (svd.u.as_ref(), svd.v_t.as_ref()) {
        (Some(u), Some(v_t)) => (u, v_t),
        _ => {
            return Err(AstroFitError::NumericalFailure(
                "singular value decomposition did not return its factors".into(),
            ))
        }
    };

    let v = v_t.transpose();
    let coefficients = &v * (u.transpose() * &yw).component_div(s);

    let mut v_scaled = v;
    for (mut col, sj) in v_scaled.column_iter_mut().zip(s.iter()) {
        col /= *sj;
    }
    let coef_covariance = &v_scaled * v_scaled.transpose();

    let whitened_residuals = yw - xw * &coefficients;
    if whitened_residuals.iter().any(|r| !r.is_finite()) {
        return Err(AstroFitError::NumericalFailure(
            "non-finite residuals in linear solve".into(),
        ));
    }
    Ok((coefficients, coef_covariance, whitened_residuals))
}

/// Solve `min (y − Xβ)ᵀ C⁻¹ (y − Xβ)`.
///
/// Arguments
/// -----------------
/// * `design`: `N × p` design matrix `X`.
/// * `y`: data vector (length `N`).
/// * `covariance`: diagonal noise covariance.
/// * `rcond_min`: smallest accepted `s_min / s_max` of the whitened design.
/// * `names`: column names carried into the solution.
///
/// Return
/// ----------
/// * A [`LinearSolution`]; with `p = 0` only the chi-square of `y` is computed.
///
/// Errors
/// ----------
/// * [`AstroFitError::LengthMismatch`] on inconsistent dimensions.
/// * [`AstroFitError::Underdetermined`] if `N < p`.
/// * [`AstroFitError::SingularDesign`] if the whitened design is rank-deficient.
pub fn weighted_least_squares(
    design: &DMatrix<f64>,
    y: &DVector<f64>,
    covariance: &Covariance,
    rcond_min: f64,
    names: Vec<ParamName>,
) -> Result<LinearSolution, AstroFitError> {
    if names.len() != design.ncols() {
        return Err(AstroFitError::LengthMismatch {
            expected: design.ncols(),
            found: names.len(),
        });
    }
    let (coefficients, covariance, whitened_residuals) =
        solve_whitened(design, y, covariance, rcond_min)?;
    Ok(LinearSolution {
        names,
        coefficients,
        covariance,
        chi_square: whitened_residuals.norm_squared(),
        whitened_residuals,
    })
}

/// Minimum chi-square of `y` against the columns of `design`, without naming them.
pub fn weighted_chi_square(
    design: &DMatrix<f64>,
    y: &DVector<f64>,
    covariance: &Covariance,
    rcond_min: f64,
) -> Result<f64, AstroFitError> {
    solve_whitened(design, y, covariance, rcond_min).map(|(_, _, r)| r.norm_squared())
}

/// Ordered set of named regressors sharing one observation set.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearDesign {
    n_obs: usize,
    regressors: Vec<Regressor>,
}

impl LinearDesign {
    pub fn new(n_obs: usize) -> Self {
        LinearDesign {
            n_obs,
            regressors: Vec::new(),
        }
    }

    pub fn n_obs(&self) -> usize {
        self.n_obs
    }

    pub fn len(&self) -> usize {
        self.regressors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regressors.is_empty()
    }

    pub fn contains(&self, name: ParamName) -> bool {
        self.regressors.iter().any(|r| r.name == name)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Regressor> {
        self.regressors.iter()
    }

    fn check_basis(&self, basis: &DVector<f64>) -> Result<(), AstroFitError> {
        if basis.len() != self.n_obs {
            return Err(AstroFitError::LengthMismatch {
                expected: self.n_obs,
                found: basis.len(),
            });
        }
        if basis.iter().any(|v| !v.is_finite()) {
            return Err(AstroFitError::InvalidParameter(
                "basis vector contains non-finite values".into(),
            ));
        }
        Ok(())
    }

    /// Append a free regressor with coefficient 0.
    ///
    /// Errors
    /// ----------
    /// * [`AstroFitError::DuplicateRegressor`] if `name` is already present.
    /// * [`AstroFitError::LengthMismatch`] if the basis length differs from the observation count.
    pub fn add_regressor(
        &mut self,
        name: ParamName,
        basis: DVector<f64>,
    ) -> Result<(), AstroFitError> {
        if self.contains(name) {
            return Err(AstroFitError::DuplicateRegressor(name));
        }
        self.check_basis(&basis)?;
        self.regressors.push(Regressor {
            name,
            basis,
            value: 0.0,
            uncertainty: None,
            free: true,
        });
        Ok(())
    }

    pub fn remove_regressor(&mut self, name: ParamName) -> Result<Regressor, AstroFitError> {
        let k = self.index(name)?;
        Ok(self.regressors.remove(k))
    }

    fn index(&self, name: ParamName) -> Result<usize, AstroFitError> {
        self.regressors
            .iter()
            .position(|r| r.name == name)
            .ok_or_else(|| AstroFitError::UnknownParameter(name.to_string()))
    }

    pub fn get(&self, name: ParamName) -> Option<&Regressor> {
        self.regressors.iter().find(|r| r.name == name)
    }

    fn get_mut(&mut self, name: ParamName) -> Result<&mut Regressor, AstroFitError> {
        let k = self.index(name)?;
        Ok(&mut self.regressors[k])
    }

    /// Replace the basis vector of an existing regressor, keeping its value.
    pub fn set_basis(&mut self, name: ParamName, basis: DVector<f64>) -> Result<(), AstroFitError> {
        self.check_basis(&basis)?;
        self.get_mut(name)?.basis = basis;
        Ok(())
    }

    pub fn value(&self, name: ParamName) -> Result<f64, AstroFitError> {
        self.get(name)
            .map(|r| r.value)
            .ok_or_else(|| AstroFitError::UnknownParameter(name.to_string()))
    }

    pub fn set_value(&mut self, name: ParamName, value: f64) -> Result<(), AstroFitError> {
        if !value.is_finite() {
            return Err(AstroFitError::InvalidParameter(format!(
                "{name} must be finite, got {value}"
            )));
        }
        self.get_mut(name)?.value = value;
        Ok(())
    }

    pub fn set_free(&mut self, name: ParamName, free: bool) -> Result<(), AstroFitError> {
        self.get_mut(name)?.free = free;
        Ok(())
    }

    pub fn names(&self) -> Vec<ParamName> {
        self.regressors.iter().map(|r| r.name).collect()
    }

    pub fn free_names(&self) -> Vec<ParamName> {
        self.regressors
            .iter()
            .filter(|r| r.free)
            .map(|r| r.name)
            .collect()
    }

    pub fn n_free(&self) -> usize {
        self.regressors.iter().filter(|r| r.free).count()
    }

    /// `N × p` matrix whose columns are the free basis vectors.
    pub fn design_matrix(&self) -> DMatrix<f64> {
        let columns: Vec<&DVector<f64>> = self
            .regressors
            .iter()
            .filter(|r| r.free)
            .map(|r| &r.basis)
            .collect();
        let mut x = DMatrix::zeros(self.n_obs, columns.len());
        for (k, col) in columns.into_iter().enumerate() {
            x.set_column(k, col);
        }
        x
    }

    /// Sum of `value × basis` over the fixed regressors.
    pub fn fixed_contribution(&self) -> DVector<f64> {
        self.regressors
            .iter()
            .filter(|r| !r.free)
            .fold(DVector::zeros(self.n_obs), |acc, r| acc + r.contribution())
    }

    /// Sum of `value × basis` over every regressor.
    pub fn prediction(&self) -> DVector<f64> {
        self.regressors
            .iter()
            .fold(DVector::zeros(self.n_obs), |acc, r| acc + r.contribution())
    }

    /// Solve the free coefficients against `y` (fixed contributions are subtracted first).
    pub fn solve(
        &self,
        y: &DVector<f64>,
        covariance: &Covariance,
        rcond_min: f64,
    ) -> Result<LinearSolution, AstroFitError> {
        if y.len() != self.n_obs {
            return Err(AstroFitError::LengthMismatch {
                expected: self.n_obs,
                found: y.len(),
            });
        }
        let target = y - self.fixed_contribution();
        weighted_least_squares(
            &self.design_matrix(),
            &target,
            covariance,
            rcond_min,
            self.free_names(),
        )
    }

    /// Write the solved coefficients and their uncertainties back into the design.
    pub fn apply(&mut self, solution: &LinearSolution) -> Result<(), AstroFitError> {
        for (k, name) in solution.names.iter().enumerate() {
            let sigma = solution.covariance[(k, k)].max(0.0).sqrt();
            let regressor = self.get_mut(*name)?;
            regressor.value = solution.coefficients[k];
            regressor.uncertainty = Some(sigma);
        }
        Ok(())
    }
}

#[cfg(test)]
mod linear_design_test {
    use super::*;
    use approx::assert_relative_eq;

    fn unit_covariance(n: usize) -> Covariance {
        Covariance::build(&DVector::from_element(n, 1.0), 0.0)
            .unwrap()
            .0
    }

    fn polynomial_design(n: usize) -> LinearDesign {
        let t = DVector::from_fn(n, |i, _| i as f64 / n as f64);
        let mut design = LinearDesign::new(n);
        design
            .add_regressor(ParamName::Ra, DVector::from_element(n, 1.0))
            .unwrap();
        design.add_regressor(ParamName::Dec, t.clone()).unwrap();
        design
            .add_regressor(ParamName::Parallax, t.map(|x| (7.0 * x).sin()))
            .unwrap();
        design
    }

    #[test]
    fn test_identity_covariance_matches_ordinary_least_squares() {
        let n = 40;
        let design = polynomial_design(n);
        let y = DVector::from_fn(n, |i, _| ((i * 37 % 11) as f64 - 5.0) * 0.3 + i as f64 * 0.1);

        let solution = design.solve(&y, &unit_covariance(n), 1e-12).unwrap();

        let x = design.design_matrix();
        let xtx = x.transpose() * &x;
        let ols = xtx.clone().try_inverse().unwrap() * x.transpose() * &y;
        for k in 0..3 {
            assert_relative_eq!(
                solution.coefficients[k],
                ols[k],
                epsilon = 1e-10,
                max_relative = 1e-9
            );
        }
        let cov_ols = xtx.try_inverse().unwrap();
        assert_relative_eq!(
            solution.covariance,
            cov_ols,
            epsilon = 1e-10,
            max_relative = 1e-8
        );
        assert_relative_eq!(
            solution.chi_square,
            (y - x * ols).norm_squared(),
            max_relative = 1e-9
        );
    }

    #[test]
    fn test_weights_follow_covariance() {
        // Two measurements of one constant: the GLS estimate is the inverse-variance mean.
        let mut design = LinearDesign::new(2);
        design
            .add_regressor(ParamName::Ra, DVector::from_element(2, 1.0))
            .unwrap();
        let (cov, _) = Covariance::build(&DVector::from_vec(vec![1.0, 4.0]), 0.0).unwrap();
        let y = DVector::from_vec(vec![1.0, 6.0]);
        let solution = design.solve(&y, &cov, 1e-12).unwrap();
        assert_relative_eq!(solution.coefficients[0], 2.0, epsilon = 1e-12);
        assert_relative_eq!(
            solution.uncertainty(ParamName::Ra).unwrap(),
            0.8_f64.sqrt(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_duplicate_and_mismatched_regressors() {
        let mut design = polynomial_design(10);
        assert_eq!(
            design.add_regressor(ParamName::Ra, DVector::zeros(10)),
            Err(AstroFitError::DuplicateRegressor(ParamName::Ra))
        );
        assert_eq!(
            design.add_regressor(ParamName::MuRa, DVector::zeros(9)),
            Err(AstroFitError::LengthMismatch {
                expected: 10,
                found: 9
            })
        );
    }

    #[test]
    fn test_singular_and_underdetermined() {
        let n = 10;
        let mut design = polynomial_design(n);
        design
            .add_regressor(ParamName::MuRa, DVector::from_element(n, 2.0))
            .unwrap();
        let y = DVector::from_element(n, 1.0);
        assert!(matches!(
            design.solve(&y, &unit_covariance(n), 1e-12),
            Err(AstroFitError::SingularDesign { .. })
        ));

        let small = polynomial_design(2);
        assert_eq!(
            small.solve(&DVector::zeros(2), &unit_covariance(2), 1e-12),
            Err(AstroFitError::Underdetermined {
                n_obs: 2,
                n_params: 3
            })
        );
    }

    #[test]
    fn test_fixed_regressor_is_subtracted() {
        let n = 30;
        let mut design = polynomial_design(n);
        design.set_value(ParamName::Parallax, 2.5).unwrap();
        design.set_free(ParamName::Parallax, false).unwrap();

        let y = design.get(ParamName::Ra).unwrap().basis.clone() * 1.5
            + design.get(ParamName::Parallax).unwrap().basis.clone() * 2.5;
        let solution = design.solve(&y, &unit_covariance(n), 1e-12).unwrap();
        design.apply(&solution).unwrap();

        assert_eq!(solution.names, vec![ParamName::Ra, ParamName::Dec]);
        assert_relative_eq!(design.value(ParamName::Ra).unwrap(), 1.5, epsilon = 1e-10);
        assert_relative_eq!(design.value(ParamName::Dec).unwrap(), 0.0, epsilon = 1e-10);
        assert_relative_eq!(design.prediction(), y, epsilon = 1e-10);
    }
}
