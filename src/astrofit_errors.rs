use thiserror::Error;

use crate::{constants::Label, parameters::ParamName};

/// Coarse classification of [`AstroFitError`] values.
///
/// Callers typically abort on [`ErrorKind::InvalidParameter`] and
/// [`ErrorKind::Numerical`], and may decide to keep the best-so-far estimate
/// on [`ErrorKind::NonConvergence`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidParameter,
    Numerical,
    NonConvergence,
}

#[derive(Error, Debug)]
pub enum AstroFitError {
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Vector length mismatch: expected {expected}, found {found}")]
    LengthMismatch { expected: usize, found: usize },

    #[error("Regressor already present in the design: {0}")]
    DuplicateRegressor(ParamName),

    #[error("Unknown parameter: {0}")]
    UnknownParameter(String),

    #[error("Unknown Keplerian component: {0}")]
    UnknownComponent(Label),

    #[error("Invalid fit parameter: {0}")]
    InvalidFitParameter(String),

    #[error("Invalid detection parameter: {0}")]
    InvalidDetectionParameter(String),

    #[error("Gaussian noise generation failed: {0:?}")]
    NoiseInjectionError(rand_distr::NormalError),

    #[error("Singular normal matrix (rcond = {rcond:e}); regressors are degenerate")]
    SingularDesign { rcond: f64 },

    #[error("Underdetermined linear system: {n_obs} observations for {n_params} regressors")]
    Underdetermined { n_obs: usize, n_params: usize },

    #[error("Kepler equation did not converge (M = {mean_anomaly}, e = {eccentricity})")]
    KeplerNonConvergence {
        mean_anomaly: f64,
        eccentricity: f64,
    },

    #[error("ROOTS finding error: {0}")]
    RootFindingError(#[from] roots::SearchError),

    #[error("Degenerate orbit: {0}")]
    DegenerateOrbit(String),

    #[error("Numerical failure: {0}")]
    NumericalFailure(String),

    #[error("Fit did not converge after {iterations} iterations: {reason}")]
    NonConvergence { iterations: usize, reason: String },
}

impl AstroFitError {
    /// Classify the error into the three families callers react to.
    pub fn kind(&self) -> ErrorKind {
        use AstroFitError::*;
        match self {
            InvalidParameter(_)
            | LengthMismatch { .. }
            | DuplicateRegressor(_)
            | UnknownParameter(_)
            | UnknownComponent(_)
            | InvalidFitParameter(_)
            | InvalidDetectionParameter(_)
            | NoiseInjectionError(_) => ErrorKind::InvalidParameter,

            SingularDesign { .. }
            | Underdetermined { .. }
            | KeplerNonConvergence { .. }
            | RootFindingError(_)
            | DegenerateOrbit(_)
            | NumericalFailure(_) => ErrorKind::Numerical,

            NonConvergence { .. } => ErrorKind::NonConvergence,
        }
    }
}

impl From<rand_distr::NormalError> for AstroFitError {
    fn from(err: rand_distr::NormalError) -> Self {
        AstroFitError::NoiseInjectionError(err)
    }
}

impl PartialEq for AstroFitError {
    fn eq(&self, other: &Self) -> bool {
        use AstroFitError::*;
        match (self, other) {
            (InvalidParameter(a), InvalidParameter(b)) => a == b,
            (
                LengthMismatch {
                    expected: e1,
                    found: f1,
                },
                LengthMismatch {
                    expected: e2,
                    found: f2,
                },
            ) => e1 == e2 && f1 == f2,
            (DuplicateRegressor(a), DuplicateRegressor(b)) => a == b,
            (UnknownParameter(a), UnknownParameter(b)) => a == b,
            (UnknownComponent(a), UnknownComponent(b)) => a == b,
            (InvalidFitParameter(a), InvalidFitParameter(b)) => a == b,
            (InvalidDetectionParameter(a), InvalidDetectionParameter(b)) => a == b,
            (NoiseInjectionError(a), NoiseInjectionError(b)) => a == b,
            (RootFindingError(a), RootFindingError(b)) => a == b,
            (DegenerateOrbit(a), DegenerateOrbit(b)) => a == b,
            (NumericalFailure(a), NumericalFailure(b)) => a == b,

            // Floating payloads are diagnostic only: same variant is enough
            (SingularDesign { .. }, SingularDesign { .. }) => true,
            (KeplerNonConvergence { .. }, KeplerNonConvergence { .. }) => true,
            (
                Underdetermined {
                    n_obs: n1,
                    n_params: p1,
                },
                Underdetermined {
                    n_obs: n2,
                    n_params: p2,
                },
            ) => n1 == n2 && p1 == p2,
            (NonConvergence { iterations: a, .. }, NonConvergence { iterations: b, .. }) => a == b,

            _ => false,
        }
    }
}

#[cfg(test)]
mod astrofit_errors_test {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            AstroFitError::InvalidParameter("e >= 1".into()).kind(),
            ErrorKind::InvalidParameter
        );
        assert_eq!(
            AstroFitError::SingularDesign { rcond: 1e-17 }.kind(),
            ErrorKind::Numerical
        );
        assert_eq!(
            AstroFitError::NonConvergence {
                iterations: 50,
                reason: "budget".into()
            }
            .kind(),
            ErrorKind::NonConvergence
        );
    }

    #[test]
    fn test_error_equality_ignores_diagnostics() {
        assert_eq!(
            AstroFitError::SingularDesign { rcond: 1e-17 },
            AstroFitError::SingularDesign { rcond: 3e-14 }
        );
        assert_ne!(
            AstroFitError::UnknownComponent(1),
            AstroFitError::UnknownComponent(2)
        );
        assert_eq!(
            AstroFitError::DuplicateRegressor(ParamName::Parallax).to_string(),
            "Regressor already present in the design: parallax"
        );
    }
}
