//! # Orbit orientation representations
//!
//! An astrometric orbit's size and orientation can be carried in two equivalent forms:
//!
//! - [`thiele_innes`](crate::orbit_type::thiele_innes) — the linear constants `(A, B, F, G)`,
//!   solved in closed form by the linear design once `(P, T0, e)` are fixed.
//! - [`campbell_element`](crate::orbit_type::campbell_element) — the geometric elements
//!   `(a0, i, Ω, ω)`, fitted as nonlinear parameters.
//!
//! [`OrbitOrientation`] is the tagged variant holding exactly one of the two forms. Switching
//! between them goes through the closed-form conversions, which are the only transitions.
//!
//! ```rust
//! use astrofit::orbit_type::{OrbitOrientation, thiele_innes::ThieleInnes};
//!
//! let orientation = OrbitOrientation::ThieleInnes(ThieleInnes::new(1.0, 0.5, -0.3, 0.8));
//! let campbell = orientation.to_campbell().unwrap();
//! assert!(campbell.semi_major_axis > 0.0);
//! ```

use serde::Serialize;

use crate::{
    astrofit_errors::AstroFitError,
    orbit_type::{campbell_element::CampbellElements, thiele_innes::ThieleInnes},
};

/// Campbell elements and the closed-form conversions to and from Thiele-Innes constants.
pub mod campbell_element;

/// Thiele-Innes constants.
pub mod thiele_innes;

/// Orientation of one orbit, in either representation.
///
/// Variants
/// --------
/// * `ThieleInnes` – Linear constants `(A, B, F, G)`.
/// * `Campbell`    – Geometric elements `(a0, i, Ω, ω)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum OrbitOrientation {
    ThieleInnes(ThieleInnes),
    Campbell(CampbellElements),
}

impl OrbitOrientation {
    /// Thiele-Innes form. Always succeeds.
    pub fn to_thiele_innes(&self) -> ThieleInnes {
        match self {
            OrbitOrientation::ThieleInnes(ti) => *ti,
            OrbitOrientation::Campbell(c) => ThieleInnes::from(c),
        }
    }

    /// Campbell form.
    ///
    /// Errors
    /// ------
    /// Returns [`AstroFitError::DegenerateOrbit`] for a vanishing orbit.
    pub fn to_campbell(&self) -> Result<CampbellElements, AstroFitError> {
        match self {
            OrbitOrientation::ThieleInnes(ti) => CampbellElements::try_from(ti),
            OrbitOrientation::Campbell(c) => Ok(*c),
        }
    }
}

impl From<ThieleInnes> for OrbitOrientation {
    fn from(ti: ThieleInnes) -> Self {
        OrbitOrientation::ThieleInnes(ti)
    }
}

impl From<CampbellElements> for OrbitOrientation {
    fn from(c: CampbellElements) -> Self {
        OrbitOrientation::Campbell(c)
    }
}
