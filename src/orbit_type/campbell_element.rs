//! # Campbell elements
//!
//! Geometric orientation of an astrometric orbit: angular semi-major axis `a0`,
//! inclination `i`, longitude of the ascending node `Ω` (measured east of north) and
//! argument of periastron `ω` (measured in the orbital plane, in the direction of motion).
//! Together with `(P, T0, e)` they form the classical Campbell set.
//!
//! ## Conversions
//!
//! Campbell → Thiele-Innes is the standard projection
//!
//! ```text
//! A =  a0 ( cos ω cos Ω − sin ω sin Ω cos i)
//! B =  a0 ( cos ω sin Ω + sin ω cos Ω cos i)
//! F = −a0 ( sin ω cos Ω + cos ω sin Ω cos i)
//! G = −a0 ( sin ω sin Ω − cos ω cos Ω cos i)
//! ```
//!
//! The inverse is closed form. With
//!
//! ```text
//! r₊ = |(A + G, B − F)| = a0 (1 + cos i)        ω + Ω = atan2(B − F, A + G)
//! r₋ = |(A − G, −(B + F))| = a0 (1 − cos i)     ω − Ω = atan2(−(B + F), A − G)
//! ```
//!
//! one gets `a0 = (r₊ + r₋)/2` and `cos i = (r₊ − r₋)/(r₊ + r₋)`.
//!
//! ## Branch choice
//!
//! `(ω, Ω)` and `(ω + π, Ω + π)` produce identical Thiele-Innes constants: astrometry alone
//! cannot tell the ascending from the descending node. The conversion always returns
//! `Ω ∈ [0, π)` and `ω ∈ [0, 2π)`. When `i = 0` (or `π`) only `ω + Ω` (or `ω − Ω`) is
//! defined and the other combination is set to zero.
//!
//! An orbit with `a0 < 1e-12 mas` has no defined orientation: the conversion fails with
//! [`AstroFitError::DegenerateOrbit`] instead of returning an arbitrary quadrant.

use std::{f64::consts::PI, fmt};

use serde::Serialize;

use crate::{
    astrofit_errors::AstroFitError,
    constants::{Mas, Radian, DEGENERATE_SEMI_MAJOR_AXIS},
    kepler::principal_angle,
    orbit_type::thiele_innes::ThieleInnes,
};

/// Campbell orientation elements.
///
/// Units
/// -----
/// * `semi_major_axis`: mas (photocentre orbit).
/// * `inclination`, `ascending_node`, `periastron_argument`: radians.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CampbellElements {
    pub semi_major_axis: Mas,
    pub inclination: Radian,
    pub ascending_node: Radian,
    pub periastron_argument: Radian,
}

impl CampbellElements {
    /// Build validated Campbell elements.
    ///
    /// Errors
    /// ----------
    /// * [`AstroFitError::InvalidParameter`] if `a0 < 0`, `i ∉ [0, π]` or any value is not finite.
    pub fn new(
        semi_major_axis: Mas,
        inclination: Radian,
        ascending_node: Radian,
        periastron_argument: Radian,
    ) -> Result<Self, AstroFitError> {
        let elements = CampbellElements {
            semi_major_axis,
            inclination,
            ascending_node,
            periastron_argument,
        };
        elements.validate()?;
        Ok(elements)
    }

    pub(crate) fn validate(&self) -> Result<(), AstroFitError> {
        let all_finite = [
            self.semi_major_axis,
            self.inclination,
            self.ascending_node,
            self.periastron_argument,
        ]
        .iter()
        .all(|v| v.is_finite());
        if !all_finite {
            return Err(AstroFitError::InvalidParameter(
                "Campbell elements must be finite".into(),
            ));
        }
        if self.semi_major_axis < 0.0 {
            return Err(AstroFitError::InvalidParameter(format!(
                "semi-major axis must be non-negative, got {}",
                self.semi_major_axis
            )));
        }
        if !(0.0..=PI).contains(&self.inclination) {
            return Err(AstroFitError::InvalidParameter(format!(
                "inclination must lie in [0, π], got {}",
                self.inclination
            )));
        }
        Ok(())
    }

    /// Elements as `[a0, i, Ω, ω]`.
    pub fn to_array(&self) -> [f64; 4] {
        [
            self.semi_major_axis,
            self.inclination,
            self.ascending_node,
            self.periastron_argument,
        ]
    }

    /// Map `(ω, Ω)` onto the conventional branch `Ω ∈ [0, π)`, `ω ∈ [0, 2π)`.
    pub fn canonical(&self) -> Self {
        let mut node = principal_angle(self.ascending_node);
        let mut argument = self.periastron_argument;
        if node >= PI {
            node -= PI;
            argument += PI;
        }
        CampbellElements {
            ascending_node: node,
            periastron_argument: principal_angle(argument),
            ..*self
        }
    }
}

impl From<&CampbellElements> for ThieleInnes {
    fn from(c: &CampbellElements) -> Self {
        let (sin_w, cos_w) = c.periastron_argument.sin_cos();
        let (sin_n, cos_n) = c.ascending_node.sin_cos();
        let cos_i = c.inclination.cos();
        let a0 = c.semi_major_axis;

        ThieleInnes {
            a: a0 * (cos_w * cos_n - sin_w * sin_n * cos_i),
            b: a0 * (cos_w * sin_n + sin_w * cos_n * cos_i),
            f: -a0 * (sin_w * cos_n + cos_w * sin_n * cos_i),
            g: -a0 * (sin_w * sin_n - cos_w * cos_n * cos_i),
        }
    }
}

impl From<CampbellElements> for ThieleInnes {
    fn from(c: CampbellElements) -> Self {
        ThieleInnes::from(&c)
    }
}

impl TryFrom<&ThieleInnes> for CampbellElements {
    type Error = AstroFitError;

    fn try_from(ti: &ThieleInnes) -> Result<Self, Self::Error> {
        let (a, b, f, g) = (ti.a, ti.b, ti.f, ti.g);

        let r_plus = (a + g).hypot(b - f);
        let r_minus = (a - g).hypot(b + f);
        let semi_major_axis = 0.5 * (r_plus + r_minus);

        if !semi_major_axis.is_finite() || semi_major_axis < DEGENERATE_SEMI_MAJOR_AXIS {
            return Err(AstroFitError::DegenerateOrbit(format!(
                "semi-major axis {semi_major_axis:e} mas is too small to define an orientation"
            )));
        }

        let cos_i = ((r_plus - r_minus) / (r_plus + r_minus)).clamp(-1.0, 1.0);

        // atan2(0, 0) = 0 covers the face-on / retrograde face-on cases.
        let sum = (b - f).atan2(a + g);
        let diff = (-(b + f)).atan2(a - g);

        Ok(CampbellElements {
            semi_major_axis,
            inclination: cos_i.acos(),
            ascending_node: 0.5 * (sum - diff),
            periastron_argument: 0.5 * (sum + diff),
        }
        .canonical())
    }
}

impl TryFrom<ThieleInnes> for CampbellElements {
    type Error = AstroFitError;

    fn try_from(ti: ThieleInnes) -> Result<Self, Self::Error> {
        CampbellElements::try_from(&ti)
    }
}

impl fmt::Display for CampbellElements {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rad_to_deg = 180.0 / PI;
        writeln!(f, "Campbell Elements")?;
        writeln!(f, "-------------------------------------------")?;
        writeln!(
            f,
            "  a0  (semi-major axis)         = {:.6} mas",
            self.semi_major_axis
        )?;
        writeln!(
            f,
            "  i   (inclination)             = {:.6} rad ({:.4}°)",
            self.inclination,
            self.inclination * rad_to_deg
        )?;
        writeln!(
            f,
            "  Ω   (ascending node)          = {:.6} rad ({:.4}°)",
            self.ascending_node,
            self.ascending_node * rad_to_deg
        )?;
        writeln!(
            f,
            "  ω   (argument of periastron)  = {:.6} rad ({:.4}°)",
            self.periastron_argument,
            self.periastron_argument * rad_to_deg
        )
    }
}
