//! # Semi-major axis and companion mass
//!
//! Pure functions turning a fitted photocentric orbit into physical quantities, in
//! astronomical units, Julian years and solar masses.
//!
//! The mass estimate assumes a dark companion: the photocentre coincides with the primary, so
//! the fitted `a0` is the primary's orbit around the barycentre, `a1 = a · m2 / (m1 + m2)`.
//! Combined with Kepler's third law this gives the astrometric mass function
//!
//! ```text
//! f = a1³ / P² = m2³ / (m1 + m2)²
//! ```
//!
//! [`mass_function`] solves the cubic exactly, which stays valid for massive companions.
//! [`companion_mass_small_ratio`] keeps only the leading term in `m2 / m1`.

use roots::find_roots_cubic;

use crate::{
    astrofit_errors::AstroFitError,
    constants::{AstronomicalUnit, Day, Mas, SolarMass, AU_METERS, DAYS_PER_JULIAN_YEAR},
};

fn positive(name: &str, value: f64) -> Result<f64, AstroFitError> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(AstroFitError::InvalidParameter(format!(
            "{name} must be positive, got {value}"
        )))
    }
}

fn non_negative(name: &str, value: f64) -> Result<f64, AstroFitError> {
    if value.is_finite() && value >= 0.0 {
        Ok(value)
    } else {
        Err(AstroFitError::InvalidParameter(format!(
            "{name} must be non-negative, got {value}"
        )))
    }
}

/// Convert an angular semi-major axis into AU using the parallax.
///
/// Arguments
/// -----------------
/// * `a0`: angular semi-major axis (mas).
/// * `parallax`: parallax (mas), strictly positive.
///
/// Return
/// ----------
/// * The semi-major axis `a0 / ϖ` in AU.
pub fn angular_to_linear(a0: Mas, parallax: Mas) -> Result<AstronomicalUnit, AstroFitError> {
    let a0 = non_negative("semi-major axis", a0)?;
    let parallax = positive("parallax", parallax)?;
    Ok(a0 / parallax)
}

pub fn au_to_meters(a: AstronomicalUnit) -> f64 {
    a * AU_METERS
}

/// Relative semi-major axis of a binary from Kepler's third law, `a³ = (m1 + m2) P²`.
pub fn relative_semi_major_axis(
    m1: SolarMass,
    m2: SolarMass,
    period: Day,
) -> Result<AstronomicalUnit, AstroFitError> {
    let total = non_negative("primary mass", m1)? + non_negative("companion mass", m2)?;
    let total = positive("total mass", total)?;
    let p_yr = positive("period", period)? / DAYS_PER_JULIAN_YEAR;
    Ok((total * p_yr * p_yr).cbrt())
}

/// Companion mass from the primary mass and the primary's orbit.
///
/// Solves `m2³ − f·m2² − 2f·m1·m2 − f·m1² = 0` with `f = a1³ / P²`. The left side is negative
/// at `m2 = 0` and `m2³ / (m1 + m2)²` increases with `m2`, so exactly one positive root
/// exists.
///
/// Arguments
/// -----------------
/// * `m1`: primary mass (M☉, > 0).
/// * `a1`: semi-major axis of the primary around the barycentre (AU, ≥ 0).
/// * `period`: orbital period (days, > 0).
///
/// Return
/// ----------
/// * The companion mass in M☉.
pub fn mass_function(
    m1: SolarMass,
    a1: AstronomicalUnit,
    period: Day,
) -> Result<SolarMass, AstroFitError> {
    let m1 = positive("primary mass", m1)?;
    let a1 = non_negative("semi-major axis", a1)?;
    let p_yr = positive("period", period)? / DAYS_PER_JULIAN_YEAR;

    let f = a1.powi(3) / (p_yr * p_yr);
    if f == 0.0 {
        return Ok(0.0);
    }

    let roots = find_roots_cubic(1.0, -f, -2.0 * f * m1, -f * m1 * m1);
    let m2 = roots
        .as_ref()
        .iter()
        .copied()
        .filter(|r| *r > 0.0)
        .fold(f64::NAN, f64::max);
    if !m2.is_finite() {
        return Err(AstroFitError::NumericalFailure(format!(
            "mass function cubic has no positive root (f = {f}, m1 = {m1})"
        )));
    }

    // one Newton step on the cubic to clean up the closed-form root
    let g = m2.powi(3) - f * (m1 + m2).powi(2);
    let dg = 3.0 * m2 * m2 - 2.0 * f * (m1 + m2);
    Ok(if dg > 0.0 { m2 - g / dg } else { m2 })
}

/// Companion mass assuming `m2 ≪ m1`: `m2 ≈ (f·m1²)^{1/3}`.
///
/// Underestimates the mass, by about two thirds of the mass ratio in relative terms.
pub fn companion_mass_small_ratio(
    m1: SolarMass,
    a1: AstronomicalUnit,
    period: Day,
) -> Result<SolarMass, AstroFitError> {
    let m1 = positive("primary mass", m1)?;
    let a1 = non_negative("semi-major axis", a1)?;
    let p_yr = positive("period", period)? / DAYS_PER_JULIAN_YEAR;
    Ok((a1.powi(3) / (p_yr * p_yr) * m1 * m1).cbrt())
}
