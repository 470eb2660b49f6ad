//! # Constants and type definitions for astrofit
//!
//! This module centralizes the **unit conventions**, **conversion factors**, and **common type
//! aliases** used throughout the crate.
//!
//! ## Overview
//!
//! - Angular and temporal unit conversions (mas ↔ rad, days ↔ Julian years)
//! - Kepler's third law in solar units (AU, year, M☉)
//! - Core type aliases used across the crate
//!
//! ## Units
//!
//! - Epochs and periods: **days**
//! - Along-scan positions, parallax, semi-major axes on the sky: **milliarcseconds**
//! - Proper motions: **mas / Julian year**
//! - Angles (inclination, nodes, anomalies): **radians**
//! - Masses: **solar masses**, linear distances: **AU**

// -------------------------------------------------------------------------------------------------
// Physical constants and unit conversions
// -------------------------------------------------------------------------------------------------

/// 2π, useful for trigonometric conversions
pub const DPI: f64 = 2. * std::f64::consts::PI;

/// Number of days in a Julian year
pub const DAYS_PER_JULIAN_YEAR: f64 = 365.25;

/// Astronomical Unit in meters (IAU 2012)
pub const AU_METERS: f64 = 149_597_870_700.0;

/// Degrees → radians
pub const RADEG: f64 = std::f64::consts::PI / 180.0;

/// Milliarcseconds → radians
pub const RADMAS: f64 = std::f64::consts::PI / 648_000_000.0;

/// Upper bound on the eccentricity reachable by the nonlinear optimizer.
pub const MAX_ECCENTRICITY: f64 = 0.99;

/// Below this angular semi-major axis (mas) an orbit is considered unresolved.
pub const DEGENERATE_SEMI_MAJOR_AXIS: f64 = 1e-12;

/// Number of along-scan regressors carried by one circular trial orbit in the periodogram.
pub const HARMONIC_REGRESSORS: usize = 4;

// -------------------------------------------------------------------------------------------------
// Type aliases
// -------------------------------------------------------------------------------------------------

/// Epoch or duration in days
pub type Day = f64;

/// Angle in milliarcseconds
pub type Mas = f64;

/// Angle in radians
pub type Radian = f64;

/// Angular frequency in radians per day
pub type RadPerDay = f64;

/// Mass in solar masses
pub type SolarMass = f64;

/// Length in astronomical units
pub type AstronomicalUnit = f64;

/// Identifier of a Keplerian component inside an astrometric model
pub type Label = usize;
