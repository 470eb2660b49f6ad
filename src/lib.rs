//! # astrofit
//!
//! Keplerian orbit fitting of one-dimensional along-scan astrometry.
//!
//! Starting from a set of [`observations::Observations`], an
//! [`astrometric_model::AstrometricModel`] fits the five single-star parameters, searches the
//! residuals with a periodogram, adds Keplerian companions and refits everything jointly.
//! [`detection::DetectionLoop`] automates the search; [`solution`] and [`mass`] turn the
//! result into orbital elements and companion masses.
//!
//! ```rust,no_run
//! use astrofit::{
//!     astrometric_model::AstrometricModel,
//!     detection::{DetectionLoop, DetectionParams},
//!     simulation::SyntheticStar,
//! };
//! use rand::{rngs::StdRng, SeedableRng};
//!
//! let star = SyntheticStar::builder().build().unwrap();
//! let observations = star.simulate(&mut StdRng::seed_from_u64(1)).unwrap();
//! let model = AstrometricModel::new(observations).unwrap();
//!
//! let report = DetectionLoop::new(model, DetectionParams::default()).run();
//! println!("{}", report.model.solution(Some(1.0)).unwrap());
//! ```

pub mod astrofit_errors;
pub mod astrometric_model;
pub mod constants;
pub mod covariance;
pub mod detection;
pub mod kepler;
pub mod keplerian_component;
pub mod linear_design;
pub mod mass;
pub mod observations;
pub mod orbit_type;
pub mod parameters;
pub mod simulation;
pub mod solution;
