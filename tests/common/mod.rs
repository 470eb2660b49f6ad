#![allow(dead_code)]

use approx::assert_abs_diff_eq;
use astrofit::{
    astrometric_model::AstrometricModel,
    constants::DPI,
    observations::{Observation, Observations},
    orbit_type::campbell_element::CampbellElements,
    simulation::{SimulatedCompanion, SyntheticStar},
};
use rand::{rngs::StdRng, SeedableRng};
use rand_distr::{Distribution, Normal};

pub const TRUE_PERIOD: f64 = 500.0;
pub const TRUE_ECCENTRICITY: f64 = 0.3;
pub const TRUE_PERIASTRON_PHASE: f64 = 0.3;

pub fn true_orientation() -> CampbellElements {
    CampbellElements::new(2.0, 1.05, 0.7, 1.75).unwrap()
}

pub fn true_companion() -> SimulatedCompanion {
    SimulatedCompanion::new(
        TRUE_PERIOD,
        TRUE_ECCENTRICITY,
        TRUE_PERIASTRON_PHASE,
        true_orientation(),
    )
    .unwrap()
}

/// Star with one companion at 500 d, 150 scans over 1800 d, σ = 0.1 mas.
pub fn binary_star() -> SyntheticStar {
    SyntheticStar::builder()
        .n_obs(150)
        .time_span(1800.0)
        .sigma(0.1)
        .companion(true_companion())
        .build()
        .unwrap()
}

pub fn model_of(star: &SyntheticStar, seed: u64) -> AstrometricModel {
    let observations = star.simulate(&mut StdRng::seed_from_u64(seed)).unwrap();
    AstrometricModel::new(observations).unwrap()
}

/// Irregularly sampled scans carrying `amplitude × (2 cos ν₀τ sin ψ + sin ν₀τ cos ψ)` plus
/// optional white noise, with zero single-star motion.
pub fn sinusoid_observations(nu0: f64, amplitude: f64, noise: Option<(f64, u64)>) -> Observations {
    let t_ref = 57_000.0;
    let sigma = noise.map_or(0.1, |(s, _)| s);
    let mut rng = StdRng::seed_from_u64(noise.map_or(0, |(_, seed)| seed));
    let normal = Normal::new(0.0, sigma).unwrap();

    let records = (0..120)
        .map(|k| {
            let t = t_ref + 15.0 * k as f64 + 5.0 * ((k * 7919) % 13) as f64 / 13.0;
            let psi = (2.399_963 * k as f64).rem_euclid(DPI);
            let tau = t - t_ref;
            let plx = (DPI * tau / 365.25 + psi).sin();
            let (s, c) = (nu0 * tau).sin_cos();
            let mut w = amplitude * (2.0 * c * psi.sin() + s * psi.cos());
            if noise.is_some() {
                w += normal.sample(&mut rng);
            }
            Observation::from_scan_angle(t, psi, w, sigma, plx).unwrap()
        })
        .collect();
    Observations::new(records, t_ref).unwrap()
}

/// Angles compared modulo 2π.
pub fn assert_angle_close(actual: f64, expected: f64, epsilon: f64) {
    let diff = (actual - expected + std::f64::consts::PI).rem_euclid(DPI) - std::f64::consts::PI;
    assert_abs_diff_eq!(diff, 0.0, epsilon = epsilon);
}
