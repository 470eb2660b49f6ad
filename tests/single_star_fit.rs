mod common;

use approx::assert_abs_diff_eq;
use astrofit::{
    astrometric_model::{fit_params::FitParams, AstrometricModel},
    parameters::ParamName,
    simulation::SyntheticStar,
};
use rand::{rngs::StdRng, SeedableRng};

use crate::common::model_of;

#[test]
fn test_single_star_parameters_within_uncertainties() {
    let star = SyntheticStar::builder()
        .n_obs(120)
        .astrometry(1.2, -0.7, 8.5, 12.0, -4.0)
        .build()
        .unwrap();
    let mut model = model_of(&star, 2024);
    let stats = model.fit().unwrap();

    for (name, truth) in [
        (ParamName::Ra, 1.2),
        (ParamName::Dec, -0.7),
        (ParamName::Parallax, 8.5),
        (ParamName::MuRa, 12.0),
        (ParamName::MuDec, -4.0),
    ] {
        let value = model.value(name).unwrap();
        let sigma = model.uncertainty(name).unwrap();
        assert!(sigma > 0.0 && sigma < 0.1, "{name}: sigma {sigma}");
        assert!(
            (value - truth).abs() < 5.0 * sigma,
            "{name}: {value} vs {truth} (sigma {sigma})"
        );
    }

    assert_eq!(stats.n_obs, 120);
    assert_eq!(stats.degrees_of_freedom(), 120 - 5 - 1);
    let reduced = stats.reduced_chi_square().unwrap();
    assert!(reduced > 0.6 && reduced < 1.4, "reduced chi2 {reduced}");
}

#[test]
fn test_jitter_is_recovered() {
    let star = SyntheticStar::builder()
        .n_obs(400)
        .sigma(0.1)
        .jitter(0.09)
        .build()
        .unwrap();
    let mut model = model_of(&star, 7);
    let stats = model.fit().unwrap();

    assert_abs_diff_eq!(stats.jitter, 0.09, epsilon = 0.03);
    assert_abs_diff_eq!(model.value(ParamName::Jitter).unwrap(), stats.jitter);
    assert!(stats.outer_iterations >= 1);
}

#[test]
fn test_fixed_parameter_is_respected() {
    let star = SyntheticStar::builder().n_obs(100).build().unwrap();
    let mut model = model_of(&star, 3);
    model.set_value(ParamName::Parallax, 9.0).unwrap();
    model.fix(ParamName::Parallax).unwrap();
    model.fit().unwrap();

    assert_eq!(model.value(ParamName::Parallax).unwrap(), 9.0);
    assert!(!model.free_parameters().contains(&ParamName::Parallax));
    // the wrong parallax leaves structure in the residuals, absorbed as jitter
    assert!(model.value(ParamName::Jitter).unwrap() > 0.0);
}

#[test]
fn test_fit_is_reproducible_and_configurable() {
    let star = SyntheticStar::builder().n_obs(80).build().unwrap();
    let observations = star.simulate(&mut StdRng::seed_from_u64(99)).unwrap();

    let params = FitParams::builder()
        .max_outer_iter(5)
        .objective_tol(1e-8)
        .build()
        .unwrap();
    let mut a = AstrometricModel::new(observations.clone())
        .unwrap()
        .with_fit_params(params.clone());
    let mut b = AstrometricModel::new(observations)
        .unwrap()
        .with_fit_params(params);

    let sa = a.fit().unwrap();
    let sb = b.fit().unwrap();
    assert_eq!(sa, sb);
    assert!(sa.outer_iterations <= 5);
}
