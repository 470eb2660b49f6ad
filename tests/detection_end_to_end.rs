mod common;

use approx::assert_abs_diff_eq;
use astrofit::{
    detection::{DetectionLoop, DetectionParams, DetectionState},
    mass::{angular_to_linear, mass_function},
    parameters::ParamName,
    simulation::SyntheticStar,
};

use crate::common::{
    assert_angle_close, binary_star, model_of, true_companion, true_orientation, TRUE_ECCENTRICITY,
    TRUE_PERIOD,
};

#[test]
fn test_detection_recovers_injected_companion() {
    let star = binary_star();
    let params = DetectionParams::builder().max_companions(2).build().unwrap();
    let report = DetectionLoop::new(model_of(&star, 77), params).run();

    assert!(report.is_converged(), "final state: {}", report.state);
    assert_eq!(report.detections.len(), 1);
    let detection = report.detections[0];
    assert!(detection.candidate.fap < 1e-3);
    assert!((detection.candidate.period - TRUE_PERIOD).abs() < 0.1 * TRUE_PERIOD);

    let model = &report.model;
    let label = detection.label;
    let period = model.value(ParamName::Period(label)).unwrap();
    assert!((period - TRUE_PERIOD).abs() < 0.01 * TRUE_PERIOD, "P = {period}");
    assert_abs_diff_eq!(
        model.value(ParamName::Eccentricity(label)).unwrap(),
        TRUE_ECCENTRICITY,
        epsilon = 0.05
    );

    let truth = true_orientation();
    let campbell = model.component(label).unwrap().campbell().unwrap();
    assert_abs_diff_eq!(campbell.semi_major_axis, truth.semi_major_axis, epsilon = 0.1);
    assert_abs_diff_eq!(campbell.inclination, truth.inclination, epsilon = 0.1);
    assert_angle_close(campbell.ascending_node, truth.ascending_node, 0.15);
    assert_angle_close(campbell.periastron_argument, truth.periastron_argument, 0.15);

    // the residual search that ended the loop found nothing significant
    assert!(report.last_candidate.unwrap().fap >= 1e-3);
}

#[test]
fn test_detection_with_hundred_scans() {
    let star = SyntheticStar::builder()
        .n_obs(100)
        .time_span(1800.0)
        .sigma(0.1)
        .companion(true_companion())
        .build()
        .unwrap();
    let report = DetectionLoop::new(model_of(&star, 100), DetectionParams::default()).run();

    assert!(report.is_converged(), "final state: {}", report.state);
    assert_eq!(report.detections.len(), 1);
    assert!(report.detections[0].candidate.fap < 1e-3);
    let period = report
        .model
        .value(ParamName::Period(report.detections[0].label))
        .unwrap();
    assert!((period - TRUE_PERIOD).abs() < 0.01 * TRUE_PERIOD, "P = {period}");
}

#[test]
fn test_companion_mass_from_detection() {
    let star = binary_star();
    let report = DetectionLoop::new(model_of(&star, 78), DetectionParams::default()).run();
    assert!(report.is_converged(), "final state: {}", report.state);

    let solution = report.model.solution(Some(1.0)).unwrap();
    assert_eq!(solution.companions.len(), 1);
    let companion = &solution.companions[0];

    let a1_truth = angular_to_linear(true_orientation().semi_major_axis, star.parallax).unwrap();
    let m2_truth = mass_function(1.0, a1_truth, TRUE_PERIOD).unwrap();
    let m2 = companion.companion_mass.unwrap();
    assert!(
        (m2 - m2_truth).abs() < 0.05 * m2_truth,
        "m2 = {m2}, expected {m2_truth}"
    );

    // the reported mass is the mass function of the reported elements
    let a1 = companion.semi_major_axis_au.unwrap();
    assert_abs_diff_eq!(
        m2,
        mass_function(1.0, a1, companion.period.value).unwrap(),
        epsilon = 1e-12
    );
    assert!(solution.to_string().contains("Companion 1"));
}

#[test]
fn test_single_star_converges_without_detection() {
    let star = SyntheticStar::builder().n_obs(150).build().unwrap();
    let report = DetectionLoop::new(model_of(&star, 79), DetectionParams::default()).run();

    assert_eq!(report.state, DetectionState::Converged);
    assert!(report.detections.is_empty());
    assert!(report.model.components().is_empty());
    assert!(report.last_candidate.unwrap().fap >= 1e-3);
}
