use esfmc::calibration::{calibrate, Ascertainment, CalibrationConfig};
use esfmc::callbacks::SinkCallback;
use esfmc::errors::{Error, ErrorCategory};
use esfmc::posterior::{DrawPosterior, GridSampler, InferenceTask, Model, PosteriorDraws};
use esfmc::priors::Prior;
use esfmc::sim::{CoalescentSegregatingSites, HoppeUrn};
use esfmc::EstimatorKind;

use rand::Rng;

fn prior() -> Prior {
    Prior::Gamma {
        shape: 1.0,
        rate: 1.0,
    }
}

#[test]
fn watterson_is_unbiased_under_repeated_simulation() {
    // the number of replicates of the simulate-estimate-score cycle
    const REPLICATES: usize = 1_000;

    // classical estimators only: Tavaré's alternating sum is not stable
    // at this sample size, and the property under test is Watterson's
    let mut config = CalibrationConfig::new(250, 0.1, prior(), None);
    config.replicates = REPLICATES;
    config.workers = 4;
    config.seed = 0xcafef00d;

    let simulator = CoalescentSegregatingSites::new(250).unwrap();
    let engine = GridSampler::new(1e-4, 10.0, 64, 200).unwrap();

    let report = calibrate(&config, &simulator, &engine, &SinkCallback {}).unwrap();

    assert_eq!(report.completed, REPLICATES);

    let watterson = &report.aggregates[&EstimatorKind::Watterson];
    assert_eq!(watterson.count, REPLICATES);

    // E[estimate] = theta within three standard errors of the mean
    let standard_error = watterson.std / (watterson.count as f64).sqrt();
    assert!(
        watterson.bias.abs() < 3.0 * standard_error,
        "bias {} exceeds 3 standard errors {}",
        watterson.bias,
        standard_error
    );
}

#[test]
fn harmonic_correction_beats_the_naive_site_count_estimator() {
    let mut config = CalibrationConfig::new(25, 0.1, prior(), Some(Model::SegregatingSites));
    config.replicates = 100;
    config.workers = 2;
    config.seed = 7;
    config.keep_records = true;

    let simulator = CoalescentSegregatingSites::new(25).unwrap();
    // the grid stays well inside the range where the alternating
    // segregating-site sum is stable at this sample size
    let engine = GridSampler::new(1e-4, 2.0, 64, 200).unwrap();

    let report = calibrate(&config, &simulator, &engine, &SinkCallback {}).unwrap();
    assert_eq!(report.records.len(), 100);

    // dividing the site count by n instead of the harmonic number is the
    // naively biased alternative the correction term exists for
    let naive_mean = report
        .records
        .iter()
        .map(|r| r.segregating_sites.unwrap() as f64 / 25.0)
        .sum::<f64>()
        / report.records.len() as f64;
    let naive_bias = naive_mean - config.theta_true;

    let watterson_bias = report.aggregates[&EstimatorKind::Watterson].bias;

    assert!(
        watterson_bias.abs() < naive_bias.abs(),
        "Watterson bias {} is not smaller than naive bias {}",
        watterson_bias,
        naive_bias
    );
}

#[test]
fn multilocus_bayesian_estimator_is_calibrated() {
    let mut config = CalibrationConfig::new(10, 1.0, prior(), Some(Model::EsfMultilocus));
    config.loci = 8;
    config.replicates = 200;
    config.workers = 4;
    config.seed = 99;

    let simulator = HoppeUrn::new(10, 8).unwrap();
    let engine = GridSampler::new(1e-3, 1e2, 256, 500).unwrap();

    let report = calibrate(&config, &simulator, &engine, &SinkCallback {}).unwrap();

    assert_eq!(report.completed, 200);

    let bayes = &report.aggregates[&EstimatorKind::BayesUnconditional];
    assert_eq!(bayes.count, 200);
    assert!(bayes.bias.abs() < 0.5, "bias {}", bayes.bias);

    let coverage = bayes.coverage.unwrap();
    assert!(
        coverage > 0.7 && coverage <= 1.0,
        "coverage {} outside the calibrated range",
        coverage
    );
}

#[test]
fn conditional_inference_on_ascertained_samples_completes() {
    let mut config = CalibrationConfig::new(6, 0.5, prior(), Some(Model::EsfConditional));
    config.replicates = 50;
    config.ascertainment = Ascertainment::AtLeastOneSegregatingSite;
    config.seed = 3;
    config.keep_records = true;

    let simulator = HoppeUrn::new(6, 1).unwrap();
    let engine = GridSampler::new(1e-3, 1e2, 128, 300).unwrap();

    let report = calibrate(&config, &simulator, &engine, &SinkCallback {}).unwrap();

    assert_eq!(report.completed, 50);
    assert!(report.excluded.is_empty());

    let bayes = &report.aggregates[&EstimatorKind::BayesConditional];
    assert!(bayes.coverage.is_some());

    // the urn rejects monomorphic draws often enough at this rate that at
    // least one replicate should have needed a retry
    assert!(report.records.iter().any(|r| r.retries > 0));
}

#[test]
fn ascertainment_retry_cap_is_reported_instead_of_hanging() {
    let mut config = CalibrationConfig::new(10, 1e-8, prior(), Some(Model::SegregatingSites));
    config.replicates = 20;
    config.ascertainment = Ascertainment::ExactlyOneSegregatingSite;
    config.retry_cap = 50;
    config.seed = 5;

    let simulator = CoalescentSegregatingSites::new(10).unwrap();
    let engine = GridSampler::new(1e-9, 1.0, 64, 100).unwrap();

    let report = calibrate(&config, &simulator, &engine, &SinkCallback {}).unwrap();

    assert_eq!(report.completed, 0);
    assert_eq!(
        report.excluded[&ErrorCategory::AscertainmentRetryExceeded],
        20
    );
}

#[test]
fn fail_fast_aborts_on_the_first_failed_replicate() {
    let mut config = CalibrationConfig::new(10, 1e-8, prior(), Some(Model::SegregatingSites));
    config.replicates = 20;
    config.ascertainment = Ascertainment::ExactlyOneSegregatingSite;
    config.retry_cap = 50;
    config.fail_fast = true;

    let simulator = CoalescentSegregatingSites::new(10).unwrap();
    let engine = GridSampler::new(1e-9, 1.0, 64, 100).unwrap();

    let err = calibrate(&config, &simulator, &engine, &SinkCallback {}).unwrap_err();

    assert_eq!(
        err,
        Error::AscertainmentRetryExceeded {
            cap: 50,
            theta: 1e-8
        }
    );
}

struct UnavailableEngine {}

impl DrawPosterior for UnavailableEngine {
    fn draw_posterior<R: Rng + ?Sized>(
        &self,
        _: &InferenceTask,
        _: &mut R,
    ) -> Result<PosteriorDraws, Error> {
        // an engine whose chains never mix: nothing usable comes back
        Ok(PosteriorDraws {
            theta: vec![f64::NAN; 10],
            dispersion: None,
        })
    }
}

#[test]
fn unusable_posteriors_are_excluded_per_replicate() {
    let mut config = CalibrationConfig::new(5, 0.5, prior(), Some(Model::EsfUnconditional));
    config.replicates = 10;
    config.seed = 11;

    let simulator = HoppeUrn::new(5, 1).unwrap();

    let report = calibrate(&config, &simulator, &UnavailableEngine {}, &SinkCallback {}).unwrap();

    assert_eq!(report.completed, 0);
    assert_eq!(report.excluded[&ErrorCategory::PosteriorUnavailable], 10);
    assert!(report.aggregates.is_empty());
}

#[test]
fn reports_do_not_depend_on_the_worker_count() {
    let run = |workers: usize| {
        let mut config = CalibrationConfig::new(8, 0.8, prior(), Some(Model::EsfMultilocus));
        config.loci = 2;
        config.replicates = 24;
        config.workers = workers;
        config.seed = 42;
        config.keep_records = true;

        let simulator = HoppeUrn::new(8, 2).unwrap();
        let engine = GridSampler::new(1e-3, 1e2, 128, 250).unwrap();

        calibrate(&config, &simulator, &engine, &SinkCallback {}).unwrap()
    };

    let single = run(1);
    let parallel = run(4);

    assert_eq!(single.records, parallel.records);
    assert_eq!(single.completed, parallel.completed);
}
