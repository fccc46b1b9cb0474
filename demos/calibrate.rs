use esfmc::calibration::{calibrate, CalibrationConfig};
use esfmc::callbacks::LogCallback;
use esfmc::posterior::{GridSampler, Model};
use esfmc::priors::Prior;
use esfmc::sim::HoppeUrn;

/// Calibrates the multilocus Bayesian estimator against Hoppe-urn draws
/// at a known mutation rate and prints the aggregated report.
///
/// Run with `RUST_LOG=info` to see per-run progress, or `RUST_LOG=debug`
/// for per-replicate messages.
fn main() {
    env_logger::init();

    let prior = Prior::Gamma {
        shape: 1.0,
        rate: 1.0,
    };

    let mut config = CalibrationConfig::new(25, 0.5, prior, Some(Model::EsfMultilocus));
    config.loci = 5;
    config.replicates = 200;
    config.workers = 4;
    config.seed = 1;

    let simulator = HoppeUrn::new(25, 5).unwrap();

    // a quadrature stand-in for a full posterior-sampling engine
    let engine = GridSampler::new(1e-3, 1e2, 256, 1_000).unwrap();

    let report = calibrate(&config, &simulator, &engine, &LogCallback {}).unwrap();

    println!("{}", serde_json::to_string_pretty(&report).unwrap());
}
