//! The replication harness: simulate, estimate, score, aggregate.
//!
//! A calibration run draws `replicates` independent samples under a known
//! $\theta$, computes every estimator the sample supports on each draw,
//! and aggregates bias, root-mean-square error and credible-interval
//! coverage per estimator.
//!
//! Replicates are embarrassingly parallel and are distributed over
//! crossbeam-scoped worker threads. Reproducibility holds in the same
//! sense as for any seeded run: every replicate derives its own generator
//! from the master seed before the workers start, so the report depends
//! only on the configuration and the seed, never on the number of workers
//! or on how replicates are interleaved between them.

use num_traits::{Float, FromPrimitive};
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use crossbeam as cb;

use crate::callbacks::Callback;
use crate::errors::{Error, ErrorCategory};
use crate::estimators::{self, Estimate, EstimatorKind};
use crate::posterior::{DrawPosterior, InferenceTask, Model, PosteriorSummary};
use crate::priors::Prior;
use crate::sim::{Simulate, SimulatedSample};

/// Which samples a replicate is allowed to keep.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub enum Ascertainment {
    /// Keep every simulated sample.
    None,
    /// Retry until the sample has at least one segregating site.
    AtLeastOneSegregatingSite,
    /// Retry until the sample has exactly one segregating site.
    ExactlyOneSegregatingSite,
}

/// Everything a calibration run is parameterized by.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct CalibrationConfig {
    /// Number of sequences per simulated sample.
    pub sample_size: usize,
    /// Number of loci per simulated sample.
    pub loci: usize,
    /// Sequence length, for finite-sequence simulators.
    pub sequence_length: Option<usize>,
    /// The mutation rate samples are simulated under.
    pub theta_true: f64,
    /// Prior handed to the posterior engine.
    pub prior: Prior,
    /// Likelihood form the posterior engine samples under, or `None` to
    /// compute the classical estimators only and skip the engine.
    pub model: Option<Model>,
    /// Number of replicates.
    pub replicates: usize,
    /// Ascertainment condition samples must satisfy.
    pub ascertainment: Ascertainment,
    /// Cap on ascertainment retries per replicate. Retrying is unbounded
    /// by design, so near-zero mutation rates need a finite cap here to
    /// avoid livelock.
    pub retry_cap: usize,
    /// Transition/transversion ratio, passed through to external
    /// finite-sequence mutation simulators.
    pub ts_tv_ratio: Option<f64>,
    /// Number of worker threads.
    pub workers: usize,
    /// Master seed all per-replicate generators derive from.
    pub seed: u64,
    /// Abort the run on the first failed replicate instead of excluding
    /// it from the aggregates.
    pub fail_fast: bool,
    /// Retain the ordered replication records in the report.
    pub keep_records: bool,
}

impl CalibrationConfig {
    /// A single-locus, single-worker configuration with no ascertainment,
    /// 100 replicates and a generous retry cap.
    pub fn new(sample_size: usize, theta_true: f64, prior: Prior, model: Option<Model>) -> Self {
        Self {
            sample_size,
            loci: 1,
            sequence_length: None,
            theta_true,
            prior,
            model,
            replicates: 100,
            ascertainment: Ascertainment::None,
            retry_cap: 10_000,
            ts_tv_ratio: None,
            workers: 1,
            seed: 0,
            fail_fast: false,
            keep_records: false,
        }
    }

    /// Rejects malformed configurations before any work starts.
    pub fn validate(&self) -> Result<(), Error> {
        if self.sample_size < 2 {
            return Err(Error::InsufficientSampleSize {
                sample_size: self.sample_size,
            });
        }

        if self.loci == 0 {
            return Err(Error::InvalidParameter {
                name: "locus count",
                value: 0.0,
            });
        }

        if !self.theta_true.is_finite() || self.theta_true <= 0.0 {
            return Err(Error::InvalidParameter {
                name: "theta_true",
                value: self.theta_true,
            });
        }

        self.prior.validate()?;

        if let Some(Model::BetaBinomial { dispersion }) = self.model {
            if !dispersion.is_finite() || dispersion <= 0.0 || dispersion >= 1.0 {
                return Err(Error::InvalidParameter {
                    name: "dispersion",
                    value: dispersion,
                });
            }
        }

        if self.replicates == 0 {
            return Err(Error::InvalidParameter {
                name: "replicate count",
                value: 0.0,
            });
        }

        if self.retry_cap == 0 {
            return Err(Error::InvalidParameter {
                name: "retry cap",
                value: 0.0,
            });
        }

        if let Some(ratio) = self.ts_tv_ratio {
            if !ratio.is_finite() || ratio <= 0.0 {
                return Err(Error::InvalidParameter {
                    name: "transition/transversion ratio",
                    value: ratio,
                });
            }
        }

        if let Some(length) = self.sequence_length {
            if length == 0 {
                return Err(Error::InvalidParameter {
                    name: "sequence length",
                    value: 0.0,
                });
            }
        }

        if self.workers == 0 {
            return Err(Error::InvalidParameter {
                name: "worker count",
                value: 0.0,
            });
        }

        Ok(())
    }
}

/// One simulated trial: its parameters, what was observed and every
/// estimate produced from it.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct ReplicationRecord {
    /// Position of this replicate in the run.
    pub index: usize,
    /// Sample size of the trial.
    pub sample_size: usize,
    /// Mutation rate the trial was simulated under.
    pub theta_true: f64,
    /// Number of loci.
    pub loci: usize,
    /// Sequence length, for finite-sequence trials.
    pub sequence_length: Option<usize>,
    /// Ascertainment retries spent before the sample was accepted.
    pub retries: usize,
    /// Segregating-site count, where the simulator produced one.
    pub segregating_sites: Option<u64>,
    /// All estimates computed on the trial.
    pub estimates: Vec<Estimate>,
}

/// Mean and unbiased sample variance of a batch of values.
#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub struct Moments<T> {
    mean: T,
    var: T,
}

impl<T: Float + FromPrimitive> Moments<T> {
    /// Computes the moments of `values`; `None` for an empty batch.
    pub fn from_values(values: &[T]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }

        let count = T::from_usize(values.len())?;
        let mean = values.iter().fold(T::zero(), |acc, &x| acc + x) / count;

        let var = if values.len() < 2 {
            T::zero()
        } else {
            values
                .iter()
                .fold(T::zero(), |acc, &x| acc + (x - mean) * (x - mean))
                / (count - T::one())
        };

        Some(Self { mean, var })
    }

    /// Returns the mean value.
    pub fn mean(&self) -> T {
        self.mean
    }

    /// Returns the variance, $V$.
    pub fn var(&self) -> T {
        self.var
    }

    /// Returns the standard deviation, $\sigma = \sqrt{V}$.
    pub fn std(&self) -> T {
        self.var.sqrt()
    }
}

/// Calibration statistics for one estimator, recomputed from the full
/// record set at report time rather than accumulated online.
#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub struct Aggregate {
    /// Number of replicates the estimator produced a value on.
    pub count: usize,
    /// Mean point estimate.
    pub mean: f64,
    /// Standard deviation of the point estimates.
    pub std: f64,
    /// Mean signed error against the true mutation rate.
    pub bias: f64,
    /// Root-mean-square error against the true mutation rate.
    pub rmse: f64,
    /// Fraction of credible intervals containing the true mutation rate,
    /// where the estimator produced intervals.
    pub coverage: Option<f64>,
}

impl Aggregate {
    fn from_estimates(theta_true: f64, estimates: &[&Estimate]) -> Option<Self> {
        let points: Vec<f64> = estimates.iter().map(|e| e.point).collect();
        let moments = Moments::from_values(&points)?;

        let rmse = (points
            .iter()
            .map(|p| (p - theta_true) * (p - theta_true))
            .sum::<f64>()
            / points.len() as f64)
            .sqrt();

        let intervals: Vec<_> = estimates.iter().filter_map(|e| e.interval).collect();
        let coverage = if intervals.is_empty() {
            None
        } else {
            let covered = intervals.iter().filter(|i| i.contains(theta_true)).count();
            Some(covered as f64 / intervals.len() as f64)
        };

        Some(Self {
            count: points.len(),
            mean: moments.mean(),
            std: moments.std(),
            bias: moments.mean() - theta_true,
            rmse,
            coverage,
        })
    }
}

/// The outcome of a calibration run: aggregates over the completed
/// replicates plus a tally of the excluded ones.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct CalibrationReport {
    /// Mutation rate the run was simulated under.
    pub theta_true: f64,
    /// Number of replicates requested.
    pub replicates: usize,
    /// Number of replicates that completed.
    pub completed: usize,
    /// Calibration statistics per estimator.
    pub aggregates: BTreeMap<EstimatorKind, Aggregate>,
    /// Excluded replicates, tallied by error category.
    pub excluded: BTreeMap<ErrorCategory, usize>,
    /// The ordered replication records, retained only when the
    /// configuration asks for them.
    pub records: Vec<ReplicationRecord>,
}

fn aggregate(theta_true: f64, records: &[ReplicationRecord]) -> BTreeMap<EstimatorKind, Aggregate> {
    let mut by_estimator: BTreeMap<EstimatorKind, Vec<&Estimate>> = BTreeMap::new();

    for record in records {
        for estimate in &record.estimates {
            by_estimator
                .entry(estimate.estimator)
                .or_insert_with(Vec::new)
                .push(estimate);
        }
    }

    by_estimator
        .into_iter()
        .filter_map(|(kind, estimates)| {
            Aggregate::from_estimates(theta_true, &estimates).map(|agg| (kind, agg))
        })
        .collect()
}

fn missing_observable(name: &'static str) -> Error {
    Error::InvalidParameter {
        name,
        value: f64::NAN,
    }
}

fn inference_task(
    config: &CalibrationConfig,
    model: Model,
    sample: &SimulatedSample,
) -> Result<InferenceTask, Error> {
    match model {
        Model::EsfUnconditional | Model::EsfConditional => {
            let spectra = sample
                .spectra
                .as_ref()
                .ok_or_else(|| missing_observable("spectrum payload (simulator provided none)"))?;

            if spectra.loci() != 1 {
                return Err(missing_observable(
                    "single-locus model on a multilocus sample",
                ));
            }

            let spectrum = spectra.spectra()[0].clone();

            match model {
                Model::EsfConditional => InferenceTask::conditional(spectrum, config.prior),
                _ => InferenceTask::unconditional(spectrum, config.prior),
            }
        }
        Model::EsfMultilocus => {
            let spectra = sample
                .spectra
                .as_ref()
                .ok_or_else(|| missing_observable("spectrum payload (simulator provided none)"))?;

            InferenceTask::multilocus(spectra.clone(), config.prior)
        }
        Model::SegregatingSites => {
            let count = sample.segregating_sites.ok_or_else(|| {
                missing_observable("segregating-site count (simulator provided none)")
            })?;

            InferenceTask::segregating_sites(config.sample_size, count, config.prior)
        }
        Model::BetaBinomial { .. } => Err(missing_observable(
            "SNP-count payload (not produced by sample simulators)",
        )),
    }
}

/// Runs one simulate, estimate, score cycle.
///
/// This is a pure function of the configuration, the simulator, the
/// engine and the replicate's generator; the parallel driver does nothing
/// but call it.
pub fn replicate<S, E, R>(
    config: &CalibrationConfig,
    simulator: &S,
    engine: &E,
    index: usize,
    rng: &mut R,
) -> Result<ReplicationRecord, Error>
where
    S: Simulate,
    E: DrawPosterior,
    R: Rng,
{
    let mut retries = 0;

    let sample = loop {
        let sample = simulator.simulate(config.theta_true, rng)?;

        let accepted = match config.ascertainment {
            Ascertainment::None => true,
            Ascertainment::AtLeastOneSegregatingSite => sample.is_polymorphic(),
            Ascertainment::ExactlyOneSegregatingSite => sample.has_single_segregating_site(),
        };

        if accepted {
            break sample;
        }

        retries += 1;

        if retries >= config.retry_cap {
            return Err(Error::AscertainmentRetryExceeded {
                cap: config.retry_cap,
                theta: config.theta_true,
            });
        }
    };

    let mut estimates = Vec::new();

    if let Some(sites) = sample.segregating_sites {
        estimates.push(Estimate {
            estimator: EstimatorKind::Watterson,
            point: estimators::watterson(config.sample_size, sites)?,
            interval: None,
        });
    }

    if let Some(alignment) = &sample.alignment {
        estimates.push(Estimate {
            estimator: EstimatorKind::NucleotideDiversity,
            point: estimators::mean_pairwise_differences(alignment)?,
            interval: None,
        });
    }

    if let Some(model) = config.model {
        let task = inference_task(config, model, &sample)?;
        let draws = engine.draw_posterior(&task, rng)?;
        let summary = PosteriorSummary::from_draws(&draws.theta)?;

        estimates.push(Estimate {
            estimator: model.estimator(),
            point: summary.mean,
            interval: Some(summary.interval),
        });
    }

    Ok(ReplicationRecord {
        index,
        sample_size: config.sample_size,
        theta_true: config.theta_true,
        loci: config.loci,
        sequence_length: config.sequence_length,
        retries,
        segregating_sites: sample.segregating_sites,
        estimates,
    })
}

/// Compute the number of replicates a given worker runs, given the total
/// number of workers and the total number of replicates to distribute.
fn replicates_for_worker(worker: usize, workers: usize, total: usize) -> usize {
    debug_assert!(worker < workers);
    let per_worker = (total as f32 / workers as f32).ceil() as usize;

    // the last worker takes whatever remains
    if workers == worker + 1 {
        total.saturating_sub(worker * per_worker)
    } else {
        per_worker
    }
}

/// Runs a full calibration: `replicates` independent simulate, estimate,
/// score cycles distributed over `workers` threads, followed by
/// aggregation over the completed replicates.
///
/// Failed replicates are excluded from the aggregates and tallied by
/// category in the report, unless the configuration asks to fail fast, in
/// which case the first failure aborts the run.
pub fn calibrate<S, E, C>(
    config: &CalibrationConfig,
    simulator: &S,
    engine: &E,
    callback: &C,
) -> Result<CalibrationReport, Error>
where
    S: Simulate,
    E: DrawPosterior,
    C: Callback,
{
    config.validate()?;

    if simulator.sample_size() != config.sample_size {
        return Err(Error::InvalidParameter {
            name: "simulator sample size",
            value: simulator.sample_size() as f64,
        });
    }

    log::info!(
        "calibrating {} replicates at theta = {} with {} workers",
        config.replicates,
        config.theta_true,
        config.workers
    );

    // Seeding every replicate from the master generator up front keeps
    // the run reproducible for any worker count.
    let mut master = Pcg64::seed_from_u64(config.seed);
    let seeds: Vec<u64> = (0..config.replicates).map(|_| master.gen()).collect();

    let workers = config.workers.min(config.replicates);
    let per_worker = (config.replicates as f32 / workers as f32).ceil() as usize;
    let stop = AtomicBool::new(false);

    let mut outcomes = cb::thread::scope(|s| {
        let mut handles = Vec::with_capacity(workers);

        for worker in 0..workers {
            let seeds = &seeds;
            let stop = &stop;
            let first = worker * per_worker;
            let count = replicates_for_worker(worker, workers, config.replicates);

            handles.push(s.spawn(move |_| {
                let mut outcomes = Vec::with_capacity(count);

                for index in first..first + count {
                    if stop.load(Ordering::Relaxed) {
                        break;
                    }

                    let mut rng = Pcg64::seed_from_u64(seeds[index]);
                    let outcome = replicate(config, simulator, engine, index, &mut rng);

                    callback.replicate_finished(index, &outcome);

                    if outcome.is_err() && config.fail_fast {
                        stop.store(true, Ordering::Relaxed);
                    }

                    outcomes.push((index, outcome));
                }

                outcomes
            }));
        }

        handles
            .into_iter()
            .flat_map(|handle| handle.join().unwrap())
            .collect::<Vec<_>>()
    })
    .unwrap();

    outcomes.sort_by_key(|(index, _)| *index);

    if config.fail_fast {
        if let Some((_, Err(e))) = outcomes.iter().find(|(_, outcome)| outcome.is_err()) {
            return Err(e.clone());
        }
    }

    let mut records = Vec::new();
    let mut excluded: BTreeMap<ErrorCategory, usize> = BTreeMap::new();

    for (_, outcome) in outcomes {
        match outcome {
            Ok(record) => records.push(record),
            Err(e) => *excluded.entry(e.category()).or_insert(0) += 1,
        }
    }

    let report = CalibrationReport {
        theta_true: config.theta_true,
        replicates: config.replicates,
        completed: records.len(),
        aggregates: aggregate(config.theta_true, &records),
        excluded,
        records: if config.keep_records {
            records
        } else {
            Vec::new()
        },
    };

    callback.run_finished(&report);

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn replicates_per_worker_cover_every_replicate_once() {
        for &(workers, total) in &[(3, 17usize), (13, 1649), (4, 4), (5, 3)] {
            let workers = workers.min(total);
            let sum: usize = (0..workers)
                .map(|worker| replicates_for_worker(worker, workers, total))
                .sum();

            assert_eq!(sum, total);
        }
    }

    #[test]
    fn moments_match_hand_computed_values() {
        let moments = Moments::from_values(&[1.0f64, 2.0, 3.0, 4.0]).unwrap();

        assert_approx_eq!(moments.mean(), 2.5, 1e-12);
        assert_approx_eq!(moments.var(), 5.0 / 3.0, 1e-12);
        assert_approx_eq!(moments.std(), (5.0f64 / 3.0).sqrt(), 1e-12);

        assert!(Moments::<f64>::from_values(&[]).is_none());
        assert_eq!(Moments::from_values(&[2.0f64]).unwrap().var(), 0.0);
    }

    #[test]
    fn aggregates_score_against_the_true_rate() {
        use crate::estimators::CredibleInterval;

        let estimates = [
            Estimate {
                estimator: EstimatorKind::Watterson,
                point: 0.2,
                interval: Some(CredibleInterval {
                    lower: 0.05,
                    upper: 0.3,
                }),
            },
            Estimate {
                estimator: EstimatorKind::Watterson,
                point: 0.0,
                interval: Some(CredibleInterval {
                    lower: 0.2,
                    upper: 0.4,
                }),
            },
        ];

        let refs: Vec<&Estimate> = estimates.iter().collect();
        let aggregate = Aggregate::from_estimates(0.1, &refs).unwrap();

        assert_eq!(aggregate.count, 2);
        assert_approx_eq!(aggregate.mean, 0.1, 1e-12);
        assert_approx_eq!(aggregate.bias, 0.0, 1e-12);
        assert_approx_eq!(aggregate.rmse, 0.1, 1e-12);
        assert_approx_eq!(aggregate.coverage.unwrap(), 0.5, 1e-12);
    }

    #[test]
    fn config_validation_rejects_degenerate_runs() {
        let prior = Prior::Gamma {
            shape: 1.0,
            rate: 1.0,
        };

        let good = CalibrationConfig::new(10, 0.5, prior, Some(Model::EsfUnconditional));
        assert!(good.validate().is_ok());

        let mut bad = good.clone();
        bad.sample_size = 1;
        assert_eq!(
            bad.validate().unwrap_err(),
            Error::InsufficientSampleSize { sample_size: 1 }
        );

        let mut bad = good.clone();
        bad.theta_true = 0.0;
        assert!(bad.validate().is_err());

        let mut bad = good.clone();
        bad.retry_cap = 0;
        assert!(bad.validate().is_err());

        let mut bad = good.clone();
        bad.workers = 0;
        assert!(bad.validate().is_err());

        let mut bad = good;
        bad.model = Some(Model::BetaBinomial { dispersion: 1.0 });
        assert!(bad.validate().is_err());
    }
}
