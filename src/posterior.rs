//! The adapter between likelihood forms and a posterior-sampling engine.
//!
//! An [`InferenceTask`] packages a model choice, its data payload and a
//! prior into the contract a posterior engine consumes: the engine only
//! ever needs [`InferenceTask::log_posterior`]. Engines implement
//! [`DrawPosterior`]; the bundled [`GridSampler`] is a deterministic
//! quadrature-based stand-in adequate for calibration runs, while full
//! MCMC engines live outside this crate behind the same seam.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::errors::Error;
use crate::estimators::{CredibleInterval, EstimatorKind};
use crate::likelihood;
use crate::priors::Prior;
use crate::spectrum::{Spectrum, SpectrumSet};

/// The likelihood form the posterior engine is asked to sample under.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize, Serialize)]
pub enum Model {
    /// Unconditional Ewens likelihood of a single spectrum.
    EsfUnconditional,
    /// Polymorphism-conditioned Ewens likelihood of a single spectrum.
    EsfConditional,
    /// Joint Ewens likelihood of a multilocus spectrum set.
    EsfMultilocus,
    /// Tavaré's segregating-site-count likelihood.
    SegregatingSites,
    /// Overdispersed SNP-count likelihood with fixed dispersion $\varphi$.
    ///
    /// Engines that sample $\varphi$ jointly re-evaluate the task through
    /// [`InferenceTask::with_dispersion`] and report their $\varphi$ draws
    /// in [`PosteriorDraws::dispersion`].
    BetaBinomial {
        /// Overdispersion in $(0, 1)$.
        dispersion: f64,
    },
}

impl Model {
    /// The estimator tag attached to posterior summaries of this model.
    pub fn estimator(&self) -> EstimatorKind {
        match self {
            Self::EsfUnconditional | Self::EsfMultilocus => EstimatorKind::BayesUnconditional,
            Self::EsfConditional => EstimatorKind::BayesConditional,
            Self::SegregatingSites => EstimatorKind::Tavare,
            Self::BetaBinomial { .. } => EstimatorKind::BetaBinomial,
        }
    }
}

/// The data payload handed to the posterior engine.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub enum Observation {
    /// A single-locus spectrum.
    Spectrum(Spectrum),
    /// A multilocus spectrum set sharing one $\theta$.
    Spectra(SpectrumSet),
    /// A segregating-site count.
    SegregatingSites {
        /// Sample size the count was observed in.
        sample_size: usize,
        /// Number of segregating sites.
        count: u64,
    },
    /// Per-locus derived-allele counts for the SNP-count model.
    SnpCounts {
        /// Number of chromosomes sampled per locus.
        sample_size: u64,
        /// Derived-allele count at each locus.
        derived: Vec<u64>,
    },
}

/// A model, its observation and a prior: everything the engine needs.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct InferenceTask {
    model: Model,
    observation: Observation,
    prior: Prior,
}

impl InferenceTask {
    /// Unconditional single-locus Ewens inference.
    pub fn unconditional(spectrum: Spectrum, prior: Prior) -> Result<Self, Error> {
        prior.validate()?;

        Ok(Self {
            model: Model::EsfUnconditional,
            observation: Observation::Spectrum(spectrum),
            prior,
        })
    }

    /// Polymorphism-conditioned single-locus Ewens inference.
    pub fn conditional(spectrum: Spectrum, prior: Prior) -> Result<Self, Error> {
        prior.validate()?;

        Ok(Self {
            model: Model::EsfConditional,
            observation: Observation::Spectrum(spectrum),
            prior,
        })
    }

    /// Joint multilocus Ewens inference under one shared $\theta$.
    pub fn multilocus(spectra: SpectrumSet, prior: Prior) -> Result<Self, Error> {
        prior.validate()?;

        Ok(Self {
            model: Model::EsfMultilocus,
            observation: Observation::Spectra(spectra),
            prior,
        })
    }

    /// Inference from a segregating-site count alone.
    pub fn segregating_sites(sample_size: usize, count: u64, prior: Prior) -> Result<Self, Error> {
        prior.validate()?;

        if sample_size < 2 {
            return Err(Error::InsufficientSampleSize { sample_size });
        }

        Ok(Self {
            model: Model::SegregatingSites,
            observation: Observation::SegregatingSites { sample_size, count },
            prior,
        })
    }

    /// Overdispersed SNP-count inference; the point estimate reported for
    /// this model is the mean derived-allele frequency.
    pub fn beta_binomial(
        sample_size: u64,
        derived: Vec<u64>,
        dispersion: f64,
        prior: Prior,
    ) -> Result<Self, Error> {
        prior.validate()?;

        if !dispersion.is_finite() || dispersion <= 0.0 || dispersion >= 1.0 {
            return Err(Error::InvalidParameter {
                name: "dispersion",
                value: dispersion,
            });
        }

        if derived.is_empty() {
            return Err(Error::InvalidParameter {
                name: "locus count",
                value: 0.0,
            });
        }

        if let Some(&excess) = derived.iter().find(|&&k| k > sample_size) {
            return Err(Error::InvalidParameter {
                name: "derived allele count",
                value: excess as f64,
            });
        }

        Ok(Self {
            model: Model::BetaBinomial { dispersion },
            observation: Observation::SnpCounts {
                sample_size,
                derived,
            },
            prior,
        })
    }

    /// The model choice.
    pub fn model(&self) -> Model {
        self.model
    }

    /// The data payload.
    pub fn observation(&self) -> &Observation {
        &self.observation
    }

    /// The prior.
    pub fn prior(&self) -> Prior {
        self.prior
    }

    /// The same task with a different fixed dispersion, for engines that
    /// sample $\varphi$ alongside $\theta$.
    pub fn with_dispersion(&self, dispersion: f64) -> Result<Self, Error> {
        match self.model {
            Model::BetaBinomial { .. } => {
                if !dispersion.is_finite() || dispersion <= 0.0 || dispersion >= 1.0 {
                    return Err(Error::InvalidParameter {
                        name: "dispersion",
                        value: dispersion,
                    });
                }

                let mut task = self.clone();
                task.model = Model::BetaBinomial { dispersion };
                Ok(task)
            }
            _ => Err(Error::InvalidParameter {
                name: "dispersion on a non-beta-binomial model",
                value: dispersion,
            }),
        }
    }

    /// The log-likelihood of the payload at `theta`.
    pub fn log_likelihood(&self, theta: f64) -> Result<f64, Error> {
        match (&self.model, &self.observation) {
            (Model::EsfUnconditional, Observation::Spectrum(spectrum)) => {
                likelihood::log_esf(spectrum, theta)
            }
            (Model::EsfConditional, Observation::Spectrum(spectrum)) => {
                likelihood::log_esf_conditional(spectrum, theta)
            }
            (Model::EsfMultilocus, Observation::Spectra(spectra)) => {
                likelihood::log_esf_joint(spectra, theta)
            }
            (Model::SegregatingSites, Observation::SegregatingSites { sample_size, count }) => {
                likelihood::log_tavare(*sample_size, *count, theta)
            }
            (
                Model::BetaBinomial { dispersion },
                Observation::SnpCounts {
                    sample_size,
                    derived,
                },
            ) => derived.iter().try_fold(0.0, |acc, &k| {
                Ok(acc + likelihood::log_beta_binomial(*sample_size, k, theta, *dispersion)?)
            }),
            _ => Err(Error::InvalidParameter {
                name: "model/observation pairing",
                value: f64::NAN,
            }),
        }
    }

    /// The unnormalized log-posterior at `theta`.
    pub fn log_posterior(&self, theta: f64) -> Result<f64, Error> {
        Ok(self.log_likelihood(theta)? + self.prior.log_density(theta)?)
    }
}

/// Posterior draws returned by an engine.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct PosteriorDraws {
    /// Draws of $\theta$.
    pub theta: Vec<f64>,
    /// Draws of $\varphi$, for the beta-binomial model only.
    pub dispersion: Option<Vec<f64>>,
}

/// The external posterior-sampling engine seam.
///
/// The engine call is synchronous and may take seconds; the calibration
/// harness treats it as the unit of parallel work.
pub trait DrawPosterior: Send + Sync {
    /// Produces posterior draws for the given task.
    fn draw_posterior<R: Rng + ?Sized>(
        &self,
        task: &InferenceTask,
        rng: &mut R,
    ) -> Result<PosteriorDraws, Error>;
}

/// A posterior reduced to a mean and an equal-tailed 95% interval.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize, Serialize)]
pub struct PosteriorSummary {
    /// Posterior mean.
    pub mean: f64,
    /// Equal-tailed 95% credible interval.
    pub interval: CredibleInterval,
    /// Number of finite draws the summary was computed from.
    pub draws: usize,
}

impl PosteriorSummary {
    /// Reduces a collection of draws to mean and 2.5th/97.5th percentiles.
    ///
    /// Non-finite draws are discarded first; if nothing usable remains the
    /// summary fails with [`Error::PosteriorUnavailable`] instead of
    /// returning a degenerate mean.
    pub fn from_draws(draws: &[f64]) -> Result<Self, Error> {
        let mut finite: Vec<f64> = draws.iter().copied().filter(|x| x.is_finite()).collect();

        if finite.is_empty() {
            return Err(Error::PosteriorUnavailable {
                returned: draws.len(),
                usable: 0,
            });
        }

        finite.sort_by(|a, b| a.total_cmp(b));

        let mean = finite.iter().sum::<f64>() / finite.len() as f64;
        let interval = CredibleInterval {
            lower: quantile(&finite, 0.025),
            upper: quantile(&finite, 0.975),
        };

        Ok(Self {
            mean,
            interval,
            draws: finite.len(),
        })
    }
}

// Type 2 quantile (inverse empirical CDF with averaging) of a sorted,
// non-empty sample.
fn quantile(sorted: &[f64], p: f64) -> f64 {
    let n = sorted.len();

    if n == 1 {
        return sorted[0];
    }

    let h = n as f64 * p + 0.5;
    let floor = (h.floor() as usize).saturating_sub(1).min(n - 1);
    let ceil = (h.ceil() as usize).saturating_sub(1).min(n - 1);

    0.5 * (sorted[floor] + sorted[ceil])
}

/// A deterministic grid-quadrature engine.
///
/// The posterior is evaluated on a log-spaced grid over
/// `[lower, upper]` and draws are taken by inverse-CDF sampling of the
/// discretized posterior. Adequate for one-parameter calibration runs;
/// not a replacement for a real sampling engine on multi-parameter
/// models.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize, Serialize)]
pub struct GridSampler {
    lower: f64,
    upper: f64,
    points: usize,
    draws: usize,
}

impl GridSampler {
    /// A grid over `[lower, upper]` with the given number of grid points
    /// and of posterior draws per task.
    pub fn new(lower: f64, upper: f64, points: usize, draws: usize) -> Result<Self, Error> {
        if !lower.is_finite() || lower <= 0.0 {
            return Err(Error::InvalidParameter {
                name: "grid lower bound",
                value: lower,
            });
        }

        if !upper.is_finite() || upper <= lower {
            return Err(Error::InvalidParameter {
                name: "grid upper bound",
                value: upper,
            });
        }

        if points < 2 {
            return Err(Error::InvalidParameter {
                name: "grid points",
                value: points as f64,
            });
        }

        if draws == 0 {
            return Err(Error::InvalidParameter {
                name: "posterior draws",
                value: 0.0,
            });
        }

        Ok(Self {
            lower,
            upper,
            points,
            draws,
        })
    }
}

impl DrawPosterior for GridSampler {
    fn draw_posterior<R: Rng + ?Sized>(
        &self,
        task: &InferenceTask,
        rng: &mut R,
    ) -> Result<PosteriorDraws, Error> {
        let log_lower = self.lower.ln();
        let step = (self.upper.ln() - log_lower) / (self.points - 1) as f64;

        let thetas: Vec<f64> = (0..self.points)
            .map(|i| (log_lower + i as f64 * step).exp())
            .collect();

        // cell mass on a log-spaced grid picks up a factor of theta
        let mut log_weights = Vec::with_capacity(self.points);
        for &theta in &thetas {
            log_weights.push(task.log_posterior(theta)? + theta.ln());
        }

        let max = log_weights.iter().fold(f64::NEG_INFINITY, |a, &b| a.max(b));

        if !max.is_finite() {
            return Err(Error::PosteriorUnavailable {
                returned: 0,
                usable: 0,
            });
        }

        let weights: Vec<f64> = log_weights.iter().map(|&w| (w - max).exp()).collect();
        let total: f64 = weights.iter().sum();

        let theta = (0..self.draws)
            .map(|_| {
                let mut target = rng.gen::<f64>() * total;

                for (theta, weight) in thetas.iter().zip(weights.iter()) {
                    if target < *weight {
                        return *theta;
                    }
                    target -= *weight;
                }

                thetas[self.points - 1]
            })
            .collect();

        Ok(PosteriorDraws {
            theta,
            dispersion: None,
        })
    }
}
