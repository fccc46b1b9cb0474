//! Classical point estimators of the scaled mutation rate.
//!
//! Both estimators are pure numeric functions of a sample: Watterson's
//! estimator from the segregating-site count, and the nucleotide-diversity
//! estimator from exact all-pairs sequence divergence.

use serde::{Deserialize, Serialize};

use crate::errors::Error;
use crate::spectrum::Alignment;

/// Returns the sum of the first n - 1 terms of the harmonic series.
///
/// This is the Watterson denominator: `harmonic(1) == 0`,
/// `harmonic(2) == 1`, `harmonic(10) ≈ 2.828968`.
pub fn harmonic(n: u64) -> f64 {
    precomputed()
        .get(n as usize)
        .copied()
        .unwrap_or_else(|| (1..n).map(|i| 1.0 / i as f64).sum())
}

/// Returns the sum of the first n - 1 terms of the p-harmonic series.
pub fn p_harmonic(n: u64, p: u32) -> f64 {
    (1..n).map(|i| 1.0 / (i.pow(p) as f64)).sum()
}

mod cache {
    use std::sync::OnceLock;

    const PRECOMPUTED_LEN: usize = 4096;

    // Computed once, immutable and read-heavy thereafter; shared freely
    // across worker threads.
    pub(super) fn precomputed() -> &'static [f64; PRECOMPUTED_LEN] {
        static PRECOMPUTED: OnceLock<[f64; PRECOMPUTED_LEN]> = OnceLock::new();

        PRECOMPUTED.get_or_init(|| {
            let mut precomputed = [0.0; PRECOMPUTED_LEN];

            for i in 2..PRECOMPUTED_LEN {
                precomputed[i] = precomputed[i - 1] + 1.0 / (i as f64 - 1.0);
            }

            precomputed
        })
    }
}

use cache::precomputed;

/// Watterson's estimator $\hat\theta_W = S / \sum_{i=1}^{n-1} 1/i$.
///
/// Rejects samples of fewer than two sequences, for which the harmonic
/// denominator vanishes.
pub fn watterson(sample_size: usize, segregating_sites: u64) -> Result<f64, Error> {
    if sample_size < 2 {
        return Err(Error::InsufficientSampleSize { sample_size });
    }

    Ok(segregating_sites as f64 / harmonic(sample_size as u64))
}

/// The mean number of differing sites over all $n(n-1)/2$ unordered
/// sequence pairs, an estimator of the per-locus mutation rate.
pub fn mean_pairwise_differences(alignment: &Alignment) -> Result<f64, Error> {
    let n = alignment.sample_size();

    if n < 2 {
        return Err(Error::InsufficientSampleSize { sample_size: n });
    }

    let pairs = (n * (n - 1) / 2) as f64;

    Ok(alignment.total_pairwise_differences() as f64 / pairs)
}

/// Nucleotide diversity: [`mean_pairwise_differences`] divided by the
/// sequence length, the per-site form of the estimator.
pub fn nucleotide_diversity(alignment: &Alignment) -> Result<f64, Error> {
    let length = alignment.sequence_length();

    if length == 0 {
        return Err(Error::InvalidParameter {
            name: "sequence length",
            value: 0.0,
        });
    }

    Ok(mean_pairwise_differences(alignment)? / length as f64)
}

/// The estimator a point estimate was produced by.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Deserialize, Serialize)]
pub enum EstimatorKind {
    /// Watterson's segregating-sites estimator.
    Watterson,
    /// Mean pairwise sequence divergence.
    NucleotideDiversity,
    /// Posterior mean under the unconditional Ewens likelihood.
    BayesUnconditional,
    /// Posterior mean under the polymorphism-conditioned Ewens likelihood.
    BayesConditional,
    /// Posterior mean under the segregating-site-count likelihood.
    Tavare,
    /// Posterior mean under the overdispersed SNP-count likelihood.
    BetaBinomial,
}

/// An equal-tailed credible interval for the mutation rate.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize, Serialize)]
pub struct CredibleInterval {
    /// Lower endpoint.
    pub lower: f64,
    /// Upper endpoint.
    pub upper: f64,
}

impl CredibleInterval {
    /// Returns `true` if `value` lies inside the interval, endpoints
    /// included.
    pub fn contains(&self, value: f64) -> bool {
        self.lower <= value && value <= self.upper
    }
}

/// A point estimate of the mutation rate, tagged with the estimator that
/// produced it and, for Bayesian estimators, its credible interval.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Estimate {
    /// Which estimator produced this value.
    pub estimator: EstimatorKind,
    /// The point estimate of $\theta$.
    pub point: f64,
    /// The 95% credible interval, where the estimator provides one.
    pub interval: Option<CredibleInterval>,
}
