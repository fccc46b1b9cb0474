//! The error taxonomy shared by all components.
//!
//! Every variant carries the offending parameters, so that a failed replicate
//! can be reproduced from its error value alone.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Errors produced by spectrum construction, the likelihood evaluators and
/// the calibration harness.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum Error {
    /// A scalar parameter is outside its domain, for example $\theta \leq 0$
    /// or a non-positive prior hyperparameter. Never retried.
    InvalidParameter {
        /// Name of the offending parameter.
        name: &'static str,
        /// The rejected value.
        value: f64,
    },
    /// An estimator was handed a sample of fewer than two sequences.
    InsufficientSampleSize {
        /// The rejected sample size.
        sample_size: usize,
    },
    /// An allele-frequency spectrum violates its structural invariant. This
    /// signals a bug in whatever built the spectrum, so it fails fast.
    MalformedSpectrum(SpectrumError),
    /// A likelihood evaluation produced a non-finite intermediate for valid
    /// inputs. Surfaced instead of clamped, because it indicates a precision
    /// bug that should be visible in testing.
    NumericalInstability {
        /// Which evaluation went non-finite.
        context: &'static str,
        /// The mutation rate at which it happened.
        theta: f64,
    },
    /// The posterior-sampling engine returned no usable draws.
    PosteriorUnavailable {
        /// Number of draws the engine returned.
        returned: usize,
        /// How many of those were finite.
        usable: usize,
    },
    /// An ascertainment retry loop reached its configured cap without
    /// producing a sample satisfying the ascertainment condition.
    AscertainmentRetryExceeded {
        /// The configured retry cap.
        cap: usize,
        /// The mutation rate the samples were simulated under.
        theta: f64,
    },
}

/// Structural violations of the allele-frequency-spectrum data model.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub enum SpectrumError {
    /// The spectrum has no multiplicity classes at all.
    Empty,
    /// The multiplicity-weighted class counts do not sum to the sample size.
    WeightedSumMismatch {
        /// Sample size implied by the spectrum length.
        sample_size: usize,
        /// The value of $\sum_k k \cdot a_k$ actually found.
        weighted_sum: u64,
    },
    /// A multilocus set mixes spectra built from different sample sizes.
    UnequalSampleSizes {
        /// Sample size of the first member.
        expected: usize,
        /// Offending sample size.
        found: usize,
    },
    /// An alignment row has a different length than the first row.
    RaggedAlignment {
        /// Length of the first sequence.
        expected: usize,
        /// Length of the offending sequence.
        found: usize,
    },
}

/// Coarse error categories used when the harness tallies excluded replicates.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Deserialize, Serialize)]
pub enum ErrorCategory {
    /// See [`Error::InvalidParameter`].
    InvalidParameter,
    /// See [`Error::InsufficientSampleSize`].
    InsufficientSampleSize,
    /// See [`Error::MalformedSpectrum`].
    MalformedSpectrum,
    /// See [`Error::NumericalInstability`].
    NumericalInstability,
    /// See [`Error::PosteriorUnavailable`].
    PosteriorUnavailable,
    /// See [`Error::AscertainmentRetryExceeded`].
    AscertainmentRetryExceeded,
}

impl Error {
    /// Returns the category this error is tallied under.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidParameter { .. } => ErrorCategory::InvalidParameter,
            Self::InsufficientSampleSize { .. } => ErrorCategory::InsufficientSampleSize,
            Self::MalformedSpectrum(_) => ErrorCategory::MalformedSpectrum,
            Self::NumericalInstability { .. } => ErrorCategory::NumericalInstability,
            Self::PosteriorUnavailable { .. } => ErrorCategory::PosteriorUnavailable,
            Self::AscertainmentRetryExceeded { .. } => ErrorCategory::AscertainmentRetryExceeded,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidParameter { name, value } => {
                write!(f, "invalid parameter: {} = {}", name, value)
            }
            Self::InsufficientSampleSize { sample_size } => write!(
                f,
                "estimator requires at least two sequences, got sample size {}",
                sample_size
            ),
            Self::MalformedSpectrum(e) => write!(f, "malformed spectrum: {}", e),
            Self::NumericalInstability { context, theta } => write!(
                f,
                "non-finite value in {} at theta = {}",
                context, theta
            ),
            Self::PosteriorUnavailable { returned, usable } => write!(
                f,
                "posterior engine returned {} draws of which {} were usable",
                returned, usable
            ),
            Self::AscertainmentRetryExceeded { cap, theta } => write!(
                f,
                "ascertainment condition not met within {} retries at theta = {}",
                cap, theta
            ),
        }
    }
}

impl fmt::Display for SpectrumError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "spectrum has no multiplicity classes"),
            Self::WeightedSumMismatch {
                sample_size,
                weighted_sum,
            } => write!(
                f,
                "multiplicity-weighted class counts sum to {} in a spectrum of sample size {}",
                weighted_sum, sample_size
            ),
            Self::UnequalSampleSizes { expected, found } => write!(
                f,
                "multilocus set mixes sample sizes {} and {}",
                expected, found
            ),
            Self::RaggedAlignment { expected, found } => write!(
                f,
                "alignment mixes sequence lengths {} and {}",
                expected, found
            ),
        }
    }
}

impl std::error::Error for Error {}

impl std::error::Error for SpectrumError {}

impl From<SpectrumError> for Error {
    fn from(e: SpectrumError) -> Self {
        Self::MalformedSpectrum(e)
    }
}
