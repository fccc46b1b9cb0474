#![warn(clippy::all, clippy::cargo, clippy::nursery, clippy::pedantic)]
#![warn(missing_docs)]

//! The crate `esfmc` estimates the population-genetic scaled mutation
//! parameter $\theta = 4 N_e \mu$ from samples of allele configurations,
//! and calibrates competing estimators against each other by repeated
//! simulation.
//!
//! # Features
//!
//! This library was designed with the following features as essential in
//! mind:
//!
//! - **Log-space likelihoods**. The Ewens sampling distribution, its
//! polymorphism-conditioned form and Tavaré's segregating-site-count
//! formula are all evaluated in log space, so that large sample sizes
//! neither overflow nor silently lose precision. A non-finite
//! intermediate is an error, never a clamped value.
//! - **Reproducibility**. Calibration results depend only on the
//! configuration and the chosen seed. In particular, they do not depend
//! on the number of worker threads the run was started with or on how
//! replicates are distributed between them.
//! - **Partial results**. A replicate that fails — because the posterior
//! engine returned nothing usable, or because an ascertainment retry
//! loop hit its cap — is excluded from the aggregates and tallied by
//! category, rather than aborting the run.
//! - **External engines behind seams**. The coalescent simulator, the
//! finite-sequence mutation simulator and the posterior-sampling engine
//! are all collaborators behind small traits. The bundled reference
//! implementations are enough for self-contained runs and tests.
//!
//! # What is ...?
//!
//! - the *allele-frequency spectrum* of a sample of $n$ sequences is the
//! vector $a_1, \ldots, a_n$ in which $a_k$ counts the allelic types
//! observed exactly $k$ times; it satisfies $\sum_k k \cdot a_k = n$;
//! - a *segregating site* is an alignment column holding more than one
//! distinct symbol;
//! - *ascertainment* restricts simulated samples to satisfy a selection
//! condition, such as being polymorphic, and requires explicit
//! conditioning in the likelihood to avoid bias;
//! - *coverage* is the fraction of repeated-trial credible intervals
//! containing the true parameter, the calibration diagnostic for the
//! Bayesian estimators.

pub mod calibration;
pub mod callbacks;
pub mod errors;
pub mod estimators;
pub mod io;
pub mod likelihood;
pub mod posterior;
pub mod priors;
pub mod sim;
pub mod spectrum;

pub use crate::calibration::{
    calibrate, replicate, Aggregate, Ascertainment, CalibrationConfig, CalibrationReport,
    ReplicationRecord,
};
pub use crate::callbacks::Callback;
pub use crate::errors::{Error, ErrorCategory};
pub use crate::estimators::{CredibleInterval, Estimate, EstimatorKind};
pub use crate::posterior::{
    DrawPosterior, GridSampler, InferenceTask, Model, PosteriorDraws, PosteriorSummary,
};
pub use crate::priors::Prior;
pub use crate::sim::{Simulate, SimulatedSample};
pub use crate::spectrum::{Alignment, Spectrum, SpectrumSet};
