//! The simulator seam and the bundled reference simulators.
//!
//! The calibration harness drives any type implementing [`Simulate`]; a
//! full coalescent-genealogy or finite-sequence mutation simulator lives
//! outside this crate behind the same seam. Two reference simulators are
//! bundled, enough for self-contained calibration runs:
//!
//! - [`HoppeUrn`] draws allele partitions exactly from the Ewens sampling
//!   distribution, one urn pass per locus.
//! - [`CoalescentSegregatingSites`] draws a segregating-site count by
//!   summing exponential coalescent interval lengths and placing a
//!   Poisson number of mutations on the tree.

use rand::Rng;
use rand_distr::Distribution;
use serde::{Deserialize, Serialize};

use crate::errors::Error;
use crate::spectrum::{Alignment, Spectrum, SpectrumSet};

/// One simulated draw handed to the estimators.
///
/// Different simulators expose different observables; absent ones stay
/// `None` and the harness only computes the estimators the sample
/// supports.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct SimulatedSample {
    /// Per-locus allele-frequency spectra, if the simulator produces
    /// allele configurations.
    pub spectra: Option<SpectrumSet>,
    /// Number of segregating sites, if the simulator counts mutations.
    pub segregating_sites: Option<u64>,
    /// The aligned sequences themselves, if the simulator paints them.
    pub alignment: Option<Alignment>,
}

impl SimulatedSample {
    /// Whether the sample satisfies the "at least one segregating site"
    /// ascertainment condition.
    pub fn is_polymorphic(&self) -> bool {
        if let Some(sites) = self.segregating_sites {
            return sites > 0;
        }

        if let Some(spectra) = &self.spectra {
            return spectra.iter().any(|a| !a.is_monomorphic());
        }

        false
    }

    /// Whether the sample satisfies the "exactly one segregating site"
    /// ascertainment condition. Requires a simulator that counts sites.
    pub fn has_single_segregating_site(&self) -> bool {
        self.segregating_sites == Some(1)
    }
}

/// A per-replicate sample simulator.
pub trait Simulate: Send + Sync {
    /// The sample size every draw is made at.
    fn sample_size(&self) -> usize;

    /// Draws one sample under the given mutation rate.
    fn simulate<R: Rng + ?Sized>(&self, theta: f64, rng: &mut R)
        -> Result<SimulatedSample, Error>;
}

fn check_theta(theta: f64) -> Result<(), Error> {
    if theta.is_finite() && theta > 0.0 {
        Ok(())
    } else {
        Err(Error::InvalidParameter {
            name: "theta",
            value: theta,
        })
    }
}

/// Hoppe's urn: an exact sampler of allele partitions under the
/// infinite-alleles model.
///
/// Each sequence joins an existing allelic class with probability
/// proportional to the class size, or founds a new class with probability
/// proportional to $\theta$. The resulting partition is distributed
/// exactly by the Ewens sampling formula, so calibration against the ESF
/// likelihood needs no external coalescent machinery.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct HoppeUrn {
    sample_size: usize,
    loci: usize,
}

impl HoppeUrn {
    /// An urn drawing `loci` independent partitions of `sample_size`
    /// sequences per sample.
    pub fn new(sample_size: usize, loci: usize) -> Result<Self, Error> {
        if sample_size == 0 {
            return Err(Error::InvalidParameter {
                name: "sample size",
                value: 0.0,
            });
        }

        if loci == 0 {
            return Err(Error::InvalidParameter {
                name: "locus count",
                value: 0.0,
            });
        }

        Ok(Self { sample_size, loci })
    }

    fn draw_partition<R: Rng + ?Sized>(&self, theta: f64, rng: &mut R) -> Result<Spectrum, Error> {
        let mut class_sizes: Vec<u64> = Vec::new();

        for i in 0..self.sample_size {
            let pick = rng.gen::<f64>() * (theta + i as f64);

            if pick < theta || class_sizes.is_empty() {
                class_sizes.push(1);
            } else {
                let mut target = pick - theta;
                let mut chosen = class_sizes.len() - 1;

                for (index, &size) in class_sizes.iter().enumerate() {
                    if target < size as f64 {
                        chosen = index;
                        break;
                    }
                    target -= size as f64;
                }

                class_sizes[chosen] += 1;
            }
        }

        let mut counts = vec![0; self.sample_size];
        for &size in &class_sizes {
            counts[size as usize - 1] += 1;
        }

        Spectrum::from_class_counts(counts)
    }
}

impl Simulate for HoppeUrn {
    fn sample_size(&self) -> usize {
        self.sample_size
    }

    fn simulate<R: Rng + ?Sized>(
        &self,
        theta: f64,
        rng: &mut R,
    ) -> Result<SimulatedSample, Error> {
        check_theta(theta)?;

        let spectra = (0..self.loci)
            .map(|_| self.draw_partition(theta, rng))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(SimulatedSample {
            spectra: Some(SpectrumSet::new(spectra)?),
            segregating_sites: None,
            alignment: None,
        })
    }
}

/// Segregating-site counts under the neutral infinite-sites coalescent.
///
/// The total tree length is the sum of $i \cdot T_i$ over coalescent
/// intervals with $T_i \sim \mathrm{Exp}(i(i-1)/2)$, and the mutation
/// count is Poisson with mean $\theta L / 2$, so that
/// $E[S] = \theta \sum_{i=1}^{n-1} 1/i$.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct CoalescentSegregatingSites {
    sample_size: usize,
}

impl CoalescentSegregatingSites {
    /// A simulator drawing segregating-site counts for samples of
    /// `sample_size` sequences.
    pub fn new(sample_size: usize) -> Result<Self, Error> {
        if sample_size < 2 {
            return Err(Error::InsufficientSampleSize { sample_size });
        }

        Ok(Self { sample_size })
    }
}

impl Simulate for CoalescentSegregatingSites {
    fn sample_size(&self) -> usize {
        self.sample_size
    }

    fn simulate<R: Rng + ?Sized>(
        &self,
        theta: f64,
        rng: &mut R,
    ) -> Result<SimulatedSample, Error> {
        check_theta(theta)?;

        let mut length = 0.0;

        for i in 2..=self.sample_size as u64 {
            let rate = (i * (i - 1)) as f64 / 2.0;
            let interval = rand_distr::Exp::new(rate)
                .map_err(|_| Error::InvalidParameter {
                    name: "coalescent rate",
                    value: rate,
                })?
                .sample(rng);

            length += i as f64 * interval;
        }

        let mean = theta * length / 2.0;

        let segregating_sites = if mean > 0.0 {
            rand_distr::Poisson::new(mean)
                .map_err(|_| Error::NumericalInstability {
                    context: "Poisson mutation count",
                    theta,
                })?
                .sample(rng) as u64
        } else {
            0
        };

        Ok(SimulatedSample {
            spectra: None,
            segregating_sites: Some(segregating_sites),
            alignment: None,
        })
    }
}
