//! Allele-frequency spectra and the samples they are built from.
//!
//! The central data type is the [`Spectrum`]: an ordered sequence
//! $a_1, \ldots, a_n$ in which $a_k$ counts the distinct allelic types
//! observed exactly $k$ times in a sample of $n$ sequences. Every spectrum
//! satisfies $\sum_k k \cdot a_k = n$; constructors reject anything else.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::errors::{Error, SpectrumError};

/// An allele-frequency spectrum for a single locus.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct Spectrum {
    // counts[k - 1] is the number of allelic classes of multiplicity k;
    // the vector length is the sample size
    counts: Vec<u64>,
}

impl Spectrum {
    /// Builds a spectrum from pre-tabulated class counts, the infinite-sites
    /// shortcut for samples that never existed as sequences.
    ///
    /// `counts[k - 1]` must hold the number of allelic classes of
    /// multiplicity `k`, with the vector length equal to the sample size.
    pub fn from_class_counts(counts: Vec<u64>) -> Result<Self, Error> {
        if counts.is_empty() {
            return Err(SpectrumError::Empty.into());
        }

        let weighted_sum = counts
            .iter()
            .enumerate()
            .map(|(i, &a)| (i as u64 + 1) * a)
            .sum::<u64>();

        if weighted_sum != counts.len() as u64 {
            return Err(SpectrumError::WeightedSumMismatch {
                sample_size: counts.len(),
                weighted_sum,
            }
            .into());
        }

        Ok(Self { counts })
    }

    /// The spectrum of a sample with zero segregating sites: a single
    /// allelic class containing all `sample_size` sequences.
    pub fn monomorphic(sample_size: usize) -> Result<Self, Error> {
        if sample_size == 0 {
            return Err(SpectrumError::Empty.into());
        }

        let mut counts = vec![0; sample_size];
        counts[sample_size - 1] = 1;

        Ok(Self { counts })
    }

    /// Builds the spectrum of an alignment by grouping sequences into
    /// classes by exact symbol-for-symbol identity.
    ///
    /// A monomorphic alignment yields `a[n] = 1` rather than an empty
    /// vector; downstream likelihoods rely on this.
    pub fn from_alignment(alignment: &Alignment) -> Result<Self, Error> {
        let sample_size = alignment.sample_size();

        if sample_size == 0 {
            return Err(SpectrumError::Empty.into());
        }

        let mut classes: HashMap<&str, u64> = HashMap::new();
        for sequence in alignment.sequences() {
            *classes.entry(sequence.as_str()).or_insert(0) += 1;
        }

        let mut counts = vec![0; sample_size];
        for &size in classes.values() {
            counts[size as usize - 1] += 1;
        }

        Ok(Self { counts })
    }

    /// Returns the sample size $n$.
    pub fn sample_size(&self) -> usize {
        self.counts.len()
    }

    /// Returns the number of distinct allelic types, $\sum_k a_k$.
    pub fn classes(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// Returns `a[multiplicity]`, the number of classes of the given
    /// multiplicity. Multiplicities outside `1..=n` hold no classes.
    pub fn class_count(&self, multiplicity: usize) -> u64 {
        if multiplicity == 0 {
            0
        } else {
            self.counts.get(multiplicity - 1).copied().unwrap_or(0)
        }
    }

    /// Returns `true` if the sample consists of a single allelic class.
    pub fn is_monomorphic(&self) -> bool {
        self.counts.last() == Some(&1)
    }

    /// Iterates over `(multiplicity, class count)` pairs, multiplicity
    /// running from 1 to $n$.
    pub fn iter(&self) -> impl Iterator<Item = (usize, u64)> + '_ {
        self.counts.iter().enumerate().map(|(i, &a)| (i + 1, a))
    }
}

/// A multilocus collection of spectra assumed to share one mutation rate.
///
/// All member spectra must be built from samples of the same size.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct SpectrumSet {
    spectra: Vec<Spectrum>,
}

impl SpectrumSet {
    /// Wraps a non-empty collection of spectra, rejecting mixed sample
    /// sizes.
    pub fn new(spectra: Vec<Spectrum>) -> Result<Self, Error> {
        let first = match spectra.first() {
            Some(spectrum) => spectrum.sample_size(),
            None => return Err(SpectrumError::Empty.into()),
        };

        if let Some(mismatch) = spectra.iter().find(|s| s.sample_size() != first) {
            return Err(SpectrumError::UnequalSampleSizes {
                expected: first,
                found: mismatch.sample_size(),
            }
            .into());
        }

        Ok(Self { spectra })
    }

    /// The shared sample size of all member spectra.
    pub fn sample_size(&self) -> usize {
        self.spectra[0].sample_size()
    }

    /// The number of loci.
    pub fn loci(&self) -> usize {
        self.spectra.len()
    }

    /// The member spectra, in locus order.
    pub fn spectra(&self) -> &[Spectrum] {
        &self.spectra
    }

    /// Iterates over the member spectra.
    pub fn iter(&self) -> impl Iterator<Item = &Spectrum> {
        self.spectra.iter()
    }
}

/// An aligned sample of equal-length symbol strings, one per sequence.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct Alignment {
    sequences: Vec<String>,
}

impl Alignment {
    /// Wraps a set of sequences, rejecting rows of unequal length.
    pub fn new(sequences: Vec<String>) -> Result<Self, Error> {
        if let Some(first) = sequences.first() {
            let expected = first.chars().count();

            for sequence in &sequences {
                let found = sequence.chars().count();
                if found != expected {
                    return Err(SpectrumError::RaggedAlignment { expected, found }.into());
                }
            }
        }

        Ok(Self { sequences })
    }

    /// The number of sequences in the sample.
    pub fn sample_size(&self) -> usize {
        self.sequences.len()
    }

    /// The common sequence length; zero for an empty alignment.
    pub fn sequence_length(&self) -> usize {
        self.sequences
            .first()
            .map(|s| s.chars().count())
            .unwrap_or(0)
    }

    /// The aligned sequences.
    pub fn sequences(&self) -> &[String] {
        &self.sequences
    }

    /// Counts alignment columns holding more than one distinct symbol.
    pub fn segregating_sites(&self) -> u64 {
        let first = match self.sequences.first() {
            Some(first) => first,
            None => return 0,
        };

        let rows: Vec<Vec<char>> = self.sequences.iter().map(|s| s.chars().collect()).collect();

        (0..first.chars().count())
            .filter(|&column| rows.iter().any(|row| row[column] != rows[0][column]))
            .count() as u64
    }

    /// Sums the number of differing sites over all unordered sequence
    /// pairs. Exact, no sampling approximation.
    pub fn total_pairwise_differences(&self) -> u64 {
        let rows: Vec<Vec<char>> = self.sequences.iter().map(|s| s.chars().collect()).collect();

        let mut total = 0;
        for i in 0..rows.len() {
            for j in i + 1..rows.len() {
                total += rows[i]
                    .iter()
                    .zip(rows[j].iter())
                    .filter(|(a, b)| a != b)
                    .count() as u64;
            }
        }

        total
    }
}
