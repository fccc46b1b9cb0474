//! Log-space evaluation of the Ewens sampling distribution and its
//! relatives.
//!
//! Given a spectrum $a_1, \ldots, a_n$ and a mutation rate $\theta > 0$, the
//! Ewens sampling formula assigns
//!
//! $$ \log P(a \mid \theta) = \log \Gamma(n+1)
//!    - \sum_{i=0}^{n-1} \log(\theta + i)
//!    + \sum_{j=1}^{n} \left[ a_j \log\theta - a_j \log j
//!    - \log \Gamma(a_j + 1) \right] $$
//!
//! All arithmetic stays in log space so that large sample sizes do not
//! overflow, and multilocus joints are sums of per-locus terms rather than
//! products of probabilities.
//!
//! Every evaluator shares one contract: $\theta$ must be positive and
//! finite, spectra must satisfy their structural invariant, and the result
//! is a finite log-probability. A non-finite intermediate is surfaced as
//! [`Error::NumericalInstability`] instead of being clamped or propagated.

use statrs::function::beta::ln_beta;
use statrs::function::factorial::ln_binomial;
use statrs::function::gamma::ln_gamma;

use crate::errors::Error;
use crate::spectrum::{Spectrum, SpectrumSet};

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

fn ensure_finite(value: f64, context: &'static str, theta: f64) -> Result<f64, Error> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(Error::NumericalInstability { context, theta })
    }
}

/// Returns $\log(1 - e^x)$ for $x < 0$ without catastrophic cancellation.
///
/// Switches between `ln(-expm1(x))` and `ln1p(-exp(x))` at $-\ln 2$, which
/// keeps the result accurate both when $e^x$ is close to one and when it
/// underflows.
pub fn log1mexp(x: f64) -> f64 {
    if x >= 0.0 {
        f64::NAN
    } else if x > -std::f64::consts::LN_2 {
        (-x.exp_m1()).ln()
    } else {
        (-x.exp()).ln_1p()
    }
}

// The rising factorial in the ESF denominator: sum of log(theta + i) for
// i = 0..n-1.
fn log_rising_factorial(theta: f64, n: usize) -> f64 {
    (0..n).map(|i| (theta + i as f64).ln()).sum()
}

/// The unconditional Ewens log-probability of one spectrum.
pub fn log_esf(spectrum: &Spectrum, theta: f64) -> Result<f64, Error> {
    check_theta(theta)?;

    let n = spectrum.sample_size();
    let mut log_p = ln_gamma(n as f64 + 1.0) - log_rising_factorial(theta, n);

    for (multiplicity, classes) in spectrum.iter() {
        if classes == 0 {
            continue;
        }

        let a = classes as f64;
        log_p += a * theta.ln() - a * (multiplicity as f64).ln() - ln_gamma(a + 1.0);
    }

    ensure_finite(log_p, "unconditional Ewens log-probability", theta)
}

/// The joint log-likelihood of a multilocus set under one shared $\theta$:
/// the sum of per-locus terms, by conditional independence given $\theta$.
pub fn log_esf_joint(set: &SpectrumSet, theta: f64) -> Result<f64, Error> {
    set.iter()
        .try_fold(0.0, |acc, spectrum| Ok(acc + log_esf(spectrum, theta)?))
}

/// The Ewens log-probability of the monomorphic spectrum `a[n] = 1`,
/// evaluated in closed form.
pub fn log_monomorphic(sample_size: usize, theta: f64) -> Result<f64, Error> {
    check_theta(theta)?;

    if sample_size == 0 {
        return Err(Error::InvalidParameter {
            name: "sample size",
            value: 0.0,
        });
    }

    let n = sample_size as f64;
    let log_p = ln_gamma(n + 1.0) - log_rising_factorial(theta, sample_size) + theta.ln() - n.ln();

    ensure_finite(log_p, "monomorphic Ewens log-probability", theta)
}

/// $\log P(\text{polymorphic} \mid \theta) = \log(1 - P(\text{monomorphic}
/// \mid \theta))$, the ascertainment denominator.
pub fn log_polymorphic(sample_size: usize, theta: f64) -> Result<f64, Error> {
    let log_mono = log_monomorphic(sample_size, theta)?;

    ensure_finite(
        log1mexp(log_mono),
        "polymorphism probability",
        theta,
    )
}

/// The polymorphism-conditioned Ewens log-probability, for samples
/// ascertained to contain at least one segregating site.
///
/// The denominator is subtracted in log space, which is what
/// $P(a \mid \theta) / P(\text{polymorphic} \mid \theta)$ (Ewens,
/// Mathematical Population Genetics, eq. 9.57 as adapted) requires. Some
/// derived material divides by the log-denominator instead; the two
/// readings are pinned apart by a regression test so the discrepancy
/// stays visible until revalidated against the reference.
pub fn log_esf_conditional(spectrum: &Spectrum, theta: f64) -> Result<f64, Error> {
    let unconditional = log_esf(spectrum, theta)?;
    let denominator = log_polymorphic(spectrum.sample_size(), theta)?;

    ensure_finite(
        unconditional - denominator,
        "conditional Ewens log-probability",
        theta,
    )
}

/// The conditioned joint log-likelihood of a multilocus set in which every
/// locus was ascertained to be polymorphic.
pub fn log_esf_joint_conditional(set: &SpectrumSet, theta: f64) -> Result<f64, Error> {
    set.iter().try_fold(0.0, |acc, spectrum| {
        Ok(acc + log_esf_conditional(spectrum, theta)?)
    })
}

/// Tavaré's closed-form log-probability of observing `segregating_sites`
/// mutations in a sample of `sample_size` sequences:
///
/// $$ P(S = s \mid \theta) = \frac{n-1}{\theta} \sum_{j=1}^{n-1}
///    (-1)^{j-1} \binom{n-2}{j-1}
///    \left( \frac{\theta}{\theta + j} \right)^{s+1} $$
///
/// The alternating terms are accumulated with compensated summation, which
/// keeps the evaluation stable for moderate sample sizes (roughly
/// $n \lesssim 50$ for mutation rates of order one; the binomial weights
/// grow combinatorially with $n$). Beyond that the cancellation exhausts
/// double precision and the evaluator reports
/// [`Error::NumericalInstability`] rather than returning a log of a
/// non-positive sum.
pub fn log_tavare(sample_size: usize, segregating_sites: u64, theta: f64) -> Result<f64, Error> {
    check_theta(theta)?;

    if sample_size < 2 {
        return Err(Error::InsufficientSampleSize { sample_size });
    }

    let n = sample_size as u64;
    let exponent = segregating_sites as f64 + 1.0;

    let mut sum = 0.0;
    let mut compensation = 0.0;

    for j in 1..n {
        let magnitude = (ln_binomial(n - 2, j - 1) + exponent * (theta / (theta + j as f64)).ln()).exp();
        let term = if j % 2 == 1 { magnitude } else { -magnitude };

        // Kahan update
        let y = term - compensation;
        let t = sum + y;
        compensation = (t - sum) - y;
        sum = t;
    }

    if !sum.is_finite() || sum <= 0.0 {
        return Err(Error::NumericalInstability {
            context: "alternating segregating-site sum",
            theta,
        });
    }

    ensure_finite(
        ((n - 1) as f64).ln() - theta.ln() + sum.ln(),
        "segregating-site log-probability",
        theta,
    )
}

/// The log-probability of `successes` derived alleles among `trials`
/// sampled chromosomes under a beta-binomial with the given mean allele
/// frequency and overdispersion, both in $(0, 1)$.
///
/// This is the overdispersed SNP-count model the posterior engine accepts
/// alongside the Ewens forms.
pub fn log_beta_binomial(
    trials: u64,
    successes: u64,
    mean: f64,
    dispersion: f64,
) -> Result<f64, Error> {
    if !mean.is_finite() || mean <= 0.0 || mean >= 1.0 {
        return Err(Error::InvalidParameter {
            name: "mean allele frequency",
            value: mean,
        });
    }

    if !dispersion.is_finite() || dispersion <= 0.0 || dispersion >= 1.0 {
        return Err(Error::InvalidParameter {
            name: "dispersion",
            value: dispersion,
        });
    }

    if successes > trials {
        return Err(Error::InvalidParameter {
            name: "derived allele count",
            value: successes as f64,
        });
    }

    let alpha = mean * (1.0 - dispersion) / dispersion;
    let beta = (1.0 - mean) * (1.0 - dispersion) / dispersion;

    let log_p = ln_binomial(trials, successes)
        + ln_beta(successes as f64 + alpha, (trials - successes) as f64 + beta)
        - ln_beta(alpha, beta);

    ensure_finite(log_p, "beta-binomial log-probability", mean)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spectrum::Spectrum;

    use assert_approx_eq::assert_approx_eq;

    // All spectra over a given sample size: the integer partitions of n in
    // multiplicity-class form.
    fn all_spectra(n: usize) -> Vec<Spectrum> {
        fn extend(counts: &mut Vec<u64>, largest: usize, remaining: usize, out: &mut Vec<Vec<u64>>) {
            if remaining == 0 {
                out.push(counts.clone());
                return;
            }

            for part in (1..=largest.min(remaining)).rev() {
                counts[part - 1] += 1;
                extend(counts, part, remaining - part, out);
                counts[part - 1] -= 1;
            }
        }

        let mut raw = Vec::new();
        extend(&mut vec![0; n], n, n, &mut raw);

        raw.into_iter()
            .map(|counts| Spectrum::from_class_counts(counts).unwrap())
            .collect()
    }

    #[test]
    fn esf_normalizes_over_all_partitions() {
        for &n in &[4, 5] {
            for &theta in &[0.1, 0.5, 2.3] {
                let total: f64 = all_spectra(n)
                    .iter()
                    .map(|a| log_esf(a, theta).unwrap().exp())
                    .sum();

                assert_approx_eq!(total, 1.0, 1e-10);
            }
        }
    }

    #[test]
    fn conditional_esf_normalizes_over_polymorphic_partitions() {
        let n = 5;
        let theta = 0.7;

        let total: f64 = all_spectra(n)
            .iter()
            .filter(|a| !a.is_monomorphic())
            .map(|a| log_esf_conditional(a, theta).unwrap().exp())
            .sum();

        assert_approx_eq!(total, 1.0, 1e-10);
    }

    #[test]
    fn monomorphic_closed_form_matches_the_general_evaluator() {
        for &n in &[1, 2, 7, 40] {
            for &theta in &[0.01, 1.0, 12.5] {
                let spectrum = Spectrum::monomorphic(n).unwrap();

                assert_approx_eq!(
                    log_monomorphic(n, theta).unwrap(),
                    log_esf(&spectrum, theta).unwrap(),
                    1e-12
                );
            }
        }

        // for n = 2 the monomorphism probability is 1/(1 + theta)
        assert_approx_eq!(
            log_monomorphic(2, 0.3).unwrap(),
            -(1.3f64).ln(),
            1e-12
        );
    }

    #[test]
    fn multilocus_joint_is_the_sum_of_per_locus_terms() {
        let theta = 0.9;
        let spectra = vec![
            Spectrum::from_class_counts(vec![2, 1, 0, 0]).unwrap(),
            Spectrum::from_class_counts(vec![0, 2, 0, 0]).unwrap(),
            Spectrum::monomorphic(4).unwrap(),
        ];

        let separate: f64 = spectra.iter().map(|a| log_esf(a, theta).unwrap()).sum();
        let set = SpectrumSet::new(spectra).unwrap();

        assert_approx_eq!(log_esf_joint(&set, theta).unwrap(), separate, 1e-12);
    }

    #[test]
    fn conditioned_joint_is_the_sum_of_conditioned_per_locus_terms() {
        let theta = 1.4;
        let spectra = vec![
            Spectrum::from_class_counts(vec![2, 1, 0, 0]).unwrap(),
            Spectrum::from_class_counts(vec![0, 2, 0, 0]).unwrap(),
        ];

        let separate: f64 = spectra
            .iter()
            .map(|a| log_esf_conditional(a, theta).unwrap())
            .sum();
        let set = SpectrumSet::new(spectra).unwrap();

        assert_approx_eq!(log_esf_joint_conditional(&set, theta).unwrap(), separate, 1e-12);
    }

    #[test]
    fn conditioning_multiplies_back_to_the_unconditional_probability() {
        let spectrum = Spectrum::from_class_counts(vec![1, 2, 0, 0, 0]).unwrap();

        for &theta in &[0.05, 1.0, 30.0] {
            let unconditional = log_esf(&spectrum, theta).unwrap();
            let conditional = log_esf_conditional(&spectrum, theta).unwrap();
            let polymorphic = log_polymorphic(spectrum.sample_size(), theta).unwrap();

            assert_approx_eq!(
                (conditional + polymorphic).exp(),
                unconditional.exp(),
                1e-12
            );
        }
    }

    // Dividing by the log-denominator instead of subtracting it is a
    // plausible transcription error when conditioning; keep the two
    // readings visibly distinct.
    #[test]
    fn conditioning_by_log_ratio_disagrees_with_the_derivation() {
        let spectrum = Spectrum::from_class_counts(vec![1, 2, 0, 0, 0]).unwrap();
        let theta = 0.8;

        let unconditional = log_esf(&spectrum, theta).unwrap();
        let denominator = log_polymorphic(spectrum.sample_size(), theta).unwrap();

        let subtracted = log_esf_conditional(&spectrum, theta).unwrap();
        let divided = unconditional / denominator;

        assert_approx_eq!(subtracted, unconditional - denominator, 1e-12);
        assert!((subtracted - divided).abs() > 1e-3);
    }

    #[test]
    fn log1mexp_is_stable_in_both_branches() {
        // near zero probability mass: 1 - e^x ~ -x
        assert_approx_eq!(log1mexp(-1e-12), (1e-12f64).ln(), 1e-6);
        // deep underflow branch
        assert_approx_eq!(log1mexp(-50.0), (-(-50.0f64).exp()).ln_1p(), 1e-15);
        assert!(log1mexp(0.0).is_nan());
    }

    #[test]
    fn tavare_reduces_to_a_geometric_law_for_pairs() {
        let theta = 1.7f64;

        for s in 0..20u64 {
            let expected = s as f64 * (theta / (1.0 + theta)).ln() - (1.0 + theta).ln();
            assert_approx_eq!(log_tavare(2, s, theta).unwrap(), expected, 1e-12);
        }
    }

    #[test]
    fn tavare_normalizes_over_segregating_site_counts() {
        for &n in &[2, 5, 20] {
            for &theta in &[0.1, 1.0, 5.0] {
                let total: f64 = (0..2000u64)
                    .map(|s| log_tavare(n, s, theta).unwrap().exp())
                    .sum();

                assert_approx_eq!(total, 1.0, 1e-6);
            }
        }
    }

    #[test]
    fn invalid_mutation_rates_fail_fast() {
        let spectrum = Spectrum::monomorphic(4).unwrap();

        for &theta in &[0.0, -1.0, f64::NAN, f64::INFINITY] {
            let err = log_esf(&spectrum, theta).unwrap_err();
            match err {
                Error::InvalidParameter { name, .. } => assert_eq!(name, "theta"),
                other => panic!("unexpected error: {:?}", other),
            }

            assert!(log_tavare(5, 1, theta).is_err());
            assert!(log_monomorphic(5, theta).is_err());
        }
    }

    #[test]
    fn beta_binomial_normalizes_and_rejects_bad_parameters() {
        let trials = 12;
        let total: f64 = (0..=trials)
            .map(|k| log_beta_binomial(trials, k, 0.3, 0.2).unwrap().exp())
            .sum();

        assert_approx_eq!(total, 1.0, 1e-10);

        assert!(log_beta_binomial(10, 11, 0.3, 0.2).is_err());
        assert!(log_beta_binomial(10, 2, 0.0, 0.2).is_err());
        assert!(log_beta_binomial(10, 2, 0.3, 1.0).is_err());
    }
}
