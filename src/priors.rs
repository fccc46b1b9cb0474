//! Prior families over the mutation rate.
//!
//! Two families are supported, both with support on $(0, \infty)$: a gamma
//! prior in shape/rate form and a log-normal prior in location/scale form.
//! The enum is the tagged variant consumed by the posterior adapter; there
//! is no string-keyed dispatch anywhere.

use rand::Rng;
use rand_distr::Distribution;
use serde::{Deserialize, Serialize};
use statrs::function::gamma::ln_gamma;

use crate::errors::Error;

/// A named prior distribution over $\theta$.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize, Serialize)]
pub enum Prior {
    /// Gamma prior with mean `shape / rate`.
    Gamma {
        /// Shape $\alpha > 0$.
        shape: f64,
        /// Rate $\beta > 0$.
        rate: f64,
    },
    /// Log-normal prior on $\log\theta$.
    LogNormal {
        /// Location $\mu$ of $\log\theta$.
        location: f64,
        /// Scale $\sigma > 0$ of $\log\theta$.
        scale: f64,
    },
}

impl Prior {
    /// Rejects malformed hyperparameters before a run starts.
    pub fn validate(&self) -> Result<(), Error> {
        match *self {
            Self::Gamma { shape, rate } => {
                if !shape.is_finite() || shape <= 0.0 {
                    return Err(Error::InvalidParameter {
                        name: "gamma shape",
                        value: shape,
                    });
                }
                if !rate.is_finite() || rate <= 0.0 {
                    return Err(Error::InvalidParameter {
                        name: "gamma rate",
                        value: rate,
                    });
                }
            }
            Self::LogNormal { location, scale } => {
                if !location.is_finite() {
                    return Err(Error::InvalidParameter {
                        name: "log-normal location",
                        value: location,
                    });
                }
                if !scale.is_finite() || scale <= 0.0 {
                    return Err(Error::InvalidParameter {
                        name: "log-normal scale",
                        value: scale,
                    });
                }
            }
        }

        Ok(())
    }

    /// The prior mean of $\theta$.
    pub fn mean(&self) -> f64 {
        match *self {
            Self::Gamma { shape, rate } => shape / rate,
            Self::LogNormal { location, scale } => (location + 0.5 * scale * scale).exp(),
        }
    }

    /// The log-density at `theta`, which must be positive and finite.
    pub fn log_density(&self, theta: f64) -> Result<f64, Error> {
        self.validate()?;

        if !theta.is_finite() || theta <= 0.0 {
            return Err(Error::InvalidParameter {
                name: "theta",
                value: theta,
            });
        }

        let log_density = match *self {
            Self::Gamma { shape, rate } => {
                shape * rate.ln() - ln_gamma(shape) + (shape - 1.0) * theta.ln() - rate * theta
            }
            Self::LogNormal { location, scale } => {
                let z = (theta.ln() - location) / scale;

                -theta.ln()
                    - scale.ln()
                    - 0.5 * (2.0 * std::f64::consts::PI).ln()
                    - 0.5 * z * z
            }
        };

        Ok(log_density)
    }

    /// Draws one value of $\theta$ from the prior.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<f64, Error> {
        self.validate()?;

        let draw = match *self {
            Self::Gamma { shape, rate } => {
                // rand_distr uses shape-scale, so scale = 1/rate
                rand_distr::Gamma::new(shape, 1.0 / rate)
                    .map_err(|_| Error::InvalidParameter {
                        name: "gamma shape",
                        value: shape,
                    })?
                    .sample(rng)
            }
            Self::LogNormal { location, scale } => rand_distr::LogNormal::new(location, scale)
                .map_err(|_| Error::InvalidParameter {
                    name: "log-normal scale",
                    value: scale,
                })?
                .sample(rng),
        };

        Ok(draw)
    }
}
