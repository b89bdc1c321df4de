//! Distributions sampled for packet lengths and send delays.

use rand_core::RngCore;
use rand_distr::{Distribution, LogNormal, Normal, Weibull};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::Error;

/// DistType represents the type of a [`Dist`]. Uses the [`rand_distr`] crate
/// for sampling.
#[derive(Debug, PartialEq, Clone, Copy, Serialize, Deserialize)]
pub enum DistType {
    /// Uniformly random [low, high). If low == high, constant.
    Uniform {
        /// The lower bound of the distribution.
        low: f64,
        /// The upper bound of the distribution.
        high: f64,
    },
    /// Normal distribution with set mean and standard deviation.
    Normal {
        /// The mean of the distribution.
        mean: f64,
        /// The standard deviation of the distribution.
        stdev: f64,
    },
    /// LogNormal distribution with set mu and sigma.
    LogNormal {
        /// The mu of the distribution.
        mu: f64,
        /// The sigma of the distribution.
        sigma: f64,
    },
    /// Weibull distribution with set scale and shape. Useful for occurrence
    /// of independent events at a given rate.
    Weibull {
        /// The scale of the distribution.
        scale: f64,
        /// The shape of the distribution.
        shape: f64,
    },
}

impl fmt::Display for DistType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// A distribution for sampling packet lengths (bytes) or delays (ms). The
/// sampled value is clamped to the range [0.0, max] if max is set.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Dist {
    /// The type of distribution.
    pub dist: DistType,
    /// The starting value that the sampled value is added to.
    pub start: f64,
    /// The maximum value that can be sampled (including starting value).
    pub max: f64,
}

impl fmt::Display for Dist {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.max > 0.0 {
            write!(f, "{}, start {}, clamped to [0.0, {}]", self.dist, self.start, self.max)
        } else {
            write!(f, "{}, start {}", self.dist, self.start)
        }
    }
}

impl Dist {
    /// Create a new [`Dist`].
    pub fn new(dist: DistType, start: f64, max: f64) -> Self {
        Dist { dist, start, max }
    }

    /// A degenerate distribution that always samples `value`. Used by the
    /// constant-size defenses for their fixed payload length.
    pub fn fixed(value: f64) -> Self {
        Dist {
            dist: DistType::Uniform {
                low: value,
                high: value,
            },
            start: 0.0,
            max: 0.0,
        }
    }

    /// Validate that the parameters are valid for the set [`DistType`].
    pub fn validate(&self) -> Result<(), Error> {
        match self.dist {
            DistType::Uniform { low, high } => {
                if low.is_nan() || high.is_nan() {
                    Err(Error::Config(
                        "for Uniform dist, got low or high as NaN".to_string(),
                    ))?;
                }
                if low.is_infinite() || high.is_infinite() {
                    Err(Error::Config(
                        "for Uniform dist, got low or high as infinite".to_string(),
                    ))?;
                }
                if low > high {
                    Err(Error::Config("for Uniform dist, got low > high".to_string()))?;
                }
            }
            DistType::Normal { mean, stdev } => {
                Normal::new(mean, stdev).map_err(|e| Error::Config(e.to_string()))?;
            }
            DistType::LogNormal { mu, sigma } => {
                LogNormal::new(mu, sigma).map_err(|e| Error::Config(e.to_string()))?;
            }
            DistType::Weibull { scale, shape } => {
                Weibull::new(scale, shape).map_err(|e| Error::Config(e.to_string()))?;
            }
        }

        Ok(())
    }

    /// Sample the distribution. May panic if not valid (see
    /// [`Self::validate()`]).
    pub fn sample<R: RngCore>(self, rng: &mut R) -> f64 {
        let sampled = self.dist_sample(rng);
        let mut r: f64 = 0.0;
        let adjusted = sampled + self.start;

        // catches NaN/inf from the sample or the addition
        if !adjusted.is_finite() {
            return 0.0;
        }

        r = r.max(adjusted);
        if self.max > 0.0 {
            let clamped = r.min(self.max);
            return if clamped.is_finite() { clamped } else { 0.0 };
        }
        r
    }

    fn dist_sample<R: RngCore>(self, rng: &mut R) -> f64 {
        use rand::Rng;
        match self.dist {
            DistType::Uniform { low, high } => {
                // special common case for fixed lengths and periods, also not
                // supported by rand_distr::Uniform
                if low == high {
                    return low;
                }
                rng.gen_range(low..high)
            }
            DistType::Normal { mean, stdev } => Normal::new(mean, stdev).unwrap().sample(rng),
            DistType::LogNormal { mu, sigma } => LogNormal::new(mu, sigma).unwrap().sample(rng),
            DistType::Weibull { scale, shape } => Weibull::new(scale, shape).unwrap().sample(rng),
        }
    }
}
