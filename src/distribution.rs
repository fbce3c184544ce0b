//! Parametric random variables that support likelihood evaluation, sampling
//! and moment-matching re-parameterization.
//!
//! The optimizer and the estimators only ever talk to [`RandomVariable`], so a
//! new family (Gamma, Normal, ...) is added by implementing the trait; nothing
//! else needs to change.

use std::f64::consts::PI;
use std::fmt;

use rand::distr::Distribution;
use rand::RngCore;
use rand_distr::LogNormal as LogNormalSampler;

use crate::error::{Error, Result};

/// Capabilities a distribution must offer to take part in cross-entropy
/// optimization.
pub trait RandomVariable: fmt::Debug + fmt::Display {
    /// Short family name used in diagnostics, e.g. `"log-normal"`.
    fn family(&self) -> &'static str;

    /// Log-density at `v`. Finite inside the support, `-inf` outside it.
    fn log_prob(&self, v: f64) -> f64;

    /// Draws one value from the distribution.
    fn generate(&self, rng: &mut dyn RngCore) -> f64;

    /// Mean under the current parameters.
    fn expectation(&self) -> f64;

    /// Re-parameterizes so that `expectation() == mean`, resetting the shape
    /// parameter to the family default.
    fn set_expectation(&mut self, mean: f64) -> Result<()>;

    /// Re-parameterizes so that `expectation() == mean` while holding the
    /// shape parameter at `shape`.
    ///
    /// On error the variable keeps its previous parameters.
    fn set_expectation_with_shape(&mut self, mean: f64, shape: f64) -> Result<()>;

    /// Independent value copy.
    fn copy(&self) -> Box<dyn RandomVariable>;

    /// Returns a re-parameterized copy, leaving `self` untouched.
    fn with_expectation(&self, mean: f64) -> Result<Box<dyn RandomVariable>> {
        let mut next = self.copy();
        next.set_expectation(mean)?;
        Ok(next)
    }
}

impl Clone for Box<dyn RandomVariable> {
    fn clone(&self) -> Self {
        self.copy()
    }
}

/// Log-normal distribution: the exponential of a normal variable with mean
/// `location` (μ) and standard deviation `scale` (σ).
///
/// The density is
/// f(x) = (1/(xσ√(2π))) * exp(-(ln(x)-μ)²/(2σ²)) for x > 0
/// and the mean is exp(μ + σ²/2).
///
/// With σ = 0 the variable is a point mass at exp(μ): `log_prob` is `+inf`
/// there and `-inf` everywhere else. Used as an importance-sampling proposal
/// against a continuous true model, every weight is then zero.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LogNormal {
    location: f64,
    scale: f64,
    sampler: LogNormalSampler<f64>,
}

impl LogNormal {
    pub const FAMILY: &'static str = "log-normal";

    /// Shape used by [`RandomVariable::set_expectation`].
    pub const DEFAULT_SCALE: f64 = 1.0;

    /// Creates a log-normal from its location and scale.
    pub fn new(location: f64, scale: f64) -> Result<Self> {
        let sampler = build_sampler(location, scale).map_err(|reason| Error::InvalidParameterization {
            family: Self::FAMILY,
            mean: mean_of(location, scale),
            shape: scale,
            reason,
        })?;
        Ok(LogNormal {
            location,
            scale,
            sampler,
        })
    }

    /// Creates the log-normal with the given mean and scale.
    ///
    /// ```rust
    /// use cross_entropy_default::{LogNormal, RandomVariable};
    ///
    /// let income = LogNormal::with_mean(2000.0, 1.0).unwrap();
    /// assert!((income.expectation() - 2000.0).abs() < 1e-9);
    /// ```
    pub fn with_mean(mean: f64, scale: f64) -> Result<Self> {
        let mut variable = LogNormal::new(0.0, Self::DEFAULT_SCALE)?;
        variable.set_expectation_with_shape(mean, scale)?;
        Ok(variable)
    }

    /// Mean of the underlying normal variable (μ).
    pub fn location(&self) -> f64 {
        self.location
    }

    /// Standard deviation of the underlying normal variable (σ).
    pub fn scale(&self) -> f64 {
        self.scale
    }

    fn invalid(&self, mean: f64, shape: f64, reason: impl Into<String>) -> Error {
        Error::InvalidParameterization {
            family: self.family(),
            mean,
            shape,
            reason: reason.into(),
        }
    }
}

fn mean_of(location: f64, scale: f64) -> f64 {
    (location + scale * scale / 2.0).exp()
}

fn build_sampler(location: f64, scale: f64) -> std::result::Result<LogNormalSampler<f64>, String> {
    if !location.is_finite() {
        return Err(format!("location {location} is not finite"));
    }
    if !scale.is_finite() || scale < 0.0 {
        return Err(format!("scale {scale} must be finite and non-negative"));
    }
    LogNormalSampler::new(location, scale).map_err(|e| e.to_string())
}

impl RandomVariable for LogNormal {
    fn family(&self) -> &'static str {
        Self::FAMILY
    }

    fn log_prob(&self, v: f64) -> f64 {
        if v.is_nan() || v <= 0.0 {
            return f64::NEG_INFINITY;
        }
        if self.scale == 0.0 {
            // point mass at exactly the value the sampler produces
            return if v == self.location.exp() { f64::INFINITY } else { f64::NEG_INFINITY };
        }
        let diff = v.ln() - self.location;
        let s = self.scale;
        -(diff * diff) / (2.0 * s * s) - (v * (2.0 * PI).sqrt() * s).ln()
    }

    fn generate(&self, rng: &mut dyn RngCore) -> f64 {
        self.sampler.sample(rng)
    }

    fn expectation(&self) -> f64 {
        mean_of(self.location, self.scale)
    }

    fn set_expectation(&mut self, mean: f64) -> Result<()> {
        self.set_expectation_with_shape(mean, Self::DEFAULT_SCALE)
    }

    fn set_expectation_with_shape(&mut self, mean: f64, shape: f64) -> Result<()> {
        if !shape.is_finite() || shape < 0.0 {
            return Err(self.invalid(mean, shape, "shape must be finite and non-negative"));
        }
        if !mean.is_finite() || mean <= 0.0 {
            return Err(self.invalid(mean, shape, "target mean must be positive and finite"));
        }
        let location = mean.ln() - shape * shape / 2.0;
        let sampler = build_sampler(location, shape).map_err(|reason| self.invalid(mean, shape, reason))?;
        self.location = location;
        self.scale = shape;
        self.sampler = sampler;
        Ok(())
    }

    fn copy(&self) -> Box<dyn RandomVariable> {
        Box::new(*self)
    }
}

impl fmt::Display for LogNormal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "log-normal(u={:.2}, σ={:.2})", self.location, self.scale)
    }
}
