//! Standard Monte Carlo and importance-sampling estimators of the default
//! statistics, and the per-batch accumulator they share.

use std::fmt;

use log::warn;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::scenario::{DefaultProblem, Model};

/// Which estimator produced a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Method {
    /// Large plain batch on the true model, used as the reference value.
    Large,
    Standard,
    ImportanceSample,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Method::Large => "Large",
            Method::Standard => "Standard",
            Method::ImportanceSample => "ImportanceSample",
        };
        f.write_str(name)
    }
}

/// Handling of importance weights before they enter the running sums.
///
/// Non-finite weights are always rejected. Finite weights above `cap`, when
/// set, are clamped to it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeightPolicy {
    pub cap: Option<f64>,
}

/// Verdict of [`WeightPolicy::admit`] on a single weight.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Admission {
    /// The weight enters the sums unchanged.
    Accepted(f64),
    /// The weight exceeded the cap and enters the sums as the cap.
    Capped(f64),
    /// NaN, infinite or negative; the sample only enters the raw counts.
    Rejected,
}

impl WeightPolicy {
    /// Classifies one importance weight.
    pub fn admit(&self, weight: f64) -> Admission {
        if !weight.is_finite() || weight < 0.0 {
            return Admission::Rejected;
        }
        match self.cap {
            Some(cap) if weight > cap => Admission::Capped(cap),
            _ => Admission::Accepted(weight),
        }
    }
}

/// Running totals over one batch of draws.
///
/// Every sample enters through exactly one of [`record`](Self::record),
/// [`record_capped`](Self::record_capped) or
/// [`record_rejected`](Self::record_rejected).
///
/// # Example
///
/// ```rust
/// use cross_entropy_default::SamplingStatistics;
///
/// let mut stats = SamplingStatistics::new(4);
/// stats.record(0, 1.0);
/// stats.record(2, 1.0);
/// assert_eq!(stats.samples(), 2);
/// assert!((stats.default_rate_estimate() - 0.25).abs() < 1e-12);
/// assert_eq!(stats.expected_defaults_given_default(), Some(2.0));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct SamplingStatistics {
    obligors: usize,
    samples: usize,
    /// Σ weight × (defaults / obligors)
    sum_default_rate: f64,
    /// Σ weight × defaults, over samples with at least one default
    sum_weighted_default_count: f64,
    /// Σ weight, over samples with at least one default
    sum_weight_with_default: f64,
    /// Unweighted count of samples with at least one default.
    samples_with_default: usize,
    rejected_weights: usize,
    capped_weights: usize,
}

impl SamplingStatistics {
    /// Empty accumulator for a problem with `obligors` obligors.
    pub fn new(obligors: usize) -> Self {
        SamplingStatistics {
            obligors,
            samples: 0,
            sum_default_rate: 0.0,
            sum_weighted_default_count: 0.0,
            sum_weight_with_default: 0.0,
            samples_with_default: 0,
            rejected_weights: 0,
            capped_weights: 0,
        }
    }

    /// Adds one sample with `score` defaults and importance weight `weight`.
    pub fn record(&mut self, score: u32, weight: f64) {
        self.samples += 1;
        self.sum_default_rate += weight * f64::from(score) / self.obligors as f64;
        if score > 0 {
            self.samples_with_default += 1;
            self.sum_weight_with_default += weight;
            self.sum_weighted_default_count += weight * f64::from(score);
        }
    }

    /// Adds a sample whose weight was clamped to `capped_weight`.
    pub fn record_capped(&mut self, score: u32, capped_weight: f64) {
        self.capped_weights += 1;
        self.record(score, capped_weight);
    }

    /// Counts a sample whose weight was rejected. It contributes to the raw
    /// counts only.
    pub fn record_rejected(&mut self, score: u32) {
        self.samples += 1;
        self.rejected_weights += 1;
        if score > 0 {
            self.samples_with_default += 1;
        }
    }

    pub fn samples(&self) -> usize {
        self.samples
    }

    /// Unweighted count of samples with at least one default.
    pub fn samples_with_default(&self) -> usize {
        self.samples_with_default
    }

    pub fn rejected_weights(&self) -> usize {
        self.rejected_weights
    }

    pub fn capped_weights(&self) -> usize {
        self.capped_weights
    }

    fn per_sample(&self, total: f64) -> f64 {
        if self.samples == 0 {
            0.0
        } else {
            total / self.samples as f64
        }
    }

    /// Weighted mean of the per-sample default rate.
    pub fn default_rate_estimate(&self) -> f64 {
        self.per_sample(self.sum_default_rate)
    }

    /// Weighted share of samples with at least one default.
    pub fn prob_at_least_one_default(&self) -> f64 {
        self.per_sample(self.sum_weight_with_default)
    }

    /// `None` when no weighted default was observed.
    pub fn expected_defaults_given_default(&self) -> Option<f64> {
        if self.sum_weight_with_default > 0.0 {
            Some(self.sum_weighted_default_count / self.sum_weight_with_default)
        } else {
            None
        }
    }

    /// Raw share of drawn scenarios with at least one default.
    pub fn proportion_with_default(&self) -> f64 {
        self.per_sample(self.samples_with_default as f64)
    }

    /// Freezes the derived fields into a report row.
    pub fn report(&self, method: Method) -> BatchReport {
        BatchReport {
            method,
            sample_count: self.samples,
            default_rate_estimate: self.default_rate_estimate(),
            prob_at_least_one_default: self.prob_at_least_one_default(),
            expected_defaults_given_default: self.expected_defaults_given_default(),
            proportion_with_default: self.proportion_with_default(),
            rejected_weights: self.rejected_weights,
            capped_weights: self.capped_weights,
        }
    }
}

/// Finalized statistics of one batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub method: Method,
    pub sample_count: usize,
    pub default_rate_estimate: f64,
    pub prob_at_least_one_default: f64,
    pub expected_defaults_given_default: Option<f64>,
    pub proportion_with_default: f64,
    pub rejected_weights: usize,
    pub capped_weights: usize,
}

fn check_trials(trials: usize) -> Result<()> {
    if trials == 0 {
        return Err(Error::InvalidConfig("a batch needs at least one trial".into()));
    }
    Ok(())
}

/// Plain Monte Carlo: draws `trials` scenarios from `model`, each with weight 1.
pub fn run_plain_batch<R: Rng + ?Sized>(
    rng: &mut R,
    problem: &DefaultProblem,
    model: &Model,
    trials: usize,
) -> Result<SamplingStatistics> {
    check_trials(trials)?;
    problem.check_model(model)?;
    let mut stats = SamplingStatistics::new(problem.obligors());
    for _ in 0..trials {
        let drawn = problem.draw(model, rng);
        stats.record(drawn.score, 1.0);
    }
    Ok(stats)
}

/// Importance sampling: draws from `sampling` and weights every sample by the
/// likelihood ratio `truth(x) / sampling(x)`, which keeps the estimates
/// unbiased under `truth`.
///
/// # Example
///
/// ```rust
/// use cross_entropy_default::{run_importance_batch, DefaultProblem, Method, Model, WeightPolicy};
/// use rand::{rngs::StdRng, SeedableRng};
///
/// let problem = DefaultProblem::uniform(4, 500.0)?;
/// let truth = Model::log_normal(&[2000.0; 5], 1.0)?;
/// let sampling = Model::log_normal(&[2000.0, 2000.0, 2000.0, 2000.0, 500.0], 1.0)?;
/// let mut rng = StdRng::seed_from_u64(3);
///
/// let stats = run_importance_batch(&mut rng, &problem, &truth, &sampling, 1_000, WeightPolicy::default())?;
/// let report = stats.report(Method::ImportanceSample);
/// assert_eq!(report.sample_count, 1_000);
/// assert!(report.default_rate_estimate > 0.0);
/// # Ok::<(), cross_entropy_default::Error>(())
/// ```
pub fn run_importance_batch<R: Rng + ?Sized>(
    rng: &mut R,
    problem: &DefaultProblem,
    truth: &Model,
    sampling: &Model,
    trials: usize,
    policy: WeightPolicy,
) -> Result<SamplingStatistics> {
    check_trials(trials)?;
    problem.check_model(truth)?;
    problem.check_model(sampling)?;
    let mut stats = SamplingStatistics::new(problem.obligors());
    for _ in 0..trials {
        let drawn = problem.draw(sampling, rng);
        let log_ratio = truth.log_density(&drawn.scenario) - sampling.log_density(&drawn.scenario);
        match policy.admit(log_ratio.exp()) {
            Admission::Accepted(wt) => stats.record(drawn.score, wt),
            Admission::Capped(wt) => stats.record_capped(drawn.score, wt),
            Admission::Rejected => stats.record_rejected(drawn.score),
        }
    }

    if stats.rejected_weights == trials {
        return Err(Error::AllWeightsRejected { trials });
    }
    if stats.rejected_weights > 0 {
        warn!("rejected {} of {} non-finite importance weights", stats.rejected_weights, trials);
    }
    if stats.capped_weights > 0 {
        warn!("capped {} of {} importance weights", stats.capped_weights, trials);
    }
    Ok(stats)
}

/// Spread of the default-rate estimate across repeated batches of one method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicationSummary {
    pub method: Method,
    pub replications: usize,
    pub mean: f64,
    /// Sample variance (n - 1 denominator).
    pub variance: f64,
    pub min: f64,
    pub max: f64,
}

impl ReplicationSummary {
    /// Summarizes the reports of `method`; `None` if there are none.
    pub fn from_reports(method: Method, reports: &[BatchReport]) -> Option<Self> {
        let values: Vec<f64> = reports
            .iter()
            .filter(|r| r.method == method)
            .map(|r| r.default_rate_estimate)
            .collect();
        let n = values.len();
        if n == 0 {
            return None;
        }
        let mean = values.iter().sum::<f64>() / n as f64;
        let variance = if n > 1 {
            values.iter().map(|&x| (x - mean).powi(2)).sum::<f64>() / ((n - 1) as f64)
        } else {
            0.0
        };
        let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
        let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        Some(ReplicationSummary {
            method,
            replications: n,
            mean,
            variance,
            min,
            max,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distribution::{LogNormal, RandomVariable};
    use approx::assert_relative_eq;
    use rand::{rngs::StdRng, RngCore, SeedableRng};

    fn rare_setup() -> (DefaultProblem, Model, Model) {
        let problem = DefaultProblem::uniform(4, 500.0).unwrap();
        let truth = Model::log_normal(&[2000.0; 5], 1.0).unwrap();
        // only the shared external factor is pushed towards default
        let sampling = Model::log_normal(&[2000.0, 2000.0, 2000.0, 2000.0, 500.0], 1.0).unwrap();
        (problem, truth, sampling)
    }

    #[test]
    fn test_plain_batch_on_fixed_incomes() {
        let problem = DefaultProblem::uniform(2, 500.0).unwrap();
        // zero scale pins every draw to its mean: totals 200 and 1100
        let model = Model::log_normal(&[100.0, 1000.0, 100.0], 0.0).unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        let stats = run_plain_batch(&mut rng, &problem, &model, 50).unwrap();

        let report = stats.report(Method::Standard);
        assert_eq!(report.sample_count, 50);
        assert_relative_eq!(report.default_rate_estimate, 0.5);
        assert_relative_eq!(report.prob_at_least_one_default, 1.0);
        assert_relative_eq!(report.expected_defaults_given_default.unwrap(), 1.0);
        assert_relative_eq!(report.proportion_with_default, 1.0);

        let safe = Model::log_normal(&[1000.0, 1000.0, 1000.0], 0.0).unwrap();
        let report = run_plain_batch(&mut rng, &problem, &safe, 10).unwrap().report(Method::Standard);
        assert_eq!(report.default_rate_estimate, 0.0);
        assert_eq!(report.expected_defaults_given_default, None);
    }

    #[test]
    fn test_record_weighted_samples() {
        let mut stats = SamplingStatistics::new(4);
        stats.record(0, 3.0);
        stats.record(2, 0.5);
        stats.record(4, 0.25);
        stats.record_rejected(1);

        assert_eq!(stats.samples(), 4);
        assert_eq!(stats.samples_with_default(), 3);
        assert_eq!(stats.rejected_weights(), 1);
        assert_eq!(stats.capped_weights(), 0);
        let uncapped = stats.clone();
        // (0.5 * 2/4 + 0.25 * 4/4) / 4
        assert_relative_eq!(stats.default_rate_estimate(), 0.125);
        assert_relative_eq!(stats.prob_at_least_one_default(), 0.75 / 4.0);
        assert_relative_eq!(stats.expected_defaults_given_default().unwrap(), 2.0 / 0.75);
        assert_relative_eq!(stats.proportion_with_default(), 0.75);

        let mut capped = uncapped.clone();
        capped.record_capped(4, 1.0);
        let mut plain = uncapped;
        plain.record(4, 1.0);
        assert_eq!(capped.capped_weights(), 1);
        assert_eq!(capped.samples(), 5);
        assert_relative_eq!(capped.default_rate_estimate(), plain.default_rate_estimate());
        assert_eq!(capped.report(Method::ImportanceSample).capped_weights, 1);
    }

    #[test]
    fn test_weight_policy() {
        let open = WeightPolicy::default();
        assert_eq!(open.admit(1e300), Admission::Accepted(1e300));
        assert_eq!(open.admit(0.0), Admission::Accepted(0.0));
        assert_eq!(open.admit(f64::INFINITY), Admission::Rejected);
        assert_eq!(open.admit(f64::NAN), Admission::Rejected);

        let capped = WeightPolicy { cap: Some(10.0) };
        assert_eq!(capped.admit(20.0), Admission::Capped(10.0));
        assert_eq!(capped.admit(2.0), Admission::Accepted(2.0));
    }

    #[test]
    fn test_capped_batch_counts_and_lowers_weights() {
        let (problem, truth, sampling) = rare_setup();
        let open =
            run_importance_batch(&mut StdRng::seed_from_u64(12), &problem, &truth, &sampling, 2_000, WeightPolicy::default())
                .unwrap();
        let capped = run_importance_batch(
            &mut StdRng::seed_from_u64(12),
            &problem,
            &truth,
            &sampling,
            2_000,
            WeightPolicy { cap: Some(1.0) },
        )
        .unwrap();

        assert_eq!(open.capped_weights(), 0);
        // roughly a quarter of the external draws land where the true density is larger
        assert!(capped.capped_weights() > 100, "only {} weights capped", capped.capped_weights());
        assert_eq!(capped.samples(), open.samples());
        assert_eq!(capped.samples_with_default(), open.samples_with_default());
        assert!(capped.prob_at_least_one_default() <= open.prob_at_least_one_default());
        assert!(capped.default_rate_estimate() <= open.default_rate_estimate());
    }

    #[test]
    fn test_importance_batch_with_true_sampling_matches_plain() {
        let (problem, truth, _) = rare_setup();
        let plain = run_plain_batch(&mut StdRng::seed_from_u64(9), &problem, &truth, 5_000).unwrap();
        let same = truth.clone();
        let weighted = run_importance_batch(
            &mut StdRng::seed_from_u64(9),
            &problem,
            &truth,
            &same,
            5_000,
            WeightPolicy::default(),
        )
        .unwrap();
        assert_eq!(plain.samples_with_default(), weighted.samples_with_default());
        assert_relative_eq!(plain.default_rate_estimate(), weighted.default_rate_estimate(), max_relative = 1e-12);
    }

    #[test]
    fn test_estimators_converge_to_reference() {
        let (problem, truth, sampling) = rare_setup();
        let mut rng = StdRng::seed_from_u64(35153);

        let reference = run_plain_batch(&mut rng, &problem, &truth, 1_000_000).unwrap();
        let standard = run_plain_batch(&mut rng, &problem, &truth, 1_000_000).unwrap();
        let importance =
            run_importance_batch(&mut rng, &problem, &truth, &sampling, 200_000, WeightPolicy::default()).unwrap();

        let target = reference.default_rate_estimate();
        assert!(target > 0.0 && target < 0.01, "not a rare-event setup: {}", target);
        for (name, estimate) in [
            ("standard", standard.default_rate_estimate()),
            ("importance", importance.default_rate_estimate()),
        ] {
            let rel = (estimate - target).abs() / target;
            assert!(rel < 0.05, "{} estimate {} is {:.3} away from {}", name, estimate, rel, target);
        }
        let rel = (importance.prob_at_least_one_default() - reference.prob_at_least_one_default()).abs()
            / reference.prob_at_least_one_default();
        assert!(rel < 0.05, "probability of a default off by {:.3}", rel);
        assert_eq!(importance.rejected_weights(), 0);
    }

    #[test]
    fn test_importance_sampling_reduces_variance() {
        let (problem, truth, sampling) = rare_setup();
        let mut rng = StdRng::seed_from_u64(77);
        let mut reports = Vec::new();
        for _ in 0..200 {
            let stats = run_plain_batch(&mut rng, &problem, &truth, 100).unwrap();
            reports.push(stats.report(Method::Standard));
        }
        for _ in 0..200 {
            let stats = run_importance_batch(&mut rng, &problem, &truth, &sampling, 100, WeightPolicy::default()).unwrap();
            reports.push(stats.report(Method::ImportanceSample));
        }

        let standard = ReplicationSummary::from_reports(Method::Standard, &reports).unwrap();
        let importance = ReplicationSummary::from_reports(Method::ImportanceSample, &reports).unwrap();
        assert_eq!(standard.replications, 200);
        assert!(
            importance.variance < standard.variance,
            "importance variance {} not below standard variance {}",
            importance.variance,
            standard.variance
        );
        assert!(ReplicationSummary::from_reports(Method::Large, &reports).is_none());
    }

    /// Density that cannot be evaluated.
    #[derive(Debug, Clone, Copy)]
    struct Opaque(LogNormal);

    impl fmt::Display for Opaque {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "opaque({})", self.0)
        }
    }

    impl RandomVariable for Opaque {
        fn family(&self) -> &'static str {
            "opaque"
        }
        fn log_prob(&self, _v: f64) -> f64 {
            f64::NAN
        }
        fn generate(&self, rng: &mut dyn RngCore) -> f64 {
            self.0.generate(rng)
        }
        fn expectation(&self) -> f64 {
            self.0.expectation()
        }
        fn set_expectation(&mut self, mean: f64) -> Result<()> {
            self.0.set_expectation(mean)
        }
        fn set_expectation_with_shape(&mut self, mean: f64, shape: f64) -> Result<()> {
            self.0.set_expectation_with_shape(mean, shape)
        }
        fn copy(&self) -> Box<dyn RandomVariable> {
            Box::new(*self)
        }
    }

    #[test]
    fn test_all_rejected_weights_fail_the_batch() {
        let problem = DefaultProblem::uniform(1, 500.0).unwrap();
        let truth = Model::log_normal(&[2000.0, 2000.0], 1.0).unwrap();
        let base = LogNormal::with_mean(2000.0, 1.0).unwrap();
        let variables: Vec<Box<dyn RandomVariable>> = vec![Box::new(Opaque(base)), Box::new(Opaque(base))];
        let sampling = Model::new(variables);
        let mut rng = StdRng::seed_from_u64(4);

        let err = run_importance_batch(&mut rng, &problem, &truth, &sampling, 25, WeightPolicy::default()).unwrap_err();
        assert_eq!(err, Error::AllWeightsRejected { trials: 25 });
    }

    #[test]
    fn test_batch_argument_checks() {
        let (problem, truth, _) = rare_setup();
        let mut rng = StdRng::seed_from_u64(2);
        assert!(matches!(
            run_plain_batch(&mut rng, &problem, &truth, 0),
            Err(Error::InvalidConfig(_))
        ));
        let short = Model::log_normal(&[2000.0; 2], 1.0).unwrap();
        assert!(matches!(
            run_importance_batch(&mut rng, &problem, &truth, &short, 10, WeightPolicy::default()),
            Err(Error::DimensionMismatch { expected: 5, found: 2 })
        ));
    }
}
