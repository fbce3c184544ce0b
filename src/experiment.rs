//! The full default experiment: optimize a sampling model, run a large
//! reference batch, then repeated standard and importance-sampling batches.

use log::{error, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::cross_entropy::{CrossEntropyConfig, CrossEntropyOptimizer, Optimization};
use crate::error::{Error, Result};
use crate::estimator::{run_importance_batch, run_plain_batch, BatchReport, Method, ReplicationSummary, WeightPolicy};
use crate::scenario::{DefaultProblem, Model};

/// Fixed parameters of one experiment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    pub seed: u64,
    /// Payment owed by each obligor; its length is the number of obligors.
    pub payments: Vec<f64>,
    /// True mean income of each obligor.
    pub obligor_means: Vec<f64>,
    /// True mean of the shared external income factor.
    pub external_mean: f64,
    /// Log-normal scale of every true income.
    pub shape: f64,
    pub cross_entropy: CrossEntropyConfig,
    /// Trials in the reference batch; 0 skips it.
    pub baseline_trials: usize,
    /// Draws per standard or importance-sampling batch.
    pub estimate_sample_size: usize,
    /// Number of batches per method.
    pub repetitions: usize,
    pub weights: WeightPolicy,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        ExperimentConfig {
            seed: 35153,
            payments: vec![500.0; 4],
            obligor_means: vec![2000.0; 4],
            external_mean: 2000.0,
            shape: 1.0,
            cross_entropy: CrossEntropyConfig::default(),
            baseline_trials: 1_000_000,
            estimate_sample_size: 100,
            repetitions: 1000,
            weights: WeightPolicy::default(),
        }
    }
}

impl ExperimentConfig {
    /// Checks the whole configuration before anything is drawn.
    pub fn validate(&self) -> Result<()> {
        if self.payments.len() != self.obligor_means.len() {
            return Err(Error::InvalidConfig(format!(
                "{} payments but {} obligor means",
                self.payments.len(),
                self.obligor_means.len()
            )));
        }
        if self.estimate_sample_size == 0 {
            return Err(Error::InvalidConfig("estimate sample size must be positive".into()));
        }
        if let Some(cap) = self.weights.cap {
            if !(cap.is_finite() && cap > 0.0) {
                return Err(Error::InvalidConfig(format!("weight cap {cap} must be positive and finite")));
            }
        }
        self.cross_entropy.validate()?;
        self.problem()?;
        self.true_model()?;
        Ok(())
    }

    /// The obligors and their payments.
    pub fn problem(&self) -> Result<DefaultProblem> {
        DefaultProblem::new(self.payments.clone())
    }

    /// Independent log-normal incomes: obligors first, external factor last.
    pub fn true_model(&self) -> Result<Model> {
        let mut means = self.obligor_means.clone();
        means.push(self.external_mean);
        Model::log_normal(&means, self.shape)
    }
}

/// A batch that failed without stopping the experiment.
#[derive(Debug, Clone, PartialEq)]
pub struct RepetitionFailure {
    pub method: Method,
    /// `None` for failures outside the repeated batches (optimization, reference).
    pub repetition: Option<usize>,
    pub error: Error,
}

/// Everything one experiment produced.
#[derive(Debug, Clone)]
pub struct ExperimentReport {
    pub true_model: Model,
    /// `None` when the optimization failed; importance batches are then skipped.
    pub optimization: Option<Optimization>,
    pub baseline: Option<BatchReport>,
    /// Repeated standard and importance-sampling batches, in run order.
    pub batches: Vec<BatchReport>,
    pub failures: Vec<RepetitionFailure>,
}

impl ExperimentReport {
    /// Spread of the repeated batches of `method`; `None` if none succeeded.
    pub fn summary(&self, method: Method) -> Option<ReplicationSummary> {
        ReplicationSummary::from_reports(method, &self.batches)
    }
}

/// Runs the experiment with a generator seeded from `config.seed`.
///
/// # Example
///
/// ```rust
/// use cross_entropy_default::{run_experiment, ExperimentConfig, Method};
///
/// let config = ExperimentConfig {
///     baseline_trials: 10_000,
///     repetitions: 5,
///     ..ExperimentConfig::default()
/// };
/// let report = run_experiment(&config)?;
/// assert!(report.failures.is_empty());
/// assert_eq!(report.summary(Method::Standard).map(|s| s.replications), Some(5));
/// # Ok::<(), cross_entropy_default::Error>(())
/// ```
pub fn run_experiment(config: &ExperimentConfig) -> Result<ExperimentReport> {
    let mut rng = StdRng::seed_from_u64(config.seed);
    run_experiment_with_rng(config, &mut rng)
}

/// Runs the experiment drawing everything from `rng`, in a fixed order:
/// optimization, reference batch, standard batches, importance batches.
///
/// Configuration errors abort the run. Errors of a single batch or of the
/// optimization are recorded in [`ExperimentReport::failures`].
pub fn run_experiment_with_rng<R: Rng + ?Sized>(config: &ExperimentConfig, rng: &mut R) -> Result<ExperimentReport> {
    config.validate()?;
    let problem = config.problem()?;
    let truth = config.true_model()?;
    let mut failures = Vec::new();

    info!(
        "optimizing sampling model: {} rounds of {} scenarios",
        config.cross_entropy.rounds, config.cross_entropy.sample_size
    );
    let optimization = match CrossEntropyOptimizer::new(&problem, &truth, config.cross_entropy.clone())?.run(rng) {
        Ok(optimization) => {
            info!(
                "optimized sampling model {} ({} skipped rounds)",
                optimization.sampling,
                optimization.skipped_rounds()
            );
            Some(optimization)
        }
        Err(err) => {
            error!("cross-entropy optimization failed: {}", err);
            failures.push(RepetitionFailure {
                method: Method::ImportanceSample,
                repetition: None,
                error: err,
            });
            None
        }
    };

    let baseline = if config.baseline_trials > 0 {
        info!("running reference batch of {} trials", config.baseline_trials);
        match run_plain_batch(rng, &problem, &truth, config.baseline_trials) {
            Ok(stats) => Some(stats.report(Method::Large)),
            Err(err) => {
                error!("reference batch failed: {}", err);
                failures.push(RepetitionFailure {
                    method: Method::Large,
                    repetition: None,
                    error: err,
                });
                None
            }
        }
    } else {
        None
    };

    let mut batches = Vec::with_capacity(2 * config.repetitions);
    info!("running {} standard batches", config.repetitions);
    for rep in 0..config.repetitions {
        match run_plain_batch(rng, &problem, &truth, config.estimate_sample_size) {
            Ok(stats) => batches.push(stats.report(Method::Standard)),
            Err(err) => record_failure(&mut failures, Method::Standard, rep, err),
        }
    }

    if let Some(optimization) = &optimization {
        info!("running {} importance-sampling batches", config.repetitions);
        for rep in 0..config.repetitions {
            match run_importance_batch(
                rng,
                &problem,
                &truth,
                &optimization.sampling,
                config.estimate_sample_size,
                config.weights,
            ) {
                Ok(stats) => batches.push(stats.report(Method::ImportanceSample)),
                Err(err) => record_failure(&mut failures, Method::ImportanceSample, rep, err),
            }
        }
    }

    Ok(ExperimentReport {
        true_model: truth,
        optimization,
        baseline,
        batches,
        failures,
    })
}

fn record_failure(failures: &mut Vec<RepetitionFailure>, method: Method, rep: usize, err: Error) {
    error!("{} repetition {} failed: {}", method, rep, err);
    failures.push(RepetitionFailure {
        method,
        repetition: Some(rep),
        error: err,
    });
}
