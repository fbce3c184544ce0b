//! # Cross-Entropy Default
//!
//! The `cross-entropy-default` crate estimates the probability of a rare event, simultaneous
//! default across a set of obligors with correlated, randomly distributed incomes, using the
//! Cross-Entropy method for adaptive importance sampling. It then compares that estimator with
//! naive Monte Carlo.
//!
//! ## Features
//!
//! - **Random variables:** The [`RandomVariable`] trait covers likelihood evaluation, sampling and
//!   moment matching; [`LogNormal`] implements it.
//! - **Scenarios:** A [`Model`] draws joint income [`Scenario`]s and a [`DefaultProblem`] scores
//!   them by the number of obligors in default.
//! - **Cross-Entropy optimization:** [`CrossEntropyOptimizer`] reshapes a copy of the true model
//!   towards scenarios with several simultaneous defaults.
//! - **Estimators:** [`run_plain_batch`] and [`run_importance_batch`] accumulate
//!   [`SamplingStatistics`] under the true model and the optimized model respectively.
//! - **Experiments:** [`run_experiment`] ties everything together with a single seeded generator.
//!
//! ## Examples
//!
//! ```rust
//! use cross_entropy_default::{
//!     run_importance_batch, run_plain_batch, CrossEntropyConfig, CrossEntropyOptimizer,
//!     DefaultProblem, Method, Model, WeightPolicy,
//! };
//! use rand::{rngs::StdRng, SeedableRng};
//!
//! let problem = DefaultProblem::uniform(4, 500.0).unwrap();
//! let truth = Model::log_normal(&[2000.0; 5], 1.0).unwrap();
//! let mut rng = StdRng::seed_from_u64(35153);
//!
//! let optimized = CrossEntropyOptimizer::new(&problem, &truth, CrossEntropyConfig::default())
//!     .unwrap()
//!     .run(&mut rng)
//!     .unwrap();
//!
//! let plain = run_plain_batch(&mut rng, &problem, &truth, 1_000).unwrap();
//! let weighted = run_importance_batch(
//!     &mut rng,
//!     &problem,
//!     &truth,
//!     &optimized.sampling,
//!     1_000,
//!     WeightPolicy::default(),
//! )
//! .unwrap();
//!
//! println!("{:?}", plain.report(Method::Standard));
//! println!("{:?}", weighted.report(Method::ImportanceSample));
//! ```
//!
//! ## Limitations
//!
//! - Coordinates are independent; correlation only enters through the shared external factor.
//! - Runs are single-threaded so that a seed fully determines the output.

pub mod cross_entropy;
pub mod distribution;
pub mod error;
pub mod estimator;
pub mod experiment;
pub mod scenario;

pub use cross_entropy::{
    CrossEntropyConfig, CrossEntropyOptimizer, EliteWeighting, Optimization, RoundOutcome, RoundSummary,
};
pub use distribution::{LogNormal, RandomVariable};
pub use error::{Error, Result};
pub use estimator::{
    run_importance_batch, run_plain_batch, Admission, BatchReport, Method, ReplicationSummary, SamplingStatistics,
    WeightPolicy,
};
pub use experiment::{run_experiment, run_experiment_with_rng, ExperimentConfig, ExperimentReport, RepetitionFailure};
pub use scenario::{DefaultProblem, Model, Scenario, ScoredScenario};
