//! Cross-Entropy optimization of the sampling model.
//!
//! Starting from a copy of the true model, each round draws a batch from the
//! working model, keeps the elite scenarios (score above a fixed threshold),
//! and moves every coordinate's mean to the weighted mean of the elites. The
//! result is a sampling model that puts far more mass on joint defaults than
//! the true model does.

use log::{debug, warn};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::scenario::{DefaultProblem, Model, ScoredScenario};

/// How elite scenarios are weighted in the moment-matching update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EliteWeighting {
    /// Score times the likelihood ratio `p(x) / r(x)`; favors severe scenarios.
    #[default]
    Severity,
    /// Likelihood ratio only.
    LikelihoodRatio,
    /// Every elite scenario counts once. Enough when only the optimization matters.
    Uniform,
}

impl EliteWeighting {
    fn log_weight(self, score: u32, log_ratio: f64) -> f64 {
        match self {
            EliteWeighting::Severity => f64::from(score).ln() + log_ratio,
            EliteWeighting::LikelihoodRatio => log_ratio,
            EliteWeighting::Uniform => 0.0,
        }
    }
}

/// Parameters of the optimization loop. Missing JSON fields keep their
/// defaults: 10 rounds of 1000 scenarios, elites scoring above 1, severity
/// weighting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrossEntropyConfig {
    /// Scenarios drawn per round.
    pub sample_size: usize,
    /// Fixed number of rounds; there is no convergence test.
    pub rounds: usize,
    /// Scenarios with a score strictly above this value are elite.
    pub elite_threshold: u32,
    pub weighting: EliteWeighting,
}

impl Default for CrossEntropyConfig {
    fn default() -> Self {
        CrossEntropyConfig {
            sample_size: 1000,
            rounds: 10,
            elite_threshold: 1,
            weighting: EliteWeighting::Severity,
        }
    }
}

impl CrossEntropyConfig {
    /// Rejects a zero sample size.
    pub fn validate(&self) -> Result<()> {
        if self.sample_size == 0 {
            return Err(Error::InvalidConfig("cross-entropy sample size must be positive".into()));
        }
        Ok(())
    }
}

/// Whether a round moved the sampling model.
#[derive(Debug, Clone, PartialEq)]
pub enum RoundOutcome {
    /// The model was re-fitted to the elites. `effective_sample_size` is
    /// (Σw)² / Σw² over the elite weights.
    Updated { effective_sample_size: f64 },
    /// The round left the sampling model unchanged.
    Skipped(Error),
}

/// What happened in one optimization round.
#[derive(Debug, Clone, PartialEq)]
pub struct RoundSummary {
    pub round: usize,
    /// Means of the sampling model the round drew from.
    pub expectations: Vec<f64>,
    pub elite_count: usize,
    pub outcome: RoundOutcome,
}

impl RoundSummary {
    pub fn is_skipped(&self) -> bool {
        matches!(self.outcome, RoundOutcome::Skipped(_))
    }
}

/// Final sampling model plus the per-round trace.
#[derive(Debug, Clone)]
pub struct Optimization {
    pub sampling: Model,
    pub rounds: Vec<RoundSummary>,
}

impl Optimization {
    pub fn skipped_rounds(&self) -> usize {
        self.rounds.iter().filter(|r| r.is_skipped()).count()
    }
}

/// Owns the working sampling model and replaces it wholesale after every
/// successful round. The true model is only ever read.
pub struct CrossEntropyOptimizer<'a> {
    problem: &'a DefaultProblem,
    truth: &'a Model,
    sampling: Model,
    config: CrossEntropyConfig,
}

impl<'a> CrossEntropyOptimizer<'a> {
    /// Starts from a deep copy of `truth`.
    ///
    /// # Example
    ///
    /// ```rust
    /// use cross_entropy_default::{CrossEntropyConfig, CrossEntropyOptimizer, DefaultProblem, Model};
    /// use rand::{rngs::StdRng, SeedableRng};
    ///
    /// let problem = DefaultProblem::uniform(4, 500.0).unwrap();
    /// let truth = Model::log_normal(&[2000.0; 5], 1.0).unwrap();
    /// let config = CrossEntropyConfig { rounds: 3, ..CrossEntropyConfig::default() };
    ///
    /// let mut rng = StdRng::seed_from_u64(1);
    /// let result = CrossEntropyOptimizer::new(&problem, &truth, config).unwrap().run(&mut rng).unwrap();
    /// assert_eq!(result.rounds.len(), 3);
    /// ```
    pub fn new(problem: &'a DefaultProblem, truth: &'a Model, config: CrossEntropyConfig) -> Result<Self> {
        config.validate()?;
        problem.check_model(truth)?;
        Ok(CrossEntropyOptimizer {
            problem,
            truth,
            sampling: truth.clone(),
            config,
        })
    }

    /// The current working model.
    pub fn sampling_model(&self) -> &Model {
        &self.sampling
    }

    pub fn config(&self) -> &CrossEntropyConfig {
        &self.config
    }

    /// Draws and scores one round's batch from the current sampling model,
    /// sorted by score ascending.
    pub fn draw_batch<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<ScoredScenario> {
        let mut batch: Vec<ScoredScenario> = (0..self.config.sample_size)
            .map(|_| self.problem.draw(&self.sampling, rng))
            .collect();
        batch.sort();
        batch
    }

    /// Moment-matches the sampling model to the elite part of `batch`.
    ///
    /// Fails with [`Error::EmptyEliteSet`] when no scenario is elite and with
    /// [`Error::DegenerateWeights`] when no elite has a usable weight. The
    /// sampling model is unchanged on any error.
    pub fn update(&mut self, round: usize, batch: &[ScoredScenario]) -> Result<RoundSummary> {
        let dimension = self.sampling.dimension();
        let threshold = self.config.elite_threshold;
        let expectations = self.sampling.expectations();

        let elites: Vec<&ScoredScenario> = batch.iter().filter(|s| s.score > threshold).collect();
        if elites.is_empty() {
            return Err(Error::EmptyEliteSet { round, threshold });
        }
        if let Some(bad) = elites.iter().find(|s| s.scenario.len() != dimension) {
            return Err(Error::DimensionMismatch {
                expected: dimension,
                found: bad.scenario.len(),
            });
        }

        // Weights stay in log space until they are normalized by the largest
        // one, so exp() cannot overflow.
        let mut dropped = 0;
        let log_weights: Vec<(f64, &ScoredScenario)> = elites
            .iter()
            .filter_map(|elite| {
                let log_ratio = self.truth.log_density(&elite.scenario) - self.sampling.log_density(&elite.scenario);
                let log_weight = self.config.weighting.log_weight(elite.score, log_ratio);
                if log_weight.is_nan() || log_weight == f64::INFINITY {
                    dropped += 1;
                    None
                } else {
                    Some((log_weight, *elite))
                }
            })
            .collect();
        if dropped > 0 {
            warn!("round {}: dropped {} elite scenarios with non-finite weights", round, dropped);
        }

        let max_log_weight = log_weights.iter().map(|(lw, _)| *lw).fold(f64::NEG_INFINITY, f64::max);
        if max_log_weight == f64::NEG_INFINITY {
            return Err(Error::DegenerateWeights {
                round,
                elite_count: elites.len(),
            });
        }

        let mut total = 0.0;
        let mut total_sq = 0.0;
        let mut sums = vec![0.0; dimension];
        for (log_weight, elite) in &log_weights {
            let wt = (log_weight - max_log_weight).exp();
            total += wt;
            total_sq += wt * wt;
            for (sum, x) in sums.iter_mut().zip(elite.scenario.values()) {
                *sum += wt * x;
            }
        }
        let means: Vec<f64> = sums.iter().map(|s| s / total).collect();

        self.sampling = self.sampling.with_expectations(&means)?;

        let effective_sample_size = total * total / total_sq;
        debug!(
            "round {}: {} elite scenarios, effective sample size {:.1}, new means {:?}",
            round,
            elites.len(),
            effective_sample_size,
            means
        );
        Ok(RoundSummary {
            round,
            expectations,
            elite_count: elites.len(),
            outcome: RoundOutcome::Updated { effective_sample_size },
        })
    }

    /// Draws one batch and updates from it.
    pub fn step<R: Rng + ?Sized>(&mut self, round: usize, rng: &mut R) -> Result<RoundSummary> {
        let batch = self.draw_batch(rng);
        self.update(round, &batch)
    }

    /// Runs the configured number of rounds.
    ///
    /// A round without usable elites keeps the previous sampling model and is
    /// recorded as skipped; any other error ends the run.
    pub fn run<R: Rng + ?Sized>(mut self, rng: &mut R) -> Result<Optimization> {
        let mut rounds = Vec::with_capacity(self.config.rounds);
        for round in 0..self.config.rounds {
            let expectations = self.sampling.expectations();
            match self.step(round, rng) {
                Ok(summary) => rounds.push(summary),
                Err(err @ (Error::EmptyEliteSet { .. } | Error::DegenerateWeights { .. })) => {
                    warn!("{}; keeping the previous sampling model", err);
                    let elite_count = match err {
                        Error::DegenerateWeights { elite_count, .. } => elite_count,
                        _ => 0,
                    };
                    rounds.push(RoundSummary {
                        round,
                        expectations,
                        elite_count,
                        outcome: RoundOutcome::Skipped(err),
                    });
                }
                Err(err) => return Err(err),
            }
        }
        Ok(Optimization {
            sampling: self.sampling,
            rounds,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::Scenario;
    use approx::assert_relative_eq;
    use rand::{rngs::StdRng, SeedableRng};

    fn default_setup() -> (DefaultProblem, Model) {
        let problem = DefaultProblem::uniform(4, 500.0).unwrap();
        let truth = Model::log_normal(&[2000.0; 5], 1.0).unwrap();
        (problem, truth)
    }

    fn default_proportion(problem: &DefaultProblem, model: &Model, rng: &mut StdRng, n: usize) -> f64 {
        let hits = (0..n).filter(|_| problem.draw(model, rng).score > 0).count();
        hits as f64 / n as f64
    }

    #[test]
    fn test_optimizer_biases_towards_default() {
        let (problem, truth) = default_setup();
        let mut rng = StdRng::seed_from_u64(35153);
        let optimizer = CrossEntropyOptimizer::new(&problem, &truth, CrossEntropyConfig::default()).unwrap();
        let result = optimizer.run(&mut rng).unwrap();

        assert_eq!(result.rounds.len(), 10);
        let true_means = truth.expectations();
        let means = result.sampling.expectations();

        // the shared external factor drives joint defaults and drops the most
        assert!(means[4] < 0.5 * true_means[4], "external mean barely moved: {}", means[4]);
        for (j, (mean, true_mean)) in means.iter().zip(&true_means).enumerate() {
            assert!(mean < true_mean, "coordinate {} did not shift down: {} vs {}", j, mean, true_mean);
        }
        let total: f64 = means.iter().sum();
        let true_total: f64 = true_means.iter().sum();
        assert!(total < true_total, "means did not shift down: {:?}", means);

        let biased = default_proportion(&problem, &result.sampling, &mut rng, 20_000);
        let natural = default_proportion(&problem, &truth, &mut rng, 20_000);
        assert!(biased > 5.0 * natural, "biased {} vs natural {}", biased, natural);

        // the true model is untouched
        for mean in truth.expectations() {
            assert_relative_eq!(mean, 2000.0, max_relative = 1e-12);
        }
    }

    #[test]
    fn test_optimizer_is_reproducible() {
        let (problem, truth) = default_setup();
        let run = |seed| {
            let mut rng = StdRng::seed_from_u64(seed);
            CrossEntropyOptimizer::new(&problem, &truth, CrossEntropyConfig::default())
                .unwrap()
                .run(&mut rng)
                .unwrap()
                .sampling
                .expectations()
        };
        assert_eq!(run(11), run(11));
    }

    #[test]
    fn test_empty_elite_set_is_reported() {
        // nobody can default against a zero payment
        let problem = DefaultProblem::uniform(4, 0.0).unwrap();
        let truth = Model::log_normal(&[2000.0; 5], 1.0).unwrap();
        let mut rng = StdRng::seed_from_u64(5);
        let mut optimizer = CrossEntropyOptimizer::new(&problem, &truth, CrossEntropyConfig::default()).unwrap();

        let batch = optimizer.draw_batch(&mut rng);
        assert!(batch.iter().all(|s| s.score <= 1));
        let err = optimizer.update(0, &batch).unwrap_err();
        assert_eq!(err, Error::EmptyEliteSet { round: 0, threshold: 1 });
        assert_eq!(optimizer.sampling_model().expectations(), truth.expectations());

        let result = optimizer.run(&mut rng).unwrap();
        assert_eq!(result.skipped_rounds(), 10);
        assert_eq!(result.sampling.expectations(), truth.expectations());
    }

    fn hand_batch(problem: &DefaultProblem) -> Vec<ScoredScenario> {
        let mut batch: Vec<ScoredScenario> = [
            vec![100.0, 100.0, 100.0, 100.0],
            vec![50.0, 200.0, 1000.0, 10.0],
            vec![1000.0, 1000.0, 1000.0, 1000.0],
            vec![100.0, 1000.0, 1000.0, 100.0],
        ]
        .into_iter()
        .map(|values| {
            let scenario = Scenario::new(values);
            let score = problem.score(&scenario);
            ScoredScenario::new(scenario, score)
        })
        .collect();
        batch.sort();
        batch
    }

    #[test]
    fn test_update_weights_elites_by_severity() {
        let problem = DefaultProblem::uniform(3, 500.0).unwrap();
        let truth = Model::log_normal(&[2000.0; 4], 1.0).unwrap();
        let batch = hand_batch(&problem);
        assert_eq!(batch.iter().map(|s| s.score).collect::<Vec<_>>(), vec![0, 1, 2, 3]);

        let mut optimizer = CrossEntropyOptimizer::new(&problem, &truth, CrossEntropyConfig::default()).unwrap();
        let summary = optimizer.update(0, &batch).unwrap();
        assert_eq!(summary.elite_count, 2);
        // sampling == truth, so the weights are the scores 3 and 2
        let expected = [80.0, 140.0, 460.0, 64.0];
        for (mean, target) in optimizer.sampling_model().expectations().iter().zip(expected) {
            assert_relative_eq!(*mean, target, max_relative = 1e-9);
        }
        match summary.outcome {
            RoundOutcome::Updated { effective_sample_size } => {
                assert_relative_eq!(effective_sample_size, 25.0 / 13.0, max_relative = 1e-12)
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn test_update_with_uniform_weighting() {
        let problem = DefaultProblem::uniform(3, 500.0).unwrap();
        let truth = Model::log_normal(&[2000.0; 4], 1.0).unwrap();
        let config = CrossEntropyConfig {
            weighting: EliteWeighting::Uniform,
            ..CrossEntropyConfig::default()
        };
        let mut optimizer = CrossEntropyOptimizer::new(&problem, &truth, config).unwrap();
        optimizer.update(0, &hand_batch(&problem)).unwrap();
        let expected = [75.0, 150.0, 550.0, 55.0];
        for (mean, target) in optimizer.sampling_model().expectations().iter().zip(expected) {
            assert_relative_eq!(*mean, target, max_relative = 1e-9);
        }
    }

    #[test]
    fn test_construction_checks() {
        let (problem, _) = default_setup();
        let short = Model::log_normal(&[2000.0; 3], 1.0).unwrap();
        assert!(matches!(
            CrossEntropyOptimizer::new(&problem, &short, CrossEntropyConfig::default()),
            Err(Error::DimensionMismatch { expected: 5, found: 3 })
        ));

        let (problem, truth) = default_setup();
        let config = CrossEntropyConfig {
            sample_size: 0,
            ..CrossEntropyConfig::default()
        };
        assert!(matches!(
            CrossEntropyOptimizer::new(&problem, &truth, config),
            Err(Error::InvalidConfig(_))
        ));
    }
}
