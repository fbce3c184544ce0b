//! Joint income scenarios, the independence model they are drawn from, and
//! the default-count score.

use std::cmp::Ordering;
use std::fmt;

use rand::Rng;

use crate::distribution::{LogNormal, RandomVariable};
use crate::error::{Error, Result};

/// One simulated draw: the incomes of every obligor followed by the shared
/// external income factor in the last coordinate.
#[derive(Debug, Clone, PartialEq)]
pub struct Scenario {
    values: Vec<f64>,
}

impl Scenario {
    /// Wraps coordinates laid out as obligors first, external factor last.
    pub fn new(values: Vec<f64>) -> Self {
        Scenario { values }
    }

    /// All coordinates in model order.
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Number of coordinates, obligors plus one.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The shared external income factor, if the scenario is not empty.
    pub fn external_income(&self) -> Option<f64> {
        self.values.last().copied()
    }
}

/// A scenario paired with its default count.
///
/// Ordered by score first, then by the coordinates compared left to right.
/// The coordinate order only exists to make sorting deterministic.
#[derive(Debug, Clone)]
pub struct ScoredScenario {
    pub scenario: Scenario,
    pub score: u32,
}

impl ScoredScenario {
    /// Pairs `scenario` with a score computed by [`DefaultProblem::score`].
    pub fn new(scenario: Scenario, score: u32) -> Self {
        ScoredScenario { scenario, score }
    }
}

impl Ord for ScoredScenario {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score.cmp(&other.score).then_with(|| {
            let lhs = self.scenario.values();
            let rhs = other.scenario.values();
            lhs.iter()
                .zip(rhs)
                .map(|(a, b)| a.total_cmp(b))
                .find(|ord| ord.is_ne())
                .unwrap_or_else(|| lhs.len().cmp(&rhs.len()))
        })
    }
}

impl PartialOrd for ScoredScenario {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for ScoredScenario {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ScoredScenario {}

/// An ordered collection of independent random variables, one per scenario
/// coordinate.
///
/// Cloning deep-copies every variable, so a working copy never aliases the
/// model it was taken from.
#[derive(Debug, Clone)]
pub struct Model {
    variables: Vec<Box<dyn RandomVariable>>,
}

impl Model {
    /// Creates a model from one variable per scenario coordinate.
    pub fn new(variables: Vec<Box<dyn RandomVariable>>) -> Self {
        Model { variables }
    }

    /// Builds an all log-normal model from per-coordinate means and a common scale.
    ///
    /// # Example
    ///
    /// ```rust
    /// use cross_entropy_default::Model;
    ///
    /// let model = Model::log_normal(&[2000.0, 2000.0, 500.0], 1.0).unwrap();
    /// assert_eq!(model.dimension(), 3);
    /// assert!((model.expectations()[2] - 500.0).abs() < 1e-9);
    /// ```
    pub fn log_normal(means: &[f64], scale: f64) -> Result<Self> {
        let variables = means
            .iter()
            .map(|&mean| LogNormal::with_mean(mean, scale).map(|v| Box::new(v) as Box<dyn RandomVariable>))
            .collect::<Result<Vec<_>>>()?;
        Ok(Model::new(variables))
    }

    /// Number of variables, which is also the scenario length.
    pub fn dimension(&self) -> usize {
        self.variables.len()
    }

    /// The variables in coordinate order.
    pub fn variables(&self) -> &[Box<dyn RandomVariable>] {
        &self.variables
    }

    /// Draws one value per variable, in index order.
    pub fn generate<R: Rng + ?Sized>(&self, rng: &mut R) -> Scenario {
        // `&mut R` is a sized generator, so it can be handed to the variables as a trait object
        let mut rng = rng;
        Scenario::new(self.variables.iter().map(|v| v.generate(&mut rng)).collect())
    }

    /// Log-likelihood of `scenario` under this model, assuming independent
    /// coordinates.
    pub fn log_density(&self, scenario: &Scenario) -> f64 {
        self.variables
            .iter()
            .zip(scenario.values())
            .map(|(variable, &value)| variable.log_prob(value))
            .sum()
    }

    /// Current mean of every variable, in coordinate order.
    pub fn expectations(&self) -> Vec<f64> {
        self.variables.iter().map(|v| v.expectation()).collect()
    }

    /// Returns a new model whose variable `j` has mean `means[j]`.
    ///
    /// Either every coordinate is re-parameterized or the error of the first
    /// failing one is returned; `self` is never modified.
    pub fn with_expectations(&self, means: &[f64]) -> Result<Model> {
        if means.len() != self.dimension() {
            return Err(Error::DimensionMismatch {
                expected: self.dimension(),
                found: means.len(),
            });
        }
        let variables = self
            .variables
            .iter()
            .zip(means)
            .map(|(variable, &mean)| variable.with_expectation(mean))
            .collect::<Result<Vec<_>>>()?;
        Ok(Model::new(variables))
    }
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, variable) in self.variables.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{variable}")?;
        }
        write!(f, "]")
    }
}

/// The simultaneous-default problem: obligor `i` defaults when the external
/// income plus its own income falls below `payments[i]`.
#[derive(Debug, Clone, PartialEq)]
pub struct DefaultProblem {
    payments: Vec<f64>,
}

impl DefaultProblem {
    /// Creates a problem from one finite payment threshold per obligor.
    ///
    /// # Example
    ///
    /// ```rust
    /// use cross_entropy_default::{DefaultProblem, Scenario};
    ///
    /// let problem = DefaultProblem::new(vec![500.0, 500.0]).unwrap();
    /// // external income 100: the first obligor totals 300, the second 900
    /// let scenario = Scenario::new(vec![200.0, 800.0, 100.0]);
    /// assert_eq!(problem.score(&scenario), 1);
    /// ```
    pub fn new(payments: Vec<f64>) -> Result<Self> {
        if payments.is_empty() {
            return Err(Error::InvalidConfig("at least one obligor is required".into()));
        }
        if let Some(bad) = payments.iter().find(|p| !p.is_finite()) {
            return Err(Error::InvalidConfig(format!("payment threshold {bad} is not finite")));
        }
        Ok(DefaultProblem { payments })
    }

    /// `obligors` obligors that all owe the same payment.
    pub fn uniform(obligors: usize, payment: f64) -> Result<Self> {
        DefaultProblem::new(vec![payment; obligors])
    }

    /// Payment thresholds, one per obligor.
    pub fn payments(&self) -> &[f64] {
        &self.payments
    }

    /// Number of obligors, the largest possible score.
    pub fn obligors(&self) -> usize {
        self.payments.len()
    }

    /// Scenario length: one coordinate per obligor plus the external factor.
    pub fn dimension(&self) -> usize {
        self.payments.len() + 1
    }

    /// Fails unless `model` has exactly one variable per scenario coordinate.
    pub fn check_model(&self, model: &Model) -> Result<()> {
        if model.dimension() != self.dimension() {
            return Err(Error::DimensionMismatch {
                expected: self.dimension(),
                found: model.dimension(),
            });
        }
        Ok(())
    }

    /// Number of obligors in default under `scenario`.
    ///
    /// # Panics
    ///
    /// Panics if the scenario has fewer than [`dimension`](Self::dimension)
    /// coordinates.
    pub fn score(&self, scenario: &Scenario) -> u32 {
        let values = scenario.values();
        let n = self.payments.len();
        let external = values[n];
        let mut defaults = 0;
        for (own, payment) in values[..n].iter().zip(&self.payments) {
            if external + own < *payment {
                defaults += 1;
            }
        }
        defaults
    }

    /// Draws a scenario from `model` and scores it.
    pub fn draw<R: Rng + ?Sized>(&self, model: &Model, rng: &mut R) -> ScoredScenario {
        let scenario = model.generate(rng);
        let score = self.score(&scenario);
        ScoredScenario::new(scenario, score)
    }
}
