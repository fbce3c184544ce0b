//! Run the simultaneous-default experiment and print one tab-separated row per batch.
//!
//! Defaults reproduce the reference setup: four obligors owing 500 with mean income 2000, a
//! shared external income with mean 2000, 10 cross-entropy rounds of 1000 scenarios, a reference
//! batch of 1,000,000 trials and 1000 repetitions of 100 draws per method.

use std::fs;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use cross_entropy_default::{run_experiment, BatchReport, ExperimentConfig, Method, ReplicationSummary};
use serde::Serialize;

const SEP: &str = "\t";

#[derive(Debug, Parser)]
#[command(about = "Cross-Entropy importance sampling for simultaneous obligor defaults")]
struct Args {
    /// JSON file with experiment parameters; missing fields keep their defaults
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    seed: Option<u64>,

    /// Batches per estimator
    #[arg(long)]
    repetitions: Option<usize>,

    /// Draws per batch
    #[arg(long)]
    estimate_samples: Option<usize>,

    /// Trials in the reference batch (0 skips it)
    #[arg(long)]
    baseline_trials: Option<usize>,

    /// Cross-entropy rounds
    #[arg(long)]
    rounds: Option<usize>,

    /// Scenarios drawn per cross-entropy round
    #[arg(long)]
    ce_samples: Option<usize>,

    /// Print the results as JSON instead of a table
    #[arg(long)]
    json: bool,
}

impl Args {
    fn experiment_config(&self) -> anyhow::Result<ExperimentConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
                serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?
            }
            None => ExperimentConfig::default(),
        };
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        if let Some(repetitions) = self.repetitions {
            config.repetitions = repetitions;
        }
        if let Some(samples) = self.estimate_samples {
            config.estimate_sample_size = samples;
        }
        if let Some(trials) = self.baseline_trials {
            config.baseline_trials = trials;
        }
        if let Some(rounds) = self.rounds {
            config.cross_entropy.rounds = rounds;
        }
        if let Some(samples) = self.ce_samples {
            config.cross_entropy.sample_size = samples;
        }
        Ok(config)
    }
}

#[derive(Serialize)]
struct JsonOutput<'a> {
    config: &'a ExperimentConfig,
    sampling_means: Option<Vec<f64>>,
    baseline: Option<&'a BatchReport>,
    batches: &'a [BatchReport],
    summaries: Vec<ReplicationSummary>,
    failures: Vec<String>,
}

fn header() -> String {
    [
        "Method",
        "NumberOfSamples",
        "DefaultRateEstimate",
        "ProbAtLeastOneDefault",
        "ExpectedNumberDefaultsGivenAtLeastOne",
        "ProportionOfSampleWithADefault",
    ]
    .join(SEP)
}

fn row(report: &BatchReport) -> String {
    let given = report
        .expected_defaults_given_default
        .map_or_else(|| "NA".to_string(), |v| v.to_string());
    [
        report.method.to_string(),
        report.sample_count.to_string(),
        report.default_rate_estimate.to_string(),
        report.prob_at_least_one_default.to_string(),
        given,
        report.proportion_with_default.to_string(),
    ]
    .join(SEP)
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();
    let config = args.experiment_config()?;
    let report = run_experiment(&config)?;

    let summaries: Vec<ReplicationSummary> = [Method::Standard, Method::ImportanceSample]
        .into_iter()
        .filter_map(|method| report.summary(method))
        .collect();

    if args.json {
        let output = JsonOutput {
            config: &config,
            sampling_means: report.optimization.as_ref().map(|o| o.sampling.expectations()),
            baseline: report.baseline.as_ref(),
            batches: &report.batches,
            summaries,
            failures: report.failures.iter().map(|f| f.error.to_string()).collect(),
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    if let Some(optimization) = &report.optimization {
        for round in &optimization.rounds {
            let means: Vec<String> = round.expectations.iter().map(|m| format!("{m:.2}")).collect();
            let status = if round.is_skipped() { "skipped" } else { "updated" };
            println!("round {}{SEP}{}{SEP}elites {}{SEP}{}", round.round, means.join(" , "), round.elite_count, status);
        }
        println!("sampling model {}", optimization.sampling);
    }

    println!("{}", header());
    if let Some(baseline) = &report.baseline {
        println!("{}", row(baseline));
    }
    for batch in &report.batches {
        println!("{}", row(batch));
    }

    for summary in &summaries {
        eprintln!(
            "{}: {} batches, mean {:.6}, variance {:.3e}, min {:.6}, max {:.6}",
            summary.method, summary.replications, summary.mean, summary.variance, summary.min, summary.max
        );
    }
    for failure in &report.failures {
        match failure.repetition {
            Some(rep) => eprintln!("{} repetition {} failed: {}", failure.method, rep, failure.error),
            None => eprintln!("{} failed: {}", failure.method, failure.error),
        }
    }
    Ok(())
}
