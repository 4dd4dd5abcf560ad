// src/main.rs
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};

use myoflex::config::SplitPolicyKind;
use myoflex::signal::{drain, SampleRow, SyntheticSource, Trial, TrialAssembler};
use myoflex::{render_text, PipelineConfig, PipelineContext, SelectionSummary};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Policy {
    Automatic,
    Manual,
}

/// Train and compare flexion/extension classifiers on EMG trials.
#[derive(Parser, Debug)]
#[command(name = "myoflex")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// JSON pipeline configuration; defaults apply to missing fields
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// JSON array of sample rows {subject, movement_code, value}; synthetic trials when absent
    #[arg(short, long)]
    rows: Option<PathBuf>,

    /// Split policy override
    #[arg(long, value_enum)]
    policy: Option<Policy>,

    /// Subjects held out for test under the manual policy (comma separated)
    #[arg(long, value_delimiter = ',')]
    test_subjects: Vec<String>,

    /// Test fraction override for the automatic policy
    #[arg(long)]
    test_fraction: Option<f64>,

    /// Seed override for both the split and the trainer
    #[arg(long)]
    seed: Option<u64>,

    /// Number of synthetic subjects
    #[arg(long, default_value = "10")]
    subjects: usize,

    /// Samples per synthetic trial
    #[arg(long, default_value = "1500")]
    samples: usize,

    /// Print the JSON summary instead of the text report
    #[arg(long)]
    json: bool,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,
}

fn effective_config(args: &Args) -> Result<PipelineConfig> {
    let mut config = match &args.config {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    match args.policy {
        Some(Policy::Automatic) => config.split.policy = SplitPolicyKind::Automatic,
        Some(Policy::Manual) => config.split.policy = SplitPolicyKind::Manual,
        None => {}
    }
    if !args.test_subjects.is_empty() {
        config.split.manual_test_subjects = args.test_subjects.clone();
    }
    if let Some(fraction) = args.test_fraction {
        config.split.test_fraction = fraction;
    }
    if let Some(seed) = args.seed {
        config.split.random_seed = seed;
        config.trainer.random_seed = seed;
    }
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn load_trials(args: &Args, config: &PipelineConfig) -> Result<Vec<Trial>> {
    match &args.rows {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading sample rows from {}", path.display()))?;
            let rows: Vec<SampleRow> =
                serde_json::from_str(&text).context("parsing sample rows")?;
            let mut assembler = TrialAssembler::new(config.filter.sample_rate_hz)?;
            assembler.extend(rows);
            Ok(assembler.into_trials())
        }
        None => {
            let seed = config.split.random_seed;
            log::info!(
                "generating {} synthetic subjects, {} samples per trial",
                args.subjects,
                args.samples
            );
            Ok(drain(&mut SyntheticSource::new(args.subjects, args.samples, seed))?)
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = effective_config(&args)?;
    if args.print_config {
        println!("{}", config.to_json_pretty()?);
        return Ok(());
    }

    let trials = load_trials(&args, &config)?;
    if trials.is_empty() {
        bail!("no trials to process");
    }

    let ctx = PipelineContext::run(config, &trials).context("pipeline run failed")?;
    let excluded = ctx.trial_failures().count();
    if excluded > 0 {
        log::info!("{excluded} trials or groups excluded, see warnings above");
    }
    for key in &ctx.build_report.ignored {
        log::warn!("ignored (not flexion/extension): {key}");
    }
    let evaluation = ctx
        .evaluate_winner()
        .context("evaluating the winning model")?;

    if args.json {
        let summary = SelectionSummary::new(&ctx.selection, &evaluation);
        println!("{}", summary.to_json_pretty()?);
    } else {
        print!("{}", render_text(&ctx.selection, &evaluation));
    }
    Ok(())
}
