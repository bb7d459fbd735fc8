//! Command-line front-end for the training pipeline.
//!
//! With no arguments the reference configuration is used; a JSON config
//! file and a few common overrides can be supplied:
//!
//! ```text
//! mva-train [--config run.json] [--output results.json] \
//!           [--title NAME] [--seed N]
//! ```

use std::path::PathBuf;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use fisher_mva::config::TrainingConfig;
use fisher_mva::pipeline::Trainer;
use fisher_mva::report::ResultsFile;

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let options = parse_args(std::env::args().skip(1).collect())?;

    let mut config = match &options.config_path {
        Some(path) => TrainingConfig::from_json_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => TrainingConfig::default(),
    };
    if let Some(output) = options.output {
        config.output = Some(output);
    }
    if let Some(title) = options.title {
        config.title = title;
    }
    if let Some(seed) = options.seed {
        config.split.seed = Some(seed);
    }

    let trainer = Trainer::new(config).context("opening run")?;
    let path = trainer.run().context("training run failed")?;

    print_summary(&path)?;
    Ok(())
}

#[derive(Debug, Default)]
struct CliOptions {
    config_path: Option<PathBuf>,
    output: Option<PathBuf>,
    title: Option<String>,
    seed: Option<u64>,
}

fn parse_args(args: Vec<String>) -> anyhow::Result<CliOptions> {
    let mut options = CliOptions::default();
    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        let mut value = |flag: &str| {
            iter.next()
                .ok_or_else(|| anyhow::anyhow!("{flag} requires a value"))
        };
        match arg.as_str() {
            "--config" => options.config_path = Some(PathBuf::from(value("--config")?)),
            "--output" => options.output = Some(PathBuf::from(value("--output")?)),
            "--title" => options.title = Some(value("--title")?),
            "--seed" => {
                let text = value("--seed")?;
                options.seed =
                    Some(text.parse().with_context(|| format!("invalid seed '{text}'"))?);
            }
            "--help" | "-h" => {
                println!(
                    "usage: mva-train [--config FILE] [--output FILE] [--title NAME] [--seed N]"
                );
                std::process::exit(0);
            }
            other => anyhow::bail!("unknown argument '{other}' (try --help)"),
        }
    }
    Ok(options)
}

fn print_summary(path: &std::path::Path) -> anyhow::Result<()> {
    let container = ResultsFile::read(path).context("re-reading results container")?;
    println!("results: {}", path.display());
    for result in &container.results {
        let eval = &result.evaluation;
        println!(
            "{:<12} separation={:.4}  roc_integral={:.4}  best_cut={:.4} (S/sqrt(S+B)={:.3})",
            result.name,
            eval.separation,
            eval.roc_integral,
            eval.best_cut.cut,
            eval.best_cut.significance,
        );
        println!(
            "{:<12} signal test mean={:+.4} rms={:.4}   background test mean={:+.4} rms={:.4}",
            "",
            eval.signal_test.mean,
            eval.signal_test.rms,
            eval.background_test.mean,
            eval.background_test.rms,
        );
        println!(
            "{:<12} overtraining KS: signal={:.4} background={:.4}",
            "", eval.ks_signal, eval.ks_background,
        );
    }
    Ok(())
}
