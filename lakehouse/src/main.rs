use anyhow::Context;
use clap::{Arg, Command};
use lakehouse::services::Stage;
use std::process;

const DEFAULT_CONFIG: &str = "config/lakehouse.toml";

fn config_arg() -> Arg {
    Arg::new("config")
        .short('c')
        .long("config")
        .value_name("FILE")
        .default_value(DEFAULT_CONFIG)
        .help("Sets a custom config file")
}

fn cli() -> Command {
    Command::new("travel-lakehouse")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Builds the travel events star schema from raw I94 data")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            Command::new("run")
                .about("Run every stage: source, preprocess and model")
                .arg(config_arg()),
        )
        .subcommand(
            Command::new("source")
                .about("Conform the raw inputs into the source layer")
                .arg(config_arg()),
        )
        .subcommand(
            Command::new("preprocess")
                .about("Clean the source layer into the preprocessed layer")
                .arg(config_arg()),
        )
        .subcommand(
            Command::new("model")
                .about("Build and check the analytics tables")
                .arg(config_arg()),
        )
}

async fn run(config_path: &str, stages: &[Stage]) -> anyhow::Result<()> {
    let reports = lakehouse::run_lakehouse_pipeline(config_path, stages)
        .await
        .with_context(|| format!("pipeline failed (config: {})", config_path))?;

    for report in &reports {
        println!(
            "{}: {} table(s) written in {:.1}s (run {})",
            report.stage,
            report.tables.len(),
            report.duration_secs,
            report.run_id
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let matches = cli().get_matches();

    let (stages, sub_matches) = match matches.subcommand() {
        Some(("run", m)) => (Stage::all().to_vec(), m),
        Some(("source", m)) => (vec![Stage::Source], m),
        Some(("preprocess", m)) => (vec![Stage::Preprocess], m),
        Some(("model", m)) => (vec![Stage::Model], m),
        _ => {
            eprintln!("No subcommand specified. Use --help for usage information.");
            process::exit(1);
        }
    };

    let config_path = sub_matches
        .get_one::<String>("config")
        .map(|s| s.as_str())
        .unwrap_or(DEFAULT_CONFIG);

    if let Err(e) = run(config_path, &stages).await {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}
