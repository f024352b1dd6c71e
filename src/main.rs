use anyhow::{Context, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use std::path::PathBuf;
use tracing::{info, warn};

use smart_skip::config::Config;
use smart_skip::learning::LearningStore;
use smart_skip::replay::{run_trace, Trace};
use smart_skip::Detector;

fn cli() -> Command {
    Command::new("Smart Skip")
        .version(env!("CARGO_PKG_VERSION"))
        .author("TigreRoll")
        .about("Heuristic intro, recap, credits and ad detection for streaming video")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file (defaults to the standard search path)")
                .value_parser(value_parser!(PathBuf))
                .global(true),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable verbose logging")
                .action(ArgAction::SetTrue)
                .global(true),
        )
        .subcommand(
            Command::new("replay")
                .about("Run a recorded playback trace through the detector")
                .arg(
                    Arg::new("trace")
                        .short('t')
                        .long("trace")
                        .value_name("FILE")
                        .help("Trace JSON file")
                        .value_parser(value_parser!(PathBuf))
                        .required(true),
                )
                .arg(
                    Arg::new("store")
                        .short('s')
                        .long("store")
                        .value_name("FILE")
                        .help("Learning store to load and update")
                        .value_parser(value_parser!(PathBuf)),
                )
                .arg(
                    Arg::new("threshold")
                        .long("threshold")
                        .value_name("VALUE")
                        .help("Initial confidence threshold")
                        .value_parser(value_parser!(f64)),
                ),
        )
        .subcommand(
            Command::new("stats")
                .about("Summarize a persisted learning store")
                .arg(
                    Arg::new("store")
                        .short('s')
                        .long("store")
                        .value_name("FILE")
                        .value_parser(value_parser!(PathBuf))
                        .required(true),
                ),
        )
        .subcommand(
            Command::new("export")
                .about("Export a persisted learning store")
                .arg(
                    Arg::new("store")
                        .short('s')
                        .long("store")
                        .value_name("FILE")
                        .value_parser(value_parser!(PathBuf))
                        .required(true),
                )
                .arg(
                    Arg::new("out")
                        .short('o')
                        .long("out")
                        .value_name("FILE")
                        .value_parser(value_parser!(PathBuf))
                        .required(true),
                ),
        )
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();
    let verbose = matches.get_flag("verbose");

    let (mut config, config_error) = match matches.get_one::<PathBuf>("config") {
        Some(path) => (Config::from_file(path)?, None),
        None => match Config::load() {
            Ok(config) => (config, None),
            Err(e) => (Config::default(), Some(e)),
        },
    };

    // Initialize logging
    let filter = if verbose {
        "smart_skip=debug,warn".to_string()
    } else {
        format!("smart_skip={},warn", config.logging.level)
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Some(e) = config_error {
        warn!("Failed to load config, using defaults: {}", e);
    }
    if verbose {
        config.detector.verbose_logging = true;
        info!("Verbose logging enabled");
    }

    match matches.subcommand() {
        Some(("replay", args)) => replay(config, args).await,
        Some(("stats", args)) => stats(config, args).await,
        Some(("export", args)) => export(config, args).await,
        _ => unreachable!("subcommand_required is set"),
    }
}

async fn replay(mut config: Config, args: &ArgMatches) -> Result<()> {
    if let Some(store) = args.get_one::<PathBuf>("store") {
        config.learning.store_path = Some(store.clone());
    }
    if let Some(threshold) = args.get_one::<f64>("threshold") {
        config.detector.confidence_threshold = *threshold;
    }
    config.validate()?;
    info!("🔧 {}", config.summary());

    let trace_path = args
        .get_one::<PathBuf>("trace")
        .context("missing --trace")?;
    let trace = Trace::load(trace_path)
        .await
        .with_context(|| format!("failed to load trace {}", trace_path.display()))?;

    let start_time = std::time::Instant::now();
    let mut detector = Detector::from_config(config).await;
    let report = run_trace(&mut detector, &trace).await;
    detector.shutdown().await;

    info!("🎉 Replay completed in {:.2}s", start_time.elapsed().as_secs_f64());
    for event in &report.accepted {
        info!(
            "⏭️ {:>8.1}s {:<8} {:.2} {:?}",
            event.timestamp_seconds, event.content_type, event.confidence, event.suggested_action
        );
    }
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn stats(config: Config, args: &ArgMatches) -> Result<()> {
    let path = args.get_one::<PathBuf>("store").context("missing --store")?;
    let store = LearningStore::open(path.clone(), config.learning.store_limits()).await;

    let summary = store.summarize(
        config.detector.confidence_threshold,
        false,
        config.learning.sample_key_count,
    );
    info!("📊 {} learning entries in {}", summary.total_entries, path.display());
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

async fn export(config: Config, args: &ArgMatches) -> Result<()> {
    let path = args.get_one::<PathBuf>("store").context("missing --store")?;
    let out = args.get_one::<PathBuf>("out").context("missing --out")?;

    let store = LearningStore::open(path.clone(), config.learning.store_limits()).await;
    tokio::fs::write(out, store.to_json()?)
        .await
        .with_context(|| format!("failed to write {}", out.display()))?;

    info!("📤 Exported {} learning entries to {}", store.len(), out.display());
    Ok(())
}
