//! SimTick - tick harness for pluggable simulation subsystems
//!
//! Runs the built-in subsystems through the orchestration core for a number
//! of ticks and writes a health report.
//!
//! Exit codes:
//!   0 - Success
//!   1 - Runtime error (config, knob overrides, plan, report write, etc.)
//!   2 - A system ended the run unhealthy and --fail-on-unhealthy was set

use anyhow::{Context, Result};
use chrono::Utc;
use indicatif::{ProgressBar, ProgressStyle};
use simtick::analysis::{AnalysisExecutor, OllamaExecutor};
use simtick::cli::Args;
use simtick::config::{Config, DEFAULT_CONFIG_FILE};
use simtick::harness::Harness;
use simtick::report::{self, ReportMetadata};
use simtick::systems::reference_runtimes;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse_args();

    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // No logging needed for --init-config
    if args.init_config {
        return handle_init_config();
    }

    init_logging(&args);

    info!("SimTick v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);

    match run_simulation(args).await {
        Ok(exit_code) => {
            std::process::exit(exit_code);
        }
        Err(e) => {
            error!("Simulation failed: {:#}", e);
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Handle --init-config: generate a default .simtick.toml.
fn handle_init_config() -> Result<()> {
    let path = Path::new(DEFAULT_CONFIG_FILE);

    if path.exists() {
        eprintln!(
            "⚠️  {} already exists. Remove it first or edit it manually.",
            DEFAULT_CONFIG_FILE
        );
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content)
        .with_context(|| format!("Failed to write {}", DEFAULT_CONFIG_FILE))?;

    println!("✅ Created {} with default settings.", DEFAULT_CONFIG_FILE);
    println!("   Edit it to customize engine limits, the civilization, and knob overrides.");
    Ok(())
}

/// Initialize logging based on verbosity settings.
fn init_logging(args: &Args) {
    let level = args.log_level();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }
}

/// Run the configured number of ticks. Returns exit code (0 or 2).
async fn run_simulation(args: Args) -> Result<i32> {
    let start_time = Instant::now();

    let mut config = load_config(&args)?;
    config.merge_with_args(&args)?;

    let options = config.engine.runtime_options();
    let mut runtimes = reference_runtimes(options);

    let backend = if config.analysis.enabled {
        let executor: Arc<dyn AnalysisExecutor> = Arc::new(OllamaExecutor::new(
            &config.analysis.ollama_url,
            config.analysis.model.clone(),
        )?);
        runtimes = runtimes
            .into_iter()
            .map(|rt| rt.with_executor(Arc::clone(&executor)))
            .collect();
        format!("ollama @ {}", config.analysis.ollama_url)
    } else {
        info!("Analysis disabled; every analysis uses its fallback");
        "offline".to_string()
    };

    let civilization = config.simulation.civilization();
    let mut harness = Harness::new(runtimes, civilization, config.simulation.trigger)
        .context("Failed to build execution plan")?;
    harness.apply_overrides(&config.knobs)?;

    println!("🧭 Simulating {}", config.simulation.civilization_name);
    println!("   Systems: {}", harness.plan().order().collect::<Vec<_>>().join(" → "));
    println!("   Ticks: {}", config.simulation.ticks);
    println!("   Analysis: {}", backend);

    let progress = if args.quiet {
        ProgressBar::hidden()
    } else {
        ProgressBar::new(config.simulation.ticks)
    };
    progress.set_style(
        ProgressStyle::with_template("{spinner:.green} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    );

    for _ in 0..config.simulation.ticks {
        let summary = harness.run_tick().await;
        progress.set_message(format!(
            "{} ran, {} failed",
            summary.executed.len(),
            summary.failed.len()
        ));
        progress.inc(1);
    }
    progress.finish_and_clear();

    let metadata = ReportMetadata {
        generated_at: Utc::now(),
        ticks: config.simulation.ticks,
        civilization: config.simulation.civilization_name.clone(),
        analysis_backend: backend,
        duration_seconds: start_time.elapsed().as_secs_f64(),
    };
    let sim_report = harness.report(metadata);

    let output = PathBuf::from(&config.general.output);
    report::write_report(&sim_report, args.format, &output)?;

    println!("\n📊 Simulation Summary:");
    println!("   Executions: {}", sim_report.total_runs());
    println!("   Failures: {}", sim_report.total_failures());
    println!(
        "   Final population: {}",
        harness.civilization().total_population
    );
    println!("   Duration: {:.1}s", sim_report.metadata.duration_seconds);
    println!("\n✅ Simulation complete! Report saved to: {}", output.display());

    let unhealthy = sim_report.unhealthy_systems();
    if !unhealthy.is_empty() {
        warn!("Unhealthy systems: {}", unhealthy.join(", "));
        if args.fail_on_unhealthy {
            eprintln!(
                "\n⛔ Unhealthy systems: {}. Failing (exit code 2).",
                unhealthy.join(", ")
            );
            return Ok(2);
        }
    }

    Ok(0)
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args) -> Result<Config> {
    if let Some(ref config_path) = args.config {
        info!("Loading config from: {}", config_path.display());
        return Config::load(config_path);
    }

    match Config::load_from_dir(Path::new(".")) {
        Ok(Some(config)) => {
            info!("Loaded default config from {}", DEFAULT_CONFIG_FILE);
            Ok(config)
        }
        Ok(None) => {
            debug!("No config file found, using defaults");
            Ok(Config::default())
        }
        Err(e) => {
            warn!("Failed to load config: {:#}", e);
            Ok(Config::default())
        }
    }
}
