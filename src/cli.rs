//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and knob override syntax.

use crate::knobs::KnobValue;
use crate::models::TriggerType;
use crate::report::ReportFormat;
use clap::Parser;
use std::path::PathBuf;

/// SimTick - tick harness for pluggable simulation subsystems
///
/// Runs the built-in subsystems for a number of ticks, honoring their
/// scheduling policies and dependencies, and writes a health report.
/// Analyses go to a local Ollama model unless --offline is given.
///
/// Examples:
///   simtick --ticks 20
///   simtick --offline --format json --output run.json
///   simtick --knob population.birth_rate=0.03 --knob diplomacy.diplomatic_stance=cooperative
///   simtick --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Path to configuration file
    ///
    /// If not specified, looks for .simtick.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Number of ticks to simulate
    #[arg(short, long, value_name = "COUNT")]
    pub ticks: Option<u64>,

    /// Trigger attached to every tick invocation
    ///
    /// player-action and ai-triggered bypass event-driven gating.
    #[arg(long, value_name = "TRIGGER")]
    pub trigger: Option<TriggerType>,

    /// Ollama model used for every analysis template
    ///
    /// Overrides each template's preferred model.
    #[arg(short, long, env = "SIMTICK_MODEL")]
    pub model: Option<String>,

    /// Ollama API endpoint URL
    #[arg(long, value_name = "URL", env = "OLLAMA_URL")]
    pub ollama_url: Option<String>,

    /// Run without an analysis backend
    ///
    /// Every analysis takes its deterministic fallback path.
    #[arg(long)]
    pub offline: bool,

    /// Output format (markdown, json)
    #[arg(long, default_value = "markdown", value_name = "FORMAT")]
    pub format: ReportFormat,

    /// Output file path for the report
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Starting population of the simulated civilization
    #[arg(long, value_name = "COUNT")]
    pub population: Option<u64>,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long)]
    pub quiet: bool,

    /// Override a knob: SYSTEM.KNOB=VALUE (repeatable)
    ///
    /// Example: --knob population.birth_rate=0.03
    #[arg(long = "knob", value_name = "SYSTEM.KNOB=VALUE")]
    pub knobs: Vec<String>,

    /// Exit with code 2 if any system ends the run unhealthy
    #[arg(long)]
    pub fail_on_unhealthy: bool,

    /// Generate a default .simtick.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

/// Split `system.knob=value` into its parts.
pub fn parse_knob_override(raw: &str) -> Result<(String, String, KnobValue), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("Knob override '{}' must look like SYSTEM.KNOB=VALUE", raw))?;
    let (system, knob) = key
        .trim()
        .split_once('.')
        .ok_or_else(|| format!("Knob override '{}' is missing the system prefix", raw))?;

    if system.is_empty() || knob.is_empty() {
        return Err(format!("Knob override '{}' has an empty system or knob name", raw));
    }
    if value.trim().is_empty() {
        return Err(format!("Knob override '{}' has no value", raw));
    }

    Ok((
        system.to_string(),
        knob.to_string(),
        KnobValue::parse_literal(value),
    ))
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        if self.init_config {
            return Ok(());
        }

        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        if !self.offline {
            if let Some(ref url) = self.ollama_url {
                if !url.starts_with("http://") && !url.starts_with("https://") {
                    return Err("Ollama URL must start with 'http://' or 'https://'".to_string());
                }
            }
        }

        if self.ticks == Some(0) {
            return Err("Ticks must be at least 1".to_string());
        }

        self.knob_overrides()?;

        Ok(())
    }

    /// Parsed `--knob` overrides in command-line order.
    pub fn knob_overrides(&self) -> Result<Vec<(String, String, KnobValue)>, String> {
        self.knobs.iter().map(|raw| parse_knob_override(raw)).collect()
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}
