//! Configuration file handling.
//!
//! Settings come from `.simtick.toml` and are then overridden by command-line
//! flags.

use crate::health::HealthPolicy;
use crate::knobs::{KnobSettings, KnobValue};
use crate::models::{CivilizationContext, TriggerType};
use crate::system::RuntimeOptions;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

pub const DEFAULT_CONFIG_FILE: &str = ".simtick.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,

    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub analysis: AnalysisConfig,

    #[serde(default)]
    pub simulation: SimulationConfig,

    /// Knob overrides keyed by system id.
    #[serde(default)]
    pub knobs: BTreeMap<String, KnobSettings>,
}

/// General application settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Default report path.
    #[serde(default = "default_output")]
    pub output: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            output: default_output(),
        }
    }
}

fn default_output() -> String {
    "simtick_report.md".to_string()
}

/// History and health settings shared by every subsystem runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,

    /// Number of recent executions health is judged on.
    #[serde(default = "default_health_window")]
    pub health_window: usize,

    /// Minimum success ratio over the window.
    #[serde(default = "default_health_threshold")]
    pub health_threshold: f64,

    /// Interval for periodic systems that declare none.
    #[serde(default = "default_interval_ms")]
    pub default_interval_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            history_capacity: default_history_capacity(),
            health_window: default_health_window(),
            health_threshold: default_health_threshold(),
            default_interval_ms: default_interval_ms(),
        }
    }
}

fn default_history_capacity() -> usize {
    100
}

fn default_health_window() -> usize {
    10
}

fn default_health_threshold() -> f64 {
    0.8
}

fn default_interval_ms() -> u64 {
    300_000
}

impl EngineConfig {
    pub fn runtime_options(&self) -> RuntimeOptions {
        RuntimeOptions {
            history_capacity: self.history_capacity,
            health: HealthPolicy {
                window: self.health_window.max(1),
                threshold: self.health_threshold.clamp(0.0, 1.0),
            },
            default_interval_ms: self.default_interval_ms,
        }
    }
}

/// Analysis executor settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// When false every analysis takes its fallback path.
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_ollama_url")]
    pub ollama_url: String,

    /// Model used for every template instead of each template's preference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ollama_url: default_ollama_url(),
            model: None,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}

/// What the tick harness simulates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    #[serde(default = "default_ticks")]
    pub ticks: u64,

    #[serde(default = "default_trigger")]
    pub trigger: TriggerType,

    #[serde(default = "default_civilization_id")]
    pub civilization_id: String,

    #[serde(default = "default_civilization_name")]
    pub civilization_name: String,

    #[serde(default = "default_population")]
    pub population: u64,

    /// Economic and social indicators (gdp, unemployment, inflation, ...).
    #[serde(default = "default_indicators")]
    pub indicators: BTreeMap<String, f64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            ticks: default_ticks(),
            trigger: default_trigger(),
            civilization_id: default_civilization_id(),
            civilization_name: default_civilization_name(),
            population: default_population(),
            indicators: default_indicators(),
        }
    }
}

fn default_ticks() -> u64 {
    10
}

fn default_trigger() -> TriggerType {
    TriggerType::Tick
}

fn default_civilization_id() -> String {
    "civ-1".to_string()
}

fn default_civilization_name() -> String {
    "Terran Union".to_string()
}

fn default_population() -> u64 {
    1_000_000
}

fn default_indicators() -> BTreeMap<String, f64> {
    [
        ("gdp", 50_000_000_000.0),
        ("gdp_growth_rate", 0.02),
        ("inflation", 0.02),
        ("unemployment", 0.05),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}

impl SimulationConfig {
    pub fn civilization(&self) -> CivilizationContext {
        CivilizationContext {
            id: self.civilization_id.clone(),
            name: self.civilization_name.clone(),
            total_population: self.population,
            indicators: self.indicators.clone(),
            recent_events: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Load `.simtick.toml` from `dir` if present.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_from_dir(dir: &Path) -> Result<Option<Self>> {
        let path = dir.join(DEFAULT_CONFIG_FILE);

        if path.exists() {
            Ok(Some(Self::load(&path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// Only values given explicitly on the command line override the file.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) -> Result<()> {
        if let Some(ticks) = args.ticks {
            self.simulation.ticks = ticks;
        }
        if let Some(trigger) = args.trigger {
            self.simulation.trigger = trigger;
        }
        if let Some(population) = args.population {
            self.simulation.population = population;
        }

        if let Some(ref url) = args.ollama_url {
            self.analysis.ollama_url = url.clone();
        }
        if let Some(ref model) = args.model {
            self.analysis.model = Some(model.clone());
        }
        if args.offline {
            self.analysis.enabled = false;
        }

        if let Some(ref output) = args.output {
            self.general.output = output.display().to_string();
        }

        for (system_id, name, value) in args.knob_overrides().map_err(anyhow::Error::msg)? {
            self.knobs.entry(system_id).or_default().insert(name, value);
        }

        Ok(())
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let mut config = Config::default();
        config.knobs.insert(
            "population".to_string(),
            [("birth_rate".to_string(), KnobValue::Number(0.015))]
                .into_iter()
                .collect(),
        );
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}
