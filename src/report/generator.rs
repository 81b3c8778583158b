//! Markdown and JSON rendering of simulation reports.

use crate::report::{ReportFormat, ReportMetadata, SimulationReport, SystemReport, TickSummary};
use crate::schedule::ExecutionPlan;
use anyhow::{Context, Result};
use std::path::Path;

/// Generate a complete Markdown report.
pub fn generate_markdown_report(report: &SimulationReport) -> String {
    let mut output = String::new();

    output.push_str("# Simulation Report\n\n");
    output.push_str(&generate_metadata_section(&report.metadata, report));
    output.push_str(&generate_plan_section(&report.plan));
    output.push_str(&generate_systems_section(&report.systems));
    output.push_str(&generate_ticks_section(&report.ticks));
    output.push_str("---\n\n*Report generated by simtick*\n");

    output
}

fn generate_metadata_section(metadata: &ReportMetadata, report: &SimulationReport) -> String {
    let mut section = String::new();

    section.push_str("## Metadata\n\n");
    section.push_str(&format!(
        "- **Generated:** {}\n",
        metadata.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    section.push_str(&format!("- **Civilization:** {}\n", metadata.civilization));
    section.push_str(&format!("- **Ticks:** {}\n", metadata.ticks));
    section.push_str(&format!("- **Analysis:** `{}`\n", metadata.analysis_backend));
    section.push_str(&format!("- **Executions:** {}\n", report.total_runs()));
    if report.total_failures() > 0 {
        section.push_str(&format!("- **Failures:** {}\n", report.total_failures()));
    }
    section.push_str(&format!(
        "- **Duration:** {:.1}s\n\n",
        metadata.duration_seconds
    ));

    section
}

fn generate_plan_section(plan: &ExecutionPlan) -> String {
    let mut section = String::new();

    section.push_str("## Execution Plan\n\n");
    if plan.is_empty() {
        section.push_str("No systems registered.\n\n");
        return section;
    }

    for (i, phase) in plan.phases.iter().enumerate() {
        section.push_str(&format!(
            "{}. **{}**: {}\n",
            i + 1,
            phase.group,
            phase.systems.join(" → ")
        ));
    }
    section.push('\n');

    section
}

fn generate_systems_section(systems: &[SystemReport]) -> String {
    let mut section = String::new();

    section.push_str("## Systems\n\n");
    section.push_str("| System | Runs | Skipped | Success Rate | Avg ms | Fallbacks | Health |\n");
    section.push_str("|:---|:---:|:---:|:---:|:---:|:---:|:---:|\n");
    for system in systems {
        section.push_str(&format!(
            "| `{}` | {} | {} | {:.0}% | {:.1} | {} | {} |\n",
            system.id,
            system.tally.runs,
            system.tally.skipped,
            system.health.success_rate * 100.0,
            system.tally.average_duration_ms(),
            system.tally.fallbacks_used,
            if system.health.healthy {
                "healthy"
            } else {
                "**unhealthy**"
            }
        ));
    }
    section.push('\n');

    for system in systems {
        section.push_str(&generate_system_block(system));
    }

    section
}

fn generate_system_block(system: &SystemReport) -> String {
    let mut block = String::new();

    block.push_str(&format!("### {} (`{}`)\n\n", system.name, system.id));
    block.push_str(&format!(
        "*Tier {} | {} | {} priority | {}*\n\n",
        system.tier, system.execution_group, system.priority, system.frequency
    ));

    let tally = &system.tally;
    block.push_str(&format!(
        "- **Analyses:** {} requested, {} failed, {} cache hits\n",
        tally.analyses_requested, tally.analyses_failed, tally.cache_hits
    ));
    block.push_str(&format!(
        "- **Output:** {} events, {} scheduled actions\n",
        tally.events_generated, tally.scheduled_actions
    ));
    if tally.timeouts_exceeded > 0 {
        block.push_str(&format!(
            "- **Over budget:** {} run(s)\n",
            tally.timeouts_exceeded
        ));
    }
    if !system.health.knobs_valid {
        block.push_str("- **Knobs:** current settings fail validation\n");
    }
    if let Some(ref error) = system.health.last_error {
        block.push_str(&format!("- **Last error:** {}\n", error));
    }
    if !system.templates.is_empty() {
        block.push_str(&format!(
            "- **Templates:** {}\n",
            system
                .templates
                .iter()
                .map(|t| format!("`{}`", t))
                .collect::<Vec<_>>()
                .join(", ")
        ));
    }
    block.push('\n');

    if !system.knobs.is_empty() {
        block.push_str("| Knob | Value |\n|:---|:---|\n");
        for (name, value) in &system.knobs {
            block.push_str(&format!("| `{}` | {} |\n", name, value));
        }
        block.push('\n');
    }

    block
}

fn generate_ticks_section(ticks: &[TickSummary]) -> String {
    let mut section = String::new();

    section.push_str("## Ticks\n\n");
    section.push_str("| Tick | Executed | Skipped | Failed | Events |\n");
    section.push_str("|:---:|:---|:---|:---|:---|\n");
    for tick in ticks {
        section.push_str(&format!(
            "| {} | {} | {} | {} | {} |\n",
            tick.tick,
            list_or_dash(&tick.executed),
            list_or_dash(&tick.skipped),
            list_or_dash(&tick.failed),
            list_or_dash(&tick.events)
        ));
    }
    section.push('\n');

    section
}

fn list_or_dash(items: &[String]) -> String {
    if items.is_empty() {
        "-".to_string()
    } else {
        items.join(", ")
    }
}

/// Generate a JSON report.
pub fn generate_json_report(report: &SimulationReport) -> Result<String> {
    serde_json::to_string_pretty(report).map_err(Into::into)
}

/// Render `report` in `format` and write it to `path`.
pub fn write_report(report: &SimulationReport, format: ReportFormat, path: &Path) -> Result<()> {
    let content = match format {
        ReportFormat::Json => generate_json_report(report)?,
        ReportFormat::Markdown => generate_markdown_report(report),
    };

    std::fs::write(path, content)
        .with_context(|| format!("Failed to write report to {}", path.display()))
}
