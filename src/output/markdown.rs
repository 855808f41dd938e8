//! Markdown summary generation
//!
//! Renders a harvest summary as a human-readable report: run metadata,
//! overall counters, a per-site table and the sites that halted.

use crate::output::traits::{HarvestSummary, OutputResult};
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// Writes a markdown summary to `output_path`
///
/// # Arguments
///
/// * `summary` - The harvest summary data
/// * `output_path` - Path where the markdown file should be written
pub fn generate_markdown_summary(summary: &HarvestSummary, output_path: &Path) -> OutputResult<()> {
    let markdown = format_markdown_summary(summary);

    if let Some(parent) = output_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = File::create(output_path)?;
    file.write_all(markdown.as_bytes())?;

    Ok(())
}

/// Formats a harvest summary as markdown
pub fn format_markdown_summary(summary: &HarvestSummary) -> String {
    let mut md = String::new();
    let totals = summary.totals();

    md.push_str("# Lit-Harvest Summary\n\n");

    md.push_str("## Run Information\n\n");
    if let Some(run_id) = summary.run_id {
        md.push_str(&format!("- **Run ID**: {}\n", run_id));
    }
    md.push_str(&format!("- **Started**: {}\n", summary.started_at));
    if let Some(finished) = &summary.finished_at {
        md.push_str(&format!("- **Finished**: {}\n", finished));
    }
    if let Some(duration) = summary.duration_seconds {
        md.push_str(&format!(
            "- **Duration**: {} seconds ({:.2} minutes)\n",
            duration,
            duration as f64 / 60.0
        ));
    }
    md.push_str(&format!("- **Status**: {}\n", summary.status));
    md.push_str(&format!("- **Config Hash**: {}\n\n", summary.config_hash));

    md.push_str("## Overall Statistics\n\n");
    md.push_str(&format!("- **Articles in input**: {}\n", summary.total_articles));
    md.push_str(&format!("- **Already downloaded**: {}\n", summary.skipped));
    md.push_str(&format!("- **Unassigned**: {}\n", summary.unassigned));
    md.push_str(&format!("- **Started**: {}\n", totals.started));
    md.push_str(&format!("- **Downloaded**: {}\n", totals.succeeded));
    md.push_str(&format!("- **Failed**: {}\n", totals.failed_permanently));
    md.push_str(&format!("- **Escalated**: {}\n", summary.escalated));
    md.push_str(&format!("- **Throttling signals**: {}\n", totals.rate_limit_hits));
    md.push_str(&format!("- **Success Rate**: {:.2}%\n", summary.success_rate()));
    md.push_str(&format!("- **Error Rate**: {:.2}%\n\n", summary.error_rate()));

    if !summary.sites.is_empty() {
        md.push_str("## Sites\n\n");
        md.push_str("| Site | Assigned | Skipped | Downloaded | Failed | Escalated | Attempts | Throttled | Seconds |\n");
        md.push_str("|------|----------|---------|------------|--------|-----------|----------|-----------|---------|\n");

        for site in &summary.sites {
            md.push_str(&format!(
                "| {} | {} | {} | {} | {} | {} | {} | {} | {:.1} |\n",
                site.name,
                site.assigned,
                site.skipped,
                site.stats.succeeded,
                site.stats.failed_permanently,
                site.stats.escalated + site.never_started() as u64,
                site.stats.attempts,
                site.stats.rate_limit_hits,
                site.elapsed.as_secs_f64()
            ));
        }
        md.push('\n');
    }

    let halted: Vec<_> = summary.sites.iter().filter(|s| s.is_halted()).collect();
    if !halted.is_empty() {
        md.push_str("## Halted Sites\n\n");
        for site in halted {
            md.push_str(&format!(
                "- **{}**: {}\n",
                site.name,
                site.halt_reason.as_deref().unwrap_or("unknown")
            ));
        }
        md.push('\n');
    }

    md
}
