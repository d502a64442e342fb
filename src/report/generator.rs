//! Run summary generation.
//!
//! Renders the per-division outcome of a run as Markdown or JSON.

use crate::cli::OutputFormat;
use crate::models::{ChartCounts, CoverageStats, DivisionSummary, RiskTier, RunMetadata, RunSummary};
use anyhow::{Context, Result};
use std::path::Path;

/// Generate a complete Markdown summary.
pub fn generate_markdown_summary(summary: &RunSummary) -> String {
    let mut output = String::new();

    output.push_str("# SowRisk Run Summary\n\n");
    output.push_str(&generate_metadata_section(&summary.metadata));
    output.push_str(&generate_coverage_section(&summary.divisions));
    output.push_str(&generate_charts_section(&summary.divisions));
    output.push_str(&generate_outputs_section(&summary.divisions));
    output.push_str(&generate_footer());

    output
}

fn generate_metadata_section(metadata: &RunMetadata) -> String {
    let mut section = String::new();

    section.push_str("## Metadata\n\n");
    section.push_str(&format!(
        "- **Run Date:** {}\n",
        metadata.run_date.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    section.push_str(&format!("- **Stage:** `{}`\n", metadata.stage));
    section.push_str(&format!(
        "- **Positivity Window:** {} days\n",
        metadata.window_days
    ));
    section.push_str(&format!("- **Panel Tests:** {}\n", metadata.panel_tests));
    section.push_str(&format!("- **Outbreak Intervals:** {}\n", metadata.outbreaks));
    section.push_str(&format!(
        "- **Run Duration:** {:.1}s\n",
        metadata.duration_seconds
    ));
    section.push('\n');

    section
}

fn coverage_row(division: &str, coverage: &CoverageStats) -> String {
    format!(
        "| {} | {} | {} | {} | {} | {} | {:.2}% |\n",
        division,
        coverage.rows,
        coverage.groups,
        coverage.with_peer_mean,
        coverage.with_peer_stddev,
        coverage.with_positivity,
        coverage.positivity_missing_pct()
    )
}

/// Aggregation coverage per division.
fn generate_coverage_section(divisions: &[DivisionSummary]) -> String {
    let processed: Vec<_> = divisions
        .iter()
        .filter_map(|d| d.coverage.as_ref().map(|c| (d.division.as_str(), c)))
        .collect();
    if processed.is_empty() {
        return String::new();
    }

    let mut section = String::new();

    section.push_str("## Aggregation Coverage\n\n");
    section.push_str(
        "| Division | Rows | Groups | Peer Mean | Peer Std Dev | Positivity | Positivity Missing |\n",
    );
    section.push_str("|:---|:---:|:---:|:---:|:---:|:---:|:---:|\n");

    let mut total = CoverageStats::default();
    for (division, coverage) in &processed {
        section.push_str(&coverage_row(division, coverage));
        total.rows += coverage.rows;
        total.groups += coverage.groups;
        total.with_peer_mean += coverage.with_peer_mean;
        total.with_peer_stddev += coverage.with_peer_stddev;
        total.with_positivity += coverage.with_positivity;
    }
    if processed.len() > 1 {
        section.push_str(&coverage_row("**Total**", &total));
    }
    section.push('\n');

    section
}

/// Charts written per tier.
fn generate_charts_section(divisions: &[DivisionSummary]) -> String {
    let rendered: Vec<(&str, &ChartCounts)> = divisions
        .iter()
        .filter_map(|d| d.charts.as_ref().map(|c| (d.division.as_str(), c)))
        .collect();
    if rendered.is_empty() {
        return String::new();
    }

    let mut section = String::new();

    section.push_str("## Charts by Tier\n\n");
    section.push_str("| Division |");
    for tier in RiskTier::ALL {
        section.push_str(&format!(" {} |", tier));
    }
    section.push_str(" **Total** | Skipped |\n");
    section.push_str("|:---|:---:|:---:|:---:|:---:|:---:|:---:|\n");

    for (division, counts) in rendered {
        section.push_str(&format!("| {} |", division));
        for count in counts.by_tier {
            section.push_str(&format!(" {} |", count));
        }
        section.push_str(&format!(" **{}** | {} |\n", counts.total(), counts.skipped));
    }
    section.push('\n');

    section.push_str(
        "*Skipped farms reported no abortion rate on any day. \
         Chart file names start with the tier number.*\n\n",
    );

    section
}

fn generate_outputs_section(divisions: &[DivisionSummary]) -> String {
    let mut lines = Vec::new();
    for division in divisions {
        if let Some(ref path) = division.processed_path {
            lines.push(format!("- {} processed table: `{}`\n", division.division, path));
        }
        if let Some(ref dir) = division.plot_dir {
            lines.push(format!("- {} charts: `{}`\n", division.division, dir));
        }
    }
    if lines.is_empty() {
        return String::new();
    }

    let mut section = String::new();
    section.push_str("## Outputs\n\n");
    for line in lines {
        section.push_str(&line);
    }
    section.push('\n');

    section
}

fn generate_footer() -> String {
    let mut footer = String::new();

    footer.push_str("---\n\n");
    footer.push_str(&format!(
        "*Summary generated by SowRisk v{}*\n",
        env!("CARGO_PKG_VERSION")
    ));

    footer
}

/// Generate a JSON summary.
pub fn generate_json_summary(summary: &RunSummary) -> Result<String> {
    serde_json::to_string_pretty(summary).map_err(Into::into)
}

/// Render the summary in `format` and write it to `path`.
pub fn write_summary(summary: &RunSummary, path: &Path, format: OutputFormat) -> Result<()> {
    let content = match format {
        OutputFormat::Json => generate_json_summary(summary)?,
        OutputFormat::Markdown => generate_markdown_summary(summary),
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }

    std::fs::write(path, content)
        .with_context(|| format!("Failed to write summary to {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn create_test_summary() -> RunSummary {
        let mut charts = ChartCounts::default();
        charts.record(RiskTier::Tier0);
        charts.record(RiskTier::Tier3);
        charts.record(RiskTier::Tier3);
        charts.skipped = 1;

        RunSummary {
            metadata: RunMetadata {
                run_date: Utc::now(),
                stage: "all".to_string(),
                window_days: 15,
                panel_tests: 120,
                outbreaks: 4,
                duration_seconds: 12.5,
            },
            divisions: vec![
                DivisionSummary {
                    division: "east".to_string(),
                    coverage: Some(CoverageStats {
                        rows: 200,
                        groups: 40,
                        with_peer_mean: 180,
                        with_peer_stddev: 150,
                        with_positivity: 50,
                    }),
                    processed_path: Some("processed_data/east.csv".to_string()),
                    charts: Some(charts),
                    plot_dir: Some("tmp/abortion_plots/east".to_string()),
                },
                DivisionSummary {
                    division: "west".to_string(),
                    coverage: Some(CoverageStats {
                        rows: 100,
                        groups: 10,
                        with_peer_mean: 90,
                        with_peer_stddev: 80,
                        with_positivity: 100,
                    }),
                    ..Default::default()
                },
            ],
        }
    }

    #[test]
    fn test_generate_markdown_summary() {
        let markdown = generate_markdown_summary(&create_test_summary());

        assert!(markdown.contains("# SowRisk Run Summary"));
        assert!(markdown.contains("## Metadata"));
        assert!(markdown.contains("- **Positivity Window:** 15 days"));
        assert!(markdown.contains("| east | 200 | 40 | 180 | 150 | 50 | 75.00% |"));
        assert!(markdown.contains("| west | 100 | 10 | 90 | 80 | 100 | 0.00% |"));
        assert!(markdown.contains("| **Total** | 300 | 50 | 270 | 230 | 150 | 50.00% |"));
        assert!(markdown.contains("| east | 1 | 0 | 0 | 2 | **3** | 1 |"));
        assert!(markdown.contains("`tmp/abortion_plots/east`"));
        assert!(!markdown.contains("| west | 0 |"));
    }

    #[test]
    fn test_sections_omitted_when_stage_skipped() {
        let mut summary = create_test_summary();
        for division in &mut summary.divisions {
            division.charts = None;
            division.plot_dir = None;
        }

        let markdown = generate_markdown_summary(&summary);
        assert!(markdown.contains("## Aggregation Coverage"));
        assert!(!markdown.contains("## Charts by Tier"));
    }

    #[test]
    fn test_generate_json_summary() {
        let json = generate_json_summary(&create_test_summary()).unwrap();

        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["metadata"]["window_days"], 15);
        assert_eq!(value["divisions"][0]["charts"]["by_tier"][3], 2);
        assert!(value["divisions"][1].get("charts").is_none());
    }

    #[test]
    fn test_write_summary() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("summary.json");

        write_summary(&create_test_summary(), &path, OutputFormat::Json).unwrap();
        let parsed: RunSummary = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed.divisions.len(), 2);
    }
}
