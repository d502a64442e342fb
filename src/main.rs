//! SowRisk - sow-farm abortion risk aggregation and charts
//!
//! Augments each division's daily farm table with peer statistics and
//! trailing PRRS test positivity, writes the processed tables, and draws a
//! risk chart per farm.
//!
//! Exit codes:
//!   0 - Success
//!   1 - Runtime error (unreadable input, malformed value, write failure, etc.)

mod analysis;
mod cli;
mod config;
mod ingest;
mod models;
mod progress;
mod report;

use analysis::{PositivityIndex, TestPanelFilter};
use anyhow::{Context, Result};
use chrono::Utc;
use cli::{Args, Stage};
use config::Config;
use models::{DivisionSummary, FarmDayTable, RiskTier, RunMetadata, RunSummary};
use std::path::Path;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    init_logging(&args);

    info!("SowRisk v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);

    if let Err(e) = run(args) {
        error!("Run failed: {:#}", e);
        eprintln!("\n❌ Error: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}

/// Handle --init-config: generate a default .sowrisk.toml.
fn handle_init_config() -> Result<()> {
    let path = Path::new(config::CONFIG_FILE);

    if path.exists() {
        eprintln!(
            "⚠️  {} already exists. Remove it first or edit it manually.",
            config::CONFIG_FILE
        );
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content)
        .with_context(|| format!("Failed to write {}", config::CONFIG_FILE))?;

    println!("✅ Created {} with default settings.", config::CONFIG_FILE);
    println!("   Edit it to customize divisions, paths, column names, and the test panel.");
    Ok(())
}

/// Initialize logging based on verbosity settings.
fn init_logging(args: &Args) {
    let level = if args.verbose || args.quiet {
        args.log_level()
    } else {
        // a verbose flag in the config file also counts
        match load_config(args) {
            Ok(config) if config.general.verbose => tracing::Level::DEBUG,
            _ => args.log_level(),
        }
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");
}

/// Run the selected stages for every configured division.
fn run(args: Args) -> Result<()> {
    let start_time = Instant::now();
    let run_date = Utc::now();

    let mut config = load_config(&args)?;
    config.merge_with_args(&args);
    config.validate()?;

    if args.dry_run {
        handle_dry_run(&config, args.stage);
        return Ok(());
    }

    let show_progress = !args.quiet;
    let divisions = config.general.divisions.clone();
    let mut summaries: Vec<DivisionSummary> = divisions
        .iter()
        .map(|division| DivisionSummary {
            division: division.clone(),
            ..Default::default()
        })
        .collect();

    // Step 1: aggregation
    let mut panel_tests = 0;
    let mut window_days = config.analysis.window_days;
    let mut processed: Vec<Option<FarmDayTable>> = vec![None; divisions.len()];
    if args.stage.runs_process() {
        println!("🧪 Loading test results: {}", config.paths.tests_path().display());
        let tests = ingest::load_tests(&config.paths.tests_path(), &config.columns.tests)?;
        let tests = TestPanelFilter::from(&config.filter).retain(tests);
        panel_tests = tests.len();
        println!("   Panel tests: {}", panel_tests);

        let index = PositivityIndex::build(&tests, config.analysis.window_days);
        window_days = index.window_days();

        for (i, division) in divisions.iter().enumerate() {
            let raw_path = config.paths.farm_day_path(division);
            println!("\n📥 [{}] Loading {}", division, raw_path.display());
            let table = ingest::load_farm_days(&raw_path, &config.columns.farm_day)?;
            if table.is_empty() {
                warn!("{} has no rows", raw_path.display());
            }

            println!("🔬 [{}] Aggregating {} rows...", division, table.len());
            let (augmented, coverage) = analysis::augment(&table, &index);
            println!(
                "   Positivity missing: {:.2}%",
                coverage.positivity_missing_pct()
            );

            let out_path = config.paths.processed_path(division);
            report::save_farm_days(&augmented, &out_path)?;
            println!("💾 [{}] Saved {}", division, out_path.display());

            summaries[i].coverage = Some(coverage);
            summaries[i].processed_path = Some(out_path.display().to_string());
            processed[i] = Some(augmented);
        }
    }

    // Step 2: charts
    let mut outbreak_count = 0;
    if args.stage.runs_render() {
        println!("\n🦠 Loading outbreaks: {}", config.paths.outbreaks_path().display());
        let outbreaks =
            ingest::load_outbreaks(&config.paths.outbreaks_path(), &config.columns.outbreaks)?;
        outbreak_count = outbreaks.len();

        for (i, division) in divisions.iter().enumerate() {
            let table = match processed[i].take() {
                Some(table) => table,
                None => {
                    let path = config.paths.processed_path(division);
                    println!("\n📥 [{}] Loading {}", division, path.display());
                    ingest::load_farm_days(&path, &config.columns.farm_day)?
                }
            };

            let plot_dir = config.paths.division_plot_dir(division);
            println!("📈 [{}] Drawing charts into {}", division, plot_dir.display());
            let counts = report::render_division(
                &table,
                &outbreaks,
                &plot_dir,
                &config.chart,
                show_progress,
            )?;
            println!(
                "   Charts: {} ({} farms skipped)",
                counts.total(),
                counts.skipped
            );

            summaries[i].charts = Some(counts);
            summaries[i].plot_dir = Some(plot_dir.display().to_string());
        }
    }

    // Step 3: summary
    let duration = start_time.elapsed().as_secs_f64();
    let summary = RunSummary {
        metadata: RunMetadata {
            run_date,
            stage: args.stage.name().to_string(),
            window_days,
            panel_tests,
            outbreaks: outbreak_count,
            duration_seconds: duration,
        },
        divisions: summaries,
    };

    report::write_summary(&summary, &config.report.summary, args.format)?;
    print_summary(&summary);
    println!(
        "\n✅ Run complete! Summary saved to: {}",
        config.report.summary.display()
    );

    Ok(())
}

fn print_summary(summary: &RunSummary) {
    println!("\n📊 Run Summary:");
    for division in &summary.divisions {
        print!("   {}:", division.division);
        if let Some(ref coverage) = division.coverage {
            print!(
                " {} rows, {} groups, positivity missing {:.2}%",
                coverage.rows,
                coverage.groups,
                coverage.positivity_missing_pct()
            );
        }
        if let Some(ref charts) = division.charts {
            let tiers: Vec<String> = RiskTier::ALL
                .iter()
                .map(|tier| format!("{}={}", tier.prefix(), charts.by_tier[*tier as usize]))
                .collect();
            print!(" | charts {} [{}]", charts.total(), tiers.join(" "));
        }
        println!();
    }
    println!("   Duration: {:.1}s", summary.metadata.duration_seconds);
}

/// Handle --dry-run: list inputs and outputs without reading them.
fn handle_dry_run(config: &Config, stage: Stage) {
    println!("\n🔍 Dry run: stage `{}` (nothing is read or written)\n", stage.name());

    let mark = |path: &Path| if path.exists() { "✓" } else { "✗ missing" };

    if stage.runs_process() {
        let tests = config.paths.tests_path();
        println!("   📄 {} [{}]", tests.display(), mark(&tests));
    }
    if stage.runs_render() {
        let outbreaks = config.paths.outbreaks_path();
        println!("   📄 {} [{}]", outbreaks.display(), mark(&outbreaks));
    }

    for division in &config.general.divisions {
        println!("\n   {}:", division);
        let processed = config.paths.processed_path(division);
        if stage.runs_process() {
            let raw = config.paths.farm_day_path(division);
            println!("     read   {} [{}]", raw.display(), mark(&raw));
            println!("     write  {}", processed.display());
        } else {
            println!("     read   {} [{}]", processed.display(), mark(&processed));
        }
        if stage.runs_render() {
            println!(
                "     charts {}",
                config.paths.division_plot_dir(division).display()
            );
        }
    }

    println!(
        "\n   Positivity window: {} days",
        config.analysis.window_days
    );
    println!("\n✅ Dry run complete.");
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args) -> Result<Config> {
    // Try explicit config path
    if let Some(ref config_path) = args.config {
        info!("Loading config from: {}", config_path.display());
        return Config::load(config_path);
    }

    // Try default location
    match Config::load_default() {
        Ok(Some(config)) => {
            info!("Loaded default config from {}", config::CONFIG_FILE);
            Ok(config)
        }
        Ok(None) => {
            debug!("No config file found, using defaults");
            Ok(Config::default())
        }
        Err(e) => {
            warn!("Failed to load config: {}", e);
            Ok(Config::default())
        }
    }
}
