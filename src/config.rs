//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.sowrisk.toml` files.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Name of the configuration file looked up in the working directory.
pub const CONFIG_FILE: &str = ".sowrisk.toml";

/// Placeholder replaced by the division name in file name templates.
const DIVISION_PLACEHOLDER: &str = "{division}";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Input and output locations.
    #[serde(default)]
    pub paths: PathsConfig,

    /// Column names of the input tables.
    #[serde(default)]
    pub columns: ColumnsConfig,

    /// Test panel allow-lists.
    #[serde(default)]
    pub filter: FilterConfig,

    /// Aggregation settings.
    #[serde(default)]
    pub analysis: AnalysisConfig,

    /// Chart settings.
    #[serde(default)]
    pub chart: ChartConfig,

    /// Summary report settings.
    #[serde(default)]
    pub report: ReportConfig,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Divisions (level-2 units) to process, one input file each.
    #[serde(default = "default_divisions")]
    pub divisions: Vec<String>,

    /// Enable verbose logging by default.
    #[serde(default)]
    pub verbose: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            divisions: default_divisions(),
            verbose: false,
        }
    }
}

fn default_divisions() -> Vec<String> {
    vec!["猪业一部", "猪业二部", "猪业三部"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// File locations. `{division}` in a template is replaced by the division name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Directory holding the raw input tables.
    #[serde(default = "default_raw_dir")]
    pub raw_dir: PathBuf,

    /// Directory receiving processed farm-day tables.
    #[serde(default = "default_processed_dir")]
    pub processed_dir: PathBuf,

    /// Directory receiving charts (one subdirectory per division).
    #[serde(default = "default_plot_dir")]
    pub plot_dir: PathBuf,

    /// Raw farm-day file name template, relative to `raw_dir`.
    #[serde(default = "default_farm_day_file")]
    pub farm_day_file: String,

    /// Processed farm-day file name template, relative to `processed_dir`.
    #[serde(default = "default_processed_file")]
    pub processed_file: String,

    /// Disease-test file, relative to `raw_dir`.
    #[serde(default = "default_tests_file")]
    pub tests_file: String,

    /// Outbreak-interval file, relative to `raw_dir`.
    #[serde(default = "default_outbreaks_file")]
    pub outbreaks_file: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            raw_dir: default_raw_dir(),
            processed_dir: default_processed_dir(),
            plot_dir: default_plot_dir(),
            farm_day_file: default_farm_day_file(),
            processed_file: default_processed_file(),
            tests_file: default_tests_file(),
            outbreaks_file: default_outbreaks_file(),
        }
    }
}

fn default_raw_dir() -> PathBuf {
    PathBuf::from("raw_data")
}

fn default_processed_dir() -> PathBuf {
    PathBuf::from("processed_data")
}

fn default_plot_dir() -> PathBuf {
    PathBuf::from("tmp/abortion_plots")
}

fn default_farm_day_file() -> String {
    "ads_pig_org_total_to_ml_training_day_abortion_{division}.csv".to_string()
}

fn default_processed_file() -> String {
    "ads_pig_org_total_to_ml_training_day_abortion_{division}_processed.csv".to_string()
}

fn default_tests_file() -> String {
    "TMP_PIG_ORG_DISEASE_CHECK_RESULT_DAY_prrs.csv".to_string()
}

fn default_outbreaks_file() -> String {
    "ADS_PIG_FARM_AND_REARER_ONSET.csv".to_string()
}

impl PathsConfig {
    /// Raw farm-day table for a division.
    pub fn farm_day_path(&self, division: &str) -> PathBuf {
        self.raw_dir
            .join(self.farm_day_file.replace(DIVISION_PLACEHOLDER, division))
    }

    /// Processed farm-day table for a division.
    pub fn processed_path(&self, division: &str) -> PathBuf {
        self.processed_dir
            .join(self.processed_file.replace(DIVISION_PLACEHOLDER, division))
    }

    /// Chart directory for a division.
    pub fn division_plot_dir(&self, division: &str) -> PathBuf {
        self.plot_dir.join(division)
    }

    pub fn tests_path(&self) -> PathBuf {
        self.raw_dir.join(&self.tests_file)
    }

    pub fn outbreaks_path(&self) -> PathBuf {
        self.raw_dir.join(&self.outbreaks_file)
    }
}

/// Column names of every input table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ColumnsConfig {
    #[serde(default)]
    pub farm_day: FarmDayColumns,

    #[serde(default)]
    pub tests: TestColumns,

    #[serde(default)]
    pub outbreaks: OutbreakColumns,
}

/// Farm-day table columns.
///
/// The date column falls back to `date_code` when the configured name is
/// absent, so processed tables can be read with the same settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FarmDayColumns {
    #[serde(default = "default_farm_id_column")]
    pub farm_id: String,

    /// Display name; the farm id is used when the column is absent.
    #[serde(default = "default_farm_name_column")]
    pub farm_name: String,

    #[serde(default = "default_stats_date_column")]
    pub date: String,

    #[serde(default = "default_org_unit_column")]
    pub org_unit: String,

    #[serde(default = "default_abortion_column")]
    pub abortion_rate: String,
}

impl Default for FarmDayColumns {
    fn default() -> Self {
        Self {
            farm_id: default_farm_id_column(),
            farm_name: default_farm_name_column(),
            date: default_stats_date_column(),
            org_unit: default_org_unit_column(),
            abortion_rate: default_abortion_column(),
        }
    }
}

fn default_farm_id_column() -> String {
    "pigfarm_dk".to_string()
}

fn default_farm_name_column() -> String {
    "org_inv_nm".to_string()
}

fn default_stats_date_column() -> String {
    "stats_dt".to_string()
}

fn default_org_unit_column() -> String {
    "l3_org_inv_nm".to_string()
}

fn default_abortion_column() -> String {
    "abortion_1_7".to_string()
}

/// Disease-test table columns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestColumns {
    #[serde(default = "default_org_id_column")]
    pub farm_id: String,

    #[serde(default = "default_receive_date_column")]
    pub date: String,

    #[serde(default = "default_check_item_column")]
    pub check_item: String,

    #[serde(default = "default_index_item_column")]
    pub index_item: String,

    #[serde(default = "default_check_qty_column")]
    pub check_qty: String,

    #[serde(default = "default_check_out_qty_column")]
    pub check_out_qty: String,
}

impl Default for TestColumns {
    fn default() -> Self {
        Self {
            farm_id: default_org_id_column(),
            date: default_receive_date_column(),
            check_item: default_check_item_column(),
            index_item: default_index_item_column(),
            check_qty: default_check_qty_column(),
            check_out_qty: default_check_out_qty_column(),
        }
    }
}

fn default_org_id_column() -> String {
    "org_inv_dk".to_string()
}

fn default_receive_date_column() -> String {
    "receive_dt".to_string()
}

fn default_check_item_column() -> String {
    "check_item_dk".to_string()
}

fn default_index_item_column() -> String {
    "index_item_dk".to_string()
}

fn default_check_qty_column() -> String {
    "check_qty".to_string()
}

fn default_check_out_qty_column() -> String {
    "check_out_qty".to_string()
}

/// Outbreak-interval table columns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutbreakColumns {
    #[serde(default = "default_org_id_column")]
    pub farm_id: String,

    #[serde(default = "default_start_column")]
    pub start: String,

    #[serde(default = "default_end_column")]
    pub end: String,
}

impl Default for OutbreakColumns {
    fn default() -> Self {
        Self {
            farm_id: default_org_id_column(),
            start: default_start_column(),
            end: default_end_column(),
        }
    }
}

fn default_start_column() -> String {
    "start_dt".to_string()
}

fn default_end_column() -> String {
    "end_dt".to_string()
}

/// Allow-lists applied to the test table before windowing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Accepted test items (wild virus, antigen, antibody).
    #[serde(default = "default_check_items")]
    pub check_items: Vec<String>,

    /// Accepted index items (wild virus, band, antigen, antibody, s/p).
    #[serde(default = "default_index_items")]
    pub index_items: Vec<String>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            check_items: default_check_items(),
            index_items: default_index_items(),
        }
    }
}

fn default_check_items() -> Vec<String> {
    vec![
        // wild virus
        "bDoAAfRM6YiCrSt1",
        "bDoAArPPgj6CrSt1",
        "bDoAAfRM6IGCrSt1",
        "bDoAAfYsNUGCrSt1",
        "bDoAAfYsM8eCrSt1",
        "bDoAAfYr79SCrSt1",
        // antigen
        "bDoAAJyZSTSCrSt1",
        "bDoAAfYgkW2CrSt1",
        "bDoAAfYq6LWCrSt1",
        "bDoAAfYq6kWCrSt1",
        "bDoAAfYsNKyCrSt1",
        "bDoAAwWyhPOCrSt1",
        // antibody
        "bDoAAJyZSZiCrSt1",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_index_items() -> Vec<String> {
    vec![
        // wild virus
        "bDoAAfYcdbLWD/D5",
        "bDoAAfYcdbTWD/D5",
        // band
        "bDoAAKqffmXWD/D5",
        "bDoAAKqewhjWD/D5",
        // antigen
        "bDoAAfYq6kvWD/D5",
        // antibody, s/p
        "bDoAAKqZiKzWD/D5",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

/// Aggregation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Length of the trailing positivity window, including the current day.
    #[serde(default = "default_window_days")]
    pub window_days: u32,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            window_days: default_window_days(),
        }
    }
}

fn default_window_days() -> u32 {
    15
}

/// Chart geometry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChartConfig {
    /// Pixels per inch of nominal figure size.
    #[serde(default = "default_pixels_per_inch")]
    pub pixels_per_inch: u32,

    /// Minimum figure width in inches.
    #[serde(default = "default_min_width_in")]
    pub min_width_in: f64,

    /// Figure width added per day of data, in inches.
    #[serde(default = "default_width_per_day_in")]
    pub width_per_day_in: f64,

    /// Figure height in inches.
    #[serde(default = "default_height_in")]
    pub height_in: f64,
}

impl Default for ChartConfig {
    fn default() -> Self {
        Self {
            pixels_per_inch: default_pixels_per_inch(),
            min_width_in: default_min_width_in(),
            width_per_day_in: default_width_per_day_in(),
            height_in: default_height_in(),
        }
    }
}

fn default_pixels_per_inch() -> u32 {
    40
}

fn default_min_width_in() -> f64 {
    48.0
}

fn default_width_per_day_in() -> f64 {
    0.1
}

fn default_height_in() -> f64 {
    16.0
}

impl ChartConfig {
    /// Canvas size in pixels for a chart spanning `day_span` days.
    pub fn canvas_size(&self, day_span: i64) -> (u32, u32) {
        let width_in = self
            .min_width_in
            .max(day_span.max(0) as f64 * self.width_per_day_in);
        let ppi = self.pixels_per_inch.max(1) as f64;
        (
            (width_in * ppi).round() as u32,
            (self.height_in * ppi).round() as u32,
        )
    }
}

/// Summary report settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    /// Where to write the run summary.
    #[serde(default = "default_summary_path")]
    pub summary: PathBuf,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            summary: default_summary_path(),
        }
    }
}

fn default_summary_path() -> PathBuf {
    PathBuf::from("sowrisk_summary.md")
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("Invalid config file: {}", path.display()))?;

        Ok(config)
    }

    /// Reject settings no run can use.
    pub fn validate(&self) -> Result<()> {
        if self.analysis.window_days == 0 {
            anyhow::bail!("analysis.window_days must be at least 1");
        }
        if self.general.divisions.iter().all(|d| d.trim().is_empty()) {
            anyhow::bail!("general.divisions must name at least one division");
        }
        Ok(())
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(CONFIG_FILE);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence over config file settings.
    /// This method only overrides config when CLI provides explicit values.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(ref divisions) = args.divisions {
            self.general.divisions = divisions.clone();
        }

        if let Some(ref dir) = args.raw_dir {
            self.paths.raw_dir = dir.clone();
        }
        if let Some(ref dir) = args.processed_dir {
            self.paths.processed_dir = dir.clone();
        }
        if let Some(ref dir) = args.plot_dir {
            self.paths.plot_dir = dir.clone();
        }

        if let Some(days) = args.window_days {
            self.analysis.window_days = days;
        }

        if let Some(ref summary) = args.summary {
            self.report.summary = summary.clone();
        }

        // Flags always override
        if args.verbose {
            self.general.verbose = true;
        }
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.general.divisions.len(), 3);
        assert_eq!(config.analysis.window_days, 15);
        assert_eq!(config.columns.farm_day.date, "stats_dt");
        assert_eq!(config.columns.tests.farm_id, "org_inv_dk");
        assert!(config
            .filter
            .check_items
            .contains(&"bDoAAJyZSZiCrSt1".to_string()));
    }

    #[test]
    fn test_parse_config() {
        let toml_content = r#"
[general]
divisions = ["north", "south"]
verbose = true

[paths]
raw_dir = "input"
farm_day_file = "farms_{division}.csv"

[analysis]
window_days = 7

[columns.farm_day]
abortion_rate = "abortion_rate"
"#;

        let config: Config = toml::from_str(toml_content).unwrap();
        assert_eq!(config.general.divisions, vec!["north", "south"]);
        assert!(config.general.verbose);
        assert_eq!(config.analysis.window_days, 7);
        assert_eq!(config.columns.farm_day.abortion_rate, "abortion_rate");
        assert_eq!(config.columns.farm_day.farm_id, "pigfarm_dk");
        assert_eq!(
            config.paths.farm_day_path("north"),
            PathBuf::from("input").join("farms_north.csv")
        );
        assert_eq!(config.paths.processed_dir, PathBuf::from("processed_data"));
    }

    #[test]
    fn test_division_paths() {
        let paths = PathsConfig::default();
        assert_eq!(
            paths.processed_path("east"),
            PathBuf::from("processed_data")
                .join("ads_pig_org_total_to_ml_training_day_abortion_east_processed.csv")
        );
        assert_eq!(
            paths.division_plot_dir("east"),
            PathBuf::from("tmp/abortion_plots").join("east")
        );
    }

    #[test]
    fn test_canvas_size() {
        let chart = ChartConfig::default();
        // short spans use the minimum width
        assert_eq!(chart.canvas_size(30), (1920, 640));
        // 1000 days * 0.1in = 100in
        assert_eq!(chart.canvas_size(1000), (4000, 640));
    }

    #[test]
    fn test_default_toml_generation() {
        let toml_str = Config::default_toml();
        assert!(!toml_str.is_empty());
        assert!(toml_str.contains("[general]"));
        assert!(toml_str.contains("[paths]"));
        assert!(toml_str.contains("[filter]"));

        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.filter.index_items, default_index_items());
    }

    #[test]
    fn test_merge_with_args() {
        let mut args = crate::cli::tests::make_args();
        args.divisions = Some(vec!["east".to_string()]);
        args.plot_dir = Some(PathBuf::from("/tmp/plots"));
        args.window_days = Some(30);
        args.verbose = true;

        let mut config = Config::default();
        config.merge_with_args(&args);

        assert_eq!(config.general.divisions, vec!["east".to_string()]);
        assert_eq!(config.paths.plot_dir, PathBuf::from("/tmp/plots"));
        assert_eq!(config.paths.raw_dir, PathBuf::from("raw_data"));
        assert_eq!(config.analysis.window_days, 30);
        assert!(config.general.verbose);
    }

    #[test]
    fn test_load_rejects_zero_window() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, b"[analysis]\nwindow_days = 0\n").unwrap();

        let err = Config::load(file.path()).unwrap_err();
        assert!(format!("{:#}", err).contains("window_days"));

        let mut config = Config::default();
        assert!(config.validate().is_ok());
        config.general.divisions = vec![" ".to_string()];
        assert!(config.validate().is_err());
    }
}
