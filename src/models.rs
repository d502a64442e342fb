//! Data models for the farm risk pipeline.
//!
//! This module contains the core data structures shared by the loaders,
//! the aggregators and the renderer: farm-day rows, test results,
//! outbreak intervals, risk classes and run summaries.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Abortion rate at which a farm leaves the low-risk band (0.25%).
pub const ELEVATED_THRESHOLD: f64 = 0.0025;

/// Abortion rate at which a farm enters the high-risk band (0.5%).
pub const HIGH_THRESHOLD: f64 = 0.005;

/// Canonical column names written to processed tables.
pub mod columns {
    pub const DATE: &str = "date_code";
    pub const PEER_MEAN: &str = "abortion_1_7_l3_mean";
    pub const PEER_STDDEV: &str = "abortion_1_7_l3_var";
    pub const POSITIVITY: &str = "prrs_check_out_ratio";

    /// Derived columns, in output order.
    pub const DERIVED: [&str; 3] = [PEER_MEAN, PEER_STDDEV, POSITIVITY];
}

/// One farm's record for one calendar date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FarmDayRecord {
    /// Farm identifier.
    pub farm_id: String,
    /// Farm display name (used for chart titles and file names).
    pub farm_name: String,
    /// Calendar date of the observation.
    pub date: NaiveDate,
    /// Level-3 organizational unit (the peer cohort).
    pub org_unit: String,
    /// Fraction of sows aborting, if reported.
    pub abortion_rate: Option<f64>,
    /// Mean abortion rate of the other farms in the same unit on the same day.
    pub peer_mean: Option<f64>,
    /// Sample standard deviation matching `peer_mean`.
    pub peer_stddev: Option<f64>,
    /// Trailing-window test positivity ratio.
    pub positivity_ratio: Option<f64>,
}

impl FarmDayRecord {
    /// Creates a record with no derived fields.
    pub fn new(
        farm_id: impl Into<String>,
        date: NaiveDate,
        org_unit: impl Into<String>,
        abortion_rate: Option<f64>,
    ) -> Self {
        let farm_id = farm_id.into();
        Self {
            farm_name: farm_id.clone(),
            farm_id,
            date,
            org_unit: org_unit.into(),
            abortion_rate,
            peer_mean: None,
            peer_stddev: None,
            positivity_ratio: None,
        }
    }
}

/// A farm-day table together with the raw cells it was read from.
///
/// `raw_rows[i]` holds the original cells of `records[i]`, aligned with
/// `columns`. Derived columns are never part of `columns`; they are appended
/// on output from the typed fields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FarmDayTable {
    pub columns: Vec<String>,
    pub raw_rows: Vec<Vec<String>>,
    pub records: Vec<FarmDayRecord>,
}

impl FarmDayTable {
    /// Builds a table from typed records only (no passthrough columns).
    #[cfg(test)]
    pub fn from_records(records: Vec<FarmDayRecord>) -> Self {
        Self {
            columns: Vec::new(),
            raw_rows: vec![Vec::new(); records.len()],
            records,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// One disease-test batch reported for a farm on a date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResultRecord {
    pub farm_id: String,
    pub date: NaiveDate,
    pub check_item: String,
    pub index_item: String,
    /// Number of samples tested.
    pub check_qty: f64,
    /// Number of samples returning positive.
    pub check_out_qty: f64,
}

/// A declared disease episode on a farm (inclusive on both ends).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutbreakInterval {
    pub farm_id: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl OutbreakInterval {
    /// Returns the part of this interval inside `[from, to]`, if any.
    pub fn clip(&self, from: NaiveDate, to: NaiveDate) -> Option<(NaiveDate, NaiveDate)> {
        if self.end < from || self.start > to {
            return None;
        }
        Some((self.start.max(from), self.end.min(to)))
    }
}

/// Colour band of a single abortion-rate value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskBand {
    /// Below 0.25%
    Low,
    /// 0.25% up to 0.5%
    Elevated,
    /// 0.5% and above
    High,
}

impl RiskBand {
    pub fn from_rate(rate: f64) -> Self {
        if rate < ELEVATED_THRESHOLD {
            RiskBand::Low
        } else if rate < HIGH_THRESHOLD {
            RiskBand::Elevated
        } else {
            RiskBand::High
        }
    }
}

impl fmt::Display for RiskBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskBand::Low => write!(f, "Low"),
            RiskBand::Elevated => write!(f, "Elevated"),
            RiskBand::High => write!(f, "High"),
        }
    }
}

/// Chart class of a farm, chosen from its peak abortion rate.
///
/// The numeric value doubles as the chart file-name prefix, so files sort
/// with the riskiest farms last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RiskTier {
    Tier0,
    Tier1,
    Tier2,
    Tier3,
}

impl RiskTier {
    pub const ALL: [RiskTier; 4] = [
        RiskTier::Tier0,
        RiskTier::Tier1,
        RiskTier::Tier2,
        RiskTier::Tier3,
    ];

    /// Classifies a farm by the highest abortion rate it reported.
    pub fn from_peak(peak: f64) -> Self {
        if peak >= 0.05 {
            RiskTier::Tier3
        } else if peak >= HIGH_THRESHOLD {
            RiskTier::Tier2
        } else if peak >= ELEVATED_THRESHOLD {
            RiskTier::Tier1
        } else {
            RiskTier::Tier0
        }
    }

    pub fn prefix(&self) -> &'static str {
        match self {
            RiskTier::Tier0 => "0",
            RiskTier::Tier1 => "1",
            RiskTier::Tier2 => "2",
            RiskTier::Tier3 => "3",
        }
    }

    /// Upper bound of the chart's y axis.
    pub fn y_max(&self) -> f64 {
        match self {
            RiskTier::Tier3 => 0.1,
            _ => 0.05,
        }
    }

    /// Spacing between y-axis labels.
    pub fn y_step(&self) -> f64 {
        match self {
            RiskTier::Tier3 => 0.01,
            _ => 0.005,
        }
    }
}

impl fmt::Display for RiskTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tier {}", self.prefix())
    }
}

/// How many rows received each derived value during aggregation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoverageStats {
    /// Farm-day rows processed.
    pub rows: usize,
    /// Distinct (date, org-unit) groups.
    pub groups: usize,
    /// Rows with a peer mean.
    pub with_peer_mean: usize,
    /// Rows with a peer standard deviation.
    pub with_peer_stddev: usize,
    /// Rows with a positivity ratio.
    pub with_positivity: usize,
}

impl CoverageStats {
    /// Share of rows without a positivity ratio, in percent.
    pub fn positivity_missing_pct(&self) -> f64 {
        if self.rows == 0 {
            return 0.0;
        }
        (self.rows - self.with_positivity) as f64 / self.rows as f64 * 100.0
    }
}

/// Result of processing one division.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DivisionSummary {
    /// Division (level-2 unit) name.
    pub division: String,
    /// Aggregation coverage, if the process stage ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coverage: Option<CoverageStats>,
    /// Processed table written, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_path: Option<String>,
    /// Charts written per tier prefix, if the render stage ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub charts: Option<ChartCounts>,
    /// Directory the charts were written to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plot_dir: Option<String>,
}

/// Chart output counts for one division.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChartCounts {
    /// Charts written, indexed by tier.
    pub by_tier: [usize; 4],
    /// Farms skipped because every abortion rate was missing.
    pub skipped: usize,
}

impl ChartCounts {
    pub fn record(&mut self, tier: RiskTier) {
        self.by_tier[tier as usize] += 1;
    }

    pub fn total(&self) -> usize {
        self.by_tier.iter().sum()
    }
}

/// Metadata about a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetadata {
    /// When the run started.
    pub run_date: DateTime<Utc>,
    /// Stage(s) executed.
    pub stage: String,
    /// Trailing window used for positivity ratios, in days.
    pub window_days: u32,
    /// Test records kept after allow-list filtering.
    pub panel_tests: usize,
    /// Outbreak intervals loaded.
    pub outbreaks: usize,
    /// Duration of the run in seconds.
    pub duration_seconds: f64,
}

/// The complete run summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub metadata: RunMetadata,
    pub divisions: Vec<DivisionSummary>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_risk_band_thresholds() {
        assert_eq!(RiskBand::from_rate(0.0), RiskBand::Low);
        assert_eq!(RiskBand::from_rate(0.00249), RiskBand::Low);
        assert_eq!(RiskBand::from_rate(0.0025), RiskBand::Elevated);
        assert_eq!(RiskBand::from_rate(0.00499), RiskBand::Elevated);
        assert_eq!(RiskBand::from_rate(0.005), RiskBand::High);
        assert!(RiskBand::Low < RiskBand::High);
    }

    #[test]
    fn test_risk_tier_from_peak() {
        assert_eq!(RiskTier::from_peak(0.001), RiskTier::Tier0);
        assert_eq!(RiskTier::from_peak(0.0025), RiskTier::Tier1);
        assert_eq!(RiskTier::from_peak(0.005), RiskTier::Tier2);
        assert_eq!(RiskTier::from_peak(0.049), RiskTier::Tier2);
        assert_eq!(RiskTier::from_peak(0.05), RiskTier::Tier3);

        assert_eq!(RiskTier::Tier3.prefix(), "3");
        assert_eq!(RiskTier::Tier3.y_max(), 0.1);
        assert_eq!(RiskTier::Tier1.y_max(), 0.05);
        assert_eq!(RiskTier::Tier0.y_step(), 0.005);
    }

    #[test]
    fn test_outbreak_clip() {
        let outbreak = OutbreakInterval {
            farm_id: "F1".to_string(),
            start: date("2024-01-05"),
            end: date("2024-02-10"),
        };

        assert_eq!(
            outbreak.clip(date("2024-01-01"), date("2024-01-31")),
            Some((date("2024-01-05"), date("2024-01-31")))
        );
        assert_eq!(
            outbreak.clip(date("2024-02-10"), date("2024-03-01")),
            Some((date("2024-02-10"), date("2024-02-10")))
        );
        assert_eq!(outbreak.clip(date("2024-02-11"), date("2024-03-01")), None);
        assert_eq!(outbreak.clip(date("2023-12-01"), date("2024-01-04")), None);
    }

    #[test]
    fn test_coverage_missing_pct() {
        let coverage = CoverageStats {
            rows: 4,
            with_positivity: 1,
            ..Default::default()
        };
        assert_eq!(coverage.positivity_missing_pct(), 75.0);
        assert_eq!(CoverageStats::default().positivity_missing_pct(), 0.0);
    }

    #[test]
    fn test_chart_counts() {
        let mut counts = ChartCounts::default();
        counts.record(RiskTier::Tier0);
        counts.record(RiskTier::Tier3);
        counts.record(RiskTier::Tier3);
        assert_eq!(counts.by_tier, [1, 0, 0, 2]);
        assert_eq!(counts.total(), 3);
    }
}
