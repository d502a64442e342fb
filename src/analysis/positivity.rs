//! Trailing-window test positivity per farm-day.
//!
//! `positivity = sum(check_out_qty) / sum(check_qty)` over the farm's own
//! test records dated in `[D - (window - 1), D]`. The test table is filtered
//! once against the panel allow-lists, then indexed per farm as date-sorted
//! prefix sums so every lookup is two binary searches.

use crate::config::FilterConfig;
use crate::models::{FarmDayRecord, TestResultRecord};
use chrono::{Duration, NaiveDate};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Allow-lists of test items and index items that make up the panel.
#[derive(Debug, Clone, Default)]
pub struct TestPanelFilter {
    check_items: HashSet<String>,
    index_items: HashSet<String>,
}

impl TestPanelFilter {
    pub fn new<I, J>(check_items: I, index_items: J) -> Self
    where
        I: IntoIterator<Item = String>,
        J: IntoIterator<Item = String>,
    {
        Self {
            check_items: check_items.into_iter().collect(),
            index_items: index_items.into_iter().collect(),
        }
    }

    /// Both identifiers must be on their allow-list.
    pub fn allows(&self, test: &TestResultRecord) -> bool {
        self.check_items.contains(&test.check_item) && self.index_items.contains(&test.index_item)
    }

    /// Keep only panel tests.
    pub fn retain(&self, tests: Vec<TestResultRecord>) -> Vec<TestResultRecord> {
        let before = tests.len();
        let kept: Vec<_> = tests.into_iter().filter(|t| self.allows(t)).collect();
        debug!("Test panel filter kept {}/{} records", kept.len(), before);
        kept
    }
}

impl From<&FilterConfig> for TestPanelFilter {
    fn from(config: &FilterConfig) -> Self {
        Self::new(config.check_items.clone(), config.index_items.clone())
    }
}

/// Totals of one farm's tests inside a window.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WindowTotals {
    pub records: usize,
    pub check_qty: f64,
    pub check_out_qty: f64,
}

impl WindowTotals {
    /// Missing when the window holds no records or no tested samples.
    pub fn ratio(&self) -> Option<f64> {
        if self.records == 0 || self.check_qty <= 0.0 {
            return None;
        }
        Some(self.check_out_qty / self.check_qty)
    }
}

/// One farm's tests reduced to distinct dates, with prefix sums.
///
/// `cum_*[i]` holds the totals of `dates[..i]`, so the prefix arrays are one
/// longer than `dates`.
#[derive(Debug, Default)]
struct FarmSeries {
    dates: Vec<NaiveDate>,
    cum_records: Vec<usize>,
    cum_qty: Vec<f64>,
    cum_out: Vec<f64>,
}

impl FarmSeries {
    fn from_sorted(tests: &[&TestResultRecord]) -> Self {
        let mut series = FarmSeries {
            cum_records: vec![0],
            cum_qty: vec![0.0],
            cum_out: vec![0.0],
            ..Default::default()
        };

        for test in tests {
            if series.dates.last() != Some(&test.date) {
                series.dates.push(test.date);
                series.cum_records.push(series.cum_records[series.dates.len() - 1]);
                series.cum_qty.push(series.cum_qty[series.dates.len() - 1]);
                series.cum_out.push(series.cum_out[series.dates.len() - 1]);
            }
            let last = series.dates.len();
            series.cum_records[last] += 1;
            series.cum_qty[last] += test.check_qty;
            series.cum_out[last] += test.check_out_qty;
        }

        series
    }

    fn totals(&self, from: NaiveDate, to: NaiveDate) -> WindowTotals {
        let lo = self.dates.partition_point(|d| *d < from);
        let hi = self.dates.partition_point(|d| *d <= to);
        if lo >= hi {
            return WindowTotals::default();
        }

        WindowTotals {
            records: self.cum_records[hi] - self.cum_records[lo],
            check_qty: self.cum_qty[hi] - self.cum_qty[lo],
            check_out_qty: self.cum_out[hi] - self.cum_out[lo],
        }
    }
}

/// Per-farm, date-sorted index over the panel tests.
#[derive(Debug)]
pub struct PositivityIndex {
    window_days: u32,
    farms: HashMap<String, FarmSeries>,
}

impl PositivityIndex {
    /// Index `tests` for windows of `window_days` days ending on the query date.
    pub fn build(tests: &[TestResultRecord], window_days: u32) -> Self {
        let mut by_farm: HashMap<&str, Vec<&TestResultRecord>> = HashMap::new();
        for test in tests {
            by_farm.entry(test.farm_id.as_str()).or_default().push(test);
        }

        let farms = by_farm
            .into_iter()
            .map(|(farm, mut farm_tests)| {
                farm_tests.sort_by_key(|t| t.date);
                (farm.to_string(), FarmSeries::from_sorted(&farm_tests))
            })
            .collect();

        Self {
            window_days: window_days.max(1),
            farms,
        }
    }

    pub fn window_days(&self) -> u32 {
        self.window_days
    }

    /// Number of farms with at least one panel test.
    pub fn farm_count(&self) -> usize {
        self.farms.len()
    }

    /// Totals of `farm`'s tests in the window ending on `date`.
    pub fn window(&self, farm: &str, date: NaiveDate) -> WindowTotals {
        let from = date - Duration::days(i64::from(self.window_days) - 1);
        self.farms
            .get(farm)
            .map(|series| series.totals(from, date))
            .unwrap_or_default()
    }

    /// Positivity ratio for `farm` on `date`, if defined.
    pub fn ratio(&self, farm: &str, date: NaiveDate) -> Option<f64> {
        self.window(farm, date).ratio()
    }
}

/// Compute the positivity ratio of every record, in input order.
pub fn compute_positivity(records: &[FarmDayRecord], index: &PositivityIndex) -> Vec<Option<f64>> {
    records
        .iter()
        .map(|r| index.ratio(&r.farm_id, r.date))
        .collect()
}
