//! Aggregation passes over the farm-day table.
//!
//! [`augment`] runs the peer-statistics pass and the positivity pass and
//! returns a new table; the input is never modified.

pub mod peer;
pub mod positivity;

pub use peer::{compute_peer_stats, count_cohorts};
pub use positivity::{compute_positivity, PositivityIndex, TestPanelFilter};

use crate::models::{CoverageStats, FarmDayTable};
use tracing::info;

/// Fill the derived fields of every record.
pub fn augment(table: &FarmDayTable, index: &PositivityIndex) -> (FarmDayTable, CoverageStats) {
    info!("Computing peer statistics for {} rows", table.len());
    let peer_stats = compute_peer_stats(&table.records);

    info!(
        "Computing {}-day positivity ratios ({} farms with panel tests)",
        index.window_days(),
        index.farm_count()
    );
    let ratios = compute_positivity(&table.records, index);

    let mut augmented = table.clone();
    for ((record, stats), ratio) in augmented.records.iter_mut().zip(peer_stats).zip(ratios) {
        record.peer_mean = stats.mean;
        record.peer_stddev = stats.stddev;
        record.positivity_ratio = ratio;
    }

    let coverage = CoverageStats {
        rows: augmented.len(),
        groups: count_cohorts(&augmented.records),
        with_peer_mean: augmented.records.iter().filter(|r| r.peer_mean.is_some()).count(),
        with_peer_stddev: augmented
            .records
            .iter()
            .filter(|r| r.peer_stddev.is_some())
            .count(),
        with_positivity: augmented
            .records
            .iter()
            .filter(|r| r.positivity_ratio.is_some())
            .count(),
    };

    info!(
        "Positivity ratio missing for {:.2}% of rows",
        coverage.positivity_missing_pct()
    );

    (augmented, coverage)
}
