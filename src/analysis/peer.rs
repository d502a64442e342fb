//! Peer statistics within (date, org-unit) cohorts.
//!
//! For every farm-day the mean and sample standard deviation of the abortion
//! rate over the *other* farms reporting in the same level-3 unit on the same
//! day. Each cohort is summarised once (count, sum, sum of squares), each
//! farm's own contribution is summarised alongside it, and a farm's peer
//! figures are the cohort totals minus its own.

use crate::models::FarmDayRecord;
use chrono::NaiveDate;
use std::collections::HashMap;

/// Peer figures for one farm-day.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PeerStats {
    /// Mean over peers with a reported rate (needs at least one).
    pub mean: Option<f64>,
    /// Sample standard deviation, N-1 divisor (needs at least two).
    pub stddev: Option<f64>,
}

/// Running moments of values shifted by the cohort's first observation.
#[derive(Debug, Clone, Copy, Default)]
struct Moments {
    count: usize,
    sum: f64,
    sum_sq: f64,
}

impl Moments {
    fn add(&mut self, shifted: f64) {
        self.count += 1;
        self.sum += shifted;
        self.sum_sq += shifted * shifted;
    }

    fn without(&self, other: &Moments) -> Moments {
        Moments {
            count: self.count - other.count,
            sum: self.sum - other.sum,
            sum_sq: self.sum_sq - other.sum_sq,
        }
    }

    fn stats(&self, shift: f64) -> PeerStats {
        if self.count == 0 {
            return PeerStats::default();
        }

        let n = self.count as f64;
        let mean = shift + self.sum / n;

        let stddev = if self.count >= 2 {
            let variance = (self.sum_sq - self.sum * self.sum / n) / (n - 1.0);
            Some(variance.max(0.0).sqrt())
        } else {
            None
        };

        PeerStats {
            mean: Some(mean),
            stddev,
        }
    }
}

#[derive(Debug, Default)]
struct Cohort<'a> {
    shift: Option<f64>,
    total: Moments,
    by_farm: HashMap<&'a str, Moments>,
}

type CohortKey<'a> = (NaiveDate, &'a str);

/// Compute peer statistics for every record, in input order.
///
/// All rows of a farm are excluded from its own peers, including duplicate
/// rows of that farm on the same day. Missing rates are skipped.
pub fn compute_peer_stats(records: &[FarmDayRecord]) -> Vec<PeerStats> {
    let mut cohorts: HashMap<CohortKey<'_>, Cohort<'_>> = HashMap::new();

    for record in records {
        let cohort = cohorts
            .entry((record.date, record.org_unit.as_str()))
            .or_default();

        // register the farm even without a rate so the lookup below is uniform
        let own = cohort.by_farm.entry(record.farm_id.as_str()).or_default();

        if let Some(rate) = record.abortion_rate {
            let shift = *cohort.shift.get_or_insert(rate);
            own.add(rate - shift);
            cohort.total.add(rate - shift);
        }
    }

    records
        .iter()
        .map(|record| {
            let cohort = &cohorts[&(record.date, record.org_unit.as_str())];
            let own = cohort.by_farm[record.farm_id.as_str()];
            match cohort.shift {
                Some(shift) => cohort.total.without(&own).stats(shift),
                None => PeerStats::default(),
            }
        })
        .collect()
}

/// Number of distinct (date, org-unit) cohorts.
pub fn count_cohorts(records: &[FarmDayRecord]) -> usize {
    records
        .iter()
        .map(|r| (r.date, r.org_unit.as_str()))
        .collect::<std::collections::HashSet<_>>()
        .len()
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-12;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    fn rec(farm: &str, date: NaiveDate, unit: &str, rate: Option<f64>) -> FarmDayRecord {
        FarmDayRecord::new(farm, date, unit, rate)
    }

    fn assert_close(actual: Option<f64>, expected: f64) {
        let actual = actual.expect("expected a value");
        assert!(
            (actual - expected).abs() < EPS,
            "expected {expected}, got {actual}"
        );
    }

    /// Straightforward exclusion over the cohort, for comparison.
    fn naive(records: &[FarmDayRecord], i: usize) -> (Option<f64>, Option<f64>) {
        let me = &records[i];
        let peers: Vec<f64> = records
            .iter()
            .filter(|r| r.date == me.date && r.org_unit == me.org_unit && r.farm_id != me.farm_id)
            .filter_map(|r| r.abortion_rate)
            .collect();

        if peers.is_empty() {
            return (None, None);
        }
        let n = peers.len() as f64;
        let mean = peers.iter().sum::<f64>() / n;
        let stddev = if peers.len() >= 2 {
            let ss: f64 = peers.iter().map(|v| (v - mean) * (v - mean)).sum();
            Some((ss / (n - 1.0)).sqrt())
        } else {
            None
        };
        (Some(mean), stddev)
    }

    #[test]
    fn test_single_farm_cohort_is_missing() {
        let records = vec![
            rec("F1", day(1), "North", Some(0.01)),
            rec("F2", day(1), "South", Some(0.02)),
            rec("F1", day(2), "North", Some(0.03)),
        ];

        let stats = compute_peer_stats(&records);
        assert!(stats.iter().all(|s| *s == PeerStats::default()));
    }

    #[test]
    fn test_mixed_missing_scenario() {
        let records = vec![
            rec("F1", day(1), "North", Some(0.01)),
            rec("F2", day(1), "North", Some(0.02)),
            rec("F3", day(1), "North", None),
        ];

        let stats = compute_peer_stats(&records);

        // farm 1 sees only farm 2; one peer value gives a mean but no spread
        assert_close(stats[0].mean, 0.02);
        assert_eq!(stats[0].stddev, None);

        assert_close(stats[1].mean, 0.01);
        assert_eq!(stats[1].stddev, None);

        // farm 3 sees both reporting farms
        assert_close(stats[2].mean, 0.015);
        assert_close(stats[2].stddev, (0.00005f64).sqrt());
    }

    #[test]
    fn test_mean_is_group_sum_minus_own() {
        let rates = [0.001, 0.004, 0.0025, 0.0, 0.012];
        let records: Vec<_> = rates
            .iter()
            .enumerate()
            .map(|(i, r)| rec(&format!("F{i}"), day(3), "East", Some(*r)))
            .collect();

        let stats = compute_peer_stats(&records);
        let total: f64 = rates.iter().sum();
        let n = rates.len() as f64;

        for (i, rate) in rates.iter().enumerate() {
            assert_close(stats[i].mean, (total - rate) / (n - 1.0));
        }
    }

    #[test]
    fn test_matches_naive_exclusion() {
        let rates = [
            Some(0.0031),
            None,
            Some(0.0007),
            Some(0.0112),
            Some(0.0),
            None,
            Some(0.0049),
        ];
        let mut records = Vec::new();
        for (i, rate) in rates.iter().enumerate() {
            records.push(rec(&format!("F{}", i % 5), day(1 + (i % 2) as u32), "West", *rate));
            records.push(rec(&format!("G{i}"), day(1), "Hill", rate.map(|r| r * 2.0)));
        }

        let stats = compute_peer_stats(&records);
        for i in 0..records.len() {
            let (mean, stddev) = naive(&records, i);
            match mean {
                Some(m) => assert_close(stats[i].mean, m),
                None => assert_eq!(stats[i].mean, None),
            }
            match stddev {
                Some(s) => assert!((stats[i].stddev.unwrap() - s).abs() < 1e-9),
                None => assert_eq!(stats[i].stddev, None),
            }
        }
    }

    #[test]
    fn test_duplicate_rows_of_same_farm_are_not_peers() {
        let records = vec![
            rec("F1", day(1), "North", Some(0.01)),
            rec("F1", day(1), "North", Some(0.03)),
            rec("F2", day(1), "North", Some(0.02)),
        ];

        let stats = compute_peer_stats(&records);
        assert_close(stats[0].mean, 0.02);
        assert_close(stats[1].mean, 0.02);
        assert_close(stats[2].mean, 0.02);
        assert_close(stats[2].stddev, (0.0002f64).sqrt());
    }

    #[test]
    fn test_identical_rates_have_zero_spread() {
        let records: Vec<_> = (0..4)
            .map(|i| rec(&format!("F{i}"), day(1), "North", Some(0.003)))
            .collect();

        let stats = compute_peer_stats(&records);
        for s in stats {
            assert_close(s.mean, 0.003);
            assert_close(s.stddev, 0.0);
        }
    }

    #[test]
    fn test_count_cohorts() {
        let records = vec![
            rec("F1", day(1), "North", None),
            rec("F2", day(1), "North", None),
            rec("F1", day(2), "North", None),
            rec("F3", day(1), "South", None),
        ];
        assert_eq!(count_cohorts(&records), 3);
        assert_eq!(count_cohorts(&[]), 0);
    }
}
