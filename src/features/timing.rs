use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::events::Snapshot;
use crate::features::{FeatureRow, FeatureTable};

const PERIOD_SECONDS: f64 = 15.0 * 60.0;
/// A minute bucket needs this many observations before its stats are usable.
const MIN_BUCKET_SAMPLES: usize = 5;

pub const TIMING_TABLE: &str = "timing_features";

pub const TIMING_COLUMNS: &[&str] = &[
    "minute",
    "sample_count",
    "spread_mean",
    "spread_max",
    "spread_min",
    "spread_std",
    "spreads_above_4pct",
    "spreads_above_5pct",
];

/// Build the entry timing table: spread statistics bucketed by minute of the
/// trading period, one row per minute with enough samples.
pub fn extract(snapshots: &[Snapshot]) -> FeatureTable {
    let mut table = FeatureTable::new(TIMING_TABLE, TIMING_COLUMNS);

    let mut buckets: BTreeMap<i64, Vec<f64>> = BTreeMap::new();
    for snap in snapshots {
        let seconds_to_resolution = snap.seconds_to_resolution();
        if !(0.0..=PERIOD_SECONDS).contains(&seconds_to_resolution) {
            continue;
        }
        let minute = (((PERIOD_SECONDS - seconds_to_resolution) / 60.0) as i64).clamp(0, 14);
        buckets.entry(minute).or_default().push(snap.spread());
    }

    for (minute, spreads) in &buckets {
        if spreads.len() < MIN_BUCKET_SAMPLES {
            continue;
        }

        let n = spreads.len() as f64;
        let mean = spreads.iter().sum::<f64>() / n;
        let std = (spreads.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n).sqrt();

        let mut row = FeatureRow::new();
        row.put_i64("minute", *minute)
            .put_i64("sample_count", spreads.len() as i64)
            .put_f64("spread_mean", mean)
            .put_f64(
                "spread_max",
                spreads.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
            )
            .put_f64(
                "spread_min",
                spreads.iter().cloned().fold(f64::INFINITY, f64::min),
            )
            .put_f64("spread_std", std)
            .put_f64(
                "spreads_above_4pct",
                spreads.iter().filter(|s| **s >= 4.0).count() as f64 / n,
            )
            .put_f64(
                "spreads_above_5pct",
                spreads.iter().filter(|s| **s >= 5.0).count() as f64 / n,
            );
        table.push(row);
    }

    table
}

/// Per-minute statistics as served to predictors, percentages in 0-100.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MinuteStats {
    pub avg_spread: f64,
    pub max_spread: f64,
    pub above_4pct: f64,
    pub above_5pct: f64,
}

/// The best minute of the period to enter, by mean spread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingRecommendation {
    pub best_minute: i64,
    pub avg_spread: f64,
    pub stats: BTreeMap<i64, MinuteStats>,
}

impl TimingRecommendation {
    /// Derive the recommendation from a timing table. None when the table
    /// carries no qualifying minute.
    pub fn from_table(table: &FeatureTable) -> Option<Self> {
        let mut stats = BTreeMap::new();
        let mut best: Option<(i64, f64)> = None;

        for row in &table.rows {
            let minute = row.get_f64("minute") as i64;
            let mean = row.get_f64("spread_mean");
            stats.insert(
                minute,
                MinuteStats {
                    avg_spread: mean,
                    max_spread: row.get_f64("spread_max"),
                    above_4pct: row.get_f64("spreads_above_4pct") * 100.0,
                    above_5pct: row.get_f64("spreads_above_5pct") * 100.0,
                },
            );
            // Strictly greater, so the earliest minute wins ties.
            if best.map(|(_, s)| mean > s).unwrap_or(true) {
                best = Some((minute, mean));
            }
        }

        best.map(|(best_minute, avg_spread)| Self {
            best_minute,
            avg_spread,
            stats,
        })
    }
}
