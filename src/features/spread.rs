use std::collections::BTreeMap;

use crate::events::Snapshot;
use crate::features::{FeatureRow, FeatureTable};

/// Snapshots of history feeding each row.
const LOOKBACK: usize = 10;
/// Snapshots ahead of the current one that supply the label.
const HORIZON: usize = 5;
/// Length of one trading period in seconds.
const PERIOD_SECONDS: f64 = 15.0 * 60.0;
/// A future spread move above this (in percentage points) counts as an
/// increase for the classifier label.
const INCREASE_THRESHOLD: f64 = 0.5;

pub const SPREAD_TABLE: &str = "spread_features";

pub const SPREAD_COLUMNS: &[&str] = &[
    "market_id",
    "timestamp",
    "spread_now",
    "up_ask",
    "down_ask",
    "combined_ask",
    "seconds_to_resolution",
    "minute_of_period",
    "spread_mean_10",
    "spread_max_10",
    "spread_min_10",
    "spread_volatility_10",
    "spread_trend_10",
    "up_trend_10",
    "down_trend_10",
    "future_spread",
    "spread_change",
    "spread_increased",
];

/// Model inputs only: identifiers and label columns excluded.
pub const SPREAD_FEATURE_COLS: &[&str] = &[
    "spread_now",
    "up_ask",
    "down_ask",
    "combined_ask",
    "seconds_to_resolution",
    "minute_of_period",
    "spread_mean_10",
    "spread_max_10",
    "spread_min_10",
    "spread_volatility_10",
    "spread_trend_10",
    "up_trend_10",
    "down_trend_10",
];

struct RollingStats {
    mean: f64,
    max: f64,
    min: f64,
    std_dev: f64,
    trend: f64,
}

impl RollingStats {
    fn over(values: &[f64]) -> Self {
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        Self {
            mean,
            max: values.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
            min: values.iter().cloned().fold(f64::INFINITY, f64::min),
            std_dev: variance.sqrt(),
            trend: values[values.len() - 1] - values[0],
        }
    }
}

/// Build the spread movement table: one row per snapshot that has a full
/// lookback window behind it and a label snapshot ahead of it, per market.
pub fn extract(snapshots: &[Snapshot]) -> FeatureTable {
    let mut table = FeatureTable::new(SPREAD_TABLE, SPREAD_COLUMNS);

    let mut markets: BTreeMap<&str, Vec<&Snapshot>> = BTreeMap::new();
    for snap in snapshots {
        markets.entry(snap.market_id.as_str()).or_default().push(snap);
    }

    for (market_id, snaps) in &mut markets {
        snaps.sort_by_key(|s| s.timestamp);
        if snaps.len() < LOOKBACK {
            continue;
        }

        for i in LOOKBACK..snaps.len().saturating_sub(HORIZON) {
            let current = snaps[i];
            let window = &snaps[i - LOOKBACK..i];

            let spread_now = current.spread();
            let seconds_to_resolution = current.seconds_to_resolution();
            let minute_of_period = (PERIOD_SECONDS - seconds_to_resolution) / 60.0;

            let spreads: Vec<f64> = window.iter().map(|s| s.spread()).collect();
            let stats = RollingStats::over(&spreads);
            let up_trend = window[window.len() - 1].up_ask() - window[0].up_ask();
            let down_trend = window[window.len() - 1].down_ask() - window[0].down_ask();

            let future_spread = snaps[i + HORIZON].spread();
            let spread_change = future_spread - spread_now;

            let mut row = FeatureRow::new();
            row.put_text("market_id", *market_id)
                .put_text("timestamp", current.timestamp.to_rfc3339())
                .put_f64("spread_now", spread_now)
                .put_f64("up_ask", current.up_ask())
                .put_f64("down_ask", current.down_ask())
                .put_f64("combined_ask", current.combined())
                .put_f64("seconds_to_resolution", seconds_to_resolution)
                .put_f64("minute_of_period", minute_of_period)
                .put_f64("spread_mean_10", stats.mean)
                .put_f64("spread_max_10", stats.max)
                .put_f64("spread_min_10", stats.min)
                .put_f64("spread_volatility_10", stats.std_dev)
                .put_f64("spread_trend_10", stats.trend)
                .put_f64("up_trend_10", up_trend)
                .put_f64("down_trend_10", down_trend)
                .put_f64("future_spread", future_spread)
                .put_f64("spread_change", spread_change)
                .put_i64(
                    "spread_increased",
                    if spread_change > INCREASE_THRESHOLD { 1 } else { 0 },
                );
            table.push(row);
        }
    }

    table
}
