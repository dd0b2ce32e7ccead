use crate::events::{FillEvent, OrderEvent, Snapshot};
use crate::features::{FeatureRow, FeatureTable};

/// Orders with no market snapshot within this many seconds are discarded
/// rather than joined against stale state.
const MAX_SNAPSHOT_GAP_SECS: f64 = 60.0;
/// Fills within this price distance of the order count as the same level.
const PRICE_MATCH_TOLERANCE: f64 = 0.01;

pub const FILL_TABLE: &str = "fill_features";

pub const FILL_COLUMNS: &[&str] = &[
    "market_id",
    "timestamp",
    "side",
    "order_price",
    "best_ask",
    "price_vs_ask",
    "price_vs_ask_pct",
    "spread_pct",
    "seconds_to_resolution",
    "was_filled",
];

pub const FILL_FEATURE_COLS: &[&str] = &[
    "order_price",
    "best_ask",
    "price_vs_ask",
    "price_vs_ask_pct",
    "spread_pct",
    "seconds_to_resolution",
];

fn nearest_snapshot<'a>(
    order: &OrderEvent,
    snapshots: &'a [Snapshot],
) -> Option<(&'a Snapshot, f64)> {
    let mut best: Option<(&Snapshot, f64)> = None;
    for snap in snapshots {
        if snap.market_id != order.market_id {
            continue;
        }
        let diff = (snap.timestamp - order.timestamp).num_milliseconds().abs() as f64 / 1000.0;
        if best.map(|(_, d)| diff < d).unwrap_or(true) {
            best = Some((snap, diff));
        }
    }
    best
}

fn was_filled(order: &OrderEvent, fills: &[FillEvent]) -> bool {
    fills.iter().any(|fill| {
        fill.market_id == order.market_id
            && fill.side == order.side
            && (fill.price - order.price).abs() < PRICE_MATCH_TOLERANCE
    })
}

/// Build the fill outcome table: one row per order joined to its nearest
/// same-market snapshot and labeled by whether a matching fill exists.
pub fn extract(
    orders: &[OrderEvent],
    fills: &[FillEvent],
    snapshots: &[Snapshot],
) -> FeatureTable {
    let mut table = FeatureTable::new(FILL_TABLE, FILL_COLUMNS);

    for order in orders {
        let snap = match nearest_snapshot(order, snapshots) {
            Some((snap, gap)) if gap <= MAX_SNAPSHOT_GAP_SECS => snap,
            _ => continue,
        };

        let best_ask = snap.ask_for(order.side);
        let price_vs_ask = order.price - best_ask;
        let price_vs_ask_pct = if best_ask > 0.0 {
            price_vs_ask / best_ask * 100.0
        } else {
            0.0
        };
        let seconds_to_resolution =
            (snap.end_time - order.timestamp).num_milliseconds() as f64 / 1000.0;

        let mut row = FeatureRow::new();
        row.put_text("market_id", order.market_id.clone())
            .put_text("timestamp", order.timestamp.to_rfc3339())
            .put_text("side", order.side.as_str())
            .put_f64("order_price", order.price)
            .put_f64("best_ask", best_ask)
            .put_f64("price_vs_ask", price_vs_ask)
            .put_f64("price_vs_ask_pct", price_vs_ask_pct)
            .put_f64("spread_pct", snap.spread())
            .put_f64("seconds_to_resolution", seconds_to_resolution)
            .put_i64("was_filled", if was_filled(order, fills) { 1 } else { 0 });
        table.push(row);
    }

    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Side;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn snap_at(offset_secs: i64) -> Snapshot {
        Snapshot {
            market_id: "m1".to_string(),
            timestamp: base() + Duration::seconds(offset_secs),
            end_time: base() + Duration::seconds(900),
            spread_pct: Some(3.0),
            up_best_ask: Some(0.50),
            down_best_ask: Some(0.46),
            combined_ask: Some(0.96),
        }
    }

    fn order_at(offset_secs: i64, side: Side, price: f64) -> OrderEvent {
        OrderEvent {
            market_id: "m1".to_string(),
            timestamp: base() + Duration::seconds(offset_secs),
            side,
            price,
        }
    }

    fn fill_at(side: Side, price: f64) -> FillEvent {
        FillEvent {
            market_id: "m1".to_string(),
            timestamp: base() + Duration::seconds(30),
            side,
            price,
        }
    }

    #[test]
    fn test_snapshot_within_window_joins() {
        let table = extract(
            &[order_at(59, Side::Up, 0.48)],
            &[],
            &[snap_at(0)],
        );
        assert_eq!(table.len(), 1);
        let row = &table.rows[0];
        assert_eq!(row.get_f64("best_ask"), 0.50);
        assert!((row.get_f64("price_vs_ask") - (-0.02)).abs() < 1e-12);
        assert!((row.get_f64("price_vs_ask_pct") - (-4.0)).abs() < 1e-9);
        assert_eq!(row.get_f64("seconds_to_resolution"), 841.0);
    }

    #[test]
    fn test_snapshot_too_far_drops_order() {
        let table = extract(&[order_at(61, Side::Up, 0.48)], &[], &[snap_at(0)]);
        assert!(table.is_empty());
    }

    #[test]
    fn test_side_selects_ask() {
        let table = extract(&[order_at(0, Side::Down, 0.45)], &[], &[snap_at(0)]);
        assert_eq!(table.rows[0].get_f64("best_ask"), 0.46);
    }

    #[test]
    fn test_fill_match_tolerance() {
        let matched = extract(
            &[order_at(0, Side::Up, 0.48)],
            &[fill_at(Side::Up, 0.485)],
            &[snap_at(0)],
        );
        assert_eq!(matched.rows[0].get_f64("was_filled"), 1.0);

        let unmatched = extract(
            &[order_at(0, Side::Up, 0.48)],
            &[fill_at(Side::Up, 0.49)],
            &[snap_at(0)],
        );
        assert_eq!(unmatched.rows[0].get_f64("was_filled"), 0.0);
    }

    #[test]
    fn test_fill_on_other_side_does_not_match() {
        let table = extract(
            &[order_at(0, Side::Up, 0.48)],
            &[fill_at(Side::Down, 0.48)],
            &[snap_at(0)],
        );
        assert_eq!(table.rows[0].get_f64("was_filled"), 0.0);
    }

    #[test]
    fn test_no_snapshots_yield_no_rows() {
        let table = extract(&[order_at(0, Side::Up, 0.48)], &[], &[]);
        assert!(table.is_empty());
    }
}
