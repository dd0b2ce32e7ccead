use chrono::{Datelike, Timelike};

use crate::events::SessionSummary;
use crate::features::{FeatureRow, FeatureTable};

pub const SESSION_TABLE: &str = "session_features";

pub const SESSION_COLUMNS: &[&str] = &[
    "session_id",
    "market_id",
    "hour_of_day",
    "day_of_week",
    "total_cost",
    "up_shares",
    "down_shares",
    "balance_ratio",
    "orders_placed",
    "fills_received",
    "fill_rate",
    "is_dry_run",
    "profit",
    "profit_pct",
    "is_profitable",
];

/// Build the session profitability table. Sessions that never deployed
/// capital carry no signal and are excluded.
pub fn extract(summaries: &[SessionSummary]) -> FeatureTable {
    let mut table = FeatureTable::new(SESSION_TABLE, SESSION_COLUMNS);

    for summary in summaries {
        if summary.total_cost == 0.0 {
            continue;
        }

        let up = summary.total_up_shares;
        let down = summary.total_down_shares;
        let larger = up.max(down);
        let balance_ratio = if larger > 0.0 { up.min(down) / larger } else { 0.0 };

        let fill_rate = if summary.orders_placed > 0 {
            summary.fills_received as f64 / summary.orders_placed as f64
        } else {
            0.0
        };

        let mut row = FeatureRow::new();
        row.put_text("session_id", summary.session_id.clone())
            .put_text("market_id", summary.market_id.clone())
            .put_i64("hour_of_day", summary.start_time.hour() as i64)
            .put_i64(
                "day_of_week",
                summary.start_time.weekday().num_days_from_monday() as i64,
            )
            .put_f64("total_cost", summary.total_cost)
            .put_f64("up_shares", up)
            .put_f64("down_shares", down)
            .put_f64("balance_ratio", balance_ratio)
            .put_i64("orders_placed", summary.orders_placed as i64)
            .put_i64("fills_received", summary.fills_received as i64)
            .put_f64("fill_rate", fill_rate)
            .put_i64("is_dry_run", if summary.is_dry_run { 1 } else { 0 })
            .put_f64("profit", summary.locked_profit)
            .put_f64("profit_pct", summary.profit_pct)
            .put_i64("is_profitable", if summary.locked_profit > 0.0 { 1 } else { 0 });
        table.push(row);
    }

    table
}
