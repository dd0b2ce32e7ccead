use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

/// Count of timestamp fields that failed to parse and were replaced with the
/// current time. The substitution silently corrupts time-ordering features,
/// so keep it observable.
static TIMESTAMP_FALLBACKS: AtomicU64 = AtomicU64::new(0);

pub fn timestamp_fallback_count() -> u64 {
    TIMESTAMP_FALLBACKS.load(Ordering::Relaxed)
}

/// Parse an RFC 3339 timestamp, degrading to "now" on failure.
pub fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    match DateTime::parse_from_rfc3339(raw) {
        Ok(dt) => dt.with_timezone(&Utc),
        Err(_) => {
            TIMESTAMP_FALLBACKS.fetch_add(1, Ordering::Relaxed);
            warn!("unparsable timestamp {:?}, substituting current time", raw);
            Utc::now()
        }
    }
}

fn lenient_timestamp<'de, D>(de: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(de)?;
    Ok(parse_timestamp(&raw))
}

fn fallback_now() -> DateTime<Utc> {
    TIMESTAMP_FALLBACKS.fetch_add(1, Ordering::Relaxed);
    Utc::now()
}

/// Numeric log fields may be JSON numbers or decimal strings.
#[derive(Deserialize)]
#[serde(untagged)]
enum NumOrText {
    Num(f64),
    Text(String),
}

fn lenient_opt_f64<'de, D>(de: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<NumOrText>::deserialize(de)?;
    Ok(match raw {
        None => None,
        Some(NumOrText::Num(v)) => Some(v),
        Some(NumOrText::Text(s)) => s.trim().parse().ok(),
    })
}

fn lenient_f64<'de, D>(de: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(lenient_opt_f64(de)?.unwrap_or(0.0))
}

/// Which half of the binary market an order or fill targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    #[serde(rename = "UP")]
    Up,
    #[serde(rename = "DOWN")]
    Down,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Up => "UP",
            Side::Down => "DOWN",
        }
    }
}

/// Point-in-time observation of a market's best asks and derived spread,
/// one per market per poll tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub market_id: String,
    #[serde(default = "fallback_now", deserialize_with = "lenient_timestamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(default = "fallback_now", deserialize_with = "lenient_timestamp")]
    pub end_time: DateTime<Utc>,
    #[serde(default, deserialize_with = "lenient_opt_f64")]
    pub spread_pct: Option<f64>,
    #[serde(default, deserialize_with = "lenient_opt_f64")]
    pub up_best_ask: Option<f64>,
    #[serde(default, deserialize_with = "lenient_opt_f64")]
    pub down_best_ask: Option<f64>,
    #[serde(default, deserialize_with = "lenient_opt_f64")]
    pub combined_ask: Option<f64>,
}

impl Snapshot {
    pub fn spread(&self) -> f64 {
        self.spread_pct.unwrap_or(0.0)
    }

    pub fn up_ask(&self) -> f64 {
        self.up_best_ask.unwrap_or(0.5)
    }

    pub fn down_ask(&self) -> f64 {
        self.down_best_ask.unwrap_or(0.5)
    }

    pub fn combined(&self) -> f64 {
        self.combined_ask.unwrap_or(1.0)
    }

    pub fn ask_for(&self, side: Side) -> f64 {
        match side {
            Side::Up => self.up_ask(),
            Side::Down => self.down_ask(),
        }
    }

    /// Seconds from this observation until the market resolves.
    pub fn seconds_to_resolution(&self) -> f64 {
        (self.end_time - self.timestamp).num_milliseconds() as f64 / 1000.0
    }
}

/// Intent to trade, logged when an order is placed (or would be, in dry-run).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderEvent {
    #[serde(default)]
    pub market_id: String,
    #[serde(default = "fallback_now", deserialize_with = "lenient_timestamp")]
    pub timestamp: DateTime<Utc>,
    pub side: Side,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub price: f64,
}

/// Confirmed execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FillEvent {
    #[serde(default)]
    pub market_id: String,
    #[serde(default = "fallback_now", deserialize_with = "lenient_timestamp")]
    pub timestamp: DateTime<Utc>,
    pub side: Side,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub price: f64,
}

/// Outcome of one bounded trading episode against a single market.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub market_id: String,
    #[serde(default = "fallback_now", deserialize_with = "lenient_timestamp")]
    pub start_time: DateTime<Utc>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub locked_profit: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub profit_pct: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub total_cost: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub total_up_shares: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub total_down_shares: f64,
    #[serde(default)]
    pub orders_placed: u32,
    #[serde(default)]
    pub fills_received: u32,
    #[serde(default)]
    pub is_dry_run: bool,
}
