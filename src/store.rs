use anyhow::Result;
use serde::de::DeserializeOwned;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

use crate::events::{FillEvent, OrderEvent, SessionSummary, Snapshot};

pub const SUMMARIES_FILE: &str = "summaries.jsonl";

/// Read a line-delimited JSON file. A missing file is an empty result, not an
/// error; malformed lines are skipped with a warning.
pub fn read_jsonl<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let content = fs::read_to_string(path)?;
    let mut out = Vec::new();
    for (lineno, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(line) {
            Ok(value) => out.push(value),
            Err(e) => warn!(
                "skipping malformed line {} in {}: {}",
                lineno + 1,
                path.display(),
                e
            ),
        }
    }
    Ok(out)
}

/// In-memory view of every event stream in the log directory.
#[derive(Debug, Default)]
pub struct EventStore {
    pub snapshots: Vec<Snapshot>,
    pub orders: Vec<OrderEvent>,
    pub fills: Vec<FillEvent>,
    pub summaries: Vec<SessionSummary>,
}

impl EventStore {
    /// Load every session's snapshot/order/fill logs plus the shared
    /// summaries file.
    pub fn load(data_dir: &Path) -> Result<Self> {
        let summaries = read_jsonl(&data_dir.join(SUMMARIES_FILE))?;

        let mut snapshots = Vec::new();
        let mut orders = Vec::new();
        let mut fills = Vec::new();

        for session_id in Self::list_sessions(data_dir)? {
            let session_snaps: Vec<Snapshot> =
                read_jsonl(&data_dir.join(format!("snapshots_{}.jsonl", session_id)))?;
            let session_orders: Vec<OrderEvent> =
                read_jsonl(&data_dir.join(format!("orders_{}.jsonl", session_id)))?;
            let session_fills: Vec<FillEvent> =
                read_jsonl(&data_dir.join(format!("fills_{}.jsonl", session_id)))?;

            info!(
                "loaded session {}: {} snapshots, {} orders, {} fills",
                session_id,
                session_snaps.len(),
                session_orders.len(),
                session_fills.len()
            );

            snapshots.extend(session_snaps);
            orders.extend(session_orders);
            fills.extend(session_fills);
        }

        info!(
            "event store: {} snapshots, {} orders, {} fills, {} sessions",
            snapshots.len(),
            orders.len(),
            fills.len(),
            summaries.len()
        );

        Ok(Self {
            snapshots,
            orders,
            fills,
            summaries,
        })
    }

    /// Session IDs discovered from snapshot log filenames, sorted.
    pub fn list_sessions(data_dir: &Path) -> Result<Vec<String>> {
        let mut sessions = Vec::new();

        if let Ok(entries) = fs::read_dir(data_dir) {
            for entry in entries.flatten() {
                let name = entry.file_name().to_string_lossy().to_string();
                if name.starts_with("snapshots_") && name.ends_with(".jsonl") {
                    sessions.push(
                        name.trim_start_matches("snapshots_")
                            .trim_end_matches(".jsonl")
                            .to_string(),
                    );
                }
            }
        }

        sessions.sort();
        Ok(sessions)
    }

    /// Count completed sessions: one non-blank line per session in the
    /// summaries file, 0 when it does not exist yet.
    pub fn count_sessions(data_dir: &Path) -> Result<u64> {
        let path = data_dir.join(SUMMARIES_FILE);
        if !path.exists() {
            return Ok(0);
        }

        let content = fs::read_to_string(&path)?;
        Ok(content.lines().filter(|l| !l.trim().is_empty()).count() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_lines(path: &Path, lines: &[&str]) {
        let mut f = fs::File::create(path).unwrap();
        for line in lines {
            writeln!(f, "{}", line).unwrap();
        }
    }

    #[test]
    fn test_missing_file_is_empty_not_error() {
        let dir = tempfile::tempdir().unwrap();
        let snaps: Vec<Snapshot> = read_jsonl(&dir.path().join("nope.jsonl")).unwrap();
        assert!(snaps.is_empty());
    }

    #[test]
    fn test_blank_and_malformed_lines_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshots_s1.jsonl");
        write_lines(
            &path,
            &[
                r#"{"market_id":"m1","timestamp":"2024-03-01T12:00:00Z","end_time":"2024-03-01T12:10:00Z","spread_pct":3.0}"#,
                "",
                "{broken",
                r#"{"market_id":"m1","timestamp":"2024-03-01T12:00:05Z","end_time":"2024-03-01T12:10:00Z","spread_pct":3.1}"#,
            ],
        );

        let snaps: Vec<Snapshot> = read_jsonl(&path).unwrap();
        assert_eq!(snaps.len(), 2);
    }

    #[test]
    fn test_count_sessions() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(EventStore::count_sessions(dir.path()).unwrap(), 0);

        write_lines(
            &dir.path().join(SUMMARIES_FILE),
            &[
                r#"{"session_id":"s1","market_id":"m1","start_time":"2024-03-01T12:00:00Z","total_cost":1.0}"#,
                "",
                r#"{"session_id":"s2","market_id":"m1","start_time":"2024-03-01T13:00:00Z","total_cost":1.0}"#,
            ],
        );
        assert_eq!(EventStore::count_sessions(dir.path()).unwrap(), 2);
    }

    #[test]
    fn test_load_discovers_sessions() {
        let dir = tempfile::tempdir().unwrap();
        write_lines(
            &dir.path().join("snapshots_a.jsonl"),
            &[r#"{"market_id":"m1","timestamp":"2024-03-01T12:00:00Z","end_time":"2024-03-01T12:10:00Z"}"#],
        );
        write_lines(
            &dir.path().join("snapshots_b.jsonl"),
            &[r#"{"market_id":"m2","timestamp":"2024-03-01T12:00:00Z","end_time":"2024-03-01T12:10:00Z"}"#],
        );
        write_lines(
            &dir.path().join("orders_a.jsonl"),
            &[r#"{"market_id":"m1","timestamp":"2024-03-01T12:01:00Z","side":"UP","price":0.52}"#],
        );

        let store = EventStore::load(dir.path()).unwrap();
        assert_eq!(store.snapshots.len(), 2);
        assert_eq!(store.orders.len(), 1);
        assert!(store.fills.is_empty());
        assert!(store.summaries.is_empty());
    }
}
