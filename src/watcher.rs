use std::path::PathBuf;
use std::time::{Duration, SystemTime};
use tokio::time::Instant;
use tracing::debug;

/// Polls a file's modification time and reports changes, collapsing bursts
/// of writes into at most one notification per debounce window.
pub struct ChangeWatcher {
    path: PathBuf,
    poll_interval: Duration,
    debounce: Duration,
    last_mtime: Option<SystemTime>,
    last_fired: Option<Instant>,
}

impl ChangeWatcher {
    pub fn new(path: PathBuf, debounce: Duration) -> Self {
        Self {
            path,
            poll_interval: Duration::from_secs(1),
            debounce,
            last_mtime: None,
            last_fired: None,
        }
    }

    fn mtime(&self) -> Option<SystemTime> {
        std::fs::metadata(&self.path)
            .and_then(|m| m.modified())
            .ok()
    }

    /// Wait for the next change to the watched file. The first observed
    /// mtime is a baseline, not a change.
    pub async fn next_change(&mut self) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;

            let current = self.mtime();
            let changed = match (self.last_mtime, current) {
                (Some(prev), Some(now)) => prev != now,
                (None, Some(_)) => false,
                _ => false,
            };
            if current.is_some() {
                self.last_mtime = current;
            }
            if !changed {
                continue;
            }

            if let Some(fired) = self.last_fired {
                if fired.elapsed() < self.debounce {
                    debug!("change to {} within debounce window, ignoring", self.path.display());
                    continue;
                }
            }

            self.last_fired = Some(Instant::now());
            debug!("change detected on {}", self.path.display());
            return;
        }
    }
}
