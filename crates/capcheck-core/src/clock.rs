use chrono::{DateTime, SecondsFormat, Utc};
use tokio::time::Instant;

/// Time base shared by every row of a run.
///
/// Anchored to the wall clock once, then advanced by the monotonic clock, so
/// readings taken later never sort earlier even if the system clock steps.
#[derive(Debug, Clone, Copy)]
pub struct RunClock {
    wall_anchor: DateTime<Utc>,
    mono_anchor: Instant,
}

impl RunClock {
    pub fn new() -> Self {
        Self {
            wall_anchor: Utc::now(),
            mono_anchor: Instant::now(),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        let elapsed = Instant::now().saturating_duration_since(self.mono_anchor);
        match chrono::Duration::from_std(elapsed) {
            Ok(d) => self.wall_anchor + d,
            Err(_) => self.wall_anchor,
        }
    }
}

impl Default for RunClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Format used for every timestamp column. Fixed width, so string order is
/// time order.
pub fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_ts(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}
