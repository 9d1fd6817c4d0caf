use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::domain::ReportRecord;

/// Remembers which items were reported recently so bursts of stream events
/// for the same item produce a single notification.
#[derive(Debug)]
pub struct ReportThrottle {
    window: chrono::Duration,
    records: Mutex<Vec<ReportRecord>>,
}

impl ReportThrottle {
    pub fn new(window: Duration) -> Self {
        Self {
            window: chrono::Duration::from_std(window).unwrap_or(chrono::Duration::MAX),
            records: Mutex::new(Vec::new()),
        }
    }

    /// Prunes expired records, then records `item_id` unless a live record
    /// exists. Returns `true` when the item was already reported.
    ///
    /// Records whose age is at least the window are considered expired.
    pub fn report(&self, item_id: i64, now: DateTime<Utc>) -> bool {
        let cutoff = now.checked_sub_signed(self.window);
        let mut records = self.records.lock();
        if let Some(cutoff) = cutoff {
            records.retain(|record| record.reported_at > cutoff);
        }

        if records.iter().any(|record| record.item_id == item_id) {
            tracing::debug!(target: "throttle", item_id, "item reported recently; suppressing");
            return true;
        }

        records.push(ReportRecord {
            item_id,
            reported_at: now,
        });
        false
    }

    pub fn live_records(&self) -> usize {
        self.records.lock().len()
    }
}
