use chrono::{DateTime, Duration, Utc};

use crate::hub::{ExecutionRecord, RecordStatus};

/// Default phantom-detection threshold. Long agent sessions can legitimately
/// run tens of minutes, so anything shorter trips on live work; anything much
/// longer leaves stuck records blocking dispatch for too long.
pub const DEFAULT_THRESHOLD_MINUTES: u32 = 30;

/// Whether a record represents someone actually working right now.
///
/// A `queued` or `running` record only counts as active while its
/// `updated_at` is strictly within the threshold. The execution substrate can
/// leave records in a non-terminal status forever after an infrastructure
/// failure, and one such phantom would otherwise block every future dispatch
/// for its item.
pub fn is_active(record: &ExecutionRecord, now: DateTime<Utc>, threshold_minutes: u32) -> bool {
    if record.status.is_terminal() {
        return false;
    }
    now - record.updated_at < Duration::minutes(i64::from(threshold_minutes))
}

/// The records that still count as live work.
pub fn active<'a>(
    records: &'a [ExecutionRecord],
    now: DateTime<Utc>,
    threshold_minutes: u32,
) -> impl Iterator<Item = &'a ExecutionRecord> {
    records
        .iter()
        .filter(move |r| is_active(r, now, threshold_minutes))
}

/// Non-terminal records that fell out of the threshold window. Surfaced by
/// the status report so stuck substrate runs are visible instead of silently
/// ignored.
pub fn phantoms<'a>(
    records: &'a [ExecutionRecord],
    now: DateTime<Utc>,
    threshold_minutes: u32,
) -> impl Iterator<Item = &'a ExecutionRecord> {
    records.iter().filter(move |r| {
        matches!(r.status, RecordStatus::Queued | RecordStatus::Running)
            && !is_active(r, now, threshold_minutes)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::RecordKind;

    fn record(status: RecordStatus, age_minutes: i64, now: DateTime<Utc>) -> ExecutionRecord {
        let ts = now - Duration::minutes(age_minutes);
        ExecutionRecord {
            id: 1,
            kind: RecordKind::Agent,
            status,
            started_at: ts,
            updated_at: ts,
            cost_usd: None,
            is_error: false,
            result_subtype: None,
            branch: None,
            log_tail: String::new(),
        }
    }

    #[test]
    fn running_within_threshold_is_active() {
        let now = Utc::now();
        let r = record(RecordStatus::Running, 29, now);
        assert!(is_active(&r, now, 30));
    }

    #[test]
    fn running_beyond_threshold_is_phantom() {
        let now = Utc::now();
        let r = record(RecordStatus::Running, 31, now);
        assert!(!is_active(&r, now, 30));
    }

    #[test]
    fn exactly_at_threshold_is_phantom() {
        // The comparison is strict: age == threshold already counts as stuck.
        let now = Utc::now();
        let r = record(RecordStatus::Running, 30, now);
        assert!(!is_active(&r, now, 30));
    }

    #[test]
    fn queued_counts_like_running() {
        let now = Utc::now();
        assert!(is_active(&record(RecordStatus::Queued, 5, now), now, 30));
        assert!(!is_active(&record(RecordStatus::Queued, 45, now), now, 30));
    }

    #[test]
    fn terminal_records_are_never_active() {
        let now = Utc::now();
        assert!(!is_active(&record(RecordStatus::Success, 1, now), now, 30));
        assert!(!is_active(&record(RecordStatus::Failure, 0, now), now, 30));
    }

    #[test]
    fn threshold_is_configurable() {
        let now = Utc::now();
        let r = record(RecordStatus::Running, 45, now);
        assert!(!is_active(&r, now, 30));
        assert!(is_active(&r, now, 60));
    }

    #[test]
    fn active_and_phantoms_partition_non_terminal_records() {
        let now = Utc::now();
        let records = vec![
            record(RecordStatus::Running, 5, now),
            record(RecordStatus::Running, 90, now),
            record(RecordStatus::Queued, 40, now),
            record(RecordStatus::Success, 2, now),
        ];

        let live: Vec<_> = active(&records, now, 30).collect();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].updated_at, now - Duration::minutes(5));

        let stuck: Vec<_> = phantoms(&records, now, 30).collect();
        assert_eq!(stuck.len(), 2);
    }
}
