//! History replay — rebuild a release's final state from its entry log.
//!
//! Replay is the audit check for the history log: applying a release's
//! entries in sequence order must land on the same `(percentage, status)`
//! the live state machine reached.

use serde::Deserialize;

use canary_state::{HistoryEntry, HistoryEventType, ReleaseStatus};

/// State reconstructed by replaying a release's history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayedState {
    pub percentage: u32,
    pub status: ReleaseStatus,
}

/// The percentage field shared by `created` and `ramped` payloads.
#[derive(Deserialize)]
struct PercentagePayload {
    percentage: u32,
}

/// Replay a release's entries in the order given.
///
/// Returns `None` for an empty sequence. Entries must belong to a single
/// release and be ordered by `sequence_no`.
pub fn replay(entries: &[HistoryEntry]) -> Option<ReplayedState> {
    let mut state: Option<ReplayedState> = None;
    for entry in entries {
        let current = state.get_or_insert(ReplayedState {
            percentage: 0,
            status: ReleaseStatus::Initializing,
        });
        match entry.event {
            HistoryEventType::Created | HistoryEventType::Ramped => {
                if let Ok(p) =
                    serde_json::from_value::<PercentagePayload>(entry.payload.clone())
                {
                    current.percentage = p.percentage;
                }
                current.status = ReleaseStatus::Ramping;
            }
            HistoryEventType::Promoted => {
                current.percentage = 100;
                current.status = ReleaseStatus::Promoted;
            }
            HistoryEventType::RolledBack => {
                current.percentage = 0;
                current.status = ReleaseStatus::RolledBack;
            }
            HistoryEventType::Cancelled => {
                // Cancellation freezes the percentage where it was.
                current.status = ReleaseStatus::Cancelled;
            }
        }
    }
    state
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(seq: u64, event: HistoryEventType, payload: serde_json::Value) -> HistoryEntry {
        HistoryEntry {
            sequence_no: seq,
            target_id: "web-prod".to_string(),
            release_id: "web-prod-1".to_string(),
            event,
            payload,
            timestamp: 1000 + seq,
        }
    }

    #[test]
    fn empty_sequence_replays_to_none() {
        assert_eq!(replay(&[]), None);
    }

    #[test]
    fn ramp_to_promotion() {
        let entries = vec![
            entry(1, HistoryEventType::Created, serde_json::json!({ "percentage": 10 })),
            entry(2, HistoryEventType::Ramped, serde_json::json!({ "percentage": 30 })),
            entry(3, HistoryEventType::Ramped, serde_json::json!({ "percentage": 50 })),
            entry(4, HistoryEventType::Promoted, serde_json::json!({})),
        ];
        assert_eq!(
            replay(&entries),
            Some(ReplayedState {
                percentage: 100,
                status: ReleaseStatus::Promoted,
            })
        );
    }

    #[test]
    fn ramp_to_rollback_zeroes_percentage() {
        let entries = vec![
            entry(1, HistoryEventType::Created, serde_json::json!({ "percentage": 10 })),
            entry(2, HistoryEventType::Ramped, serde_json::json!({ "percentage": 50 })),
            entry(
                3,
                HistoryEventType::RolledBack,
                serde_json::json!({ "reason": "health_check_failed", "suppressed": false }),
            ),
        ];
        assert_eq!(
            replay(&entries),
            Some(ReplayedState {
                percentage: 0,
                status: ReleaseStatus::RolledBack,
            })
        );
    }

    #[test]
    fn cancellation_keeps_last_percentage() {
        let entries = vec![
            entry(1, HistoryEventType::Created, serde_json::json!({ "percentage": 10 })),
            entry(2, HistoryEventType::Ramped, serde_json::json!({ "percentage": 25 })),
            entry(3, HistoryEventType::Cancelled, serde_json::json!({ "actor": "ops" })),
        ];
        assert_eq!(
            replay(&entries),
            Some(ReplayedState {
                percentage: 25,
                status: ReleaseStatus::Cancelled,
            })
        );
    }

    #[test]
    fn mid_ramp_sequence_is_still_ramping() {
        let entries = vec![
            entry(1, HistoryEventType::Created, serde_json::json!({ "percentage": 10 })),
            entry(2, HistoryEventType::Ramped, serde_json::json!({ "percentage": 30 })),
        ];
        assert_eq!(
            replay(&entries),
            Some(ReplayedState {
                percentage: 30,
                status: ReleaseStatus::Ramping,
            })
        );
    }
}
