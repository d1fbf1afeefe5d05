use serde::{Deserialize, Serialize};

use crate::session::KeystrokeEvent;

/// What a backspace does to keystrokes that were already recorded.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum BackspacePolicy {
    /// Every keystroke ever typed stays in the log and counts toward accuracy.
    #[default]
    CountAll,
    /// Erasing a position also drops its latest keystroke from the log.
    ForgiveCorrected,
}

impl BackspacePolicy {
    /// Applies the policy after the cursor has moved back to `position`.
    /// Returns the event removed from the log, if any.
    pub fn apply(self, log: &mut Vec<KeystrokeEvent>, position: usize) -> Option<KeystrokeEvent> {
        match self {
            Self::CountAll => None,
            Self::ForgiveCorrected => log
                .iter()
                .rposition(|event| event.position == position)
                .map(|idx| log.remove(idx)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(position: usize, timestamp: i64) -> KeystrokeEvent {
        KeystrokeEvent {
            timestamp,
            expected: 'a',
            actual: 'b',
            is_correct: false,
            latency_ms: 0,
            position,
        }
    }

    #[test]
    fn count_all_keeps_log() {
        let mut log = vec![event(0, 0), event(1, 10)];
        assert!(BackspacePolicy::CountAll.apply(&mut log, 1).is_none());
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn forgive_corrected_drops_latest_event_at_position() {
        let mut log = vec![event(0, 0), event(1, 10), event(1, 30), event(2, 40)];
        let removed = BackspacePolicy::ForgiveCorrected.apply(&mut log, 1).unwrap();
        assert_eq!(removed.timestamp, 30);
        assert_eq!(log.len(), 3);
        assert_eq!(log[1].timestamp, 10);
    }

    #[test]
    fn policy_display_matches_serde_name() {
        assert_eq!(BackspacePolicy::ForgiveCorrected.to_string(), "forgive-corrected");
        assert_eq!(
            serde_json::to_string(&BackspacePolicy::CountAll).unwrap(),
            "\"count-all\""
        );
    }
}
