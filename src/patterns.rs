use std::collections::BTreeMap;

use serde::Serialize;

use crate::clock::Millis;
use crate::session::KeystrokeEvent;
use crate::util::mean;

pub const DEFAULT_SEQUENCE_LENGTHS: [usize; 2] = [2, 3];

/// Per-key press counts and mean latency
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyAccuracyRecord {
    pub key: char,
    pub total_presses: i64,
    pub correct_presses: i64,
    pub avg_latency_ms: Millis,
    /// Presses that carried a latency; session openers do not
    pub latency_samples: i64,
}

impl KeyAccuracyRecord {
    /// Percentage of presses that were correct
    pub fn accuracy(&self) -> f64 {
        if self.total_presses == 0 {
            return 100.0;
        }
        self.correct_presses as f64 / self.total_presses as f64 * 100.0
    }

    pub fn errors(&self) -> i64 {
        self.total_presses - self.correct_presses
    }
}

/// How often `actual` was typed where `expected` belonged
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CharErrorPattern {
    pub expected: char,
    pub actual: char,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SequenceErrorPattern {
    pub sequence: String,
    pub total_attempts: i64,
    pub error_count: i64,
    pub avg_latency_ms: Millis,
}

impl SequenceErrorPattern {
    /// Percentage of attempts containing at least one wrong keystroke
    pub fn error_rate(&self) -> f64 {
        if self.total_attempts == 0 {
            return 0.0;
        }
        self.error_count as f64 / self.total_attempts as f64 * 100.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeySample {
    pub key: char,
    pub correct: bool,
    /// `None` for the keystroke that opened the session
    pub latency_ms: Option<Millis>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfusionSample {
    pub expected: char,
    pub actual: char,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceSample {
    pub sequence: String,
    pub had_error: bool,
    pub latency_ms: Millis,
}

/// Everything one completed session contributes to the aggregates
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSamples {
    pub keys: Vec<KeySample>,
    pub confusions: Vec<ConfusionSample>,
    pub sequences: Vec<SequenceSample>,
}

impl SessionSamples {
    pub fn from_log(log: &[KeystrokeEvent], sequence_lengths: &[usize]) -> Self {
        let keys = log
            .iter()
            .enumerate()
            .map(|(i, event)| KeySample {
                key: event.expected,
                correct: event.is_correct,
                latency_ms: (i > 0).then_some(event.latency_ms),
            })
            .collect();

        let confusions = log
            .iter()
            .filter(|event| !event.is_correct)
            .map(|event| ConfusionSample {
                expected: event.expected,
                actual: event.actual,
            })
            .collect();

        let attempts = final_attempts(log);
        let sequences = sequence_lengths
            .iter()
            .filter(|&&n| n >= 2)
            .flat_map(|&n| attempts.windows(n).filter_map(sequence_sample))
            .collect();

        Self {
            keys,
            confusions,
            sequences,
        }
    }

    pub fn len(&self) -> usize {
        self.keys.len() + self.confusions.len() + self.sequences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Where a target position ended up once the session was over
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PositionAttempt {
    position: usize,
    expected: char,
    /// Set if any attempt at this position was wrong, even a later-fixed one
    had_error: bool,
    /// Latency of the last attempt
    latency_ms: Millis,
}

/// Collapses the log to one entry per target position, in position order.
/// Keystrokes erased by a backspace are superseded by the retype.
fn final_attempts(log: &[KeystrokeEvent]) -> Vec<PositionAttempt> {
    let mut attempts: BTreeMap<usize, PositionAttempt> = BTreeMap::new();
    for event in log {
        let retried_error = attempts
            .get(&event.position)
            .is_some_and(|previous| previous.had_error);
        attempts.insert(
            event.position,
            PositionAttempt {
                position: event.position,
                expected: event.expected,
                had_error: retried_error || !event.is_correct,
                latency_ms: event.latency_ms,
            },
        );
    }
    attempts.into_values().collect()
}

/// An n-gram sample over adjacent target positions; windows spanning
/// whitespace or a gap in positions are not sequences.
fn sequence_sample(window: &[PositionAttempt]) -> Option<SequenceSample> {
    let adjacent = window
        .windows(2)
        .all(|pair| pair[1].position == pair[0].position + 1);
    if !adjacent || window.iter().any(|attempt| attempt.expected.is_whitespace()) {
        return None;
    }
    let gaps: Vec<f64> = window
        .iter()
        .skip(1)
        .map(|attempt| attempt.latency_ms as f64)
        .collect();

    Some(SequenceSample {
        sequence: window.iter().map(|attempt| attempt.expected).collect(),
        had_error: window.iter().any(|attempt| attempt.had_error),
        latency_ms: mean(&gaps).unwrap_or_default().round() as Millis,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Session;

    fn typed(target: &str, keys: &str) -> Vec<KeystrokeEvent> {
        let mut session = Session::new(target);
        for (i, c) in keys.chars().enumerate() {
            session.process_key(c, i as Millis * 100);
        }
        session.log().to_vec()
    }

    #[test]
    fn test_key_samples_follow_expected_char() {
        let samples = SessionSamples::from_log(&typed("abc", "axc"), &[]);
        assert_eq!(samples.keys.len(), 3);
        assert_eq!(samples.keys[1].key, 'b');
        assert!(!samples.keys[1].correct);
        assert_eq!(samples.keys[1].latency_ms, Some(100));
    }

    #[test]
    fn test_opening_key_has_no_latency() {
        let samples = SessionSamples::from_log(&typed("ab", "ab"), &[]);
        assert_eq!(samples.keys[0].latency_ms, None);
        assert_eq!(samples.keys[1].latency_ms, Some(100));
    }

    #[test]
    fn test_sequences_use_retyped_positions() {
        let mut session = Session::new("abc");
        session.process_key('a', 0);
        session.process_key('x', 100);
        assert!(session.backspace());
        session.process_key('b', 300);
        session.process_key('c', 400);
        assert!(session.is_complete());

        let samples = SessionSamples::from_log(session.log(), &[2]);
        let sequences: Vec<(&str, bool)> = samples
            .sequences
            .iter()
            .map(|s| (s.sequence.as_str(), s.had_error))
            .collect();
        assert_eq!(sequences, vec![("ab", true), ("bc", true)]);
        // the retype's gap, not the typo's
        assert_eq!(samples.sequences[0].latency_ms, 200);
        // every keystroke still counts as a key press
        assert_eq!(samples.keys.len(), 4);
    }

    #[test]
    fn test_confusions_only_for_errors() {
        let samples = SessionSamples::from_log(&typed("abc", "axc"), &[]);
        assert_eq!(
            samples.confusions,
            vec![ConfusionSample {
                expected: 'b',
                actual: 'x'
            }]
        );
    }

    #[test]
    fn test_sequences_skip_whitespace() {
        let samples = SessionSamples::from_log(&typed("ab cd", "ab cd"), &[2, 3]);
        let sequences: Vec<&str> = samples
            .sequences
            .iter()
            .map(|s| s.sequence.as_str())
            .collect();
        assert_eq!(sequences, vec!["ab", "cd"]);
    }

    #[test]
    fn test_sequence_error_and_latency() {
        let samples = SessionSamples::from_log(&typed("the", "txe"), &[3]);
        assert_eq!(samples.sequences.len(), 1);
        let the = &samples.sequences[0];
        assert_eq!(the.sequence, "the");
        assert!(the.had_error);
        assert_eq!(the.latency_ms, 100);
    }

    #[test]
    fn test_unigram_lengths_are_ignored() {
        let samples = SessionSamples::from_log(&typed("abc", "abc"), &[0, 1]);
        assert!(samples.sequences.is_empty());
        assert_eq!(samples.len(), 3);
    }

    #[test]
    fn test_record_rates() {
        let key = KeyAccuracyRecord {
            key: 'e',
            total_presses: 5,
            correct_presses: 4,
            avg_latency_ms: 120,
            latency_samples: 5,
        };
        assert!((key.accuracy() - 80.0).abs() < 1e-9);
        assert_eq!(key.errors(), 1);

        let seq = SequenceErrorPattern {
            sequence: "th".into(),
            total_attempts: 4,
            error_count: 1,
            avg_latency_ms: 90,
        };
        assert!((seq.error_rate() - 25.0).abs() < 1e-9);
    }
}
