use itertools::Itertools;
use serde::Serialize;

use crate::clock::Millis;
use crate::session::{KeystrokeEvent, SessionPhase};
use crate::util::{mean, percentile, std_dev};

const AVERAGE_WORD_LENGTH: f64 = 5.0;
const MS_PER_MINUTE: f64 = 60_000.0;

/// Distribution of the gaps between consecutive keystrokes, in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct LatencyStats {
    pub avg: f64,
    pub min: Millis,
    pub max: Millis,
    pub std_dev: f64,
    pub p50: Millis,
    pub p95: Millis,
}

impl LatencyStats {
    pub fn from_samples(samples: &[Millis]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }

        let sorted = samples.iter().copied().sorted_unstable().collect_vec();
        let as_f64: Vec<f64> = sorted.iter().map(|&ms| ms as f64).collect();

        Self {
            avg: mean(&as_f64).unwrap_or_default(),
            min: sorted[0],
            max: sorted[sorted.len() - 1],
            std_dev: std_dev(&as_f64).unwrap_or_default(),
            p50: percentile(&sorted, 50.0).unwrap_or_default(),
            p95: percentile(&sorted, 95.0).unwrap_or_default(),
        }
    }
}

/// Snapshot of a session's performance. Never stored; derive it again from the session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct TypingStats {
    pub wpm: u32,
    pub raw_wpm: u32,
    pub accuracy: u32,
    pub keystrokes: usize,
    pub errors: usize,
    pub duration_ms: Millis,
    pub latency: LatencyStats,
}

impl TypingStats {
    /// Duration rounded to whole seconds for display.
    pub fn duration_secs(&self) -> i64 {
        (self.duration_ms as f64 / 1000.0).round() as i64
    }
}

/// Words per minute for `chars` characters over `elapsed_ms`, five characters to a word.
pub fn calculate_wpm(chars: usize, elapsed_ms: Millis) -> u32 {
    if elapsed_ms <= 0 {
        return 0;
    }
    let words = chars as f64 / AVERAGE_WORD_LENGTH;
    let minutes = elapsed_ms as f64 / MS_PER_MINUTE;

    (words / minutes).round() as u32
}

pub fn calculate_accuracy(correct: usize, total: usize) -> u32 {
    if total == 0 {
        return 100;
    }
    ((correct as f64 / total as f64) * 100.0).round() as u32
}

/// Time the session has been running at `now`; frozen once complete.
pub fn elapsed_ms(phase: &SessionPhase, now: Millis) -> Millis {
    match *phase {
        SessionPhase::Idle => 0,
        SessionPhase::Active { started_at } => now - started_at,
        SessionPhase::Complete {
            started_at,
            completed_at,
        } => completed_at - started_at,
    }
}

/// Inter-keystroke gaps of every keystroke after the one that opened the session.
pub fn latency_samples(log: &[KeystrokeEvent]) -> Vec<Millis> {
    log.iter().skip(1).map(|event| event.latency_ms).collect()
}

pub fn calculate_stats(log: &[KeystrokeEvent], phase: &SessionPhase, now: Millis) -> TypingStats {
    if log.is_empty() {
        return TypingStats {
            accuracy: 100,
            ..TypingStats::default()
        };
    }

    let keystrokes = log.len();
    let correct = log.iter().filter(|event| event.is_correct).count();
    let elapsed = elapsed_ms(phase, now);

    TypingStats {
        wpm: calculate_wpm(correct, elapsed),
        raw_wpm: calculate_wpm(keystrokes, elapsed),
        accuracy: calculate_accuracy(correct, keystrokes),
        keystrokes,
        errors: keystrokes - correct,
        duration_ms: elapsed.max(0),
        latency: LatencyStats::from_samples(&latency_samples(log)),
    }
}
