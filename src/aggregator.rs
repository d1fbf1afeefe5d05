use serde::Serialize;
use tracing::{info, warn};

use crate::config::DEFAULT_MIN_SAMPLES;
use crate::error::Result;
use crate::patterns::{
    CharErrorPattern, KeyAccuracyRecord, SequenceErrorPattern, SessionSamples,
    DEFAULT_SEQUENCE_LENGTHS,
};
use crate::session::KeystrokeEvent;
use crate::store::PatternStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregatorConfig {
    /// Entries with fewer samples never appear in rankings
    pub min_samples: i64,
    pub sequence_lengths: Vec<usize>,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            min_samples: DEFAULT_MIN_SAMPLES,
            sequence_lengths: DEFAULT_SEQUENCE_LENGTHS.to_vec(),
        }
    }
}

/// Outcome of applying one session's samples
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub applied: usize,
    pub failed: usize,
}

impl BatchReport {
    fn tally(&mut self, result: Result<()>, what: &str) {
        match result {
            Ok(()) => self.applied += 1,
            Err(e) => {
                self.failed += 1;
                warn!(sample = what, error = %e, "failed to apply sample, continuing");
            }
        }
    }
}

/// Folds completed sessions into per-user error-pattern aggregates and
/// answers noise-filtered ranking queries over them.
#[derive(Debug)]
pub struct ErrorPatternAggregator<S: PatternStore> {
    store: S,
    config: AggregatorConfig,
}

impl<S: PatternStore> ErrorPatternAggregator<S> {
    pub fn new(store: S, config: AggregatorConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    pub fn record_session(&self, user: &str, log: &[KeystrokeEvent]) -> BatchReport {
        let samples = SessionSamples::from_log(log, &self.config.sequence_lengths);
        self.apply_batch(user, &samples)
    }

    /// Applies every sample as its own increment. A failed sample is logged
    /// and skipped; increments already applied stay applied.
    pub fn apply_batch(&self, user: &str, samples: &SessionSamples) -> BatchReport {
        let mut report = BatchReport::default();

        for key in &samples.keys {
            report.tally(
                self.store
                    .upsert_key_accuracy(user, key.key, key.correct, key.latency_ms),
                "key",
            );
        }
        for pair in &samples.confusions {
            report.tally(
                self.store.upsert_char_error(user, pair.expected, pair.actual),
                "confusion",
            );
        }
        for seq in &samples.sequences {
            report.tally(
                self.store
                    .upsert_sequence(user, &seq.sequence, seq.had_error, seq.latency_ms),
                "sequence",
            );
        }

        info!(
            user,
            applied = report.applied,
            failed = report.failed,
            "applied session samples"
        );
        report
    }

    pub fn weakest_keys(&self, user: &str, limit: usize) -> Result<Vec<KeyAccuracyRecord>> {
        self.store.weakest_keys(user, limit, self.config.min_samples)
    }

    pub fn slowest_keys(&self, user: &str, limit: usize) -> Result<Vec<KeyAccuracyRecord>> {
        self.store.slowest_keys(user, limit, self.config.min_samples)
    }

    pub fn top_confusions(&self, user: &str, limit: usize) -> Result<Vec<CharErrorPattern>> {
        self.store.top_confusions(user, limit)
    }

    pub fn weakest_sequences(&self, user: &str, limit: usize) -> Result<Vec<SequenceErrorPattern>> {
        self.store
            .weakest_sequences(user, limit, self.config.min_samples)
    }

    pub fn slowest_sequences(&self, user: &str, limit: usize) -> Result<Vec<SequenceErrorPattern>> {
        self.store
            .slowest_sequences(user, limit, self.config.min_samples)
    }
}
