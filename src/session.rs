use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::Serialize;
use tracing::{debug, info};

use crate::clock::Millis;
use crate::metrics::{calculate_stats, TypingStats};
use crate::typing_policy::BackspacePolicy;

/// One recorded key intent. Immutable once appended to the log.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct KeystrokeEvent {
    pub timestamp: Millis,
    pub expected: char,
    pub actual: char,
    pub is_correct: bool,
    pub latency_ms: Millis,
    /// Index into the target text this keystroke was typed at
    pub position: usize,
}

/// Lifecycle of a session. The clock starts on the first accepted key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Active { started_at: Millis },
    Complete { started_at: Millis, completed_at: Millis },
}

/// Receives session results synchronously, at the input that produced them.
pub trait SessionListener: Send {
    fn on_keystroke(&mut self, _event: &KeystrokeEvent, _stats: &TypingStats) {}
    fn on_complete(&mut self, _stats: &TypingStats, _log: &[KeystrokeEvent]) {}
}

/// A single practice run against a target text
pub struct Session {
    target: Vec<char>,
    cursor: usize,
    errors_at: BTreeMap<usize, char>,
    log: Vec<KeystrokeEvent>,
    phase: SessionPhase,
    last_key_at: Option<Millis>,
    cleared_errors: BTreeSet<usize>,
    corrected_positions: BTreeSet<usize>,
    policy: BackspacePolicy,
    listener: Option<Box<dyn SessionListener>>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("target", &self.target_text())
            .field("cursor", &self.cursor)
            .field("errors_at", &self.errors_at)
            .field("keystrokes", &self.log.len())
            .field("phase", &self.phase)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl Session {
    pub fn new(target: impl Into<String>) -> Self {
        Self::with_policy(target, BackspacePolicy::default())
    }

    pub fn with_policy(target: impl Into<String>, policy: BackspacePolicy) -> Self {
        Self {
            target: target.into().chars().collect(),
            cursor: 0,
            errors_at: BTreeMap::new(),
            log: Vec::new(),
            phase: SessionPhase::Idle,
            last_key_at: None,
            cleared_errors: BTreeSet::new(),
            corrected_positions: BTreeSet::new(),
            policy,
            listener: None,
        }
    }

    pub fn set_listener(&mut self, listener: Box<dyn SessionListener>) {
        self.listener = Some(listener);
    }

    pub fn target_text(&self) -> String {
        self.target.iter().collect()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn policy(&self) -> BackspacePolicy {
        self.policy
    }

    pub fn log(&self) -> &[KeystrokeEvent] {
        &self.log
    }

    /// Wrong characters still standing, by position.
    pub fn errors_at(&self) -> &BTreeMap<usize, char> {
        &self.errors_at
    }

    /// Positions that were typed wrong, erased, and then typed right.
    pub fn corrected_positions(&self) -> &BTreeSet<usize> {
        &self.corrected_positions
    }

    pub fn has_started(&self) -> bool {
        !matches!(self.phase, SessionPhase::Idle)
    }

    pub fn is_complete(&self) -> bool {
        matches!(self.phase, SessionPhase::Complete { .. })
    }

    pub fn stats(&self, now: Millis) -> TypingStats {
        calculate_stats(&self.log, &self.phase, now)
    }

    /// Types `c` at the cursor. Errors are flagged, never blocking: the cursor
    /// advances either way. Ignored once the session is complete.
    pub fn process_key(&mut self, c: char, at: Millis) -> Option<KeystrokeEvent> {
        if self.is_complete() {
            return None;
        }
        let expected = *self.target.get(self.cursor)?;

        if self.phase == SessionPhase::Idle {
            debug!(started_at = at, "session started");
            self.phase = SessionPhase::Active { started_at: at };
        }

        let latency_ms = self
            .last_key_at
            .map_or(0, |previous| (at - previous).max(0));
        self.last_key_at = Some(at);

        let event = KeystrokeEvent {
            timestamp: at,
            expected,
            actual: c,
            is_correct: c == expected,
            latency_ms,
            position: self.cursor,
        };
        self.log.push(event);

        if event.is_correct {
            self.errors_at.remove(&self.cursor);
            if self.cleared_errors.remove(&self.cursor) {
                self.corrected_positions.insert(self.cursor);
            }
        } else {
            self.errors_at.insert(self.cursor, c);
        }
        self.cursor += 1;

        if self.cursor == self.target.len() {
            if let SessionPhase::Active { started_at } = self.phase {
                self.phase = SessionPhase::Complete {
                    started_at,
                    completed_at: at,
                };
            }
        }

        let stats = self.stats(at);
        if let Some(listener) = self.listener.as_mut() {
            listener.on_keystroke(&event, &stats);
        }
        if self.is_complete() {
            info!(
                wpm = stats.wpm,
                accuracy = stats.accuracy,
                keystrokes = stats.keystrokes,
                "session complete"
            );
            if let Some(listener) = self.listener.as_mut() {
                listener.on_complete(&stats, &self.log);
            }
        }

        Some(event)
    }

    /// Moves the cursor back one position and clears its error flag.
    /// Returns whether the cursor moved.
    pub fn backspace(&mut self) -> bool {
        if !matches!(self.phase, SessionPhase::Active { .. }) || self.cursor == 0 {
            return false;
        }
        self.cursor -= 1;
        if self.errors_at.remove(&self.cursor).is_some() {
            self.cleared_errors.insert(self.cursor);
        }
        if let Some(removed) = self.policy.apply(&mut self.log, self.cursor) {
            debug!(position = removed.position, "dropped corrected keystroke");
        }

        true
    }

    /// Discards cursor, log, and timer. Persisted aggregates are untouched.
    pub fn reset(&mut self) {
        self.cursor = 0;
        self.errors_at.clear();
        self.log.clear();
        self.phase = SessionPhase::Idle;
        self.last_key_at = None;
        self.cleared_errors.clear();
        self.corrected_positions.clear();
    }

    pub fn escape(&mut self) {
        self.reset()
    }

    pub fn set_target(&mut self, target: impl Into<String>) {
        self.target = target.into().chars().collect();
        self.reset();
    }
}
