use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::clock::{Clock, Millis};
use crate::error::{Result, TypometerError};
use crate::metrics::calculate_wpm;

pub const DEFAULT_WINDOW_MS: Millis = 10_000;
pub const DEFAULT_MAX_INSERT_CHARS: usize = 5;
pub const DEFAULT_TREND_THRESHOLD: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WindowConfig {
    pub window_ms: Millis,
    /// Inserts longer than this are pastes or completions, not typing
    pub max_insert_chars: usize,
    pub trend_threshold: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            window_ms: DEFAULT_WINDOW_MS,
            max_insert_chars: DEFAULT_MAX_INSERT_CHARS,
            trend_threshold: DEFAULT_TREND_THRESHOLD,
        }
    }
}

/// A change notification from an editor or other text surface
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditEvent {
    Insert { text: String },
    Delete { len: usize },
}

impl EditEvent {
    pub fn insert(text: impl Into<String>) -> Self {
        Self::Insert { text: text.into() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum_macros::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Trend {
    Up,
    Down,
    Stable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WindowSnapshot {
    pub wpm: u32,
    pub peak_wpm: u32,
    pub keystrokes: usize,
}

#[derive(Debug, Default)]
struct WindowState {
    timestamps: VecDeque<Millis>,
    peak_wpm: u32,
    previous_wpm: u32,
}

impl WindowState {
    /// Evicts every timestamp with `now - t >= window_ms`; only entries
    /// strictly younger than the window survive.
    fn prune(&mut self, now: Millis, window_ms: Millis) {
        while let Some(&oldest) = self.timestamps.front() {
            if now - oldest < window_ms {
                break;
            }
            self.timestamps.pop_front();
        }
    }

    fn read_wpm(&mut self, now: Millis, window_ms: Millis) -> u32 {
        self.prune(now, window_ms);
        let wpm = calculate_wpm(self.timestamps.len(), window_ms);
        self.peak_wpm = self.peak_wpm.max(wpm);
        wpm
    }
}

/// Estimates the current typing rate from a rolling window of keystroke times.
///
/// The window state sits behind a single mutex, so an edit listener and a
/// periodic reader can share one tracker through an `Arc`.
pub struct SlidingWindowTracker {
    config: WindowConfig,
    clock: Arc<dyn Clock>,
    state: Mutex<WindowState>,
}

impl std::fmt::Debug for SlidingWindowTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlidingWindowTracker")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SlidingWindowTracker {
    pub fn new(config: WindowConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        if config.window_ms <= 0 {
            warn!(window_ms = config.window_ms, "rejected window size");
            return Err(TypometerError::Config(format!(
                "window_ms must be positive, got {}",
                config.window_ms
            )));
        }

        Ok(Self {
            config,
            clock,
            state: Mutex::new(WindowState::default()),
        })
    }

    pub fn config(&self) -> &WindowConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, WindowState> {
        // the state stays consistent even if a holder panicked
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Feeds an edit notification. Deletions and oversized inserts are
    /// filtered out; returns whether anything was recorded.
    pub fn on_edit(&self, edit: &EditEvent) -> bool {
        let chars = match edit {
            EditEvent::Delete { .. } => return false,
            EditEvent::Insert { text } => text.chars().count(),
        };
        if chars == 0 || chars > self.config.max_insert_chars {
            debug!(chars, "ignored bulk insert");
            return false;
        }

        let now = self.clock.now_ms();
        let mut state = self.lock();
        state.timestamps.extend(std::iter::repeat(now).take(chars));
        true
    }

    pub fn record_keystroke(&self) {
        let now = self.clock.now_ms();
        self.lock().timestamps.push_back(now);
    }

    /// Drops expired timestamps; driven by a periodic decay tick.
    pub fn tick(&self) {
        let now = self.clock.now_ms();
        self.lock().prune(now, self.config.window_ms);
    }

    pub fn wpm(&self) -> u32 {
        let now = self.clock.now_ms();
        self.lock().read_wpm(now, self.config.window_ms)
    }

    pub fn keystroke_count(&self) -> usize {
        let now = self.clock.now_ms();
        let mut state = self.lock();
        state.prune(now, self.config.window_ms);
        state.timestamps.len()
    }

    /// Compares the current rate with the previous sample and stores the
    /// current one as the next baseline. Call at a steady cadence.
    pub fn trend(&self) -> Trend {
        let now = self.clock.now_ms();
        let mut state = self.lock();
        let current = state.read_wpm(now, self.config.window_ms) as i64;
        let previous = state.previous_wpm as i64;
        state.previous_wpm = current as u32;

        let threshold = self.config.trend_threshold as i64;
        if current - previous > threshold {
            Trend::Up
        } else if previous - current > threshold {
            Trend::Down
        } else {
            Trend::Stable
        }
    }

    pub fn peak_wpm(&self) -> u32 {
        self.lock().peak_wpm
    }

    pub fn snapshot(&self) -> WindowSnapshot {
        let now = self.clock.now_ms();
        let mut state = self.lock();
        let wpm = state.read_wpm(now, self.config.window_ms);
        WindowSnapshot {
            wpm,
            peak_wpm: state.peak_wpm,
            keystrokes: state.timestamps.len(),
        }
    }

    pub fn reset(&self) {
        *self.lock() = WindowState::default();
    }
}
