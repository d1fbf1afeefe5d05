use std::cell::Cell;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::window::{EditEvent, SlidingWindowTracker, Trend};

/// Unified event type consumed by the ambient runner
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AmbientEvent {
    Edit(EditEvent),
    Tick,
    Closed,
}

/// Source of edit notifications (editor change listeners, terminal input, ...)
pub trait EditEventSource: Send + 'static {
    /// Block for up to `timeout` waiting for an edit.
    fn recv_timeout(&self, timeout: Duration) -> Result<EditEvent, RecvTimeoutError>;
}

/// Edit source fed through an mpsc channel by whatever owns the real input
pub struct ChannelEditSource {
    rx: Receiver<EditEvent>,
}

impl ChannelEditSource {
    pub fn new(rx: Receiver<EditEvent>) -> Self {
        Self { rx }
    }

    /// Creates a source together with the sender a producer pushes edits into
    pub fn channel() -> (Sender<EditEvent>, Self) {
        let (tx, rx) = mpsc::channel();
        (tx, Self { rx })
    }
}

impl EditEventSource for ChannelEditSource {
    fn recv_timeout(&self, timeout: Duration) -> Result<EditEvent, RecvTimeoutError> {
        self.rx.recv_timeout(timeout)
    }
}

/// Configurable ticker interface
pub trait Ticker: Send + Sync + 'static {
    fn interval(&self) -> Duration;
}

/// Fixed interval ticker
#[derive(Clone, Copy, Debug)]
pub struct FixedTicker {
    interval: Duration,
}

impl FixedTicker {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

impl Ticker for FixedTicker {
    fn interval(&self) -> Duration {
        self.interval
    }
}

/// Runner that advances one event/tick at a time
pub struct Runner<E: EditEventSource, T: Ticker> {
    event_source: E,
    ticker: T,
    next_tick: Cell<Instant>,
}

impl<E: EditEventSource, T: Ticker> Runner<E, T> {
    pub fn new(event_source: E, ticker: T) -> Self {
        let next_tick = Cell::new(Instant::now() + ticker.interval());
        Self {
            event_source,
            ticker,
            next_tick,
        }
    }

    /// Returns the next edit, or Tick once the tick deadline has passed.
    /// Ticks fire on schedule even while edits keep arriving.
    pub fn step(&self) -> AmbientEvent {
        let now = Instant::now();
        let deadline = self.next_tick.get();
        if now >= deadline {
            return self.tick(now);
        }
        match self.event_source.recv_timeout(deadline - now) {
            Ok(edit) => AmbientEvent::Edit(edit),
            Err(RecvTimeoutError::Timeout) => self.tick(Instant::now()),
            Err(RecvTimeoutError::Disconnected) => AmbientEvent::Closed,
        }
    }

    fn tick(&self, now: Instant) -> AmbientEvent {
        self.next_tick.set(now + self.ticker.interval());
        AmbientEvent::Tick
    }
}

/// What the status display shows after each decay tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateReading {
    pub wpm: u32,
    pub peak_wpm: u32,
    pub trend: Trend,
}

impl RateReading {
    /// Prunes the window and takes one trend sample.
    pub fn sample(tracker: &SlidingWindowTracker) -> Self {
        tracker.tick();
        let trend = tracker.trend();
        Self {
            wpm: tracker.wpm(),
            peak_wpm: tracker.peak_wpm(),
            trend,
        }
    }
}

/// Outcome of one monitor step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmbientStep {
    Edit,
    Reading(RateReading),
    Closed,
}

/// Background typing-rate monitor: edits feed the tracker, ticks sample it.
pub struct AmbientMonitor<E: EditEventSource, T: Ticker> {
    runner: Runner<E, T>,
    tracker: Arc<SlidingWindowTracker>,
}

impl<E: EditEventSource, T: Ticker> AmbientMonitor<E, T> {
    pub fn new(runner: Runner<E, T>, tracker: Arc<SlidingWindowTracker>) -> Self {
        Self { runner, tracker }
    }

    pub fn tracker(&self) -> &Arc<SlidingWindowTracker> {
        &self.tracker
    }

    /// Handles one event: edits feed the tracker, ticks take a reading.
    pub fn step(&self) -> AmbientStep {
        match self.runner.step() {
            AmbientEvent::Edit(edit) => {
                self.tracker.on_edit(&edit);
                AmbientStep::Edit
            }
            AmbientEvent::Tick => AmbientStep::Reading(self.sample()),
            AmbientEvent::Closed => AmbientStep::Closed,
        }
    }

    pub fn sample(&self) -> RateReading {
        RateReading::sample(&self.tracker)
    }

    /// Drives the monitor until the source disconnects, handing every
    /// reading to `on_reading`.
    pub fn run(&self, mut on_reading: impl FnMut(RateReading)) {
        loop {
            match self.step() {
                AmbientStep::Edit => {}
                AmbientStep::Reading(reading) => on_reading(reading),
                AmbientStep::Closed => break,
            }
        }
    }
}
