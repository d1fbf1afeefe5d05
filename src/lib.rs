// Library surface for the adapter binary and integration tests.
pub mod aggregator;
pub mod app_dirs;
pub mod clock;
pub mod config;
pub mod error;
pub mod metrics;
pub mod patterns;
pub mod runtime;
pub mod session;
pub mod store;
pub mod typing_policy;
pub mod util;
pub mod window;

pub use aggregator::{AggregatorConfig, BatchReport, ErrorPatternAggregator};
pub use clock::{Clock, ManualClock, Millis, SystemClock};
pub use error::{Result, TypometerError};
pub use metrics::{LatencyStats, TypingStats};
pub use session::{KeystrokeEvent, Session, SessionListener, SessionPhase};
pub use store::{PatternStore, SqliteStore};
pub use window::{EditEvent, SlidingWindowTracker, Trend, WindowConfig};
