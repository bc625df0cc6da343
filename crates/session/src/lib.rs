//! Detection sessions over a callback-driven watermark engine.
//!
//! At most one session is live at a time. A *request* session resolves its
//! caller exactly once (first valid detection, timeout, failure or stop); a
//! *stream-only* session forwards every detection until stopped. Every
//! detection is also streamed as an `onDetectedId` tuple regardless of mode.
//!
//! ```ignore
//! let handle = SessionController::spawn(engine, sinks, SessionConfig::default());
//! match handle.detect().await? {
//!     RequestOutcome::Success(signal) => println!("{}", signal.signature),
//!     RequestOutcome::Failure(failure) => eprintln!("{failure}"),
//! }
//! ```

mod config;
mod controller;
mod dispatcher;
mod error;
mod fanout;
mod state;
mod timeout;

pub use config::{ReentryPolicy, SessionConfig, DEFAULT_DETECTION_TIMEOUT};
pub use controller::{SessionController, SessionHandle};
pub use error::{Result, SessionError};
pub use fanout::{DeliveryStats, Sinks};
pub use state::{
    DetectionMode, PendingOutcome, SessionCounters, SessionId, SessionSnapshot, SessionState,
};
