//! countwatch: object-count monitor for an ESP32 MJPEG camera.
//!
//! # Architecture
//!
//! One supervisor thread owns the camera session:
//!
//! 1. **Ingest**: an HTTP MJPEG byte stream is split into JPEG frames by
//!    marker scanning (`ingest`).
//! 2. **Detect**: every Nth frame runs through a pluggable detector; its
//!    filtered box count is the observed count (`detect`).
//! 3. **Debounce**: count changes must settle before an entering/leaving
//!    event is raised, gated by the live policy (`debounce`, `settings`).
//! 4. **Publish**: annotated frames go into a latest-value store that any
//!    number of viewers read (`store`, `api`).
//! 5. **Notify**: events are delivered best-effort on a worker thread
//!    (`notify`).
//!
//! A watchdog forces a reconnect when a nominally streaming camera stops
//! producing frames (`session`).
//!
//! # Module Structure
//!
//! - `ingest`: camera connection and JPEG frame extraction
//! - `detect`: detector backends and the count/box adapter
//! - `frame`: decode, annotate, encode, status placeholders
//! - `debounce`: settle-time state machine for count changes
//! - `settings`: live notification policy with atomic updates
//! - `store`: latest-frame snapshot shared with viewers
//! - `session`: supervisor, watchdog, session counters
//! - `notify`: notification worker and Telegram delivery
//! - `api`: loopback HTTP surface
//! - `config`: daemon configuration (file + environment)

pub mod api;
pub mod config;
pub mod debounce;
pub mod detect;
pub mod frame;
pub mod ingest;
pub mod notify;
pub mod session;
pub mod settings;
pub mod shutdown;
pub mod store;

pub use api::{ApiConfig, ApiHandle, ApiServer, ApiState};
pub use config::{CountwatchConfig, DetectorKind, DetectorSettings};
pub use debounce::{CountEvent, DebounceEngine, Direction, Phase};
pub use detect::{
    Detection, DetectionAdapter, DetectionResult, DetectorBackend, DetectorConfig,
    ScriptedBackend, StubBackend,
};
pub use frame::{DecodedFrame, FeedStatus};
pub use ingest::{CameraConfig, FrameExtractor, HttpCamera, StreamConnector};
pub use notify::{
    LogNotifier, NotificationDispatcher, Notifier, NotifySender, TelegramConfig,
    TelegramNotifier,
};
pub use session::{
    SessionConfig, SessionHandle, SessionLink, SessionStats, SessionSupervisor, Watchdog,
};
pub use settings::{LiveSettings, Settings, SettingsUpdate};
pub use shutdown::Shutdown;
pub use store::{FrameUpdate, SharedFrame, SharedFrameStore};

#[cfg(feature = "backend-tract")]
pub use detect::TractBackend;
