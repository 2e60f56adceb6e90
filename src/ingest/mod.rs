//! Camera ingestion.
//!
//! - `camera`: opens the HTTP MJPEG byte stream (one reader per attempt)
//! - `extract`: cuts complete JPEG frames out of that stream
//!
//! The ingestion layer never decodes pixels; decoding happens in `frame` so a
//! malformed JPEG costs one frame, not the connection.

pub mod camera;
pub mod extract;

pub use camera::{CameraConfig, HttpCamera, StreamConnector};
pub use extract::{FrameExtractor, DEFAULT_MAX_BUFFER_BYTES};
