//! Latest-frame store shared between the supervisor and viewer streams.
//!
//! Single writer (the session supervisor), any number of readers. Every
//! publish builds a complete immutable `SharedFrame` and swaps the `Arc`;
//! readers clone the `Arc` and never hold the lock while encoding or writing
//! to a socket. A reader therefore always sees a frame together with the
//! count and status that were published with it.

use std::sync::{Arc, RwLock};
use std::time::Instant;

use crate::frame::FeedStatus;

#[derive(Clone, Debug)]
pub struct SharedFrame {
    /// JPEG-encoded annotated frame.
    pub jpeg: Arc<[u8]>,
    pub detected_count: u32,
    pub stream_active: bool,
    pub status: FeedStatus,
    /// When the last camera frame was published. Placeholder frames carry
    /// the previous value forward so they never look like camera activity.
    pub last_frame_at: Instant,
    /// Monotonic publish counter; lets viewers skip frames they already sent.
    pub sequence: u64,
}

/// What the producer hands to `publish`.
#[derive(Clone, Debug)]
pub struct FrameUpdate {
    pub jpeg: Vec<u8>,
    pub detected_count: u32,
    pub stream_active: bool,
    pub status: FeedStatus,
    /// True for real camera frames (advances `last_frame_at`).
    pub from_camera: bool,
}

#[derive(Debug)]
pub struct SharedFrameStore {
    current: RwLock<Arc<SharedFrame>>,
}

impl SharedFrameStore {
    pub fn new(initial_jpeg: Vec<u8>, status: FeedStatus) -> Self {
        Self {
            current: RwLock::new(Arc::new(SharedFrame {
                jpeg: initial_jpeg.into(),
                detected_count: 0,
                stream_active: false,
                status,
                last_frame_at: Instant::now(),
                sequence: 0,
            })),
        }
    }

    /// Replace the current snapshot.
    pub fn publish(&self, update: FrameUpdate) {
        self.publish_at(update, Instant::now());
    }

    pub(crate) fn publish_at(&self, update: FrameUpdate, now: Instant) {
        let mut guard = match self.current.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let next = SharedFrame {
            jpeg: update.jpeg.into(),
            detected_count: update.detected_count,
            stream_active: update.stream_active,
            status: update.status,
            last_frame_at: if update.from_camera {
                now
            } else {
                guard.last_frame_at
            },
            sequence: guard.sequence + 1,
        };
        *guard = Arc::new(next);
    }

    /// Current snapshot.
    pub fn current(&self) -> Arc<SharedFrame> {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn detected_count(&self) -> u32 {
        self.current().detected_count
    }

    pub fn stream_active(&self) -> bool {
        self.current().stream_active
    }

    pub fn last_frame_at(&self) -> Instant {
        self.current().last_frame_at
    }
}
