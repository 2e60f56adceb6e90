//! Camera session supervisor and disconnect watchdog.
//!
//! The supervisor loops `Connecting -> Streaming -> Disconnected` until
//! shutdown:
//!
//! 1. Connecting: publish a placeholder, open the stream, retry forever with
//!    a short delay.
//! 2. Streaming: fresh extractor and debounce state; every extracted frame is
//!    decoded, annotated with the latest boxes and published; every Nth frame
//!    goes through detection and its count through the debounce engine.
//! 3. Disconnected: publish a placeholder, zero the count, drop the stream,
//!    wait, then reconnect.
//!
//! The watchdog runs on its own thread and only flips a flag; the supervisor
//! honours it at the next read boundary. Reads are bounded by the
//! connector's read timeout, so a stalled socket can delay the transition by
//! at most one timeout.

use anyhow::{anyhow, Context, Result};
use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::debounce::{CountEvent, DebounceEngine};
use crate::detect::{DetectionAdapter, Detection};
use crate::frame::{self, DecodedFrame, FeedStatus, JPEG_QUALITY};
use crate::ingest::{FrameExtractor, StreamConnector, DEFAULT_MAX_BUFFER_BYTES};
use crate::notify::NotifySender;
use crate::settings::{LiveSettings, Settings};
use crate::shutdown::Shutdown;
use crate::store::{FrameUpdate, SharedFrameStore};

#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Run detection on every Nth extracted frame (first frame included).
    pub sample_every: u32,
    pub connect_retry_delay: Duration,
    pub reconnect_delay: Duration,
    pub disconnect_threshold: Duration,
    pub watchdog_interval: Duration,
    pub max_buffer_bytes: usize,
    pub read_chunk_bytes: usize,
    /// Placeholder frame size.
    pub display_width: u32,
    pub display_height: u32,
    pub stats_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            sample_every: 4,
            connect_retry_delay: Duration::from_millis(100),
            reconnect_delay: Duration::from_secs(3),
            disconnect_threshold: Duration::from_secs(10),
            watchdog_interval: Duration::from_secs(1),
            max_buffer_bytes: DEFAULT_MAX_BUFFER_BYTES,
            read_chunk_bytes: 8 * 1024,
            display_width: frame::DEFAULT_DISPLAY_WIDTH,
            display_height: frame::DEFAULT_DISPLAY_HEIGHT,
            stats_interval: Duration::from_secs(30),
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.sample_every == 0 {
            return Err(anyhow!("sample_every must be at least 1"));
        }
        if self.read_chunk_bytes == 0 {
            return Err(anyhow!("read_chunk_bytes must be non-zero"));
        }
        if self.max_buffer_bytes < self.read_chunk_bytes {
            return Err(anyhow!(
                "max_buffer_bytes ({}) must be at least read_chunk_bytes ({})",
                self.max_buffer_bytes,
                self.read_chunk_bytes
            ));
        }
        if self.disconnect_threshold.is_zero() {
            return Err(anyhow!("disconnect threshold must be greater than zero"));
        }
        Ok(())
    }
}

/// Streaming state shared between the supervisor and the watchdog.
#[derive(Debug, Default)]
pub struct SessionLink {
    streaming_since: Mutex<Option<Instant>>,
    disconnect_requested: AtomicBool,
}

impl SessionLink {
    pub fn new() -> Self {
        Self::default()
    }

    fn begin_streaming(&self, now: Instant) {
        self.disconnect_requested.store(false, Ordering::SeqCst);
        *self.lock_since() = Some(now);
    }

    fn end_streaming(&self) {
        *self.lock_since() = None;
    }

    /// `Some(start)` while the supervisor is in the Streaming state.
    pub fn streaming_since(&self) -> Option<Instant> {
        *self.lock_since()
    }

    pub fn request_disconnect(&self) {
        self.disconnect_requested.store(true, Ordering::SeqCst);
    }

    fn take_disconnect_request(&self) -> bool {
        self.disconnect_requested.swap(false, Ordering::SeqCst)
    }

    fn lock_since(&self) -> std::sync::MutexGuard<'_, Option<Instant>> {
        match self.streaming_since.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Counters for one supervisor lifetime.
#[derive(Clone, Debug, Default)]
pub struct SessionStats {
    pub frames_extracted: u64,
    pub frames_discarded: u64,
    pub frames_sampled: u64,
    pub detect_failures: u64,
    pub events: u64,
    pub notifications_queued: u64,
    pub sessions: u64,
}

/// Flags a stalled stream: nominally Streaming but no camera frame for
/// longer than the threshold.
pub struct Watchdog {
    link: Arc<SessionLink>,
    store: Arc<SharedFrameStore>,
    threshold: Duration,
}

impl Watchdog {
    pub fn new(link: Arc<SessionLink>, store: Arc<SharedFrameStore>, threshold: Duration) -> Self {
        Self {
            link,
            store,
            threshold,
        }
    }

    /// Returns true when it requested a disconnect.
    pub fn check(&self, now: Instant) -> bool {
        let Some(since) = self.link.streaming_since() else {
            return false;
        };
        let last = self.store.last_frame_at().max(since);
        let idle = now.saturating_duration_since(last);
        if idle < self.threshold {
            return false;
        }
        log::warn!(
            "no camera frame for {:.1}s (threshold {:.1}s); forcing reconnect",
            idle.as_secs_f64(),
            self.threshold.as_secs_f64()
        );
        self.link.request_disconnect();
        true
    }

    fn spawn(self, interval: Duration, shutdown: Shutdown) -> Result<JoinHandle<()>> {
        let join = std::thread::Builder::new()
            .name("watchdog".to_string())
            .spawn(move || {
                while !shutdown.wait_timeout(interval) {
                    self.check(Instant::now());
                }
            })?;
        Ok(join)
    }
}

/// Per-connection bookkeeping, rebuilt on every reconnect.
struct StreamState {
    extractor: FrameExtractor,
    debounce: DebounceEngine,
    frame_index: u64,
    count: u32,
    /// Latest boxes in display coordinates; reused on non-sampled frames.
    boxes: Vec<Detection>,
}

pub struct SessionSupervisor {
    connector: Box<dyn StreamConnector>,
    detector: DetectionAdapter,
    store: Arc<SharedFrameStore>,
    settings: Arc<LiveSettings>,
    notify: Option<NotifySender>,
    link: Arc<SessionLink>,
    config: SessionConfig,
    shutdown: Shutdown,
    stats: SessionStats,
}

impl SessionSupervisor {
    pub fn new(
        connector: Box<dyn StreamConnector>,
        detector: DetectionAdapter,
        store: Arc<SharedFrameStore>,
        settings: Arc<LiveSettings>,
        config: SessionConfig,
        shutdown: Shutdown,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            connector,
            detector,
            store,
            settings,
            notify: None,
            link: Arc::new(SessionLink::new()),
            config,
            shutdown,
            stats: SessionStats::default(),
        })
    }

    /// Route events to a notification worker.
    pub fn with_notifier(mut self, notify: NotifySender) -> Self {
        self.notify = Some(notify);
        self
    }

    pub fn link(&self) -> Arc<SessionLink> {
        self.link.clone()
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Run the supervisor and its watchdog on background threads.
    pub fn spawn(self) -> Result<SessionHandle> {
        let watchdog = Watchdog::new(
            self.link.clone(),
            self.store.clone(),
            self.config.disconnect_threshold,
        );
        let watchdog_join = watchdog.spawn(self.config.watchdog_interval, self.shutdown.clone())?;
        let supervisor_join = std::thread::Builder::new()
            .name("session".to_string())
            .spawn(move || self.run())?;
        Ok(SessionHandle {
            supervisor: Some(supervisor_join),
            watchdog: Some(watchdog_join),
        })
    }

    /// Connect/stream/reconnect until shutdown. Returns the final counters.
    pub fn run(mut self) -> SessionStats {
        log::info!(
            "session supervisor started: source={} detector={} sample_every={}",
            self.connector.describe(),
            self.detector.backend_name(),
            self.config.sample_every
        );
        if let Err(err) = self.detector.warm_up() {
            log::warn!("detector warm-up failed: {:#}", err);
        }

        loop {
            self.publish_status(FeedStatus::Connecting, false);
            let Some(reader) = self.connect_with_retry() else {
                break;
            };
            self.stats.sessions += 1;
            log::info!("connected to {}; running object detection", self.connector.describe());

            match self.stream(reader) {
                Ok(()) => log::info!("stream closed for shutdown"),
                Err(err) => log::warn!("camera stream ended: {:#}", err),
            }

            self.link.end_streaming();
            self.publish_status(FeedStatus::Disconnected, false);
            self.log_stats();

            if self.shutdown.is_triggered() {
                break;
            }
            log::info!(
                "restarting stream in {:.1}s",
                self.config.reconnect_delay.as_secs_f64()
            );
            if self.shutdown.wait_timeout(self.config.reconnect_delay) {
                break;
            }
        }
        log::info!("session supervisor stopped");
        self.stats
    }

    fn connect_with_retry(&mut self) -> Option<Box<dyn Read + Send>> {
        let mut attempts = 0u64;
        loop {
            if self.shutdown.is_triggered() {
                return None;
            }
            match self.connector.connect() {
                Ok(reader) => return Some(reader),
                Err(err) => {
                    attempts += 1;
                    if attempts == 1 {
                        log::warn!("camera connect failed: {:#}; retrying", err);
                    } else {
                        log::debug!("camera connect attempt {} failed: {:#}", attempts, err);
                    }
                }
            }
            if self.shutdown.wait_timeout(self.config.connect_retry_delay) {
                return None;
            }
        }
    }

    /// Streaming state. `Ok` only when leaving for shutdown.
    fn stream(&mut self, mut reader: Box<dyn Read + Send>) -> Result<()> {
        let mut state = StreamState {
            extractor: FrameExtractor::with_max_buffer(self.config.max_buffer_bytes),
            debounce: DebounceEngine::new(),
            frame_index: 0,
            count: 0,
            boxes: Vec::new(),
        };
        self.publish_status(FeedStatus::Starting, true);
        self.link.begin_streaming(Instant::now());

        let mut chunk = vec![0u8; self.config.read_chunk_bytes];
        let mut last_stats_log = Instant::now();
        loop {
            if self.shutdown.is_triggered() {
                return Ok(());
            }
            if self.link.take_disconnect_request() {
                return Err(anyhow!("stream stalled; disconnect requested by watchdog"));
            }

            let read = reader.read(&mut chunk).context("read camera stream")?;
            if read == 0 {
                return Err(anyhow!("camera stream ended"));
            }

            let mut frames = Vec::new();
            frames.extend(state.extractor.feed(&chunk[..read])?);
            for jpeg in frames {
                self.process_frame(jpeg, &mut state);
            }

            if last_stats_log.elapsed() >= self.config.stats_interval {
                self.log_stats();
                last_stats_log = Instant::now();
            }
        }
    }

    fn process_frame(&mut self, jpeg: Vec<u8>, state: &mut StreamState) {
        let frame = match DecodedFrame::decode(jpeg) {
            Ok(frame) => frame,
            Err(err) => {
                self.stats.frames_discarded += 1;
                log::debug!("discarding malformed frame: {:#}", err);
                return;
            }
        };
        self.stats.frames_extracted += 1;

        let sampled = state.frame_index % u64::from(self.config.sample_every) == 0;
        state.frame_index += 1;
        if sampled {
            self.sample(&frame, state);
        }

        let (_, mut image) = frame.into_parts();
        frame::annotate(&mut image, &state.boxes);
        match frame::encode_jpeg(&image, JPEG_QUALITY) {
            Ok(jpeg) => self.store.publish(FrameUpdate {
                jpeg,
                detected_count: state.count,
                stream_active: true,
                status: FeedStatus::Streaming,
                from_camera: true,
            }),
            Err(err) => log::warn!("failed to encode annotated frame: {:#}", err),
        }
    }

    fn sample(&mut self, frame: &DecodedFrame, state: &mut StreamState) {
        let result = match self.detector.detect(frame.image()) {
            Ok(result) => result,
            Err(err) => {
                self.stats.detect_failures += 1;
                log::warn!("detection failed: {:#}", err);
                return;
            }
        };
        self.stats.frames_sampled += 1;
        state.count = result.count();
        state.boxes = result.scaled_boxes(self.detector.input_size(), frame.dimensions());

        let settings = self.settings.current();
        if let Some(event) = state.debounce.observe(state.count, Instant::now(), &settings) {
            self.raise(event, frame.jpeg(), &settings);
        }
    }

    fn raise(&mut self, event: CountEvent, jpeg: &[u8], settings: &Settings) {
        self.stats.events += 1;
        let caption = event.direction.caption();
        log::info!(
            "{} (baseline={} count={})",
            caption,
            event.baseline,
            event.count
        );
        if !settings.notify_enabled {
            return;
        }
        if let Some(notify) = &self.notify {
            if notify.dispatch(caption, jpeg.to_vec()) {
                self.stats.notifications_queued += 1;
            }
        }
    }

    fn publish_status(&self, status: FeedStatus, stream_active: bool) {
        let image = frame::status_frame(
            self.config.display_width,
            self.config.display_height,
            status,
        );
        match frame::encode_jpeg(&image, JPEG_QUALITY) {
            Ok(jpeg) => self.store.publish(FrameUpdate {
                jpeg,
                detected_count: 0,
                stream_active,
                status,
                from_camera: false,
            }),
            Err(err) => log::error!("failed to encode status frame: {:#}", err),
        }
        log::info!("{}", status.message());
    }

    fn log_stats(&self) {
        let s = &self.stats;
        log::info!(
            "session stats: sessions={} frames={} sampled={} discarded={} detect_failures={} events={} notifications={}",
            s.sessions,
            s.frames_extracted,
            s.frames_sampled,
            s.frames_discarded,
            s.detect_failures,
            s.events,
            s.notifications_queued
        );
    }
}

/// Join handles for the supervisor and watchdog threads.
pub struct SessionHandle {
    supervisor: Option<JoinHandle<SessionStats>>,
    watchdog: Option<JoinHandle<()>>,
}

impl SessionHandle {
    /// Wait for both threads. Trigger the shared `Shutdown` first.
    pub fn stop(mut self) -> Result<SessionStats> {
        if let Some(join) = self.watchdog.take() {
            join.join().map_err(|_| anyhow!("watchdog thread panicked"))?;
        }
        let stats = match self.supervisor.take() {
            Some(join) => join
                .join()
                .map_err(|_| anyhow!("session supervisor thread panicked"))?,
            None => SessionStats::default(),
        };
        Ok(stats)
    }
}
