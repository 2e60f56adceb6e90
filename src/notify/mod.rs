//! Best-effort event notifications.
//!
//! Notifications never block the supervisor: `NotifySender::dispatch` puts
//! the snapshot on a small bounded queue drained by one worker thread. A
//! full queue drops the notification with a warning. Delivery failures are
//! logged and not retried. Once shutdown is requested, whatever is still
//! queued is dropped.

mod telegram;

pub use telegram::{TelegramConfig, TelegramNotifier};

use anyhow::{anyhow, Result};
use std::sync::mpsc::{self, RecvTimeoutError, SyncSender, TrySendError};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::shutdown::Shutdown;

const QUEUE_CAPACITY: usize = 4;
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Delivery channel for an event snapshot.
pub trait Notifier: Send {
    fn name(&self) -> &'static str;

    /// Deliver `jpeg` with `caption`. Any error is reported, never retried.
    fn send(&self, jpeg: &[u8], caption: &str) -> Result<()>;
}

/// Notifier used when no messaging endpoint is configured.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn name(&self) -> &'static str {
        "log"
    }

    fn send(&self, jpeg: &[u8], caption: &str) -> Result<()> {
        log::info!("notification: {} ({} byte snapshot)", caption, jpeg.len());
        Ok(())
    }
}

#[derive(Debug)]
pub struct Notification {
    pub caption: String,
    pub jpeg: Vec<u8>,
}

/// Cheap handle used by the supervisor to enqueue notifications.
#[derive(Clone, Debug)]
pub struct NotifySender {
    tx: SyncSender<Notification>,
}

impl NotifySender {
    /// Queue a notification. Returns false when it was dropped.
    pub fn dispatch(&self, caption: &str, jpeg: Vec<u8>) -> bool {
        let notification = Notification {
            caption: caption.to_string(),
            jpeg,
        };
        match self.tx.try_send(notification) {
            Ok(()) => true,
            Err(TrySendError::Full(n)) => {
                log::warn!("notification queue full; dropping '{}'", n.caption);
                false
            }
            Err(TrySendError::Disconnected(n)) => {
                log::warn!("notification worker gone; dropping '{}'", n.caption);
                false
            }
        }
    }
}

/// Owns the notification worker thread.
pub struct NotificationDispatcher {
    sender: NotifySender,
    join: Option<JoinHandle<()>>,
}

impl NotificationDispatcher {
    pub fn spawn(notifier: Box<dyn Notifier>, shutdown: Shutdown) -> Result<Self> {
        let (tx, rx) = mpsc::sync_channel::<Notification>(QUEUE_CAPACITY);
        let join = std::thread::Builder::new()
            .name("notify".to_string())
            .spawn(move || {
                log::info!("notification worker using {}", notifier.name());
                loop {
                    match rx.recv_timeout(POLL_INTERVAL) {
                        Ok(n) => {
                            deliver(notifier.as_ref(), &n);
                            if shutdown.is_triggered() {
                                break;
                            }
                        }
                        Err(RecvTimeoutError::Timeout) => {
                            if shutdown.is_triggered() {
                                break;
                            }
                        }
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
            })?;
        Ok(Self {
            sender: NotifySender { tx },
            join: Some(join),
        })
    }

    pub fn sender(&self) -> NotifySender {
        self.sender.clone()
    }

    /// Wait for the worker to exit. Trigger the shared `Shutdown` first.
    pub fn stop(mut self) -> Result<()> {
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("notification worker panicked"))?;
        }
        Ok(())
    }
}

/// Send one notification; `true` on success.
pub fn deliver(notifier: &dyn Notifier, notification: &Notification) -> bool {
    match notifier.send(&notification.jpeg, &notification.caption) {
        Ok(()) => {
            log::info!("notification '{}' sent via {}", notification.caption, notifier.name());
            true
        }
        Err(err) => {
            log::warn!(
                "notification '{}' via {} failed: {:#}",
                notification.caption,
                notifier.name(),
                err
            );
            false
        }
    }
}
