//! Count debouncing.
//!
//! Turns the noisy per-sample object count into at most one discrete
//! "entering"/"leaving" event per settle cycle.
//!
//! A cycle starts when a sample differs from the one before it. Direction and
//! baseline are frozen at that moment. Once `settle` has elapsed, the sample
//! that arrives next is checked against the frozen baseline and the valid
//! count range, and the engine goes back to idle whether or not an event
//! fired. Oscillation inside the settle window is ignored: only the value at
//! expiry matters.

use std::time::{Duration, Instant};

use crate::settings::Settings;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Entering,
    Leaving,
}

impl Direction {
    /// Notification caption.
    pub fn caption(self) -> &'static str {
        match self {
            Direction::Entering => "Obj entering",
            Direction::Leaving => "Obj leaving",
        }
    }
}

/// Event raised when a settle cycle resolves in favour of its direction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CountEvent {
    pub direction: Direction,
    pub baseline: u32,
    pub count: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Pending {
        baseline: u32,
        direction: Direction,
        started_at: Instant,
    },
}

/// Debounce state machine. One per streaming session.
#[derive(Debug)]
pub struct DebounceEngine {
    phase: Phase,
    prev: u32,
}

impl DebounceEngine {
    /// A session starts from an empty scene, so the first non-zero sample
    /// opens an `Entering` cycle.
    pub fn new() -> Self {
        Self::primed(0)
    }

    /// Start with `prev` as the count seen just before the first sample.
    pub fn primed(prev: u32) -> Self {
        Self {
            phase: Phase::Idle,
            prev,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Feed one sampled count taken at `now`.
    ///
    /// `settings` must be one snapshot for the whole call; the settle time
    /// and range are never read field by field from live state.
    pub fn observe(&mut self, count: u32, now: Instant, settings: &Settings) -> Option<CountEvent> {
        let prev = std::mem::replace(&mut self.prev, count);
        match self.phase {
            Phase::Idle => {
                if count != prev {
                    let direction = if count < prev {
                        Direction::Leaving
                    } else {
                        Direction::Entering
                    };
                    self.phase = Phase::Pending {
                        baseline: count,
                        direction,
                        started_at: now,
                    };
                }
                None
            }
            Phase::Pending {
                baseline,
                direction,
                started_at,
            } => {
                if now.saturating_duration_since(started_at) < settle_duration(settings) {
                    return None;
                }
                self.phase = Phase::Idle;
                let in_range = settings.min_count <= count && count <= settings.max_count;
                let holds = match direction {
                    Direction::Leaving => count <= baseline,
                    Direction::Entering => count >= baseline,
                };
                (in_range && holds).then_some(CountEvent {
                    direction,
                    baseline,
                    count,
                })
            }
        }
    }
}

impl Default for DebounceEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn settle_duration(settings: &Settings) -> Duration {
    Duration::try_from_secs_f64(settings.settle_seconds).unwrap_or(Duration::ZERO)
}
