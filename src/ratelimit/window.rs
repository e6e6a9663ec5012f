//! Sliding-window request tracker.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::clock::{Clock, SystemClock};

/// Timestamps of admitted requests for one client, oldest first.
type Timeline = Arc<Mutex<VecDeque<Instant>>>;

/// Outcome of a single [`WindowTracker::is_allowed`] check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    /// Whether the request is admitted
    pub allowed: bool,
    /// Requests left in the window after this one
    pub remaining: u32,
    /// Whole seconds until the oldest counted request leaves the window.
    ///
    /// For a rejection this is measured from the oldest timestamp left after
    /// expired ones are dropped. A timeline never holds more than
    /// `max_requests` entries, so a rejected check has evicted nothing and
    /// the oldest timestamp is the same one seen before eviction.
    pub reset_secs: u64,
}

/// Tracks, per client key, the instants of admitted requests inside a
/// trailing window and decides whether a new request fits.
///
/// Each key owns its own lock, so checks for different keys run in
/// parallel while checks for the same key are serialized. The key map is a
/// sharded `DashMap`, which guarantees a single timeline is installed when
/// two first-requests for an unseen key race.
pub struct WindowTracker {
    /// Timelines indexed by client key
    timelines: DashMap<String, Timeline>,
    /// Maximum requests admitted per window
    max_requests: u32,
    /// Length of the trailing window
    window: Duration,
    /// Time source
    clock: Arc<dyn Clock>,
}

impl WindowTracker {
    /// Create a tracker using the system clock.
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self::with_clock(max_requests, window, Arc::new(SystemClock))
    }

    /// Create a tracker driven by the given clock.
    pub fn with_clock(max_requests: u32, window: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            timelines: DashMap::new(),
            max_requests,
            window,
            clock,
        }
    }

    /// Check whether `key` may make another request right now, recording it
    /// if so.
    ///
    /// Timestamps older than the window are dropped first; one exactly
    /// `window` old still counts. A rejected attempt does not consume a
    /// slot.
    pub fn is_allowed(&self, key: &str) -> Decision {
        let now = self.clock.now();
        let timeline = self.timeline_for(key);
        let mut timeline = timeline.lock();

        self.evict_expired(&mut timeline, now);

        if timeline.len() >= self.max_requests as usize {
            let reset_secs = self.reset_from(timeline.front().copied(), now);
            debug!(
                key = %key,
                count = timeline.len(),
                limit = self.max_requests,
                reset_secs,
                "Window full, rejecting"
            );
            return Decision {
                allowed: false,
                remaining: 0,
                reset_secs,
            };
        }

        timeline.push_back(now);
        let remaining = self.max_requests.saturating_sub(timeline.len() as u32);
        let reset_secs = self.reset_from(timeline.front().copied(), now);

        trace!(key = %key, remaining, reset_secs, "Request admitted");

        Decision {
            allowed: true,
            remaining,
            reset_secs,
        }
    }

    /// Requests `key` could still make in the current window, without
    /// recording anything.
    pub fn remaining(&self, key: &str) -> u32 {
        let now = self.clock.now();
        match self.timelines.get(key) {
            Some(timeline) => {
                let timeline = timeline.lock();
                let live = self.live_count(&timeline, now);
                self.max_requests.saturating_sub(live as u32)
            }
            None => self.max_requests,
        }
    }

    /// Seconds until the oldest live request of `key` leaves the window, or
    /// `None` if the key has no live requests.
    pub fn reset_secs(&self, key: &str) -> Option<u64> {
        let now = self.clock.now();
        let timeline = self.timelines.get(key)?;
        let timeline = timeline.lock();
        timeline
            .iter()
            .find(|t| now.saturating_duration_since(**t) <= self.window)
            .map(|oldest| self.reset_from(Some(*oldest), now))
    }

    /// Remove keys whose timelines hold no live timestamps.
    ///
    /// A key is only removed when no in-flight check holds its timeline,
    /// so a concurrent admission can never be lost. Returns the number of
    /// keys removed.
    pub fn purge_idle(&self) -> usize {
        let now = self.clock.now();
        let before = self.timelines.len();

        self.timelines.retain(|_, timeline| {
            // Clones are only handed out under the shard lock `retain` holds,
            // so a count of one means nobody else can be using it.
            if Arc::strong_count(timeline) > 1 {
                return true;
            }
            match timeline.try_lock() {
                Some(guard) => self.live_count(&guard, now) > 0,
                None => true,
            }
        });

        let purged = before.saturating_sub(self.timelines.len());
        if purged > 0 {
            debug!(purged, remaining_keys = self.timelines.len(), "Purged idle client keys");
        }
        purged
    }

    /// Number of client keys currently tracked.
    pub fn tracked_keys(&self) -> usize {
        self.timelines.len()
    }

    /// Maximum requests admitted per window.
    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    /// Length of the trailing window.
    pub fn window(&self) -> Duration {
        self.window
    }

    fn timeline_for(&self, key: &str) -> Timeline {
        if let Some(existing) = self.timelines.get(key) {
            return Arc::clone(&existing);
        }

        let entry = self.timelines.entry(key.to_string()).or_insert_with(|| {
            debug!(key = %key, limit = self.max_requests, window = ?self.window, "Tracking new client key");
            Arc::new(Mutex::new(VecDeque::with_capacity(self.max_requests as usize)))
        });
        Arc::clone(&entry)
    }

    fn evict_expired(&self, timeline: &mut VecDeque<Instant>, now: Instant) {
        while let Some(oldest) = timeline.front() {
            if now.saturating_duration_since(*oldest) > self.window {
                timeline.pop_front();
            } else {
                break;
            }
        }
    }

    fn live_count(&self, timeline: &VecDeque<Instant>, now: Instant) -> usize {
        timeline
            .iter()
            .filter(|t| now.saturating_duration_since(**t) <= self.window)
            .count()
    }

    fn reset_from(&self, oldest: Option<Instant>, now: Instant) -> u64 {
        match oldest {
            Some(oldest) => self
                .window
                .as_secs()
                .saturating_sub(now.saturating_duration_since(oldest).as_secs()),
            None => self.window.as_secs(),
        }
    }
}

impl std::fmt::Debug for WindowTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WindowTracker")
            .field("max_requests", &self.max_requests)
            .field("window", &self.window)
            .field("tracked_keys", &self.timelines.len())
            .finish()
    }
}

/// Periodically purge idle keys from `tracker` until the returned task is
/// aborted.
pub fn spawn_idle_sweeper(tracker: Arc<WindowTracker>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        // The first tick completes immediately.
        interval.tick().await;
        loop {
            interval.tick().await;
            tracker.purge_idle();
        }
    })
}
