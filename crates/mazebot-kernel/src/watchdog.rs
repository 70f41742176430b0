//! [`Watchdog`] – liveness monitor for pose sources and links.
//!
//! Every monitored source calls [`Watchdog::heartbeat_at`] with the time it
//! produced data.  A source is *timed out* once its deadline passes without a
//! heartbeat.  The control loop polls [`Watchdog::check_all`] each cycle.
//!
//! Every time-dependent method has an `_at` variant taking the current
//! [`Instant`] so callers with their own clock stay deterministic.

use std::collections::HashMap;
use std::time::{Duration, Instant};

// ────────────────────────────────────────────────────────────────────────────
// Public types
// ────────────────────────────────────────────────────────────────────────────

/// Health state reported for a single source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentHealth {
    /// Registered, but no heartbeat yet.
    Waiting,
    /// A heartbeat arrived within the deadline.
    Healthy,
    /// The deadline passed without a heartbeat.
    TimedOut,
}

struct ComponentEntry {
    last_heartbeat: Option<Instant>,
    registered: Instant,
    timeout: Duration,
    /// Whether the grace period before the first heartbeat counts.
    require_first: bool,
}

impl ComponentEntry {
    fn health_at(&self, now: Instant) -> ComponentHealth {
        match self.last_heartbeat {
            Some(t) if now.saturating_duration_since(t) <= self.timeout => ComponentHealth::Healthy,
            Some(_) => ComponentHealth::TimedOut,
            None if self.require_first
                && now.saturating_duration_since(self.registered) > self.timeout =>
            {
                ComponentHealth::TimedOut
            }
            None => ComponentHealth::Waiting,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Watchdog
// ────────────────────────────────────────────────────────────────────────────

/// Tracks heartbeats from registered sources.
///
/// # Example
///
/// ```
/// use std::time::{Duration, Instant};
/// use mazebot_kernel::watchdog::{ComponentHealth, Watchdog};
///
/// let mut wd = Watchdog::new();
/// wd.register("pose.main", Duration::from_millis(500));
/// assert_eq!(wd.health("pose.main"), ComponentHealth::Waiting);
///
/// wd.heartbeat_at("pose.main", Instant::now());
/// assert_eq!(wd.health("pose.main"), ComponentHealth::Healthy);
/// ```
#[derive(Default)]
pub struct Watchdog {
    components: HashMap<String, ComponentEntry>,
}

impl Watchdog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `id` with a heartbeat `timeout`.
    ///
    /// The source stays [`ComponentHealth::Waiting`] until its first
    /// heartbeat; sources that never report are not considered faulty.
    /// Re-registering resets the entry.
    pub fn register(&mut self, id: &str, timeout: Duration) {
        self.register_at(id, timeout, false, Instant::now());
    }

    /// With `require_first`, the source also times out if the first heartbeat
    /// does not arrive within `timeout`.
    pub fn register_at(&mut self, id: &str, timeout: Duration, require_first: bool, now: Instant) {
        self.components.insert(
            id.to_string(),
            ComponentEntry {
                last_heartbeat: None,
                registered: now,
                timeout,
                require_first,
            },
        );
    }

    /// Record a heartbeat for `id` at `now`.  No-op for unknown sources.
    pub fn heartbeat_at(&mut self, id: &str, now: Instant) {
        if let Some(entry) = self.components.get_mut(id) {
            entry.last_heartbeat = Some(now);
        }
    }

    /// Health of `id`; unknown sources report [`ComponentHealth::TimedOut`].
    pub fn health(&self, id: &str) -> ComponentHealth {
        self.health_at(id, Instant::now())
    }

    pub fn health_at(&self, id: &str, now: Instant) -> ComponentHealth {
        self.components
            .get(id)
            .map_or(ComponentHealth::TimedOut, |e| e.health_at(now))
    }

    /// IDs of every timed-out source, sorted.
    pub fn check_all(&self) -> Vec<String> {
        self.check_all_at(Instant::now())
    }

    pub fn check_all_at(&self, now: Instant) -> Vec<String> {
        let mut ids: Vec<String> = self
            .components
            .iter()
            .filter(|(_, e)| e.health_at(now) == ComponentHealth::TimedOut)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }
}
