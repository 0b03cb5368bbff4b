use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use tracing::{debug, info, warn};

use crate::event::DetectionEvent;

/// Minimum interval, in seconds, between two notifications for the same key.
pub const DEFAULT_MIN_INTERVAL: f64 = 1.5;

/// Why the gate dropped an event.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Rejection {
    /// The track is not inside any zone.
    NoZoneEntry,
    /// The track was already zoned on an earlier update.
    AlreadyInZone,
    /// The event lacks an id, a key or a timestamp.
    MissingFields,
    /// A notification for the same key went out less than `min_interval` ago.
    TooSoon { elapsed: f64 },
}

impl Rejection {
    /// Short label, used for metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Rejection::NoZoneEntry => "no_zone_entry",
            Rejection::AlreadyInZone => "already_in_zone",
            Rejection::MissingFields => "missing_fields",
            Rejection::TooSoon { .. } => "too_soon",
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::TooSoon { elapsed } => write!(f, "too_soon ({elapsed:.3}s)"),
            other => write!(f, "{}", other.as_str()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Verdict {
    Accepted,
    Rejected(Rejection),
}

/// Decides which detection events are worth a notification.
///
/// An event passes when its track has just entered a zone (new zoned track, or
/// an existing track transitioning into a zone), it carries an id, a key and a
/// timestamp, and the previous accepted event for the same key is at least
/// `min_interval` seconds older.
///
/// The last accepted timestamp per key is recorded as part of acceptance, in
/// the same critical section as the interval check. It is not rolled back if the
/// notification is later not delivered.
pub struct EventGate {
    min_interval: f64,
    last_accepted: Mutex<HashMap<String, f64>>,
}

impl EventGate {
    pub fn new(min_interval: f64) -> Self {
        Self {
            min_interval,
            last_accepted: Mutex::new(HashMap::new()),
        }
    }

    pub fn min_interval(&self) -> f64 {
        self.min_interval
    }

    pub fn accept(&self, event: &DetectionEvent) -> bool {
        matches!(self.evaluate(event), Verdict::Accepted)
    }

    pub fn evaluate(&self, event: &DetectionEvent) -> Verdict {
        if !event.has_zone_entry {
            return Verdict::Rejected(Rejection::NoZoneEntry);
        }

        if !event.is_new_track && event.had_zone_entry {
            return Verdict::Rejected(Rejection::AlreadyInZone);
        }

        let (key, timestamp) = match (&event.id, &event.key, event.timestamp) {
            (Some(id), Some(key), Some(timestamp))
                if !id.is_empty() && !key.is_empty() && timestamp.is_finite() =>
            {
                (key, timestamp)
            }
            _ => {
                warn!("missing required fields in detection event: {:?}", event);
                return Verdict::Rejected(Rejection::MissingFields);
            }
        };

        // A poisoned map only means another dispatch panicked mid-update; the
        // timestamps it holds are still valid.
        let mut last_accepted = self
            .last_accepted
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(last) = last_accepted.get(key) {
            let elapsed = timestamp - last;
            if elapsed < self.min_interval {
                info!("skipping notification for {}: last one {:.3}s ago", key, elapsed);
                return Verdict::Rejected(Rejection::TooSoon { elapsed });
            }
        }

        _ = last_accepted.insert(key.to_owned(), timestamp);
        debug!("accepted detection for {} at {}", key, timestamp);

        Verdict::Accepted
    }

    /// Timestamp of the last accepted event for `key`, if any.
    pub fn last_accepted(&self, key: &str) -> Option<f64> {
        self.last_accepted
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(key)
            .copied()
    }
}

impl Default for EventGate {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_INTERVAL)
    }
}
