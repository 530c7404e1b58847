// ── Optimistic update bookkeeping ──
//
// One entry per object with an unconfirmed local send. Inbound relay
// values for that object are arbitrated against it until the grace
// window runs out.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PendingUpdate {
    pub target: bool,
    pub sent_at: Instant,
    pub verification_scheduled: bool,
    /// 0 until a conflicting echo triggered the single resend.
    pub retry_count: u8,
}

impl PendingUpdate {
    pub fn new(target: bool, sent_at: Instant) -> Self {
        Self {
            target,
            sent_at,
            verification_scheduled: false,
            retry_count: 0,
        }
    }
}

/// What to do with an inbound value for one object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Verdict {
    /// Relay echoed our pending value. Drop the entry, change nothing.
    Confirmed,
    /// Conflict inside the grace window. Resend `target`, ignore the inbound value.
    Retry { target: bool },
    /// Inbound value is authoritative. Write it through.
    Accept,
}

pub(crate) fn arbitrate(
    pending: &mut HashMap<String, PendingUpdate>,
    object_id: &str,
    inbound: bool,
    now: Instant,
    grace: Duration,
) -> Verdict {
    let Some(entry) = pending.get_mut(object_id) else {
        return Verdict::Accept;
    };

    if now.saturating_duration_since(entry.sent_at) >= grace {
        pending.remove(object_id);
        return Verdict::Accept;
    }

    if entry.target == inbound {
        pending.remove(object_id);
        return Verdict::Confirmed;
    }

    if entry.retry_count == 0 {
        entry.retry_count = 1;
        return Verdict::Retry {
            target: entry.target,
        };
    }

    pending.remove(object_id);
    Verdict::Accept
}
