//! Realtime-priority syncer for the worker's audio I/O thread.
//!
//! Hosts that run a realtime-scheduled audio thread expect the plugin to
//! process on a thread with matching priority, but the worker's audio I/O
//! thread doesn't share an address space with the host and can't inherit
//! scheduling attributes automatically. [`RealtimeTarget`] holds the
//! priority the host last reported; [`AudioArbiter`][crate::arbiter::AudioArbiter]'s
//! own loop re-applies it to itself every [`REALTIME_RESYNC_INTERVAL`] and
//! immediately before `start_processing`, since some hosts only settle on
//! their final priority once the processing graph is actually starting.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use thread_priority::{ThreadPriority, ThreadPriorityValue};
use tracing::warn;

pub use crate::arbiter::REALTIME_RESYNC_INTERVAL;

/// Shared, lock-free priority target. Cheap to clone; every clone refers to
/// the same underlying value.
#[derive(Clone)]
pub struct RealtimeTarget {
    priority: Arc<AtomicI32>,
}

impl RealtimeTarget {
    pub fn new(initial_priority: i32) -> Self {
        Self {
            priority: Arc::new(AtomicI32::new(initial_priority)),
        }
    }

    pub fn set(&self, priority: i32) {
        self.priority.store(priority, Ordering::Release);
    }

    pub fn get(&self) -> i32 {
        self.priority.load(Ordering::Acquire)
    }

    /// Applies the current target to whichever thread calls this. Intended
    /// to be called periodically, and once more right before
    /// `start_processing`, from the audio I/O thread itself.
    pub fn apply_to_current_thread(&self) {
        let priority = self.get();
        let Ok(value) = ThreadPriorityValue::try_from(priority.clamp(1, 99) as u8) else {
            warn!(priority, "realtime priority value out of range, skipping resync");
            return;
        };
        if let Err(err) =
            thread_priority::set_current_thread_priority(ThreadPriority::Crossplatform(value))
        {
            warn!(?err, "failed to set realtime thread priority");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_is_visible_through_get() {
        let target = RealtimeTarget::new(50);
        target.set(80);
        assert_eq!(target.get(), 80);
    }

    #[test]
    fn clone_shares_the_same_underlying_value() {
        let target = RealtimeTarget::new(10);
        let cloned = target.clone();
        cloned.set(99);
        assert_eq!(target.get(), 99);
    }
}
