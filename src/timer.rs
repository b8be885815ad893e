//! Frame timers: cancellable delayed callbacks.
//!
//! An animation asks for "advance me after `delay`" and keeps the returned
//! handle so it can revoke the request when it aborts. Revocation is
//! best-effort: a fire that is already queued may still be delivered, so the
//! receiving side must check that the animation is still running.

use crate::animation::AnimationId;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

/// Schedules frame advances for animations.
///
/// A fire is delivered out-of-band (by whoever owns the timer) as a call to
/// `AnimationManager::advance(id)`.
pub trait Timer {
    type Handle;

    /// Request an advance of `id` after `delay`.
    fn schedule(&mut self, id: AnimationId, delay: Duration) -> Self::Handle;

    /// Revoke a pending request. May be a no-op if it already fired.
    fn cancel(&mut self, handle: Self::Handle);
}

/// Timer backed by tokio tasks.
///
/// Each request spawns a task that sleeps and then pushes the animation id
/// into the engine's fire channel. Cancelling aborts the task; a fire that
/// already reached the channel is left for the engine to ignore.
pub struct TokioTimer {
    fires: UnboundedSender<AnimationId>,
}

impl TokioTimer {
    pub fn new(fires: UnboundedSender<AnimationId>) -> Self {
        Self { fires }
    }
}

impl Timer for TokioTimer {
    type Handle = JoinHandle<()>;

    fn schedule(&mut self, id: AnimationId, delay: Duration) -> JoinHandle<()> {
        let fires = self.fires.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // The engine is gone during shutdown; nothing left to advance.
            let _ = fires.send(id);
        })
    }

    fn cancel(&mut self, handle: JoinHandle<()>) {
        handle.abort();
    }
}

/// Test timer that only records requests. Tests fire them by hand.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct ManualTimer {
    next_handle: u64,
    pub(crate) pending: std::collections::BTreeMap<u64, (AnimationId, Duration)>,
    pub(crate) cancelled: Vec<u64>,
}

#[cfg(test)]
impl ManualTimer {
    /// Pending requests for `id`, oldest first.
    pub(crate) fn pending_for(&self, id: AnimationId) -> Vec<Duration> {
        self.pending
            .values()
            .filter(|(owner, _)| *owner == id)
            .map(|(_, delay)| *delay)
            .collect()
    }

    /// Remove and return the oldest pending request, as if it fired.
    pub(crate) fn pop(&mut self) -> Option<AnimationId> {
        self.pending.pop_first().map(|(_, (id, _))| id)
    }
}

#[cfg(test)]
impl Timer for ManualTimer {
    type Handle = u64;

    fn schedule(&mut self, id: AnimationId, delay: Duration) -> u64 {
        let handle = self.next_handle;
        self.next_handle += 1;
        self.pending.insert(handle, (id, delay));
        handle
    }

    fn cancel(&mut self, handle: u64) {
        self.pending.remove(&handle);
        self.cancelled.push(handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tokio::sync::mpsc;

    #[tokio::test(start_paused = true)]
    async fn tokio_timer_fires_after_delay() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timer = TokioTimer::new(tx);
        let _handle = timer.schedule(AnimationId(7), Duration::from_millis(50));

        tokio::time::sleep(Duration::from_millis(49)).await;
        assert!(rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(rx.try_recv().ok(), Some(AnimationId(7)));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_tokio_timer_never_fires() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timer = TokioTimer::new(tx);
        let handle = timer.schedule(AnimationId(1), Duration::from_millis(10));
        timer.cancel(handle);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn manual_timer_records_and_cancels() {
        let mut timer = ManualTimer::default();
        let a = timer.schedule(AnimationId(1), Duration::from_millis(5));
        let _b = timer.schedule(AnimationId(2), Duration::from_millis(9));
        timer.cancel(a);

        assert_eq!(timer.pending_for(AnimationId(1)), Vec::<Duration>::new());
        assert_eq!(timer.pop(), Some(AnimationId(2)));
        assert_eq!(timer.pop(), None);
    }
}
