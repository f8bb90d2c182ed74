//! Repeating timer with pause/resume/cancel, and scoped tracing that
//! survives cooperative suspension (§4.D).

mod scope;

pub use scope::{Scope, ScopeEvent, ScopeGuard};

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;

/// What to do after `delay`/`interval` elapse, communicated from
/// `pause`/`resume` to the running timer task.
#[derive(Debug, Clone, Copy)]
enum Override {
    /// Suppress firings entirely until further notice.
    Paused,
    /// Fire once after this delay, then fall back to `interval`.
    OneShot(Duration),
    /// Resume the regular schedule, with the next firing after this delay.
    ResumeWithDelay(Duration),
}

struct Shared {
    overrides: Mutex<Option<Override>>,
    cancelled: AtomicBool,
    fire_count: AtomicU64,
    notify: Notify,
    done: Notify,
    running: AtomicBool,
}

/// Handle returned by [`repeat`]. Dropping it does not cancel the timer —
/// call [`cancel`](TimerHandle::cancel) explicitly, matching the source's
/// explicit-lifetime discipline.
#[derive(Clone)]
pub struct TimerHandle {
    shared: Arc<Shared>,
}

impl TimerHandle {
    /// Stop future firings. If a callback is currently running, the
    /// returned future resolves only after it returns.
    pub async fn cancel(&self) {
        tracing::debug!("timer cancel requested");
        self.shared.cancelled.store(true, Ordering::SeqCst);
        self.shared.notify.notify_waiters();
        while self.shared.running.load(Ordering::SeqCst) {
            self.shared.done.notified().await;
        }
    }

    /// Suppress firings. If `delay` is given, exactly one firing happens
    /// after `delay`, then the schedule reverts to `interval`.
    pub fn pause(&self, delay: Option<Duration>) {
        let mut ov = self.shared.overrides.lock();
        *ov = Some(match delay {
            Some(d) => Override::OneShot(d),
            None => Override::Paused,
        });
        drop(ov);
        self.shared.notify.notify_waiters();
    }

    /// Resume a paused timer. The next firing happens after `delay`
    /// (defaulting to the configured interval); firings after that return
    /// to the regular `interval` cadence.
    pub fn resume(&self, delay: Option<Duration>) {
        if let Some(d) = delay {
            let mut ov = self.shared.overrides.lock();
            *ov = Some(Override::ResumeWithDelay(d));
            drop(ov);
            self.shared.notify.notify_waiters();
        } else {
            let mut ov = self.shared.overrides.lock();
            *ov = None;
        }
    }

    pub fn fire_count(&self) -> u64 {
        self.shared.fire_count.load(Ordering::SeqCst)
    }
}

/// Schedule `callback` to run after `delay` (defaulting to `interval`),
/// then every `interval`, up to `repeat_count` times (unbounded if
/// `None`). `interval = Duration::ZERO` fires as soon as the host loop is
/// ready, every iteration. Returns a handle for cancel/pause/resume.
pub fn repeat<F, Fut>(
    mut callback: F,
    name: impl Into<String>,
    interval: Duration,
    delay: Option<Duration>,
    repeat_count: Option<u64>,
) -> TimerHandle
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    let name = name.into();
    let shared = Arc::new(Shared {
        overrides: Mutex::new(None),
        cancelled: AtomicBool::new(false),
        fire_count: AtomicU64::new(0),
        notify: Notify::new(),
        done: Notify::new(),
        running: AtomicBool::new(true),
    });

    let task_shared = shared.clone();
    tokio::spawn(async move {
        let mut next_wait = delay.unwrap_or(interval);
        let mut fires = 0u64;
        'outer: loop {
            if task_shared.cancelled.load(Ordering::SeqCst) {
                break;
            }
            if let Some(limit) = repeat_count {
                if fires >= limit {
                    break;
                }
            }

            // A paused timer waits indefinitely for a `resume`/`cancel`
            // notification instead of sleeping a fixed duration.
            loop {
                let paused = matches!(*task_shared.overrides.lock(), Some(Override::Paused));
                if !paused {
                    break;
                }
                task_shared.notify.notified().await;
                if task_shared.cancelled.load(Ordering::SeqCst) {
                    break 'outer;
                }
            }

            if let Some(d) = {
                let mut ov = task_shared.overrides.lock();
                match ov.take() {
                    Some(Override::OneShot(d)) | Some(Override::ResumeWithDelay(d)) => Some(d),
                    _ => None,
                }
            } {
                next_wait = d;
            }

            tokio::select! {
                _ = tokio::time::sleep(next_wait) => {}
                _ = task_shared.notify.notified() => {
                    // Overrides changed mid-wait (e.g. a fresh pause);
                    // recompute from the top rather than firing stale.
                    continue;
                }
            }

            if task_shared.cancelled.load(Ordering::SeqCst) {
                break;
            }
            if matches!(*task_shared.overrides.lock(), Some(Override::Paused)) {
                continue;
            }

            callback().await;
            fires += 1;
            task_shared.fire_count.store(fires, Ordering::SeqCst);
            tracing::debug!(timer = %name, fires, "timer fired");
            next_wait = interval;
        }
        task_shared.running.store(false, Ordering::SeqCst);
        task_shared.done.notify_waiters();
        tracing::debug!(timer = %name, "timer task stopped");
    });

    TimerHandle { shared }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test(start_paused = true)]
    async fn fires_delay_then_interval_up_to_repeat_count() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let handle = repeat(
            move || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                }
            },
            "t",
            Duration::from_millis(200),
            Some(Duration::from_millis(0)),
            Some(3),
        );
        tokio::time::advance(Duration::from_millis(1)).await;
        tokio::time::advance(Duration::from_millis(200)).await;
        tokio::time::advance(Duration::from_millis(200)).await;
        tokio::time::advance(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
        handle.cancel().await;
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_future_firings() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let handle = repeat(
            move || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                }
            },
            "t",
            Duration::from_millis(100),
            None,
            None,
        );
        tokio::time::advance(Duration::from_millis(100)).await;
        handle.cancel().await;
        let observed = count.load(Ordering::SeqCst);
        tokio::time::advance(Duration::from_millis(500)).await;
        assert_eq!(count.load(Ordering::SeqCst), observed);
    }
}
