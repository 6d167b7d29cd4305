//! Restartable one-shot countdown on the tokio clock.

use std::fmt;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};

use crate::lock;

/// Deadline used when `now + duration` is not representable.
const FAR_FUTURE: Duration = Duration::from_secs(30 * 365 * 24 * 60 * 60);

fn deadline_after(duration: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(duration)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

struct Countdown {
    deadline: Mutex<Instant>,
    fired: AtomicBool,
    cancelled: AtomicBool,
}

/// Countdown that invokes a callback once when its deadline passes.
///
/// The deadline can be pushed back with [`Timer::restart`] until the timer
/// fires. Dropping the timer cancels it.
pub struct Timer {
    duration: Duration,
    countdown: Arc<Countdown>,
    task: JoinHandle<()>,
}

impl Timer {
    /// Arms a timer on `runtime` that calls `on_expire` after `duration`.
    pub fn start<F>(runtime: &Handle, duration: Duration, on_expire: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let countdown = Arc::new(Countdown {
            deadline: Mutex::new(deadline_after(duration)),
            fired: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
        });
        let task = runtime.spawn(run(Arc::clone(&countdown), on_expire));
        Self {
            duration,
            countdown,
            task,
        }
    }

    /// Moves the deadline to `now + duration`.
    ///
    /// Returns `false` when the timer already fired or was cancelled, in which
    /// case nothing changes.
    pub fn restart(&self) -> bool {
        let mut deadline = lock(&self.countdown.deadline);
        if self.has_fired() || self.is_cancelled() {
            return false;
        }
        *deadline = deadline_after(self.duration);
        true
    }

    /// Stops the timer; the callback will not run afterwards.
    pub fn cancel(&self) {
        self.countdown.cancelled.store(true, Ordering::Release);
        self.task.abort();
    }

    /// Returns the configured duration.
    #[must_use]
    pub const fn duration(&self) -> Duration {
        self.duration
    }

    /// Returns the time left until expiry, zero once expired.
    #[must_use]
    pub fn remaining(&self) -> Duration {
        lock(&self.countdown.deadline).saturating_duration_since(Instant::now())
    }

    /// Returns `true` once the callback has been invoked.
    #[must_use]
    pub fn has_fired(&self) -> bool {
        self.countdown.fired.load(Ordering::Acquire)
    }

    /// Returns `true` after [`Timer::cancel`].
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.countdown.cancelled.load(Ordering::Acquire)
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl fmt::Debug for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timer")
            .field("duration", &self.duration)
            .field("remaining", &self.remaining())
            .field("fired", &self.has_fired())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

async fn run<F>(countdown: Arc<Countdown>, on_expire: F)
where
    F: FnOnce(),
{
    loop {
        let deadline = *lock(&countdown.deadline);
        sleep_until(deadline).await;
        if countdown.cancelled.load(Ordering::Acquire) {
            return;
        }
        // Fired is published under the deadline lock so a racing restart
        // either extends the deadline first or observes the expiry.
        let current = lock(&countdown.deadline);
        if *current <= Instant::now() {
            countdown.fired.store(true, Ordering::Release);
            drop(current);
            on_expire();
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting() -> (Arc<AtomicUsize>, impl FnOnce() + Send + 'static) {
        let hits = Arc::new(AtomicUsize::new(0));
        let sink = Arc::clone(&hits);
        (hits, move || {
            sink.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[tokio::test(start_paused = true)]
    async fn fires_once_after_duration() {
        let (hits, on_expire) = counting();
        let timer = Timer::start(&Handle::current(), Duration::from_secs(5), on_expire);

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert!(!timer.has_fired());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(timer.has_fired());
        assert!(!timer.restart());
        assert_eq!(timer.remaining(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn restart_pushes_the_deadline_back() {
        let (hits, on_expire) = counting();
        let timer = Timer::start(&Handle::current(), Duration::from_secs(5), on_expire);

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(timer.restart());
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(timer.remaining(), Duration::from_secs(1));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn huge_duration_never_overflows() {
        let (hits, on_expire) = counting();
        let timer = Timer::start(&Handle::current(), Duration::MAX, on_expire);
        assert!(timer.restart());
        assert!(timer.remaining() >= FAR_FUTURE - Duration::from_secs(1));

        tokio::time::sleep(Duration::from_secs(3_600)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert!(!timer.has_fired());
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_timer_never_fires() {
        let (hits, on_expire) = counting();
        let timer = Timer::start(&Handle::current(), Duration::from_secs(1), on_expire);
        timer.cancel();
        assert!(!timer.restart());

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert!(timer.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_cancels() {
        let (hits, on_expire) = counting();
        drop(Timer::start(&Handle::current(), Duration::from_secs(1), on_expire));

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }
}
