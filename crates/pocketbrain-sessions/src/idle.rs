use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Reset-on-activity countdown.
///
/// The owner touches the timer on every result-bearing output (never on
/// session-update markers). On expiry the callback runs; returning
/// `false` (e.g. the session was busy and could not be aborted) re-arms
/// the countdown, returning `true` retires the timer.
pub struct IdleTimer {
    notify: Arc<Notify>,
    cancel: CancellationToken,
}

impl IdleTimer {
    pub fn start<F>(timeout: Duration, mut on_expire: F) -> Self
    where
        F: FnMut() -> bool + Send + 'static,
    {
        let notify = Arc::new(Notify::new());
        let cancel = CancellationToken::new();
        let notified = Arc::clone(&notify);
        let cancelled = cancel.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancelled.cancelled() => break,
                    // A touch lands here and the sleep restarts from zero.
                    _ = notified.notified() => {}
                    _ = tokio::time::sleep(timeout) => {
                        if on_expire() {
                            break;
                        }
                    }
                }
            }
        });

        Self { notify, cancel }
    }

    /// Reset the countdown.
    pub fn touch(&self) {
        self.notify.notify_one();
    }

    /// Cancel the timer without firing.
    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

impl Drop for IdleTimer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn fires_once_after_timeout() {
        let fired = Arc::new(AtomicUsize::new(0));
        let flag = Arc::clone(&fired);
        let _timer = IdleTimer::start(Duration::from_millis(100), move || {
            flag.fetch_add(1, Ordering::SeqCst);
            true
        });

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn touch_resets_the_countdown() {
        let fired = Arc::new(AtomicUsize::new(0));
        let flag = Arc::clone(&fired);
        let timer = IdleTimer::start(Duration::from_millis(100), move || {
            flag.fetch_add(1, Ordering::SeqCst);
            true
        });

        for _ in 0..5 {
            tokio::time::sleep(Duration::from_millis(60)).await;
            timer.touch();
        }
        // 300ms of wall time elapsed but the countdown never ran dry.
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn declined_expiry_rearms() {
        let fired = Arc::new(AtomicUsize::new(0));
        let flag = Arc::clone(&fired);
        let _timer = IdleTimer::start(Duration::from_millis(100), move || {
            // Busy twice, then allow the abort.
            flag.fetch_add(1, Ordering::SeqCst) >= 2
        });

        tokio::time::sleep(Duration::from_millis(450)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_prevents_firing() {
        let fired = Arc::new(AtomicUsize::new(0));
        let flag = Arc::clone(&fired);
        let timer = IdleTimer::start(Duration::from_millis(100), move || {
            flag.fetch_add(1, Ordering::SeqCst);
            true
        });

        timer.stop();
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
