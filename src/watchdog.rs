//! # Watchdog Timer
//!
//! A single-shot timer that fires once unless stopped or reset first. It is
//! awaited inside a `select!` next to the operation it guards:
//!
//! ```rust,no_run
//! # async fn demo() {
//! use biogas_iot::watchdog::Watchdog;
//! use std::time::Duration;
//!
//! let mut watchdog = Watchdog::new(Duration::from_millis(1000));
//! watchdog.start();
//! tokio::select! {
//!     _ = watchdog.expired() => { /* no answer in time */ }
//!     _ = tokio::time::sleep(Duration::from_millis(10)) => watchdog.stop(),
//! }
//! # }
//! ```

use std::time::Duration;
use tokio::time::{sleep_until, Instant};

#[derive(Debug)]
pub struct Watchdog {
    timeout: Duration,
    deadline: Option<Instant>,
}

impl Watchdog {
    pub fn new(timeout: Duration) -> Self {
        Watchdog {
            timeout,
            deadline: None,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Arms the timer with the configured timeout, replacing any running countdown.
    pub fn start(&mut self) {
        self.deadline = Some(Instant::now() + self.timeout);
    }

    /// Arms the timer with a new timeout.
    pub fn start_with(&mut self, timeout: Duration) {
        self.timeout = timeout;
        self.start();
    }

    /// Disarms the timer. A stopped watchdog never fires.
    pub fn stop(&mut self) {
        self.deadline = None;
    }

    /// Restarts the countdown if the timer is running; no-op otherwise.
    pub fn reset(&mut self) {
        if self.deadline.is_some() {
            self.start();
        }
    }

    pub fn is_running(&self) -> bool {
        self.deadline.is_some()
    }

    /// Completes when the armed deadline passes, then disarms the timer.
    ///
    /// Pends forever while the timer is stopped.
    pub async fn expired(&mut self) {
        match self.deadline {
            Some(deadline) => {
                sleep_until(deadline).await;
                self.deadline = None;
            }
            None => std::future::pending::<()>().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_fires_after_timeout() {
        let mut watchdog = Watchdog::new(Duration::from_millis(1000));
        watchdog.start();
        let started = Instant::now();
        watchdog.expired().await;
        assert_eq!(started.elapsed(), Duration::from_millis(1000));
        assert!(!watchdog.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stopped_watchdog_never_fires() {
        let mut watchdog = Watchdog::new(Duration::from_millis(100));
        watchdog.start();
        watchdog.stop();
        let fired = tokio::time::timeout(Duration::from_secs(5), watchdog.expired()).await;
        assert!(fired.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_pushes_deadline() {
        let mut watchdog = Watchdog::new(Duration::from_millis(1000));
        watchdog.start();
        let started = Instant::now();
        tokio::time::sleep(Duration::from_millis(600)).await;
        watchdog.reset();
        watchdog.expired().await;
        assert_eq!(started.elapsed(), Duration::from_millis(1600));
    }

    #[test]
    fn test_reset_does_not_arm_stopped_timer() {
        let mut watchdog = Watchdog::new(Duration::from_millis(1000));
        watchdog.reset();
        assert!(!watchdog.is_running());
    }
}
