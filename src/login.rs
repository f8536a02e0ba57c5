use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginState {
    Waiting,
    LoggedIn,
    TimedOut,
}

/// Polls a login probe until it succeeds or the deadline passes
#[derive(Debug, Clone, Copy)]
pub struct LoginGate {
    pub poll_interval: Duration,
    pub deadline: Duration,
    pub progress_every: Duration,
}

impl LoginGate {
    pub fn new(poll_interval: Duration, deadline: Duration) -> Self {
        Self {
            poll_interval,
            deadline,
            progress_every: Duration::from_secs(30),
        }
    }

    pub fn with_progress_every(mut self, progress_every: Duration) -> Self {
        self.progress_every = progress_every;
        self
    }

    /// Run the gate to a terminal state. The probe is checked once immediately.
    pub async fn wait<F, Fut>(&self, mut probe: F) -> LoginState
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        let started = Instant::now();
        let mut state = LoginState::Waiting;
        let mut last_progress = started;

        while state == LoginState::Waiting {
            state = if probe().await {
                LoginState::LoggedIn
            } else if started.elapsed() >= self.deadline {
                LoginState::TimedOut
            } else {
                if !self.progress_every.is_zero() && last_progress.elapsed() >= self.progress_every {
                    let remaining = self.deadline.saturating_sub(started.elapsed());
                    info!(
                        "Still waiting for login... ({}s remaining)",
                        remaining.as_secs()
                    );
                    last_progress = Instant::now();
                }
                tokio::time::sleep(self.poll_interval).await;
                LoginState::Waiting
            };
        }

        debug!(
            "Login gate finished as {:?} after {:?}",
            state,
            started.elapsed()
        );
        state
    }
}

/// Wait until `is_logged_in` reports true. Returns false when `deadline` elapses first.
pub async fn await_login<F, Fut>(is_logged_in: F, poll_interval: Duration, deadline: Duration) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    LoginGate::new(poll_interval, deadline).wait(is_logged_in).await == LoginState::LoggedIn
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[tokio::test]
    async fn test_already_logged_in_checks_once() {
        let calls = Cell::new(0);
        let logged_in = await_login(
            || {
                calls.set(calls.get() + 1);
                async { true }
            },
            Duration::from_secs(60),
            Duration::from_secs(300),
        )
        .await;

        assert!(logged_in);
        assert_eq!(calls.get(), 1);
    }

    #[tokio::test]
    async fn test_login_detected_after_polling() {
        let calls = Cell::new(0);
        let state = LoginGate::new(Duration::from_millis(1), Duration::from_secs(5))
            .wait(|| {
                calls.set(calls.get() + 1);
                let done = calls.get() >= 4;
                async move { done }
            })
            .await;

        assert_eq!(state, LoginState::LoggedIn);
        assert_eq!(calls.get(), 4);
    }

    #[tokio::test]
    async fn test_login_times_out() {
        let started = std::time::Instant::now();
        let state = LoginGate::new(Duration::from_millis(5), Duration::from_millis(40))
            .with_progress_every(Duration::from_millis(10))
            .wait(|| async { false })
            .await;

        assert_eq!(state, LoginState::TimedOut);
        assert!(started.elapsed() >= Duration::from_millis(40));
    }

    #[tokio::test]
    async fn test_zero_deadline_still_checks() {
        assert!(await_login(|| async { true }, Duration::ZERO, Duration::ZERO).await);
        assert!(!await_login(|| async { false }, Duration::ZERO, Duration::ZERO).await);
    }
}
