//! Blocking waits, interruption, and trigger confirmation.
//!
//! The post-push wait is the only suspension point of a cycle. It blocks the
//! calling thread, but an [`Interrupt`] raised from another thread (the CLI's
//! Ctrl-C handler) ends it immediately.

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::{Result, TriggerError};
use crate::stage::CycleStep;

/// Shared, one-way interruption flag.
///
/// Clones share state. Once raised it stays raised.
#[derive(Debug, Clone, Default)]
pub struct Interrupt {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    fn flag(&self) -> MutexGuard<'_, bool> {
        // A poisoned flag is still a valid bool.
        self.inner.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Raise the flag and wake every waiter.
    pub fn raise(&self) {
        *self.flag() = true;
        self.inner.1.notify_all();
    }

    pub fn is_raised(&self) -> bool {
        *self.flag()
    }

    /// Block for up to `timeout`. Returns `true` if the flag was raised
    /// before the timeout elapsed.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut raised = self.flag();
        while !*raised {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self
                .inner
                .1
                .wait_timeout(raised, deadline - now)
                .unwrap_or_else(|e| e.into_inner());
            raised = guard;
        }
        true
    }
}

/// Blocks the calling thread for a duration.
pub trait Waiter {
    /// Wait for `duration`, or fail with [`TriggerError::Interrupted`] if the
    /// wait is cut short.
    fn wait(&self, duration: Duration) -> Result<()>;
}

/// Production waiter: sleeps on the interrupt's condition variable.
#[derive(Debug, Clone)]
pub struct InterruptibleWaiter {
    interrupt: Interrupt,
}

impl InterruptibleWaiter {
    pub fn new(interrupt: Interrupt) -> Self {
        Self { interrupt }
    }
}

impl Waiter for InterruptibleWaiter {
    fn wait(&self, duration: Duration) -> Result<()> {
        debug!(duration_ms = duration.as_millis() as u64, "waiting");
        if self.interrupt.wait_timeout(duration) {
            return Err(TriggerError::Interrupted {
                step: CycleStep::Wait,
            });
        }
        Ok(())
    }
}

/// Reports whether the external service has picked up the trigger.
pub trait TriggerProbe: Send {
    /// `Ok(true)` once the trigger is confirmed. Errors are advisory; the
    /// orchestrator logs them and keeps polling.
    fn confirmed(&self) -> Result<bool>;

    /// Human-readable description for logs.
    fn describe(&self) -> String;
}

/// Probe that treats any 2xx response from a status URL as confirmation.
pub struct HttpStatusProbe {
    url: String,
    client: reqwest::blocking::Client,
}

impl HttpStatusProbe {
    pub fn new(url: impl Into<String>, request_timeout: Duration) -> Result<Self> {
        let url = url.into();
        url::Url::parse(&url).map_err(|e| TriggerError::InvalidConfig(format!(
            "invalid confirmation URL {url}: {e}"
        )))?;
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!("pushcycle/", env!("CARGO_PKG_VERSION")))
            .timeout(request_timeout)
            .build()
            .map_err(|e| TriggerError::Probe(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { url, client })
    }
}

impl TriggerProbe for HttpStatusProbe {
    fn confirmed(&self) -> Result<bool> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .map_err(|e| TriggerError::Probe(format!("GET {} failed: {e}", self.url)))?;
        debug!(url = %self.url, status = %response.status(), "probe response");
        Ok(response.status().is_success())
    }

    fn describe(&self) -> String {
        format!("GET {}", self.url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_wait_elapses_without_interrupt() {
        let waiter = InterruptibleWaiter::new(Interrupt::new());
        let start = Instant::now();
        waiter.wait(Duration::from_millis(20)).unwrap();
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_raised_interrupt_fails_wait_immediately() {
        let interrupt = Interrupt::new();
        interrupt.raise();
        let waiter = InterruptibleWaiter::new(interrupt);

        let start = Instant::now();
        let err = waiter.wait(Duration::from_secs(30)).unwrap_err();
        assert!(err.is_interrupted());
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_interrupt_from_other_thread_wakes_waiter() {
        let interrupt = Interrupt::new();
        let waiter = InterruptibleWaiter::new(interrupt.clone());

        let raiser = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            interrupt.raise();
        });

        let start = Instant::now();
        let err = waiter.wait(Duration::from_secs(30)).unwrap_err();
        assert!(matches!(
            err,
            TriggerError::Interrupted {
                step: CycleStep::Wait
            }
        ));
        assert!(start.elapsed() < Duration::from_secs(5));
        raiser.join().unwrap();
    }

    #[test]
    fn test_http_probe_rejects_bad_url() {
        let err = HttpStatusProbe::new("not a url", Duration::from_secs(1))
            .err()
            .unwrap();
        assert_eq!(err.kind(), "invalid_config");
    }

    #[test]
    fn test_http_probe_describe() {
        let probe =
            HttpStatusProbe::new("https://ci.example.com/status", Duration::from_secs(1)).unwrap();
        assert_eq!(probe.describe(), "GET https://ci.example.com/status");
    }
}
