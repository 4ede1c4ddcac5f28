//! Blocking wait-for-condition primitive
//!
//! Every readiness and removal check in the deployer is built on
//! [`wait_for`]. The predicate is evaluated until it reports `true` or the
//! deadline passes. Evaluation errors are treated as transient: they are
//! recorded and logged but never end the wait early. Only the final timeout
//! is surfaced to the caller, carrying the last error seen.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Default interval between predicate evaluations
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Default budget for the operator Deployment to become ready
pub const DEFAULT_OPERATOR_READY_TIMEOUT: Duration = Duration::from_secs(300);

/// Default budget for operator resources to disappear
pub const DEFAULT_REMOVAL_TIMEOUT: Duration = Duration::from_secs(180);

/// Default budget for a Subscription or PackageManifest to show up
pub const DEFAULT_SUBSCRIPTION_TIMEOUT: Duration = Duration::from_secs(120);

/// Default budget for the installed CSV to reach `Succeeded`
pub const DEFAULT_CSV_TIMEOUT: Duration = Duration::from_secs(300);

/// Pause between deleting and recreating a Subscription on channel change
pub const DEFAULT_RESUBSCRIBE_DELAY: Duration = Duration::from_secs(5);

/// Named wait budgets used by the installers
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Timeouts {
    pub poll_interval: Duration,
    pub operator_ready: Duration,
    pub removal: Duration,
    pub subscription: Duration,
    pub csv_succeeded: Duration,
    pub resubscribe_delay: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            operator_ready: DEFAULT_OPERATOR_READY_TIMEOUT,
            removal: DEFAULT_REMOVAL_TIMEOUT,
            subscription: DEFAULT_SUBSCRIPTION_TIMEOUT,
            csv_succeeded: DEFAULT_CSV_TIMEOUT,
            resubscribe_delay: DEFAULT_RESUBSCRIBE_DELAY,
        }
    }
}

/// Number of identical consecutive evaluation errors after which a warning
/// is logged. Waits with few polls escalate sooner.
pub fn warn_threshold(poll_interval: Duration, timeout: Duration) -> u32 {
    let poll_ms = poll_interval.as_millis().max(1);
    let polls = (timeout.as_millis() / poll_ms).min(u32::MAX as u128) as u32;
    (polls / 4).max(2)
}

/// Wait until `predicate` returns `Ok(true)`.
///
/// Returns the time left before the deadline. When the deadline passes,
/// `on_timeout` runs once and [`Error::Timeout`] is returned.
pub async fn wait_for<P, Fut, E, T>(
    description: &str,
    poll_interval: Duration,
    timeout: Duration,
    mut predicate: P,
    on_timeout: T,
) -> Result<Duration>
where
    P: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, E>>,
    E: Display,
    T: FnOnce(),
{
    let deadline = Instant::now() + timeout;
    let threshold = warn_threshold(poll_interval, timeout);
    let mut last_error: Option<String> = None;
    let mut repeats: u32 = 0;

    loop {
        let ready = match predicate().await {
            Ok(ready) => ready,
            Err(e) => {
                let message = e.to_string();
                if last_error.as_deref() == Some(message.as_str()) {
                    repeats += 1;
                } else {
                    repeats = 1;
                }
                if repeats == threshold {
                    warn!(
                        description = %description,
                        occurrences = repeats,
                        error = %message,
                        "Repeated error while waiting"
                    );
                } else {
                    debug!(description = %description, error = %message, "Transient error while waiting");
                }
                last_error = Some(message);
                false
            }
        };

        let remaining = deadline.saturating_duration_since(Instant::now());
        if ready {
            return Ok(remaining);
        }
        if remaining.is_zero() {
            on_timeout();
            return Err(Error::Timeout {
                description: description.to_string(),
                timeout,
                last_error,
            });
        }

        tokio::time::sleep(poll_interval.min(remaining)).await;
    }
}

/// Builder around [`wait_for`]
///
/// ```ignore
/// WaitCondition::new("operator deployment removed")
///     .poll_interval(Duration::from_secs(1))
///     .timeout(Duration::from_secs(60))
///     .until(|| async { Ok::<_, Error>(true) })
///     .await?;
/// ```
pub struct WaitCondition<'a> {
    description: String,
    poll_interval: Duration,
    timeout: Duration,
    on_timeout: Option<Box<dyn FnOnce() + Send + 'a>>,
}

impl<'a> WaitCondition<'a> {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            timeout: DEFAULT_OPERATOR_READY_TIMEOUT,
            on_timeout: None,
        }
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Hook run once when the deadline passes, before the error is returned
    pub fn on_timeout(mut self, f: impl FnOnce() + Send + 'a) -> Self {
        self.on_timeout = Some(Box::new(f));
        self
    }

    /// Run the wait with the given predicate
    pub async fn until<P, Fut, E>(self, predicate: P) -> Result<Duration>
    where
        P: FnMut() -> Fut,
        Fut: Future<Output = Result<bool, E>>,
        E: Display,
    {
        let on_timeout = self.on_timeout;
        wait_for(
            &self.description,
            self.poll_interval,
            self.timeout,
            predicate,
            move || {
                if let Some(f) = on_timeout {
                    f();
                }
            },
        )
        .await
    }
}
