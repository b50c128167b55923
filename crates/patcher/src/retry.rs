//! Bounded exponential-backoff retry for creation calls that are idempotent
//! by name.
//!
//! The caller assigns the name of the object being created. A retry after a
//! request that succeeded server-side (but whose response was lost) then
//! surfaces as an "already exists" conflict. That conflict counts as success
//! instead of producing a duplicate.

use rand::Rng;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors that can tell a name conflict apart from other failures.
pub trait AlreadyExists {
    fn is_already_exists(&self) -> bool;
}

impl AlreadyExists for crate::error::ApiError {
    fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists(_))
    }
}

/// Exponential backoff schedule.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    /// Delay before the second attempt
    pub duration: Duration,
    /// Multiplier applied to the delay after every attempt
    pub factor: f64,
    /// Each delay is scaled by a random factor in `[1 - jitter, 1 + jitter]`
    pub jitter: f64,
    /// Maximum number of attempts
    pub steps: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            duration: Duration::from_millis(250),
            factor: 2.0,
            jitter: 0.1,
            steps: 8,
        }
    }
}

impl Backoff {
    fn validate(&self) -> Result<(), String> {
        if self.steps == 0 {
            return Err("backoff must allow at least one attempt".to_string());
        }
        if !self.factor.is_finite() || self.factor < 1.0 {
            return Err(format!("backoff factor {} must be >= 1.0", self.factor));
        }
        if !self.jitter.is_finite() || !(0.0..1.0).contains(&self.jitter) {
            return Err(format!("backoff jitter {} must be in [0, 1)", self.jitter));
        }
        Ok(())
    }

    /// Un-jittered delay after attempt `attempt` (1-based).
    #[must_use]
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        scale(self.duration, self.factor.powi(exponent))
    }

    fn jittered_delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        if self.jitter == 0.0 {
            return base;
        }
        let factor = rand::thread_rng().gen_range((1.0 - self.jitter)..=(1.0 + self.jitter));
        scale(base, factor)
    }
}

/// `duration * factor`, saturating instead of panicking on overflow.
fn scale(duration: Duration, factor: f64) -> Duration {
    Duration::try_from_secs_f64(duration.as_secs_f64() * factor).unwrap_or(Duration::MAX)
}

/// How a successful creation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Creation {
    Created,
    /// An earlier attempt (or an earlier delivery) already created it
    AlreadyExisted,
}

/// Errors collected over all attempts, oldest first.
#[derive(Debug)]
pub struct Aggregate<E>(pub Vec<E>);

impl<E> Aggregate<E> {
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn errors(&self) -> &[E] {
        &self.0
    }
}

impl<E: fmt::Display> fmt::Display for Aggregate<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let [only] = self.0.as_slice() {
            return write!(f, "{only}");
        }
        write!(f, "[")?;
        for (i, err) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{err}")?;
        }
        write!(f, "]")
    }
}

impl<E: std::error::Error> std::error::Error for Aggregate<E> {}

/// Retry failure.
#[derive(Debug, Error)]
pub enum RetryError<E: fmt::Display> {
    /// Every attempt failed; all errors are kept
    #[error("failed after {} attempts: {}", .0.len(), .0)]
    Exhausted(Aggregate<E>),

    /// Rejected before the first attempt
    #[error("failed retrying to create: {0}")]
    Fatal(String),
}

/// Call `create` until it succeeds, reports a conflict, or the backoff runs
/// out of steps.
///
/// There is no sleep after the last attempt. Conflicts end the loop
/// immediately as [`Creation::AlreadyExisted`].
pub async fn create_with_retry<E, F, Fut>(
    backoff: &Backoff,
    mut create: F,
) -> Result<Creation, RetryError<E>>
where
    E: AlreadyExists + fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), E>>,
{
    backoff.validate().map_err(RetryError::Fatal)?;

    let mut errors = Vec::new();
    for attempt in 1..=backoff.steps {
        match create().await {
            Ok(()) => {
                debug!(attempt, "Created");
                return Ok(Creation::Created);
            }
            Err(e) if e.is_already_exists() => {
                debug!(attempt, "Already exists, treating as created");
                return Ok(Creation::AlreadyExisted);
            }
            Err(e) => {
                warn!(attempt, steps = backoff.steps, error = %e, "Create attempt failed");
                errors.push(e);
            }
        }

        if attempt < backoff.steps {
            tokio::time::sleep(backoff.jittered_delay(attempt)).await;
        }
    }

    Err(RetryError::Exhausted(Aggregate(errors)))
}
