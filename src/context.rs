//! Cancellation and deadline context for a conversion call.
//!
//! An [`ExecContext`] is the Rust counterpart of a cancellable request
//! context: a [`CancellationToken`] the caller can trigger at any time plus an
//! optional deadline. The process runner watches both while pdftoppm runs and
//! tears down the whole process group as soon as either fires.

use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Cancellation token plus optional deadline for one or more conversions.
///
/// Cloning is cheap and clones share the same token, so one context can
/// govern a batch of concurrent calls.
#[derive(Debug, Clone, Default)]
pub struct ExecContext {
    token: CancellationToken,
    deadline: Option<Instant>,
    timeout: Option<Duration>,
}

impl ExecContext {
    /// A context that is never cancelled and has no deadline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an existing token, e.g. one tripped by a Ctrl-C handler.
    pub fn with_token(token: CancellationToken) -> Self {
        Self {
            token,
            ..Self::default()
        }
    }

    /// Set a deadline `timeout` from now.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self.timeout = Some(timeout);
        self
    }

    /// A child context: cancelled with the parent, cancellable on its own.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
            timeout: self.timeout,
        }
    }

    /// Cancel every call running under this context.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// `true` once the deadline, if any, has passed.
    pub fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// The timeout the deadline was derived from, for error reporting.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Resolve once the deadline passes; never resolves without one.
    pub(crate) async fn expired(&self) {
        match self.deadline {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => std::future::pending::<()>().await,
        }
    }
}
