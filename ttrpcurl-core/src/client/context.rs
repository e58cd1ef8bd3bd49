//! Cancellation and deadlines for a single call.
use std::{fmt, future::Future, sync::Arc, time::Duration};
use tokio::{sync::watch, time::Instant};

/// Why a call stopped before completing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// The caller canceled the call, for example on Ctrl-C.
    Canceled,
    /// The deadline of the call passed.
    DeadlineExceeded,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelReason::Canceled => f.write_str("call canceled"),
            CancelReason::DeadlineExceeded => f.write_str("deadline exceeded"),
        }
    }
}

/// A cancellation signal plus an optional deadline, observed by the dispatcher before and
/// during every blocking operation.
#[derive(Debug, Clone)]
pub struct CallContext {
    canceled: watch::Receiver<bool>,
    deadline: Option<Instant>,
}

/// Cancels the [`CallContext`] it was created with.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    sender: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_canceled(&self) -> bool {
        *self.sender.borrow()
    }
}

impl CallContext {
    /// Creates a context together with the handle that cancels it.
    pub fn new() -> (Self, CancelHandle) {
        let (sender, canceled) = watch::channel(false);
        let context = Self {
            canceled,
            deadline: None,
        };
        let handle = CancelHandle {
            sender: Arc::new(sender),
        };
        (context, handle)
    }

    /// A context that can only end through a deadline.
    pub fn background() -> Self {
        let (context, _) = Self::new();
        context
    }

    /// Sets the deadline, keeping an earlier one if already set.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(current) => current.min(deadline),
            None => deadline,
        });
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left until the deadline, zero once it passed.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Returns the reason the context ended, without waiting.
    pub fn err(&self) -> Option<CancelReason> {
        if *self.canceled.borrow() {
            return Some(CancelReason::Canceled);
        }
        match self.deadline {
            Some(deadline) if deadline <= Instant::now() => Some(CancelReason::DeadlineExceeded),
            _ => None,
        }
    }

    /// Completes when the context is canceled or its deadline passes.
    pub async fn done(&self) -> CancelReason {
        let mut canceled = self.canceled.clone();
        let cancellation = async move {
            // Once every handle is dropped the context can no longer be canceled.
            if canceled.wait_for(|canceled| *canceled).await.is_err() {
                std::future::pending::<()>().await;
            }
        };

        match self.deadline {
            Some(deadline) => tokio::select! {
                biased;
                _ = cancellation => CancelReason::Canceled,
                _ = tokio::time::sleep_until(deadline) => CancelReason::DeadlineExceeded,
            },
            None => {
                cancellation.await;
                CancelReason::Canceled
            }
        }
    }

    /// Runs `future` until it completes or the context ends, whichever comes first.
    ///
    /// An already ended context never polls the future.
    pub async fn run<F>(&self, future: F) -> Result<F::Output, CancelReason>
    where
        F: Future,
    {
        tokio::select! {
            biased;
            reason = self.done() => Err(reason),
            output = future => Ok(output),
        }
    }
}
