use crate::errors::ToolError;
use crate::models::Server;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct CancelState {
    flag: AtomicBool,
    notify: Notify,
}

/// Cancellation signal shared between the async caller and blocking SSH work.
#[derive(Debug, Clone, Default)]
pub struct Cancellation {
    state: Arc<CancelState>,
}

impl Cancellation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.state.flag.store(true, Ordering::SeqCst);
        self.state.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.flag.load(Ordering::SeqCst)
    }

    pub async fn cancelled(&self) {
        loop {
            let notified = self.state.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Blocking-side view of an execution context: polled between I/O steps.
#[derive(Debug, Clone, Default)]
pub struct Interrupt {
    cancellation: Cancellation,
    deadline: Option<Instant>,
}

impl Interrupt {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn check(&self) -> Result<(), ToolError> {
        if self.cancellation.is_cancelled() {
            return Err(ToolError::cancelled("operation cancelled"));
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(ToolError::timeout("operation deadline exceeded"));
        }
        Ok(())
    }

    /// Shrinks `limit` to whatever is left before the deadline.
    pub fn bound(&self, limit: Duration) -> Duration {
        match self.deadline {
            Some(deadline) => limit.min(deadline.saturating_duration_since(Instant::now())),
            None => limit,
        }
    }
}

/// Per-operation state: the optional bound server plus cancellation and
/// deadline.
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    pub target: Option<Server>,
    pub cancellation: Cancellation,
    pub deadline: Option<Instant>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_target(mut self, target: Option<Server>) -> Self {
        self.target = target;
        self
    }

    pub fn with_cancellation(mut self, cancellation: Cancellation) -> Self {
        self.cancellation = cancellation;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    pub fn interrupt(&self) -> Interrupt {
        Interrupt {
            cancellation: self.cancellation.clone(),
            deadline: self.deadline,
        }
    }

    pub fn check(&self) -> Result<(), ToolError> {
        self.interrupt().check()
    }

    /// Runs blocking work off the runtime, returning early if the context is
    /// cancelled or its deadline passes. The worker observes the same signal
    /// through its `Interrupt` and winds down on its own.
    pub async fn run_blocking<T, F>(&self, label: &str, work: F) -> Result<T, ToolError>
    where
        F: FnOnce(Interrupt) -> Result<T, ToolError> + Send + 'static,
        T: Send + 'static,
    {
        self.check()?;
        let interrupt = self.interrupt();
        let handle = tokio::task::spawn_blocking(move || work(interrupt));
        tokio::select! {
            joined = handle => {
                joined.map_err(|_| ToolError::internal(format!("{} task failed", label)))?
            }
            _ = self.cancellation.cancelled() => {
                Err(ToolError::cancelled(format!("{} cancelled", label)))
            }
            _ = deadline_elapsed(self.deadline) => {
                Err(ToolError::timeout(format!("{} exceeded its deadline", label)))
            }
        }
    }
}

async fn deadline_elapsed(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(tokio::time::Instant::from_std(at)).await,
        None => std::future::pending::<()>().await,
    }
}
