//! LIFO registry of compensating actions.
//!
//! Every resource the engine creates that must not outlive a failed or
//! interrupted run (a started container, a staging directory, a dirty git
//! tree) is registered here with [`CleanupStack::push`]. The returned
//! [`CleanupHandle`] is the only way to trigger that one action on the normal
//! path: [`CleanupHandle::run`] consumes the handle, removes the entry from the
//! stack and executes it. On interrupt, [`CleanupStack::unwind`] drains every
//! entry still registered, newest first.
//!
//! An action therefore runs at most once: either through its handle or through
//! the unwind, whichever takes it off the stack first.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};

use thiserror::Error;
use tracing::{debug, error, warn};

/// Error type returned by cleanup actions.
pub type ActionError = Box<dyn std::error::Error + Send + Sync>;

type ActionFuture = Pin<Box<dyn Future<Output = Result<(), ActionError>> + Send>>;
type Action = Box<dyn FnOnce() -> ActionFuture + Send>;

#[derive(Debug, Error)]
pub enum CleanupError {
  #[error("cleanup action '{name}' failed: {source}")]
  Action {
    name: String,
    #[source]
    source: ActionError,
  },
}

struct Entry {
  id: u64,
  name: String,
  action: Action,
}

#[derive(Default)]
struct Inner {
  next_id: u64,
  entries: Vec<Entry>,
}

/// Shared, cloneable cleanup registry.
///
/// Clones refer to the same stack. The internal lock is never held across an
/// action, so actions may push further entries.
#[derive(Clone, Default)]
pub struct CleanupStack {
  inner: Arc<Mutex<Inner>>,
}

impl std::fmt::Debug for CleanupStack {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("CleanupStack").field("pending", &self.pending()).finish()
  }
}

impl CleanupStack {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> MutexGuard<'_, Inner> {
    self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  /// Register `action` on top of the stack.
  pub fn push<F, Fut>(&self, name: impl Into<String>, action: F) -> CleanupHandle
  where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), ActionError>> + Send + 'static,
  {
    let name = name.into();
    let mut inner = self.lock();
    let id = inner.next_id;
    inner.next_id += 1;
    inner.entries.push(Entry {
      id,
      name: name.clone(),
      action: Box::new(move || Box::pin(action())),
    });
    debug!(action = %name, depth = inner.entries.len(), "cleanup action registered");

    CleanupHandle {
      stack: self.clone(),
      id,
      name,
    }
  }

  /// Number of actions still registered.
  pub fn len(&self) -> usize {
    self.lock().entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Names of the registered actions, oldest first.
  pub fn pending(&self) -> Vec<String> {
    self.lock().entries.iter().map(|e| e.name.clone()).collect()
  }

  fn take(&self, id: u64) -> Option<Entry> {
    let mut inner = self.lock();
    let pos = inner.entries.iter().position(|e| e.id == id)?;
    Some(inner.entries.remove(pos))
  }

  fn pop(&self) -> Option<Entry> {
    self.lock().entries.pop()
  }

  /// Run every registered action, newest first, until the stack is empty.
  ///
  /// Failures are logged and do not stop the remaining actions. Returns the
  /// number of actions executed.
  pub async fn unwind(&self) -> usize {
    let mut executed = 0;
    while let Some(entry) = self.pop() {
      executed += 1;
      debug!(action = %entry.name, "running cleanup action");
      if let Err(e) = (entry.action)().await {
        error!(action = %entry.name, error = %e, "cleanup action failed");
      }
    }
    executed
  }
}

/// Proof of registration for one cleanup action.
///
/// Consuming the handle with [`run`](CleanupHandle::run) executes the action
/// now and stops tracking it. Dropping the handle leaves the action registered
/// for the unwind.
#[must_use = "a cleanup handle should be run once the resource is released"]
pub struct CleanupHandle {
  stack: CleanupStack,
  id: u64,
  name: String,
}

impl std::fmt::Debug for CleanupHandle {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("CleanupHandle").field("name", &self.name).finish()
  }
}

impl CleanupHandle {
  pub fn name(&self) -> &str {
    &self.name
  }

  /// Remove the action from the stack and execute it.
  ///
  /// If an unwind already took the action, nothing runs and `Ok(())` is
  /// returned.
  ///
  /// # Errors
  ///
  /// Returns [`CleanupError::Action`] when the action itself fails.
  pub async fn run(self) -> Result<(), CleanupError> {
    let Some(entry) = self.stack.take(self.id) else {
      debug!(action = %self.name, "cleanup action already executed");
      return Ok(());
    };
    (entry.action)()
      .await
      .map_err(|source| CleanupError::Action { name: entry.name, source })
  }
}

/// Result of racing work against an interrupt signal.
#[derive(Debug)]
pub enum RunOutcome<T> {
  Completed(T),
  /// The signal fired first; `executed` cleanup actions were run.
  Interrupted { executed: usize },
}

/// Drive `work` to completion unless `signal` resolves first.
///
/// On signal the work future is dropped and the whole stack is unwound.
pub async fn run_until_interrupted<T>(
  stack: &CleanupStack,
  work: impl Future<Output = T>,
  signal: impl Future<Output = ()>,
) -> RunOutcome<T> {
  tokio::select! {
    result = work => RunOutcome::Completed(result),
    () = signal => {
      warn!(handlers = stack.len(), "SIGINT received - executing cleanup handlers");
      let executed = stack.unwind().await;
      RunOutcome::Interrupted { executed }
    }
  }
}

/// Resolve on Ctrl-C. Never resolves if the handler cannot be installed.
pub async fn interrupt_signal() {
  if let Err(e) = tokio::signal::ctrl_c().await {
    warn!(error = %e, "cannot listen for SIGINT");
    std::future::pending::<()>().await;
  }
}
