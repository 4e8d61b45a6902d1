//! Execution contexts.
//!
//! An endpoint runs its session I/O lanes on one tokio runtime and its
//! notification lanes on another, so slow event handlers cannot starve the
//! I/O of other connections.
//!
//! | `execution_context_pool_size` | I/O context | Notification context |
//! |-------------------------------|-------------|----------------------|
//! | `0` | ambient runtime | ambient runtime |
//! | `N` | dedicated runtime, N workers | dedicated runtime, N workers |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use parking_lot::Mutex;
use tokio::runtime::{Builder, Handle, Runtime};
use tracing::{debug, info};

use crate::error::{Error, Result};

// ============================================================================
// ExecutionContexts
// ============================================================================

/// The pair of runtimes an endpoint schedules work on.
pub struct ExecutionContexts {
    /// Where session lanes run.
    io: Handle,
    /// Where deferred notifications run.
    notify: Handle,
    /// Dedicated runtimes owned by this value, if any.
    owned: Mutex<Vec<Runtime>>,
}

impl ExecutionContexts {
    /// Creates execution contexts for `pool_size` workers.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if `pool_size` is 0 and no tokio runtime is active
    /// - [`Error::Io`] if a dedicated runtime cannot be built
    pub fn new(pool_size: usize) -> Result<Self> {
        if pool_size == 0 {
            return Self::ambient();
        }

        let io = Self::build_runtime("laneway-io", pool_size)?;
        let notify = Self::build_runtime("laneway-notify", pool_size)?;

        info!(workers = pool_size, "Dedicated execution contexts started");

        Ok(Self {
            io: io.handle().clone(),
            notify: notify.handle().clone(),
            owned: Mutex::new(vec![io, notify]),
        })
    }

    /// Uses the runtime the caller is running on for everything.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] outside a tokio runtime.
    pub fn ambient() -> Result<Self> {
        let handle = Handle::try_current().map_err(|_| {
            Error::config(
                "no tokio runtime is active; call from within a runtime or set \
                 execution_context_pool_size",
            )
        })?;

        Ok(Self {
            io: handle.clone(),
            notify: handle,
            owned: Mutex::new(Vec::new()),
        })
    }

    /// Returns the I/O context.
    #[inline]
    #[must_use]
    pub fn io(&self) -> &Handle {
        &self.io
    }

    /// Returns the notification context.
    #[inline]
    #[must_use]
    pub fn notify(&self) -> &Handle {
        &self.notify
    }

    /// Returns `true` if this value owns dedicated runtimes.
    #[must_use]
    pub fn is_dedicated(&self) -> bool {
        !self.owned.lock().is_empty()
    }

    /// Shuts down owned runtimes without blocking.
    ///
    /// Safe to call from async code and more than once.
    pub fn shutdown(&self) {
        let runtimes: Vec<_> = self.owned.lock().drain(..).collect();
        let count = runtimes.len();

        for runtime in runtimes {
            runtime.shutdown_background();
        }

        if count > 0 {
            debug!(count, "Dedicated execution contexts shut down");
        }
    }

    /// Builds one multi-thread runtime.
    fn build_runtime(name: &'static str, workers: usize) -> Result<Runtime> {
        Ok(Builder::new_multi_thread()
            .worker_threads(workers)
            .thread_name(name)
            .enable_all()
            .build()?)
    }
}

impl Drop for ExecutionContexts {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for ExecutionContexts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContexts")
            .field("dedicated", &self.is_dedicated())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
