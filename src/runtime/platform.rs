//! Settings shared by every fiber of a runtime.

use std::fmt;
use std::sync::Arc;

use super::{RuntimeConfig, Supervisor, supervisor};
use crate::cause::Cause;
use crate::effect::Erased;
use crate::scheduler::Scheduler;

/// Receives the causes of failures nobody handled.
pub type Reporter = Arc<dyn Fn(&Cause<Erased>) + Send + Sync>;

/// Operations a fiber performs before yielding to its scheduler.
pub const DEFAULT_MAX_OPERATIONS: usize = 2048;

/// The environment fibers run in: where their tasks go, how long they may run
/// without yielding, and where unhandled failures are reported.
pub struct Platform {
    scheduler: Arc<dyn Scheduler>,
    max_operations: usize,
    reporter: Reporter,
    report_unhandled: bool,
    supervisor: Arc<dyn Supervisor>,
}

impl Platform {
    /// Starts building a platform.
    #[must_use]
    pub fn builder() -> PlatformBuilder {
        PlatformBuilder::default()
    }

    /// A platform configured from `config`.
    ///
    /// # Errors
    ///
    /// Returns the I/O error raised while building a dedicated tokio runtime
    /// when `config.worker_threads` is set.
    pub fn from_config(config: &RuntimeConfig) -> std::io::Result<Self> {
        let mut builder = Self::builder()
            .max_operations(config.max_operations)
            .report_unhandled(config.report_unhandled);
        #[cfg(feature = "tokio")]
        if let Some(worker_threads) = config.worker_threads {
            builder = builder.scheduler(Arc::new(
                crate::scheduler::TokioScheduler::with_worker_threads(worker_threads)?,
            ));
        }
        Ok(builder.build())
    }

    /// The scheduler fibers dispatch their tasks to.
    #[must_use]
    pub fn scheduler(&self) -> &Arc<dyn Scheduler> {
        &self.scheduler
    }

    /// Operations a fiber performs before yielding.
    #[must_use]
    pub const fn max_operations(&self) -> usize {
        self.max_operations
    }

    /// The supervisor of root fibers.
    #[must_use]
    pub fn supervisor(&self) -> &Arc<dyn Supervisor> {
        &self.supervisor
    }

    /// Reports an unhandled failure, unless reporting is disabled.
    pub fn report_failure(&self, cause: &Cause<Erased>) {
        if self.report_unhandled {
            (self.reporter)(cause);
        }
    }
}

impl fmt::Debug for Platform {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Platform")
            .field("max_operations", &self.max_operations)
            .field("report_unhandled", &self.report_unhandled)
            .finish_non_exhaustive()
    }
}

#[cfg(feature = "tokio")]
impl Default for Platform {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Logs the rendered cause at error level.
fn log_failure(cause: &Cause<Erased>) {
    tracing::error!("{}", cause.pretty());
}

/// Builds a [`Platform`].
#[derive(Default)]
#[must_use]
pub struct PlatformBuilder {
    scheduler: Option<Arc<dyn Scheduler>>,
    max_operations: Option<usize>,
    reporter: Option<Reporter>,
    report_unhandled: Option<bool>,
    supervisor: Option<Arc<dyn Supervisor>>,
}

impl PlatformBuilder {
    /// Sets the scheduler.
    pub fn scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Sets the number of operations a fiber performs before yielding.
    /// Zero is treated as one.
    pub fn max_operations(mut self, max_operations: usize) -> Self {
        self.max_operations = Some(max_operations.max(1));
        self
    }

    /// Sets where unhandled failures go. The default logs them with
    /// `tracing::error!`.
    pub fn reporter(mut self, reporter: impl Fn(&Cause<Erased>) + Send + Sync + 'static) -> Self {
        self.reporter = Some(Arc::new(reporter));
        self
    }

    /// Enables or disables reporting of unhandled failures.
    pub fn report_unhandled(mut self, report_unhandled: bool) -> Self {
        self.report_unhandled = Some(report_unhandled);
        self
    }

    /// Sets the supervisor of root fibers.
    pub fn supervisor(mut self, supervisor: Arc<dyn Supervisor>) -> Self {
        self.supervisor = Some(supervisor);
        self
    }

    /// Builds the platform.
    ///
    /// Without an explicit scheduler the platform uses a
    /// [`TokioScheduler`](crate::scheduler::TokioScheduler), or, when the
    /// `tokio` feature is disabled, a
    /// [`ManualScheduler`](crate::scheduler::ManualScheduler) that the caller
    /// must drive.
    #[must_use]
    pub fn build(self) -> Platform {
        Platform {
            scheduler: self.scheduler.unwrap_or_else(default_scheduler),
            max_operations: self.max_operations.unwrap_or(DEFAULT_MAX_OPERATIONS),
            reporter: self.reporter.unwrap_or_else(|| Arc::new(log_failure)),
            report_unhandled: self.report_unhandled.unwrap_or(true),
            supervisor: self.supervisor.unwrap_or_else(supervisor::none),
        }
    }
}

#[cfg(feature = "tokio")]
fn default_scheduler() -> Arc<dyn Scheduler> {
    Arc::new(crate::scheduler::TokioScheduler::new())
}

#[cfg(not(feature = "tokio"))]
fn default_scheduler() -> Arc<dyn Scheduler> {
    Arc::new(crate::scheduler::ManualScheduler::new())
}
