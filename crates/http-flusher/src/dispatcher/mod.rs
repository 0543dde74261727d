use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use reqwest::StatusCode;
use thiserror::Error;
use tokio::sync::{Semaphore, SemaphorePermit};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, warn};

use crate::request::RequestUnit;
use crate::retry::RetryConfig;
use crate::transport::{Transport, TransportError};

#[derive(Debug, Error)]
pub enum FailureReason {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("endpoint responded with {0}")]
    Status(StatusCode),
}

#[derive(Debug, Error)]
pub enum UnitError {
    #[error("gave up after {attempts} attempt(s): {reason}")]
    Exhausted { attempts: u32, reason: FailureReason },

    #[error("endpoint rejected request with non-retryable {0}")]
    Rejected(StatusCode),

    #[error("abandoned during shutdown")]
    Abandoned,
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("dispatcher is stopped")]
    Stopped,

    #[error("{failed} of {total} request(s) failed, first error: {first}")]
    Failed {
        failed: usize,
        total: usize,
        first: UnitError,
    },

    #[error("worker task failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

/// Runs request units against a shared [`Transport`] with at most
/// `concurrency` in flight, retrying each unit on its own schedule.
///
/// Workers are spawned per `dispatch` call and tracked so that [`stop`]
/// can wait for them. They draw from one permit pool, so the limit holds
/// across overlapping calls as well as within one. Cancellation ends backoff sleeps and stops workers
/// from taking queued units; a send already in flight runs to its timeout.
///
/// [`stop`]: Dispatcher::stop
pub struct Dispatcher<T: Transport> {
    transport: Arc<T>,
    concurrency: usize,
    timeout: Duration,
    retry: Arc<RetryConfig>,
    permits: Arc<Semaphore>,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl<T: Transport> Dispatcher<T> {
    pub fn new(transport: T, concurrency: usize, timeout: Duration, retry: RetryConfig) -> Self {
        let concurrency = concurrency.max(1);
        Self {
            transport: Arc::new(transport),
            concurrency,
            timeout,
            retry: Arc::new(retry),
            permits: Arc::new(Semaphore::new(concurrency)),
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    /// Send every unit, returning once each has succeeded or failed for good.
    pub async fn dispatch(&self, units: Vec<RequestUnit>) -> Result<(), DispatchError> {
        if self.cancel.is_cancelled() {
            return Err(DispatchError::Stopped);
        }
        let total = units.len();
        if total == 0 {
            return Ok(());
        }

        let queue = Arc::new(Mutex::new(VecDeque::from(units)));
        let handles: Vec<_> = (0..self.concurrency.min(total))
            .map(|_| {
                let worker = Worker {
                    transport: Arc::clone(&self.transport),
                    queue: Arc::clone(&queue),
                    retry: Arc::clone(&self.retry),
                    permits: Arc::clone(&self.permits),
                    timeout: self.timeout,
                    cancel: self.cancel.clone(),
                };
                self.tracker.spawn(worker.run())
            })
            .collect();

        // Await every worker even if one panicked, so no unit is still
        // running when this returns.
        let mut failures = Vec::new();
        let mut crashed = None;
        for handle in handles {
            match handle.await {
                Ok(unit_failures) => failures.extend(unit_failures),
                Err(e) => {
                    error!(error = %e, "dispatch worker failed");
                    crashed.get_or_insert(e);
                }
            }
        }
        if let Some(e) = crashed {
            return Err(DispatchError::Worker(e));
        }

        let failed = failures.len();
        match failures.into_iter().next() {
            None => Ok(()),
            Some(first) => Err(DispatchError::Failed {
                failed,
                total,
                first,
            }),
        }
    }

    /// Refuse new work, cut pending backoff short and wait for workers.
    pub async fn stop(&self) {
        self.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

struct Worker<T: Transport> {
    transport: Arc<T>,
    queue: Arc<Mutex<VecDeque<RequestUnit>>>,
    retry: Arc<RetryConfig>,
    permits: Arc<Semaphore>,
    timeout: Duration,
    cancel: CancellationToken,
}

impl<T: Transport> Worker<T> {
    async fn run(self) -> Vec<UnitError> {
        let mut failures = Vec::new();
        loop {
            // Held for the unit's whole send and backoff cycle.
            let Some(_permit) = self.permit().await else {
                let abandoned = self.drain();
                failures.extend(std::iter::repeat_with(|| UnitError::Abandoned).take(abandoned));
                break;
            };
            let Some(unit) = self.next_unit() else {
                break;
            };
            if let Err(e) = self.execute(&unit).await {
                error!(url = %unit.url, error = %e, "request failed");
                failures.push(e);
            }
        }
        failures
    }

    /// `None` once shutdown has begun.
    async fn permit(&self) -> Option<SemaphorePermit<'_>> {
        if self.cancel.is_cancelled() {
            return None;
        }
        tokio::select! {
            _ = self.cancel.cancelled() => None,
            permit = self.permits.acquire() => permit.ok(),
        }
    }

    // The lock is never held across `.await`.
    fn next_unit(&self) -> Option<RequestUnit> {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    fn drain(&self) -> usize {
        let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        let n = queue.len();
        queue.clear();
        n
    }

    async fn execute(&self, unit: &RequestUnit) -> Result<(), UnitError> {
        let mut attempt: u32 = 0;
        loop {
            let reason = match self.transport.send(unit, self.timeout).await {
                Ok(status) if status.is_success() => {
                    debug!(url = %unit.url, %status, attempt, "request delivered");
                    return Ok(());
                }
                Ok(status) if !self.retry.is_retryable_status(status) => {
                    return Err(UnitError::Rejected(status));
                }
                Ok(status) => FailureReason::Status(status),
                Err(e) => FailureReason::Transport(e),
            };

            if !self.retry.allows_retry(attempt) {
                return Err(UnitError::Exhausted {
                    attempts: attempt + 1,
                    reason,
                });
            }

            let delay = self.retry.next_delay(attempt);
            warn!(url = %unit.url, attempt, ?delay, error = %reason, "request failed, retrying");
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(UnitError::Abandoned),
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }
}
