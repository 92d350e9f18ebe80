//! Request routing with per-request deadlines.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use lintbridge_core::{AnalysisError, AnalysisRequest, AnalysisResponse, IncrementalResult};
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, warn};

use crate::dispatcher::WorkerDispatcher;
use crate::timeout::TimeoutGuard;
use crate::wait_until;

/// Default per-request time budget.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Forwards requests to the dispatcher, bounding each by a timeout.
///
/// A request that exceeds its budget fails with [`AnalysisError::Timeout`];
/// its late reply, if any, is discarded.
pub struct RequestRouter {
    dispatcher: WorkerDispatcher,
    timeout: Duration,
    accepting: AtomicBool,
    in_flight: watch::Sender<usize>,
}

impl RequestRouter {
    pub fn new(dispatcher: WorkerDispatcher, timeout: Duration) -> Self {
        Self {
            dispatcher,
            timeout,
            accepting: AtomicBool::new(true),
            in_flight: watch::Sender::new(0),
        }
    }

    pub fn dispatcher(&self) -> &WorkerDispatcher {
        &self.dispatcher
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn in_flight(&self) -> usize {
        *self.in_flight.borrow()
    }

    /// Routes a request and waits for its final response.
    pub async fn route(&self, request: AnalysisRequest) -> Result<AnalysisResponse, AnalysisError> {
        let kind = request.kind();
        self.guarded(kind, self.dispatcher.dispatch(request)).await
    }

    /// Routes a request, relaying partial results to `on_partial` before the
    /// final response.
    pub async fn route_incremental<F>(
        &self,
        request: AnalysisRequest,
        on_partial: F,
    ) -> Result<AnalysisResponse, AnalysisError>
    where
        F: FnMut(IncrementalResult) + Send,
    {
        let kind = request.kind();
        self.guarded(kind, self.dispatcher.dispatch_incremental(request, on_partial))
            .await
    }

    async fn guarded<Fut>(&self, kind: &str, work: Fut) -> Result<AnalysisResponse, AnalysisError>
    where
        Fut: Future<Output = Result<AnalysisResponse, AnalysisError>>,
    {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(AnalysisError::worker("Server is shutting down"));
        }
        let _in_flight = InFlight::enter(&self.in_flight);

        let (fired_tx, fired) = oneshot::channel();
        let guard = TimeoutGuard::new(self.timeout);
        guard.start(move || {
            let _ = fired_tx.send(());
        });

        let result = tokio::select! {
            result = work => result,
            Ok(()) = fired => {
                warn!("{} request timed out after {}ms", kind, self.timeout.as_millis());
                Err(AnalysisError::Timeout(self.timeout))
            }
        };
        guard.stop();
        debug!("{} request settled", kind);
        result
    }

    /// Stops accepting requests, waits up to `grace` for in-flight ones, then
    /// closes the workers.
    pub async fn shutdown(&self, grace: Duration) {
        if !self.accepting.swap(false, Ordering::SeqCst) {
            return;
        }

        let mut in_flight = self.in_flight.subscribe();
        let drained = tokio::time::timeout(grace, wait_until(&mut in_flight, |count| *count == 0)).await;
        if drained.is_err() {
            warn!(
                "{} requests still in flight after {}ms; closing workers anyway",
                self.in_flight(),
                grace.as_millis()
            );
        }
        self.dispatcher.close().await;
        info!("Router shut down");
    }
}

/// Counts a request as in flight while alive.
struct InFlight<'a> {
    counter: &'a watch::Sender<usize>,
}

impl<'a> InFlight<'a> {
    fn enter(counter: &'a watch::Sender<usize>) -> Self {
        counter.send_modify(|count| *count += 1);
        Self { counter }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.counter.send_modify(|count| *count = count.saturating_sub(1));
    }
}
