//! Routes requests to worker threads and relays their replies.
//!
//! Per worker state machine:
//!
//! ```text
//! Starting -> Online -> (Busy <-> Idle) -> Closing -> Exited
//!      \_________\__________\_______________\______-> Errored
//! ```
//!
//! A worker that ends without being asked to close is `Errored`; the requests
//! it was holding fail with [`AnalysisError::WorkerFailure`] and the next
//! request routed to it starts a replacement, which first receives the last
//! `init-linter` configuration.

use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use lintbridge_core::{
    AnalysisError, AnalysisRequest, AnalysisResponse, IncrementalResult, LinterConfig,
};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::wait_until;
use crate::worker::{RequestId, SessionFactory, Worker, WorkerEvent, WorkerMessage, WorkerReply};

/// Default grace period for workers to exit after `close`.
pub const DEFAULT_CLOSE_GRACE: Duration = Duration::from_secs(5);

/// Lifecycle state of one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Starting,
    Online,
    Busy,
    Idle,
    Closing,
    Exited,
    Errored,
}

impl WorkerState {
    fn is_terminal(self) -> bool {
        matches!(self, Self::Exited | Self::Errored)
    }
}

/// Snapshot of one worker, as reported by [`WorkerDispatcher::stats`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerStats {
    pub index: usize,
    pub state: WorkerState,
    pub in_flight: usize,
    pub restarts: u64,
}

struct Slot {
    worker: Option<Worker>,
    generation: u64,
    state: WorkerState,
    in_flight: usize,
    restarts: u64,
    /// Flips to `true` once the current worker generation has ended.
    ended: watch::Receiver<bool>,
}

struct Inner {
    factory: SessionFactory,
    slots: Vec<Mutex<Slot>>,
    next_id: AtomicU64,
    next_worker: AtomicU64,
    linter: Mutex<Option<LinterConfig>>,
    closed: AtomicBool,
    close_grace: Duration,
}

/// Manages the worker threads.
///
/// Cheap to clone; clones share the same workers. Must be created and used
/// from within a Tokio runtime.
#[derive(Clone)]
pub struct WorkerDispatcher {
    inner: Arc<Inner>,
}

impl WorkerDispatcher {
    /// Starts `workers` workers (at least one).
    pub fn new(
        workers: usize,
        factory: SessionFactory,
        close_grace: Duration,
    ) -> Result<Self, AnalysisError> {
        let count = workers.max(1);
        let mut slots = Vec::with_capacity(count);
        let (_, ended) = watch::channel(true);
        for _ in 0..count {
            slots.push(Mutex::new(Slot {
                worker: None,
                generation: 0,
                state: WorkerState::Exited,
                in_flight: 0,
                restarts: 0,
                ended: ended.clone(),
            }));
        }

        let dispatcher = Self {
            inner: Arc::new(Inner {
                factory,
                slots,
                next_id: AtomicU64::new(1),
                next_worker: AtomicU64::new(0),
                linter: Mutex::new(None),
                closed: AtomicBool::new(false),
                close_grace,
            }),
        };
        for index in 0..count {
            let mut slot = dispatcher.inner.slots[index].lock();
            dispatcher.start_worker(index, &mut slot)?;
        }
        info!("Started {} analysis workers", count);
        Ok(dispatcher)
    }

    pub fn worker_count(&self) -> usize {
        self.inner.slots.len()
    }

    /// Per-worker state and in-flight counts.
    pub fn stats(&self) -> Vec<WorkerStats> {
        self.inner
            .slots
            .iter()
            .enumerate()
            .map(|(index, slot)| {
                let slot = slot.lock();
                WorkerStats {
                    index,
                    state: slot.state,
                    in_flight: slot.in_flight,
                    restarts: slot.restarts,
                }
            })
            .collect()
    }

    /// Sends a request to a worker and waits for its final reply.
    ///
    /// Requests every worker must see (`init-linter`, `delete-program`,
    /// `new-tsconfig`) are broadcast.
    pub async fn dispatch(&self, request: AnalysisRequest) -> Result<AnalysisResponse, AnalysisError> {
        if request.is_broadcast() {
            return self.broadcast(request).await;
        }
        self.run(request, false, |_| {}).await
    }

    /// Like [`WorkerDispatcher::dispatch`], relaying partial results to
    /// `on_partial` in the order the worker produced them.
    pub async fn dispatch_incremental<F>(
        &self,
        request: AnalysisRequest,
        on_partial: F,
    ) -> Result<AnalysisResponse, AnalysisError>
    where
        F: FnMut(IncrementalResult) + Send,
    {
        if request.is_broadcast() {
            return self.broadcast(request).await;
        }
        self.run(request, true, on_partial).await
    }

    /// Sends a request to every worker and waits for all of them.
    ///
    /// The first failure is returned once every worker has replied.
    pub async fn broadcast(&self, request: AnalysisRequest) -> Result<AnalysisResponse, AnalysisError> {
        if let AnalysisRequest::InitLinter(config) = &request {
            *self.inner.linter.lock() = Some(config.clone());
        }

        let mut pending = Vec::with_capacity(self.worker_count());
        for index in 0..self.worker_count() {
            pending.push(self.send(index, request.clone(), false));
        }

        let mut outcome = Ok(AnalysisResponse::ack());
        for sent in pending {
            let result = match sent {
                Ok(job) => job.wait(|_| {}).await,
                Err(e) => Err(e),
            };
            if let Err(e) = result
                && outcome.is_ok()
            {
                outcome = Err(e);
            }
        }
        outcome
    }

    async fn run<F>(
        &self,
        request: AnalysisRequest,
        incremental: bool,
        on_partial: F,
    ) -> Result<AnalysisResponse, AnalysisError>
    where
        F: FnMut(IncrementalResult) + Send,
    {
        let index = self.pick_worker(&request);
        self.send(index, request, incremental)?.wait(on_partial).await
    }

    /// Worker owning the request's affinity key, or the least busy one.
    fn pick_worker(&self, request: &AnalysisRequest) -> usize {
        let count = self.worker_count();
        if let Some(key) = request.affinity() {
            let mut hasher = DefaultHasher::new();
            key.hash(&mut hasher);
            return (hasher.finish() % count as u64) as usize;
        }

        let start = (self.inner.next_worker.fetch_add(1, Ordering::Relaxed) % count as u64) as usize;
        (0..count)
            .map(|offset| (start + offset) % count)
            .min_by_key(|&index| self.inner.slots[index].lock().in_flight)
            .unwrap_or(0)
    }

    /// Queues a request on worker `index`, restarting it if needed.
    fn send(
        &self,
        index: usize,
        request: AnalysisRequest,
        incremental: bool,
    ) -> Result<Job, AnalysisError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(AnalysisError::worker("Workers are shutting down"));
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (reply, replies) = mpsc::unbounded_channel();
        let mut message = WorkerMessage::Analyze {
            id,
            request,
            incremental,
            reply,
        };

        let mut slot = self.inner.slots[index].lock();
        for _ in 0..2 {
            let usable = slot.worker.as_ref().is_some_and(|w| !w.is_finished())
                && !slot.state.is_terminal();
            if !usable {
                self.start_worker(index, &mut slot)?;
            }
            let Some(worker) = slot.worker.as_ref() else {
                break;
            };
            match worker.send(message) {
                Ok(()) => {
                    slot.in_flight += 1;
                    if matches!(slot.state, WorkerState::Online | WorkerState::Idle) {
                        slot.state = WorkerState::Busy;
                    }
                    debug!("Request {} queued on worker {}", id, index);
                    return Ok(Job {
                        id,
                        index,
                        generation: slot.generation,
                        replies,
                        dispatcher: self.clone(),
                        settled: false,
                    });
                }
                Err(returned) => {
                    warn!("Worker {} is gone; restarting it", index);
                    slot.state = WorkerState::Errored;
                    message = returned;
                }
            }
        }
        Err(AnalysisError::worker(format!(
            "Worker {} could not accept request {}",
            index, id
        )))
    }

    /// Spawns a worker into `slot`, replaying the last linter configuration.
    fn start_worker(&self, index: usize, slot: &mut Slot) -> Result<(), AnalysisError> {
        let restart = slot.worker.is_some();
        let (events_tx, events) = mpsc::unbounded_channel();
        let worker = Worker::spawn(index, Arc::clone(&self.inner.factory), events_tx)
            .map_err(|e| AnalysisError::worker(format!("Failed to spawn worker {}: {}", index, e)))?;

        let (ended_tx, ended) = watch::channel(false);
        slot.generation += 1;
        slot.state = WorkerState::Starting;
        slot.in_flight = 0;
        slot.ended = ended;
        if restart {
            slot.restarts += 1;
        }

        if let Some(config) = self.inner.linter.lock().clone() {
            debug!("Replaying init-linter on worker {}", index);
            let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
            let (reply, replayed) = mpsc::unbounded_channel();
            let replay = WorkerMessage::Analyze {
                id,
                request: AnalysisRequest::InitLinter(config),
                incremental: false,
                reply,
            };
            if worker.send(replay).is_err() {
                warn!("Worker {} ended before receiving its linter configuration", index);
            } else {
                tokio::spawn(check_replay(
                    Arc::downgrade(&self.inner),
                    index,
                    slot.generation,
                    replayed,
                ));
            }
        }
        slot.worker = Some(worker);

        tokio::spawn(monitor(
            Arc::downgrade(&self.inner),
            index,
            slot.generation,
            events,
            ended_tx,
        ));
        Ok(())
    }

    /// Applies a state change if `generation` is still the slot's worker.
    fn update(&self, index: usize, generation: u64, apply: impl FnOnce(&mut Slot)) {
        let mut slot = self.inner.slots[index].lock();
        if slot.generation == generation {
            apply(&mut slot);
        }
    }

    /// Asks every worker to exit and waits up to the grace period.
    ///
    /// Workers still running afterwards are marked `Errored`.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let mut waiting = Vec::new();
        for (index, slot) in self.inner.slots.iter().enumerate() {
            let mut slot = slot.lock();
            if slot.state.is_terminal() {
                continue;
            }
            slot.state = WorkerState::Closing;
            if let Some(worker) = slot.worker.as_ref()
                && worker.send(WorkerMessage::Close).is_ok()
            {
                waiting.push((index, slot.generation, slot.ended.clone()));
            }
        }

        for (index, generation, mut ended) in waiting {
            let exited =
                tokio::time::timeout(self.inner.close_grace, wait_until(&mut ended, |done| *done)).await;
            if exited.is_err() {
                error!(
                    "Worker {} did not exit within {}ms",
                    index,
                    self.inner.close_grace.as_millis()
                );
                self.update(index, generation, |slot| slot.state = WorkerState::Errored);
            }
        }
        info!("All workers closed");
    }
}

/// Marks a restarted worker `Errored` if it rejects the replayed linter
/// configuration.
async fn check_replay(
    inner: std::sync::Weak<Inner>,
    index: usize,
    generation: u64,
    mut replayed: mpsc::UnboundedReceiver<WorkerReply>,
) {
    let failure = loop {
        match replayed.recv().await {
            Some(WorkerReply::Incremental { .. }) => continue,
            Some(WorkerReply::Final { .. }) | None => return,
            Some(WorkerReply::Error { error, .. }) => break error,
        }
    };

    error!("Worker {} rejected the replayed linter configuration: {}", index, failure);
    let Some(inner) = inner.upgrade() else {
        return;
    };
    let mut slot = inner.slots[index].lock();
    if slot.generation == generation && !slot.state.is_terminal() && slot.state != WorkerState::Closing {
        slot.state = WorkerState::Errored;
    }
}

/// Tracks lifecycle events of one worker generation.
async fn monitor(
    inner: std::sync::Weak<Inner>,
    index: usize,
    generation: u64,
    mut events: mpsc::UnboundedReceiver<WorkerEvent>,
    ended: watch::Sender<bool>,
) {
    let mut exited = false;
    while let Some(event) = events.recv().await {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        let mut slot = inner.slots[index].lock();
        if slot.generation != generation {
            break;
        }
        match event {
            WorkerEvent::Online => {
                if slot.state == WorkerState::Starting {
                    slot.state = if slot.in_flight > 0 {
                        WorkerState::Busy
                    } else {
                        WorkerState::Online
                    };
                }
            }
            WorkerEvent::Exited => {
                exited = true;
                slot.state = WorkerState::Exited;
                slot.in_flight = 0;
            }
        }
    }

    if !exited && let Some(inner) = inner.upgrade() {
        let mut slot = inner.slots[index].lock();
        if slot.generation == generation && !slot.state.is_terminal() {
            error!("Worker {} terminated unexpectedly", index);
            slot.state = WorkerState::Errored;
            slot.in_flight = 0;
        }
    }
    let _ = ended.send(true);
}

/// A request queued on a worker.
struct Job {
    id: RequestId,
    index: usize,
    generation: u64,
    replies: mpsc::UnboundedReceiver<WorkerReply>,
    dispatcher: WorkerDispatcher,
    settled: bool,
}

impl Job {
    /// Relays partial results and resolves with the final reply.
    async fn wait<F>(mut self, mut on_partial: F) -> Result<AnalysisResponse, AnalysisError>
    where
        F: FnMut(IncrementalResult) + Send,
    {
        while let Some(reply) = self.replies.recv().await {
            match reply {
                WorkerReply::Incremental { result, .. } => on_partial(result),
                WorkerReply::Final { response, .. } => return self.settle(Ok(response)),
                WorkerReply::Error { error, .. } => return self.settle(Err(error)),
            }
        }

        // The reply channel closed without a final reply: the worker died.
        let (index, generation) = (self.index, self.generation);
        self.dispatcher.update(index, generation, |slot| {
            if !slot.state.is_terminal() && slot.state != WorkerState::Closing {
                slot.state = WorkerState::Errored;
            }
        });
        self.settle(Err(AnalysisError::worker(format!(
            "Worker {} exited before replying to request {}",
            index, self.id
        ))))
    }

    fn settle(
        &mut self,
        result: Result<AnalysisResponse, AnalysisError>,
    ) -> Result<AnalysisResponse, AnalysisError> {
        self.release();
        result
    }

    fn release(&mut self) {
        if self.settled {
            return;
        }
        self.settled = true;
        release_slot(&self.dispatcher, self.index, self.generation);
    }
}

impl Drop for Job {
    /// A job dropped before settling (timed out) keeps its worker busy until
    /// the worker finishes it or exits.
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        self.settled = true;

        let (index, generation) = (self.index, self.generation);
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            release_slot(&self.dispatcher, index, generation);
            return;
        };
        let (_, closed) = mpsc::unbounded_channel();
        let mut replies = std::mem::replace(&mut self.replies, closed);
        let dispatcher = self.dispatcher.clone();
        let id = self.id;
        runtime.spawn(async move {
            while let Some(reply) = replies.recv().await {
                if !matches!(reply, WorkerReply::Incremental { .. }) {
                    break;
                }
            }
            debug!("Discarded late reply to request {}", id);
            release_slot(&dispatcher, index, generation);
        });
    }
}

fn release_slot(dispatcher: &WorkerDispatcher, index: usize, generation: u64) {
    dispatcher.update(index, generation, |slot| {
        slot.in_flight = slot.in_flight.saturating_sub(1);
        if slot.in_flight == 0 && slot.state == WorkerState::Busy {
            slot.state = WorkerState::Idle;
        }
    });
}

/// JSON summary of worker states, used by diagnostics endpoints.
pub fn stats_json(stats: &[WorkerStats]) -> Value {
    Value::Array(
        stats
            .iter()
            .map(|s| {
                serde_json::json!({
                    "index": s.index,
                    "state": format!("{:?}", s.state),
                    "inFlight": s.in_flight,
                    "restarts": s.restarts,
                })
            })
            .collect(),
    )
}
