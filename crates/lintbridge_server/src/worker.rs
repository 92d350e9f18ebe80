//! Worker threads and their message protocol.
//!
//! Each worker is an OS thread owning its own [`AnalysisSession`]. The
//! dispatcher talks to it only through messages: jobs arrive on the worker's
//! inbox and replies leave through the channel carried by each job.

use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};
use lintbridge_core::{
    AnalysisError, AnalysisRequest, AnalysisResponse, AnalysisSession, IncrementalResult,
    ResultSink,
};
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Identifier of a dispatched request.
pub type RequestId = u64;

/// Builds the session of a (re)started worker.
pub type SessionFactory = Arc<dyn Fn() -> AnalysisSession + Send + Sync>;

/// Messages sent to a worker.
pub enum WorkerMessage {
    /// Run one request. With `incremental`, project results are streamed as
    /// [`WorkerReply::Incremental`] before the final reply.
    Analyze {
        id: RequestId,
        request: AnalysisRequest,
        incremental: bool,
        reply: mpsc::UnboundedSender<WorkerReply>,
    },
    /// Release the session and exit.
    Close,
}

impl fmt::Debug for WorkerMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Analyze {
                id,
                request,
                incremental,
                ..
            } => f
                .debug_struct("Analyze")
                .field("id", id)
                .field("kind", &request.kind())
                .field("incremental", incremental)
                .finish(),
            Self::Close => f.write_str("Close"),
        }
    }
}

/// Messages sent back for one request.
#[derive(Debug)]
pub enum WorkerReply {
    Incremental {
        id: RequestId,
        result: IncrementalResult,
    },
    Final {
        id: RequestId,
        response: AnalysisResponse,
    },
    Error {
        id: RequestId,
        error: AnalysisError,
    },
}

/// Lifecycle notifications a worker sends to the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WorkerEvent {
    Online,
    Exited,
}

/// Handle on a running worker thread.
pub(crate) struct Worker {
    inbox: Sender<WorkerMessage>,
    thread: JoinHandle<()>,
}

impl Worker {
    /// Spawns a worker thread running a fresh session from `factory`.
    pub(crate) fn spawn(
        index: usize,
        factory: SessionFactory,
        events: mpsc::UnboundedSender<WorkerEvent>,
    ) -> std::io::Result<Self> {
        let (inbox, messages) = crossbeam_channel::unbounded();
        let thread = thread::Builder::new()
            .name(format!("lintbridge-worker-{}", index))
            .spawn(move || {
                let session = factory();
                run(index, session, messages, events);
            })?;
        Ok(Self { inbox, thread })
    }

    /// Queues a message; gives it back if the worker is gone.
    pub(crate) fn send(&self, message: WorkerMessage) -> Result<(), WorkerMessage> {
        self.inbox.send(message).map_err(|e| e.into_inner())
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }
}

fn run(
    index: usize,
    mut session: AnalysisSession,
    messages: Receiver<WorkerMessage>,
    events: mpsc::UnboundedSender<WorkerEvent>,
) {
    let _ = events.send(WorkerEvent::Online);
    debug!("Worker {} online", index);

    for message in messages.iter() {
        match message {
            WorkerMessage::Analyze {
                id,
                request,
                incremental,
                reply,
            } => {
                debug!("Worker {} handling {} request {}", index, request.kind(), id);
                let result = if incremental {
                    let mut forward = |result: IncrementalResult| {
                        let _ = reply.send(WorkerReply::Incremental { id, result });
                    };
                    let sink: ResultSink<'_> = &mut forward;
                    session.handle(request, Some(sink))
                } else {
                    session.handle(request, None)
                };

                let message = match result {
                    Ok(response) => WorkerReply::Final { id, response },
                    Err(error) => {
                        debug!("Request {} failed on worker {}: {}", id, index, error);
                        WorkerReply::Error { id, error }
                    }
                };
                // The requester may have given up (timeout); the reply is dropped.
                let _ = reply.send(message);
            }
            WorkerMessage::Close => {
                session.close();
                break;
            }
        }
    }

    info!("Worker {} exited", index);
    let _ = events.send(WorkerEvent::Exited);
}
