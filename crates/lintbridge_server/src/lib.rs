//! # lintbridge_server
//!
//! Request orchestration for lintbridge.
//!
//! This crate provides:
//! - [`TimeoutGuard`], a restartable deadline timer
//! - Worker threads, each owning an [`lintbridge_core::AnalysisSession`]
//! - [`WorkerDispatcher`], routing requests to workers and recovering from crashes
//! - [`RequestRouter`], bounding every request by a timeout
//! - [`Server`], the HTTP and WebSocket front end with graceful shutdown
//!
//! ## Example
//!
//! ```rust,ignore
//! use lintbridge_server::{Server, ServerConfig};
//!
//! let server = Server::bind(ServerConfig::default()).await?;
//! println!("listening on {}", server.local_addr()?);
//! server.run().await?;
//! ```

mod dispatcher;
mod router;
mod server;
mod timeout;
mod worker;

use std::time::Duration;

use lintbridge_core::{AnalysisError, SessionOptions};
use thiserror::Error;

pub use dispatcher::{DEFAULT_CLOSE_GRACE, WorkerDispatcher, WorkerState, WorkerStats, stats_json};
pub use router::{DEFAULT_TIMEOUT, RequestRouter};
pub use server::{Server, ShutdownHandle, status_for};
pub use timeout::{TimeoutGuard, TimeoutState};
pub use worker::{RequestId, SessionFactory, WorkerMessage, WorkerReply};

/// Waits until the watched value satisfies `predicate`.
///
/// Returns `false` if the sender is gone first. The channel's read guard is
/// released before returning.
pub(crate) async fn wait_until<T>(
    rx: &mut tokio::sync::watch::Receiver<T>,
    predicate: impl FnMut(&T) -> bool,
) -> bool {
    rx.wait_for(predicate).await.is_ok()
}

/// Settings of a [`Server`].
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    /// `0` binds an ephemeral port.
    pub port: u16,
    pub workers: usize,
    /// Per-request time budget.
    pub timeout: Duration,
    /// How long shutdown waits for in-flight requests and exiting workers.
    pub shutdown_grace: Duration,
    pub session: SessionOptions,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            workers: 1,
            timeout: DEFAULT_TIMEOUT,
            shutdown_grace: DEFAULT_CLOSE_GRACE,
            session: SessionOptions::default(),
        }
    }
}

/// Errors that stop the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to start workers: {0}")]
    Workers(#[from] AnalysisError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServerError {
    /// Creates a bind error.
    pub fn bind(addr: impl Into<String>, source: std::io::Error) -> Self {
        Self::Bind {
            addr: addr.into(),
            source,
        }
    }
}
