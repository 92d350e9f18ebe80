//! HTTP and WebSocket front end.
//!
//! Every analysis request kind is served as `POST /{kind}` with a JSON body.
//! `GET /ws` upgrades to the incremental channel, where each text frame is a
//! `{type, data}` envelope and partial project results are pushed as they
//! are produced.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::{Sink, SinkExt, Stream, StreamExt};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_tungstenite::tungstenite::{Error as WsError, Message};
use hyper_util::rt::TokioIo;
use lintbridge_core::{
    AnalysisError, AnalysisRequest, AnalysisResponse, AnalysisSession, ErrorPayload,
    IncrementalResult,
};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::dispatcher::{WorkerDispatcher, stats_json};
use crate::router::RequestRouter;
use crate::worker::SessionFactory;
use crate::{ServerConfig, ServerError, wait_until};

type HttpResponse = Response<Full<Bytes>>;

/// Request kinds served as `POST /{kind}`.
const REQUEST_KINDS: &[&str] = &[
    "init-linter",
    "analyze-jsts",
    "analyze-js",
    "analyze-ts",
    "analyze-with-program",
    "analyze-css",
    "analyze-html",
    "analyze-yaml",
    "analyze-project",
    "create-program",
    "delete-program",
    "tsconfig-files",
    "new-tsconfig",
    "create-tsconfig-file",
];

/// Triggers a graceful shutdown of a running [`Server`].
#[derive(Clone)]
pub struct ShutdownHandle {
    signal: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.signal.send_replace(true);
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.signal.borrow()
    }
}

#[derive(Clone)]
struct Context {
    router: Arc<RequestRouter>,
    shutdown: ShutdownHandle,
}

/// A bound analysis server.
pub struct Server {
    listener: TcpListener,
    router: Arc<RequestRouter>,
    shutdown: ShutdownHandle,
    shutdown_grace: Duration,
}

impl Server {
    /// Binds the listener and starts the workers.
    pub async fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        let options = config.session.clone();
        let factory: SessionFactory = Arc::new(move || AnalysisSession::new(options.clone()));
        Self::bind_with_factory(&config, factory).await
    }

    /// Like [`Server::bind`], building worker sessions with `factory`.
    pub async fn bind_with_factory(
        config: &ServerConfig,
        factory: SessionFactory,
    ) -> Result<Self, ServerError> {
        let addr = format!("{}:{}", config.host, config.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| ServerError::bind(&addr, e))?;

        let dispatcher = WorkerDispatcher::new(config.workers, factory, config.shutdown_grace)?;
        let router = Arc::new(RequestRouter::new(dispatcher, config.timeout));

        Ok(Self {
            listener,
            router,
            shutdown: ShutdownHandle {
                signal: Arc::new(watch::Sender::new(false)),
            },
            shutdown_grace: config.shutdown_grace,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn router(&self) -> &Arc<RequestRouter> {
        &self.router
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Serves connections until shutdown is requested (`POST /close`, the
    /// shutdown handle, or a termination signal), then drains in-flight
    /// requests and closes the workers.
    pub async fn run(self) -> Result<(), ServerError> {
        let Self {
            listener,
            router,
            shutdown,
            shutdown_grace,
        } = self;
        info!("Listening on {}", listener.local_addr()?);

        let ctx = Context {
            router: Arc::clone(&router),
            shutdown: shutdown.clone(),
        };
        let mut requested = shutdown.signal.subscribe();
        let terminate = termination_signal();
        tokio::pin!(terminate);
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, remote) = match accepted {
                        Ok(conn) => conn,
                        Err(e) => {
                            error!("Failed to accept connection: {}", e);
                            continue;
                        }
                    };
                    connections.spawn(serve_connection(ctx.clone(), TokioIo::new(stream), remote));
                }
                _ = wait_until(&mut requested, |stop| *stop) => {
                    info!("Shutdown requested");
                    break;
                }
                _ = &mut terminate => {
                    info!("Termination signal received");
                    break;
                }
                Some(_) = connections.join_next() => {}
            }
        }

        drop(listener);
        shutdown.shutdown();
        router.shutdown(shutdown_grace).await;

        let drained = tokio::time::timeout(shutdown_grace, async {
            while connections.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!("Aborting {} open connections", connections.len());
            connections.shutdown().await;
        }
        info!("Server stopped");
        Ok(())
    }
}

async fn serve_connection(ctx: Context, io: TokioIo<tokio::net::TcpStream>, remote: SocketAddr) {
    let mut stop = ctx.shutdown.signal.subscribe();
    let service = service_fn(move |req: Request<Incoming>| {
        let ctx = ctx.clone();
        async move { Ok::<_, Infallible>(handle(ctx, req).await) }
    });

    let conn = http1::Builder::new()
        .serve_connection(io, service)
        .with_upgrades();
    tokio::pin!(conn);

    tokio::select! {
        result = conn.as_mut() => {
            if let Err(e) = result {
                debug!("Connection from {} ended with error: {}", remote, e);
            }
        }
        _ = wait_until(&mut stop, |stop| *stop) => {
            conn.as_mut().graceful_shutdown();
            if let Err(e) = conn.await {
                debug!("Connection from {} ended with error: {}", remote, e);
            }
        }
    }
}

async fn termination_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

async fn handle(ctx: Context, req: Request<Incoming>) -> HttpResponse {
    let method = req.method().clone();
    let path = req.uri().path().trim_start_matches('/').to_string();
    debug!("{} /{}", method, path);

    match (method, path.as_str()) {
        (Method::GET, "status") => text(StatusCode::OK, "OK!"),
        (Method::GET, "workers") => json_response(
            StatusCode::OK,
            &stats_json(&ctx.router.dispatcher().stats()),
        ),
        (Method::GET, "ws") if hyper_tungstenite::is_upgrade_request(&req) => upgrade(ctx, req),
        (Method::POST, "close") => {
            ctx.shutdown.shutdown();
            text(StatusCode::OK, "OK!")
        }
        (Method::POST, kind) if REQUEST_KINDS.contains(&kind) => {
            let request = match read_request(kind, req).await {
                Ok(request) => request,
                Err(e) => return error_response(&e),
            };
            match ctx.router.route(request).await {
                Ok(response) => success_response(&response),
                Err(e) => error_response(&e),
            }
        }
        _ => text(StatusCode::NOT_FOUND, "Not Found"),
    }
}

async fn read_request(kind: &str, req: Request<Incoming>) -> Result<AnalysisRequest, AnalysisError> {
    let body = req
        .into_body()
        .collect()
        .await
        .map_err(|e| AnalysisError::validation(format!("Failed to read request body: {}", e)))?
        .to_bytes();

    let data = if body.iter().all(u8::is_ascii_whitespace) {
        Value::Null
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| AnalysisError::validation(format!("Invalid JSON body: {}", e)))?
    };
    AnalysisRequest::from_parts(kind, data)
}

/// HTTP status for an error reply.
///
/// Parsing and program errors are regular analysis outcomes and reported
/// with `200`, like the issues of a successful analysis.
pub fn status_for(error: &AnalysisError) -> StatusCode {
    match error {
        AnalysisError::Parsing { .. }
        | AnalysisError::ProgramConstruction(_)
        | AnalysisError::LinterInitialization(_) => StatusCode::OK,
        AnalysisError::Validation(_) => StatusCode::BAD_REQUEST,
        AnalysisError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        AnalysisError::WorkerFailure(_) | AnalysisError::Config(_) | AnalysisError::Io(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn success_response(response: &AnalysisResponse) -> HttpResponse {
    match response {
        AnalysisResponse::Ack(message) => text(StatusCode::OK, message.clone()),
        other => match serde_json::to_value(other) {
            Ok(value) => json_response(StatusCode::OK, &value),
            Err(e) => error_response(&AnalysisError::worker(format!(
                "Failed to serialize response: {}",
                e
            ))),
        },
    }
}

fn error_response(error: &AnalysisError) -> HttpResponse {
    let status = status_for(error);
    if status.is_server_error() {
        error!("Request failed: {}", error);
    }
    json_response(status, &payload_value(&error.to_payload()))
}

fn payload_value(payload: &ErrorPayload) -> Value {
    serde_json::to_value(payload).unwrap_or_else(|_| json!({ "error": "unserializable error" }))
}

fn text(status: StatusCode, body: impl Into<String>) -> HttpResponse {
    let mut response = Response::new(Full::new(Bytes::from(body.into())));
    *response.status_mut() = status;
    response.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        hyper::header::HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

fn json_response(status: StatusCode, value: &Value) -> HttpResponse {
    let mut response = Response::new(Full::new(Bytes::from(value.to_string())));
    *response.status_mut() = status;
    response.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        hyper::header::HeaderValue::from_static("application/json"),
    );
    response
}

fn upgrade(ctx: Context, mut req: Request<Incoming>) -> HttpResponse {
    match hyper_tungstenite::upgrade(&mut req, None) {
        Ok((response, websocket)) => {
            tokio::spawn(async move {
                match websocket.await {
                    Ok(socket) => {
                        if let Err(e) = serve_websocket(ctx.router, socket).await {
                            debug!("WebSocket closed with error: {}", e);
                        }
                    }
                    Err(e) => warn!("WebSocket handshake failed: {}", e),
                }
            });
            response
        }
        Err(e) => text(StatusCode::BAD_REQUEST, format!("Invalid WebSocket upgrade: {}", e)),
    }
}

/// Serves the incremental channel: one request envelope per text frame.
async fn serve_websocket<S>(router: Arc<RequestRouter>, socket: S) -> Result<(), WsError>
where
    S: Stream<Item = Result<Message, WsError>> + Sink<Message, Error = WsError> + Unpin,
{
    let (mut sink, mut frames) = socket.split();
    info!("Incremental channel opened");

    while let Some(frame) = frames.next().await {
        let body = match frame? {
            Message::Text(body) => body,
            Message::Close(_) => break,
            _ => continue,
        };

        let (partials_tx, mut partials) = mpsc::unbounded_channel::<IncrementalResult>();
        let outcome = match parse_envelope(&body) {
            Ok(request) => {
                let work = router.route_incremental(request, move |result| {
                    let _ = partials_tx.send(result);
                });
                tokio::pin!(work);
                loop {
                    tokio::select! {
                        biased;
                        Some(partial) = partials.recv() => sink.send(partial_frame(&partial)).await?,
                        outcome = &mut work => break outcome,
                    }
                }
            }
            Err(e) => Err(e),
        };

        while let Ok(partial) = partials.try_recv() {
            sink.send(partial_frame(&partial)).await?;
        }
        sink.send(final_frame(outcome)).await?;
    }

    info!("Incremental channel closed");
    Ok(())
}

fn parse_envelope(body: &str) -> Result<AnalysisRequest, AnalysisError> {
    let envelope: Value = serde_json::from_str(body)
        .map_err(|e| AnalysisError::validation(format!("Invalid JSON frame: {}", e)))?;
    AnalysisRequest::from_envelope(envelope)
}

fn partial_frame(result: &IncrementalResult) -> Message {
    let results = serde_json::to_value(result).unwrap_or(Value::Null);
    Message::Text(json!({ "ws": true, "results": results }).to_string())
}

fn final_frame(outcome: Result<AnalysisResponse, AnalysisError>) -> Message {
    let frame = match outcome.and_then(|response| {
        serde_json::to_value(&response)
            .map_err(|e| AnalysisError::worker(format!("Failed to serialize response: {}", e)))
    }) {
        Ok(results) => json!({ "ws": true, "results": results, "final": true }),
        Err(e) => {
            let mut payload = payload_value(&e.to_payload());
            if let Some(object) = payload.as_object_mut() {
                object.insert("ws".to_string(), Value::Bool(true));
                object.insert("final".to_string(), Value::Bool(true));
            }
            payload
        }
    };
    Message::Text(frame.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::time::Duration;

    #[rstest]
    #[case(AnalysisError::parsing("x", Some(1)), StatusCode::OK)]
    #[case(AnalysisError::program("x"), StatusCode::OK)]
    #[case(AnalysisError::validation("x"), StatusCode::BAD_REQUEST)]
    #[case(AnalysisError::Timeout(Duration::from_millis(5)), StatusCode::GATEWAY_TIMEOUT)]
    #[case(AnalysisError::worker("x"), StatusCode::INTERNAL_SERVER_ERROR)]
    fn test_status_for(#[case] error: AnalysisError, #[case] expected: StatusCode) {
        assert_eq!(status_for(&error), expected);
    }

    #[test]
    fn test_error_final_frame_is_marked() {
        let frame = final_frame(Err(AnalysisError::Timeout(Duration::from_millis(50))));
        let Message::Text(body) = frame else {
            panic!("expected a text frame");
        };
        let value: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(
            value,
            json!({"error": "Analysis timed out after 50ms", "kind": "timeout", "ws": true, "final": true})
        );
    }

    #[test]
    fn test_every_request_kind_parses() {
        for kind in REQUEST_KINDS {
            let err = AnalysisRequest::from_parts(kind, json!({}));
            if let Err(AnalysisError::Validation(message)) = &err {
                assert!(!message.contains("unknown variant"), "{}: {}", kind, message);
            }
        }
    }
}
