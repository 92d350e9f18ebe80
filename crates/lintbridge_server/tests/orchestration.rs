//! End-to-end tests for request orchestration.
//!
//! These tests drive the router, dispatcher and server with real worker
//! threads and rule engines that are slow, crash, or echo the file they see.

use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use http_body_util::{BodyExt, Full};
use hyper::{Method, Request, StatusCode};
use hyper_util::rt::TokioIo;
use lintbridge_core::{
    AnalysisError, AnalysisRequest, AnalysisResponse, AnalysisSession, Issue, LinterConfig,
    RuleContext, RuleEngine, SessionOptions,
};
use lintbridge_server::{
    RequestRouter, Server, ServerConfig, SessionFactory, WorkerDispatcher, WorkerState,
};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tempfile::TempDir;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;

/// Reports one issue whose message is the analyzed file path.
///
/// Sleeps first when the path contains `slow`, panics when it contains `crash`.
struct EchoEngine;

impl RuleEngine for EchoEngine {
    fn load_bundle(&mut self, _bundle: &Path) -> Result<(), AnalysisError> {
        Ok(())
    }

    fn evaluate(&self, ctx: &RuleContext<'_>) -> Result<Vec<Issue>, AnalysisError> {
        let path = ctx.file.to_string_lossy();
        if path.contains("slow") {
            std::thread::sleep(Duration::from_millis(200));
        }
        if path.contains("crash") {
            panic!("rule engine crashed on {}", path);
        }
        Ok(vec![Issue::new("echo", 1, 0, path.to_string())])
    }
}

/// [`EchoEngine`] that fails to load any rule bundle unless `accepts_bundles`.
struct BundleEngine {
    accepts_bundles: bool,
}

impl RuleEngine for BundleEngine {
    fn load_bundle(&mut self, bundle: &Path) -> Result<(), AnalysisError> {
        if self.accepts_bundles {
            Ok(())
        } else {
            Err(AnalysisError::linter(format!("cannot load {}", bundle.display())))
        }
    }

    fn evaluate(&self, ctx: &RuleContext<'_>) -> Result<Vec<Issue>, AnalysisError> {
        EchoEngine.evaluate(ctx)
    }
}

fn factory() -> SessionFactory {
    Arc::new(|| AnalysisSession::new(SessionOptions::default()).with_rule_engine(Box::new(EchoEngine)))
}

fn router(workers: usize, timeout: Duration) -> RequestRouter {
    let dispatcher = WorkerDispatcher::new(workers, factory(), Duration::from_secs(1)).unwrap();
    RequestRouter::new(dispatcher, timeout)
}

fn css(path: &str) -> AnalysisRequest {
    AnalysisRequest::from_parts("analyze-css", json!({"filePath": path, "fileContent": "a {}"})).unwrap()
}

fn echoed_path(response: &AnalysisResponse) -> String {
    match response {
        AnalysisResponse::File(output) => output.issues[0].message.clone(),
        other => panic!("unexpected response {:?}", other),
    }
}

fn css_project() -> TempDir {
    let temp = TempDir::new().unwrap();
    for name in ["a.css", "b.css", "c.css"] {
        fs::write(temp.path().join(name), "a { color: red; }").unwrap();
    }
    temp
}

#[tokio::test]
async fn test_timeout_fires_before_slow_worker_and_late_reply_is_dropped() {
    let router = router(1, Duration::from_millis(50));
    router
        .route(AnalysisRequest::InitLinter(LinterConfig::new("/proj")))
        .await
        .unwrap();

    let started = Instant::now();
    let err = router.route(css("/proj/slow.css")).await.unwrap_err();
    let elapsed = started.elapsed();

    assert!(matches!(err, AnalysisError::Timeout(d) if d == Duration::from_millis(50)));
    assert!(elapsed < Duration::from_millis(180), "took {:?}", elapsed);

    // The worker is still busy with the slow file; the next reply must be
    // the one for this request, not the stale one.
    let router = RequestRouter::new(router.dispatcher().clone(), Duration::from_secs(5));
    let response = router.route(css("/proj/fast.css")).await.unwrap();
    assert_eq!(echoed_path(&response), "/proj/fast.css");
}

#[tokio::test]
async fn test_incremental_results_precede_final_result() {
    let project = css_project();
    let router = router(1, Duration::from_secs(10));
    router
        .route(AnalysisRequest::InitLinter(LinterConfig::new(project.path())))
        .await
        .unwrap();

    let events = Arc::new(Mutex::new(Vec::new()));
    let partials = Arc::clone(&events);
    let request = AnalysisRequest::from_parts(
        "analyze-project",
        json!({"configuration": {"baseDir": project.path()}}),
    )
    .unwrap();
    let response = router
        .route_incremental(request, move |result| {
            partials
                .lock()
                .push(format!("partial:{}", result.filename.display()))
        })
        .await
        .unwrap();
    events.lock().push("final".to_string());

    let expected: Vec<String> = ["a.css", "b.css", "c.css"]
        .iter()
        .map(|name| format!("partial:{}", project.path().join(name).display()))
        .chain(std::iter::once("final".to_string()))
        .collect();
    assert_eq!(*events.lock(), expected);

    match response {
        AnalysisResponse::Project(output) => {
            assert!(output.files.is_empty());
            assert_eq!(output.meta.files_analyzed.len(), 3);
        }
        other => panic!("unexpected response {:?}", other),
    }
}

#[tokio::test]
async fn test_worker_crash_fails_only_its_request() {
    let router = router(1, Duration::from_secs(5));
    router
        .route(AnalysisRequest::InitLinter(LinterConfig::new("/proj")))
        .await
        .unwrap();

    let err = router.route(css("/proj/crash.css")).await.unwrap_err();
    assert!(matches!(err, AnalysisError::WorkerFailure(_)));
    assert_eq!(router.dispatcher().stats()[0].state, WorkerState::Errored);

    // The replacement worker received the linter configuration again.
    let response = router.route(css("/proj/after.css")).await.unwrap();
    assert_eq!(echoed_path(&response), "/proj/after.css");

    let stats = router.dispatcher().stats();
    assert_eq!(stats[0].restarts, 1);
    assert_eq!(stats[0].in_flight, 0);
}

#[tokio::test]
async fn test_crash_does_not_affect_other_workers() {
    let router = router(2, Duration::from_secs(5));
    router
        .route(AnalysisRequest::InitLinter(LinterConfig::new("/proj")))
        .await
        .unwrap();

    let (crashed, survived) = tokio::join!(
        router.route(css("/proj/crash.css")),
        router.route(css("/proj/ok.css"))
    );
    assert!(matches!(crashed, Err(AnalysisError::WorkerFailure(_))));
    assert_eq!(echoed_path(&survived.unwrap()), "/proj/ok.css");
}

#[tokio::test]
async fn test_timed_out_request_keeps_worker_busy_until_it_finishes() {
    let router = router(1, Duration::from_millis(50));
    router
        .route(AnalysisRequest::InitLinter(LinterConfig::new("/proj")))
        .await
        .unwrap();

    let err = router.route(css("/proj/slow.css")).await.unwrap_err();
    assert!(matches!(err, AnalysisError::Timeout(_)));
    assert_eq!(router.in_flight(), 0);

    let stats = router.dispatcher().stats();
    assert_eq!(stats[0].in_flight, 1);
    assert_eq!(stats[0].state, WorkerState::Busy);

    tokio::time::sleep(Duration::from_millis(300)).await;
    let stats = router.dispatcher().stats();
    assert_eq!(stats[0].in_flight, 0);
    assert_eq!(stats[0].state, WorkerState::Idle);
}

#[tokio::test]
async fn test_close_marks_worker_errored_when_grace_expires() {
    let dispatcher = WorkerDispatcher::new(1, factory(), Duration::from_millis(50)).unwrap();
    dispatcher
        .dispatch(AnalysisRequest::InitLinter(LinterConfig::new("/proj")))
        .await
        .unwrap();

    let busy = dispatcher.clone();
    let slow = tokio::spawn(async move { busy.dispatch(css("/proj/slow.css")).await });
    tokio::time::sleep(Duration::from_millis(20)).await;

    let started = Instant::now();
    dispatcher.close().await;
    assert!(started.elapsed() < Duration::from_millis(150), "took {:?}", started.elapsed());
    assert_eq!(dispatcher.stats()[0].state, WorkerState::Errored);

    // The worker still finishes what it was given before exiting.
    let response = slow.await.unwrap().unwrap();
    assert_eq!(echoed_path(&response), "/proj/slow.css");
}

#[tokio::test]
async fn test_shutdown_waits_for_in_flight_request() {
    let router = Arc::new(router(1, Duration::from_secs(5)));
    router
        .route(AnalysisRequest::InitLinter(LinterConfig::new("/proj")))
        .await
        .unwrap();

    let routing = Arc::clone(&router);
    let request = tokio::spawn(async move { routing.route(css("/proj/slow.css")).await });
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(router.in_flight(), 1);

    let started = Instant::now();
    let closing = Arc::clone(&router);
    tokio::spawn(async move { closing.shutdown(Duration::from_secs(1)).await })
        .await
        .unwrap();
    let elapsed = started.elapsed();

    assert!(elapsed >= Duration::from_millis(150), "took {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(1), "took {:?}", elapsed);
    let response = request.await.unwrap().unwrap();
    assert_eq!(echoed_path(&response), "/proj/slow.css");
    assert_eq!(router.in_flight(), 0);
    assert_eq!(router.dispatcher().stats()[0].state, WorkerState::Exited);
}

#[tokio::test]
async fn test_rejected_linter_replay_marks_restarted_worker_errored() {
    let sessions = Arc::new(AtomicUsize::new(0));
    let created = Arc::clone(&sessions);
    let factory: SessionFactory = Arc::new(move || {
        let first = created.fetch_add(1, Ordering::SeqCst) == 0;
        AnalysisSession::new(SessionOptions::default())
            .with_rule_engine(Box::new(BundleEngine { accepts_bundles: first }))
    });
    let dispatcher = WorkerDispatcher::new(1, factory, Duration::from_secs(1)).unwrap();

    let mut config = LinterConfig::new("/proj");
    config.bundles.push("/bundles/extra.js".into());
    dispatcher
        .dispatch(AnalysisRequest::InitLinter(config))
        .await
        .unwrap();

    let err = dispatcher.dispatch(css("/proj/crash.css")).await.unwrap_err();
    assert!(matches!(err, AnalysisError::WorkerFailure(_)));

    // The replacement rejects the replayed configuration, so it cannot lint.
    let err = dispatcher.dispatch(css("/proj/after.css")).await.unwrap_err();
    assert!(matches!(err, AnalysisError::LinterInitialization(_)));

    let deadline = Instant::now() + Duration::from_secs(1);
    while dispatcher.stats()[0].state != WorkerState::Errored && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let stats = dispatcher.stats();
    assert_eq!(stats[0].state, WorkerState::Errored);
    assert_eq!(stats[0].restarts, 1);
    assert_eq!(sessions.load(Ordering::SeqCst), 2);
}

async fn start_server() -> (SocketAddr, tokio::task::JoinHandle<()>) {
    let config = ServerConfig {
        workers: 2,
        timeout: Duration::from_secs(10),
        shutdown_grace: Duration::from_secs(1),
        ..ServerConfig::default()
    };
    let server = Server::bind_with_factory(&config, factory()).await.unwrap();
    let addr = server.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        server.run().await.unwrap();
    });
    (addr, handle)
}

async fn send(addr: SocketAddr, method: Method, path: &str, body: &str) -> (StatusCode, String) {
    let stream = TcpStream::connect(addr).await.unwrap();
    let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
        .await
        .unwrap();
    tokio::spawn(conn);

    let request = Request::builder()
        .method(method)
        .uri(path)
        .header(hyper::header::HOST, addr.to_string())
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap();
    let response = sender.send_request(request).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, String::from_utf8(body.to_vec()).unwrap())
}

#[tokio::test]
async fn test_http_routes() {
    let (addr, handle) = start_server().await;

    assert_eq!(
        send(addr, Method::GET, "/status", "").await,
        (StatusCode::OK, "OK!".to_string())
    );
    assert_eq!(
        send(addr, Method::POST, "/init-linter", r#"{"baseDir": "/proj"}"#).await,
        (StatusCode::OK, "OK!".to_string())
    );

    let (status, body) = send(
        addr,
        Method::POST,
        "/analyze-css",
        r#"{"filePath": "/proj/a.css", "fileContent": "a {}"}"#,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let value: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(value["issues"][0]["message"], json!("/proj/a.css"));

    let (status, body) = send(addr, Method::POST, "/analyze-css", "{not json").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.contains("Invalid JSON body"));

    let (status, _) = send(addr, Method::POST, "/no-such-kind", "{}").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(addr, Method::GET, "/workers", "").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(serde_json::from_str::<Value>(&body).unwrap().as_array().unwrap().len(), 2);

    assert_eq!(
        send(addr, Method::POST, "/close", "").await,
        (StatusCode::OK, "OK!".to_string())
    );
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("server did not stop")
        .unwrap();
}

#[tokio::test]
async fn test_websocket_streams_partial_then_final_frames() {
    let project = css_project();
    let (addr, handle) = start_server().await;
    let init = json!({"baseDir": project.path()}).to_string();
    send(addr, Method::POST, "/init-linter", &init).await;

    let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws", addr))
        .await
        .unwrap();
    let envelope = json!({
        "type": "analyze-project",
        "data": {"configuration": {"baseDir": project.path()}}
    });
    socket.send(Message::Text(envelope.to_string())).await.unwrap();

    let mut frames = Vec::new();
    while let Some(frame) = socket.next().await {
        let Message::Text(body) = frame.unwrap() else {
            continue;
        };
        let value: Value = serde_json::from_str(&body).unwrap();
        let last = value["final"] == json!(true);
        frames.push(value);
        if last {
            break;
        }
    }

    assert_eq!(frames.len(), 4);
    for (frame, name) in frames.iter().zip(["a.css", "b.css", "c.css"]) {
        assert_eq!(frame["ws"], json!(true));
        assert!(frame.get("final").is_none());
        assert_eq!(
            frame["results"]["filename"],
            json!(project.path().join(name))
        );
    }
    assert_eq!(frames[3]["results"]["meta"]["filesAnalyzed"].as_array().unwrap().len(), 3);

    socket.send(Message::Text("{}".to_string())).await.unwrap();
    let Some(Ok(Message::Text(body))) = socket.next().await else {
        panic!("expected an error frame");
    };
    let error: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(error["kind"], json!("validation"));
    assert_eq!(error["final"], json!(true));

    socket.close(None).await.unwrap();
    send(addr, Method::POST, "/close", "").await;
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("server did not stop")
        .unwrap();
}
