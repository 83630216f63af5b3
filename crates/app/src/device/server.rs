//! Actix Web status server exposing recognition status, link health, and
//! Prometheus metrics.
//!
//! The server runs on a dedicated thread with its own actix system so the
//! device tasks never touch an async runtime.

use std::{
    net::{SocketAddr, TcpListener},
    sync::Arc,
};

use actix_web::{App, HttpResponse, HttpServer, web};
use anyhow::{Context, Result};
use glasses_core::{
    ConnectionState, ConnectivityManager, RecognitionStatus, tasks::spawn_task,
    watchdog::FailureFlag,
};
use serde::Serialize;
use tokio::sync::oneshot;
use tracing::{error, info};

use super::telemetry;

/// Shared state backing HTTP handlers.
#[derive(Clone)]
pub(crate) struct ServerState {
    pub(crate) status: Arc<RecognitionStatus>,
    pub(crate) connectivity: Arc<ConnectivityManager>,
    pub(crate) failure: Arc<FailureFlag>,
}

#[derive(Debug, Serialize)]
struct HealthReport {
    connection: ConnectionState,
    attempt_count: u32,
    cycle_count: u32,
    failed: bool,
}

/// Handle for the status server thread.
pub(crate) struct StatusServer {
    local_addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl StatusServer {
    /// Address the server is actually bound to.
    pub(crate) fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Signal the server to stop and block until the thread exits.
    pub(crate) fn stop(self) {
        if let Some(tx) = self.shutdown {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle {
            let _ = handle.join();
        }
    }
}

/// Bind `addr`, spawn the status server thread, and return a handle that can
/// stop it. Bind failures are returned to the caller.
pub(crate) fn spawn_status_server(addr: SocketAddr, state: ServerState) -> Result<StatusServer> {
    let listener = TcpListener::bind(addr)
        .with_context(|| format!("Failed to bind status server on {addr}"))?;
    let local_addr = listener
        .local_addr()
        .context("Failed to read status server address")?;
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let handle = spawn_task("status-server", move || {
        if let Err(err) = actix_web::rt::System::new().block_on(async move {
            let server = HttpServer::new(move || {
                App::new()
                    .app_data(web::Data::new(state.clone()))
                    .configure(routes)
            })
            .workers(1)
            .disable_signals()
            .listen(listener)?
            .run();
            info!("Status server listening on http://{local_addr}");

            let srv_handle = server.handle();
            actix_web::rt::spawn(async move {
                let _ = shutdown_rx.await;
                srv_handle.stop(true).await;
            });

            server.await
        }) {
            error!("Status server error: {err}");
        }
    })
    .context("Failed to spawn status server thread")?;

    Ok(StatusServer {
        local_addr,
        shutdown: Some(shutdown_tx),
        handle: Some(handle),
    })
}

pub(crate) fn routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/status", web::get().to(status_handler))
        .route("/health", web::get().to(health_handler))
        .route("/metrics", web::get().to(metrics_handler));
}

async fn status_handler(state: web::Data<ServerState>) -> HttpResponse {
    HttpResponse::Ok().json(state.status.report())
}

async fn health_handler(state: web::Data<ServerState>) -> HttpResponse {
    let snapshot = state.connectivity.snapshot();
    HttpResponse::Ok().json(HealthReport {
        connection: snapshot.state,
        attempt_count: snapshot.policy.attempt_count,
        cycle_count: snapshot.policy.cycle_count,
        failed: state.failure.is_set(),
    })
}

async fn metrics_handler() -> HttpResponse {
    match telemetry::prometheus_handle() {
        Some(handle) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(handle.render()),
        None => HttpResponse::NoContent().finish(),
    }
}

#[cfg(test)]
mod tests {
    use actix_web::test;
    use glasses_core::{
        RecognitionResult, RestartLatch, RetryPolicy,
        connectivity::{LinkEventSink, NetworkError, NetworkStack},
    };
    use serde_json::{Value, json};

    use super::*;

    struct IdleStack;

    impl NetworkStack for IdleStack {
        fn start(&self, _events: LinkEventSink) -> Result<(), NetworkError> {
            Ok(())
        }

        fn connect(&self) -> Result<(), NetworkError> {
            Ok(())
        }

        fn stop(&self) -> Result<(), NetworkError> {
            Ok(())
        }
    }

    fn state() -> ServerState {
        ServerState {
            status: Arc::new(RecognitionStatus::new()),
            connectivity: Arc::new(ConnectivityManager::new(
                Arc::new(IdleStack),
                Arc::new(RestartLatch::new()),
                RetryPolicy::default(),
            )),
            failure: Arc::new(FailureFlag::new()),
        }
    }

    async fn get_json(state: &ServerState, path: &str) -> Value {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .configure(routes),
        )
        .await;
        let req = test::TestRequest::get().uri(path).to_request();
        test::call_and_read_body_json(&app, req).await
    }

    #[actix_web::test]
    async fn status_reports_unknown_until_someone_is_recognized() {
        let state = state();
        assert_eq!(get_json(&state, "/status").await, json!({"status": "unknown"}));

        state.status.set(RecognitionResult::Recognized {
            id: Some(3),
            name: "Alice".into(),
        });
        assert_eq!(
            get_json(&state, "/status").await,
            json!({"status": "recognized", "id": 3, "name": "Alice"})
        );
    }

    #[::core::prelude::v1::test]
    fn spawned_server_answers_on_its_bound_address() {
        let server = spawn_status_server("127.0.0.1:0".parse().unwrap(), state()).unwrap();
        let url = format!("http://{}/status", server.local_addr());
        let text = reqwest::blocking::get(url).unwrap().text().unwrap();
        let body: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(body, json!({"status": "unknown"}));
        server.stop();
    }

    #[::core::prelude::v1::test]
    fn occupied_address_is_reported_to_the_caller() {
        let taken = TcpListener::bind("127.0.0.1:0").unwrap();
        let err = spawn_status_server(taken.local_addr().unwrap(), state())
            .err()
            .unwrap();
        assert!(err.to_string().contains("Failed to bind status server"));
    }

    #[actix_web::test]
    async fn health_reports_link_state_and_failure_flag() {
        let state = state();
        state.failure.set();
        assert_eq!(
            get_json(&state, "/health").await,
            json!({"connection": "idle", "attempt_count": 0, "cycle_count": 0, "failed": true})
        );
    }
}
