//! HTTP export for metrics and health.
//!
//! Serves the prometheus text format at the configured metrics path and a
//! small JSON health document at `/health`. UNHEALTHY responds 503 so a load
//! balancer can eject the node without parsing the body.

use super::{HealthMonitor, HealthStatus, ValoMetrics};
use anyhow::{Context, Result};
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use prometheus::{Encoder, TextEncoder};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

#[derive(Debug, Clone)]
pub struct MonitoringServerConfig {
    pub listen_addr: SocketAddr,
    pub metrics_path: String,
}

impl Default for MonitoringServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:9464".parse().unwrap(),
            metrics_path: "/metrics".to_string(),
        }
    }
}

/// Metrics/health HTTP server.
pub struct MonitoringServer {
    config: MonitoringServerConfig,
    metrics: Arc<ValoMetrics>,
    health: Arc<HealthMonitor>,
}

impl MonitoringServer {
    pub fn new(
        config: MonitoringServerConfig,
        metrics: Arc<ValoMetrics>,
        health: Arc<HealthMonitor>,
    ) -> Self {
        Self {
            config,
            metrics,
            health,
        }
    }

    /// Serve forever. Spawn via [`MonitoringServer::spawn`] from synchronous
    /// code.
    pub async fn serve(self) -> Result<()> {
        let listener = TcpListener::bind(&self.config.listen_addr)
            .await
            .context("failed to bind monitoring server")?;

        info!(
            "monitoring server listening on http://{}{}",
            self.config.listen_addr, self.config.metrics_path
        );

        let metrics = self.metrics.clone();
        let health = self.health.clone();
        let metrics_path = self.config.metrics_path.clone();

        loop {
            let (stream, remote_addr) = match listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    error!("failed to accept connection: {e}");
                    continue;
                }
            };

            let metrics = metrics.clone();
            let health = health.clone();
            let metrics_path = metrics_path.clone();

            tokio::spawn(async move {
                let io = TokioIo::new(stream);

                let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                    let metrics = metrics.clone();
                    let health = health.clone();
                    let metrics_path = metrics_path.clone();
                    async move { handle_request(req, metrics, health, &metrics_path) }
                });

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    debug!("connection error from {remote_addr}: {err}");
                }
            });
        }
    }

    /// Run the server on a dedicated thread with its own runtime.
    pub fn spawn(self) -> std::io::Result<std::thread::JoinHandle<()>> {
        std::thread::Builder::new()
            .name("valo-monitoring".into())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(e) => {
                        error!("failed to build monitoring runtime: {e}");
                        return;
                    }
                };
                if let Err(e) = runtime.block_on(self.serve()) {
                    error!("monitoring server exited: {e}");
                }
            })
    }
}

fn handle_request(
    req: Request<hyper::body::Incoming>,
    metrics: Arc<ValoMetrics>,
    health: Arc<HealthMonitor>,
    metrics_path: &str,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let path = req.uri().path();
    debug!("monitoring request: {} {}", req.method(), path);

    if path == "/health" || path == "/healthz" {
        let status = health.evaluate();
        let code = match status {
            HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::OK,
        };
        let body = format!("{{\"status\":\"{}\"}}", status.as_str());
        return Ok(Response::builder()
            .status(code)
            .header("Content-Type", "application/json")
            .body(Full::new(Bytes::from(body)))
            .unwrap());
    }

    if path == metrics_path {
        return Ok(match encode_metrics(&metrics) {
            Ok(text) => Response::builder()
                .status(StatusCode::OK)
                .header("Content-Type", "text/plain; version=0.0.4")
                .body(Full::new(Bytes::from(text)))
                .unwrap(),
            Err(e) => {
                error!("failed to encode metrics: {e}");
                Response::builder()
                    .status(StatusCode::INTERNAL_SERVER_ERROR)
                    .body(Full::new(Bytes::from(format!("error: {e}"))))
                    .unwrap()
            }
        });
    }

    Ok(Response::builder()
        .status(StatusCode::NOT_FOUND)
        .body(Full::new(Bytes::from("Not Found")))
        .unwrap())
}

/// Encode the registry to the prometheus text format.
pub fn encode_metrics(metrics: &ValoMetrics) -> Result<String> {
    let encoder = TextEncoder::new();
    let families = metrics.registry().gather();

    let mut buffer = Vec::new();
    encoder
        .encode(&families, &mut buffer)
        .context("failed to encode metrics")?;

    String::from_utf8(buffer).context("invalid utf-8 in metrics")
}
