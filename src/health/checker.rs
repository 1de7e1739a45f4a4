// src/health/checker.rs
use crate::config::HealthCheckConfig;
use crate::metrics::MetricsCollector;
use crate::proxy::{Backend, BackendPool};
use anyhow::{Context, Result};
use reqwest::Client;
use std::sync::Arc;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Background health checker: hits every backend once per interval and records the
/// outcome in the pool's `HealthRegistry`.
pub struct HealthChecker {
    config: HealthCheckConfig,
    pool: BackendPool,
    client: Client,
    metrics: Option<Arc<MetricsCollector>>,
    shutdown_tx: tokio::sync::watch::Sender<bool>,
    shutdown_rx: tokio::sync::watch::Receiver<bool>,
}

#[derive(Debug)]
pub struct HealthCheckResult {
    pub backend_id: String,
    pub healthy: bool,
    pub response_time_ms: u64,
    pub error: Option<String>,
}

impl HealthChecker {
    pub fn new(
        config: HealthCheckConfig,
        pool: BackendPool,
        metrics: Option<Arc<MetricsCollector>>,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .context("Failed to create health check HTTP client")?;

        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

        Ok(Self {
            config,
            pool,
            client,
            metrics,
            shutdown_tx,
            shutdown_rx,
        })
    }

    /// Check every backend on each tick until `shutdown` is called. The first cycle runs
    /// immediately; a cycle that overruns the interval delays the next one
    /// rather than firing a burst.
    pub async fn start(self: Arc<Self>) {
        let mut ticker = interval(self.config.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut shutdown_rx = self.shutdown_rx.clone();

        info!(
            "Starting health checker with interval: {:?}",
            self.config.interval()
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.clone().check_all_backends().await;
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("Health checker shutting down");
                        break;
                    }
                }
            }
        }
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Run one check cycle over every backend.
    pub async fn check_all_backends(self: Arc<Self>) -> Vec<HealthCheckResult> {
        let mut tasks = Vec::new();

        for backend in self.pool.all_backends().iter().cloned() {
            let checker = self.clone();
            tasks.push(tokio::spawn(async move {
                checker.check_backend(backend).await
            }));
        }

        let mut results = Vec::with_capacity(tasks.len());
        let mut healthy_count = 0;
        let mut unhealthy_count = 0;

        for joined in futures::future::join_all(tasks).await {
            match joined {
                Ok(check_result) => {
                    if check_result.healthy {
                        healthy_count += 1;
                        debug!(
                            backend = %check_result.backend_id,
                            response_time_ms = check_result.response_time_ms,
                            "Backend is healthy"
                        );
                    } else {
                        unhealthy_count += 1;
                        debug!(
                            backend = %check_result.backend_id,
                            error = ?check_result.error,
                            "Backend is unhealthy"
                        );
                    }
                    results.push(check_result);
                }
                Err(e) => {
                    error!("Health check task failed: {}", e);
                }
            }
        }

        if let Some(metrics) = &self.metrics {
            let registry = self.pool.registry();
            metrics.update_backend_counts(registry.healthy_count().await, registry.total());
        }

        debug!(
            "Health check complete: {} healthy, {} unhealthy",
            healthy_count, unhealthy_count
        );
        results
    }

    async fn check_backend(&self, backend: Arc<Backend>) -> HealthCheckResult {
        let start = std::time::Instant::now();
        let url = backend.target_uri(&self.config.path);

        let result = timeout(self.config.timeout(), self.client.get(url.as_str()).send()).await;

        let response_time_ms = start.elapsed().as_millis() as u64;

        let (healthy, error) = match result {
            Ok(Ok(response)) => {
                let status = response.status();
                if status.is_success() {
                    (true, None)
                } else {
                    (false, Some(format!("HTTP {}", status)))
                }
            }
            Ok(Err(e)) => (false, Some(e.to_string())),
            Err(_) => (false, Some("Request timeout".to_string())),
        };

        let registry = self.pool.registry();
        if healthy {
            if registry.set_healthy(&backend.id).await {
                info!(
                    backend = %backend.id,
                    "Backend is healthy again, adding it back to the rotation"
                );
            }
        } else if registry.set_unhealthy(&backend.id).await {
            warn!(
                backend = %backend.id,
                error = error.as_deref().unwrap_or("unknown"),
                "Backend is unhealthy, removing it from the rotation"
            );
        }

        if let Some(metrics) = &self.metrics {
            metrics.update_backend_health(&backend.id, healthy);
        }

        HealthCheckResult {
            backend_id: backend.id.clone(),
            healthy,
            response_time_ms,
            error,
        }
    }
}
