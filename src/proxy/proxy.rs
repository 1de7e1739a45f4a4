// ────────────────────────────────
// src/proxy/proxy.rs
// Proxy component that handles HTTP request forwarding
// ────────────────────────────────

use crate::config::{Config, HealthCheckConfig, ProxyConfig};
use crate::health::HealthChecker;
use crate::load_balancer::{LoadBalancer, RoundRobinBalancer};
use crate::metrics::{MetricsCollector, Timer};
use crate::proxy::{Backend, BackendPool};
use anyhow::Result;
use hyper::client::HttpConnector;
use hyper::header::{HeaderMap, HeaderName, HeaderValue, HOST};
use hyper::{Body, Client, Request, Response, StatusCode, Uri};
use hyper_tls::HttpsConnector;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Client address of the inbound connection, attached to each request by the
/// server before it reaches the proxy.
#[derive(Debug, Clone, Copy)]
pub struct ClientAddr(pub SocketAddr);

pub const REQUEST_ID_HEADER: &str = "x-request-id";

// Connection-scoped headers that must not be forwarded in either direction.
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

pub struct Proxy {
    config: ProxyConfig,
    health_config: HealthCheckConfig,
    pool: BackendPool,
    balancer: Arc<dyn LoadBalancer>,
    client: Client<HttpsConnector<HttpConnector>>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl Proxy {
    pub fn new(config: &Config, pool: BackendPool, metrics: Option<Arc<MetricsCollector>>) -> Self {
        let client = Client::builder().build(HttpsConnector::new());

        if let Some(metrics) = &metrics {
            metrics.update_backend_counts(pool.len(), pool.len());
        }

        Self {
            config: config.proxy.clone(),
            health_config: config.health_check.clone(),
            pool,
            balancer: Arc::new(RoundRobinBalancer::new()),
            client,
            metrics,
        }
    }

    pub fn pool(&self) -> &BackendPool {
        &self.pool
    }

    /// Spawn the background health checker for this proxy's pool. The returned handle
    /// is used to stop it on shutdown.
    pub fn start_health_checker(&self) -> Result<Arc<HealthChecker>> {
        let checker = Arc::new(HealthChecker::new(
            self.health_config.clone(),
            self.pool.clone(),
            self.metrics.clone(),
        )?);
        tokio::spawn(checker.clone().start());
        Ok(checker)
    }

    /// Forward one request to the next eligible backend and relay its answer.
    pub async fn handle(&self, req: Request<Body>) -> Result<Response<Body>, ProxyError> {
        let timer = Timer::new();
        let method = req.method().to_string();

        if let Some(ClientAddr(addr)) = req.extensions().get::<ClientAddr>() {
            info!(client = %addr, method = %method, path = %req.uri().path(), "Request received");
        }

        let backend = match self.balancer.select_backend(&self.pool).await {
            Ok(backend) => backend,
            Err(e) => {
                warn!("No healthy backend available for request");
                if let Some(metrics) = &self.metrics {
                    metrics.record_no_backend();
                }
                return Err(e);
            }
        };
        info!(backend = %backend.id, balancer = self.balancer.name(), "Forwarding request");

        let result = self.forward(&backend, req).await;

        if let Some(metrics) = &self.metrics {
            let status = match &result {
                Ok(response) => response.status().as_u16(),
                Err(e) => e.status().as_u16(),
            };
            metrics.record_request(&method, status, &backend.id, timer.elapsed());
        }

        if let Err(e) = &result {
            warn!(backend = %backend.id, error = %e, "Forwarding failed");
            let registry = self.pool.registry();
            if self.config.mark_unhealthy_on_error && registry.set_unhealthy(&backend.id).await {
                warn!(backend = %backend.id, "Backend is unhealthy after a failed request, removing it from the rotation");
                if let Some(metrics) = &self.metrics {
                    metrics.update_backend_health(&backend.id, false);
                    metrics.update_backend_counts(registry.healthy_count().await, registry.total());
                }
            }
        }

        result
    }

    async fn forward(&self, backend: &Backend, req: Request<Body>) -> Result<Response<Body>, ProxyError> {
        let (parts, body) = req.into_parts();

        let path_and_query = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let uri: Uri = backend
            .target_uri(path_and_query)
            .parse()
            .map_err(|e: hyper::http::uri::InvalidUri| ProxyError::InvalidUri(e.to_string()))?;

        let mut outbound = Request::builder()
            .method(parts.method)
            .uri(uri)
            .version(hyper::Version::HTTP_11)
            .body(body)
            .map_err(|e| ProxyError::BackendError(e.to_string()))?;

        copy_end_to_end_headers(&parts.headers, outbound.headers_mut());
        // Let the client derive Host from the backend URI.
        outbound.headers_mut().remove(HOST);

        let upstream = async {
            let response = self
                .client
                .request(outbound)
                .await
                .map_err(|e| ProxyError::BackendError(e.to_string()))?;

            let (parts, body) = response.into_parts();
            // Buffer the whole body so the timeout also covers a stalled stream.
            let bytes = hyper::body::to_bytes(body)
                .await
                .map_err(|e| ProxyError::BackendError(e.to_string()))?;
            Ok::<_, ProxyError>((parts, bytes))
        };

        let (parts, bytes) = timeout(self.config.timeout(), upstream)
            .await
            .map_err(|_| ProxyError::Timeout)??;

        debug!(backend = %backend.id, status = %parts.status, bytes = bytes.len(), "Backend responded");

        let mut response = Response::new(Body::from(bytes));
        *response.status_mut() = parts.status;
        copy_end_to_end_headers(&parts.headers, response.headers_mut());
        Ok(response)
    }
}

fn copy_end_to_end_headers(from: &HeaderMap<HeaderValue>, to: &mut HeaderMap<HeaderValue>) {
    // Headers named in Connection are hop-by-hop too.
    let listed: Vec<HeaderName> = from
        .get_all(hyper::header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for (name, value) in from.iter() {
        if HOP_BY_HOP.contains(&name.as_str()) || listed.contains(name) {
            continue;
        }
        to.append(name.clone(), value.clone());
    }
}

// Custom error type for proxy operations
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("No healthy backends available")]
    NoHealthyBackends,

    #[error("Backend error: {0}")]
    BackendError(String),

    #[error("Request timeout")]
    Timeout,

    #[error("Invalid upstream URI: {0}")]
    InvalidUri(String),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::NoHealthyBackends => StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::BackendError(_) | ProxyError::InvalidUri(_) => StatusCode::BAD_GATEWAY,
            ProxyError::Timeout => StatusCode::GATEWAY_TIMEOUT,
        }
    }
}

// Error details stay in the logs; callers get a generic message.
impl From<ProxyError> for Response<Body> {
    fn from(err: ProxyError) -> Self {
        let status = err.status();
        let message = match err {
            ProxyError::NoHealthyBackends => "No backends available",
            ProxyError::BackendError(_) | ProxyError::InvalidUri(_) => "Bad gateway",
            ProxyError::Timeout => "Gateway timeout",
        };

        let mut response = Response::new(Body::from(message));
        *response.status_mut() = status;
        response
    }
}
