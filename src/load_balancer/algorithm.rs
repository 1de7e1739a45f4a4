// src/load_balancer/algorithm.rs
use crate::proxy::{Backend, BackendPool, ProxyError};
use async_trait::async_trait;
use std::sync::Arc;

/// Picks the backend for one request. Implementations only read the pool's
/// health registry, never write it.
#[async_trait]
pub trait LoadBalancer: Send + Sync {
    async fn select_backend(&self, pool: &BackendPool) -> Result<Arc<Backend>, ProxyError>;

    fn name(&self) -> &'static str;
}
