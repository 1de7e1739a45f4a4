// src/proxy/pool.rs
use super::backend::Backend;
use crate::config::BackendConfig;
use crate::health::HealthRegistry;
use std::sync::Arc;

/// The fixed, ordered backend list together with its health registry.
#[derive(Clone)]
pub struct BackendPool {
    backends: Arc<Vec<Arc<Backend>>>,
    registry: Arc<HealthRegistry>,
}

impl BackendPool {
    pub fn new(configs: Vec<BackendConfig>) -> Self {
        let backends: Vec<Arc<Backend>> = configs
            .into_iter()
            .map(|config| Arc::new(Backend::new(config.url)))
            .collect();

        let registry = Arc::new(HealthRegistry::new(backends.iter().map(|b| b.id.clone())));

        Self {
            backends: Arc::new(backends),
            registry,
        }
    }

    pub fn registry(&self) -> &Arc<HealthRegistry> {
        &self.registry
    }

    /// All backends in configured order, healthy or not.
    pub fn all_backends(&self) -> &[Arc<Backend>] {
        &self.backends
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn pool() -> BackendPool {
        BackendPool::new(
            ["http://a:1", "http://b:2", "http://c:3"]
                .iter()
                .map(|raw| BackendConfig { url: Url::parse(raw).unwrap() })
                .collect(),
        )
    }

    #[tokio::test]
    async fn keeps_configured_order() {
        let pool = pool();
        let ids: Vec<_> = pool.all_backends().iter().map(|b| b.id.as_str()).collect();
        assert_eq!(ids, ["a:1", "b:2", "c:3"]);
        assert_eq!(pool.registry().healthy_count().await, 3);
    }

    #[tokio::test]
    async fn shares_one_registry_between_clones() {
        let pool = pool();
        let clone = pool.clone();
        clone.registry().set_unhealthy("b:2").await;

        assert!(pool.registry().is_unhealthy("b:2").await);
        assert_eq!(pool.registry().healthy_count().await, 2);
        assert_eq!(pool.len(), 3);
    }
}
