// src/load_balancer/round_robin.rs
use crate::load_balancer::LoadBalancer;
use crate::proxy::{Backend, BackendPool, ProxyError};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Strict round robin over the configured order. Unhealthy slots are skipped
/// but keep their place in the cycle, so a recovered backend is picked again
/// at its original position.
pub struct RoundRobinBalancer {
    counter: AtomicUsize,
}

impl RoundRobinBalancer {
    pub fn new() -> Self {
        Self {
            counter: AtomicUsize::new(0),
        }
    }

    fn next_index(&self, len: usize) -> usize {
        // Wraps on overflow; only the remainder matters.
        self.counter.fetch_add(1, Ordering::Relaxed) % len
    }
}

impl Default for RoundRobinBalancer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LoadBalancer for RoundRobinBalancer {
    async fn select_backend(&self, pool: &BackendPool) -> Result<Arc<Backend>, ProxyError> {
        let backends = pool.all_backends();
        let registry = pool.registry();
        if backends.is_empty() {
            return Err(ProxyError::NoHealthyBackends);
        }

        let mut index = 0;
        for _ in 0..backends.len() {
            if registry.healthy_count().await == 0 {
                return Err(ProxyError::NoHealthyBackends);
            }

            index = self.next_index(backends.len());
            let candidate = &backends[index];
            if !registry.is_unhealthy(&candidate.id).await {
                return Ok(candidate.clone());
            }
        }

        // Concurrent selections or flapping health kept us on unhealthy slots
        // for a whole lap. Walk the list once from where we stopped so the
        // call always terminates.
        for offset in 1..=backends.len() {
            let candidate = &backends[(index + offset) % backends.len()];
            if !registry.is_unhealthy(&candidate.id).await {
                return Ok(candidate.clone());
            }
        }

        Err(ProxyError::NoHealthyBackends)
    }

    fn name(&self) -> &'static str {
        "round_robin"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendConfig;
    use url::Url;

    fn pool(n: usize) -> BackendPool {
        BackendPool::new(
            (0..n)
                .map(|i| BackendConfig {
                    url: Url::parse(&format!("http://backend-{}:80", i)).unwrap(),
                })
                .collect(),
        )
    }

    async fn pick(lb: &RoundRobinBalancer, pool: &BackendPool) -> String {
        lb.select_backend(pool).await.unwrap().id.clone()
    }

    #[tokio::test]
    async fn cycles_in_configured_order() {
        let pool = pool(3);
        let lb = RoundRobinBalancer::new();

        let mut picks = Vec::new();
        for _ in 0..6 {
            picks.push(pick(&lb, &pool).await);
        }
        assert_eq!(
            picks,
            [
                "backend-0:80", "backend-1:80", "backend-2:80",
                "backend-0:80", "backend-1:80", "backend-2:80",
            ]
        );
    }

    #[tokio::test]
    async fn skips_unhealthy_slots() {
        let pool = pool(3);
        pool.registry().set_unhealthy("backend-1:80").await;
        let lb = RoundRobinBalancer::new();

        for _ in 0..30 {
            assert_ne!(pick(&lb, &pool).await, "backend-1:80");
        }
    }

    #[tokio::test]
    async fn all_unhealthy_is_an_error_every_time() {
        let pool = pool(2);
        pool.registry().set_unhealthy("backend-0:80").await;
        pool.registry().set_unhealthy("backend-1:80").await;
        let lb = RoundRobinBalancer::new();

        for _ in 0..5 {
            assert!(matches!(
                lb.select_backend(&pool).await,
                Err(ProxyError::NoHealthyBackends)
            ));
        }

        pool.registry().set_healthy("backend-1:80").await;
        assert_eq!(pick(&lb, &pool).await, "backend-1:80");
    }

    #[tokio::test]
    async fn recovered_backend_resumes_its_position() {
        let pool = pool(3);
        let lb = RoundRobinBalancer::new();

        pool.registry().set_unhealthy("backend-1:80").await;
        assert_eq!(pick(&lb, &pool).await, "backend-0:80");
        // Slot 1 is skipped, cursor moves on to slot 2.
        assert_eq!(pick(&lb, &pool).await, "backend-2:80");

        pool.registry().set_healthy("backend-1:80").await;
        let picks = vec![
            pick(&lb, &pool).await,
            pick(&lb, &pool).await,
            pick(&lb, &pool).await,
        ];
        assert_eq!(picks, ["backend-0:80", "backend-1:80", "backend-2:80"]);
    }

    #[tokio::test]
    async fn cursor_wraps_on_overflow() {
        let pool = pool(3);
        let lb = RoundRobinBalancer {
            counter: AtomicUsize::new(usize::MAX),
        };

        let first = pick(&lb, &pool).await;
        assert_eq!(first, format!("backend-{}:80", usize::MAX % 3));
        assert_eq!(pick(&lb, &pool).await, "backend-0:80");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_selection_with_one_healthy_backend() {
        let pool = pool(4);
        for i in [0, 1, 3] {
            pool.registry().set_unhealthy(&format!("backend-{}:80", i)).await;
        }
        let lb = Arc::new(RoundRobinBalancer::new());

        let mut tasks = Vec::new();
        for _ in 0..64 {
            let lb = lb.clone();
            let pool = pool.clone();
            tasks.push(tokio::spawn(async move {
                lb.select_backend(&pool).await.map(|b| b.id.clone())
            }));
        }

        for task in futures::future::join_all(tasks).await {
            assert_eq!(task.unwrap().unwrap(), "backend-2:80");
        }
    }

    #[test]
    fn reports_its_name() {
        assert_eq!(RoundRobinBalancer::new().name(), "round_robin");
    }
}
