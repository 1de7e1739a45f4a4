// src/health/registry.rs
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;

/// Which backends are currently excluded from selection, and how many are not.
///
/// Flags and count live behind a single lock so they can never disagree:
/// `healthy_count` always equals the number of known backends without an
/// unhealthy flag, and therefore stays within `0..=total`.
#[derive(Debug)]
pub struct HealthRegistry {
    known: HashSet<String>,
    state: RwLock<HealthState>,
}

#[derive(Debug)]
struct HealthState {
    // Entries appear on the first transition; a missing entry means healthy.
    unhealthy: HashMap<String, bool>,
    healthy_count: usize,
}

impl HealthRegistry {
    /// Every backend starts out healthy.
    pub fn new<I>(ids: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let known: HashSet<String> = ids.into_iter().collect();
        let healthy_count = known.len();

        Self {
            known,
            state: RwLock::new(HealthState {
                unhealthy: HashMap::new(),
                healthy_count,
            }),
        }
    }

    /// Clear the unhealthy flag. Returns `true` if this was a transition.
    pub async fn set_healthy(&self, id: &str) -> bool {
        if !self.known.contains(id) {
            tracing::warn!(backend = id, "ignoring health update for unknown backend");
            return false;
        }

        let mut guard = self.state.write().await;
        let state = &mut *guard;
        match state.unhealthy.get_mut(id) {
            Some(flag) if *flag => {
                *flag = false;
                state.healthy_count += 1;
                true
            }
            _ => false,
        }
    }

    /// Set the unhealthy flag. Returns `true` if this was a transition.
    pub async fn set_unhealthy(&self, id: &str) -> bool {
        if !self.known.contains(id) {
            tracing::warn!(backend = id, "ignoring health update for unknown backend");
            return false;
        }

        let mut guard = self.state.write().await;
        let state = &mut *guard;
        let flag = state.unhealthy.entry(id.to_string()).or_insert(false);
        if *flag {
            return false;
        }
        *flag = true;
        state.healthy_count -= 1;
        true
    }

    pub async fn is_unhealthy(&self, id: &str) -> bool {
        self.state
            .read()
            .await
            .unhealthy
            .get(id)
            .copied()
            .unwrap_or(false)
    }

    pub async fn healthy_count(&self) -> usize {
        self.state.read().await.healthy_count
    }

    /// Number of backends the registry tracks.
    pub fn total(&self) -> usize {
        self.known.len()
    }
}
