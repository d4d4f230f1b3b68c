use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::keys::CacheKey;

/// Per-key gates that let one render serve every concurrent miss.
#[derive(Default, Clone)]
pub struct InFlightRenders {
    gates: Arc<DashMap<CacheKey, Arc<Mutex<()>>>>,
}

impl InFlightRenders {
    pub fn new() -> Self {
        Self {
            gates: Arc::new(DashMap::new()),
        }
    }

    /// Wait for exclusive use of `key`. The returned flag is true when another
    /// holder was active, so the caller should re-check the store first.
    pub async fn acquire(&self, key: &CacheKey) -> (RenderGuard, bool) {
        let gate = self
            .gates
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let (permit, waited) = match gate.clone().try_lock_owned() {
            Ok(permit) => (permit, false),
            Err(_) => (gate.clone().lock_owned().await, true),
        };

        (
            RenderGuard {
                key: key.clone(),
                gate,
                gates: Arc::clone(&self.gates),
                permit: Some(permit),
            },
            waited,
        )
    }

    pub fn len(&self) -> usize {
        self.gates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gates.is_empty()
    }
}

pub struct RenderGuard {
    key: CacheKey,
    gate: Arc<Mutex<()>>,
    gates: Arc<DashMap<CacheKey, Arc<Mutex<()>>>>,
    permit: Option<OwnedMutexGuard<()>>,
}

impl Drop for RenderGuard {
    fn drop(&mut self) {
        self.permit.take();
        // Drop the gate once nobody else holds or awaits it.
        self.gates
            .remove_if(&self.key, |_, gate| {
                Arc::ptr_eq(gate, &self.gate) && Arc::strong_count(gate) <= 2
            });
    }
}
