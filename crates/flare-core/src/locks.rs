use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::engine::ToggleKind;

/// Per-target mutual exclusion for toggle read-modify-write sequences.
///
/// One async mutex per (target, kind) pair: toggles against different
/// targets run concurrently, toggles against the same target serialize.
/// The registry itself is guarded by a std mutex held only long enough
/// to clone the Arc — never across an await point.
#[derive(Default)]
pub struct TargetLocks {
    inner: StdMutex<HashMap<(Uuid, ToggleKind), Arc<Mutex<()>>>>,
}

impl TargetLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, target: Uuid, kind: ToggleKind) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().expect("target lock registry poisoned");
            map.entry((target, kind))
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    /// Drop the registry entry for a deleted target. Holders of an
    /// already-acquired guard keep the underlying mutex alive until the
    /// guard drops.
    pub fn discard(&self, target: Uuid, kind: ToggleKind) {
        self.inner
            .lock()
            .expect("target lock registry poisoned")
            .remove(&(target, kind));
    }
}
