//! The background reconciler (§4.7a): periodically diffs the spatial
//! index against the branch store and repairs any divergence left behind
//! by an `INDEX_DESYNC` (index write failed after a successful store
//! write). Runs on the same [`crate::scheduler::Ticker`] abstraction as
//! the C8 scheduler, on its own worker thread and its own interval.

use crate::error::Result;
use crate::index::SpatialIndex;
use crate::scheduler::Ticker;
use crate::store::BranchStore;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::warn;

/// Compute the store-vs-index symmetric difference and repair it:
/// insert any store id missing from the index, remove any indexed id
/// with no backing store record. Returns the number of ids repaired.
pub fn reconcile_once(store: &dyn BranchStore, index: &dyn SpatialIndex) -> Result<usize> {
    let store_branches = store.find_all()?;
    let store_ids: HashSet<_> = store_branches.iter().map(|b| b.id.clone()).collect();

    let mut repaired = 0usize;

    for branch in &store_branches {
        // A tiny non-zero probe radius rather than exactly 0.0, so the
        // bounding-box pre-filter never degenerates to a zero-area box.
        let already_indexed = index
            .within_radius(branch.location, 0.001)?
            .iter()
            .any(|id| id == &branch.id);
        if !already_indexed {
            index.insert(branch.id.clone(), branch.location)?;
            warn!(branch_id = %branch.id, "INDEX_DESYNC_REPAIRED");
            repaired += 1;
        }
    }

    for indexed_id in index.ids()? {
        if !store_ids.contains(&indexed_id) {
            index.remove(&indexed_id)?;
            warn!(branch_id = %indexed_id, "INDEX_ORPHAN_REMOVED");
            repaired += 1;
        }
    }

    Ok(repaired)
}

/// Background worker: calls [`reconcile_once`] on every tick until
/// shutdown.
pub struct Reconciler {
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Reconciler {
    pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(300);

    pub fn spawn(
        mut ticker: impl Ticker + 'static,
        store: Arc<dyn BranchStore>,
        index: Arc<dyn SpatialIndex>,
    ) -> Self {
        let shutdown = Arc::new(AtomicBool::new(false));
        let worker_shutdown = shutdown.clone();

        let handle = std::thread::spawn(move || {
            while ticker.wait_for_tick(&worker_shutdown) {
                match reconcile_once(store.as_ref(), index.as_ref()) {
                    Ok(0) => {}
                    Ok(repaired) => warn!(repaired, "reconciliation cycle repaired desynced entries"),
                    Err(err) => warn!(error = %err, "reconciliation cycle failed"),
                }
            }
        });

        Self {
            shutdown,
            handle: Some(handle),
        }
    }

    pub fn shutdown(mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Reconciler {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::GeoPoint;
    use crate::index::RTreeIndex;
    use crate::model::{Branch, BranchId, BranchType};
    use crate::store::MemoryBranchStore;

    fn branch_at(id: &str, lat: f64, lon: f64) -> Branch {
        Branch::new(
            BranchId::new(id).unwrap(),
            GeoPoint::new(lat, lon).unwrap(),
            BranchType::Traditional,
            "Branch",
            "Address",
            None,
        )
        .unwrap()
    }

    #[test]
    fn repairs_an_id_present_in_store_but_missing_from_index() {
        let store = MemoryBranchStore::new();
        let index = RTreeIndex::new();
        let branch = branch_at("SP01", -23.5505, -46.6333);
        store.save(branch.clone()).unwrap();

        assert_eq!(index.len().unwrap(), 0);
        let repaired = reconcile_once(&store, &index).unwrap();
        assert_eq!(repaired, 1);
        assert_eq!(index.len().unwrap(), 1);
    }

    #[test]
    fn repairs_an_id_present_in_index_but_missing_from_store() {
        let store = MemoryBranchStore::new();
        let index = RTreeIndex::new();
        let branch = branch_at("SP01", -23.5505, -46.6333);
        index.insert(branch.id.clone(), branch.location).unwrap();

        assert_eq!(index.len().unwrap(), 1);
        let repaired = reconcile_once(&store, &index).unwrap();
        assert_eq!(repaired, 1);
        assert_eq!(index.len().unwrap(), 0);
    }

    #[test]
    fn a_fully_synced_store_and_index_need_no_repair() {
        let store = MemoryBranchStore::new();
        let index = RTreeIndex::new();
        let branch = branch_at("SP01", -23.5505, -46.6333);
        store.save(branch.clone()).unwrap();
        index.insert(branch.id.clone(), branch.location).unwrap();

        assert_eq!(reconcile_once(&store, &index).unwrap(), 0);
    }
}
