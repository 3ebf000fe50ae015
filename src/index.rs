//! The spatial index (C2): R-tree-backed radius and k-nearest queries over
//! branch locations.
//!
//! `insert`/`remove`/`update` take a write lock; `within_radius` and
//! `k_nearest` take a read lock, so many concurrent readers never block on
//! each other, only briefly on a writer. The index is rebuildable from the
//! branch store on startup via [`RTreeIndex::rebuild`].

use crate::error::{GeoBankError, Result};
use crate::geo::{haversine, Distance, GeoPoint};
use crate::model::BranchId;
use rstar::{PointDistance, RTree, RTreeObject, AABB};
use std::collections::HashMap;
use std::sync::RwLock;

/// Degrees of latitude per kilometer, used only to size the bounding-box
/// pre-filter; the final admission test always uses the Haversine kernel.
const KM_PER_DEGREE_LAT: f64 = 111.0;

#[derive(Debug, Clone, PartialEq)]
struct Entry {
    id: BranchId,
    // (lon, lat) — rstar's envelope arithmetic doesn't care about axis
    // naming, but keeping (x, y) = (lon, lat) matches the rest of the geo
    // ecosystem's convention.
    xy: [f64; 2],
}

impl RTreeObject for Entry {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point(self.xy)
    }
}

impl PointDistance for Entry {
    fn distance_2(&self, point: &[f64; 2]) -> f64 {
        let dx = self.xy[0] - point[0];
        let dy = self.xy[1] - point[1];
        dx * dx + dy * dy
    }
}

/// Capability seam for the spatial index, per the design's policy of
/// passing narrow traits into the query and registration engines rather
/// than concrete types.
pub trait SpatialIndex: Send + Sync {
    fn insert(&self, id: BranchId, point: GeoPoint) -> Result<()>;
    fn remove(&self, id: &BranchId) -> Result<()>;
    fn update(&self, id: BranchId, new_point: GeoPoint) -> Result<()>;
    fn within_radius(&self, center: GeoPoint, radius_km: f64) -> Result<Vec<BranchId>>;
    fn k_nearest(&self, center: GeoPoint, k: usize, radius_km: f64) -> Result<Vec<(BranchId, Distance)>>;
    /// Every id currently held by the index, for reconciliation against
    /// the branch store.
    fn ids(&self) -> Result<Vec<BranchId>>;
    fn len(&self) -> Result<usize>;
    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

/// The production spatial index: an `rstar::RTree` guarded by a
/// `RwLock`, with a side table tracking each id's current point so
/// `remove`/`update` don't require a full scan.
pub struct RTreeIndex {
    tree: RwLock<RTree<Entry>>,
    locations: RwLock<HashMap<BranchId, GeoPoint>>,
}

impl RTreeIndex {
    pub fn new() -> Self {
        Self {
            tree: RwLock::new(RTree::new()),
            locations: RwLock::new(HashMap::new()),
        }
    }

    /// Rebuild the index from scratch given the full set of (id, point)
    /// pairs — used on startup once the branch store has been replayed,
    /// and by the background reconciler to repair desync.
    pub fn rebuild(&self, entries: impl IntoIterator<Item = (BranchId, GeoPoint)>) -> Result<()> {
        let mut locations = HashMap::new();
        let mut rtree_entries = Vec::new();
        for (id, point) in entries {
            rtree_entries.push(Entry {
                xy: [point.lon(), point.lat()],
                id: id.clone(),
            });
            locations.insert(id, point);
        }

        let mut tree_guard = self
            .tree
            .write()
            .map_err(|_| GeoBankError::SearchUnavailable("index write lock poisoned".into()))?;
        let mut loc_guard = self
            .locations
            .write()
            .map_err(|_| GeoBankError::SearchUnavailable("index write lock poisoned".into()))?;
        *tree_guard = RTree::bulk_load(rtree_entries);
        *loc_guard = locations;
        Ok(())
    }

    fn bounding_box(center: GeoPoint, radius_km: f64) -> AABB<[f64; 2]> {
        let dlat = radius_km / KM_PER_DEGREE_LAT;
        let lat_rad = center.lat().to_radians();
        // Guard against the cos(lat) denominator collapsing near the poles.
        let cos_lat = lat_rad.cos().abs().max(1e-6);
        let dlon = radius_km / (KM_PER_DEGREE_LAT * cos_lat);

        let lower = [
            (center.lon() - dlon).max(GeoPoint::MIN_LON),
            (center.lat() - dlat).max(GeoPoint::MIN_LAT),
        ];
        let upper = [
            (center.lon() + dlon).min(GeoPoint::MAX_LON),
            (center.lat() + dlat).min(GeoPoint::MAX_LAT),
        ];
        AABB::from_corners(lower, upper)
    }
}

impl Default for RTreeIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl SpatialIndex for RTreeIndex {
    fn insert(&self, id: BranchId, point: GeoPoint) -> Result<()> {
        let mut tree = self
            .tree
            .write()
            .map_err(|_| GeoBankError::SearchUnavailable("index write lock poisoned".into()))?;
        let mut locations = self
            .locations
            .write()
            .map_err(|_| GeoBankError::SearchUnavailable("index write lock poisoned".into()))?;

        tree.insert(Entry {
            xy: [point.lon(), point.lat()],
            id: id.clone(),
        });
        locations.insert(id, point);
        Ok(())
    }

    fn remove(&self, id: &BranchId) -> Result<()> {
        let mut tree = self
            .tree
            .write()
            .map_err(|_| GeoBankError::SearchUnavailable("index write lock poisoned".into()))?;
        let mut locations = self
            .locations
            .write()
            .map_err(|_| GeoBankError::SearchUnavailable("index write lock poisoned".into()))?;

        if let Some(point) = locations.remove(id) {
            tree.remove(&Entry {
                xy: [point.lon(), point.lat()],
                id: id.clone(),
            });
        }
        Ok(())
    }

    fn update(&self, id: BranchId, new_point: GeoPoint) -> Result<()> {
        self.remove(&id)?;
        self.insert(id, new_point)
    }

    fn within_radius(&self, center: GeoPoint, radius_km: f64) -> Result<Vec<BranchId>> {
        let tree = self
            .tree
            .read()
            .map_err(|_| GeoBankError::SearchUnavailable("index read lock poisoned".into()))?;

        let envelope = Self::bounding_box(center, radius_km);
        let mut matches = Vec::new();
        for entry in tree.locate_in_envelope(&envelope) {
            let candidate = GeoPoint::new(entry.xy[1], entry.xy[0]).expect("indexed point was valid on insert");
            if haversine(center, candidate).km() <= radius_km {
                matches.push(entry.id.clone());
            }
        }
        Ok(matches)
    }

    fn k_nearest(&self, center: GeoPoint, k: usize, radius_km: f64) -> Result<Vec<(BranchId, Distance)>> {
        let tree = self
            .tree
            .read()
            .map_err(|_| GeoBankError::SearchUnavailable("index read lock poisoned".into()))?;

        let envelope = Self::bounding_box(center, radius_km);
        let mut matches: Vec<(BranchId, Distance)> = Vec::new();
        for entry in tree.locate_in_envelope(&envelope) {
            let candidate = GeoPoint::new(entry.xy[1], entry.xy[0]).expect("indexed point was valid on insert");
            let d = haversine(center, candidate);
            if d.km() <= radius_km {
                matches.push((entry.id.clone(), d));
            }
        }
        matches.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.as_str().cmp(b.0.as_str())));
        matches.truncate(k);
        Ok(matches)
    }

    fn ids(&self) -> Result<Vec<BranchId>> {
        let locations = self
            .locations
            .read()
            .map_err(|_| GeoBankError::SearchUnavailable("index read lock poisoned".into()))?;
        Ok(locations.keys().cloned().collect())
    }

    fn len(&self) -> Result<usize> {
        let tree = self
            .tree
            .read()
            .map_err(|_| GeoBankError::SearchUnavailable("index read lock poisoned".into()))?;
        Ok(tree.size())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pt(lat: f64, lon: f64) -> GeoPoint {
        GeoPoint::new(lat, lon).unwrap()
    }

    fn id(code: &str) -> BranchId {
        BranchId::new(code).unwrap()
    }

    #[test]
    fn insert_and_within_radius_finds_nearby_point() {
        let index = RTreeIndex::new();
        index.insert(id("SP01"), pt(-23.5505, -46.6333)).unwrap();
        index.insert(id("SP02"), pt(-23.5515, -46.6340)).unwrap();
        index.insert(id("RJ01"), pt(-22.9068, -43.1729)).unwrap();

        let found = index.within_radius(pt(-23.5505, -46.6333), 5.0).unwrap();
        assert!(found.contains(&id("SP01")));
        assert!(found.contains(&id("SP02")));
        assert!(!found.contains(&id("RJ01")));
    }

    #[test]
    fn remove_drops_point_from_subsequent_queries() {
        let index = RTreeIndex::new();
        let a = id("SP01");
        index.insert(a.clone(), pt(-23.5505, -46.6333)).unwrap();
        index.remove(&a).unwrap();

        let found = index.within_radius(pt(-23.5505, -46.6333), 5.0).unwrap();
        assert!(found.is_empty());
        assert_eq!(index.len().unwrap(), 0);
    }

    #[test]
    fn update_moves_point_to_new_location() {
        let index = RTreeIndex::new();
        let a = id("SP01");
        index.insert(a.clone(), pt(-23.5505, -46.6333)).unwrap();
        index.update(a.clone(), pt(-22.9068, -43.1729)).unwrap();

        assert!(index.within_radius(pt(-23.5505, -46.6333), 5.0).unwrap().is_empty());
        assert!(index.within_radius(pt(-22.9068, -43.1729), 5.0).unwrap().contains(&a));
    }

    #[test]
    fn k_nearest_orders_by_ascending_distance_then_id() {
        let index = RTreeIndex::new();
        let center = pt(0.0, 0.0);
        index.insert(id("FAR1"), pt(0.05, 0.0)).unwrap();
        index.insert(id("NEAR"), pt(0.01, 0.0)).unwrap();
        index.insert(id("FAR2"), pt(0.05, 0.01)).unwrap();

        let results = index.k_nearest(center, 2, 50.0).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, id("NEAR"));
        assert!(results[0].1 < results[1].1);
    }

    #[test]
    fn bounding_box_prefilter_does_not_admit_false_positives_at_high_latitude() {
        let index = RTreeIndex::new();
        // Two points at the same latitude, far apart in longitude near the pole
        // where a naive degree-box would massively over-admit.
        let near_pole = pt(89.9, 0.0);
        let far_point = pt(89.9, 170.0);
        index.insert(id("POLE"), far_point).unwrap();

        let found = index.within_radius(near_pole, 50.0).unwrap();
        assert!(found.is_empty());
    }

    #[test]
    fn ids_lists_every_indexed_id() {
        let index = RTreeIndex::new();
        index.insert(id("SP01"), pt(-23.5505, -46.6333)).unwrap();
        index.insert(id("RJ01"), pt(-22.9068, -43.1729)).unwrap();

        let mut ids = index.ids().unwrap();
        ids.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        assert_eq!(ids, vec![id("RJ01"), id("SP01")]);
    }

    #[test]
    fn rebuild_replaces_all_entries() {
        let index = RTreeIndex::new();
        index.insert(id("OLD1"), pt(0.0, 0.0)).unwrap();

        index
            .rebuild(vec![(id("NEW1"), pt(1.0, 1.0)), (id("NEW2"), pt(2.0, 2.0))])
            .unwrap();

        assert_eq!(index.len().unwrap(), 2);
        assert!(index.within_radius(pt(0.0, 0.0), 1.0).unwrap().is_empty());
        assert!(!index.within_radius(pt(1.0, 1.0), 1.0).unwrap().is_empty());
    }
}
