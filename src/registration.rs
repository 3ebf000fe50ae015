//! The registration engine (C7): validate → persist → update index →
//! invalidate cache → publish event. Store-before-index ordering (§4.7
//! step 5) is the linchpin of the index's rebuildability guarantee: if
//! the index write fails, the store is already correct and a background
//! reconciler (`src/reconciler.rs`) repairs the gap.

use crate::config::RegistrationConfig;
use crate::error::{GeoBankError, Result};
use crate::events::{BranchRegistered, EventSink};
use crate::geo::GeoPoint;
use crate::index::SpatialIndex;
use crate::model::{Branch, BranchId, BranchType};
use crate::store::BranchStore;
use crate::validator;
use std::sync::Arc;
use tracing::warn;

pub struct RegistrationRequest {
    pub id: Option<BranchId>,
    pub name: String,
    pub location: GeoPoint,
    pub branch_type: BranchType,
    pub address: String,
    pub contact_phone: Option<String>,
    pub correlation_id: String,
}

impl RegistrationRequest {
    pub fn new(
        name: impl Into<String>,
        location: GeoPoint,
        branch_type: BranchType,
        address: impl Into<String>,
        correlation_id: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            name: name.into(),
            location,
            branch_type,
            address: address.into(),
            contact_phone: None,
            correlation_id: correlation_id.into(),
        }
    }

    pub fn with_id(mut self, id: BranchId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_contact_phone(mut self, phone: impl Into<String>) -> Self {
        self.contact_phone = Some(phone.into());
        self
    }
}

/// Orchestrates branch registration.
pub struct RegistrationEngine {
    store: Arc<dyn BranchStore>,
    index: Arc<dyn SpatialIndex>,
    cache: Arc<crate::cache::TieredCache>,
    events: Arc<dyn EventSink>,
    config: RegistrationConfig,
}

impl RegistrationEngine {
    pub fn new(
        store: Arc<dyn BranchStore>,
        index: Arc<dyn SpatialIndex>,
        cache: Arc<crate::cache::TieredCache>,
        events: Arc<dyn EventSink>,
        config: RegistrationConfig,
    ) -> Self {
        Self {
            store,
            index,
            cache,
            events,
            config,
        }
    }

    pub fn register(&self, request: RegistrationRequest) -> Result<Branch> {
        let id = match request.id {
            Some(id) => id,
            None => BranchId::generate(),
        };

        // Step 1: validate input shape. `Branch::new` already enforces
        // name/address/phone bounds and the GeoPoint invariant is
        // enforced at construction, before this function is ever called.
        let candidate = Branch::new(
            id,
            request.location,
            request.branch_type,
            request.name,
            request.address,
            request.contact_phone,
        )?;

        // Step 2-3: business rules, against operational branches nearby.
        let nearby_for_min_distance = self.operational_within(candidate.location, self.config.min_inter_branch_km)?;
        let nearby_for_saturation = self.operational_within(candidate.location, self.config.saturation_radius_km)?;
        validator::validate_registration(&candidate, &nearby_for_min_distance, &nearby_for_saturation)?;

        // Step 5: store first, index second, so a concurrent reader never
        // observes the index ahead of the store.
        let stored = self.store.save(candidate.clone())?;

        if let Err(err) = self.index.insert(stored.id.clone(), stored.location) {
            warn!(branch_id = %stored.id, error = %err, "INDEX_DESYNC");
        }

        // Step 6: invalidate everything a stale answer could have been
        // served from. `nearest:*` covers every proximity answer;
        // `branches:*` covers any branch-listing namespace a caller might
        // maintain on top of this crate.
        self.cache.evict_by_pattern("nearest:*");
        self.cache.evict_by_pattern("branches:*");

        // Step 7: publish, fire-and-forget.
        self.events.publish_branch_registered(BranchRegistered::new(
            stored.id.clone(),
            stored.name.clone(),
            stored.branch_type,
            stored.location,
            request.correlation_id,
        ));

        Ok(stored)
    }

    fn operational_within(&self, location: GeoPoint, radius_km: f64) -> Result<Vec<Branch>> {
        let ids = self.index.within_radius(location, radius_km)?;
        let mut branches = Vec::with_capacity(ids.len());
        for id in &ids {
            if let Some(branch) = self.store.find_by_id(id)? {
                if branch.status.is_operational() {
                    branches.push(branch);
                }
            }
        }
        Ok(branches)
    }
}

/// Validate and apply a status transition to an already-registered
/// branch — the administrative flow named in §4.4's status-transition
/// validator, kept separate from the hot registration path.
pub fn transition_branch(
    store: &dyn BranchStore,
    id: &BranchId,
    target: crate::model::BranchStatus,
) -> Result<Branch> {
    let mut branch = store
        .find_by_id(id)?
        .ok_or_else(|| GeoBankError::invalid("id", "no branch with this id"))?;

    validator::validate_transition(branch.status, target)?;
    branch.transition(target)?;
    store.save(branch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::TieredCache;
    use crate::events::TracingEventSink;
    use crate::index::RTreeIndex;
    use crate::model::BranchStatus;
    use crate::store::MemoryBranchStore;

    fn engine() -> RegistrationEngine {
        let store: Arc<dyn BranchStore> = Arc::new(MemoryBranchStore::new());
        let index: Arc<dyn SpatialIndex> = Arc::new(RTreeIndex::new());
        let cache = Arc::new(TieredCache::l1_only(100));
        let events: Arc<dyn EventSink> = Arc::new(TracingEventSink);
        RegistrationEngine::new(store, index, cache, events, RegistrationConfig::default())
    }

    #[test]
    fn registers_a_branch_with_generated_id() {
        let engine = engine();
        let request = RegistrationRequest::new(
            "Branch A",
            GeoPoint::new(-23.5505, -46.6333).unwrap(),
            BranchType::Traditional,
            "Address 1",
            "corr-1",
        );

        let stored = engine.register(request).unwrap();
        assert_eq!(stored.name, "Branch A");
        assert_eq!(stored.status, BranchStatus::Active);
    }

    #[test]
    fn rejects_a_branch_too_close_to_an_existing_one() {
        let engine = engine();
        engine
            .register(RegistrationRequest::new(
                "Branch A",
                GeoPoint::new(-23.5505, -46.6333).unwrap(),
                BranchType::Traditional,
                "Address 1",
                "corr-2",
            ))
            .unwrap();

        let second = engine.register(RegistrationRequest::new(
            "Branch A'",
            GeoPoint::new(-23.5506, -46.6334).unwrap(),
            BranchType::Traditional,
            "Address 2",
            "corr-3",
        ));

        assert!(second.is_err());
    }

    #[test]
    fn registration_invalidates_cached_proximity_answers() {
        let engine = engine();
        engine.cache.put("nearest:0,0:r10:m10", "stale", std::time::Duration::from_secs(60));

        engine
            .register(RegistrationRequest::new(
                "Branch A",
                GeoPoint::new(-23.5505, -46.6333).unwrap(),
                BranchType::Traditional,
                "Address 1",
                "corr-4",
            ))
            .unwrap();

        assert!(engine.cache.get("nearest:0,0:r10:m10").is_none());
    }

    /// 10 ATMs placed on a ~2 km-radius circle around the center, each
    /// ~1.26 km apart along the circle (well clear of the 0.5 km minimum
    /// inter-branch distance), all within the 5 km saturation radius of a
    /// `TRADITIONAL` candidate registered at the center — §8 scenario 5.
    fn ring_of_atms(engine: &RegistrationEngine, center_lat: f64, center_lon: f64, radius_km: f64) {
        let lat_rad = center_lat.to_radians();
        let deg_radius_lat = radius_km / 111.0;
        let deg_radius_lon = radius_km / (111.0 * lat_rad.cos());

        for i in 0..10 {
            let angle = (i as f64) * std::f64::consts::TAU / 10.0;
            let lat = center_lat + deg_radius_lat * angle.sin();
            let lon = center_lon + deg_radius_lon * angle.cos();
            engine
                .register(RegistrationRequest::new(
                    format!("ATM {i}"),
                    GeoPoint::new(lat, lon).unwrap(),
                    BranchType::AtmOnly,
                    "Address",
                    format!("corr-atm-{i}"),
                ))
                .unwrap();
        }
    }

    #[test]
    fn saturation_rule_rejects_a_tenth_traditional_branch_in_area() {
        let engine = engine();
        ring_of_atms(&engine, -23.55, -46.63, 2.0);

        let result = engine.register(RegistrationRequest::new(
            "Central",
            GeoPoint::new(-23.55, -46.63).unwrap(),
            BranchType::Traditional,
            "Central Address",
            "corr-central",
        ));
        assert!(matches!(
            result,
            Err(GeoBankError::RuleViolated(crate::error::RuleTag::AreaSaturated { .. }))
        ));
    }

    #[test]
    fn saturation_rule_does_not_block_a_non_traditional_branch_at_the_same_center() {
        let engine = engine();
        ring_of_atms(&engine, -23.55, -46.63, 2.0);

        let result = engine.register(RegistrationRequest::new(
            "Central ATM",
            GeoPoint::new(-23.55, -46.63).unwrap(),
            BranchType::AtmOnly,
            "Central Address",
            "corr-central-atm",
        ));
        assert!(result.is_ok());
    }
}
