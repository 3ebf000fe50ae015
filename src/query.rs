//! The query engine (C6): cache lookup → spatial query → filter → rank →
//! cache store → emit. The only component that reads all of C1 (distance),
//! C2 (index), C3 (store), C5 (cache), and C9 (events).

use crate::cache::TieredCache;
use crate::config::SearchConfig;
use crate::error::{GeoBankError, Result};
use crate::events::{EventSink, ProximityQueried};
use crate::geo::{haversine, Distance, GeoPoint};
use crate::index::SpatialIndex;
use crate::model::{Branch, BranchId, BranchType};
use crate::store::BranchStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Cache TTL for a `nearest:*` entry, per §4.6 step 4.
const QUERY_CACHE_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub user_location: GeoPoint,
    pub radius_km: Option<f64>,
    pub max_results: Option<usize>,
    pub branch_types: Option<Vec<BranchType>>,
    pub service_type: Option<String>,
    pub session_id: Option<String>,
    pub correlation_id: String,
}

impl SearchRequest {
    pub fn new(user_location: GeoPoint, correlation_id: impl Into<String>) -> Self {
        Self {
            user_location,
            radius_km: None,
            max_results: None,
            branch_types: None,
            service_type: None,
            session_id: None,
            correlation_id: correlation_id.into(),
        }
    }

    pub fn with_radius_km(mut self, radius_km: f64) -> Self {
        self.radius_km = Some(radius_km);
        self
    }

    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = Some(max_results);
        self
    }

    pub fn with_branch_types(mut self, branch_types: Vec<BranchType>) -> Self {
        self.branch_types = Some(branch_types);
        self
    }

    pub fn with_service_type(mut self, service_type: impl Into<String>) -> Self {
        self.service_type = Some(service_type.into());
        self
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchMatch {
    pub branch: Branch,
    pub distance_km: f64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SearchStats {
    pub total_candidates: usize,
    pub average_distance_km: f64,
    pub density_per_km2: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub matches: Vec<BranchMatch>,
    pub stats: SearchStats,
    #[serde(skip)]
    pub cache_hit: bool,
}

/// Orchestrates the nearest-branch search pipeline.
pub struct QueryEngine {
    store: Arc<dyn BranchStore>,
    index: Arc<dyn SpatialIndex>,
    cache: Arc<TieredCache>,
    events: Arc<dyn EventSink>,
    config: SearchConfig,
}

impl QueryEngine {
    pub fn new(
        store: Arc<dyn BranchStore>,
        index: Arc<dyn SpatialIndex>,
        cache: Arc<TieredCache>,
        events: Arc<dyn EventSink>,
        config: SearchConfig,
    ) -> Self {
        Self {
            store,
            index,
            cache,
            events,
            config,
        }
    }

    pub fn search(&self, request: SearchRequest) -> Result<SearchResult> {
        let started = Instant::now();

        let radius_km = resolve_radius(request.radius_km, &self.config)?;
        let max_results = resolve_max_results(request.max_results, &self.config)?;

        let key = build_cache_key(
            request.user_location,
            radius_km,
            max_results,
            request.branch_types.as_deref(),
            request.service_type.as_deref(),
        );

        if let Some(cached) = self.cache.get(&key) {
            if let Ok(mut result) = serde_json::from_str::<SearchResult>(&cached) {
                result.cache_hit = true;
                self.publish_query_event(&request, radius_km, max_results, &result, 0.0, true);
                return Ok(result);
            }
        }

        let result = self.compute(&request, radius_km, max_results)?;

        if let Ok(serialized) = serde_json::to_string(&result) {
            self.cache.put(&key, &serialized, QUERY_CACHE_TTL);
        }

        let execution_ms = started.elapsed().as_secs_f64() * 1_000.0;
        self.publish_query_event(&request, radius_km, max_results, &result, execution_ms, false);

        Ok(result)
    }

    fn compute(&self, request: &SearchRequest, radius_km: f64, max_results: usize) -> Result<SearchResult> {
        let candidate_ids = self.index.within_radius(request.user_location, radius_km)?;

        let mut operational_in_radius: Vec<(Branch, Distance)> = Vec::with_capacity(candidate_ids.len());
        for id in &candidate_ids {
            let Some(branch) = self.store.find_by_id(id)? else {
                continue;
            };
            if !branch.status.is_operational() {
                continue;
            }
            let distance = haversine(request.user_location, branch.location);
            operational_in_radius.push((branch, distance));
        }

        let stats = compute_stats(&operational_in_radius, radius_km);

        let mut filtered: Vec<(Branch, Distance)> = operational_in_radius
            .into_iter()
            .filter(|(branch, _)| branch_type_allowed(branch, request.branch_types.as_deref()))
            .filter(|(branch, _)| service_allowed(branch, request.service_type.as_deref()))
            .collect();

        filtered.sort_by(|(a_branch, a_dist), (b_branch, b_dist)| rank(a_branch, *a_dist, b_branch, *b_dist));
        filtered.truncate(max_results);

        let matches = filtered
            .into_iter()
            .map(|(branch, distance)| BranchMatch {
                branch,
                distance_km: distance.rounded_km(),
            })
            .collect();

        Ok(SearchResult {
            matches,
            stats,
            cache_hit: false,
        })
    }

    fn publish_query_event(
        &self,
        request: &SearchRequest,
        radius_km: f64,
        max_results: usize,
        result: &SearchResult,
        execution_ms: f64,
        cache_hit: bool,
    ) {
        let found_ids: Vec<BranchId> = result.matches.iter().map(|m| m.branch.id.clone()).collect();
        self.events.publish_proximity_queried(ProximityQueried::new(
            request.user_location,
            radius_km,
            max_results,
            found_ids,
            execution_ms,
            cache_hit,
            request.correlation_id.clone(),
            request.session_id.clone(),
        ));
    }
}

fn resolve_radius(requested: Option<f64>, config: &SearchConfig) -> Result<f64> {
    match requested {
        None => Ok(config.default_radius_km),
        Some(r) if r <= 0.0 => Err(GeoBankError::invalid("radiusKm", "must be greater than zero")),
        Some(r) => Ok(r.min(config.max_radius_km)),
    }
}

fn resolve_max_results(requested: Option<usize>, config: &SearchConfig) -> Result<usize> {
    match requested {
        None => Ok(config.default_max_results),
        Some(0) => Err(GeoBankError::invalid("maxResults", "must be greater than zero")),
        Some(m) => Ok(m.min(config.max_results)),
    }
}

/// `nearest:{latQ},{lonQ}:r{radius}:m{max}[:t{typesCSV}][:s{service}]`,
/// quantized to 6 decimal places per §4.6 step 1.
fn build_cache_key(
    location: GeoPoint,
    radius_km: f64,
    max_results: usize,
    branch_types: Option<&[BranchType]>,
    service_type: Option<&str>,
) -> String {
    let (lat_q, lon_q) = location.quantized(6);
    let mut key = format!("nearest:{lat_q},{lon_q}:r{radius_km}:m{max_results}");

    if let Some(types) = branch_types {
        if !types.is_empty() {
            let mut names: Vec<String> = types.iter().map(|t| t.to_string()).collect();
            names.sort_unstable();
            key.push_str(":t");
            key.push_str(&names.join(","));
        }
    }
    if let Some(service) = service_type {
        key.push_str(":s");
        key.push_str(&service.to_ascii_lowercase());
    }
    key
}

fn branch_type_allowed(branch: &Branch, branch_types: Option<&[BranchType]>) -> bool {
    match branch_types {
        None => true,
        Some(types) => types.contains(&branch.branch_type),
    }
}

fn service_allowed(branch: &Branch, service_type: Option<&str>) -> bool {
    match service_type {
        None => true,
        Some(service) => branch.supports_service(service),
    }
}

/// Primary: ascending distance (rounded to meter precision to treat
/// near-equal distances as ties). Secondary: descending `BranchType`
/// priority. Tertiary: ascending `BranchId`, for full determinism.
fn rank(a_branch: &Branch, a_dist: Distance, b_branch: &Branch, b_dist: Distance) -> std::cmp::Ordering {
    let a_meters = (a_dist.meters()).round() as i64;
    let b_meters = (b_dist.meters()).round() as i64;
    a_meters
        .cmp(&b_meters)
        .then_with(|| b_branch.branch_type.priority().cmp(&a_branch.branch_type.priority()))
        .then_with(|| a_branch.id.as_str().cmp(b_branch.id.as_str()))
}

fn compute_stats(candidates: &[(Branch, Distance)], radius_km: f64) -> SearchStats {
    let total_candidates = candidates.len();
    if total_candidates == 0 || radius_km <= 0.0 {
        return SearchStats::default();
    }

    let sum_km: f64 = candidates.iter().map(|(_, d)| d.km()).sum();
    let average_distance_km = sum_km / total_candidates as f64;
    let area_km2 = std::f64::consts::PI * radius_km * radius_km;
    let density_per_km2 = total_candidates as f64 / area_km2;

    SearchStats {
        total_candidates,
        average_distance_km,
        density_per_km2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::TieredCache;
    use crate::events::TracingEventSink;
    use crate::index::RTreeIndex;
    use crate::model::BranchId;
    use crate::store::MemoryBranchStore;

    fn engine() -> (QueryEngine, Arc<dyn BranchStore>, Arc<dyn SpatialIndex>) {
        let store: Arc<dyn BranchStore> = Arc::new(MemoryBranchStore::new());
        let index: Arc<dyn SpatialIndex> = Arc::new(RTreeIndex::new());
        let cache = Arc::new(TieredCache::l1_only(1_000));
        let events: Arc<dyn EventSink> = Arc::new(TracingEventSink);
        let engine = QueryEngine::new(store.clone(), index.clone(), cache, events, SearchConfig::default());
        (engine, store, index)
    }

    fn register(store: &Arc<dyn BranchStore>, index: &Arc<dyn SpatialIndex>, id: &str, lat: f64, lon: f64, t: BranchType) {
        let branch = Branch::new(BranchId::new(id).unwrap(), GeoPoint::new(lat, lon).unwrap(), t, "Branch", "Addr", None).unwrap();
        store.save(branch.clone()).unwrap();
        index.insert(branch.id, branch.location).unwrap();
    }

    #[test]
    fn single_branch_self_query_returns_zero_distance() {
        let (engine, store, index) = engine();
        register(&store, &index, "SP01", -23.5505, -46.6333, BranchType::Traditional);

        let request = SearchRequest::new(GeoPoint::new(-23.5505, -46.6333).unwrap(), "corr-1")
            .with_radius_km(1.0)
            .with_max_results(5);
        let result = engine.search(request).unwrap();

        assert_eq!(result.matches.len(), 1);
        assert_eq!(result.matches[0].distance_km, 0.0);
    }

    #[test]
    fn radius_excludes_distant_branch() {
        let (engine, store, index) = engine();
        register(&store, &index, "SP01", -23.5505, -46.6333, BranchType::Traditional);
        register(&store, &index, "RJ01", -22.9068, -43.1729, BranchType::Traditional);

        let request = SearchRequest::new(GeoPoint::new(-23.5505, -46.6333).unwrap(), "corr-2")
            .with_radius_km(10.0)
            .with_max_results(5);
        let result = engine.search(request).unwrap();

        assert_eq!(result.matches.len(), 1);
        assert_eq!(result.matches[0].branch.id, BranchId::new("SP01").unwrap());
    }

    #[test]
    fn zero_radius_is_rejected() {
        let (engine, _store, _index) = engine();
        let request = SearchRequest::new(GeoPoint::new(0.0, 0.0).unwrap(), "corr-3").with_radius_km(0.0);
        assert!(matches!(engine.search(request), Err(GeoBankError::InvalidInput(_))));
    }

    #[test]
    fn zero_max_results_is_rejected() {
        let (engine, _store, _index) = engine();
        let request = SearchRequest::new(GeoPoint::new(0.0, 0.0).unwrap(), "corr-4").with_max_results(0);
        assert!(matches!(engine.search(request), Err(GeoBankError::InvalidInput(_))));
    }

    #[test]
    fn max_results_above_hard_cap_is_clamped_not_rejected() {
        let (engine, _store, _index) = engine();
        let request = SearchRequest::new(GeoPoint::new(0.0, 0.0).unwrap(), "corr-5").with_max_results(51);
        assert!(engine.search(request).is_ok());
    }

    #[test]
    fn empty_branch_set_yields_zero_stats() {
        let (engine, _store, _index) = engine();
        let request = SearchRequest::new(GeoPoint::new(0.0, 0.0).unwrap(), "corr-6");
        let result = engine.search(request).unwrap();
        assert!(result.matches.is_empty());
        assert_eq!(result.stats.average_distance_km, 0.0);
        assert_eq!(result.stats.density_per_km2, 0.0);
    }

    #[test]
    fn second_identical_query_is_served_from_cache() {
        let (engine, store, index) = engine();
        register(&store, &index, "SP01", -23.5505, -46.6333, BranchType::Traditional);

        let request = || SearchRequest::new(GeoPoint::new(-23.5505, -46.6333).unwrap(), "corr-7").with_radius_km(5.0);
        let first = engine.search(request()).unwrap();
        assert!(!first.cache_hit);

        let second = engine.search(request()).unwrap();
        assert!(second.cache_hit);
        assert_eq!(second.matches.len(), 1);
    }

    #[test]
    fn service_filter_excludes_branches_lacking_capability() {
        let (engine, store, index) = engine();
        register(&store, &index, "ATM1", -23.5505, -46.6333, BranchType::AtmOnly);

        let request = SearchRequest::new(GeoPoint::new(-23.5505, -46.6333).unwrap(), "corr-8")
            .with_radius_km(1.0)
            .with_service_type("account_opening");
        let result = engine.search(request).unwrap();
        assert!(result.matches.is_empty());
    }

    #[test]
    fn type_filter_narrows_to_requested_types() {
        let (engine, store, index) = engine();
        register(&store, &index, "SP01", -23.5505, -46.6333, BranchType::Traditional);
        register(&store, &index, "SP02", -23.5506, -46.6340, BranchType::Digital);

        let request = SearchRequest::new(GeoPoint::new(-23.5505, -46.6333).unwrap(), "corr-9")
            .with_radius_km(5.0)
            .with_branch_types(vec![BranchType::Digital]);
        let result = engine.search(request).unwrap();
        assert_eq!(result.matches.len(), 1);
        assert_eq!(result.matches[0].branch.branch_type, BranchType::Digital);
    }
}
