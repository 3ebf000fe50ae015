//! The event sink (C9): fire-and-forget domain events for external
//! audit/analytics consumers. Publication failure is logged and absorbed
//! — it never affects the outcome of the query or registration engine
//! calls that emit these events.

use crate::geo::GeoPoint;
use crate::model::{BranchId, BranchType};
use serde::Serialize;
use std::time::SystemTime;
use tracing::warn;

const EVENT_SCHEMA_VERSION: &str = "1.0";

#[derive(Debug, Clone, Serialize)]
pub struct BranchRegistered {
    pub event_type: &'static str,
    pub version: &'static str,
    pub branch_id: BranchId,
    pub branch_name: String,
    pub branch_type: BranchType,
    pub latitude: f64,
    pub longitude: f64,
    pub occurred_at: SystemTime,
    pub correlation_id: String,
}

impl BranchRegistered {
    pub fn new(
        branch_id: BranchId,
        branch_name: impl Into<String>,
        branch_type: BranchType,
        location: GeoPoint,
        correlation_id: impl Into<String>,
    ) -> Self {
        Self {
            event_type: "BRANCH_REGISTERED",
            version: EVENT_SCHEMA_VERSION,
            branch_id,
            branch_name: branch_name.into(),
            branch_type,
            latitude: location.lat(),
            longitude: location.lon(),
            occurred_at: SystemTime::now(),
            correlation_id: correlation_id.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProximityQueried {
    pub event_type: &'static str,
    pub version: &'static str,
    pub user_latitude: f64,
    pub user_longitude: f64,
    pub radius_km: f64,
    pub max_results: usize,
    pub found_branch_ids: Vec<BranchId>,
    pub execution_time_ms: f64,
    pub cache_hit: bool,
    pub occurred_at: SystemTime,
    pub correlation_id: String,
    pub session_id: Option<String>,
}

#[allow(clippy::too_many_arguments)]
impl ProximityQueried {
    pub fn new(
        user_location: GeoPoint,
        radius_km: f64,
        max_results: usize,
        found_branch_ids: Vec<BranchId>,
        execution_time_ms: f64,
        cache_hit: bool,
        correlation_id: impl Into<String>,
        session_id: Option<String>,
    ) -> Self {
        Self {
            event_type: "PROXIMITY_QUERIED",
            version: EVENT_SCHEMA_VERSION,
            user_latitude: user_location.lat(),
            user_longitude: user_location.lon(),
            radius_km,
            max_results,
            found_branch_ids,
            execution_time_ms,
            cache_hit,
            occurred_at: SystemTime::now(),
            correlation_id: correlation_id.into(),
            session_id,
        }
    }
}

/// Capability seam for publishing domain events, per the design note on
/// pluggable adapters (`EventSink` is one of the narrow traits passed
/// into the query and registration engines at construction).
pub trait EventSink: Send + Sync {
    fn publish_branch_registered(&self, event: BranchRegistered);
    fn publish_proximity_queried(&self, event: ProximityQueried);
}

/// Logs every event at `info` via `tracing` and otherwise does nothing —
/// a reasonable default when no external sink (message bus, webhook) is
/// wired in, and the implementation used by every engine test.
#[derive(Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn publish_branch_registered(&self, event: BranchRegistered) {
        tracing::info!(
            event_type = event.event_type,
            branch_id = %event.branch_id,
            correlation_id = %event.correlation_id,
            "BRANCH_REGISTERED"
        );
    }

    fn publish_proximity_queried(&self, event: ProximityQueried) {
        tracing::info!(
            event_type = event.event_type,
            cache_hit = event.cache_hit,
            found = event.found_branch_ids.len(),
            correlation_id = %event.correlation_id,
            "PROXIMITY_QUERIED"
        );
    }
}

/// An `EventSink` whose publish calls may fail, used to exercise the
/// "publication failure is logged and absorbed" requirement from §4.6/§4.7
/// without standing up a real message bus.
pub struct FallibleEventSink<F> {
    should_fail: F,
}

impl<F: Fn() -> bool + Send + Sync> FallibleEventSink<F> {
    pub fn new(should_fail: F) -> Self {
        Self { should_fail }
    }
}

impl<F: Fn() -> bool + Send + Sync> EventSink for FallibleEventSink<F> {
    fn publish_branch_registered(&self, event: BranchRegistered) {
        if (self.should_fail)() {
            warn!(branch_id = %event.branch_id, "event publication failed, absorbed");
            return;
        }
        tracing::info!(branch_id = %event.branch_id, "BRANCH_REGISTERED");
    }

    fn publish_proximity_queried(&self, event: ProximityQueried) {
        if (self.should_fail)() {
            warn!(correlation_id = %event.correlation_id, "event publication failed, absorbed");
            return;
        }
        tracing::info!(cache_hit = event.cache_hit, "PROXIMITY_QUERIED");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::BranchId;

    #[test]
    fn branch_registered_carries_schema_version_and_fields() {
        let event = BranchRegistered::new(
            BranchId::generate(),
            "Branch A",
            BranchType::Traditional,
            GeoPoint::new(-23.5505, -46.6333).unwrap(),
            "corr-1",
        );
        assert_eq!(event.version, "1.0");
        assert_eq!(event.event_type, "BRANCH_REGISTERED");
        assert_eq!(event.latitude, -23.5505);
    }

    #[test]
    fn tracing_sink_accepts_events_without_panicking() {
        let sink = TracingEventSink;
        sink.publish_branch_registered(BranchRegistered::new(
            BranchId::generate(),
            "Branch A",
            BranchType::Digital,
            GeoPoint::new(0.0, 0.0).unwrap(),
            "corr-2",
        ));
        sink.publish_proximity_queried(ProximityQueried::new(
            GeoPoint::new(0.0, 0.0).unwrap(),
            10.0,
            10,
            vec![],
            1.5,
            false,
            "corr-2",
            None,
        ));
    }

    #[test]
    fn fallible_sink_absorbs_failures_without_panicking() {
        let sink = FallibleEventSink::new(|| true);
        sink.publish_branch_registered(BranchRegistered::new(
            BranchId::generate(),
            "Branch A",
            BranchType::Digital,
            GeoPoint::new(0.0, 0.0).unwrap(),
            "corr-3",
        ));
    }
}
