//! # geobank-registry — a branch-registry service with proximity queries and cache coherence
//!
//! `geobank-registry` is an embeddable library for registering physical
//! bank branches, enforcing the placement rules a regulator and a
//! network-planning team care about, and answering "what's near me"
//! proximity queries fast enough to sit behind a mobile app's home
//! screen.
//!
//! ## Core Features
//!
//! - **Haversine distance kernel** (C1) with a forward-azimuth bearing
//!   calculation, independent of any particular spatial index.
//! - **R-tree backed spatial index** (C2) with an exact-distance
//!   admission filter, so results never depend on the index's internal
//!   bounding-box approximation.
//! - **Pluggable branch storage** (C3), in-memory or append-only-file
//!   backed, behind a single `BranchStore` trait.
//! - **Placement validation** (C4): minimum inter-branch distance, area
//!   saturation, and lifecycle transition rules.
//! - **Two-tier cache** (C5): in-process L1 plus a distributed L2, with
//!   stampede protection and scheduled auto-renewal.
//! - **Proximity query engine** (C6) and **registration engine** (C7)
//!   orchestrating the above into the two operations the service exists
//!   to perform.
//! - **Domain events** (C9) for every registration and query, published
//!   through a pluggable `EventSink`.
//!
//! ## Quick Start
//!
//! ```rust
//! use geobank_registry::{
//!     Config, EventSink, GeoPoint, MemoryBranchStore, QueryEngine,
//!     RegistrationEngine, RegistrationRequest, RTreeIndex, SearchRequest,
//!     TieredCache, TracingEventSink,
//! };
//! use geobank_registry::model::BranchType;
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(MemoryBranchStore::new());
//! let index = Arc::new(RTreeIndex::new());
//! let cache = Arc::new(TieredCache::l1_only(10_000));
//! let events: Arc<dyn EventSink> = Arc::new(TracingEventSink);
//! let config = Config::default();
//!
//! let registration = RegistrationEngine::new(
//!     store.clone(),
//!     index.clone(),
//!     cache.clone(),
//!     events.clone(),
//!     config.registration,
//! );
//!
//! let branch = registration.register(RegistrationRequest::new(
//!     "Downtown Branch",
//!     GeoPoint::new(-23.5505, -46.6333)?,
//!     BranchType::Traditional,
//!     "100 Main St",
//!     "corr-1",
//! ))?;
//!
//! let query = QueryEngine::new(store, index, cache, events, config.search);
//! let request = SearchRequest::new(branch.location, "corr-2").with_radius_km(5.0);
//! let result = query.search(request)?;
//! println!("found {} branches nearby", result.matches.len());
//! # Ok(())
//! # }
//! ```
//!
//! ## Two-Tier Caching
//!
//! ```rust
//! use geobank_registry::TieredCache;
//! use std::time::Duration;
//!
//! let cache = TieredCache::l1_only(10_000);
//! cache.put("nearest:-23.5505,-46.6333:r5:m10", "cached-payload", Duration::from_secs(300));
//! assert_eq!(cache.get("nearest:-23.5505,-46.6333:r5:m10").as_deref(), Some("cached-payload"));
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod events;
pub mod geo;
pub mod index;
pub mod metrics;
pub mod model;
pub mod query;
pub mod reconciler;
pub mod registration;
pub mod scheduler;
pub mod store;
pub mod validator;

#[cfg(feature = "aof")]
pub mod persistence;

// Error handling
pub use error::{FieldViolation, GeoBankError, Result, RuleTag};

// Configuration
pub use config::{CacheConfig, Config, LockConfig, RegistrationConfig, SearchConfig};

// The distance kernel (C1)
pub use geo::{bearing, haversine, Distance, GeoPoint};

// The branch data model (§3)
pub use model::{Branch, BranchId, BranchStatus, BranchType};

// The spatial index (C2)
pub use index::{RTreeIndex, SpatialIndex};

// The branch store (C3)
pub use store::{BranchStore, MemoryBranchStore};

#[cfg(feature = "aof")]
pub use store::AofBranchStore;

// Placement and transition validation (C4)
pub use validator::{validate_registration, validate_regulatory_compliance, validate_transition};

// The two-tier cache (C5)
pub use cache::{Cache, L2Cache, LocalLock, LockBackend, NullL2, RedisL2, RedisLock, TieredCache};

// Metrics
pub use metrics::CacheMetrics;

// The proximity query engine (C6)
pub use query::{BranchMatch, QueryEngine, SearchRequest, SearchResult, SearchStats};

// The registration engine (C7)
pub use registration::{transition_branch, RegistrationEngine, RegistrationRequest};

// The auto-renewal scheduler (C8)
pub use scheduler::{IntervalTicker, ManualTicker, Scheduler, Ticker};

// The background index/store reconciler
pub use reconciler::{reconcile_once, Reconciler};

// Domain events (C9)
pub use events::{BranchRegistered, EventSink, ProximityQueried, TracingEventSink};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for common imports
///
/// ```rust
/// use geobank_registry::prelude::*;
///
/// let store = MemoryBranchStore::new();
/// let point = GeoPoint::new(-23.5505, -46.6333)?;
/// # Ok::<(), geobank_registry::GeoBankError>(())
/// ```
pub mod prelude {
    pub use crate::{GeoBankError, Result, RuleTag};

    pub use crate::{Branch, BranchId, BranchStatus, BranchType};

    pub use crate::{Distance, GeoPoint};

    pub use crate::{RTreeIndex, SpatialIndex};

    pub use crate::{BranchStore, MemoryBranchStore};

    #[cfg(feature = "aof")]
    pub use crate::AofBranchStore;

    pub use crate::{Cache, TieredCache};

    pub use crate::{QueryEngine, SearchRequest, SearchResult};

    pub use crate::{RegistrationEngine, RegistrationRequest};

    pub use crate::{EventSink, TracingEventSink};

    pub use crate::Config;

    pub use std::time::Duration;
}
