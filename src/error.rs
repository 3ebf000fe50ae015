//! Error types for the geobank registry core.
//!
//! One variant per error kind named in the design: validation, business
//! rule rejection, store/index unavailability, and the internal-only
//! cache/index anomalies that are logged but never surfaced to callers of
//! the query and registration engines.

use thiserror::Error;

/// The business rule a registration or status transition violated.
#[derive(Debug, Clone, PartialEq)]
pub enum RuleTag {
    /// Candidate location is closer than the minimum inter-branch distance
    /// to an existing operational branch.
    TooClose { other_id: String, distance_km: f64 },
    /// Too many operational branches already serve the candidate's area
    /// and the candidate is a `TRADITIONAL` branch.
    AreaSaturated { count: usize, radius_km: f64 },
    /// The requested status transition is not in the permitted set.
    IllegalTransition { from: String, to: String },
}

impl std::fmt::Display for RuleTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuleTag::TooClose {
                other_id,
                distance_km,
            } => write!(
                f,
                "TOO_CLOSE: {distance_km:.3} km from existing branch {other_id}"
            ),
            RuleTag::AreaSaturated { count, radius_km } => write!(
                f,
                "AREA_SATURATED: {count} operational branches within {radius_km} km"
            ),
            RuleTag::IllegalTransition { from, to } => {
                write!(f, "ILLEGAL_TRANSITION: {from} -> {to}")
            }
        }
    }
}

/// A single field/constraint violation surfaced from boundary validation.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldViolation {
    pub field: String,
    pub constraint: String,
}

impl FieldViolation {
    pub fn new(field: impl Into<String>, constraint: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            constraint: constraint.into(),
        }
    }
}

/// Errors produced by the registry core.
///
/// `CacheDegraded`, `CacheInvalidationFailed`, `IndexDesync`, and
/// `CacheContention` are never returned by the public engine methods —
/// they exist so internal code has a typed value to log and count before
/// absorbing it, matching the propagation policy in the design.
#[derive(Debug, Error)]
pub enum GeoBankError {
    #[error("invalid input: {0:?}")]
    InvalidInput(Vec<FieldViolation>),

    #[error("business rule violated: {0}")]
    RuleViolated(RuleTag),

    #[error("branch store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("spatial index unavailable: {0}")]
    SearchUnavailable(String),

    #[error("cache degraded: {0}")]
    CacheDegraded(String),

    #[error("cache invalidation failed for branch {branch_id}: {reason}")]
    CacheInvalidationFailed { branch_id: String, reason: String },

    #[error("index desynchronized for branch {0}")]
    IndexDesync(String),

    #[error("cache stampede lock exhausted for key {0}")]
    CacheContention(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl GeoBankError {
    pub fn invalid(field: impl Into<String>, constraint: impl Into<String>) -> Self {
        GeoBankError::InvalidInput(vec![FieldViolation::new(field, constraint)])
    }

    pub fn rule(tag: RuleTag) -> Self {
        GeoBankError::RuleViolated(tag)
    }
}

/// Result type alias for registry operations.
pub type Result<T> = std::result::Result<T, GeoBankError>;
