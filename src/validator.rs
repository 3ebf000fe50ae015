//! The business validator (C4): registration rules and the status- and
//! regulatory-compliance checks invoked by administrative flows.
//!
//! Stateless — every function takes its inputs by reference and is safe
//! to call concurrently from many workers.

use crate::error::{GeoBankError, Result, RuleTag};
use crate::geo::haversine;
use crate::model::{Branch, BranchStatus};

/// Minimum great-circle distance between two operational branches.
pub const MIN_INTER_BRANCH_KM: f64 = 0.5;
/// Radius used by the area-saturation check.
pub const SATURATION_RADIUS_KM: f64 = 5.0;
/// Operational-branch count at or above which a `TRADITIONAL` candidate
/// is rejected as saturating its area.
pub const SATURATION_COUNT: usize = 10;

/// Validate a registration candidate against the operational branches
/// nearby, in rule order, stopping at the first failure (§4.4).
///
/// `nearby_for_min_distance` must contain every operational branch within
/// [`MIN_INTER_BRANCH_KM`] of the candidate; `nearby_for_saturation` every
/// operational branch within [`SATURATION_RADIUS_KM`]. The caller supplies
/// both via index queries rather than a full scan.
pub fn validate_registration(
    candidate: &Branch,
    nearby_for_min_distance: &[Branch],
    nearby_for_saturation: &[Branch],
) -> Result<()> {
    for existing in nearby_for_min_distance {
        if !existing.status.is_operational() {
            continue;
        }
        let distance = haversine(candidate.location, existing.location);
        if distance.km() < MIN_INTER_BRANCH_KM {
            return Err(GeoBankError::rule(RuleTag::TooClose {
                other_id: existing.id.to_string(),
                distance_km: distance.km(),
            }));
        }
    }

    let operational_count = nearby_for_saturation
        .iter()
        .filter(|b| b.status.is_operational())
        .count();
    if operational_count >= SATURATION_COUNT && candidate.branch_type == crate::model::BranchType::Traditional {
        return Err(GeoBankError::rule(RuleTag::AreaSaturated {
            count: operational_count,
            radius_km: SATURATION_RADIUS_KM,
        }));
    }

    Ok(())
}

/// Validate a candidate status transition (§4.4), layering the
/// business-level restriction on top of the raw table in
/// [`BranchStatus::can_transition_to`]: `ACTIVE` may not move directly to
/// `PERMANENTLY_CLOSED` — it must pass through a temporary-closure state
/// first.
pub fn validate_transition(current: BranchStatus, target: BranchStatus) -> Result<()> {
    if current == BranchStatus::PermanentlyClosed {
        return Err(GeoBankError::rule(RuleTag::IllegalTransition {
            from: current.to_string(),
            to: target.to_string(),
        }));
    }
    if current == BranchStatus::Active && target == BranchStatus::PermanentlyClosed {
        return Err(GeoBankError::rule(RuleTag::IllegalTransition {
            from: current.to_string(),
            to: target.to_string(),
        }));
    }
    if !current.can_transition_to(target) {
        return Err(GeoBankError::rule(RuleTag::IllegalTransition {
            from: current.to_string(),
            to: target.to_string(),
        }));
    }
    Ok(())
}

/// Regulatory-compliance validator (used by administrative flows, not the
/// hot registration path): a branch must carry a contact phone number.
/// Coordinate-range validity is already guaranteed by `GeoPoint`.
pub fn validate_regulatory_compliance(branch: &Branch) -> Result<()> {
    match &branch.contact_phone {
        Some(phone) if !phone.trim().is_empty() => Ok(()),
        _ => Err(GeoBankError::invalid(
            "contactPhone",
            "must be present for regulatory compliance",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::GeoPoint;
    use crate::model::{BranchId, BranchType};

    fn branch_at(lat: f64, lon: f64, branch_type: BranchType) -> Branch {
        Branch::new(
            BranchId::generate(),
            GeoPoint::new(lat, lon).unwrap(),
            branch_type,
            "Branch",
            "Address",
            None,
        )
        .unwrap()
    }

    #[test]
    fn rejects_candidate_too_close_to_existing_branch() {
        let candidate = branch_at(-23.5505, -46.6333, BranchType::Digital);
        let existing = branch_at(-23.5506, -46.6334, BranchType::Traditional);

        let err = validate_registration(&candidate, &[existing], &[]).unwrap_err();
        assert!(matches!(err, GeoBankError::RuleViolated(RuleTag::TooClose { .. })));
    }

    #[test]
    fn accepts_candidate_past_minimum_distance() {
        let candidate = branch_at(-23.5505, -46.6333, BranchType::Digital);
        let far = branch_at(-22.9068, -43.1729, BranchType::Traditional);

        assert!(validate_registration(&candidate, &[far], &[]).is_ok());
    }

    #[test]
    fn rejects_traditional_candidate_in_saturated_area() {
        let candidate = branch_at(-23.5505, -46.6333, BranchType::Traditional);
        let nearby: Vec<Branch> = (0..10)
            .map(|i| branch_at(-23.5505 + i as f64 * 0.0001, -46.6333, BranchType::Digital))
            .collect();

        let err = validate_registration(&candidate, &[], &nearby).unwrap_err();
        assert!(matches!(err, GeoBankError::RuleViolated(RuleTag::AreaSaturated { .. })));
    }

    #[test]
    fn saturation_rule_does_not_apply_to_non_traditional_candidates() {
        let candidate = branch_at(-23.5505, -46.6333, BranchType::Digital);
        let nearby: Vec<Branch> = (0..10)
            .map(|i| branch_at(-23.5505 + i as f64 * 0.0001, -46.6333, BranchType::Digital))
            .collect();

        assert!(validate_registration(&candidate, &[], &nearby).is_ok());
    }

    #[test]
    fn non_operational_branches_are_excluded_from_both_rules() {
        let candidate = branch_at(-23.5505, -46.6333, BranchType::Traditional);
        let mut closed = branch_at(-23.5506, -46.6334, BranchType::Traditional);
        closed.status = BranchStatus::TemporarilyClosed;

        assert!(validate_registration(&candidate, &[closed.clone()], &[closed]).is_ok());
    }

    #[test]
    fn active_cannot_transition_directly_to_permanently_closed() {
        let err = validate_transition(BranchStatus::Active, BranchStatus::PermanentlyClosed).unwrap_err();
        assert!(matches!(err, GeoBankError::RuleViolated(RuleTag::IllegalTransition { .. })));
    }

    #[test]
    fn active_can_transition_to_temporarily_closed_then_permanently_closed() {
        assert!(validate_transition(BranchStatus::Active, BranchStatus::TemporarilyClosed).is_ok());
        assert!(validate_transition(BranchStatus::TemporarilyClosed, BranchStatus::PermanentlyClosed).is_ok());
    }

    #[test]
    fn permanently_closed_rejects_any_change() {
        assert!(validate_transition(BranchStatus::PermanentlyClosed, BranchStatus::Active).is_err());
    }

    #[test]
    fn regulatory_compliance_requires_contact_phone() {
        let mut branch = branch_at(-23.5505, -46.6333, BranchType::Traditional);
        assert!(validate_regulatory_compliance(&branch).is_err());
        branch.contact_phone = Some("+55 11 5555-0000".into());
        assert!(validate_regulatory_compliance(&branch).is_ok());
    }
}
