//! `BranchId`, `BranchType`, `BranchStatus`, and the `Branch` aggregate (§3).

use crate::error::{GeoBankError, Result};
use crate::geo::GeoPoint;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::SystemTime;
use uuid::Uuid;

/// A branch identifier: either a canonical UUID or a short alphanumeric
/// code, normalized to uppercase. The two forms are never ambiguous — a
/// valid code is never 36 characters long.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BranchId(String);

impl BranchId {
    const CODE_MIN: usize = 4;
    const CODE_MAX: usize = 12;

    /// Parse a raw identifier, accepting a canonical UUID or a 4-12
    /// character uppercase alphanumeric code (normalized to uppercase).
    pub fn new(raw: impl AsRef<str>) -> Result<Self> {
        let raw = raw.as_ref().trim();

        if raw.len() == 36 {
            return match Uuid::parse_str(raw) {
                Ok(uuid) => Ok(Self(uuid.hyphenated().to_string())),
                Err(_) => Err(GeoBankError::invalid(
                    "id",
                    "must be a canonical 36-character UUID or a 4-12 character code",
                )),
            };
        }

        let code = raw.to_uppercase();
        let valid_len = (Self::CODE_MIN..=Self::CODE_MAX).contains(&code.len());
        let valid_chars = code.chars().all(|c| c.is_ascii_alphanumeric());
        if valid_len && valid_chars {
            Ok(Self(code))
        } else {
            Err(GeoBankError::invalid(
                "id",
                "must be a canonical 36-character UUID or a 4-12 character code",
            ))
        }
    }

    /// Generate a fresh UUID-backed identifier for a registration with no
    /// caller-supplied id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().hyphenated().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BranchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The kind of branch. Carries the capability flags the service-type
/// filter (§4.6) predicates over, and a priority score used as the
/// ordering tiebreak.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BranchType {
    Traditional,
    Digital,
    Premium,
    Express,
    AtmOnly,
}

impl BranchType {
    pub const ALL: [BranchType; 5] = [
        BranchType::Traditional,
        BranchType::Digital,
        BranchType::Premium,
        BranchType::Express,
        BranchType::AtmOnly,
    ];

    /// Ordering tiebreak: higher wins. PREMIUM=5 down to ATM_ONLY=1.
    pub fn priority(&self) -> u8 {
        match self {
            BranchType::Premium => 5,
            BranchType::Traditional => 4,
            BranchType::Digital => 3,
            BranchType::Express => 2,
            BranchType::AtmOnly => 1,
        }
    }

    pub fn full_services(&self) -> bool {
        matches!(self, BranchType::Traditional | BranchType::Premium)
    }

    pub fn personal_banker(&self) -> bool {
        matches!(self, BranchType::Traditional | BranchType::Premium)
    }

    pub fn always_open(&self) -> bool {
        matches!(self, BranchType::Digital | BranchType::AtmOnly)
    }

    /// Case-insensitive parse, for adapters receiving the type as a string.
    pub fn from_str_ci(s: &str) -> Result<Self> {
        match s.to_uppercase().as_str() {
            "TRADITIONAL" => Ok(BranchType::Traditional),
            "DIGITAL" => Ok(BranchType::Digital),
            "PREMIUM" => Ok(BranchType::Premium),
            "EXPRESS" => Ok(BranchType::Express),
            "ATM_ONLY" => Ok(BranchType::AtmOnly),
            _ => Err(GeoBankError::invalid("type", "not a recognized branch type")),
        }
    }
}

impl fmt::Display for BranchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BranchType::Traditional => "TRADITIONAL",
            BranchType::Digital => "DIGITAL",
            BranchType::Premium => "PREMIUM",
            BranchType::Express => "EXPRESS",
            BranchType::AtmOnly => "ATM_ONLY",
        };
        write!(f, "{s}")
    }
}

/// Operational status of a branch. Only `Active` branches are considered
/// operational for proximity search and the minimum-distance rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BranchStatus {
    Planned,
    Active,
    TemporarilyClosed,
    PermanentlyClosed,
    UnderMaintenance,
}

impl BranchStatus {
    pub fn is_operational(&self) -> bool {
        matches!(self, BranchStatus::Active)
    }

    /// The raw transition table (§3). This does not encode the additional
    /// business restriction on ACTIVE → PERMANENTLY_CLOSED — that rule
    /// lives in the status-transition validator (§4.4), which callers
    /// should consult before invoking [`Branch::transition`].
    pub fn can_transition_to(&self, target: BranchStatus) -> bool {
        use BranchStatus::*;
        match self {
            Planned => matches!(target, Active | PermanentlyClosed),
            Active => matches!(target, TemporarilyClosed | UnderMaintenance | PermanentlyClosed),
            TemporarilyClosed => matches!(target, Active | UnderMaintenance | PermanentlyClosed),
            UnderMaintenance => matches!(target, Active | TemporarilyClosed | PermanentlyClosed),
            PermanentlyClosed => false,
        }
    }
}

impl fmt::Display for BranchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BranchStatus::Planned => "PLANNED",
            BranchStatus::Active => "ACTIVE",
            BranchStatus::TemporarilyClosed => "TEMPORARILY_CLOSED",
            BranchStatus::PermanentlyClosed => "PERMANENTLY_CLOSED",
            BranchStatus::UnderMaintenance => "UNDER_MAINTENANCE",
        };
        write!(f, "{s}")
    }
}

const NAME_MAX: usize = 100;
const ADDRESS_MAX: usize = 255;
const PHONE_MAX: usize = 20;

/// A registered bank branch. Equality and hashing are by `id` only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Branch {
    pub id: BranchId,
    pub location: GeoPoint,
    #[serde(rename = "type")]
    pub branch_type: BranchType,
    pub status: BranchStatus,
    pub name: String,
    pub address: String,
    pub contact_phone: Option<String>,
    pub created_at: SystemTime,
    pub updated_at: SystemTime,
}

impl PartialEq for Branch {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Branch {}

impl std::hash::Hash for Branch {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl Branch {
    /// Construct a new branch. Status is always `ACTIVE` and both
    /// timestamps are `now`, per §3's lifecycle rule. `name` and `address`
    /// are trimmed and length-validated; `contact_phone`, if present, is
    /// trimmed and length-validated.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: BranchId,
        location: GeoPoint,
        branch_type: BranchType,
        name: impl Into<String>,
        address: impl Into<String>,
        contact_phone: Option<String>,
    ) -> Result<Self> {
        let name = validate_bounded("name", name.into(), 1, NAME_MAX)?;
        let address = validate_bounded("address", address.into(), 1, ADDRESS_MAX)?;
        let contact_phone = match contact_phone {
            Some(phone) => Some(validate_bounded("contactPhone", phone, 0, PHONE_MAX)?),
            None => None,
        };
        let now = SystemTime::now();
        Ok(Self {
            id,
            location,
            branch_type,
            status: BranchStatus::Active,
            name,
            address,
            contact_phone,
            created_at: now,
            updated_at: now,
        })
    }

    /// `updateInfo(name, address, phone)` (§3): re-validates and replaces
    /// the mutable descriptive fields, bumping `updated_at`.
    pub fn update_info(
        &mut self,
        name: impl Into<String>,
        address: impl Into<String>,
        contact_phone: Option<String>,
    ) -> Result<()> {
        let name = validate_bounded("name", name.into(), 1, NAME_MAX)?;
        let address = validate_bounded("address", address.into(), 1, ADDRESS_MAX)?;
        let contact_phone = match contact_phone {
            Some(phone) => Some(validate_bounded("contactPhone", phone, 0, PHONE_MAX)?),
            None => None,
        };
        self.name = name;
        self.address = address;
        self.contact_phone = contact_phone;
        self.updated_at = SystemTime::now();
        Ok(())
    }

    /// Apply a status transition permitted by the raw table (§3).
    ///
    /// Does not apply the additional ACTIVE → PERMANENTLY_CLOSED business
    /// restriction; callers changing status should run the candidate
    /// transition through the status-transition validator first.
    pub fn transition(&mut self, target: BranchStatus) -> Result<()> {
        if !self.status.can_transition_to(target) {
            return Err(GeoBankError::rule(crate::error::RuleTag::IllegalTransition {
                from: self.status.to_string(),
                to: target.to_string(),
            }));
        }
        self.status = target;
        self.updated_at = SystemTime::now();
        Ok(())
    }

    /// Service-type predicate (§4.6). A non-operational branch supports no
    /// service.
    pub fn supports_service(&self, service: &str) -> bool {
        if !self.status.is_operational() {
            return false;
        }
        let t = self.branch_type;
        match service.to_lowercase().as_str() {
            "account_opening" | "loan_application" | "investment_consultation" => {
                t.full_services() && t.personal_banker()
            }
            "cash_withdrawal" | "balance_inquiry" | "transfer" => true,
            "safe_deposit" | "currency_exchange" => t.full_services(),
            "after_hours_banking" => t.always_open(),
            _ => t.full_services(),
        }
    }
}

fn validate_bounded(field: &str, raw: String, min: usize, max: usize) -> Result<String> {
    let trimmed = raw.trim().to_string();
    if trimmed.chars().count() < min || trimmed.chars().count() > max {
        return Err(GeoBankError::invalid(
            field,
            format!("length must be between {min} and {max} characters"),
        ));
    }
    Ok(trimmed)
}
