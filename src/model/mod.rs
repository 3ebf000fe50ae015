//! The branch data model (§3): identity, classification, lifecycle status,
//! and the `Branch` aggregate itself.

pub mod branch;

pub use branch::{Branch, BranchId, BranchStatus, BranchType};
