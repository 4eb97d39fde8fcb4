//! Privilege Module
//! Mission: Bitmask permissions per (subject, module) with cached, converging lookups

pub mod cache;
pub mod mask;

pub use cache::{PrivilegeCache, PrivilegeKey, SyncHandle, SyncOutcome, MAIN_MODULE};
pub use mask::PrivilegeMask;
