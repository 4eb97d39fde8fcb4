//! Warden Library
//!
//! Identity and authorization core: tokens tied to revocable sessions,
//! a cached bitmask privilege table, and the axum surface over both.

pub mod auth;
pub mod config;
pub mod error;
pub mod privilege;
pub mod store;
