//! Shared type definitions for the territory lifecycle service.
//!
//! This crate is the single source of truth for the entities every other
//! crate in the workspace passes around. Types flow to `TypeScript` via
//! `ts-rs` for the web front end.
//!
//! # Modules
//!
//! - [`ids`] -- Type-safe UUID wrappers for territory, user, and delivery ids
//! - [`enums`] -- Territory and delivery cycle status with persisted names
//! - [`structs`] -- Territory, user, and delivery record structs

pub mod enums;
pub mod ids;
pub mod structs;

// Re-export all public types at crate root for convenience.
pub use enums::{CycleStatus, TerritoryStatus, UnknownStatus};
pub use ids::{DeliveryId, TerritoryId, UserId};
pub use structs::{
    DeliveryRecord, InconsistentTerritory, Loan, Territory, TerritoryState, User,
};
