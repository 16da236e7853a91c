//! Territory lifecycle engine.
//!
//! This crate owns the rules that move a numbered territory between
//! `disponible`, `en_uso`, `caducado`, and `inhabilitado`, and keeps every
//! loan mirrored by exactly one open delivery record.
//!
//! # Modules
//!
//! - [`calendar`] -- Calendar-month arithmetic with end-of-month clamping.
//! - [`clock`] -- Injected date source ([`clock::SystemClock`],
//!   [`clock::FixedClock`]).
//! - [`config`] -- Configuration loading from `territory-config.yaml`.
//! - [`ports`] -- Store traits the engine is written against.
//! - [`memory`] -- In-process implementation of every port.
//! - [`engine`] -- Assign, Extend, and Return.
//! - [`sweep`] -- Expiry and cooldown release sweeps.
//! - [`admin`] -- Territory and user maintenance.
//! - [`queries`] -- Dashboard and history reads.
//! - [`notify`] -- Assignment message composition and dispatch.
//! - [`error`] -- [`LifecycleError`] and its classification.

pub mod admin;
pub mod calendar;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod memory;
pub mod notify;
pub mod ports;
pub mod queries;
pub mod sweep;

pub use engine::{AssignRequest, Assignment, Extension, LifecycleEngine, ReturnRequest, Returned};
pub use error::{ErrorKind, LifecycleError};
