// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # velock Protocol: Core Primitives
//!
//! The building blocks every velock contract stands on. Nothing in here
//! knows what a lock, a gauge, or a fee is; it only knows how to do money
//! math without losing a wei, how to tell which week it is, and how to
//! search an append-only history of piecewise-linear points.
//!
//! ## Modules
//!
//! - **config**: Protocol constants and tunable catch-up limits.
//! - **math**: Checked 256-bit fixed-point arithmetic. Truncating division,
//!   overflow is an error, floating point is never an option.
//! - **time**: Week alignment and the block context handed to every mutation.
//! - **address**: 20-byte account identifiers.
//! - **admin**: Two-phase ownership handoff (commit, then apply).
//! - **checkpoint**: `LockPoint`, binary search over point histories, and
//!   the `Progress` report returned by every bounded catch-up loop.
//!
//! ## Design Philosophy
//!
//! 1. Every arithmetic step on an amount goes through [`math::FixedMath`].
//! 2. Histories are append-only. A checkpoint, once written, is never edited.
//! 3. No loop over elapsed time is unbounded. Ever. Callers re-invoke.

pub mod address;
pub mod admin;
pub mod checkpoint;
pub mod config;
pub mod math;
pub mod time;

pub use address::Address;
pub use admin::{AdminError, Ownership};
pub use checkpoint::{LockPoint, Progress};
pub use config::{CatchUpLimits, InflationParams};
pub use math::{Amount, FixedMath, MathError};
pub use time::{BlockContext, BlockHeight, Timestamp};
