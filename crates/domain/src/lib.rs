//! # aquahub-domain
//!
//! Pure domain model for the aquahub device runtime.
//!
//! ## Responsibilities
//! - Define **Emits** (the universal value envelope flowing through every pipeline)
//! - Define **Statuses** (entity health enums and the driver status enum)
//! - Define **Descriptors** (device/observable configuration, requires, emit controls)
//! - Define **Expressions** (the formula AST wired into live pipelines by the engine)
//! - Unit/quantity conversion tables
//! - The simulated clock used for stamps and timer scaling
//! - Error conventions shared across the workspace
//!
//! ## Dependency rule
//! This crate has **no internal dependencies**.
//! It must never import anything from the rx, engine, or adapter crates.

pub mod emit;
pub mod error;
pub mod expr;
pub mod model;
pub mod status;
pub mod time;
pub mod units;
