//! # aquahub-engine
//!
//! The runtime engine: turns device descriptors into live reactive
//! entities.
//!
//! ## Responsibilities
//! - **Drivers**: the port hardware/virtual adapters implement, plus the
//!   shared driver core
//! - **Expressions**: wiring formula trees into live streams
//! - **Observables**: value pipelines, requirement checks, and the status
//!   state machine
//! - **Devices**: driver ownership and fan-out over child observables
//! - **Registry**: the id-addressed catalog of live devices and streams
//!
//! ## Dependency rule
//! Depends on `aquahub-domain` and `aquahub-rx`. Driver implementations
//! live in adapter crates and plug in through [`driver::DriverFactory`].

pub mod device;
pub mod driver;
pub mod expression;
pub mod observable;
pub mod registry;
