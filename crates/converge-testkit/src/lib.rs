//! # Converge Testkit
//!
//! Testing utilities for converge.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Fixtures**: deterministic accounts, wire-message builders, and
//!   group setups for integration tests
//! - **Generators**: proptest strategies for property-based testing of
//!   the merge codec
//!
//! ## Test Fixtures
//!
//! ```rust
//! use converge_core::ConfigCategory;
//! use converge_testkit::fixtures::{delta_for, wire_message, TestAccount};
//!
//! let account = TestAccount::with_seed(1);
//! let payload = delta_for(ConfigCategory::UserProfile, |config| {
//!     config.as_profile_mut().unwrap().set_display_name("Alice", 100);
//! });
//! let message = wire_message(ConfigCategory::UserProfile, 100, "hash-1", payload, 1);
//! ```

pub mod fixtures;
pub mod generators;

pub use fixtures::{delta_for, group_of, wire_message, TestAccount};
