//! skyfsm_core: runtime-agnostic core of the skyfsm mission engine.
//!
//! Design goals:
//! - Pure, testable logic (no async, no vehicle deps).
//! - Explicit types; no macro wizardry.
//! - A validated mission is immutable and shared read-only by the runtime.

pub mod error;

/// Mission documents, validation, event trees and transition tables.
pub mod mission;
