//! # kubetrace-common
//!
//! Shared types, error definitions, configuration model, and constants
//! used across the kubetrace workspace.
//!
//! This crate is the leaf of the dependency graph: it depends on no other
//! internal crate and provides the container records, namespace
//! identifiers, and run-context keys that the instrumentation and manager
//! crates build upon.

pub mod config;
pub mod constants;
pub mod error;
pub mod types;
