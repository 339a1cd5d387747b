//! # kubetrace-ebpf
//!
//! Instrumentation side of kubetrace.
//!
//! Defines what an instrumentation instance can offer the container
//! manager and the events it captures:
//! - **Filtering**: a shared mount-namespace filter map, requested through
//!   [`filter::FilterRequest`] and handed over via [`instance::FilterConsumer`].
//! - **Per-container attachment**: [`instance::ContainerAttacher`].
//! - **Enrichment**: captured events expose namespace identifiers through
//!   the closed capability traits in [`enrich`].
//!
//! Loading BPF objects into the kernel happens elsewhere; the tracers in
//! this crate keep the user-space side of attachment state.

pub mod enrich;
pub mod error;
pub mod file_monitor;
pub mod filter;
pub mod instance;
pub mod net_monitor;
pub mod tracer;
