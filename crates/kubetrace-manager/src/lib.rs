//! # kubetrace-manager
//!
//! Container awareness for tracing runs.
//!
//! The [`operator::KubeManager`] operator decides per run whether container
//! identity is needed at all and, if so:
//! - registers a mount-namespace filter scoped to the run's selector,
//! - keeps the instrumentation attached to exactly the matching containers
//!   as they come and go ([`lifecycle`]),
//! - fills container identity into captured events ([`enrich`]),
//! - optionally publishes the matching containers as records ([`publisher`]).
//!
//! The container registry and filter manager are consumed through the
//! traits in [`registry`]; [`memory::ContainerCollection`] implements both
//! in process.

pub mod activation;
pub mod context;
pub mod enrich;
pub mod lifecycle;
pub mod memory;
pub mod operator;
pub mod params;
pub mod publisher;
pub mod registration;
pub mod registry;
pub mod selector;
