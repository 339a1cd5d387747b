//! Interfaces consumed from the container registry and filter manager.
//!
//! The registry is the node's source of truth for running containers. The
//! manager only ever talks to it through these traits, via handles passed
//! in at construction.

use std::fmt;
use std::sync::Arc;

use kubetrace_common::error::Result;
use kubetrace_common::types::{Container, TracerId};
use kubetrace_ebpf::enrich::{WithMountNsId, WithNetNsId};
use kubetrace_ebpf::filter::MountNsFilter;
use tokio::sync::mpsc;

use crate::selector::ContainerSelector;

/// Kind of a container lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    /// Container is being created and is not runnable yet.
    PreCreate,
    /// Container started and matches the subscriber's selector.
    Add,
    /// Container went away.
    Remove,
    /// Code not understood by this side of the protocol.
    Unknown(u32),
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PreCreate => write!(f, "PRECREATE"),
            Self::Add => write!(f, "CREATED"),
            Self::Remove => write!(f, "DELETED"),
            Self::Unknown(code) => write!(f, "UNKNOWN({code})"),
        }
    }
}

/// A container lifecycle event delivered to a subscriber.
#[derive(Debug, Clone)]
pub struct ContainerEvent {
    /// Event kind.
    pub kind: EventType,
    /// Container the event refers to.
    pub container: Arc<Container>,
}

/// Sending half of a subscriber's event queue.
pub type EventSender = mpsc::Sender<ContainerEvent>;

/// Node-wide container registry.
pub trait ContainerRegistry: Send + Sync {
    /// Subscribes `tracer` to lifecycle events of containers matching
    /// `selector` and returns the currently matching containers.
    ///
    /// Implementations must not omit any addition or removal that happens
    /// at or after the snapshot is captured, and must deliver an `Add` for
    /// a container before any `Remove` for it.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry cannot accept the subscription.
    fn subscribe(
        &self,
        tracer: &TracerId,
        selector: &ContainerSelector,
        events: EventSender,
    ) -> Result<Vec<Arc<Container>>>;

    /// Ends the subscription of `tracer`. No new events are delivered
    /// once this returns.
    fn unsubscribe(&self, tracer: &TracerId);

    /// Fills in the container identity of an event by its mount namespace.
    /// Returns whether the namespace was resolved.
    fn enrich_by_mount_ns(&self, event: &mut dyn WithMountNsId) -> bool;

    /// Fills in the pod identity of an event by its network namespace.
    /// Returns whether the namespace was resolved.
    fn enrich_by_net_ns(&self, event: &mut dyn WithNetNsId) -> bool;
}

/// Registry side of per-tracer mount-namespace filters.
pub trait FilterManager: Send + Sync {
    /// Creates the membership-tracking resource for `tracer`.
    ///
    /// # Errors
    ///
    /// Returns an error if the tracer already exists or the resource
    /// cannot be allocated.
    fn add_tracer(&self, tracer: &TracerId, selector: &ContainerSelector) -> Result<()>;

    /// Returns the filter map kept in sync for `tracer`.
    ///
    /// # Errors
    ///
    /// Returns an error if `tracer` is not registered.
    fn tracer_filter(&self, tracer: &TracerId) -> Result<MountNsFilter>;

    /// Releases the resource of `tracer`. Unknown tracers are ignored.
    fn remove_tracer(&self, tracer: &TracerId);
}
