//! Enrichment capabilities of captured events.
//!
//! An event opts into enrichment by returning itself from the matching
//! accessor of [`Enrichable`]. The manager resolves the namespace
//! identifier and writes the pod/container identity back.

use kubetrace_common::types::{ContainerIdentity, MountNsId, NetNsId};

/// Event carrying a mount namespace identifier.
pub trait WithMountNsId {
    /// Mount namespace the event originated from.
    fn mount_ns_id(&self) -> MountNsId;

    /// Stores the identity resolved from the mount namespace.
    fn set_container_identity(&mut self, identity: ContainerIdentity);
}

/// Event carrying a network namespace identifier.
pub trait WithNetNsId {
    /// Network namespace the event originated from.
    fn net_ns_id(&self) -> NetNsId;

    /// Stores the identity resolved from the network namespace.
    fn set_network_identity(&mut self, identity: ContainerIdentity);
}

/// Event that may carry namespace identifiers.
pub trait Enrichable {
    /// Mount namespace capability, if the event has one.
    fn mount_ns(&mut self) -> Option<&mut dyn WithMountNsId> {
        None
    }

    /// Network namespace capability, if the event has one.
    fn net_ns(&mut self) -> Option<&mut dyn WithNetNsId> {
        None
    }
}
