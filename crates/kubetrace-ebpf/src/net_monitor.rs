//! Network connection monitoring.
//!
//! Network programs hook the pod's network namespace rather than the
//! process, so the monitor attaches once per namespace and reference-counts
//! the containers sharing it.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, PoisonError};

use kubetrace_common::types::{Container, ContainerId, ContainerIdentity, NetNsId};
use serde::{Deserialize, Serialize};

use crate::enrich::{Enrichable, WithNetNsId};
use crate::error::{EbpfError, Result};
use crate::instance::ContainerAttacher;

/// Name of the network tracing program.
pub const NETWORK_PROGRAM_NAME: &str = "kubetrace_net_trace";

/// A captured network event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkEvent {
    /// PID of the process.
    pub pid: u32,
    /// Network namespace the packet was seen in.
    pub netns: NetNsId,
    /// Source address.
    pub src_addr: String,
    /// Destination address.
    pub dst_addr: String,
    /// Destination port.
    pub dst_port: u16,
    /// Protocol (TCP/UDP).
    pub protocol: String,
    /// Pod identity, filled in by enrichment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod: Option<ContainerIdentity>,
}

impl WithNetNsId for NetworkEvent {
    fn net_ns_id(&self) -> NetNsId {
        self.netns
    }

    fn set_network_identity(&mut self, identity: ContainerIdentity) {
        self.pod = Some(identity);
    }
}

impl Enrichable for NetworkEvent {
    fn net_ns(&mut self) -> Option<&mut dyn WithNetNsId> {
        Some(self)
    }
}

/// Network monitor attached per network namespace.
#[derive(Debug, Default)]
pub struct NetworkMonitor {
    namespaces: Mutex<BTreeMap<NetNsId, BTreeSet<ContainerId>>>,
}

impl NetworkMonitor {
    /// Creates a monitor with no attachments.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns whether `netns` is currently monitored.
    #[must_use]
    pub fn is_monitored(&self, netns: NetNsId) -> bool {
        self.namespaces
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&netns)
    }
}

impl ContainerAttacher for NetworkMonitor {
    fn attach_container(&self, container: &Container) -> Result<()> {
        if container.pid == 0 {
            return Err(EbpfError::Attach {
                container: container.id.to_string(),
                message: "cannot enter network namespace without a pid".into(),
            });
        }
        let mut namespaces = self.namespaces.lock().unwrap_or_else(PoisonError::into_inner);
        let users = namespaces.entry(container.netns).or_default();
        if users.is_empty() {
            tracing::info!(
                program = NETWORK_PROGRAM_NAME,
                netns = %container.netns,
                pid = container.pid,
                "starting network monitor"
            );
        }
        let _ = users.insert(container.id.clone());
        Ok(())
    }

    fn detach_container(&self, container: &Container) -> Result<()> {
        let mut namespaces = self.namespaces.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(users) = namespaces.get_mut(&container.netns) else {
            return Err(EbpfError::Detach {
                container: container.id.to_string(),
                message: format!("network namespace {} not monitored", container.netns),
            });
        };
        let _ = users.remove(&container.id);
        if users.is_empty() {
            let _ = namespaces.remove(&container.netns);
            tracing::info!(netns = %container.netns, "stopped network monitor");
        }
        Ok(())
    }
}
