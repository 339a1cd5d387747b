//! Domain primitive types used across the kubetrace workspace.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Runtime-assigned identifier of a container.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContainerId(String);

impl ContainerId {
    /// Creates a new container ID from a string value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the inner string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of one orchestrated run.
///
/// Correlates the filter registration and the attachment subscription of
/// a single run inside the registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TracerId(String);

impl TracerId {
    /// Creates a tracer ID from a string value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a random tracer ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Returns the inner string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TracerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kernel mount namespace inode number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MountNsId(pub u64);

impl fmt::Display for MountNsId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kernel network namespace inode number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NetNsId(pub u64);

impl fmt::Display for NetNsId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kubernetes metadata attached to a container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct K8sMetadata {
    /// Pod namespace.
    pub namespace: String,
    /// Pod name.
    pub pod_name: String,
    /// Container name within the pod.
    pub container_name: String,
    /// Pod labels.
    pub pod_labels: BTreeMap<String, String>,
}

/// A container as known to the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container {
    /// Runtime-assigned container ID.
    pub id: ContainerId,
    /// PID of the container's init process.
    pub pid: u32,
    /// Mount namespace of the init process.
    pub mntns: MountNsId,
    /// Network namespace of the init process.
    pub netns: NetNsId,
    /// Kubernetes metadata.
    #[serde(default)]
    pub k8s: K8sMetadata,
}

impl Container {
    /// Returns the identity that enrichment writes into captured events.
    #[must_use]
    pub fn identity(&self) -> ContainerIdentity {
        ContainerIdentity {
            container_id: self.id.clone(),
            namespace: self.k8s.namespace.clone(),
            pod_name: self.k8s.pod_name.clone(),
            container_name: self.k8s.container_name.clone(),
            pod_labels: self.k8s.pod_labels.clone(),
        }
    }
}

/// Pod/container identity resolved from a namespace identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerIdentity {
    /// Runtime-assigned container ID.
    pub container_id: ContainerId,
    /// Pod namespace.
    pub namespace: String,
    /// Pod name.
    pub pod_name: String,
    /// Container name within the pod.
    pub container_name: String,
    /// Pod labels.
    pub pod_labels: BTreeMap<String, String>,
}
