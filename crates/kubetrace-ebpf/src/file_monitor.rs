//! File open monitoring.
//!
//! Tracks file open operations inside containers to detect
//! unexpected filesystem access.

use kubetrace_common::types::{ContainerIdentity, MountNsId};
use serde::{Deserialize, Serialize};

use crate::enrich::{Enrichable, WithMountNsId};

/// A captured file open event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileOpenEvent {
    /// PID of the process.
    pub pid: u32,
    /// Mount namespace of the process.
    pub mntns: MountNsId,
    /// Path that was opened.
    pub path: String,
    /// Open flags.
    pub flags: u32,
    /// Container identity, filled in by enrichment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<ContainerIdentity>,
}

impl WithMountNsId for FileOpenEvent {
    fn mount_ns_id(&self) -> MountNsId {
        self.mntns
    }

    fn set_container_identity(&mut self, identity: ContainerIdentity) {
        self.container = Some(identity);
    }
}

impl Enrichable for FileOpenEvent {
    fn mount_ns(&mut self) -> Option<&mut dyn WithMountNsId> {
        Some(self)
    }
}
