//! Syscall tracing.
//!
//! The tracer attaches to `sys_enter` tracepoints once per container and
//! drops events whose mount namespace is not in its filter map.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use kubetrace_common::types::{Container, ContainerId, ContainerIdentity, MountNsId};
use serde::{Deserialize, Serialize};

use crate::enrich::{Enrichable, WithMountNsId};
use crate::error::{EbpfError, Result};
use crate::filter::{FilterRequest, MountNsFilter};
use crate::instance::{ContainerAttacher, FilterConsumer};

/// Name of the syscall tracepoint program.
pub const SYSCALL_PROGRAM_NAME: &str = "kubetrace_syscall_trace";

/// A captured syscall event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyscallEvent {
    /// PID of the process that made the syscall.
    pub pid: u32,
    /// Mount namespace of the process.
    pub mntns: MountNsId,
    /// Syscall number.
    pub syscall_nr: u64,
    /// Timestamp in nanoseconds.
    pub timestamp_ns: u64,
    /// Container identity, filled in by enrichment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<ContainerIdentity>,
}

impl WithMountNsId for SyscallEvent {
    fn mount_ns_id(&self) -> MountNsId {
        self.mntns
    }

    fn set_container_identity(&mut self, identity: ContainerIdentity) {
        self.container = Some(identity);
    }
}

impl Enrichable for SyscallEvent {
    fn mount_ns(&mut self) -> Option<&mut dyn WithMountNsId> {
        Some(self)
    }
}

/// Syscall tracer scoped by a mount-namespace filter.
#[derive(Debug, Default)]
pub struct SyscallTracer {
    filter: Mutex<Option<MountNsFilter>>,
    attached: Mutex<BTreeMap<ContainerId, u32>>,
}

impl SyscallTracer {
    /// Creates a tracer with no filter and no attachments.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter map this tracer wants from the manager.
    #[must_use]
    pub fn filter_request(&self) -> FilterRequest {
        FilterRequest::default()
    }

    /// Returns the filter map, once handed over.
    #[must_use]
    pub fn filter(&self) -> Option<MountNsFilter> {
        self.filter
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns whether an event from `mntns` should be emitted.
    ///
    /// Without a filter every namespace is traced.
    #[must_use]
    pub fn should_trace(&self, mntns: MountNsId) -> bool {
        self.filter
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_none_or(|filter| filter.contains(mntns))
    }

    /// Returns the PIDs of all attached containers.
    #[must_use]
    pub fn attached_pids(&self) -> Vec<u32> {
        self.attached
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .copied()
            .collect()
    }
}

impl FilterConsumer for SyscallTracer {
    fn set_mount_ns_filter(&self, filter: MountNsFilter) {
        tracing::debug!(map = filter.name(), "syscall tracer received filter map");
        *self.filter.lock().unwrap_or_else(PoisonError::into_inner) = Some(filter);
    }
}

impl ContainerAttacher for SyscallTracer {
    fn attach_container(&self, container: &Container) -> Result<()> {
        if container.pid == 0 {
            return Err(EbpfError::Attach {
                container: container.id.to_string(),
                message: "container has no init process".into(),
            });
        }
        tracing::info!(
            program = SYSCALL_PROGRAM_NAME,
            pid = container.pid,
            container = %container.id,
            "starting syscall tracer"
        );
        let _ = self
            .attached
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(container.id.clone(), container.pid);
        Ok(())
    }

    fn detach_container(&self, container: &Container) -> Result<()> {
        let removed = self
            .attached
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&container.id);
        if removed.is_none() {
            return Err(EbpfError::Detach {
                container: container.id.to_string(),
                message: "not attached".into(),
            });
        }
        tracing::info!(pid = container.pid, container = %container.id, "stopped syscall tracer");
        Ok(())
    }
}
