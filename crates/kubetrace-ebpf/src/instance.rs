//! Capabilities an instrumentation instance offers the container manager.
//!
//! Instead of probing an instance on every event, the instance hands the
//! manager one [`InstrumentationHandle`] describing what it can do. The
//! manager inspects it once, at setup.

use std::fmt;
use std::sync::Arc;

use kubetrace_common::types::Container;

use crate::error::Result;
use crate::filter::MountNsFilter;

/// Instrumentation that scopes itself with a mount-namespace filter map.
pub trait FilterConsumer: Send + Sync {
    /// Hands the filter map to the instrumentation.
    fn set_mount_ns_filter(&self, filter: MountNsFilter);
}

/// Instrumentation that activates per container.
///
/// Both operations run synchronously on the manager's event delivery task
/// and must not block indefinitely. A panic stops event delivery for the
/// run; containers attached until then are still detached on teardown.
pub trait ContainerAttacher: Send + Sync {
    /// Starts instrumenting `container`.
    ///
    /// # Errors
    ///
    /// Returns an error if the instrumentation cannot attach; the manager
    /// logs it and does not track the container.
    fn attach_container(&self, container: &Container) -> Result<()>;

    /// Stops instrumenting `container`.
    ///
    /// # Errors
    ///
    /// Returns an error if detaching fails; the manager only logs it.
    fn detach_container(&self, container: &Container) -> Result<()>;
}

/// Capability descriptor of one instrumentation instance.
#[derive(Clone, Default)]
pub struct InstrumentationHandle {
    name: String,
    filter_consumer: Option<Arc<dyn FilterConsumer>>,
    attacher: Option<Arc<dyn ContainerAttacher>>,
}

impl InstrumentationHandle {
    /// Creates a descriptor with no capabilities.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Declares that the instance accepts a mount-namespace filter.
    #[must_use]
    pub fn with_filter_consumer(mut self, consumer: Arc<dyn FilterConsumer>) -> Self {
        self.filter_consumer = Some(consumer);
        self
    }

    /// Declares that the instance attaches per container.
    #[must_use]
    pub fn with_attacher(mut self, attacher: Arc<dyn ContainerAttacher>) -> Self {
        self.attacher = Some(attacher);
        self
    }

    /// Returns the instance name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the filter consumer capability, if declared.
    #[must_use]
    pub fn filter_consumer(&self) -> Option<&Arc<dyn FilterConsumer>> {
        self.filter_consumer.as_ref()
    }

    /// Returns the attach/detach capability, if declared.
    #[must_use]
    pub fn attacher(&self) -> Option<&Arc<dyn ContainerAttacher>> {
        self.attacher.as_ref()
    }
}

impl fmt::Debug for InstrumentationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstrumentationHandle")
            .field("name", &self.name)
            .field("filter_consumer", &self.filter_consumer.is_some())
            .field("attacher", &self.attacher.is_some())
            .finish()
    }
}
