//! Per-run mount-namespace filter registration.
//!
//! The registry creates the filter map and keeps it synchronized with the
//! selector; this type only makes sure the tracer's registration exists
//! exactly as long as the run holds its filter.

use std::sync::Arc;

use kubetrace_common::error::{KubetraceError, Result};
use kubetrace_common::types::TracerId;
use kubetrace_ebpf::filter::MountNsFilter;

use crate::registry::FilterManager;
use crate::selector::ContainerSelector;

/// Filter registration of one tracer.
///
/// Either a registration and its filter both exist, or neither does.
pub struct FilterRegistration {
    tracer: TracerId,
    filters: Arc<dyn FilterManager>,
    filter: Option<MountNsFilter>,
}

impl FilterRegistration {
    /// Creates an unregistered handle for `tracer`.
    #[must_use]
    pub fn new(tracer: TracerId, filters: Arc<dyn FilterManager>) -> Self {
        Self {
            tracer,
            filters,
            filter: None,
        }
    }

    /// Registers the tracer and returns its filter map.
    ///
    /// If the registration succeeds but the filter cannot be retrieved,
    /// the registration is removed before the error is returned.
    ///
    /// # Errors
    ///
    /// Returns an error if already registered or if the filter manager
    /// fails.
    pub fn register(&mut self, selector: &ContainerSelector) -> Result<MountNsFilter> {
        if self.filter.is_some() {
            return Err(KubetraceError::InvalidState {
                message: format!("tracer {} already registered", self.tracer),
            });
        }

        self.filters
            .add_tracer(&self.tracer, selector)
            .map_err(|e| KubetraceError::resource("adding tracer", e))?;

        let filter = match self.filters.tracer_filter(&self.tracer) {
            Ok(filter) => filter,
            Err(e) => {
                self.filters.remove_tracer(&self.tracer);
                return Err(KubetraceError::resource("creating mountns map", e));
            }
        };

        tracing::debug!(tracer = %self.tracer, map = filter.name(), "tracer registered");
        self.filter = Some(filter.clone());
        Ok(filter)
    }

    /// Releases the registration. Does nothing if not registered.
    pub fn unregister(&mut self) {
        if self.filter.take().is_some() {
            tracing::debug!(tracer = %self.tracer, "removing tracer");
            self.filters.remove_tracer(&self.tracer);
        }
    }

    /// Returns the filter map while registered.
    #[must_use]
    pub fn filter(&self) -> Option<&MountNsFilter> {
        self.filter.as_ref()
    }

    /// Returns whether the tracer is registered.
    #[must_use]
    pub fn is_registered(&self) -> bool {
        self.filter.is_some()
    }
}

impl Drop for FilterRegistration {
    fn drop(&mut self) {
        self.unregister();
    }
}
