//! Decides whether a run needs container awareness at all.
//!
//! Instrumentation that never consults container identity should not pay
//! for a registry subscription or a filter map, so the manager only
//! engages when at least one run-context signal asks for it.

use kubetrace_common::constants::{VAR_EVENT_WRAPPERS, VAR_MNTNS_FILTER_MAP, VAR_NEED_CONTAINER_EVENTS};
use kubetrace_ebpf::instance::InstrumentationHandle;

use crate::context::{ContextValue, RunContext};

/// Run-context signals read at instantiation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActivationSignals {
    /// The instrumentation declared a mount-namespace filter map.
    pub filter_requested: bool,
    /// The run asked for container lifecycle events.
    pub needs_container_events: bool,
    /// Number of data sources registered for enrichment.
    pub event_wrappers: usize,
}

impl ActivationSignals {
    /// Reads the signals from `ctx`.
    #[must_use]
    pub fn from_context(ctx: &RunContext) -> Self {
        let filter_requested = matches!(
            ctx.get_var(VAR_MNTNS_FILTER_MAP),
            Some(ContextValue::FilterRequest(_) | ContextValue::Filter(_))
        );
        Self {
            filter_requested,
            needs_container_events: ctx.get_bool(VAR_NEED_CONTAINER_EVENTS).unwrap_or(false),
            event_wrappers: ctx.get_event_wrappers(VAR_EVENT_WRAPPERS).len(),
        }
    }

    /// Returns whether any signal asks for the manager.
    #[must_use]
    pub const fn engaged(&self) -> bool {
        self.filter_requested || self.needs_container_events || self.event_wrappers > 0
    }
}

/// Returns the signals of `ctx` if they engage the manager.
#[must_use]
pub fn decide(ctx: &RunContext) -> Option<ActivationSignals> {
    let signals = ActivationSignals::from_context(ctx);
    if signals.engaged() {
        tracing::debug!(?signals, "container manager engaged");
        Some(signals)
    } else {
        None
    }
}

/// Sub-capabilities enabled for one run, computed once at pre-start.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[allow(clippy::struct_excessive_bools)]
pub struct Capabilities {
    /// Register a filter map for the tracer.
    pub wants_filter: bool,
    /// Drive attach/detach from lifecycle events.
    pub wants_attach_detach: bool,
    /// Enrich captured events with container identity.
    pub wants_enrichment: bool,
    /// Publish the matching containers downstream.
    pub wants_publish: bool,
}

impl Capabilities {
    /// Combines run signals with what the instrumentation can do.
    #[must_use]
    pub fn resolve(
        signals: &ActivationSignals,
        instrumentation: Option<&InstrumentationHandle>,
        publish: bool,
    ) -> Self {
        let accepts_filter = instrumentation.is_some_and(|i| i.filter_consumer().is_some());
        let attaches = instrumentation.is_some_and(|i| i.attacher().is_some());
        Self {
            wants_filter: signals.filter_requested || accepts_filter,
            wants_attach_detach: attaches,
            wants_enrichment: signals.event_wrappers > 0,
            wants_publish: publish,
        }
    }
}
