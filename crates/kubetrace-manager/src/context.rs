//! Per-run variable store shared between the instrumentation and operators.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use kubetrace_common::config::KubetraceConfig;
use kubetrace_ebpf::filter::{FilterRequest, MountNsFilter};
use kubetrace_ebpf::instance::InstrumentationHandle;

use crate::publisher::RecordSink;

/// Value stored in the run context.
#[derive(Clone)]
pub enum ContextValue {
    /// Plain flag.
    Bool(bool),
    /// Instrumentation asks for a mount-namespace filter map.
    FilterRequest(FilterRequest),
    /// Filter map provided by the container manager.
    Filter(MountNsFilter),
    /// Capability descriptor of the instrumentation instance.
    Instrumentation(InstrumentationHandle),
    /// Run configuration.
    Config(KubetraceConfig),
    /// Data sources whose events need enrichment.
    EventWrappers(Vec<String>),
    /// Downstream sink for container records.
    Sink(Arc<dyn RecordSink>),
}

impl fmt::Debug for ContextValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => f.debug_tuple("Bool").field(b).finish(),
            Self::FilterRequest(r) => f.debug_tuple("FilterRequest").field(r).finish(),
            Self::Filter(m) => f.debug_tuple("Filter").field(&m.name()).finish(),
            Self::Instrumentation(i) => f.debug_tuple("Instrumentation").field(i).finish(),
            Self::Config(c) => f.debug_tuple("Config").field(c).finish(),
            Self::EventWrappers(w) => f.debug_tuple("EventWrappers").field(w).finish(),
            Self::Sink(_) => f.write_str("Sink(..)"),
        }
    }
}

/// Variables of one run, keyed by name.
#[derive(Debug, Default)]
pub struct RunContext {
    vars: HashMap<String, ContextValue>,
}

impl RunContext {
    /// Creates an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value stored under `key`.
    #[must_use]
    pub fn get_var(&self, key: &str) -> Option<&ContextValue> {
        self.vars.get(key)
    }

    /// Stores `value` under `key`, returning the previous value.
    pub fn set_var(&mut self, key: impl Into<String>, value: ContextValue) -> Option<ContextValue> {
        self.vars.insert(key.into(), value)
    }

    /// Removes `key`, returning its value.
    pub fn remove_var(&mut self, key: &str) -> Option<ContextValue> {
        self.vars.remove(key)
    }

    /// Returns `key` as a flag, if it holds one.
    #[must_use]
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.vars.get(key) {
            Some(ContextValue::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    /// Returns `key` as a configuration, if it holds one.
    #[must_use]
    pub fn get_config(&self, key: &str) -> Option<&KubetraceConfig> {
        match self.vars.get(key) {
            Some(ContextValue::Config(config)) => Some(config),
            _ => None,
        }
    }

    /// Returns `key` as an instrumentation descriptor, if it holds one.
    #[must_use]
    pub fn get_instrumentation(&self, key: &str) -> Option<&InstrumentationHandle> {
        match self.vars.get(key) {
            Some(ContextValue::Instrumentation(handle)) => Some(handle),
            _ => None,
        }
    }

    /// Returns `key` as a list of data source names; empty if unset.
    #[must_use]
    pub fn get_event_wrappers(&self, key: &str) -> &[String] {
        match self.vars.get(key) {
            Some(ContextValue::EventWrappers(names)) => names,
            _ => &[],
        }
    }

    /// Returns `key` as a record sink, if it holds one.
    #[must_use]
    pub fn get_sink(&self, key: &str) -> Option<Arc<dyn RecordSink>> {
        match self.vars.get(key) {
            Some(ContextValue::Sink(sink)) => Some(Arc::clone(sink)),
            _ => None,
        }
    }

    /// Returns `key` as a filter map, if the manager has provided one.
    #[must_use]
    pub fn get_filter(&self, key: &str) -> Option<&MountNsFilter> {
        match self.vars.get(key) {
            Some(ContextValue::Filter(filter)) => Some(filter),
            _ => None,
        }
    }
}
