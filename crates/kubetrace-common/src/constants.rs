//! Parameter keys, run-context variable names, and defaults.

/// Name under which the container manager operator registers.
pub const OPERATOR_NAME: &str = "KubeManager";

/// Parameter: show only data from containers with that name.
pub const PARAM_CONTAINER_NAME: &str = "containername";
/// Parameter: comma-separated `key=value` label selector.
pub const PARAM_SELECTOR: &str = "selector";
/// Parameter: show data from pods in all namespaces.
pub const PARAM_ALL_NAMESPACES: &str = "all-namespaces";
/// Parameter: show only data from pods with that name.
pub const PARAM_POD_NAME: &str = "podname";
/// Parameter: show only data from pods in a given namespace.
pub const PARAM_NAMESPACE: &str = "namespace";

/// Run-context variable holding the mount-namespace filter request or handle.
pub const VAR_MNTNS_FILTER_MAP: &str = "gadget_mntns_filter_map";
/// Run-context variable set to `true` once the filter map is populated.
pub const VAR_FILTER_BY_MNTNS: &str = "gadget_filter_by_mntns";
/// Run-context variable requesting container lifecycle events.
pub const VAR_NEED_CONTAINER_EVENTS: &str = "NeedContainerEvents";
/// Run-context variable holding the instrumentation instance.
pub const VAR_INSTRUMENTATION: &str = "ebpfInstance";
/// Run-context variable holding the run configuration.
pub const VAR_CONFIG: &str = "config";
/// Run-context variable listing data sources that need enrichment.
pub const VAR_EVENT_WRAPPERS: &str = "event_wrappers";
/// Run-context variable holding the containers data source sink.
pub const VAR_CONTAINERS_SINK: &str = "containers";

/// Default capacity of a subscriber's event queue.
pub const DEFAULT_EVENT_BUFFER: usize = 64;

/// Application name used in CLI output.
pub const APP_NAME: &str = "kubetrace";
