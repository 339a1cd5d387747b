//! Formatted output helpers for CLI commands.
//!
//! Provides consistent table formatting for containers and parameters.

use std::collections::BTreeMap;
use std::fmt::Write;
use std::sync::Arc;

use kubetrace_common::types::Container;
use kubetrace_manager::params::ParamDesc;
use kubetrace_manager::selector::ContainerSelector;

/// Formats pod labels as `key=value` pairs, or `-` when there are none.
#[must_use]
pub fn format_labels(labels: &BTreeMap<String, String>) -> String {
    if labels.is_empty() {
        return "-".to_string();
    }
    labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

fn or_dash(value: &str) -> &str {
    if value.is_empty() { "-" } else { value }
}

/// Renders the known containers and whether the selector matches each.
#[must_use]
pub fn container_table(containers: &[Arc<Container>], selector: &ContainerSelector) -> String {
    if containers.is_empty() {
        return "No containers found.\n".to_string();
    }
    let mut out = format!(
        "{:<16} {:<15} {:<20} {:<15} {:<8} {:<6} {}\n",
        "CONTAINER ID", "NAMESPACE", "POD", "CONTAINER", "PID", "MATCH", "LABELS"
    );
    for c in containers {
        let _ = writeln!(
            out,
            "{:<16} {:<15} {:<20} {:<15} {:<8} {:<6} {}",
            c.id,
            or_dash(&c.k8s.namespace),
            or_dash(&c.k8s.pod_name),
            or_dash(&c.k8s.container_name),
            c.pid,
            if selector.matches(c) { "yes" } else { "no" },
            format_labels(&c.k8s.pod_labels)
        );
    }
    out
}

/// Renders parameter descriptors as a table.
#[must_use]
pub fn param_table(descs: &[ParamDesc]) -> String {
    let mut out = format!(
        "{:<16} {:<6} {:<8} {}\n",
        "KEY", "ALIAS", "DEFAULT", "DESCRIPTION"
    );
    for d in descs {
        let _ = writeln!(
            out,
            "{:<16} -{:<5} {:<8} {}",
            d.key,
            d.alias,
            or_dash(d.default_value),
            d.description
        );
    }
    out
}
