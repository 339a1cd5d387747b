//! Container selector built from the run's filter parameters.

use std::collections::BTreeMap;

use kubetrace_common::types::Container;
use serde::{Deserialize, Serialize};

use crate::params::KubeManagerParams;

/// Predicate over namespace, pod, container, and labels.
///
/// Empty string fields match any value; every label must match exactly.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSelector {
    /// Pod namespace; empty matches all namespaces.
    pub namespace: String,
    /// Pod name; empty matches all pods.
    pub pod_name: String,
    /// Container name; empty matches all containers.
    pub container_name: String,
    /// Required pod labels.
    pub labels: BTreeMap<String, String>,
}

impl ContainerSelector {
    /// Builds the selector for a run.
    ///
    /// `all_namespaces` takes precedence over any explicit namespace.
    #[must_use]
    pub fn from_params(params: &KubeManagerParams) -> Self {
        let namespace = if params.all_namespaces {
            String::new()
        } else {
            params.namespace.clone()
        };
        Self {
            namespace,
            pod_name: params.pod_name.clone(),
            container_name: params.container_name.clone(),
            labels: params.selector.labels().clone(),
        }
    }

    /// Returns whether `container` satisfies the selector.
    #[must_use]
    pub fn matches(&self, container: &Container) -> bool {
        let k8s = &container.k8s;
        field_matches(&self.namespace, &k8s.namespace)
            && field_matches(&self.pod_name, &k8s.pod_name)
            && field_matches(&self.container_name, &k8s.container_name)
            && self
                .labels
                .iter()
                .all(|(key, value)| k8s.pod_labels.get(key) == Some(value))
    }
}

fn field_matches(wanted: &str, actual: &str) -> bool {
    wanted.is_empty() || wanted == actual
}
