//! Container filter flags shared by the commands.

use std::collections::HashMap;

use clap::Args;
use kubetrace_common::constants::{
    PARAM_ALL_NAMESPACES, PARAM_CONTAINER_NAME, PARAM_NAMESPACE, PARAM_POD_NAME, PARAM_SELECTOR,
};
use kubetrace_manager::params::LabelSelector;

/// Flags selecting which containers a run applies to.
#[derive(Args, Debug, Clone, Default)]
pub struct FilterArgs {
    /// Show only data from containers with that name.
    #[arg(short = 'c', long = "containername")]
    pub container_name: Option<String>,

    /// Labels selector to filter on. Only '=' is supported (e.g. key1=value1,key2=value2).
    #[arg(short = 'l', long, value_parser = parse_selector)]
    pub selector: Option<String>,

    /// Show only data from pods with that name.
    #[arg(short = 'p', long = "podname")]
    pub pod_name: Option<String>,

    /// Show only data from pods in a given namespace.
    #[arg(short = 'n', long)]
    pub namespace: Option<String>,

    /// Show data from pods in all namespaces.
    #[arg(short = 'A', long = "all-namespaces")]
    pub all_namespaces: bool,
}

impl FilterArgs {
    /// Converts the flags into the container manager's parameter map.
    #[must_use]
    pub fn to_params(&self) -> HashMap<String, String> {
        let mut params = HashMap::new();
        let set = [
            (PARAM_CONTAINER_NAME, &self.container_name),
            (PARAM_SELECTOR, &self.selector),
            (PARAM_POD_NAME, &self.pod_name),
            (PARAM_NAMESPACE, &self.namespace),
        ];
        for (key, value) in set {
            if let Some(value) = value {
                let _ = params.insert(key.to_string(), value.clone());
            }
        }
        let _ = params.insert(
            PARAM_ALL_NAMESPACES.to_string(),
            self.all_namespaces.to_string(),
        );
        params
    }
}

/// Rejects malformed selectors at argument parsing time.
fn parse_selector(value: &str) -> Result<String, String> {
    LabelSelector::parse(value)
        .map(|_| value.to_string())
        .map_err(|e| e.to_string())
}
