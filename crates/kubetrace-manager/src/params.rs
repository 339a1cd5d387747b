//! User-facing filter parameters.
//!
//! Values are validated here, at the parameter level, so that the selector
//! builder only ever sees well-formed input.

use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;

use kubetrace_common::constants::{
    PARAM_ALL_NAMESPACES, PARAM_CONTAINER_NAME, PARAM_NAMESPACE, PARAM_POD_NAME, PARAM_SELECTOR,
};
use kubetrace_common::error::{KubetraceError, Result};
use serde::Serialize;

const SELECTOR_FORMAT: &str =
    "should be a comma-separated list of key-value pairs (key=value[,key=value,...])";

/// Description of one parameter accepted by the container manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ParamDesc {
    /// Parameter key.
    pub key: &'static str,
    /// Single-letter alias.
    pub alias: &'static str,
    /// Human-readable description.
    pub description: &'static str,
    /// Value used when the parameter is not supplied.
    pub default_value: &'static str,
    /// Whether the value is a boolean flag.
    pub is_bool: bool,
}

/// Parameters accepted by the container manager.
pub const PARAM_DESCS: [ParamDesc; 5] = [
    ParamDesc {
        key: PARAM_CONTAINER_NAME,
        alias: "c",
        description: "Show only data from containers with that name",
        default_value: "",
        is_bool: false,
    },
    ParamDesc {
        key: PARAM_SELECTOR,
        alias: "l",
        description: "Labels selector to filter on. Only '=' is supported (e.g. key1=value1,key2=value2).",
        default_value: "",
        is_bool: false,
    },
    ParamDesc {
        key: PARAM_POD_NAME,
        alias: "p",
        description: "Show only data from pods with that name",
        default_value: "",
        is_bool: false,
    },
    ParamDesc {
        key: PARAM_ALL_NAMESPACES,
        alias: "A",
        description: "Show data from pods in all namespaces",
        default_value: "false",
        is_bool: true,
    },
    ParamDesc {
        key: PARAM_NAMESPACE,
        alias: "n",
        description: "Show only data from pods in a given namespace",
        default_value: "",
        is_bool: false,
    },
];

/// A parsed `key=value[,key=value...]` label selector.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSelector(BTreeMap<String, String>);

impl LabelSelector {
    /// Parses a label selector string. The empty string selects everything.
    ///
    /// # Errors
    ///
    /// Returns [`KubetraceError::Validation`] if any comma-separated pair
    /// does not contain exactly one `=`.
    pub fn parse(value: &str) -> Result<Self> {
        let mut labels = BTreeMap::new();
        if value.is_empty() {
            return Ok(Self(labels));
        }
        for pair in value.split(',') {
            let mut parts = pair.split('=');
            let (Some(key), Some(val), None) = (parts.next(), parts.next(), parts.next()) else {
                return Err(KubetraceError::Validation {
                    key: PARAM_SELECTOR.into(),
                    message: SELECTOR_FORMAT.into(),
                });
            };
            let _ = labels.insert(key.to_owned(), val.to_owned());
        }
        Ok(Self(labels))
    }

    /// Returns the parsed labels.
    #[must_use]
    pub fn labels(&self) -> &BTreeMap<String, String> {
        &self.0
    }
}

impl FromStr for LabelSelector {
    type Err = KubetraceError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Validated filter parameters of one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KubeManagerParams {
    /// Container name filter.
    pub container_name: String,
    /// Pod label filter.
    pub selector: LabelSelector,
    /// Pod name filter.
    pub pod_name: String,
    /// Pod namespace filter.
    pub namespace: String,
    /// Ignore `namespace` and match every namespace.
    pub all_namespaces: bool,
}

impl KubeManagerParams {
    /// Copies parameter values from a string map, validating each one.
    ///
    /// Missing keys take their default value.
    ///
    /// # Errors
    ///
    /// Returns [`KubetraceError::Validation`] for unknown keys, malformed
    /// selectors, or non-boolean `all-namespaces` values.
    pub fn from_map(values: &HashMap<String, String>) -> Result<Self> {
        if let Some(unknown) = values
            .keys()
            .find(|key| !PARAM_DESCS.iter().any(|desc| desc.key == key.as_str()))
        {
            return Err(KubetraceError::Validation {
                key: unknown.clone(),
                message: "unknown parameter".into(),
            });
        }

        let get = |key: &str| values.get(key).cloned().unwrap_or_default();
        Ok(Self {
            container_name: get(PARAM_CONTAINER_NAME),
            selector: LabelSelector::parse(&get(PARAM_SELECTOR))?,
            pod_name: get(PARAM_POD_NAME),
            namespace: get(PARAM_NAMESPACE),
            all_namespaces: parse_bool(PARAM_ALL_NAMESPACES, &get(PARAM_ALL_NAMESPACES))?,
        })
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value {
        "" | "0" | "f" | "F" | "false" | "FALSE" | "False" => Ok(false),
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Ok(true),
        other => Err(KubetraceError::Validation {
            key: key.into(),
            message: format!("expected a boolean, got {other:?}"),
        }),
    }
}
