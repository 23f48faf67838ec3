//! Label selector evaluation
//!
//! Compiles a [`LabelSelector`] into a [`Selector`] once per pass and
//! matches it against LVMVolumeGroup labels. Operator semantics follow the
//! Kubernetes API: `NotIn` also matches objects without the key.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use std::collections::{BTreeMap, BTreeSet};

use crate::error::{Error, Result};

/// A single compiled requirement
#[derive(Debug, Clone, PartialEq, Eq)]
enum Requirement {
    Equals(String, String),
    In(String, BTreeSet<String>),
    NotIn(String, BTreeSet<String>),
    Exists(String),
    DoesNotExist(String),
}

impl Requirement {
    fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        match self {
            Requirement::Equals(key, value) => labels.get(key) == Some(value),
            Requirement::In(key, values) => labels.get(key).map_or(false, |v| values.contains(v)),
            Requirement::NotIn(key, values) => labels.get(key).map_or(true, |v| !values.contains(v)),
            Requirement::Exists(key) => labels.contains_key(key),
            Requirement::DoesNotExist(key) => !labels.contains_key(key),
        }
    }
}

/// Compiled label selector
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selector {
    requirements: Vec<Requirement>,
}

impl Selector {
    /// Compile a selector, rejecting malformed requirements
    pub fn compile(selector: &LabelSelector) -> Result<Self> {
        let mut requirements = Vec::new();

        for (key, value) in selector.match_labels.iter().flatten() {
            validate_key(key)?;
            requirements.push(Requirement::Equals(key.clone(), value.clone()));
        }

        for expr in selector.match_expressions.iter().flatten() {
            validate_key(&expr.key)?;
            let values: BTreeSet<String> = expr.values.iter().flatten().cloned().collect();

            let requirement = match expr.operator.as_str() {
                "In" | "NotIn" if values.is_empty() => {
                    return Err(invalid(format!(
                        "values set for operator {} on key {:?} can't be empty",
                        expr.operator, expr.key
                    )))
                }
                "Exists" | "DoesNotExist" if !values.is_empty() => {
                    return Err(invalid(format!(
                        "values set for operator {} on key {:?} must be empty",
                        expr.operator, expr.key
                    )))
                }
                "In" => Requirement::In(expr.key.clone(), values),
                "NotIn" => Requirement::NotIn(expr.key.clone(), values),
                "Exists" => Requirement::Exists(expr.key.clone()),
                "DoesNotExist" => Requirement::DoesNotExist(expr.key.clone()),
                other => {
                    return Err(invalid(format!(
                        "{:?} is not a valid label selector operator",
                        other
                    )))
                }
            };
            requirements.push(requirement);
        }

        Ok(Self { requirements })
    }

    /// True when the selector has no requirements and would match everything
    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    /// Whether every requirement holds for `labels`
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.requirements.iter().all(|r| r.matches(labels))
    }
}

fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(invalid("label key must not be empty".into()));
    }
    Ok(())
}

fn invalid(reason: String) -> Error {
    Error::Resolution(format!("unable to parse lvmVolumeGroupSelector: {}", reason))
}
