/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/modules/management_api/src/labels.rs
*
* Label selectors. A `Selector` is a conjunction of `Requirement`s; it can be
* evaluated locally against an object's labels (used by the fake clients) and
* rendered in the Kubernetes selector syntax accepted by `ListParams::labels`.
*
* SPDX-License-Identifier: Apache-2.0
*/

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Operator {
    Equals(String),
    NotEquals(String),
    In(BTreeSet<String>),
    NotIn(BTreeSet<String>),
    Exists,
    DoesNotExist,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Requirement {
    key: String,
    operator: Operator,
}

impl Requirement {
    pub fn equals(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self { key: key.into(), operator: Operator::Equals(value.into()) }
    }

    /// Matches objects where the key is absent or carries another value.
    pub fn not_equals(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self { key: key.into(), operator: Operator::NotEquals(value.into()) }
    }

    pub fn is_in<I, S>(key: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            key: key.into(),
            operator: Operator::In(values.into_iter().map(Into::into).collect()),
        }
    }

    pub fn not_in<I, S>(key: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            key: key.into(),
            operator: Operator::NotIn(values.into_iter().map(Into::into).collect()),
        }
    }

    pub fn exists(key: impl Into<String>) -> Self {
        Self { key: key.into(), operator: Operator::Exists }
    }

    pub fn does_not_exist(key: impl Into<String>) -> Self {
        Self { key: key.into(), operator: Operator::DoesNotExist }
    }

    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        let value = labels.get(&self.key);
        match &self.operator {
            Operator::Equals(v) => value == Some(v),
            Operator::NotEquals(v) => value != Some(v),
            Operator::In(set) => value.is_some_and(|v| set.contains(v)),
            Operator::NotIn(set) => !value.is_some_and(|v| set.contains(v)),
            Operator::Exists => value.is_some(),
            Operator::DoesNotExist => value.is_none(),
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |set: &BTreeSet<String>| set.iter().cloned().collect::<Vec<_>>().join(",");
        match &self.operator {
            Operator::Equals(v) => write!(f, "{}={}", self.key, v),
            Operator::NotEquals(v) => write!(f, "{}!={}", self.key, v),
            Operator::In(set) => write!(f, "{} in ({})", self.key, join(set)),
            Operator::NotIn(set) => write!(f, "{} notin ({})", self.key, join(set)),
            Operator::Exists => write!(f, "{}", self.key),
            Operator::DoesNotExist => write!(f, "!{}", self.key),
        }
    }
}

/// A conjunction of requirements. The empty selector matches everything.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Selector {
    requirements: Vec<Requirement>,
}

impl Selector {
    pub fn everything() -> Self {
        Self::default()
    }

    /// Equality selector over a set of labels.
    pub fn from_set<I, K, V>(set: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            requirements: set.into_iter().map(|(k, v)| Requirement::equals(k, v)).collect(),
        }
    }

    pub fn add(mut self, requirement: Requirement) -> Self {
        self.requirements.push(requirement);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.requirements.iter().all(|r| r.matches(labels))
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self.requirements.iter().map(ToString::to_string).collect();
        f.write_str(&rendered.join(","))
    }
}
