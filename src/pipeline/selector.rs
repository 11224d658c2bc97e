use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Include/exclude list over plain names (namespaces, containers).
///
/// An empty selector matches everything. When `include` is non-empty it wins
/// and `exclude` is ignored; validation rejects selectors that set both.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NameSelector {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<String>,
}

pub type NamespaceSelector = NameSelector;
pub type ContainerSelector = NameSelector;

impl NameSelector {
    pub fn including<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            include: names.into_iter().map(Into::into).collect(),
            exclude: Vec::new(),
        }
    }

    pub fn excluding<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            include: Vec::new(),
            exclude: names.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_unrestricted(&self) -> bool {
        self.include.is_empty() && self.exclude.is_empty()
    }

    pub fn allows(&self, name: &str) -> bool {
        if !self.include.is_empty() {
            return self.include.iter().any(|entry| entry == name);
        }
        !self.exclude.iter().any(|entry| entry == name)
    }

    /// Most-permissive union: the result allows a name whenever any of the
    /// given selectors allows it, and nothing else.
    ///
    /// Include-only members contribute the union of their includes. Exclude
    /// members contribute the intersection of their excludes, minus anything
    /// some include member allows. An empty iterator yields the unrestricted
    /// selector.
    pub fn union<'a, I>(selectors: I) -> Self
    where
        I: IntoIterator<Item = &'a NameSelector>,
    {
        let mut included = BTreeSet::new();
        let mut denied: Option<BTreeSet<String>> = None;

        for selector in selectors {
            if selector.is_unrestricted() {
                return Self::default();
            }
            if !selector.include.is_empty() {
                included.extend(selector.include.iter().cloned());
                continue;
            }
            let excluded: BTreeSet<String> = selector.exclude.iter().cloned().collect();
            denied = Some(match denied {
                None => excluded,
                Some(current) => current.intersection(&excluded).cloned().collect(),
            });
        }

        match denied {
            None if included.is_empty() => Self::default(),
            None => Self {
                include: included.into_iter().collect(),
                exclude: Vec::new(),
            },
            Some(denied) => Self {
                include: Vec::new(),
                exclude: denied.difference(&included).cloned().collect(),
            },
        }
    }
}
