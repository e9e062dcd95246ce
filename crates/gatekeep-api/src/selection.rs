//! Restriction target sets

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Applications, categories and web domains one selection restricts.
///
/// Targets are opaque tokens handed out by the enforcement collaborator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestrictionSet {
    #[serde(default)]
    pub applications: BTreeSet<String>,
    #[serde(default)]
    pub categories: BTreeSet<String>,
    #[serde(default)]
    pub domains: BTreeSet<String>,
}

impl RestrictionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_applications<I, S>(mut self, apps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.applications.extend(apps.into_iter().map(Into::into));
        self
    }

    pub fn with_categories<I, S>(mut self, categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.categories.extend(categories.into_iter().map(Into::into));
        self
    }

    pub fn with_domains<I, S>(mut self, domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.domains.extend(domains.into_iter().map(Into::into));
        self
    }

    /// Set-union of any number of selections
    pub fn union_of<'a>(sets: impl IntoIterator<Item = &'a RestrictionSet>) -> Self {
        sets.into_iter().fold(Self::default(), |mut acc, set| {
            acc.extend(set);
            acc
        })
    }

    pub fn extend(&mut self, other: &RestrictionSet) {
        self.applications.extend(other.applications.iter().cloned());
        self.categories.extend(other.categories.iter().cloned());
        self.domains.extend(other.domains.iter().cloned());
    }

    pub fn is_empty(&self) -> bool {
        self.applications.is_empty() && self.categories.is_empty() && self.domains.is_empty()
    }

    /// Total number of targets across all three groups
    pub fn len(&self) -> usize {
        self.applications.len() + self.categories.len() + self.domains.len()
    }
}
