//! The slug → path snapshot published by every rebuild.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub const FAMILY_REAL_PREFIX: &str = "/products/family/";
pub const DETAIL_REAL_PREFIX: &str = "/products/detail/";

/// Canonical (pretty) and stable (real) path for one slug.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    pub pretty_path: String,
    pub real_path: String,
}

impl Entry {
    pub fn family(slug: &str, pretty_path: String) -> Self {
        Self {
            pretty_path,
            real_path: format!("{FAMILY_REAL_PREFIX}{slug}"),
        }
    }

    pub fn detail(slug: &str, pretty_path: String) -> Self {
        Self {
            pretty_path,
            real_path: format!("{DETAIL_REAL_PREFIX}{slug}"),
        }
    }
}

/// Whole-snapshot unit of caching and persistence; replaced, never patched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Maps {
    pub family: BTreeMap<String, Entry>,
    pub detail: BTreeMap<String, Entry>,
}

impl Maps {
    /// Detail entries shadow family entries with the same slug.
    pub fn find(&self, slug: &str) -> Option<&Entry> {
        self.detail.get(slug).or_else(|| self.family.get(slug))
    }

    pub fn is_empty(&self) -> bool {
        self.family.is_empty() && self.detail.is_empty()
    }

    /// Every entry whose pretty path differs between `self` and `previous`,
    /// including additions and removals.
    pub fn changed_since<'a>(
        &'a self,
        previous: &'a Maps,
    ) -> Vec<(Option<&'a Entry>, Option<&'a Entry>)> {
        let mut changed = Vec::new();
        let tables = [
            (&previous.family, &self.family),
            (&previous.detail, &self.detail),
        ];
        for (before, after) in tables {
            for (slug, entry) in after {
                match before.get(slug) {
                    Some(old) if old == entry => {}
                    old => changed.push((old, Some(entry))),
                }
            }
            for (slug, entry) in before {
                if !after.contains_key(slug) {
                    changed.push((Some(entry), None));
                }
            }
        }
        changed
    }
}
