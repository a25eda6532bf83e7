//! Group derivation from verified CI claims.
//!
//! Every authenticated job gets `ci`; jobs on a protected ref also get
//! `ci-protected`. With project groups enabled, each ancestor prefix of the
//! namespace path and then of the project path adds `ci:<prefix>` (and
//! `ci-protected:<prefix>` right after it for protected refs), so a policy can
//! grant access at any level of a nested group hierarchy.
//!
//! ```text
//! namespace_path = "my-org/team-a", project_path = "my-org/team-a/app", protected
//!
//! ci, ci-protected,
//! ci:my-org, ci-protected:my-org,
//! ci:my-org/team-a, ci-protected:my-org/team-a,
//! ci:my-org/team-a/app, ci-protected:my-org/team-a/app
//! ```

use crate::auth::claims::VerifiedClaims;
use serde::Serialize;
use std::collections::HashSet;

/// Group every authenticated CI job belongs to.
pub const BASE_GROUP: &str = "ci";

/// Group added for jobs running on a protected ref.
pub const PROTECTED_GROUP: &str = "ci-protected";

/// Ordered, duplicate-free list of group identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct GroupSet {
    groups: Vec<String>,
    #[serde(skip)]
    seen: HashSet<String>,
}

impl GroupSet {
    fn new() -> Self {
        Self {
            groups: Vec::new(),
            seen: HashSet::new(),
        }
    }

    /// Append `group` unless it is already present.
    fn push(&mut self, group: String) {
        if self.seen.insert(group.clone()) {
            self.groups.push(group);
        }
    }

    pub fn as_slice(&self) -> &[String] {
        &self.groups
    }

    pub fn contains(&self, group: &str) -> bool {
        self.seen.contains(group)
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// Always false for a derived set; `ci` is unconditional.
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, String> {
        self.groups.iter()
    }

    pub fn into_vec(self) -> Vec<String> {
        self.groups
    }
}

impl IntoIterator for GroupSet {
    type Item = String;
    type IntoIter = std::vec::IntoIter<String>;

    fn into_iter(self) -> Self::IntoIter {
        self.groups.into_iter()
    }
}

impl<'a> IntoIterator for &'a GroupSet {
    type Item = &'a String;
    type IntoIter = std::slice::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.groups.iter()
    }
}

/// Derive the group list for a verified job.
///
/// Pure and total: the same claims and flag always yield the same list.
pub fn derive_groups(claims: &VerifiedClaims, project_groups: bool) -> GroupSet {
    let mut groups = GroupSet::new();
    let protected = claims.ref_protected;

    groups.push(BASE_GROUP.to_string());
    if protected {
        groups.push(PROTECTED_GROUP.to_string());
    }

    if !project_groups {
        return groups;
    }

    for path in [&claims.namespace_path, &claims.project_path] {
        for prefix in path_prefixes(path) {
            groups.push(format!("{BASE_GROUP}:{prefix}"));
            if protected {
                groups.push(format!("{PROTECTED_GROUP}:{prefix}"));
            }
        }
    }

    groups
}

/// Cumulative slash-delimited prefixes of `path`, shortest first.
///
/// `"a/b/c"` yields `"a"`, `"a/b"`, `"a/b/c"`. Empty prefixes produced by a
/// leading slash are skipped, and a trailing or doubled slash never yields a
/// prefix ending in `/`.
pub fn path_prefixes(path: &str) -> impl Iterator<Item = &str> {
    path.match_indices('/')
        .map(|(idx, _)| idx)
        .chain(std::iter::once(path.len()))
        .filter_map(move |end| path.get(..end))
        .filter(|prefix| !prefix.is_empty() && !prefix.ends_with('/'))
}
