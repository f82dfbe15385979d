use serde::Deserialize;
use serde::Serialize;

use super::RedirectCandidate;

/// Data-volume control applied to redirect candidates.
///
/// The snapshot reader pushes this predicate down into its query; the engine
/// applies [`InclusionFilter::allows`] again so sources that cannot filter
/// still get the same semantics. Title lengths count Unicode scalar values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InclusionFilter {
    /// Target namespaces to keep. Empty keeps every namespace.
    pub namespaces: Vec<i64>,
    pub min_title_len: usize,
    pub max_title_len: Option<usize>,
}

impl Default for InclusionFilter {
    fn default() -> Self {
        Self {
            namespaces: Vec::new(),
            min_title_len: 1,
            max_title_len: None,
        }
    }
}

impl InclusionFilter {
    pub fn matches(&self, namespace: i64, title: &str) -> bool {
        if !self.namespaces.is_empty() && !self.namespaces.contains(&namespace) {
            return false;
        }
        let len = title.chars().count();
        if len < self.min_title_len {
            return false;
        }
        self.max_title_len.is_none_or(|max| len <= max)
    }

    pub fn allows(&self, candidate: &RedirectCandidate) -> bool {
        self.matches(candidate.target_namespace, &candidate.target_title)
    }
}
