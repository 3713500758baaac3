//! Global dimension renaming.
//!
//! Every operation of an imported graph names its axes uniquely for itself
//! (`node_d0`, `node_d1`, ...). The [`DimensionRenamer`] collects how those
//! scoped names relate across the whole graph and assigns each one a final name:
//!
//! - **equivalence**: two axes are the same semantic axis and get one name
//! - **ordering**: the axes of one tensor, in positional order; they must get
//!   distinct names that sort in that order
//!
//! Solving uses union-find for equivalences, then a topological sort of the
//! resulting classes. Among classes free to go next, the one registered first
//! wins, so the same constraints always give the same names.
//!
//! # Usage
//!
//! ```ignore
//! let mut renamer = DimensionRenamer::new();
//! renamer.add_ordering(&["x_d0", "x_d1"]);
//! renamer.add_ordering(&["y_d0"]);
//! renamer.add_equivalence("x_d1", "y_d0");
//!
//! let naming = renamer.solve()?;
//! assert_eq!(naming.get("y_d0"), Some("d1"));
//! ```

use std::collections::BTreeSet;

use egglog_union_find::UnionFind;
use indexmap::{IndexMap, IndexSet};
use itertools::Itertools;
use tracing::{debug, warn};

/// Errors solving dimension constraints.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RenameError {
    #[error("conflicting constraints on dimensions {}: {reason}", .dimensions.join(", "))]
    Conflict {
        dimensions: Vec<String>,
        reason: String,
    },
}

/// Collects dimension constraints for one import.
///
/// [`DimensionRenamer::solve`] consumes the renamer.
#[derive(Debug)]
pub struct DimensionRenamer {
    prefix: String,
    /// Registered names; the index is the dimension id
    dimensions: IndexSet<String>,
    equivalences: Vec<(usize, usize)>,
    orderings: Vec<Vec<usize>>,
}

impl Default for DimensionRenamer {
    fn default() -> Self {
        Self::new()
    }
}

impl DimensionRenamer {
    /// A renamer producing `d0`, `d1`, ...
    pub fn new() -> Self {
        Self::with_prefix("d")
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            dimensions: IndexSet::new(),
            equivalences: Vec::new(),
            orderings: Vec::new(),
        }
    }

    /// Register a dimension name. Registering twice is harmless.
    pub fn add_dimension(&mut self, name: &str) -> usize {
        match self.dimensions.get_index_of(name) {
            Some(id) => id,
            None => self.dimensions.insert_full(name.to_string()).0,
        }
    }

    /// Require `a` and `b` to get the same final name.
    pub fn add_equivalence(&mut self, a: &str, b: &str) {
        let a = self.add_dimension(a);
        let b = self.add_dimension(b);
        self.equivalences.push((a, b));
    }

    /// Require the axes of one tensor, in positional order, to get distinct
    /// final names that sort in that order.
    pub fn add_ordering<S: AsRef<str>>(&mut self, names: &[S]) {
        let ids = names
            .iter()
            .map(|name| self.add_dimension(name.as_ref()))
            .collect();
        self.orderings.push(ids);
    }

    pub fn dimension_count(&self) -> usize {
        self.dimensions.len()
    }

    /// Assign final names, or report the constraints that contradict each other.
    pub fn solve(self) -> Result<DimensionNaming, RenameError> {
        let count = self.dimensions.len();

        let mut uf: UnionFind<usize> = UnionFind::default();
        for &(a, b) in &self.equivalences {
            let ra = uf.find(a);
            let rb = uf.find(b);
            if ra != rb {
                uf.union(ra, rb);
            }
        }

        // Number classes in order of first registration
        let mut roots: IndexMap<usize, Vec<usize>> = IndexMap::new();
        let mut class_of = Vec::with_capacity(count);
        for id in 0..count {
            let entry = roots.entry(uf.find(id));
            let class = entry.index();
            entry.or_default().push(id);
            class_of.push(class);
        }
        let classes: Vec<Vec<usize>> = roots.into_values().collect();

        for ordering in &self.orderings {
            for (&a, &b) in ordering.iter().tuple_combinations() {
                if class_of[a] == class_of[b] {
                    return Err(self.conflict(
                        [a, b],
                        "two axes of one tensor are required to be the same axis",
                    ));
                }
            }
        }

        let mut successors: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); classes.len()];
        let mut in_degree = vec![0usize; classes.len()];
        for ordering in &self.orderings {
            for (&a, &b) in ordering.iter().tuple_windows() {
                if successors[class_of[a]].insert(class_of[b]) {
                    in_degree[class_of[b]] += 1;
                }
            }
        }

        let mut ready: BTreeSet<usize> = (0..classes.len()).filter(|&c| in_degree[c] == 0).collect();
        let mut position = vec![usize::MAX; classes.len()];
        let mut placed = 0;
        while let Some(class) = ready.pop_first() {
            position[class] = placed;
            placed += 1;
            for &next in &successors[class] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    ready.insert(next);
                }
            }
        }

        if placed < classes.len() {
            let stuck = (0..classes.len())
                .filter(|&c| in_degree[c] > 0)
                .flat_map(|c| classes[c].iter().copied());
            return Err(self.conflict(stuck, "axis orderings form a cycle"));
        }

        let width = classes.len().saturating_sub(1).to_string().len();
        let names = self
            .dimensions
            .iter()
            .zip(&class_of)
            .map(|(name, &class)| {
                let k = position[class];
                (name.clone(), format!("{}{:0width$}", self.prefix, k))
            })
            .collect();

        debug!(
            dimensions = count,
            classes = classes.len(),
            equivalences = self.equivalences.len(),
            orderings = self.orderings.len(),
            "solved dimension names"
        );
        Ok(DimensionNaming {
            names,
            classes: classes.len(),
        })
    }

    fn conflict(&self, ids: impl IntoIterator<Item = usize>, reason: &str) -> RenameError {
        let dimensions: Vec<String> = ids
            .into_iter()
            .filter_map(|id| self.dimensions.get_index(id).cloned())
            .collect();
        warn!(dimensions = ?dimensions, reason, "dimension renaming failed");
        RenameError::Conflict {
            dimensions,
            reason: reason.to_string(),
        }
    }
}

/// The solved mapping from scoped dimension names to final names.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DimensionNaming {
    /// In registration order
    names: IndexMap<String, String>,
    classes: usize,
}

impl DimensionNaming {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.names.get(name).map(String::as_str)
    }

    /// `(scoped, final)` pairs in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.names.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of registered dimensions.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Number of distinct final names.
    pub fn class_count(&self) -> usize {
        self.classes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equivalent_dimensions_share_a_name() {
        let mut r = DimensionRenamer::new();
        r.add_ordering(&["x_d0", "x_d1"]);
        r.add_ordering(&["y_d0", "y_d1"]);
        r.add_equivalence("x_d1", "y_d0");
        let naming = r.solve().unwrap();

        assert_eq!(naming.get("x_d0"), Some("d0"));
        assert_eq!(naming.get("x_d1"), Some("d1"));
        assert_eq!(naming.get("y_d0"), Some("d1"));
        assert_eq!(naming.get("y_d1"), Some("d2"));
        assert_eq!(naming.class_count(), 3);
        assert_eq!(naming.len(), 4);
    }

    #[test]
    fn test_unconstrained_dimensions_stay_distinct() {
        let mut r = DimensionRenamer::new();
        r.add_dimension("a");
        r.add_dimension("b");
        r.add_dimension("a");
        let naming = r.solve().unwrap();
        assert_eq!(naming.get("a"), Some("d0"));
        assert_eq!(naming.get("b"), Some("d1"));
        assert_eq!(naming.get("c"), None);
    }

    #[test]
    fn test_ordering_overrides_registration_order() {
        let mut r = DimensionRenamer::new();
        r.add_dimension("late");
        r.add_ordering(&["early", "late"]);
        let naming = r.solve().unwrap();
        assert_eq!(naming.get("early"), Some("d0"));
        assert_eq!(naming.get("late"), Some("d1"));
    }

    #[test]
    fn test_names_are_padded_to_sort_positionally() {
        let names: Vec<String> = (0..12).map(|i| format!("t_d{i}")).collect();
        let mut r = DimensionRenamer::with_prefix("axis");
        r.add_ordering(names.as_slice());
        let naming = r.solve().unwrap();
        assert_eq!(naming.get("t_d0"), Some("axis00"));
        assert_eq!(naming.get("t_d11"), Some("axis11"));
        let finals: Vec<&str> = naming.iter().map(|(_, f)| f).collect();
        let mut sorted = finals.clone();
        sorted.sort();
        assert_eq!(finals, sorted);
    }

    #[test]
    fn test_same_tensor_axes_cannot_merge() {
        let mut r = DimensionRenamer::new();
        r.add_ordering(&["a_d0", "a_d1"]);
        r.add_equivalence("a_d0", "m");
        r.add_equivalence("m", "a_d1");
        let err = r.solve().unwrap_err();
        let RenameError::Conflict { dimensions, .. } = err;
        assert_eq!(dimensions, vec!["a_d0".to_string(), "a_d1".to_string()]);
    }

    #[test]
    fn test_ordering_cycle_is_a_conflict() {
        let mut r = DimensionRenamer::new();
        r.add_dimension("free");
        r.add_ordering(&["a", "b"]);
        r.add_ordering(&["b", "a"]);
        let err = r.solve().unwrap_err();
        let RenameError::Conflict { dimensions, reason } = err;
        assert_eq!(dimensions, vec!["a".to_string(), "b".to_string()]);
        assert!(reason.contains("cycle"));
    }

    #[test]
    fn test_empty_renamer() {
        let naming = DimensionRenamer::new().solve().unwrap();
        assert!(naming.is_empty());
        assert_eq!(naming.class_count(), 0);
    }
}
