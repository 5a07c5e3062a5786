//! Closure of the patterns that must be counted to serve a request
//!
//! Continuation counts of a pattern are derived from the final counts of its
//! source pattern, so asking for a continuation pattern implicitly asks for
//! its source, the source of its source, and so on down to some absolute
//! pattern.

use crate::pattern::{Family, Pattern};
use std::collections::{BTreeMap, BTreeSet};

/// Everything that must be computed to serve a set of patterns
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct NeededComputations {
    /// Truth that some pattern needs part-of-speech tags
    pub tagging: bool,

    /// Absolute patterns to be counted
    pub absolute: BTreeSet<Pattern>,

    /// Continuation patterns to be counted
    pub continuation: BTreeSet<Pattern>,
}
//
impl NeededComputations {
    /// Patterns of one family
    pub fn family(&self, family: Family) -> &BTreeSet<Pattern> {
        match family {
            Family::Absolute => &self.absolute,
            Family::Continuation => &self.continuation,
        }
    }

    /// Every pattern, both families included
    pub fn all(&self) -> BTreeSet<Pattern> {
        self.absolute.union(&self.continuation).cloned().collect()
    }

    /// Continuation patterns grouped by number of continuation markers
    ///
    /// The source of a pattern from some layer always belongs to an earlier
    /// layer or to the absolute patterns, so counting layers in order never
    /// needs a source that isn't counted yet.
    pub fn continuation_layers(&self) -> BTreeMap<usize, BTreeSet<Pattern>> {
        let mut layers = BTreeMap::<usize, BTreeSet<Pattern>>::new();
        for pattern in &self.continuation {
            (layers.entry(pattern.continuation_marker_count()))
                .or_default()
                .insert(pattern.clone());
        }
        layers
    }
}

/// Compute the transitive closure of the patterns needed by a request
pub fn resolve(needed: &BTreeSet<Pattern>) -> NeededComputations {
    let mut result = NeededComputations::default();
    let mut visited = BTreeSet::new();
    let mut queue = needed.iter().cloned().collect::<Vec<_>>();
    while let Some(pattern) = queue.pop() {
        if !visited.insert(pattern.clone()) {
            continue;
        }
        result.tagging |= pattern.contains_pos();
        match pattern.continuation_source() {
            None => {
                result.absolute.insert(pattern);
            }
            Some(source) => {
                result.continuation.insert(pattern);
                if !visited.contains(&source) {
                    queue.push(source);
                }
            }
        }
    }
    log::debug!("Resolved absolute     = {:?}", result.absolute);
    log::debug!("Resolved continuation = {:?}", result.continuation);
    result
}
