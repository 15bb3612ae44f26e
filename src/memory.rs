//! Working memory: the session-owned store of every fact an evaluation knows.
//!
//! Facts are deduplicated by structural equality and indexed by concrete
//! type, so exact-type queries are O(1) bucket lookups. Queries keyed by a
//! runtime instance test (the trait-query path) fall back to a linear scan
//! over all facts.
//!
//! Working memory is monotonic within one evaluation: facts are added, never
//! retracted. It also carries the per-evaluation bookkeeping the driver
//! accumulates — skips, trace, warnings, counters — and is dropped wholesale
//! when the session ends.

use std::any::{Any, TypeId};
use std::collections::{HashMap, HashSet};

use crate::fact::{FactRef, FactSet, TypeMatch};
use crate::result::RuleActivation;

/// Session-owned fact store plus evaluation bookkeeping.
#[derive(Debug, Default)]
pub struct WorkingMemory {
    all: FactSet,
    type_index: HashMap<TypeId, Vec<FactRef>>,
    derived: FactSet,
    /// Facts already examined per fallback rule slot. Compiled producers do
    /// not use this; their alpha memories play the same role.
    processed: HashMap<usize, HashSet<FactRef>>,
    pub(crate) skipped: HashMap<String, String>,
    pub(crate) trace: Vec<RuleActivation>,
    pub(crate) warnings: Vec<String>,
    pub(crate) iterations: u32,
    pub(crate) rule_activations: u64,
}

impl WorkingMemory {
    /// Fresh, empty working memory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fact. Returns `true` if it was new.
    ///
    /// New facts are appended to their concrete type's index bucket.
    pub fn add(&mut self, fact: FactRef) -> bool {
        if self.all.insert(fact.clone()) {
            self.type_index.entry(fact.type_id()).or_default().push(fact);
            true
        } else {
            false
        }
    }

    /// Insert a rule-produced fact. Returns `true` if it was new.
    pub fn add_derived(&mut self, fact: FactRef) -> bool {
        if self.add(fact.clone()) {
            self.derived.insert(fact);
            true
        } else {
            false
        }
    }

    /// Structural membership test.
    pub fn contains(&self, fact: &FactRef) -> bool {
        self.all.contains(fact)
    }

    /// Every fact, inserted and derived, in insertion order.
    pub fn all(&self) -> &FactSet {
        &self.all
    }

    /// Only rule-produced facts.
    pub fn derived(&self) -> &FactSet {
        &self.derived
    }

    /// All facts of concrete type `T`, via the type index.
    pub fn of_type<T: Any>(&self) -> Vec<&T> {
        self.type_index
            .get(&TypeId::of::<T>())
            .map(|bucket| {
                bucket
                    .iter()
                    .filter_map(|fact| fact.downcast_ref::<T>())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Fact handles satisfying a type selector.
    ///
    /// Exact selectors read their index bucket; instance tests scan all
    /// facts in insertion order.
    pub fn facts_matching(&self, matcher: &TypeMatch) -> Vec<FactRef> {
        match matcher.exact_type_id() {
            Some(type_id) => self
                .type_index
                .get(&type_id)
                .cloned()
                .unwrap_or_default(),
            None => self
                .all
                .iter()
                .filter(|fact| matcher.matches(fact))
                .cloned()
                .collect(),
        }
    }

    /// Number of distinct facts.
    pub fn len(&self) -> usize {
        self.all.len()
    }

    /// True when no facts are present.
    pub fn is_empty(&self) -> bool {
        self.all.is_empty()
    }

    /// Mark a fact as examined by the fallback rule in `slot`.
    ///
    /// Returns `true` the first time, `false` when already marked.
    pub(crate) fn mark_processed(&mut self, slot: usize, fact: &FactRef) -> bool {
        self.processed.entry(slot).or_default().insert(fact.clone())
    }
}
