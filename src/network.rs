//! The per-phase discrimination network: alpha nodes filter facts by type and
//! condition, output nodes queue de-duplicated activations for the driver.
//!
//! The compiler builds one network per phase at engine construction. Async
//! producers cannot run inside the (synchronous) network, so they are set
//! aside as *fallback* producers and driven by a naive loop after the
//! network reaches fixpoint.
//!
//! Nodes hold per-session state (alpha memories, `fired_for` sets, pending
//! queues). A session takes its own clone of the compiled network and resets
//! it before use, so evaluations never share mutable state.

use std::any::TypeId;
use std::collections::{HashMap, HashSet, VecDeque};

use crate::fact::{FactRef, TypeMatch};
use crate::rule::{Condition, Output, Phase};

// =============================================================================
// Alpha node
// =============================================================================

/// Type + condition filter with a memory of accepted facts.
#[derive(Clone, Debug)]
pub(crate) struct AlphaNode {
    condition: Condition,
    /// Facts that already passed this node's test. Failing facts are *not*
    /// memoized: a fact rejected here may still be accepted by another node.
    memory: HashSet<FactRef>,
    /// Output-node slots fed by this node.
    successors: Vec<usize>,
}

// =============================================================================
// Output node
// =============================================================================

/// Terminal node: owns the at-most-once set and the pending activation queue
/// for one compiled producer.
#[derive(Clone, Debug)]
pub(crate) struct OutputNode {
    /// Slot of this node within the network, used to mark guard-skipped nodes.
    id: usize,
    /// Index of the producer within its phase's declaration order.
    producer_index: usize,
    rule_name: String,
    priority: i32,
    output: Output,
    /// Input tuples this node has ever queued (at-most-once invariant).
    fired_for: HashSet<FactRef>,
    /// Queued, not-yet-fired activations, in arrival order.
    pending: VecDeque<FactRef>,
}

impl OutputNode {
    /// Queue an activation unless this input tuple was already queued.
    fn queue_activation(&mut self, fact: FactRef) {
        if self.fired_for.insert(fact.clone()) {
            self.pending.push_back(fact);
        }
    }

    pub(crate) fn id(&self) -> usize {
        self.id
    }

    pub(crate) fn producer_index(&self) -> usize {
        self.producer_index
    }

    pub(crate) fn rule_name(&self) -> &str {
        &self.rule_name
    }

    pub(crate) fn priority(&self) -> i32 {
        self.priority
    }

    pub(crate) fn output(&self) -> &Output {
        &self.output
    }

    pub(crate) fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Drain every queued activation, preserving arrival order.
    pub(crate) fn take_pending(&mut self) -> Vec<FactRef> {
        self.pending.drain(..).collect()
    }

    fn reset(&mut self) {
        self.fired_for.clear();
        self.pending.clear();
    }
}

// =============================================================================
// Network
// =============================================================================

/// One phase's compiled alpha/output node graph.
#[derive(Clone, Debug, Default)]
pub(crate) struct Network {
    alphas: Vec<AlphaNode>,
    outputs: Vec<OutputNode>,
    /// Alpha nodes keyed by concrete input type, tried first.
    exact: HashMap<TypeId, Vec<usize>>,
    /// Alpha nodes keyed by a runtime instance test, tried for every fact.
    instance: Vec<usize>,
    /// Alpha input selectors, parallel to `alphas` (kept out of the node so
    /// the hot path borrows them independently).
    selectors: Vec<TypeMatch>,
}

impl Network {
    /// Push a fact through every matching alpha node.
    ///
    /// Exact-type nodes are tried first via the type key, then every
    /// instance-test node is offered the fact. Returns `true` iff any node
    /// accepted it.
    pub(crate) fn activate(&mut self, fact: &FactRef) -> bool {
        let mut targets: Vec<usize> = Vec::new();
        if let Some(indices) = self.exact.get(&fact.type_id()) {
            targets.extend_from_slice(indices);
        }
        targets.extend_from_slice(&self.instance);

        let mut accepted = false;
        for index in targets {
            accepted |= self.activate_alpha(index, fact);
        }
        accepted
    }

    fn activate_alpha(&mut self, index: usize, fact: &FactRef) -> bool {
        if !self.selectors[index].matches(fact) {
            return false;
        }
        let alpha = &mut self.alphas[index];
        if alpha.memory.contains(fact) {
            return false;
        }
        // Async producers never compile into the network, so the condition
        // here is always the sync form.
        let Some(condition) = alpha.condition.as_sync() else {
            return false;
        };
        if !condition(fact) {
            return false;
        }
        alpha.memory.insert(fact.clone());

        let successors = alpha.successors.clone();
        for successor in successors {
            self.outputs[successor].queue_activation(fact.clone());
        }
        true
    }

    /// Any activation queued anywhere?
    pub(crate) fn has_pending_activations(&self) -> bool {
        self.outputs.iter().any(OutputNode::has_pending)
    }

    /// Output-node slots ordered by descending priority, declaration order
    /// breaking ties.
    pub(crate) fn outputs_by_priority(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.outputs.len()).collect();
        order.sort_by_key(|&slot| {
            let node = &self.outputs[slot];
            (std::cmp::Reverse(node.priority()), node.producer_index())
        });
        order
    }

    pub(crate) fn output(&self, slot: usize) -> &OutputNode {
        &self.outputs[slot]
    }

    pub(crate) fn output_mut(&mut self, slot: usize) -> &mut OutputNode {
        &mut self.outputs[slot]
    }

    pub(crate) fn output_count(&self) -> usize {
        self.outputs.len()
    }

    /// Clear all per-session state: alpha memories, `fired_for`, queues.
    pub(crate) fn reset(&mut self) {
        for alpha in &mut self.alphas {
            alpha.memory.clear();
        }
        for output in &mut self.outputs {
            output.reset();
        }
    }
}

// =============================================================================
// Compiler
// =============================================================================

/// A phase compiled for execution: the sync network plus the indices of the
/// phase's async producers, which run in the fallback loop.
#[derive(Clone, Debug, Default)]
pub(crate) struct CompiledPhase {
    pub(crate) network: Network,
    pub(crate) fallback: Vec<usize>,
}

/// Compile one phase's producers into a network.
///
/// Sync producers get one alpha node (keyed by input type, carrying the
/// match condition) linked to one output node (carrying name, priority and
/// the output function). Async producers go to the fallback list unchanged.
pub(crate) fn compile(phase: &Phase) -> CompiledPhase {
    let mut compiled = CompiledPhase::default();

    for (producer_index, producer) in phase.producers().iter().enumerate() {
        if producer.is_async() {
            compiled.fallback.push(producer_index);
            continue;
        }

        let network = &mut compiled.network;
        let output_slot = network.outputs.len();
        network.outputs.push(OutputNode {
            id: output_slot,
            producer_index,
            rule_name: producer.name().to_string(),
            priority: producer.priority(),
            output: producer.output().clone(),
            fired_for: HashSet::new(),
            pending: VecDeque::new(),
        });

        let alpha_slot = network.alphas.len();
        network.alphas.push(AlphaNode {
            condition: producer.condition().clone(),
            memory: HashSet::new(),
            successors: vec![output_slot],
        });
        network.selectors.push(producer.input().clone());

        match producer.input().exact_type_id() {
            Some(type_id) => network.exact.entry(type_id).or_default().push(alpha_slot),
            None => network.instance.push(alpha_slot),
        }
    }

    compiled
}
