//! # Cascade
//!
//! A forward-chaining production rules engine: facts in, derived facts and a
//! verdict out.
//!
//! ## Core Concepts
//!
//! Cascade separates **deriving** from **judging**:
//! - [`Producer`] = derivation (match a fact, emit a new fact)
//! - [`Validator`] = judgement (match a fact, pass or explain a failure)
//!
//! An [`Engine`] is an immutable description of rules, compiled once into
//! per-phase discrimination networks. Every evaluation spawns a fresh
//! session with its own working memory, so one engine serves any number of
//! parallel evaluations.
//!
//! ## Architecture
//!
//! ```text
//! initial facts
//!     │ insert (dedup)
//!     ▼
//! Working memory ◄───────────────────────────────┐
//!     │ snapshot                                 │
//!     ▼                                          │
//! Phase network (per phase, in order)            │
//!     ├─► AlphaNode: type + condition filter     │
//!     │        │ left_activate                   │
//!     ▼        ▼                                 │
//! OutputNode pending queues                      │
//!     │ drain highest priority first             │
//!     ▼                                          │
//! producer fires ─► new fact ────────────────────┘
//!     │                  (immediate re-activation)
//!     ▼ fixpoint, then async fallback loop
//! Validation pass (all phases' validators)
//!     │
//!     ▼
//! EngineResult { facts, derived, verdict, trace, … }
//! ```
//!
//! ## Key Invariants
//!
//! 1. **At-most-once firing** — an output node never fires twice for the
//!    same input tuple (by structural equality)
//! 2. **Monotonic memory** — facts are added, never retracted; `derived`
//!    is always a subset of `facts`
//! 3. **Priority order** — a higher-priority activation always fires before
//!    a queued lower-priority one; equal priorities fire in declaration
//!    order
//! 4. **Phase fixpoint** — a phase drains every pending activation before
//!    the next phase starts; validators run after all phases
//! 5. **Terminal `Completed`** — emitted exactly once per successful
//!    evaluation, after every other event
//!
//! ## Example
//!
//! ```ignore
//! use cascade::{facts, EngineBuilder, Producer, Validator};
//!
//! #[derive(Debug, Clone, PartialEq, Eq, Hash)]
//! struct Customer { id: String, total_spend_cents: u64 }
//!
//! #[derive(Debug, Clone, PartialEq, Eq, Hash)]
//! struct VipStatus { id: String, tier: String }
//!
//! let engine = EngineBuilder::new()
//!     .producer(Producer::new(
//!         "vip-check",
//!         |c: &Customer| c.total_spend_cents > 10_000_00,
//!         |c: &Customer| VipStatus { id: c.id.clone(), tier: "gold".into() },
//!     ))
//!     .build()?;
//!
//! let result = engine.evaluate(facts![
//!     Customer { id: "1".into(), total_spend_cents: 15_000_00 },
//!     Customer { id: "2".into(), total_spend_cents: 5_000_00 },
//! ])?;
//!
//! assert_eq!(result.derived_of_type::<VipStatus>().len(), 1);
//! assert!(result.passed());
//! ```
//!
//! ## What This Is Not
//!
//! Cascade is **not**:
//! - A truth-maintenance system (no fact retraction)
//! - A joining Rete (conditions see one fact at a time; no beta nodes)
//! - A scheduler (async rules are awaited cooperatively, nothing is spawned)
//!
//! Cascade **is**:
//! > A deterministic forward-chaining engine where producers derive,
//! > validators judge, and duplicate suppression defines termination.

// Core modules
mod context;
mod engine;
mod error;
mod event;
mod fact;
mod memory;
mod network;
mod result;
mod rule;
mod session;

// Declarative helpers
mod macros;

// Testing utilities (feature-gated)
#[cfg(any(test, feature = "testing"))]
pub mod testing;


// Re-export fact machinery
pub use crate::fact::{Fact, FactRef, FactSet, TypeMatch};

// Re-export context types
pub use crate::context::{ContextKey, RuleContext};

// Re-export the rule model
pub use crate::rule::{
    AsyncProducerRule, Condition, FailureReason, Guard, Output, Phase, Producer, ProducerRule,
    Validator,
};

// Re-export engine types (primary entry point)
pub use crate::engine::{Engine, EngineBuilder, EngineConfig, DEFAULT_PHASE_NAME};

// Re-export result types
pub use crate::result::{
    EngineResult, EvaluationId, EvaluationSummary, Failure, RuleActivation, Verdict,
};

// Re-export event types
pub use crate::event::{AuditCollector, CompositeCollector, EngineEvent, EventCollector};

// Re-export error types
pub use crate::error::EngineError;

// Re-export commonly used external types
pub use async_trait::async_trait;
