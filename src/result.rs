//! Evaluation outputs: the verdict, failure records, the activation trace and
//! the aggregate [`EngineResult`].
//!
//! Validation failures are *data*, not errors: an evaluation that ends in
//! `Verdict::Fail` is still a successful evaluation. Only structural
//! problems (iteration overrun, mode mismatch) surface as [`crate::EngineError`].

use std::any::Any;
use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::fact::{FactRef, FactSet};

// =============================================================================
// Evaluation Id
// =============================================================================

/// Correlates everything one evaluation produced: events, log spans, results.
///
/// Use `EvaluationId::NONE` where no evaluation is in scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EvaluationId(Uuid);

impl EvaluationId {
    /// Sentinel for "no evaluation" (nil UUID).
    pub const NONE: Self = Self(Uuid::nil());

    /// A fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Is this the `NONE` sentinel?
    pub fn is_none(&self) -> bool {
        self.0.is_nil()
    }

    /// The inner UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for EvaluationId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for EvaluationId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl fmt::Display for EvaluationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(f, "NONE")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

// =============================================================================
// Verdict & Failure
// =============================================================================

/// One validator rejection: which rule failed and the typed reason it gave.
#[derive(Clone, PartialEq, Eq)]
pub struct Failure {
    rule_name: String,
    reason: FactRef,
}

impl Failure {
    pub(crate) fn new(rule_name: impl Into<String>, reason: FactRef) -> Self {
        Self {
            rule_name: rule_name.into(),
            reason,
        }
    }

    /// Name of the validator that produced this failure.
    pub fn rule_name(&self) -> &str {
        &self.rule_name
    }

    /// The reason value, type-erased.
    pub fn reason(&self) -> &FactRef {
        &self.reason
    }

    /// The reason downcast to its concrete type.
    pub fn reason_as<T: Any>(&self) -> Option<&T> {
        self.reason.downcast_ref::<T>()
    }

    /// The reason rendered for humans (its `Debug` form; plain for strings).
    pub fn reason_text(&self) -> String {
        if let Some(text) = self.reason.downcast_ref::<String>() {
            text.clone()
        } else if let Some(text) = self.reason.downcast_ref::<&'static str>() {
            (*text).to_string()
        } else {
            format!("{:?}", self.reason)
        }
    }
}

impl fmt::Debug for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Failure")
            .field("rule_name", &self.rule_name)
            .field("reason", &self.reason)
            .finish()
    }
}

/// The aggregate validation outcome.
///
/// `Fail` carries failures in collection order: validator declaration order,
/// facts in working-memory insertion order within each validator.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Verdict {
    /// Every validator passed on every matching fact.
    #[default]
    Pass,
    /// At least one validator rejected a fact.
    Fail(Vec<Failure>),
}

impl Verdict {
    pub(crate) fn from_failures(failures: Vec<Failure>) -> Self {
        if failures.is_empty() {
            Verdict::Pass
        } else {
            Verdict::Fail(failures)
        }
    }

    /// True for `Pass`.
    pub fn passed(&self) -> bool {
        matches!(self, Verdict::Pass)
    }

    /// The failures, empty for `Pass`.
    pub fn failures(&self) -> &[Failure] {
        match self {
            Verdict::Pass => &[],
            Verdict::Fail(failures) => failures,
        }
    }
}

// =============================================================================
// Trace
// =============================================================================

/// One recorded rule firing that produced output.
///
/// Populated only when tracing is enabled in the engine configuration.
#[derive(Clone, Debug)]
pub struct RuleActivation {
    rule_name: String,
    input: FactRef,
    outputs: Vec<FactRef>,
    priority: i32,
}

impl RuleActivation {
    pub(crate) fn new(
        rule_name: impl Into<String>,
        input: FactRef,
        outputs: Vec<FactRef>,
        priority: i32,
    ) -> Self {
        Self {
            rule_name: rule_name.into(),
            input,
            outputs,
            priority,
        }
    }

    /// Name of the producer that fired.
    pub fn rule_name(&self) -> &str {
        &self.rule_name
    }

    /// The fact the producer fired on.
    pub fn input(&self) -> &FactRef {
        &self.input
    }

    /// The facts this firing added to working memory (duplicates excluded).
    pub fn outputs(&self) -> &[FactRef] {
        &self.outputs
    }

    /// The producer's priority at firing time.
    pub fn priority(&self) -> i32 {
        self.priority
    }
}

// =============================================================================
// Engine Result
// =============================================================================

/// Everything one evaluation produced.
///
/// Cheap to clone: fact sets share their underlying allocations.
#[derive(Clone, Debug)]
pub struct EngineResult {
    pub(crate) facts: FactSet,
    pub(crate) derived: FactSet,
    pub(crate) verdict: Verdict,
    pub(crate) skipped: HashMap<String, String>,
    pub(crate) rule_activations: u64,
    pub(crate) iterations: u32,
    pub(crate) trace: Vec<RuleActivation>,
    pub(crate) warnings: Vec<String>,
    pub(crate) evaluation_id: EvaluationId,
    pub(crate) started_at: DateTime<Utc>,
    pub(crate) finished_at: DateTime<Utc>,
}

impl EngineResult {
    /// All facts after the evaluation: inserted and derived.
    pub fn facts(&self) -> &FactSet {
        &self.facts
    }

    /// Only the facts produced by rules.
    pub fn derived(&self) -> &FactSet {
        &self.derived
    }

    /// The validation verdict.
    pub fn verdict(&self) -> &Verdict {
        &self.verdict
    }

    /// Rules suppressed by their guard: rule name → guard description.
    pub fn skipped(&self) -> &HashMap<String, String> {
        &self.skipped
    }

    /// How many rule firings added at least one new fact.
    pub fn rule_activations(&self) -> u64 {
        self.rule_activations
    }

    /// Driver loop iterations consumed across all phases.
    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    /// The activation trace; empty unless tracing was enabled.
    pub fn trace(&self) -> &[RuleActivation] {
        &self.trace
    }

    /// Soft warnings accumulated during the evaluation.
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// The id correlating this evaluation's events and log spans.
    pub fn evaluation_id(&self) -> EvaluationId {
        self.evaluation_id
    }

    /// When the evaluation began.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// When the evaluation finished.
    pub fn finished_at(&self) -> DateTime<Utc> {
        self.finished_at
    }

    /// Wall-clock duration of the evaluation.
    pub fn elapsed(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }

    /// True when the verdict is `Pass`.
    pub fn passed(&self) -> bool {
        self.verdict.passed()
    }

    /// True when the verdict is `Fail`.
    pub fn failed(&self) -> bool {
        !self.passed()
    }

    /// All post-evaluation facts of type `T`.
    pub fn facts_of_type<T: Any>(&self) -> Vec<&T> {
        self.facts.of_type::<T>()
    }

    /// All derived facts of type `T`.
    pub fn derived_of_type<T: Any>(&self) -> Vec<&T> {
        self.derived.of_type::<T>()
    }

    /// Failures whose reason is a `T`, in collection order.
    pub fn failures_of_type<T: Any>(&self) -> Vec<&Failure> {
        self.verdict
            .failures()
            .iter()
            .filter(|failure| failure.reason_as::<T>().is_some())
            .collect()
    }

    /// A serializable digest of the evaluation, for audit sinks and logs.
    pub fn summary(&self) -> EvaluationSummary {
        EvaluationSummary {
            evaluation_id: self.evaluation_id.to_string(),
            passed: self.passed(),
            fact_count: self.facts.len(),
            derived_count: self.derived.len(),
            failure_count: self.verdict.failures().len(),
            rule_activations: self.rule_activations,
            iterations: self.iterations,
            skipped: self.skipped.clone(),
            warnings: self.warnings.clone(),
            started_at: self.started_at,
            finished_at: self.finished_at,
        }
    }
}

/// Serializable digest of an [`EngineResult`].
///
/// Facts are type-erased and deliberately absent; sinks that need them
/// render the `Debug` form from the event stream instead.
#[derive(Clone, Debug, Serialize)]
pub struct EvaluationSummary {
    pub evaluation_id: String,
    pub passed: bool,
    pub fact_count: usize,
    pub derived_count: usize,
    pub failure_count: usize,
    pub rule_activations: u64,
    pub iterations: u32,
    pub skipped: HashMap<String, String>,
    pub warnings: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evaluation_id_none_sentinel() {
        assert!(EvaluationId::NONE.is_none());
        assert_eq!(EvaluationId::NONE.to_string(), "NONE");
        assert!(!EvaluationId::new().is_none());
    }

    #[test]
    fn evaluation_ids_are_unique() {
        assert_ne!(EvaluationId::new(), EvaluationId::new());
    }

    #[test]
    fn verdict_from_failures() {
        assert_eq!(Verdict::from_failures(Vec::new()), Verdict::Pass);

        let failure = Failure::new("max-order", FactRef::new("too big".to_string()));
        let verdict = Verdict::from_failures(vec![failure.clone()]);
        assert!(!verdict.passed());
        assert_eq!(verdict.failures(), &[failure]);
    }

    #[test]
    fn failure_reason_downcasts() {
        let failure = Failure::new("max-order", FactRef::new("total was 150".to_string()));
        assert_eq!(failure.rule_name(), "max-order");
        assert_eq!(
            failure.reason_as::<String>().map(String::as_str),
            Some("total was 150")
        );
        assert!(failure.reason_as::<u32>().is_none());
        assert!(failure.reason_text().contains("150"));
    }

    #[test]
    fn typed_failure_reasons_survive() {
        #[derive(Debug, Clone, PartialEq, Eq, Hash)]
        struct OverLimit {
            limit_cents: u64,
            actual_cents: u64,
        }

        let failure = Failure::new(
            "max-order",
            FactRef::new(OverLimit {
                limit_cents: 100,
                actual_cents: 150,
            }),
        );
        let reason = failure.reason_as::<OverLimit>().unwrap();
        assert_eq!(reason.actual_cents, 150);
    }
}
