//! The rule model: producers, validators, guards and phases.
//!
//! A **producer** watches facts of one input type and, when its condition
//! holds, derives a new fact. A **validator** watches facts of one input type
//! and, when its condition fails, contributes a typed failure reason to the
//! verdict. Both may carry a **guard**: a context-only predicate that
//! suppresses the rule for an entire evaluation before any fact is examined.
//!
//! Conditions and outputs each come in a sync and an async form
//! ([`Condition`], [`Output`], [`FailureReason`] are two-variant sums); a rule
//! is async iff any of its halves is async. Engines containing async rules
//! must be evaluated with `evaluate_async`.
//!
//! Rules are built either from closures:
//!
//! ```ignore
//! let vip = Producer::new(
//!     "vip-check",
//!     |c: &Customer| c.total_spend_cents > 10_000_00,
//!     |c: &Customer| VipStatus { id: c.id.clone(), tier: "gold".into() },
//! )
//! .with_priority(10);
//! ```
//!
//! or from trait implementations ([`ProducerRule`], [`AsyncProducerRule`])
//! when a rule carries its own state or dependencies.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::{self, BoxFuture, FutureExt};

use crate::context::RuleContext;
use crate::fact::{FactRef, TypeMatch};

// =============================================================================
// Guard
// =============================================================================

/// A context-only predicate evaluated before any fact is examined.
///
/// When the predicate returns `false`, the rule is skipped for the whole
/// evaluation and `(rule_name → description)` is recorded in the result.
#[derive(Clone)]
pub struct Guard {
    description: String,
    predicate: Arc<dyn Fn(&RuleContext) -> bool + Send + Sync>,
}

impl Guard {
    /// Build a guard from a description and a context predicate.
    pub fn new(
        description: impl Into<String>,
        predicate: impl Fn(&RuleContext) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            description: description.into(),
            predicate: Arc::new(predicate),
        }
    }

    /// The human-readable description recorded when the guard blocks.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Evaluate the guard against the evaluation context.
    pub fn allows(&self, context: &RuleContext) -> bool {
        (self.predicate)(context)
    }
}

impl fmt::Debug for Guard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Guard").field(&self.description).finish()
    }
}

// =============================================================================
// Condition
// =============================================================================

type SyncCondFn = dyn Fn(&FactRef) -> bool + Send + Sync;
type AsyncCondFn = dyn Fn(FactRef) -> BoxFuture<'static, bool> + Send + Sync;

#[derive(Clone)]
enum CondKind {
    Sync(Arc<SyncCondFn>),
    Async(Arc<AsyncCondFn>),
}

/// A rule's match predicate: sync or async.
#[derive(Clone)]
pub struct Condition(CondKind);

impl Condition {
    /// A sync condition on a concrete input type.
    ///
    /// A fact of any other type fails the condition.
    pub fn typed<In: Any>(f: impl Fn(&In) -> bool + Send + Sync + 'static) -> Self {
        Self(CondKind::Sync(Arc::new(move |fact: &FactRef| {
            fact.downcast_ref::<In>().map(|input| f(input)).unwrap_or(false)
        })))
    }

    /// An async condition on a concrete input type.
    ///
    /// The input is cloned into the future, so the caller's borrow does not
    /// cross the await point.
    pub fn typed_async<In, Fut>(f: impl Fn(In) -> Fut + Send + Sync + 'static) -> Self
    where
        In: Any + Clone + Send + Sync,
        Fut: Future<Output = bool> + Send + 'static,
    {
        Self(CondKind::Async(Arc::new(move |fact: FactRef| {
            match fact.downcast_ref::<In>() {
                Some(input) => f(input.clone()).boxed(),
                None => future::ready(false).boxed(),
            }
        })))
    }

    /// A sync condition over the type-erased fact handle.
    ///
    /// This is the form instance-test (trait-keyed) rules use.
    pub fn raw(f: impl Fn(&FactRef) -> bool + Send + Sync + 'static) -> Self {
        Self(CondKind::Sync(Arc::new(f)))
    }

    /// Is this the async form?
    pub fn is_async(&self) -> bool {
        matches!(self.0, CondKind::Async(_))
    }

    /// The sync predicate, or `None` for the async form.
    pub(crate) fn as_sync(&self) -> Option<&SyncCondFn> {
        match &self.0 {
            CondKind::Sync(f) => Some(f.as_ref()),
            CondKind::Async(_) => None,
        }
    }

    /// Evaluate, awaiting the async form.
    pub(crate) async fn test(&self, fact: &FactRef) -> bool {
        match &self.0 {
            CondKind::Sync(f) => f(fact),
            CondKind::Async(f) => f(fact.clone()).await,
        }
    }
}

impl fmt::Debug for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            CondKind::Sync(_) => write!(f, "Condition::Sync"),
            CondKind::Async(_) => write!(f, "Condition::Async"),
        }
    }
}

// =============================================================================
// Output
// =============================================================================

type SyncOutputFn = dyn Fn(&FactRef) -> Option<FactRef> + Send + Sync;
type AsyncOutputFn = dyn Fn(FactRef) -> BoxFuture<'static, Option<FactRef>> + Send + Sync;

#[derive(Clone)]
enum OutputKind {
    Sync(Arc<SyncOutputFn>),
    Async(Arc<AsyncOutputFn>),
}

/// A producer's output function: sync or async, optionally producing nothing.
#[derive(Clone)]
pub struct Output(OutputKind);

impl Output {
    /// A sync output on a concrete input type, always producing one fact.
    pub fn typed<In, Out>(f: impl Fn(&In) -> Out + Send + Sync + 'static) -> Self
    where
        In: Any,
        Out: Any + Send + Sync + fmt::Debug + Eq + Hash,
    {
        Self::typed_filtered(move |input: &In| Some(f(input)))
    }

    /// A sync output that may decline to produce a fact for some inputs.
    pub fn typed_filtered<In, Out>(f: impl Fn(&In) -> Option<Out> + Send + Sync + 'static) -> Self
    where
        In: Any,
        Out: Any + Send + Sync + fmt::Debug + Eq + Hash,
    {
        Self(OutputKind::Sync(Arc::new(move |fact: &FactRef| {
            fact.downcast_ref::<In>().and_then(|input| f(input)).map(FactRef::new)
        })))
    }

    /// An async output on a concrete input type.
    pub fn typed_async<In, Out, Fut>(f: impl Fn(In) -> Fut + Send + Sync + 'static) -> Self
    where
        In: Any + Clone + Send + Sync,
        Out: Any + Send + Sync + fmt::Debug + Eq + Hash,
        Fut: Future<Output = Out> + Send + 'static,
    {
        Self(OutputKind::Async(Arc::new(move |fact: FactRef| {
            match fact.downcast_ref::<In>() {
                Some(input) => f(input.clone()).map(|out| Some(FactRef::new(out))).boxed(),
                None => future::ready(None).boxed(),
            }
        })))
    }

    /// A sync output over the type-erased fact handle.
    pub fn raw(f: impl Fn(&FactRef) -> Option<FactRef> + Send + Sync + 'static) -> Self {
        Self(OutputKind::Sync(Arc::new(f)))
    }

    /// Is this the async form?
    pub fn is_async(&self) -> bool {
        matches!(self.0, OutputKind::Async(_))
    }

    /// The sync function, or `None` for the async form.
    pub(crate) fn as_sync(&self) -> Option<&SyncOutputFn> {
        match &self.0 {
            OutputKind::Sync(f) => Some(f.as_ref()),
            OutputKind::Async(_) => None,
        }
    }

    /// Produce, awaiting the async form.
    pub(crate) async fn produce(&self, fact: &FactRef) -> Option<FactRef> {
        match &self.0 {
            OutputKind::Sync(f) => f(fact),
            OutputKind::Async(f) => f(fact.clone()).await,
        }
    }
}

impl fmt::Debug for Output {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            OutputKind::Sync(_) => write!(f, "Output::Sync"),
            OutputKind::Async(_) => write!(f, "Output::Async"),
        }
    }
}

// =============================================================================
// Producer
// =============================================================================

/// A forward-chaining rule: `In → Out`.
///
/// Names are correlation keys for events, skips and the trace; the engine
/// does not require them to be unique.
#[derive(Clone, Debug)]
pub struct Producer {
    name: String,
    description: Option<String>,
    priority: i32,
    guard: Option<Guard>,
    input: TypeMatch,
    condition: Condition,
    output: Output,
}

impl Producer {
    /// A sync producer from a condition and an output closure.
    pub fn new<In, Out, C, O>(name: impl Into<String>, condition: C, output: O) -> Self
    where
        In: Any + Send + Sync,
        Out: Any + Send + Sync + fmt::Debug + Eq + Hash,
        C: Fn(&In) -> bool + Send + Sync + 'static,
        O: Fn(&In) -> Out + Send + Sync + 'static,
    {
        Self::from_parts(
            name,
            TypeMatch::of::<In>(),
            Condition::typed(condition),
            Output::typed(output),
        )
    }

    /// A sync producer whose output may decline to produce a fact.
    pub fn new_filtered<In, Out, C, O>(name: impl Into<String>, condition: C, output: O) -> Self
    where
        In: Any + Send + Sync,
        Out: Any + Send + Sync + fmt::Debug + Eq + Hash,
        C: Fn(&In) -> bool + Send + Sync + 'static,
        O: Fn(&In) -> Option<Out> + Send + Sync + 'static,
    {
        Self::from_parts(
            name,
            TypeMatch::of::<In>(),
            Condition::typed(condition),
            Output::typed_filtered(output),
        )
    }

    /// An async producer: both condition and output are awaited.
    pub fn new_async<In, Out, C, O, CFut, OFut>(
        name: impl Into<String>,
        condition: C,
        output: O,
    ) -> Self
    where
        In: Any + Clone + Send + Sync,
        Out: Any + Send + Sync + fmt::Debug + Eq + Hash,
        C: Fn(In) -> CFut + Send + Sync + 'static,
        O: Fn(In) -> OFut + Send + Sync + 'static,
        CFut: Future<Output = bool> + Send + 'static,
        OFut: Future<Output = Out> + Send + 'static,
    {
        Self::from_parts(
            name,
            TypeMatch::of::<In>(),
            Condition::typed_async(condition),
            Output::typed_async(output),
        )
    }

    /// A mixed producer: sync condition, async output.
    pub fn with_async_output<In, Out, C, O, OFut>(
        name: impl Into<String>,
        condition: C,
        output: O,
    ) -> Self
    where
        In: Any + Clone + Send + Sync,
        Out: Any + Send + Sync + fmt::Debug + Eq + Hash,
        C: Fn(&In) -> bool + Send + Sync + 'static,
        O: Fn(In) -> OFut + Send + Sync + 'static,
        OFut: Future<Output = Out> + Send + 'static,
    {
        Self::from_parts(
            name,
            TypeMatch::of::<In>(),
            Condition::typed(condition),
            Output::typed_async(output),
        )
    }

    /// Assemble a producer from explicit parts.
    ///
    /// This is the escape hatch for instance-test (trait-keyed) rules, which
    /// pair a [`TypeMatch::instance`] selector with [`Condition::raw`] /
    /// [`Output::raw`] functions over the fact handle.
    pub fn from_parts(
        name: impl Into<String>,
        input: TypeMatch,
        condition: Condition,
        output: Output,
    ) -> Self {
        Self {
            name: name.into(),
            description: None,
            priority: 0,
            guard: None,
            input,
            condition,
            output,
        }
    }

    /// Adapt a [`ProducerRule`] implementation.
    pub fn from_rule<R: ProducerRule>(rule: R) -> Self {
        let name = rule.name().to_string();
        let priority = rule.priority();
        let guard = rule.guard();
        let rule = Arc::new(rule);
        let matcher = rule.clone();
        let mut producer = Self::from_parts(
            name,
            TypeMatch::of::<R::In>(),
            Condition::typed(move |input: &R::In| matcher.matches(input)),
            Output::typed(move |input: &R::In| rule.produce(input)),
        );
        producer.priority = priority;
        producer.guard = guard;
        producer
    }

    /// Adapt an [`AsyncProducerRule`] implementation.
    pub fn from_async_rule<R: AsyncProducerRule>(rule: R) -> Self {
        let name = rule.name().to_string();
        let priority = rule.priority();
        let guard = rule.guard();
        let rule = Arc::new(rule);
        let matcher = rule.clone();
        let mut producer = Self::from_parts(
            name,
            TypeMatch::of::<R::In>(),
            Condition::typed_async(move |input: R::In| {
                let matcher = matcher.clone();
                async move { matcher.matches(input).await }
            }),
            Output::typed_async(move |input: R::In| {
                let rule = rule.clone();
                async move { rule.produce(input).await }
            }),
        );
        producer.priority = priority;
        producer.guard = guard;
        producer
    }

    /// Set the firing priority (default 0; higher fires first).
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Attach a human-readable description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Attach a guard.
    pub fn with_guard(mut self, guard: Guard) -> Self {
        self.guard = Some(guard);
        self
    }

    /// The rule name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The optional description.
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// The firing priority.
    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// The optional guard.
    pub fn guard(&self) -> Option<&Guard> {
        self.guard.as_ref()
    }

    /// The input type selector.
    pub fn input(&self) -> &TypeMatch {
        &self.input
    }

    /// True when the condition or the output is async.
    pub fn is_async(&self) -> bool {
        self.condition.is_async() || self.output.is_async()
    }

    pub(crate) fn condition(&self) -> &Condition {
        &self.condition
    }

    pub(crate) fn output(&self) -> &Output {
        &self.output
    }
}

/// Trait form of a sync producer, for rules that carry state or deps.
///
/// Adapted with [`Producer::from_rule`].
pub trait ProducerRule: Send + Sync + 'static {
    /// Input fact type.
    type In: Any + Send + Sync;
    /// Output fact type.
    type Out: Any + Send + Sync + fmt::Debug + Eq + Hash;

    /// The rule name.
    fn name(&self) -> &str;

    /// The firing priority (default 0).
    fn priority(&self) -> i32 {
        0
    }

    /// The optional guard (default none).
    fn guard(&self) -> Option<Guard> {
        None
    }

    /// Does this rule match the fact?
    fn matches(&self, fact: &Self::In) -> bool;

    /// Derive the output fact.
    fn produce(&self, fact: &Self::In) -> Self::Out;
}

/// Trait form of an async producer.
///
/// Adapted with [`Producer::from_async_rule`]. Inputs are passed by value
/// (cloned) so the futures are `'static`.
#[async_trait]
pub trait AsyncProducerRule: Send + Sync + 'static {
    /// Input fact type.
    type In: Any + Clone + Send + Sync;
    /// Output fact type.
    type Out: Any + Send + Sync + fmt::Debug + Eq + Hash;

    /// The rule name.
    fn name(&self) -> &str;

    /// The firing priority (default 0).
    fn priority(&self) -> i32 {
        0
    }

    /// The optional guard (default none).
    fn guard(&self) -> Option<Guard> {
        None
    }

    /// Does this rule match the fact?
    async fn matches(&self, fact: Self::In) -> bool;

    /// Derive the output fact.
    async fn produce(&self, fact: Self::In) -> Self::Out;
}

// =============================================================================
// Failure reason
// =============================================================================

type SyncReasonFn = dyn Fn(&FactRef) -> FactRef + Send + Sync;
type AsyncReasonFn = dyn Fn(FactRef) -> BoxFuture<'static, FactRef> + Send + Sync;

#[derive(Clone)]
enum ReasonKind {
    Sync(Arc<SyncReasonFn>),
    Async(Arc<AsyncReasonFn>),
}

/// A validator's failure-reason function: sync or async.
///
/// The reason is an arbitrary typed value — a string, an enum, a struct —
/// carried inside [`crate::Failure`].
#[derive(Clone)]
pub struct FailureReason(ReasonKind);

impl FailureReason {
    /// A sync reason on a concrete input type.
    ///
    /// Falls back to a generic string when the fact is not an `In`; with
    /// exact-typed validators that branch is unreachable.
    pub fn typed<In, Cause>(f: impl Fn(&In) -> Cause + Send + Sync + 'static) -> Self
    where
        In: Any,
        Cause: Any + Send + Sync + fmt::Debug + Eq + Hash,
    {
        Self(ReasonKind::Sync(Arc::new(move |fact: &FactRef| {
            match fact.downcast_ref::<In>() {
                Some(input) => FactRef::new(f(input)),
                None => FactRef::new(format!("validation failed for {}", fact.type_name())),
            }
        })))
    }

    /// An async reason on a concrete input type.
    pub fn typed_async<In, Cause, Fut>(f: impl Fn(In) -> Fut + Send + Sync + 'static) -> Self
    where
        In: Any + Clone + Send + Sync,
        Cause: Any + Send + Sync + fmt::Debug + Eq + Hash,
        Fut: Future<Output = Cause> + Send + 'static,
    {
        Self(ReasonKind::Async(Arc::new(move |fact: FactRef| {
            match fact.downcast_ref::<In>() {
                Some(input) => f(input.clone()).map(|cause| FactRef::new(cause)).boxed(),
                None => {
                    let fallback =
                        FactRef::new(format!("validation failed for {}", fact.type_name()));
                    future::ready(fallback).boxed()
                }
            }
        })))
    }

    /// A sync reason over the type-erased fact handle.
    pub fn raw(f: impl Fn(&FactRef) -> FactRef + Send + Sync + 'static) -> Self {
        Self(ReasonKind::Sync(Arc::new(f)))
    }

    /// Is this the async form?
    pub fn is_async(&self) -> bool {
        matches!(self.0, ReasonKind::Async(_))
    }

    /// The sync function, or `None` for the async form.
    pub(crate) fn as_sync(&self) -> Option<&SyncReasonFn> {
        match &self.0 {
            ReasonKind::Sync(f) => Some(f.as_ref()),
            ReasonKind::Async(_) => None,
        }
    }

    /// Compute the reason, awaiting the async form.
    pub(crate) async fn compute(&self, fact: &FactRef) -> FactRef {
        match &self.0 {
            ReasonKind::Sync(f) => f(fact),
            ReasonKind::Async(f) => f(fact.clone()).await,
        }
    }
}

impl fmt::Debug for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            ReasonKind::Sync(_) => write!(f, "FailureReason::Sync"),
            ReasonKind::Async(_) => write!(f, "FailureReason::Async"),
        }
    }
}

// =============================================================================
// Validator
// =============================================================================

/// A validation rule: a pass/fail condition plus a typed failure reason.
#[derive(Clone, Debug)]
pub struct Validator {
    name: String,
    description: Option<String>,
    priority: i32,
    guard: Option<Guard>,
    input: TypeMatch,
    condition: Condition,
    reason: FailureReason,
}

impl Validator {
    /// A sync validator: `condition` must hold for every matching fact;
    /// `reason` explains each fact it does not hold for.
    pub fn new<In, Cause, C, R>(name: impl Into<String>, condition: C, reason: R) -> Self
    where
        In: Any + Send + Sync,
        Cause: Any + Send + Sync + fmt::Debug + Eq + Hash,
        C: Fn(&In) -> bool + Send + Sync + 'static,
        R: Fn(&In) -> Cause + Send + Sync + 'static,
    {
        Self::from_parts(
            name,
            TypeMatch::of::<In>(),
            Condition::typed(condition),
            FailureReason::typed(reason),
        )
    }

    /// An async validator: condition and reason are both awaited.
    pub fn new_async<In, Cause, C, R, CFut, RFut>(
        name: impl Into<String>,
        condition: C,
        reason: R,
    ) -> Self
    where
        In: Any + Clone + Send + Sync,
        Cause: Any + Send + Sync + fmt::Debug + Eq + Hash,
        C: Fn(In) -> CFut + Send + Sync + 'static,
        R: Fn(In) -> RFut + Send + Sync + 'static,
        CFut: Future<Output = bool> + Send + 'static,
        RFut: Future<Output = Cause> + Send + 'static,
    {
        Self::from_parts(
            name,
            TypeMatch::of::<In>(),
            Condition::typed_async(condition),
            FailureReason::typed_async(reason),
        )
    }

    /// Assemble a validator from explicit parts (the trait-keyed escape
    /// hatch, like [`Producer::from_parts`]).
    pub fn from_parts(
        name: impl Into<String>,
        input: TypeMatch,
        condition: Condition,
        reason: FailureReason,
    ) -> Self {
        Self {
            name: name.into(),
            description: None,
            priority: 0,
            guard: None,
            input,
            condition,
            reason,
        }
    }

    /// Set the priority (carried in the rule model; the validation pass
    /// itself runs in declaration order).
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Attach a human-readable description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Attach a guard.
    pub fn with_guard(mut self, guard: Guard) -> Self {
        self.guard = Some(guard);
        self
    }

    /// The rule name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The optional description.
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// The priority.
    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// The optional guard.
    pub fn guard(&self) -> Option<&Guard> {
        self.guard.as_ref()
    }

    /// The input type selector.
    pub fn input(&self) -> &TypeMatch {
        &self.input
    }

    /// True when the condition or the reason function is async.
    pub fn is_async(&self) -> bool {
        self.condition.is_async() || self.reason.is_async()
    }

    pub(crate) fn condition(&self) -> &Condition {
        &self.condition
    }

    pub(crate) fn reason(&self) -> &FailureReason {
        &self.reason
    }
}

// =============================================================================
// Phase
// =============================================================================

/// An ordered, named bundle of producers and validators.
///
/// Producers of each phase run to fixpoint before the next phase begins;
/// validators from every phase are collected into one global pass that runs
/// after all producer phases.
#[derive(Clone, Debug, Default)]
pub struct Phase {
    name: String,
    producers: Vec<Producer>,
    validators: Vec<Validator>,
}

impl Phase {
    /// A new, empty phase.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            producers: Vec::new(),
            validators: Vec::new(),
        }
    }

    /// Append a producer (declaration order is the firing tie-break).
    pub fn with_producer(mut self, producer: Producer) -> Self {
        self.producers.push(producer);
        self
    }

    /// Append a validator.
    pub fn with_validator(mut self, validator: Validator) -> Self {
        self.validators.push(validator);
        self
    }

    /// The phase name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The phase's producers, in declaration order.
    pub fn producers(&self) -> &[Producer] {
        &self.producers
    }

    /// The phase's validators, in declaration order.
    pub fn validators(&self) -> &[Validator] {
        &self.validators
    }

    /// True when the phase holds no rules.
    pub fn is_empty(&self) -> bool {
        self.producers.is_empty() && self.validators.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq, Hash)]
    struct Customer {
        id: String,
        total_spend_cents: u64,
    }

    #[derive(Debug, Clone, PartialEq, Eq, Hash)]
    struct VipStatus {
        id: String,
        tier: String,
    }

    fn customer(id: &str, spend: u64) -> FactRef {
        FactRef::new(Customer {
            id: id.into(),
            total_spend_cents: spend,
        })
    }

    #[test]
    fn sync_producer_is_not_async() {
        let producer = Producer::new(
            "vip-check",
            |c: &Customer| c.total_spend_cents > 10_000_00,
            |c: &Customer| VipStatus {
                id: c.id.clone(),
                tier: "gold".into(),
            },
        );
        assert!(!producer.is_async());
        assert_eq!(producer.name(), "vip-check");
        assert_eq!(producer.priority(), 0);
    }

    #[test]
    fn async_halves_make_the_rule_async() {
        let both = Producer::new_async(
            "lookup",
            |c: Customer| async move { c.total_spend_cents > 0 },
            |c: Customer| async move {
                VipStatus {
                    id: c.id,
                    tier: "gold".into(),
                }
            },
        );
        assert!(both.is_async());

        let mixed = Producer::with_async_output(
            "mixed",
            |c: &Customer| c.total_spend_cents > 0,
            |c: Customer| async move {
                VipStatus {
                    id: c.id,
                    tier: "gold".into(),
                }
            },
        );
        assert!(mixed.is_async());
        assert!(!mixed.condition().is_async());
        assert!(mixed.output().is_async());
    }

    #[test]
    fn sync_condition_evaluates_through_the_handle() {
        let condition = Condition::typed(|c: &Customer| c.total_spend_cents > 100);
        let sync = condition.as_sync().unwrap();
        assert!(sync(&customer("1", 200)));
        assert!(!sync(&customer("1", 50)));
        // A fact of the wrong type never matches.
        assert!(!sync(&FactRef::new(7_u32)));
    }

    #[test]
    fn sync_output_builds_a_fact() {
        let output = Output::typed(|c: &Customer| VipStatus {
            id: c.id.clone(),
            tier: "gold".into(),
        });
        let produced = output.as_sync().unwrap()(&customer("9", 1)).unwrap();
        assert_eq!(produced.downcast_ref::<VipStatus>().unwrap().id, "9");
    }

    #[test]
    fn filtered_output_may_decline() {
        let output = Output::typed_filtered(|c: &Customer| {
            (c.total_spend_cents > 100).then(|| VipStatus {
                id: c.id.clone(),
                tier: "gold".into(),
            })
        });
        let f = output.as_sync().unwrap();
        assert!(f(&customer("1", 200)).is_some());
        assert!(f(&customer("1", 50)).is_none());
    }

    #[tokio::test]
    async fn async_condition_awaits() {
        let condition = Condition::typed_async(|c: Customer| async move {
            c.total_spend_cents > 100
        });
        assert!(condition.is_async());
        assert!(condition.as_sync().is_none());
        assert!(condition.test(&customer("1", 200)).await);
        assert!(!condition.test(&customer("1", 50)).await);
    }

    #[test]
    fn guard_reads_only_the_context() {
        use crate::context::{ContextKey, RuleContext};
        const TIER: ContextKey<String> = ContextKey::new("customer-tier");

        let guard = Guard::new("must be VIP", |ctx: &RuleContext| {
            ctx.get(TIER).map(String::as_str) == Some("vip")
        });
        assert_eq!(guard.description(), "must be VIP");
        assert!(!guard.allows(&RuleContext::empty()));
        assert!(guard.allows(&RuleContext::empty().with(TIER, "vip".to_string())));
    }

    #[test]
    fn validator_reason_is_typed() {
        let validator = Validator::new(
            "positive-spend",
            |c: &Customer| c.total_spend_cents > 0,
            |c: &Customer| format!("customer {} has zero spend", c.id),
        );
        assert!(!validator.is_async());
        let reason = validator.reason().as_sync().unwrap()(&customer("3", 0));
        assert!(reason.downcast_ref::<String>().unwrap().contains("3"));
    }

    struct SpendRule {
        threshold_cents: u64,
    }

    impl ProducerRule for SpendRule {
        type In = Customer;
        type Out = VipStatus;

        fn name(&self) -> &str {
            "vip-check"
        }

        fn priority(&self) -> i32 {
            10
        }

        fn matches(&self, fact: &Customer) -> bool {
            fact.total_spend_cents > self.threshold_cents
        }

        fn produce(&self, fact: &Customer) -> VipStatus {
            VipStatus {
                id: fact.id.clone(),
                tier: "gold".into(),
            }
        }
    }

    #[test]
    fn trait_rule_adapts_to_a_producer() {
        let producer = Producer::from_rule(SpendRule {
            threshold_cents: 10_000_00,
        });
        assert_eq!(producer.name(), "vip-check");
        assert_eq!(producer.priority(), 10);
        assert!(!producer.is_async());

        let cond = producer.condition().as_sync().unwrap();
        assert!(cond(&customer("1", 15_000_00)));
        assert!(!cond(&customer("2", 5_000_00)));
    }

    struct AsyncSpendRule;

    #[async_trait]
    impl AsyncProducerRule for AsyncSpendRule {
        type In = Customer;
        type Out = VipStatus;

        fn name(&self) -> &str {
            "vip-check-async"
        }

        async fn matches(&self, fact: Customer) -> bool {
            fact.total_spend_cents > 10_000_00
        }

        async fn produce(&self, fact: Customer) -> VipStatus {
            VipStatus {
                id: fact.id,
                tier: "gold".into(),
            }
        }
    }

    #[tokio::test]
    async fn async_trait_rule_adapts_to_an_async_producer() {
        let producer = Producer::from_async_rule(AsyncSpendRule);
        assert!(producer.is_async());
        assert!(producer.condition().test(&customer("1", 15_000_00)).await);
        let out = producer.output().produce(&customer("1", 15_000_00)).await;
        assert_eq!(out.unwrap().downcast_ref::<VipStatus>().unwrap().id, "1");
    }

    #[test]
    fn phase_collects_rules_in_order() {
        let phase = Phase::new("pricing")
            .with_producer(Producer::new(
                "a",
                |_: &Customer| true,
                |c: &Customer| VipStatus {
                    id: c.id.clone(),
                    tier: "gold".into(),
                },
            ))
            .with_producer(Producer::new(
                "b",
                |_: &Customer| true,
                |c: &Customer| VipStatus {
                    id: c.id.clone(),
                    tier: "silver".into(),
                },
            ));
        let names: Vec<_> = phase.producers().iter().map(Producer::name).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert!(!phase.is_empty());
    }
}
