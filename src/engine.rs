//! The engine: an immutable rule description plus compiled networks, built
//! once and evaluated many times.
//!
//! ```ignore
//! let engine = EngineBuilder::new()
//!     .producer(Producer::new(
//!         "vip-check",
//!         |c: &Customer| c.total_spend_cents > 10_000_00,
//!         |c: &Customer| VipStatus { id: c.id.clone(), tier: "gold".into() },
//!     ))
//!     .validator(Validator::new(
//!         "max-order",
//!         |t: &CartTotal| t.total_cents <= 100_00,
//!         |t: &CartTotal| format!("order total {} exceeds the limit", t.total_cents),
//!     ))
//!     .build()?;
//!
//! let result = engine.evaluate(facts![
//!     Customer { id: "1".into(), total_spend_cents: 15_000_00 },
//! ])?;
//! assert!(result.passed());
//! ```
//!
//! An engine containing async rules must be evaluated with
//! [`Engine::evaluate_async`]; the sync path refuses it up front.

use serde::{Deserialize, Serialize};
use tracing::{debug_span, Instrument};

use crate::context::RuleContext;
use crate::error::EngineError;
use crate::event::{EventCollector, EventSink};
use crate::fact::FactRef;
use crate::network::{compile, CompiledPhase};
use crate::result::{EngineResult, EvaluationId};
use crate::rule::{Phase, Producer, Validator};
use crate::session::Session;

/// Name given to the implicit phase collecting rules registered outside any
/// explicit phase.
pub const DEFAULT_PHASE_NAME: &str = "default";

// =============================================================================
// Config
// =============================================================================

/// Engine-wide evaluation settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Hard ceiling on driver iterations per evaluation. Crossing it aborts
    /// the evaluation with [`EngineError::MaxIterationsExceeded`]. Must be
    /// greater than zero.
    pub max_iterations: u32,
    /// Record a [`crate::RuleActivation`] for every firing that produced
    /// output. Off by default; the trace costs memory proportional to the
    /// number of firings.
    pub enable_tracing: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_iterations: 1_000_000,
            enable_tracing: false,
        }
    }
}

// =============================================================================
// Engine
// =============================================================================

/// An immutable rule set with pre-compiled per-phase networks.
///
/// Construction happens through [`EngineBuilder`]. The engine itself holds
/// no evaluation state: every `evaluate*` call spawns a fresh session with
/// its own working memory and its own clone of each network, so one engine
/// can serve any number of parallel evaluations.
pub struct Engine {
    config: EngineConfig,
    phases: Vec<Phase>,
    compiled: Vec<CompiledPhase>,
    /// Global ordinal of each phase's first producer (prefix sums), used by
    /// fallback-loop bookkeeping.
    producer_offsets: Vec<usize>,
    /// Validators from every phase, flattened in declaration order.
    validators: Vec<Validator>,
    has_async: bool,
}

impl Engine {
    /// Start building an engine.
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    /// The engine's configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The ordered phases, including the implicit default phase if any.
    pub fn phases(&self) -> &[Phase] {
        &self.phases
    }

    /// Producer names flattened across phases, in declaration order.
    pub fn fact_producer_names(&self) -> Vec<&str> {
        self.phases
            .iter()
            .flat_map(|phase| phase.producers().iter().map(Producer::name))
            .collect()
    }

    /// Validator names flattened across phases, in declaration order.
    pub fn validation_rule_names(&self) -> Vec<&str> {
        self.validators.iter().map(Validator::name).collect()
    }

    /// Total number of rules (producers and validators).
    pub fn len(&self) -> usize {
        let producers: usize = self.phases.iter().map(|p| p.producers().len()).sum();
        producers + self.validators.len()
    }

    /// True when the engine holds no rules.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True when any producer or validator has an async half.
    pub fn has_async_rules(&self) -> bool {
        self.has_async
    }

    /// Evaluate synchronously with an empty context and no collector.
    pub fn evaluate(
        &self,
        facts: impl IntoIterator<Item = FactRef>,
    ) -> Result<EngineResult, EngineError> {
        self.evaluate_with(facts, &RuleContext::empty(), None)
    }

    /// Evaluate synchronously.
    ///
    /// Refuses with [`EngineError::AsyncRules`] when the engine contains any
    /// async rule — including async validators whose producers all compiled
    /// into the network.
    pub fn evaluate_with(
        &self,
        facts: impl IntoIterator<Item = FactRef>,
        context: &RuleContext,
        collector: Option<&dyn EventCollector>,
    ) -> Result<EngineResult, EngineError> {
        if self.has_async {
            return Err(EngineError::AsyncRules);
        }
        let evaluation_id = EvaluationId::new();
        let span = debug_span!("evaluation", id = %evaluation_id);
        let _entered = span.enter();
        self.session(context, collector, evaluation_id)
            .run_sync(facts.into_iter().collect())
    }

    /// Evaluate asynchronously with an empty context and no collector.
    pub async fn evaluate_async(
        &self,
        facts: impl IntoIterator<Item = FactRef>,
    ) -> Result<EngineResult, EngineError> {
        self.evaluate_async_with(facts, &RuleContext::empty(), None)
            .await
    }

    /// Evaluate asynchronously.
    ///
    /// Sync rules behave exactly as in `evaluate`; async conditions, outputs
    /// and failure reasons are awaited. Cancelling the returned future stops
    /// the evaluation with no `Completed` event.
    pub async fn evaluate_async_with(
        &self,
        facts: impl IntoIterator<Item = FactRef>,
        context: &RuleContext,
        collector: Option<&dyn EventCollector>,
    ) -> Result<EngineResult, EngineError> {
        let evaluation_id = EvaluationId::new();
        let span = debug_span!("evaluation", id = %evaluation_id);
        self.session(context, collector, evaluation_id)
            .run_async(facts.into_iter().collect())
            .instrument(span)
            .await
    }

    fn session<'a>(
        &'a self,
        context: &RuleContext,
        collector: Option<&'a dyn EventCollector>,
        evaluation_id: EvaluationId,
    ) -> Session<'a> {
        Session::new(
            &self.config,
            &self.phases,
            &self.compiled,
            &self.producer_offsets,
            &self.validators,
            context.clone(),
            EventSink::new(collector),
            evaluation_id,
        )
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("phases", &self.phases.len())
            .field("rules", &self.len())
            .field("has_async", &self.has_async)
            .finish()
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Builds an immutable [`Engine`].
///
/// Rules registered directly on the builder land in an implicit
/// [`DEFAULT_PHASE_NAME`] phase, prepended before any explicit phases.
#[derive(Default)]
pub struct EngineBuilder {
    config: EngineConfig,
    loose_producers: Vec<Producer>,
    loose_validators: Vec<Validator>,
    phases: Vec<Phase>,
}

impl EngineBuilder {
    /// A builder with default configuration and no rules.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the iteration ceiling.
    pub fn max_iterations(mut self, max_iterations: u32) -> Self {
        self.config.max_iterations = max_iterations;
        self
    }

    /// Enable or disable activation tracing.
    pub fn enable_tracing(mut self, enable: bool) -> Self {
        self.config.enable_tracing = enable;
        self
    }

    /// Register a producer in the implicit default phase.
    pub fn producer(mut self, producer: Producer) -> Self {
        self.loose_producers.push(producer);
        self
    }

    /// Register a validator in the implicit default phase.
    pub fn validator(mut self, validator: Validator) -> Self {
        self.loose_validators.push(validator);
        self
    }

    /// Append an explicit phase. Phases run in registration order.
    pub fn phase(mut self, phase: Phase) -> Self {
        self.phases.push(phase);
        self
    }

    /// Validate the configuration, compile the networks and produce the
    /// engine.
    pub fn build(self) -> Result<Engine, EngineError> {
        if self.config.max_iterations == 0 {
            return Err(EngineError::config(
                "max_iterations must be greater than zero",
            ));
        }

        let mut phases = Vec::with_capacity(self.phases.len() + 1);
        if !self.loose_producers.is_empty() || !self.loose_validators.is_empty() {
            let mut default_phase = Phase::new(DEFAULT_PHASE_NAME);
            for producer in self.loose_producers {
                default_phase = default_phase.with_producer(producer);
            }
            for validator in self.loose_validators {
                default_phase = default_phase.with_validator(validator);
            }
            phases.push(default_phase);
        }
        phases.extend(self.phases);

        let compiled: Vec<CompiledPhase> = phases.iter().map(compile).collect();

        let mut producer_offsets = Vec::with_capacity(phases.len());
        let mut offset = 0;
        for phase in &phases {
            producer_offsets.push(offset);
            offset += phase.producers().len();
        }

        let validators: Vec<Validator> = phases
            .iter()
            .flat_map(|phase| phase.validators().iter().cloned())
            .collect();

        let has_async = phases
            .iter()
            .flat_map(|phase| phase.producers())
            .any(Producer::is_async)
            || validators.iter().any(Validator::is_async);

        Ok(Engine {
            config: self.config,
            phases,
            compiled,
            producer_offsets,
            validators,
            has_async,
        })
    }
}
