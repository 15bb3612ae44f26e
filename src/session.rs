//! The session driver: one evaluation from initial facts to `EngineResult`.
//!
//! A session owns all mutable evaluation state — working memory, its own
//! clone of each phase's compiled network, counters, trace — and is dropped
//! when the evaluation returns. The engine it came from stays immutable, so
//! any number of sessions can run in parallel.
//!
//! The phase loop keeps priority selection *inside* the propagation loop: a
//! high-priority rule whose activation arrives from a late-derived fact
//! preempts lower-priority activations that were queued earlier. Ties among
//! equal priorities break by declaration order, which keeps event order
//! deterministic.

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::context::RuleContext;
use crate::engine::EngineConfig;
use crate::error::EngineError;
use crate::event::{EngineEvent, EventSink};
use crate::fact::FactRef;
use crate::memory::WorkingMemory;
use crate::network::{CompiledPhase, Network};
use crate::result::{EngineResult, EvaluationId, Failure, RuleActivation, Verdict};
use crate::rule::{Phase, Producer, Validator};

/// Fallback-loop runaway detection kicks in after this many iterations.
const RUNAWAY_ITERATION_FLOOR: u32 = 100;

pub(crate) struct Session<'a> {
    config: &'a EngineConfig,
    phases: &'a [Phase],
    compiled: &'a [CompiledPhase],
    /// Global ordinal of each phase's first producer, for per-rule
    /// processed-fact bookkeeping in the fallback loop.
    producer_offsets: &'a [usize],
    /// Validators from every phase, in declaration order.
    validators: &'a [Validator],
    context: RuleContext,
    sink: EventSink<'a>,
    memory: WorkingMemory,
    evaluation_id: EvaluationId,
    started_at: DateTime<Utc>,
    runaway_warned: bool,
}

impl<'a> Session<'a> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        config: &'a EngineConfig,
        phases: &'a [Phase],
        compiled: &'a [CompiledPhase],
        producer_offsets: &'a [usize],
        validators: &'a [Validator],
        context: RuleContext,
        sink: EventSink<'a>,
        evaluation_id: EvaluationId,
    ) -> Self {
        Self {
            config,
            phases,
            compiled,
            producer_offsets,
            validators,
            context,
            sink,
            memory: WorkingMemory::new(),
            evaluation_id,
            started_at: Utc::now(),
            runaway_warned: false,
        }
    }

    // =========================================================================
    // Entry points
    // =========================================================================

    pub(crate) fn run_sync(mut self, facts: Vec<FactRef>) -> Result<EngineResult, EngineError> {
        self.insert_initial(facts);

        for (phase_index, phase) in self.phases.iter().enumerate() {
            let mut compiled = self.compiled[phase_index].clone();
            debug!(phase = phase.name(), "running phase");
            self.run_phase_network(phase, &mut compiled.network)?;
            if !compiled.fallback.is_empty() {
                // Unreachable when the engine refused async rules up front.
                return Err(EngineError::AsyncRules);
            }
        }

        let verdict = self.run_validation_sync()?;
        Ok(self.finish(verdict))
    }

    pub(crate) async fn run_async(
        mut self,
        facts: Vec<FactRef>,
    ) -> Result<EngineResult, EngineError> {
        self.insert_initial(facts);

        for (phase_index, phase) in self.phases.iter().enumerate() {
            let mut compiled = self.compiled[phase_index].clone();
            debug!(phase = phase.name(), "running phase");
            self.run_phase_network(phase, &mut compiled.network)?;
            if !compiled.fallback.is_empty() {
                self.run_fallback(phase_index, phase, &compiled.fallback).await?;
            }
        }

        let verdict = self.run_validation_async().await?;
        Ok(self.finish(verdict))
    }

    // =========================================================================
    // Setup / teardown
    // =========================================================================

    fn insert_initial(&mut self, facts: Vec<FactRef>) {
        for fact in facts {
            if self.memory.add(fact.clone()) {
                self.sink.emit(EngineEvent::FactInserted {
                    evaluation_id: self.evaluation_id,
                    fact,
                    derived: false,
                });
            }
        }
        debug!(facts = self.memory.len(), "initial facts inserted");
    }

    fn finish(self, verdict: Verdict) -> EngineResult {
        let result = EngineResult {
            facts: self.memory.all().clone(),
            derived: self.memory.derived().clone(),
            verdict,
            skipped: self.memory.skipped,
            rule_activations: self.memory.rule_activations,
            iterations: self.memory.iterations,
            trace: self.memory.trace,
            warnings: self.memory.warnings,
            evaluation_id: self.evaluation_id,
            started_at: self.started_at,
            finished_at: Utc::now(),
        };
        self.sink.emit(EngineEvent::Completed {
            evaluation_id: self.evaluation_id,
            result: result.clone(),
        });
        result
    }

    // =========================================================================
    // Network-driven phase execution
    // =========================================================================

    /// Run one phase's compiled network to fixpoint.
    ///
    /// The network contains only sync producers (the compiler routes async
    /// ones to the fallback list), so this code is shared verbatim by the
    /// sync and async evaluation paths.
    fn run_phase_network(
        &mut self,
        phase: &Phase,
        network: &mut Network,
    ) -> Result<(), EngineError> {
        network.reset();

        // Guard prepass: a blocked rule is out for the whole evaluation.
        let mut skipped_slots = vec![false; network.output_count()];
        for slot in 0..network.output_count() {
            let producer = &phase.producers()[network.output(slot).producer_index()];
            if self.guard_blocks(producer.name(), producer.guard()) {
                skipped_slots[slot] = true;
            }
        }

        // Seed: push a snapshot of current working memory through the network.
        let snapshot: Vec<FactRef> = self.memory.all().iter().cloned().collect();
        for fact in &snapshot {
            network.activate(fact);
        }

        while network.has_pending_activations() {
            self.bump_iterations()?;

            let target = network
                .outputs_by_priority()
                .into_iter()
                .find(|&slot| network.output(slot).has_pending() && !skipped_slots[slot]);

            let Some(target) = target else {
                // Only guard-skipped nodes still hold activations: drain and
                // discard so the phase can reach fixpoint.
                for slot in 0..network.output_count() {
                    if skipped_slots[slot] {
                        network.output_mut(slot).take_pending();
                    }
                }
                break;
            };

            let inputs = network.output_mut(target).take_pending();
            let rule_name = network.output(target).rule_name().to_string();
            let priority = network.output(target).priority();
            let output_fn = network.output(target).output().clone();
            let Some(produce) = output_fn.as_sync() else {
                return Err(EngineError::AsyncRules);
            };

            for input in inputs {
                let mut added = Vec::new();
                if let Some(out) = produce(&input) {
                    if self.memory.add_derived(out.clone()) {
                        self.memory.rule_activations += 1;
                        self.sink.emit(EngineEvent::FactInserted {
                            evaluation_id: self.evaluation_id,
                            fact: out.clone(),
                            derived: true,
                        });
                        added.push(out.clone());
                        // Immediate propagation is what produces forward
                        // chaining without re-scanning working memory.
                        network.activate(&out);
                    }
                }
                if !added.is_empty() {
                    self.record_firing(&rule_name, input, added, priority);
                }
            }
        }

        Ok(())
    }

    // =========================================================================
    // Fallback loop (async producers)
    // =========================================================================

    /// Naive saturation loop for producers the network cannot execute.
    ///
    /// Each pass offers every unprocessed matching fact to every producer;
    /// the loop ends when a whole pass derives nothing new.
    async fn run_fallback(
        &mut self,
        phase_index: usize,
        phase: &Phase,
        fallback: &[usize],
    ) -> Result<(), EngineError> {
        let offset = self.producer_offsets[phase_index];

        let mut active: Vec<(usize, &Producer)> = Vec::new();
        for &producer_index in fallback {
            let producer = &phase.producers()[producer_index];
            if !self.guard_blocks(producer.name(), producer.guard()) {
                active.push((offset + producer_index, producer));
            }
        }

        loop {
            self.bump_iterations()?;

            let mut derived_this_pass = 0_usize;
            for (slot, producer) in &active {
                let candidates = self.memory.facts_matching(producer.input());
                for fact in candidates {
                    if !self.memory.mark_processed(*slot, &fact) {
                        continue;
                    }
                    if !producer.condition().test(&fact).await {
                        continue;
                    }
                    let Some(out) = producer.output().produce(&fact).await else {
                        continue;
                    };
                    if self.memory.add_derived(out.clone()) {
                        self.memory.rule_activations += 1;
                        self.sink.emit(EngineEvent::FactInserted {
                            evaluation_id: self.evaluation_id,
                            fact: out.clone(),
                            derived: true,
                        });
                        self.record_firing(
                            producer.name(),
                            fact.clone(),
                            vec![out],
                            producer.priority(),
                        );
                        derived_this_pass += 1;
                    }
                }
            }

            self.check_runaway(fallback.len());

            if derived_this_pass == 0 {
                break;
            }
        }

        Ok(())
    }

    /// At most one runaway warning per evaluation.
    fn check_runaway(&mut self, producer_count: usize) {
        if self.runaway_warned || self.memory.iterations <= RUNAWAY_ITERATION_FLOOR {
            return;
        }
        let ceiling = u64::from(self.memory.iterations) * producer_count as u64 * 2;
        if self.memory.rule_activations > ceiling {
            let warning = format!(
                "possible runaway rule execution: {} activations in {} iterations \
                 across {} producers; consider stricter rule conditions",
                self.memory.rule_activations, self.memory.iterations, producer_count
            );
            warn!(
                evaluation_id = %self.evaluation_id,
                activations = self.memory.rule_activations,
                iterations = self.memory.iterations,
                "runaway rule execution suspected"
            );
            self.memory.warnings.push(warning);
            self.runaway_warned = true;
        }
    }

    // =========================================================================
    // Validation pass
    // =========================================================================

    fn run_validation_sync(&mut self) -> Result<Verdict, EngineError> {
        let mut failures = Vec::new();

        for validator in self.validators {
            if self.guard_blocks(validator.name(), validator.guard()) {
                continue;
            }
            let Some(condition) = validator.condition().as_sync() else {
                return Err(EngineError::AsyncRules);
            };
            let Some(reason_fn) = validator.reason().as_sync() else {
                return Err(EngineError::AsyncRules);
            };
            for fact in self.memory.facts_matching(validator.input()) {
                if condition(&fact) {
                    self.sink.emit(EngineEvent::ValidationPassed {
                        evaluation_id: self.evaluation_id,
                        rule_name: validator.name().to_string(),
                        fact,
                    });
                } else {
                    let reason = reason_fn(&fact);
                    failures.push(Failure::new(validator.name(), reason.clone()));
                    self.sink.emit(EngineEvent::ValidationFailed {
                        evaluation_id: self.evaluation_id,
                        rule_name: validator.name().to_string(),
                        fact,
                        reason,
                    });
                }
            }
        }

        Ok(Verdict::from_failures(failures))
    }

    async fn run_validation_async(&mut self) -> Result<Verdict, EngineError> {
        let mut failures = Vec::new();

        for validator in self.validators {
            if self.guard_blocks(validator.name(), validator.guard()) {
                continue;
            }
            for fact in self.memory.facts_matching(validator.input()) {
                if validator.condition().test(&fact).await {
                    self.sink.emit(EngineEvent::ValidationPassed {
                        evaluation_id: self.evaluation_id,
                        rule_name: validator.name().to_string(),
                        fact,
                    });
                } else {
                    let reason = validator.reason().compute(&fact).await;
                    failures.push(Failure::new(validator.name(), reason.clone()));
                    self.sink.emit(EngineEvent::ValidationFailed {
                        evaluation_id: self.evaluation_id,
                        rule_name: validator.name().to_string(),
                        fact,
                        reason,
                    });
                }
            }
        }

        Ok(Verdict::from_failures(failures))
    }

    // =========================================================================
    // Shared helpers
    // =========================================================================

    /// Guard check with skip bookkeeping. Returns `true` when the rule is
    /// blocked for this evaluation.
    fn guard_blocks(&mut self, rule_name: &str, guard: Option<&crate::rule::Guard>) -> bool {
        let Some(guard) = guard else {
            return false;
        };
        if guard.allows(&self.context) {
            return false;
        }
        self.memory
            .skipped
            .insert(rule_name.to_string(), guard.description().to_string());
        self.sink.emit(EngineEvent::RuleSkipped {
            evaluation_id: self.evaluation_id,
            rule_name: rule_name.to_string(),
            guard_description: guard.description().to_string(),
        });
        true
    }

    fn bump_iterations(&mut self) -> Result<(), EngineError> {
        self.memory.iterations += 1;
        if self.memory.iterations > self.config.max_iterations {
            return Err(EngineError::MaxIterationsExceeded {
                iterations: self.memory.iterations,
                max_iterations: self.config.max_iterations,
            });
        }
        Ok(())
    }

    fn record_firing(
        &mut self,
        rule_name: &str,
        input: FactRef,
        outputs: Vec<FactRef>,
        priority: i32,
    ) {
        if self.config.enable_tracing {
            self.memory.trace.push(RuleActivation::new(
                rule_name,
                input.clone(),
                outputs.clone(),
                priority,
            ));
        }
        self.sink.emit(EngineEvent::RuleFired {
            evaluation_id: self.evaluation_id,
            rule_name: rule_name.to_string(),
            input,
            outputs,
            priority,
        });
    }
}
