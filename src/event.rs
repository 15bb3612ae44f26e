//! Structured evaluation events and the collectors that observe them.
//!
//! Events are emitted synchronously, in a guaranteed order (see the crate
//! docs): initial insertions first, then rule firings in priority order,
//! then validation outcomes, with `Completed` always last and exactly once
//! per successful evaluation.
//!
//! Collectors observe; they never steer. A collector may fail — its error is
//! logged with `warn!` and the evaluation continues. Use a
//! [`CompositeCollector`] to fan one evaluation out to several sinks.

use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, trace, warn};

use crate::fact::FactRef;
use crate::result::{EngineResult, EvaluationId};

// =============================================================================
// Events
// =============================================================================

/// One observable step of an evaluation.
///
/// Every event carries the [`EvaluationId`] of the evaluation that produced
/// it, so interleaved evaluations sharing one collector stay separable.
#[derive(Clone, Debug)]
pub enum EngineEvent {
    /// A fact entered working memory. `derived` distinguishes rule output
    /// from caller input.
    FactInserted {
        evaluation_id: EvaluationId,
        fact: FactRef,
        derived: bool,
    },
    /// A producer fired and added at least one new fact.
    RuleFired {
        evaluation_id: EvaluationId,
        rule_name: String,
        input: FactRef,
        outputs: Vec<FactRef>,
        priority: i32,
    },
    /// A rule's guard suppressed it for this evaluation.
    RuleSkipped {
        evaluation_id: EvaluationId,
        rule_name: String,
        guard_description: String,
    },
    /// A validator accepted a fact.
    ValidationPassed {
        evaluation_id: EvaluationId,
        rule_name: String,
        fact: FactRef,
    },
    /// A validator rejected a fact.
    ValidationFailed {
        evaluation_id: EvaluationId,
        rule_name: String,
        fact: FactRef,
        reason: FactRef,
    },
    /// The evaluation finished. Terminal, exactly once per successful run.
    Completed {
        evaluation_id: EvaluationId,
        result: EngineResult,
    },
}

impl EngineEvent {
    /// The evaluation this event belongs to.
    pub fn evaluation_id(&self) -> EvaluationId {
        match self {
            EngineEvent::FactInserted { evaluation_id, .. }
            | EngineEvent::RuleFired { evaluation_id, .. }
            | EngineEvent::RuleSkipped { evaluation_id, .. }
            | EngineEvent::ValidationPassed { evaluation_id, .. }
            | EngineEvent::ValidationFailed { evaluation_id, .. }
            | EngineEvent::Completed { evaluation_id, .. } => *evaluation_id,
        }
    }

    /// A stable label for the event kind.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineEvent::FactInserted { .. } => "fact_inserted",
            EngineEvent::RuleFired { .. } => "rule_fired",
            EngineEvent::RuleSkipped { .. } => "rule_skipped",
            EngineEvent::ValidationPassed { .. } => "validation_passed",
            EngineEvent::ValidationFailed { .. } => "validation_failed",
            EngineEvent::Completed { .. } => "completed",
        }
    }

    /// The rule name, for rule-scoped events.
    pub fn rule_name(&self) -> Option<&str> {
        match self {
            EngineEvent::RuleFired { rule_name, .. }
            | EngineEvent::RuleSkipped { rule_name, .. }
            | EngineEvent::ValidationPassed { rule_name, .. }
            | EngineEvent::ValidationFailed { rule_name, .. } => Some(rule_name),
            _ => None,
        }
    }
}

// =============================================================================
// Collector
// =============================================================================

/// An observer of evaluation events.
///
/// Called synchronously from the driver in event order. Errors are logged
/// and swallowed — a broken sink must not change the evaluation's outcome.
pub trait EventCollector: Send + Sync {
    /// Observe one event.
    fn on_event(&self, event: &EngineEvent) -> Result<()>;
}

/// Fans events out to an ordered list of collectors.
///
/// Children are called in registration order; a failing child is warned
/// about and does not starve the children after it.
#[derive(Clone, Default)]
pub struct CompositeCollector {
    collectors: Vec<Arc<dyn EventCollector>>,
}

impl CompositeCollector {
    /// An empty composite.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a collector.
    pub fn with(mut self, collector: impl EventCollector + 'static) -> Self {
        self.collectors.push(Arc::new(collector));
        self
    }

    /// Append an already-shared collector.
    pub fn with_shared(mut self, collector: Arc<dyn EventCollector>) -> Self {
        self.collectors.push(collector);
        self
    }

    /// Number of registered collectors.
    pub fn len(&self) -> usize {
        self.collectors.len()
    }

    /// True when no collectors are registered.
    pub fn is_empty(&self) -> bool {
        self.collectors.is_empty()
    }
}

impl EventCollector for CompositeCollector {
    fn on_event(&self, event: &EngineEvent) -> Result<()> {
        for (index, collector) in self.collectors.iter().enumerate() {
            if let Err(error) = collector.on_event(event) {
                warn!(
                    collector_index = index,
                    event = event.kind(),
                    error = %error,
                    "collector failed; continuing"
                );
            }
        }
        Ok(())
    }
}

impl fmt::Debug for CompositeCollector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeCollector")
            .field("collectors", &self.collectors.len())
            .finish()
    }
}

/// Renders every event as a structured JSON line on the `cascade::audit`
/// tracing target, at debug level.
///
/// Facts are type-erased, so they appear in their `Debug` form; the
/// `Completed` event carries the serializable result summary instead.
#[derive(Clone, Copy, Debug, Default)]
pub struct AuditCollector;

impl EventCollector for AuditCollector {
    fn on_event(&self, event: &EngineEvent) -> Result<()> {
        let payload = match event {
            EngineEvent::FactInserted { fact, derived, .. } => serde_json::json!({
                "fact_type": fact.type_name(),
                "fact": format!("{fact:?}"),
                "derived": derived,
            }),
            EngineEvent::RuleFired {
                rule_name,
                input,
                outputs,
                priority,
                ..
            } => serde_json::json!({
                "rule": rule_name,
                "input": format!("{input:?}"),
                "outputs": outputs.iter().map(|o| format!("{o:?}")).collect::<Vec<_>>(),
                "priority": priority,
            }),
            EngineEvent::RuleSkipped {
                rule_name,
                guard_description,
                ..
            } => serde_json::json!({
                "rule": rule_name,
                "guard": guard_description,
            }),
            EngineEvent::ValidationPassed {
                rule_name, fact, ..
            } => serde_json::json!({
                "rule": rule_name,
                "fact": format!("{fact:?}"),
            }),
            EngineEvent::ValidationFailed {
                rule_name,
                fact,
                reason,
                ..
            } => serde_json::json!({
                "rule": rule_name,
                "fact": format!("{fact:?}"),
                "reason": format!("{reason:?}"),
            }),
            EngineEvent::Completed { result, .. } => serde_json::to_value(result.summary())?,
        };

        debug!(
            target: "cascade::audit",
            evaluation_id = %event.evaluation_id(),
            kind = event.kind(),
            payload = %payload,
        );
        Ok(())
    }
}

// =============================================================================
// Sink (driver-internal)
// =============================================================================

/// The driver's emission point: traces every event and forwards it to the
/// optional collector, warning on (and swallowing) collector errors.
#[derive(Clone, Copy)]
pub(crate) struct EventSink<'a> {
    collector: Option<&'a dyn EventCollector>,
}

impl<'a> EventSink<'a> {
    pub(crate) fn new(collector: Option<&'a dyn EventCollector>) -> Self {
        Self { collector }
    }

    pub(crate) fn emit(&self, event: EngineEvent) {
        trace!(
            evaluation_id = %event.evaluation_id(),
            kind = event.kind(),
            rule = event.rule_name().unwrap_or(""),
            "engine event"
        );
        if let Some(collector) = self.collector {
            if let Err(error) = collector.on_event(&event) {
                warn!(
                    event = event.kind(),
                    error = %error,
                    "collector failed; continuing"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn inserted(derived: bool) -> EngineEvent {
        EngineEvent::FactInserted {
            evaluation_id: EvaluationId::NONE,
            fact: FactRef::new(42_u32),
            derived,
        }
    }

    struct Counting {
        seen: AtomicUsize,
    }

    impl EventCollector for Counting {
        fn on_event(&self, _event: &EngineEvent) -> Result<()> {
            self.seen.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
    }

    struct AlwaysFails;

    impl EventCollector for AlwaysFails {
        fn on_event(&self, _event: &EngineEvent) -> Result<()> {
            anyhow::bail!("sink unavailable")
        }
    }

    #[test]
    fn composite_fans_out_in_order() {
        let order = Arc::new(Mutex::new(Vec::new()));

        struct Tagging {
            tag: &'static str,
            order: Arc<Mutex<Vec<&'static str>>>,
        }

        impl EventCollector for Tagging {
            fn on_event(&self, _event: &EngineEvent) -> Result<()> {
                self.order.lock().unwrap().push(self.tag);
                Ok(())
            }
        }

        let composite = CompositeCollector::new()
            .with(Tagging {
                tag: "first",
                order: order.clone(),
            })
            .with(Tagging {
                tag: "second",
                order: order.clone(),
            });

        composite.on_event(&inserted(false)).unwrap();
        assert_eq!(*order.lock().unwrap(), vec!["first", "second"]);
    }

    #[test]
    fn composite_survives_a_failing_child() {
        let counter = Arc::new(Counting {
            seen: AtomicUsize::new(0),
        });
        let composite = CompositeCollector::new()
            .with(AlwaysFails)
            .with_shared(counter.clone());

        composite.on_event(&inserted(true)).unwrap();
        assert_eq!(counter.seen.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn sink_swallows_collector_errors() {
        let sink_target = AlwaysFails;
        let sink = EventSink::new(Some(&sink_target));
        // Must not panic or propagate.
        sink.emit(inserted(false));
    }

    #[test]
    fn event_kind_labels_are_stable() {
        assert_eq!(inserted(false).kind(), "fact_inserted");
        let skipped = EngineEvent::RuleSkipped {
            evaluation_id: EvaluationId::NONE,
            rule_name: "vip-only".into(),
            guard_description: "must be VIP".into(),
        };
        assert_eq!(skipped.kind(), "rule_skipped");
        assert_eq!(skipped.rule_name(), Some("vip-only"));
    }

    #[test]
    fn audit_collector_accepts_every_variant() {
        let audit = AuditCollector;
        audit.on_event(&inserted(false)).unwrap();
        audit
            .on_event(&EngineEvent::ValidationFailed {
                evaluation_id: EvaluationId::new(),
                rule_name: "max-order".into(),
                fact: FactRef::new(150_u32),
                reason: FactRef::new("too big".to_string()),
            })
            .unwrap();
    }
}
