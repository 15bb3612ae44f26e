//! Testing utilities for rule sets and event-order assertions.
//!
//! # Feature Flag
//!
//! Available to downstream crates with the `testing` feature:
//!
//! ```toml
//! [dev-dependencies]
//! cascade = { version = "0.1", features = ["testing"] }
//! ```
//!
//! # Quick Start
//!
//! ```ignore
//! use cascade::testing::RecordingCollector;
//!
//! let collector = RecordingCollector::new();
//! engine.evaluate_with(facts, &ctx, Some(&collector))?;
//!
//! collector.assert_fired_before("high", "low");
//! assert_eq!(collector.completed_count(), 1);
//! ```

use std::sync::Mutex;

use anyhow::Result;

use crate::event::{EngineEvent, EventCollector};

/// Captures the full event stream of an evaluation for assertions.
///
/// Thread-safe; one collector can observe several sequential evaluations
/// (use [`EngineEvent::evaluation_id`] to separate them).
#[derive(Debug, Default)]
pub struct RecordingCollector {
    events: Mutex<Vec<EngineEvent>>,
}

impl RecordingCollector {
    /// A fresh, empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// A snapshot of every event seen so far, in emission order.
    pub fn events(&self) -> Vec<EngineEvent> {
        self.events.lock().expect("collector mutex poisoned").clone()
    }

    /// The kind labels of every event, in emission order.
    pub fn kinds(&self) -> Vec<&'static str> {
        self.events().iter().map(EngineEvent::kind).collect()
    }

    /// Rule names of `RuleFired` events, in emission order.
    pub fn fired_rule_names(&self) -> Vec<String> {
        self.events()
            .iter()
            .filter_map(|event| match event {
                EngineEvent::RuleFired { rule_name, .. } => Some(rule_name.clone()),
                _ => None,
            })
            .collect()
    }

    /// Rule names of `RuleSkipped` events, in emission order.
    pub fn skipped_rule_names(&self) -> Vec<String> {
        self.events()
            .iter()
            .filter_map(|event| match event {
                EngineEvent::RuleSkipped { rule_name, .. } => Some(rule_name.clone()),
                _ => None,
            })
            .collect()
    }

    /// Number of `RuleFired` events seen.
    pub fn fired_count(&self) -> usize {
        self.fired_rule_names().len()
    }

    /// Number of `Completed` events seen.
    pub fn completed_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|event| matches!(event, EngineEvent::Completed { .. }))
            .count()
    }

    /// True when the last recorded event is `Completed`.
    pub fn ends_with_completed(&self) -> bool {
        matches!(self.events().last(), Some(EngineEvent::Completed { .. }))
    }

    /// Position of the first `RuleFired` for `rule_name`.
    pub fn first_fired_index(&self, rule_name: &str) -> Option<usize> {
        self.events().iter().position(|event| {
            matches!(event, EngineEvent::RuleFired { rule_name: name, .. } if name == rule_name)
        })
    }

    /// Panics unless `first` fired strictly before `second`.
    pub fn assert_fired_before(&self, first: &str, second: &str) {
        let first_at = self
            .first_fired_index(first)
            .unwrap_or_else(|| panic!("rule '{first}' never fired; fired: {:?}", self.fired_rule_names()));
        let second_at = self
            .first_fired_index(second)
            .unwrap_or_else(|| panic!("rule '{second}' never fired; fired: {:?}", self.fired_rule_names()));
        assert!(
            first_at < second_at,
            "expected '{first}' (event #{first_at}) to fire before '{second}' (event #{second_at})"
        );
    }

    /// Drop every recorded event, keeping the collector reusable.
    pub fn clear(&self) {
        self.events.lock().expect("collector mutex poisoned").clear();
    }
}

impl EventCollector for RecordingCollector {
    fn on_event(&self, event: &EngineEvent) -> Result<()> {
        self.events
            .lock()
            .expect("collector mutex poisoned")
            .push(event.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::EvaluationId;
    use crate::FactRef;

    fn fired(rule: &str) -> EngineEvent {
        EngineEvent::RuleFired {
            evaluation_id: EvaluationId::NONE,
            rule_name: rule.to_string(),
            input: FactRef::new(1_u32),
            outputs: vec![FactRef::new(2_u32)],
            priority: 0,
        }
    }

    #[test]
    fn records_in_order() {
        let collector = RecordingCollector::new();
        collector.on_event(&fired("a")).unwrap();
        collector.on_event(&fired("b")).unwrap();
        assert_eq!(collector.fired_rule_names(), vec!["a", "b"]);
        assert_eq!(collector.fired_count(), 2);
    }

    #[test]
    fn assert_fired_before_holds() {
        let collector = RecordingCollector::new();
        collector.on_event(&fired("high")).unwrap();
        collector.on_event(&fired("low")).unwrap();
        collector.assert_fired_before("high", "low");
    }

    #[test]
    #[should_panic(expected = "to fire before")]
    fn assert_fired_before_panics_on_inversion() {
        let collector = RecordingCollector::new();
        collector.on_event(&fired("low")).unwrap();
        collector.on_event(&fired("high")).unwrap();
        collector.assert_fired_before("high", "low");
    }

    #[test]
    fn clear_resets() {
        let collector = RecordingCollector::new();
        collector.on_event(&fired("a")).unwrap();
        collector.clear();
        assert!(collector.events().is_empty());
    }
}
