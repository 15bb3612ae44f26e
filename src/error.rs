//! Structured, pattern-matchable errors for engine construction and
//! evaluation.
//!
//! The engine is fail-fast: these errors abort an evaluation before a
//! `Completed` event is emitted. Validation failures are *not* errors —
//! they are data, carried in [`crate::Verdict::Fail`] inside a successful
//! result.

use thiserror::Error;

/// Errors raised by engine construction or an evaluation.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The builder was given an invalid configuration.
    #[error("invalid engine configuration: {message}")]
    Config {
        /// What was wrong.
        message: String,
    },

    /// `evaluate` was called on an engine containing async rules.
    #[error("engine contains async rules; use async evaluation")]
    AsyncRules,

    /// The driver crossed the configured iteration ceiling.
    ///
    /// Almost always a rule that derives a fresh (never-equal) fact on every
    /// firing, defeating duplicate suppression.
    #[error("evaluation exceeded {max_iterations} iterations (reached {iterations})")]
    MaxIterationsExceeded {
        /// Iterations consumed when the ceiling was crossed.
        iterations: u32,
        /// The configured ceiling.
        max_iterations: u32,
    },
}

impl EngineError {
    /// Shorthand for a configuration error.
    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}
