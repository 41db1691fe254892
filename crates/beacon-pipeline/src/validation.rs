//! Record validation
//!
//! A [`ValidatorChain`] runs its validators in order and stops at the first
//! `Drop`. Dropped records are never persisted; the drop is logged at
//! `debug` and otherwise silent.

use beacon_core::config::BatchingConfig;
use beacon_core::domain::{LogRecord, SpanRecord};

/// Outcome of validating one record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Keep,
    Drop,
}

/// A single validation rule for records of type `R`
pub trait Validator<R>: Send + Sync {
    /// Short name used in drop diagnostics
    fn name(&self) -> &'static str;

    fn validate(&self, record: &R) -> Verdict;
}

/// Ordered list of validators
pub struct ValidatorChain<R> {
    validators: Vec<Box<dyn Validator<R>>>,
}

impl<R> ValidatorChain<R> {
    /// An empty chain keeps every record
    pub fn new() -> Self {
        Self {
            validators: Vec::new(),
        }
    }

    /// Appends a validator and returns the chain
    pub fn with(mut self, validator: impl Validator<R> + 'static) -> Self {
        self.validators.push(Box::new(validator));
        self
    }

    pub fn len(&self) -> usize {
        self.validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    /// Runs the chain; the first `Drop` wins
    pub fn validate(&self, record: &R) -> Verdict {
        for validator in &self.validators {
            if validator.validate(record) == Verdict::Drop {
                tracing::debug!(validator = validator.name(), "Record dropped by validation");
                return Verdict::Drop;
            }
        }
        Verdict::Keep
    }
}

impl<R> Default for ValidatorChain<R> {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Log validators
// ============================================================================

/// Drops logs whose body exceeds `max_chars` characters
#[derive(Debug, Clone)]
pub struct BodyLengthValidator {
    max_chars: usize,
}

impl BodyLengthValidator {
    pub fn new(max_chars: usize) -> Self {
        Self { max_chars }
    }
}

impl Validator<LogRecord> for BodyLengthValidator {
    fn name(&self) -> &'static str {
        "body_length"
    }

    fn validate(&self, record: &LogRecord) -> Verdict {
        if record.body.chars().count() > self.max_chars {
            Verdict::Drop
        } else {
            Verdict::Keep
        }
    }
}

// ============================================================================
// Span validators
// ============================================================================

/// Drops spans whose name is empty or only whitespace
#[derive(Debug, Clone, Default)]
pub struct WhitespaceSpanNameValidator;

impl Validator<SpanRecord> for WhitespaceSpanNameValidator {
    fn name(&self) -> &'static str {
        "whitespace_span_name"
    }

    fn validate(&self, record: &SpanRecord) -> Verdict {
        if record.name.trim().is_empty() {
            Verdict::Drop
        } else {
            Verdict::Keep
        }
    }
}

/// Drops spans whose name exceeds `max_chars` characters
#[derive(Debug, Clone)]
pub struct SpanNameLengthValidator {
    max_chars: usize,
}

impl SpanNameLengthValidator {
    pub fn new(max_chars: usize) -> Self {
        Self { max_chars }
    }
}

impl Validator<SpanRecord> for SpanNameLengthValidator {
    fn name(&self) -> &'static str {
        "span_name_length"
    }

    fn validate(&self, record: &SpanRecord) -> Verdict {
        if record.name.chars().count() > self.max_chars {
            Verdict::Drop
        } else {
            Verdict::Keep
        }
    }
}

// ============================================================================
// Defaults
// ============================================================================

/// Body length check, bounded by `max_log_body_length`
pub fn default_log_validators(config: &BatchingConfig) -> ValidatorChain<LogRecord> {
    ValidatorChain::new().with(BodyLengthValidator::new(config.max_log_body_length))
}

/// Whitespace-name check, then name length bounded by `max_span_name_length`
pub fn default_span_validators(config: &BatchingConfig) -> ValidatorChain<SpanRecord> {
    ValidatorChain::new()
        .with(WhitespaceSpanNameValidator)
        .with(SpanNameLengthValidator::new(config.max_span_name_length))
}

#[cfg(test)]
mod tests {
    use beacon_core::domain::{LogSeverity, ProcessId, SpanKind};
    use chrono::Utc;

    use super::*;

    fn log(body: &str) -> LogRecord {
        LogRecord::new(ProcessId::new(), LogSeverity::Info, body, Utc::now())
    }

    fn span(name: &str) -> SpanRecord {
        SpanRecord::new(name, SpanKind::Internal, ProcessId::new(), Utc::now())
    }

    #[test]
    fn test_body_length_boundary() {
        let chain = default_log_validators(&BatchingConfig::default());
        assert_eq!(chain.validate(&log(&"a".repeat(4_000))), Verdict::Keep);
        assert_eq!(chain.validate(&log(&"a".repeat(4_001))), Verdict::Drop);
        assert_eq!(chain.validate(&log("")), Verdict::Keep);
    }

    #[test]
    fn test_body_length_counts_characters_not_bytes() {
        let validator = BodyLengthValidator::new(3);
        assert_eq!(validator.validate(&log("äöü")), Verdict::Keep);
        assert_eq!(validator.validate(&log("äöüß")), Verdict::Drop);
    }

    #[test]
    fn test_default_span_chain() {
        let chain = default_span_validators(&BatchingConfig::default());
        assert_eq!(chain.len(), 2);
        assert_eq!(chain.validate(&span("checkout")), Verdict::Keep);
        assert_eq!(chain.validate(&span("   ")), Verdict::Drop);
        assert_eq!(chain.validate(&span("")), Verdict::Drop);
        assert_eq!(chain.validate(&span(&"n".repeat(128))), Verdict::Keep);
        assert_eq!(chain.validate(&span(&"n".repeat(129))), Verdict::Drop);
    }

    #[test]
    fn test_empty_chain_keeps_everything() {
        let chain: ValidatorChain<LogRecord> = ValidatorChain::new();
        assert!(chain.is_empty());
        assert_eq!(chain.validate(&log(&"x".repeat(10_000))), Verdict::Keep);
    }
}
