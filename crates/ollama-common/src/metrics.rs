//! OpenTelemetry instruments for the operator
//!
//! Instruments are created lazily on the global meter, so recording before
//! telemetry is initialised is a cheap no-op.

use std::sync::LazyLock;

use opentelemetry::global;
use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::KeyValue;

static METER: LazyLock<Meter> = LazyLock::new(|| global::meter("ollama-operator"));

/// Histogram of reconcile duration
///
/// Labels:
/// - `kind`: Model, Prompt
/// - `result`: success, error
pub static RECONCILE_DURATION: LazyLock<Histogram<f64>> = LazyLock::new(|| {
    METER
        .f64_histogram("ollama_operator_reconcile_duration_seconds")
        .with_description("Duration of reconciliation in seconds")
        .with_unit("s")
        .build()
});

/// Counter of model pulls
///
/// Labels:
/// - `model`: model identifier
/// - `result`: success, incomplete
pub static MODEL_PULLS: LazyLock<Counter<u64>> = LazyLock::new(|| {
    METER
        .u64_counter("ollama_operator_model_pulls_total")
        .with_description("Total number of model pulls issued")
        .with_unit("{pulls}")
        .build()
});

/// Counter of tokens generated for prompts
///
/// Labels:
/// - `model`: model identifier
pub static GENERATED_TOKENS: LazyLock<Counter<u64>> = LazyLock::new(|| {
    METER
        .u64_counter("ollama_operator_generated_tokens_total")
        .with_description("Total number of response tokens generated for prompts")
        .with_unit("{tokens}")
        .build()
});

/// Outcome label for a reconcile
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReconcileResult {
    /// Reconcile returned an action
    Success,
    /// Reconcile returned an error
    Error,
}

impl ReconcileResult {
    fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
        }
    }
}

/// Record one reconcile of `kind` taking `seconds`
pub fn record_reconcile(kind: &'static str, result: ReconcileResult, seconds: f64) {
    RECONCILE_DURATION.record(
        seconds,
        &[
            KeyValue::new("kind", kind),
            KeyValue::new("result", result.as_str()),
        ],
    );
}

/// Record a finished pull of `model`
pub fn record_pull(model: &str, succeeded: bool) {
    let result = if succeeded { "success" } else { "incomplete" };
    MODEL_PULLS.add(
        1,
        &[
            KeyValue::new("model", model.to_string()),
            KeyValue::new("result", result),
        ],
    );
}

/// Record `tokens` generated by `model`
pub fn record_generated_tokens(model: &str, tokens: u64) {
    GENERATED_TOKENS.add(tokens, &[KeyValue::new("model", model.to_string())]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_without_a_provider_is_harmless() {
        record_reconcile("Model", ReconcileResult::Success, 0.25);
        record_pull("gemma2:2b", false);
        record_generated_tokens("gemma2:2b", 42);
    }
}
