use uuid::Uuid;

/// 32 hex characters, the width of an OpenTelemetry trace id.
pub fn generate_trace_id() -> String {
    Uuid::new_v4().as_simple().to_string()
}

/// 16 hex characters.
pub fn generate_span_id() -> String {
    let mut id = Uuid::new_v4().as_simple().to_string();
    id.truncate(16);
    id
}

/// Root span for one reconciliation attempt, plus its trace id so the id
/// can be quoted outside the log (e.g. in a notification).
pub fn create_operation_span(operation: &str) -> (tracing::Span, String) {
    let trace_id = generate_trace_id();
    let span = tracing::info_span!(
        "operation",
        trace_id = %trace_id,
        span_id = %generate_span_id(),
        operation = %operation,
    );
    (span, trace_id)
}

/// A span that shares `trace_id` with its parent operation.
pub fn create_child_span(trace_id: &str, operation: &str) -> tracing::Span {
    tracing::info_span!(
        "operation",
        trace_id = %trace_id,
        span_id = %generate_span_id(),
        operation = %operation,
    )
}
