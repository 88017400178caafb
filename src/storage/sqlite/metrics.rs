//! Store operation metrics.

use std::time::Instant;

/// Records one completed store operation.
///
/// Emits `kvtree_operations_total` (counter) and
/// `kvtree_operation_duration_ms` (histogram), both labelled with the
/// operation name and `"success"` or `"error"`. Without an installed recorder
/// these are no-ops.
pub fn record_operation_metrics(operation: &'static str, start: Instant, status: &'static str) {
    metrics::counter!(
        "kvtree_operations_total",
        "operation" => operation,
        "status" => status
    )
    .increment(1);
    metrics::histogram!(
        "kvtree_operation_duration_ms",
        "operation" => operation,
        "status" => status
    )
    .record(start.elapsed().as_secs_f64() * 1000.0);
}
