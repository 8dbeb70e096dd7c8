use tracing::trace;

// Lightweight metrics helpers that stay safe without a recorder installed.
// Prometheus gets the real counters; these add trace-level breadcrumbs.

pub fn inc_requests(route: &'static str) {
    trace!(
        target = "wooex.metrics",
        route = route,
        "requests_total_inc"
    );
}

pub fn stage_elapsed(stage: &'static str, elapsed_ms: u128) {
    trace!(
        target = "wooex.metrics",
        stage = stage,
        elapsed_ms = elapsed_ms as u64,
        "stage_elapsed"
    );
}
