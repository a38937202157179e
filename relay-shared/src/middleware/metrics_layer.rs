use axum::body::Body;
use axum::extract::MatchedPath;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::Response;
use metrics::{counter, histogram};
use std::time::Instant;

/// HTTP-layer metrics for the small admin surface (`/health`, `/user`).
///
/// The admission pipeline itself does not run behind this middleware — it
/// never sees an axum `Request` — so its acceptance/rejection counters are
/// recorded directly from `relay_core::pipeline` via
/// [`record_admission_outcome`].
pub async fn metrics_middleware(
    matched_path: Option<MatchedPath>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let start = Instant::now();
    let method = req.method().to_string();
    let path = matched_path
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());

    let response = next.run(req).await;

    let duration = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    let labels = [("method", method), ("path", path), ("status", status)];

    counter!("http_requests_total", &labels).increment(1);
    histogram!("http_request_duration_seconds", &labels).record(duration);

    response
}

pub fn init_metrics() -> metrics_exporter_prometheus::PrometheusHandle {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    builder
        .install_recorder()
        .expect("failed to install Prometheus recorder")
}

/// Record the outcome of one admission, labeled by the rejection reason
/// class (the prefix before the first `:`, e.g. `"blocked"`, `"pow"`,
/// `"rejected"`, `"invalid"`, `"error"`), or `"accepted"` on success.
pub fn record_admission_outcome(reason_class: &str) {
    counter!("relay_admissions_total", "reason" => reason_class.to_string()).increment(1);
}

/// Record a publication or admission fee debited from a submitter's balance.
pub fn record_fee_debited(kind: &'static str, amount_msat: i64) {
    counter!("relay_fees_debited_msat_total", "kind" => kind).increment(amount_msat.max(0) as u64);
}
