use std::fmt::Display;
use std::future::Future;
use std::time::Instant;

use chrono::Utc;
use tracing::info;

use crate::utils::logging::TIMING_TARGET;

/// Wraps one generator call with request/response timing records.
pub async fn log_generation_timing<T, E, F, Fut>(
    provider: &str,
    model: &str,
    style_id: &str,
    token: u64,
    call: F,
) -> Result<T, E>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let started_at = Utc::now();
    let started_perf = Instant::now();
    info!(
        target: TIMING_TARGET,
        "event=generation_request provider={} model={} style={} token={} started_at={}",
        provider,
        model,
        style_id,
        token,
        started_at.to_rfc3339()
    );

    let result = call().await;
    let (status, detail) = match &result {
        Ok(_) => ("success", String::new()),
        Err(err) => ("error", err.to_string()),
    };

    let completed_at = Utc::now();
    let duration = started_perf.elapsed().as_secs_f64();
    info!(
        target: TIMING_TARGET,
        "event=generation_response provider={} model={} style={} token={} completed_at={} duration_s={:.3} status={} detail={:?}",
        provider,
        model,
        style_id,
        token,
        completed_at.to_rfc3339(),
        duration,
        status,
        detail
    );

    result
}
