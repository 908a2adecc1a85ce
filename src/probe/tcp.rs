use super::{ErrorDetail, ProbeOutcome};
use serde_json::Map;
use std::{
    future::Future,
    io,
    time::{Duration, Instant},
};
use tokio::{net::TcpStream, time};
use tracing::{debug, warn};

/// Attempt one TCP connection to `host:port`
///
/// The clock stops at the first of: connected, error, or `timeout`
/// elapsed. The socket is dropped before returning on every path.
pub async fn probe_tcp(host: &str, port: u16, timeout: Duration) -> ProbeOutcome {
    debug!(host, port, timeout_ms = %timeout.as_millis(), "TCP connect");

    let outcome = bounded_connect(TcpStream::connect((host, port)), timeout).await;

    match &outcome.error {
        None => debug!(host, port, duration_ms = outcome.duration_ms, "TCP connected"),
        Some(err) => warn!(
            host,
            port,
            duration_ms = outcome.duration_ms,
            code = err.code.as_deref().unwrap_or("N/A"),
            "TCP failed: {}",
            err.message
        ),
    }

    outcome
}

/// Drive `connect` for at most `timeout`
///
/// A connected stream is dropped as soon as the clock stops; on timeout the
/// pending future, and any socket it holds, is dropped with it.
async fn bounded_connect<F, S>(connect: F, timeout: Duration) -> ProbeOutcome
where
    F: Future<Output = io::Result<S>>,
{
    let start = Instant::now();
    match time::timeout(timeout, connect).await {
        Ok(Ok(stream)) => {
            let elapsed = start.elapsed();
            drop(stream);
            ProbeOutcome::succeeded(elapsed, Map::new())
        }
        Ok(Err(err)) => ProbeOutcome::failed(start.elapsed(), ErrorDetail::from(&err)),
        Err(_) => ProbeOutcome::failed(start.elapsed(), ErrorDetail::timeout()),
    }
}
