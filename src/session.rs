//! Per-connection streaming sessions.
//!
//! Each connected client owns exactly one [`Session`], which owns exactly one
//! periodic sampling task. The task is started when the connection is
//! established and cancelled when the connection goes away; there is no
//! process-wide timer table to clean up.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use axum::extract::ws::Message;
use futures::{Sink, SinkExt};
use serde::Serialize;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::metrics::LoadProbe;

/// Identity of one client connection, unique for the process lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Mint the next connection id.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Events pushed to the client, tagged with their event name on the wire.
///
/// `CpuData` serializes as `{"event":"cpuData","data":{"cpu":"37.42"}}`.
#[derive(Debug, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
    CpuData { cpu: String },
}

/// Format a raw load percentage the way it travels on the wire: exactly two
/// fractional digits.
pub fn format_load(load: f64) -> String {
    format!("{:.2}", load)
}

/// A live streaming session for one connected client.
///
/// Holds the cancellation handle for that client's sampling task. Stopping
/// an already-stopped session is a no-op, and dropping the session stops it,
/// so a timer can never outlive its connection.
pub struct Session {
    id: ConnectionId,
    cancel: CancellationToken,
}

impl Session {
    /// Start pushing readings from `probe` into `sink` every `period`.
    ///
    /// Exactly one sampling task is spawned per call. The interval fires on a
    /// fixed schedule relative to now; the first reading reaches the client
    /// one period after the session starts.
    pub fn start<S, P>(id: ConnectionId, sink: S, probe: P, period: Duration) -> Self
    where
        S: Sink<Message> + Send + Unpin + 'static,
        S::Error: fmt::Display,
        P: LoadProbe,
    {
        let cancel = CancellationToken::new();
        tokio::spawn(stream_readings(id, sink, probe, period, cancel.clone()));
        Self { id, cancel }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Stop the sampling task. No tick starts after this returns; safe to
    /// call any number of times.
    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Tick loop for one session: sample, format, push.
///
/// Sampling failures skip the tick and leave the timer running. Delivery
/// failures mean the peer is gone; the reading is dropped and the loop ends.
/// Ticks are serialized per session: a query that outlasts the period delays
/// delivery, and the interval then fires the overdue ticks on its fixed
/// schedule.
async fn stream_readings<S, P>(
    id: ConnectionId,
    mut sink: S,
    mut probe: P,
    period: Duration,
    cancel: CancellationToken,
) where
    S: Sink<Message> + Send + Unpin + 'static,
    S::Error: fmt::Display,
    P: LoadProbe,
{
    let mut ticker = time::interval(period);

    // The interval's first tick completes immediately; spend it priming the
    // probe's delta window so the first delivered reading covers a full
    // period.
    ticker.tick().await;
    if let Err(e) = probe.current_load().await {
        warn!(conn = %id, error = %e, "baseline cpu sample failed");
    }

    loop {
        tokio::select! {
            // Checked first so no tick body starts once the connection is
            // being torn down.
            biased;

            _ = cancel.cancelled() => {
                debug!(conn = %id, "session stopped");
                break;
            }
            _ = ticker.tick() => {
                let load = match probe.current_load().await {
                    Ok(load) => load,
                    Err(e) => {
                        warn!(conn = %id, error = %e, "cpu sample failed, skipping tick");
                        continue;
                    }
                };

                let event = ServerEvent::CpuData {
                    cpu: format_load(load),
                };
                let text = match serde_json::to_string(&event) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(conn = %id, error = %e, "failed to encode reading");
                        continue;
                    }
                };

                if let Err(e) = sink.send(Message::Text(text)).await {
                    debug!(conn = %id, error = %e, "delivery failed, dropping reading");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_to_two_fractional_digits() {
        assert_eq!(format_load(37.4216), "37.42");
        assert_eq!(format_load(37.425_9), "37.43");
        assert_eq!(format_load(0.0), "0.00");
        assert_eq!(format_load(99.999), "100.00");
        assert_eq!(format_load(100.0), "100.00");
    }

    #[test]
    fn cpu_data_wire_shape() {
        let event = ServerEvent::CpuData {
            cpu: format_load(37.4216),
        };
        let text = serde_json::to_string(&event).unwrap();
        assert_eq!(text, r#"{"event":"cpuData","data":{"cpu":"37.42"}}"#);
    }

    #[test]
    fn connection_ids_are_unique() {
        let a = ConnectionId::next();
        let b = ConnectionId::next();
        assert_ne!(a, b);
    }
}
