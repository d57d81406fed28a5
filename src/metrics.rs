//! In-process counters exposed at `GET /metrics`. No Prometheus exposition
//! format is carried; a JSON snapshot is all the debug/ops surface needs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use serde::Serialize;

#[derive(Default)]
pub struct Metrics {
    http_requests: AtomicU64,
    ws_frames_in: AtomicU64,
    ws_frames_out: AtomicU64,
    reconciliation_ticks: AtomicU64,
    provider_calls_by_outcome: Mutex<HashMap<&'static str, u64>>,
}

#[derive(Serialize)]
pub struct MetricsSnapshot {
    pub http_requests: u64,
    pub ws_frames_in: u64,
    pub ws_frames_out: u64,
    pub reconciliation_ticks: u64,
    pub provider_calls_by_outcome: HashMap<&'static str, u64>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_http_request(&self) {
        self.http_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_ws_frame_in(&self) {
        self.ws_frames_in.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_ws_frame_out(&self) {
        self.ws_frames_out.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reconciliation_tick(&self) {
        self.reconciliation_ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_provider_outcome(&self, outcome: &'static str) {
        let mut counts = self.provider_calls_by_outcome.lock().unwrap_or_else(|e| e.into_inner());
        *counts.entry(outcome).or_insert(0) += 1;
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            http_requests: self.http_requests.load(Ordering::Relaxed),
            ws_frames_in: self.ws_frames_in.load(Ordering::Relaxed),
            ws_frames_out: self.ws_frames_out.load(Ordering::Relaxed),
            reconciliation_ticks: self.reconciliation_ticks.load(Ordering::Relaxed),
            provider_calls_by_outcome: self.provider_calls_by_outcome.lock().unwrap_or_else(|e| e.into_inner()).clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let m = Metrics::new();
        m.record_http_request();
        m.record_http_request();
        m.record_ws_frame_in();
        m.record_provider_outcome("ok");
        m.record_provider_outcome("ok");
        m.record_provider_outcome("error");

        let snap = m.snapshot();
        assert_eq!(snap.http_requests, 2);
        assert_eq!(snap.ws_frames_in, 1);
        assert_eq!(snap.provider_calls_by_outcome["ok"], 2);
        assert_eq!(snap.provider_calls_by_outcome["error"], 1);
    }
}
