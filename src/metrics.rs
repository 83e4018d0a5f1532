// Copyright (c) 2025 ManuGH
// Licensed under the PolyForm Noncommercial License 1.0.0
// Since v2.0.0, this software is restricted to non-commercial use only.

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

use crate::params::Mode;

/// Initialize Prometheus metrics exporter and return handle
pub fn init_metrics() -> anyhow::Result<metrics_exporter_prometheus::PrometheusHandle> {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    let handle = builder.install_recorder()?;
    Ok(handle)
}

/// Record a decoded frame
pub fn record_frame_decoded() {
    counter!("ffio_frames_decoded_total").increment(1);
}

/// Record an encoded frame
pub fn record_frame_encoded() {
    counter!("ffio_frames_encoded_total").increment(1);
}

/// Record a decode/encode call that did not produce a frame
pub fn record_frame_failure(op: &'static str) {
    counter!("ffio_frame_failures_total", "op" => op).increment(1);
}

/// Open engine sessions in this process
pub fn adjust_active_sessions(delta: f64) {
    gauge!("ffio_sessions_active").increment(delta);
}

/// Tracks how long opening a session takes
pub struct OpenGuard {
    mode: Mode,
    start: Instant,
}

impl OpenGuard {
    pub fn new(mode: Mode) -> Self {
        Self {
            mode,
            start: Instant::now(),
        }
    }

    /// Session opened; returns the elapsed time
    pub fn success(self) -> Duration {
        let elapsed = self.start.elapsed();
        counter!("ffio_sessions_opened_total", "mode" => self.mode.as_str()).increment(1);
        histogram!("ffio_session_open_seconds").record(elapsed.as_secs_f64());
        adjust_active_sessions(1.0);
        elapsed
    }

    /// Session failed to open; returns the elapsed time
    pub fn error(self) -> Duration {
        let elapsed = self.start.elapsed();
        counter!("ffio_sessions_failed_total", "mode" => self.mode.as_str()).increment(1);
        histogram!("ffio_session_open_seconds").record(elapsed.as_secs_f64());
        elapsed
    }
}
