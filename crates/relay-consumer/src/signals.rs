//! Shutdown signal and liveness reporting.
//!
//! The dispatcher consults a `SignalMonitor` once per loop iteration:
//! a set shutdown flag ends the loop gracefully, and liveness is
//! reported after every idle poll and every processed message so an
//! external supervisor never sees a gap longer than one cycle.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::info;

pub trait SignalMonitor: Send + Sync {
    /// Non-blocking check for a pending shutdown request.
    fn shutdown_requested(&self) -> bool;

    /// Non-blocking liveness ping for the supervising process.
    fn report_liveness(&self);
}

/// Process-level signal state: a shutdown flag flipped by the
/// termination signal and a last-liveness timestamp a supervisor can
/// probe.
#[derive(Debug, Default)]
pub struct ProcessSignals {
    shutdown: AtomicBool,
    last_liveness_ms: AtomicU64,
}

impl ProcessSignals {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// Unix millis of the most recent liveness report, 0 if none yet.
    pub fn last_liveness_ms(&self) -> u64 {
        self.last_liveness_ms.load(Ordering::SeqCst)
    }
}

impl SignalMonitor for ProcessSignals {
    fn shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    fn report_liveness(&self) {
        self.last_liveness_ms.store(
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis() as u64,
            Ordering::SeqCst,
        );
    }
}

/// Flip the shutdown flag when the process receives SIGTERM or ctrl-c.
pub fn spawn_termination_listener(signals: Arc<ProcessSignals>) {
    tokio::spawn(async move {
        wait_for_termination().await;
        info!("Termination signal received, requesting shutdown");
        signals.request_shutdown();
    });
}

#[cfg(unix)]
async fn wait_for_termination() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(_) => {
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => {}
        _ = tokio::signal::ctrl_c() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_termination() {
    let _ = tokio::signal::ctrl_c().await;
}
