use pot_renewal::{RenewalEvent, RenewalMetrics};
use serde::Serialize;
use std::io::Write;

/// Emit a JSONL event to stdout (flushed immediately for piped output).
pub fn emit<T: Serialize>(event: &T) {
    if let Ok(json) = serde_json::to_string(event) {
        let stdout = std::io::stdout();
        let mut lock = stdout.lock();
        let _ = writeln!(lock, "{json}");
        let _ = lock.flush();
    }
}

/// RFC 3339 timestamp for JSONL events.
pub fn now_iso() -> String {
    chrono::Utc::now().to_rfc3339()
}

// ── Session events ──────────────────────────────────────────────

#[derive(Serialize)]
pub struct EventStarted {
    pub event: &'static str,
    pub mode: &'static str,
    pub paths: usize,
    pub hops: usize,
    pub timestamp: String,
}

impl EventStarted {
    pub fn new(mode: &'static str, paths: usize, hops: usize) -> Self {
        Self {
            event: "started",
            mode,
            paths,
            hops,
            timestamp: now_iso(),
        }
    }
}

// ── Renewal events ──────────────────────────────────────────────

/// A service event, stamped.
#[derive(Serialize)]
pub struct EventRenewal {
    #[serde(flatten)]
    pub inner: RenewalEvent,
    pub elapsed_s: f64,
    pub timestamp: String,
}

// ── Fault injection ─────────────────────────────────────────────

#[derive(Serialize)]
pub struct EventFault {
    pub event: &'static str,
    pub action: &'static str,
    pub endpoint: String,
    pub elapsed_s: f64,
}

// ── Verify ──────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct EventVerify {
    pub event: &'static str,
    pub path: String,
    pub active_index: u32,
    pub prime: u64,
    pub packets: u32,
    pub verified: u32,
    pub tampered_rejected: u32,
}

// ── Summary ─────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct EventSummary<'a> {
    pub event: &'static str,
    pub duration_s: f64,
    pub stalled: Vec<String>,
    pub leftover_configs: usize,
    pub metrics: &'a RenewalMetrics,
    pub timestamp: String,
}
