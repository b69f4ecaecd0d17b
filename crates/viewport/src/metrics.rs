//! Process-wide counters for the browser layer.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default, Clone, Copy, Debug, PartialEq, Eq)]
pub struct ViewportMetricsSnapshot {
    pub commands: u64,
    pub events: u64,
    pub guard_events: u64,
    pub downloads: u64,
    pub crashes: u64,
}

static COMMANDS: AtomicU64 = AtomicU64::new(0);
static EVENTS: AtomicU64 = AtomicU64::new(0);
static GUARD_EVENTS: AtomicU64 = AtomicU64::new(0);
static DOWNLOADS: AtomicU64 = AtomicU64::new(0);
static CRASHES: AtomicU64 = AtomicU64::new(0);

pub fn record_command() {
    COMMANDS.fetch_add(1, Ordering::Relaxed);
}

pub fn record_event() {
    EVENTS.fetch_add(1, Ordering::Relaxed);
}

pub fn record_guard_event() {
    GUARD_EVENTS.fetch_add(1, Ordering::Relaxed);
}

pub fn record_download() {
    DOWNLOADS.fetch_add(1, Ordering::Relaxed);
}

pub fn record_crash() {
    CRASHES.fetch_add(1, Ordering::Relaxed);
}

pub fn snapshot() -> ViewportMetricsSnapshot {
    ViewportMetricsSnapshot {
        commands: COMMANDS.load(Ordering::Relaxed),
        events: EVENTS.load(Ordering::Relaxed),
        guard_events: GUARD_EVENTS.load(Ordering::Relaxed),
        downloads: DOWNLOADS.load(Ordering::Relaxed),
        crashes: CRASHES.load(Ordering::Relaxed),
    }
}

pub fn reset() {
    COMMANDS.store(0, Ordering::Relaxed);
    EVENTS.store(0, Ordering::Relaxed);
    GUARD_EVENTS.store(0, Ordering::Relaxed);
    DOWNLOADS.store(0, Ordering::Relaxed);
    CRASHES.store(0, Ordering::Relaxed);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        reset();
        record_command();
        record_command();
        record_download();
        let snap = snapshot();
        assert_eq!(snap.commands, 2);
        assert_eq!(snap.downloads, 1);
        assert_eq!(snap.crashes, 0);
    }
}
