//! Shared run counters and elapsed-time tracking.
//!
//! Grounded on `infodups/infodups.c`'s global `stats_t` (packet/duplicate
//! counts behind a single mutex) and `print_stats()`. Here every counter is
//! its own `AtomicU64` rather than a struct behind one lock, the natural
//! Rust replacement for the original's statistics mutex.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::dissect::Frame;
use crate::time::Timestamp;

/// Number of similarity relations `dups` classifies (indices 0..=5).
pub const NUM_RELATIONS: usize = 6;

#[derive(Default)]
pub struct Stats {
    num_pkts: AtomicU64,
    num_ip: AtomicU64,
    num_tcp: AtomicU64,
    num_udp: AtomicU64,
    num_errors: AtomicU64,
    num_dup: [AtomicU64; NUM_RELATIONS],
    num_suspicious: AtomicU64,
    span: Mutex<(Option<Timestamp>, Option<Timestamp>)>,
}

impl Stats {
    pub fn new() -> Stats {
        Stats::default()
    }

    /// Tallies one ingested frame: total count, per-protocol breakdown,
    /// malformed-frame count, and the running first/last timestamp span
    /// `print_stats()`'s elapsed-time line is computed from.
    pub fn record_packet(&self, frame: &Frame) {
        self.num_pkts.fetch_add(1, Ordering::Relaxed);
        if frame.is_malformed {
            self.num_errors.fetch_add(1, Ordering::Relaxed);
        }
        if frame.is_ipv4() {
            self.num_ip.fetch_add(1, Ordering::Relaxed);
            if let Some(transport) = frame.transport {
                if transport.tcp.is_some() {
                    self.num_tcp.fetch_add(1, Ordering::Relaxed);
                } else {
                    self.num_udp.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        let mut span = self.span.lock().unwrap();
        if span.0.is_none() {
            span.0 = Some(frame.time);
        }
        span.1 = Some(frame.time);
    }

    pub fn record_dup(&self, kind: i8) {
        if let Ok(idx) = usize::try_from(kind) {
            if idx < NUM_RELATIONS {
                self.num_dup[idx].fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn record_suspicious(&self) {
        self.num_suspicious.fetch_add(1, Ordering::Relaxed);
    }

    pub fn num_pkts(&self) -> u64 {
        self.num_pkts.load(Ordering::Relaxed)
    }

    pub fn num_ip(&self) -> u64 {
        self.num_ip.load(Ordering::Relaxed)
    }

    pub fn num_tcp(&self) -> u64 {
        self.num_tcp.load(Ordering::Relaxed)
    }

    pub fn num_udp(&self) -> u64 {
        self.num_udp.load(Ordering::Relaxed)
    }

    pub fn num_errors(&self) -> u64 {
        self.num_errors.load(Ordering::Relaxed)
    }

    pub fn num_dup(&self, kind: usize) -> u64 {
        self.num_dup[kind].load(Ordering::Relaxed)
    }

    pub fn num_suspicious(&self) -> u64 {
        self.num_suspicious.load(Ordering::Relaxed)
    }

    /// Wall-clock span between the first and last ingested packet's
    /// timestamps, matching `print_stats()`'s `%.6lf seconds elapsed`.
    pub fn elapsed_secs(&self) -> f64 {
        let span = self.span.lock().unwrap();
        match (span.0, span.1) {
            (Some(first), Some(last)) => last.diff_secs_f64(&first),
            _ => 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_at(pos: u64, secs: i64, ipv4: bool) -> Frame {
        let raw: Vec<u8> = if ipv4 {
            let mut buf = vec![0u8; 34];
            buf[12] = 0x08;
            buf[13] = 0x00;
            buf[14] = 0x45;
            buf[23] = 17; // UDP
            buf
        } else {
            vec![0u8; 20]
        };
        Frame::parse(pos, Timestamp::new(secs, 0), &raw, raw.len() as u32, 5000, false)
    }

    #[test]
    fn counts_protocol_breakdown() {
        let stats = Stats::new();
        stats.record_packet(&frame_at(0, 0, true));
        stats.record_packet(&frame_at(1, 1, false));
        assert_eq!(stats.num_pkts(), 2);
        assert_eq!(stats.num_ip(), 1);
        assert_eq!(stats.num_udp(), 1);
        assert_eq!(stats.num_tcp(), 0);
    }

    #[test]
    fn elapsed_secs_spans_first_to_last() {
        let stats = Stats::new();
        stats.record_packet(&frame_at(0, 10, true));
        stats.record_packet(&frame_at(1, 13, true));
        assert!((stats.elapsed_secs() - 3.0).abs() < 1e-9);
    }

    #[test]
    fn record_dup_ignores_suspicious_sentinel() {
        let stats = Stats::new();
        stats.record_dup(-1);
        stats.record_dup(2);
        assert_eq!(stats.num_dup(2), 1);
    }
}
