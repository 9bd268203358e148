//! Per-filter time-series bucketizer and filter-file loading for `tseries`.
//!
//! Grounded on `tseries/series.c`: `series_compute`'s interval bookkeeping
//! (start a bucket lazily at the first matching packet, flush and zero-fill
//! on every interval boundary crossed) and `series_add_filter`'s two input
//! formats (BPF program text vs. `srcNet srcMask dstNet dstMask` lines).

use crate::trie::Filter;

/// One filter's running bucket state (`series_t` minus the compiled BPF
/// program, which the caller owns separately).
struct Bucket {
    start_ms: Option<i64>,
    bytes: u64,
    packets: u64,
}

impl Bucket {
    fn new() -> Bucket {
        Bucket {
            start_ms: None,
            bytes: 0,
            packets: 0,
        }
    }
}

/// One completed bucket, ready for the caller to print.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Point {
    pub filter_id: usize,
    pub start_ms: i64,
    pub bytes: u64,
    pub packets: u64,
}

/// Fixed-width time bucketing for N named filters (0-indexed, matching
/// the printed `<filter#>` column), aligned to a reference timestamp.
///
/// Grounded on `series_compute`: a filter's bucket starts lazily, at
/// whichever packet first matches it, pinned to `reference_ms` rather than
/// that packet's own timestamp (so independently-triggered filters stay on
/// the same grid). Zero-filled gap buckets are emitted between non-empty
/// ones unless `dump_zeros` is false.
pub struct Bucketizer {
    width_ms: i64,
    reference_ms: i64,
    dump_zeros: bool,
    buckets: Vec<Bucket>,
}

impl Bucketizer {
    pub fn new(num_filters: usize, width_ms: i64, reference_ms: i64, dump_zeros: bool) -> Bucketizer {
        Bucketizer {
            width_ms,
            reference_ms,
            dump_zeros,
            buckets: (0..num_filters).map(|_| Bucket::new()).collect(),
        }
    }

    /// Records a match: `pkt_time_ms` is the current packet's timestamp in
    /// milliseconds, `len` its on-wire length. Returns every bucket that
    /// this packet's arrival caused to close (usually none; one when a
    /// single interval boundary was crossed; more when the filter was idle
    /// across several intervals and `dump_zeros` is set).
    pub fn record(&mut self, filter_id: usize, pkt_time_ms: i64, len: u64) -> Vec<Point> {
        let mut closed = Vec::new();
        let bucket = &mut self.buckets[filter_id];

        let start = *bucket.start_ms.get_or_insert(self.reference_ms);

        if pkt_time_ms < start + self.width_ms {
            bucket.bytes += len;
            bucket.packets += 1;
            return closed;
        }

        closed.push(Point {
            filter_id,
            start_ms: start,
            bytes: bucket.bytes,
            packets: bucket.packets,
        });
        let mut next_start = start + self.width_ms;

        while pkt_time_ms > next_start + self.width_ms {
            if self.dump_zeros {
                closed.push(Point {
                    filter_id,
                    start_ms: next_start,
                    bytes: 0,
                    packets: 0,
                });
            }
            next_start += self.width_ms;
        }

        bucket.start_ms = Some(next_start);
        bucket.bytes = len;
        bucket.packets = 1;
        closed
    }

    /// Flushes every filter's still-open bucket, in filter order, as
    /// `series_destroy`'s final `endSeries` pass does. Only non-empty
    /// buckets are flushed; an untouched filter never printed a line.
    pub fn finish(&mut self) -> Vec<Point> {
        let mut out = Vec::new();
        for (filter_id, bucket) in self.buckets.iter().enumerate() {
            if let Some(start_ms) = bucket.start_ms {
                if bucket.packets > 0 {
                    out.push(Point {
                        filter_id,
                        start_ms,
                        bytes: bucket.bytes,
                        packets: bucket.packets,
                    });
                }
            }
        }
        out
    }
}

/// Which of `tseries`'s two filter-file formats is in effect.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterMode {
    /// Each line is a BPF expression, compiled and matched independently.
    Bpf,
    /// Each line is `srcNet srcMask dstNet dstMask`, matched via the grid
    /// of tries.
    Nets,
}

/// Parses one NETS-mode filter line (`srcIP srcMask dstIP dstMask`) into a
/// [`Filter`]. Grounded on `DSTries_add_filter`'s `sscanf` of four dotted
/// quads.
pub fn parse_nets_line(line: &str, id: u32) -> Option<Filter> {
    let mut parts = line.split_whitespace();
    let src_ip: std::net::Ipv4Addr = parts.next()?.parse().ok()?;
    let src_mask: std::net::Ipv4Addr = parts.next()?.parse().ok()?;
    let dst_ip: std::net::Ipv4Addr = parts.next()?.parse().ok()?;
    let dst_mask: std::net::Ipv4Addr = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some(Filter::new(id, src_ip, src_mask, dst_ip, dst_mask))
}

/// Splits a loaded filter file into non-empty, non-blank lines: empty and
/// trailing-newline-only lines are skipped.
pub fn filter_lines(contents: &str) -> impl Iterator<Item = &str> {
    contents.lines().map(str::trim).filter(|l| !l.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_packet_opens_bucket_but_does_not_flush() {
        let mut b = Bucketizer::new(1, 1000, 0, true);
        let closed = b.record(0, 100, 50);
        assert!(closed.is_empty());
        let final_points = b.finish();
        assert_eq!(
            final_points,
            vec![Point {
                filter_id: 0,
                start_ms: 0,
                bytes: 50,
                packets: 1
            }]
        );
    }

    #[test]
    fn crossing_one_boundary_flushes_exactly_one_bucket() {
        let mut b = Bucketizer::new(1, 1000, 0, true);
        b.record(0, 100, 50);
        let closed = b.record(0, 1200, 30);
        assert_eq!(
            closed,
            vec![Point {
                filter_id: 0,
                start_ms: 0,
                bytes: 50,
                packets: 1
            }]
        );
    }

    #[test]
    fn idle_gap_zero_fills_when_enabled() {
        let mut b = Bucketizer::new(1, 1000, 0, true);
        b.record(0, 100, 50);
        let closed = b.record(0, 3200, 10);
        assert_eq!(closed.len(), 3);
        assert_eq!(closed[0].bytes, 50);
        assert_eq!(closed[1], Point { filter_id: 0, start_ms: 1000, bytes: 0, packets: 0 });
        assert_eq!(closed[2], Point { filter_id: 0, start_ms: 2000, bytes: 0, packets: 0 });
    }

    #[test]
    fn idle_gap_suppressed_when_dump_zeros_disabled() {
        let mut b = Bucketizer::new(1, 1000, 0, false);
        b.record(0, 100, 50);
        let closed = b.record(0, 3200, 10);
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].bytes, 50);
    }

    #[test]
    fn filter_lines_skips_blank_entries() {
        let contents = "8.8.0.0 255.255.0.0 0.0.0.0 0.0.0.0\n\n   \ntcp port 80\n";
        let lines: Vec<&str> = filter_lines(contents).collect();
        assert_eq!(lines, vec!["8.8.0.0 255.255.0.0 0.0.0.0 0.0.0.0", "tcp port 80"]);
    }

    #[test]
    fn nets_line_parses_four_dotted_quads() {
        let f = parse_nets_line("8.8.0.0 255.255.0.0 0.0.0.0 0.0.0.0", 3).unwrap();
        assert_eq!(f.id, 3);
        assert_eq!(f.src_mask, u32::from(std::net::Ipv4Addr::new(255, 255, 0, 0)));
    }

    #[test]
    fn nets_line_rejects_wrong_token_count() {
        assert!(parse_nets_line("8.8.0.0 255.255.0.0 0.0.0.0", 0).is_none());
        assert!(parse_nets_line("not an ip at all here today", 0).is_none());
    }
}
