//! Duplicate-packet classification over a sliding window.
//!
//! Grounded on `infodups/dups.c`: `_dups_search`'s backward walk from a
//! newly-arrived packet over its predecessors, `comparator_0`..`comparator_5`
//! for the six similarity relations, and `_dups_search_fast` for the
//! IPv4-only fast path. `dups_fprintf`'s field order is reproduced by
//! [`format`].

use std::fmt::Write as _;

use crate::dissect::ip::{IP_PROTO_TCP, IP_PROTO_UDP};
use crate::dissect::Frame;
use crate::stats::Stats;
use crate::time::{SignedDuration, Timestamp};
use crate::window::{NodeId, Window};

/// How far back a scan is willing to look before giving up on a packet.
#[derive(Clone, Copy, Debug)]
pub enum WindowLimit {
    /// Seconds of elapsed time between the newer and older packet.
    Time(f64),
    /// Positions between the newer and older packet (`N.pos - C.pos`).
    Positions(u64),
}

impl WindowLimit {
    fn within(&self, newer: &Frame, older: &Frame) -> bool {
        match self {
            WindowLimit::Time(limit) => newer.time.diff_secs_f64(&older.time) <= *limit,
            WindowLimit::Positions(limit) => {
                newer.pos - older.pos <= limit.saturating_sub(1)
            }
        }
    }
}

/// Per-run classifier configuration, replacing the original's global
/// mutable statics (dup mask, window mode, extended/suspicious flags).
#[derive(Clone, Debug)]
pub struct DupsConfig {
    /// Which of the six similarity relations (indices 0..=5) are tried.
    pub enabled: [bool; 6],
    /// IPv4-only single-relation fast path (`-F`).
    pub fast: bool,
    pub window: WindowLimit,
    /// `-T`: print the extended per-record fields.
    pub extended: bool,
    /// `-s`: also emit same-payload-no-relation-matched candidates.
    pub suspicious: bool,
}

impl Default for DupsConfig {
    fn default() -> Self {
        DupsConfig {
            enabled: [true; 6],
            fast: false,
            window: WindowLimit::Time(0.1),
            extended: false,
            suspicious: false,
        }
    }
}

/// One classified line: either a real duplicate (`kind` in 0..=5) or a
/// suspicious same-payload candidate (`kind == -1`).
#[derive(Clone, Debug)]
pub struct DupRecord {
    pub dup_no: u64,
    pub diff_no: u64,
    pub kind: i8,
    pub null_pay: bool,
    pub vlan_changed: bool,
    pub dscp_changed: bool,
    pub diff_ts: SignedDuration,
    pub diff_ttl: i32,
    pub newer_time: Timestamp,
    pub newer_ttl: i32,
    pub newer_src_mac: Option<[u8; 6]>,
    pub newer_dst_mac: Option<[u8; 6]>,
    pub newer_ip: Option<(u32, u32)>,
    pub older_src_mac: Option<[u8; 6]>,
    pub older_dst_mac: Option<[u8; 6]>,
    pub older_ip: Option<(u32, u32)>,
}

/// Result of one backward scan: at most one real duplicate, plus every
/// suspicious candidate seen along the way (only populated when
/// [`DupsConfig::suspicious`] is set).
#[derive(Default)]
pub struct ScanOutcome {
    pub dup: Option<DupRecord>,
    pub suspicious: Vec<DupRecord>,
}

/// A worker's output: every formatted line produced for one ingested
/// packet, tagged with that packet's position for the multiplexer to order
/// by. All lines in one `Task` share the same `pos`.
pub struct Task {
    pub pos: u64,
    pub lines: Vec<String>,
}

/// Packages a scan's outcome into a [`Task`], or `None` if nothing was
/// found (no dup, and either suspicious output is off or nothing matched).
pub fn outcome_to_task(outcome: ScanOutcome, cfg: &DupsConfig) -> Option<Task> {
    let mut lines = Vec::new();
    let mut pos = None;
    for rec in &outcome.suspicious {
        pos.get_or_insert(rec.dup_no);
        lines.push(format(rec, cfg.extended));
    }
    if let Some(rec) = &outcome.dup {
        pos.get_or_insert(rec.dup_no);
        lines.push(format(rec, cfg.extended));
    }
    let pos = pos?;
    Some(Task { pos, lines })
}

enum Step {
    OutOfWindow,
    Continue,
    Dup(DupRecord, bool),
}

/// Classifies the most recently appended packet (`new_id`) against its
/// predecessors, walking backward until the window limit is exceeded or
/// `worker_id`'s marker is reached. On return, `worker_id`'s marker has been
/// advanced past every node this scan determined can never be a duplicate
/// of anything appended later (mirrors `_dups_search`'s `buffer_set_marker`
/// call when nothing was found).
pub fn search(
    window: &Window<Frame>,
    new_id: NodeId,
    worker_id: usize,
    cfg: &DupsConfig,
    stats: &Stats,
) -> ScanOutcome {
    if cfg.fast {
        return search_fast(window, new_id, worker_id, cfg, stats);
    }

    let scan = window.start_scan();
    let pkt = scan.with_load(new_id, |f| f.clone());
    let marker = window.marker(worker_id);

    let mut last = new_id;
    let mut node_id = scan.prev(new_id);
    let mut dup: Option<(DupRecord, bool, NodeId)> = None;
    let mut suspicious = Vec::new();

    while let Some(id) = node_id {
        if marker == Some(last) {
            break;
        }

        let step = scan.with_load(id, |cur| classify_pair(cur, &pkt, cfg, stats, &mut suspicious));

        match step {
            Step::OutOfWindow => break,
            Step::Dup(rec, frag) => {
                dup = Some((rec, frag, id));
                break;
            }
            Step::Continue => {
                last = id;
                node_id = scan.prev(id);
            }
        }
    }

    if dup.is_none() && node_id.is_some() && marker != Some(last) {
        scan.set_marker(window, last, worker_id);
    }

    let mut outcome = ScanOutcome {
        dup: None,
        suspicious,
    };
    if let Some((rec, frag_copy, id)) = dup {
        stats.record_dup(rec.kind);
        if frag_copy {
            scan.with_load_mut(id, |cur| *cur = pkt.clone());
        }
        outcome.dup = Some(rec);
    }
    outcome
}

fn classify_pair(
    cur: &Frame,
    pkt: &Frame,
    cfg: &DupsConfig,
    stats: &Stats,
    suspicious: &mut Vec<DupRecord>,
) -> Step {
    if !cfg.window.within(pkt, cur) {
        return Step::OutOfWindow;
    }

    match same_data(cur.payload(), pkt.payload()) {
        SameData::Different => classify_fragment(cur, pkt, cfg),
        same => {
            let null_pay = matches!(same, SameData::Null);
            if cur.ethertype == pkt.ethertype {
                match compare_macs(cur, pkt) {
                    MacClass::Equal => {
                        if cfg.enabled[0] && comparator_switching(cur, pkt) {
                            return Step::Dup(build_record(cur, pkt, 0, null_pay), false);
                        }
                    }
                    MacClass::Differ if pkt.is_ipv4() => {
                        if let (Some(ci), Some(pi)) = (cur.ip, pkt.ip) {
                            if ci.identification == pi.identification && ci.protocol == pi.protocol
                            {
                                let comparators: [(usize, fn(&Frame, &Frame) -> bool); 3] = [
                                    (1, comparator_routing),
                                    (2, comparator_nat),
                                    (3, comparator_proxy),
                                ];
                                for (t, comparator) in comparators {
                                    if cfg.enabled[t] && comparator(cur, pkt) {
                                        return Step::Dup(
                                            build_record(cur, pkt, t as i8, null_pay),
                                            false,
                                        );
                                    }
                                }
                            }
                        }
                    }
                    _ => {}
                }
            }
            if matches!(same, SameData::Equal) {
                stats.record_suspicious();
                if cfg.suspicious {
                    suspicious.push(build_record(cur, pkt, -1, false));
                }
            }
            Step::Continue
        }
    }
}

fn classify_fragment(cur: &Frame, pkt: &Frame, cfg: &DupsConfig) -> Step {
    if !pkt.is_ipv4() || !cur.is_ipv4() {
        return Step::Continue;
    }
    let pi = match pkt.ip {
        Some(pi) if pi.is_fragment() => pi,
        _ => return Step::Continue,
    };

    let (data, frag, offset) = if pi.fragment_offset != 0 {
        (cur.ip_payload(), pkt.ip_payload(), pi.fragment_offset as usize)
    } else {
        (cur.payload(), pkt.payload(), 0usize)
    };
    if !fragment_in_data(data, frag, offset) {
        return Step::Continue;
    }
    if compare_macs(cur, pkt) != MacClass::Differ {
        return Step::Continue;
    }
    match cur.ip {
        Some(ci) if ci.identification == pi.identification => {}
        _ => return Step::Continue,
    }

    let comparators: [(usize, fn(&Frame, &Frame) -> bool); 2] = [
        (4, comparator_routing_frag),
        (5, comparator_nat_frag),
    ];
    for (t, comparator) in comparators {
        if cfg.enabled[t] && comparator(cur, pkt) {
            return Step::Dup(build_record(cur, pkt, t as i8, false), true);
        }
    }
    Step::Continue
}

fn search_fast(
    window: &Window<Frame>,
    new_id: NodeId,
    worker_id: usize,
    cfg: &DupsConfig,
    stats: &Stats,
) -> ScanOutcome {
    let scan = window.start_scan();
    let pkt = scan.with_load(new_id, |f| f.clone());
    if !pkt.is_ipv4() {
        return ScanOutcome::default();
    }

    let marker = window.marker(worker_id);
    let mut last = new_id;
    let mut node_id = scan.prev(new_id);
    let mut dup = None;

    while let Some(id) = node_id {
        if marker == Some(last) {
            break;
        }
        enum FastStep {
            OutOfWindow,
            Continue,
            Dup(DupRecord),
        }
        let step = scan.with_load(id, |cur| {
            if !cfg.window.within(&pkt, cur) {
                return FastStep::OutOfWindow;
            }
            if cur.is_ipv4() && comparator_fast(cur, &pkt) {
                let kind = if compare_macs(cur, &pkt) == MacClass::Equal {
                    0
                } else {
                    1
                };
                return FastStep::Dup(build_record(cur, &pkt, kind, false));
            }
            FastStep::Continue
        });
        match step {
            FastStep::OutOfWindow => break,
            FastStep::Dup(rec) => {
                dup = Some(rec);
                break;
            }
            FastStep::Continue => {
                last = id;
                node_id = scan.prev(id);
            }
        }
    }

    if dup.is_none() && node_id.is_some() && marker != Some(last) {
        scan.set_marker(window, last, worker_id);
    }
    if let Some(rec) = &dup {
        stats.record_dup(rec.kind);
    }
    ScanOutcome {
        dup,
        suspicious: Vec::new(),
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum SameData {
    Equal,
    Different,
    Null,
}

fn same_data(a: Option<&[u8]>, b: Option<&[u8]>) -> SameData {
    let len_a = a.map(<[u8]>::len).unwrap_or(0);
    let len_b = b.map(<[u8]>::len).unwrap_or(0);
    if len_a != len_b {
        return SameData::Different;
    }
    match (a, b) {
        (Some(x), Some(y)) => {
            if x == y {
                SameData::Equal
            } else {
                SameData::Different
            }
        }
        _ => SameData::Null,
    }
}

/// Whether `frag` appears inside `data` at `offset`. A missing buffer on
/// either side is treated as a match (nothing to contradict it with),
/// mirroring `fragmentInData`'s behavior on `NULL` pointers.
fn fragment_in_data(data: Option<&[u8]>, frag: Option<&[u8]>, offset: usize) -> bool {
    let size = data.map(<[u8]>::len).unwrap_or(0);
    let frag_size = frag.map(<[u8]>::len).unwrap_or(0);
    if size < offset + frag_size {
        return false;
    }
    if let (Some(d), Some(f)) = (data, frag) {
        if &d[offset..offset + frag_size] != f {
            return false;
        }
    }
    true
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum MacClass {
    Equal,
    Mixed,
    Differ,
}

fn mac_eq(a: Option<[u8; 6]>, b: Option<[u8; 6]>) -> bool {
    matches!((a, b), (Some(x), Some(y)) if x == y)
}

fn compare_macs(cur: &Frame, pkt: &Frame) -> MacClass {
    let src_eq = mac_eq(cur.src_mac, pkt.src_mac);
    let dst_eq = mac_eq(cur.dst_mac, pkt.dst_mac);
    match (src_eq, dst_eq) {
        (true, true) => MacClass::Equal,
        (false, false) => MacClass::Differ,
        _ => MacClass::Mixed,
    }
}

fn is_tcp_udp(protocol: u8) -> bool {
    protocol == IP_PROTO_TCP || protocol == IP_PROTO_UDP
}

/// Relation 0 (Switching): identical at every layer but the MACs, which
/// must match pairwise.
fn comparator_switching(cur: &Frame, pkt: &Frame) -> bool {
    let (ci, pi) = match (cur.ip, pkt.ip) {
        (Some(a), Some(b)) => (a, b),
        _ => return true,
    };
    if ci.identification != pi.identification || ci.protocol != pi.protocol {
        return false;
    }
    if is_tcp_udp(ci.protocol) {
        let (ct, pt) = match (cur.transport, pkt.transport) {
            (Some(a), Some(b)) => (a, b),
            _ => return false,
        };
        if ct.src_port != pt.src_port || ct.dst_port != pt.dst_port {
            return false;
        }
        if ci.protocol == IP_PROTO_TCP {
            if ci.total_length != pi.total_length {
                return false;
            }
            let (ctcp, ptcp) = match (ct.tcp, pt.tcp) {
                (Some(a), Some(b)) => (a, b),
                _ => return false,
            };
            if ctcp.checksum != ptcp.checksum
                || ctcp.seq != ptcp.seq
                || ctcp.ack != ptcp.ack
                || ctcp.window != ptcp.window
            {
                return false;
            }
        }
    }
    ci.src_addr == pi.src_addr
        && ci.dst_addr == pi.dst_addr
        && ci.ttl == pi.ttl
        && ci.fragment_offset == pi.fragment_offset
}

/// Relation 1 (Routing): same IP pair, ports and sequence state; MACs may
/// legitimately differ at each hop.
fn comparator_routing(cur: &Frame, pkt: &Frame) -> bool {
    let (ci, pi) = match (cur.ip, pkt.ip) {
        (Some(a), Some(b)) => (a, b),
        _ => return false,
    };
    if is_tcp_udp(ci.protocol) {
        let (ct, pt) = match (cur.transport, pkt.transport) {
            (Some(a), Some(b)) => (a, b),
            _ => return false,
        };
        if ct.src_port != pt.src_port || ct.dst_port != pt.dst_port {
            return false;
        }
        if ci.protocol == IP_PROTO_TCP {
            if ci.total_length != pi.total_length {
                return false;
            }
            let (ctcp, ptcp) = match (ct.tcp, pt.tcp) {
                (Some(a), Some(b)) => (a, b),
                _ => return false,
            };
            if ctcp.seq != ptcp.seq || ctcp.ack != ptcp.ack || ctcp.window != ptcp.window {
                return false;
            }
        }
    }
    ci.src_addr == pi.src_addr
        && ci.dst_addr == pi.dst_addr
        && ci.fragment_offset == pi.fragment_offset
}

/// Relation 2 (NAT Routing): exactly one side of the address/port pair
/// changes (the translated side); the other side, and the untranslated
/// port, stay put.
fn comparator_nat(cur: &Frame, pkt: &Frame) -> bool {
    let (ci, pi) = match (cur.ip, pkt.ip) {
        (Some(a), Some(b)) => (a, b),
        _ => return false,
    };
    if is_tcp_udp(ci.protocol) {
        let (ct, pt) = match (cur.transport, pkt.transport) {
            (Some(a), Some(b)) => (a, b),
            _ => return false,
        };
        let src_port_eq = ct.src_port == pt.src_port;
        let dst_port_eq = ct.dst_port == pt.dst_port;
        if src_port_eq == dst_port_eq {
            return false;
        }
        if (src_port_eq && ci.src_addr != pi.src_addr)
            || (dst_port_eq && ci.dst_addr != pi.dst_addr)
        {
            return false;
        }
        if ci.protocol == IP_PROTO_TCP {
            if ci.total_length != pi.total_length {
                return false;
            }
            let (ctcp, ptcp) = match (ct.tcp, pt.tcp) {
                (Some(a), Some(b)) => (a, b),
                _ => return false,
            };
            if ctcp.seq != ptcp.seq || ctcp.ack != ptcp.ack || ctcp.window != ptcp.window {
                return false;
            }
        }
    } else {
        let src_eq = ci.src_addr == pi.src_addr;
        let dst_eq = ci.dst_addr == pi.dst_addr;
        if src_eq == dst_eq {
            return false;
        }
    }
    ci.fragment_offset == pi.fragment_offset
}

/// Relation 3 (Proxying): ports stay put but exactly one IP address
/// differs. Preserved exactly as the original's `comparator_3`, whose IP
/// check is the same "exactly one side differs" shape as relation 2's —
/// see DESIGN.md for why this diverges from a naive "both addresses
/// differ" reading of the relation's name.
fn comparator_proxy(cur: &Frame, pkt: &Frame) -> bool {
    let (ci, pi) = match (cur.ip, pkt.ip) {
        (Some(a), Some(b)) => (a, b),
        _ => return false,
    };
    if is_tcp_udp(ci.protocol) {
        let (ct, pt) = match (cur.transport, pkt.transport) {
            (Some(a), Some(b)) => (a, b),
            _ => return false,
        };
        if ct.src_port != pt.src_port || ct.dst_port != pt.dst_port {
            return false;
        }
        if ci.protocol == IP_PROTO_TCP {
            if ci.total_length != pi.total_length {
                return false;
            }
            let (ctcp, ptcp) = match (ct.tcp, pt.tcp) {
                (Some(a), Some(b)) => (a, b),
                _ => return false,
            };
            if ctcp.seq != ptcp.seq && ctcp.ack != ptcp.ack {
                return false;
            }
            if ctcp.window != ptcp.window {
                return false;
            }
        }
    }
    let src_eq = ci.src_addr == pi.src_addr;
    let dst_eq = ci.dst_addr == pi.dst_addr;
    if src_eq == dst_eq {
        return false;
    }
    ci.fragment_offset == pi.fragment_offset
}

/// Relation 4 (Routing w/ fragmentation): as relation 1, but only the
/// newer packet's first fragment carries transport headers to compare, and
/// there is no offset check (offsets necessarily differ across fragments).
fn comparator_routing_frag(cur: &Frame, pkt: &Frame) -> bool {
    let (ci, pi) = match (cur.ip, pkt.ip) {
        (Some(a), Some(b)) => (a, b),
        _ => return false,
    };
    if is_tcp_udp(ci.protocol) && pi.is_first_fragment() {
        let (ct, pt) = match (cur.transport, pkt.transport) {
            (Some(a), Some(b)) => (a, b),
            _ => return false,
        };
        if ct.src_port != pt.src_port || ct.dst_port != pt.dst_port {
            return false;
        }
        if ci.protocol == IP_PROTO_TCP {
            if ci.total_length != pi.total_length {
                return false;
            }
            let (ctcp, ptcp) = match (ct.tcp, pt.tcp) {
                (Some(a), Some(b)) => (a, b),
                _ => return false,
            };
            if ctcp.seq != ptcp.seq || ctcp.ack != ptcp.ack || ctcp.window != ptcp.window {
                return false;
            }
        }
    }
    ci.src_addr == pi.src_addr && ci.dst_addr == pi.dst_addr
}

/// Relation 5 (NAT Routing w/ fragmentation): relation 2's NAT address/port
/// pattern, restricted to the newer packet's first fragment as in relation 4.
fn comparator_nat_frag(cur: &Frame, pkt: &Frame) -> bool {
    let (ci, pi) = match (cur.ip, pkt.ip) {
        (Some(a), Some(b)) => (a, b),
        _ => return false,
    };
    if is_tcp_udp(ci.protocol) && pi.is_first_fragment() {
        let (ct, pt) = match (cur.transport, pkt.transport) {
            (Some(a), Some(b)) => (a, b),
            _ => return false,
        };
        let src_port_eq = ct.src_port == pt.src_port;
        let dst_port_eq = ct.dst_port == pt.dst_port;
        if src_port_eq == dst_port_eq {
            return false;
        }
        if (src_port_eq && ci.src_addr != pi.src_addr)
            || (dst_port_eq && ci.dst_addr != pi.dst_addr)
        {
            return false;
        }
        if ci.protocol == IP_PROTO_TCP {
            if ci.total_length != pi.total_length {
                return false;
            }
            let (ctcp, ptcp) = match (ct.tcp, pt.tcp) {
                (Some(a), Some(b)) => (a, b),
                _ => return false,
            };
            if ctcp.seq != ptcp.seq || ctcp.ack != ptcp.ack || ctcp.window != ptcp.window {
                return false;
            }
        }
        true
    } else {
        let src_eq = ci.src_addr == pi.src_addr;
        let dst_eq = ci.dst_addr == pi.dst_addr;
        src_eq != dst_eq
    }
}

/// Single-relation IPv4-only fast comparator (`-F`): same IP 4-tuple plus
/// offset, and the first 20 captured payload bytes equal.
fn comparator_fast(cur: &Frame, pkt: &Frame) -> bool {
    let (ci, pi) = match (cur.ip, pkt.ip) {
        (Some(a), Some(b)) => (a, b),
        _ => return false,
    };
    if ci.identification != pi.identification
        || ci.total_length != pi.total_length
        || ci.src_addr != pi.src_addr
        || ci.dst_addr != pi.dst_addr
        || ci.protocol != pi.protocol
        || ci.fragment_offset != pi.fragment_offset
    {
        return false;
    }
    let cd = cur.payload().unwrap_or(&[]);
    let pd = pkt.payload().unwrap_or(&[]);
    let n = cd.len().min(pd.len()).min(20);
    cd[..n] == pd[..n]
}

fn build_record(cur: &Frame, pkt: &Frame, kind: i8, null_pay: bool) -> DupRecord {
    let (cur_ttl, pkt_ttl) = match (cur.ip, pkt.ip) {
        (Some(a), Some(b)) => (a.ttl as i32, b.ttl as i32),
        _ => (0, 0),
    };
    let dscp_changed = match (cur.ip, pkt.ip) {
        (Some(a), Some(b)) => a.dscp_ecn != b.dscp_ecn,
        _ => false,
    };
    DupRecord {
        dup_no: pkt.pos,
        diff_no: pkt.pos - cur.pos,
        kind,
        null_pay,
        vlan_changed: cur.vlan_id != pkt.vlan_id,
        dscp_changed,
        diff_ts: pkt.time - cur.time,
        diff_ttl: cur_ttl - pkt_ttl,
        newer_time: pkt.time,
        newer_ttl: pkt_ttl,
        newer_src_mac: pkt.src_mac,
        newer_dst_mac: pkt.dst_mac,
        newer_ip: pkt.ip.map(|h| (h.src_addr, h.dst_addr)),
        older_src_mac: cur.src_mac,
        older_dst_mac: cur.dst_mac,
        older_ip: cur.ip.map(|h| (h.src_addr, h.dst_addr)),
    }
}

fn mac_str(mac: Option<[u8; 6]>) -> String {
    match mac {
        Some(m) => format!(
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            m[0], m[1], m[2], m[3], m[4], m[5]
        ),
        None => "00:00:00:00:00:00".to_string(),
    }
}

fn ip_str(addr: u32) -> String {
    std::net::Ipv4Addr::from(addr).to_string()
}

/// Formats one record as `dups_fprintf` does: `dupNo diffNo type nullPay
/// vlanChange dscpChange diffTime diffTtl`, followed in extended mode by
/// the newer packet's timestamp/TTL/MACs/addresses and, for real duplicates,
/// the older packet's MACs (and, for relations `-1,2,3,5`, its addresses).
pub fn format(rec: &DupRecord, extended: bool) -> String {
    let mut s = format!(
        "{} {} {} {} {} {} {} {}",
        rec.dup_no,
        rec.diff_no,
        rec.kind,
        rec.null_pay as u8,
        rec.vlan_changed as u8,
        rec.dscp_changed as u8,
        rec.diff_ts,
        rec.diff_ttl,
    );
    if extended {
        write!(
            s,
            " {} {}",
            rec.newer_time - Timestamp::new(0, 0),
            rec.newer_ttl
        )
        .unwrap();
        write!(
            s,
            " {} > {}",
            mac_str(rec.newer_src_mac),
            mac_str(rec.newer_dst_mac)
        )
        .unwrap();
        if let Some((src, dst)) = rec.newer_ip {
            write!(s, " {} > {}", ip_str(src), ip_str(dst)).unwrap();
        }
        if rec.kind != 0 {
            write!(
                s,
                " | {} > {}",
                mac_str(rec.older_src_mac),
                mac_str(rec.older_dst_mac)
            )
            .unwrap();
            if matches!(rec.kind, -1 | 2 | 3 | 5) {
                if let Some((src, dst)) = rec.older_ip {
                    write!(s, " {} > {}", ip_str(src), ip_str(dst)).unwrap();
                }
            }
        }
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::{BigEndian, ByteOrder};

    fn udp_frame(
        pos: u64,
        secs: i64,
        src_mac: [u8; 6],
        dst_mac: [u8; 6],
        src_ip: [u8; 4],
        dst_ip: [u8; 4],
        ident: u16,
        payload: &[u8],
    ) -> Frame {
        let mut buf = vec![0u8; 14];
        buf[0..6].copy_from_slice(&dst_mac);
        buf[6..12].copy_from_slice(&src_mac);
        BigEndian::write_u16(&mut buf[12..14], 0x0800);

        let mut ip = vec![0u8; 20];
        ip[0] = 0x45;
        let udp_len = 8 + payload.len();
        BigEndian::write_u16(&mut ip[2..4], (20 + udp_len) as u16);
        BigEndian::write_u16(&mut ip[4..6], ident);
        ip[8] = 64;
        ip[9] = IP_PROTO_UDP;
        ip[12..16].copy_from_slice(&src_ip);
        ip[16..20].copy_from_slice(&dst_ip);

        let mut udp = vec![0u8; 8];
        BigEndian::write_u16(&mut udp[0..2], 1111);
        BigEndian::write_u16(&mut udp[2..4], 2222);

        buf.extend_from_slice(&ip);
        buf.extend_from_slice(&udp);
        buf.extend_from_slice(payload);
        Frame::parse(pos, Timestamp::new(secs, 0), &buf, buf.len() as u32, 5000, false)
    }

    #[test]
    fn identical_packet_is_switching_duplicate() {
        let window: Window<Frame> = Window::new(0, 0);
        let stats = Stats::new();
        let cfg = DupsConfig::default();

        let mac_a = [1, 2, 3, 4, 5, 6];
        let mac_b = [6, 5, 4, 3, 2, 1];
        let f0 = udp_frame(0, 0, mac_a, mac_b, [10, 0, 0, 1], [10, 0, 0, 2], 7, b"hello");
        let f1 = udp_frame(1, 0, mac_a, mac_b, [10, 0, 0, 1], [10, 0, 0, 2], 7, b"hello");

        let id0 = window.push(f0);
        let _ = search(&window, id0, 0, &cfg, &stats);
        let id1 = window.push(f1);
        let outcome = search(&window, id1, 0, &cfg, &stats);

        let rec = outcome.dup.expect("expected a duplicate");
        assert_eq!(rec.kind, 0);
        assert_eq!(rec.diff_no, 1);
    }

    #[test]
    fn different_macs_same_addresses_is_routing_duplicate() {
        let window: Window<Frame> = Window::new(0, 0);
        let stats = Stats::new();
        let cfg = DupsConfig::default();

        let f0 = udp_frame(
            0,
            0,
            [1, 1, 1, 1, 1, 1],
            [2, 2, 2, 2, 2, 2],
            [10, 0, 0, 1],
            [10, 0, 0, 2],
            7,
            b"hello",
        );
        let f1 = udp_frame(
            1,
            0,
            [3, 3, 3, 3, 3, 3],
            [4, 4, 4, 4, 4, 4],
            [10, 0, 0, 1],
            [10, 0, 0, 2],
            7,
            b"hello",
        );

        let id0 = window.push(f0);
        let _ = search(&window, id0, 0, &cfg, &stats);
        let id1 = window.push(f1);
        let outcome = search(&window, id1, 0, &cfg, &stats);

        assert_eq!(outcome.dup.unwrap().kind, 1);
    }

    #[test]
    fn disabled_relation_is_not_reported() {
        let window: Window<Frame> = Window::new(0, 0);
        let stats = Stats::new();
        let mut cfg = DupsConfig::default();
        cfg.enabled[0] = false;

        let mac_a = [1, 2, 3, 4, 5, 6];
        let mac_b = [6, 5, 4, 3, 2, 1];
        let f0 = udp_frame(0, 0, mac_a, mac_b, [10, 0, 0, 1], [10, 0, 0, 2], 7, b"hello");
        let f1 = udp_frame(1, 0, mac_a, mac_b, [10, 0, 0, 1], [10, 0, 0, 2], 7, b"hello");

        let id0 = window.push(f0);
        let _ = search(&window, id0, 0, &cfg, &stats);
        let id1 = window.push(f1);
        let outcome = search(&window, id1, 0, &cfg, &stats);
        assert!(outcome.dup.is_none());
    }

    #[test]
    fn different_payload_is_not_a_duplicate() {
        let window: Window<Frame> = Window::new(0, 0);
        let stats = Stats::new();
        let cfg = DupsConfig::default();

        let mac_a = [1, 2, 3, 4, 5, 6];
        let mac_b = [6, 5, 4, 3, 2, 1];
        let f0 = udp_frame(0, 0, mac_a, mac_b, [10, 0, 0, 1], [10, 0, 0, 2], 7, b"hello");
        let f1 = udp_frame(1, 0, mac_a, mac_b, [10, 0, 0, 1], [10, 0, 0, 2], 9, b"world");

        let id0 = window.push(f0);
        let _ = search(&window, id0, 0, &cfg, &stats);
        let id1 = window.push(f1);
        let outcome = search(&window, id1, 0, &cfg, &stats);
        assert!(outcome.dup.is_none());
    }

    #[test]
    fn outside_time_window_is_not_scanned() {
        let window: Window<Frame> = Window::new(0, 0);
        let stats = Stats::new();
        let cfg = DupsConfig {
            window: WindowLimit::Time(0.05),
            ..DupsConfig::default()
        };

        let mac_a = [1, 2, 3, 4, 5, 6];
        let mac_b = [6, 5, 4, 3, 2, 1];
        let f0 = udp_frame(0, 0, mac_a, mac_b, [10, 0, 0, 1], [10, 0, 0, 2], 7, b"hello");
        let f1 = udp_frame(1, 1, mac_a, mac_b, [10, 0, 0, 1], [10, 0, 0, 2], 7, b"hello");

        let id0 = window.push(f0);
        let _ = search(&window, id0, 0, &cfg, &stats);
        let id1 = window.push(f1);
        let outcome = search(&window, id1, 0, &cfg, &stats);
        assert!(outcome.dup.is_none());
    }

    #[test]
    fn suspicious_candidate_reported_only_when_enabled() {
        let window: Window<Frame> = Window::new(0, 0);
        let stats = Stats::new();
        let mut cfg = DupsConfig::default();
        cfg.suspicious = true;
        cfg.enabled = [false; 6];

        let mac_a = [1, 2, 3, 4, 5, 6];
        let mac_b = [6, 5, 4, 3, 2, 1];
        let f0 = udp_frame(0, 0, mac_a, mac_b, [10, 0, 0, 1], [10, 0, 0, 2], 7, b"hello");
        let f1 = udp_frame(1, 0, mac_a, mac_b, [10, 0, 0, 1], [10, 0, 0, 2], 7, b"hello");

        let id0 = window.push(f0);
        let _ = search(&window, id0, 0, &cfg, &stats);
        let id1 = window.push(f1);
        let outcome = search(&window, id1, 0, &cfg, &stats);
        assert!(outcome.dup.is_none());
        assert_eq!(outcome.suspicious.len(), 1);
        assert_eq!(outcome.suspicious[0].kind, -1);
        assert_eq!(stats.num_suspicious(), 1);
    }

    #[test]
    fn format_basic_mode_matches_field_order() {
        let rec = DupRecord {
            dup_no: 5,
            diff_no: 2,
            kind: 1,
            null_pay: false,
            vlan_changed: false,
            dscp_changed: true,
            diff_ts: Timestamp::from_micros(1, 50_000) - Timestamp::from_micros(1, 0),
            diff_ttl: 3,
            newer_time: Timestamp::new(0, 0),
            newer_ttl: 0,
            newer_src_mac: None,
            newer_dst_mac: None,
            newer_ip: None,
            older_src_mac: None,
            older_dst_mac: None,
            older_ip: None,
        };
        assert_eq!(format(&rec, false), "5 2 1 0 0 1 0.050000000 3");
    }
}
