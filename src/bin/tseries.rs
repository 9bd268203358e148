//! Computes multiple time series, one per input filter, from PCAP files.
//!
//! Grounded on `tseries/tseries.c` and `tseries/series.c`: load either BPF
//! or NETS-mode filters from a text file, walk the trace once, and for
//! every packet that matches a filter add its length to that filter's
//! current time bucket, flushing completed buckets (zero-filled across
//! gaps, unless suppressed) as they close.

use std::io::{self, BufWriter, Write};

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use duptrace::dissect::{eth, ip};
use duptrace::progress::Progress;
use duptrace::series::{self, Bucketizer, Point};
use duptrace::trie::GridOfTries;

/// Computes multiple time series, one per input filter, from PCAP files.
#[derive(Parser, Debug)]
#[command(name = "tseries", version, about)]
struct Args {
    /// PCAP file to read
    #[arg(short = 'i', long = "input")]
    input: String,

    /// Text file with one filter per line (BPF expressions, or NETS
    /// quadruples with `-N`)
    #[arg(short = 'f', long = "filters")]
    filters: String,

    /// Show progress on stderr
    #[arg(short = 'v', long = "progress")]
    progress: bool,

    /// BPF pre-filter applied before any per-series matching
    #[arg(short = 'p', long = "prefilter")]
    prefilter: Option<String>,

    /// Bucket length in milliseconds
    #[arg(short = 'n', long = "bucket-ms", default_value_t = 1000)]
    bucket_ms: i64,

    /// Do not emit zero-filled gap buckets
    #[arg(short = 'z', long = "suppress-zero")]
    suppress_zero: bool,

    /// Reference timestamp (ms); default is the first packet's timestamp
    #[arg(short = 't', long = "reference-ts")]
    reference_ms: Option<i64>,

    /// [BPF mode] break at first matching filter per packet
    #[arg(short = 'x', long = "break-at-first")]
    break_at_first: bool,

    /// [BPF mode] snapshot length used when compiling filters
    #[arg(short = 's', long = "snaplen", default_value_t = 65535)]
    snaplen: i32,

    /// Activate NETS mode: each filter line is `srcNet srcMask dstNet dstMask`
    #[arg(short = 'N', long = "nets")]
    nets_mode: bool,
}

enum Backend {
    Nets(GridOfTries),
    Bpf(Vec<pcap::BpfProgram>),
}

fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let contents = std::fs::read_to_string(&args.filters)
        .with_context(|| format!("error opening filter file {}", args.filters))?;

    let (backend, filter_count) = load_filters(&args, &contents)?;
    if filter_count == 0 {
        bail!("no usable filters loaded from {}", args.filters);
    }

    let mut capture = pcap::Capture::from_file(&args.input)
        .with_context(|| format!("cannot open trace file {}", args.input))?;

    // Compiled the same way as the per-series BPF filters below, since our
    // capture handle only ever reads a file and never a live interface:
    // there is no `pcap_setfilter` to install this on, so it's applied as a
    // direct `BpfProgram::filter` call over each frame instead.
    let prefilter = args
        .prefilter
        .as_deref()
        .map(|expr| -> Result<pcap::BpfProgram> {
            let dead = pcap::Capture::dead(pcap::Linktype::ETHERNET)
                .context("failed to create a dead capture for prefilter compilation")?;
            dead.compile(expr, true)
                .with_context(|| format!("couldn't compile prefilter {}", expr))
        })
        .transpose()?;

    let file_size = std::fs::metadata(&args.input).map(|m| m.len()).unwrap_or(0);
    let mut progress = args.progress.then(|| Progress::new(file_size));
    let mut bytes_read: u64 = 0;

    let stdout = std::io::stdout();
    let mut out = BufWriter::new(stdout.lock());

    let mut reference_ms = args.reference_ms;
    let mut bucketizer: Option<Bucketizer> = reference_ms
        .map(|r| Bucketizer::new(filter_count, args.bucket_ms, r, !args.suppress_zero));

    loop {
        let packet = match capture.next_packet() {
            Ok(p) => p,
            Err(pcap::Error::NoMorePackets) => break,
            Err(e) => return Err(e).context("error reading pcap file"),
        };

        if let Some(program) = &prefilter {
            if !program.filter(packet.data) {
                if let Some(progress) = progress.as_mut() {
                    bytes_read += 16 + packet.header.caplen as u64;
                    progress.tick(bytes_read);
                }
                continue;
            }
        }

        let pkt_ms = packet.header.ts.tv_sec as i64 * 1000 + packet.header.ts.tv_usec as i64 / 1000;
        if reference_ms.is_none() {
            reference_ms = Some(pkt_ms);
            bucketizer = Some(Bucketizer::new(
                filter_count,
                args.bucket_ms,
                pkt_ms,
                !args.suppress_zero,
            ));
        }
        let bucketizer = bucketizer.as_mut().expect("seeded above");

        // The original counts the 4-byte Ethernet FCS, stripped by capture,
        // back into each packet's reported length.
        let len = packet.header.len as u64 + 4;

        match &backend {
            Backend::Nets(trie) => {
                if let Some((src, dst)) = extract_ips(packet.data) {
                    let mut points = Vec::new();
                    trie.lookup(src, dst, |id| {
                        points.extend(bucketizer.record(id as usize, pkt_ms, len));
                    });
                    for point in points {
                        emit(&mut out, point)?;
                    }
                }
            }
            Backend::Bpf(programs) => {
                for (id, program) in programs.iter().enumerate() {
                    if program.filter(packet.data) {
                        for point in bucketizer.record(id, pkt_ms, len) {
                            emit(&mut out, point)?;
                        }
                        if args.break_at_first {
                            break;
                        }
                    }
                }
            }
        }

        if let Some(progress) = progress.as_mut() {
            bytes_read += 16 + packet.header.caplen as u64;
            progress.tick(bytes_read);
        }
    }

    if let Some(bucketizer) = bucketizer.as_mut() {
        for point in bucketizer.finish() {
            emit(&mut out, point)?;
        }
    }
    out.flush()?;
    Ok(())
}

/// Loads either NETS quadruples (into a [`GridOfTries`]) or BPF expressions
/// (each compiled against a dead capture, the safe-Rust analogue of
/// `pcap_compile_nopcap`) from the filter file, skipping unparsable lines
/// with a warning rather than failing the whole run.
fn load_filters(args: &Args, contents: &str) -> Result<(Backend, usize)> {
    let mut filter_count = 0usize;
    if args.nets_mode {
        let mut filters = Vec::new();
        for (i, line) in series::filter_lines(contents).enumerate() {
            // The filter id must be a dense index over *parsed* filters,
            // not the line number: the Bucketizer is sized to filter_count,
            // and a skipped line would otherwise leave later ids pointing
            // past the end of its bucket vector.
            match series::parse_nets_line(line, filter_count as u32) {
                Some(f) => {
                    filters.push(f);
                    filter_count += 1;
                    eprintln!("Filter {} processed: {}", i, line);
                }
                None => tracing::warn!(line, "could not parse NETS filter line, skipping"),
            }
        }
        Ok((Backend::Nets(GridOfTries::build(filters)), filter_count))
    } else {
        let dead = pcap::Capture::dead(pcap::Linktype::ETHERNET)
            .context("failed to create a dead capture for BPF compilation")?;
        let mut programs = Vec::new();
        for (i, line) in series::filter_lines(contents).enumerate() {
            match dead.compile(line, true) {
                Ok(program) => {
                    programs.push(program);
                    filter_count += 1;
                    eprintln!("Filter {} processed: {}", i, line);
                }
                Err(e) => tracing::warn!(line, error = %e, "could not compile BPF filter, skipping"),
            }
        }
        let _ = args.snaplen;
        Ok((Backend::Bpf(programs), filter_count))
    }
}

/// Extracts `(srcIP, dstIP)` from a raw Ethernet frame, or `None` for
/// non-IPv4 or too-short frames. Grounded on `series_unpack_addresses`: a
/// narrower dissection than [`duptrace::dissect::Frame::parse`], since the
/// grid-of-tries matcher needs only the addresses.
fn extract_ips(bytes: &[u8]) -> Option<(u32, u32)> {
    let frame_type = eth::detect(bytes);
    if eth::ethertype(bytes, frame_type) != eth::ETH_PROTO_IPV4 {
        return None;
    }
    let header_len = eth::header_len(frame_type)?;
    if bytes.len() <= header_len {
        return None;
    }
    let header = ip::parse(&bytes[header_len..])?;
    Some((header.src_addr, header.dst_addr))
}

fn emit(out: &mut impl Write, point: Point) -> io::Result<()> {
    writeln!(out, "{} {} {} {}", point.filter_id, point.start_ms, point.bytes, point.packets)
}
