//! Identifies and marks duplicate packets in PCAP files.
//!
//! Grounded on `infodups/infodups.c`'s `main`/`update`: open the trace,
//! dissect each frame, append it to the shared window, hand the new node to
//! a worker (or classify it inline with no threads), mux any output that's
//! ready, trim the window, stall while it's full, and print the final
//! statistics block on exit.

use std::io::{BufWriter, Write};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use duptrace::dissect::{Frame, DEFAULT_FRAME_CAP};
use duptrace::dups::{self, DupsConfig, WindowLimit};
use duptrace::progress::Progress;
use duptrace::stats::Stats;
use duptrace::time::Timestamp;
use duptrace::window::Window;
use duptrace::worker::{WorkerPool, MAX_WORKERS, MIN_WORKERS};

const RELATION_NAMES: [&str; 6] = [
    "switching",
    "routing",
    "NAT routing",
    "proxying",
    "routing w/ fragmentation",
    "NAT routing w/ fragmentation",
];

/// Identifies and marks duplicate packets in PCAP files.
#[derive(Parser, Debug)]
#[command(name = "infodups", version, about)]
struct Args {
    /// PCAP file to read
    #[arg(short = 'i', long = "input")]
    input: String,

    /// Show progress on stderr
    #[arg(short = 'v', long = "progress")]
    progress: bool,

    /// Show extended per-record output
    #[arg(short = 'x', long = "extended")]
    extended: bool,

    /// Also print suspicious (same-payload, unmatched) candidates
    #[arg(short = 's', long = "suspicious")]
    suspicious: bool,

    /// Log the window's node count after every packet
    #[arg(short = 'b', long = "debug")]
    debug: bool,

    /// IPv4-only fast-path comparator
    #[arg(short = 'F', long = "fast")]
    fast: bool,

    /// Disable relation 0 (switching)
    #[arg(short = '0')]
    disable_0: bool,
    /// Disable relation 1 (routing)
    #[arg(short = '1')]
    disable_1: bool,
    /// Disable relation 2 (NAT routing)
    #[arg(short = '2')]
    disable_2: bool,
    /// Disable relation 3 (proxying)
    #[arg(short = '3')]
    disable_3: bool,
    /// Disable relation 4 (routing w/ fragmentation)
    #[arg(short = '4')]
    disable_4: bool,
    /// Disable relation 5 (NAT routing w/ fragmentation)
    #[arg(short = '5')]
    disable_5: bool,

    /// Window length in seconds (default: 0.1)
    #[arg(short = 't', long = "time-window", conflicts_with = "positions")]
    time_window: Option<f64>,

    /// Window length in packet positions
    #[arg(short = 'n', long = "position-window")]
    positions: Option<u64>,

    /// Number of worker threads [2-64] (default: single-threaded)
    #[arg(short = 'T', long = "threads")]
    threads: Option<usize>,

    /// Memory budget (GB) bounding the window
    #[arg(short = 'M', long = "memory", default_value_t = 2.0)]
    memory_gb: f64,
}

fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    if let Some(t) = args.threads {
        if !(MIN_WORKERS..=MAX_WORKERS).contains(&t) {
            bail!("thread count must be between {} and {}", MIN_WORKERS, MAX_WORKERS);
        }
    }

    let mut enabled = [true; 6];
    for (i, disabled) in [
        args.disable_0,
        args.disable_1,
        args.disable_2,
        args.disable_3,
        args.disable_4,
        args.disable_5,
    ]
    .into_iter()
    .enumerate()
    {
        enabled[i] = !disabled;
    }

    let window_limit = match args.positions {
        Some(n) => WindowLimit::Positions(n),
        None => WindowLimit::Time(args.time_window.unwrap_or(0.1)),
    };

    let cfg = Arc::new(DupsConfig {
        enabled,
        fast: args.fast,
        window: window_limit,
        extended: args.extended,
        suspicious: args.suspicious,
    });

    let max_count =
        ((args.memory_gb * 1_000_000_000.0) / (DEFAULT_FRAME_CAP as f64 + 100.0)) as u64;
    let workers = args.threads.unwrap_or(0);
    let window = Arc::new(Window::<Frame>::new(workers, max_count));
    let stats = Arc::new(Stats::new());

    let mut capture = pcap::Capture::from_file(&args.input)
        .with_context(|| format!("cannot open trace file {}", args.input))?;

    let file_size = std::fs::metadata(&args.input).map(|m| m.len()).unwrap_or(0);
    let mut progress = args.progress.then(|| Progress::new(file_size));
    let mut bytes_read: u64 = 0;

    let stdout = std::io::stdout();
    let mut out = BufWriter::new(stdout.lock());

    let mut pool = if workers >= MIN_WORKERS {
        Some(WorkerPool::new(
            workers,
            Arc::clone(&window),
            Arc::clone(&cfg),
            Arc::clone(&stats),
        ))
    } else {
        None
    };

    let mut pos: u64 = 0;
    loop {
        let packet = match capture.next_packet() {
            Ok(p) => p,
            Err(pcap::Error::NoMorePackets) => break,
            Err(e) => return Err(e).context("error reading pcap file"),
        };

        pos += 1;
        let time = Timestamp::from_micros(packet.header.ts.tv_sec as i64, packet.header.ts.tv_usec as u32);
        let frame = Frame::parse(pos, time, packet.data, packet.header.len, DEFAULT_FRAME_CAP, cfg.fast);
        stats.record_packet(&frame);

        let id = window.push(frame);

        if let Some(pool) = pool.as_mut() {
            pool.dispatch(id);
        } else {
            let outcome = dups::search(&window, id, 0, &cfg, &stats);
            if let Some(task) = dups::outcome_to_task(outcome, &cfg) {
                for line in task.lines {
                    writeln!(out, "{}", line)?;
                }
            }
        }

        if let Some(pool) = pool.as_mut() {
            pool.mux(&mut out)?;
        }

        if args.debug {
            tracing::debug!(pos, count = window.count(), "window state");
        }

        window.trim();
        while window.is_full() {
            if let Some(pool) = pool.as_mut() {
                pool.mux(&mut out)?;
            }
            thread::sleep(Duration::from_millis(50));
            window.trim();
        }

        if let Some(progress) = progress.as_mut() {
            bytes_read += 16 + packet.header.caplen as u64;
            progress.tick(bytes_read);
        }
    }

    if let Some(pool) = pool {
        pool.shutdown(&mut out)?;
    }
    out.flush()?;

    print_stats(&stats);
    Ok(())
}

/// Mirrors `print_stats()`'s final stderr block.
fn print_stats(stats: &Stats) {
    eprintln!();
    eprintln!("----------- statistics -----------");
    eprintln!(
        "{} packets ({} IP, {} TCP, {} UDP, {} errors), {:.6} seconds elapsed",
        stats.num_pkts(),
        stats.num_ip(),
        stats.num_tcp(),
        stats.num_udp(),
        stats.num_errors(),
        stats.elapsed_secs(),
    );
    for (i, name) in RELATION_NAMES.iter().enumerate() {
        eprintln!("{:10} duplicates of type {} ({})", stats.num_dup(i), i, name);
    }
    eprintln!("{:10} duplicates of type -1 (suspicious)", stats.num_suspicious());
}
