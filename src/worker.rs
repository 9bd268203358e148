//! Fixed-size worker pool that runs the duplicate classifier off the ingest
//! thread, plus the ordered multiplexer that serializes results back into
//! strictly-increasing packet-position order.
//!
//! Grounded on `infodups/worker.c`. `job_t`'s pipe-based per-worker task
//! queue becomes a `crossbeam_channel`; `worker_mux`'s `POLLHUP`-driven
//! shutdown becomes ordinary channel disconnection once the ingest thread
//! drops every task sender.

use std::io::{self, Write};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TryRecvError};

use crate::dissect::Frame;
use crate::dups::{self, DupsConfig, Task};
use crate::stats::Stats;
use crate::window::{NodeId, Window};

pub const MIN_WORKERS: usize = 2;
pub const MAX_WORKERS: usize = 64;

/// N worker threads each running [`dups::search`] on tasks handed to them
/// round-robin, with one output channel per worker feeding the multiplexer.
pub struct WorkerPool {
    task_senders: Vec<Sender<NodeId>>,
    output_receivers: Vec<Receiver<Task>>,
    pending: Vec<Option<Task>>,
    handles: Vec<JoinHandle<()>>,
    next: usize,
}

impl WorkerPool {
    /// `n` must be in `2..=64`, the accepted `-T` thread-count range.
    pub fn new(
        n: usize,
        window: Arc<Window<Frame>>,
        cfg: Arc<DupsConfig>,
        stats: Arc<Stats>,
    ) -> WorkerPool {
        assert!(
            (MIN_WORKERS..=MAX_WORKERS).contains(&n),
            "worker count must be between {} and {}",
            MIN_WORKERS,
            MAX_WORKERS
        );

        let mut task_senders = Vec::with_capacity(n);
        let mut output_receivers = Vec::with_capacity(n);
        let mut handles = Vec::with_capacity(n);

        for worker_id in 0..n {
            let (task_tx, task_rx) = crossbeam_channel::unbounded::<NodeId>();
            let (out_tx, out_rx) = crossbeam_channel::unbounded::<Task>();
            let window = Arc::clone(&window);
            let cfg = Arc::clone(&cfg);
            let stats = Arc::clone(&stats);

            let handle = thread::Builder::new()
                .name(format!("duptrace-worker-{}", worker_id))
                .spawn(move || {
                    for node_id in task_rx.iter() {
                        let outcome = dups::search(&window, node_id, worker_id, &cfg, &stats);
                        if let Some(task) = dups::outcome_to_task(outcome, &cfg) {
                            if out_tx.send(task).is_err() {
                                break;
                            }
                        }
                    }
                })
                .expect("failed to spawn worker thread");

            task_senders.push(task_tx);
            output_receivers.push(out_rx);
            handles.push(handle);
        }

        WorkerPool {
            task_senders,
            output_receivers,
            pending: (0..n).map(|_| None).collect(),
            handles,
            next: 0,
        }
    }

    pub fn worker_count(&self) -> usize {
        self.task_senders.len()
    }

    /// Hands `node_id` to the next worker in round-robin order
    /// (`worker_add_task`).
    pub fn dispatch(&mut self, node_id: NodeId) {
        let n = self.task_senders.len();
        let _ = self.task_senders[self.next].send(node_id);
        self.next = (self.next + 1) % n;
    }

    /// One non-blocking multiplex pass (`worker_mux(pool, 0)`): tops up
    /// every empty slot with whatever is immediately available, then
    /// repeatedly emits the globally-smallest pending `pos` until no slot
    /// can be topped up any further. Never blocks.
    pub fn mux(&mut self, out: &mut impl Write) -> io::Result<()> {
        loop {
            for (slot, rx) in self.pending.iter_mut().zip(&self.output_receivers) {
                if slot.is_none() {
                    if let Ok(task) = rx.try_recv() {
                        *slot = Some(task);
                    }
                }
            }
            match Self::take_min(&mut self.pending) {
                Some(task) => Self::emit(out, task)?,
                None => return Ok(()),
            }
        }
    }

    /// Drops every task sender (signalling EOF to all workers), then drains
    /// every output channel until each is both empty and disconnected, and
    /// joins all worker threads. Mirrors `worker_destroy`'s final
    /// `worker_mux(pool, 1)` drain pass.
    pub fn shutdown(mut self, out: &mut impl Write) -> io::Result<()> {
        self.task_senders.clear();
        loop {
            let mut waiting_on_live_channel = false;
            for (slot, rx) in self.pending.iter_mut().zip(&self.output_receivers) {
                if slot.is_some() {
                    continue;
                }
                match rx.try_recv() {
                    Ok(task) => *slot = Some(task),
                    Err(TryRecvError::Empty) => waiting_on_live_channel = true,
                    Err(TryRecvError::Disconnected) => {}
                }
            }
            match Self::take_min(&mut self.pending) {
                Some(task) => {
                    Self::emit(out, task)?;
                }
                None => {
                    if !waiting_on_live_channel {
                        break;
                    }
                    thread::sleep(Duration::from_micros(200));
                }
            }
        }
        for handle in self.handles {
            let _ = handle.join();
        }
        Ok(())
    }

    fn take_min(pending: &mut [Option<Task>]) -> Option<Task> {
        let min_idx = pending
            .iter()
            .enumerate()
            .filter_map(|(i, t)| t.as_ref().map(|t| (i, t.pos)))
            .min_by_key(|&(_, pos)| pos)
            .map(|(i, _)| i)?;
        pending[min_idx].take()
    }

    fn emit(out: &mut impl Write, task: Task) -> io::Result<()> {
        for line in task.lines {
            writeln!(out, "{}", line)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dups::WindowLimit;
    use crate::time::Timestamp;
    use byteorder::{BigEndian, ByteOrder};

    fn udp_frame(pos: u64, secs: i64, payload: &[u8]) -> Frame {
        let mut buf = vec![0u8; 14];
        BigEndian::write_u16(&mut buf[12..14], 0x0800);
        let mut ip = vec![0u8; 20];
        ip[0] = 0x45;
        let udp_len = 8 + payload.len();
        BigEndian::write_u16(&mut ip[2..4], (20 + udp_len) as u16);
        ip[9] = 17;
        ip[12..16].copy_from_slice(&[10, 0, 0, 1]);
        ip[16..20].copy_from_slice(&[10, 0, 0, 2]);
        let udp = vec![0u8; 8];
        buf.extend_from_slice(&ip);
        buf.extend_from_slice(&udp);
        buf.extend_from_slice(payload);
        Frame::parse(pos, Timestamp::new(secs, 0), &buf, buf.len() as u32, 5000, false)
    }

    #[test]
    fn duplicate_pair_round_trips_through_pool_in_order() {
        let window = Arc::new(Window::<Frame>::new(2, 0));
        let cfg = Arc::new(DupsConfig {
            window: WindowLimit::Time(10.0),
            ..DupsConfig::default()
        });
        let stats = Arc::new(Stats::new());
        let mut pool = WorkerPool::new(2, Arc::clone(&window), Arc::clone(&cfg), Arc::clone(&stats));

        let mut out = Vec::new();
        for (pos, bytes) in [(0u64, &b"abc"[..]), (1, b"abc"), (2, b"different")] {
            let id = window.push(udp_frame(pos, 0, bytes));
            pool.dispatch(id);
            pool.mux(&mut out).unwrap();
        }
        pool.shutdown(&mut out).unwrap();

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("1 1 0"));
    }

    #[test]
    fn worker_count_out_of_range_panics() {
        let window = Arc::new(Window::<Frame>::new(1, 0));
        let cfg = Arc::new(DupsConfig::default());
        let stats = Arc::new(Stats::new());
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            WorkerPool::new(1, window, cfg, stats);
        }));
        assert!(result.is_err());
    }
}
