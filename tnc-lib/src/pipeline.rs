//! Receive-side thread wiring: samples in on the caller's thread, a
//! worker grinding bad-FCS buffers in the background, decoded frames out
//! through a channel.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, mpsc};
use std::thread::JoinHandle;

use log::{debug, warn};

use ax25::packet::Packet;

use crate::config::ModemConfig;
use crate::fixbits::{self, RetryLevel, SanityMode};
use crate::modem::{Multimodem, Voter};
use crate::rrbb::Rrbb;

/// Queue depth where we start complaining. The retry worker can fall far
/// behind on noisy audio with an expensive fix-bits level.
const RETRY_WARN_DEPTH: usize = 64;

/// Bad-FCS buffers waiting for the repair worker.
pub struct RetryQueue {
    inner: Mutex<RetryInner>,
    cond: Condvar,
}

struct RetryInner {
    q: VecDeque<Rrbb>,
    closed: bool,
}

impl RetryQueue {
    pub fn new() -> RetryQueue {
        RetryQueue {
            inner: Mutex::new(RetryInner {
                q: VecDeque::new(),
                closed: false,
            }),
            cond: Condvar::new(),
        }
    }

    pub fn push(&self, rrbb: Rrbb) {
        let mut inner = self.inner.lock().unwrap();
        if inner.q.len() == RETRY_WARN_DEPTH {
            warn!("retry queue has fallen {RETRY_WARN_DEPTH} frames behind");
        }
        inner.q.push_back(rrbb);
        drop(inner);
        self.cond.notify_one();
    }

    /// Block for the next buffer; None when closed and drained.
    pub fn pop_wait(&self) -> Option<Rrbb> {
        let mut inner = self.inner.lock().unwrap();
        loop {
            if let Some(rrbb) = inner.q.pop_front() {
                return Some(rrbb);
            }
            if inner.closed {
                return None;
            }
            inner = self.cond.wait(inner).unwrap();
        }
    }

    pub fn close(&self) {
        self.inner.lock().unwrap().closed = true;
        self.cond.notify_all();
    }
}

impl Default for RetryQueue {
    fn default() -> Self {
        RetryQueue::new()
    }
}

/// One frame out of the receive pipeline.
pub struct DecodedFrame {
    pub packet: Packet,
    pub chan: usize,
    pub subchan: usize,
    pub slice: usize,
    /// Bits flipped by the repair pass; 0 for a clean decode.
    pub flips: usize,
    /// FCS never matched; delivered only in passall operation.
    pub suspect: bool,
}

/// Receive behaviour knobs.
#[derive(Debug, Clone, Copy)]
pub struct RxConfig {
    pub retry: RetryLevel,
    pub sanity: SanityMode,
    /// Deliver bad-FCS frames flagged as suspect instead of dropping.
    pub passall: bool,
}

impl Default for RxConfig {
    fn default() -> RxConfig {
        RxConfig {
            retry: RetryLevel::None,
            sanity: SanityMode::Aprs,
            passall: false,
        }
    }
}

/// The receive pipeline for a set of channels. Feed samples on one thread
/// per channel (or one thread for all, samples are cheap to route); a
/// shared worker repairs bad frames; decoded frames arrive on the mpsc
/// receiver returned by [`RxPipeline::new`].
pub struct RxPipeline {
    modems: Vec<Multimodem>,
    voters: Arc<Mutex<Vec<Voter>>>,
    retry_queue: Arc<RetryQueue>,
    worker: Option<JoinHandle<()>>,
    out: mpsc::Sender<DecodedFrame>,
    rx_config: RxConfig,
    dcd_flags: Arc<Vec<AtomicBool>>,
    scratch: Vec<Rrbb>,
}

impl RxPipeline {
    pub fn new(
        modem_configs: &[ModemConfig],
        rx_config: RxConfig,
    ) -> (RxPipeline, mpsc::Receiver<DecodedFrame>) {
        let (out, frames_rx) = mpsc::channel();
        let modems: Vec<Multimodem> = modem_configs
            .iter()
            .enumerate()
            .map(|(chan, cfg)| Multimodem::new(chan, cfg))
            .collect();
        let voters = Arc::new(Mutex::new(
            modem_configs
                .iter()
                .map(|cfg| Voter::new(cfg.sample_rate as u64 / 2))
                .collect::<Vec<_>>(),
        ));
        let dcd_flags = Arc::new(
            modem_configs
                .iter()
                .map(|_| AtomicBool::new(false))
                .collect::<Vec<_>>(),
        );
        let retry_queue = Arc::new(RetryQueue::new());

        let worker = {
            let retry_queue = Arc::clone(&retry_queue);
            let voters = Arc::clone(&voters);
            let out = out.clone();
            std::thread::spawn(move || {
                retry_worker(&retry_queue, &voters, &out, rx_config);
            })
        };

        (
            RxPipeline {
                modems,
                voters,
                retry_queue,
                worker: Some(worker),
                out,
                rx_config,
                dcd_flags,
                scratch: Vec::new(),
            },
            frames_rx,
        )
    }

    /// Push one sample (-1.0..1.0) into a channel's demodulators.
    pub fn process_sample(&mut self, chan: usize, x: f32) {
        self.scratch.clear();
        self.modems[chan].process_sample(x, &mut self.scratch);
        self.dcd_flags[chan].store(self.modems[chan].dcd(), Ordering::Relaxed);

        for rrbb in self.scratch.drain(..) {
            // Clean frames are delivered straight from this thread; only
            // damaged ones are worth a worker's time.
            match fixbits::decode_with_repair(&rrbb, RetryLevel::None, self.rx_config.sanity) {
                Some(d) => {
                    deliver(&self.voters, &self.out, &rrbb, d.packet, 0, false);
                }
                None if self.rx_config.retry > RetryLevel::None => {
                    self.retry_queue.push(rrbb);
                }
                None if self.rx_config.passall => {
                    if let Some(packet) = fixbits::decode_suspect(&rrbb) {
                        deliver(&self.voters, &self.out, &rrbb, packet, 0, true);
                    }
                }
                None => debug!(
                    "dropping bad-FCS frame on channel {} subchannel {}",
                    rrbb.chan(),
                    rrbb.subchan()
                ),
            }
        }
    }

    /// Channel-busy indication for the transmit side.
    pub fn dcd_flags(&self) -> Arc<Vec<AtomicBool>> {
        Arc::clone(&self.dcd_flags)
    }

    /// Drain the retry worker and shut down. The frame receiver reports
    /// disconnect once the last sender is gone.
    pub fn finish(mut self) {
        self.retry_queue.close();
        if let Some(worker) = self.worker.take()
            && worker.join().is_err()
        {
            warn!("retry worker panicked");
        }
    }
}

fn retry_worker(
    queue: &RetryQueue,
    voters: &Arc<Mutex<Vec<Voter>>>,
    out: &mpsc::Sender<DecodedFrame>,
    cfg: RxConfig,
) {
    while let Some(rrbb) = queue.pop_wait() {
        match fixbits::decode_with_repair(&rrbb, cfg.retry, cfg.sanity) {
            Some(d) => deliver(voters, out, &rrbb, d.packet, d.flips, false),
            None if cfg.passall => {
                if let Some(packet) = fixbits::decode_suspect(&rrbb) {
                    deliver(voters, out, &rrbb, packet, 0, true);
                }
            }
            None => {}
        }
    }
}

/// Run the subchannel vote, then hand the frame to the application side.
fn deliver(
    voters: &Arc<Mutex<Vec<Voter>>>,
    out: &mpsc::Sender<DecodedFrame>,
    rrbb: &Rrbb,
    packet: Packet,
    flips: usize,
    suspect: bool,
) {
    let first = voters.lock().unwrap()[rrbb.chan()].accept(packet.m_m_crc(), rrbb.sample_clock());
    if !first {
        debug!(
            "channel {} subchannel {} slicer {} decoded a frame another variant already delivered",
            rrbb.chan(),
            rrbb.subchan(),
            rrbb.slice()
        );
        return;
    }
    // The receiver side may have gone away during shutdown; nothing to do.
    let _ = out.send(DecodedFrame {
        packet,
        chan: rrbb.chan(),
        subchan: rrbb.subchan(),
        slice: rrbb.slice(),
        flips,
        suspect,
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_queue_fifo_and_close() {
        let q = RetryQueue::new();
        q.push(Rrbb::new(0, 0, 0, false, 0, false));
        q.push(Rrbb::new(1, 0, 0, false, 0, false));
        assert_eq!(q.pop_wait().unwrap().chan(), 0);
        q.close();
        assert_eq!(q.pop_wait().unwrap().chan(), 1);
        assert!(q.pop_wait().is_none());
    }

    #[test]
    fn test_retry_queue_wakes_blocked_consumer() {
        let q = Arc::new(RetryQueue::new());
        let q2 = Arc::clone(&q);
        let t = std::thread::spawn(move || q2.pop_wait().map(|r| r.chan()));
        std::thread::sleep(std::time::Duration::from_millis(50));
        q.push(Rrbb::new(7, 0, 0, false, 0, false));
        assert_eq!(t.join().unwrap(), Some(7));
    }
}
