//! Per-channel two-priority transmit queues.
//!
//! All channels share one mutex; each audio device gets its own condition
//! variable so a wake-up on one device never disturbs the transmitter of
//! another. A single consumer thread per device drains its channels, HIGH
//! before LOW, FIFO within a class.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

use log::warn;

use ax25::packet::Packet;

/// Soft bound on queued APRS frames per channel. APRS is contention
/// traffic; if we cannot get on the air, piling up more beacons helps
/// nobody. Non-APRS traffic is not bounded.
pub const MAX_APRS_QUEUED: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    /// Digipeated and control frames.
    High,
    /// Locally originated traffic.
    Low,
}

impl Priority {
    fn index(self) -> usize {
        match self {
            Priority::High => 0,
            Priority::Low => 1,
        }
    }
}

struct ChanQueue {
    device: usize,
    q: [VecDeque<Packet>; 2],
    aprs_queued: usize,
}

struct Shared {
    chans: Vec<ChanQueue>,
    closed: bool,
}

pub struct TxQueue {
    shared: Mutex<Shared>,
    /// One per device.
    cond: Vec<Condvar>,
}

impl TxQueue {
    /// `devices[d]` lists the global channel numbers served by device `d`.
    /// Channel numbers must be 0..total without gaps.
    pub fn new(devices: &[Vec<usize>]) -> TxQueue {
        let total: usize = devices.iter().map(|c| c.len()).sum();
        let mut device_of = vec![0; total];
        for (d, chans) in devices.iter().enumerate() {
            for &c in chans {
                device_of[c] = d;
            }
        }
        TxQueue {
            shared: Mutex::new(Shared {
                chans: device_of
                    .iter()
                    .map(|&d| ChanQueue {
                        device: d,
                        q: [VecDeque::new(), VecDeque::new()],
                        aprs_queued: 0,
                    })
                    .collect(),
                closed: false,
            }),
            cond: devices.iter().map(|_| Condvar::new()).collect(),
        }
    }

    /// Queue a packet for transmission. Returns false when the APRS soft
    /// bound rejects it.
    pub fn append(&self, chan: usize, prio: Priority, pkt: Packet) -> bool {
        let mut shared = self.shared.lock().unwrap();
        let is_aprs = pkt.is_aprs();
        let cq = &mut shared.chans[chan];
        if is_aprs && cq.aprs_queued >= MAX_APRS_QUEUED {
            warn!(
                "transmit queue for channel {} already holds {} APRS frames, dropping {}",
                chan,
                cq.aprs_queued,
                pkt.format_addrs()
            );
            return false;
        }
        if is_aprs {
            cq.aprs_queued += 1;
        }
        cq.q[prio.index()].push_back(pkt);
        let device = cq.device;
        drop(shared);
        self.cond[device].notify_all();
        true
    }

    /// Block until one of the device's channels has traffic, then take the
    /// frame at the head of the highest non-empty priority class. Returns
    /// None once the queue is closed and fully drained.
    pub fn wait_dequeue(&self, device: usize) -> Option<(usize, Packet)> {
        let mut shared = self.shared.lock().unwrap();
        loop {
            for prio in 0..2 {
                for chan in 0..shared.chans.len() {
                    let cq = &mut shared.chans[chan];
                    if cq.device != device {
                        continue;
                    }
                    if let Some(pkt) = cq.q[prio].pop_front() {
                        if pkt.is_aprs() {
                            cq.aprs_queued -= 1;
                        }
                        return Some((chan, pkt));
                    }
                }
            }
            if shared.closed {
                return None;
            }
            shared = self.cond[device].wait(shared).unwrap();
        }
    }

    /// Non-blocking variant; used to batch several frames into one key-up.
    pub fn try_dequeue_chan(&self, chan: usize) -> Option<Packet> {
        let mut shared = self.shared.lock().unwrap();
        let cq = &mut shared.chans[chan];
        for prio in 0..2 {
            if let Some(pkt) = cq.q[prio].pop_front() {
                if pkt.is_aprs() {
                    cq.aprs_queued -= 1;
                }
                return Some(pkt);
            }
        }
        None
    }

    /// Wake every consumer for shutdown; they drain and exit.
    pub fn close(&self) {
        self.shared.lock().unwrap().closed = true;
        for c in &self.cond {
            c.notify_all();
        }
    }

    pub fn is_empty(&self, chan: usize) -> bool {
        let shared = self.shared.lock().unwrap();
        shared.chans[chan].q.iter().all(|q| q.is_empty())
    }
}
