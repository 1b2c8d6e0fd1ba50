//! Duplicate suppression for the digipeater: remember what was sent
//! where, recently.

use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, Instant};

use ax25::packet::Packet;

/// Default retention window.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(30);

type Key = (u16, usize);

/// Bounded set of (payload checksum, outgoing channel) records. The
/// checksum comes from [`Packet::dedupe_crc`], which trims trailing
/// whitespace so RF and internet-relayed copies of a beacon collide.
///
/// Lookups go through a tree index keyed on (checksum, channel), so a
/// check costs O(log n) in cache size; an insertion-ordered history queue
/// drives lazy expiry without ever re-scanning the index. The cache is
/// meant to sit behind a single mutex shared by all digipeat directions.
pub struct DedupeCache {
    window: Duration,
    /// Most recent send time per (checksum, channel).
    index: BTreeMap<Key, Instant>,
    /// Every insertion in time order; stale entries are popped from the
    /// front and removed from the index only if they were never
    /// refreshed by a later insertion of the same key.
    history: VecDeque<(Key, Instant)>,
}

impl DedupeCache {
    pub fn new(window: Duration) -> DedupeCache {
        DedupeCache {
            window,
            index: BTreeMap::new(),
            history: VecDeque::new(),
        }
    }

    /// Was this packet sent to this channel within the window?
    pub fn check(&mut self, pkt: &Packet, chan: usize) -> bool {
        self.check_at(pkt, chan, Instant::now())
    }

    /// Record that this packet is being sent to this channel.
    pub fn remember(&mut self, pkt: &Packet, chan: usize) {
        self.remember_at(pkt, chan, Instant::now());
    }

    fn purge(&mut self, now: Instant) {
        while let Some(&(key, at)) = self.history.front() {
            if now.duration_since(at) <= self.window {
                break;
            }
            self.history.pop_front();
            // A later remember of the same key leaves a newer timestamp
            // in the index; only an unrefreshed entry goes away.
            if self.index.get(&key) == Some(&at) {
                self.index.remove(&key);
            }
        }
    }

    pub(crate) fn check_at(&mut self, pkt: &Packet, chan: usize, now: Instant) -> bool {
        self.purge(now);
        self.index.contains_key(&(pkt.dedupe_crc(), chan))
    }

    pub(crate) fn remember_at(&mut self, pkt: &Packet, chan: usize, now: Instant) {
        self.purge(now);
        let key = (pkt.dedupe_crc(), chan);
        self.index.insert(key, now);
        self.history.push_back((key, now));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn beacon(info: &str) -> Packet {
        Packet::from_text(&format!("W1XYZ>TEST:{info}"), true).unwrap()
    }

    #[test]
    fn test_remember_then_check() {
        let mut cache = DedupeCache::new(DEFAULT_WINDOW);
        let p = beacon("info1");
        let t0 = Instant::now();
        assert!(!cache.check_at(&p, 0, t0));
        cache.remember_at(&p, 0, t0);
        assert!(cache.check_at(&p, 0, t0 + Duration::from_secs(4)));
    }

    #[test]
    fn test_expires_after_window() {
        let mut cache = DedupeCache::new(DEFAULT_WINDOW);
        let p = beacon("info1");
        let t0 = Instant::now();
        cache.remember_at(&p, 0, t0);
        assert!(!cache.check_at(&p, 0, t0 + Duration::from_secs(31)));
        assert!(cache.index.is_empty());
        assert!(cache.history.is_empty());
    }

    #[test]
    fn test_refresh_extends_retention() {
        let mut cache = DedupeCache::new(DEFAULT_WINDOW);
        let p = beacon("info1");
        let t0 = Instant::now();
        cache.remember_at(&p, 0, t0);
        cache.remember_at(&p, 0, t0 + Duration::from_secs(20));
        // 31s after the first insertion but 11s after the refresh.
        assert!(cache.check_at(&p, 0, t0 + Duration::from_secs(31)));
        // The refreshed entry survived its stale history record.
        assert_eq!(cache.index.len(), 1);
    }

    #[test]
    fn test_channels_are_independent() {
        let mut cache = DedupeCache::new(DEFAULT_WINDOW);
        let p = beacon("info1");
        let t0 = Instant::now();
        cache.remember_at(&p, 0, t0);
        assert!(!cache.check_at(&p, 1, t0));
    }

    #[test]
    fn test_trailing_whitespace_still_matches() {
        let mut cache = DedupeCache::new(DEFAULT_WINDOW);
        let t0 = Instant::now();
        cache.remember_at(&beacon("info1"), 0, t0);
        assert!(cache.check_at(&beacon("info1 \r\n"), 0, t0));
        assert!(!cache.check_at(&beacon("info2"), 0, t0));
    }
}
