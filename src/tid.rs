//! Time-ordered identifiers (version-1 UUIDs) for the `_tid` surrogate key.
//!
//! Ticks are 100ns intervals since the Gregorian epoch. The generator never
//! hands out the same tick twice: when the clock has not advanced since the
//! previous call, it bumps the last tick by one instead.

use parking_lot::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::{Timestamp, Uuid};

/// 100ns ticks between 1582-10-15 and 1970-01-01.
const GREGORIAN_OFFSET: u64 = 0x01B2_1DD2_1381_4000;
const TICKS_PER_MILLI: u64 = 10_000;

#[derive(Debug)]
pub struct TidGenerator {
    node: [u8; 6],
    clock_seq: u16,
    last_ticks: Mutex<u64>,
}

impl Default for TidGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl TidGenerator {
    /// Random node id and clock sequence, drawn once per generator.
    pub fn new() -> Self {
        let seed = Uuid::new_v4();
        let bytes = seed.as_bytes();
        let mut node = [0u8; 6];
        node.copy_from_slice(&bytes[10..16]);
        // multicast bit marks the node id as not a MAC address
        node[0] |= 0x01;
        let clock_seq = u16::from_be_bytes([bytes[8], bytes[9]]) & 0x3fff;
        Self::with_node(node, clock_seq)
    }

    pub fn with_node(node: [u8; 6], clock_seq: u16) -> Self {
        Self {
            node,
            clock_seq: clock_seq & 0x3fff,
            last_ticks: Mutex::new(0),
        }
    }

    pub fn next(&self) -> Uuid {
        self.next_at(now_ticks())
    }

    /// Next identifier for a clock reading of `ticks`, strictly after the
    /// previous one handed out by this generator.
    pub fn next_at(&self, ticks: u64) -> Uuid {
        let ticks = {
            let mut last = self.last_ticks.lock();
            let next = ticks.max(last.saturating_add(1));
            *last = next;
            next
        };
        build_v1(ticks, self.clock_seq, &self.node)
    }
}

fn now_ticks() -> u64 {
    let since_epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    GREGORIAN_OFFSET + (since_epoch.as_nanos() / 100) as u64
}

fn build_v1(ticks: u64, clock_seq: u16, node: &[u8; 6]) -> Uuid {
    Uuid::new_v1(Timestamp::from_gregorian_time(ticks, clock_seq), node)
}

/// Timestamp ticks of a version-1 UUID, `None` for other versions.
pub fn tid_ticks(id: &Uuid) -> Option<u64> {
    if id.get_version_num() != 1 {
        return None;
    }
    id.get_timestamp().map(|ts| ts.to_gregorian().0)
}

/// Milliseconds since the Unix epoch encoded in a version-1 UUID.
pub fn tid_unix_millis(id: &Uuid) -> Option<i64> {
    let ticks = tid_ticks(id)?;
    let millis = ticks.checked_sub(GREGORIAN_OFFSET)? / TICKS_PER_MILLI;
    i64::try_from(millis).ok()
}

/// Smallest identifier for the given instant; useful as an inclusive range bound.
pub fn tid_from_unix_millis(millis: u64) -> Uuid {
    build_v1(GREGORIAN_OFFSET + millis * TICKS_PER_MILLI, 0, &[0; 6])
}

#[cfg(test)]
mod tests {
    use super::{TidGenerator, tid_from_unix_millis, tid_ticks, tid_unix_millis};

    #[test]
    fn generated_ids_are_version_one() {
        let tid = TidGenerator::new().next();
        assert_eq!(tid.get_version_num(), 1);
        assert!(tid_unix_millis(&tid).expect("v1 timestamp") > 1_600_000_000_000);
    }

    #[test]
    fn same_instant_yields_strictly_increasing_ids() {
        let generator = TidGenerator::with_node([1, 2, 3, 4, 5, 6], 42);
        let first = generator.next_at(1_000);
        let second = generator.next_at(1_000);
        let third = generator.next_at(999);
        let ticks = |id| tid_ticks(&id).expect("v1");
        assert!(ticks(first) < ticks(second));
        assert!(ticks(second) < ticks(third));
        assert_ne!(first, second);
    }

    #[test]
    fn clock_sequence_and_node_are_embedded() {
        let generator = TidGenerator::with_node([0x01, 2, 3, 4, 5, 6], 0x1234);
        let tid = generator.next_at(0x0123_4567_89ab_cdef);
        assert_eq!(tid_ticks(&tid), Some(0x0123_4567_89ab_cdef));
        let (ticks, clock_seq) = tid.get_timestamp().expect("v1 timestamp").to_gregorian();
        assert_eq!(ticks, 0x0123_4567_89ab_cdef);
        assert_eq!(clock_seq, 0x1234);
        assert_eq!(&tid.as_bytes()[10..], &[0x01, 2, 3, 4, 5, 6]);
        assert_eq!(tid.get_variant(), uuid::Variant::RFC4122);
    }

    #[test]
    fn millis_roundtrip() {
        let tid = tid_from_unix_millis(1_700_000_000_123);
        assert_eq!(tid_unix_millis(&tid), Some(1_700_000_000_123));
    }

    #[test]
    fn non_v1_uuids_have_no_ticks() {
        assert_eq!(tid_ticks(&uuid::Uuid::new_v4()), None);
    }

    #[test]
    fn concurrent_generation_never_collides() {
        let generator = std::sync::Arc::new(TidGenerator::new());
        let handles = (0..4)
            .map(|_| {
                let generator = std::sync::Arc::clone(&generator);
                std::thread::spawn(move || (0..500).map(|_| generator.next()).collect::<Vec<_>>())
            })
            .collect::<Vec<_>>();
        let mut all = handles
            .into_iter()
            .flat_map(|h| h.join().expect("thread"))
            .collect::<Vec<_>>();
        let total = all.len();
        all.sort();
        all.dedup();
        assert_eq!(all.len(), total);
    }
}
