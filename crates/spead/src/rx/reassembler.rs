//! The bounded live-heap cache.

use std::collections::VecDeque;

use log::debug;

use crate::pool::MemoryPool;
use crate::rx::heap::FrozenHeap;
use crate::rx::live_heap::LiveHeap;
use crate::wire::PacketHeader;

/// Routes packets to live heaps and decides when heaps leave the cache.
///
/// The cache is insertion-ordered and capped at `max_heaps`: inserting
/// past the cap evicts the oldest live heap, finished or not. Evicted
/// heaps are emitted like completed ones; an incomplete heap is the
/// consumer's problem to interpret, not a failure. Emission goes through
/// the sink closure so this type does no I/O of its own.
pub(crate) struct Reassembler {
    heaps: VecDeque<LiveHeap>,
    max_heaps: usize,
    pool: Option<MemoryPool>,
}

impl Reassembler {
    pub(crate) fn new(max_heaps: usize, pool: Option<MemoryPool>) -> Self {
        Self {
            heaps: VecDeque::with_capacity(max_heaps.max(1)),
            max_heaps: max_heaps.max(1),
            pool,
        }
    }

    /// Route one decoded packet. Returns whether the target heap accepted
    /// it; emitted heaps (completed or evicted) go to `emit` in order.
    pub(crate) fn add_packet(
        &mut self,
        packet: &PacketHeader<'_>,
        emit: &mut dyn FnMut(FrozenHeap),
    ) -> bool {
        if let Some(index) = self
            .heaps
            .iter()
            .position(|h| h.heap_cnt() == packet.heap_cnt)
        {
            let accepted = self.heaps[index].add_packet(packet);
            if accepted && self.heaps[index].is_complete() {
                // Indexing is fine: we just probed `index`.
                let heap = self.heaps.remove(index).unwrap();
                emit(heap.freeze());
            }
            return accepted;
        }

        let mut heap = LiveHeap::new(packet.heap_cnt, self.pool.as_ref());
        let accepted = heap.add_packet(packet);
        if heap.is_complete() {
            emit(heap.freeze());
            return accepted;
        }
        if self.heaps.len() >= self.max_heaps {
            if let Some(oldest) = self.heaps.pop_front() {
                debug!(
                    "evicting heap {} to make room for heap {}",
                    oldest.heap_cnt(),
                    packet.heap_cnt
                );
                emit(oldest.freeze());
            }
        }
        self.heaps.push_back(heap);
        accepted
    }

    /// Any live heap has latched end-of-stream.
    pub(crate) fn saw_end_of_stream(&self) -> bool {
        self.heaps.iter().any(|h| h.is_end_of_stream())
    }

    /// Emit every remaining live heap in insertion order, leaving the
    /// cache empty. Called when the stream stops.
    pub(crate) fn flush(&mut self, emit: &mut dyn FnMut(FrozenHeap)) {
        while let Some(heap) = self.heaps.pop_front() {
            emit(heap.freeze());
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.heaps.len()
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, heap_cnt: u64) -> bool {
        self.heaps.iter().any(|h| h.heap_cnt() == heap_cnt)
    }
}

#[cfg(test)]
mod tests {
    use super::Reassembler;
    use crate::rx::heap::FrozenHeap;
    use crate::send::HeapBuilder;
    use crate::wire::decode_packet;
    use crate::Flavour;

    fn heap_packets(heap_cnt: u64, payload_len: usize) -> Vec<Vec<u8>> {
        let mut b = HeapBuilder::new(heap_cnt, Flavour::SPEAD_64_48).max_payload(8);
        let data: Vec<u8> = (0..payload_len as u8).collect();
        b.add_item(0x1000, &data);
        b.packets()
    }

    fn feed(r: &mut Reassembler, packet: &[u8], out: &mut Vec<FrozenHeap>) -> bool {
        r.add_packet(&decode_packet(packet).unwrap(), &mut |h| out.push(h))
    }

    #[test]
    fn complete_heap_emitted_and_removed() {
        let mut r = Reassembler::new(4, None);
        let mut out = Vec::new();
        for p in heap_packets(1, 16) {
            assert!(feed(&mut r, &p, &mut out));
        }
        assert_eq!(out.len(), 1);
        assert!(out[0].is_complete());
        assert_eq!(r.len(), 0);
    }

    #[test]
    fn single_packet_heap_never_enters_cache() {
        let mut r = Reassembler::new(4, None);
        let mut out = Vec::new();
        for p in heap_packets(1, 8) {
            feed(&mut r, &p, &mut out);
        }
        assert_eq!(out.len(), 1);
        assert_eq!(r.len(), 0);
    }

    #[test]
    fn eviction_of_oldest() {
        let mut r = Reassembler::new(2, None);
        let mut out = Vec::new();
        // First packet only of heaps 1, 2, 3: heap 1 must be evicted
        // incomplete when heap 3 arrives.
        for cnt in 1..=3 {
            let pkts = heap_packets(cnt, 16);
            feed(&mut r, &pkts[0], &mut out);
        }
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].heap_cnt(), 1);
        assert!(!out[0].is_complete());
        assert_eq!(r.len(), 2);
        assert!(r.contains(2));
        assert!(r.contains(3));
    }

    #[test]
    fn late_packet_for_evicted_heap_starts_a_new_one() {
        let mut r = Reassembler::new(1, None);
        let mut out = Vec::new();
        let one = heap_packets(1, 16);
        let two = heap_packets(2, 16);
        feed(&mut r, &one[0], &mut out);
        feed(&mut r, &two[0], &mut out); // evicts heap 1
        assert_eq!(out.len(), 1);
        // The straggler recreates heap 1 rather than being rejected.
        assert!(feed(&mut r, &one[1], &mut out));
        assert_eq!(out.len(), 2); // heap 2 evicted in turn
        assert!(r.contains(1));
    }

    #[test]
    fn flush_emits_in_insertion_order() {
        let mut r = Reassembler::new(4, None);
        let mut out = Vec::new();
        for cnt in [5, 3, 9] {
            let pkts = heap_packets(cnt, 16);
            feed(&mut r, &pkts[0], &mut out);
        }
        assert!(out.is_empty());
        r.flush(&mut |h| out.push(h));
        let order: Vec<u64> = out.iter().map(|h| h.heap_cnt()).collect();
        assert_eq!(order, [5, 3, 9]);
        assert_eq!(r.len(), 0);
    }

    #[test]
    fn rejected_packet_reports_false() {
        let mut r = Reassembler::new(4, None);
        let mut out = Vec::new();
        let pkts = heap_packets(1, 16);
        assert!(feed(&mut r, &pkts[0], &mut out));
        // Duplicate offset.
        assert!(!feed(&mut r, &pkts[0], &mut out));
        assert!(out.is_empty());
    }
}
