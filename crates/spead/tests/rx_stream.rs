//! End-to-end receive tests over the buffer reader.

use spead::rx::{CallbackStream, RingError, RxStream, StreamConfig};
use spead::send::{stop_packet, HeapBuilder};
use spead::{Flavour, MemoryPool, ThreadPool};

fn pool() -> ThreadPool {
    ThreadPool::new(1).unwrap()
}

fn concat(packets: impl IntoIterator<Item = Vec<u8>>) -> Vec<u8> {
    let mut out = Vec::new();
    for p in packets {
        out.extend_from_slice(&p);
    }
    out
}

#[test]
fn single_packet_heap() {
    let pool = pool();
    let stream = RxStream::new(&pool, StreamConfig::new());

    let mut b = HeapBuilder::new(7, Flavour::SPEAD_64_40);
    b.add_item(0x1234, &[0, 1, 2, 3, 4, 5, 6, 7]);
    stream.add_buffer_reader(concat(b.packets()));

    let heap = stream.pop().unwrap();
    assert_eq!(heap.heap_cnt(), 7);
    assert!(heap.is_complete());
    let items: Vec<_> = heap.items().collect();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].id(), 0x1234);
    assert_eq!(items[0].bytes(), &[0, 1, 2, 3, 4, 5, 6, 7]);

    // Buffer exhausted: the stream stops itself.
    assert_eq!(stream.pop().unwrap_err(), RingError::Stopped);
    let stats = stream.stats();
    assert_eq!(stats.packets, 1);
    assert_eq!(stats.heaps, 1);
    assert_eq!(stats.incomplete_heaps, 0);
}

#[test]
fn two_packet_heap_reverse_order() {
    let pool = pool();
    let stream = RxStream::new(&pool, StreamConfig::new());

    let mut b = HeapBuilder::new(9, Flavour::SPEAD_64_40).max_payload(8);
    let payload: Vec<u8> = (0..8).chain(0x88..0x90).collect();
    b.add_item(0x1000, &payload);
    let mut packets = b.packets();
    packets.reverse();
    stream.add_buffer_reader(concat(packets));

    let heap = stream.pop().unwrap();
    assert!(heap.is_complete());
    assert_eq!(heap.payload(), &payload[..]);
    assert_eq!(stream.pop().unwrap_err(), RingError::Stopped);
}

#[test]
fn duplicate_packet_is_idempotent() {
    let pool = pool();
    let stream = RxStream::new(&pool, StreamConfig::new());

    let mut b = HeapBuilder::new(9, Flavour::SPEAD_64_40).max_payload(8);
    let payload: Vec<u8> = (0..16).collect();
    b.add_item(0x1000, &payload);
    let packets = b.packets();
    // Second half twice, then the first half.
    stream.add_buffer_reader(concat([
        packets[1].clone(),
        packets[1].clone(),
        packets[0].clone(),
    ]));

    let heap = stream.pop().unwrap();
    assert!(heap.is_complete());
    assert_eq!(heap.payload(), &payload[..]);
    assert_eq!(stream.pop().unwrap_err(), RingError::Stopped);

    let stats = stream.stats();
    assert_eq!(stats.packets, 3);
    assert_eq!(stats.rejected_packets, 1);
    assert_eq!(stats.heaps, 1);
}

#[test]
fn round_trip_in_arbitrary_order() {
    let items: [(u64, Vec<u8>); 3] = [
        (0x1000, (0..40).collect()),
        (0x1001, vec![0xee; 11]),
        (0x1002, (100..140).rev().collect()),
    ];

    let mut b = HeapBuilder::new(21, Flavour::SPEAD_64_48).max_payload(16);
    for (id, data) in &items {
        b.add_item(*id, data);
    }
    b.add_immediate(0x2000, 0x1234);
    let packets = b.packets();
    assert!(packets.len() > 3);

    // A couple of deliberately awkward permutations.
    let mut orders = vec![packets.clone()];
    let mut reversed = packets.clone();
    reversed.reverse();
    orders.push(reversed);
    let mut rotated = packets.clone();
    rotated.rotate_left(packets.len() / 2);
    orders.push(rotated);

    for order in orders {
        let pool = pool();
        let stream = RxStream::new(&pool, StreamConfig::new());
        stream.add_buffer_reader(concat(order));

        let heap = stream.pop().unwrap();
        assert!(heap.is_complete());
        let got: Vec<_> = heap.items().collect();
        assert_eq!(got.len(), 4);
        for ((id, data), item) in items.iter().zip(&got) {
            assert_eq!(item.id(), *id);
            assert_eq!(item.bytes(), &data[..]);
        }
        assert_eq!(got[3].immediate(), Some(0x1234));
        assert_eq!(stream.pop().unwrap_err(), RingError::Stopped);
    }
}

#[test]
fn eviction_emits_oldest_incomplete() {
    let pool = pool();
    let stream = RxStream::new(&pool, StreamConfig::new().with_max_heaps(2));

    // First packet only of three two-packet heaps.
    let mut data = Vec::new();
    for cnt in 1..=3u64 {
        let mut b = HeapBuilder::new(cnt, Flavour::SPEAD_64_48).max_payload(8);
        b.add_item(0x1000, &[cnt as u8; 16]);
        data.extend_from_slice(&b.packets()[0]);
    }
    stream.add_buffer_reader(data);

    // Heap 1 is evicted by heap 3's arrival; 2 and 3 follow at flush.
    let order: Vec<u64> = std::iter::from_fn(|| stream.pop().ok())
        .map(|h| h.heap_cnt())
        .collect();
    assert_eq!(order, [1, 2, 3]);

    let stats = stream.stats();
    assert_eq!(stats.heaps, 3);
    assert_eq!(stats.incomplete_heaps, 3);
}

#[test]
fn stream_stops_on_stop_item() {
    let pool = pool();
    let stream = RxStream::new(&pool, StreamConfig::new());

    let mut b = HeapBuilder::new(9, Flavour::SPEAD_64_40);
    b.add_item(0x1000, &[1, 2, 3, 4]);
    let mut data = concat(b.packets());
    data.extend_from_slice(&stop_packet(100, Flavour::SPEAD_64_40));
    // A heap after the stop item must be discarded.
    let mut b = HeapBuilder::new(10, Flavour::SPEAD_64_40);
    b.add_item(0x1000, &[9, 9]);
    data.extend_from_slice(&concat(b.packets()));
    stream.add_buffer_reader(data);

    let first = stream.pop().unwrap();
    assert_eq!(first.heap_cnt(), 9);
    let second = stream.pop().unwrap();
    assert_eq!(second.heap_cnt(), 100);
    assert!(second.is_end_of_stream());
    assert!(!second.is_complete());
    assert_eq!(stream.pop().unwrap_err(), RingError::Stopped);
}

#[test]
fn stop_on_stop_can_be_disabled() {
    let pool = pool();
    let stream = RxStream::new(&pool, StreamConfig::new().with_stop_on_stop(false));

    let mut b = HeapBuilder::new(9, Flavour::SPEAD_64_40);
    b.add_item(0x1000, &[1, 2, 3, 4]);
    let mut data = concat(b.packets());
    data.extend_from_slice(&stop_packet(100, Flavour::SPEAD_64_40));
    let mut b = HeapBuilder::new(10, Flavour::SPEAD_64_40);
    b.add_item(0x1000, &[9, 9]);
    data.extend_from_slice(&concat(b.packets()));
    stream.add_buffer_reader(data);

    // The stop item is carried through but does not cut the stream off:
    // heap 10 still arrives, and the stop heap comes out in the final
    // flush.
    let cnts: Vec<u64> = std::iter::from_fn(|| stream.pop().ok())
        .map(|h| h.heap_cnt())
        .collect();
    assert_eq!(cnts, [9, 10, 100]);
}

#[test]
fn flavour_mismatch_within_heap() {
    let pool = pool();
    let stream = RxStream::new(&pool, StreamConfig::new());

    let mut b = HeapBuilder::new(11, Flavour::SPEAD_64_40).max_payload(8);
    b.add_item(0x1000, &[1u8; 16]);
    let pkts40 = b.packets();
    let mut b = HeapBuilder::new(11, Flavour::SPEAD_64_48).max_payload(8);
    b.add_item(0x1000, &[1u8; 16]);
    let pkts48 = b.packets();

    stream.add_buffer_reader(concat([pkts40[0].clone(), pkts48[1].clone()]));

    // The flavour switch is rejected; the first packet's half-heap is
    // still flushed.
    let heap = stream.pop().unwrap();
    assert_eq!(heap.heap_cnt(), 11);
    assert!(!heap.is_complete());
    assert_eq!(heap.received_length(), 8);
    assert_eq!(stream.pop().unwrap_err(), RingError::Stopped);
    assert_eq!(stream.stats().rejected_packets, 1);
}

#[test]
fn consumer_stop_is_idempotent() {
    let pool = pool();
    let stream = RxStream::new(&pool, StreamConfig::new());
    stream.stop();
    stream.stop();
    assert_eq!(stream.pop().unwrap_err(), RingError::Stopped);
    assert_eq!(stream.try_pop().unwrap_err(), RingError::Stopped);
}

#[test]
fn callback_stream_delivers_in_order() {
    let pool = pool();
    let (tx, rx) = std::sync::mpsc::channel();
    let stream = CallbackStream::new(&pool, StreamConfig::new(), move |heap| {
        tx.send(heap.heap_cnt()).unwrap();
    });

    let mut data = Vec::new();
    for cnt in 5..8u64 {
        let mut b = HeapBuilder::new(cnt, Flavour::SPEAD_64_48);
        b.add_item(0x1000, &[cnt as u8; 4]);
        data.extend_from_slice(&concat(b.packets()));
    }
    stream.add_buffer_reader(data);

    // stop() joins the reader, so everything has been delivered by the
    // time it returns.
    stream.stop();
    let cnts: Vec<u64> = rx.try_iter().collect();
    assert_eq!(cnts, [5, 6, 7]);
}

#[test]
fn pooled_buffers_come_back() {
    let pool = pool();
    let memory = MemoryPool::new(4, 64);
    let stream = RxStream::new(
        &pool,
        StreamConfig::new().with_memory_pool(memory.clone()),
    );

    let mut data = Vec::new();
    for cnt in 0..3u64 {
        let mut b = HeapBuilder::new(cnt, Flavour::SPEAD_64_48);
        b.add_item(0x1000, &[7u8; 16]);
        data.extend_from_slice(&concat(b.packets()));
    }
    stream.add_buffer_reader(data);

    for _ in 0..3 {
        let heap = stream.pop().unwrap();
        assert!(heap.is_complete());
        drop(heap);
    }
    assert_eq!(stream.pop().unwrap_err(), RingError::Stopped);
    assert!(memory.free_buffers() >= 1);
}
