//! Minimal send path: enough of an encoder to produce wire-true packet
//! sequences for tests, demos, and loopback exercises.
//!
//! [`HeapBuilder`] lays addressed items back to back into a payload buffer,
//! emits the four well-known immediates in every packet, and puts the user
//! item-pointer table in the first packet only, which is the layout
//! existing senders use. It is not a streaming sender: the whole heap is
//! built in memory.

use crate::{
    Flavour, CTRL_STREAM_STOP, HEAP_CNT_ID, HEAP_LENGTH_ID, ITEM_POINTER_WIDTH, MAGIC,
    PAYLOAD_LENGTH_ID, PAYLOAD_OFFSET_ID, STREAM_CTRL_ID, VERSION,
};

/// Default per-packet payload size: a 1500-byte MTU minus IP/UDP headers
/// and a worst-case pointer table.
pub const DEFAULT_MAX_PAYLOAD: usize = 1344;

enum PendingItem {
    Immediate { id: u64, value: u64 },
    Addressed { id: u64, data: Vec<u8> },
}

/// Builds the packet sequence for one heap.
pub struct HeapBuilder {
    heap_cnt: u64,
    flavour: Flavour,
    max_payload: usize,
    items: Vec<PendingItem>,
    end_of_stream: bool,
}

impl HeapBuilder {
    pub fn new(heap_cnt: u64, flavour: Flavour) -> Self {
        Self {
            heap_cnt,
            flavour,
            max_payload: DEFAULT_MAX_PAYLOAD,
            items: Vec::new(),
            end_of_stream: false,
        }
    }

    /// Cap the payload bytes carried per packet. Mostly useful in tests to
    /// force multi-packet heaps out of small payloads.
    pub fn max_payload(mut self, max_payload: usize) -> Self {
        assert!(max_payload > 0);
        self.max_payload = max_payload;
        self
    }

    /// Add an immediate item. The value is masked to the flavour's address
    /// field.
    pub fn add_immediate(&mut self, id: u64, value: u64) -> &mut Self {
        debug_assert!(id > PAYLOAD_LENGTH_ID, "reserved item id");
        self.items.push(PendingItem::Immediate { id, value });
        self
    }

    /// Add an addressed item; its bytes are appended to the heap payload.
    pub fn add_item(&mut self, id: u64, data: &[u8]) -> &mut Self {
        debug_assert!(id > PAYLOAD_LENGTH_ID, "reserved item id");
        self.items.push(PendingItem::Addressed {
            id,
            data: data.to_vec(),
        });
        self
    }

    /// Carry a `STREAM_CTRL = STREAM_STOP` item in this heap.
    pub fn mark_end_of_stream(&mut self) -> &mut Self {
        self.end_of_stream = true;
        self
    }

    /// Produce the heap's datagrams, in transmit order.
    pub fn packets(&self) -> Vec<Vec<u8>> {
        let f = self.flavour;

        // Lay out the payload and the user pointer table.
        let mut payload = Vec::new();
        let mut user_pointers = Vec::new();
        for item in &self.items {
            match item {
                PendingItem::Immediate { id, value } => {
                    user_pointers.push(f.make_immediate(*id, *value));
                }
                PendingItem::Addressed { id, data } => {
                    user_pointers.push(f.make_address(*id, payload.len() as u64));
                    payload.extend_from_slice(data);
                }
            }
        }
        if self.end_of_stream {
            user_pointers.push(f.make_immediate(STREAM_CTRL_ID, CTRL_STREAM_STOP));
        }
        let heap_length = payload.len() as u64;

        let mut packets = Vec::new();
        let mut offset = 0usize;
        loop {
            let chunk = (payload.len() - offset).min(self.max_payload);
            let mut pointers = vec![
                f.make_immediate(HEAP_CNT_ID, self.heap_cnt),
                f.make_immediate(HEAP_LENGTH_ID, heap_length),
                f.make_immediate(PAYLOAD_OFFSET_ID, offset as u64),
                f.make_immediate(PAYLOAD_LENGTH_ID, chunk as u64),
            ];
            if offset == 0 {
                pointers.extend_from_slice(&user_pointers);
            }
            packets.push(encode_packet(f, &pointers, &payload[offset..offset + chunk]));
            offset += chunk;
            if offset >= payload.len() {
                break;
            }
        }
        packets
    }
}

/// A standalone end-of-stream packet: a zero-payload heap whose only user
/// item is `STREAM_CTRL = STREAM_STOP`.
pub fn stop_packet(heap_cnt: u64, flavour: Flavour) -> Vec<u8> {
    let pointers = [
        flavour.make_immediate(HEAP_CNT_ID, heap_cnt),
        flavour.make_immediate(PAYLOAD_OFFSET_ID, 0),
        flavour.make_immediate(PAYLOAD_LENGTH_ID, 0),
        flavour.make_immediate(STREAM_CTRL_ID, CTRL_STREAM_STOP),
    ];
    encode_packet(flavour, &pointers, &[])
}

fn encode_packet(flavour: Flavour, pointers: &[u64], payload: &[u8]) -> Vec<u8> {
    debug_assert!(pointers.len() <= u16::MAX as usize);
    let mut out = Vec::with_capacity(8 + 8 * pointers.len() + payload.len());
    let n_items = pointers.len() as u16;
    out.extend_from_slice(&[
        MAGIC,
        VERSION,
        ITEM_POINTER_WIDTH,
        flavour.heap_address_bits() / 8,
        0,
        0,
        (n_items >> 8) as u8,
        n_items as u8,
    ]);
    for p in pointers {
        out.extend_from_slice(&p.to_be_bytes());
    }
    out.extend_from_slice(payload);
    out
}

#[cfg(test)]
mod tests {
    use super::{stop_packet, HeapBuilder};
    use crate::wire::decode_packet;
    use crate::{Flavour, CTRL_STREAM_STOP, STREAM_CTRL_ID};

    #[test]
    fn splits_at_max_payload() {
        let mut b = HeapBuilder::new(9, Flavour::SPEAD_64_48).max_payload(8);
        b.add_item(0x1000, &[7u8; 20]);
        let pkts = b.packets();
        assert_eq!(pkts.len(), 3);

        let mut total = 0u64;
        for (i, p) in pkts.iter().enumerate() {
            let ph = decode_packet(p).unwrap();
            assert_eq!(ph.heap_cnt, 9);
            assert_eq!(ph.heap_length, 20);
            assert_eq!(ph.payload_offset, 8 * i as u64);
            total += ph.payload_length;
            // Only the first packet carries the user pointer table.
            let expect_items = if i == 0 { 5 } else { 4 };
            assert_eq!(ph.n_items(), expect_items);
        }
        assert_eq!(total, 20);
    }

    #[test]
    fn stop_packet_decodes() {
        let data = stop_packet(3, Flavour::SPEAD_64_40);
        let ph = decode_packet(&data).unwrap();
        assert_eq!(ph.heap_cnt, 3);
        assert_eq!(ph.heap_length, -1);
        assert_eq!(ph.payload_length, 0);
        let f = ph.flavour;
        assert!(ph.pointers().any(|p| f.is_immediate(p)
            && f.id(p) == STREAM_CTRL_ID
            && f.immediate(p) == CTRL_STREAM_STOP));
    }
}
