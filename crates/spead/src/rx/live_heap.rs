//! A heap in the middle of reassembly.

use log::{debug, trace};
use rustc_hash::FxHashSet;

use crate::pool::{MemoryPool, PayloadBuffer};
use crate::rx::heap::FrozenHeap;
use crate::wire::PacketHeader;
use crate::{Flavour, CTRL_STREAM_STOP, PAYLOAD_LENGTH_ID, STREAM_CTRL_ID};

/// Partial-assembly state for one heap, owned by the reassembler.
///
/// Everything here is learned from packets: the flavour and total length
/// are unknown until the first packet (first `HEAP_LENGTH` pointer)
/// arrives, and `min_length` tracks the tightest lower bound on the
/// payload size that the pointers and payload extents seen so far imply.
pub(crate) struct LiveHeap {
    heap_cnt: u64,
    /// Total payload length, or -1 until a `HEAP_LENGTH` pointer is seen.
    heap_length: i64,
    /// Latched from the first packet; packets of any other flavour are
    /// rejected afterwards.
    flavour: Option<Flavour>,
    min_length: u64,
    received_length: u64,
    payload: PayloadBuffer,
    packet_offsets: FxHashSet<u64>,
    /// Raw pointers carried through to the frozen heap: user items plus
    /// NULL-id pointers, which may terminate a direct-addressed item.
    pointers: Vec<u64>,
    end_of_stream: bool,
}

impl LiveHeap {
    pub(crate) fn new(heap_cnt: u64, pool: Option<&MemoryPool>) -> Self {
        Self {
            heap_cnt,
            heap_length: -1,
            flavour: None,
            min_length: 0,
            received_length: 0,
            payload: match pool {
                Some(pool) => pool.allocate(0),
                None => PayloadBuffer::system(),
            },
            packet_offsets: FxHashSet::default(),
            pointers: Vec::new(),
            end_of_stream: false,
        }
    }

    /// Fold one decoded packet into this heap.
    ///
    /// Returns false when the packet is rejected; rejection never corrupts
    /// the heap, it only means this packet contributed nothing.
    pub(crate) fn add_packet(&mut self, packet: &PacketHeader<'_>) -> bool {
        if packet.heap_cnt != self.heap_cnt {
            debug!("packet rejected: heap cnt does not match");
            return false;
        }
        if self.heap_length >= 0 && packet.heap_length >= 0 && packet.heap_length != self.heap_length
        {
            debug!("packet rejected: heap length inconsistent with heap");
            return false;
        }
        if packet.heap_length >= 0 && (packet.heap_length as u64) < self.min_length {
            debug!("packet rejected: heap length too small for heap");
            return false;
        }
        if let Some(flavour) = self.flavour {
            if packet.flavour != flavour {
                debug!("packet rejected: flavour inconsistent with heap");
                return false;
            }
        }
        if !self.packet_offsets.insert(packet.payload_offset) {
            debug!("packet rejected: duplicate payload offset");
            return false;
        }

        // Packet accepted; state changes only from here on.
        let flavour = packet.flavour;
        self.flavour = Some(flavour);
        if self.heap_length < 0 && packet.heap_length >= 0 {
            self.heap_length = packet.heap_length;
            self.min_length = packet.heap_length as u64;
            self.payload.reserve(self.heap_length as usize, true);
        }
        self.min_length = self
            .min_length
            .max(packet.payload_offset + packet.payload_length);
        self.payload.reserve(self.min_length as usize, false);

        for pointer in packet.pointers() {
            let id = flavour.id(pointer);
            if !flavour.is_immediate(pointer) {
                // Payload extends at least to the start of every
                // referenced item.
                self.min_length = self.min_length.max(flavour.address(pointer));
            }
            if id == 0 || id > PAYLOAD_LENGTH_ID {
                // NULL pointers are kept because they can terminate the
                // preceding direct-addressed item.
                self.pointers.push(pointer);
                if id == STREAM_CTRL_ID
                    && flavour.is_immediate(pointer)
                    && flavour.immediate(pointer) == CTRL_STREAM_STOP
                {
                    self.end_of_stream = true;
                }
            }
        }

        if packet.payload_length > 0 {
            let offset = packet.payload_offset as usize;
            self.payload.as_mut_slice()[offset..offset + packet.payload.len()]
                .copy_from_slice(packet.payload);
            self.received_length += packet.payload_length;
        }
        trace!(
            "added {} payload bytes at offset {} to heap {}",
            packet.payload_length,
            packet.payload_offset,
            self.heap_cnt
        );
        true
    }

    pub(crate) fn heap_cnt(&self) -> u64 {
        self.heap_cnt
    }

    /// Every payload byte has arrived. Requires the length to be known.
    pub(crate) fn is_complete(&self) -> bool {
        self.heap_length >= 0 && self.received_length == self.heap_length as u64
    }

    /// No gaps up to the tightest known lower bound on the length.
    pub(crate) fn is_contiguous(&self) -> bool {
        self.received_length == self.min_length
    }

    pub(crate) fn is_end_of_stream(&self) -> bool {
        self.end_of_stream
    }

    #[cfg(test)]
    pub(crate) fn received_length(&self) -> u64 {
        self.received_length
    }

    #[cfg(test)]
    pub(crate) fn min_length(&self) -> u64 {
        self.min_length
    }

    /// Turn this heap into the immutable form handed to consumers.
    pub(crate) fn freeze(mut self) -> FrozenHeap {
        let length = if self.heap_length >= 0 {
            self.heap_length as u64
        } else {
            self.min_length
        };
        self.payload.reserve(length as usize, true);
        self.payload.truncate(length as usize);
        let complete = self.is_complete();
        let contiguous = self.is_contiguous();
        FrozenHeap::new(
            self.heap_cnt,
            // A heap only exists once a packet was accepted, so the
            // flavour is always known by now.
            self.flavour.unwrap_or(Flavour::SPEAD_64_48),
            self.heap_length,
            self.received_length,
            self.payload,
            self.pointers,
            complete,
            contiguous,
            self.end_of_stream,
        )
    }
}
