#![doc = include_str!("../README.md")]
//!
//! # Technical Overview
//!
//! Every SPEAD datagram starts with a 64-bit flavour word, then a table of
//! 64-bit *item pointers*, then a slice of heap payload. Four well-known
//! pointers ([`HEAP_CNT_ID`], [`HEAP_LENGTH_ID`], [`PAYLOAD_OFFSET_ID`],
//! [`PAYLOAD_LENGTH_ID`]) tell the receiver which heap the payload slice
//! belongs to and where it lands; everything else is application data that
//! is carried through to the consumer.
//!
//! The receive path is split the same way the modules are:
//!
//! * [`wire`] parses one datagram into a borrowed [`wire::PacketHeader`].
//! * [`rx`] owns reassembly: a bounded cache of partially received heaps,
//!   the stream/reader machinery, the consumer ring, and the item walker
//!   over finished heaps.
//! * [`flavour`] holds the pointer arithmetic that both sides share.
//! * [`send`] is the minimal encoder used by tests and demos to produce
//!   wire-true packet sequences.
//!
//! Readers run as tasks on a [`ThreadPool`]; each stream serializes its
//! reassembly state behind a short-lived blocking lock, so at most one
//! packet is being folded into a given stream at any instant regardless of
//! how many readers feed it.

pub mod flavour;
pub mod pcap;
pub mod pool;
pub mod rx;
pub mod send;
pub mod thread_pool;
pub mod wire;

pub use flavour::Flavour;
pub use pool::MemoryPool;
pub use rx::{FrozenHeap, RxStream};
pub use thread_pool::ThreadPool;

/// Heap counter: identifies which heap a packet belongs to. Required in
/// every packet, immediate mode.
pub const HEAP_CNT_ID: u64 = 0x01;
/// Total heap payload length in bytes. Optional per packet, immediate mode.
pub const HEAP_LENGTH_ID: u64 = 0x02;
/// Offset of this packet's payload slice within the heap. Required,
/// immediate mode.
pub const PAYLOAD_OFFSET_ID: u64 = 0x03;
/// Length of this packet's payload slice. Required, immediate mode.
pub const PAYLOAD_LENGTH_ID: u64 = 0x04;
/// Item descriptor; carried through to the consumer unparsed.
pub const DESCRIPTOR_ID: u64 = 0x05;
/// Stream control. An immediate value of [`CTRL_STREAM_STOP`] signals
/// end-of-stream.
pub const STREAM_CTRL_ID: u64 = 0x06;

/// `STREAM_CTRL` immediate value signalling end-of-stream.
pub const CTRL_STREAM_STOP: u64 = 0x02;

/// First byte of the flavour word on every SPEAD packet (ASCII 'S').
pub const MAGIC: u8 = 0x53;
/// Protocol version accepted by this implementation.
pub const VERSION: u8 = 4;
/// Item pointer width in bytes. SPEAD-64-XX flavours only.
pub const ITEM_POINTER_WIDTH: u8 = 8;

/// PySPEAD 0.5.2 stores descriptor id/shape widths from the wrong flavour
/// field. Compatibility flag for interop with such senders.
pub const BUG_COMPAT_DESCRIPTOR_WIDTHS: u8 = 1;
/// PySPEAD 0.5.2 sets bit 1 (instead of bit 0) to mark a variable-size
/// dimension in a descriptor shape.
pub const BUG_COMPAT_SHAPE_BIT_1: u8 = 2;
/// PySPEAD 0.5.2 emits numpy headers with the opposite endianness to the
/// payload it sends.
pub const BUG_COMPAT_SWAP_ENDIAN: u8 = 4;
/// All the bugs of PySPEAD 0.5.2 at once.
pub const BUG_COMPAT_PYSPEAD_0_5_2: u8 =
    BUG_COMPAT_DESCRIPTOR_WIDTHS | BUG_COMPAT_SHAPE_BIT_1 | BUG_COMPAT_SWAP_ENDIAN;
