//! The receive path.
//!
//! Readers feed datagrams into a stream; the stream folds them into a
//! bounded cache of live heaps; finished heaps come out the other side as
//! immutable [`FrozenHeap`]s, either over the consumer ring
//! ([`RxStream::pop`]) or through a callback ([`CallbackStream`]).
//!
//! A heap is *finished* when every payload byte arrived, or when it was
//! evicted to make room for a newer heap, or when the stream was stopped.
//! The consumer checks [`FrozenHeap::is_complete`] to tell these apart.

pub mod heap;
pub(crate) mod live_heap;
pub(crate) mod mem;
pub(crate) mod reassembler;
pub mod ring;
pub mod stream;
pub mod udp;

pub use heap::{FrozenHeap, Item, ItemValue};
pub use ring::RingError;
pub use stream::{CallbackStream, RxStream, StreamConfig, StreamStats};
pub use udp::UdpReaderConfig;
