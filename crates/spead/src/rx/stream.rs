//! Streams: the top-level receive objects.
//!
//! A stream owns a reassembler and any number of readers. Readers run as
//! tasks on the shared [`ThreadPool`] and hand every datagram to the
//! stream; the stream folds it into the live-heap cache behind a short
//! blocking lock, so reassembly state is single-writer no matter how many
//! readers feed it. Finished heaps leave through the stream's sink: the
//! consumer ring of an [`RxStream`], or the callback of a
//! [`CallbackStream`].
//!
//! Stopping is cooperative and idempotent. Whoever stops first (the
//! consumer calling [`RxStream::stop`], a `STREAM_CTRL = STREAM_STOP` item
//! arriving with `stop_on_stop` set, or the last reader finishing) closes
//! the reader wait-queue, flushes the reassembler, and stops the ring so
//! the consumer drains and then sees [`RingError::Stopped`].

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use log::{debug, info, warn};
use maitake_sync::WaitQueue;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::pool::MemoryPool;
use crate::rx::heap::FrozenHeap;
use crate::rx::reassembler::Reassembler;
use crate::rx::ring::{Ring, RingError};
use crate::rx::{mem, udp, UdpReaderConfig};
use crate::wire::{decode_packet, DecodeError, PacketHeader};
use crate::ThreadPool;

/// Construction-time options for a stream. The defaults match typical
/// telescope deployments; see the individual setters.
#[derive(Clone)]
pub struct StreamConfig {
    max_heaps: usize,
    ring_heaps: usize,
    bug_compat: u8,
    memory_pool: Option<MemoryPool>,
    stop_on_stop: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            max_heaps: 4,
            ring_heaps: 4,
            bug_compat: 0,
            memory_pool: None,
            stop_on_stop: true,
        }
    }
}

impl StreamConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Concurrent live heaps kept per stream before the oldest is evicted.
    pub fn with_max_heaps(mut self, max_heaps: usize) -> Self {
        self.max_heaps = max_heaps.max(1);
        self
    }

    /// Capacity of the consumer ring, in heaps.
    pub fn with_ring_heaps(mut self, ring_heaps: usize) -> Self {
        self.ring_heaps = ring_heaps.max(1);
        self
    }

    /// Bug-for-bug compatibility mask (`BUG_COMPAT_*`) applied when
    /// interpreting descriptors from older senders. Carried on the stream
    /// for the consumer; the reassembly core passes descriptors through.
    pub fn with_bug_compat(mut self, bug_compat: u8) -> Self {
        self.bug_compat = bug_compat;
        self
    }

    /// Allocate heap payload buffers from a shared pool.
    pub fn with_memory_pool(mut self, pool: MemoryPool) -> Self {
        self.memory_pool = Some(pool);
        self
    }

    /// Whether a `STREAM_CTRL = STREAM_STOP` item stops the stream.
    /// Defaults to true.
    pub fn with_stop_on_stop(mut self, stop_on_stop: bool) -> Self {
        self.stop_on_stop = stop_on_stop;
        self
    }
}

/// Counters accumulated by a stream since construction.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub struct StreamStats {
    /// Decoded packets handed to the reassembler.
    pub packets: u64,
    /// Datagrams that failed wire decoding.
    pub decode_errors: u64,
    /// Decoded packets the target heap rejected (duplicates, inconsistent
    /// lengths, flavour switches).
    pub rejected_packets: u64,
    /// Heaps emitted, complete or not.
    pub heaps: u64,
    /// Emitted heaps that were missing payload.
    pub incomplete_heaps: u64,
    /// Heaps that could not be delivered at stop time.
    pub dropped_heaps: u64,
}

enum HeapSink {
    Ring(Arc<Ring<FrozenHeap>>),
    Callback(Mutex<Box<dyn FnMut(FrozenHeap) + Send>>),
}

struct StreamInner {
    reassembler: Reassembler,
    stats: StreamStats,
    /// Set once the reassembler has been flushed; packets arriving after
    /// this are discarded.
    stopped: bool,
}

/// State shared between the public stream handle and its reader tasks.
pub(crate) struct StreamShared {
    inner: Mutex<StreamInner>,
    /// Closed to tell readers to wind down.
    closer: WaitQueue,
    /// Latched by whichever stop path runs first.
    stopping: AtomicBool,
    readers: Mutex<Vec<JoinHandle<()>>>,
    reader_count: AtomicUsize,
    handle: Handle,
    sink: HeapSink,
    stop_on_stop: bool,
    bug_compat: u8,
}

impl StreamShared {
    fn new(pool: &ThreadPool, config: &StreamConfig, sink: HeapSink) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(StreamInner {
                reassembler: Reassembler::new(config.max_heaps, config.memory_pool.clone()),
                stats: StreamStats::default(),
                stopped: false,
            }),
            closer: WaitQueue::new(),
            stopping: AtomicBool::new(false),
            readers: Mutex::new(Vec::new()),
            reader_count: AtomicUsize::new(0),
            handle: pool.handle(),
            sink,
            stop_on_stop: config.stop_on_stop,
            bug_compat: config.bug_compat,
        })
    }

    pub(crate) fn closer(&self) -> &WaitQueue {
        &self.closer
    }

    pub(crate) fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::Acquire)
    }

    pub(crate) fn runtime(&self) -> Handle {
        self.handle.clone()
    }

    /// Register a reader task. Fails once the stream is stopping.
    pub(crate) fn spawn_reader<F>(&self, fut: F) -> bool
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        if self.is_stopping() {
            warn!("reader not attached: stream already stopping");
            return false;
        }
        self.reader_count.fetch_add(1, Ordering::AcqRel);
        let handle = self.handle.spawn(fut);
        self.readers.lock().unwrap().push(handle);
        true
    }

    pub(crate) fn note_decode_error(&self, err: DecodeError) {
        debug!("packet dropped: {err}");
        self.inner.lock().unwrap().stats.decode_errors += 1;
    }

    /// Decode and fold one datagram. Readers call this for every datagram
    /// they receive; errors are counted, never surfaced.
    pub(crate) async fn add_packet(&self, data: &[u8]) {
        match decode_packet(data) {
            Ok(packet) => self.process(&packet).await,
            Err(err) => self.note_decode_error(err),
        }
    }

    /// Fold one decoded packet into the reassembler and deliver whatever
    /// it finished.
    pub(crate) async fn process(&self, packet: &PacketHeader<'_>) {
        let mut emitted: Vec<FrozenHeap> = Vec::new();
        let mut stop_after = false;
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.stopped {
                return;
            }
            inner.stats.packets += 1;
            let accepted = inner
                .reassembler
                .add_packet(packet, &mut |heap| emitted.push(heap));
            if !accepted {
                inner.stats.rejected_packets += 1;
            }
            let saw_stop = self.stop_on_stop
                && (emitted.iter().any(|h| h.is_end_of_stream())
                    || inner.reassembler.saw_end_of_stream());
            if saw_stop {
                inner.stopped = true;
                inner.reassembler.flush(&mut |heap| emitted.push(heap));
                stop_after = true;
            }
            count_emitted(&mut inner.stats, &emitted);
        }
        for heap in emitted {
            self.deliver(heap).await;
        }
        if stop_after {
            self.stop_from_reader("end-of-stream control item");
        }
    }

    /// Deliver one finished heap, waiting for ring space if need be. This
    /// is where back-pressure reaches the readers.
    async fn deliver(&self, heap: FrozenHeap) {
        match &self.sink {
            HeapSink::Ring(ring) => {
                if ring.push(heap).await.is_err() {
                    warn!("finished heap dropped: ring stopped");
                    self.inner.lock().unwrap().stats.dropped_heaps += 1;
                }
            }
            HeapSink::Callback(cb) => {
                let mut cb = cb.lock().unwrap();
                (*cb)(heap);
            }
        }
    }

    /// Best-effort delivery used on the stop path, where blocking on a
    /// consumer that may already be gone would deadlock the teardown.
    fn deliver_now(&self, heap: FrozenHeap) {
        match &self.sink {
            HeapSink::Ring(ring) => {
                if ring.try_push(heap).is_err() {
                    warn!("finished heap dropped at stop: ring unavailable");
                    self.inner.lock().unwrap().stats.dropped_heaps += 1;
                }
            }
            HeapSink::Callback(cb) => {
                let mut cb = cb.lock().unwrap();
                (*cb)(heap);
            }
        }
    }

    /// Reader-context half of stopping: the flush already happened under
    /// the caller's lock, so only signal and stop the ring. Never joins,
    /// because a reader cannot wait for itself.
    fn stop_from_reader(&self, reason: &str) {
        if self.stopping.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("stream stopped: {reason}");
        self.closer.close();
        if let HeapSink::Ring(ring) = &self.sink {
            ring.stop();
        }
    }

    /// Called by every reader on exit; the last one out stops the stream
    /// so a drained source (or a set of dead sockets) cannot leave the
    /// consumer blocked forever.
    pub(crate) async fn reader_finished(&self) {
        if self.reader_count.fetch_sub(1, Ordering::AcqRel) != 1 {
            return;
        }
        if self.is_stopping() {
            return;
        }
        let mut emitted = Vec::new();
        {
            let mut inner = self.inner.lock().unwrap();
            if !inner.stopped {
                inner.stopped = true;
                inner.reassembler.flush(&mut |heap| emitted.push(heap));
                count_emitted(&mut inner.stats, &emitted);
            }
        }
        for heap in emitted {
            self.deliver(heap).await;
        }
        self.stop_from_reader("all readers finished");
    }

    /// Consumer-side stop. Safe from any thread outside the pool;
    /// idempotent.
    fn stop_sync(&self, join: bool) {
        if !self.stopping.swap(true, Ordering::AcqRel) {
            info!("stopping stream");
            self.closer.close();
            let mut emitted = Vec::new();
            {
                let mut inner = self.inner.lock().unwrap();
                if !inner.stopped {
                    inner.stopped = true;
                    inner.reassembler.flush(&mut |heap| emitted.push(heap));
                    count_emitted(&mut inner.stats, &emitted);
                }
            }
            for heap in emitted {
                self.deliver_now(heap);
            }
            if let HeapSink::Ring(ring) = &self.sink {
                ring.stop();
            }
        }
        if join {
            let handles: Vec<_> = self.readers.lock().unwrap().drain(..).collect();
            if !handles.is_empty() {
                self.handle.block_on(async move {
                    for handle in handles {
                        let _ = handle.await;
                    }
                });
            }
        }
    }

    fn stats(&self) -> StreamStats {
        self.inner.lock().unwrap().stats
    }
}

fn count_emitted(stats: &mut StreamStats, emitted: &[FrozenHeap]) {
    for heap in emitted {
        stats.heaps += 1;
        if !heap.is_complete() {
            stats.incomplete_heaps += 1;
        }
    }
}

/// A receive stream delivering finished heaps over a bounded consumer
/// ring.
///
/// Attach readers, then call [`pop`](Self::pop) from a consumer thread
/// until it returns [`RingError::Stopped`].
pub struct RxStream {
    shared: Arc<StreamShared>,
    ring: Arc<Ring<FrozenHeap>>,
}

impl RxStream {
    pub fn new(pool: &ThreadPool, config: StreamConfig) -> Self {
        let ring = Arc::new(Ring::new(config.ring_heaps));
        let shared = StreamShared::new(pool, &config, HeapSink::Ring(ring.clone()));
        Self { shared, ring }
    }

    /// Attach a UDP reader. The socket is created and bound immediately;
    /// receiving starts right away on the stream's pool. Returns the bound
    /// local address.
    pub fn add_udp_reader(&self, config: UdpReaderConfig) -> io::Result<SocketAddr> {
        udp::spawn(self.shared.clone(), config)
    }

    /// Attach a reader that feeds packets from an in-memory buffer
    /// containing back-to-back datagrams. The stream stops (after
    /// flushing) when its last reader finishes, so a buffer-fed stream
    /// terminates on its own.
    pub fn add_buffer_reader(&self, data: Vec<u8>) {
        mem::spawn(self.shared.clone(), data);
    }

    /// Block until a finished heap is available, the oldest first.
    ///
    /// Once the stream has stopped and the ring is drained, returns
    /// [`RingError::Stopped`]. Call from consumer threads, never from the
    /// pool.
    pub fn pop(&self) -> Result<FrozenHeap, RingError> {
        self.ring.pop()
    }

    /// Non-blocking [`pop`](Self::pop).
    pub fn try_pop(&self) -> Result<FrozenHeap, RingError> {
        self.ring.try_pop()
    }

    /// Stop the stream: readers are told to wind down and waited for, the
    /// reassembler is flushed, and the ring stops accepting heaps.
    /// Idempotent; safe from any thread outside the pool.
    pub fn stop(&self) {
        self.shared.stop_sync(true);
    }

    pub fn stats(&self) -> StreamStats {
        self.shared.stats()
    }

    /// The bug-compatibility mask this stream was configured with.
    pub fn bug_compat(&self) -> u8 {
        self.shared.bug_compat
    }
}

impl Drop for RxStream {
    fn drop(&mut self) {
        // No join here: drop may run on a pool thread, where blocking on
        // reader tasks would deadlock. The tasks exit on the closed
        // wait-queue and stopped ring on their own.
        self.shared.stop_sync(false);
    }
}

/// A receive stream delivering finished heaps to a callback instead of a
/// ring.
///
/// The callback runs on the stream's pool, in emission order; keep it
/// short or the readers fall behind.
pub struct CallbackStream {
    shared: Arc<StreamShared>,
}

impl CallbackStream {
    pub fn new<F>(pool: &ThreadPool, config: StreamConfig, on_heap: F) -> Self
    where
        F: FnMut(FrozenHeap) + Send + 'static,
    {
        let shared = StreamShared::new(
            pool,
            &config,
            HeapSink::Callback(Mutex::new(Box::new(on_heap))),
        );
        Self { shared }
    }

    pub fn add_udp_reader(&self, config: UdpReaderConfig) -> io::Result<SocketAddr> {
        udp::spawn(self.shared.clone(), config)
    }

    pub fn add_buffer_reader(&self, data: Vec<u8>) {
        mem::spawn(self.shared.clone(), data);
    }

    /// Stop the stream and wait for its readers. Remaining live heaps are
    /// flushed through the callback first. Idempotent.
    pub fn stop(&self) {
        self.shared.stop_sync(true);
    }

    pub fn stats(&self) -> StreamStats {
        self.shared.stats()
    }

    pub fn bug_compat(&self) -> u8 {
        self.shared.bug_compat
    }
}

impl Drop for CallbackStream {
    fn drop(&mut self) {
        self.shared.stop_sync(false);
    }
}
