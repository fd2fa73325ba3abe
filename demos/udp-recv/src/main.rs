//! Listen for SPEAD heaps on a UDP port and print what arrives.
//!
//! ```sh
//! udp-recv [bind-addr]      # default 0.0.0.0:8888
//! ```
//!
//! Runs until the sender transmits a stream-stop control item.

use std::net::SocketAddr;

use spead::rx::{RxStream, StreamConfig, UdpReaderConfig};
use spead::{MemoryPool, ThreadPool};

fn main() {
    env_logger::init();

    let bind: SocketAddr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "0.0.0.0:8888".into())
        .parse()
        .expect("bind address");

    let pool = ThreadPool::new(1).expect("thread pool");
    let memory = MemoryPool::new(8, 32 * 1024 * 1024).warm(4);
    let stream = RxStream::new(
        &pool,
        StreamConfig::new().with_max_heaps(8).with_memory_pool(memory),
    );
    stream
        .add_udp_reader(UdpReaderConfig::new(bind))
        .expect("bind udp reader");
    eprintln!("listening on {bind}");

    while let Ok(heap) = stream.pop() {
        println!(
            "heap {}: {} bytes, complete={} end_of_stream={}",
            heap.heap_cnt(),
            heap.received_length(),
            heap.is_complete(),
            heap.is_end_of_stream(),
        );
        for item in heap.items() {
            println!("  item 0x{:x}: {} bytes", item.id(), item.bytes().len());
        }
    }

    let stats = stream.stats();
    eprintln!(
        "done: {} packets, {} heaps ({} incomplete), {} decode errors",
        stats.packets, stats.heaps, stats.incomplete_heaps, stats.decode_errors
    );
}
