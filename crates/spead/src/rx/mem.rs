//! The in-memory buffer reader.
//!
//! Walks a caller-provided buffer of back-to-back datagrams, feeding each
//! to the stream. SPEAD packets are self-framed (header + pointer table +
//! declared payload length), so the walk needs no external framing; it
//! ends at the first undecodable boundary or the end of the buffer. The
//! reader then finishes, and a stream whose readers have all finished
//! flushes and stops.

use std::sync::Arc;

use log::{debug, info};

use crate::rx::stream::StreamShared;
use crate::wire::decode_packet;

pub(crate) fn spawn(shared: Arc<StreamShared>, data: Vec<u8>) {
    let worker = RxWorker {
        shared: shared.clone(),
        data,
    };
    shared.spawn_reader(worker.run());
}

struct RxWorker {
    shared: Arc<StreamShared>,
    data: Vec<u8>,
}

impl RxWorker {
    async fn run(self) {
        info!("started buffer reader, {} bytes", self.data.len());
        let mut offset = 0;
        while offset < self.data.len() && !self.shared.is_stopping() {
            match decode_packet(&self.data[offset..]) {
                Ok(packet) => {
                    let size = packet.size();
                    self.shared.process(&packet).await;
                    offset += size;
                }
                Err(err) => {
                    // Without a packet header there is no next boundary to
                    // resync to.
                    debug!("buffer reader stopping at offset {offset}: {err}");
                    self.shared.note_decode_error(err);
                    break;
                }
            }
        }
        self.shared.reader_finished().await;
        info!("finished buffer reader");
    }
}
