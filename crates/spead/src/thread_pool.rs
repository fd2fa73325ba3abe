//! The reactor readers run on.
//!
//! One pool is typically shared by every stream in the process. It is an
//! explicit resource: construct it, hand it to streams, drop it when the
//! streams are gone. Nothing in this crate creates one behind your back.

use std::io;

use tokio::runtime;

/// A pool of I/O worker threads backing the readers of one or more
/// streams.
pub struct ThreadPool {
    rt: Option<runtime::Runtime>,
}

impl ThreadPool {
    /// Create a pool with `n_threads` workers. One is enough for most
    /// receivers; add workers when several streams must progress in
    /// parallel.
    pub fn new(n_threads: usize) -> io::Result<Self> {
        let rt = runtime::Builder::new_multi_thread()
            .worker_threads(n_threads.max(1))
            .thread_name("spead-rx")
            .enable_io()
            .enable_time()
            .build()?;
        Ok(Self { rt: Some(rt) })
    }

    pub(crate) fn handle(&self) -> runtime::Handle {
        // rt is only None transiently inside drop
        self.rt.as_ref().unwrap().handle().clone()
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        // A stream that was never stopped still has reader tasks parked on
        // their sockets; shutting down in the background keeps drop from
        // blocking on them.
        if let Some(rt) = self.rt.take() {
            rt.shutdown_background();
        }
    }
}
