//! Capture-file output in the format the capture utility writes.
//!
//! Plain pcap: nanosecond-magic file header, `DLT_EN10MB` link type, and
//! per-record headers with the timestamps zeroed. The capture path trades
//! timestamp fidelity for throughput, and the zeroes are part of the file
//! contract, so this writer never consults a clock.
//!
//! Field order follows the libpcap layout; multi-byte fields are written in
//! host byte order, which readers detect from the magic number.

use std::io::{self, Write};

/// Nanosecond-resolution pcap magic.
pub const PCAP_MAGIC: u32 = 0xa1b2_3c4d;
/// pcap format version written: 2.4.
pub const PCAP_VERSION: (u16, u16) = (2, 4);
/// Link type: DLT_EN10MB (Ethernet).
pub const PCAP_LINKTYPE: u32 = 1;

/// Default snap length, sized for jumbo frames.
pub const DEFAULT_SNAPLEN: u32 = 9230;

/// Writes Ethernet frames to a pcap capture file.
pub struct CaptureWriter<W: Write> {
    out: W,
    snaplen: u32,
}

impl<W: Write> CaptureWriter<W> {
    /// Write the file header and return the writer.
    pub fn new(mut out: W, snaplen: u32) -> io::Result<Self> {
        out.write_all(&PCAP_MAGIC.to_ne_bytes())?;
        out.write_all(&PCAP_VERSION.0.to_ne_bytes())?;
        out.write_all(&PCAP_VERSION.1.to_ne_bytes())?;
        out.write_all(&0i32.to_ne_bytes())?; // thiszone
        out.write_all(&0u32.to_ne_bytes())?; // sigfigs
        out.write_all(&snaplen.to_ne_bytes())?;
        out.write_all(&PCAP_LINKTYPE.to_ne_bytes())?;
        Ok(Self { out, snaplen })
    }

    /// Append one captured frame. Frames longer than the snap length are
    /// truncated in the file; `orig_len` records the on-wire size.
    pub fn write_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        let orig_len = frame.len() as u32;
        let incl_len = orig_len.min(self.snaplen);
        self.out.write_all(&0u32.to_ne_bytes())?; // ts_sec
        self.out.write_all(&0u32.to_ne_bytes())?; // ts_usec
        self.out.write_all(&incl_len.to_ne_bytes())?;
        self.out.write_all(&orig_len.to_ne_bytes())?;
        self.out.write_all(&frame[..incl_len as usize])
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }

    /// Flush and hand back the underlying writer.
    pub fn finish(mut self) -> io::Result<W> {
        self.out.flush()?;
        Ok(self.out)
    }
}
