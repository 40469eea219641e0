//! Raw-capture mirror.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::time::Duration;

use pcap_file::pcap::{PcapHeader, PcapPacket, PcapWriter};
use tracing::warn;

use super::{CaptureSource, Frame, ReadOutcome};
use crate::domain::LinkType;
use crate::error::CaptureError;

/// Writes frames to a pcap file.
pub struct DumpWriter {
    writer: PcapWriter<BufWriter<File>>,
}

impl DumpWriter {
    pub fn create(path: &Path, link_type: LinkType, snaplen: usize) -> Result<Self, CaptureError> {
        let file = File::create(path).map_err(|e| CaptureError::File {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let header = PcapHeader {
            datalink: link_type.to_datalink(),
            snaplen: u32::try_from(snaplen).unwrap_or(u32::MAX),
            ..PcapHeader::default()
        };
        let writer =
            PcapWriter::with_header(BufWriter::new(file), header).map_err(|e| CaptureError::File {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
        Ok(Self { writer })
    }

    pub fn write(&mut self, frame: &Frame) -> Result<(), CaptureError> {
        let secs = frame.timestamp.timestamp().max(0) as u64;
        let ts = Duration::new(secs, frame.timestamp.timestamp_subsec_nanos());
        let packet = PcapPacket::new(ts, frame.data.len() as u32, &frame.data);
        self.writer
            .write_packet(&packet)
            .map(|_| ())
            .map_err(|e| CaptureError::Read(format!("dump write failed: {}", e)))
    }
}

/// A source whose frames are also written to a dump file.
///
/// A failing dump write is logged and the frame is still delivered.
pub struct Mirrored<S> {
    inner: S,
    writer: DumpWriter,
}

impl<S: CaptureSource> Mirrored<S> {
    pub fn new(inner: S, writer: DumpWriter) -> Self {
        Self { inner, writer }
    }
}

impl<S: CaptureSource> CaptureSource for Mirrored<S> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn link_type(&self) -> LinkType {
        self.inner.link_type()
    }

    fn next_frame(&mut self) -> Result<ReadOutcome, CaptureError> {
        let outcome = self.inner.next_frame()?;
        if let ReadOutcome::Frame(frame) = &outcome {
            if let Err(e) = self.writer.write(frame) {
                warn!("{}", e);
            }
        }
        Ok(outcome)
    }
}
