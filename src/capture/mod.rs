//! Capture sources.
//!
//! A [`CaptureSource`] delivers raw frames of a fixed link type, from a live
//! interface ([`PnetCapture`]), a capture file ([`PcapFileSource`]) or
//! memory ([`MemorySource`]). Frames can be mirrored to a dump file with
//! [`Mirrored`].

mod dump;
mod memory;
mod pcap_file_source;
mod pnet_capture;

pub use dump::{DumpWriter, Mirrored};
pub use memory::MemorySource;
pub use pcap_file_source::{PcapFileSource, ReplayOptions};
pub use pnet_capture::PnetCapture;

use chrono::{DateTime, Utc};

use crate::config::CaptureConfig;
use crate::domain::LinkType;
use crate::error::CaptureError;

/// A raw frame as captured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub timestamp: DateTime<Utc>,
    pub data: Vec<u8>,
}

impl Frame {
    pub fn new(timestamp: DateTime<Utc>, data: Vec<u8>) -> Self {
        Self { timestamp, data }
    }
}

/// Result of one read.
#[derive(Debug)]
pub enum ReadOutcome {
    Frame(Frame),
    /// Nothing arrived within the source's read timeout.
    Timeout,
    /// The input is exhausted.
    Eof,
}

/// Trait for capture backends.
///
/// `next_frame` must return within a bounded time (reporting
/// [`ReadOutcome::Timeout`] when idle) so that stop requests are observed
/// promptly.
pub trait CaptureSource: Send {
    /// Interface name or file path, for logging.
    fn name(&self) -> &str;

    /// Link type of every frame this source yields.
    fn link_type(&self) -> LinkType;

    fn next_frame(&mut self) -> Result<ReadOutcome, CaptureError>;
}

impl<S: CaptureSource + ?Sized> CaptureSource for Box<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn link_type(&self) -> LinkType {
        (**self).link_type()
    }

    fn next_frame(&mut self) -> Result<ReadOutcome, CaptureError> {
        (**self).next_frame()
    }
}

/// Open the source selected by `config`: a file if one is set, otherwise a
/// device. Wraps it in a dump mirror when `dumpfile` is set.
pub fn open(config: &CaptureConfig) -> Result<Box<dyn CaptureSource>, CaptureError> {
    let source: Box<dyn CaptureSource> = if let Some(path) = &config.file {
        let options = ReplayOptions {
            loop_count: config.loop_count,
            top_speed: config.top_speed,
            one_at_a_time: config.one_at_a_time,
        };
        Box::new(PcapFileSource::open(path, options)?)
    } else if let Some(device) = &config.device {
        Box::new(PnetCapture::open(device, config.snaplen, config.buffer_size)?)
    } else {
        return Err(CaptureError::NoSource);
    };

    match &config.dumpfile {
        Some(path) => {
            let writer = DumpWriter::create(path, source.link_type(), config.snaplen)?;
            Ok(Box::new(Mirrored::new(source, writer)))
        }
        None => Ok(source),
    }
}
