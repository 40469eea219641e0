//! In-memory source, for embedding and tests.

use std::collections::VecDeque;

use super::{CaptureSource, Frame, ReadOutcome};
use crate::domain::LinkType;
use crate::error::CaptureError;

/// Yields a fixed list of frames, then either EOF or a configured error.
pub struct MemorySource {
    link_type: LinkType,
    frames: VecDeque<Frame>,
    failure: Option<CaptureError>,
    endless: bool,
}

impl MemorySource {
    pub fn new(link_type: LinkType, frames: Vec<Frame>) -> Self {
        Self {
            link_type,
            frames: frames.into(),
            failure: None,
            endless: false,
        }
    }

    /// Fail with `error` once the frames are used up.
    pub fn with_failure(mut self, error: CaptureError) -> Self {
        self.failure = Some(error);
        self
    }

    /// Report timeouts instead of EOF once the frames are used up, like an
    /// idle live interface.
    pub fn endless(mut self) -> Self {
        self.endless = true;
        self
    }
}

impl CaptureSource for MemorySource {
    fn name(&self) -> &str {
        "memory"
    }

    fn link_type(&self) -> LinkType {
        self.link_type
    }

    fn next_frame(&mut self) -> Result<ReadOutcome, CaptureError> {
        if let Some(frame) = self.frames.pop_front() {
            return Ok(ReadOutcome::Frame(frame));
        }
        if let Some(error) = self.failure.take() {
            return Err(error);
        }
        if self.endless {
            std::thread::sleep(std::time::Duration::from_millis(5));
            return Ok(ReadOutcome::Timeout);
        }
        Ok(ReadOutcome::Eof)
    }
}
