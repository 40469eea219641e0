//! Replay of pcap capture files.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use pcap_file::pcap::PcapReader;
use tracing::{debug, info};

use super::{CaptureSource, Frame, ReadOutcome};
use crate::domain::LinkType;
use crate::error::CaptureError;

/// Longest single wait while pacing, so that stop requests stay responsive.
const MAX_PACING_WAIT: Duration = Duration::from_millis(100);

/// How a capture file is replayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayOptions {
    /// Number of passes over the file, 0 replays forever.
    pub loop_count: u32,
    /// Ignore capture timestamps and read as fast as possible.
    pub top_speed: bool,
    /// Wait for a line on the step input before each frame.
    pub one_at_a_time: bool,
}

impl Default for ReplayOptions {
    fn default() -> Self {
        Self {
            loop_count: 1,
            top_speed: true,
            one_at_a_time: false,
        }
    }
}

/// A frame held back until its pacing deadline.
struct Pending {
    frame: Frame,
    due: Instant,
}

pub struct PcapFileSource {
    path: PathBuf,
    name: String,
    options: ReplayOptions,
    link_type: LinkType,
    reader: PcapReader<BufReader<File>>,
    passes: u32,
    /// Capture timestamp and wall-clock instant of the previous frame.
    last: Option<(Duration, Instant)>,
    pending: Option<Pending>,
    step_input: Option<Box<dyn BufRead + Send>>,
}

impl PcapFileSource {
    pub fn open(path: &Path, options: ReplayOptions) -> Result<Self, CaptureError> {
        let reader = open_reader(path)?;
        let link_type = LinkType::try_from(reader.header().datalink)?;
        let step_input: Option<Box<dyn BufRead + Send>> = if options.one_at_a_time {
            Some(Box::new(BufReader::new(std::io::stdin())))
        } else {
            None
        };

        info!("Replaying {} ({})", path.display(), link_type);

        Ok(Self {
            path: path.to_path_buf(),
            name: path.display().to_string(),
            options,
            link_type,
            reader,
            passes: 1,
            last: None,
            pending: None,
            step_input,
        })
    }

    /// Read step confirmations from `input` instead of stdin.
    pub fn with_step_input(mut self, input: Box<dyn BufRead + Send>) -> Self {
        if self.options.one_at_a_time {
            self.step_input = Some(input);
        }
        self
    }

    fn read_next(&mut self) -> Result<Option<(Duration, Vec<u8>)>, CaptureError> {
        loop {
            let next = self
                .reader
                .next_packet()
                .map(|r| r.map(|packet| (packet.timestamp, packet.data.into_owned())));
            match next {
                Some(Ok(packet)) => return Ok(Some(packet)),
                Some(Err(e)) => return Err(file_error(&self.path, e)),
                None => {
                    let more = self.options.loop_count == 0 || self.passes < self.options.loop_count;
                    if !more {
                        return Ok(None);
                    }
                    self.passes += 1;
                    debug!("Restarting {} (pass {})", self.name, self.passes);
                    self.reader = open_reader(&self.path)?;
                    self.last = None;
                }
            }
        }
    }

    /// Wall-clock instant at which a frame captured at `ts` is due.
    fn due(&mut self, ts: Duration) -> Instant {
        let now = Instant::now();
        let due = match self.last {
            Some((prev_ts, prev_at)) if !self.options.top_speed => {
                prev_at + ts.saturating_sub(prev_ts)
            }
            _ => now,
        };
        self.last = Some((ts, due.max(now)));
        due
    }

    fn wait_for_step(&mut self) {
        if let Some(input) = self.step_input.as_mut() {
            info!("Press enter to read next packet");
            let mut line = String::new();
            // A closed input ends stepping.
            if matches!(input.read_line(&mut line), Ok(0) | Err(_)) {
                self.step_input = None;
            }
        }
    }
}

impl CaptureSource for PcapFileSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn link_type(&self) -> LinkType {
        self.link_type
    }

    fn next_frame(&mut self) -> Result<ReadOutcome, CaptureError> {
        let pending = match self.pending.take() {
            Some(pending) => pending,
            None => match self.read_next()? {
                Some((ts, data)) => {
                    let due = self.due(ts);
                    Pending {
                        frame: Frame::new(to_datetime(ts), data),
                        due,
                    }
                }
                None => return Ok(ReadOutcome::Eof),
            },
        };

        let now = Instant::now();
        if pending.due > now {
            std::thread::sleep((pending.due - now).min(MAX_PACING_WAIT));
            if pending.due > Instant::now() {
                self.pending = Some(pending);
                return Ok(ReadOutcome::Timeout);
            }
        }

        self.wait_for_step();
        Ok(ReadOutcome::Frame(pending.frame))
    }
}

fn open_reader(path: &Path) -> Result<PcapReader<BufReader<File>>, CaptureError> {
    let file = File::open(path).map_err(|e| CaptureError::File {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    PcapReader::new(BufReader::new(file)).map_err(|e| file_error(path, e))
}

fn file_error(path: &Path, e: pcap_file::PcapError) -> CaptureError {
    CaptureError::File {
        path: path.to_path_buf(),
        message: e.to_string(),
    }
}

fn to_datetime(ts: Duration) -> DateTime<Utc> {
    DateTime::from_timestamp(ts.as_secs() as i64, ts.subsec_nanos()).unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::DumpWriter;
    use std::io::Cursor;
    use tempfile::TempDir;

    fn write_capture(dir: &TempDir, frames: &[(u64, &[u8])]) -> PathBuf {
        let path = dir.path().join("test.pcap");
        let mut writer = DumpWriter::create(&path, LinkType::Ethernet, 65535).unwrap();
        for (millis, data) in frames {
            let ts = DateTime::from_timestamp_millis(1_700_000_000_000 + *millis as i64).unwrap();
            writer.write(&Frame::new(ts, data.to_vec())).unwrap();
        }
        path
    }

    fn collect(source: &mut PcapFileSource) -> Vec<Frame> {
        let mut frames = Vec::new();
        loop {
            match source.next_frame().unwrap() {
                ReadOutcome::Frame(frame) => frames.push(frame),
                ReadOutcome::Timeout => continue,
                ReadOutcome::Eof => return frames,
            }
        }
    }

    mod replay {
        use super::*;

        #[test]
        fn test_reads_frames_in_order() {
            let dir = TempDir::new().unwrap();
            let path = write_capture(&dir, &[(0, b"first"), (10, b"second")]);
            let mut source = PcapFileSource::open(&path, ReplayOptions::default()).unwrap();

            assert_eq!(source.link_type(), LinkType::Ethernet);
            let frames = collect(&mut source);
            assert_eq!(frames.len(), 2);
            assert_eq!(frames[0].data, b"first");
            assert_eq!(frames[1].data, b"second");
            assert_eq!(
                (frames[1].timestamp - frames[0].timestamp).num_milliseconds(),
                10
            );
        }

        #[test]
        fn test_loop_count() {
            let dir = TempDir::new().unwrap();
            let path = write_capture(&dir, &[(0, b"a"), (1, b"b")]);
            let options = ReplayOptions {
                loop_count: 3,
                ..ReplayOptions::default()
            };
            let mut source = PcapFileSource::open(&path, options).unwrap();
            assert_eq!(collect(&mut source).len(), 6);
        }

        #[test]
        fn test_loop_forever_keeps_reading() {
            let dir = TempDir::new().unwrap();
            let path = write_capture(&dir, &[(0, b"a")]);
            let options = ReplayOptions {
                loop_count: 0,
                ..ReplayOptions::default()
            };
            let mut source = PcapFileSource::open(&path, options).unwrap();
            for _ in 0..10 {
                assert!(matches!(source.next_frame().unwrap(), ReadOutcome::Frame(_)));
            }
        }

        #[test]
        fn test_realtime_pacing_waits() {
            let dir = TempDir::new().unwrap();
            let path = write_capture(&dir, &[(0, b"a"), (150, b"b")]);
            let options = ReplayOptions {
                top_speed: false,
                ..ReplayOptions::default()
            };
            let mut source = PcapFileSource::open(&path, options).unwrap();
            let started = Instant::now();
            assert_eq!(collect(&mut source).len(), 2);
            assert!(started.elapsed() >= Duration::from_millis(140));
        }

        #[test]
        fn test_one_at_a_time_consumes_lines() {
            let dir = TempDir::new().unwrap();
            let path = write_capture(&dir, &[(0, b"a"), (1, b"b"), (2, b"c")]);
            let options = ReplayOptions {
                one_at_a_time: true,
                ..ReplayOptions::default()
            };
            let input = Cursor::new(b"\n\n".to_vec());
            let mut source = PcapFileSource::open(&path, options)
                .unwrap()
                .with_step_input(Box::new(input));

            // Two confirmations, then the closed input ends stepping.
            assert_eq!(collect(&mut source).len(), 3);
            assert!(source.step_input.is_none());
        }
    }

    #[test]
    fn test_not_a_pcap_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bogus.pcap");
        std::fs::write(&path, b"definitely not a capture").unwrap();
        let result = PcapFileSource::open(&path, ReplayOptions::default());
        assert!(matches!(result, Err(CaptureError::File { .. })));
    }
}
