//! Capture file replay.
//!
//! Replays a PCAP or PCAPNG file through the same handle contract as a live
//! capture, so the dispatcher cannot tell the two apart. The feed ends
//! cleanly at end of file. Filters are compiled with libpcap against a dead
//! handle of each frame's link type, which needs the `live` feature.

pub mod error;
pub mod layout;
pub mod parser;
pub mod reader;

use std::path::PathBuf;

use super::{CaptureBackend, CaptureError, CaptureHandle, FilterSpec, StopSignal};
use crate::config::CaptureConfig;
use crate::packet::{LinkKind, Packet};
use parser::{Frame, FrameReader};

/// Backend whose device names are capture file paths.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReplayBackend;

impl CaptureBackend for ReplayBackend {
    fn open(
        &self,
        device: &str,
        config: &CaptureConfig,
    ) -> Result<Box<dyn CaptureHandle>, CaptureError> {
        let path = PathBuf::from(device);
        let frames = FrameReader::open(&path).map_err(|e| CaptureError::Open {
            device: device.to_string(),
            message: e.to_string(),
        })?;
        log::info!("replaying {}", path.display());
        Ok(Box::new(ReplayHandle {
            path,
            frames,
            snaplen: usize::try_from(config.snaplen).unwrap_or(usize::MAX),
            filter: None,
        }))
    }
}

struct ReplayHandle {
    path: PathBuf,
    frames: FrameReader,
    snaplen: usize,
    filter: Option<FilterSpec>,
}

impl CaptureHandle for ReplayHandle {
    fn apply_filter(&mut self, filter: &FilterSpec) -> Result<(), CaptureError> {
        bpf::validate(&filter.expression)?;
        log::debug!("replay filter: {}", filter.expression);
        self.filter = Some(filter.clone());
        Ok(())
    }

    fn run_loop(
        &mut self,
        stop: &StopSignal,
        deliver: &mut dyn FnMut(Packet),
    ) -> Result<(), CaptureError> {
        let mut matcher = bpf::Matcher::new(self.filter.as_ref());
        let mut replayed = 0u64;
        while !stop.is_stopped() {
            let Some(mut frame) = self.frames.next_frame()? else {
                log::info!(
                    "replay of {} finished after {} packets",
                    self.path.display(),
                    replayed
                );
                return Ok(());
            };
            if !matcher.matches(&frame)? {
                continue;
            }
            frame.data.truncate(self.snaplen);
            replayed += 1;
            deliver(Packet::from_frame(
                LinkKind::from_code(frame.linktype.0),
                frame.ts,
                frame.data,
            ));
        }
        Ok(())
    }
}

#[cfg(feature = "live")]
mod bpf {
    use pcap::{BpfProgram, Capture, Linktype};

    use super::Frame;
    use crate::capture::{CaptureError, FilterSpec};

    pub(super) fn validate(expression: &str) -> Result<(), CaptureError> {
        compile(expression, Linktype::ETHERNET.0).map(|_| ())
    }

    fn compile(expression: &str, link: i32) -> Result<BpfProgram, CaptureError> {
        let filter_error = |e: pcap::Error| CaptureError::Filter {
            expression: expression.to_string(),
            message: e.to_string(),
        };
        Capture::dead(Linktype(link))
            .map_err(filter_error)?
            .compile(expression, true)
            .map_err(filter_error)
    }

    /// Filter compiled lazily for the link type of the frames at hand.
    pub(super) struct Matcher<'a> {
        expression: Option<&'a str>,
        compiled: Option<(i32, BpfProgram)>,
    }

    impl<'a> Matcher<'a> {
        pub(super) fn new(filter: Option<&'a FilterSpec>) -> Self {
            Self {
                expression: filter.map(|f| f.expression.as_str()),
                compiled: None,
            }
        }

        pub(super) fn matches(&mut self, frame: &Frame) -> Result<bool, CaptureError> {
            let Some(expression) = self.expression else {
                return Ok(true);
            };
            let link = frame.linktype.0;
            let current = matches!(&self.compiled, Some((compiled_for, _)) if *compiled_for == link);
            if !current {
                self.compiled = Some((link, compile(expression, link)?));
            }
            Ok(self
                .compiled
                .as_ref()
                .is_none_or(|(_, program)| program.filter(&frame.data)))
        }
    }
}

#[cfg(not(feature = "live"))]
mod bpf {
    use super::Frame;
    use crate::capture::{CaptureError, FilterSpec};

    pub(super) fn validate(_expression: &str) -> Result<(), CaptureError> {
        Err(CaptureError::Unsupported(
            "filtering a replay needs the `live` feature",
        ))
    }

    pub(super) struct Matcher;

    impl Matcher {
        pub(super) fn new(_filter: Option<&FilterSpec>) -> Self {
            Matcher
        }

        pub(super) fn matches(&mut self, _frame: &Frame) -> Result<bool, CaptureError> {
            Ok(true)
        }
    }
}
