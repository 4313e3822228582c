use crate::foundation::core::{CanvasSize, Fps};
use crate::foundation::error::VideoError;
use crate::video::source::VideoFrame;

/// Configuration provided to a [`FrameSink`] before the first frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SinkConfig {
    pub size: CanvasSize,
    pub fps: Fps,
}

/// Consumer of composited frames.
///
/// Ordering contract: `push_frame` is called with strictly increasing `VideoFrame::index`.
/// After `begin`, exactly one of `end` (success) or `abort` (failure) is called.
pub trait FrameSink: Send {
    fn begin(&mut self, cfg: SinkConfig) -> Result<(), VideoError>;
    fn push_frame(&mut self, frame: &VideoFrame) -> Result<(), VideoError>;
    fn end(&mut self) -> Result<(), VideoError>;
    /// Discard everything written so far. Must not fail.
    fn abort(&mut self);
}

/// In-memory sink for tests and preview stills.
#[derive(Debug, Default)]
pub struct InMemorySink {
    cfg: Option<SinkConfig>,
    /// Frames in timeline order.
    pub frames: Vec<VideoFrame>,
    pub ended: bool,
    pub aborted: bool,
    fail_at: Option<u64>,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail with an encode error when the frame with this index arrives.
    pub fn failing_at(index: u64) -> Self {
        Self {
            fail_at: Some(index),
            ..Self::default()
        }
    }

    pub fn config(&self) -> Option<SinkConfig> {
        self.cfg
    }
}

impl FrameSink for InMemorySink {
    fn begin(&mut self, cfg: SinkConfig) -> Result<(), VideoError> {
        self.cfg = Some(cfg);
        self.frames.clear();
        self.ended = false;
        self.aborted = false;
        Ok(())
    }

    fn push_frame(&mut self, frame: &VideoFrame) -> Result<(), VideoError> {
        let cfg = self
            .cfg
            .ok_or_else(|| VideoError::encode("in-memory sink not started"))?;
        if self.fail_at == Some(frame.index) {
            return Err(VideoError::encode(format!(
                "synthetic encode failure at frame {}",
                frame.index
            )));
        }
        if let Some(last) = self.frames.last()
            && frame.index <= last.index
        {
            return Err(VideoError::encode("sink received out-of-order frame index"));
        }
        if frame.pixels.len() != cfg.size.byte_len() {
            return Err(VideoError::encode(format!(
                "frame {} has {} bytes, expected {}",
                frame.index,
                frame.pixels.len(),
                cfg.size.byte_len()
            )));
        }
        self.frames.push(frame.clone());
        Ok(())
    }

    fn end(&mut self) -> Result<(), VideoError> {
        self.ended = true;
        Ok(())
    }

    fn abort(&mut self) {
        self.frames.clear();
        self.aborted = true;
    }
}
