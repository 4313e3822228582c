use std::collections::VecDeque;

use crate::foundation::core::{CanvasSize, Fps};
use crate::foundation::error::VideoError;

/// Static properties of a frame source.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SourceInfo {
    pub size: CanvasSize,
    pub fps: Fps,
    /// Frame count if the container records it; used for progress only.
    pub frame_count_hint: Option<u64>,
}

/// One frame, premultiplied RGBA8 at `SourceInfo::size`, from decode through encode.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VideoFrame {
    pub index: u64,
    pub timestamp_micros: u64,
    pub pixels: Vec<u8>,
}

/// Sequential frame producer feeding the video pipeline.
///
/// Frames come out in strictly increasing index order starting at 0.
pub trait FrameSource: Send {
    fn info(&self) -> SourceInfo;
    /// `Ok(None)` at end of stream.
    fn next_frame(&mut self) -> Result<Option<VideoFrame>, VideoError>;
    /// Release the underlying decoder. Safe to call before the stream ends.
    fn close(&mut self) -> Result<(), VideoError>;
}

/// In-memory source for tests and previews of synthetic clips.
#[derive(Debug)]
pub struct MemorySource {
    info: SourceInfo,
    frames: VecDeque<Vec<u8>>,
    next_index: u64,
    /// Fail with a decode error when this index would be produced.
    fail_at: Option<u64>,
}

impl MemorySource {
    pub fn new(size: CanvasSize, fps: Fps, frames: Vec<Vec<u8>>) -> Self {
        Self {
            info: SourceInfo {
                size,
                fps,
                frame_count_hint: Some(frames.len() as u64),
            },
            frames: frames.into(),
            next_index: 0,
            fail_at: None,
        }
    }

    /// `count` frames whose pixels are filled with their own index (opaque).
    pub fn numbered(size: CanvasSize, fps: Fps, count: u64) -> Self {
        let frames = (0..count)
            .map(|i| {
                let v = (i % 256) as u8;
                let mut px = vec![v; size.byte_len()];
                for a in px.chunks_exact_mut(4) {
                    a[3] = 255;
                }
                px
            })
            .collect();
        Self::new(size, fps, frames)
    }

    pub fn failing_at(mut self, index: u64) -> Self {
        self.fail_at = Some(index);
        self
    }
}

impl FrameSource for MemorySource {
    fn info(&self) -> SourceInfo {
        self.info
    }

    fn next_frame(&mut self) -> Result<Option<VideoFrame>, VideoError> {
        if self.fail_at == Some(self.next_index) {
            return Err(VideoError::decode(format!(
                "synthetic decode failure at frame {}",
                self.next_index
            )));
        }
        let Some(pixels) = self.frames.pop_front() else {
            return Ok(None);
        };
        if pixels.len() != self.info.size.byte_len() {
            return Err(VideoError::decode(format!(
                "frame {} has {} bytes, expected {}",
                self.next_index,
                pixels.len(),
                self.info.size.byte_len()
            )));
        }
        let index = self.next_index;
        self.next_index += 1;
        Ok(Some(VideoFrame {
            index,
            timestamp_micros: self.info.fps.frame_timestamp_micros(index),
            pixels,
        }))
    }

    fn close(&mut self) -> Result<(), VideoError> {
        self.frames.clear();
        Ok(())
    }
}

#[cfg(test)]
#[path = "../../tests/unit/video/source.rs"]
mod tests;
