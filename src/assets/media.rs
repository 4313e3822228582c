use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};

use crate::assets::decode::premultiply_rgba8_in_place;
use crate::foundation::core::{CanvasSize, Fps};
use crate::foundation::error::{AssetError, EngineResult, VideoError};
use crate::video::source::{FrameSource, VideoFrame, SourceInfo};

#[derive(Clone, Debug, PartialEq)]
/// Basic metadata about a source video file.
pub struct VideoSourceInfo {
    pub source_path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub fps: Fps,
    /// ffprobe `codec_name` of the first video stream.
    pub codec: String,
    /// ffprobe `format_name` (comma separated demuxer aliases).
    pub container: String,
    /// Stream frame count when the container records one.
    pub frame_count: Option<u64>,
    pub duration_micros: Option<u64>,
    /// Whether ffprobe detected at least one audio stream.
    pub has_audio: bool,
    /// ffprobe `codec_name` of the first audio stream.
    pub audio_codec: Option<String>,
}

/// Probe source video metadata through `ffprobe`.
#[tracing::instrument(skip(ffprobe_bin))]
pub fn probe_video(ffprobe_bin: &str, source_path: &Path) -> EngineResult<VideoSourceInfo> {
    #[derive(serde::Deserialize)]
    struct ProbeStream {
        codec_type: Option<String>,
        codec_name: Option<String>,
        width: Option<u32>,
        height: Option<u32>,
        avg_frame_rate: Option<String>,
        r_frame_rate: Option<String>,
        nb_frames: Option<String>,
    }
    #[derive(serde::Deserialize)]
    struct ProbeFormat {
        format_name: Option<String>,
        duration: Option<String>,
    }
    #[derive(serde::Deserialize)]
    struct ProbeOut {
        #[serde(default)]
        streams: Vec<ProbeStream>,
        format: Option<ProbeFormat>,
    }

    std::fs::metadata(source_path).map_err(|e| AssetError::from_io(source_path, e))?;

    let out = Command::new(ffprobe_bin)
        .args([
            "-v",
            "error",
            "-print_format",
            "json",
            "-show_streams",
            "-show_format",
        ])
        .arg(source_path)
        .output()
        .map_err(|e| VideoError::decode(format!("failed to run {ffprobe_bin}: {e}")))?;
    if !out.status.success() {
        return Err(VideoError::decode(format!(
            "ffprobe failed for '{}': {}",
            source_path.display(),
            String::from_utf8_lossy(&out.stderr).trim()
        ))
        .into());
    }

    let parsed: ProbeOut = serde_json::from_slice(&out.stdout)
        .map_err(|e| VideoError::decode(format!("ffprobe json parse failed: {e}")))?;
    let video_stream = parsed
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or_else(|| VideoError::decode("no video stream found"))?;
    let width = video_stream
        .width
        .ok_or_else(|| VideoError::decode("missing video width from ffprobe"))?;
    let height = video_stream
        .height
        .ok_or_else(|| VideoError::decode("missing video height from ffprobe"))?;
    let fps = video_stream
        .avg_frame_rate
        .as_deref()
        .and_then(parse_rational_fps)
        .or_else(|| video_stream.r_frame_rate.as_deref().and_then(parse_rational_fps))
        .ok_or_else(|| VideoError::decode("missing or zero video frame rate from ffprobe"))?;
    let audio_stream = parsed
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("audio"));
    let format = parsed.format.as_ref();

    Ok(VideoSourceInfo {
        source_path: source_path.to_path_buf(),
        width,
        height,
        fps,
        codec: video_stream.codec_name.clone().unwrap_or_default(),
        container: format
            .and_then(|f| f.format_name.clone())
            .unwrap_or_default(),
        frame_count: video_stream
            .nb_frames
            .as_deref()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|&n| n > 0),
        duration_micros: format
            .and_then(|f| f.duration.as_deref())
            .and_then(|d| d.parse::<f64>().ok())
            .filter(|d| d.is_finite() && *d >= 0.0)
            .map(|d| (d * 1_000_000.0).round() as u64),
        has_audio: audio_stream.is_some(),
        audio_codec: audio_stream.and_then(|s| s.codec_name.clone()),
    })
}

/// Parse an ffprobe rational such as `30000/1001`. `0/0` yields `None`.
pub fn parse_rational_fps(s: &str) -> Option<Fps> {
    let (num, den) = match s.trim().split_once('/') {
        Some((n, d)) => (n.trim().parse::<u32>().ok()?, d.trim().parse::<u32>().ok()?),
        None => (s.trim().parse::<u32>().ok()?, 1),
    };
    Fps::new(num, den).ok()
}

/// The decoder invocation behind [`FfmpegFrameReader::open`].
///
/// The `fps` filter resamples onto `probe.fps`, the same constant rate the encoder is fed at, so
/// variable-frame-rate sources keep their duration and frame `i` lands at `i / fps`.
pub(crate) fn decoder_command(
    ffmpeg_bin: &str,
    probe: &VideoSourceInfo,
    size: CanvasSize,
) -> Command {
    let mut filters = vec![format!("fps={}", probe.fps.to_rational_string())];
    if (size.width, size.height) != (probe.width, probe.height) {
        filters.push(format!("scale={}:{}", size.width, size.height));
    }

    let mut cmd = Command::new(ffmpeg_bin);
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .args(["-v", "error", "-i"])
        .arg(&probe.source_path)
        .args(["-map", "0:v:0", "-an", "-vf", &filters.join(",")])
        .args(["-f", "rawvideo", "-pix_fmt", "rgba", "pipe:1"]);
    cmd
}

/// Frames the `fps` filter will emit: duration times rate, else the container's count.
fn resampled_frame_count(probe: &VideoSourceInfo) -> Option<u64> {
    match probe.duration_micros {
        Some(us) if us > 0 => {
            let frames = us as f64 * probe.fps.as_f64() / 1_000_000.0;
            Some(frames.round() as u64)
        }
        _ => probe.frame_count,
    }
}

/// Streams raw frames out of an `ffmpeg` child, one decoded frame per `next_frame`.
///
/// Frames are never fully buffered; at most one frame's bytes are held here at a time.
pub struct FfmpegFrameReader {
    info: SourceInfo,
    source_path: PathBuf,
    child: Option<Child>,
    stdout: Option<ChildStdout>,
    stderr_drain: Option<std::thread::JoinHandle<std::io::Result<Vec<u8>>>>,
    next_index: u64,
    frame_len: usize,
}

impl FfmpegFrameReader {
    /// Spawn the decoder. When `size` differs from the source, ffmpeg scales each frame.
    pub fn open(
        ffmpeg_bin: &str,
        probe: &VideoSourceInfo,
        size: CanvasSize,
    ) -> Result<Self, VideoError> {
        let mut child = decoder_command(ffmpeg_bin, probe, size)
            .spawn().map_err(|source| VideoError::Spawn {
            program: ffmpeg_bin.to_string(),
            source,
        })?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| VideoError::decode("failed to open ffmpeg stdout (unexpected)"))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| VideoError::decode("failed to open ffmpeg stderr (unexpected)"))?;
        let stderr_drain = std::thread::spawn(move || {
            let mut stderr_bytes = Vec::new();
            stderr.read_to_end(&mut stderr_bytes)?;
            Ok(stderr_bytes)
        });

        Ok(Self {
            info: SourceInfo {
                size,
                fps: probe.fps,
                frame_count_hint: resampled_frame_count(probe),
            },
            source_path: probe.source_path.clone(),
            child: Some(child),
            stdout: Some(stdout),
            stderr_drain: Some(stderr_drain),
            next_index: 0,
            frame_len: size.byte_len(),
        })
    }

    fn finish(&mut self, kill: bool) -> Result<(), VideoError> {
        drop(self.stdout.take());
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        if kill {
            let _ = child.kill();
        }
        let status = child
            .wait()
            .map_err(|e| VideoError::decode(format!("failed to wait for ffmpeg: {e}")))?;
        let stderr_bytes = match self.stderr_drain.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| VideoError::decode("ffmpeg stderr drain thread panicked"))?
                .unwrap_or_default(),
            None => Vec::new(),
        };
        if !kill && !status.success() {
            return Err(VideoError::decode(format!(
                "ffmpeg decode of '{}' exited with {status}: {}",
                self.source_path.display(),
                String::from_utf8_lossy(&stderr_bytes).trim()
            )));
        }
        Ok(())
    }
}

impl FrameSource for FfmpegFrameReader {
    fn info(&self) -> SourceInfo {
        self.info
    }

    fn next_frame(&mut self) -> Result<Option<VideoFrame>, VideoError> {
        let Some(stdout) = self.stdout.as_mut() else {
            return Ok(None);
        };

        let mut pixels = vec![0u8; self.frame_len];
        let mut filled = 0usize;
        while filled < pixels.len() {
            match stdout.read(&mut pixels[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(VideoError::decode(format!("read ffmpeg stdout: {e}"))),
            }
        }

        if filled == 0 {
            self.finish(false)?;
            return Ok(None);
        }
        if filled < pixels.len() {
            self.finish(true)?;
            return Err(VideoError::decode(format!(
                "truncated frame {} from '{}': got {filled} of {} bytes",
                self.next_index,
                self.source_path.display(),
                self.frame_len
            )));
        }

        premultiply_rgba8_in_place(&mut pixels);
        let index = self.next_index;
        self.next_index += 1;
        Ok(Some(VideoFrame {
            index,
            timestamp_micros: self.info.fps.frame_timestamp_micros(index),
            pixels,
        }))
    }

    fn close(&mut self) -> Result<(), VideoError> {
        // Stopping early (preview, cancellation, failure) kills the decoder rather than
        // waiting for it to drain the rest of the file.
        let early = self.stdout.is_some();
        self.finish(early)
    }
}

impl Drop for FfmpegFrameReader {
    fn drop(&mut self) {
        if self.child.is_some() {
            let _ = self.finish(true);
        }
    }
}

/// Return `true` when `bin -version` runs successfully.
pub fn is_tool_available(bin: &str) -> bool {
    Command::new(bin)
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}
