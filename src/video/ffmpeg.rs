use std::io::{Read, Write as _};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, Command, Stdio};

use crate::foundation::error::VideoError;
use crate::foundation::math::mul_div255_u16;
use crate::template::job::{Container, VideoCodec};
use crate::video::sink::{FrameSink, SinkConfig};
use crate::video::source::VideoFrame;

/// Options for [`FfmpegSink`].
#[derive(Clone, Debug)]
pub struct FfmpegSinkOpts {
    pub ffmpeg_bin: String,
    /// Output file. Written in place; callers stage and rename.
    pub out_path: PathBuf,
    pub container: Container,
    pub codec: VideoCodec,
    /// Background used to flatten alpha (RGBA8, straight alpha).
    pub bg_rgba: [u8; 4],
    /// Source file whose first audio stream is copied into the output.
    pub audio_source: Option<PathBuf>,
}

impl FfmpegSinkOpts {
    pub fn new(out_path: impl Into<PathBuf>, container: Container, codec: VideoCodec) -> Self {
        Self {
            ffmpeg_bin: "ffmpeg".to_string(),
            out_path: out_path.into(),
            container,
            codec,
            bg_rgba: [0, 0, 0, 255],
            audio_source: None,
        }
    }
}

/// Sink that spawns `ffmpeg` and streams flattened RGBA frames to its stdin.
pub struct FfmpegSink {
    opts: FfmpegSinkOpts,

    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stderr_drain: Option<std::thread::JoinHandle<std::io::Result<Vec<u8>>>>,

    scratch: Vec<u8>,
    cfg: Option<SinkConfig>,
    last_idx: Option<u64>,
}

impl FfmpegSink {
    pub fn new(opts: FfmpegSinkOpts) -> Self {
        Self {
            opts,
            child: None,
            stdin: None,
            stderr_drain: None,
            scratch: Vec::new(),
            cfg: None,
            last_idx: None,
        }
    }

    fn command(&self, cfg: SinkConfig) -> Command {
        let mut cmd = Command::new(&self.opts.ffmpeg_bin);
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        // Input 0: raw RGBA8 frames, already flattened to opaque in push_frame.
        cmd.args([
            "-y",
            "-loglevel",
            "error",
            "-f",
            "rawvideo",
            "-pix_fmt",
            "rgba",
            "-s",
            &format!("{}x{}", cfg.size.width, cfg.size.height),
            "-r",
            &cfg.fps.to_rational_string(),
            "-i",
            "pipe:0",
        ]);

        match self.opts.audio_source.as_ref() {
            Some(audio) => {
                cmd.arg("-i")
                    .arg(audio)
                    .args(["-map", "0:v:0", "-map", "1:a:0?", "-c:a", "copy"]);
            }
            None => {
                cmd.arg("-an");
            }
        }

        cmd.args([
            "-c:v",
            self.opts.codec.encoder(),
            "-pix_fmt",
            "yuv420p",
        ]);
        if matches!(self.opts.container, Container::Mp4 | Container::Mov) {
            cmd.args(["-movflags", "+faststart"]);
        }
        cmd.args(["-f", self.opts.container.muxer()])
            .arg(&self.opts.out_path);
        cmd
    }

    fn join_stderr(&mut self) -> String {
        match self.stderr_drain.take().map(|h| h.join()) {
            Some(Ok(Ok(bytes))) => String::from_utf8_lossy(&bytes).trim().to_string(),
            Some(Ok(Err(e))) => format!("<stderr read failed: {e}>"),
            Some(Err(_)) => "<stderr drain thread panicked>".to_string(),
            None => String::new(),
        }
    }
}

impl FrameSink for FfmpegSink {
    fn begin(&mut self, cfg: SinkConfig) -> Result<(), VideoError> {
        if !self.opts.container.supports(self.opts.codec) {
            return Err(VideoError::UnsupportedCodec {
                codec: self.opts.codec.name().to_string(),
                container: self.opts.container.muxer().to_string(),
            });
        }
        if !cfg.size.width.is_multiple_of(2) || !cfg.size.height.is_multiple_of(2) {
            return Err(VideoError::encode(format!(
                "output size {}x{} must be even for yuv420p encoding",
                cfg.size.width, cfg.size.height
            )));
        }

        let mut child = self.command(cfg).spawn().map_err(|source| VideoError::Spawn {
            program: self.opts.ffmpeg_bin.clone(),
            source,
        })?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| VideoError::encode("failed to open ffmpeg stdin"))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| VideoError::encode("failed to open ffmpeg stderr"))?;
        let stderr_drain = std::thread::spawn(move || {
            let mut stderr_bytes = Vec::new();
            stderr.read_to_end(&mut stderr_bytes)?;
            Ok(stderr_bytes)
        });

        tracing::debug!(
            out = %self.opts.out_path.display(),
            codec = self.opts.codec.name(),
            container = self.opts.container.muxer(),
            audio = self.opts.audio_source.is_some(),
            "ffmpeg encoder started"
        );
        self.scratch = vec![0u8; cfg.size.byte_len()];
        self.child = Some(child);
        self.stdin = Some(stdin);
        self.stderr_drain = Some(stderr_drain);
        self.cfg = Some(cfg);
        self.last_idx = None;
        Ok(())
    }

    fn push_frame(&mut self, frame: &VideoFrame) -> Result<(), VideoError> {
        if self.cfg.is_none() {
            return Err(VideoError::encode("ffmpeg sink not started"));
        }
        if let Some(last) = self.last_idx
            && frame.index <= last
        {
            return Err(VideoError::encode(
                "ffmpeg sink received out-of-order frame index",
            ));
        }
        self.last_idx = Some(frame.index);

        if frame.pixels.len() != self.scratch.len() {
            return Err(VideoError::encode(format!(
                "frame {} has {} bytes, expected {}",
                frame.index,
                frame.pixels.len(),
                self.scratch.len()
            )));
        }
        flatten_premul_over_bg(&mut self.scratch, &frame.pixels, self.opts.bg_rgba);

        let Some(stdin) = self.stdin.as_mut() else {
            return Err(VideoError::encode("ffmpeg sink is already finalized"));
        };
        if let Err(e) = stdin.write_all(&self.scratch) {
            // A broken pipe means ffmpeg exited; its stderr says why.
            drop(self.stdin.take());
            if let Some(mut child) = self.child.take() {
                let _ = child.wait();
            }
            let stderr = self.join_stderr();
            return Err(VideoError::encode(format!(
                "failed to write frame {} to ffmpeg: {e}: {stderr}",
                frame.index
            )));
        }
        Ok(())
    }

    fn end(&mut self) -> Result<(), VideoError> {
        drop(self.stdin.take());
        let mut child = self
            .child
            .take()
            .ok_or_else(|| VideoError::encode("ffmpeg sink not started"))?;
        let status = child
            .wait()
            .map_err(|e| VideoError::encode(format!("failed to wait for ffmpeg: {e}")))?;
        let stderr = self.join_stderr();
        self.cfg = None;

        if !status.success() {
            return Err(VideoError::encode(format!(
                "ffmpeg exited with status {status}: {stderr}"
            )));
        }
        Ok(())
    }

    fn abort(&mut self) {
        drop(self.stdin.take());
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
        let _ = self.join_stderr();
        self.cfg = None;
        match std::fs::remove_file(&self.opts.out_path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(
                path = %self.opts.out_path.display(),
                error = %e,
                "failed to remove partial video output"
            ),
        }
    }
}

impl Drop for FfmpegSink {
    fn drop(&mut self) {
        if self.child.is_some() {
            self.abort();
        }
    }
}

/// Flatten premultiplied RGBA8 over an opaque background.
pub(crate) fn flatten_premul_over_bg(dst: &mut [u8], src_premul: &[u8], bg_rgba: [u8; 4]) {
    let bg_r = u16::from(bg_rgba[0]);
    let bg_g = u16::from(bg_rgba[1]);
    let bg_b = u16::from(bg_rgba[2]);

    for (d, s) in dst.chunks_exact_mut(4).zip(src_premul.chunks_exact(4)) {
        let a = u16::from(s[3]);
        if a == 255 {
            d.copy_from_slice(s);
            continue;
        }

        let inv = 255u16 - a;
        let r = u16::from(s[0]) + mul_div255_u16(bg_r, inv);
        let g = u16::from(s[1]) + mul_div255_u16(bg_g, inv);
        let b = u16::from(s[2]) + mul_div255_u16(bg_b, inv);

        d[0] = r.min(255) as u8;
        d[1] = g.min(255) as u8;
        d[2] = b.min(255) as u8;
        d[3] = 255;
    }
}

#[cfg(test)]
#[path = "../../tests/unit/video/ffmpeg.rs"]
mod tests;
