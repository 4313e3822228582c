use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;

use rayon::prelude::*;

use crate::foundation::cancel::CancellationToken;
use crate::foundation::config::EngineConfig;
use crate::foundation::core::CanvasSize;
use crate::foundation::error::{EngineError, EngineResult, VideoError};
use crate::render::canvas::Canvas;
use crate::render::compositor::{PreparedLayer, apply_layers, flatten_normal_layers};
use crate::video::reorder::ReorderBuffer;
use crate::video::sink::{FrameSink, SinkConfig};
use crate::video::source::{FrameSource, VideoFrame};

/// Lifecycle of one video job.
///
/// `Opened -> Demuxing -> Muxed -> Closed`; `Failed` is reachable from any non-terminal state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobState {
    Opened,
    Demuxing,
    Muxed,
    Closed,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }

    pub fn can_advance_to(self, next: JobState) -> bool {
        match (self, next) {
            (Self::Opened, Self::Demuxing)
            | (Self::Demuxing, Self::Muxed)
            | (Self::Muxed, Self::Closed) => true,
            (s, Self::Failed) => !s.is_terminal(),
            _ => false,
        }
    }
}

/// Per-frame progress marker, used in trace events.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameStage {
    Decoded,
    Composited,
    Encoded,
}

/// Which source frames reach the sink.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FrameSelection {
    #[default]
    All,
    /// Source indices `start..end`.
    Range { start: u64, end: u64 },
    /// Indices `0, n, 2n, ...`.
    EveryNth(u64),
}

impl FrameSelection {
    pub fn validate(self) -> EngineResult<()> {
        match self {
            Self::Range { start, end } if start >= end => Err(EngineError::config(format!(
                "frame range {start}..{end} is empty"
            ))),
            Self::EveryNth(0) => Err(EngineError::config("frame step must be >= 1")),
            _ => Ok(()),
        }
    }

    pub fn contains(self, index: u64) -> bool {
        match self {
            Self::All => true,
            Self::Range { start, end } => (start..end).contains(&index),
            Self::EveryNth(n) => n > 0 && index.is_multiple_of(n),
        }
    }

    /// True once no index after `index` can be selected.
    pub fn exhausted_after(self, index: u64) -> bool {
        match self {
            Self::Range { end, .. } => index + 1 >= end,
            _ => false,
        }
    }

    /// Number of selected frames given the source's frame count, if known.
    pub fn expected_count(self, total: Option<u64>) -> Option<u64> {
        let total = total?;
        Some(match self {
            Self::All => total,
            Self::Range { start, end } => end.min(total).saturating_sub(start),
            Self::EveryNth(n) => total.div_ceil(n.max(1)),
        })
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VideoStats {
    pub frames_decoded: u64,
    pub frames_composited: u64,
    pub frames_encoded: u64,
    /// Overlay layers applied to each frame after precomposition.
    pub overlay_layers: usize,
    pub overlay_precomposed: bool,
    pub duration_micros: u64,
}

#[derive(Clone, Debug)]
pub struct PipelineOptions {
    /// Worker threads for per-frame compositing. `None` uses all cores.
    pub threads: Option<usize>,
    /// Frames in flight per worker; bounds the channel and the reorder buffer.
    pub reorder_multiplier: usize,
    pub selection: FrameSelection,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            threads: None,
            reorder_multiplier: 2,
            selection: FrameSelection::All,
        }
    }
}

impl PipelineOptions {
    pub fn from_config(cfg: &EngineConfig) -> Self {
        Self {
            threads: cfg.worker_threads,
            reorder_multiplier: cfg.reorder_multiplier,
            selection: FrameSelection::All,
        }
    }
}

/// Callback receiving `(frames_encoded, frames_expected)`. Runs on the encoder thread.
pub type ProgressFn<'a> = &'a (dyn Fn(u64, Option<u64>) + Sync);

/// Composites a static overlay onto every frame of a source and streams the result to a sink.
///
/// Decoding and sink writes are sequential; compositing runs on a rayon pool. Frames reach the
/// sink in source order through a bounded reorder buffer.
pub struct VideoPipeline<'a> {
    size: CanvasSize,
    layers: Vec<PreparedLayer>,
    precomposed: bool,
    opts: PipelineOptions,
    cancel: Option<&'a CancellationToken>,
    progress: Option<ProgressFn<'a>>,
    state: JobState,
}

enum EncoderMsg {
    Frame { seq: u64, frame: VideoFrame },
    Done { frames: u64 },
}

enum EncodeOutcome {
    Finished(u64),
    ProducerStopped,
}

impl<'a> VideoPipeline<'a> {
    /// `layers` are rasterized for `size` and applied identically to every frame.
    pub fn new(size: CanvasSize, layers: Vec<PreparedLayer>, opts: PipelineOptions) -> Self {
        let (layers, precomposed) = if layers.len() > 1 {
            match flatten_normal_layers(size, &layers) {
                Some(overlay) => (vec![overlay], true),
                None => (layers, false),
            }
        } else {
            (layers, false)
        };
        Self {
            size,
            layers,
            precomposed,
            opts,
            cancel: None,
            progress: None,
            state: JobState::Opened,
        }
    }

    pub fn with_cancel(mut self, cancel: &'a CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn with_progress(mut self, progress: ProgressFn<'a>) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    fn advance(&mut self, next: JobState) -> EngineResult<()> {
        if !self.state.can_advance_to(next) {
            return Err(VideoError::encode(format!(
                "illegal video job transition {:?} -> {next:?}",
                self.state
            ))
            .into());
        }
        tracing::debug!(from = ?self.state, to = ?next, "video job state");
        self.state = next;
        Ok(())
    }

    /// Run the job to completion.
    ///
    /// On any error, including cancellation, the sink is aborted and the job ends `Failed`.
    #[tracing::instrument(skip_all)]
    pub fn run(
        &mut self,
        source: &mut dyn FrameSource,
        sink: &mut dyn FrameSink,
    ) -> EngineResult<VideoStats> {
        if self.state != JobState::Opened {
            return Err(EngineError::config(format!(
                "video pipeline already ran (state {:?})",
                self.state
            )));
        }

        let result = self.run_inner(source, &mut *sink);
        let closed = source.close();
        let result = match (result, closed) {
            (Ok(stats), Ok(())) => self.advance(JobState::Closed).map(|()| stats),
            (Ok(_), Err(e)) => Err(e.into()),
            (Err(e), _) => Err(e),
        };

        match result {
            Ok(stats) => {
                tracing::debug!(
                    frames = stats.frames_encoded,
                    duration_micros = stats.duration_micros,
                    "video job closed"
                );
                Ok(stats)
            }
            Err(e) => {
                sink.abort();
                if !self.state.is_terminal() {
                    self.state = JobState::Failed;
                }
                tracing::debug!(error = %e, "video job failed");
                Err(e)
            }
        }
    }

    fn run_inner(
        &mut self,
        source: &mut dyn FrameSource,
        sink: &mut dyn FrameSink,
    ) -> EngineResult<VideoStats> {
        self.opts.selection.validate()?;
        let info = source.info();
        if info.size != self.size {
            return Err(VideoError::decode(format!(
                "source frames are {}x{}, overlay is {}x{}",
                info.size.width, info.size.height, self.size.width, self.size.height
            ))
            .into());
        }
        self.advance(JobState::Demuxing)?;

        let pool = build_thread_pool(self.opts.threads)?;
        let chunk = pool.current_num_threads().max(1) * self.opts.reorder_multiplier.max(1);
        let expected = self.opts.selection.expected_count(info.frame_count_hint);
        let cfg = SinkConfig {
            size: self.size,
            fps: info.fps,
        };

        let composited = AtomicU64::new(0);
        let produce_ctx = ProduceCtx {
            pool: &pool,
            chunk,
            layers: &self.layers,
            size: self.size,
            selection: self.opts.selection,
            cancel: self.cancel,
            composited: &composited,
        };
        let progress = self.progress;

        let (decoded, encoded) = std::thread::scope(|scope| -> EngineResult<(u64, u64)> {
            let (tx, rx) = mpsc::sync_channel::<EncoderMsg>(chunk);
            let enc = scope.spawn(move || encode_loop(sink, cfg, rx, chunk, progress, expected));

            let produce_res = produce(source, &tx, &produce_ctx);
            drop(tx);
            let enc_res = enc
                .join()
                .map_err(|_| VideoError::encode("encoder thread panicked"))?;

            // The encoder's own failure explains a producer send error, so it wins.
            match (produce_res, enc_res) {
                (_, Err(e)) => Err(e),
                (Err(e), Ok(_)) => Err(e),
                (Ok(decoded), Ok(EncodeOutcome::Finished(encoded))) => Ok((decoded, encoded)),
                (Ok(_), Ok(EncodeOutcome::ProducerStopped)) => {
                    Err(VideoError::encode("frame producer stopped before completion").into())
                }
            }
        })?;
        self.advance(JobState::Muxed)?;

        Ok(VideoStats {
            frames_decoded: decoded,
            frames_composited: composited.load(Ordering::Relaxed),
            frames_encoded: encoded,
            overlay_layers: self.layers.len(),
            overlay_precomposed: self.precomposed,
            duration_micros: info.fps.frames_to_micros(encoded),
        })
    }
}

struct ProduceCtx<'p> {
    pool: &'p rayon::ThreadPool,
    chunk: usize,
    layers: &'p [PreparedLayer],
    size: CanvasSize,
    selection: FrameSelection,
    cancel: Option<&'p CancellationToken>,
    composited: &'p AtomicU64,
}

/// Decode sequentially, composite each batch in parallel, and hand results to the encoder.
fn produce(
    source: &mut dyn FrameSource,
    tx: &mpsc::SyncSender<EncoderMsg>,
    ctx: &ProduceCtx<'_>,
) -> EngineResult<u64> {
    let mut decoded = 0u64;
    let mut seq = 0u64;
    let mut done = false;

    while !done {
        let mut batch = Vec::with_capacity(ctx.chunk);
        while batch.len() < ctx.chunk {
            if let Some(c) = ctx.cancel {
                c.check()?;
            }
            let Some(frame) = source.next_frame()? else {
                done = true;
                break;
            };
            decoded += 1;
            tracing::trace!(frame = frame.index, stage = ?FrameStage::Decoded);

            let index = frame.index;
            if ctx.selection.contains(index) {
                batch.push((seq, frame));
                seq += 1;
            }
            if ctx.selection.exhausted_after(index) {
                done = true;
                break;
            }
        }

        ctx.pool.install(|| {
            batch
                .into_par_iter()
                .try_for_each(|(seq, frame)| -> EngineResult<()> {
                    let frame = composite_frame(frame, ctx.layers, ctx.size)?;
                    ctx.composited.fetch_add(1, Ordering::Relaxed);
                    tracing::trace!(frame = frame.index, stage = ?FrameStage::Composited);
                    tx.send(EncoderMsg::Frame { seq, frame })
                        .map_err(|_| VideoError::encode("encoder thread is not accepting frames"))?;
                    Ok(())
                })
        })?;
    }

    tx.send(EncoderMsg::Done { frames: seq })
        .map_err(|_| VideoError::encode("encoder thread is not accepting frames"))?;
    Ok(decoded)
}

fn composite_frame(
    frame: VideoFrame,
    layers: &[PreparedLayer],
    size: CanvasSize,
) -> EngineResult<VideoFrame> {
    let VideoFrame {
        index,
        timestamp_micros,
        pixels,
    } = frame;
    let mut canvas = Canvas::from_premul(size, pixels)?;
    apply_layers(&mut canvas, layers);
    Ok(VideoFrame {
        index,
        timestamp_micros,
        pixels: canvas.into_data(),
    })
}

fn encode_loop(
    sink: &mut dyn FrameSink,
    cfg: SinkConfig,
    rx: mpsc::Receiver<EncoderMsg>,
    capacity: usize,
    progress: Option<ProgressFn<'_>>,
    expected: Option<u64>,
) -> EngineResult<EncodeOutcome> {
    sink.begin(cfg)?;

    let mut reorder = ReorderBuffer::new(0, capacity);
    let mut encoded = 0u64;
    loop {
        let Ok(msg) = rx.recv() else {
            return Ok(EncodeOutcome::ProducerStopped);
        };
        match msg {
            EncoderMsg::Frame { seq, frame } => {
                reorder.insert(seq, frame)?;
                while let Some(frame) = reorder.pop_ready() {
                    sink.push_frame(&frame)?;
                    encoded += 1;
                    tracing::trace!(frame = frame.index, stage = ?FrameStage::Encoded);
                    if let Some(cb) = progress {
                        cb(encoded, expected);
                    }
                }
            }
            EncoderMsg::Done { frames } => {
                if encoded != frames || !reorder.is_empty() {
                    return Err(VideoError::encode(format!(
                        "encoder wrote {encoded} of {frames} frames ({} still pending)",
                        reorder.len()
                    ))
                    .into());
                }
                sink.end()?;
                return Ok(EncodeOutcome::Finished(encoded));
            }
        }
    }
}

fn build_thread_pool(threads: Option<usize>) -> EngineResult<rayon::ThreadPool> {
    if let Some(n) = threads
        && n == 0
    {
        return Err(EngineError::config("worker thread count must be >= 1 when set"));
    }

    let mut builder = rayon::ThreadPoolBuilder::new();
    if let Some(n) = threads {
        builder = builder.num_threads(n);
    }
    builder
        .build()
        .map_err(|e| EngineError::config(format!("failed to build rayon thread pool: {e}")))
}

#[cfg(test)]
#[path = "../../tests/unit/video/pipeline.rs"]
mod tests;
