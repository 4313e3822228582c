use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::assets::cache::CacheStats;
use crate::assets::decode::PixelBuffer;
use crate::assets::loader::AssetLoader;
use crate::assets::media::VideoSourceInfo;
use crate::assets::text::{DEFAULT_FONT_KEY, FontAsset, ParleyMeasurer};
use crate::export::{PosterEncodeOptions, finalize_poster, finalize_with};
use crate::foundation::cancel::CancellationToken;
use crate::foundation::config::EngineConfig;
use crate::foundation::core::CanvasSize;
use crate::foundation::error::{AssetError, EngineError, EngineResult, LayoutError, VideoError};
use crate::layout::ops::{DrawContent, DrawOp};
use crate::layout::resolver::{LayoutContent, ResolveOptions, resolve};
use crate::render::canvas::Canvas;
use crate::render::compositor::{
    PreparedLayer, RenderResources, composite, prepare_image_layer, prepare_layers,
};
use crate::render::watermark::{self, watermark_bounds, watermark_op};
use crate::template::job::{
    AssetRef, Container, OutputKind, PosterOutput, RenderJob, VideoOutput, WatermarkSpec,
};
use crate::template::model::{ImageFit, Layer};
use crate::video::ffmpeg::{FfmpegSink, FfmpegSinkOpts};
use crate::video::pipeline::{
    FrameSelection, PipelineOptions, ProgressFn, VideoPipeline, VideoStats,
};
use crate::video::sink::InMemorySink;
use crate::video::source::VideoFrame;

/// Resolved template ops with their decoded inputs.
struct Overlay {
    ops: Vec<DrawOp>,
    res: RenderResources,
    /// Watermark badge decoded at its placed size.
    watermark: Option<Arc<PixelBuffer>>,
}

/// What a finished job produced.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderOutput {
    pub path: PathBuf,
    pub byte_size: u64,
    pub width: u32,
    pub height: u32,
    /// Encoded duration of a video job.
    pub duration_micros: Option<u64>,
    pub video: Option<VideoStats>,
}

/// Runs render jobs against one configuration and one decoded-asset cache.
///
/// An `Engine` is `Sync`; independent jobs may run on it concurrently and share cached
/// decodes.
pub struct Engine {
    config: EngineConfig,
    loader: AssetLoader,
}

impl Engine {
    pub fn new(config: EngineConfig) -> EngineResult<Self> {
        config.validate()?;
        let loader = AssetLoader::new(&config);
        Ok(Self { config, loader })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn loader(&self) -> &AssetLoader {
        &self.loader
    }

    /// Render `job` to its destination. The destination only ever holds a complete file.
    pub fn render(
        &self,
        job: &RenderJob,
        cancel: Option<&CancellationToken>,
    ) -> EngineResult<RenderOutput> {
        self.render_with_progress(job, cancel, None)
    }

    /// Like [`Engine::render`]; video jobs report `(frames_encoded, frames_expected)`.
    #[tracing::instrument(skip_all, fields(template = %job.template.id, dest = %job.destination.display()))]
    pub fn render_with_progress(
        &self,
        job: &RenderJob,
        cancel: Option<&CancellationToken>,
        progress: Option<ProgressFn<'_>>,
    ) -> EngineResult<RenderOutput> {
        job.validate()?;
        let started = std::time::Instant::now();
        let out = match &job.output {
            OutputKind::Poster(p) => self.render_poster(job, p, cancel)?,
            OutputKind::Video(v) => self.render_video(job, v, cancel, progress)?,
        };
        tracing::info!(
            path = %out.path.display(),
            bytes = out.byte_size,
            width = out.width,
            height = out.height,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "render job finished"
        );
        Ok(out)
    }

    /// Compose a poster job's canvas without encoding it.
    pub fn compose_poster(
        &self,
        job: &RenderJob,
        cancel: Option<&CancellationToken>,
    ) -> EngineResult<Canvas> {
        let OutputKind::Poster(p) = &job.output else {
            return Err(EngineError::config("compose_poster needs a poster job"));
        };
        job.validate()?;
        self.compose_poster_canvas(job, p, cancel)
    }

    fn compose_poster_canvas(
        &self,
        job: &RenderJob,
        out: &PosterOutput,
        cancel: Option<&CancellationToken>,
    ) -> EngineResult<Canvas> {
        let size = match out.size {
            Some(s) => s,
            None => CanvasSize::new(job.template.canvas_width, job.template.canvas_height)?,
        };
        let Overlay {
            ops,
            mut res,
            watermark: badge,
        } = self.prepare_overlay(job, size)?;

        let background = job
            .template
            .background
            .map(|c| c.to_rgba8_premul())
            .unwrap_or(self.config.poster_background);
        let mut canvas = Canvas::filled(size, background);
        composite(&mut canvas, &ops, &mut res, cancel)?;

        if let (Some(spec), Some(badge)) = (&job.watermark, badge) {
            watermark::apply(
                &mut canvas,
                spec,
                &badge,
                self.config.watermark_width_fraction,
            )?;
        }
        Ok(canvas)
    }

    fn render_poster(
        &self,
        job: &RenderJob,
        out: &PosterOutput,
        cancel: Option<&CancellationToken>,
    ) -> EngineResult<RenderOutput> {
        let format = job.poster_format(out)?;
        let canvas = self.compose_poster_canvas(job, out, cancel)?;
        if let Some(c) = cancel {
            c.check()?;
        }

        let opts = PosterEncodeOptions {
            jpeg_quality: self.config.jpeg_quality,
            ..PosterEncodeOptions::default()
        };
        let written = finalize_poster(&canvas, &job.destination, format, opts)?;
        Ok(RenderOutput {
            path: written.path,
            byte_size: written.byte_size,
            width: canvas.width(),
            height: canvas.height(),
            duration_micros: None,
            video: None,
        })
    }

    fn render_video(
        &self,
        job: &RenderJob,
        out: &VideoOutput,
        cancel: Option<&CancellationToken>,
        progress: Option<ProgressFn<'_>>,
    ) -> EngineResult<RenderOutput> {
        let container = job.video_container(out)?;
        let info = self.loader.probe_video(&out.source)?;
        let audio_source = passthrough_audio(out, &info, container)?;
        let size = output_size(out, &info)?;
        let opts = PipelineOptions::from_config(&self.config);
        let mut pipeline = self.video_pipeline(job, size, opts)?;
        if let Some(c) = cancel {
            pipeline = pipeline.with_cancel(c);
        }
        if let Some(p) = progress {
            pipeline = pipeline.with_progress(p);
        }

        let mut reader = self.loader.open_video(&info, Some(size))?;
        let mut stats = VideoStats::default();
        let written = finalize_with(&job.destination, |tmp: &Path| {
            let mut sink = FfmpegSink::new(FfmpegSinkOpts {
                ffmpeg_bin: self.config.ffmpeg_bin.clone(),
                bg_rgba: self.config.video_background.to_straight(),
                audio_source,
                ..FfmpegSinkOpts::new(tmp, container, out.codec)
            });
            stats = pipeline.run(&mut reader, &mut sink)?;
            Ok(())
        })?;

        Ok(RenderOutput {
            path: written.path,
            byte_size: written.byte_size,
            width: size.width,
            height: size.height,
            duration_micros: Some(stats.duration_micros),
            video: Some(stats),
        })
    }

    /// Composite the selected frames of a video job in memory, without encoding.
    #[tracing::instrument(skip_all, fields(template = %job.template.id))]
    pub fn preview_frames(
        &self,
        job: &RenderJob,
        selection: FrameSelection,
        cancel: Option<&CancellationToken>,
    ) -> EngineResult<Vec<VideoFrame>> {
        let OutputKind::Video(out) = &job.output else {
            return Err(EngineError::config("preview_frames needs a video job"));
        };
        job.validate()?;
        let info = self.loader.probe_video(&out.source)?;
        let size = output_size(out, &info)?;
        let opts = PipelineOptions {
            selection,
            ..PipelineOptions::from_config(&self.config)
        };
        let mut pipeline = self.video_pipeline(job, size, opts)?;
        if let Some(c) = cancel {
            pipeline = pipeline.with_cancel(c);
        }

        let mut reader = self.loader.open_video(&info, Some(size))?;
        let mut sink = InMemorySink::new();
        pipeline.run(&mut reader, &mut sink)?;
        Ok(std::mem::take(&mut sink.frames))
    }

    /// Drop cached decodes and return the final cache counters.
    pub fn shutdown(self) -> CacheStats {
        let stats = self.loader.cache_stats();
        self.loader.cache().clear();
        tracing::debug!(
            hits = stats.hits,
            misses = stats.misses,
            evictions = stats.evictions,
            "engine shut down"
        );
        stats
    }

    fn video_pipeline<'a>(
        &self,
        job: &RenderJob,
        size: CanvasSize,
        opts: PipelineOptions,
    ) -> EngineResult<VideoPipeline<'a>> {
        let Overlay {
            ops,
            mut res,
            watermark: badge,
        } = self.prepare_overlay(job, size)?;
        let mut layers = prepare_layers(&ops, &mut res, size)?;
        if let (Some(spec), Some(badge)) = (&job.watermark, badge) {
            layers.extend(self.watermark_layer(spec, &badge, size)?);
        }
        tracing::debug!(layers = layers.len(), "video overlay prepared");
        Ok(VideoPipeline::new(size, layers, opts))
    }

    /// Resolve the template at `size` and load everything its ops and watermark reference.
    ///
    /// Every asset and layout failure surfaces here, before a canvas exists.
    fn prepare_overlay(&self, job: &RenderJob, size: CanvasSize) -> EngineResult<Overlay> {
        let mut res = RenderResources {
            fonts: self.load_fonts(job)?,
            ..RenderResources::default()
        };

        let content = LayoutContent {
            assets: job.asset_bindings.clone(),
            text: job.text.clone(),
        };
        let opts = ResolveOptions {
            line_height: self.config.line_height,
        };
        let ops = {
            let mut measurer = ParleyMeasurer::new(&mut res.text, &res.fonts);
            resolve(&job.template, size, &content, &mut measurer, &opts)?
        };

        // Fail on unbound images before any asset is decoded.
        for op in &ops {
            if let DrawContent::Image { asset: None, .. } = &op.content {
                return Err(LayoutError::invalid(format!(
                    "image layer '{}' has no asset bound",
                    op.layer_id
                ))
                .into());
            }
        }
        for op in &ops {
            if let DrawContent::Image {
                asset: Some(asset),
                fit,
            } = &op.content
                && !res.images.contains_key(asset)
            {
                let img = self.load_for_box(asset, op, *fit)?;
                res.images.insert(asset.clone(), img);
            }
        }
        let watermark = match &job.watermark {
            Some(spec) => Some(self.load_watermark(spec, size)?),
            None => None,
        };
        Ok(Overlay {
            ops,
            res,
            watermark,
        })
    }

    /// Fonts for every text layer, keyed by binding name.
    fn load_fonts(&self, job: &RenderJob) -> EngineResult<HashMap<String, FontAsset>> {
        let keys: BTreeSet<&str> = job
            .template
            .layers
            .iter()
            .filter_map(|l| match l {
                Layer::Text(t) => Some(t.font.as_deref().unwrap_or(DEFAULT_FONT_KEY)),
                _ => None,
            })
            .collect();

        let mut fonts = HashMap::with_capacity(keys.len());
        for key in keys {
            let font = match job.fonts.get(key) {
                Some(asset) => self.loader.load_font(asset)?,
                None if key == DEFAULT_FONT_KEY => self.loader.load_default_font()?,
                None => {
                    return Err(LayoutError::invalid(format!(
                        "text layer uses font '{key}' but no font file is bound to it"
                    ))
                    .into());
                }
            };
            fonts.insert(key.to_string(), font);
        }
        Ok(fonts)
    }

    /// Decode `asset` close to the size it will occupy in `op`'s box.
    ///
    /// Fill stretches to the box; contain and cover keep the aspect ratio, so the decode is
    /// scaled uniformly. Falls back to the native decode when the fitted size is unusable.
    fn load_for_box(
        &self,
        asset: &AssetRef,
        op: &DrawOp,
        fit: ImageFit,
    ) -> Result<Arc<PixelBuffer>, AssetError> {
        let native = self.loader.load(asset, None)?;
        let (bw, bh) = (op.bounds.width(), op.bounds.height());
        if !(bw > 0.0 && bh > 0.0) {
            return Ok(native);
        }
        let (iw, ih) = (f64::from(native.width), f64::from(native.height));
        let (tw, th) = match fit {
            ImageFit::Fill => (bw, bh),
            ImageFit::Contain => {
                let s = (bw / iw).min(bh / ih);
                (iw * s, ih * s)
            }
            ImageFit::Cover => {
                let s = (bw / iw).max(bh / ih);
                (iw * s, ih * s)
            }
        };
        let target = CanvasSize::new(tw.round().max(1.0) as u32, th.round().max(1.0) as u32);
        match target {
            Ok(t) if (t.width, t.height) != (native.width, native.height) => {
                self.loader.load(asset, Some(t))
            }
            _ => Ok(native),
        }
    }

    /// The watermark asset decoded at exactly its placed size on a `size` canvas.
    fn load_watermark(
        &self,
        spec: &WatermarkSpec,
        size: CanvasSize,
    ) -> EngineResult<Arc<PixelBuffer>> {
        let native = self.loader.load(&spec.asset, None)?;
        let bounds = watermark_bounds(
            size,
            (native.width, native.height),
            spec,
            self.config.watermark_width_fraction,
        )?;
        let target = CanvasSize::new(bounds.width() as u32, bounds.height() as u32);
        match target {
            Ok(t) if (t.width, t.height) != (native.width, native.height) => {
                Ok(self.loader.load(&spec.asset, Some(t))?)
            }
            _ => Ok(native),
        }
    }

    fn watermark_layer(
        &self,
        spec: &WatermarkSpec,
        badge: &PixelBuffer,
        size: CanvasSize,
    ) -> EngineResult<Option<PreparedLayer>> {
        let bounds = watermark_bounds(
            size,
            (badge.width, badge.height),
            spec,
            self.config.watermark_width_fraction,
        )?;
        prepare_image_layer(&watermark_op(spec, bounds), badge, size)
    }
}

/// Source file to copy audio from, if any. Audio the container cannot hold is an error, not a
/// silent drop.
fn passthrough_audio(
    out: &VideoOutput,
    info: &VideoSourceInfo,
    container: Container,
) -> Result<Option<PathBuf>, VideoError> {
    if !out.audio_passthrough || !info.has_audio {
        return Ok(None);
    }
    let codec = info.audio_codec.as_deref().unwrap_or("unknown");
    if !container.accepts_audio(codec) {
        return Err(VideoError::UnsupportedCodec {
            codec: format!("{codec} audio"),
            container: container.muxer().to_string(),
        });
    }
    Ok(Some(info.source_path.clone()))
}

fn output_size(out: &VideoOutput, info: &VideoSourceInfo) -> EngineResult<CanvasSize> {
    match out.size {
        Some(s) => Ok(s),
        None => CanvasSize::new(info.width, info.height),
    }
}

#[cfg(test)]
#[path = "../../tests/unit/session/engine.rs"]
mod tests;
