use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::foundation::core::CanvasSize;
use crate::foundation::error::{EngineError, EngineResult, LayoutError, VideoError};
use crate::template::model::Template;

/// One render request: a template, the content bound into it, and where the result goes.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderJob {
    pub template: Template,
    /// Image layer id to local asset path. Overrides a layer's own `asset`.
    #[serde(default)]
    pub asset_bindings: BTreeMap<String, AssetRef>,
    /// Font binding key to font file.
    #[serde(default)]
    pub fonts: BTreeMap<String, AssetRef>,
    /// Placeholder content for text layers with a `contentKey`.
    #[serde(default)]
    pub text: BTreeMap<String, String>,
    #[serde(default)]
    pub watermark: Option<WatermarkSpec>,
    pub output: OutputKind,
    pub destination: PathBuf,
}

/// A local, already-resolved asset file.
#[derive(Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct AssetRef {
    pub path: PathBuf,
}

impl AssetRef {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum OutputKind {
    Poster(PosterOutput),
    Video(VideoOutput),
}

#[derive(Clone, Debug, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PosterOutput {
    /// Encoded format. Inferred from the destination extension when absent.
    #[serde(default)]
    pub format: Option<PosterFormat>,
    /// Output canvas size. Defaults to the template's design canvas.
    #[serde(default)]
    pub size: Option<CanvasSize>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PosterFormat {
    Png,
    Jpeg,
    /// Lossless WebP.
    Webp,
}

impl PosterFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "png" => Some(Self::Png),
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "webp" => Some(Self::Webp),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoOutput {
    /// Source video whose frames receive the template overlay.
    pub source: AssetRef,
    /// Container. Inferred from the destination extension when absent.
    #[serde(default)]
    pub container: Option<Container>,
    #[serde(default)]
    pub codec: VideoCodec,
    /// Output frame size. Defaults to the source video's dimensions.
    #[serde(default)]
    pub size: Option<CanvasSize>,
    /// Copy the source's first audio stream without re-encoding.
    #[serde(default = "default_true")]
    pub audio_passthrough: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Container {
    Mp4,
    Mov,
    Webm,
}

impl Container {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "mp4" | "m4v" => Some(Self::Mp4),
            "mov" => Some(Self::Mov),
            "webm" => Some(Self::Webm),
            _ => None,
        }
    }

    /// ffmpeg muxer name.
    pub fn muxer(self) -> &'static str {
        match self {
            Self::Mp4 => "mp4",
            Self::Mov => "mov",
            Self::Webm => "webm",
        }
    }

    pub fn supports(self, codec: VideoCodec) -> bool {
        match self {
            Self::Mp4 | Self::Mov => matches!(codec, VideoCodec::H264 | VideoCodec::H265),
            Self::Webm => codec == VideoCodec::Vp9,
        }
    }

    /// Whether an audio stream with this ffprobe `codec_name` can be stream-copied in.
    pub fn accepts_audio(self, codec: &str) -> bool {
        match self {
            Self::Mp4 => matches!(codec, "aac" | "mp3" | "ac3" | "eac3" | "alac" | "opus" | "flac"),
            Self::Mov => {
                matches!(codec, "aac" | "mp3" | "ac3" | "eac3" | "alac")
                    || codec.starts_with("pcm_")
            }
            Self::Webm => matches!(codec, "opus" | "vorbis"),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum VideoCodec {
    #[default]
    H264,
    H265,
    Vp9,
}

impl VideoCodec {
    pub fn name(self) -> &'static str {
        match self {
            Self::H264 => "h264",
            Self::H265 => "h265",
            Self::Vp9 => "vp9",
        }
    }

    /// ffmpeg encoder name.
    pub fn encoder(self) -> &'static str {
        match self {
            Self::H264 => "libx264",
            Self::H265 => "libx265",
            Self::Vp9 => "libvpx-vp9",
        }
    }
}

/// Badge/logo overlay applied once to a poster or identically to every video frame.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatermarkSpec {
    pub asset: AssetRef,
    #[serde(default)]
    pub anchor: Anchor,
    #[serde(default)]
    pub margin_px: f64,
    #[serde(default = "default_watermark_opacity")]
    pub opacity: f64,
    /// Badge width as a fraction of canvas width. Engine default when absent.
    #[serde(default)]
    pub width_fraction: Option<f64>,
}

fn default_watermark_opacity() -> f64 {
    1.0
}

impl WatermarkSpec {
    pub fn new(asset: AssetRef, anchor: Anchor, margin_px: f64, opacity: f64) -> Self {
        Self {
            asset,
            anchor,
            margin_px,
            opacity,
            width_fraction: None,
        }
    }

    pub fn validate(&self) -> Result<(), LayoutError> {
        if !self.margin_px.is_finite() || self.margin_px < 0.0 {
            return Err(LayoutError::invalid("watermark marginPx must be finite and >= 0"));
        }
        if !(0.0..=1.0).contains(&self.opacity) {
            return Err(LayoutError::invalid("watermark opacity must be in [0,1]"));
        }
        if let Some(f) = self.width_fraction
            && (!f.is_finite() || f <= 0.0 || f > 1.0)
        {
            return Err(LayoutError::invalid("watermark widthFraction must be in (0,1]"));
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Anchor {
    TopLeft,
    TopCenter,
    TopRight,
    CenterLeft,
    Center,
    CenterRight,
    BottomLeft,
    BottomCenter,
    #[default]
    BottomRight,
}

impl RenderJob {
    pub fn poster(template: Template, destination: impl Into<PathBuf>) -> Self {
        Self {
            template,
            asset_bindings: BTreeMap::new(),
            fonts: BTreeMap::new(),
            text: BTreeMap::new(),
            watermark: None,
            output: OutputKind::Poster(PosterOutput::default()),
            destination: destination.into(),
        }
    }

    pub fn video(
        template: Template,
        source: impl Into<PathBuf>,
        destination: impl Into<PathBuf>,
    ) -> Self {
        Self {
            output: OutputKind::Video(VideoOutput {
                source: AssetRef::new(source),
                container: None,
                codec: VideoCodec::H264,
                size: None,
                audio_passthrough: true,
            }),
            ..Self::poster(template, destination)
        }
    }

    pub fn bind_asset(mut self, layer_id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.asset_bindings
            .insert(layer_id.into(), AssetRef::new(path));
        self
    }

    pub fn bind_font(mut self, key: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.fonts.insert(key.into(), AssetRef::new(path));
        self
    }

    pub fn with_text(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.text.insert(key.into(), value.into());
        self
    }

    pub fn with_watermark(mut self, spec: WatermarkSpec) -> Self {
        self.watermark = Some(spec);
        self
    }

    pub fn from_json(text: &str) -> EngineResult<Self> {
        let job: Self = serde_json::from_str(text)
            .map_err(|e| LayoutError::invalid(format!("job json: {e}")))?;
        job.validate()?;
        Ok(job)
    }

    /// Checks everything that can be checked without touching the filesystem.
    pub fn validate(&self) -> EngineResult<()> {
        self.template.validate()?;
        if let Some(wm) = &self.watermark {
            wm.validate()?;
        }
        for id in self.asset_bindings.keys() {
            if !self.template.layers.iter().any(|l| l.id() == id) {
                return Err(LayoutError::invalid(format!(
                    "asset binding references unknown layer '{id}'"
                ))
                .into());
            }
        }
        match &self.output {
            OutputKind::Poster(p) => {
                if let Some(size) = p.size {
                    size.validate()?;
                }
                if p.format.is_none() && PosterFormat::from_path(&self.destination).is_none() {
                    return Err(EngineError::config(format!(
                        "cannot infer poster format from '{}'",
                        self.destination.display()
                    )));
                }
            }
            OutputKind::Video(v) => {
                if let Some(size) = v.size {
                    size.validate()?;
                }
                let container = self.video_container(v)?;
                if !container.supports(v.codec) {
                    return Err(VideoError::UnsupportedCodec {
                        codec: v.codec.name().to_string(),
                        container: container.muxer().to_string(),
                    }
                    .into());
                }
            }
        }
        Ok(())
    }

    pub fn poster_format(&self, p: &PosterOutput) -> EngineResult<PosterFormat> {
        p.format
            .or_else(|| PosterFormat::from_path(&self.destination))
            .ok_or_else(|| {
                EngineError::config(format!(
                    "cannot infer poster format from '{}'",
                    self.destination.display()
                ))
            })
    }

    pub fn video_container(&self, v: &VideoOutput) -> EngineResult<Container> {
        v.container
            .or_else(|| Container::from_path(&self.destination))
            .ok_or_else(|| {
                EngineError::config(format!(
                    "cannot infer video container from '{}'",
                    self.destination.display()
                ))
            })
    }
}

#[cfg(test)]
#[path = "../../tests/unit/template/job.rs"]
mod tests;
