use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use crate::assets::cache::{CacheKey, CacheStats, DecodeCache};
use crate::assets::decode::{PixelBuffer, decode_image};
use crate::assets::media::{FfmpegFrameReader, VideoSourceInfo, probe_video};
use crate::assets::text::{FontAsset, system_font_candidates};
use crate::foundation::config::EngineConfig;
use crate::foundation::core::CanvasSize;
use crate::foundation::error::{AssetError, EngineResult, VideoError};
use crate::template::job::AssetRef;

/// Resolves local asset files into decoded, shareable forms.
///
/// Raster/SVG decodes go through the shared [`DecodeCache`]; fonts are kept by path for the
/// loader's lifetime; videos are only ever opened as streaming frame readers.
pub struct AssetLoader {
    cache: Arc<DecodeCache>,
    fonts: Mutex<HashMap<PathBuf, FontAsset>>,
    ffmpeg_bin: String,
    ffprobe_bin: String,
    supported_codecs: Vec<String>,
    default_font: Option<PathBuf>,
}

impl AssetLoader {
    pub fn new(cfg: &EngineConfig) -> Self {
        Self::with_cache(cfg, Arc::new(DecodeCache::new(cfg.cache_budget_bytes)))
    }

    pub fn with_cache(cfg: &EngineConfig, cache: Arc<DecodeCache>) -> Self {
        Self {
            cache,
            fonts: Mutex::new(HashMap::new()),
            ffmpeg_bin: cfg.ffmpeg_bin.clone(),
            ffprobe_bin: cfg.ffprobe_bin.clone(),
            supported_codecs: cfg.supported_input_codecs.clone(),
            default_font: cfg.default_font.clone(),
        }
    }

    /// Decode a JPEG/PNG/WebP/SVG asset, resized to `target` when given.
    #[tracing::instrument(skip(self), fields(path = %asset.path.display()))]
    pub fn load(
        &self,
        asset: &AssetRef,
        target: Option<CanvasSize>,
    ) -> Result<Arc<PixelBuffer>, AssetError> {
        let path = asset.path();
        let meta = std::fs::metadata(path).map_err(|e| AssetError::from_io(path, e))?;
        if !meta.is_file() {
            return Err(AssetError::unsupported(path, "not a regular file"));
        }

        let key = CacheKey::for_file(path, Some(&meta), target);
        self.cache.get_or_try_insert(key, || {
            let bytes = std::fs::read(path).map_err(|e| AssetError::from_io(path, e))?;
            let decoded = decode_image(path, &bytes, target)?;
            tracing::debug!(
                width = decoded.width,
                height = decoded.height,
                "decoded asset"
            );
            Ok(decoded)
        })
    }

    pub fn load_font(&self, asset: &AssetRef) -> Result<FontAsset, AssetError> {
        let path = asset.path();
        if let Some(font) = self
            .fonts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
        {
            return Ok(font.clone());
        }

        let bytes = std::fs::read(path).map_err(|e| AssetError::from_io(path, e))?;
        if !looks_like_font(&bytes) {
            return Err(AssetError::unsupported(path, "not a TrueType/OpenType font"));
        }
        let font = FontAsset {
            path: path.to_path_buf(),
            bytes: Arc::new(bytes),
        };
        self.fonts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.to_path_buf(), font.clone());
        Ok(font)
    }

    /// The configured default font, or the first readable well-known system font.
    pub fn load_default_font(&self) -> Result<FontAsset, AssetError> {
        if let Some(path) = &self.default_font {
            return self.load_font(&AssetRef::new(path.clone()));
        }
        for candidate in system_font_candidates() {
            if let Ok(font) = self.load_font(&AssetRef::new(*candidate)) {
                return Ok(font);
            }
        }
        Err(AssetError::NotFound {
            path: PathBuf::from("<default font>"),
        })
    }

    /// Probe a source video and check its codec is one the demuxer accepts.
    pub fn probe_video(&self, asset: &AssetRef) -> EngineResult<VideoSourceInfo> {
        let info = probe_video(&self.ffprobe_bin, asset.path())?;
        if !self.supported_codecs.iter().any(|c| *c == info.codec) {
            return Err(VideoError::UnsupportedCodec {
                codec: info.codec.clone(),
                container: info.container.clone(),
            }
            .into());
        }
        Ok(info)
    }

    /// Open a streaming frame reader. Frames are scaled to `size` (source size when `None`).
    pub fn open_video(
        &self,
        info: &VideoSourceInfo,
        size: Option<CanvasSize>,
    ) -> EngineResult<FfmpegFrameReader> {
        let size = match size {
            Some(s) => s,
            None => CanvasSize::new(info.width, info.height)?,
        };
        Ok(FfmpegFrameReader::open(&self.ffmpeg_bin, info, size)?)
    }

    pub fn cache(&self) -> &Arc<DecodeCache> {
        &self.cache
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }
}

fn looks_like_font(bytes: &[u8]) -> bool {
    matches!(
        bytes.get(0..4),
        Some([0x00, 0x01, 0x00, 0x00]) | Some(b"OTTO") | Some(b"true") | Some(b"ttcf")
    )
}

#[cfg(test)]
#[path = "../../tests/unit/assets/loader.rs"]
mod tests;
