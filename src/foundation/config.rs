use std::path::{Path, PathBuf};

use crate::foundation::core::Rgba8Premul;
use crate::foundation::error::{EngineError, EngineResult};

/// Engine-wide knobs. Every field has a default; see [`EngineConfig::from_env`] for overrides.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    /// Byte budget of the decoded-asset LRU cache.
    pub cache_budget_bytes: usize,
    /// Default watermark width as a fraction of canvas width.
    pub watermark_width_fraction: f64,
    /// Rayon worker threads for video frames. `None` uses one per core.
    pub worker_threads: Option<usize>,
    /// Reorder buffer (and render chunk) bound, as a multiple of the worker count.
    pub reorder_multiplier: usize,
    /// Font used by text layers that name no font binding.
    pub default_font: Option<PathBuf>,
    pub ffmpeg_bin: String,
    pub ffprobe_bin: String,
    /// Line advance as a multiple of font size.
    pub line_height: f64,
    pub jpeg_quality: u8,
    /// Fill painted under the first layer of a poster.
    pub poster_background: Rgba8Premul,
    /// Color that transparent pixels are flattened onto before video encoding.
    pub video_background: Rgba8Premul,
    /// Input video codecs the demuxer accepts (ffprobe `codec_name` values).
    pub supported_input_codecs: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_budget_bytes: 256 * 1024 * 1024,
            watermark_width_fraction: 0.15,
            worker_threads: None,
            reorder_multiplier: 2,
            default_font: None,
            ffmpeg_bin: "ffmpeg".to_string(),
            ffprobe_bin: "ffprobe".to_string(),
            line_height: 1.2,
            jpeg_quality: 90,
            poster_background: Rgba8Premul::transparent(),
            video_background: Rgba8Premul::opaque_black(),
            supported_input_codecs: ["h264", "hevc", "vp8", "vp9", "av1", "mpeg4", "prores"]
                .into_iter()
                .map(str::to_string)
                .collect(),
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by `POSTERKIT_*` environment variables.
    ///
    /// Unparseable or non-positive values are ignored.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Load a JSON config file (missing fields take defaults), then apply env overrides.
    pub fn from_json_file(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            EngineError::config(format!("read config '{}': {e}", path.display()))
        })?;
        let cfg: Self = serde_json::from_str(&text).map_err(|e| {
            EngineError::config(format!("parse config '{}': {e}", path.display()))
        })?;
        let cfg = cfg.with_env_overrides();
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn with_env_overrides(mut self) -> Self {
        fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
            std::env::var(key).ok().and_then(|v| v.trim().parse::<T>().ok())
        }

        if let Some(mib) = env_parse::<usize>("POSTERKIT_CACHE_BUDGET_MB").filter(|&n| n > 0) {
            self.cache_budget_bytes = mib.saturating_mul(1024 * 1024);
        }
        if let Some(f) = env_parse::<f64>("POSTERKIT_WATERMARK_FRACTION")
            .filter(|f| f.is_finite() && *f > 0.0 && *f <= 1.0)
        {
            self.watermark_width_fraction = f;
        }
        if let Some(n) = env_parse::<usize>("POSTERKIT_THREADS").filter(|&n| n > 0) {
            self.worker_threads = Some(n);
        }
        if let Some(n) = env_parse::<usize>("POSTERKIT_REORDER_MULTIPLIER").filter(|&n| n > 0) {
            self.reorder_multiplier = n;
        }
        if let Ok(p) = std::env::var("POSTERKIT_DEFAULT_FONT")
            && !p.trim().is_empty()
        {
            self.default_font = Some(PathBuf::from(p));
        }
        if let Ok(bin) = std::env::var("POSTERKIT_FFMPEG")
            && !bin.trim().is_empty()
        {
            self.ffmpeg_bin = bin;
        }
        if let Ok(bin) = std::env::var("POSTERKIT_FFPROBE")
            && !bin.trim().is_empty()
        {
            self.ffprobe_bin = bin;
        }
        self
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.cache_budget_bytes == 0 {
            return Err(EngineError::config("cacheBudgetBytes must be > 0"));
        }
        if !self.watermark_width_fraction.is_finite()
            || self.watermark_width_fraction <= 0.0
            || self.watermark_width_fraction > 1.0
        {
            return Err(EngineError::config(
                "watermarkWidthFraction must be in (0, 1]",
            ));
        }
        if self.worker_threads == Some(0) {
            return Err(EngineError::config("workerThreads must be > 0 when set"));
        }
        if self.reorder_multiplier == 0 {
            return Err(EngineError::config("reorderMultiplier must be > 0"));
        }
        if !self.line_height.is_finite() || self.line_height <= 0.0 {
            return Err(EngineError::config("lineHeight must be finite and > 0"));
        }
        if self.jpeg_quality == 0 || self.jpeg_quality > 100 {
            return Err(EngineError::config("jpegQuality must be in 1..=100"));
        }
        Ok(())
    }

    /// Worker count used for video frame parallelism.
    pub fn effective_workers(&self) -> usize {
        self.worker_threads.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }

    /// Reorder-buffer bound for video jobs.
    pub fn reorder_capacity(&self) -> usize {
        self.effective_workers()
            .saturating_mul(self.reorder_multiplier)
            .max(1)
    }
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/config.rs"]
mod tests;
