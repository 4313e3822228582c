use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::foundation::error::{AssetError, EngineResult, LayoutError};

/// Binding key used for text layers that name no font.
pub const DEFAULT_FONT_KEY: &str = "default";

/// Raw font file bytes, shared between measuring and rasterizing.
#[derive(Clone, Debug)]
pub struct FontAsset {
    pub path: PathBuf,
    pub bytes: Arc<Vec<u8>>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
/// RGBA8 brush color carried through Parley layouts.
pub struct TextBrushRgba8 {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

/// Width measurement used by the layout resolver's line breaker.
pub trait TextMeasure {
    /// Advance width of `text` on one line, in pixels.
    fn measure(&mut self, font_key: &str, size_px: f64, text: &str) -> EngineResult<f64>;
}

/// Parley font and layout contexts plus the families registered so far.
pub struct TextLayoutEngine {
    font_ctx: parley::FontContext,
    layout_ctx: parley::LayoutContext<TextBrushRgba8>,
    families: HashMap<PathBuf, String>,
}

impl Default for TextLayoutEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TextLayoutEngine {
    pub fn new() -> Self {
        Self {
            font_ctx: parley::FontContext::default(),
            layout_ctx: parley::LayoutContext::new(),
            families: HashMap::new(),
        }
    }

    /// Register `font` once and return its family name.
    pub fn register_font(&mut self, font: &FontAsset) -> Result<String, AssetError> {
        if let Some(name) = self.families.get(&font.path) {
            return Ok(name.clone());
        }

        let families = self
            .font_ctx
            .collection
            .register_fonts(parley::fontique::Blob::new(font.bytes.clone()), None);
        let family_id = families
            .first()
            .map(|(id, _)| *id)
            .ok_or_else(|| AssetError::corrupt(&font.path, "no font families in font file"))?;
        let family_name = self
            .font_ctx
            .collection
            .family_name(family_id)
            .ok_or_else(|| AssetError::corrupt(&font.path, "registered font family has no name"))?
            .to_string();

        self.families
            .insert(font.path.clone(), family_name.clone());
        Ok(family_name)
    }

    /// Shape `text` as a single unbroken line.
    pub fn layout_line(
        &mut self,
        font: &FontAsset,
        text: &str,
        size_px: f32,
        brush: TextBrushRgba8,
    ) -> EngineResult<parley::Layout<TextBrushRgba8>> {
        if !size_px.is_finite() || size_px <= 0.0 {
            return Err(LayoutError::invalid("text size must be finite and > 0").into());
        }
        let family_name = self.register_font(font)?;

        let mut builder = self
            .layout_ctx
            .ranged_builder(&mut self.font_ctx, text, 1.0, true);
        builder.push_default(parley::style::StyleProperty::FontStack(
            parley::style::FontStack::Source(std::borrow::Cow::Owned(family_name)),
        ));
        builder.push_default(parley::style::StyleProperty::FontSize(size_px));
        builder.push_default(parley::style::StyleProperty::Brush(brush));

        let mut layout: parley::Layout<TextBrushRgba8> = builder.build(text);
        layout.break_all_lines(None);
        Ok(layout)
    }
}

/// Measures with real font shaping.
pub struct ParleyMeasurer<'a> {
    engine: &'a mut TextLayoutEngine,
    fonts: &'a HashMap<String, FontAsset>,
}

impl<'a> ParleyMeasurer<'a> {
    pub fn new(engine: &'a mut TextLayoutEngine, fonts: &'a HashMap<String, FontAsset>) -> Self {
        Self { engine, fonts }
    }
}

impl TextMeasure for ParleyMeasurer<'_> {
    fn measure(&mut self, font_key: &str, size_px: f64, text: &str) -> EngineResult<f64> {
        if text.is_empty() {
            return Ok(0.0);
        }
        let font = self.fonts.get(font_key).ok_or_else(|| {
            LayoutError::invalid(format!("text references unbound font '{font_key}'"))
        })?;
        let layout =
            self.engine
                .layout_line(font, text, size_px as f32, TextBrushRgba8::default())?;
        Ok(f64::from(layout.width()))
    }
}

/// Every char advances `size * ratio`. Deterministic, font-free measuring for tests and
/// dry-run layout.
#[derive(Clone, Copy, Debug)]
pub struct FixedAdvanceMeasurer {
    pub advance_ratio: f64,
}

impl Default for FixedAdvanceMeasurer {
    fn default() -> Self {
        Self { advance_ratio: 0.5 }
    }
}

impl TextMeasure for FixedAdvanceMeasurer {
    fn measure(&mut self, _font_key: &str, size_px: f64, text: &str) -> EngineResult<f64> {
        Ok(text.chars().count() as f64 * size_px * self.advance_ratio)
    }
}

/// Common system font locations tried when no default font is configured.
pub fn system_font_candidates() -> &'static [&'static str] {
    &[
        "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
        "/usr/share/fonts/dejavu/DejaVuSans.ttf",
        "/usr/share/fonts/TTF/DejaVuSans.ttf",
        "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
        "/usr/share/fonts/liberation/LiberationSans-Regular.ttf",
        "/System/Library/Fonts/Supplemental/Arial.ttf",
        "/Library/Fonts/Arial.ttf",
        "C:\\Windows\\Fonts\\arial.ttf",
    ]
}

#[cfg(test)]
#[path = "../../tests/unit/assets/text.rs"]
mod tests;
