use crate::assets::decode::PixelBuffer;
use crate::foundation::core::{CanvasSize, Rect};
use crate::foundation::error::{EngineResult, LayoutError};
use crate::layout::ops::{DrawContent, DrawOp};
use crate::render::canvas::Canvas;
use crate::render::compositor::{apply_layer, prepare_image_layer};
use crate::template::job::{Anchor, WatermarkSpec};
use crate::template::model::{BlendMode, ImageFit};

/// Layer id used for the injected watermark op.
pub const WATERMARK_LAYER_ID: &str = "<watermark>";

/// Integer-aligned watermark box on a canvas.
///
/// Width is `widthFraction` (or `default_fraction`) of the canvas width; height follows the
/// asset's aspect ratio.
pub fn watermark_bounds(
    canvas: CanvasSize,
    asset_size: (u32, u32),
    spec: &WatermarkSpec,
    default_fraction: f64,
) -> Result<Rect, LayoutError> {
    spec.validate()?;
    let (aw, ah) = asset_size;
    if aw == 0 || ah == 0 {
        return Err(LayoutError::invalid("watermark asset has zero size"));
    }
    let fraction = spec.width_fraction.unwrap_or(default_fraction);
    if !fraction.is_finite() || fraction <= 0.0 || fraction > 1.0 {
        return Err(LayoutError::invalid(format!(
            "watermark width fraction {fraction} must be in (0,1]"
        )));
    }

    let cw = f64::from(canvas.width);
    let ch = f64::from(canvas.height);
    let w = (cw * fraction).round().max(1.0);
    let h = (w * f64::from(ah) / f64::from(aw)).round().max(1.0);
    let m = spec.margin_px.round();

    let (col, row) = anchor_cell(spec.anchor);
    let x = match col {
        0 => m,
        1 => ((cw - w) * 0.5).round(),
        _ => cw - m - w,
    };
    let y = match row {
        0 => m,
        1 => ((ch - h) * 0.5).round(),
        _ => ch - m - h,
    };
    Ok(Rect::new(x, y, x + w, y + h))
}

fn anchor_cell(anchor: Anchor) -> (u8, u8) {
    match anchor {
        Anchor::TopLeft => (0, 0),
        Anchor::TopCenter => (1, 0),
        Anchor::TopRight => (2, 0),
        Anchor::CenterLeft => (0, 1),
        Anchor::Center => (1, 1),
        Anchor::CenterRight => (2, 1),
        Anchor::BottomLeft => (0, 2),
        Anchor::BottomCenter => (1, 2),
        Anchor::BottomRight => (2, 2),
    }
}

/// The watermark as a single Normal image op, drawn above every template layer.
pub fn watermark_op(spec: &WatermarkSpec, bounds: Rect) -> DrawOp {
    DrawOp {
        layer_id: WATERMARK_LAYER_ID.to_string(),
        z_index: i32::MAX,
        bounds,
        rotation_deg: 0.0,
        opacity: spec.opacity as f32,
        blend: BlendMode::Normal,
        content: DrawContent::Image {
            asset: Some(spec.asset.clone()),
            fit: ImageFit::Fill,
        },
    }
}

/// Stamp `asset` onto `canvas` according to `spec`.
///
/// Pure function of its inputs: identical canvases and specs give identical bytes.
pub fn apply(
    canvas: &mut Canvas,
    spec: &WatermarkSpec,
    asset: &PixelBuffer,
    default_fraction: f64,
) -> EngineResult<()> {
    let bounds = watermark_bounds(
        canvas.size(),
        (asset.width, asset.height),
        spec,
        default_fraction,
    )?;
    let op = watermark_op(spec, bounds);
    tracing::debug!(?bounds, anchor = ?spec.anchor, "placing watermark");
    if let Some(layer) = prepare_image_layer(&op, asset, canvas.size())? {
        apply_layer(canvas, &layer);
    }
    Ok(())
}

#[cfg(test)]
#[path = "../../tests/unit/render/watermark.rs"]
mod tests;
