use std::collections::BTreeMap;

use smallvec::SmallVec;

use crate::assets::text::{DEFAULT_FONT_KEY, TextMeasure};
use crate::foundation::core::{CanvasSize, Rect};
use crate::foundation::error::{EngineResult, LayoutError};
use crate::layout::ops::{DrawContent, DrawOp, ShapeSpec, TextBlock, TextLine};
use crate::layout::wrap::{WrapOutcome, wrap_text};
use crate::template::job::AssetRef;
use crate::template::model::{
    Layer, ScalingMode, ShapeGeometry, ShapeLayer, Stroke, Template, TextAlign, TextLayer,
    TextOverflow,
};

const MIN_SCALE: f64 = 1.0 / 1024.0;
const MAX_SCALE: f64 = 1024.0;
/// Smallest font `shrinkToFit` will go to before falling back to an ellipsis.
const MIN_SHRINK_FONT_PX: f64 = 8.0;
const SHRINK_STEP: f64 = 0.9;

/// Per-job content substituted into a template.
#[derive(Clone, Debug, Default)]
pub struct LayoutContent {
    /// Image layer id to asset; wins over the layer's own `asset`.
    pub assets: BTreeMap<String, AssetRef>,
    /// `contentKey` to text.
    pub text: BTreeMap<String, String>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ResolveOptions {
    /// Line advance factor for text layers without their own `lineHeight`.
    pub line_height: f64,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self { line_height: 1.2 }
    }
}

/// Design-to-target factors for each axis, plus the factor applied to font sizes.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScaleFactors {
    pub sx: f64,
    pub sy: f64,
}

impl ScaleFactors {
    pub fn font(self) -> f64 {
        self.sx.min(self.sy)
    }

    fn apply(self, x: f64, y: f64, w: f64, h: f64) -> Rect {
        Rect::new(
            x * self.sx,
            y * self.sy,
            (x + w) * self.sx,
            (y + h) * self.sy,
        )
    }
}

pub fn scale_factors(template: &Template, target: CanvasSize) -> Result<ScaleFactors, LayoutError> {
    let fx = f64::from(target.width) / f64::from(template.canvas_width.max(1));
    let fy = f64::from(target.height) / f64::from(template.canvas_height.max(1));
    let (sx, sy) = match template.scaling {
        ScalingMode::Uniform => {
            let s = fx.min(fy);
            (s, s)
        }
        ScalingMode::Independent => (fx, fy),
    };
    let in_range = |s: f64| s.is_finite() && (MIN_SCALE..=MAX_SCALE).contains(&s);
    if !in_range(sx) || !in_range(sy) {
        return Err(LayoutError::ScaleOutOfRange { sx, sy });
    }
    Ok(ScaleFactors { sx, sy })
}

/// Interpret `template` against a `target` canvas, producing draw ops in paint order.
///
/// Paint order is ascending `zIndex`; equal `zIndex` keeps declaration order.
#[tracing::instrument(skip_all, fields(template = %template.id, w = target.width, h = target.height))]
pub fn resolve(
    template: &Template,
    target: CanvasSize,
    content: &LayoutContent,
    measurer: &mut dyn TextMeasure,
    opts: &ResolveOptions,
) -> EngineResult<Vec<DrawOp>> {
    template.validate()?;
    let scale = scale_factors(template, target)?;

    let mut ops = Vec::with_capacity(template.layers.len());
    for layer in &template.layers {
        let c = layer.common();
        let bounds = scale.apply(c.x, c.y, c.width, c.height);
        let draw = match layer {
            Layer::Image(img) => DrawContent::Image {
                asset: content
                    .assets
                    .get(&c.id)
                    .cloned()
                    .or_else(|| img.asset.as_ref().map(AssetRef::new)),
                fit: img.fit,
            },
            Layer::Text(text) => {
                DrawContent::Text(resolve_text(text, bounds, scale, content, measurer, opts)?)
            }
            Layer::Shape(shape) => DrawContent::Shape(resolve_shape(shape, scale)),
        };

        ops.push(DrawOp {
            layer_id: c.id.clone(),
            z_index: c.z_index,
            bounds,
            rotation_deg: c.rotation_degrees,
            opacity: c.opacity as f32,
            blend: c.blend_mode,
            content: draw,
        });
    }

    // Stable: ties keep declaration order.
    ops.sort_by_key(|op| op.z_index);
    tracing::debug!(ops = ops.len(), sx = scale.sx, sy = scale.sy, "resolved layout");
    Ok(ops)
}

fn resolve_text(
    layer: &TextLayer,
    bounds: Rect,
    scale: ScaleFactors,
    content: &LayoutContent,
    measurer: &mut dyn TextMeasure,
    opts: &ResolveOptions,
) -> EngineResult<TextBlock> {
    let text = layer
        .content_key
        .as_ref()
        .and_then(|k| content.text.get(k))
        .unwrap_or(&layer.text);
    let font_key = layer.font.as_deref().unwrap_or(DEFAULT_FONT_KEY);
    let factor = layer.line_height.unwrap_or(opts.line_height);
    let (box_w, box_h) = (bounds.width(), bounds.height());

    let mut lay_out = |size: f64| -> EngineResult<(WrapOutcome, f64)> {
        let advance = size * factor;
        let max_lines = ((box_h / advance).floor() as usize).max(1);
        let outcome = wrap_text(&mut *measurer, font_key, size, text, box_w, max_lines)?;
        Ok((outcome, advance))
    };

    let mut size = layer.font_size * scale.font();
    let (mut outcome, mut advance) = lay_out(size)?;
    if layer.overflow == TextOverflow::ShrinkToFit {
        let min = MIN_SHRINK_FONT_PX.min(size);
        while outcome.truncated && size > min {
            size = (size * SHRINK_STEP).max(min);
            (outcome, advance) = lay_out(size)?;
        }
    }

    let lines: SmallVec<[TextLine; 4]> = outcome
        .lines
        .into_iter()
        .enumerate()
        .map(|(i, l)| {
            let x = match layer.align {
                TextAlign::Left => 0.0,
                TextAlign::Center => (box_w - l.width) * 0.5,
                TextAlign::Right => box_w - l.width,
            };
            TextLine {
                x,
                y: i as f64 * advance,
                width: l.width,
                text: l.text,
            }
        })
        .collect();

    Ok(TextBlock {
        font_key: font_key.to_string(),
        font_size: size,
        line_advance: advance,
        color: layer.color,
        background: layer.background,
        lines,
        truncated: outcome.truncated,
    })
}

fn resolve_shape(layer: &ShapeLayer, scale: ScaleFactors) -> ShapeSpec {
    let geometry = match &layer.shape {
        ShapeGeometry::Rect { corner_radius } => ShapeGeometry::Rect {
            corner_radius: corner_radius * scale.font(),
        },
        other => other.clone(),
    };
    ShapeSpec {
        geometry,
        path_scale: (scale.sx, scale.sy),
        fill: layer.fill,
        stroke: layer.stroke.map(|s| Stroke {
            color: s.color,
            width: s.width * scale.font(),
        }),
    }
}

#[cfg(test)]
#[path = "../../tests/unit/layout/resolver.rs"]
mod tests;
