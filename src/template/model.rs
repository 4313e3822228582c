use std::collections::HashSet;
use std::fmt;

use crate::assets::color::ColorDef;
use crate::foundation::core::MAX_CANVAS_DIM;
use crate::foundation::error::LayoutError;

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
/// A design template: a fixed design canvas and the layers painted onto it.
///
/// Templates are immutable once loaded. Rendering never writes back into a template; every
/// render produces a fresh canvas.
pub struct Template {
    /// Stable template identifier (used in logs only).
    pub id: String,
    /// Design canvas width in template units.
    pub canvas_width: u32,
    /// Design canvas height in template units.
    pub canvas_height: u32,
    /// How layer boxes map onto a target canvas of a different size.
    #[serde(default)]
    pub scaling: ScalingMode,
    /// Optional fill painted before the first layer.
    #[serde(default)]
    pub background: Option<ColorDef>,
    /// Layers in declaration order. Paint order is by `zIndex`, ties keep this order.
    pub layers: Vec<Layer>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ScalingMode {
    /// One factor `min(targetW/designW, targetH/designH)` for both axes.
    #[default]
    Uniform,
    /// Separate horizontal and vertical factors.
    Independent,
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Layer {
    Text(TextLayer),
    Image(ImageLayer),
    Shape(ShapeLayer),
}

impl Layer {
    pub fn common(&self) -> &LayerCommon {
        match self {
            Self::Text(l) => &l.common,
            Self::Image(l) => &l.common,
            Self::Shape(l) => &l.common,
        }
    }

    pub fn id(&self) -> &str {
        &self.common().id
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Image(_) => "image",
            Self::Shape(_) => "shape",
        }
    }
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
/// Fields shared by every layer kind, in design-canvas units.
pub struct LayerCommon {
    pub id: String,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    #[serde(default)]
    pub rotation_degrees: f64,
    #[serde(default = "default_opacity")]
    pub opacity: f64,
    #[serde(default)]
    pub z_index: i32,
    #[serde(default)]
    pub blend_mode: BlendMode,
}

fn default_opacity() -> f64 {
    1.0
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BlendMode {
    #[default]
    Normal,
    Multiply,
    Screen,
    Overlay,
    Darken,
    Lighten,
    ColorDodge,
    ColorBurn,
}

impl fmt::Display for BlendMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Normal => "normal",
            Self::Multiply => "multiply",
            Self::Screen => "screen",
            Self::Overlay => "overlay",
            Self::Darken => "darken",
            Self::Lighten => "lighten",
            Self::ColorDodge => "colorDodge",
            Self::ColorBurn => "colorBurn",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextLayer {
    #[serde(flatten)]
    pub common: LayerCommon,
    /// Literal text, used when `contentKey` is absent or unbound.
    #[serde(default)]
    pub text: String,
    /// Placeholder key looked up in the job's text content (e.g. `companyName`).
    #[serde(default)]
    pub content_key: Option<String>,
    #[serde(default = "default_font_size")]
    pub font_size: f64,
    #[serde(default = "ColorDef::black")]
    pub color: ColorDef,
    /// Font binding key; falls back to the engine default font.
    #[serde(default)]
    pub font: Option<String>,
    #[serde(default)]
    pub align: TextAlign,
    /// Line advance as a multiple of font size; engine default when absent.
    #[serde(default)]
    pub line_height: Option<f64>,
    /// Rounded box painted behind the text block.
    #[serde(default)]
    pub background: Option<ColorDef>,
    #[serde(default)]
    pub overflow: TextOverflow,
}

fn default_font_size() -> f64 {
    24.0
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TextAlign {
    #[default]
    Left,
    Center,
    Right,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TextOverflow {
    /// Wrap, then cut the last fitting line with `…`.
    #[default]
    Ellipsis,
    /// Shrink the font until the text fits, ellipsizing at the minimum size.
    ShrinkToFit,
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageLayer {
    #[serde(flatten)]
    pub common: LayerCommon,
    /// Default asset path; a job binding for this layer id takes precedence.
    #[serde(default)]
    pub asset: Option<String>,
    #[serde(default)]
    pub fit: ImageFit,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ImageFit {
    /// Stretch to the box.
    #[default]
    Fill,
    /// Letterbox inside the box, aspect preserved.
    Contain,
    /// Cover the box, aspect preserved, excess cropped.
    Cover,
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShapeLayer {
    #[serde(flatten)]
    pub common: LayerCommon,
    pub shape: ShapeGeometry,
    pub fill: ColorDef,
    #[serde(default)]
    pub stroke: Option<Stroke>,
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(
    tag = "kind",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ShapeGeometry {
    Rect {
        #[serde(default)]
        corner_radius: f64,
    },
    Ellipse,
    /// SVG path data in layer-local units (`0..width`, `0..height`).
    Path { d: String },
}

#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Stroke {
    pub color: ColorDef,
    pub width: f64,
}

impl Template {
    /// Parse and validate template JSON. Unknown layer types are rejected.
    pub fn from_json(text: &str) -> Result<Self, LayoutError> {
        let t: Self = serde_json::from_str(text)
            .map_err(|e| LayoutError::invalid(format!("template json: {e}")))?;
        t.validate()?;
        Ok(t)
    }

    pub fn validate(&self) -> Result<(), LayoutError> {
        if self.canvas_width == 0 || self.canvas_height == 0 {
            return Err(LayoutError::invalid("canvasWidth/canvasHeight must be > 0"));
        }
        if self.canvas_width > MAX_CANVAS_DIM || self.canvas_height > MAX_CANVAS_DIM {
            return Err(LayoutError::invalid(format!(
                "design canvas exceeds {MAX_CANVAS_DIM}px"
            )));
        }

        let mut seen = HashSet::with_capacity(self.layers.len());
        for layer in &self.layers {
            let c = layer.common();
            if c.id.trim().is_empty() {
                return Err(LayoutError::invalid("layer id must be non-empty"));
            }
            if !seen.insert(c.id.as_str()) {
                return Err(LayoutError::invalid(format!(
                    "duplicate layer id '{}'",
                    c.id
                )));
            }
            validate_common(c)?;

            match layer {
                Layer::Text(t) => {
                    if !t.font_size.is_finite() || t.font_size <= 0.0 {
                        return Err(LayoutError::invalid(format!(
                            "text layer '{}' fontSize must be finite and > 0",
                            c.id
                        )));
                    }
                    if let Some(lh) = t.line_height
                        && (!lh.is_finite() || lh <= 0.0)
                    {
                        return Err(LayoutError::invalid(format!(
                            "text layer '{}' lineHeight must be finite and > 0",
                            c.id
                        )));
                    }
                }
                Layer::Image(i) => {
                    if let Some(a) = &i.asset
                        && a.trim().is_empty()
                    {
                        return Err(LayoutError::invalid(format!(
                            "image layer '{}' asset must be non-empty when set",
                            c.id
                        )));
                    }
                }
                Layer::Shape(s) => validate_shape(&c.id, s)?,
            }
        }
        Ok(())
    }
}

fn validate_common(c: &LayerCommon) -> Result<(), LayoutError> {
    for (name, v) in [
        ("x", c.x),
        ("y", c.y),
        ("width", c.width),
        ("height", c.height),
        ("rotationDegrees", c.rotation_degrees),
    ] {
        if !v.is_finite() {
            return Err(LayoutError::invalid(format!(
                "layer '{}' {name} must be finite",
                c.id
            )));
        }
    }
    if c.width < 0.0 || c.height < 0.0 {
        return Err(LayoutError::invalid(format!(
            "layer '{}' width/height must be >= 0",
            c.id
        )));
    }
    if !(0.0..=1.0).contains(&c.opacity) {
        return Err(LayoutError::invalid(format!(
            "layer '{}' opacity must be in [0,1]",
            c.id
        )));
    }
    Ok(())
}

fn validate_shape(id: &str, s: &ShapeLayer) -> Result<(), LayoutError> {
    match &s.shape {
        ShapeGeometry::Rect { corner_radius } => {
            if !corner_radius.is_finite() || *corner_radius < 0.0 {
                return Err(LayoutError::invalid(format!(
                    "shape layer '{id}' cornerRadius must be finite and >= 0"
                )));
            }
        }
        ShapeGeometry::Ellipse => {}
        ShapeGeometry::Path { d } => {
            kurbo::BezPath::from_svg(d).map_err(|e| {
                LayoutError::invalid(format!("shape layer '{id}' path data: {e}"))
            })?;
        }
    }
    if let Some(stroke) = &s.stroke
        && (!stroke.width.is_finite() || stroke.width < 0.0)
    {
        return Err(LayoutError::invalid(format!(
            "shape layer '{id}' stroke width must be finite and >= 0"
        )));
    }
    Ok(())
}

#[cfg(test)]
#[path = "../../tests/unit/template/model.rs"]
mod tests;
