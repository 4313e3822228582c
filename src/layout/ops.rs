use smallvec::SmallVec;

use crate::assets::color::ColorDef;
use crate::foundation::core::Rect;
use crate::template::job::AssetRef;
use crate::template::model::{BlendMode, ImageFit, ShapeGeometry, Stroke};

/// One resolved layer, in target-canvas pixels, ready for the compositor.
#[derive(Clone, Debug, PartialEq)]
pub struct DrawOp {
    pub layer_id: String,
    pub z_index: i32,
    /// Un-rotated layer box on the target canvas.
    pub bounds: Rect,
    /// Clockwise rotation about the center of `bounds`.
    pub rotation_deg: f64,
    pub opacity: f32,
    pub blend: BlendMode,
    pub content: DrawContent,
}

#[derive(Clone, Debug, PartialEq)]
pub enum DrawContent {
    /// `asset` is `None` when neither the layer nor the job binds a file.
    Image {
        asset: Option<AssetRef>,
        fit: ImageFit,
    },
    Text(TextBlock),
    Shape(ShapeSpec),
}

/// Text already broken into lines and positioned inside the layer box.
#[derive(Clone, Debug, PartialEq)]
pub struct TextBlock {
    pub font_key: String,
    pub font_size: f64,
    pub line_advance: f64,
    pub color: ColorDef,
    pub background: Option<ColorDef>,
    pub lines: SmallVec<[TextLine; 4]>,
    /// True when wrapping had to drop or cut text.
    pub truncated: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TextLine {
    pub text: String,
    /// Offset from the box's left edge after alignment.
    pub x: f64,
    /// Offset of the line top from the box's top edge.
    pub y: f64,
    pub width: f64,
}

impl TextBlock {
    /// Extent of the laid-out lines in box-local coordinates.
    pub fn ink_bounds(&self) -> Option<Rect> {
        let mut lines = self.lines.iter().filter(|l| !l.text.is_empty());
        let first = lines.next()?;
        let mut r = Rect::new(first.x, first.y, first.x + first.width, first.y + self.line_advance);
        for l in lines {
            r = r.union(Rect::new(l.x, l.y, l.x + l.width, l.y + self.line_advance));
        }
        Some(r)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ShapeSpec {
    /// Rect corner radii are already in target pixels.
    pub geometry: ShapeGeometry,
    /// Design-to-target factors applied to path data.
    pub path_scale: (f64, f64),
    pub fill: ColorDef,
    /// Stroke width already in target pixels.
    pub stroke: Option<Stroke>,
}

impl DrawOp {
    pub fn kind_name(&self) -> &'static str {
        match self.content {
            DrawContent::Image { .. } => "image",
            DrawContent::Text(_) => "text",
            DrawContent::Shape(_) => "shape",
        }
    }
}
