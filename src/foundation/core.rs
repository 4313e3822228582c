use crate::foundation::error::{EngineError, EngineResult};

pub use kurbo::{Affine, BezPath, Point, Rect, Vec2};

/// Largest width or height accepted for any raster surface.
pub const MAX_CANVAS_DIM: u32 = 16_384;

/// Pixel dimensions of a canvas or decoded buffer.
///
/// Deserializing goes through [`CanvasSize::new`], so zero or oversized dimensions are rejected
/// at parse time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "RawCanvasSize")]
pub struct CanvasSize {
    pub width: u32,
    pub height: u32,
}

#[derive(serde::Deserialize)]
struct RawCanvasSize {
    width: u32,
    height: u32,
}

impl TryFrom<RawCanvasSize> for CanvasSize {
    type Error = EngineError;

    fn try_from(raw: RawCanvasSize) -> EngineResult<Self> {
        Self::new(raw.width, raw.height)
    }
}

impl CanvasSize {
    pub fn new(width: u32, height: u32) -> EngineResult<Self> {
        if width == 0 || height == 0 {
            return Err(EngineError::config("canvas dimensions must be > 0"));
        }
        if width > MAX_CANVAS_DIM || height > MAX_CANVAS_DIM {
            return Err(EngineError::config(format!(
                "canvas {width}x{height} exceeds the {MAX_CANVAS_DIM}px limit"
            )));
        }
        Ok(Self { width, height })
    }

    /// Re-check dimensions of a value built field by field.
    pub fn validate(self) -> EngineResult<()> {
        Self::new(self.width, self.height).map(|_| ())
    }

    pub fn byte_len(self) -> usize {
        (self.width as usize) * (self.height as usize) * 4
    }

    pub fn as_rect(self) -> Rect {
        Rect::new(0.0, 0.0, f64::from(self.width), f64::from(self.height))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Fps {
    pub num: u32,
    pub den: u32, // must be > 0
}

impl Fps {
    pub fn new(num: u32, den: u32) -> EngineResult<Self> {
        if den == 0 || num == 0 {
            return Err(EngineError::config("fps num/den must be > 0"));
        }
        Ok(Self { num, den })
    }

    pub fn as_f64(self) -> f64 {
        f64::from(self.num) / f64::from(self.den)
    }

    /// Presentation timestamp of frame `index`, in microseconds.
    pub fn frame_timestamp_micros(self, index: u64) -> u64 {
        let num = u128::from(self.num);
        let den = u128::from(self.den);
        ((u128::from(index) * 1_000_000 * den) / num) as u64
    }

    pub fn frames_to_micros(self, frames: u64) -> u64 {
        self.frame_timestamp_micros(frames)
    }

    /// `num/den`, the form ffmpeg takes for `-r` and the `fps` filter.
    pub fn to_rational_string(self) -> String {
        format!("{}/{}", self.num, self.den)
    }
}

/// Premultiplied RGBA8 (r,g,b already multiplied by a).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Rgba8Premul {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba8Premul {
    pub fn transparent() -> Self {
        Self {
            r: 0,
            g: 0,
            b: 0,
            a: 0,
        }
    }

    pub fn opaque_black() -> Self {
        Self {
            r: 0,
            g: 0,
            b: 0,
            a: 255,
        }
    }

    pub fn from_straight_rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        use crate::foundation::math::mul_div255_u8;
        Self {
            r: mul_div255_u8(u16::from(r), u16::from(a)),
            g: mul_div255_u8(u16::from(g), u16::from(a)),
            b: mul_div255_u8(u16::from(b), u16::from(a)),
            a,
        }
    }

    pub fn to_array(self) -> [u8; 4] {
        [self.r, self.g, self.b, self.a]
    }

    /// Un-premultiplied color, as raster backends expect for solid paints.
    pub fn to_straight(self) -> [u8; 4] {
        if self.a == 0 {
            return [0, 0, 0, 0];
        }
        let a = u32::from(self.a);
        let un = |c: u8| (((u32::from(c) * 255) + a / 2) / a).min(255) as u8;
        [un(self.r), un(self.g), un(self.b), self.a]
    }
}

/// Placement of a layer box: translation, rotation about a pivot, and scale.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Transform2D {
    pub translate: Vec2,
    pub rotation_rad: f64,
    pub scale: Vec2,  // default (1,1)
    pub anchor: Vec2, // pivot in local space
}

impl Default for Transform2D {
    fn default() -> Self {
        Self {
            translate: Vec2::ZERO,
            rotation_rad: 0.0,
            scale: Vec2::new(1.0, 1.0),
            anchor: Vec2::ZERO,
        }
    }
}

impl Transform2D {
    /// Map local content of `content_size` into `bounds`, rotated about the box center.
    pub fn for_box(bounds: Rect, content_size: (f64, f64), rotation_deg: f64) -> Self {
        let (cw, ch) = content_size;
        let sx = if cw > 0.0 { bounds.width() / cw } else { 1.0 };
        let sy = if ch > 0.0 { bounds.height() / ch } else { 1.0 };
        Self {
            translate: Vec2::new(bounds.x0, bounds.y0),
            rotation_rad: rotation_deg.to_radians(),
            scale: Vec2::new(sx, sy),
            anchor: Vec2::new(cw * 0.5, ch * 0.5),
        }
    }

    pub fn to_affine(self) -> Affine {
        let t_translate = Affine::translate(self.translate);
        let t_anchor = Affine::translate(Vec2::new(
            self.anchor.x * self.scale.x,
            self.anchor.y * self.scale.y,
        ));
        let t_unanchor = Affine::translate(-self.anchor);
        let t_rotate = Affine::rotate(self.rotation_rad);
        let t_scale = Affine::scale_non_uniform(self.scale.x, self.scale.y);

        // T(translate) * T(scaled anchor) * R(rot) * S(scale) * T(-anchor):
        // the box keeps its scaled footprint and spins about its own center.
        t_translate * t_anchor * t_rotate * t_scale * t_unanchor
    }
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/core.rs"]
mod tests;
