use crate::foundation::error::CompositeError;
use crate::foundation::math::{add_sat_u8, mul_div255_u16, opacity_to_u8};
use crate::template::model::BlendMode;

pub type PremulRgba8 = [u8; 4];

/// The subset of [`BlendMode`] that has a pixel implementation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelBlend {
    Normal,
    Multiply,
    Screen,
}

impl PixelBlend {
    /// Map a template blend mode, rejecting modes that are enumerated but unimplemented.
    pub fn from_mode(mode: BlendMode) -> Result<Self, CompositeError> {
        match mode {
            BlendMode::Normal => Ok(Self::Normal),
            BlendMode::Multiply => Ok(Self::Multiply),
            BlendMode::Screen => Ok(Self::Screen),
            other => Err(CompositeError::UnsupportedBlendMode(other)),
        }
    }
}

/// Blend one premultiplied source pixel into `dst`, opacity folded into the source first.
pub fn blend(dst: PremulRgba8, src: PremulRgba8, opacity: f32, mode: PixelBlend) -> PremulRgba8 {
    let op = opacity_to_u8(opacity);
    if op == 0 || src[3] == 0 {
        return dst;
    }
    let s = [
        mul_div255_u16(u16::from(src[0]), op),
        mul_div255_u16(u16::from(src[1]), op),
        mul_div255_u16(u16::from(src[2]), op),
        mul_div255_u16(u16::from(src[3]), op),
    ];
    let sa = s[3];
    if sa == 0 {
        return dst;
    }
    let da = u16::from(dst[3]);
    let inv_sa = 255 - sa;

    let mut out = [0u8; 4];
    out[3] = add_sat_u8(sa, mul_div255_u16(da, inv_sa));
    for i in 0..3 {
        let sc = s[i];
        let dc = u16::from(dst[i]);
        out[i] = match mode {
            PixelBlend::Normal => add_sat_u8(sc, mul_div255_u16(dc, inv_sa)),
            // Sc*(1-Da) + Dc*(1-Sa) + Sc*Dc
            PixelBlend::Multiply => {
                let v = u32::from(mul_div255_u16(sc, 255 - da))
                    + u32::from(mul_div255_u16(dc, inv_sa))
                    + u32::from(mul_div255_u16(sc, dc));
                v.min(255) as u8
            }
            // Sc + Dc - Sc*Dc
            PixelBlend::Screen => (sc + dc).saturating_sub(mul_div255_u16(sc, dc)).min(255) as u8,
        };
    }
    out
}

/// Blend a row of premultiplied pixels.
pub fn blend_row(dst: &mut [u8], src: &[u8], opacity: f32, mode: PixelBlend) {
    for (d, s) in dst.chunks_exact_mut(4).zip(src.chunks_exact(4)) {
        if s[3] == 0 {
            continue;
        }
        let out = blend([d[0], d[1], d[2], d[3]], [s[0], s[1], s[2], s[3]], opacity, mode);
        d.copy_from_slice(&out);
    }
}

#[cfg(test)]
#[path = "../../tests/unit/render/blend.rs"]
mod tests;
