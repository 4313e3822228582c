use std::path::Path;

use crate::foundation::core::{CanvasSize, MAX_CANVAS_DIM};
use crate::foundation::error::AssetError;

/// Pixel layout of a decoded buffer. Everything downstream is premultiplied RGBA8.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    Rgba8Premul,
}

/// A decoded raster asset. Shared immutably once it leaves the loader.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PixelBuffer {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub data: Vec<u8>,
}

impl PixelBuffer {
    pub fn new_premul(width: u32, height: u32, data: Vec<u8>) -> Self {
        debug_assert_eq!(data.len(), (width as usize) * (height as usize) * 4);
        Self {
            width,
            height,
            format: PixelFormat::Rgba8Premul,
            data,
        }
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }
}

/// Encoded formats the loader accepts, identified by content rather than extension.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceFormat {
    Jpeg,
    Png,
    Webp,
    Svg,
}

pub fn sniff_format(bytes: &[u8]) -> Option<SourceFormat> {
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return Some(SourceFormat::Jpeg);
    }
    if bytes.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
        return Some(SourceFormat::Png);
    }
    if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        return Some(SourceFormat::Webp);
    }

    let head = &bytes[..bytes.len().min(1024)];
    let head = head.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(head);
    let text = String::from_utf8_lossy(head);
    let trimmed = text.trim_start();
    if (trimmed.starts_with("<?xml") || trimmed.starts_with("<svg") || trimmed.starts_with("<!--"))
        && text.contains("<svg")
    {
        return Some(SourceFormat::Svg);
    }
    None
}

/// Decode encoded bytes into premultiplied RGBA8, resized to `target` when given.
pub fn decode_image(
    path: &Path,
    bytes: &[u8],
    target: Option<CanvasSize>,
) -> Result<PixelBuffer, AssetError> {
    let format = sniff_format(bytes)
        .ok_or_else(|| AssetError::unsupported(path, "not a JPEG, PNG, WebP or SVG file"))?;

    match format {
        SourceFormat::Svg => rasterize_svg(path, bytes, target),
        raster => decode_raster(path, bytes, raster, target),
    }
}

fn decode_raster(
    path: &Path,
    bytes: &[u8],
    format: SourceFormat,
    target: Option<CanvasSize>,
) -> Result<PixelBuffer, AssetError> {
    let image_format = match format {
        SourceFormat::Jpeg => image::ImageFormat::Jpeg,
        SourceFormat::Png => image::ImageFormat::Png,
        SourceFormat::Webp => image::ImageFormat::WebP,
        SourceFormat::Svg => return Err(AssetError::unsupported(path, "svg is not a raster")),
    };

    let dyn_img = image::load_from_memory_with_format(bytes, image_format)
        .map_err(|e| AssetError::corrupt(path, e.to_string()))?;
    let rgba = dyn_img.to_rgba8();
    let (width, height) = rgba.dimensions();
    if width == 0 || height == 0 {
        return Err(AssetError::corrupt(path, "image has zero dimensions"));
    }

    let mut data = rgba.into_raw();
    premultiply_rgba8_in_place(&mut data);

    match target {
        Some(t) if (t.width, t.height) != (width, height) => {
            let src = image::RgbaImage::from_raw(width, height, data)
                .ok_or_else(|| AssetError::corrupt(path, "decoded buffer size mismatch"))?;
            // Premultiplied data resizes without dark fringes at alpha edges.
            let resized = image::imageops::resize(
                &src,
                t.width,
                t.height,
                image::imageops::FilterType::Triangle,
            );
            Ok(PixelBuffer::new_premul(t.width, t.height, resized.into_raw()))
        }
        _ => Ok(PixelBuffer::new_premul(width, height, data)),
    }
}

fn rasterize_svg(
    path: &Path,
    bytes: &[u8],
    target: Option<CanvasSize>,
) -> Result<PixelBuffer, AssetError> {
    let opts = usvg::Options::default();
    let tree =
        usvg::Tree::from_data(bytes, &opts).map_err(|e| AssetError::corrupt(path, e.to_string()))?;

    let size = tree.size();
    let (width, height) = match target {
        Some(t) => (t.width, t.height),
        None => {
            let to_px = |v: f32| -> Result<u32, AssetError> {
                if !v.is_finite() || v <= 0.0 {
                    return Err(AssetError::corrupt(path, "svg has invalid width/height"));
                }
                Ok((v.ceil() as u32).max(1))
            };
            (to_px(size.width())?, to_px(size.height())?)
        }
    };
    if width > MAX_CANVAS_DIM || height > MAX_CANVAS_DIM {
        return Err(AssetError::unsupported(
            path,
            format!("svg raster size too large: {width}x{height}"),
        ));
    }

    let mut pixmap = resvg::tiny_skia::Pixmap::new(width, height)
        .ok_or_else(|| AssetError::corrupt(path, "failed to allocate svg pixmap"))?;
    let sx = (width as f32) / size.width();
    let sy = (height as f32) / size.height();
    resvg::render(
        &tree,
        resvg::tiny_skia::Transform::from_scale(sx, sy),
        &mut pixmap.as_mut(),
    );

    // tiny-skia pixmaps are already premultiplied RGBA8.
    Ok(PixelBuffer::new_premul(width, height, pixmap.take()))
}

pub(crate) fn premultiply_rgba8_in_place(rgba: &mut [u8]) {
    for px in rgba.chunks_exact_mut(4) {
        let a = u16::from(px[3]);
        if a == 0 {
            px[0] = 0;
            px[1] = 0;
            px[2] = 0;
            continue;
        }
        px[0] = ((u16::from(px[0]) * a + 127) / 255) as u8;
        px[1] = ((u16::from(px[1]) * a + 127) / 255) as u8;
        px[2] = ((u16::from(px[2]) * a + 127) / 255) as u8;
    }
}

#[cfg(test)]
#[path = "../../tests/unit/assets/decode.rs"]
mod tests;
