use std::io::{BufWriter, Write};
use std::path::Path;

use image::ImageEncoder as _;

use crate::foundation::core::Rgba8Premul;
use crate::foundation::error::ExportError;
use crate::render::canvas::Canvas;
use crate::template::job::PosterFormat;

use super::staging::{ExportResult, StagedOutput};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PosterEncodeOptions {
    /// 1..=100.
    pub jpeg_quality: u8,
    /// JPEG has no alpha; transparent pixels are flattened onto this color.
    pub jpeg_matte: [u8; 3],
}

impl Default for PosterEncodeOptions {
    fn default() -> Self {
        Self {
            jpeg_quality: 90,
            jpeg_matte: [255, 255, 255],
        }
    }
}

/// Encode a premultiplied canvas to `out`.
pub fn encode_poster<W: Write>(
    canvas: &Canvas,
    format: PosterFormat,
    opts: PosterEncodeOptions,
    out: W,
) -> Result<(), ExportError> {
    let (w, h) = (canvas.width(), canvas.height());
    let res = match format {
        PosterFormat::Png => image::codecs::png::PngEncoder::new(out).write_image(
            &unpremultiply(canvas.data()),
            w,
            h,
            image::ExtendedColorType::Rgba8,
        ),
        PosterFormat::Jpeg => {
            if !(1..=100).contains(&opts.jpeg_quality) {
                return Err(ExportError::encode(format!(
                    "jpeg quality {} outside 1..=100",
                    opts.jpeg_quality
                )));
            }
            image::codecs::jpeg::JpegEncoder::new_with_quality(out, opts.jpeg_quality)
                .write_image(
                    &flatten_to_rgb(canvas.data(), opts.jpeg_matte),
                    w,
                    h,
                    image::ExtendedColorType::Rgb8,
                )
        }
        PosterFormat::Webp => image::codecs::webp::WebPEncoder::new_lossless(out).write_image(
            &unpremultiply(canvas.data()),
            w,
            h,
            image::ExtendedColorType::Rgba8,
        ),
    };
    res.map_err(|e| ExportError::encode(format!("{format:?} encode failed: {e}")))
}

/// Encode `canvas` and atomically place it at `destination`.
#[tracing::instrument(skip(canvas, opts), fields(width = canvas.width(), height = canvas.height()))]
pub fn finalize_poster(
    canvas: &Canvas,
    destination: &Path,
    format: PosterFormat,
    opts: PosterEncodeOptions,
) -> Result<ExportResult, ExportError> {
    let staged = StagedOutput::new(destination)?;
    let file = std::fs::File::create(staged.temp_path())
        .map_err(|e| ExportError::io(staged.temp_path(), e))?;
    let mut writer = BufWriter::new(file);
    encode_poster(canvas, format, opts, &mut writer)?;
    writer
        .into_inner()
        .map_err(|e| ExportError::io(staged.temp_path(), e.into_error()))?
        .sync_all()
        .map_err(|e| ExportError::io(staged.temp_path(), e))?;
    staged.commit()
}

fn unpremultiply(premul: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(premul.len());
    for px in premul.chunks_exact(4) {
        let straight = Rgba8Premul {
            r: px[0],
            g: px[1],
            b: px[2],
            a: px[3],
        }
        .to_straight();
        out.extend_from_slice(&straight);
    }
    out
}

fn flatten_to_rgb(premul: &[u8], matte: [u8; 3]) -> Vec<u8> {
    let mut out = Vec::with_capacity(premul.len() / 4 * 3);
    for px in premul.chunks_exact(4) {
        let inv = 255 - u32::from(px[3]);
        for c in 0..3 {
            let v = u32::from(px[c]) + (u32::from(matte[c]) * inv + 127) / 255;
            out.push(v.min(255) as u8);
        }
    }
    out
}

#[cfg(test)]
#[path = "../../tests/unit/export/poster.rs"]
mod tests;
