use std::collections::HashMap;
use std::sync::Arc;

use kurbo::Shape as _;

use crate::assets::decode::PixelBuffer;
use crate::assets::text::{FontAsset, TextBrushRgba8, TextLayoutEngine};
use crate::foundation::cancel::CancellationToken;
use crate::foundation::core::{Affine, BezPath, CanvasSize, Point, Rect, Transform2D, Vec2};
use crate::foundation::error::{CompositeError, EngineResult, LayoutError};
use crate::layout::ops::{DrawContent, DrawOp, ShapeSpec, TextBlock};
use crate::render::blend::{PixelBlend, blend_row};
use crate::render::canvas::Canvas;
use crate::template::job::AssetRef;
use crate::template::model::{ImageFit, ShapeGeometry};

/// Decoded inputs a set of draw ops refers to, plus the text engine used to shape glyphs.
pub struct RenderResources {
    pub images: HashMap<AssetRef, Arc<PixelBuffer>>,
    pub fonts: HashMap<String, FontAsset>,
    pub text: TextLayoutEngine,
}

impl Default for RenderResources {
    fn default() -> Self {
        Self {
            images: HashMap::new(),
            fonts: HashMap::new(),
            text: TextLayoutEngine::new(),
        }
    }
}

/// A rasterized op, clipped to the canvas and positioned in canvas pixels.
///
/// Rasters do not depend on what is underneath them, so one raster can be blended onto many
/// frames.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LayerRaster {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

#[derive(Clone, Debug)]
pub struct PreparedLayer {
    pub layer_id: String,
    pub raster: LayerRaster,
    pub blend: PixelBlend,
    pub opacity: f32,
}

/// Execute `ops` onto `canvas` in order.
///
/// Every op's blend mode is checked before the canvas is touched. `cancel` is observed between
/// layers.
#[tracing::instrument(skip_all, fields(ops = ops.len()))]
pub fn composite(
    canvas: &mut Canvas,
    ops: &[DrawOp],
    res: &mut RenderResources,
    cancel: Option<&CancellationToken>,
) -> EngineResult<()> {
    for op in ops {
        PixelBlend::from_mode(op.blend)?;
    }
    for op in ops {
        if let Some(c) = cancel {
            c.check()?;
        }
        if let Some(layer) = prepare_layer(op, res, canvas.size())? {
            apply_layer(canvas, &layer);
        }
    }
    Ok(())
}

/// Rasterize every op once. Ops entirely outside the canvas are dropped.
pub fn prepare_layers(
    ops: &[DrawOp],
    res: &mut RenderResources,
    size: CanvasSize,
) -> EngineResult<Vec<PreparedLayer>> {
    for op in ops {
        PixelBlend::from_mode(op.blend)?;
    }
    let mut out = Vec::with_capacity(ops.len());
    for op in ops {
        if let Some(layer) = prepare_layer(op, res, size)? {
            out.push(layer);
        }
    }
    Ok(out)
}

pub fn prepare_layer(
    op: &DrawOp,
    res: &mut RenderResources,
    size: CanvasSize,
) -> EngineResult<Option<PreparedLayer>> {
    let blend = PixelBlend::from_mode(op.blend)?;
    check_geometry(op)?;
    if op.opacity <= 0.0 {
        return Ok(None);
    }

    let raster = match &op.content {
        DrawContent::Image { asset, fit } => {
            let asset = asset.as_ref().ok_or_else(|| {
                LayoutError::invalid(format!("image layer '{}' has no asset bound", op.layer_id))
            })?;
            let img = res.images.get(asset).ok_or_else(|| {
                LayoutError::invalid(format!(
                    "image layer '{}' asset '{}' was not loaded",
                    op.layer_id,
                    asset.path().display()
                ))
            })?;
            rasterize_image(op, img, *fit, size)?
        }
        DrawContent::Text(block) => rasterize_text(op, block, res, size)?,
        DrawContent::Shape(shape) => rasterize_shape(op, shape, size)?,
    };

    tracing::trace!(
        layer = %op.layer_id,
        kind = op.kind_name(),
        visible = raster.is_some(),
        "rasterized layer"
    );
    Ok(raster.map(|raster| PreparedLayer {
        layer_id: op.layer_id.clone(),
        raster,
        blend,
        opacity: op.opacity,
    }))
}

/// Rasterize an image op against an already decoded buffer, bypassing resource lookup.
pub fn prepare_image_layer(
    op: &DrawOp,
    img: &PixelBuffer,
    size: CanvasSize,
) -> EngineResult<Option<PreparedLayer>> {
    let blend = PixelBlend::from_mode(op.blend)?;
    check_geometry(op)?;
    let DrawContent::Image { fit, .. } = &op.content else {
        return Err(CompositeError::out_of_bounds(&op.layer_id, "not an image op").into());
    };
    if op.opacity <= 0.0 {
        return Ok(None);
    }
    Ok(rasterize_image(op, img, *fit, size)?.map(|raster| PreparedLayer {
        layer_id: op.layer_id.clone(),
        raster,
        blend,
        opacity: op.opacity,
    }))
}

/// Blend a prepared layer onto `canvas`.
pub fn apply_layer(canvas: &mut Canvas, layer: &PreparedLayer) {
    let r = &layer.raster;
    let cw = canvas.width() as usize;
    let row_bytes = (r.width as usize) * 4;
    let data = canvas.data_mut();
    for row in 0..r.height as usize {
        let dst_off = ((r.y as usize + row) * cw + r.x as usize) * 4;
        let src_off = row * row_bytes;
        blend_row(
            &mut data[dst_off..dst_off + row_bytes],
            &r.data[src_off..src_off + row_bytes],
            layer.opacity,
            layer.blend,
        );
    }
}

pub fn apply_layers(canvas: &mut Canvas, layers: &[PreparedLayer]) {
    for layer in layers {
        apply_layer(canvas, layer);
    }
}

/// Merge a run of Normal layers into one full-canvas Normal layer.
///
/// Returns `None` if any layer uses another blend mode.
pub fn flatten_normal_layers(size: CanvasSize, layers: &[PreparedLayer]) -> Option<PreparedLayer> {
    if layers.iter().any(|l| l.blend != PixelBlend::Normal) {
        return None;
    }
    let mut overlay = Canvas::new(size);
    apply_layers(&mut overlay, layers);
    Some(PreparedLayer {
        layer_id: "<overlay>".to_string(),
        raster: LayerRaster {
            x: 0,
            y: 0,
            width: size.width,
            height: size.height,
            data: overlay.into_data(),
        },
        blend: PixelBlend::Normal,
        opacity: 1.0,
    })
}

/// Geometry that cannot be placed at all. Finite boxes of any extent are clipped instead.
fn check_geometry(op: &DrawOp) -> Result<(), CompositeError> {
    let b = op.bounds;
    let finite = [b.x0, b.y0, b.x1, b.y1, b.width(), b.height(), op.rotation_deg]
        .iter()
        .all(|v| v.is_finite());
    if !finite || !op.opacity.is_finite() {
        return Err(CompositeError::out_of_bounds(
            &op.layer_id,
            format!("non-finite geometry {b:?}"),
        ));
    }
    Ok(())
}

/// Box-local to canvas transform: translate to the box, rotate about its center.
fn box_affine(op: &DrawOp) -> Affine {
    let b = op.bounds;
    Transform2D::for_box(b, (b.width(), b.height()), op.rotation_deg).to_affine()
}

/// Integer canvas region covered by `local` under `affine`, clipped to the canvas.
fn device_region(affine: Affine, local: Rect, size: CanvasSize) -> Option<(u32, u32, u32, u32)> {
    let bb = affine.transform_rect_bbox(local);
    let x0 = bb.x0.floor().max(0.0);
    let y0 = bb.y0.floor().max(0.0);
    let x1 = bb.x1.ceil().min(f64::from(size.width));
    let y1 = bb.y1.ceil().min(f64::from(size.height));
    if x1 <= x0 || y1 <= y0 {
        return None;
    }
    Some((x0 as u32, y0 as u32, (x1 - x0) as u32, (y1 - y0) as u32))
}

fn rasterize_image(
    op: &DrawOp,
    img: &PixelBuffer,
    fit: ImageFit,
    size: CanvasSize,
) -> Result<Option<LayerRaster>, CompositeError> {
    let (bw, bh) = (op.bounds.width(), op.bounds.height());
    if bw <= 0.0 || bh <= 0.0 || img.width == 0 || img.height == 0 {
        return Ok(None);
    }
    if img.data.len() != (img.width as usize) * (img.height as usize) * 4 {
        return Err(CompositeError::out_of_bounds(
            &op.layer_id,
            format!("image buffer has {} bytes for {}x{}", img.data.len(), img.width, img.height),
        ));
    }
    let affine = box_affine(op);
    let Some((rx, ry, rw, rh)) = device_region(affine, Rect::new(0.0, 0.0, bw, bh), size) else {
        return Ok(None);
    };

    let (iw, ih) = (f64::from(img.width), f64::from(img.height));
    let (sx, sy) = match fit {
        ImageFit::Fill => (bw / iw, bh / ih),
        ImageFit::Contain => {
            let s = (bw / iw).min(bh / ih);
            (s, s)
        }
        ImageFit::Cover => {
            let s = (bw / iw).max(bh / ih);
            (s, s)
        }
    };
    let off = Vec2::new((bw - iw * sx) * 0.5, (bh - ih * sy) * 0.5);
    let inv = affine.inverse();

    let mut data = vec![0u8; (rw as usize) * (rh as usize) * 4];
    for row in 0..rh {
        for col in 0..rw {
            let device = Point::new(
                f64::from(rx + col) + 0.5,
                f64::from(ry + row) + 0.5,
            );
            let q = inv * device;
            if q.x < 0.0 || q.y < 0.0 || q.x >= bw || q.y >= bh {
                continue;
            }
            let u = (q.x - off.x) / sx;
            let v = (q.y - off.y) / sy;
            if u < 0.0 || v < 0.0 || u >= iw || v >= ih {
                continue;
            }
            let px = sample_bilinear(img, u - 0.5, v - 0.5);
            let i = ((row as usize) * (rw as usize) + col as usize) * 4;
            data[i..i + 4].copy_from_slice(&px);
        }
    }

    Ok(Some(LayerRaster {
        x: rx,
        y: ry,
        width: rw,
        height: rh,
        data,
    }))
}

/// Bilinear sample at continuous pixel coordinates (pixel centers on integers), edges clamped.
fn sample_bilinear(img: &PixelBuffer, fx: f64, fy: f64) -> [u8; 4] {
    let max_x = (img.width - 1) as i64;
    let max_y = (img.height - 1) as i64;
    let x0f = fx.floor();
    let y0f = fy.floor();
    let tx = (fx - x0f) as f32;
    let ty = (fy - y0f) as f32;
    let x0 = (x0f as i64).clamp(0, max_x) as usize;
    let y0 = (y0f as i64).clamp(0, max_y) as usize;
    let x1 = (x0f as i64 + 1).clamp(0, max_x) as usize;
    let y1 = (y0f as i64 + 1).clamp(0, max_y) as usize;

    let stride = img.width as usize * 4;
    let at = |x: usize, y: usize, c: usize| f32::from(img.data[y * stride + x * 4 + c]);

    if tx == 0.0 && ty == 0.0 {
        let i = y0 * stride + x0 * 4;
        return [img.data[i], img.data[i + 1], img.data[i + 2], img.data[i + 3]];
    }

    let mut out = [0u8; 4];
    for (c, o) in out.iter_mut().enumerate() {
        let top = at(x0, y0, c) * (1.0 - tx) + at(x1, y0, c) * tx;
        let bottom = at(x0, y1, c) * (1.0 - tx) + at(x1, y1, c) * tx;
        *o = (top * (1.0 - ty) + bottom * ty).round().clamp(0.0, 255.0) as u8;
    }
    out
}

/// Render box-local paths with vello_cpu into a canvas-clipped raster.
fn rasterize_vector(
    affine: Affine,
    local_extent: Rect,
    size: CanvasSize,
    draw: impl FnOnce(&mut vello_cpu::RenderContext, Affine) -> EngineResult<()>,
) -> EngineResult<Option<LayerRaster>> {
    let Some((rx, ry, rw, rh)) = device_region(affine, local_extent, size) else {
        return Ok(None);
    };
    let w: u16 = rw
        .try_into()
        .map_err(|_| CompositeError::out_of_bounds("<vector>", "raster width exceeds u16"))?;
    let h: u16 = rh
        .try_into()
        .map_err(|_| CompositeError::out_of_bounds("<vector>", "raster height exceeds u16"))?;

    let to_raster = Affine::translate(Vec2::new(-f64::from(rx), -f64::from(ry))) * affine;
    let mut ctx = vello_cpu::RenderContext::new(w, h);
    draw(&mut ctx, to_raster)?;
    ctx.flush();
    let mut pixmap = vello_cpu::Pixmap::new(w, h);
    ctx.render_to_pixmap(&mut pixmap);

    Ok(Some(LayerRaster {
        x: rx,
        y: ry,
        width: rw,
        height: rh,
        data: pixmap.data_as_u8_slice().to_vec(),
    }))
}

fn rasterize_shape(
    op: &DrawOp,
    shape: &ShapeSpec,
    size: CanvasSize,
) -> EngineResult<Option<LayerRaster>> {
    let (bw, bh) = (op.bounds.width(), op.bounds.height());
    if bw <= 0.0 || bh <= 0.0 {
        return Ok(None);
    }
    let path: BezPath = match &shape.geometry {
        ShapeGeometry::Rect { corner_radius } => {
            let r = corner_radius.min(bw.min(bh) * 0.5);
            kurbo::RoundedRect::new(0.0, 0.0, bw, bh, r).to_path(0.1)
        }
        ShapeGeometry::Ellipse => kurbo::Ellipse::from_rect(Rect::new(0.0, 0.0, bw, bh)).to_path(0.1),
        ShapeGeometry::Path { d } => {
            let mut p = BezPath::from_svg(d.trim()).map_err(|e| {
                LayoutError::invalid(format!("shape layer '{}' path data: {e}", op.layer_id))
            })?;
            let (sx, sy) = shape.path_scale;
            p.apply_affine(Affine::scale_non_uniform(sx, sy));
            p
        }
    };

    let stroke_pad = shape.stroke.map(|s| s.width * 0.5).unwrap_or(0.0);
    let extent = path.bounding_box().inflate(stroke_pad + 1.0, stroke_pad + 1.0);
    let affine = box_affine(op);

    rasterize_vector(affine, extent, size, |ctx, xf| {
        ctx.set_transform(affine_to_cpu(xf));
        let cpu_path = bezpath_to_cpu(&path);
        let [r, g, b, a] = shape.fill.to_rgba8_straight();
        if a > 0 {
            ctx.set_paint(vello_cpu::peniko::Color::from_rgba8(r, g, b, a));
            ctx.fill_path(&cpu_path);
        }
        if let Some(stroke) = shape.stroke
            && stroke.width > 0.0
        {
            let [r, g, b, a] = stroke.color.to_rgba8_straight();
            ctx.set_paint(vello_cpu::peniko::Color::from_rgba8(r, g, b, a));
            ctx.set_stroke(vello_cpu::kurbo::Stroke::new(stroke.width));
            ctx.stroke_path(&cpu_path);
        }
        Ok(())
    })
}

fn rasterize_text(
    op: &DrawOp,
    block: &TextBlock,
    res: &mut RenderResources,
    size: CanvasSize,
) -> EngineResult<Option<LayerRaster>> {
    let Some(ink) = block.ink_bounds() else {
        return Ok(None);
    };
    let font = res.fonts.get(&block.font_key).ok_or_else(|| {
        LayoutError::invalid(format!(
            "text layer '{}' references unbound font '{}'",
            op.layer_id, block.font_key
        ))
    })?;

    let pad = block.font_size / 3.0;
    let backdrop = block
        .background
        .map(|bg| (bg, ink.inflate(pad, pad)));
    let (bw, bh) = (op.bounds.width(), op.bounds.height());
    let extent = Rect::new(0.0, 0.0, bw, bh)
        .union(ink.inflate(pad + block.font_size, pad + block.font_size));
    let affine = box_affine(op);

    let [r, g, b, a] = block.color.to_rgba8_straight();
    let brush = TextBrushRgba8 { r, g, b, a };
    let mut shaped = Vec::with_capacity(block.lines.len());
    for line in block.lines.iter().filter(|l| !l.text.is_empty()) {
        let layout = res
            .text
            .layout_line(font, &line.text, block.font_size as f32, brush)?;
        let top = line.y + (block.line_advance - f64::from(layout.height())) * 0.5;
        shaped.push((Vec2::new(line.x, top), layout));
    }
    let font_data = vello_cpu::peniko::FontData::new(
        vello_cpu::peniko::Blob::new(font.bytes.clone()),
        0,
    );

    rasterize_vector(affine, extent, size, |ctx, xf| {
        if let Some((bg, rect)) = backdrop {
            let [r, g, b, a] = bg.to_rgba8_straight();
            ctx.set_transform(affine_to_cpu(xf));
            ctx.set_paint(vello_cpu::peniko::Color::from_rgba8(r, g, b, a));
            let rounded = kurbo::RoundedRect::from_rect(rect, pad).to_path(0.1);
            ctx.fill_path(&bezpath_to_cpu(&rounded));
        }

        for (origin, layout) in &shaped {
            ctx.set_transform(affine_to_cpu(xf * Affine::translate(*origin)));
            for line in layout.lines() {
                for item in line.items() {
                    let parley::layout::PositionedLayoutItem::GlyphRun(run) = item else {
                        continue;
                    };
                    let brush = run.style().brush;
                    ctx.set_paint(vello_cpu::peniko::Color::from_rgba8(
                        brush.r, brush.g, brush.b, brush.a,
                    ));
                    let glyphs = run.glyphs().map(|g| vello_cpu::Glyph {
                        id: g.id,
                        x: g.x,
                        y: g.y,
                    });
                    ctx.glyph_run(&font_data)
                        .font_size(run.run().font_size())
                        .fill_glyphs(glyphs);
                }
            }
        }
        Ok(())
    })
}

fn affine_to_cpu(a: Affine) -> vello_cpu::kurbo::Affine {
    vello_cpu::kurbo::Affine::new(a.as_coeffs())
}

fn bezpath_to_cpu(path: &BezPath) -> vello_cpu::kurbo::BezPath {
    use kurbo::PathEl;

    let mut out = vello_cpu::kurbo::BezPath::new();
    for &el in path.elements() {
        match el {
            PathEl::MoveTo(p) => out.move_to(vello_cpu::kurbo::Point::new(p.x, p.y)),
            PathEl::LineTo(p) => out.line_to(vello_cpu::kurbo::Point::new(p.x, p.y)),
            PathEl::QuadTo(p1, p2) => out.quad_to(
                vello_cpu::kurbo::Point::new(p1.x, p1.y),
                vello_cpu::kurbo::Point::new(p2.x, p2.y),
            ),
            PathEl::CurveTo(p1, p2, p3) => out.curve_to(
                vello_cpu::kurbo::Point::new(p1.x, p1.y),
                vello_cpu::kurbo::Point::new(p2.x, p2.y),
                vello_cpu::kurbo::Point::new(p3.x, p3.y),
            ),
            PathEl::ClosePath => out.close_path(),
        }
    }
    out
}

#[cfg(test)]
#[path = "../../tests/unit/render/compositor.rs"]
mod tests;
