use super::*;
use crate::foundation::core::Rgba8Premul;
use crate::template::job::AssetRef;

fn spec(anchor: Anchor, margin: f64) -> WatermarkSpec {
    WatermarkSpec::new(AssetRef::new("logo.png"), anchor, margin, 1.0)
}

fn badge(w: u32, h: u32) -> PixelBuffer {
    let mut data = Vec::new();
    for i in 0..(w * h) {
        data.extend_from_slice(&[(i % 251) as u8, 40, 200, 255]);
    }
    PixelBuffer::new_premul(w, h, data)
}

#[test]
fn bottom_right_with_margin_lands_at_830() {
    let canvas = CanvasSize::new(1000, 1000).unwrap();
    let r = watermark_bounds(canvas, (150, 150), &spec(Anchor::BottomRight, 20.0), 0.15).unwrap();
    assert_eq!(r, Rect::new(830.0, 830.0, 980.0, 980.0));
}

#[test]
fn every_anchor_places_inside_margins() {
    let canvas = CanvasSize::new(1000, 500).unwrap();
    let cases = [
        (Anchor::TopLeft, 10.0, 10.0),
        (Anchor::TopCenter, 425.0, 10.0),
        (Anchor::TopRight, 840.0, 10.0),
        (Anchor::CenterLeft, 10.0, 213.0),
        (Anchor::Center, 425.0, 213.0),
        (Anchor::CenterRight, 840.0, 213.0),
        (Anchor::BottomLeft, 10.0, 415.0),
        (Anchor::BottomCenter, 425.0, 415.0),
        (Anchor::BottomRight, 840.0, 415.0),
    ];
    for (anchor, x, y) in cases {
        // 15% of 1000 = 150 wide; a 2:1 asset gives 75 tall.
        let r = watermark_bounds(canvas, (200, 100), &spec(anchor, 10.0), 0.15).unwrap();
        assert_eq!((r.x0, r.y0, r.width(), r.height()), (x, y, 150.0, 75.0), "{anchor:?}");
    }
}

#[test]
fn width_fraction_overrides_default() {
    let canvas = CanvasSize::new(800, 800).unwrap();
    let mut s = spec(Anchor::TopLeft, 0.0);
    s.width_fraction = Some(0.5);
    let r = watermark_bounds(canvas, (100, 50), &s, 0.15).unwrap();
    assert_eq!(r, Rect::new(0.0, 0.0, 400.0, 200.0));
}

#[test]
fn invalid_specs_are_rejected() {
    let canvas = CanvasSize::new(100, 100).unwrap();
    let mut s = spec(Anchor::Center, -1.0);
    assert!(watermark_bounds(canvas, (10, 10), &s, 0.15).is_err());
    s.margin_px = 0.0;
    assert!(watermark_bounds(canvas, (0, 10), &s, 0.15).is_err());
    assert!(watermark_bounds(canvas, (10, 10), &s, 0.0).is_err());
}

#[test]
fn applying_twice_to_copies_is_byte_identical() {
    let size = CanvasSize::new(64, 48).unwrap();
    let base = Canvas::filled(size, Rgba8Premul::from_straight_rgba(30, 60, 90, 255));
    let asset = badge(13, 7);
    let mut s = spec(Anchor::BottomRight, 3.0);
    s.opacity = 0.6;

    let mut a = base.clone();
    let mut b = base.clone();
    apply(&mut a, &s, &asset, 0.25).unwrap();
    apply(&mut b, &s, &asset, 0.25).unwrap();
    assert_eq!(a.data(), b.data());
    assert_ne!(a.data(), base.data());
}

#[test]
fn opaque_same_size_badge_is_copied_verbatim() {
    let size = CanvasSize::new(100, 100).unwrap();
    let asset = badge(15, 15);
    let mut canvas = Canvas::new(size);
    apply(&mut canvas, &spec(Anchor::TopLeft, 5.0), &asset, 0.15).unwrap();
    for y in 0..15 {
        for x in 0..15 {
            let i = ((y * 15 + x) * 4) as usize;
            assert_eq!(
                canvas.pixel(5 + x, 5 + y).unwrap(),
                [asset.data[i], asset.data[i + 1], asset.data[i + 2], asset.data[i + 3]]
            );
        }
    }
    assert_eq!(canvas.pixel(4, 4), Some([0, 0, 0, 0]));
    assert_eq!(canvas.pixel(20, 20), Some([0, 0, 0, 0]));
}

#[test]
fn watermark_op_is_topmost_normal_image() {
    let op = watermark_op(&spec(Anchor::Center, 0.0), Rect::new(0.0, 0.0, 1.0, 1.0));
    assert_eq!(op.layer_id, WATERMARK_LAYER_ID);
    assert_eq!(op.z_index, i32::MAX);
    assert_eq!(op.blend, BlendMode::Normal);
}
