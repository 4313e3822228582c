use std::io::Cursor;

use super::*;
use crate::foundation::error::ExportError;
use crate::template::job::Anchor;
use crate::template::model::Template;

fn temp_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "posterkit_engine_{tag}_{}",
        std::process::id()
    ));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn write_png(path: &Path, w: u32, h: u32, rgba: [u8; 4]) {
    let img = image::RgbaImage::from_pixel(w, h, image::Rgba(rgba));
    let mut buf = Vec::new();
    image::DynamicImage::ImageRgba8(img)
        .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .unwrap();
    std::fs::write(path, buf).unwrap();
}

fn photo_template() -> Template {
    Template::from_json(
        r##"{ "id": "photo", "canvasWidth": 40, "canvasHeight": 20, "background": "#000000",
              "layers": [
            { "type": "image", "id": "photo", "x": 0, "y": 0, "width": 40, "height": 20 } ] }"##,
    )
    .unwrap()
}

fn plain_template() -> Template {
    Template::from_json(
        r##"{ "id": "plain", "canvasWidth": 100, "canvasHeight": 100, "background": "#000000",
              "layers": [] }"##,
    )
    .unwrap()
}

fn engine() -> Engine {
    Engine::new(EngineConfig::default()).unwrap()
}

#[test]
fn poster_reproduces_bound_image() {
    let dir = temp_dir("photo");
    let src = dir.join("photo.png");
    write_png(&src, 40, 20, [20, 40, 60, 255]);
    let dest = dir.join("out/poster.png");

    let job = RenderJob::poster(photo_template(), &dest).bind_asset("photo", &src);
    let out = engine().render(&job, None).unwrap();
    assert_eq!(out.path, dest);
    assert_eq!((out.width, out.height), (40, 20));
    assert!(out.video.is_none());
    assert_eq!(out.duration_micros, None);
    assert_eq!(out.byte_size, std::fs::metadata(&dest).unwrap().len());

    let decoded = image::open(&dest).unwrap().to_rgba8();
    assert_eq!(decoded.dimensions(), (40, 20));
    assert_eq!(decoded.get_pixel(5, 5).0, [20, 40, 60, 255]);
    assert_eq!(decoded.get_pixel(39, 19).0, [20, 40, 60, 255]);
}

#[test]
fn watermark_lands_in_bottom_right_corner() {
    let dir = temp_dir("watermark");
    let badge = dir.join("badge.png");
    write_png(&badge, 20, 20, [255, 255, 255, 255]);

    let mut spec = WatermarkSpec::new(AssetRef::new(&badge), Anchor::BottomRight, 5.0, 1.0);
    spec.width_fraction = Some(0.2);
    let job = RenderJob::poster(plain_template(), dir.join("wm.png")).with_watermark(spec);

    let canvas = engine().compose_poster(&job, None).unwrap();
    // 20x20 badge at (75,75).
    assert_eq!(canvas.pixel(75, 75), Some([255, 255, 255, 255]));
    assert_eq!(canvas.pixel(94, 94), Some([255, 255, 255, 255]));
    assert_eq!(canvas.pixel(74, 74), Some([0, 0, 0, 255]));
    assert_eq!(canvas.pixel(95, 95), Some([0, 0, 0, 255]));
}

#[test]
fn unbound_image_layer_fails_before_writing() {
    let dir = temp_dir("unbound");
    let dest = dir.join("poster.png");
    let job = RenderJob::poster(photo_template(), &dest);
    let err = engine().render(&job, None).unwrap_err();
    assert!(matches!(err, EngineError::Layout(LayoutError::InvalidTemplate(_))));
    assert!(!dest.exists());
}

#[test]
fn missing_asset_keeps_previous_output() {
    let dir = temp_dir("missing");
    let dest = dir.join("poster.png");
    std::fs::write(&dest, b"previous").unwrap();

    let job = RenderJob::poster(photo_template(), &dest).bind_asset("photo", dir.join("nope.png"));
    let err = engine().render(&job, None).unwrap_err();
    assert!(matches!(err, EngineError::Asset(AssetError::NotFound { .. })));
    assert_eq!(std::fs::read(&dest).unwrap(), b"previous");
}

#[test]
fn cancelled_job_writes_nothing() {
    let dir = temp_dir("cancel");
    let src = dir.join("photo.png");
    write_png(&src, 40, 20, [1, 2, 3, 255]);
    let dest = dir.join("poster.png");

    let cancel = CancellationToken::new();
    cancel.cancel();
    let job = RenderJob::poster(photo_template(), &dest).bind_asset("photo", &src);
    let err = engine().render(&job, Some(&cancel)).unwrap_err();
    assert!(matches!(err, EngineError::Cancelled));
    assert!(!dest.exists());
    let leftovers = std::fs::read_dir(&dir).unwrap().count();
    assert_eq!(leftovers, 1, "only the source image should remain");
}

#[test]
fn text_layer_with_unbound_font_key_is_rejected() {
    let t = Template::from_json(
        r#"{ "id": "t", "canvasWidth": 100, "canvasHeight": 50, "layers": [
            { "type": "text", "id": "title", "x": 0, "y": 0, "width": 100, "height": 50,
              "text": "Hi", "fontSize": 20, "font": "brand" } ] }"#,
    )
    .unwrap();
    let dir = temp_dir("font");
    let job = RenderJob::poster(t, dir.join("t.png"));
    let err = engine().render(&job, None).unwrap_err();
    assert!(matches!(err, EngineError::Layout(_)));
}

#[test]
fn jpeg_poster_is_opaque_and_sized_from_output() {
    let dir = temp_dir("jpeg");
    let src = dir.join("photo.png");
    write_png(&src, 40, 20, [200, 200, 200, 255]);
    let dest = dir.join("poster.jpg");

    let mut job = RenderJob::poster(photo_template(), &dest).bind_asset("photo", &src);
    if let OutputKind::Poster(p) = &mut job.output {
        p.size = Some(CanvasSize::new(80, 40).unwrap());
    }
    let out = engine().render(&job, None).unwrap();
    assert_eq!((out.width, out.height), (80, 40));

    let decoded = image::open(&dest).unwrap().to_rgb8();
    assert_eq!(decoded.dimensions(), (80, 40));
    let px = decoded.get_pixel(40, 20).0;
    assert!(px.iter().all(|&c| (190..=210).contains(&c)), "{px:?}");
}

#[test]
fn wrong_job_kind_for_helpers_is_config_error() {
    let video = RenderJob::video(plain_template(), "in.mp4", "/tmp/posterkit_never.mp4");
    assert!(matches!(
        engine().compose_poster(&video, None),
        Err(EngineError::Config(_))
    ));

    let poster = RenderJob::poster(plain_template(), "/tmp/posterkit_never.png");
    assert!(matches!(
        engine().preview_frames(&poster, FrameSelection::All, None),
        Err(EngineError::Config(_))
    ));
}

#[test]
fn invalid_config_is_rejected() {
    let cfg = EngineConfig {
        jpeg_quality: 0,
        ..EngineConfig::default()
    };
    assert!(matches!(Engine::new(cfg), Err(EngineError::Config(_))));
}

#[test]
fn shutdown_reports_cache_activity() {
    let dir = temp_dir("shutdown");
    let src = dir.join("photo.png");
    write_png(&src, 40, 20, [9, 9, 9, 255]);
    let engine = engine();
    let job = RenderJob::poster(photo_template(), dir.join("a.png")).bind_asset("photo", &src);
    engine.render(&job, None).unwrap();
    engine.render(&job, None).unwrap();

    let stats = engine.shutdown();
    assert_eq!(stats.misses, 1);
    assert!(stats.hits >= 1);
}

#[test]
fn export_error_surfaces_for_unwritable_destination() {
    let dir = temp_dir("unwritable");
    let blocker = dir.join("file");
    std::fs::write(&blocker, b"x").unwrap();
    let job = RenderJob::poster(plain_template(), blocker.join("poster.png"));
    let err = engine().render(&job, None).unwrap_err();
    assert!(matches!(err, EngineError::Export(ExportError::Io { .. })));
}

#[test]
fn missing_watermark_fails_before_any_compositing() {
    let dir = temp_dir("wm_first");
    let template = Template::from_json(
        r##"{ "id": "blend", "canvasWidth": 20, "canvasHeight": 20, "layers": [
            { "type": "shape", "id": "glow", "x": 0, "y": 0, "width": 20, "height": 20,
              "shape": { "kind": "rect" }, "fill": "#ffffff", "blendMode": "overlay" } ] }"##,
    )
    .unwrap();
    let spec = WatermarkSpec::new(
        AssetRef::new(dir.join("missing-badge.png")),
        Anchor::TopLeft,
        0.0,
        1.0,
    );
    let dest = dir.join("out.png");
    let job = RenderJob::poster(template, &dest).with_watermark(spec);

    let err = engine().render(&job, None).unwrap_err();
    assert!(
        matches!(err, EngineError::Asset(AssetError::NotFound { .. })),
        "{err}"
    );
    assert!(!dest.exists());
}

#[test]
fn aac_audio_cannot_be_copied_into_webm() {
    use crate::foundation::core::Fps;

    let info = VideoSourceInfo {
        source_path: "phone.mp4".into(),
        width: 64,
        height: 48,
        fps: Fps::new(30, 1).unwrap(),
        codec: "h264".to_string(),
        container: "mov,mp4,m4a,3gp,3g2,mj2".to_string(),
        frame_count: None,
        duration_micros: None,
        has_audio: true,
        audio_codec: Some("aac".to_string()),
    };
    let job = RenderJob::video(plain_template(), "phone.mp4", "out.webm");
    let OutputKind::Video(out) = &job.output else {
        panic!("expected video");
    };

    let err = passthrough_audio(out, &info, Container::Webm).unwrap_err();
    assert!(matches!(err, VideoError::UnsupportedCodec { .. }), "{err}");
    assert_eq!(
        passthrough_audio(out, &info, Container::Mp4).unwrap(),
        Some(PathBuf::from("phone.mp4"))
    );

    let mut muted = out.clone();
    muted.audio_passthrough = false;
    assert_eq!(passthrough_audio(&muted, &info, Container::Webm).unwrap(), None);
}
