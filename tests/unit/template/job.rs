use super::*;

fn tiny_template() -> Template {
    Template::from_json(
        r#"{ "id": "t", "canvasWidth": 100, "canvasHeight": 100, "layers": [
            { "type": "image", "id": "logo", "x": 0, "y": 0, "width": 50, "height": 50 } ] }"#,
    )
    .unwrap()
}

#[test]
fn poster_format_inferred_from_extension() {
    let job = RenderJob::poster(tiny_template(), "/tmp/out.JPG");
    job.validate().unwrap();
    let OutputKind::Poster(p) = &job.output else {
        panic!("expected poster");
    };
    assert_eq!(job.poster_format(p).unwrap(), PosterFormat::Jpeg);

    let job = RenderJob::poster(tiny_template(), "/tmp/out.bmp");
    assert!(matches!(job.validate(), Err(EngineError::Config(_))));
}

#[test]
fn incompatible_codec_container_is_unsupported_codec() {
    let mut job = RenderJob::video(tiny_template(), "in.mp4", "/tmp/out.webm");
    job.validate().unwrap_err();
    if let OutputKind::Video(v) = &mut job.output {
        v.codec = VideoCodec::Vp9;
    }
    job.validate().unwrap();

    let mut job = RenderJob::video(tiny_template(), "in.mp4", "/tmp/out.mp4");
    if let OutputKind::Video(v) = &mut job.output {
        v.codec = VideoCodec::Vp9;
    }
    let err = job.validate().unwrap_err();
    assert!(matches!(
        err,
        EngineError::Video(VideoError::UnsupportedCodec { .. })
    ));
}

#[test]
fn bindings_must_name_template_layers() {
    let job = RenderJob::poster(tiny_template(), "/tmp/out.png").bind_asset("nope", "a.png");
    assert!(matches!(job.validate(), Err(EngineError::Layout(_))));

    let job = RenderJob::poster(tiny_template(), "/tmp/out.png").bind_asset("logo", "a.png");
    job.validate().unwrap();
}

#[test]
fn watermark_spec_json_defaults_and_validation() {
    let wm: WatermarkSpec = serde_json::from_str(r#"{ "asset": "badge.png" }"#).unwrap();
    assert_eq!(wm.anchor, Anchor::BottomRight);
    assert_eq!(wm.opacity, 1.0);
    assert_eq!(wm.asset.path(), Path::new("badge.png"));

    let wm: WatermarkSpec =
        serde_json::from_str(r#"{ "asset": "b.png", "anchor": "top-center", "opacity": 2.0 }"#)
            .unwrap();
    assert_eq!(wm.anchor, Anchor::TopCenter);
    assert!(wm.validate().is_err());
}

#[test]
fn job_json_roundtrips_output_kind() {
    let json = r#"{
        "template": { "id": "t", "canvasWidth": 10, "canvasHeight": 10, "layers": [] },
        "output": { "kind": "video", "source": "clip.mov", "codec": "h265" },
        "destination": "out.mov"
    }"#;
    let job = RenderJob::from_json(json).unwrap();
    let OutputKind::Video(v) = &job.output else {
        panic!("expected video");
    };
    assert_eq!(v.codec, VideoCodec::H265);
    assert!(v.audio_passthrough);
    assert_eq!(job.video_container(v).unwrap(), Container::Mov);
}

#[test]
fn oversized_output_size_in_job_json_is_rejected() {
    let json = r#"{
        "template": { "id": "t", "canvasWidth": 10, "canvasHeight": 10, "layers": [] },
        "output": { "kind": "poster", "size": { "width": 200000, "height": 200000 } },
        "destination": "out.png"
    }"#;
    let err = RenderJob::from_json(json).unwrap_err();
    assert!(matches!(err, EngineError::Layout(LayoutError::InvalidTemplate(_))), "{err}");

    let zero = json.replace("200000", "0");
    assert!(RenderJob::from_json(&zero).is_err());
}

#[test]
fn field_built_output_size_is_checked_by_validate() {
    let mut job = RenderJob::poster(tiny_template(), "/tmp/out.png");
    if let OutputKind::Poster(p) = &mut job.output {
        p.size = Some(CanvasSize {
            width: 0,
            height: 0,
        });
    }
    assert!(matches!(job.validate(), Err(EngineError::Config(_))));

    let mut job = RenderJob::video(tiny_template(), "in.mp4", "/tmp/out.mp4");
    if let OutputKind::Video(v) = &mut job.output {
        v.size = Some(CanvasSize {
            width: 200_000,
            height: 64,
        });
    }
    assert!(matches!(job.validate(), Err(EngineError::Config(_))));
}

#[test]
fn container_audio_compatibility() {
    assert!(Container::Mp4.accepts_audio("aac"));
    assert!(Container::Mov.accepts_audio("pcm_s16le"));
    assert!(Container::Webm.accepts_audio("opus"));
    assert!(Container::Webm.accepts_audio("vorbis"));
    assert!(!Container::Webm.accepts_audio("aac"));
    assert!(!Container::Mp4.accepts_audio("vorbis"));
}
