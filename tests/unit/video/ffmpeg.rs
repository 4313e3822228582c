use super::*;
use crate::foundation::core::{CanvasSize, Fps};

fn cfg(w: u32, h: u32) -> SinkConfig {
    SinkConfig {
        size: CanvasSize::new(w, h).unwrap(),
        fps: Fps::new(30000, 1001).unwrap(),
    }
}

fn args_of(cmd: &Command) -> Vec<String> {
    cmd.get_args()
        .map(|a| a.to_string_lossy().into_owned())
        .collect()
}

#[test]
fn flatten_premul_over_black_keeps_premul_rgb() {
    let src = vec![128u8, 0, 0, 128];
    let mut dst = vec![0u8; 4];
    flatten_premul_over_bg(&mut dst, &src, [0, 0, 0, 255]);
    assert_eq!(dst, vec![128, 0, 0, 255]);
}

#[test]
fn flatten_transparent_shows_background() {
    let src = vec![0u8, 0, 0, 0, 10, 20, 30, 255];
    let mut dst = vec![0u8; 8];
    flatten_premul_over_bg(&mut dst, &src, [200, 100, 50, 255]);
    assert_eq!(dst, vec![200, 100, 50, 255, 10, 20, 30, 255]);
}

#[test]
fn odd_dimensions_are_rejected_before_spawning() {
    let mut sink = FfmpegSink::new(FfmpegSinkOpts::new(
        "out.mp4",
        Container::Mp4,
        VideoCodec::H264,
    ));
    let err = sink.begin(cfg(11, 10)).unwrap_err();
    assert!(matches!(err, VideoError::Encode(_)));
}

#[test]
fn codec_container_mismatch_is_unsupported() {
    let mut sink = FfmpegSink::new(FfmpegSinkOpts::new(
        "out.webm",
        Container::Webm,
        VideoCodec::H264,
    ));
    let err = sink.begin(cfg(10, 10)).unwrap_err();
    assert!(matches!(err, VideoError::UnsupportedCodec { ref codec, ref container }
        if codec == "h264" && container == "webm"));
}

#[test]
fn command_copies_audio_and_names_muxer() {
    let mut opts = FfmpegSinkOpts::new("staged.part", Container::Mov, VideoCodec::H265);
    opts.audio_source = Some(PathBuf::from("in.mov"));
    let args = args_of(&FfmpegSink::new(opts).command(cfg(640, 360)));
    let joined = args.join(" ");
    assert!(joined.contains("-s 640x360"));
    assert!(joined.contains("-r 30000/1001"));
    assert!(joined.contains("-i pipe:0 -i in.mov -map 0:v:0 -map 1:a:0? -c:a copy"));
    assert!(joined.contains("-c:v libx265"));
    assert!(joined.ends_with("-f mov staged.part"));
}

#[test]
fn command_without_audio_disables_it() {
    let opts = FfmpegSinkOpts::new("o.webm", Container::Webm, VideoCodec::Vp9);
    let args = args_of(&FfmpegSink::new(opts).command(cfg(64, 64)));
    assert!(args.contains(&"-an".to_string()));
    assert!(!args.contains(&"-movflags".to_string()));
    assert!(args.contains(&"libvpx-vp9".to_string()));
}

#[test]
fn push_before_begin_fails() {
    let mut sink = FfmpegSink::new(FfmpegSinkOpts::new(
        "out.mp4",
        Container::Mp4,
        VideoCodec::H264,
    ));
    let frame = VideoFrame {
        index: 0,
        timestamp_micros: 0,
        pixels: vec![0; 16],
    };
    assert!(sink.push_frame(&frame).is_err());
}

#[test]
fn decoder_resamples_to_the_rate_the_encoder_is_fed() {
    use crate::assets::media::{VideoSourceInfo, decoder_command};

    // Variable-rate phone clip: ffprobe reports avg 29.87 while r_frame_rate says 30.
    let probe = VideoSourceInfo {
        source_path: "clip.mp4".into(),
        width: 64,
        height: 48,
        fps: Fps::new(2987, 100).unwrap(),
        codec: "h264".to_string(),
        container: "mov,mp4,m4a,3gp,3g2,mj2".to_string(),
        frame_count: Some(299),
        duration_micros: Some(10_000_000),
        has_audio: true,
        audio_codec: Some("aac".to_string()),
    };
    let size = CanvasSize::new(64, 48).unwrap();

    let decoder = args_of(&decoder_command("ffmpeg", &probe, size));
    let vf = decoder
        .iter()
        .position(|a| a == "-vf")
        .map(|i| decoder[i + 1].clone())
        .unwrap();
    assert_eq!(vf, "fps=2987/100");

    let sink = FfmpegSink::new(FfmpegSinkOpts::new(
        "out.mp4",
        Container::Mp4,
        VideoCodec::H264,
    ));
    let encoder = args_of(&sink.command(SinkConfig { size, fps: probe.fps }));
    let rate = encoder
        .iter()
        .position(|a| a == "-r")
        .map(|i| encoder[i + 1].clone())
        .unwrap();
    assert_eq!(format!("fps={rate}"), vf);

    let scaled = args_of(&decoder_command("ffmpeg", &probe, CanvasSize::new(32, 24).unwrap()));
    assert!(scaled.contains(&"fps=2987/100,scale=32:24".to_string()));
}
