use std::sync::Mutex;

use super::*;
use crate::foundation::core::Fps;
use crate::render::blend::PixelBlend;
use crate::render::compositor::LayerRaster;
use crate::video::sink::InMemorySink;
use crate::video::source::MemorySource;

fn size() -> CanvasSize {
    CanvasSize::new(4, 4).unwrap()
}

fn fps() -> Fps {
    Fps::new(25, 1).unwrap()
}

/// Opaque 2x2 square at (1,1) in the given premultiplied color.
fn square(id: &str, px: [u8; 4], blend: PixelBlend) -> PreparedLayer {
    PreparedLayer {
        layer_id: id.to_string(),
        raster: LayerRaster {
            x: 1,
            y: 1,
            width: 2,
            height: 2,
            data: px.repeat(4),
        },
        blend,
        opacity: 1.0,
    }
}

fn opts(threads: usize) -> PipelineOptions {
    PipelineOptions {
        threads: Some(threads),
        reorder_multiplier: 2,
        selection: FrameSelection::All,
    }
}

#[test]
fn emits_every_frame_in_order_with_source_timestamps() {
    let mut source = MemorySource::numbered(size(), fps(), 37);
    let mut sink = InMemorySink::new();
    let mut pipeline = VideoPipeline::new(size(), Vec::new(), opts(3));

    let stats = pipeline.run(&mut source, &mut sink).unwrap();
    assert_eq!(stats.frames_decoded, 37);
    assert_eq!(stats.frames_composited, 37);
    assert_eq!(stats.frames_encoded, 37);
    assert_eq!(stats.duration_micros, 37 * 40_000);
    assert_eq!(pipeline.state(), JobState::Closed);

    assert!(sink.ended);
    assert_eq!(sink.config().unwrap().fps, fps());
    assert_eq!(sink.frames.len(), 37);
    for (i, f) in sink.frames.iter().enumerate() {
        assert_eq!(f.index, i as u64);
        assert_eq!(f.timestamp_micros, i as u64 * 40_000);
        assert_eq!(f.pixels[0], i as u8);
    }
    assert!(
        sink.frames
            .windows(2)
            .all(|w| w[0].timestamp_micros < w[1].timestamp_micros)
    );
}

#[test]
fn overlay_is_applied_to_every_frame() {
    let mut source = MemorySource::numbered(size(), fps(), 6);
    let mut sink = InMemorySink::new();
    let layers = vec![square("logo", [255, 0, 0, 255], PixelBlend::Normal)];
    let mut pipeline = VideoPipeline::new(size(), layers, opts(2));
    let stats = pipeline.run(&mut source, &mut sink).unwrap();
    assert!(!stats.overlay_precomposed);
    assert_eq!(stats.overlay_layers, 1);

    for f in &sink.frames {
        let v = f.index as u8;
        assert_eq!(&f.pixels[0..4], &[v, v, v, 255]);
        // Pixel (1,1) is under the square.
        let i = (4 + 1) * 4;
        assert_eq!(&f.pixels[i..i + 4], &[255, 0, 0, 255]);
    }
}

#[test]
fn normal_overlays_are_precomposed_once() {
    let layers = vec![
        square("a", [255, 0, 0, 255], PixelBlend::Normal),
        square("b", [0, 0, 128, 128], PixelBlend::Normal),
    ];
    let pipeline = VideoPipeline::new(size(), layers, opts(1));
    assert!(pipeline.precomposed);
    assert_eq!(pipeline.layers.len(), 1);

    let layers = vec![
        square("a", [255, 0, 0, 255], PixelBlend::Normal),
        square("m", [128, 128, 128, 255], PixelBlend::Multiply),
    ];
    let pipeline = VideoPipeline::new(size(), layers, opts(1));
    assert!(!pipeline.precomposed);
    assert_eq!(pipeline.layers.len(), 2);
}

#[test]
fn cancelling_mid_stream_aborts_the_sink() {
    let token = CancellationToken::new();
    let seen = Mutex::new(0u64);
    let progress = |done: u64, _total: Option<u64>| {
        *seen.lock().unwrap() = done;
        if done >= 3 {
            token.cancel();
        }
    };
    let mut source = MemorySource::numbered(size(), fps(), 200);
    let mut sink = InMemorySink::new();
    let mut pipeline = VideoPipeline::new(size(), Vec::new(), opts(2))
        .with_cancel(&token)
        .with_progress(&progress);

    let err = pipeline.run(&mut source, &mut sink).unwrap_err();
    assert!(matches!(err, EngineError::Cancelled));
    assert_eq!(pipeline.state(), JobState::Failed);
    assert!(sink.aborted);
    assert!(!sink.ended);
    assert!(sink.frames.is_empty());
    assert!(*seen.lock().unwrap() < 200);
}

#[test]
fn decode_failure_fails_the_job() {
    let mut source = MemorySource::numbered(size(), fps(), 20).failing_at(7);
    let mut sink = InMemorySink::new();
    let mut pipeline = VideoPipeline::new(size(), Vec::new(), opts(2));
    let err = pipeline.run(&mut source, &mut sink).unwrap_err();
    assert!(matches!(err, EngineError::Video(VideoError::Decode(_))));
    assert!(sink.aborted);
    assert_eq!(pipeline.state(), JobState::Failed);
}

#[test]
fn encode_failure_wins_over_producer_send_error() {
    let mut source = MemorySource::numbered(size(), fps(), 50);
    let mut sink = InMemorySink::failing_at(4);
    let mut pipeline = VideoPipeline::new(size(), Vec::new(), opts(2));
    let err = pipeline.run(&mut source, &mut sink).unwrap_err();
    assert!(matches!(err, EngineError::Video(VideoError::Encode(ref m)) if m.contains("synthetic")));
    assert!(sink.aborted);
}

#[test]
fn range_and_stride_selections_pick_source_frames() {
    let mut sink = InMemorySink::new();
    let mut source = MemorySource::numbered(size(), fps(), 10);
    let mut o = opts(2);
    o.selection = FrameSelection::Range { start: 2, end: 5 };
    let stats = VideoPipeline::new(size(), Vec::new(), o)
        .run(&mut source, &mut sink)
        .unwrap();
    let idx: Vec<u64> = sink.frames.iter().map(|f| f.index).collect();
    assert_eq!(idx, vec![2, 3, 4]);
    // Decoding stops at the end of the range.
    assert_eq!(stats.frames_decoded, 5);

    let mut sink = InMemorySink::new();
    let mut source = MemorySource::numbered(size(), fps(), 10);
    let mut o = opts(2);
    o.selection = FrameSelection::EveryNth(3);
    VideoPipeline::new(size(), Vec::new(), o)
        .run(&mut source, &mut sink)
        .unwrap();
    let idx: Vec<u64> = sink.frames.iter().map(|f| f.index).collect();
    assert_eq!(idx, vec![0, 3, 6, 9]);
    assert_eq!(sink.frames[1].timestamp_micros, 120_000);
}

#[test]
fn selection_helpers() {
    assert!(FrameSelection::Range { start: 3, end: 3 }.validate().is_err());
    assert!(FrameSelection::EveryNth(0).validate().is_err());
    assert_eq!(FrameSelection::EveryNth(3).expected_count(Some(10)), Some(4));
    assert_eq!(
        FrameSelection::Range { start: 8, end: 20 }.expected_count(Some(10)),
        Some(2)
    );
    assert_eq!(FrameSelection::All.expected_count(None), None);
}

#[test]
fn mismatched_source_size_is_rejected() {
    let mut source = MemorySource::numbered(CanvasSize::new(2, 2).unwrap(), fps(), 3);
    let mut sink = InMemorySink::new();
    let mut pipeline = VideoPipeline::new(size(), Vec::new(), opts(1));
    let err = pipeline.run(&mut source, &mut sink).unwrap_err();
    assert!(matches!(err, EngineError::Video(VideoError::Decode(_))));
    assert_eq!(pipeline.state(), JobState::Failed);
}

#[test]
fn pipeline_runs_only_once() {
    let mut pipeline = VideoPipeline::new(size(), Vec::new(), opts(1));
    let mut sink = InMemorySink::new();
    pipeline
        .run(&mut MemorySource::numbered(size(), fps(), 2), &mut sink)
        .unwrap();
    let err = pipeline
        .run(&mut MemorySource::numbered(size(), fps(), 2), &mut sink)
        .unwrap_err();
    assert!(matches!(err, EngineError::Config(_)));
}

#[test]
fn state_machine_transitions() {
    use JobState::*;
    assert!(Opened.can_advance_to(Demuxing));
    assert!(Demuxing.can_advance_to(Muxed));
    assert!(Muxed.can_advance_to(Closed));
    assert!(!Opened.can_advance_to(Muxed));
    assert!(!Closed.can_advance_to(Demuxing));
    for s in [Opened, Demuxing, Muxed] {
        assert!(s.can_advance_to(Failed));
    }
    assert!(!Closed.can_advance_to(Failed));
    assert!(!Failed.can_advance_to(Failed));
}

#[test]
fn zero_threads_is_a_config_error() {
    let mut pipeline = VideoPipeline::new(size(), Vec::new(), opts(0));
    let err = pipeline
        .run(&mut MemorySource::numbered(size(), fps(), 1), &mut InMemorySink::new())
        .unwrap_err();
    assert!(matches!(err, EngineError::Config(_)));
}
