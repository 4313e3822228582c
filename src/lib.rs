#![forbid(unsafe_code)]

//! Template-driven poster and video composition.
//!
//! A [`Template`] describes positioned text, image and shape layers on a design canvas. An
//! [`Engine`] resolves it at a target size, composites it onto a still canvas or onto every frame
//! of a source video, stamps an optional watermark and writes the result atomically.

pub mod assets;
pub mod export;
pub mod foundation;
pub mod layout;
pub mod render;
pub mod session;
pub mod template;
pub mod video;

pub use foundation::cancel::CancellationToken;
pub use foundation::config::EngineConfig;
pub use foundation::core::{CanvasSize, Fps, Rect, Rgba8Premul};
pub use foundation::error::{
    AssetError, CompositeError, EngineError, EngineResult, ExportError, LayoutError, VideoError,
};
pub use layout::ops::{DrawContent, DrawOp};
pub use render::canvas::Canvas;
pub use session::{Engine, RenderOutput};
pub use template::job::{
    Anchor, AssetRef, Container, OutputKind, PosterFormat, PosterOutput, RenderJob, VideoCodec,
    VideoOutput, WatermarkSpec,
};
pub use template::model::{BlendMode, ImageFit, Layer, Template};
pub use video::pipeline::{FrameSelection, VideoStats};
pub use video::source::VideoFrame;
