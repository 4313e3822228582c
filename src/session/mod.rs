//! Job orchestration: asset loading, layout, compositing, watermarking and export.

pub mod engine;

pub use engine::{Engine, RenderOutput};
