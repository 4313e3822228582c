pub mod ffmpeg;
pub mod pipeline;
pub mod reorder;
pub mod sink;
pub mod source;
