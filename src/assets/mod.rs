pub mod cache;
pub mod color;
pub mod decode;
pub mod loader;
pub mod media;
pub mod text;
