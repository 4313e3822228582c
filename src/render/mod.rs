pub mod blend;
pub mod canvas;
pub mod compositor;
pub mod watermark;
