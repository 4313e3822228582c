use crate::foundation::core::{CanvasSize, Rgba8Premul};
use crate::foundation::error::{CompositeError, EngineResult};

/// Premultiplied RGBA8 pixel buffer owned by exactly one in-flight render.
///
/// Dimensions are fixed at creation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Canvas {
    size: CanvasSize,
    data: Vec<u8>,
}

impl Canvas {
    /// Fully transparent canvas.
    pub fn new(size: CanvasSize) -> Self {
        Self {
            size,
            data: vec![0u8; size.byte_len()],
        }
    }

    pub fn filled(size: CanvasSize, color: Rgba8Premul) -> Self {
        let mut c = Self::new(size);
        c.fill(color);
        c
    }

    /// Wrap existing premultiplied bytes (e.g. a decoded video frame).
    pub fn from_premul(size: CanvasSize, data: Vec<u8>) -> EngineResult<Self> {
        if data.len() != size.byte_len() {
            return Err(CompositeError::out_of_bounds(
                "<canvas>",
                format!(
                    "buffer has {} bytes, expected {} for {}x{}",
                    data.len(),
                    size.byte_len(),
                    size.width,
                    size.height
                ),
            )
            .into());
        }
        Ok(Self { size, data })
    }

    pub fn size(&self) -> CanvasSize {
        self.size
    }

    pub fn width(&self) -> u32 {
        self.size.width
    }

    pub fn height(&self) -> u32 {
        self.size.height
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    pub fn fill(&mut self, color: Rgba8Premul) {
        let px = color.to_array();
        for d in self.data.chunks_exact_mut(4) {
            d.copy_from_slice(&px);
        }
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.size.width || y >= self.size.height {
            return None;
        }
        let i = ((y as usize) * (self.size.width as usize) + (x as usize)) * 4;
        Some([
            self.data[i],
            self.data[i + 1],
            self.data[i + 2],
            self.data[i + 3],
        ])
    }
}
