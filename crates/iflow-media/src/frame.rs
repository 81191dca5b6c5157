//! Raster frames and stream metadata.

use ndarray::Array3;
use serde::{Deserialize, Serialize};

use crate::error::{MediaError, MediaResult};

/// Number of interleaved channels per pixel (BGR).
pub const CHANNELS: usize = 3;

/// A single decoded video frame.
///
/// Pixels are stored as packed BGR24 in an `(height, width, 3)` array, the
/// layout FFmpeg emits for `-pix_fmt bgr24`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    data: Array3<u8>,
}

impl Frame {
    /// Create a black frame.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            data: Array3::zeros((height as usize, width as usize, CHANNELS)),
        }
    }

    /// Create a frame where every pixel has the same BGR value.
    pub fn filled(width: u32, height: u32, bgr: [u8; 3]) -> Self {
        let data = Array3::from_shape_fn((height as usize, width as usize, CHANNELS), |(_, _, c)| {
            bgr[c]
        });
        Self { data }
    }

    /// Wrap a packed BGR24 buffer.
    pub fn from_raw(width: u32, height: u32, bytes: Vec<u8>) -> MediaResult<Self> {
        let expected = frame_size(width, height);
        if bytes.len() != expected {
            return Err(MediaError::internal(format!(
                "frame buffer holds {} bytes, expected {} for {}x{}",
                bytes.len(),
                expected,
                width,
                height
            )));
        }

        let data = Array3::from_shape_vec((height as usize, width as usize, CHANNELS), bytes)
            .map_err(|e| MediaError::internal(format!("frame shape: {e}")))?;
        Ok(Self { data })
    }

    /// Wrap an existing `(height, width, 3)` array.
    pub fn from_array(data: Array3<u8>) -> MediaResult<Self> {
        if data.dim().2 != CHANNELS {
            return Err(MediaError::internal(format!(
                "expected {} channels, got {}",
                CHANNELS,
                data.dim().2
            )));
        }
        Ok(Self {
            data: data.as_standard_layout().into_owned(),
        })
    }

    /// Frame width in pixels.
    pub fn width(&self) -> u32 {
        self.data.dim().1 as u32
    }

    /// Frame height in pixels.
    pub fn height(&self) -> u32 {
        self.data.dim().0 as u32
    }

    /// `(width, height)`
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width(), self.height())
    }

    /// BGR value at `(x, y)`, or `None` outside the frame.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        let (y, x) = (y as usize, x as usize);
        if y >= self.data.dim().0 || x >= self.data.dim().1 {
            return None;
        }
        Some([
            self.data[[y, x, 0]],
            self.data[[y, x, 1]],
            self.data[[y, x, 2]],
        ])
    }

    /// Packed BGR24 bytes in row-major order.
    pub fn as_bytes(&self) -> MediaResult<&[u8]> {
        self.data
            .as_slice()
            .ok_or_else(|| MediaError::internal("frame buffer is not contiguous"))
    }

    /// Size of the packed buffer in bytes.
    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    /// Borrow the pixel array mutably.
    pub fn array_mut(&mut self) -> &mut Array3<u8> {
        &mut self.data
    }

    pub(crate) fn array(&self) -> &Array3<u8> {
        &self.data
    }
}

/// Bytes needed for one packed BGR24 frame.
pub fn frame_size(width: u32, height: u32) -> usize {
    width as usize * height as usize * CHANNELS
}

/// Properties of an opened input stream.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StreamInfo {
    /// Frame rate (fps)
    pub frame_rate: f64,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Number of frames, as reported by the container (may be an estimate)
    pub frame_count: u64,
}

impl StreamInfo {
    /// `(width, height)`
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}
