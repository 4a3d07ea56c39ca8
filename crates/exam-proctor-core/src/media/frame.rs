//! Immutable snapshots produced by the samplers

use crate::error::FrameError;

/// An RGBA video frame grabbed from the camera track
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl Frame {
    /// Bytes per pixel of the raster (RGBA)
    pub const CHANNELS: usize = 4;

    /// Create a frame from a row-major RGBA buffer
    pub fn from_rgba(width: u32, height: u32, data: Vec<u8>) -> Result<Self, FrameError> {
        if width == 0 || height == 0 {
            return Err(FrameError::EmptyDimensions { width, height });
        }
        let expected = width as usize * height as usize * Self::CHANNELS;
        if data.len() != expected {
            return Err(FrameError::LengthMismatch {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Create a frame filled with a single color; zero dimensions become 1
    pub fn solid(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let (width, height) = (width.max(1), height.max(1));
        let pixels = width as usize * height as usize;
        let mut data = Vec::with_capacity(pixels * Self::CHANNELS);
        for _ in 0..pixels {
            data.extend_from_slice(&[rgb[0], rgb[1], rgb[2], 255]);
        }
        Self {
            width,
            height,
            data,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Raw RGBA bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// RGB of the pixel at (x, y); alpha is ignored
    ///
    /// Callers must stay within bounds.
    #[inline]
    pub fn rgb(&self, x: u32, y: u32) -> [u8; 3] {
        let idx = (y as usize * self.width as usize + x as usize) * Self::CHANNELS;
        [self.data[idx], self.data[idx + 1], self.data[idx + 2]]
    }

    /// Paint an axis-aligned rectangle, clipped to the frame
    pub fn fill_rect(&mut self, x: u32, y: u32, width: u32, height: u32, rgb: [u8; 3]) {
        let x_end = x.saturating_add(width).min(self.width);
        let y_end = y.saturating_add(height).min(self.height);
        for py in y.min(self.height)..y_end {
            for px in x.min(self.width)..x_end {
                let idx = (py as usize * self.width as usize + px as usize) * Self::CHANNELS;
                self.data[idx] = rgb[0];
                self.data[idx + 1] = rgb[1];
                self.data[idx + 2] = rgb[2];
                self.data[idx + 3] = 255;
            }
        }
    }
}

/// Frequency-bin amplitudes (0-255) read from the microphone analyser
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AudioSpectrum {
    bins: Vec<u8>,
}

impl AudioSpectrum {
    pub fn new(bins: Vec<u8>) -> Self {
        Self { bins }
    }

    pub fn bins(&self) -> &[u8] {
        &self.bins
    }

    /// Mean amplitude over all bins; zero for an empty spectrum
    pub fn mean(&self) -> f32 {
        if self.bins.is_empty() {
            return 0.0;
        }
        let sum: u32 = self.bins.iter().map(|&b| u32::from(b)).sum();
        sum as f32 / self.bins.len() as f32
    }

    /// Highest amplitude over all bins
    pub fn peak(&self) -> u8 {
        self.bins.iter().copied().max().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_rejects_bad_length() {
        let err = Frame::from_rgba(2, 2, vec![0; 15]).unwrap_err();
        assert_eq!(
            err,
            FrameError::LengthMismatch {
                expected: 16,
                actual: 15
            }
        );
        assert!(Frame::from_rgba(0, 4, vec![]).is_err());
    }

    #[test]
    fn test_fill_rect_is_clipped() {
        let mut frame = Frame::solid(4, 4, [0, 0, 0]);
        frame.fill_rect(2, 2, 10, 10, [200, 100, 50]);
        assert_eq!(frame.rgb(3, 3), [200, 100, 50]);
        assert_eq!(frame.rgb(1, 1), [0, 0, 0]);
    }

    #[test]
    fn test_spectrum_stats() {
        let spectrum = AudioSpectrum::new(vec![10, 20, 30, 200]);
        assert!((spectrum.mean() - 65.0).abs() < f32::EPSILON);
        assert_eq!(spectrum.peak(), 200);
        assert_eq!(AudioSpectrum::default().mean(), 0.0);
    }
}
