/// Errors raised when raw pixel storage does not match the declared geometry.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ImageError {
    #[error("invalid image dimensions (width={width}, height={height})")]
    InvalidDimensions { width: usize, height: usize },
    #[error("stride {stride} is smaller than row width {width}")]
    InvalidStride { stride: usize, width: usize },
    #[error("pixel buffer too short (expected at least {expected} bytes, got {got})")]
    BufferTooShort { expected: usize, got: usize },
}

/// Borrowed 8-bit grayscale image, row-major with an explicit row stride.
#[derive(Clone, Copy, Debug)]
pub struct GrayImageView<'a> {
    pub width: usize,
    pub height: usize,
    pub stride: usize,
    pub data: &'a [u8],
}

/// Owned 8-bit grayscale pixel buffer.
///
/// This is the canonical representation every pipeline stage consumes:
/// one channel, `stride >= width`, `data` long enough to hold `height` rows.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PixelBuffer {
    width: usize,
    height: usize,
    stride: usize,
    data: Vec<u8>,
}

impl PixelBuffer {
    /// Number of samples per pixel. Always 1 (grayscale).
    pub const CHANNELS: usize = 1;

    /// Wrap raw rows, checking the geometry invariants.
    pub fn from_raw(
        width: usize,
        height: usize,
        stride: usize,
        data: Vec<u8>,
    ) -> Result<Self, ImageError> {
        if width == 0 || height == 0 {
            return Err(ImageError::InvalidDimensions { width, height });
        }
        let row = width
            .checked_mul(Self::CHANNELS)
            .ok_or(ImageError::InvalidDimensions { width, height })?;
        if stride < row {
            return Err(ImageError::InvalidStride { stride, width: row });
        }
        let expected = stride
            .checked_mul(height - 1)
            .and_then(|n| n.checked_add(row))
            .ok_or(ImageError::InvalidDimensions { width, height })?;
        if data.len() < expected {
            return Err(ImageError::BufferTooShort {
                expected,
                got: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            stride,
            data,
        })
    }

    /// Tightly packed buffer (`stride == width`).
    pub fn from_packed(width: usize, height: usize, data: Vec<u8>) -> Result<Self, ImageError> {
        Self::from_raw(width, height, width, data)
    }

    /// A uniform image, mostly useful for tests and synthetic rendering.
    pub fn filled(width: usize, height: usize, value: u8) -> Result<Self, ImageError> {
        let len = width
            .checked_mul(height)
            .ok_or(ImageError::InvalidDimensions { width, height })?;
        Self::from_packed(width, height, vec![value; len])
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn stride(&self) -> usize {
        self.stride
    }

    #[inline]
    pub fn channels(&self) -> usize {
        Self::CHANNELS
    }

    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Pixel value, or `None` outside the image.
    #[inline]
    pub fn get(&self, x: usize, y: usize) -> Option<u8> {
        if x >= self.width || y >= self.height {
            return None;
        }
        Some(self.data[y * self.stride + x])
    }

    /// Mutable access to one pixel; out-of-range writes are ignored.
    #[inline]
    pub fn put(&mut self, x: usize, y: usize, value: u8) {
        if x < self.width && y < self.height {
            self.data[y * self.stride + x] = value;
        }
    }

    pub fn view(&self) -> GrayImageView<'_> {
        GrayImageView {
            width: self.width,
            height: self.height,
            stride: self.stride,
            data: &self.data,
        }
    }

    /// Copy out the visible pixels as a packed row-major vector.
    pub fn to_packed(&self) -> Vec<u8> {
        if self.stride == self.width {
            return self.data[..self.width * self.height].to_vec();
        }
        let mut out = Vec::with_capacity(self.width * self.height);
        for row in self.data.chunks(self.stride).take(self.height) {
            out.extend_from_slice(&row[..self.width]);
        }
        out
    }
}

impl<'a> GrayImageView<'a> {
    /// Pixel value at integer coordinates; 0 outside the image.
    #[inline]
    pub fn get(&self, x: i32, y: i32) -> u8 {
        if x < 0 || y < 0 || x >= self.width as i32 || y >= self.height as i32 {
            return 0;
        }
        self.data[y as usize * self.stride + x as usize]
    }

    /// True when bilinear sampling at `(x, y)` only touches in-image pixels.
    #[inline]
    pub fn contains_sample(&self, x: f32, y: f32) -> bool {
        x.is_finite()
            && y.is_finite()
            && x >= 0.0
            && y >= 0.0
            && x <= (self.width - 1) as f32
            && y <= (self.height - 1) as f32
    }

    /// Iterate over the visible rows. The slices borrow the pixel data, not
    /// the view.
    pub fn rows(&self) -> impl Iterator<Item = &'a [u8]> {
        let (data, stride, width) = (self.data, self.stride, self.width);
        (0..self.height).map(move |y| &data[y * stride..y * stride + width])
    }
}

#[inline]
pub fn sample_bilinear(src: &GrayImageView<'_>, x: f32, y: f32) -> f32 {
    let x0 = x.floor() as i32;
    let y0 = y.floor() as i32;
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let p00 = src.get(x0, y0) as f32;
    let p10 = src.get(x0 + 1, y0) as f32;
    let p01 = src.get(x0, y0 + 1) as f32;
    let p11 = src.get(x0 + 1, y0 + 1) as f32;

    let a = p00 + fx * (p10 - p00);
    let b = p01 + fx * (p11 - p01);
    a + fy * (b - a)
}

/// Bilinear sample that refuses to read outside the image.
#[inline]
pub fn sample_bilinear_checked(src: &GrayImageView<'_>, x: f32, y: f32) -> Option<f32> {
    if !src.contains_sample(x, y) {
        return None;
    }
    Some(sample_bilinear(src, x, y))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn rejects_short_buffers_and_bad_strides() {
        assert_eq!(
            PixelBuffer::from_raw(4, 2, 3, vec![0; 8]),
            Err(ImageError::InvalidStride {
                stride: 3,
                width: 4
            })
        );
        assert_eq!(
            PixelBuffer::from_raw(4, 2, 6, vec![0; 9]),
            Err(ImageError::BufferTooShort {
                expected: 10,
                got: 9
            })
        );
        assert!(PixelBuffer::from_raw(0, 2, 0, vec![]).is_err());
        assert!(PixelBuffer::from_raw(4, 2, 6, vec![0; 10]).is_ok());
    }

    #[test]
    fn padded_rows_are_skipped() {
        let data = vec![1, 2, 99, 3, 4, 99];
        let buf = PixelBuffer::from_raw(2, 2, 3, data).expect("valid");
        assert_eq!(buf.get(1, 1), Some(4));
        assert_eq!(buf.get(2, 0), None);
        assert_eq!(buf.to_packed(), vec![1, 2, 3, 4]);
        let rows: Vec<&[u8]> = buf.view().rows().collect();
        assert_eq!(rows, vec![&[1u8, 2][..], &[3u8, 4][..]]);

        // Rows outlive the view they came from.
        let first = {
            let view = buf.view();
            view.rows().next()
        };
        assert_eq!(first, Some(&[1u8, 2][..]));
    }

    #[test]
    fn bilinear_interpolates_between_pixels() {
        let buf = PixelBuffer::from_packed(2, 2, vec![0, 100, 100, 200]).expect("valid");
        let view = buf.view();
        assert_relative_eq!(sample_bilinear(&view, 0.5, 0.5), 100.0);
        assert_relative_eq!(sample_bilinear(&view, 1.0, 0.0), 100.0);
        assert_eq!(sample_bilinear_checked(&view, 1.0, 1.0), Some(200.0));
        assert_eq!(sample_bilinear_checked(&view, 1.01, 0.0), None);
        assert_eq!(sample_bilinear_checked(&view, -0.1, 0.0), None);
    }
}
