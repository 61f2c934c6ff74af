//! Image views, owned buffers, and mask planes.
//!
//! `ImageView` is a borrowed 2D view into a 1D buffer with an explicit
//! stride; region slices are zero-copy views into the same backing slice and
//! retain the original stride. Pixel data is `f32`, mask planes are `u16`
//! bitmasks where a nonzero bit under the configured bad-pixel bits excludes
//! the pixel from all statistics.

use crate::util::{BfkError, BfkResult};

/// Mask bit for pixels flagged as untrustworthy near the detector edge.
pub const MASK_EDGE: u16 = 1 << 0;
/// Mask bit for pixels flagged bad by upstream processing.
pub const MASK_BAD: u16 = 1 << 1;
/// Mask bit for saturated pixels.
pub const MASK_SAT: u16 = 1 << 2;

/// Borrowed 2D image view with an explicit stride.
#[derive(Copy, Clone, Debug)]
pub struct ImageView<'a, T> {
    data: &'a [T],
    width: usize,
    height: usize,
    stride: usize,
}

impl<'a, T> ImageView<'a, T> {
    /// Creates a contiguous view with `stride == width`.
    pub fn from_slice(data: &'a [T], width: usize, height: usize) -> BfkResult<Self> {
        Self::new(data, width, height, width)
    }

    /// Creates a view with an explicit stride.
    pub fn new(data: &'a [T], width: usize, height: usize, stride: usize) -> BfkResult<Self> {
        if width == 0 || height == 0 {
            return Err(BfkError::InvalidDimensions { width, height });
        }
        if stride < width {
            return Err(BfkError::InvalidStride { width, stride });
        }
        let needed = (height - 1) * stride + width;
        if data.len() < needed {
            return Err(BfkError::BufferTooSmall {
                needed,
                got: data.len(),
            });
        }
        Ok(Self {
            data,
            width,
            height,
            stride,
        })
    }

    /// Returns the image width in pixels.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Returns the image height in pixels.
    pub fn height(&self) -> usize {
        self.height
    }

    /// Returns the stride in elements between row starts.
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Returns a contiguous slice for row `y` with length `width`.
    pub fn row(&self, y: usize) -> Option<&'a [T]> {
        if y >= self.height {
            return None;
        }
        let start = y * self.stride;
        self.data.get(start..start + self.width)
    }

    /// Returns a zero-copy sub-view into the same backing buffer.
    pub fn view(&self, x: usize, y: usize, width: usize, height: usize) -> BfkResult<Self> {
        let oob = BfkError::RegionOutOfBounds {
            x,
            y,
            width,
            height,
            img_width: self.width,
            img_height: self.height,
        };
        if width == 0 || height == 0 {
            return Err(BfkError::InvalidDimensions { width, height });
        }
        if x + width > self.width || y + height > self.height {
            return Err(oob);
        }
        ImageView::new(&self.data[y * self.stride + x..], width, height, self.stride)
    }
}

/// Owned contiguous image buffer.
#[derive(Clone, Debug, PartialEq)]
pub struct OwnedImage<T> {
    data: Vec<T>,
    width: usize,
    height: usize,
}

impl<T: Copy> OwnedImage<T> {
    /// Creates an image from a contiguous row-major buffer.
    pub fn new(data: Vec<T>, width: usize, height: usize) -> BfkResult<Self> {
        if width == 0 || height == 0 {
            return Err(BfkError::InvalidDimensions { width, height });
        }
        if data.len() != width * height {
            return Err(BfkError::BufferTooSmall {
                needed: width * height,
                got: data.len(),
            });
        }
        Ok(Self {
            data,
            width,
            height,
        })
    }

    /// Creates an image filled with a constant value.
    pub fn filled(value: T, width: usize, height: usize) -> BfkResult<Self> {
        Self::new(vec![value; width * height], width, height)
    }

    /// Returns the image width in pixels.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Returns the image height in pixels.
    pub fn height(&self) -> usize {
        self.height
    }

    /// Returns a borrowed view of the whole image.
    pub fn view(&self) -> ImageView<'_, T> {
        ImageView {
            data: &self.data,
            width: self.width,
            height: self.height,
            stride: self.width,
        }
    }

    /// Returns the backing row-major slice.
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    /// Returns the backing row-major slice mutably.
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }
}

/// Averages `factor`x`factor` pixel blocks into one output pixel.
///
/// Trailing rows/columns that do not fill a whole block are dropped, like
/// integer image binning in standard reduction pipelines. `factor == 1`
/// returns a plain copy.
pub fn bin_image(src: ImageView<'_, f32>, factor: usize) -> BfkResult<OwnedImage<f32>> {
    if factor == 0 {
        return Err(BfkError::InvalidParameter("bin factor must be >= 1"));
    }
    let out_w = src.width() / factor;
    let out_h = src.height() / factor;
    if out_w == 0 || out_h == 0 {
        return Err(BfkError::InvalidDimensions {
            width: out_w,
            height: out_h,
        });
    }
    let norm = 1.0 / (factor * factor) as f32;
    let mut data = Vec::with_capacity(out_w * out_h);
    for by in 0..out_h {
        for bx in 0..out_w {
            let mut acc = 0.0f32;
            for dy in 0..factor {
                let row = src.row(by * factor + dy).expect("row within bounds");
                for dx in 0..factor {
                    acc += row[bx * factor + dx];
                }
            }
            data.push(acc * norm);
        }
    }
    OwnedImage::new(data, out_w, out_h)
}

/// ORs mask bits over `factor`x`factor` blocks, matching `bin_image` output
/// geometry. A binned pixel is bad if any contributing pixel was bad.
pub fn bin_mask(src: ImageView<'_, u16>, factor: usize) -> BfkResult<OwnedImage<u16>> {
    if factor == 0 {
        return Err(BfkError::InvalidParameter("bin factor must be >= 1"));
    }
    let out_w = src.width() / factor;
    let out_h = src.height() / factor;
    if out_w == 0 || out_h == 0 {
        return Err(BfkError::InvalidDimensions {
            width: out_w,
            height: out_h,
        });
    }
    let mut data = Vec::with_capacity(out_w * out_h);
    for by in 0..out_h {
        for bx in 0..out_w {
            let mut bits = 0u16;
            for dy in 0..factor {
                let row = src.row(by * factor + dy).expect("row within bounds");
                for dx in 0..factor {
                    bits |= row[bx * factor + dx];
                }
            }
            data.push(bits);
        }
    }
    OwnedImage::new(data, out_w, out_h)
}

/// Flags a ring of `n` border pixels with `bit` in the mask plane.
pub fn mask_edges(mask: &mut OwnedImage<u16>, n: usize, bit: u16) {
    if n == 0 {
        return;
    }
    let width = mask.width();
    let height = mask.height();
    let data = mask.as_mut_slice();
    for y in 0..height {
        for x in 0..width {
            if x < n || y < n || x >= width - n.min(width) || y >= height - n.min(height) {
                data[y * width + x] |= bit;
            }
        }
    }
}
