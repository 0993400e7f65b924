use std::fmt;

use render_protocol::{IntPoint, IntRect, IntSize, TextureFormat};

use crate::context::Rgba;

/// CPU-side pixels an upload reads from.
pub trait TextureSource: fmt::Debug + Send + Sync {
    fn size(&self) -> IntSize;

    fn format(&self) -> TextureFormat {
        TextureFormat::Rgba8Unorm
    }

    /// Replaces the contents of `out` with the tightly packed rows of `rect`.
    fn read_rect(&self, rect: IntRect, out: &mut Vec<u8>);
}

/// Row-major RGBA8 image.
#[derive(Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    size: IntSize,
    pixels: Vec<Rgba>,
}

impl fmt::Debug for PixelBuffer {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("PixelBuffer")
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

impl PixelBuffer {
    pub fn new(size: IntSize) -> Self {
        Self::filled(size, [0, 0, 0, 0])
    }

    pub fn filled(size: IntSize, color: Rgba) -> Self {
        let len = size.area() as usize;
        Self {
            size: if size.is_empty() { IntSize::ZERO } else { size },
            pixels: vec![color; len],
        }
    }

    pub fn size(&self) -> IntSize {
        self.size
    }

    pub fn bounds(&self) -> IntRect {
        IntRect::from_location_and_size(IntPoint::ZERO, self.size)
    }

    pub fn pixels(&self) -> &[Rgba] {
        &self.pixels
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.pixels)
    }

    pub fn pixel(&self, x: i32, y: i32) -> Option<Rgba> {
        if !self.bounds().contains_point(IntPoint::new(x, y)) {
            return None;
        }
        Some(self.pixels[self.index(x, y)])
    }

    pub fn set_pixel(&mut self, x: i32, y: i32, color: Rgba) {
        if self.bounds().contains_point(IntPoint::new(x, y)) {
            let index = self.index(x, y);
            self.pixels[index] = color;
        }
    }

    /// Fills `rect` clipped to the buffer bounds.
    pub fn fill_rect(&mut self, rect: IntRect, color: Rgba) {
        let rect = rect.intersection(&self.bounds());
        for y in rect.y..rect.max_y() {
            let start = self.index(rect.x, y);
            self.pixels[start..start + rect.width as usize].fill(color);
        }
    }

    /// Copies `source_rect` of `source` so that its origin lands on
    /// `dest_origin`. Both sides are clipped.
    pub fn copy_from(
        &mut self,
        source: &PixelBuffer,
        source_rect: IntRect,
        dest_origin: IntPoint,
    ) {
        let source_rect = source_rect.intersection(&source.bounds());
        let dx = dest_origin.x - source_rect.x;
        let dy = dest_origin.y - source_rect.y;
        let dest_rect = source_rect.translated(dx, dy).intersection(&self.bounds());
        for y in dest_rect.y..dest_rect.max_y() {
            let dest_start = self.index(dest_rect.x, y);
            let source_start = source.index(dest_rect.x - dx, y - dy);
            let width = dest_rect.width as usize;
            self.pixels[dest_start..dest_start + width]
                .copy_from_slice(&source.pixels[source_start..source_start + width]);
        }
    }

    /// Changes the size keeping the overlapping pixels. New area is transparent.
    pub fn resize(&mut self, size: IntSize) {
        if size == self.size {
            return;
        }
        let mut resized = PixelBuffer::new(size);
        resized.copy_from(self, self.bounds(), IntPoint::ZERO);
        *self = resized;
    }

    fn index(&self, x: i32, y: i32) -> usize {
        (y as usize) * (self.size.width as usize) + x as usize
    }
}

impl TextureSource for PixelBuffer {
    fn size(&self) -> IntSize {
        self.size
    }

    fn read_rect(&self, rect: IntRect, out: &mut Vec<u8>) {
        assert!(
            self.bounds().contains(&rect),
            "read rect {rect:?} outside pixel buffer of size {:?}",
            self.size
        );
        out.clear();
        out.reserve(TextureFormat::Rgba8Unorm.byte_size(rect.size()) as usize);
        for y in rect.y..rect.max_y() {
            let start = self.index(rect.x, y);
            out.extend_from_slice(bytemuck::cast_slice(
                &self.pixels[start..start + rect.width as usize],
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RED: Rgba = [255, 0, 0, 255];
    const BLUE: Rgba = [0, 0, 255, 255];

    #[test]
    fn read_rect_packs_rows_tightly() {
        let mut buffer = PixelBuffer::new(IntSize::new(4, 3));
        buffer.fill_rect(IntRect::new(1, 1, 2, 2), RED);

        let mut out = vec![9; 3];
        buffer.read_rect(IntRect::new(1, 1, 2, 1), &mut out);

        assert_eq!(out, [RED, RED].concat());
    }

    #[test]
    fn fill_rect_is_clipped_to_bounds() {
        let mut buffer = PixelBuffer::new(IntSize::new(2, 2));
        buffer.fill_rect(IntRect::new(-5, -5, 6, 6), BLUE);

        assert_eq!(buffer.pixel(0, 0), Some(BLUE));
        assert_eq!(buffer.pixel(1, 0), Some([0, 0, 0, 0]));
        assert_eq!(buffer.pixel(2, 0), None);
    }

    #[test]
    fn resize_keeps_overlap_and_clears_new_area() {
        let mut buffer = PixelBuffer::filled(IntSize::new(2, 2), RED);
        buffer.resize(IntSize::new(3, 1));

        assert_eq!(buffer.size(), IntSize::new(3, 1));
        assert_eq!(buffer.pixels(), &[RED, RED, [0, 0, 0, 0]]);
    }

    #[test]
    fn copy_from_offsets_source_rect() {
        let mut source = PixelBuffer::new(IntSize::new(4, 4));
        source.set_pixel(2, 3, BLUE);
        let mut dest = PixelBuffer::new(IntSize::new(2, 2));

        dest.copy_from(&source, IntRect::new(2, 2, 2, 2), IntPoint::ZERO);

        assert_eq!(dest.pixel(0, 1), Some(BLUE));
        assert_eq!(dest.pixel(1, 1), Some([0, 0, 0, 0]));
    }
}
