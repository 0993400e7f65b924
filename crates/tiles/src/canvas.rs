//! Painting surfaces: the canvas clients paint tiles with, and the target
//! a backing store paints its tiles onto.

use render_protocol::{IntPoint, IntRect};
use renderer::{PixelBuffer, Rgba};

pub const CHECKER_CELL_SIZE: i32 = 8;
const CHECKER_LIGHT: Rgba = [0xff, 0xff, 0xff, 0xff];
const CHECKER_DARK: Rgba = [0xcc, 0xcc, 0xcc, 0xff];

/// Target of [`crate::TiledBackingStore::paint`], in backing store space.
pub trait PaintContext {
    fn fill_rect(&mut self, rect: IntRect, color: Rgba);

    /// Draws `source_rect` of `pixels` with its origin at `dest_origin`.
    fn draw_pixels(&mut self, pixels: &PixelBuffer, source_rect: IntRect, dest_origin: IntPoint);
}

impl PaintContext for PixelBuffer {
    fn fill_rect(&mut self, rect: IntRect, color: Rgba) {
        PixelBuffer::fill_rect(self, rect, color);
    }

    fn draw_pixels(&mut self, pixels: &PixelBuffer, source_rect: IntRect, dest_origin: IntPoint) {
        self.copy_from(pixels, source_rect, dest_origin);
    }
}

/// Placeholder for areas that have no painted tile yet. Cells are aligned to
/// the backing store origin so adjacent patches line up.
pub fn paint_checker_pattern(context: &mut dyn PaintContext, rect: IntRect) {
    if rect.is_empty() {
        return;
    }
    let first_column = rect.x.div_euclid(CHECKER_CELL_SIZE);
    let first_row = rect.y.div_euclid(CHECKER_CELL_SIZE);
    let last_column = (rect.max_x() - 1).div_euclid(CHECKER_CELL_SIZE);
    let last_row = (rect.max_y() - 1).div_euclid(CHECKER_CELL_SIZE);
    for row in first_row..=last_row {
        for column in first_column..=last_column {
            let cell = IntRect::new(
                column * CHECKER_CELL_SIZE,
                row * CHECKER_CELL_SIZE,
                CHECKER_CELL_SIZE,
                CHECKER_CELL_SIZE,
            );
            context.fill_rect(cell.intersection(&rect), checker_color_at(cell.location()));
        }
    }
}

pub fn checker_color_at(point: IntPoint) -> Rgba {
    let column = point.x.div_euclid(CHECKER_CELL_SIZE);
    let row = point.y.div_euclid(CHECKER_CELL_SIZE);
    if (row + column).rem_euclid(2) == 0 {
        CHECKER_LIGHT
    } else {
        CHECKER_DARK
    }
}

/// A tile back buffer seen through backing store coordinates.
///
/// Everything drawn is clipped to the area being repainted.
#[derive(Debug)]
pub struct TileCanvas<'a> {
    pixels: &'a mut PixelBuffer,
    origin: IntPoint,
    clip: IntRect,
    contents_scale: f32,
}

impl<'a> TileCanvas<'a> {
    pub(crate) fn new(
        pixels: &'a mut PixelBuffer,
        origin: IntPoint,
        clip: IntRect,
        contents_scale: f32,
    ) -> Self {
        Self {
            pixels,
            origin,
            clip,
            contents_scale,
        }
    }

    pub fn clip_rect(&self) -> IntRect {
        self.clip
    }

    /// Scale between client contents space and the space of this canvas.
    pub fn contents_scale(&self) -> f32 {
        self.contents_scale
    }

    pub fn fill_rect(&mut self, rect: IntRect, color: Rgba) {
        let rect = rect.intersection(&self.clip);
        if rect.is_empty() {
            return;
        }
        self.pixels
            .fill_rect(rect.translated(-self.origin.x, -self.origin.y), color);
    }

    pub fn draw_pixels(&mut self, pixels: &PixelBuffer, dest_origin: IntPoint) {
        let dest =
            IntRect::from_location_and_size(dest_origin, pixels.size()).intersection(&self.clip);
        if dest.is_empty() {
            return;
        }
        let source_rect = dest.translated(-dest_origin.x, -dest_origin.y);
        self.pixels.copy_from(
            pixels,
            source_rect,
            IntPoint::new(dest.x - self.origin.x, dest.y - self.origin.y),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use render_protocol::IntSize;

    const BLUE: Rgba = [0, 0, 255, 255];

    #[test]
    fn canvas_translates_and_clips_to_the_repaint_area() {
        let mut pixels = PixelBuffer::new(IntSize::new(4, 4));
        let mut canvas = TileCanvas::new(
            &mut pixels,
            IntPoint::new(100, 100),
            IntRect::new(101, 101, 2, 2),
            1.0,
        );

        canvas.fill_rect(IntRect::new(0, 0, 1000, 1000), BLUE);

        assert_eq!(pixels.pixel(0, 0), Some([0, 0, 0, 0]));
        assert_eq!(pixels.pixel(1, 1), Some(BLUE));
        assert_eq!(pixels.pixel(2, 2), Some(BLUE));
        assert_eq!(pixels.pixel(3, 3), Some([0, 0, 0, 0]));
    }

    #[test]
    fn checker_pattern_alternates_aligned_cells() {
        let mut target = PixelBuffer::new(IntSize::new(20, 10));
        paint_checker_pattern(&mut target, IntRect::new(4, 0, 16, 10));

        assert_eq!(target.pixel(3, 0), Some([0, 0, 0, 0]));
        assert_eq!(target.pixel(4, 0), Some(CHECKER_LIGHT));
        assert_eq!(target.pixel(8, 0), Some(CHECKER_DARK));
        assert_eq!(target.pixel(8, 8), Some(CHECKER_LIGHT));
        assert_eq!(
            target.pixel(19, 9),
            Some(checker_color_at(IntPoint::new(19, 9)))
        );
    }
}
