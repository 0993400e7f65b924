use smallvec::SmallVec;

slotmap::new_key_type! {
    /// Identifier of a texture owned by a graphics context.
    pub struct TextureId;
}

/// Damage accumulated by the content side between two commits.
pub type DamageRects = SmallVec<[IntRect; 4]>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct IntPoint {
    pub x: i32,
    pub y: i32,
}

impl IntPoint {
    pub const ZERO: Self = Self { x: 0, y: 0 };

    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct IntSize {
    pub width: i32,
    pub height: i32,
}

impl IntSize {
    pub const ZERO: Self = Self {
        width: 0,
        height: 0,
    };

    pub const fn new(width: i32, height: i32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    pub fn area(&self) -> i64 {
        if self.is_empty() {
            return 0;
        }
        i64::from(self.width) * i64::from(self.height)
    }
}

/// Integer rectangle, `x`/`y` inclusive, `max_x`/`max_y` exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct IntRect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl IntRect {
    pub const ZERO: Self = Self {
        x: 0,
        y: 0,
        width: 0,
        height: 0,
    };

    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub const fn from_location_and_size(location: IntPoint, size: IntSize) -> Self {
        Self::new(location.x, location.y, size.width, size.height)
    }

    pub fn from_edges(min_x: i32, min_y: i32, max_x: i32, max_y: i32) -> Self {
        Self::new(
            min_x,
            min_y,
            max_x.saturating_sub(min_x).max(0),
            max_y.saturating_sub(min_y).max(0),
        )
    }

    pub fn location(&self) -> IntPoint {
        IntPoint::new(self.x, self.y)
    }

    pub fn size(&self) -> IntSize {
        IntSize::new(self.width, self.height)
    }

    pub fn max_x(&self) -> i32 {
        self.x + self.width
    }

    pub fn max_y(&self) -> i32 {
        self.y + self.height
    }

    pub fn center(&self) -> IntPoint {
        IntPoint::new(self.x + self.width / 2, self.y + self.height / 2)
    }

    /// Bottom-right pixel still inside the rect.
    pub fn inner_bottom_right(&self) -> IntPoint {
        IntPoint::new(self.max_x() - 1, self.max_y() - 1)
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    pub fn area(&self) -> i64 {
        self.size().area()
    }

    pub fn contains_point(&self, point: IntPoint) -> bool {
        point.x >= self.x && point.x < self.max_x() && point.y >= self.y && point.y < self.max_y()
    }

    pub fn contains(&self, other: &IntRect) -> bool {
        if other.is_empty() {
            return true;
        }
        !self.is_empty()
            && other.x >= self.x
            && other.y >= self.y
            && other.max_x() <= self.max_x()
            && other.max_y() <= self.max_y()
    }

    pub fn intersects(&self, other: &IntRect) -> bool {
        !self.is_empty()
            && !other.is_empty()
            && self.x < other.max_x()
            && other.x < self.max_x()
            && self.y < other.max_y()
            && other.y < self.max_y()
    }

    pub fn intersection(&self, other: &IntRect) -> IntRect {
        let min_x = self.x.max(other.x);
        let min_y = self.y.max(other.y);
        let max_x = self.max_x().min(other.max_x());
        let max_y = self.max_y().min(other.max_y());
        if min_x >= max_x || min_y >= max_y {
            return IntRect::ZERO;
        }
        IntRect::from_edges(min_x, min_y, max_x, max_y)
    }

    pub fn intersect(&mut self, other: &IntRect) {
        *self = self.intersection(other);
    }

    /// Smallest rect containing both; empty operands are ignored.
    pub fn union(&self, other: &IntRect) -> IntRect {
        if other.is_empty() {
            return *self;
        }
        if self.is_empty() {
            return *other;
        }
        IntRect::from_edges(
            self.x.min(other.x),
            self.y.min(other.y),
            self.max_x().max(other.max_x()),
            self.max_y().max(other.max_y()),
        )
    }

    pub fn unite(&mut self, other: &IntRect) {
        *self = self.union(other);
    }

    pub fn inflate_x(&mut self, dx: i32) {
        self.x -= dx;
        self.width += dx * 2;
    }

    pub fn inflate_y(&mut self, dy: i32) {
        self.y -= dy;
        self.height += dy * 2;
    }

    pub fn inflate(&mut self, delta: i32) {
        self.inflate_x(delta);
        self.inflate_y(delta);
    }

    pub fn translate(&mut self, dx: i32, dy: i32) {
        self.x += dx;
        self.y += dy;
    }

    pub fn translated(&self, dx: i32, dy: i32) -> IntRect {
        IntRect::new(self.x + dx, self.y + dy, self.width, self.height)
    }

    /// Smallest integer rect enclosing this rect scaled by `scale`.
    pub fn scaled_enclosing(&self, scale: f32) -> IntRect {
        if scale == 1.0 {
            return *self;
        }
        let scale = f64::from(scale);
        let min_x = (f64::from(self.x) * scale).floor() as i32;
        let min_y = (f64::from(self.y) * scale).floor() as i32;
        let max_x = (f64::from(self.max_x()) * scale).ceil() as i32;
        let max_y = (f64::from(self.max_y()) * scale).ceil() as i32;
        IntRect::from_edges(min_x, min_y, max_x, max_y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    Rgba8Unorm,
    Bgra8Unorm,
}

impl TextureFormat {
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            TextureFormat::Rgba8Unorm | TextureFormat::Bgra8Unorm => 4,
        }
    }

    /// Bytes needed to store a texture of `size` in this format.
    pub fn byte_size(self, size: IntSize) -> u64 {
        (size.area() as u64) * (self.bytes_per_pixel() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intersection_of_disjoint_rects_is_empty() {
        let left = IntRect::new(0, 0, 10, 10);
        let right = IntRect::new(10, 0, 10, 10);

        assert!(!left.intersects(&right));
        assert!(left.intersection(&right).is_empty());
    }

    #[test]
    fn union_ignores_empty_operand() {
        let rect = IntRect::new(4, 5, 6, 7);

        assert_eq!(rect.union(&IntRect::ZERO), rect);
        assert_eq!(IntRect::ZERO.union(&rect), rect);
    }

    #[test]
    fn inflate_grows_symmetrically() {
        let mut rect = IntRect::new(10, 10, 5, 5);
        rect.inflate_x(2);
        rect.inflate_y(3);

        assert_eq!(rect, IntRect::new(8, 7, 9, 11));
    }

    #[test]
    fn scaled_enclosing_rounds_outwards() {
        let rect = IntRect::new(1, 1, 3, 3);

        assert_eq!(rect.scaled_enclosing(0.5), IntRect::new(0, 0, 2, 2));
        assert_eq!(rect.scaled_enclosing(2.0), IntRect::new(2, 2, 6, 6));
    }

    #[test]
    fn contains_accepts_empty_rect() {
        let rect = IntRect::new(0, 0, 4, 4);

        assert!(rect.contains(&IntRect::ZERO));
        assert!(rect.contains(&IntRect::new(1, 1, 3, 3)));
        assert!(!rect.contains(&IntRect::new(1, 1, 4, 3)));
    }

    #[test]
    fn texture_byte_size_uses_bytes_per_pixel() {
        assert_eq!(
            TextureFormat::Rgba8Unorm.byte_size(IntSize::new(16, 8)),
            16 * 8 * 4
        );
        assert_eq!(TextureFormat::Bgra8Unorm.byte_size(IntSize::ZERO), 0);
    }
}
