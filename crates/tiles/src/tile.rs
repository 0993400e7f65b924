use std::sync::Arc;

use render_protocol::{IntPoint, IntRect, TextureFormat};
use renderer::{
    ManagedTexture, ManagedTextureInfo, PixelBuffer, TextureHandleFactory, TextureSource,
    UpdateEntry, UpdateKind,
};

use crate::canvas::{PaintContext, TileCanvas};
use crate::store::TiledBackingStoreClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct TileCoordinate {
    pub x: i32,
    pub y: i32,
}

impl TileCoordinate {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// One grid cell of a backing store.
///
/// Painting goes to the back buffer. A swap publishes it as an immutable
/// front snapshot, which both [`Tile::paint`] and the pending texture upload
/// read from.
#[derive(Debug)]
pub struct Tile {
    coordinate: TileCoordinate,
    rect: IntRect,
    back_buffer: PixelBuffer,
    front_buffer: Option<Arc<PixelBuffer>>,
    texture: ManagedTexture,
    dirty_rect: IntRect,
    // Tile-local area changed since the last drained upload.
    pending_upload: IntRect,
}

impl Tile {
    pub(crate) fn new(
        coordinate: TileCoordinate,
        rect: IntRect,
        textures: &TextureHandleFactory,
    ) -> Self {
        Self {
            coordinate,
            rect,
            back_buffer: PixelBuffer::new(rect.size()),
            front_buffer: None,
            texture: textures.create(rect.size(), TextureFormat::Rgba8Unorm),
            dirty_rect: rect,
            pending_upload: IntRect::ZERO,
        }
    }

    pub fn coordinate(&self) -> TileCoordinate {
        self.coordinate
    }

    pub fn rect(&self) -> IntRect {
        self.rect
    }

    pub fn texture(&self) -> ManagedTextureInfo {
        self.texture.info()
    }

    pub fn is_dirty(&self) -> bool {
        !self.dirty_rect.is_empty()
    }

    pub fn dirty_rect(&self) -> IntRect {
        self.dirty_rect
    }

    pub fn is_ready_to_paint(&self) -> bool {
        self.front_buffer.is_some()
    }

    pub fn has_pending_upload(&self) -> bool {
        !self.pending_upload.is_empty()
    }

    pub fn front_buffer(&self) -> Option<&PixelBuffer> {
        self.front_buffer.as_deref()
    }

    pub(crate) fn invalidate(&mut self, dirty_rect: IntRect) {
        let dirty = dirty_rect.intersection(&self.rect);
        if dirty.is_empty() {
            return;
        }
        self.dirty_rect.unite(&dirty);
    }

    /// Grows or shrinks an edge tile. Storage is reallocated and the whole
    /// tile repainted.
    pub(crate) fn resize(&mut self, rect: IntRect, textures: &TextureHandleFactory) {
        debug_assert_eq!(rect.location(), self.rect.location());
        self.rect = rect;
        self.back_buffer.resize(rect.size());
        self.texture = textures.create(rect.size(), TextureFormat::Rgba8Unorm);
        self.pending_upload = IntRect::ZERO;
        self.dirty_rect = rect;
    }

    /// Repaints the dirty area through `client`. Returns the painted rect.
    pub(crate) fn update_back_buffer(
        &mut self,
        client: &mut dyn TiledBackingStoreClient,
        contents_scale: f32,
    ) -> Option<IntRect> {
        if !self.is_dirty() {
            return None;
        }
        let dirty = std::mem::replace(&mut self.dirty_rect, IntRect::ZERO);
        let origin = self.rect.location();
        self.back_buffer
            .fill_rect(dirty.translated(-origin.x, -origin.y), [0, 0, 0, 0]);
        let mut canvas = TileCanvas::new(&mut self.back_buffer, origin, dirty, contents_scale);
        client.paint_contents(&mut canvas, dirty);
        Some(dirty)
    }

    pub(crate) fn swap_back_buffer_to_front(&mut self, painted: IntRect) {
        self.front_buffer = Some(Arc::new(self.back_buffer.clone()));
        let local = painted
            .translated(-self.rect.x, -self.rect.y)
            .intersection(&self.local_bounds());
        self.pending_upload.unite(&local);
    }

    /// Upload of everything swapped to front since the previous call.
    pub(crate) fn take_pending_upload(&mut self) -> Option<(UpdateEntry, UpdateKind)> {
        let front = Arc::clone(self.front_buffer.as_ref()?);
        let area = std::mem::replace(&mut self.pending_upload, IntRect::ZERO);
        if area.is_empty() {
            return None;
        }
        let kind = if area == self.local_bounds() {
            UpdateKind::Full
        } else {
            UpdateKind::Partial
        };
        let source: Arc<dyn TextureSource> = front;
        let entry = UpdateEntry::new(self.texture.info(), source, area, area.location());
        Some((entry, kind))
    }

    /// Schedules the whole front buffer for upload, e.g. after the texture
    /// storage was dropped with a lost context.
    pub(crate) fn request_full_upload(&mut self) {
        if self.front_buffer.is_some() {
            self.pending_upload = self.local_bounds();
        }
    }

    /// Draws the part of the front buffer inside `target_rect`.
    pub(crate) fn paint(&self, context: &mut dyn PaintContext, target_rect: IntRect) {
        let Some(front) = self.front_buffer.as_deref() else {
            return;
        };
        let target = target_rect.intersection(&self.rect);
        if target.is_empty() {
            return;
        }
        let source_rect = target.translated(-self.rect.x, -self.rect.y);
        context.draw_pixels(front, source_rect, target.location());
    }

    fn local_bounds(&self) -> IntRect {
        IntRect::from_location_and_size(IntPoint::ZERO, self.rect.size())
    }
}
