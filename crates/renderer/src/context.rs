//! The GPU context capability consumed by the renderer and the upload path.

use std::fmt;

use render_protocol::{IntRect, IntSize, TextureFormat, TextureId};

pub type Rgba = [u8; 4];

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ContextError {
    #[error("graphics context lost")]
    ContextLost,
    #[error("graphics context out of memory")]
    OutOfMemory,
    #[error("unknown texture {0:?}")]
    UnknownTexture(TextureId),
    #[error("rect {rect:?} does not fit target of size {bounds:?}")]
    RectOutOfBounds { rect: IntRect, bounds: IntSize },
    #[error("pixel buffer holds {actual} bytes, {expected} required")]
    BufferSize { expected: usize, actual: usize },
    #[error("texture size {0:?} is not supported")]
    UnsupportedSize(IntSize),
    #[error("texture format {0:?} cannot be drawn by this context")]
    UnsupportedFormat(TextureFormat),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextCapabilities {
    pub max_texture_size: i32,
    pub supports_shallow_flush: bool,
}

impl Default for ContextCapabilities {
    fn default() -> Self {
        Self {
            max_texture_size: 8192,
            supports_shallow_flush: false,
        }
    }
}

/// A GPU context owned by the impl role.
///
/// Textures are addressed by [`TextureId`]s issued by the context; an id is
/// meaningless once the context that issued it is dropped. Every fallible
/// operation reports [`ContextError::ContextLost`] after loss.
pub trait GraphicsContext: fmt::Debug {
    fn capabilities(&self) -> ContextCapabilities;

    fn viewport_size(&self) -> IntSize;

    fn is_context_lost(&self) -> bool;

    fn create_texture(
        &mut self,
        size: IntSize,
        format: TextureFormat,
    ) -> Result<TextureId, ContextError>;

    fn delete_texture(&mut self, texture: TextureId);

    /// Writes tightly packed rows covering `dest` into `texture`.
    fn write_texture(
        &mut self,
        texture: TextureId,
        dest: IntRect,
        pixels: &[u8],
    ) -> Result<(), ContextError>;

    /// Copies the top-left `size` region of `source` into `destination`.
    fn copy_texture(
        &mut self,
        source: TextureId,
        destination: TextureId,
        size: IntSize,
    ) -> Result<(), ContextError>;

    fn clear(&mut self, rect: IntRect, color: Rgba) -> Result<(), ContextError>;

    /// Draws the whole of `texture` into `dest` on the back buffer.
    fn draw_texture_quad(
        &mut self,
        texture: TextureId,
        dest: IntRect,
        opacity: f32,
    ) -> Result<(), ContextError>;

    /// Reads the back buffer into `pixels` as tightly packed RGBA rows.
    fn read_pixels(&mut self, rect: IntRect, pixels: &mut [u8]) -> Result<(), ContextError>;

    fn swap_buffers(&mut self) -> Result<(), ContextError>;

    fn flush(&mut self);

    /// Flush that only guarantees ordering with later commands. Contexts that
    /// cannot do better fall back to a full flush.
    fn shallow_flush(&mut self) {
        self.flush();
    }

    fn supports_shallow_flush(&self) -> bool {
        self.capabilities().supports_shallow_flush
    }
}

/// Flushes with the cheapest call the context supports.
pub fn flush_uploads(context: &mut dyn GraphicsContext) {
    if context.supports_shallow_flush() {
        context.shallow_flush();
    } else {
        context.flush();
    }
}

pub(crate) fn check_rect_in_bounds(rect: IntRect, bounds: IntSize) -> Result<(), ContextError> {
    let bounds_rect = IntRect::from_location_and_size(render_protocol::IntPoint::ZERO, bounds);
    if rect.is_empty() || !bounds_rect.contains(&rect) {
        return Err(ContextError::RectOutOfBounds { rect, bounds });
    }
    Ok(())
}

pub(crate) fn check_buffer_len(
    rect: IntRect,
    format: TextureFormat,
    len: usize,
) -> Result<(), ContextError> {
    let expected = format.byte_size(rect.size()) as usize;
    if len < expected {
        return Err(ContextError::BufferSize {
            expected,
            actual: len,
        });
    }
    Ok(())
}
