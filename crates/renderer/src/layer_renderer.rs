//! Draws committed layer quads through a [`GraphicsContext`].

use render_protocol::{IntPoint, IntRect, IntSize, TextureId};

use crate::context::{ContextCapabilities, ContextError, GraphicsContext, Rgba};
use crate::uploader::{BasicTextureUploader, ContextTextureCopier, TextureCopier, TextureUploader};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawQuad {
    pub texture: TextureId,
    pub dest_rect: IntRect,
    pub opacity: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RendererInitError {
    #[error("graphics context is lost")]
    ContextLost,
    #[error("graphics context reports max texture size {0}")]
    UnusableMaxTextureSize(i32),
}

/// Owns the context plus the uploader and copier that feed it.
#[derive(Debug)]
pub struct LayerRenderer {
    context: Box<dyn GraphicsContext>,
    uploader: BasicTextureUploader,
    copier: ContextTextureCopier,
    capabilities: ContextCapabilities,
    background_color: Rgba,
    frames_drawn: u64,
}

impl LayerRenderer {
    /// Checks that `context` can back a renderer, without consuming it.
    pub fn check_context(
        context: &dyn GraphicsContext,
    ) -> Result<ContextCapabilities, RendererInitError> {
        if context.is_context_lost() {
            return Err(RendererInitError::ContextLost);
        }
        let capabilities = context.capabilities();
        if capabilities.max_texture_size <= 0 {
            return Err(RendererInitError::UnusableMaxTextureSize(
                capabilities.max_texture_size,
            ));
        }
        Ok(capabilities)
    }

    pub fn initialize(context: Box<dyn GraphicsContext>) -> Result<Self, RendererInitError> {
        let capabilities = Self::check_context(context.as_ref())?;
        tracing::info!(
            max_texture_size = capabilities.max_texture_size,
            shallow_flush = capabilities.supports_shallow_flush,
            "layer renderer initialized"
        );
        Ok(Self {
            context,
            uploader: BasicTextureUploader::new(),
            copier: ContextTextureCopier,
            capabilities,
            background_color: [0, 0, 0, 0],
            frames_drawn: 0,
        })
    }

    pub fn capabilities(&self) -> ContextCapabilities {
        self.capabilities
    }

    pub fn context(&self) -> &dyn GraphicsContext {
        self.context.as_ref()
    }

    pub fn context_mut(&mut self) -> &mut dyn GraphicsContext {
        self.context.as_mut()
    }

    /// Split borrow for an upload pass.
    pub fn upload_parts(
        &mut self,
    ) -> (
        &mut dyn GraphicsContext,
        &mut dyn TextureCopier,
        &mut dyn TextureUploader,
    ) {
        (
            self.context.as_mut(),
            &mut self.copier,
            &mut self.uploader,
        )
    }

    pub fn viewport_size(&self) -> IntSize {
        self.context.viewport_size()
    }

    pub fn viewport_rect(&self) -> IntRect {
        IntRect::from_location_and_size(IntPoint::ZERO, self.viewport_size())
    }

    pub fn is_context_lost(&self) -> bool {
        self.context.is_context_lost()
    }

    pub fn set_background_color(&mut self, color: Rgba) {
        self.background_color = color;
    }

    pub fn frames_drawn(&self) -> u64 {
        self.frames_drawn
    }

    /// Clears `damage` (clipped to the viewport) and draws `quads` in order.
    pub fn draw_frame(&mut self, damage: IntRect, quads: &[DrawQuad]) -> Result<(), ContextError> {
        let clear_rect = damage.intersection(&self.viewport_rect());
        if !clear_rect.is_empty() {
            self.context.clear(clear_rect, self.background_color)?;
        }
        for quad in quads {
            if quad.opacity <= 0.0 || quad.dest_rect.is_empty() {
                continue;
            }
            self.context
                .draw_texture_quad(quad.texture, quad.dest_rect, quad.opacity)?;
        }
        self.frames_drawn += 1;
        tracing::trace!(quads = quads.len(), frame = self.frames_drawn, "frame drawn");
        Ok(())
    }

    pub fn finish(&mut self) {
        self.context.flush();
    }

    pub fn swap_buffers(&mut self) -> Result<(), ContextError> {
        self.context.swap_buffers()
    }

    pub fn read_pixels(&mut self, rect: IntRect, pixels: &mut [u8]) -> Result<(), ContextError> {
        self.context.read_pixels(rect, pixels)
    }
}
