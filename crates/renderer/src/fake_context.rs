//! CPU-backed [`GraphicsContext`] for tests.
//!
//! Every call is recorded in a shared event log reachable through a
//! [`FakeContextMonitor`], which stays usable after the context itself has been
//! moved into a renderer. The monitor also injects context loss.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use render_protocol::{IntPoint, IntRect, IntSize, TextureFormat, TextureId};
use slotmap::SlotMap;

use crate::context::{
    ContextCapabilities, ContextError, GraphicsContext, Rgba, check_buffer_len,
    check_rect_in_bounds,
};
use crate::pixels::PixelBuffer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeContextEvent {
    CreateTexture(TextureId),
    DeleteTexture(TextureId),
    WriteTexture { texture: TextureId, rect: IntRect },
    CopyTexture { source: TextureId, destination: TextureId },
    Clear(IntRect),
    DrawQuad { texture: TextureId, dest: IntRect },
    ReadPixels(IntRect),
    SwapBuffers,
    Flush,
    ShallowFlush,
}

#[derive(Debug, Default)]
struct FakeShared {
    events: Vec<FakeContextEvent>,
    lost: bool,
    lose_on_next_draw: bool,
    fail_texture_creation: bool,
    live_textures: usize,
}

#[derive(Debug, Clone, Default)]
pub struct FakeContextMonitor {
    shared: Arc<Mutex<FakeShared>>,
}

impl FakeContextMonitor {
    fn lock(&self) -> MutexGuard<'_, FakeShared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn events(&self) -> Vec<FakeContextEvent> {
        self.lock().events.clone()
    }

    pub fn clear_events(&self) {
        self.lock().events.clear();
    }

    pub fn count(&self, predicate: impl Fn(&FakeContextEvent) -> bool) -> usize {
        self.lock().events.iter().filter(|event| predicate(event)).count()
    }

    /// Flushes of either depth.
    pub fn flush_count(&self) -> usize {
        self.count(|event| {
            matches!(
                event,
                FakeContextEvent::Flush | FakeContextEvent::ShallowFlush
            )
        })
    }

    pub fn write_count(&self) -> usize {
        self.count(|event| matches!(event, FakeContextEvent::WriteTexture { .. }))
    }

    pub fn draw_count(&self) -> usize {
        self.count(|event| matches!(event, FakeContextEvent::DrawQuad { .. }))
    }

    pub fn swap_count(&self) -> usize {
        self.count(|event| matches!(event, FakeContextEvent::SwapBuffers))
    }

    pub fn live_texture_count(&self) -> usize {
        self.lock().live_textures
    }

    pub fn lose_context(&self) {
        self.lock().lost = true;
    }

    pub fn lose_context_on_next_draw(&self) {
        self.lock().lose_on_next_draw = true;
    }

    pub fn set_fail_texture_creation(&self, fail: bool) {
        self.lock().fail_texture_creation = fail;
    }

    pub fn is_lost(&self) -> bool {
        self.lock().lost
    }
}

#[derive(Debug)]
struct FakeTexture {
    pixels: PixelBuffer,
}

#[derive(Debug)]
pub struct FakeGraphicsContext {
    monitor: FakeContextMonitor,
    viewport: IntSize,
    capabilities: ContextCapabilities,
    textures: SlotMap<TextureId, FakeTexture>,
    back_buffer: PixelBuffer,
    front_buffer: PixelBuffer,
}

impl FakeGraphicsContext {
    pub fn new(viewport: IntSize) -> (Self, FakeContextMonitor) {
        let monitor = FakeContextMonitor::default();
        let context = Self {
            monitor: monitor.clone(),
            viewport,
            capabilities: ContextCapabilities::default(),
            textures: SlotMap::with_key(),
            back_buffer: PixelBuffer::new(viewport),
            front_buffer: PixelBuffer::new(viewport),
        };
        (context, monitor)
    }

    pub fn with_capabilities(mut self, capabilities: ContextCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn texture_pixels(&self, texture: TextureId) -> Option<&PixelBuffer> {
        self.textures.get(texture).map(|texture| &texture.pixels)
    }

    pub fn front_buffer(&self) -> &PixelBuffer {
        &self.front_buffer
    }

    fn record(&self, event: FakeContextEvent) {
        self.monitor.lock().events.push(event);
    }

    fn ensure_alive(&self) -> Result<(), ContextError> {
        if self.monitor.is_lost() {
            return Err(ContextError::ContextLost);
        }
        Ok(())
    }

    fn texture(&self, texture: TextureId) -> Result<&FakeTexture, ContextError> {
        self.textures
            .get(texture)
            .ok_or(ContextError::UnknownTexture(texture))
    }
}

impl GraphicsContext for FakeGraphicsContext {
    fn capabilities(&self) -> ContextCapabilities {
        self.capabilities
    }

    fn viewport_size(&self) -> IntSize {
        self.viewport
    }

    fn is_context_lost(&self) -> bool {
        self.monitor.is_lost()
    }

    fn create_texture(
        &mut self,
        size: IntSize,
        _format: TextureFormat,
    ) -> Result<TextureId, ContextError> {
        self.ensure_alive()?;
        if self.monitor.lock().fail_texture_creation {
            return Err(ContextError::OutOfMemory);
        }
        if size.is_empty()
            || size.width > self.capabilities.max_texture_size
            || size.height > self.capabilities.max_texture_size
        {
            return Err(ContextError::UnsupportedSize(size));
        }
        let texture = self.textures.insert(FakeTexture {
            pixels: PixelBuffer::new(size),
        });
        self.monitor.lock().live_textures += 1;
        self.record(FakeContextEvent::CreateTexture(texture));
        Ok(texture)
    }

    fn delete_texture(&mut self, texture: TextureId) {
        if self.textures.remove(texture).is_some() {
            self.monitor.lock().live_textures -= 1;
            self.record(FakeContextEvent::DeleteTexture(texture));
        }
    }

    fn write_texture(
        &mut self,
        texture: TextureId,
        dest: IntRect,
        pixels: &[u8],
    ) -> Result<(), ContextError> {
        self.ensure_alive()?;
        let target = self
            .textures
            .get_mut(texture)
            .ok_or(ContextError::UnknownTexture(texture))?;
        check_rect_in_bounds(dest, target.pixels.size())?;
        check_buffer_len(dest, TextureFormat::Rgba8Unorm, pixels.len())?;
        let texels: &[Rgba] = bytemuck::cast_slice(&pixels[..dest.area() as usize * 4]);
        for (row, y) in (dest.y..dest.max_y()).enumerate() {
            for (column, x) in (dest.x..dest.max_x()).enumerate() {
                target
                    .pixels
                    .set_pixel(x, y, texels[row * dest.width as usize + column]);
            }
        }
        self.record(FakeContextEvent::WriteTexture { texture, rect: dest });
        Ok(())
    }

    fn copy_texture(
        &mut self,
        source: TextureId,
        destination: TextureId,
        size: IntSize,
    ) -> Result<(), ContextError> {
        self.ensure_alive()?;
        let copied = self.texture(source)?.pixels.clone();
        let target = self
            .textures
            .get_mut(destination)
            .ok_or(ContextError::UnknownTexture(destination))?;
        target.pixels.copy_from(
            &copied,
            IntRect::from_location_and_size(IntPoint::ZERO, size),
            IntPoint::ZERO,
        );
        self.record(FakeContextEvent::CopyTexture {
            source,
            destination,
        });
        Ok(())
    }

    fn clear(&mut self, rect: IntRect, color: Rgba) -> Result<(), ContextError> {
        self.ensure_alive()?;
        self.back_buffer.fill_rect(rect, color);
        self.record(FakeContextEvent::Clear(rect));
        Ok(())
    }

    fn draw_texture_quad(
        &mut self,
        texture: TextureId,
        dest: IntRect,
        opacity: f32,
    ) -> Result<(), ContextError> {
        {
            let mut shared = self.monitor.lock();
            if shared.lose_on_next_draw {
                shared.lose_on_next_draw = false;
                shared.lost = true;
            }
        }
        self.ensure_alive()?;
        let source = &self.texture(texture)?.pixels;
        let visible = dest.intersection(&self.back_buffer.bounds());
        let mut drawn = Vec::with_capacity(visible.area() as usize);
        for y in visible.y..visible.max_y() {
            for x in visible.x..visible.max_x() {
                let texel = source.pixel(x - dest.x, y - dest.y).unwrap_or([0, 0, 0, 0]);
                drawn.push((x, y, texel.map(|channel| (f32::from(channel) * opacity) as u8)));
            }
        }
        for (x, y, color) in drawn {
            self.back_buffer.set_pixel(x, y, color);
        }
        self.record(FakeContextEvent::DrawQuad { texture, dest });
        Ok(())
    }

    fn read_pixels(&mut self, rect: IntRect, pixels: &mut [u8]) -> Result<(), ContextError> {
        self.ensure_alive()?;
        check_rect_in_bounds(rect, self.viewport)?;
        check_buffer_len(rect, TextureFormat::Rgba8Unorm, pixels.len())?;
        let mut packed = Vec::new();
        crate::pixels::TextureSource::read_rect(&self.back_buffer, rect, &mut packed);
        pixels[..packed.len()].copy_from_slice(&packed);
        self.record(FakeContextEvent::ReadPixels(rect));
        Ok(())
    }

    fn swap_buffers(&mut self) -> Result<(), ContextError> {
        self.ensure_alive()?;
        self.front_buffer = self.back_buffer.clone();
        self.record(FakeContextEvent::SwapBuffers);
        Ok(())
    }

    fn flush(&mut self) {
        self.record(FakeContextEvent::Flush);
    }

    fn shallow_flush(&mut self) {
        self.record(FakeContextEvent::ShallowFlush);
    }
}
