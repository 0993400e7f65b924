//! [`GraphicsContext`] on top of a wgpu device.
//!
//! Quads are composited with texture-to-texture copies into an offscreen
//! back buffer, so `draw_texture_quad` ignores partial opacity. Embedders
//! present the front buffer through [`WgpuGraphicsContext::front_buffer`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use render_protocol::{IntPoint, IntRect, IntSize, TextureFormat, TextureId};
use slotmap::SlotMap;

use crate::context::{
    ContextCapabilities, ContextError, GraphicsContext, Rgba, check_buffer_len,
    check_rect_in_bounds,
};

const COPY_BYTES_PER_ROW_ALIGNMENT: u32 = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
const BACK_BUFFER_FORMAT: TextureFormat = TextureFormat::Rgba8Unorm;

#[derive(Debug, thiserror::Error)]
pub enum WgpuContextError {
    #[error("no suitable adapter: {0}")]
    Adapter(#[from] wgpu::RequestAdapterError),
    #[error("device request failed: {0}")]
    Device(#[from] wgpu::RequestDeviceError),
    #[error("viewport size {0:?} is empty")]
    EmptyViewport(IntSize),
}

#[derive(Debug)]
struct GpuTexture {
    texture: wgpu::Texture,
    size: IntSize,
    format: TextureFormat,
}

#[derive(Debug)]
pub struct WgpuGraphicsContext {
    device: wgpu::Device,
    queue: wgpu::Queue,
    viewport: IntSize,
    textures: SlotMap<TextureId, GpuTexture>,
    back_buffer: wgpu::Texture,
    front_buffer: wgpu::Texture,
    encoder: Option<wgpu::CommandEncoder>,
    lost: Arc<AtomicBool>,
    max_texture_size: i32,
}

fn wgpu_format(format: TextureFormat) -> wgpu::TextureFormat {
    match format {
        TextureFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
        TextureFormat::Bgra8Unorm => wgpu::TextureFormat::Bgra8Unorm,
    }
}

fn extent(size: IntSize) -> wgpu::Extent3d {
    wgpu::Extent3d {
        width: size.width as u32,
        height: size.height as u32,
        depth_or_array_layers: 1,
    }
}

fn origin(point: IntPoint) -> wgpu::Origin3d {
    wgpu::Origin3d {
        x: point.x as u32,
        y: point.y as u32,
        z: 0,
    }
}

fn padded_bytes_per_row(width: i32, format: TextureFormat) -> u32 {
    let unpadded = width as u32 * format.bytes_per_pixel() as u32;
    unpadded.div_ceil(COPY_BYTES_PER_ROW_ALIGNMENT) * COPY_BYTES_PER_ROW_ALIGNMENT
}

fn create_target(device: &wgpu::Device, label: &str, size: IntSize) -> wgpu::Texture {
    device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: extent(size),
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: wgpu_format(BACK_BUFFER_FORMAT),
        usage: wgpu::TextureUsages::COPY_DST
            | wgpu::TextureUsages::COPY_SRC
            | wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::RENDER_ATTACHMENT,
        view_formats: &[],
    })
}

impl WgpuGraphicsContext {
    /// Creates an offscreen context on the default adapter.
    pub fn new_headless(viewport: IntSize) -> Result<Self, WgpuContextError> {
        if viewport.is_empty() {
            return Err(WgpuContextError::EmptyViewport(viewport));
        }
        pollster::block_on(async {
            let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
                backends: wgpu::Backends::all(),
                ..Default::default()
            });
            let adapter = instance
                .request_adapter(&wgpu::RequestAdapterOptions {
                    power_preference: wgpu::PowerPreference::LowPower,
                    compatible_surface: None,
                    force_fallback_adapter: false,
                })
                .await?;
            let (device, queue) = adapter
                .request_device(&wgpu::DeviceDescriptor {
                    label: Some("renderer.compositor_device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: adapter.limits(),
                    experimental_features: wgpu::ExperimentalFeatures::disabled(),
                    memory_hints: wgpu::MemoryHints::Performance,
                    trace: wgpu::Trace::Off,
                })
                .await?;
            Ok(Self::from_device(device, queue, viewport))
        })
    }

    pub fn from_device(device: wgpu::Device, queue: wgpu::Queue, viewport: IntSize) -> Self {
        let lost = Arc::new(AtomicBool::new(false));
        let lost_flag = Arc::clone(&lost);
        device.set_device_lost_callback(move |reason, message| {
            lost_flag.store(true, Ordering::Release);
            tracing::warn!(?reason, %message, "wgpu device lost");
        });
        device.on_uncaptured_error(Arc::new(move |error| {
            tracing::error!(%error, "uncaptured wgpu error");
        }));

        let max_texture_size = device.limits().max_texture_dimension_2d as i32;
        let back_buffer = create_target(&device, "renderer.back_buffer", viewport);
        let front_buffer = create_target(&device, "renderer.front_buffer", viewport);
        Self {
            device,
            queue,
            viewport,
            textures: SlotMap::with_key(),
            back_buffer,
            front_buffer,
            encoder: None,
            lost,
            max_texture_size,
        }
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn front_buffer(&self) -> &wgpu::Texture {
        &self.front_buffer
    }

    fn ensure_alive(&self) -> Result<(), ContextError> {
        if self.lost.load(Ordering::Acquire) {
            return Err(ContextError::ContextLost);
        }
        Ok(())
    }

    fn encoder(&mut self) -> &mut wgpu::CommandEncoder {
        self.encoder.get_or_insert_with(|| {
            self.device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("renderer.compositor_encoder"),
                })
        })
    }

    /// Submits recorded commands so that later queue writes land after them.
    fn submit_pending(&mut self) {
        if let Some(encoder) = self.encoder.take() {
            self.queue.submit(Some(encoder.finish()));
        }
    }

    fn texture(&self, texture: TextureId) -> Result<&GpuTexture, ContextError> {
        self.textures
            .get(texture)
            .ok_or(ContextError::UnknownTexture(texture))
    }

    fn write_target(
        &mut self,
        target: &wgpu::Texture,
        dest: IntRect,
        pixels: &[u8],
        format: TextureFormat,
    ) {
        self.submit_pending();
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: target,
                mip_level: 0,
                origin: origin(dest.location()),
                aspect: wgpu::TextureAspect::All,
            },
            pixels,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(dest.width as u32 * format.bytes_per_pixel() as u32),
                rows_per_image: Some(dest.height as u32),
            },
            extent(dest.size()),
        );
    }
}

impl GraphicsContext for WgpuGraphicsContext {
    fn capabilities(&self) -> ContextCapabilities {
        ContextCapabilities {
            max_texture_size: self.max_texture_size,
            supports_shallow_flush: true,
        }
    }

    fn viewport_size(&self) -> IntSize {
        self.viewport
    }

    fn is_context_lost(&self) -> bool {
        self.lost.load(Ordering::Acquire)
    }

    fn create_texture(
        &mut self,
        size: IntSize,
        format: TextureFormat,
    ) -> Result<TextureId, ContextError> {
        self.ensure_alive()?;
        if size.is_empty()
            || size.width > self.max_texture_size
            || size.height > self.max_texture_size
        {
            return Err(ContextError::UnsupportedSize(size));
        }
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("renderer.contents_texture"),
            size: extent(size),
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu_format(format),
            usage: wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_DST
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        Ok(self.textures.insert(GpuTexture {
            texture,
            size,
            format,
        }))
    }

    fn delete_texture(&mut self, texture: TextureId) {
        if let Some(removed) = self.textures.remove(texture) {
            removed.texture.destroy();
        }
    }

    fn write_texture(
        &mut self,
        texture: TextureId,
        dest: IntRect,
        pixels: &[u8],
    ) -> Result<(), ContextError> {
        self.ensure_alive()?;
        let (target, size, format) = {
            let entry = self.texture(texture)?;
            (entry.texture.clone(), entry.size, entry.format)
        };
        check_rect_in_bounds(dest, size)?;
        check_buffer_len(dest, format, pixels.len())?;
        self.write_target(&target, dest, pixels, format);
        Ok(())
    }

    fn copy_texture(
        &mut self,
        source: TextureId,
        destination: TextureId,
        size: IntSize,
    ) -> Result<(), ContextError> {
        self.ensure_alive()?;
        let source = self.texture(source)?;
        let target = self.texture(destination)?;
        let bounds = IntSize::new(
            source.size.width.min(target.size.width),
            source.size.height.min(target.size.height),
        );
        check_rect_in_bounds(IntRect::from_location_and_size(IntPoint::ZERO, size), bounds)?;
        let (source, target) = (source.texture.clone(), target.texture.clone());
        self.encoder().copy_texture_to_texture(
            source.as_image_copy(),
            target.as_image_copy(),
            extent(size),
        );
        Ok(())
    }

    fn clear(&mut self, rect: IntRect, color: Rgba) -> Result<(), ContextError> {
        self.ensure_alive()?;
        check_rect_in_bounds(rect, self.viewport)?;
        let fill = vec![color; rect.area() as usize];
        let target = self.back_buffer.clone();
        self.write_target(&target, rect, bytemuck::cast_slice(&fill), BACK_BUFFER_FORMAT);
        Ok(())
    }

    fn draw_texture_quad(
        &mut self,
        texture: TextureId,
        dest: IntRect,
        _opacity: f32,
    ) -> Result<(), ContextError> {
        self.ensure_alive()?;
        let source = self.texture(texture)?;
        if source.format != BACK_BUFFER_FORMAT {
            return Err(ContextError::UnsupportedFormat(source.format));
        }
        let drawn = IntRect::from_location_and_size(dest.location(), source.size)
            .intersection(&dest)
            .intersection(&IntRect::from_location_and_size(IntPoint::ZERO, self.viewport));
        if drawn.is_empty() {
            return Ok(());
        }
        let source_origin = IntPoint::new(drawn.x - dest.x, drawn.y - dest.y);
        let source = source.texture.clone();
        let target = self.back_buffer.clone();
        self.encoder().copy_texture_to_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &source,
                mip_level: 0,
                origin: origin(source_origin),
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyTextureInfo {
                texture: &target,
                mip_level: 0,
                origin: origin(drawn.location()),
                aspect: wgpu::TextureAspect::All,
            },
            extent(drawn.size()),
        );
        Ok(())
    }

    fn read_pixels(&mut self, rect: IntRect, pixels: &mut [u8]) -> Result<(), ContextError> {
        self.ensure_alive()?;
        check_rect_in_bounds(rect, self.viewport)?;
        check_buffer_len(rect, BACK_BUFFER_FORMAT, pixels.len())?;

        let padded_row = padded_bytes_per_row(rect.width, BACK_BUFFER_FORMAT);
        let readback = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("renderer.readback"),
            size: u64::from(padded_row) * rect.height as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });
        let back_buffer = self.back_buffer.clone();
        self.encoder().copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &back_buffer,
                mip_level: 0,
                origin: origin(rect.location()),
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &readback,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_row),
                    rows_per_image: Some(rect.height as u32),
                },
            },
            extent(rect.size()),
        );
        self.submit_pending();

        let (sender, receiver) = crossbeam_channel::bounded(1);
        readback
            .slice(..)
            .map_async(wgpu::MapMode::Read, move |result| {
                let _ = sender.send(result);
            });
        if let Err(error) = self.device.poll(wgpu::PollType::wait_indefinitely()) {
            tracing::warn!(%error, "device poll failed during readback");
            return Err(ContextError::ContextLost);
        }
        match receiver.recv() {
            Ok(Ok(())) => {}
            Ok(Err(error)) => {
                tracing::warn!(%error, "readback mapping failed");
                return Err(ContextError::ContextLost);
            }
            Err(_) => return Err(ContextError::ContextLost),
        }

        let row_bytes = rect.width as usize * BACK_BUFFER_FORMAT.bytes_per_pixel();
        {
            let mapped = readback.slice(..).get_mapped_range();
            for (row, chunk) in mapped.chunks(padded_row as usize).enumerate() {
                pixels[row * row_bytes..(row + 1) * row_bytes]
                    .copy_from_slice(&chunk[..row_bytes]);
            }
        }
        readback.unmap();
        Ok(())
    }

    fn swap_buffers(&mut self) -> Result<(), ContextError> {
        self.ensure_alive()?;
        let (back, front) = (self.back_buffer.clone(), self.front_buffer.clone());
        let size = extent(self.viewport);
        self.encoder().copy_texture_to_texture(
            back.as_image_copy(),
            front.as_image_copy(),
            size,
        );
        self.submit_pending();
        Ok(())
    }

    fn flush(&mut self) {
        self.submit_pending();
        if let Err(error) = self.device.poll(wgpu::PollType::Poll) {
            tracing::warn!(%error, "device poll failed");
        }
    }

    fn shallow_flush(&mut self) {
        self.submit_pending();
    }
}
