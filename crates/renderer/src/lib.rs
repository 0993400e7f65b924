//! Impl-side rendering: the graphics context capability, managed texture
//! storage, batched texture uploads and the layer renderer.

mod context;
mod layer_renderer;
mod pixels;
mod texture;
mod texture_updater;
mod uploader;

#[cfg(any(test, feature = "test-helpers"))]
pub mod fake_context;
#[cfg(feature = "wgpu-context")]
mod wgpu_context;

pub use context::{ContextCapabilities, ContextError, GraphicsContext, Rgba, flush_uploads};
pub use layer_renderer::{DrawQuad, LayerRenderer, RendererInitError};
pub use pixels::{PixelBuffer, TextureSource};
pub use texture::{
    AllocationError, ContentsTextureAllocator, ManagedTexture, ManagedTextureId,
    ManagedTextureInfo, TextureAllocator, TextureHandleFactory,
};
pub use texture_updater::{
    FLUSH_PERIOD_FULL, FLUSH_PERIOD_PARTIAL, TextureUpdateError, TextureUpdater,
    TextureUpdaterConfig, TextureUpdaterConfigError, UpdateEntry, UpdateKind,
};
pub use uploader::{
    BasicTextureUploader, ContextTextureCopier, CopyEntry, TextureCopier, TextureUploader,
    UploadError,
};
#[cfg(feature = "wgpu-context")]
pub use wgpu_context::{WgpuContextError, WgpuGraphicsContext};
