use render_protocol::IntSize;

use crate::context::{ContextError, GraphicsContext};
use crate::texture::{AllocationError, ManagedTextureInfo, TextureAllocator};
use crate::texture_updater::UpdateEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum UploadError {
    #[error(transparent)]
    Allocation(#[from] AllocationError),
    #[error(transparent)]
    Context(#[from] ContextError),
}

impl UploadError {
    pub fn is_context_lost(&self) -> bool {
        match self {
            UploadError::Allocation(error) => error.is_context_lost(),
            UploadError::Context(error) => *error == ContextError::ContextLost,
        }
    }

    /// Failures that clear up once texture memory is freed. The entry is
    /// kept and retried; any other failure drops it.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            UploadError::Allocation(AllocationError::BudgetExceeded { .. })
                | UploadError::Allocation(AllocationError::Context(ContextError::OutOfMemory))
                | UploadError::Context(ContextError::OutOfMemory)
        )
    }
}

/// Texture-to-texture copy queued behind the uploads of a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyEntry {
    pub source: ManagedTextureInfo,
    pub destination: ManagedTextureInfo,
    pub size: IntSize,
}

/// Moves CPU pixels into managed textures, one upload session at a time.
pub trait TextureUploader {
    /// A busy uploader has earlier work in flight; the pass skips uploads.
    fn is_busy(&self) -> bool {
        false
    }

    fn begin_uploads(&mut self);

    fn end_uploads(&mut self);

    fn upload_texture(
        &mut self,
        context: &mut dyn GraphicsContext,
        allocator: &mut dyn TextureAllocator,
        entry: &UpdateEntry,
    ) -> Result<(), UploadError>;
}

pub trait TextureCopier {
    fn copy_texture(
        &mut self,
        context: &mut dyn GraphicsContext,
        allocator: &mut dyn TextureAllocator,
        entry: &CopyEntry,
    ) -> Result<(), UploadError>;

    fn flush(&mut self, context: &mut dyn GraphicsContext);
}

/// Uploads through [`GraphicsContext::write_texture`], reusing one staging
/// buffer across entries.
#[derive(Debug, Default)]
pub struct BasicTextureUploader {
    staging: Vec<u8>,
    in_session: bool,
    uploads_in_session: usize,
}

impl BasicTextureUploader {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TextureUploader for BasicTextureUploader {
    fn begin_uploads(&mut self) {
        assert!(!self.in_session, "upload session begun twice");
        self.in_session = true;
        self.uploads_in_session = 0;
    }

    fn end_uploads(&mut self) {
        assert!(self.in_session, "upload session ended without begin");
        self.in_session = false;
        tracing::trace!(uploads = self.uploads_in_session, "upload session closed");
    }

    fn upload_texture(
        &mut self,
        context: &mut dyn GraphicsContext,
        allocator: &mut dyn TextureAllocator,
        entry: &UpdateEntry,
    ) -> Result<(), UploadError> {
        assert!(self.in_session, "upload outside of an upload session");
        let texture = allocator.acquire(context, &entry.texture)?;
        entry.source.read_rect(entry.source_rect, &mut self.staging);
        context.write_texture(texture, entry.dest_rect, &self.staging)?;
        self.uploads_in_session += 1;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct ContextTextureCopier;

impl TextureCopier for ContextTextureCopier {
    fn copy_texture(
        &mut self,
        context: &mut dyn GraphicsContext,
        allocator: &mut dyn TextureAllocator,
        entry: &CopyEntry,
    ) -> Result<(), UploadError> {
        let source = allocator
            .lookup(entry.source.id)
            .ok_or(AllocationError::Missing(entry.source.id))?;
        let destination = allocator.acquire(context, &entry.destination)?;
        context.copy_texture(source, destination, entry.size)?;
        Ok(())
    }

    fn flush(&mut self, context: &mut dyn GraphicsContext) {
        context.flush();
    }
}
