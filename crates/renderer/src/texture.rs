//! Managed textures: content-side handles whose GPU storage lives on the
//! impl side.
//!
//! A [`ManagedTexture`] carries only an id, a size and a format. The
//! [`ContentsTextureAllocator`] binds ids to context textures lazily on first
//! upload. Dropping a handle queues its id on a channel; the allocator deletes
//! the GPU texture the next time [`ContentsTextureAllocator::reclaim_released`]
//! runs, which the compositor does at commit.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_channel::{Receiver, Sender};
use render_protocol::{IntSize, TextureFormat, TextureId};

use crate::context::{ContextError, GraphicsContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ManagedTextureId(u64);

impl ManagedTextureId {
    pub fn raw(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ManagedTextureInfo {
    pub id: ManagedTextureId,
    pub size: IntSize,
    pub format: TextureFormat,
}

impl ManagedTextureInfo {
    pub fn byte_size(&self) -> u64 {
        self.format.byte_size(self.size)
    }
}

/// Owning handle. Not `Clone`: the last owner decides when storage is freed.
#[derive(Debug)]
pub struct ManagedTexture {
    info: ManagedTextureInfo,
    release: Sender<ManagedTextureId>,
}

impl ManagedTexture {
    pub fn id(&self) -> ManagedTextureId {
        self.info.id
    }

    pub fn size(&self) -> IntSize {
        self.info.size
    }

    pub fn format(&self) -> TextureFormat {
        self.info.format
    }

    pub fn info(&self) -> ManagedTextureInfo {
        self.info
    }
}

impl Drop for ManagedTexture {
    fn drop(&mut self) {
        // The allocator may already be gone, in which case so is the storage.
        let _ = self.release.send(self.info.id);
    }
}

/// Mints [`ManagedTexture`] handles. Cheap to clone and `Send`.
#[derive(Debug, Clone)]
pub struct TextureHandleFactory {
    next_id: Arc<AtomicU64>,
    release: Sender<ManagedTextureId>,
}

impl TextureHandleFactory {
    pub fn create(&self, size: IntSize, format: TextureFormat) -> ManagedTexture {
        assert!(
            !size.is_empty(),
            "managed texture size must be non-empty: {size:?}"
        );
        let id = ManagedTextureId(self.next_id.fetch_add(1, Ordering::Relaxed));
        ManagedTexture {
            info: ManagedTextureInfo { id, size, format },
            release: self.release.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AllocationError {
    #[error("texture budget exceeded: {requested} bytes requested, {available} available")]
    BudgetExceeded { requested: u64, available: u64 },
    #[error("managed texture {0:?} has no storage")]
    Missing(ManagedTextureId),
    #[error(transparent)]
    Context(#[from] ContextError),
}

impl AllocationError {
    pub fn is_context_lost(&self) -> bool {
        matches!(self, AllocationError::Context(ContextError::ContextLost))
    }
}

/// Binds managed texture ids to context textures.
pub trait TextureAllocator {
    /// Returns the context texture for `texture`, allocating it on first use.
    fn acquire(
        &mut self,
        context: &mut dyn GraphicsContext,
        texture: &ManagedTextureInfo,
    ) -> Result<TextureId, AllocationError>;

    fn lookup(&self, texture: ManagedTextureId) -> Option<TextureId>;
}

#[derive(Debug, Clone, Copy)]
struct Backing {
    texture: TextureId,
    bytes: u64,
}

/// Allocator for layer contents textures, with an optional byte budget.
#[derive(Debug)]
pub struct ContentsTextureAllocator {
    factory: TextureHandleFactory,
    released: Receiver<ManagedTextureId>,
    backings: HashMap<ManagedTextureId, Backing>,
    memory_limit_bytes: Option<u64>,
    memory_use_bytes: u64,
}

impl ContentsTextureAllocator {
    pub fn new(memory_limit_bytes: Option<u64>) -> Self {
        let (release, released) = crossbeam_channel::unbounded();
        Self {
            factory: TextureHandleFactory {
                next_id: Arc::new(AtomicU64::new(1)),
                release,
            },
            released,
            backings: HashMap::new(),
            memory_limit_bytes,
            memory_use_bytes: 0,
        }
    }

    pub fn handle_factory(&self) -> TextureHandleFactory {
        self.factory.clone()
    }

    pub fn memory_limit_bytes(&self) -> Option<u64> {
        self.memory_limit_bytes
    }

    pub fn set_memory_limit_bytes(&mut self, limit: Option<u64>) {
        self.memory_limit_bytes = limit;
    }

    pub fn memory_use_bytes(&self) -> u64 {
        self.memory_use_bytes
    }

    pub fn allocated_count(&self) -> usize {
        self.backings.len()
    }

    pub fn is_allocated(&self, texture: ManagedTextureId) -> bool {
        self.backings.contains_key(&texture)
    }

    /// Deletes the storage of every handle dropped since the last call and
    /// returns their ids, including ids that never got storage. Pending
    /// uploads aimed at those ids should be discarded.
    pub fn reclaim_released(
        &mut self,
        context: &mut dyn GraphicsContext,
    ) -> Vec<ManagedTextureId> {
        let released = self.released.try_iter().collect::<Vec<_>>();
        let mut reclaimed = 0;
        for id in &released {
            if let Some(backing) = self.backings.remove(id) {
                context.delete_texture(backing.texture);
                self.memory_use_bytes -= backing.bytes;
                reclaimed += 1;
            }
        }
        if reclaimed > 0 {
            tracing::trace!(
                reclaimed,
                memory_use_bytes = self.memory_use_bytes,
                "reclaimed released textures"
            );
        }
        released
    }

    /// Deletes every backing. Handles stay valid and get new storage on their
    /// next upload.
    pub fn delete_all(&mut self, context: &mut dyn GraphicsContext) -> usize {
        let deleted = self.backings.len();
        for (_, backing) in self.backings.drain() {
            context.delete_texture(backing.texture);
        }
        self.memory_use_bytes = 0;
        deleted
    }
}

impl TextureAllocator for ContentsTextureAllocator {
    fn acquire(
        &mut self,
        context: &mut dyn GraphicsContext,
        texture: &ManagedTextureInfo,
    ) -> Result<TextureId, AllocationError> {
        if let Some(backing) = self.backings.get(&texture.id) {
            return Ok(backing.texture);
        }
        let requested = texture.byte_size();
        if let Some(limit) = self.memory_limit_bytes {
            let available = limit.saturating_sub(self.memory_use_bytes);
            if requested > available {
                return Err(AllocationError::BudgetExceeded {
                    requested,
                    available,
                });
            }
        }
        let created = context.create_texture(texture.size, texture.format)?;
        self.backings.insert(
            texture.id,
            Backing {
                texture: created,
                bytes: requested,
            },
        );
        self.memory_use_bytes += requested;
        Ok(created)
    }

    fn lookup(&self, texture: ManagedTextureId) -> Option<TextureId> {
        self.backings.get(&texture).map(|backing| backing.texture)
    }
}
