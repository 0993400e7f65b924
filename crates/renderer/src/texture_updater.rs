//! Batched texture uploads.
//!
//! The content side appends [`UpdateEntry`]s while producing a commit; the
//! impl side drains them with [`TextureUpdater::update`], each call bounded by
//! a maximum upload count so a single frame never issues an unbounded number
//! of GPU commands. Full uploads always drain before partial ones and the
//! context is flushed periodically inside each kind.

use std::collections::VecDeque;
use std::sync::Arc;

use render_protocol::{IntPoint, IntRect};

use crate::context::{GraphicsContext, flush_uploads};
use crate::pixels::TextureSource;
use crate::texture::{ManagedTextureId, ManagedTextureInfo, TextureAllocator};
use crate::uploader::{CopyEntry, TextureCopier, TextureUploader, UploadError};

pub const FLUSH_PERIOD_FULL: usize = 4;
pub const FLUSH_PERIOD_PARTIAL: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateKind {
    Full,
    Partial,
}

/// One pending upload of `source_rect` of `source` into `dest_rect` of
/// `texture`.
#[derive(Debug, Clone)]
pub struct UpdateEntry {
    pub texture: ManagedTextureInfo,
    pub source: Arc<dyn TextureSource>,
    pub source_rect: IntRect,
    pub dest_rect: IntRect,
}

impl UpdateEntry {
    pub fn new(
        texture: ManagedTextureInfo,
        source: Arc<dyn TextureSource>,
        source_rect: IntRect,
        dest_origin: IntPoint,
    ) -> Self {
        assert!(
            !source_rect.is_empty(),
            "upload source rect must be non-empty"
        );
        let dest_rect = IntRect::from_location_and_size(dest_origin, source_rect.size());
        Self {
            texture,
            source,
            source_rect,
            dest_rect,
        }
    }

    /// Upload of the whole source into the texture origin.
    pub fn whole(texture: ManagedTextureInfo, source: Arc<dyn TextureSource>) -> Self {
        let source_rect = IntRect::from_location_and_size(IntPoint::ZERO, source.size());
        Self::new(texture, source, source_rect, IntPoint::ZERO)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TextureUpdateError {
    #[error("graphics context lost during texture update")]
    ContextLost,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TextureUpdaterConfigError {
    #[error("{kind:?} flush period must be greater than zero")]
    ZeroFlushPeriod { kind: UpdateKind },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureUpdaterConfig {
    pub flush_period_full: usize,
    pub flush_period_partial: usize,
}

impl Default for TextureUpdaterConfig {
    fn default() -> Self {
        Self {
            flush_period_full: FLUSH_PERIOD_FULL,
            flush_period_partial: FLUSH_PERIOD_PARTIAL,
        }
    }
}

impl TextureUpdaterConfig {
    pub fn validate(&self) -> Result<(), TextureUpdaterConfigError> {
        if self.flush_period_full == 0 {
            return Err(TextureUpdaterConfigError::ZeroFlushPeriod {
                kind: UpdateKind::Full,
            });
        }
        if self.flush_period_partial == 0 {
            return Err(TextureUpdaterConfigError::ZeroFlushPeriod {
                kind: UpdateKind::Partial,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct TextureUpdater {
    config: TextureUpdaterConfig,
    full_entries: VecDeque<UpdateEntry>,
    partial_entries: VecDeque<UpdateEntry>,
    copy_entries: VecDeque<CopyEntry>,
}

#[derive(Debug, Default)]
struct QueueRun {
    uploaded: usize,
    dropped: usize,
    flushes: usize,
    stopped: Option<UploadError>,
}

impl TextureUpdater {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: TextureUpdaterConfig) -> Result<Self, TextureUpdaterConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            ..Self::default()
        })
    }

    pub fn config(&self) -> TextureUpdaterConfig {
        self.config
    }

    pub fn append_full_upload(&mut self, entry: UpdateEntry) {
        self.full_entries.push_back(entry);
    }

    pub fn append_partial_upload(&mut self, entry: UpdateEntry) {
        self.partial_entries.push_back(entry);
    }

    pub fn append_upload(&mut self, entry: UpdateEntry, kind: UpdateKind) {
        match kind {
            UpdateKind::Full => self.append_full_upload(entry),
            UpdateKind::Partial => self.append_partial_upload(entry),
        }
    }

    pub fn append_copy(&mut self, entry: CopyEntry) {
        self.copy_entries.push_back(entry);
    }

    pub fn has_more_updates(&self) -> bool {
        !self.full_entries.is_empty() || !self.partial_entries.is_empty()
    }

    pub fn pending_upload_count(&self) -> usize {
        self.full_entries.len() + self.partial_entries.len()
    }

    pub fn pending_count(&self, kind: UpdateKind) -> usize {
        match kind {
            UpdateKind::Full => self.full_entries.len(),
            UpdateKind::Partial => self.partial_entries.len(),
        }
    }

    pub fn pending_copy_count(&self) -> usize {
        self.copy_entries.len()
    }

    /// Drops queued work that targets textures which no longer exist.
    pub fn discard_updates_for(&mut self, released: &[ManagedTextureId]) -> usize {
        if released.is_empty() {
            return 0;
        }
        let before = self.pending_upload_count() + self.copy_entries.len();
        let is_live = |texture: &ManagedTextureInfo| !released.contains(&texture.id);
        self.full_entries.retain(|entry| is_live(&entry.texture));
        self.partial_entries.retain(|entry| is_live(&entry.texture));
        self.copy_entries
            .retain(|entry| is_live(&entry.source) && is_live(&entry.destination));
        before - (self.pending_upload_count() + self.copy_entries.len())
    }

    pub fn clear(&mut self) {
        self.full_entries.clear();
        self.partial_entries.clear();
        self.copy_entries.clear();
    }

    /// Runs one bounded pass: at most `max_count` uploads, full entries
    /// first, then every queued copy. Returns whether uploads remain.
    ///
    /// An entry that fails for lack of memory stays at the head of its queue
    /// and ends the pass quietly; context loss does the same but is reported
    /// as an error. Entries that fail for any other reason are dropped.
    pub fn update(
        &mut self,
        context: &mut dyn GraphicsContext,
        allocator: &mut dyn TextureAllocator,
        copier: &mut dyn TextureCopier,
        uploader: &mut dyn TextureUploader,
        max_count: usize,
    ) -> Result<bool, TextureUpdateError> {
        if max_count > 0 && self.has_more_updates() {
            if uploader.is_busy() {
                tracing::trace!("uploader busy, deferring uploads");
            } else {
                self.run_upload_session(context, allocator, uploader, max_count)?;
            }
        }
        self.run_copies(context, allocator, copier)?;
        Ok(self.has_more_updates())
    }

    fn run_upload_session(
        &mut self,
        context: &mut dyn GraphicsContext,
        allocator: &mut dyn TextureAllocator,
        uploader: &mut dyn TextureUploader,
        max_count: usize,
    ) -> Result<(), TextureUpdateError> {
        uploader.begin_uploads();
        let full = upload_queue(
            &mut self.full_entries,
            self.config.flush_period_full,
            max_count,
            context,
            allocator,
            uploader,
        );
        let partial = if full.stopped.is_none() {
            upload_queue(
                &mut self.partial_entries,
                self.config.flush_period_partial,
                max_count - full.uploaded,
                context,
                allocator,
                uploader,
            )
        } else {
            QueueRun::default()
        };
        uploader.end_uploads();

        tracing::debug!(
            full = full.uploaded,
            partial = partial.uploaded,
            dropped = full.dropped + partial.dropped,
            flushes = full.flushes + partial.flushes,
            remaining = self.pending_upload_count(),
            "texture upload pass"
        );

        match full.stopped.or(partial.stopped) {
            None => Ok(()),
            Some(error) if error.is_context_lost() => {
                tracing::warn!("context lost during texture upload");
                Err(TextureUpdateError::ContextLost)
            }
            Some(error) => {
                tracing::warn!(%error, "texture upload stalled, entry kept for retry");
                Ok(())
            }
        }
    }

    fn run_copies(
        &mut self,
        context: &mut dyn GraphicsContext,
        allocator: &mut dyn TextureAllocator,
        copier: &mut dyn TextureCopier,
    ) -> Result<(), TextureUpdateError> {
        let mut copied = 0;
        while let Some(entry) = self.copy_entries.front() {
            match copier.copy_texture(context, allocator, entry) {
                Ok(()) => copied += 1,
                Err(error) if error.is_context_lost() => {
                    if copied > 0 {
                        copier.flush(context);
                    }
                    return Err(TextureUpdateError::ContextLost);
                }
                Err(error) if error.is_retryable() => {
                    tracing::warn!(%error, "texture copy stalled, entry kept for retry");
                    break;
                }
                Err(error) => {
                    tracing::warn!(%error, ?entry, "dropping texture copy");
                }
            }
            self.copy_entries.pop_front();
        }
        if copied > 0 {
            copier.flush(context);
        }
        Ok(())
    }
}

fn upload_queue(
    queue: &mut VecDeque<UpdateEntry>,
    flush_period: usize,
    limit: usize,
    context: &mut dyn GraphicsContext,
    allocator: &mut dyn TextureAllocator,
    uploader: &mut dyn TextureUploader,
) -> QueueRun {
    let mut run = QueueRun::default();
    while run.uploaded < limit {
        let Some(entry) = queue.front() else {
            break;
        };
        let texture = entry.texture.id;
        match uploader.upload_texture(context, allocator, entry) {
            Ok(()) => {}
            Err(error) if error.is_context_lost() || error.is_retryable() => {
                run.stopped = Some(error);
                break;
            }
            Err(error) => {
                tracing::warn!(%error, ?texture, "dropping upload that cannot succeed");
                queue.pop_front();
                run.dropped += 1;
                continue;
            }
        }
        queue.pop_front();
        run.uploaded += 1;
        if run.uploaded % flush_period == 0 {
            flush_uploads(context);
            run.flushes += 1;
        }
    }
    if run.uploaded % flush_period != 0 {
        flush_uploads(context);
        run.flushes += 1;
    }
    run
}
