//! Content layer whose pixels live in a tiled backing store.

use std::sync::Arc;

use frame_scheduler::Clock;
use kurbo::Vec2;
use render_protocol::{DamageRects, IntPoint, IntRect};
use renderer::{TextureHandleFactory, TextureUpdater};
use threads::ContentRole;
use tiles::{
    TileStoreConfigError, TiledBackingStore, TiledBackingStoreClient, TiledBackingStoreConfig,
};

use crate::layers::{LayerId, LayerSnapshot};

#[derive(Debug)]
pub struct TiledLayer<C: TiledBackingStoreClient> {
    id: LayerId,
    position: IntPoint,
    opacity: f32,
    store: TiledBackingStore<C>,
}

impl<C: TiledBackingStoreClient> TiledLayer<C> {
    pub fn new(
        id: LayerId,
        client: C,
        config: TiledBackingStoreConfig,
        textures: TextureHandleFactory,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, TileStoreConfigError> {
        Ok(Self {
            id,
            position: IntPoint::ZERO,
            opacity: 1.0,
            store: TiledBackingStore::new(client, config, textures, clock)?,
        })
    }

    pub fn id(&self) -> LayerId {
        self.id
    }

    pub fn store(&self) -> &TiledBackingStore<C> {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut TiledBackingStore<C> {
        &mut self.store
    }

    /// Viewport position of the backing store origin.
    pub fn position(&self) -> IntPoint {
        self.position
    }

    pub fn set_position(&mut self, position: IntPoint) {
        self.position = position;
    }

    pub fn opacity(&self) -> f32 {
        self.opacity
    }

    pub fn set_opacity(&mut self, opacity: f32) {
        self.opacity = opacity.clamp(0.0, 1.0);
    }

    pub fn set_needs_display(&mut self, contents_rect: IntRect) {
        self.store.invalidate(contents_rect);
    }

    /// Brings coverage up to date, runs due tile work and queues the uploads
    /// of freshly painted tiles. Returns the viewport damage they cause.
    pub fn update(
        &mut self,
        _role: &ContentRole,
        updater: &mut TextureUpdater,
        trajectory: Vec2,
    ) -> DamageRects {
        self.store.cover_with_tiles_if_needed(trajectory);
        self.store.service_timers();
        let damage = self
            .store
            .tiles()
            .filter(|tile| tile.has_pending_upload())
            .map(|tile| tile.rect().translated(self.position.x, self.position.y))
            .collect::<DamageRects>();
        let queued = self.store.drain_pending_uploads(updater);
        if queued > 0 {
            tracing::trace!(layer = self.id.0, queued, "tile uploads queued");
        }
        damage
    }

    /// One snapshot per painted tile, in tile order.
    pub fn snapshots(&self) -> Vec<LayerSnapshot> {
        self.store
            .tile_quads()
            .into_iter()
            .map(|quad| LayerSnapshot {
                layer: self.id,
                texture: quad.texture,
                rect: quad.rect.translated(self.position.x, self.position.y),
                opacity: self.opacity,
            })
            .collect()
    }

    /// Tile textures were dropped with the old context.
    pub fn did_recreate_context(&mut self) {
        self.store.request_full_uploads();
    }
}
