//! Tiled backing store: decides which tiles of a large contents area exist,
//! keeps them painted, and evicts them once they fall out of reach.
//!
//! All geometry inside the store is in backing store space, i.e. client
//! contents coordinates multiplied by the contents scale. Work is deferred to
//! two cancellable tasks, serviced by [`TiledBackingStore::service_timers`]:
//! tile creation, which walks outward from the viewport one distance ring per
//! pass, and tile buffer updates, which repaint invalidated tiles.

use std::collections::HashMap;
use std::sync::Arc;

use frame_scheduler::{Clock, TaskHandle, TaskScheduler};
use kurbo::Vec2;
use render_protocol::{IntPoint, IntRect, IntSize};
use renderer::{ManagedTextureInfo, TextureHandleFactory, TextureUpdater};

use crate::canvas::{PaintContext, TileCanvas, paint_checker_pattern};
use crate::config::{TileStoreConfigError, TiledBackingStoreConfig};
use crate::tile::{Tile, TileCoordinate};

/// Content side of a backing store. Rects are in unscaled contents space.
pub trait TiledBackingStoreClient {
    fn visible_rect(&self) -> IntRect;

    fn contents_rect(&self) -> IntRect;

    fn paint_begin(&mut self) {}

    /// Paints `rect`, given in backing store space, into `canvas`.
    fn paint_contents(&mut self, canvas: &mut TileCanvas<'_>, rect: IntRect);

    fn paint_end(&mut self, _painted_rects: &[IntRect]) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BackingStoreTask {
    CreateTiles,
    UpdateTileBuffers,
}

/// Texture and placement of a painted tile, in backing store space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileQuad {
    pub coordinate: TileCoordinate,
    pub rect: IntRect,
    pub texture: ManagedTextureInfo,
}

#[derive(Debug)]
pub struct TiledBackingStore<C: TiledBackingStoreClient> {
    client: C,
    config: TiledBackingStoreConfig,
    textures: TextureHandleFactory,
    clock: Arc<dyn Clock>,
    tasks: TaskScheduler<BackingStoreTask>,
    backing_store_update_task: Option<TaskHandle>,
    tile_buffer_update_task: Option<TaskHandle>,
    tiles: HashMap<TileCoordinate, Tile>,
    rect: IntRect,
    previous_rect: IntRect,
    visible_rect: IntRect,
    cover_rect: IntRect,
    keep_rect: IntRect,
    trajectory: Vec2,
    contents_scale: f32,
    pending_scale: Option<f32>,
    contents_frozen: bool,
    pending_tile_creation: usize,
    tiles_created_total: u64,
    tiles_evicted_total: u64,
}

impl<C: TiledBackingStoreClient> TiledBackingStore<C> {
    pub fn new(
        client: C,
        config: TiledBackingStoreConfig,
        textures: TextureHandleFactory,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, TileStoreConfigError> {
        config.validate()?;
        Ok(Self {
            client,
            config,
            textures,
            clock,
            tasks: TaskScheduler::new(),
            backing_store_update_task: None,
            tile_buffer_update_task: None,
            tiles: HashMap::new(),
            rect: IntRect::ZERO,
            previous_rect: IntRect::ZERO,
            visible_rect: IntRect::ZERO,
            cover_rect: IntRect::ZERO,
            keep_rect: IntRect::ZERO,
            trajectory: Vec2::ZERO,
            contents_scale: 1.0,
            pending_scale: None,
            contents_frozen: false,
            pending_tile_creation: 0,
            tiles_created_total: 0,
            tiles_evicted_total: 0,
        })
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Mutating the client's geometry takes effect on the next
    /// [`Self::cover_with_tiles_if_needed`].
    pub fn client_mut(&mut self) -> &mut C {
        &mut self.client
    }

    pub fn config(&self) -> TiledBackingStoreConfig {
        self.config
    }

    pub fn tile_size(&self) -> IntSize {
        self.config.tile_size
    }

    pub fn contents_scale(&self) -> f32 {
        self.contents_scale
    }

    pub fn pending_scale(&self) -> Option<f32> {
        self.pending_scale
    }

    pub fn contents_frozen(&self) -> bool {
        self.contents_frozen
    }

    pub fn cover_rect(&self) -> IntRect {
        self.cover_rect
    }

    pub fn keep_rect(&self) -> IntRect {
        self.keep_rect
    }

    /// Contents rect in backing store space, as of the last creation pass.
    pub fn rect(&self) -> IntRect {
        self.rect
    }

    pub fn trajectory(&self) -> Vec2 {
        self.trajectory
    }

    pub fn tile_count(&self) -> usize {
        self.tiles.len()
    }

    pub fn tile_at(&self, coordinate: TileCoordinate) -> Option<&Tile> {
        self.tiles.get(&coordinate)
    }

    pub fn tiles(&self) -> impl Iterator<Item = &Tile> {
        self.tiles.values()
    }

    pub fn pending_tile_creation(&self) -> usize {
        self.pending_tile_creation
    }

    pub fn tiles_created_total(&self) -> u64 {
        self.tiles_created_total
    }

    pub fn tiles_evicted_total(&self) -> u64 {
        self.tiles_evicted_total
    }

    pub fn has_pending_tasks(&self) -> bool {
        !self.tasks.is_empty()
    }

    pub fn next_task_deadline(&self) -> Option<std::time::Instant> {
        self.tasks.next_deadline()
    }

    pub fn map_from_contents(&self, rect: IntRect) -> IntRect {
        rect.scaled_enclosing(self.contents_scale)
    }

    pub fn visible_rect(&self) -> IntRect {
        self.map_from_contents(self.client.visible_rect())
    }

    /// Requests coverage for the client's current geometry. `trajectory` is
    /// the scroll direction; only its direction matters.
    pub fn cover_with_tiles_if_needed(&mut self, trajectory: Vec2) {
        let visible_rect = self.visible_rect();
        let rect = self.map_from_contents(self.client.contents_rect());
        let trajectory = normalized(trajectory);
        if self.trajectory == trajectory && self.visible_rect == visible_rect && self.rect == rect
        {
            return;
        }
        self.trajectory = trajectory;
        self.visible_rect = visible_rect;
        self.start_backing_store_update_timer(std::time::Duration::ZERO);
    }

    /// Runs every due task. Returns how many ran.
    pub fn service_timers(&mut self) -> usize {
        let due = self.tasks.take_due(self.clock.now());
        for task in &due {
            match task {
                BackingStoreTask::CreateTiles => {
                    self.backing_store_update_task = None;
                    self.create_tiles();
                }
                BackingStoreTask::UpdateTileBuffers => {
                    self.tile_buffer_update_task = None;
                    self.update_tile_buffers();
                }
            }
        }
        due.len()
    }

    /// Marks every tile intersecting `contents_dirty_rect` dirty and arms the
    /// repaint task.
    pub fn invalidate(&mut self, contents_dirty_rect: IntRect) {
        let dirty_rect = self.map_from_contents(contents_dirty_rect);
        let keep_top_left = self.tile_coordinate_for_point(self.keep_rect.location());
        let mut keep_rect_fit_to_tile_size = self.tile_rect_for_coordinate(keep_top_left);
        keep_rect_fit_to_tile_size.unite(&self.tile_rect_for_coordinate(
            self.tile_coordinate_for_point(self.keep_rect.inner_bottom_right()),
        ));
        let covered_dirty_rect = dirty_rect.intersection(&keep_rect_fit_to_tile_size);
        if !covered_dirty_rect.is_empty() {
            let top_left = self.tile_coordinate_for_point(covered_dirty_rect.location());
            let bottom_right =
                self.tile_coordinate_for_point(covered_dirty_rect.inner_bottom_right());
            for y in top_left.y..=bottom_right.y {
                for x in top_left.x..=bottom_right.x {
                    if let Some(tile) = self.tiles.get_mut(&TileCoordinate::new(x, y)) {
                        tile.invalidate(dirty_rect);
                    }
                }
            }
        }
        self.start_tile_buffer_update_timer();
    }

    /// Repaints dirty tiles and publishes them to their front buffers.
    pub fn update_tile_buffers(&mut self) {
        if self.contents_frozen {
            return;
        }
        self.client.paint_begin();
        let mut dirty = self
            .tiles
            .values()
            .filter(|tile| tile.is_dirty())
            .map(Tile::coordinate)
            .collect::<Vec<_>>();
        dirty.sort();

        let mut painted_area = Vec::with_capacity(dirty.len());
        let mut painted_tiles = Vec::with_capacity(dirty.len());
        for coordinate in dirty {
            let Some(tile) = self.tiles.get_mut(&coordinate) else {
                continue;
            };
            if let Some(painted) = tile.update_back_buffer(&mut self.client, self.contents_scale) {
                painted_area.push(painted);
                painted_tiles.push((coordinate, painted));
            }
        }
        for (coordinate, painted) in &painted_tiles {
            if let Some(tile) = self.tiles.get_mut(coordinate) {
                tile.swap_back_buffer_to_front(*painted);
            }
        }
        if !painted_area.is_empty() {
            tracing::trace!(tiles = painted_area.len(), "tile buffers updated");
        }
        self.client.paint_end(&painted_area);
    }

    /// Moves the uploads of freshly painted tiles into `updater`, in tile
    /// coordinate order.
    pub fn drain_pending_uploads(&mut self, updater: &mut TextureUpdater) -> usize {
        let mut coordinates = self
            .tiles
            .values()
            .filter(|tile| tile.has_pending_upload())
            .map(Tile::coordinate)
            .collect::<Vec<_>>();
        coordinates.sort();
        let mut drained = 0;
        for coordinate in coordinates {
            let Some(tile) = self.tiles.get_mut(&coordinate) else {
                continue;
            };
            if let Some((entry, kind)) = tile.take_pending_upload() {
                updater.append_upload(entry, kind);
                drained += 1;
            }
        }
        drained
    }

    /// Schedules a full re-upload of every painted tile.
    pub fn request_full_uploads(&mut self) {
        for tile in self.tiles.values_mut() {
            tile.request_full_upload();
        }
    }

    /// Painted tiles in tile coordinate order.
    pub fn tile_quads(&self) -> Vec<TileQuad> {
        let mut quads = self
            .tiles
            .values()
            .filter(|tile| tile.is_ready_to_paint())
            .map(|tile| TileQuad {
                coordinate: tile.coordinate(),
                rect: tile.rect(),
                texture: tile.texture(),
            })
            .collect::<Vec<_>>();
        quads.sort_by_key(|quad| quad.coordinate);
        quads
    }

    /// Paints `rect` (backing store space). Areas without a painted tile get
    /// a checkerboard instead of blocking on tile creation.
    pub fn paint(&self, context: &mut dyn PaintContext, rect: IntRect) {
        if rect.is_empty() {
            return;
        }
        let top_left = self.tile_coordinate_for_point(rect.location());
        let bottom_right = self.tile_coordinate_for_point(rect.inner_bottom_right());
        for y in top_left.y..=bottom_right.y {
            for x in top_left.x..=bottom_right.x {
                let coordinate = TileCoordinate::new(x, y);
                match self.tiles.get(&coordinate) {
                    Some(tile) if tile.is_ready_to_paint() => tile.paint(context, rect),
                    _ => {
                        let target = self.tile_rect_for_coordinate(coordinate).intersection(&rect);
                        paint_checker_pattern(context, target);
                    }
                }
            }
        }
    }

    /// Fraction of `rect` (backing store space) covered by painted tiles.
    pub fn coverage_ratio(&self, rect: IntRect) -> f32 {
        if rect.is_empty() {
            return 1.0;
        }
        let top_left = self.tile_coordinate_for_point(rect.location());
        let bottom_right = self.tile_coordinate_for_point(rect.inner_bottom_right());
        let mut covered_area = 0_i64;
        for y in top_left.y..=bottom_right.y {
            for x in top_left.x..=bottom_right.x {
                let Some(tile) = self.tiles.get(&TileCoordinate::new(x, y)) else {
                    continue;
                };
                if tile.is_ready_to_paint() {
                    covered_area += rect.intersection(&tile.rect()).area();
                }
            }
        }
        (covered_area as f64 / rect.area() as f64) as f32
    }

    pub fn visible_area_is_covered(&self) -> bool {
        let bounded_visible_rect = self
            .client
            .visible_rect()
            .intersection(&self.client.contents_rect());
        self.coverage_ratio(self.map_from_contents(bounded_visible_rect)) == 1.0
    }

    pub fn set_contents_scale(&mut self, scale: f32) {
        assert!(
            scale.is_finite() && scale > 0.0,
            "contents scale must be positive and finite, got {scale}"
        );
        if scale == self.contents_scale {
            self.pending_scale = None;
            return;
        }
        self.pending_scale = Some(scale);
        if self.contents_frozen {
            return;
        }
        self.commit_scale_change();
    }

    /// While frozen no tile is created, evicted or repainted.
    pub fn set_contents_frozen(&mut self, frozen: bool) {
        if self.contents_frozen == frozen {
            return;
        }
        self.contents_frozen = frozen;
        if frozen {
            return;
        }
        if self.pending_scale.is_some() {
            self.commit_scale_change();
        } else {
            self.start_backing_store_update_timer(std::time::Duration::ZERO);
            self.start_tile_buffer_update_timer();
        }
    }

    pub fn remove_all_non_visible_tiles(&mut self) {
        let keep_rect = self.visible_rect().intersection(&self.rect);
        self.set_keep_rect(keep_rect);
    }

    /// Grid cell rect, clipped to the contents.
    pub fn tile_rect_for_coordinate(&self, coordinate: TileCoordinate) -> IntRect {
        let tile_size = self.config.tile_size;
        IntRect::new(
            coordinate.x * tile_size.width,
            coordinate.y * tile_size.height,
            tile_size.width,
            tile_size.height,
        )
        .intersection(&self.rect)
    }

    pub fn tile_coordinate_for_point(&self, point: IntPoint) -> TileCoordinate {
        let tile_size = self.config.tile_size;
        TileCoordinate::new(
            (point.x / tile_size.width).max(0),
            (point.y / tile_size.height).max(0),
        )
    }

    /// Cover and keep rects for `visible_rect`, both in backing store space.
    pub fn compute_cover_and_keep_rect(&self, visible_rect: IntRect) -> (IntRect, IntRect) {
        let multiplier = self.config.cover_area_multiplier;
        let mut cover_rect = visible_rect;
        let mut keep_rect = visible_rect;
        if multiplier > 1.0 {
            let extent = (multiplier - 1.0) / 2.0;
            cover_rect.inflate_x((visible_rect.width as f32 * extent) as i32);
            cover_rect.inflate_y((visible_rect.height as f32 * extent) as i32);
            keep_rect = cover_rect;
            if self.trajectory != Vec2::ZERO {
                // Visible rect united with a ghost of itself moved toward the
                // edge of the cover area along the trajectory.
                cover_rect = visible_rect.translated(
                    (f64::from(visible_rect.width) * self.trajectory.x * f64::from(extent)) as i32,
                    (f64::from(visible_rect.height) * self.trajectory.y * f64::from(extent)) as i32,
                );
                cover_rect.unite(&visible_rect);
            }
        }
        cover_rect.intersect(&self.rect);

        keep_rect.unite(&cover_rect);
        keep_rect.inflate_x(self.config.tile_size.width / 2);
        keep_rect.inflate_y(self.config.tile_size.height / 2);
        keep_rect.intersect(&self.rect);
        debug_assert!(cover_rect.is_empty() || keep_rect.contains(&cover_rect));
        (cover_rect, keep_rect)
    }

    fn create_tiles(&mut self) {
        if self.contents_frozen {
            return;
        }
        self.rect = self.map_from_contents(self.client.contents_rect());
        let visible_rect = self.visible_rect();
        self.visible_rect = visible_rect;
        if visible_rect.is_empty() {
            return;
        }

        let (cover_rect, keep_rect) = self.compute_cover_and_keep_rect(visible_rect);
        self.cover_rect = cover_rect;
        self.set_keep_rect(keep_rect);
        if cover_rect.is_empty() {
            return;
        }

        // Edge tiles are resized only after eviction so dropped tiles are not
        // resized for nothing.
        let mut did_resize_tiles = false;
        if self.rect != self.previous_rect {
            did_resize_tiles = self.resize_edge_tiles();
            self.previous_rect = self.rect;
        }

        let top_left = self.tile_coordinate_for_point(cover_rect.location());
        let bottom_right = self.tile_coordinate_for_point(cover_rect.inner_bottom_right());
        let mut tiles_to_create = Vec::new();
        let mut required_tile_count = 0;
        let mut shortest_distance = u32::MAX;
        for y in top_left.y..=bottom_right.y {
            for x in top_left.x..=bottom_right.x {
                let coordinate = TileCoordinate::new(x, y);
                if self.tiles.contains_key(&coordinate) {
                    continue;
                }
                required_tile_count += 1;
                let distance = self.tile_distance(visible_rect, coordinate);
                if distance > shortest_distance {
                    continue;
                }
                if distance < shortest_distance {
                    tiles_to_create.clear();
                    shortest_distance = distance;
                }
                tiles_to_create.push(coordinate);
            }
        }

        let created = tiles_to_create.len();
        for coordinate in tiles_to_create {
            let rect = self.tile_rect_for_coordinate(coordinate);
            if rect.is_empty() {
                continue;
            }
            self.tiles
                .insert(coordinate, Tile::new(coordinate, rect, &self.textures));
            self.tiles_created_total += 1;
        }
        if created > 0 {
            tracing::debug!(
                created,
                distance = shortest_distance,
                total = self.tiles.len(),
                "tiles created"
            );
        }

        if created > 0 || did_resize_tiles {
            self.update_tile_buffers();
        }

        self.pending_tile_creation = required_tile_count - created;
        if self.pending_tile_creation > 0 {
            self.start_backing_store_update_timer(self.config.tile_creation_delay);
        }
    }

    fn tile_distance(&self, viewport: IntRect, coordinate: TileCoordinate) -> u32 {
        if viewport.intersects(&self.tile_rect_for_coordinate(coordinate)) {
            return 0;
        }
        let center = self.tile_coordinate_for_point(viewport.center());
        center
            .x
            .abs_diff(coordinate.x)
            .max(center.y.abs_diff(coordinate.y))
    }

    /// Evicts every tile that does not intersect `keep_rect`.
    fn set_keep_rect(&mut self, keep_rect: IntRect) {
        let before = self.tiles.len();
        self.tiles.retain(|_, tile| tile.rect().intersects(&keep_rect));
        let evicted = before - self.tiles.len();
        if evicted > 0 {
            self.tiles_evicted_total += evicted as u64;
            tracing::debug!(evicted, remaining = self.tiles.len(), "tiles evicted");
        }
        self.keep_rect = keep_rect;
    }

    fn resize_edge_tiles(&mut self) -> bool {
        let mut was_resized = false;
        let mut to_remove = Vec::new();
        let expected = self
            .tiles
            .keys()
            .map(|coordinate| (*coordinate, self.tile_rect_for_coordinate(*coordinate)))
            .collect::<Vec<_>>();
        for (coordinate, expected_rect) in expected {
            let Some(tile) = self.tiles.get_mut(&coordinate) else {
                continue;
            };
            if expected_rect.is_empty() {
                to_remove.push(coordinate);
            } else if expected_rect != tile.rect() {
                tile.resize(expected_rect, &self.textures);
                was_resized = true;
            }
        }
        for coordinate in &to_remove {
            self.tiles.remove(coordinate);
        }
        self.tiles_evicted_total += to_remove.len() as u64;
        was_resized
    }

    fn commit_scale_change(&mut self) {
        let Some(scale) = self.pending_scale.take() else {
            return;
        };
        tracing::debug!(from = self.contents_scale, to = scale, "contents scale committed");
        self.contents_scale = scale;
        self.tiles_evicted_total += self.tiles.len() as u64;
        self.tiles.clear();
        self.cover_with_tiles_if_needed(self.trajectory);
        self.start_backing_store_update_timer(std::time::Duration::ZERO);
    }

    fn start_backing_store_update_timer(&mut self, delay: std::time::Duration) {
        if self.contents_frozen || self.is_armed(self.backing_store_update_task) {
            return;
        }
        let handle = self
            .tasks
            .schedule_once(BackingStoreTask::CreateTiles, self.clock.now(), delay);
        self.backing_store_update_task = Some(handle);
    }

    fn start_tile_buffer_update_timer(&mut self) {
        if self.contents_frozen || self.is_armed(self.tile_buffer_update_task) {
            return;
        }
        let handle = self.tasks.schedule_once(
            BackingStoreTask::UpdateTileBuffers,
            self.clock.now(),
            self.config.tile_buffer_update_interval,
        );
        self.tile_buffer_update_task = Some(handle);
    }

    fn is_armed(&self, handle: Option<TaskHandle>) -> bool {
        handle.is_some_and(|handle| self.tasks.is_scheduled(handle))
    }
}

impl<C: TiledBackingStoreClient> Drop for TiledBackingStore<C> {
    fn drop(&mut self) {
        let cancelled = self.tasks.cancel_all();
        let released = self.tiles.len();
        self.tiles.clear();
        tracing::trace!(cancelled, released, "tiled backing store dropped");
    }
}

fn normalized(trajectory: Vec2) -> Vec2 {
    if !trajectory.is_finite() || trajectory.hypot2() == 0.0 {
        return Vec2::ZERO;
    }
    trajectory.normalize()
}
