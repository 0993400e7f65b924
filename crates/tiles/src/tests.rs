//! Backing store coverage, eviction, repaint and paint tests.

use std::sync::Arc;
use std::time::Duration;

use frame_scheduler::ManualClock;
use kurbo::Vec2;
use render_protocol::{IntPoint, IntRect, IntSize};
use renderer::fake_context::FakeGraphicsContext;
use renderer::{ContentsTextureAllocator, PixelBuffer, Rgba, TextureUpdater, UpdateKind};

use super::*;

const CONTENT: Rgba = [10, 20, 30, 255];

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

#[derive(Debug)]
struct TestClient {
    visible: IntRect,
    contents: IntRect,
    paint_sessions: usize,
    painted_batches: Vec<Vec<IntRect>>,
}

impl TestClient {
    fn new(visible: IntRect, contents: IntRect) -> Self {
        Self {
            visible,
            contents,
            paint_sessions: 0,
            painted_batches: Vec::new(),
        }
    }
}

impl TiledBackingStoreClient for TestClient {
    fn visible_rect(&self) -> IntRect {
        self.visible
    }

    fn contents_rect(&self) -> IntRect {
        self.contents
    }

    fn paint_begin(&mut self) {
        self.paint_sessions += 1;
    }

    fn paint_contents(&mut self, canvas: &mut TileCanvas<'_>, rect: IntRect) {
        canvas.fill_rect(rect, CONTENT);
    }

    fn paint_end(&mut self, painted_rects: &[IntRect]) {
        self.painted_batches.push(painted_rects.to_vec());
    }
}

struct Fixture {
    clock: ManualClock,
    allocator: ContentsTextureAllocator,
    store: TiledBackingStore<TestClient>,
}

impl Fixture {
    fn new(visible: IntRect, contents: IntRect, cover_area_multiplier: f32) -> Self {
        init_tracing();
        let clock = ManualClock::new();
        let allocator = ContentsTextureAllocator::new(None);
        let config = TiledBackingStoreConfig {
            tile_size: IntSize::new(100, 100),
            cover_area_multiplier,
            ..TiledBackingStoreConfig::default()
        };
        let store = TiledBackingStore::new(
            TestClient::new(visible, contents),
            config,
            allocator.handle_factory(),
            Arc::new(clock.clone()),
        )
        .unwrap();
        Self {
            clock,
            allocator,
            store,
        }
    }

    /// Services tasks, advancing time, until none remain.
    fn settle(&mut self) {
        for _ in 0..100 {
            self.store.service_timers();
            if !self.store.has_pending_tasks() {
                return;
            }
            self.clock.advance(Duration::from_millis(10));
        }
        panic!("backing store never settled");
    }

    fn cover(&mut self) {
        self.store.cover_with_tiles_if_needed(Vec2::ZERO);
        self.settle();
    }

    fn move_visible(&mut self, visible: IntRect) {
        self.store.client_mut().visible = visible;
        self.cover();
    }
}

fn assert_coverage_invariants(store: &TiledBackingStore<TestClient>) {
    let visible = store.visible_rect().intersection(&store.rect());
    let cover = store.cover_rect();
    let top_left = store.tile_coordinate_for_point(cover.location());
    let bottom_right = store.tile_coordinate_for_point(cover.inner_bottom_right());
    for y in top_left.y..=bottom_right.y {
        for x in top_left.x..=bottom_right.x {
            let coordinate = TileCoordinate::new(x, y);
            let rect = store.tile_rect_for_coordinate(coordinate);
            if rect.intersects(&cover) {
                assert!(store.tile_at(coordinate).is_some(), "missing tile {coordinate:?}");
            }
            if rect.intersects(&visible) {
                assert!(store.tile_at(coordinate).is_some(), "visible tile {coordinate:?} missing");
            }
        }
    }
    for tile in store.tiles() {
        assert!(
            tile.rect().intersects(&store.keep_rect()),
            "tile {:?} outside keep rect {:?}",
            tile.coordinate(),
            store.keep_rect()
        );
    }
    assert!(store.keep_rect().contains(&cover));
}

#[test]
fn visible_tiles_are_created_first_then_the_rest_of_the_cover_area() {
    let mut fixture = Fixture::new(
        IntRect::new(0, 0, 250, 250),
        IntRect::new(0, 0, 1000, 1000),
        2.0,
    );
    fixture.store.cover_with_tiles_if_needed(Vec2::ZERO);

    assert_eq!(fixture.store.service_timers(), 1);
    assert_eq!(fixture.store.tile_count(), 9);
    assert_eq!(fixture.store.cover_rect(), IntRect::new(0, 0, 375, 375));
    assert_eq!(fixture.store.pending_tile_creation(), 7);
    assert!(fixture.store.visible_area_is_covered());

    fixture.settle();

    assert_eq!(fixture.store.tile_count(), 16);
    assert_eq!(fixture.store.pending_tile_creation(), 0);
    assert_eq!(fixture.store.keep_rect(), IntRect::new(0, 0, 425, 425));
    assert_coverage_invariants(&fixture.store);
}

#[test]
fn creation_passes_walk_outward_one_ring_at_a_time() {
    let mut fixture = Fixture::new(
        IntRect::new(400, 400, 100, 100),
        IntRect::new(0, 0, 2000, 2000),
        5.0,
    );
    fixture.store.cover_with_tiles_if_needed(Vec2::ZERO);

    fixture.store.service_timers();
    assert_eq!(fixture.store.tile_count(), 1);

    fixture.clock.advance(Duration::from_millis(10));
    fixture.store.service_timers();
    assert_eq!(fixture.store.tile_count(), 9);

    fixture.clock.advance(Duration::from_millis(10));
    fixture.store.service_timers();
    assert_eq!(fixture.store.tile_count(), 25);
    assert_eq!(fixture.store.pending_tile_creation(), 0);
}

#[test]
fn unchanged_geometry_creates_and_evicts_nothing() {
    let mut fixture = Fixture::new(
        IntRect::new(100, 100, 200, 200),
        IntRect::new(0, 0, 1000, 1000),
        2.0,
    );
    fixture.cover();
    let created = fixture.store.tiles_created_total();
    let evicted = fixture.store.tiles_evicted_total();

    fixture.store.cover_with_tiles_if_needed(Vec2::ZERO);

    assert!(!fixture.store.has_pending_tasks());
    fixture.settle();
    assert_eq!(fixture.store.tiles_created_total(), created);
    assert_eq!(fixture.store.tiles_evicted_total(), evicted);
}

#[test]
fn scrolling_away_evicts_tiles_outside_the_keep_rect() {
    let mut fixture = Fixture::new(
        IntRect::new(0, 0, 200, 200),
        IntRect::new(0, 0, 2000, 2000),
        2.0,
    );
    fixture.cover();
    assert!(fixture.store.tile_at(TileCoordinate::new(0, 0)).is_some());

    fixture.move_visible(IntRect::new(1200, 1200, 200, 200));

    assert!(fixture.store.tile_at(TileCoordinate::new(0, 0)).is_none());
    assert!(fixture.store.tiles_evicted_total() > 0);
    assert_coverage_invariants(&fixture.store);
}

#[test]
fn trajectory_biases_the_cover_rect() {
    let mut fixture = Fixture::new(
        IntRect::new(300, 300, 200, 200),
        IntRect::new(0, 0, 2000, 2000),
        2.0,
    );
    fixture.store.cover_with_tiles_if_needed(Vec2::new(5.0, 0.0));
    fixture.settle();

    assert_eq!(fixture.store.trajectory(), Vec2::new(1.0, 0.0));
    assert_eq!(fixture.store.cover_rect(), IntRect::new(300, 300, 300, 200));
    assert_eq!(fixture.store.keep_rect(), IntRect::new(150, 150, 500, 500));
    assert!(fixture.store.tile_at(TileCoordinate::new(2, 3)).is_none());
    assert_coverage_invariants(&fixture.store);

    fixture.store.cover_with_tiles_if_needed(Vec2::ZERO);
    fixture.settle();

    assert_eq!(fixture.store.cover_rect(), IntRect::new(200, 200, 400, 400));
    assert_coverage_invariants(&fixture.store);
}

#[test]
fn frozen_store_defers_all_work_until_unfrozen() {
    let mut fixture = Fixture::new(
        IntRect::new(0, 0, 200, 200),
        IntRect::new(0, 0, 1000, 1000),
        1.0,
    );
    fixture.store.set_contents_frozen(true);

    fixture.store.cover_with_tiles_if_needed(Vec2::ZERO);
    fixture.store.invalidate(IntRect::new(0, 0, 50, 50));
    fixture.store.set_contents_scale(2.0);

    assert!(!fixture.store.has_pending_tasks());
    assert_eq!(fixture.store.tile_count(), 0);
    assert_eq!(fixture.store.contents_scale(), 1.0);
    assert_eq!(fixture.store.pending_scale(), Some(2.0));

    fixture.store.set_contents_frozen(false);
    fixture.settle();

    assert_eq!(fixture.store.contents_scale(), 2.0);
    assert_eq!(fixture.store.pending_scale(), None);
    assert_eq!(fixture.store.rect(), IntRect::new(0, 0, 2000, 2000));
    assert_coverage_invariants(&fixture.store);
}

#[test]
fn scale_change_drops_tiles_and_covers_in_scaled_space() {
    let mut fixture = Fixture::new(
        IntRect::new(0, 0, 100, 100),
        IntRect::new(0, 0, 500, 500),
        1.0,
    );
    fixture.cover();
    assert_eq!(fixture.store.tile_count(), 1);

    fixture.store.set_contents_scale(2.0);
    assert_eq!(fixture.store.tile_count(), 0);
    assert_eq!(fixture.store.tiles_evicted_total(), 1);
    fixture.settle();

    assert_eq!(fixture.store.visible_rect(), IntRect::new(0, 0, 200, 200));
    assert_eq!(fixture.store.tile_count(), 4);

    fixture.store.set_contents_scale(2.0);
    assert_eq!(fixture.store.pending_scale(), None);
    assert!(!fixture.store.has_pending_tasks());
}

#[test]
fn contents_growth_resizes_edge_tiles() {
    let mut fixture = Fixture::new(
        IntRect::new(0, 0, 250, 250),
        IntRect::new(0, 0, 250, 250),
        1.0,
    );
    fixture.cover();
    let edge = TileCoordinate::new(2, 0);
    assert_eq!(
        fixture.store.tile_at(edge).unwrap().rect(),
        IntRect::new(200, 0, 50, 100)
    );
    let old_texture = fixture.store.tile_at(edge).unwrap().texture();

    fixture.store.client_mut().contents = IntRect::new(0, 0, 280, 250);
    fixture.cover();

    let tile = fixture.store.tile_at(edge).unwrap();
    assert_eq!(tile.rect(), IntRect::new(200, 0, 80, 100));
    assert_eq!(tile.texture().size, IntSize::new(80, 100));
    assert_ne!(tile.texture().id, old_texture.id);
    assert!(!tile.is_dirty());

    fixture.store.client_mut().contents = IntRect::new(0, 0, 190, 250);
    fixture.cover();

    assert!(fixture.store.tile_at(edge).is_none());
    assert_coverage_invariants(&fixture.store);
}

#[test]
fn tile_geometry_is_clipped_and_clamped() {
    let mut fixture = Fixture::new(
        IntRect::new(0, 0, 100, 100),
        IntRect::new(0, 0, 250, 150),
        1.0,
    );
    fixture.cover();

    assert_eq!(
        fixture.store.tile_rect_for_coordinate(TileCoordinate::new(2, 1)),
        IntRect::new(200, 100, 50, 50)
    );
    assert!(
        fixture
            .store
            .tile_rect_for_coordinate(TileCoordinate::new(3, 0))
            .is_empty()
    );
    assert_eq!(
        fixture.store.tile_coordinate_for_point(IntPoint::new(-40, 199)),
        TileCoordinate::new(0, 1)
    );
}

#[test]
fn invalidation_repaints_dirty_tiles_and_queues_partial_uploads() {
    let mut fixture = Fixture::new(
        IntRect::new(0, 0, 200, 100),
        IntRect::new(0, 0, 1000, 1000),
        1.0,
    );
    fixture.cover();
    let mut updater = TextureUpdater::new();
    assert_eq!(fixture.store.drain_pending_uploads(&mut updater), 2);
    assert_eq!(updater.pending_upload_count(), 2);
    updater.clear();

    fixture.store.invalidate(IntRect::new(90, 10, 20, 5));
    assert!(fixture.store.has_pending_tasks());
    fixture.store.service_timers();
    assert_eq!(fixture.store.drain_pending_uploads(&mut updater), 0);

    fixture.clock.advance(Duration::from_millis(10));
    fixture.store.service_timers();

    assert_eq!(
        fixture.store.client().painted_batches.last().unwrap(),
        &vec![IntRect::new(90, 10, 10, 5), IntRect::new(100, 10, 10, 5)]
    );
    assert_eq!(fixture.store.drain_pending_uploads(&mut updater), 2);
    assert_eq!(updater.pending_upload_count(), 2);
}

#[test]
fn uploads_are_full_for_new_tiles_and_partial_after_invalidation() {
    let mut fixture = Fixture::new(
        IntRect::new(0, 0, 100, 100),
        IntRect::new(0, 0, 100, 100),
        1.0,
    );
    fixture.cover();
    let mut updater = TextureUpdater::new();

    fixture.store.drain_pending_uploads(&mut updater);
    assert_eq!(updater.pending_count(UpdateKind::Full), 1);
    assert_eq!(updater.pending_count(UpdateKind::Partial), 0);
    updater.clear();

    fixture.store.invalidate(IntRect::new(5, 5, 10, 10));
    fixture.clock.advance(Duration::from_millis(10));
    fixture.store.service_timers();

    let tile = fixture.store.tile_at(TileCoordinate::new(0, 0)).unwrap();
    assert!(tile.has_pending_upload());
    assert_eq!(tile.front_buffer().unwrap().pixel(5, 5), Some(CONTENT));
    fixture.store.drain_pending_uploads(&mut updater);
    assert_eq!(updater.pending_count(UpdateKind::Full), 0);
    assert_eq!(updater.pending_count(UpdateKind::Partial), 1);
}

#[test]
fn full_reupload_is_requested_for_every_painted_tile() {
    let mut fixture = Fixture::new(
        IntRect::new(0, 0, 200, 100),
        IntRect::new(0, 0, 200, 100),
        1.0,
    );
    fixture.cover();
    let mut updater = TextureUpdater::new();
    fixture.store.drain_pending_uploads(&mut updater);
    updater.clear();

    fixture.store.request_full_uploads();

    assert_eq!(fixture.store.drain_pending_uploads(&mut updater), 2);
    assert_eq!(updater.pending_count(UpdateKind::Full), 2);
}

#[test]
fn paint_draws_ready_tiles_and_checkerboards_the_rest() {
    let mut fixture = Fixture::new(
        IntRect::new(0, 0, 100, 100),
        IntRect::new(0, 0, 300, 100),
        1.0,
    );
    fixture.cover();
    assert_eq!(fixture.store.tile_count(), 1);
    let mut target = PixelBuffer::new(IntSize::new(300, 100));

    fixture.store.paint(&mut target, IntRect::new(0, 0, 300, 100));

    assert_eq!(target.pixel(50, 50), Some(CONTENT));
    assert_eq!(
        target.pixel(150, 0),
        Some(checker_color_at(IntPoint::new(150, 0)))
    );
    assert_eq!(
        target.pixel(299, 99),
        Some(checker_color_at(IntPoint::new(299, 99)))
    );
}

#[test]
fn coverage_ratio_counts_only_painted_tiles() {
    let mut fixture = Fixture::new(
        IntRect::new(0, 0, 100, 100),
        IntRect::new(0, 0, 400, 100),
        1.0,
    );
    assert!(!fixture.store.visible_area_is_covered());

    fixture.cover();

    assert!(fixture.store.visible_area_is_covered());
    assert_eq!(fixture.store.coverage_ratio(IntRect::new(50, 0, 100, 100)), 0.5);
    assert_eq!(fixture.store.coverage_ratio(IntRect::ZERO), 1.0);
}

#[test]
fn remove_all_non_visible_tiles_keeps_only_visible_ones() {
    let mut fixture = Fixture::new(
        IntRect::new(100, 100, 100, 100),
        IntRect::new(0, 0, 1000, 1000),
        3.0,
    );
    fixture.cover();
    assert!(fixture.store.tile_count() > 1);

    fixture.store.remove_all_non_visible_tiles();

    assert_eq!(fixture.store.tile_count(), 1);
    assert!(fixture.store.tile_at(TileCoordinate::new(1, 1)).is_some());
}

#[test]
fn empty_visible_rect_creates_no_tiles() {
    let mut fixture = Fixture::new(IntRect::ZERO, IntRect::new(0, 0, 1000, 1000), 2.0);

    fixture.cover();

    assert_eq!(fixture.store.tile_count(), 0);
}

#[test]
fn dropping_the_store_releases_every_tile_texture() {
    let mut fixture = Fixture::new(
        IntRect::new(0, 0, 200, 200),
        IntRect::new(0, 0, 1000, 1000),
        1.0,
    );
    fixture.cover();
    let tiles = fixture.store.tile_count();
    let (mut context, _monitor) = FakeGraphicsContext::new(IntSize::new(10, 10));
    let Fixture {
        store, allocator, ..
    } = fixture;
    let mut allocator = allocator;

    drop(store);

    assert_eq!(allocator.reclaim_released(&mut context).len(), tiles);
}
