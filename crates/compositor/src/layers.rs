//! Impl-side layer tree: the committed copy of the content tree that draws
//! read from.

use std::time::Instant;

use render_protocol::{IntPoint, IntRect, IntSize};
use renderer::{ContextError, DrawQuad, LayerRenderer, ManagedTextureInfo, TextureAllocator};
use threads::ImplRole;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LayerId(pub u64);

/// One textured quad of a committed layer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayerSnapshot {
    pub layer: LayerId,
    pub texture: ManagedTextureInfo,
    /// Destination in viewport space.
    pub rect: IntRect,
    pub opacity: f32,
}

/// What one draw needs, resolved against the contents textures.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameData {
    pub quads: Vec<DrawQuad>,
    pub damage: IntRect,
    /// Layers skipped because their texture has no storage yet.
    pub missing_textures: usize,
}

#[derive(Debug)]
pub struct LayerTreeHostImpl {
    layers: Vec<LayerSnapshot>,
    damage: IntRect,
    viewport_size: IntSize,
    visible: bool,
    commit_in_progress: bool,
    source_frame_number: u64,
    frame_time: Option<Instant>,
    frames_drawn: u64,
}

impl Default for LayerTreeHostImpl {
    fn default() -> Self {
        Self {
            layers: Vec::new(),
            damage: IntRect::ZERO,
            viewport_size: IntSize::ZERO,
            visible: true,
            commit_in_progress: false,
            source_frame_number: 0,
            frame_time: None,
            frames_drawn: 0,
        }
    }
}

impl LayerTreeHostImpl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn layers(&self) -> &[LayerSnapshot] {
        &self.layers
    }

    pub fn damage(&self) -> IntRect {
        self.damage
    }

    pub fn viewport_size(&self) -> IntSize {
        self.viewport_size
    }

    pub fn viewport_rect(&self) -> IntRect {
        IntRect::from_location_and_size(IntPoint::ZERO, self.viewport_size)
    }

    pub fn visible(&self) -> bool {
        self.visible
    }

    /// Commits completed so far.
    pub fn source_frame_number(&self) -> u64 {
        self.source_frame_number
    }

    pub fn frame_time(&self) -> Option<Instant> {
        self.frame_time
    }

    pub fn frames_drawn(&self) -> u64 {
        self.frames_drawn
    }

    pub fn set_visible(&mut self, role: &ImplRole, visible: bool) {
        self.visible = visible;
        if visible {
            self.set_full_viewport_damage(role);
        }
    }

    pub fn set_viewport_size(&mut self, role: &ImplRole, size: IntSize) {
        if self.viewport_size == size {
            return;
        }
        self.viewport_size = size;
        self.set_full_viewport_damage(role);
    }

    pub fn set_full_viewport_damage(&mut self, _role: &ImplRole) {
        self.damage = self.viewport_rect();
    }

    pub fn begin_commit(&mut self, _role: &ImplRole) {
        assert!(
            !self.commit_in_progress,
            "begin_commit while a commit is already in progress"
        );
        self.commit_in_progress = true;
    }

    /// Replaces the layer list and accumulates the damage of the update.
    pub fn commit_layers(
        &mut self,
        _role: &ImplRole,
        layers: Vec<LayerSnapshot>,
        damage: &[IntRect],
    ) {
        assert!(self.commit_in_progress, "commit_layers outside a commit");
        for rect in damage {
            self.damage.unite(rect);
        }
        self.layers = layers;
    }

    pub fn commit_complete(&mut self, _role: &ImplRole) {
        assert!(self.commit_in_progress, "commit_complete without begin_commit");
        self.commit_in_progress = false;
        self.source_frame_number += 1;
    }

    /// Ends a commit whose uploads could not finish. The previously committed
    /// layers stay in place.
    pub fn abort_commit(&mut self, _role: &ImplRole) {
        self.commit_in_progress = false;
    }

    pub fn can_draw(&self, renderer: &LayerRenderer) -> bool {
        !self.viewport_size.is_empty() && !renderer.viewport_size().is_empty()
    }

    pub fn animate(&mut self, _role: &ImplRole, now: Instant) {
        self.frame_time = Some(now);
    }

    /// Resolves every layer texture to context storage.
    pub fn prepare_to_draw(&self, _role: &ImplRole, textures: &dyn TextureAllocator) -> FrameData {
        let mut frame = FrameData {
            quads: Vec::with_capacity(self.layers.len()),
            damage: self.damage.intersection(&self.viewport_rect()),
            missing_textures: 0,
        };
        for layer in &self.layers {
            match textures.lookup(layer.texture.id) {
                Some(texture) => frame.quads.push(DrawQuad {
                    texture,
                    dest_rect: layer.rect,
                    opacity: layer.opacity,
                }),
                None => frame.missing_textures += 1,
            }
        }
        if frame.missing_textures > 0 {
            tracing::debug!(
                missing = frame.missing_textures,
                "layers without texture storage skipped"
            );
        }
        frame
    }

    pub fn draw_layers(
        &self,
        _role: &ImplRole,
        renderer: &mut LayerRenderer,
        frame: &FrameData,
    ) -> Result<(), ContextError> {
        renderer.draw_frame(frame.damage, &frame.quads)
    }

    pub fn did_draw_all_layers(&mut self, _role: &ImplRole, _frame: &FrameData) {
        self.damage = IntRect::ZERO;
        self.frames_drawn += 1;
    }

    /// Reads back `rect` of the last drawn frame.
    pub fn readback(
        &self,
        _role: &ImplRole,
        renderer: &mut LayerRenderer,
        rect: IntRect,
        pixels: &mut [u8],
    ) -> Result<(), ContextError> {
        renderer.read_pixels(rect, pixels)
    }

    /// Drops every committed layer.
    pub fn clear_layers(&mut self, _role: &ImplRole) {
        self.layers.clear();
        self.damage = IntRect::ZERO;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use render_protocol::TextureFormat;
    use renderer::ContentsTextureAllocator;
    use renderer::fake_context::FakeGraphicsContext;
    use threads::RoleTracker;

    fn snapshot(layer: u64, texture: ManagedTextureInfo, rect: IntRect) -> LayerSnapshot {
        LayerSnapshot {
            layer: LayerId(layer),
            texture,
            rect,
            opacity: 1.0,
        }
    }

    #[test]
    fn commit_replaces_layers_and_accumulates_damage() {
        let roles = RoleTracker::new();
        let role = roles.impl_role();
        let mut tree = LayerTreeHostImpl::new();
        tree.set_viewport_size(&role, IntSize::new(100, 100));
        let allocator = ContentsTextureAllocator::new(None);
        let texture = allocator
            .handle_factory()
            .create(IntSize::new(10, 10), TextureFormat::Rgba8Unorm);
        tree.did_draw_all_layers(&role, &FrameData::default());

        tree.begin_commit(&role);
        tree.commit_layers(
            &role,
            vec![snapshot(1, texture.info(), IntRect::new(0, 0, 10, 10))],
            &[IntRect::new(0, 0, 10, 10), IntRect::new(20, 20, 5, 5)],
        );
        tree.commit_complete(&role);

        assert_eq!(tree.layers().len(), 1);
        assert_eq!(tree.damage(), IntRect::new(0, 0, 25, 25));
        assert_eq!(tree.source_frame_number(), 1);
    }

    #[test]
    fn prepare_to_draw_skips_layers_without_storage() {
        let roles = RoleTracker::new();
        let role = roles.impl_role();
        let (mut context, _monitor) = FakeGraphicsContext::new(IntSize::new(50, 50));
        let mut allocator = ContentsTextureAllocator::new(None);
        let factory = allocator.handle_factory();
        let stored = factory.create(IntSize::new(10, 10), TextureFormat::Rgba8Unorm);
        let unstored = factory.create(IntSize::new(10, 10), TextureFormat::Rgba8Unorm);
        let texture_id = allocator.acquire(&mut context, &stored.info()).unwrap();
        let mut tree = LayerTreeHostImpl::new();
        tree.set_viewport_size(&role, IntSize::new(50, 50));
        tree.begin_commit(&role);
        tree.commit_layers(
            &role,
            vec![
                snapshot(1, stored.info(), IntRect::new(0, 0, 10, 10)),
                snapshot(2, unstored.info(), IntRect::new(10, 0, 10, 10)),
            ],
            &[],
        );
        tree.commit_complete(&role);

        let frame = tree.prepare_to_draw(&role, &allocator);

        assert_eq!(frame.missing_textures, 1);
        assert_eq!(frame.quads.len(), 1);
        assert_eq!(frame.quads[0].texture, texture_id);
        assert_eq!(frame.damage, IntRect::new(0, 0, 50, 50));
    }

    #[test]
    #[should_panic(expected = "already in progress")]
    fn nested_commit_is_fatal() {
        let roles = RoleTracker::new();
        let role = roles.impl_role();
        let mut tree = LayerTreeHostImpl::new();

        tree.begin_commit(&role);
        tree.begin_commit(&role);
    }
}
