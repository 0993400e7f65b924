//! Content side of the compositor, as seen by a proxy.

use std::fmt;

use render_protocol::DamageRects;
use renderer::{GraphicsContext, TextureUpdater};
use threads::ContentRole;

use crate::layers::LayerSnapshot;

/// Everything a commit copies from the content tree to the impl tree.
#[derive(Debug, Clone, Default)]
pub struct LayerTreeUpdate {
    /// Layers in draw order, in viewport space.
    pub layers: Vec<LayerSnapshot>,
    /// Viewport areas that changed since the previous commit.
    pub damage: DamageRects,
}

/// Owner of the content layer tree.
///
/// All calls arrive on the content role. `update_layers` is the only call
/// that may queue texture uploads; every notification after it happens
/// with those uploads either done or retained for the next commit.
pub trait LayerTreeHost: fmt::Debug {
    /// A fresh graphics context, or `None` when none can be created.
    fn create_context(&mut self) -> Option<Box<dyn GraphicsContext>>;

    /// Paints pending content, appends its uploads to `updater` and returns
    /// the tree to commit. `None` means nothing changed.
    fn update_layers(
        &mut self,
        role: &ContentRole,
        updater: &mut TextureUpdater,
    ) -> Option<LayerTreeUpdate>;

    fn will_commit(&mut self) {}

    fn did_commit(&mut self) {}

    fn did_begin_frame(&mut self) {}

    fn did_commit_and_draw_frame(&mut self) {}

    fn did_lose_context(&mut self) {}

    /// The old context and every texture stored in it are gone. Content
    /// uploaded before has to be queued again.
    fn did_recreate_context(&mut self) {}

    /// Asks the embedder for a composite soon.
    fn schedule_composite(&mut self) {}
}
