//! Commit and draw orchestration between the content side and the impl side.
//!
//! [`SingleThreadProxy`] runs both roles on the calling thread. The content
//! side is the [`LayerTreeHost`]; the impl side is the committed
//! [`LayerTreeHostImpl`], the renderer and the contents texture allocator.
//! Impl-side work only runs inside closures posted to the impl role, which
//! receive the [`ImplRole`] token.

use std::sync::Arc;
use std::time::Instant;

use frame_scheduler::{
    Clock, FrameAction, FrameScheduler, FrameSchedulerDecision, ScheduleRequest, TaskHandle,
    TaskScheduler,
};
use render_protocol::{DamageRects, IntRect};
use renderer::{
    ContentsTextureAllocator, ContextError, GraphicsContext, LayerRenderer,
    TextureHandleFactory, TextureUpdateError, TextureUpdater,
};
use threads::{CompletionEvent, ImplRole, RoleTracker};

use crate::host::{LayerTreeHost, LayerTreeUpdate};
use crate::layers::LayerTreeHostImpl;
use crate::settings::{CompositorSettings, SettingsError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyState {
    Uninitialized,
    ContextAcquired,
    LayerRendererReady,
    Committing,
    Drawing,
    ContextLost,
    Stopped,
}

impl ProxyState {
    fn has_live_renderer(self) -> bool {
        matches!(
            self,
            ProxyState::LayerRendererReady | ProxyState::Committing | ProxyState::Drawing
        )
    }
}

/// Frame driving interface shared by compositor proxies.
pub trait Proxy {
    fn state(&self) -> ProxyState;

    /// Asks the host for a graphics context.
    fn initialize_context(&mut self) -> bool;

    /// Builds the renderer on the acquired context.
    fn initialize_layer_renderer(&mut self) -> bool;

    /// Commits pending content and draws it. Does not present.
    fn commit_and_composite(&mut self) -> bool;

    /// Draws, then reads `rect` of the frame into `pixels` as RGBA8 rows and
    /// presents. On failure `pixels` is unspecified.
    fn composite_and_readback(&mut self, pixels: &mut [u8], rect: IntRect) -> bool;

    /// Produces and presents a frame for whatever is pending.
    fn composite_immediately(&mut self) -> bool;

    fn set_needs_commit(&mut self);

    fn set_needs_redraw(&mut self);

    fn did_add_animation(&mut self);

    /// Replaces a lost context. Panics outside [`ProxyState::ContextLost`].
    fn recreate_context(&mut self) -> bool;

    /// Context loss reported from outside the proxy.
    fn lose_context(&mut self);

    fn finish_all_rendering(&mut self);

    /// Tears everything down. Panics when called twice.
    fn stop(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProxyTask {
    Animate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CommitOutcome {
    Committed,
    NothingToCommit,
    Abandoned,
    ContextLost,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DrawOutcome {
    Drawn,
    Skipped,
    ContextLost,
}

/// State owned by the impl role.
#[derive(Debug)]
struct ImplSide {
    tree: LayerTreeHostImpl,
    renderer: Option<LayerRenderer>,
    allocator: ContentsTextureAllocator,
}

/// Readback posted to the impl role; the content role blocks on `completion`.
#[derive(Debug)]
struct ReadbackRequest<'a> {
    rect: IntRect,
    pixels: &'a mut [u8],
    result: Option<Result<(), ContextError>>,
    completion: CompletionEvent,
}

#[derive(Debug)]
pub struct SingleThreadProxy<H: LayerTreeHost> {
    settings: CompositorSettings,
    host: Option<H>,
    state: ProxyState,
    roles: RoleTracker,
    clock: Arc<dyn Clock>,
    acquired_context: Option<Box<dyn GraphicsContext>>,
    updater: TextureUpdater,
    textures: TextureHandleFactory,
    impl_side: ImplSide,
    frame_scheduler: FrameScheduler,
    frame_sequence_id: u64,
    tasks: TaskScheduler<ProxyTask>,
    animation_task: Option<TaskHandle>,
    /// The animation timer stopped on context loss and restarts once the
    /// context is recreated.
    resume_animation: bool,
    /// Update of an abandoned commit, retried by the next one.
    staged_update: Option<LayerTreeUpdate>,
    next_frame_is_newly_committed: bool,
}

impl<H: LayerTreeHost> SingleThreadProxy<H> {
    /// `allocator` backs every texture the host creates through
    /// [`Self::texture_handle_factory`].
    pub fn new(
        host: H,
        settings: CompositorSettings,
        allocator: ContentsTextureAllocator,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, SettingsError> {
        settings.validate()?;
        let updater = TextureUpdater::with_config(settings.texture_updater)?;
        Ok(Self {
            settings,
            host: Some(host),
            state: ProxyState::Uninitialized,
            roles: RoleTracker::new(),
            clock,
            acquired_context: None,
            updater,
            textures: allocator.handle_factory(),
            impl_side: ImplSide {
                tree: LayerTreeHostImpl::new(),
                renderer: None,
                allocator,
            },
            frame_scheduler: FrameScheduler::new(),
            frame_sequence_id: 0,
            tasks: TaskScheduler::new(),
            animation_task: None,
            resume_animation: false,
            staged_update: None,
            next_frame_is_newly_committed: false,
        })
    }

    pub fn settings(&self) -> CompositorSettings {
        self.settings
    }

    /// `None` once the proxy is stopped.
    pub fn host(&self) -> Option<&H> {
        self.host.as_ref()
    }

    pub fn host_mut(&mut self) -> Option<&mut H> {
        self.host.as_mut()
    }

    pub fn texture_handle_factory(&self) -> TextureHandleFactory {
        self.textures.clone()
    }

    pub fn updater(&self) -> &TextureUpdater {
        &self.updater
    }

    pub fn layer_tree_impl(&self) -> &LayerTreeHostImpl {
        &self.impl_side.tree
    }

    pub fn renderer(&self) -> Option<&LayerRenderer> {
        self.impl_side.renderer.as_ref()
    }

    pub fn allocator(&self) -> &ContentsTextureAllocator {
        &self.impl_side.allocator
    }

    pub fn frame_sequence_id(&self) -> u64 {
        self.frame_sequence_id
    }

    pub fn is_animating(&self) -> bool {
        self.animation_task
            .is_some_and(|handle| self.tasks.is_scheduled(handle))
    }

    pub fn has_pending_frame(&self) -> bool {
        self.frame_scheduler.has_pending_frame()
    }

    pub fn next_task_deadline(&self) -> Option<Instant> {
        self.tasks.next_deadline()
    }

    /// Byte budget for contents textures. Uploads beyond it wait for a later
    /// commit.
    pub fn set_contents_texture_memory_limit(&mut self, limit: Option<u64>) {
        self.post_to_impl(|_, side| side.allocator.set_memory_limit_bytes(limit));
    }

    pub fn set_visible(&mut self, visible: bool) {
        self.post_to_impl(|role, side| side.tree.set_visible(role, visible));
    }

    /// Runs due timers. Returns how many fired.
    pub fn service_timers(&mut self) -> usize {
        let due = self.tasks.take_due(self.clock.now());
        for task in &due {
            match task {
                ProxyTask::Animate => self.on_animation_tick(),
            }
        }
        due.len()
    }

    fn on_animation_tick(&mut self) {
        if self.state == ProxyState::LayerRendererReady {
            self.composite_immediately();
            return;
        }
        tracing::debug!(state = ?self.state, "no renderer; animation timer stopped");
        self.resume_animation = self.state == ProxyState::ContextLost;
        self.cancel_animation();
    }

    fn cancel_animation(&mut self) {
        if let Some(handle) = self.animation_task.take() {
            self.tasks.cancel(handle);
        }
    }

    /// Runs `task` as the impl role. Both roles share this thread, so the
    /// task runs before this returns.
    fn post_to_impl<R>(&mut self, task: impl FnOnce(&ImplRole, &mut ImplSide) -> R) -> R {
        let role = self.roles.impl_role();
        task(&role, &mut self.impl_side)
    }

    fn notify_host(&mut self, notify: impl FnOnce(&mut H)) {
        if let Some(host) = self.host.as_mut() {
            notify(host);
        }
    }

    fn take_frame_decision(&mut self) -> FrameSchedulerDecision {
        self.frame_sequence_id += 1;
        let decision = self.frame_scheduler.schedule_frame(self.frame_sequence_id);
        tracing::trace!(
            frame = decision.frame_sequence_id,
            action = ?decision.action,
            coalesced = decision.coalesced_requests,
            "frame scheduled"
        );
        if decision.full_damage {
            self.post_to_impl(|role, side| side.tree.set_full_viewport_damage(role));
        }
        decision
    }

    fn request_frame(&mut self, request: ScheduleRequest) {
        if self.state == ProxyState::Stopped {
            return;
        }
        if self.frame_scheduler.request(request) {
            self.notify_host(|host| host.schedule_composite());
        }
    }

    fn install_renderer(&mut self, mut renderer: LayerRenderer) {
        let viewport = renderer.viewport_size();
        renderer.set_background_color(self.settings.background_color);
        self.post_to_impl(|role, side| {
            side.tree.set_viewport_size(role, viewport);
            side.tree.set_full_viewport_damage(role);
            side.renderer = Some(renderer);
        });
        self.state = ProxyState::LayerRendererReady;
    }

    /// Builds a renderer for `context`, or reports why it cannot. The context
    /// is handed back on failure.
    fn build_renderer(
        context: Box<dyn GraphicsContext>,
    ) -> Result<LayerRenderer, Box<dyn GraphicsContext>> {
        if let Err(error) = LayerRenderer::check_context(context.as_ref()) {
            tracing::warn!(%error, "graphics context cannot back a layer renderer");
            return Err(context);
        }
        LayerRenderer::initialize(context).map_err(|error| {
            panic!("layer renderer rejected a checked context: {error}")
        })
    }

    /// Deletes the storage of every contents texture and drops the renderer.
    /// Handles stay valid and are uploaded again into the next context.
    fn release_renderer(&mut self) -> usize {
        let (deleted, released) = self.post_to_impl(|_, side| {
            let Some(mut renderer) = side.renderer.take() else {
                return (0, Vec::new());
            };
            let context = renderer.context_mut();
            let released = side.allocator.reclaim_released(context);
            (side.allocator.delete_all(context), released)
        });
        self.updater.discard_updates_for(&released);
        deleted
    }

    fn ensure_layer_renderer(&mut self) -> bool {
        if self.state == ProxyState::ContextAcquired && !self.initialize_layer_renderer() {
            return false;
        }
        self.state == ProxyState::LayerRendererReady
    }

    fn did_lose_context(&mut self) {
        tracing::warn!(state = ?self.state, "graphics context lost");
        self.state = ProxyState::ContextLost;
        self.notify_host(|host| host.did_lose_context());
    }

    /// Commits and draws. With `draw_unchanged`, a tree without content
    /// changes is still drawn.
    fn commit_and_composite_now(&mut self, draw_unchanged: bool) -> bool {
        if !self.ensure_layer_renderer() {
            return false;
        }
        match self.do_commit() {
            CommitOutcome::Committed => {}
            CommitOutcome::NothingToCommit if draw_unchanged => {}
            CommitOutcome::NothingToCommit | CommitOutcome::Abandoned => return false,
            CommitOutcome::ContextLost => {
                self.did_lose_context();
                return false;
            }
        }
        let outcome = self.do_draw();
        self.notify_host(|host| host.did_begin_frame());
        match outcome {
            DrawOutcome::Drawn => true,
            DrawOutcome::Skipped => false,
            DrawOutcome::ContextLost => {
                self.did_lose_context();
                false
            }
        }
    }

    fn redraw_now(&mut self) -> bool {
        if !self.ensure_layer_renderer() {
            return false;
        }
        match self.do_draw() {
            DrawOutcome::Drawn => true,
            DrawOutcome::Skipped => false,
            DrawOutcome::ContextLost => {
                self.did_lose_context();
                false
            }
        }
    }

    fn do_commit(&mut self) -> CommitOutcome {
        let Some(host) = self.host.as_mut() else {
            return CommitOutcome::NothingToCommit;
        };
        let fresh = host.update_layers(&self.roles.content_role(), &mut self.updater);
        let update = match (fresh, self.staged_update.take()) {
            (Some(mut update), Some(staged)) => {
                update.damage.extend(staged.damage);
                update
            }
            (Some(update), None) | (None, Some(update)) => update,
            (None, None) if self.updater.has_more_updates() => LayerTreeUpdate {
                layers: self.impl_side.tree.layers().to_vec(),
                damage: DamageRects::from_elem(self.impl_side.tree.viewport_rect(), 1),
            },
            (None, None) => {
                tracing::trace!("no layer changes to commit");
                return CommitOutcome::NothingToCommit;
            }
        };
        host.will_commit();

        self.state = ProxyState::Committing;
        let max_per_pass = self.settings.max_texture_updates_per_pass;
        let outcome = {
            let _content_blocked = self.roles.block_content();
            let role = self.roles.impl_role();
            commit_on_impl(
                &role,
                &mut self.impl_side,
                &mut self.updater,
                &update,
                max_per_pass,
            )
        };
        self.state = ProxyState::LayerRendererReady;
        if outcome == CommitOutcome::Abandoned {
            self.staged_update = Some(update);
        }

        if outcome == CommitOutcome::Committed {
            self.next_frame_is_newly_committed = true;
            self.notify_host(|host| host.did_commit());
        }
        outcome
    }

    fn do_draw(&mut self) -> DrawOutcome {
        self.state = ProxyState::Drawing;
        let now = self.clock.now();
        let outcome = self.post_to_impl(|role, side| draw_on_impl(role, side, now));
        self.state = ProxyState::LayerRendererReady;
        outcome
    }

    /// Presents the drawn frame and reports a newly committed one.
    fn swap_and_notify(&mut self) -> bool {
        let swapped = self.post_to_impl(|_, side| {
            side.renderer
                .as_mut()
                .map(|renderer| renderer.swap_buffers())
        });
        match swapped {
            Some(Ok(())) => {}
            Some(Err(ContextError::ContextLost)) => {
                self.did_lose_context();
                return false;
            }
            Some(Err(error)) => {
                tracing::warn!(%error, "swap failed");
                return false;
            }
            None => return false,
        }
        if std::mem::take(&mut self.next_frame_is_newly_committed) {
            self.notify_host(|host| host.did_commit_and_draw_frame());
        }
        true
    }
}

impl<H: LayerTreeHost> Proxy for SingleThreadProxy<H> {
    fn state(&self) -> ProxyState {
        self.state
    }

    fn initialize_context(&mut self) -> bool {
        if self.state != ProxyState::Uninitialized {
            tracing::warn!(state = ?self.state, "context already initialized");
            return false;
        }
        let Some(context) = self.host.as_mut().and_then(|host| host.create_context()) else {
            tracing::warn!("host provided no graphics context");
            return false;
        };
        self.acquired_context = Some(context);
        self.state = ProxyState::ContextAcquired;
        true
    }

    fn initialize_layer_renderer(&mut self) -> bool {
        if self.state != ProxyState::ContextAcquired {
            return false;
        }
        let Some(context) = self.acquired_context.take() else {
            self.cancel_animation();
            return false;
        };
        match Self::build_renderer(context) {
            Ok(renderer) => {
                self.install_renderer(renderer);
                true
            }
            Err(context) => {
                self.acquired_context = Some(context);
                self.cancel_animation();
                false
            }
        }
    }

    #[tracing::instrument(level = "debug", skip_all)]
    fn commit_and_composite(&mut self) -> bool {
        self.take_frame_decision();
        self.commit_and_composite_now(false)
    }

    #[tracing::instrument(level = "debug", skip_all, fields(rect = ?rect))]
    fn composite_and_readback(&mut self, pixels: &mut [u8], rect: IntRect) -> bool {
        self.take_frame_decision();
        if !self.commit_and_composite_now(true) {
            return false;
        }

        let mut request = ReadbackRequest {
            rect,
            pixels,
            result: None,
            completion: CompletionEvent::new(),
        };
        self.post_to_impl(|role, side| {
            if let Some(renderer) = side.renderer.as_mut() {
                request.result =
                    Some(side.tree.readback(role, renderer, request.rect, request.pixels));
            }
            request.completion.signal();
        });
        request.completion.wait();

        match request.result {
            Some(Ok(())) => {}
            Some(Err(ContextError::ContextLost)) => {
                self.did_lose_context();
                return false;
            }
            Some(Err(error)) => {
                tracing::warn!(%error, "readback failed");
                return false;
            }
            None => return false,
        }
        self.swap_and_notify()
    }

    #[tracing::instrument(level = "debug", skip_all)]
    fn composite_immediately(&mut self) -> bool {
        let decision = self.take_frame_decision();
        let drawn = match decision.action {
            FrameAction::RedrawOnly => self.redraw_now(),
            FrameAction::CommitAndDraw | FrameAction::Idle => self.commit_and_composite_now(false),
        };
        drawn && self.swap_and_notify()
    }

    fn set_needs_commit(&mut self) {
        self.roles.assert_content_not_blocked("set_needs_commit");
        self.request_frame(ScheduleRequest::Commit);
    }

    /// The next frame redraws the whole viewport.
    fn set_needs_redraw(&mut self) {
        self.request_frame(ScheduleRequest::Redraw);
    }

    fn did_add_animation(&mut self) {
        if self.state == ProxyState::Stopped || self.is_animating() {
            return;
        }
        let handle = self.tasks.schedule_repeating(
            ProxyTask::Animate,
            self.clock.now(),
            self.settings.animation_interval,
        );
        self.animation_task = Some(handle);
    }

    fn recreate_context(&mut self) -> bool {
        assert!(
            self.state == ProxyState::ContextLost,
            "recreate_context is only valid after context loss, state is {:?}",
            self.state
        );
        let deleted = self.release_renderer();
        tracing::debug!(deleted, "released textures of the lost context");

        let Some(context) = self.host.as_mut().and_then(|host| host.create_context()) else {
            tracing::warn!("host provided no replacement context");
            return false;
        };
        let Ok(renderer) = Self::build_renderer(context) else {
            return false;
        };
        self.install_renderer(renderer);
        tracing::info!("graphics context recreated");
        self.notify_host(|host| host.did_recreate_context());
        self.set_needs_commit();
        if std::mem::take(&mut self.resume_animation) {
            self.did_add_animation();
        }
        true
    }

    fn lose_context(&mut self) {
        if self.state.has_live_renderer() {
            self.did_lose_context();
        }
    }

    fn finish_all_rendering(&mut self) {
        if !self.state.has_live_renderer() {
            return;
        }
        let completion = CompletionEvent::new();
        self.post_to_impl(|_, side| {
            if let Some(renderer) = side.renderer.as_mut() {
                renderer.finish();
            }
            completion.signal();
        });
        completion.wait();
    }

    fn stop(&mut self) {
        assert!(
            self.state != ProxyState::Stopped,
            "stop called on an already stopped proxy"
        );
        let cancelled = self.tasks.cancel_all();
        self.animation_task = None;
        self.resume_animation = false;
        self.staged_update = None;
        self.updater.clear();
        self.post_to_impl(|_, side| {
            if let Some(renderer) = side.renderer.as_mut() {
                renderer.finish();
            }
        });
        let released = self.release_renderer();
        self.post_to_impl(|role, side| side.tree.clear_layers(role));
        self.acquired_context = None;
        self.host = None;
        self.state = ProxyState::Stopped;
        tracing::info!(cancelled, released, "compositor proxy stopped");
    }
}

impl<H: LayerTreeHost> Drop for SingleThreadProxy<H> {
    fn drop(&mut self) {
        if self.state != ProxyState::Stopped {
            self.stop();
        }
    }
}

fn commit_on_impl(
    role: &ImplRole,
    side: &mut ImplSide,
    updater: &mut TextureUpdater,
    update: &LayerTreeUpdate,
    max_per_pass: usize,
) -> CommitOutcome {
    let Some(renderer) = side.renderer.as_mut() else {
        return CommitOutcome::Abandoned;
    };
    side.tree.begin_commit(role);

    let released = side.allocator.reclaim_released(renderer.context_mut());
    let discarded = updater.discard_updates_for(&released);
    if discarded > 0 {
        tracing::debug!(discarded, "dropped uploads for released textures");
    }

    let mut passes = 0;
    loop {
        let pending = updater.pending_upload_count();
        let (context, copier, uploader) = renderer.upload_parts();
        let more = match updater.update(context, &mut side.allocator, copier, uploader, max_per_pass)
        {
            Ok(more) => more,
            Err(TextureUpdateError::ContextLost) => {
                side.tree.abort_commit(role);
                return CommitOutcome::ContextLost;
            }
        };
        passes += 1;
        if !more {
            break;
        }
        if updater.pending_upload_count() == pending {
            tracing::warn!(pending, passes, "texture uploads stalled; commit abandoned");
            side.tree.abort_commit(role);
            return CommitOutcome::Abandoned;
        }
    }

    side.tree.commit_layers(role, update.layers.clone(), &update.damage);
    side.tree.commit_complete(role);
    tracing::debug!(
        passes,
        source_frame = side.tree.source_frame_number(),
        layers = side.tree.layers().len(),
        "commit complete"
    );
    CommitOutcome::Committed
}

fn draw_on_impl(role: &ImplRole, side: &mut ImplSide, now: Instant) -> DrawOutcome {
    let Some(renderer) = side.renderer.as_mut() else {
        return DrawOutcome::Skipped;
    };
    if !side.tree.visible() || !side.tree.can_draw(renderer) {
        tracing::trace!(visible = side.tree.visible(), "draw skipped");
        return DrawOutcome::Skipped;
    }
    side.tree.animate(role, now);
    let frame = side.tree.prepare_to_draw(role, &side.allocator);
    match side.tree.draw_layers(role, renderer, &frame) {
        Ok(()) if !renderer.is_context_lost() => {}
        Ok(()) | Err(ContextError::ContextLost) => return DrawOutcome::ContextLost,
        Err(error) => {
            tracing::warn!(%error, "frame draw failed");
            return DrawOutcome::Skipped;
        }
    }
    side.tree.did_draw_all_layers(role, &frame);
    DrawOutcome::Drawn
}
