mod clock;
mod task;

pub use clock::{Clock, ManualClock, SystemClock};
pub use task::{TaskHandle, TaskRepeat, TaskScheduler};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameAction {
    CommitAndDraw,
    RedrawOnly,
    Idle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleRequest {
    Commit,
    Redraw,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSchedulerDecision {
    pub frame_sequence_id: u64,
    pub action: FrameAction,
    pub full_damage: bool,
    pub coalesced_requests: u32,
}

/// Coalesces commit and redraw requests into at most one pending frame.
#[derive(Debug, Clone, Default)]
pub struct FrameScheduler {
    needs_commit: bool,
    needs_redraw: bool,
    needs_full_damage: bool,
    pending_requests: u32,
}

impl FrameScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a request. Returns true when it armed a new frame, i.e. when
    /// the embedder has to be asked for a composite.
    pub fn request(&mut self, request: ScheduleRequest) -> bool {
        let was_idle = !self.has_pending_frame();
        match request {
            ScheduleRequest::Commit => self.needs_commit = true,
            ScheduleRequest::Redraw => {
                self.needs_redraw = true;
                self.needs_full_damage = true;
            }
        }
        self.pending_requests = self.pending_requests.saturating_add(1);
        was_idle
    }

    pub fn needs_commit(&self) -> bool {
        self.needs_commit
    }

    pub fn needs_redraw(&self) -> bool {
        self.needs_redraw
    }

    pub fn has_pending_frame(&self) -> bool {
        self.needs_commit || self.needs_redraw
    }

    /// Consumes the pending requests and decides what the next frame does.
    pub fn schedule_frame(&mut self, frame_sequence_id: u64) -> FrameSchedulerDecision {
        let action = if self.needs_commit {
            FrameAction::CommitAndDraw
        } else if self.needs_redraw {
            FrameAction::RedrawOnly
        } else {
            FrameAction::Idle
        };
        let decision = FrameSchedulerDecision {
            frame_sequence_id,
            action,
            full_damage: self.needs_full_damage,
            coalesced_requests: self.pending_requests,
        };
        *self = Self::default();
        decision
    }
}
