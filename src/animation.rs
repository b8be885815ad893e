//! Per-animation playback state machine.
//!
//! An [`Animation`] plays one [`AnimationModel`] against the subset of pixels
//! it still owns. It holds no buffer memory of its own: every operation is
//! handed a [`Context`] that borrows the manager's shared buffer, the frame
//! timer and the observer that receives render/done signals.
//!
//! ```text
//!   Idle ──start()──▶ Running ──abort() / last frame / no pixels left──▶ Done
//!                       │  ▲
//!                       └──┘ frame timer fires → advance()
//! ```

use crate::manager::FrameBuffer;
use crate::model::AnimationModel;
use crate::timer::Timer;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// Identifies one animation for the lifetime of the process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, utoipa::ToSchema)]
#[serde(transparent)]
pub struct AnimationId(pub u64);

impl fmt::Display for AnimationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Where an animation is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AnimationState {
    Idle,
    Running,
    Done,
}

/// Receives an animation's notifications. Exactly one subscriber (the
/// manager) is ever attached.
pub trait AnimationObserver {
    /// The shared buffer has new content.
    fn rendered(&mut self, buffer: &FrameBuffer);
    /// The animation reached `Done`. Called once per animation.
    fn finished(&mut self, id: AnimationId);
}

/// Everything an animation touches outside itself during one step.
pub struct Context<'a, T: Timer> {
    pub buffer: &'a mut FrameBuffer,
    pub timer: &'a mut T,
    pub observer: &'a mut dyn AnimationObserver,
}

pub struct Animation<T: Timer> {
    id: AnimationId,
    model: Arc<AnimationModel>,
    active_pixels: BTreeSet<usize>,
    state: AnimationState,
    next_frame_index: usize,
    pending: Option<T::Handle>,
}

impl<T: Timer> Animation<T> {
    /// A new idle animation that owns every pixel the model involves.
    pub fn new(id: AnimationId, model: Arc<AnimationModel>) -> Self {
        let active_pixels = model.involved_pixels().clone();
        Self {
            id,
            model,
            active_pixels,
            state: AnimationState::Idle,
            next_frame_index: 0,
            pending: None,
        }
    }

    pub fn id(&self) -> AnimationId {
        self.id
    }

    pub fn model(&self) -> &AnimationModel {
        &self.model
    }

    pub fn state(&self) -> AnimationState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == AnimationState::Running
    }

    /// Pixels this animation is still allowed to write.
    pub fn active_pixels(&self) -> &BTreeSet<usize> {
        &self.active_pixels
    }

    pub fn is_pixel_active(&self, pixel: usize) -> bool {
        self.active_pixels.contains(&pixel)
    }

    /// Blank the owned pixels, then play the first frame.
    ///
    /// Only the first call has an effect; a running or finished animation
    /// ignores it.
    pub fn start(&mut self, ctx: &mut Context<'_, T>) {
        if self.state != AnimationState::Idle {
            return;
        }

        for &pixel in &self.active_pixels {
            ctx.buffer.set(pixel, 0);
        }
        ctx.observer.rendered(&*ctx.buffer);

        self.state = AnimationState::Running;
        tracing::debug!(animation = %self.id, pixels = self.active_pixels.len(), "animation started");
        self.advance(ctx);
    }

    /// Revoke ownership of `pixel`. Losing the last pixel aborts the
    /// animation immediately.
    ///
    /// The buffer is not touched: the pixel keeps its last drawn color until
    /// the new owner overwrites it.
    pub fn disable_pixel(&mut self, pixel: usize, ctx: &mut Context<'_, T>) {
        if self.active_pixels.remove(&pixel) {
            tracing::debug!(animation = %self.id, pixel, "pixel pre-empted");
        }
        if self.active_pixels.is_empty() {
            self.abort(ctx);
        }
    }

    /// Stop playback. Only a running animation reacts; the buffer keeps
    /// whatever was last drawn.
    pub fn abort(&mut self, ctx: &mut Context<'_, T>) {
        if self.state != AnimationState::Running {
            return;
        }
        self.state = AnimationState::Done;
        if let Some(handle) = self.pending.take() {
            ctx.timer.cancel(handle);
        }
        tracing::debug!(animation = %self.id, "animation done");
        ctx.observer.finished(self.id);
    }

    /// Draw the next frame and schedule the one after it.
    ///
    /// Called once from `start` and then for every timer fire. A fire that
    /// arrives after the animation stopped is ignored.
    pub fn advance(&mut self, ctx: &mut Context<'_, T>) {
        if self.state != AnimationState::Running {
            return;
        }
        // The fire we are handling (if any) is spent.
        self.pending = None;

        let model = Arc::clone(&self.model);
        let frames = model.frames();
        if frames.is_empty() || (self.next_frame_index >= frames.len() && !model.repeat()) {
            self.abort(ctx);
            return;
        }

        let index = self.next_frame_index % frames.len();
        self.next_frame_index = index + 1;
        let frame = &frames[index];

        for (&pixel, &color) in &frame.pixels {
            if self.is_pixel_active(pixel) {
                ctx.buffer.set(pixel, color);
            }
        }
        ctx.observer.rendered(&*ctx.buffer);

        tracing::debug!(animation = %self.id, frame = index, duration_ms = frame.duration_ms, "frame rendered");
        self.pending = Some(ctx.timer.schedule(self.id, frame.duration()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Frame;
    use crate::timer::ManualTimer;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    /// Records every notification with a copy of the buffer at that moment.
    #[derive(Default)]
    struct Recorder {
        renders: Vec<Vec<u32>>,
        finished: Vec<AnimationId>,
    }

    impl AnimationObserver for Recorder {
        fn rendered(&mut self, buffer: &FrameBuffer) {
            self.renders.push(buffer.as_slice().to_vec());
        }

        fn finished(&mut self, id: AnimationId) {
            self.finished.push(id);
        }
    }

    struct Rig {
        buffer: FrameBuffer,
        timer: ManualTimer,
        recorder: Recorder,
    }

    impl Rig {
        fn new(len: usize) -> Self {
            Self {
                buffer: FrameBuffer::new(len),
                timer: ManualTimer::default(),
                recorder: Recorder::default(),
            }
        }

        fn ctx(&mut self) -> Context<'_, ManualTimer> {
            Context {
                buffer: &mut self.buffer,
                timer: &mut self.timer,
                observer: &mut self.recorder,
            }
        }

        /// Fire the oldest pending timer into `animation`.
        fn fire(&mut self, animation: &mut Animation<ManualTimer>) {
            let id = self.timer.pop().expect("no timer pending");
            assert_eq!(id, animation.id());
            animation.advance(&mut self.ctx());
        }
    }

    fn animation(frames: Vec<Frame>, repeat: bool) -> Animation<ManualTimer> {
        Animation::new(AnimationId(1), Arc::new(AnimationModel::new(frames, repeat)))
    }

    #[test]
    fn start_blanks_pixels_then_draws_first_frame() {
        let mut rig = Rig::new(4);
        rig.buffer.fill(0x111111);
        let mut anim = animation(vec![Frame::new(100.0, [(0, 0xFF0000), (1, 0x00FF00)])], false);

        anim.start(&mut rig.ctx());

        assert_eq!(anim.state(), AnimationState::Running);
        assert_eq!(
            rig.recorder.renders,
            vec![
                vec![0, 0, 0x111111, 0x111111],
                vec![0xFF0000, 0x00FF00, 0x111111, 0x111111],
            ]
        );
        assert_eq!(rig.timer.pending_for(AnimationId(1)), vec![Duration::from_millis(100)]);
    }

    #[test]
    fn non_repeating_animation_renders_each_frame_once_then_finishes() {
        let mut rig = Rig::new(2);
        let mut anim = animation(
            vec![
                Frame::new(10.0, [(0, 1)]),
                Frame::new(20.0, [(0, 2)]),
                Frame::new(30.0, [(0, 3)]),
            ],
            false,
        );

        anim.start(&mut rig.ctx());
        rig.fire(&mut anim);
        rig.fire(&mut anim);
        assert!(rig.recorder.finished.is_empty());
        rig.fire(&mut anim);

        // one blanking render plus one per frame
        assert_eq!(rig.recorder.renders.len(), 4);
        assert_eq!(rig.buffer.as_slice(), &[3, 0]);
        assert_eq!(anim.state(), AnimationState::Done);
        assert_eq!(rig.recorder.finished, vec![AnimationId(1)]);
        assert!(rig.timer.pending.is_empty());
    }

    #[test]
    fn repeating_animation_wraps_around() {
        let mut rig = Rig::new(1);
        let mut anim = animation(vec![Frame::new(5.0, [(0, 1)]), Frame::new(5.0, [(0, 2)])], true);

        anim.start(&mut rig.ctx());
        let mut seen = vec![rig.buffer.as_slice()[0]];
        for _ in 0..5 {
            rig.fire(&mut anim);
            seen.push(rig.buffer.as_slice()[0]);
        }

        assert_eq!(seen, vec![1, 2, 1, 2, 1, 2]);
        assert!(anim.is_running());
        assert!(rig.recorder.finished.is_empty());
    }

    #[test]
    fn disabled_pixel_is_skipped_on_next_frame() {
        let mut rig = Rig::new(2);
        let mut anim = animation(
            vec![Frame::new(10.0, [(0, 0xAA), (1, 0xAA)]), Frame::new(10.0, [(0, 0xBB), (1, 0xBB)])],
            false,
        );

        anim.start(&mut rig.ctx());
        anim.disable_pixel(0, &mut rig.ctx());
        rig.buffer.set(0, 0x123456);
        rig.fire(&mut anim);

        assert!(!anim.is_pixel_active(0));
        assert_eq!(rig.buffer.as_slice(), &[0x123456, 0xBB]);
    }

    #[test]
    fn disabling_last_pixel_aborts_and_cancels_timer() {
        let mut rig = Rig::new(2);
        let mut anim = animation(vec![Frame::new(10.0, [(1, 0xFF)])], true);

        anim.start(&mut rig.ctx());
        anim.disable_pixel(1, &mut rig.ctx());

        assert_eq!(anim.state(), AnimationState::Done);
        assert_eq!(rig.recorder.finished, vec![AnimationId(1)]);
        assert!(rig.timer.pending.is_empty());
        assert_eq!(rig.timer.cancelled.len(), 1);
        // pre-empted pixel keeps its last color
        assert_eq!(rig.buffer.as_slice(), &[0, 0xFF]);
    }

    #[test]
    fn disable_pixel_and_abort_are_idempotent() {
        let mut rig = Rig::new(3);
        let mut anim = animation(vec![Frame::new(10.0, [(0, 1), (1, 1)])], true);
        anim.start(&mut rig.ctx());

        anim.disable_pixel(0, &mut rig.ctx());
        anim.disable_pixel(0, &mut rig.ctx());
        anim.disable_pixel(2, &mut rig.ctx());
        assert_eq!(anim.active_pixels().iter().copied().collect::<Vec<_>>(), vec![1]);
        assert!(anim.is_running());

        anim.abort(&mut rig.ctx());
        anim.abort(&mut rig.ctx());
        anim.disable_pixel(1, &mut rig.ctx());
        assert_eq!(rig.recorder.finished, vec![AnimationId(1)]);
        assert_eq!(rig.timer.cancelled.len(), 1);
    }

    #[test]
    fn stale_fire_after_abort_writes_nothing() {
        let mut rig = Rig::new(1);
        let mut anim = animation(vec![Frame::new(10.0, [(0, 7)]), Frame::new(10.0, [(0, 9)])], true);
        anim.start(&mut rig.ctx());
        anim.abort(&mut rig.ctx());
        let renders = rig.recorder.renders.len();

        // a fire that slipped past cancellation
        anim.advance(&mut rig.ctx());

        assert_eq!(rig.buffer.as_slice(), &[7]);
        assert_eq!(rig.recorder.renders.len(), renders);
        assert!(rig.timer.pending.is_empty());
    }

    #[test]
    fn start_is_a_no_op_once_running_or_done() {
        let mut rig = Rig::new(1);
        let mut anim = animation(vec![Frame::new(10.0, [(0, 7)])], true);
        anim.start(&mut rig.ctx());
        anim.start(&mut rig.ctx());
        assert_eq!(rig.recorder.renders.len(), 2);
        assert_eq!(rig.timer.pending.len(), 1);

        anim.abort(&mut rig.ctx());
        anim.start(&mut rig.ctx());
        assert_eq!(anim.state(), AnimationState::Done);
        assert_eq!(rig.recorder.renders.len(), 2);
    }

    #[test]
    fn empty_repeating_model_terminates_without_timer() {
        let mut rig = Rig::new(4);
        let mut anim = animation(Vec::new(), true);

        anim.start(&mut rig.ctx());

        assert_eq!(rig.recorder.renders, vec![vec![0, 0, 0, 0]]);
        assert_eq!(rig.recorder.finished, vec![AnimationId(1)]);
        assert!(rig.timer.pending.is_empty());
        assert!(rig.timer.cancelled.is_empty());
    }
}
