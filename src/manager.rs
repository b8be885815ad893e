//! Pixel ownership arbitration across concurrently running animations.
//!
//! The manager owns the one [`FrameBuffer`] every animation draws into and
//! the set of live animations. Starting an animation first revokes its
//! pixels from everyone else, so at any moment each pixel has at most one
//! writer. Every render from any animation is forwarded to a single
//! [`BufferListener`] as a full-buffer snapshot.

use crate::animation::{Animation, AnimationId, AnimationObserver, Context};
use crate::model::AnimationModel;
use crate::timer::Timer;
use std::sync::Arc;

// ── Frame buffer ─────────────────────────────────────────────────────

/// Fixed-size array of packed `0xRRGGBB` colors, one per LED.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameBuffer {
    pixels: Box<[u32]>,
}

impl FrameBuffer {
    /// An all-black buffer for `len` LEDs.
    pub fn new(len: usize) -> Self {
        Self {
            pixels: vec![0; len].into_boxed_slice(),
        }
    }

    /// Write one slot. Out-of-range indices are ignored; validation keeps
    /// them out of models in the first place.
    pub fn set(&mut self, pixel: usize, color: u32) {
        if let Some(slot) = self.pixels.get_mut(pixel) {
            *slot = color;
        }
    }

    pub fn fill(&mut self, color: u32) {
        self.pixels.fill(color);
    }

    pub fn as_slice(&self) -> &[u32] {
        &self.pixels
    }
}

// ── Listener ─────────────────────────────────────────────────────────

/// Receives the manager's "buffer changed" notification.
///
/// Every call carries the complete buffer; consumers must not treat it as
/// a delta.
pub trait BufferListener {
    fn buffer_changed(&mut self, buffer: &FrameBuffer);
}

/// Bridges one animation's signals to the manager: renders go straight to
/// the listener, terminations are collected for reaping.
struct Relay<'a, L> {
    listener: &'a mut L,
    finished: Vec<AnimationId>,
}

impl<L: BufferListener> AnimationObserver for Relay<'_, L> {
    fn rendered(&mut self, buffer: &FrameBuffer) {
        self.listener.buffer_changed(buffer);
    }

    fn finished(&mut self, id: AnimationId) {
        self.finished.push(id);
    }
}

// ── Manager ──────────────────────────────────────────────────────────

pub struct AnimationManager<T: Timer, L: BufferListener> {
    buffer: FrameBuffer,
    timer: T,
    listener: L,
    animations: Vec<Animation<T>>,
    next_id: u64,
}

impl<T: Timer, L: BufferListener> AnimationManager<T, L> {
    pub fn new(num_pixels: usize, timer: T, listener: L) -> Self {
        Self {
            buffer: FrameBuffer::new(num_pixels),
            timer,
            listener,
            animations: Vec::new(),
            next_id: 1,
        }
    }

    pub fn buffer(&self) -> &FrameBuffer {
        &self.buffer
    }

    pub fn listener(&self) -> &L {
        &self.listener
    }

    pub fn timer(&self) -> &T {
        &self.timer
    }

    /// Live animations, oldest first.
    pub fn animations(&self) -> &[Animation<T>] {
        &self.animations
    }

    /// Claim the model's pixels and start playing it.
    ///
    /// Pre-emption of every existing animation (including any terminations
    /// it causes) completes before the new animation is created, so the
    /// newcomer never shares a pixel with anyone.
    pub fn start_animation(&mut self, model: Arc<AnimationModel>) -> AnimationId {
        let id = AnimationId(self.next_id);
        self.next_id += 1;

        let Self {
            buffer,
            timer,
            listener,
            animations,
            ..
        } = self;
        let mut relay = Relay {
            listener,
            finished: Vec::new(),
        };

        {
            let mut ctx = Context {
                buffer: &mut *buffer,
                timer: &mut *timer,
                observer: &mut relay,
            };
            for &pixel in model.involved_pixels() {
                for animation in animations.iter_mut() {
                    animation.disable_pixel(pixel, &mut ctx);
                }
            }
        }
        reap(animations, &relay.finished);
        relay.finished.clear();

        tracing::info!(
            animation = %id,
            frames = model.frames().len(),
            pixels = model.involved_pixels().len(),
            repeat = model.repeat(),
            "starting animation"
        );
        animations.push(Animation::new(id, model));
        if let Some(animation) = animations.last_mut() {
            let mut ctx = Context {
                buffer: &mut *buffer,
                timer: &mut *timer,
                observer: &mut relay,
            };
            animation.start(&mut ctx);
        }
        reap(animations, &relay.finished);

        id
    }

    /// Deliver a frame-timer fire. Fires for animations that are no longer
    /// tracked, or no longer running, do nothing.
    pub fn advance(&mut self, id: AnimationId) {
        let Self {
            buffer,
            timer,
            listener,
            animations,
            ..
        } = self;
        let Some(animation) = animations.iter_mut().find(|a| a.id() == id) else {
            tracing::trace!(animation = %id, "fire for reaped animation ignored");
            return;
        };

        let mut relay = Relay {
            listener,
            finished: Vec::new(),
        };
        animation.advance(&mut Context {
            buffer: &mut *buffer,
            timer: &mut *timer,
            observer: &mut relay,
        });
        reap(animations, &relay.finished);
    }

    /// Abort every live animation, cancelling their timers. Returns how many
    /// were stopped. The buffer is left as is.
    pub fn shutdown(&mut self) -> usize {
        let Self {
            buffer,
            timer,
            listener,
            animations,
            ..
        } = self;
        let mut relay = Relay {
            listener,
            finished: Vec::new(),
        };
        {
            let mut ctx = Context {
                buffer: &mut *buffer,
                timer: &mut *timer,
                observer: &mut relay,
            };
            for animation in animations.iter_mut() {
                animation.abort(&mut ctx);
            }
        }
        let stopped = animations.len();
        animations.clear();
        stopped
    }

    /// Zero the whole buffer and notify the listener.
    pub fn blank(&mut self) {
        self.buffer.fill(0);
        self.listener.buffer_changed(&self.buffer);
    }
}

/// Drop finished animations. Removing an id twice is harmless.
fn reap<T: Timer>(animations: &mut Vec<Animation<T>>, finished: &[AnimationId]) {
    if finished.is_empty() {
        return;
    }
    animations.retain(|a| !finished.contains(&a.id()));
    for id in finished {
        tracing::debug!(animation = %id, "animation reaped");
    }
}
