//! The animation reactor: one loop that owns the manager.
//!
//! HTTP handlers run on tokio and talk to the engine by sending
//! [`EngineCommand`] values through an `mpsc` channel. Frame timers feed
//! their fires into a second channel drained by the same loop. Because only
//! this loop touches the manager, every request and every frame advance runs
//! to completion before the next one starts, and the shared buffer needs no
//! lock.
//!
//! ## Rust concepts
//! - `tokio::select!` to wait on two channels at once
//! - `oneshot` channels for request/reply over a channel
//! - `broadcast` channels to fan every snapshot out to many readers

use crate::StripConfig;
use crate::animation::{AnimationId, AnimationState};
use crate::driver::StripDriver;
use crate::manager::{AnimationManager, BufferListener, FrameBuffer};
use crate::model::AnimationModel;
use crate::timer::TokioTimer;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot};

/// Depth of the command queue between the HTTP server and the engine.
const COMMAND_QUEUE_DEPTH: usize = 32;

/// Snapshots a stream reader may fall behind by before it has to resync.
const SNAPSHOT_BACKLOG: usize = 256;

// ── Commands ─────────────────────────────────────────────────────────

/// Requests handled by the engine loop, one at a time.
pub enum EngineCommand {
    /// Pre-empt the model's pixels and start playing it.
    StartAnimation {
        model: AnimationModel,
        reply: oneshot::Sender<AnimationId>,
    },
    /// Report the live animations and the current buffer.
    Status { reply: oneshot::Sender<EngineStatus> },
    /// Hand out the current buffer together with a feed of every later one.
    Subscribe { reply: oneshot::Sender<BufferStream> },
    /// Stop every animation, blank the strip and leave the loop.
    Shutdown,
}

// ── Status ───────────────────────────────────────────────────────────

/// One live animation, as reported by `GET /api/v1/status`.
#[derive(Clone, Debug, Serialize, utoipa::ToSchema)]
pub struct AnimationStatus {
    #[schema(value_type = u64)]
    pub id: AnimationId,
    pub state: AnimationState,
    pub repeat: bool,
    pub frame_count: usize,
    /// Pixels this animation still owns
    pub active_pixels: Vec<usize>,
}

#[derive(Clone, Debug, Serialize, utoipa::ToSchema)]
pub struct EngineStatus {
    /// Strip length
    pub num_leds: usize,
    /// Live animations, oldest first
    pub animations: Vec<AnimationStatus>,
    /// Current buffer as packed 0xRRGGBB values
    pub buffer: Vec<u32>,
    /// Server version
    pub version: String,
}

/// The engine loop has exited; nothing can be started any more.
#[derive(Debug, thiserror::Error)]
#[error("animation engine is not running")]
pub struct EngineGone;

// ── Output ───────────────────────────────────────────────────────────

/// Where "buffer changed" goes: the strip itself plus the snapshot feed
/// read by streaming clients.
pub struct StripOutput {
    driver: Box<dyn StripDriver>,
    snapshots: broadcast::Sender<Vec<u32>>,
}

impl BufferListener for StripOutput {
    fn buffer_changed(&mut self, buffer: &FrameBuffer) {
        self.driver.publish(buffer.as_slice());
        // Fails only when nobody is streaming.
        let _ = self.snapshots.send(buffer.as_slice().to_vec());
    }
}

// ── Handle ───────────────────────────────────────────────────────────

/// Cloneable client side of the engine, held by the HTTP server.
#[derive(Clone)]
pub struct EngineHandle {
    commands: mpsc::Sender<EngineCommand>,
}

impl EngineHandle {
    pub async fn start_animation(&self, model: AnimationModel) -> Result<AnimationId, EngineGone> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(EngineCommand::StartAnimation { model, reply })
            .await
            .map_err(|_| EngineGone)?;
        response.await.map_err(|_| EngineGone)
    }

    pub async fn status(&self) -> Result<EngineStatus, EngineGone> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(EngineCommand::Status { reply })
            .await
            .map_err(|_| EngineGone)?;
        response.await.map_err(|_| EngineGone)
    }

    /// Ask the engine to stop. Returns once the request is queued.
    pub async fn shutdown(&self) -> Result<(), EngineGone> {
        self.commands
            .send(EngineCommand::Shutdown)
            .await
            .map_err(|_| EngineGone)
    }

    /// Follow every buffer the strip is shown, starting with the current one.
    ///
    /// The stream holds a handle of its own, so an engine with live streams
    /// stops only on an explicit [`EngineHandle::shutdown`].
    pub async fn subscribe(&self) -> Result<BufferStream, EngineGone> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(EngineCommand::Subscribe { reply })
            .await
            .map_err(|_| EngineGone)?;
        let mut stream = response.await.map_err(|_| EngineGone)?;
        stream.handle = Some(self.clone());
        Ok(stream)
    }
}

// ── Snapshot stream ──────────────────────────────────────────────────

/// The buffer at subscription time, then every later one in order.
///
/// The current buffer and the feed are taken in the same engine step, so no
/// snapshot is missed or doubled. A reader that falls too far behind is
/// resynced to the current buffer.
pub struct BufferStream {
    current: Option<Vec<u32>>,
    updates: broadcast::Receiver<Vec<u32>>,
    handle: Option<EngineHandle>,
}

impl BufferStream {
    /// The next buffer, or `None` once the engine has stopped.
    pub async fn next(&mut self) -> Option<Vec<u32>> {
        if let Some(current) = self.current.take() {
            return Some(current);
        }
        match self.updates.recv().await {
            Ok(buffer) => Some(buffer),
            Err(RecvError::Closed) => None,
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!("Buffer stream fell {} snapshots behind, resyncing", skipped);
                let handle = self.handle.clone()?;
                *self = handle.subscribe().await.ok()?;
                self.current.take()
            }
        }
    }
}

// ── Engine loop ──────────────────────────────────────────────────────

pub struct Engine {
    strip: StripConfig,
    manager: AnimationManager<TokioTimer, StripOutput>,
    commands: mpsc::Receiver<EngineCommand>,
    fires: mpsc::UnboundedReceiver<AnimationId>,
}

impl Engine {
    /// Build an engine for `strip` publishing to `driver`, plus its handle.
    ///
    /// Nothing runs until [`Engine::run`] is awaited.
    pub fn new(strip: StripConfig, driver: Box<dyn StripDriver>) -> (Self, EngineHandle) {
        let (command_tx, commands) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let (fire_tx, fires) = mpsc::unbounded_channel();
        let (snapshots, _) = broadcast::channel(SNAPSHOT_BACKLOG);

        let output = StripOutput { driver, snapshots };
        let manager = AnimationManager::new(strip.num_leds, TokioTimer::new(fire_tx), output);

        let engine = Self {
            strip,
            manager,
            commands,
            fires,
        };
        let handle = EngineHandle {
            commands: command_tx,
        };
        (engine, handle)
    }

    /// Process commands and frame fires until shutdown is requested or
    /// every handle is dropped, then stop all animations and blank the strip.
    ///
    /// The future is not `Send` (the hardware driver is not), so await it
    /// on the main task rather than spawning it.
    pub async fn run(mut self) {
        tracing::info!("Animation engine started ({} LEDs)", self.strip.num_leds);

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(EngineCommand::StartAnimation { model, reply }) => {
                        let id = self.manager.start_animation(Arc::new(model));
                        // The requester may have given up; the animation runs regardless.
                        let _ = reply.send(id);
                    }
                    Some(EngineCommand::Status { reply }) => {
                        let _ = reply.send(self.status());
                    }
                    Some(EngineCommand::Subscribe { reply }) => {
                        let _ = reply.send(self.subscribe());
                    }
                    Some(EngineCommand::Shutdown) | None => break,
                },
                Some(id) = self.fires.recv() => self.manager.advance(id),
            }
        }

        let stopped = self.manager.shutdown();
        self.manager.blank();
        tracing::info!("Animation engine stopped ({} animations halted, strip blanked)", stopped);
    }

    fn subscribe(&self) -> BufferStream {
        BufferStream {
            current: Some(self.manager.buffer().as_slice().to_vec()),
            updates: self.manager.listener().snapshots.subscribe(),
            handle: None,
        }
    }

    fn status(&self) -> EngineStatus {
        let animations = self
            .manager
            .animations()
            .iter()
            .map(|animation| AnimationStatus {
                id: animation.id(),
                state: animation.state(),
                repeat: animation.model().repeat(),
                frame_count: animation.model().frames().len(),
                active_pixels: animation.active_pixels().iter().copied().collect(),
            })
            .collect();

        EngineStatus {
            num_leds: self.strip.num_leds,
            animations,
            buffer: self.manager.buffer().as_slice().to_vec(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
