//! The frame loop.
//!
//! [`FramePacer`] owns the presentation chain and a fixed pool of
//! [`Workspace`]s and runs one frame per [`FramePacer::frame`] call:
//!
//! ```text
//! CollectInput -> AdvanceTime -> AcquireWorkspace -> AcquireImage
//!     -> ProduceFrame -> SubmitAndPresent
//! ```
//!
//! # Backpressure
//!
//! Workspaces are used round-robin and each one is gated by its fence, so at
//! most `workspace_count` frames are ever in flight. Acquiring workspace
//! N+1 blocks until the GPU has finished workspace 1.
//!
//! # Stale surfaces
//!
//! An out-of-date surface during acquisition recreates the chain, notifies
//! the producer and retries. A suboptimal acquisition renders the frame and
//! recreates after presenting; an out-of-date or suboptimal presentation
//! also recreates. Staleness never reaches the producer as an error.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use rtg_renderer::{FramePacer, FrameProducer};
//! use rtg_rhi::device::Device;
//! use rtg_rhi::swapchain::Swapchain;
//!
//! # fn example(
//! #     device: Arc<Device>,
//! #     swapchain: Swapchain,
//! #     producer: &mut impl FrameProducer,
//! # ) -> Result<(), rtg_rhi::RhiError> {
//! let mut pacer = FramePacer::new(device, swapchain, 2)?;
//! loop {
//!     pacer.frame(producer, 0.016, None)?;
//!     # break;
//! }
//! # Ok(())
//! # }
//! ```

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info, trace, warn};

use rtg_platform::InputQueue;
use rtg_rhi::command::CommandPool;
use rtg_rhi::device::Device;
use rtg_rhi::swapchain::{AcquireOutcome, PresentOutcome, Swapchain};
use rtg_rhi::{RhiError, RhiResult};

use crate::headless;
use crate::producer::{FrameParams, FrameProducer};
use crate::workspace::Workspace;

/// Drives frames through a presentation chain with bounded concurrency.
///
/// Not thread-safe: the thread that calls [`frame`](Self::frame) owns every
/// workspace between acquisition and submission.
pub struct FramePacer {
    device: Arc<Device>,
    // Field order is drop order: workspaces (and their command buffers)
    // before the pool that owns them.
    workspaces: Vec<Workspace>,
    _command_pool: CommandPool,
    swapchain: Swapchain,
    input: InputQueue,
    next_workspace: usize,
    /// The producer has not yet seen the current chain.
    surface_changed: bool,
    frame_count: u64,
}

impl FramePacer {
    /// Creates `workspace_count` workspaces around an existing chain.
    ///
    /// The producer is told about the chain at the start of the first frame.
    pub fn new(
        device: Arc<Device>,
        swapchain: Swapchain,
        workspace_count: usize,
    ) -> RhiResult<Self> {
        if workspace_count == 0 {
            return Err(RhiError::InvalidArgument(
                "at least one workspace is required".into(),
            ));
        }

        let command_pool = CommandPool::new(device.clone())?;
        let workspaces = (0..workspace_count)
            .map(|_| Workspace::new(device.clone(), &command_pool))
            .collect::<RhiResult<Vec<_>>>()?;

        info!(
            "Frame pacer created with {} workspaces ({} mode)",
            workspace_count,
            if swapchain.is_headless() { "headless" } else { "surface" }
        );

        Ok(Self {
            device,
            workspaces,
            _command_pool: command_pool,
            swapchain,
            input: InputQueue::new(),
            next_workspace: 0,
            surface_changed: true,
            frame_count: 0,
        })
    }

    /// Input collected here is delivered at the start of the next frame.
    #[inline]
    pub fn input_mut(&mut self) -> &mut InputQueue {
        &mut self.input
    }

    #[inline]
    pub fn swapchain(&self) -> &Swapchain {
        &self.swapchain
    }

    #[inline]
    pub fn workspace_count(&self) -> usize {
        self.workspaces.len()
    }

    /// Frames completed so far.
    #[inline]
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Runs one frame.
    ///
    /// `save` requests that this frame's image be written to a PPM file; it
    /// only has an effect in headless mode, one ring cycle later.
    pub fn frame<P: FrameProducer + ?Sized>(
        &mut self,
        producer: &mut P,
        dt: f32,
        save: Option<PathBuf>,
    ) -> RhiResult<()> {
        if self.surface_changed {
            producer.on_surface_changed(self.swapchain.extent(), self.swapchain.images())?;
            self.surface_changed = false;
        }

        // CollectInput
        for event in self.input.drain() {
            producer.on_input(&event);
        }

        // AdvanceTime
        producer.update(dt);

        // AcquireWorkspace
        let workspace_index = self.next_workspace;
        self.next_workspace = (workspace_index + 1) % self.workspaces.len();
        let workspace = &self.workspaces[workspace_index];
        workspace.acquire()?;
        trace!("Frame {}: workspace {}", self.frame_count, workspace_index);

        // AcquireImage
        let mut recreate_after_present = false;
        let image_index = if self.swapchain.is_headless() {
            self.swapchain
                .acquire_headless(save, workspace.image_available())?
        } else {
            if save.is_some() {
                debug!("Save request ignored: only headless frames can be saved");
            }
            loop {
                match self.swapchain.acquire(workspace.image_available())? {
                    AcquireOutcome::Image { index, suboptimal } => {
                        if suboptimal {
                            warn!("Swapchain suboptimal on acquire, recreating after present");
                            recreate_after_present = true;
                        }
                        break index;
                    }
                    AcquireOutcome::OutOfDate => {
                        warn!("Swapchain out of date on acquire, recreating");
                        recreate(&mut self.swapchain, producer)?;
                    }
                }
            }
        };
        trace!("Frame {}: image {}", self.frame_count, image_index);

        // ProduceFrame
        let params = FrameParams {
            workspace_index,
            image_index,
            image: self.swapchain.image(image_index)?,
            extent: self.swapchain.extent(),
            final_layout: self.swapchain.final_layout(),
        };
        producer.render(workspace, &params)?;

        // SubmitAndPresent
        if self.swapchain.is_headless() {
            self.swapchain.present_headless(image_index)?;
        } else {
            let outcome = self.swapchain.present(image_index)?;
            if outcome != PresentOutcome::Presented {
                warn!("Swapchain {:?} on present, recreating", outcome);
            }
            if outcome.needs_recreate() || recreate_after_present {
                recreate(&mut self.swapchain, producer)?;
            }
        }

        self.frame_count += 1;
        Ok(())
    }

    /// Runs frames from a headless event stream until it ends.
    ///
    /// Malformed lines are logged and skipped. Saves still pending when the
    /// stream ends are written before returning. Returns the number of frames
    /// run.
    pub fn run_headless<P: FrameProducer + ?Sized, R: BufRead>(
        &mut self,
        producer: &mut P,
        reader: R,
    ) -> RhiResult<u64> {
        if !self.swapchain.is_headless() {
            return Err(RhiError::InvalidArgument(
                "headless events require a headless chain".into(),
            ));
        }

        let start = self.frame_count;
        for (line_number, line) in reader.lines().enumerate() {
            let line = line?;
            match headless::parse_line(&line) {
                Ok(Some(event)) => {
                    if let Some(path) = &event.save {
                        debug!("Frame {} will be saved to {}", self.frame_count, path.display());
                    }
                    self.frame(producer, event.dt, event.save)?;
                }
                Ok(None) => {}
                Err(e) => warn!("Skipping headless line {}: {} ({:?})", line_number + 1, e, line),
            }
        }

        let saved = self.swapchain.flush_pending_saves()?;
        if saved > 0 {
            debug!("Flushed {} pending saves at end of stream", saved);
        }
        let frames = self.frame_count - start;
        info!("Headless stream finished after {} frames", frames);
        Ok(frames)
    }

    /// Blocks until the GPU has finished every frame in flight.
    pub fn wait_idle(&self) -> RhiResult<()> {
        self.device.wait_idle()
    }
}

impl Drop for FramePacer {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            tracing::error!("Failed to wait for device idle during drop: {:?}", e);
        }
        debug!("Frame pacer released after {} frames", self.frame_count);
    }
}

/// Rebuilds the chain and lets the producer catch up before the next use.
fn recreate<P: FrameProducer + ?Sized>(
    swapchain: &mut Swapchain,
    producer: &mut P,
) -> RhiResult<()> {
    swapchain.recreate()?;
    producer.on_surface_changed(swapchain.extent(), swapchain.images())
}
