//! Demo frame producer.
//!
//! Clears each frame to a slowly cycling color and stamps a small block at
//! the mouse position. The block's pixels are written into a host-visible
//! staging buffer owned by the current workspace, so the CPU never touches a
//! buffer the GPU may still be reading.

use std::sync::Arc;

use ash::vk;
use glam::{Vec2, Vec3};
use tracing::{debug, info};

use rtg_platform::{InputEvent, KeyCode};
use rtg_renderer::{FrameParams, FrameProducer, Workspace};
use rtg_rhi::allocator::Allocator;
use rtg_rhi::buffer::{AllocatedBuffer, BufferUsage};
use rtg_rhi::command::{color_subresource_range, image_transition};
use rtg_rhi::format::pack_rgba8;
use rtg_rhi::swapchain::PresentableImage;
use rtg_rhi::{RhiError, RhiResult};

/// Edge length of the cursor block in pixels.
const BLOCK_SIZE: u32 = 16;

/// Hue change per second, in turns.
const HUE_SPEED: f32 = 0.1;

pub struct DemoProducer {
    allocator: Arc<Allocator>,
    format: vk::Format,
    extent: vk::Extent2D,
    /// One staging buffer per workspace, created on first use.
    staging: Vec<AllocatedBuffer>,
    hue: f32,
    paused: bool,
    cursor: Vec2,
    /// A mouse button is held; the block is drawn white.
    pressed: bool,
}

impl DemoProducer {
    pub fn new(allocator: Arc<Allocator>, format: vk::Format) -> Self {
        Self {
            allocator,
            format,
            extent: vk::Extent2D::default(),
            staging: Vec::new(),
            hue: 0.0,
            paused: false,
            cursor: Vec2::ZERO,
            pressed: false,
        }
    }

    fn background(&self) -> [f32; 4] {
        let rgb = hue_to_rgb(self.hue) * 0.6 + Vec3::splat(0.1);
        [rgb.x, rgb.y, rgb.z, 1.0]
    }

    /// Top-left corner and size of the block, clipped to the image.
    fn block_region(&self) -> Option<(vk::Offset2D, vk::Extent2D)> {
        let size = BLOCK_SIZE
            .min(self.extent.width)
            .min(self.extent.height);
        if size == 0 {
            return None;
        }
        let max = Vec2::new(
            (self.extent.width - size) as f32,
            (self.extent.height - size) as f32,
        );
        let corner = (self.cursor - Vec2::splat(size as f32 / 2.0)).clamp(Vec2::ZERO, max);
        Some((
            vk::Offset2D {
                x: corner.x as i32,
                y: corner.y as i32,
            },
            vk::Extent2D {
                width: size,
                height: size,
            },
        ))
    }

    /// Fills the workspace's staging buffer with the block's pixels.
    fn stage_block(&mut self, workspace_index: usize, size: vk::Extent2D) -> RhiResult<vk::Buffer> {
        let color = if self.pressed {
            [1.0, 1.0, 1.0, 1.0]
        } else {
            [0.0, 0.0, 0.0, 1.0]
        };
        let texel = pack_rgba8(self.format, color).ok_or(RhiError::UnsupportedFormat(self.format))?;
        let pixels = vec![u32::from_ne_bytes(texel); (size.width * size.height) as usize];
        let bytes: &[u8] = bytemuck::cast_slice(&pixels);

        while self.staging.len() <= workspace_index {
            let buffer = self.allocator.create_buffer_for(
                BufferUsage::Staging,
                u64::from(BLOCK_SIZE * BLOCK_SIZE * 4),
            )?;
            self.staging.push(buffer);
        }
        let staging = &mut self.staging[workspace_index];
        let mapped = staging
            .mapped_bytes_mut()
            .ok_or_else(|| RhiError::InvalidArgument("staging buffer is not mapped".into()))?;
        mapped[..bytes.len()].copy_from_slice(bytes);
        Ok(staging.handle())
    }
}

impl FrameProducer for DemoProducer {
    fn on_surface_changed(
        &mut self,
        extent: vk::Extent2D,
        images: &[PresentableImage],
    ) -> RhiResult<()> {
        info!(
            "Demo drawing into {} images of {}x{}",
            images.len(),
            extent.width,
            extent.height
        );
        self.extent = extent;
        Ok(())
    }

    fn on_input(&mut self, event: &InputEvent) {
        match *event {
            InputEvent::MouseMotion { x, y, state } => {
                self.cursor = Vec2::new(x, y);
                self.pressed = state != 0;
            }
            InputEvent::MouseButtonDown { state, .. } | InputEvent::MouseButtonUp { state, .. } => {
                self.pressed = state != 0;
            }
            InputEvent::KeyDown {
                key: KeyCode::Space,
                ..
            } => {
                self.paused = !self.paused;
                debug!("Color cycling {}", if self.paused { "paused" } else { "resumed" });
            }
            _ => {}
        }
    }

    fn update(&mut self, dt: f32) {
        if !self.paused {
            self.hue = (self.hue + dt * HUE_SPEED).fract();
        }
    }

    fn render(&mut self, workspace: &Workspace, params: &FrameParams<'_>) -> RhiResult<()> {
        let image = params.image.image();
        let block = self.block_region();
        let staged = match block {
            Some((_, size)) => Some(self.stage_block(params.workspace_index, size)?),
            None => None,
        };

        let cmd = workspace.command_buffer();
        cmd.begin()?;
        cmd.pipeline_barrier(
            vk::PipelineStageFlags::TOP_OF_PIPE,
            vk::PipelineStageFlags::TRANSFER,
            &[image_transition(
                image,
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::AccessFlags::empty(),
                vk::AccessFlags::TRANSFER_WRITE,
            )],
        );
        cmd.clear_color_image(
            image,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            &vk::ClearColorValue {
                float32: self.background(),
            },
            &[color_subresource_range()],
        );
        if let (Some((offset, size)), Some(buffer)) = (block, staged) {
            // Clear and copy both write the image.
            cmd.pipeline_barrier(
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::TRANSFER,
                &[image_transition(
                    image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    vk::AccessFlags::TRANSFER_WRITE,
                    vk::AccessFlags::TRANSFER_WRITE,
                )],
            );
            let region = vk::BufferImageCopy::default()
                .image_subresource(
                    vk::ImageSubresourceLayers::default()
                        .aspect_mask(vk::ImageAspectFlags::COLOR)
                        .layer_count(1),
                )
                .image_offset(vk::Offset3D {
                    x: offset.x,
                    y: offset.y,
                    z: 0,
                })
                .image_extent(vk::Extent3D {
                    width: size.width,
                    height: size.height,
                    depth: 1,
                });
            cmd.copy_buffer_to_image(
                buffer,
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );
        }
        cmd.pipeline_barrier(
            vk::PipelineStageFlags::TRANSFER,
            vk::PipelineStageFlags::BOTTOM_OF_PIPE,
            &[image_transition(
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                params.final_layout,
                vk::AccessFlags::TRANSFER_WRITE,
                vk::AccessFlags::empty(),
            )],
        );
        cmd.end()?;

        workspace.submit(params.image_done(), vk::PipelineStageFlags::TRANSFER)
    }
}

impl Drop for DemoProducer {
    fn drop(&mut self) {
        if let Err(e) = self.allocator.device().wait_idle() {
            tracing::error!("Failed to wait for device idle during drop: {:?}", e);
        }
        for buffer in &mut self.staging {
            self.allocator.destroy_buffer(buffer);
        }
    }
}

/// Fully saturated color for `hue` in turns.
fn hue_to_rgb(hue: f32) -> Vec3 {
    let h = hue * 6.0;
    let r = (h - 3.0).abs() - 1.0;
    let g = 2.0 - (h - 2.0).abs();
    let b = 2.0 - (h - 4.0).abs();
    Vec3::new(r, g, b).clamp(Vec3::ZERO, Vec3::ONE)
}
