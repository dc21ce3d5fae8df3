//! Integration tests for the presentation chain on the mock device.

use std::path::PathBuf;
use std::sync::Arc;

use rtg_rhi::allocator::Allocator;
use rtg_rhi::backend::SubmitBatch;
use rtg_rhi::command::{CommandBuffer, CommandPool, color_subresource_range, image_transition};
use rtg_rhi::device::Device;
use rtg_rhi::mock::{MockBackend, MockEvent};
use rtg_rhi::swapchain::{
    AcquireOutcome, HEADLESS_RING_SIZE, PresentOutcome, SurfacePreferences, Swapchain,
};
use rtg_rhi::sync::Semaphore;
use rtg_rhi::{RhiError, vk};

fn preferences(width: u32, height: u32, format: vk::Format) -> SurfacePreferences {
    SurfacePreferences {
        extent: vk::Extent2D { width, height },
        formats: vec![vk::SurfaceFormatKHR {
            format,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }],
        present_modes: vec![vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::FIFO],
    }
}

fn surface_chain(mock: &MockBackend) -> (Arc<Device>, Swapchain) {
    let device = Device::new(mock.clone());
    let allocator = Arc::new(Allocator::new(device.clone()).unwrap());
    let chain = Swapchain::new(
        device.clone(),
        allocator,
        preferences(640, 480, vk::Format::B8G8R8A8_SRGB),
        false,
    )
    .unwrap();
    (device, chain)
}

/// Stands in for a producer: waits on `acquired`, signals the image's done semaphore.
fn finish_image(device: &Device, acquired: &Semaphore, done: &Semaphore) {
    let wait = [acquired.handle()];
    let stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
    let signal = [done.handle()];
    device
        .submit(
            &[SubmitBatch {
                wait_semaphores: &wait,
                wait_stages: &stages,
                signal_semaphores: &signal,
                ..Default::default()
            }],
            None,
        )
        .unwrap();
}

fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("rtg-{}-{}", name, std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

#[test]
fn test_surface_chain_matches_capabilities() {
    let mock = MockBackend::with_surface(800, 600);
    let (_device, chain) = surface_chain(&mock);

    assert!(!chain.is_headless());
    // The surface extent wins over the configured one.
    assert_eq!(chain.extent().width, 800);
    assert_eq!(chain.extent().height, 600);
    // min 2 + 1, under the max of 8
    assert_eq!(chain.image_count(), 3);
    assert_eq!(chain.present_mode(), vk::PresentModeKHR::MAILBOX);
    assert_eq!(chain.format(), vk::Format::B8G8R8A8_SRGB);
    assert_eq!(chain.final_layout(), vk::ImageLayout::PRESENT_SRC_KHR);
    assert_eq!(mock.live_image_views(), 3);
    assert_eq!(mock.live_semaphores(), 3);
}

#[test]
fn test_surface_mode_requires_surface() {
    let mock = MockBackend::new();
    let device = Device::new(mock.clone());
    let allocator = Arc::new(Allocator::new(device.clone()).unwrap());
    let result = Swapchain::new(
        device,
        allocator,
        preferences(64, 64, vk::Format::B8G8R8A8_SRGB),
        false,
    );
    assert!(matches!(result, Err(RhiError::SurfaceError(_))));
}

#[test]
fn test_unsupported_preferences_fail_setup() {
    let mock = MockBackend::with_surface(64, 64);
    let device = Device::new(mock.clone());
    let allocator = Arc::new(Allocator::new(device.clone()).unwrap());

    let result = Swapchain::new(
        device.clone(),
        allocator.clone(),
        preferences(64, 64, vk::Format::R16G16B16A16_SFLOAT),
        false,
    );
    assert!(matches!(result, Err(RhiError::NoSurfaceFormat(_))));

    let mut prefs = preferences(64, 64, vk::Format::B8G8R8A8_SRGB);
    prefs.present_modes = vec![vk::PresentModeKHR::IMMEDIATE];
    let result = Swapchain::new(device, allocator, prefs, false);
    assert!(matches!(result, Err(RhiError::NoPresentMode(_))));

    // Nothing is left half-built.
    assert_eq!(mock.live_swapchains(), 0);
    assert_eq!(mock.live_image_views(), 0);
}

#[test]
fn test_surface_without_transfer_dst_fails_setup() {
    let mock = MockBackend::with_surface(64, 64);
    mock.set_surface_capabilities(vk::SurfaceCapabilitiesKHR {
        min_image_count: 2,
        max_image_count: 8,
        current_extent: vk::Extent2D {
            width: 64,
            height: 64,
        },
        min_image_extent: vk::Extent2D {
            width: 1,
            height: 1,
        },
        max_image_extent: vk::Extent2D {
            width: 4096,
            height: 4096,
        },
        current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
        supported_usage_flags: vk::ImageUsageFlags::COLOR_ATTACHMENT,
        ..Default::default()
    });
    let device = Device::new(mock.clone());
    let allocator = Arc::new(Allocator::new(device.clone()).unwrap());

    let result = Swapchain::new(
        device,
        allocator,
        preferences(64, 64, vk::Format::B8G8R8A8_SRGB),
        false,
    );
    match result {
        Err(RhiError::UnsupportedSurfaceUsage(missing)) => {
            assert_eq!(missing, vk::ImageUsageFlags::TRANSFER_DST)
        }
        other => panic!("expected a usage error, got {:?}", other.map(|c| c.extent())),
    }
    assert_eq!(mock.live_swapchains(), 0);
}

#[test]
fn test_acquire_present_cycle() {
    let mock = MockBackend::with_surface(320, 240);
    let (device, mut chain) = surface_chain(&mock);
    let acquired = Semaphore::new(device.clone()).unwrap();

    for expected in [0u32, 1, 2, 0] {
        let AcquireOutcome::Image { index, suboptimal } = chain.acquire(&acquired).unwrap() else {
            panic!("fresh chain reported out of date");
        };
        assert_eq!(index, expected);
        assert!(!suboptimal);

        finish_image(&device, &acquired, chain.image(index).unwrap().image_done());
        assert_eq!(chain.present(index).unwrap(), PresentOutcome::Presented);
    }

    assert!(mock.validation_errors().is_empty());
}

#[test]
fn test_suboptimal_is_reported_not_raised() {
    let mock = MockBackend::with_surface(320, 240);
    let (device, mut chain) = surface_chain(&mock);
    let acquired = Semaphore::new(device.clone()).unwrap();

    mock.inject_acquire_result(vk::Result::SUBOPTIMAL_KHR);
    let outcome = chain.acquire(&acquired).unwrap();
    assert_eq!(
        outcome,
        AcquireOutcome::Image {
            index: 0,
            suboptimal: true
        }
    );

    finish_image(&device, &acquired, chain.image(0).unwrap().image_done());
    mock.inject_present_result(vk::Result::SUBOPTIMAL_KHR);
    let presented = chain.present(0).unwrap();
    assert_eq!(presented, PresentOutcome::Suboptimal);
    assert!(presented.needs_recreate());
}

#[test]
fn test_other_acquire_failures_are_errors() {
    let mock = MockBackend::with_surface(320, 240);
    let (device, mut chain) = surface_chain(&mock);
    let acquired = Semaphore::new(device.clone()).unwrap();

    mock.inject_acquire_result(vk::Result::ERROR_DEVICE_LOST);
    let result = chain.acquire(&acquired);
    assert!(matches!(
        result,
        Err(RhiError::VulkanError(vk::Result::ERROR_DEVICE_LOST))
    ));
}

#[test]
fn test_recreation_resets_every_image_resource() {
    let mock = MockBackend::with_surface(800, 600);
    let (device, mut chain) = surface_chain(&mock);
    let acquired = Semaphore::new(device.clone()).unwrap();

    let old_handle = chain.handle();
    let old_semaphores: Vec<vk::Semaphore> = chain
        .images()
        .iter()
        .map(|image| image.image_done().handle())
        .collect();
    let old_views: Vec<vk::ImageView> = chain.images().iter().map(|i| i.view()).collect();

    mock.set_surface_capabilities(vk::SurfaceCapabilitiesKHR {
        min_image_count: 1,
        max_image_count: 2,
        current_extent: vk::Extent2D {
            width: 1024,
            height: 768,
        },
        min_image_extent: vk::Extent2D {
            width: 1,
            height: 1,
        },
        max_image_extent: vk::Extent2D {
            width: 4096,
            height: 4096,
        },
        current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
        supported_usage_flags: vk::ImageUsageFlags::COLOR_ATTACHMENT
            | vk::ImageUsageFlags::TRANSFER_DST,
        ..Default::default()
    });

    assert_eq!(chain.acquire(&acquired).unwrap(), AcquireOutcome::OutOfDate);
    chain.recreate().unwrap();

    assert_eq!(chain.extent().width, 1024);
    assert_eq!(chain.extent().height, 768);
    // min 1 + 1, capped at the max of 2
    assert_eq!(chain.image_count(), 2);
    assert_ne!(chain.handle(), old_handle);
    assert!(!mock.is_alive(old_handle));

    for semaphore in &old_semaphores {
        assert!(!mock.is_alive(*semaphore));
    }
    for view in &old_views {
        assert!(!mock.is_alive(*view));
    }
    for image in chain.images() {
        assert!(!old_semaphores.contains(&image.image_done().handle()));
        assert!(!old_views.contains(&image.view()));
    }
    assert_eq!(mock.live_swapchains(), 1);
    assert_eq!(mock.live_image_views(), 2);

    let created = mock
        .events()
        .iter()
        .filter(|e| matches!(e, MockEvent::SwapchainCreated { .. }))
        .count();
    assert_eq!(created, 2);

    // The new chain works.
    let AcquireOutcome::Image { index, .. } = chain.acquire(&acquired).unwrap() else {
        panic!("recreated chain is out of date");
    };
    finish_image(&device, &acquired, chain.image(index).unwrap().image_done());
    assert_eq!(chain.present(index).unwrap(), PresentOutcome::Presented);
    assert!(mock.validation_errors().is_empty());
}

#[test]
fn test_dropping_chain_releases_everything() {
    let mock = MockBackend::with_surface(64, 64);
    {
        let (_device, _chain) = surface_chain(&mock);
        assert_eq!(mock.live_swapchains(), 1);
    }
    assert_eq!(mock.live_swapchains(), 0);
    assert_eq!(mock.live_image_views(), 0);
    assert_eq!(mock.live_semaphores(), 0);
}

// =============================================================================
// Headless
// =============================================================================

struct HeadlessRig {
    mock: MockBackend,
    device: Arc<Device>,
    chain: Swapchain,
    acquired: Semaphore,
    cmd: CommandBuffer,
    _pool: CommandPool,
}

impl HeadlessRig {
    fn new(width: u32, height: u32) -> Self {
        let mock = MockBackend::new();
        let device = Device::new(mock.clone());
        let allocator = Arc::new(Allocator::new(device.clone()).unwrap());
        let chain = Swapchain::new(
            device.clone(),
            allocator,
            preferences(width, height, vk::Format::B8G8R8A8_UNORM),
            true,
        )
        .unwrap();
        let pool = CommandPool::new(device.clone()).unwrap();
        let cmd = CommandBuffer::new(device.clone(), &pool).unwrap();
        let acquired = Semaphore::new(device.clone()).unwrap();
        Self {
            mock,
            device,
            chain,
            acquired,
            cmd,
            _pool: pool,
        }
    }

    /// Runs one frame that clears the image to `color`.
    fn frame(&mut self, color: [f32; 4], save: Option<PathBuf>) -> u32 {
        let index = self.chain.acquire_headless(save, &self.acquired).unwrap();
        let image = self.chain.image(index).unwrap();

        self.cmd.begin().unwrap();
        self.cmd.pipeline_barrier(
            vk::PipelineStageFlags::TOP_OF_PIPE,
            vk::PipelineStageFlags::TRANSFER,
            &[image_transition(
                image.image(),
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::AccessFlags::empty(),
                vk::AccessFlags::TRANSFER_WRITE,
            )],
        );
        self.cmd.clear_color_image(
            image.image(),
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            &vk::ClearColorValue { float32: color },
            &[color_subresource_range()],
        );
        self.cmd.pipeline_barrier(
            vk::PipelineStageFlags::TRANSFER,
            vk::PipelineStageFlags::TRANSFER,
            &[image_transition(
                image.image(),
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                self.chain.final_layout(),
                vk::AccessFlags::TRANSFER_WRITE,
                vk::AccessFlags::TRANSFER_READ,
            )],
        );
        self.cmd.end().unwrap();

        let wait = [self.acquired.handle()];
        let stages = [vk::PipelineStageFlags::TRANSFER];
        let commands = [self.cmd.handle()];
        let signal = [image.image_done().handle()];
        self.device
            .submit(
                &[SubmitBatch {
                    wait_semaphores: &wait,
                    wait_stages: &stages,
                    command_buffers: &commands,
                    signal_semaphores: &signal,
                }],
                None,
            )
            .unwrap();

        self.chain.present_headless(index).unwrap();
        index
    }
}

#[test]
fn test_headless_ring_layout() {
    let rig = HeadlessRig::new(4, 2);

    assert!(rig.chain.is_headless());
    assert_eq!(rig.chain.image_count() as usize, HEADLESS_RING_SIZE);
    assert_eq!(rig.chain.extent().width, 4);
    assert_eq!(rig.chain.extent().height, 2);
    assert_eq!(rig.chain.final_layout(), vk::ImageLayout::TRANSFER_SRC_OPTIMAL);
    assert_eq!(rig.mock.live_images(), HEADLESS_RING_SIZE);
    assert_eq!(rig.mock.live_buffers(), HEADLESS_RING_SIZE);
    assert_eq!(rig.mock.live_swapchains(), 0);
}

#[test]
fn test_headless_save_lands_one_cycle_later() {
    let dir = scratch_dir("headless-save");
    let path = dir.join("red.ppm");
    let _ = std::fs::remove_file(&path);

    let mut rig = HeadlessRig::new(4, 2);
    let red = [1.0, 0.0, 0.0, 1.0];
    let blue = [0.0, 0.0, 1.0, 1.0];

    assert_eq!(rig.frame(red, Some(path.clone())), 0);
    assert!(!path.exists(), "saved on the cycle it was requested");
    assert_eq!(rig.frame(blue, None), 1);
    assert_eq!(rig.frame(blue, None), 2);
    assert!(!path.exists());

    // Re-acquiring slot 0 writes the frame rendered into it last cycle.
    assert_eq!(rig.frame(blue, None), 0);
    let written = std::fs::read(&path).unwrap();
    let header = b"P6\n4 2\n255\n";
    assert_eq!(&written[..header.len()], header);
    let pixels = &written[header.len()..];
    assert_eq!(pixels.len(), 4 * 2 * 3);
    for rgb in pixels.chunks_exact(3) {
        assert_eq!(rgb, [255, 0, 0]);
    }

    assert!(rig.mock.validation_errors().is_empty());
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn test_headless_flush_writes_pending_saves() {
    let dir = scratch_dir("headless-flush");
    let path = dir.join("last.ppm");
    let _ = std::fs::remove_file(&path);

    let mut rig = HeadlessRig::new(2, 2);
    rig.frame([0.0, 1.0, 0.0, 1.0], Some(path.clone()));
    assert!(!path.exists());

    assert_eq!(rig.chain.flush_pending_saves().unwrap(), 1);
    let written = std::fs::read(&path).unwrap();
    assert!(written.starts_with(b"P6\n2 2\n255\n"));
    assert_eq!(&written[written.len() - 3..], &[0, 255, 0]);

    // Nothing left to flush.
    assert_eq!(rig.chain.flush_pending_saves().unwrap(), 0);
    assert!(rig.mock.validation_errors().is_empty());
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn test_headless_acquire_synthesizes_signal() {
    let mut rig = HeadlessRig::new(2, 2);
    rig.mock.clear_events();

    rig.chain.acquire_headless(None, &rig.acquired).unwrap();

    let events = rig.mock.events();
    let submit = events
        .iter()
        .find_map(|e| match e {
            MockEvent::Submit {
                signal,
                command_buffers,
                ..
            } => Some((signal.clone(), command_buffers.len())),
            _ => None,
        })
        .unwrap();
    assert_eq!(submit.0, vec![rig.acquired.handle()]);
    assert_eq!(submit.1, 0);
}

#[test]
fn test_headless_recreate_rebuilds_ring() {
    let mut rig = HeadlessRig::new(2, 2);
    let old: Vec<vk::Image> = rig.chain.images().iter().map(|i| i.image()).collect();

    rig.frame([0.0; 4], None);
    rig.chain.recreate().unwrap();

    assert!(rig.chain.is_headless());
    assert_eq!(rig.chain.image_count() as usize, HEADLESS_RING_SIZE);
    for image in rig.chain.images() {
        assert!(!old.contains(&image.image()));
    }
    for image in &old {
        assert!(!rig.mock.is_alive(*image));
    }
    assert_eq!(rig.mock.live_images(), HEADLESS_RING_SIZE);
    // The ring restarts at slot 0.
    assert_eq!(rig.frame([0.0; 4], None), 0);
    assert!(rig.mock.validation_errors().is_empty());
}
