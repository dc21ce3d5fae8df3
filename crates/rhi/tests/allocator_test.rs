//! Integration tests for the memory allocator on the mock device.

use std::sync::Arc;

use rtg_rhi::allocator::Allocator;
use rtg_rhi::buffer::BufferUsage;
use rtg_rhi::device::Device;
use rtg_rhi::memory::Mapping;
use rtg_rhi::mock::{MockBackend, MockEvent};
use rtg_rhi::{RhiError, vk};

fn setup() -> (MockBackend, Arc<Device>, Allocator) {
    let mock = MockBackend::new();
    let device = Device::new(mock.clone());
    let allocator = Allocator::new(device.clone()).expect("allocator");
    (mock, device, allocator)
}

#[test]
fn test_allocation_satisfies_size_and_properties() {
    let (mock, device, allocator) = setup();

    let cases = [
        (1u64, 1u64, vk::MemoryPropertyFlags::DEVICE_LOCAL),
        (100, 16, vk::MemoryPropertyFlags::HOST_VISIBLE),
        (
            4096,
            256,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        ),
        (
            12345,
            64,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_CACHED,
        ),
    ];

    for (size, alignment, properties) in cases {
        let mut allocation = allocator
            .allocate(size, alignment, u32::MAX, properties, Mapping::Unmapped)
            .unwrap();

        assert!(allocation.size() >= size);
        assert_eq!(allocation.offset() % alignment, 0);
        let index = mock.memory_type_of(allocation.handle()).unwrap();
        assert_eq!(index, allocation.memory_type_index());
        let flags = device.memory_properties().memory_types[index as usize].property_flags;
        assert!(
            flags.contains(properties),
            "memory type {index} ({flags:?}) lacks {properties:?}"
        );

        allocator.free(&mut allocation);
        assert!(allocation.is_empty());
    }

    assert_eq!(mock.live_allocations(), 0);
    assert!(mock.validation_errors().is_empty());
}

#[test]
fn test_allocation_fails_without_qualifying_type() {
    let mock = MockBackend::with_memory_types(&[vk::MemoryPropertyFlags::DEVICE_LOCAL]);
    let allocator = Allocator::new(Device::new(mock.clone())).unwrap();

    let result = allocator.allocate(
        64,
        1,
        u32::MAX,
        vk::MemoryPropertyFlags::HOST_VISIBLE,
        Mapping::Mapped,
    );
    assert!(matches!(
        result,
        Err(RhiError::NoSuitableMemoryType { .. })
    ));

    // The type exists but the filter excludes it.
    let result = allocator.allocate(64, 1, 0b10, vk::MemoryPropertyFlags::DEVICE_LOCAL, Mapping::Unmapped);
    assert!(matches!(
        result,
        Err(RhiError::NoSuitableMemoryType { .. })
    ));
    assert_eq!(mock.live_allocations(), 0);
}

#[test]
fn test_failed_buffer_creation_leaves_nothing_behind() {
    let (mock, _device, allocator) = setup();
    // Only the device-local type is allowed for new objects.
    mock.set_memory_type_bits(0b001);

    let result = allocator.create_buffer_for(BufferUsage::Staging, 64);
    assert!(matches!(
        result,
        Err(RhiError::NoSuitableMemoryType { .. })
    ));
    assert_eq!(mock.live_buffers(), 0);
    assert_eq!(mock.live_allocations(), 0);
}

#[test]
fn test_mapped_buffer_is_host_writable() {
    let (mock, _device, allocator) = setup();

    let mut uniforms = allocator.create_buffer_for(BufferUsage::Uniform, 64).unwrap();
    assert!(uniforms.allocation().is_mapped());
    let bytes = uniforms.mapped_bytes_mut().unwrap();
    assert_eq!(bytes.len(), 64);
    bytes.copy_from_slice(&[7u8; 64]);
    assert_eq!(uniforms.mapped_bytes().unwrap(), &[7u8; 64][..]);

    allocator.destroy_buffer(&mut uniforms);
    assert!(uniforms.is_empty());
    assert_eq!(mock.live_buffers(), 0);
}

#[test]
fn test_identical_uploads_read_back_identically() {
    let (mock, _device, allocator) = setup();
    let data: Vec<u8> = (0..1000u32).map(|i| (i * 7 % 251) as u8).collect();

    let mut first = allocator
        .create_buffer_for(BufferUsage::Storage, data.len() as u64)
        .unwrap();
    let mut second = allocator
        .create_buffer_for(BufferUsage::Storage, data.len() as u64)
        .unwrap();

    allocator.transfer_to_buffer(&data, &first).unwrap();
    allocator.transfer_to_buffer(&data, &second).unwrap();

    let mut readback_first = vec![0u8; data.len()];
    let mut readback_second = vec![0u8; data.len()];
    allocator
        .transfer_from_buffer(&first, &mut readback_first)
        .unwrap();
    allocator
        .transfer_from_buffer(&second, &mut readback_second)
        .unwrap();

    assert_eq!(readback_first, data);
    assert_eq!(readback_second, data);

    allocator.destroy_buffer(&mut first);
    allocator.destroy_buffer(&mut second);

    // Staging buffers are gone too.
    assert_eq!(mock.live_buffers(), 0);
    assert_eq!(mock.live_allocations(), 0);
    assert!(mock.validation_errors().is_empty());
}

#[test]
fn test_transfer_blocks_until_queue_idle() {
    let (mock, _device, allocator) = setup();
    mock.set_deferred(true);

    let mut target = allocator.create_buffer_for(BufferUsage::Vertex, 32).unwrap();
    mock.clear_events();
    allocator.transfer_to_buffer(&[1u8; 32], &target).unwrap();

    let events = mock.events();
    let submit = events
        .iter()
        .position(|e| matches!(e, MockEvent::Submit { .. }))
        .unwrap();
    let idle = events
        .iter()
        .position(|e| *e == MockEvent::QueueWaitIdle)
        .unwrap();
    let copy = events
        .iter()
        .position(|e| matches!(e, MockEvent::CopyBuffer { .. }))
        .unwrap();
    // Deferred work only runs once the queue is drained.
    assert!(submit < idle && idle < copy);

    allocator.destroy_buffer(&mut target);
    assert!(mock.validation_errors().is_empty());
}

#[test]
fn test_transfer_rejects_oversized_payload() {
    let (_mock, _device, allocator) = setup();
    let mut target = allocator.create_buffer_for(BufferUsage::Vertex, 16).unwrap();

    let result = allocator.transfer_to_buffer(&[0u8; 17], &target);
    assert!(matches!(
        result,
        Err(RhiError::TransferSizeMismatch {
            expected: 16,
            actual: 17
        })
    ));

    allocator.destroy_buffer(&mut target);
}

#[test]
fn test_image_upload_transitions_around_copy() {
    let (mock, _device, allocator) = setup();
    let extent = vk::Extent2D {
        width: 4,
        height: 2,
    };
    let mut image = allocator
        .create_image(
            extent,
            vk::Format::R8G8B8A8_UNORM,
            vk::ImageTiling::OPTIMAL,
            vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            Mapping::Unmapped,
        )
        .unwrap();
    let texels: Vec<u8> = (0..32u8).collect();

    mock.clear_events();
    allocator.transfer_to_image(&texels, &image).unwrap();

    let recorded: Vec<MockEvent> = mock
        .events()
        .into_iter()
        .filter(|e| {
            matches!(
                e,
                MockEvent::Barrier { .. } | MockEvent::CopyBufferToImage { .. }
            )
        })
        .collect();
    assert_eq!(recorded.len(), 3);
    assert_eq!(
        recorded[0],
        MockEvent::Barrier {
            image: image.handle(),
            old_layout: vk::ImageLayout::UNDEFINED,
            new_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
            dst_stage: vk::PipelineStageFlags::TRANSFER,
        }
    );
    assert!(matches!(recorded[1], MockEvent::CopyBufferToImage { image: i, .. } if i == image.handle()));
    assert_eq!(
        recorded[2],
        MockEvent::Barrier {
            image: image.handle(),
            old_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            new_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            src_stage: vk::PipelineStageFlags::TRANSFER,
            dst_stage: vk::PipelineStageFlags::FRAGMENT_SHADER,
        }
    );

    assert_eq!(mock.read_image(image.handle()).unwrap(), texels);
    assert_eq!(
        mock.image_layout(image.handle()),
        Some(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
    );

    allocator.destroy_image(&mut image);
    assert!(mock.validation_errors().is_empty());
}

#[test]
fn test_image_upload_checks_footprint() {
    let (mock, _device, allocator) = setup();
    let mut image = allocator
        .create_image(
            vk::Extent2D {
                width: 8,
                height: 8,
            },
            vk::Format::BC1_RGB_UNORM_BLOCK,
            vk::ImageTiling::OPTIMAL,
            vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            Mapping::Unmapped,
        )
        .unwrap();

    // 8x8 texels of BC1 are four 8-byte blocks.
    let result = allocator.transfer_to_image(&[0u8; 64], &image);
    assert!(matches!(
        result,
        Err(RhiError::TransferSizeMismatch {
            expected: 32,
            actual: 64
        })
    ));
    // Nothing was submitted and the staging buffer was never created.
    assert_eq!(mock.live_buffers(), 0);

    allocator.destroy_image(&mut image);
}

#[test]
fn test_find_image_format_follows_candidate_order() {
    let (mock, _device, allocator) = setup();
    let depth = vk::FormatProperties {
        optimal_tiling_features: vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
        ..Default::default()
    };
    let none = vk::FormatProperties::default();
    mock.set_format_properties(vk::Format::D32_SFLOAT_S8_UINT, none);
    mock.set_format_properties(vk::Format::D24_UNORM_S8_UINT, depth);
    mock.set_format_properties(vk::Format::D16_UNORM, none);

    let candidates = [
        vk::Format::D32_SFLOAT_S8_UINT,
        vk::Format::D24_UNORM_S8_UINT,
        vk::Format::D16_UNORM,
    ];
    let format = allocator
        .find_image_format(
            &candidates,
            vk::ImageTiling::OPTIMAL,
            vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
        )
        .unwrap();
    assert_eq!(format, vk::Format::D24_UNORM_S8_UINT);

    // Linear features are separate from optimal ones.
    let result = allocator.find_image_format(
        &candidates,
        vk::ImageTiling::LINEAR,
        vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
    );
    assert!(matches!(result, Err(RhiError::NoSupportedFormat { .. })));
}

#[test]
fn test_destroy_is_idempotent() {
    let (mock, _device, allocator) = setup();
    let mut buffer = allocator.create_buffer_for(BufferUsage::Index, 128).unwrap();
    let mut image = allocator
        .create_image(
            vk::Extent2D {
                width: 2,
                height: 2,
            },
            vk::Format::R8G8B8A8_UNORM,
            vk::ImageTiling::OPTIMAL,
            vk::ImageUsageFlags::SAMPLED,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            Mapping::Unmapped,
        )
        .unwrap();

    allocator.destroy_buffer(&mut buffer);
    allocator.destroy_buffer(&mut buffer);
    allocator.destroy_image(&mut image);
    allocator.destroy_image(&mut image);

    assert!(buffer.is_empty());
    assert!(image.is_empty());
    assert_eq!(mock.live_allocations(), 0);
    assert!(mock.validation_errors().is_empty());
}
