//! Device images bound to an owned [`Allocation`], and image views.

use std::sync::Arc;

use ash::vk;

use crate::command::color_subresource_range;
use crate::device::Device;
use crate::error::RhiResult;
use crate::memory::Allocation;

/// An image handle, its extent and format, and the memory bound to it.
#[derive(Debug, Default)]
pub struct AllocatedImage {
    pub(crate) handle: vk::Image,
    pub(crate) extent: vk::Extent2D,
    pub(crate) format: vk::Format,
    pub(crate) allocation: Allocation,
}

impl AllocatedImage {
    /// Raw image handle; null once destroyed.
    #[inline]
    pub fn handle(&self) -> vk::Image {
        self.handle
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.format
    }

    #[inline]
    pub fn allocation(&self) -> &Allocation {
        &self.allocation
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.handle == vk::Image::null() && self.allocation.is_empty()
    }
}

/// 2D color view of an image, destroyed on drop.
pub struct ImageView {
    device: Arc<Device>,
    view: vk::ImageView,
}

impl ImageView {
    pub fn new(device: Arc<Device>, image: vk::Image, format: vk::Format) -> RhiResult<Self> {
        let create_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .components(vk::ComponentMapping {
                r: vk::ComponentSwizzle::IDENTITY,
                g: vk::ComponentSwizzle::IDENTITY,
                b: vk::ComponentSwizzle::IDENTITY,
                a: vk::ComponentSwizzle::IDENTITY,
            })
            .subresource_range(color_subresource_range());

        let view = device.backend().create_image_view(&create_info)?;
        Ok(Self { device, view })
    }

    #[inline]
    pub fn handle(&self) -> vk::ImageView {
        self.view
    }
}

impl Drop for ImageView {
    fn drop(&mut self) {
        self.device.backend().destroy_image_view(self.view);
    }
}
