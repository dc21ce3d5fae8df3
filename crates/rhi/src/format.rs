//! Pixel format helpers: texel block sizes, channel order and configuration
//! name parsing.

use ash::vk;

use crate::error::{RhiError, RhiResult};

/// Storage footprint of one block of texels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TexelBlock {
    pub bytes: u32,
    pub texels: u32,
}

impl TexelBlock {
    const fn new(bytes: u32, texels: u32) -> Self {
        Self { bytes, texels }
    }
}

/// Returns the texel block layout of `format`, or `None` if the engine
/// doesn't know how large it is.
pub fn texel_block(format: vk::Format) -> Option<TexelBlock> {
    use vk::Format as F;
    let block = match format {
        F::R8_UNORM | F::R8_SRGB | F::R8_UINT => TexelBlock::new(1, 1),
        F::R8G8_UNORM | F::R8G8_SRGB | F::R16_SFLOAT => TexelBlock::new(2, 1),
        F::R8G8B8A8_UNORM
        | F::R8G8B8A8_SRGB
        | F::B8G8R8A8_UNORM
        | F::B8G8R8A8_SRGB
        | F::A2B10G10R10_UNORM_PACK32
        | F::R16G16_SFLOAT
        | F::R32_SFLOAT
        | F::R32_UINT
        | F::D32_SFLOAT
        | F::D24_UNORM_S8_UINT
        | F::X8_D24_UNORM_PACK32 => TexelBlock::new(4, 1),
        F::R16G16B16A16_SFLOAT | F::R32G32_SFLOAT => TexelBlock::new(8, 1),
        F::R32G32B32A32_SFLOAT => TexelBlock::new(16, 1),
        // 4x4 block-compressed formats.
        F::BC1_RGB_UNORM_BLOCK
        | F::BC1_RGB_SRGB_BLOCK
        | F::BC1_RGBA_UNORM_BLOCK
        | F::BC1_RGBA_SRGB_BLOCK
        | F::BC4_UNORM_BLOCK => TexelBlock::new(8, 16),
        F::BC3_UNORM_BLOCK
        | F::BC3_SRGB_BLOCK
        | F::BC5_UNORM_BLOCK
        | F::BC7_UNORM_BLOCK
        | F::BC7_SRGB_BLOCK => TexelBlock::new(16, 16),
        _ => return None,
    };
    Some(block)
}

/// Byte footprint of a tightly packed `extent` image in `format`.
pub fn image_byte_size(format: vk::Format, extent: vk::Extent2D) -> RhiResult<vk::DeviceSize> {
    let block = texel_block(format).ok_or(RhiError::UnsupportedFormat(format))?;
    Ok(u64::from(extent.width) * u64::from(extent.height) * u64::from(block.bytes)
        / u64::from(block.texels))
}

/// Order of the color channels in a 4 x 8-bit format.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelOrder {
    Rgba,
    Bgra,
}

impl ChannelOrder {
    pub fn of(format: vk::Format) -> Option<Self> {
        match format {
            vk::Format::R8G8B8A8_UNORM | vk::Format::R8G8B8A8_SRGB => Some(Self::Rgba),
            vk::Format::B8G8R8A8_UNORM | vk::Format::B8G8R8A8_SRGB => Some(Self::Bgra),
            _ => None,
        }
    }

    /// Byte offsets of red, green and blue within one texel.
    pub fn rgb_offsets(self) -> [usize; 3] {
        match self {
            Self::Rgba => [0, 1, 2],
            Self::Bgra => [2, 1, 0],
        }
    }
}

/// Quantizes a float clear color to the byte layout of a 4 x 8-bit format.
///
/// No transfer function is applied; sRGB formats store the same bytes as
/// their UNORM counterparts.
pub fn pack_rgba8(format: vk::Format, color: [f32; 4]) -> Option<[u8; 4]> {
    let order = ChannelOrder::of(format)?;
    let q = |c: f32| (c.clamp(0.0, 1.0) * 255.0).round() as u8;
    let [r, g, b, a] = color.map(q);
    Some(match order {
        ChannelOrder::Rgba => [r, g, b, a],
        ChannelOrder::Bgra => [b, g, r, a],
    })
}

fn strip_affixes<'a>(name: &'a str, prefix: &str, suffix: &str) -> &'a str {
    let name = name.trim();
    let name = name.strip_prefix(prefix).unwrap_or(name);
    name.strip_suffix(suffix).unwrap_or(name)
}

/// Parses a format name such as `B8G8R8A8_SRGB` (or `VK_FORMAT_B8G8R8A8_SRGB`).
pub fn parse_format(name: &str) -> RhiResult<vk::Format> {
    let format = match strip_affixes(name, "VK_FORMAT_", "").to_ascii_uppercase().as_str() {
        "B8G8R8A8_SRGB" => vk::Format::B8G8R8A8_SRGB,
        "B8G8R8A8_UNORM" => vk::Format::B8G8R8A8_UNORM,
        "R8G8B8A8_SRGB" => vk::Format::R8G8B8A8_SRGB,
        "R8G8B8A8_UNORM" => vk::Format::R8G8B8A8_UNORM,
        "A2B10G10R10_UNORM_PACK32" => vk::Format::A2B10G10R10_UNORM_PACK32,
        "R16G16B16A16_SFLOAT" => vk::Format::R16G16B16A16_SFLOAT,
        _ => return Err(RhiError::InvalidArgument(format!("unknown format '{name}'"))),
    };
    Ok(format)
}

/// Parses a present mode name such as `FIFO` or `VK_PRESENT_MODE_MAILBOX_KHR`.
pub fn parse_present_mode(name: &str) -> RhiResult<vk::PresentModeKHR> {
    let mode = match strip_affixes(name, "VK_PRESENT_MODE_", "_KHR")
        .to_ascii_uppercase()
        .as_str()
    {
        "FIFO" => vk::PresentModeKHR::FIFO,
        "FIFO_RELAXED" => vk::PresentModeKHR::FIFO_RELAXED,
        "MAILBOX" => vk::PresentModeKHR::MAILBOX,
        "IMMEDIATE" => vk::PresentModeKHR::IMMEDIATE,
        _ => {
            return Err(RhiError::InvalidArgument(format!(
                "unknown present mode '{name}'"
            )));
        }
    };
    Ok(mode)
}
