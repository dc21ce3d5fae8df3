//! Writing device images to disk.

use std::io::Write;
use std::path::Path;

use ash::vk;
use tracing::debug;

use crate::error::{RhiError, RhiResult};
use crate::format::ChannelOrder;

/// Encodes tightly packed 4 x 8-bit texels as a binary (`P6`) PPM image.
///
/// Rows are written top to bottom; the alpha channel is dropped and BGRA
/// sources are swizzled to RGB.
pub fn encode_ppm(extent: vk::Extent2D, format: vk::Format, bytes: &[u8]) -> RhiResult<Vec<u8>> {
    let order = ChannelOrder::of(format).ok_or(RhiError::UnsupportedFormat(format))?;
    let texels = extent.width as usize * extent.height as usize;
    if bytes.len() < texels * 4 {
        return Err(RhiError::TransferSizeMismatch {
            expected: texels as u64 * 4,
            actual: bytes.len() as u64,
        });
    }

    let mut out = Vec::with_capacity(32 + texels * 3);
    write!(out, "P6\n{} {}\n255\n", extent.width, extent.height)?;
    let [r, g, b] = order.rgb_offsets();
    for texel in bytes[..texels * 4].chunks_exact(4) {
        out.extend_from_slice(&[texel[r], texel[g], texel[b]]);
    }
    Ok(out)
}

/// Writes `bytes` to `path` as a binary PPM image. See [`encode_ppm`].
pub fn write_ppm(
    path: &Path,
    extent: vk::Extent2D,
    format: vk::Format,
    bytes: &[u8],
) -> RhiResult<()> {
    let encoded = encode_ppm(extent, format, bytes)?;
    std::fs::write(path, encoded)?;
    debug!(
        "Wrote {}x{} image to {}",
        extent.width,
        extent.height,
        path.display()
    );
    Ok(())
}
