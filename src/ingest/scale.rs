use anyhow::{anyhow, Result};

/// Nearest-neighbour resize of a packed RGB buffer.
///
/// Snapshot evidence favors speed over interpolation quality: the scaler
/// runs on the acquisition hot path for every frame.
pub(crate) fn scale_rgb(
    pixels: &[u8],
    src_width: u32,
    src_height: u32,
    dst_width: u32,
    dst_height: u32,
) -> Result<Vec<u8>> {
    if src_width == 0 || src_height == 0 || dst_width == 0 || dst_height == 0 {
        return Err(anyhow!("frame dimensions must be non-zero"));
    }

    let expected = (src_width as usize)
        .checked_mul(src_height as usize)
        .and_then(|v| v.checked_mul(3))
        .ok_or_else(|| anyhow!("RGB frame dimensions overflow"))?;
    if pixels.len() != expected {
        return Err(anyhow!(
            "RGB frame length mismatch: expected {}, got {}",
            expected,
            pixels.len()
        ));
    }

    if src_width == dst_width && src_height == dst_height {
        return Ok(pixels.to_vec());
    }

    let src_w = src_width as usize;
    let dst_w = dst_width as usize;
    let dst_h = dst_height as usize;

    let mut out = vec![0u8; dst_w * dst_h * 3];
    for y in 0..dst_h {
        let src_y = (y as u64 * src_height as u64 / dst_height as u64) as usize;
        for x in 0..dst_w {
            let src_x = (x as u64 * src_width as u64 / dst_width as u64) as usize;
            let src_off = (src_y * src_w + src_x) * 3;
            let dst_off = (y * dst_w + x) * 3;
            out[dst_off..dst_off + 3].copy_from_slice(&pixels[src_off..src_off + 3]);
        }
    }

    Ok(out)
}
