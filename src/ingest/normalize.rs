use anyhow::{anyhow, Result};

/// Pixel layouts camera drivers commonly hand out.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PixelFormat {
    Bgr24,
    Rgb24,
    Yuyv,
    Nv12,
}

/// Convert a captured buffer into packed BGR24.
pub(crate) fn normalize_to_bgr(
    pixels: &[u8],
    width: u32,
    height: u32,
    format: PixelFormat,
) -> Result<Vec<u8>> {
    match format {
        PixelFormat::Bgr24 => {
            check_len(pixels, packed_len(width, height)?, "BGR")?;
            Ok(pixels.to_vec())
        }
        PixelFormat::Rgb24 => {
            check_len(pixels, packed_len(width, height)?, "RGB")?;
            let mut bgr = pixels.to_vec();
            for px in bgr.chunks_exact_mut(3) {
                px.swap(0, 2);
            }
            Ok(bgr)
        }
        PixelFormat::Yuyv => yuyv_to_bgr(pixels, width, height),
        PixelFormat::Nv12 => nv12_to_bgr(pixels, width, height),
    }
}

fn packed_len(width: u32, height: u32) -> Result<usize> {
    width
        .checked_mul(height)
        .and_then(|v| v.checked_mul(3))
        .map(|v| v as usize)
        .ok_or_else(|| anyhow!("frame dimensions overflow"))
}

fn check_len(pixels: &[u8], expected: usize, label: &str) -> Result<()> {
    if pixels.len() != expected {
        return Err(anyhow!(
            "{} frame length mismatch: expected {}, got {}",
            label,
            expected,
            pixels.len()
        ));
    }
    Ok(())
}

fn yuyv_to_bgr(pixels: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let w = width as usize;
    let h = height as usize;
    if w % 2 != 0 {
        return Err(anyhow!("YUYV frames need an even width, got {}", w));
    }
    let expected = w
        .checked_mul(h)
        .and_then(|v| v.checked_mul(2))
        .ok_or_else(|| anyhow!("YUYV frame dimensions overflow"))?;
    check_len(pixels, expected, "YUYV")?;

    let mut bgr = vec![0u8; w * h * 3];
    for (pair, out) in pixels.chunks_exact(4).zip(bgr.chunks_exact_mut(6)) {
        let u = pair[1] as f32 - 128.0;
        let v = pair[3] as f32 - 128.0;
        write_bgr(&mut out[..3], pair[0] as f32, u, v);
        write_bgr(&mut out[3..], pair[2] as f32, u, v);
    }
    Ok(bgr)
}

fn nv12_to_bgr(pixels: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let w = width as usize;
    let h = height as usize;
    if w % 2 != 0 || h % 2 != 0 {
        return Err(anyhow!("NV12 frames need an even size, got {}x{}", w, h));
    }
    let y_plane = w
        .checked_mul(h)
        .ok_or_else(|| anyhow!("NV12 frame dimensions overflow"))?;
    let expected = y_plane
        .checked_add(y_plane / 2)
        .ok_or_else(|| anyhow!("NV12 frame dimensions overflow"))?;
    check_len(pixels, expected, "NV12")?;

    let mut bgr = vec![0u8; y_plane * 3];
    for j in 0..h {
        for i in 0..w {
            let y = pixels[j * w + i] as f32;
            let uv_index = y_plane + (j / 2) * w + (i / 2) * 2;
            let u = pixels[uv_index] as f32 - 128.0;
            let v = pixels[uv_index + 1] as f32 - 128.0;
            let offset = (j * w + i) * 3;
            write_bgr(&mut bgr[offset..offset + 3], y, u, v);
        }
    }

    Ok(bgr)
}

fn write_bgr(out: &mut [u8], y: f32, u: f32, v: f32) {
    let r = y + 1.402_f32 * v;
    let g = y - 0.344_136_f32 * u - 0.714_136_f32 * v;
    let b = y + 1.772_f32 * u;
    out[0] = clamp_to_u8(b);
    out[1] = clamp_to_u8(g);
    out[2] = clamp_to_u8(r);
}

fn clamp_to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nv12_conversion_produces_gray() -> Result<()> {
        let y_plane = vec![128u8; 4];
        let uv_plane = vec![128u8; 2];
        let nv12 = [y_plane, uv_plane].concat();

        let bgr = normalize_to_bgr(&nv12, 2, 2, PixelFormat::Nv12)?;
        assert_eq!(bgr, vec![128u8; 12]);
        Ok(())
    }

    #[test]
    fn nv12_with_odd_size_is_an_error() {
        assert!(normalize_to_bgr(&[128u8; 9], 3, 2, PixelFormat::Nv12).is_err());
        assert!(normalize_to_bgr(&[128u8; 9], 2, 3, PixelFormat::Nv12).is_err());
    }

    #[test]
    fn yuyv_conversion_produces_gray() -> Result<()> {
        let yuyv = vec![90u8, 128, 90, 128];
        let bgr = normalize_to_bgr(&yuyv, 2, 1, PixelFormat::Yuyv)?;
        assert_eq!(bgr, vec![90u8; 6]);
        Ok(())
    }

    #[test]
    fn rgb_is_swapped_to_bgr() -> Result<()> {
        let bgr = normalize_to_bgr(&[1, 2, 3], 1, 1, PixelFormat::Rgb24)?;
        assert_eq!(bgr, vec![3, 2, 1]);
        Ok(())
    }

    #[test]
    fn bgr_pass_through_validates_length() {
        assert!(normalize_to_bgr(&[0u8; 8], 1, 3, PixelFormat::Bgr24).is_err());
        assert!(normalize_to_bgr(&[0u8; 9], 1, 3, PixelFormat::Bgr24).is_ok());
    }
}
