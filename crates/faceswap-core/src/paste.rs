//! Paste an aligned crop back into the frame it was cut from.

use crate::alignment::{invert_affine, sample_bilinear, transform_point, AffineMatrix};
use image::RgbImage;

/// Soft edge applied to a pasted crop, as fractions of the crop's short side.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaskProfile {
    /// Border band that is left fully transparent.
    pub erode: f32,
    /// Width of the linear ramp from transparent to opaque.
    pub feather: f32,
}

impl MaskProfile {
    /// Profile used for InSwapper crops.
    pub const SWAP: MaskProfile = MaskProfile { erode: 0.05, feather: 0.10 };
    /// Profile used for restored 512×512 crops.
    pub const RESTORE: MaskProfile = MaskProfile { erode: 0.04, feather: 0.08 };

    /// Blend weight for crop position (u, v) in a `width × height` crop.
    pub fn alpha(&self, u: f32, v: f32, width: f32, height: f32) -> f32 {
        let edge = u.min(v).min(width - 1.0 - u).min(height - 1.0 - v);
        if edge < 0.0 {
            return 0.0;
        }
        let d = edge / width.min(height);
        if self.feather <= 0.0 {
            return if d >= self.erode { 1.0 } else { 0.0 };
        }
        ((d - self.erode) / self.feather).clamp(0.0, 1.0)
    }
}

/// Blend `crop` into `frame`. `forward` maps frame coordinates to crop
/// coordinates (the matrix the crop was aligned with).
///
/// Only the frame region covered by the crop is visited.
pub fn paste_back(frame: &mut RgbImage, crop: &RgbImage, forward: &AffineMatrix, profile: MaskProfile) {
    let Some(inverse) = invert_affine(forward) else {
        tracing::warn!("paste_back: singular alignment matrix, crop skipped");
        return;
    };

    let (cw, ch) = (crop.width() as f32, crop.height() as f32);
    let corners = [(0.0, 0.0), (cw, 0.0), (0.0, ch), (cw, ch)].map(|p| transform_point(&inverse, p));

    let min_x = corners.iter().map(|p| p.0).fold(f32::INFINITY, f32::min).floor().max(0.0) as u32;
    let min_y = corners.iter().map(|p| p.1).fold(f32::INFINITY, f32::min).floor().max(0.0) as u32;
    let max_x = (corners.iter().map(|p| p.0).fold(f32::NEG_INFINITY, f32::max).ceil() as i64)
        .clamp(0, frame.width() as i64) as u32;
    let max_y = (corners.iter().map(|p| p.1).fold(f32::NEG_INFINITY, f32::max).ceil() as i64)
        .clamp(0, frame.height() as i64) as u32;

    for y in min_y..max_y {
        for x in min_x..max_x {
            let (u, v) = transform_point(forward, (x as f32, y as f32));
            let alpha = profile.alpha(u, v, cw, ch);
            if alpha <= 0.0 {
                continue;
            }
            let src = sample_bilinear(crop, u, v);
            let dst = frame.get_pixel_mut(x, y);
            for c in 0..3 {
                let blended = src[c] * alpha + dst.0[c] as f32 * (1.0 - alpha);
                dst.0[c] = blended.round().clamp(0.0, 255.0) as u8;
            }
        }
    }
}
