//! Face alignment via 4-DOF similarity transform.
//!
//! Aligns detected faces to a canonical crop using five reference landmarks
//! and least-squares estimation. The same transform, inverted, places a
//! generated crop back into the frame it came from.

use image::{Rgb, RgbImage};

/// 2×3 affine matrix `[m00, m01, tx, m10, m11, ty]`, row-major.
pub type AffineMatrix = [f32; 6];

/// ArcFace reference landmarks for a 112×112 output.
pub const ARCFACE_TEMPLATE_112: [(f32, f32); 5] = [
    (38.2946, 51.6963), // left eye
    (73.5318, 51.5014), // right eye
    (56.0252, 71.7366), // nose
    (41.5493, 92.3655), // left mouth
    (70.7299, 92.2041), // right mouth
];

/// FFHQ reference landmarks for a 512×512 output (CodeFormer / GFPGAN crops).
pub const FFHQ_TEMPLATE_512: [(f32, f32); 5] = [
    (192.98138, 239.94708),
    (318.90277, 240.1936),
    (256.63416, 314.01935),
    (201.26117, 371.41043),
    (313.08905, 371.15118),
];

/// A face warped into a canonical crop, with the transform that produced it.
pub struct AlignedFace {
    pub image: RgbImage,
    /// Maps frame coordinates to crop coordinates.
    pub matrix: AffineMatrix,
}

/// ArcFace landmarks for a square crop of edge `size`.
///
/// Multiples of 112 scale the template; any other size uses the 128 layout
/// (template shifted 8 px right) scaled by `size / 128`.
pub fn arcface_template(size: u32) -> [(f32, f32); 5] {
    let (ratio, diff_x) = if size % 112 == 0 {
        (size as f32 / 112.0, 0.0)
    } else {
        let ratio = size as f32 / 128.0;
        (ratio, 8.0 * ratio)
    };
    ARCFACE_TEMPLATE_112.map(|(x, y)| (x * ratio + diff_x, y * ratio))
}

/// Estimate a 2×3 similarity transform (4-DOF: scale, rotation, translation)
/// from `src` landmarks to `dst` landmarks using least-squares.
///
/// Returns [a, -b, tx, b, a, ty] representing the matrix:
/// ```text
/// | a  -b  tx |
/// | b   a  ty |
/// ```
pub fn estimate_similarity_transform(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> AffineMatrix {
    // Build overdetermined system A * [a, b, tx, ty]^T = B
    // For each point pair (sx, sy) -> (dx, dy):
    //   sx * a - sy * b + tx = dx
    //   sy * a + sx * b + ty = dy
    let mut ata = [0.0f32; 16]; // 4x4, row-major
    let mut atb = [0.0f32; 4]; // 4x1

    for i in 0..5 {
        let (sx, sy) = src[i];
        let (dx, dy) = dst[i];

        let r1 = [sx, -sy, 1.0, 0.0];
        let r2 = [sy, sx, 0.0, 1.0];

        for j in 0..4 {
            for k in 0..4 {
                ata[j * 4 + k] += r1[j] * r1[k] + r2[j] * r2[k];
            }
            atb[j] += r1[j] * dx + r2[j] * dy;
        }
    }

    let x = solve_4x4(&ata, &atb);
    let (a, b, tx, ty) = (x[0], x[1], x[2], x[3]);

    [a, -b, tx, b, a, ty]
}

/// Solve a 4×4 linear system via Gaussian elimination with partial pivoting.
#[allow(clippy::needless_range_loop)]
fn solve_4x4(ata: &[f32; 16], atb: &[f32; 4]) -> [f32; 4] {
    // Augmented matrix [A | b] as 4x5
    let mut m = [[0.0f32; 5]; 4];
    for i in 0..4 {
        for j in 0..4 {
            m[i][j] = ata[i * 4 + j];
        }
        m[i][4] = atb[i];
    }

    for col in 0..4 {
        let mut max_row = col;
        let mut max_val = m[col][col].abs();
        for row in (col + 1)..4 {
            if m[row][col].abs() > max_val {
                max_val = m[row][col].abs();
                max_row = row;
            }
        }
        m.swap(col, max_row);

        let pivot = m[col][col];
        if pivot.abs() < 1e-12 {
            return [1.0, 0.0, 0.0, 0.0]; // degenerate landmarks: identity scale
        }

        for row in (col + 1)..4 {
            let factor = m[row][col] / pivot;
            for j in col..5 {
                m[row][j] -= factor * m[col][j];
            }
        }
    }

    let mut x = [0.0f32; 4];
    for i in (0..4).rev() {
        x[i] = m[i][4];
        for j in (i + 1)..4 {
            x[i] -= m[i][j] * x[j];
        }
        x[i] /= m[i][i];
    }

    x
}

/// Invert a 2×3 affine matrix. Returns `None` when the linear part is singular.
pub fn invert_affine(m: &AffineMatrix) -> Option<AffineMatrix> {
    let det = m[0] * m[4] - m[1] * m[3];
    if det.abs() < 1e-12 {
        return None;
    }
    let inv_det = 1.0 / det;
    let i00 = m[4] * inv_det;
    let i01 = -m[1] * inv_det;
    let i10 = -m[3] * inv_det;
    let i11 = m[0] * inv_det;
    let itx = -(i00 * m[2] + i01 * m[5]);
    let ity = -(i10 * m[2] + i11 * m[5]);
    Some([i00, i01, itx, i10, i11, ity])
}

/// Apply an affine matrix to a point.
pub fn transform_point(m: &AffineMatrix, (x, y): (f32, f32)) -> (f32, f32) {
    (m[0] * x + m[1] * y + m[2], m[3] * x + m[4] * y + m[5])
}

/// Adapt a frame→crop matrix to a frame resized by `frame_scale` and a crop
/// resized by `crop_scale`.
pub fn rescale_affine(m: &AffineMatrix, frame_scale: f32, crop_scale: f32) -> AffineMatrix {
    let k = crop_scale / frame_scale;
    [
        m[0] * k,
        m[1] * k,
        m[2] * crop_scale,
        m[3] * k,
        m[4] * k,
        m[5] * crop_scale,
    ]
}

/// Sample an RGB image at a sub-pixel position with bilinear interpolation.
///
/// Out-of-bounds neighbours contribute black.
pub fn sample_bilinear(image: &RgbImage, x: f32, y: f32) -> [f32; 3] {
    let (w, h) = (image.width() as i32, image.height() as i32);
    let x0 = x.floor() as i32;
    let y0 = y.floor() as i32;
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let sample = |sx: i32, sy: i32| -> [f32; 3] {
        if sx >= 0 && sx < w && sy >= 0 && sy < h {
            let p = image.get_pixel(sx as u32, sy as u32).0;
            [p[0] as f32, p[1] as f32, p[2] as f32]
        } else {
            [0.0; 3]
        }
    };

    let tl = sample(x0, y0);
    let tr = sample(x0 + 1, y0);
    let bl = sample(x0, y0 + 1);
    let br = sample(x0 + 1, y0 + 1);

    let mut out = [0.0f32; 3];
    for c in 0..3 {
        out[c] = tl[c] * (1.0 - fx) * (1.0 - fy)
            + tr[c] * fx * (1.0 - fy)
            + bl[c] * (1.0 - fx) * fy
            + br[c] * fx * fy;
    }
    out
}

/// Apply a 2×3 affine warp (frame → output coordinates) to produce an
/// `out_width × out_height` image.
///
/// Uses bilinear interpolation. Out-of-bounds pixels are filled with black.
pub fn warp_affine(frame: &RgbImage, matrix: &AffineMatrix, out_width: u32, out_height: u32) -> RgbImage {
    let Some(inverse) = invert_affine(matrix) else {
        return RgbImage::new(out_width, out_height);
    };

    RgbImage::from_fn(out_width, out_height, |ox, oy| {
        let (sx, sy) = transform_point(&inverse, (ox as f32, oy as f32));
        let v = sample_bilinear(frame, sx, sy);
        Rgb(v.map(|c| c.round().clamp(0.0, 255.0) as u8))
    })
}

/// Align a detected face to a canonical `size × size` crop.
///
/// Computes the similarity transform from the detected landmarks to the
/// reference `template` and warps the face region into the crop.
pub fn align_face(
    frame: &RgbImage,
    landmarks: &[(f32, f32); 5],
    template: &[(f32, f32); 5],
    size: u32,
) -> AlignedFace {
    let matrix = estimate_similarity_transform(landmarks, template);
    let image = warp_affine(frame, &matrix, size, size);
    AlignedFace { image, matrix }
}
