//! Face restoration (CodeFormer) and super-resolution (Real-ESRGAN) via ONNX Runtime.
//!
//! Runs once on the final composite: faces are re-detected, aligned to the
//! FFHQ 512 template, restored, optionally upsampled, and pasted onto a
//! background that is either Real-ESRGAN enhanced or Lanczos-resized.

use crate::alignment::{self, rescale_affine, AffineMatrix, FFHQ_TEMPLATE_512};
use crate::detector::{DetectorError, FaceDetector};
use crate::paste::{paste_back, MaskProfile};
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use ndarray::{Array1, Array4};
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const CODEFORMER_INPUT_SIZE: u32 = 512;
const MAX_UPSCALE: u32 = 4;
const MIN_EYE_DISTANCE: f32 = 5.0;
const ESRGAN_TILE: u32 = 400;
const ESRGAN_TILE_PAD: u32 = 40;

#[derive(Error, Debug)]
pub enum RestoreError {
    #[error("model file not found: {0} — place codeformer.onnx / realesrgan_x2plus.onnx in the model dir")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// User-facing restoration knobs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RestoreOptions {
    pub background_enhance: bool,
    pub face_upsample: bool,
    pub upscale: u32,
    /// CodeFormer fidelity weight in [0, 1]; lower = higher quality, higher = closer to input.
    pub fidelity: f32,
}

impl RestoreOptions {
    /// Clamp the options for an image of the given size.
    ///
    /// Upscale is limited to 4, to 2 past 1000 px on the long side, and to 1
    /// (with background enhance and face upsample off) past 1500 px.
    pub fn effective(&self, width: u32, height: u32) -> RestoreOptions {
        let long_side = width.max(height);
        let mut opts = *self;
        opts.upscale = opts.upscale.clamp(1, MAX_UPSCALE);
        opts.fidelity = opts.fidelity.clamp(0.0, 1.0);
        if opts.upscale > 2 && long_side > 1000 {
            opts.upscale = 2;
        }
        if long_side > 1500 {
            opts.upscale = 1;
            opts.background_enhance = false;
            opts.face_upsample = false;
        }
        opts
    }
}

/// CodeFormer 512×512 face restorer.
pub struct CodeFormer {
    session: Session,
    image_input: String,
    weight_input: String,
}

impl CodeFormer {
    pub fn load(model_path: &Path, intra_threads: usize) -> Result<Self, RestoreError> {
        if !model_path.exists() {
            return Err(RestoreError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(intra_threads).map_err(ort::Error::from)?
            .commit_from_file(model_path)?;

        let inputs: Vec<String> = session.inputs().iter().map(|i| i.name().to_string()).collect();
        tracing::info!(
            path = %model_path.display(),
            inputs = ?inputs,
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded CodeFormer model"
        );

        let [image_input, weight_input] = match inputs.as_slice() {
            [image, weight, ..] => [image.clone(), weight.clone()],
            _ => {
                return Err(RestoreError::InferenceFailed(format!(
                    "CodeFormer model requires image and fidelity inputs, got {inputs:?}"
                )))
            }
        };

        Ok(Self {
            session,
            image_input,
            weight_input,
        })
    }

    /// Restore an aligned 512×512 face crop.
    pub fn restore(&mut self, crop: &RgbImage, fidelity: f32) -> Result<RgbImage, RestoreError> {
        let input = to_signed_blob(crop);
        let weight = Array1::from_elem(1, fidelity as f64);

        let outputs = self.session.run(ort::inputs![
            self.image_input.as_str() => TensorRef::from_array_view(input.view())?,
            self.weight_input.as_str() => TensorRef::from_array_view(weight.view())?,
        ])?;

        let (_, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RestoreError::InferenceFailed(format!("CodeFormer output: {e}")))?;
        from_signed_nchw(data, crop.width(), crop.height())
    }
}

/// Real-ESRGAN upsampler, run tile by tile.
pub struct RealEsrgan {
    session: Session,
}

impl RealEsrgan {
    pub fn load(model_path: &Path, intra_threads: usize) -> Result<Self, RestoreError> {
        if !model_path.exists() {
            return Err(RestoreError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(intra_threads).map_err(ort::Error::from)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            "loaded Real-ESRGAN model"
        );

        Ok(Self { session })
    }

    /// Super-resolve `image`, then resize to exactly `outscale` × its size.
    pub fn enhance(&mut self, image: &RgbImage, outscale: u32) -> Result<RgbImage, RestoreError> {
        let (width, height) = image.dimensions();
        let mut output: Option<(RgbImage, u32)> = None;

        for tile in tile_regions(width, height, ESRGAN_TILE, ESRGAN_TILE_PAD) {
            let padded = imageops::crop_imm(image, tile.px, tile.py, tile.pw, tile.ph).to_image();
            let input = to_unit_blob(&padded);

            let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
            let (shape, data) = outputs[0]
                .try_extract_tensor::<f32>()
                .map_err(|e| RestoreError::InferenceFailed(format!("Real-ESRGAN output: {e}")))?;

            let out_h = shape.get(2).copied().unwrap_or(0).max(0) as u32;
            let scale = out_h / tile.ph.max(1);
            if scale == 0 || data.len() != (3 * tile.pw * scale * tile.ph * scale) as usize {
                return Err(RestoreError::InferenceFailed(format!(
                    "unexpected Real-ESRGAN output shape {shape:?} for {}x{} tile",
                    tile.pw, tile.ph
                )));
            }

            let (canvas, model_scale) =
                output.get_or_insert_with(|| (RgbImage::new(width * scale, height * scale), scale));
            if *model_scale != scale {
                return Err(RestoreError::InferenceFailed(format!(
                    "Real-ESRGAN scale changed between tiles: {model_scale} then {scale}"
                )));
            }
            stitch_tile(canvas, &tile, data, scale);
        }

        let Some((canvas, scale)) = output else {
            return Ok(image.clone());
        };
        tracing::debug!(width, height, scale, outscale, "Real-ESRGAN enhance");

        if scale == outscale {
            Ok(canvas)
        } else {
            Ok(imageops::resize(&canvas, width * outscale, height * outscale, FilterType::Lanczos3))
        }
    }
}

/// CodeFormer restoration with optional Real-ESRGAN background and face upsampling.
pub struct Restorer {
    codeformer: CodeFormer,
    upsampler: Option<RealEsrgan>,
}

impl Restorer {
    pub fn new(codeformer: CodeFormer, upsampler: Option<RealEsrgan>) -> Self {
        Self { codeformer, upsampler }
    }

    /// Restore every face in `image` and return the (possibly upscaled) result.
    pub fn restore(
        &mut self,
        detector: &mut FaceDetector,
        image: &RgbImage,
        options: &RestoreOptions,
    ) -> Result<RgbImage, RestoreError> {
        let (width, height) = image.dimensions();
        let mut opts = options.effective(width, height);
        if opts != *options {
            tracing::info!(?options, effective = ?opts, "restoration options clamped for image size");
        }
        if self.upsampler.is_none() && (opts.background_enhance || opts.face_upsample) {
            tracing::warn!("no Real-ESRGAN model loaded; background enhance and face upsample disabled");
            opts.background_enhance = false;
            opts.face_upsample = false;
        }

        let faces: Vec<_> = detector
            .detect(image)?
            .into_iter()
            .filter(|f| f.eye_distance().is_some_and(|d| d >= MIN_EYE_DISTANCE))
            .collect();
        tracing::info!(faces = faces.len(), "restoring faces");

        let mut restored: Vec<(RgbImage, AffineMatrix)> = Vec::with_capacity(faces.len());
        for face in &faces {
            let Some(landmarks) = face.landmarks.as_ref() else {
                continue;
            };
            let aligned = alignment::align_face(image, landmarks, &FFHQ_TEMPLATE_512, CODEFORMER_INPUT_SIZE);
            let crop = match self.codeformer.restore(&aligned.image, opts.fidelity) {
                Ok(crop) => crop,
                Err(e) => {
                    tracing::warn!(error = %e, "CodeFormer failed; keeping unrestored face");
                    aligned.image
                }
            };
            restored.push((crop, aligned.matrix));
        }

        let mut canvas = match (&mut self.upsampler, opts.background_enhance) {
            (Some(upsampler), true) => upsampler.enhance(image, opts.upscale)?,
            _ if opts.upscale > 1 => {
                imageops::resize(image, width * opts.upscale, height * opts.upscale, FilterType::Lanczos3)
            }
            _ => image.clone(),
        };

        for (crop, matrix) in restored {
            let (crop, crop_scale) = match (&mut self.upsampler, opts.face_upsample) {
                (Some(upsampler), true) => (upsampler.enhance(&crop, opts.upscale)?, opts.upscale),
                _ => (crop, 1),
            };
            let forward = rescale_affine(&matrix, opts.upscale as f32, crop_scale as f32);
            paste_back(&mut canvas, &crop, &forward, MaskProfile::RESTORE);
        }

        Ok(canvas)
    }
}

/// One tile: the core region written to the output and the padded region fed to the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TileRegion {
    x: u32,
    y: u32,
    w: u32,
    h: u32,
    px: u32,
    py: u32,
    pw: u32,
    ph: u32,
}

fn tile_regions(width: u32, height: u32, tile: u32, pad: u32) -> Vec<TileRegion> {
    let mut tiles = Vec::new();
    let mut y = 0;
    while y < height {
        let h = tile.min(height - y);
        let mut x = 0;
        while x < width {
            let w = tile.min(width - x);
            let px = x.saturating_sub(pad);
            let py = y.saturating_sub(pad);
            let pw = (x + w + pad).min(width) - px;
            let ph = (y + h + pad).min(height) - py;
            tiles.push(TileRegion { x, y, w, h, px, py, pw, ph });
            x += w;
        }
        y += h;
    }
    tiles
}

/// Copy the unpadded part of an upscaled tile (planar RGB in [0, 1]) into `canvas`.
fn stitch_tile(canvas: &mut RgbImage, tile: &TileRegion, data: &[f32], scale: u32) {
    let (plane_w, plane) = (tile.pw * scale, (tile.pw * scale * tile.ph * scale) as usize);

    for oy in 0..tile.h * scale {
        for ox in 0..tile.w * scale {
            let sx = (tile.x - tile.px) * scale + ox;
            let sy = (tile.y - tile.py) * scale + oy;
            let i = (sy * plane_w + sx) as usize;
            let px = [0, 1, 2].map(|c| (data[c * plane + i] * 255.0).round().clamp(0.0, 255.0) as u8);
            canvas.put_pixel(tile.x * scale + ox, tile.y * scale + oy, Rgb(px));
        }
    }
}

/// RGB → NCHW in [0, 1].
fn to_unit_blob(image: &RgbImage) -> Array4<f32> {
    let (w, h) = (image.width() as usize, image.height() as usize);
    let mut tensor = Array4::<f32>::zeros((1, 3, h, w));
    for (x, y, p) in image.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = p.0[c] as f32 / 255.0;
        }
    }
    tensor
}

/// RGB → NCHW in [-1, 1].
fn to_signed_blob(image: &RgbImage) -> Array4<f32> {
    to_unit_blob(image).mapv(|v| (v - 0.5) / 0.5)
}

/// NCHW in [-1, 1] → RGB.
fn from_signed_nchw(data: &[f32], width: u32, height: u32) -> Result<RgbImage, RestoreError> {
    let plane = (width * height) as usize;
    if data.len() != 3 * plane {
        return Err(RestoreError::InferenceFailed(format!(
            "expected 3×{height}×{width} output, got {} values",
            data.len()
        )));
    }
    Ok(RgbImage::from_fn(width, height, |x, y| {
        let i = (y * width + x) as usize;
        Rgb([0, 1, 2].map(|c| {
            let v = (data[c * plane + i].clamp(-1.0, 1.0) + 1.0) / 2.0;
            (v * 255.0).round() as u8
        }))
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(upscale: u32) -> RestoreOptions {
        RestoreOptions { background_enhance: true, face_upsample: true, upscale, fidelity: 0.5 }
    }

    #[test]
    fn test_effective_caps_upscale_at_four() {
        assert_eq!(opts(8).effective(400, 300).upscale, 4);
        assert_eq!(opts(0).effective(400, 300).upscale, 1);
    }

    #[test]
    fn test_effective_large_image_caps_at_two() {
        let e = opts(4).effective(1200, 800);
        assert_eq!(e.upscale, 2);
        assert!(e.background_enhance && e.face_upsample);
    }

    #[test]
    fn test_effective_huge_image_disables_upsampling() {
        let e = opts(3).effective(900, 1600);
        assert_eq!(e.upscale, 1);
        assert!(!e.background_enhance);
        assert!(!e.face_upsample);
    }

    #[test]
    fn test_effective_clamps_fidelity() {
        let mut o = opts(1);
        o.fidelity = 1.7;
        assert_eq!(o.effective(10, 10).fidelity, 1.0);
    }

    #[test]
    fn test_tile_regions_cover_image_once() {
        let (w, h) = (950u32, 420u32);
        let tiles = tile_regions(w, h, 400, 40);
        assert_eq!(tiles.len(), 3 * 2);
        let mut covered = vec![0u8; (w * h) as usize];
        for t in &tiles {
            assert!(t.px <= t.x && t.py <= t.y);
            assert!(t.px + t.pw <= w && t.py + t.ph <= h);
            assert!(t.x + t.w <= t.px + t.pw && t.y + t.h <= t.py + t.ph);
            for y in t.y..t.y + t.h {
                for x in t.x..t.x + t.w {
                    covered[(y * w + x) as usize] += 1;
                }
            }
        }
        assert!(covered.iter().all(|&c| c == 1));
    }

    #[test]
    fn test_tile_regions_padding() {
        let tiles = tile_regions(900, 100, 400, 40);
        assert_eq!(tiles[1], TileRegion { x: 400, y: 0, w: 400, h: 100, px: 360, py: 0, pw: 480, ph: 100 });
    }

    #[test]
    fn test_tile_regions_empty_image() {
        assert!(tile_regions(0, 0, 400, 40).is_empty());
    }

    /// Nearest-neighbour 2x of a padded tile, the shape Real-ESRGAN x2 returns.
    fn fake_x2(image: &RgbImage, tile: &TileRegion) -> Vec<f32> {
        let (w, h) = (tile.pw * 2, tile.ph * 2);
        let mut data = vec![0.0; (3 * w * h) as usize];
        for y in 0..h {
            for x in 0..w {
                let p = image.get_pixel(tile.px + x / 2, tile.py + y / 2).0;
                for c in 0..3 {
                    data[c * (w * h) as usize + (y * w + x) as usize] = p[c] as f32 / 255.0;
                }
            }
        }
        data
    }

    #[test]
    fn test_stitched_tiles_rebuild_upscaled_image() {
        let image = RgbImage::from_fn(23, 17, |x, y| Rgb([(x * 10) as u8, (y * 12) as u8, ((x + y) * 3) as u8]));
        let mut canvas = RgbImage::new(46, 34);

        for tile in tile_regions(23, 17, 8, 3) {
            let data = fake_x2(&image, &tile);
            stitch_tile(&mut canvas, &tile, &data, 2);
        }

        for (x, y, p) in canvas.enumerate_pixels() {
            assert_eq!(p.0, image.get_pixel(x / 2, y / 2).0, "pixel ({x}, {y})");
        }
    }

    #[test]
    fn test_signed_blob_roundtrip() {
        let mut img = RgbImage::new(3, 2);
        img.put_pixel(2, 1, Rgb([255, 0, 128]));
        let blob = to_signed_blob(&img);
        assert!((blob[[0, 0, 1, 2]] - 1.0).abs() < 1e-6);
        assert!((blob[[0, 1, 1, 2]] + 1.0).abs() < 1e-6);
        let flat: Vec<f32> = blob.iter().copied().collect();
        let back = from_signed_nchw(&flat, 3, 2).unwrap();
        assert_eq!(back.get_pixel(2, 1).0, [255, 0, 128]);
    }
}
