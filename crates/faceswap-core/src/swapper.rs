//! InSwapper face swap model via ONNX Runtime.
//!
//! Replaces the identity of an aligned 128×128 target crop with a source
//! identity given as an ArcFace embedding, then pastes the crop back.

use crate::alignment::{self, arcface_template};
use crate::paste::{paste_back, MaskProfile};
use crate::recognizer::l2_normalize;
use crate::types::{Embedding, Face};
use image::{Rgb, RgbImage};
use ndarray::{Array2, Array4};
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const INSWAPPER_INPUT_SIZE: usize = 128;
const INSWAPPER_STD: f32 = 255.0;
const EMAP_DIM: usize = 512;

#[derive(Error, Debug)]
pub enum SwapperError {
    #[error("model file not found: {0} — download inswapper_128.onnx and export its emap to emap.bin")]
    ModelNotFound(String),
    #[error("emap {path}: expected {expected} f32 values, got {actual} bytes")]
    InvalidEmap { path: String, expected: usize, actual: usize },
    #[error("reading emap: {0}")]
    Io(#[from] std::io::Error),
    #[error("face has no landmarks — cannot align target face")]
    NoLandmarks,
    #[error("source embedding has {0} dimensions, expected 512")]
    EmbeddingDim(usize),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// A model that paints the identity of `source` onto `target` within `frame`.
pub trait FaceSwapModel {
    /// Returns a new frame; `frame` itself is left untouched.
    fn swap(&mut self, frame: &RgbImage, target: &Face, source: &Face) -> Result<RgbImage, SwapperError>;
}

/// inswapper_128 with its embedding projection matrix.
pub struct InSwapper {
    session: Session,
    /// Row-major 512×512 projection from ArcFace space to the swapper latent.
    emap: Array2<f32>,
}

impl InSwapper {
    /// Load the swap model and its `emap` (raw little-endian f32, 512×512).
    pub fn load(model_path: &Path, emap_path: &Path, intra_threads: usize) -> Result<Self, SwapperError> {
        for path in [model_path, emap_path] {
            if !path.exists() {
                return Err(SwapperError::ModelNotFound(path.display().to_string()));
            }
        }

        let emap = load_emap(emap_path)?;

        let session = Session::builder()?
            .with_intra_threads(intra_threads).map_err(ort::Error::from)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            emap = %emap_path.display(),
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded InSwapper model"
        );

        Ok(Self { session, emap })
    }

    /// Project a normalized identity embedding into the swapper latent.
    fn latent(&self, embedding: &Embedding) -> Result<Array2<f32>, SwapperError> {
        project_latent(&self.emap, embedding)
    }
}

impl FaceSwapModel for InSwapper {
    fn swap(&mut self, frame: &RgbImage, target: &Face, source: &Face) -> Result<RgbImage, SwapperError> {
        let landmarks = target.bbox.landmarks.as_ref().ok_or(SwapperError::NoLandmarks)?;
        let template = arcface_template(INSWAPPER_INPUT_SIZE as u32);
        let aligned = alignment::align_face(frame, landmarks, &template, INSWAPPER_INPUT_SIZE as u32);

        let blob = to_blob(&aligned.image);
        let latent = self.latent(&source.embedding)?;

        let outputs = self.session.run(ort::inputs![
            "target" => TensorRef::from_array_view(blob.view())?,
            "source" => TensorRef::from_array_view(latent.view())?,
        ])?;

        let (_, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| SwapperError::InferenceFailed(format!("swap output: {e}")))?;
        let generated = from_nchw(data, INSWAPPER_INPUT_SIZE as u32)?;

        let mut result = frame.clone();
        paste_back(&mut result, &generated, &aligned.matrix, MaskProfile::SWAP);
        Ok(result)
    }
}

fn load_emap(path: &Path) -> Result<Array2<f32>, SwapperError> {
    let bytes = std::fs::read(path)?;
    let expected = EMAP_DIM * EMAP_DIM;
    if bytes.len() != expected * 4 {
        return Err(SwapperError::InvalidEmap {
            path: path.display().to_string(),
            expected,
            actual: bytes.len(),
        });
    }
    let values: Vec<f32> = bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    Array2::from_shape_vec((EMAP_DIM, EMAP_DIM), values)
        .map_err(|e| SwapperError::InferenceFailed(format!("emap shape: {e}")))
}

/// `normalize(embedding · emap)` as a 1×N row.
fn project_latent(emap: &Array2<f32>, embedding: &Embedding) -> Result<Array2<f32>, SwapperError> {
    let dim = emap.nrows();
    if embedding.values.len() != dim {
        return Err(SwapperError::EmbeddingDim(embedding.values.len()));
    }
    let row = ndarray::ArrayView1::from(&embedding.values[..]);
    let projected = row.dot(emap).to_vec();
    let cols = projected.len();
    Array2::from_shape_vec((1, cols), l2_normalize(projected))
        .map_err(|e| SwapperError::InferenceFailed(format!("latent shape: {e}")))
}

/// RGB crop → NCHW tensor scaled to [0, 1].
fn to_blob(crop: &RgbImage) -> Array4<f32> {
    let (w, h) = (crop.width() as usize, crop.height() as usize);
    let mut tensor = Array4::<f32>::zeros((1, 3, h, w));
    for (x, y, pixel) in crop.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = pixel.0[c] as f32 / INSWAPPER_STD;
        }
    }
    tensor
}

/// NCHW tensor in [0, 1] → square RGB image of edge `size`.
fn from_nchw(data: &[f32], size: u32) -> Result<RgbImage, SwapperError> {
    let plane = (size * size) as usize;
    if data.len() != 3 * plane {
        return Err(SwapperError::InferenceFailed(format!(
            "expected 3×{size}×{size} output, got {} values",
            data.len()
        )));
    }
    Ok(RgbImage::from_fn(size, size, |x, y| {
        let i = (y * size + x) as usize;
        Rgb([0, 1, 2].map(|c| (data[c * plane + i] * 255.0).round().clamp(0.0, 255.0) as u8))
    }))
}
