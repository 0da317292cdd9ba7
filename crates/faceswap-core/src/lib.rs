//! faceswap-core — Face swapping in still images.
//!
//! Uses SCRFD for face detection, ArcFace for identity embeddings, InSwapper
//! for the swap itself and CodeFormer / Real-ESRGAN for optional restoration,
//! all running via ONNX Runtime.

pub mod alignment;
pub mod detector;
pub mod locator;
pub mod matcher;
pub mod paste;
pub mod pipeline;
pub mod recognizer;
pub mod restoration;
pub mod swapper;
pub mod types;

pub use detector::FaceDetector;
pub use locator::{FaceAnalysis, FaceLocator, OnnxFaceAnalyser};
pub use matcher::{plan_swaps, SourceMode, SwapPair, SwapPlan, TargetSelection};
pub use pipeline::{execute, prepare, swap_faces, PipelineError, Prepared, SwapOutcome};
pub use recognizer::FaceRecognizer;
pub use restoration::{CodeFormer, RealEsrgan, RestoreOptions, Restorer};
pub use swapper::{FaceSwapModel, InSwapper};
pub use types::{BoundingBox, Embedding, Face, FaceList};

use std::path::PathBuf;

/// Model directory used when nothing else is configured.
pub fn default_model_dir() -> PathBuf {
    PathBuf::from("checkpoints")
}
