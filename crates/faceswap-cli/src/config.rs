use std::path::{Path, PathBuf};

/// Model and runtime configuration, loaded from environment variables.
pub struct Config {
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Square SCRFD input edge; must be a multiple of 32.
    pub det_size: usize,
    /// ONNX Runtime intra-op threads per session.
    pub intra_threads: usize,
}

impl Config {
    /// Load configuration from `FACESWAP_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let model_dir = std::env::var("FACESWAP_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| faceswap_core::default_model_dir());

        Self {
            model_dir,
            det_size: env_usize("FACESWAP_DET_SIZE", faceswap_core::detector::SCRFD_DEFAULT_INPUT_SIZE),
            intra_threads: env_usize("FACESWAP_INTRA_THREADS", 4),
        }
    }

    /// Replace the model directory when one was given on the command line.
    pub fn with_model_dir(mut self, model_dir: Option<PathBuf>) -> Self {
        if let Some(dir) = model_dir {
            self.model_dir = dir;
        }
        self
    }

    /// Path to the SCRFD detection model.
    pub fn scrfd_model_path(&self) -> PathBuf {
        self.model_file("det_10g.onnx")
    }

    /// Path to the ArcFace recognition model.
    pub fn arcface_model_path(&self) -> PathBuf {
        self.model_file("w600k_r50.onnx")
    }

    pub fn inswapper_model_path(&self) -> PathBuf {
        self.model_file("inswapper_128.onnx")
    }

    /// InSwapper embedding projection, raw little-endian f32.
    pub fn emap_path(&self) -> PathBuf {
        self.model_file("emap.bin")
    }

    pub fn codeformer_model_path(&self) -> PathBuf {
        self.model_file("codeformer.onnx")
    }

    pub fn realesrgan_model_path(&self) -> PathBuf {
        self.model_file("realesrgan_x2plus.onnx")
    }

    fn model_file(&self, name: impl AsRef<Path>) -> PathBuf {
        self.model_dir.join(name)
    }
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
