use anyhow::{Context, Result};
use clap::Parser;
use faceswap_core::{
    CodeFormer, FaceDetector, FaceLocator, FaceRecognizer, InSwapper, OnnxFaceAnalyser, RealEsrgan,
    RestoreOptions, Restorer,
};
use image::RgbImage;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "faceswap", about = "Swap faces in a still image")]
struct Cli {
    /// Source image path; several images are separated by ';' (img1;img2;img3)
    #[arg(long = "source_img")]
    source_img: String,
    /// Target image path
    #[arg(long = "target_img")]
    target_img: PathBuf,
    /// Output image path
    #[arg(long = "output_img", default_value = "result.png")]
    output_img: PathBuf,
    /// Face to replace in the target, left to right from 0; -1 replaces every face
    #[arg(long = "target_index", default_value_t = -1, allow_negative_numbers = true)]
    target_index: i64,
    /// Run CodeFormer face restoration on the result
    #[arg(long = "face_restore")]
    face_restore: bool,
    /// Enhance the background with Real-ESRGAN (with --face_restore)
    #[arg(long = "background_enhance")]
    background_enhance: bool,
    /// Upsample restored faces with Real-ESRGAN (with --face_restore)
    #[arg(long = "face_upsample")]
    face_upsample: bool,
    /// Output upscale factor, up to 4 (with --face_restore)
    #[arg(long = "upscale", default_value_t = 1)]
    upscale: u32,
    /// CodeFormer fidelity in [0, 1]
    #[arg(long = "codeformer_fidelity", default_value_t = 0.5, value_parser = parse_fidelity)]
    codeformer_fidelity: f32,
    /// Directory with the ONNX models (overrides FACESWAP_MODEL_DIR)
    #[arg(long = "model_dir")]
    model_dir: Option<PathBuf>,
    /// Detect faces and print the swap plan as JSON without swapping
    #[arg(long = "dry_run")]
    dry_run: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::from_env().with_model_dir(cli.model_dir.clone());
    run(&cli, &config)
}

fn run(cli: &Cli, config: &Config) -> Result<()> {
    let source_paths = split_source_paths(&cli.source_img);
    tracing::info!(sources = ?source_paths, target = %cli.target_img.display(), "loading images");

    let sources = source_paths
        .iter()
        .map(|p| load_rgb(p))
        .collect::<Result<Vec<_>>>()?;
    let target = load_rgb(&cli.target_img)?;

    let detector = FaceDetector::load(&config.scrfd_model_path(), config.det_size, config.intra_threads)?;
    let recognizer = FaceRecognizer::load(&config.arcface_model_path(), config.intra_threads)?;
    let mut locator = FaceLocator::new(OnnxFaceAnalyser::new(detector, recognizer));

    let prepared = faceswap_core::prepare(&mut locator, &sources, &target, cli.target_index)?;

    if cli.dry_run {
        let report = serde_json::json!({
            "mode": prepared.mode,
            "plan": prepared.plan,
            "target_faces": prepared.target_faces.iter().map(|f| &f.bbox).collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let mut swapper = InSwapper::load(
        &config.inswapper_model_path(),
        &config.emap_path(),
        config.intra_threads,
    )?;
    let mut result = faceswap_core::execute(&mut swapper, &prepared, &target)?;

    if cli.face_restore {
        let options = RestoreOptions {
            background_enhance: cli.background_enhance,
            face_upsample: cli.face_upsample,
            upscale: cli.upscale,
            fidelity: cli.codeformer_fidelity,
        };
        let codeformer = CodeFormer::load(&config.codeformer_model_path(), config.intra_threads)?;
        let upsampler = if options.background_enhance || options.face_upsample {
            Some(RealEsrgan::load(&config.realesrgan_model_path(), config.intra_threads)?)
        } else {
            None
        };
        let mut restorer = Restorer::new(codeformer, upsampler);
        result = restorer.restore(locator.analyser_mut().detector_mut(), &result, &options)?;
    }

    result
        .save(&cli.output_img)
        .with_context(|| format!("saving {}", cli.output_img.display()))?;
    println!("Result saved successfully: {}", cli.output_img.display());

    Ok(())
}

/// Split the `--source_img` value on ';', dropping empty entries.
fn split_source_paths(value: &str) -> Vec<PathBuf> {
    value
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .collect()
}

fn load_rgb(path: &Path) -> Result<RgbImage> {
    Ok(image::open(path)
        .with_context(|| format!("opening {}", path.display()))?
        .to_rgb8())
}

fn parse_fidelity(value: &str) -> Result<f32, String> {
    let w: f32 = value.parse().map_err(|e| format!("{e}"))?;
    if (0.0..=1.0).contains(&w) {
        Ok(w)
    } else {
        Err(format!("fidelity {w} is outside [0, 1]"))
    }
}
