//! The swap pipeline: locate faces, plan, apply swaps cumulatively.

use crate::locator::{FaceAnalysis, FaceLocator};
use crate::matcher::{plan_swaps, PlanError, SourceMode, SwapPlan, TargetSelection};
use crate::swapper::{FaceSwapModel, SwapperError};
use crate::types::{Face, FaceList};
use image::RgbImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("no source images given")]
    NoSourceImages,
    #[error("no target faces found")]
    NoTargetFaces,
    #[error("no source faces found in source image {0}")]
    NoSourceFaces(usize),
    #[error(transparent)]
    Plan(#[from] PlanError),
    #[error("swap step {step} (source face {source_index} → target face {target_index}) failed")]
    Swap {
        step: usize,
        source_index: usize,
        target_index: usize,
        #[source]
        error: SwapperError,
    },
}

/// Everything decided before any pixel changes.
#[derive(Debug, Clone)]
pub struct Prepared {
    pub mode: SourceMode,
    /// Indexed by `SwapPair::source`. In per-image mode, entry `i` is the
    /// leftmost face of source image `i`.
    pub source_faces: Vec<Face>,
    pub target_faces: FaceList,
    pub plan: SwapPlan,
}

/// Result of a full swap run.
#[derive(Debug)]
pub struct SwapOutcome {
    pub image: RgbImage,
    pub plan: SwapPlan,
}

/// Locate faces in the target and source images and compute the swap plan.
///
/// Per-image mode is chosen when the number of source images equals the
/// number of target faces, or when there is more than one source image (a
/// count mismatch then fails before any source image is analysed).
/// `target_index` is `-1` for every face or a left-to-right index; it is
/// only read, and validated, in single-image mode.
pub fn prepare<A: FaceAnalysis>(
    locator: &mut FaceLocator<A>,
    sources: &[RgbImage],
    target: &RgbImage,
    target_index: i64,
) -> Result<Prepared, PipelineError> {
    if sources.is_empty() {
        return Err(PipelineError::NoSourceImages);
    }

    let target_faces = locator.locate(target);
    if target_faces.is_empty() {
        return Err(PipelineError::NoTargetFaces);
    }

    let mode = if sources.len() == target_faces.len() || sources.len() > 1 {
        SourceMode::PerImage
    } else {
        SourceMode::SingleImage
    };

    let (source_faces, plan) = match mode {
        SourceMode::PerImage => {
            let plan = plan_swaps(sources.len(), target_faces.len(), mode, TargetSelection::All)?;
            let mut faces = Vec::with_capacity(sources.len());
            for (i, image) in sources.iter().enumerate() {
                let found = locator.locate(image);
                let face = found.first().ok_or(PipelineError::NoSourceFaces(i))?;
                tracing::debug!(image = i, faces = found.len(), "source image analysed");
                faces.push(face.clone());
            }
            (faces, plan)
        }
        SourceMode::SingleImage => {
            let found = locator.locate(&sources[0]);
            if found.is_empty() {
                return Err(PipelineError::NoSourceFaces(0));
            }
            let selection = TargetSelection::try_from(target_index)?;
            let plan = plan_swaps(found.len(), target_faces.len(), mode, selection)?;
            (found.into_inner(), plan)
        }
    };

    tracing::info!(
        source_faces = source_faces.len(),
        target_faces = target_faces.len(),
        swaps = plan.len(),
        "{}",
        plan.strategy
    );

    Ok(Prepared {
        mode,
        source_faces,
        target_faces,
        plan,
    })
}

/// Apply every planned swap in order; each step works on the previous step's output.
pub fn execute<S: FaceSwapModel>(
    swapper: &mut S,
    prepared: &Prepared,
    target: &RgbImage,
) -> Result<RgbImage, PipelineError> {
    let mut working = target.clone();

    for (step, pair) in prepared.plan.iter().enumerate() {
        let source = &prepared.source_faces[pair.source];
        let target_face = &prepared.target_faces[pair.target];
        tracing::debug!(
            step,
            source = pair.source,
            target = pair.target,
            target_x = target_face.bbox.x,
            similarity = source.embedding.similarity(&target_face.embedding),
            "swapping face"
        );

        working = swapper
            .swap(&working, target_face, source)
            .map_err(|error| PipelineError::Swap {
                step,
                source_index: pair.source,
                target_index: pair.target,
                error,
            })?;
    }

    Ok(working)
}

/// [`prepare`] then [`execute`].
pub fn swap_faces<A: FaceAnalysis, S: FaceSwapModel>(
    locator: &mut FaceLocator<A>,
    swapper: &mut S,
    sources: &[RgbImage],
    target: &RgbImage,
    target_index: i64,
) -> Result<SwapOutcome, PipelineError> {
    let prepared = prepare(locator, sources, target, target_index)?;
    let image = execute(swapper, &prepared, target)?;
    Ok(SwapOutcome {
        image,
        plan: prepared.plan,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locator::tests::ScriptedAnalyser;
    use crate::matcher::PlanStrategy;
    use crate::types::{BoundingBox, Embedding};
    use image::Rgb;

    /// A face whose identity is the single embedding value `id`.
    fn face(x: f32, id: f32) -> Face {
        Face {
            bbox: BoundingBox { x, y: 0.0, width: 10.0, height: 10.0, confidence: 0.9, landmarks: None },
            embedding: Embedding { values: vec![id], model_version: None },
        }
    }

    /// Records (source id, target x) per call and stamps the call count into pixel (0, 0).
    #[derive(Default)]
    struct RecordingSwapper {
        calls: Vec<(f32, f32)>,
        seen_stamps: Vec<u8>,
        fail_on: Option<usize>,
    }

    impl FaceSwapModel for RecordingSwapper {
        fn swap(&mut self, frame: &RgbImage, target: &Face, source: &Face) -> Result<RgbImage, SwapperError> {
            if self.fail_on == Some(self.calls.len()) {
                return Err(SwapperError::NoLandmarks);
            }
            self.seen_stamps.push(frame.get_pixel(0, 0).0[0]);
            self.calls.push((source.embedding.values[0], target.bbox.x));
            let mut out = frame.clone();
            out.put_pixel(0, 0, Rgb([self.calls.len() as u8, 0, 0]));
            Ok(out)
        }
    }

    fn image() -> RgbImage {
        RgbImage::new(8, 8)
    }

    fn locator(responses: Vec<Vec<Face>>) -> FaceLocator<ScriptedAnalyser> {
        FaceLocator::new(ScriptedAnalyser { responses: responses.into_iter().map(Ok).collect() })
    }

    #[test]
    fn test_single_source_face_replaces_all_targets_left_to_right() {
        // Target analysed first, then the source image.
        let mut loc = locator(vec![
            vec![face(300.0, 0.0), face(10.0, 0.0), face(120.0, 0.0)],
            vec![face(50.0, 7.0)],
        ]);
        let mut swapper = RecordingSwapper::default();
        let out = swap_faces(&mut loc, &mut swapper, &[image()], &image(), -1).unwrap();

        assert_eq!(out.plan.strategy, PlanStrategy::OneToAll);
        assert_eq!(swapper.calls, vec![(7.0, 10.0), (7.0, 120.0), (7.0, 300.0)]);
        assert_eq!(out.image.get_pixel(0, 0).0[0], 3);
    }

    #[test]
    fn test_swaps_are_cumulative() {
        let mut loc = locator(vec![vec![face(0.0, 0.0), face(1.0, 0.0)], vec![face(0.0, 1.0), face(5.0, 2.0)]]);
        let mut swapper = RecordingSwapper::default();
        swap_faces(&mut loc, &mut swapper, &[image()], &image(), -1).unwrap();
        // Second swap sees the first swap's output.
        assert_eq!(swapper.seen_stamps, vec![0, 1]);
        assert_eq!(swapper.calls, vec![(1.0, 0.0), (2.0, 1.0)]);
    }

    #[test]
    fn test_explicit_target_index() {
        let mut loc = locator(vec![
            vec![face(0.0, 0.0), face(100.0, 0.0), face(200.0, 0.0)],
            vec![face(80.0, 4.0), face(5.0, 3.0)],
        ]);
        let mut swapper = RecordingSwapper::default();
        swap_faces(&mut loc, &mut swapper, &[image()], &image(), 2).unwrap();
        // Leftmost source face (id 3) onto the third target face.
        assert_eq!(swapper.calls, vec![(3.0, 200.0)]);
    }

    #[test]
    fn test_per_image_uses_leftmost_face_of_each_source() {
        let mut loc = locator(vec![
            vec![face(0.0, 0.0), face(100.0, 0.0)],
            vec![face(40.0, 11.0), face(2.0, 10.0)],
            vec![face(9.0, 20.0)],
        ]);
        let mut swapper = RecordingSwapper::default();
        let prepared = prepare(&mut loc, &[image(), image()], &image(), -1).unwrap();
        assert_eq!(prepared.mode, SourceMode::PerImage);
        execute(&mut swapper, &prepared, &image()).unwrap();
        assert_eq!(swapper.calls, vec![(10.0, 0.0), (20.0, 100.0)]);
    }

    #[test]
    fn test_one_image_one_target_face_ignores_target_index() {
        let mut loc = locator(vec![vec![face(40.0, 0.0)], vec![face(90.0, 5.0), face(3.0, 6.0)]]);
        let mut swapper = RecordingSwapper::default();
        let prepared = prepare(&mut loc, &[image()], &image(), 1).unwrap();
        assert_eq!(prepared.mode, SourceMode::PerImage);
        assert_eq!(prepared.plan.strategy, PlanStrategy::PerSourceImage);
        execute(&mut swapper, &prepared, &image()).unwrap();
        assert_eq!(swapper.calls, vec![(6.0, 40.0)]);
    }

    #[test]
    fn test_per_image_accepts_any_target_index() {
        let mut loc = locator(vec![
            vec![face(0.0, 0.0), face(100.0, 0.0)],
            vec![face(1.0, 1.0)],
            vec![face(1.0, 2.0)],
        ]);
        let prepared = prepare(&mut loc, &[image(), image()], &image(), -7).unwrap();
        assert_eq!(prepared.plan.len(), 2);
    }

    #[test]
    fn test_single_image_rejects_invalid_target_index() {
        let mut loc = locator(vec![vec![face(0.0, 0.0), face(1.0, 0.0)], vec![face(0.0, 1.0)]]);
        let err = prepare(&mut loc, &[image()], &image(), -2).unwrap_err();
        assert!(matches!(err, PipelineError::Plan(PlanError::InvalidTargetIndex(-2))));
    }

    #[test]
    fn test_per_image_count_mismatch() {
        let mut loc = locator(vec![vec![face(0.0, 0.0), face(1.0, 0.0), face(2.0, 0.0)]]);
        let err = prepare(&mut loc, &[image(), image()], &image(), -1).unwrap_err();
        assert!(matches!(err, PipelineError::Plan(PlanError::SourceCountMismatch { sources: 2, targets: 3 })));
    }

    #[test]
    fn test_no_target_faces() {
        let mut loc = locator(vec![vec![], vec![face(0.0, 1.0)]]);
        let err = prepare(&mut loc, &[image()], &image(), -1).unwrap_err();
        assert!(matches!(err, PipelineError::NoTargetFaces));
    }

    #[test]
    fn test_no_source_faces() {
        let mut loc = locator(vec![vec![face(0.0, 0.0)], vec![]]);
        let err = prepare(&mut loc, &[image()], &image(), -1).unwrap_err();
        assert!(matches!(err, PipelineError::NoSourceFaces(0)));
    }

    #[test]
    fn test_missing_face_in_second_source_image() {
        let mut loc = locator(vec![vec![face(0.0, 0.0), face(1.0, 0.0)], vec![face(0.0, 1.0)], vec![]]);
        let err = prepare(&mut loc, &[image(), image()], &image(), -1).unwrap_err();
        assert!(matches!(err, PipelineError::NoSourceFaces(1)));
    }

    #[test]
    fn test_no_source_images() {
        let mut loc = locator(vec![]);
        let err = prepare(&mut loc, &[], &image(), -1).unwrap_err();
        assert!(matches!(err, PipelineError::NoSourceImages));
    }

    #[test]
    fn test_swap_failure_reports_step() {
        let mut loc = locator(vec![vec![face(0.0, 0.0), face(1.0, 0.0)], vec![face(0.0, 1.0)]]);
        let mut swapper = RecordingSwapper { fail_on: Some(1), ..Default::default() };
        let err = swap_faces(&mut loc, &mut swapper, &[image()], &image(), -1).unwrap_err();
        assert!(matches!(err, PipelineError::Swap { step: 1, source_index: 0, target_index: 1, .. }));
    }
}
