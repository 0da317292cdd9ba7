//! Face location: detection + identity embedding, ordered left to right.

use crate::detector::{DetectorError, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::{BoundingBox, Embedding, Face, FaceList};
use image::RgbImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
}

/// Anything that can find faces in an image and describe who they are.
pub trait FaceAnalysis {
    fn analyse(&mut self, image: &RgbImage) -> Result<Vec<Face>, AnalysisError>;
}

/// SCRFD detection followed by ArcFace embedding for every detected face.
pub struct OnnxFaceAnalyser {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl OnnxFaceAnalyser {
    pub fn new(detector: FaceDetector, recognizer: FaceRecognizer) -> Self {
        Self { detector, recognizer }
    }

    /// The underlying detector, shared with the restoration stage.
    pub fn detector_mut(&mut self) -> &mut FaceDetector {
        &mut self.detector
    }
}

impl FaceAnalysis for OnnxFaceAnalyser {
    fn analyse(&mut self, image: &RgbImage) -> Result<Vec<Face>, AnalysisError> {
        let boxes = self.detector.detect(image)?;
        let recognizer = &mut self.recognizer;
        Ok(embed_faces(boxes, |bbox| recognizer.extract(image, bbox)))
    }
}

/// Attach an embedding to every box. Boxes without landmarks, or whose
/// embedding fails, are skipped with a warning; the rest are kept.
fn embed_faces<F>(boxes: Vec<BoundingBox>, mut extract: F) -> Vec<Face>
where
    F: FnMut(&BoundingBox) -> Result<Embedding, RecognizerError>,
{
    let mut faces = Vec::with_capacity(boxes.len());

    for bbox in boxes {
        if bbox.landmarks.is_none() {
            tracing::warn!(x = bbox.x, y = bbox.y, "face without landmarks skipped");
            continue;
        }
        match extract(&bbox) {
            Ok(embedding) => faces.push(Face { bbox, embedding }),
            Err(e) => tracing::warn!(x = bbox.x, y = bbox.y, error = %e, "embedding failed; face skipped"),
        }
    }

    faces
}

/// Wraps an analyser and returns its faces as a left-to-right [`FaceList`].
pub struct FaceLocator<A> {
    analyser: A,
}

impl<A: FaceAnalysis> FaceLocator<A> {
    pub fn new(analyser: A) -> Self {
        Self { analyser }
    }

    /// Locate faces, ordered by ascending bounding-box left edge.
    ///
    /// Analysis failures are logged and reported as "no faces".
    pub fn locate(&mut self, image: &RgbImage) -> FaceList {
        match self.analyser.analyse(image) {
            Ok(faces) => FaceList::new(faces),
            Err(e) => {
                tracing::warn!(error = %e, "face analysis failed; treating image as faceless");
                FaceList::default()
            }
        }
    }

    pub fn analyser_mut(&mut self) -> &mut A {
        &mut self.analyser
    }
}
