use serde::{Deserialize, Serialize};
use std::ops::Index;

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl BoundingBox {
    /// Distance between the two eye landmarks, if landmarks are present.
    pub fn eye_distance(&self) -> Option<f32> {
        self.landmarks.map(|lms| {
            let (lx, ly) = lms[0];
            let (rx, ry) = lms[1];
            ((rx - lx).powi(2) + (ry - ly).powi(2)).sqrt()
        })
    }
}

/// Face embedding vector (512-dimensional for ArcFace w600k_r50).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Embedding {
    /// Compute cosine similarity between two embeddings.
    ///
    /// Returns a value in [-1, 1]. Higher = more similar.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 { dot / denom } else { 0.0 }
    }
}

/// A detected face: where it is and who it is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Face {
    pub bbox: BoundingBox,
    pub embedding: Embedding,
}

/// Faces of one image, ordered left to right by bounding-box x.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FaceList(Vec<Face>);

impl FaceList {
    /// Order faces by ascending left edge. The sort is stable: faces sharing
    /// an x coordinate keep the order the detector reported them in.
    pub fn new(mut faces: Vec<Face>) -> Self {
        faces.sort_by(|a, b| a.bbox.x.total_cmp(&b.bbox.x));
        Self(faces)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Face> {
        self.0.get(index)
    }

    /// Leftmost face.
    pub fn first(&self) -> Option<&Face> {
        self.0.first()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Face> {
        self.0.iter()
    }

    pub fn into_inner(self) -> Vec<Face> {
        self.0
    }
}

impl Index<usize> for FaceList {
    type Output = Face;

    fn index(&self, index: usize) -> &Face {
        &self.0[index]
    }
}

impl FromIterator<Face> for FaceList {
    fn from_iter<I: IntoIterator<Item = Face>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a FaceList {
    type Item = &'a Face;
    type IntoIter = std::slice::Iter<'a, Face>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
