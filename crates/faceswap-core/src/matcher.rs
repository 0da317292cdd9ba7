//! Index matching: which source face replaces which target face.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum PlanError {
    #[error("no target faces to replace")]
    NoTargetFaces,
    #[error("no source faces found")]
    NoSourceFaces,
    #[error("unsupported face configuration: {sources} source images for {targets} target faces")]
    SourceCountMismatch { sources: usize, targets: usize },
    #[error("target index {index} out of range: target image has {targets} faces")]
    TargetIndexOutOfRange { index: usize, targets: usize },
    #[error("invalid target index {0}: use -1 for all faces or a zero-based index")]
    InvalidTargetIndex(i64),
}

/// Which target faces to replace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetSelection {
    All,
    Index(usize),
}

impl TryFrom<i64> for TargetSelection {
    type Error = PlanError;

    /// `-1` selects every face; any other negative value is rejected.
    fn try_from(value: i64) -> Result<Self, PlanError> {
        match value {
            -1 => Ok(TargetSelection::All),
            v if v >= 0 => Ok(TargetSelection::Index(v as usize)),
            v => Err(PlanError::InvalidTargetIndex(v)),
        }
    }
}

/// How source faces are supplied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceMode {
    /// One source image; its faces are indexed left to right.
    SingleImage,
    /// Several source images; image `i` supplies the face for target `i`.
    PerImage,
}

/// How a plan was derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStrategy {
    PerSourceImage,
    OneToAll,
    Pairwise,
    Single,
}

impl fmt::Display for PlanStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PlanStrategy::PerSourceImage => "replacing target faces left to right with one face per source image",
            PlanStrategy::OneToAll => "replacing all target faces with the same source face",
            PlanStrategy::Pairwise => "replacing target faces left to right with source faces in the same order",
            PlanStrategy::Single => "replacing one target face with the leftmost source face",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SwapPair {
    pub source: usize,
    pub target: usize,
}

/// Ordered swap steps for one invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SwapPlan {
    pub strategy: PlanStrategy,
    pub pairs: Vec<SwapPair>,
}

impl SwapPlan {
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, SwapPair> {
        self.pairs.iter()
    }
}

/// Compute the swap plan.
///
/// In [`SourceMode::PerImage`], `num_source_faces` is the number of source
/// images (each contributes its leftmost face) and the selection is ignored.
pub fn plan_swaps(
    num_source_faces: usize,
    num_target_faces: usize,
    mode: SourceMode,
    selection: TargetSelection,
) -> Result<SwapPlan, PlanError> {
    if num_target_faces == 0 {
        return Err(PlanError::NoTargetFaces);
    }
    if num_source_faces == 0 {
        return Err(PlanError::NoSourceFaces);
    }

    match (mode, selection) {
        (SourceMode::PerImage, _) => {
            if num_source_faces != num_target_faces {
                return Err(PlanError::SourceCountMismatch {
                    sources: num_source_faces,
                    targets: num_target_faces,
                });
            }
            Ok(SwapPlan {
                strategy: PlanStrategy::PerSourceImage,
                pairs: (0..num_target_faces).map(|i| SwapPair { source: i, target: i }).collect(),
            })
        }
        (SourceMode::SingleImage, TargetSelection::All) => {
            let one_source = num_source_faces == 1;
            let iterations = if one_source {
                num_target_faces
            } else {
                num_source_faces.min(num_target_faces)
            };
            Ok(SwapPlan {
                strategy: if one_source { PlanStrategy::OneToAll } else { PlanStrategy::Pairwise },
                pairs: (0..iterations)
                    .map(|i| SwapPair { source: if one_source { 0 } else { i }, target: i })
                    .collect(),
            })
        }
        (SourceMode::SingleImage, TargetSelection::Index(index)) => {
            if index >= num_target_faces {
                return Err(PlanError::TargetIndexOutOfRange { index, targets: num_target_faces });
            }
            Ok(SwapPlan {
                strategy: PlanStrategy::Single,
                pairs: vec![SwapPair { source: 0, target: index }],
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(plan: &SwapPlan) -> Vec<(usize, usize)> {
        plan.iter().map(|p| (p.source, p.target)).collect()
    }

    #[test]
    fn test_one_source_face_replaces_every_target() {
        let plan = plan_swaps(1, 4, SourceMode::SingleImage, TargetSelection::All).unwrap();
        assert_eq!(plan.strategy, PlanStrategy::OneToAll);
        assert_eq!(pairs(&plan), vec![(0, 0), (0, 1), (0, 2), (0, 3)]);
    }

    #[test]
    fn test_equal_counts_pair_by_position() {
        let plan = plan_swaps(3, 3, SourceMode::SingleImage, TargetSelection::All).unwrap();
        assert_eq!(plan.strategy, PlanStrategy::Pairwise);
        assert_eq!(pairs(&plan), vec![(0, 0), (1, 1), (2, 2)]);
    }

    #[test]
    fn test_fewer_source_faces_bounded_by_sources() {
        let plan = plan_swaps(2, 5, SourceMode::SingleImage, TargetSelection::All).unwrap();
        assert_eq!(pairs(&plan), vec![(0, 0), (1, 1)]);
    }

    #[test]
    fn test_fewer_target_faces_bounded_by_targets() {
        let plan = plan_swaps(4, 2, SourceMode::SingleImage, TargetSelection::All).unwrap();
        assert_eq!(pairs(&plan), vec![(0, 0), (1, 1)]);
    }

    #[test]
    fn test_explicit_index_single_pair() {
        let plan = plan_swaps(3, 5, SourceMode::SingleImage, TargetSelection::Index(2)).unwrap();
        assert_eq!(plan.strategy, PlanStrategy::Single);
        assert_eq!(pairs(&plan), vec![(0, 2)]);
    }

    #[test]
    fn test_explicit_index_out_of_range() {
        let err = plan_swaps(1, 2, SourceMode::SingleImage, TargetSelection::Index(2)).unwrap_err();
        assert_eq!(err, PlanError::TargetIndexOutOfRange { index: 2, targets: 2 });
    }

    #[test]
    fn test_per_image_pairs_image_with_target() {
        let plan = plan_swaps(3, 3, SourceMode::PerImage, TargetSelection::All).unwrap();
        assert_eq!(plan.strategy, PlanStrategy::PerSourceImage);
        assert_eq!(pairs(&plan), vec![(0, 0), (1, 1), (2, 2)]);
    }

    #[test]
    fn test_per_image_ignores_target_index() {
        let plan = plan_swaps(2, 2, SourceMode::PerImage, TargetSelection::Index(1)).unwrap();
        assert_eq!(pairs(&plan), vec![(0, 0), (1, 1)]);
    }

    #[test]
    fn test_per_image_count_mismatch_fails() {
        let err = plan_swaps(2, 3, SourceMode::PerImage, TargetSelection::All).unwrap_err();
        assert_eq!(err, PlanError::SourceCountMismatch { sources: 2, targets: 3 });
    }

    #[test]
    fn test_no_faces_fail() {
        assert_eq!(
            plan_swaps(1, 0, SourceMode::SingleImage, TargetSelection::All).unwrap_err(),
            PlanError::NoTargetFaces
        );
        assert_eq!(
            plan_swaps(0, 3, SourceMode::SingleImage, TargetSelection::All).unwrap_err(),
            PlanError::NoSourceFaces
        );
    }

    #[test]
    fn test_target_selection_from_cli_value() {
        assert_eq!(TargetSelection::try_from(-1), Ok(TargetSelection::All));
        assert_eq!(TargetSelection::try_from(0), Ok(TargetSelection::Index(0)));
        assert_eq!(TargetSelection::try_from(7), Ok(TargetSelection::Index(7)));
        assert_eq!(TargetSelection::try_from(-2), Err(PlanError::InvalidTargetIndex(-2)));
    }

    #[test]
    fn test_plan_serializes() {
        let plan = plan_swaps(1, 2, SourceMode::SingleImage, TargetSelection::All).unwrap();
        let json = serde_json::to_value(&plan).unwrap();
        assert_eq!(json["strategy"], "one_to_all");
        assert_eq!(json["pairs"][1]["source"], 0);
        assert_eq!(json["pairs"][1]["target"], 1);
    }
}
