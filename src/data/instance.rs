//! Assembly of parsed blocks into training and inference instances

use std::io::BufRead;

use ndarray::Array2;
use tracing::debug;

use super::protocol::{BlockKind, RawBlock, Section, StreamParser};
use crate::error::{Error, Result};

/// Paired height and vegetation rasters of equal shape
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingInstance {
    heights: Array2<f32>,
    plants: Array2<f32>,
}

impl TrainingInstance {
    /// Build an instance, rejecting rasters of different shape
    pub fn new(heights: Array2<f32>, plants: Array2<f32>) -> Result<Self> {
        if heights.shape() != plants.shape() {
            return Err(Error::shape(format!(
                "heights {:?} and plants {:?} differ in shape",
                heights.shape(),
                plants.shape()
            )));
        }
        Ok(Self { heights, plants })
    }

    /// Terrain height raster (generator input)
    pub fn heights(&self) -> &Array2<f32> {
        &self.heights
    }

    /// Vegetation density raster (generator target)
    pub fn plants(&self) -> &Array2<f32> {
        &self.plants
    }

    /// Raster shape as (rows, cols)
    pub fn dim(&self) -> (usize, usize) {
        self.heights.dim()
    }
}

/// Height raster awaiting a predicted vegetation map
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceInstance {
    heights: Array2<f32>,
}

impl InferenceInstance {
    pub fn new(heights: Array2<f32>) -> Self {
        Self { heights }
    }

    pub fn heights(&self) -> &Array2<f32> {
        &self.heights
    }

    pub fn dim(&self) -> (usize, usize) {
        self.heights.dim()
    }
}

impl From<TrainingInstance> for InferenceInstance {
    fn from(instance: TrainingInstance) -> Self {
        Self::new(instance.heights)
    }
}

/// Sections collected from one block, before presence is checked
#[derive(Debug, Clone, Default)]
pub struct PartialInstance {
    pub heights: Option<Array2<f32>>,
    pub plants: Option<Array2<f32>>,
    line: usize,
}

impl PartialInstance {
    /// Fold a block's sections in stream order.
    ///
    /// A repeated header overwrites the earlier section (last write wins).
    pub fn from_block(block: &RawBlock) -> Self {
        let mut partial = Self {
            line: block.line,
            ..Self::default()
        };
        for (section, raster) in &block.sections {
            let slot = match section {
                Section::Heights => &mut partial.heights,
                Section::Plants => &mut partial.plants,
            };
            if slot.is_some() {
                debug!(
                    "block at line {} repeats `{}`, keeping the later section",
                    block.line,
                    section.header()
                );
            }
            *slot = Some(raster.clone());
        }
        partial
    }

    /// Require both sections
    pub fn into_training(self) -> Result<TrainingInstance> {
        let heights = self.heights.ok_or(Error::MissingSection {
            section: Section::Heights.header(),
            line: self.line,
        })?;
        let plants = self.plants.ok_or(Error::MissingSection {
            section: Section::Plants.header(),
            line: self.line,
        })?;
        TrainingInstance::new(heights, plants)
    }

    /// Require the heights section; plants, if present, are ignored
    pub fn into_inference(self) -> Result<InferenceInstance> {
        let heights = self.heights.ok_or(Error::MissingSection {
            section: Section::Heights.header(),
            line: self.line,
        })?;
        Ok(InferenceInstance::new(heights))
    }
}

/// Assemble every training block of a parsed request
pub fn assemble_training(blocks: &[RawBlock]) -> Result<Vec<TrainingInstance>> {
    blocks
        .iter()
        .filter(|block| keep(block, BlockKind::Training))
        .map(|block| PartialInstance::from_block(block).into_training())
        .collect()
}

/// Assemble every inference block of a parsed request
pub fn assemble_inference(blocks: &[RawBlock]) -> Result<Vec<InferenceInstance>> {
    blocks
        .iter()
        .filter(|block| keep(block, BlockKind::Inference))
        .map(|block| PartialInstance::from_block(block).into_inference())
        .collect()
}

fn keep(block: &RawBlock, kind: BlockKind) -> bool {
    if block.kind != kind {
        debug!("skipping {:?} block at line {}", block.kind, block.line);
        return false;
    }
    true
}

/// Read one request and keep its training instances
pub fn collect_training_instances<R: BufRead>(
    parser: &mut StreamParser<R>,
) -> Result<Vec<TrainingInstance>> {
    let blocks = parser.read_request()?;
    assemble_training(&blocks)
}

/// Read one request and keep its inference instances
pub fn collect_inference_instances<R: BufRead>(
    parser: &mut StreamParser<R>,
) -> Result<Vec<InferenceInstance>> {
    let blocks = parser.read_request()?;
    assemble_inference(&blocks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn block(kind: BlockKind, sections: Vec<(Section, Array2<f32>)>) -> RawBlock {
        RawBlock {
            kind,
            line: 1,
            sections,
        }
    }

    #[test]
    fn test_training_requires_both_sections() {
        let raw = block(BlockKind::Training, vec![(Section::Heights, array![[0.0, 1.0]])]);
        let err = PartialInstance::from_block(&raw).into_training().unwrap_err();
        assert!(matches!(err, Error::MissingSection { section: "plants", .. }));
    }

    #[test]
    fn test_section_order_is_irrelevant() {
        let raw = block(
            BlockKind::Training,
            vec![
                (Section::Plants, array![[1.0, 1.0]]),
                (Section::Heights, array![[0.0, 2.0]]),
            ],
        );
        let instance = PartialInstance::from_block(&raw).into_training().unwrap();
        assert_eq!(instance.heights(), &array![[0.0f32, 2.0]]);
        assert_eq!(instance.plants(), &array![[1.0f32, 1.0]]);
    }

    #[test]
    fn test_duplicate_section_last_wins() {
        let raw = block(
            BlockKind::Training,
            vec![
                (Section::Heights, array![[1.0]]),
                (Section::Plants, array![[5.0]]),
                (Section::Heights, array![[9.0]]),
            ],
        );
        let instance = PartialInstance::from_block(&raw).into_training().unwrap();
        assert_eq!(instance.heights()[[0, 0]], 9.0);
    }

    #[test]
    fn test_mismatched_shapes_rejected() {
        let raw = block(
            BlockKind::Training,
            vec![
                (Section::Heights, array![[1.0, 2.0]]),
                (Section::Plants, array![[1.0], [2.0]]),
            ],
        );
        let err = PartialInstance::from_block(&raw).into_training().unwrap_err();
        assert!(matches!(err, Error::Shape(_)));
    }

    #[test]
    fn test_inference_needs_only_heights() {
        let raw = block(BlockKind::Inference, vec![(Section::Heights, array![[3.0]])]);
        let instance = PartialInstance::from_block(&raw).into_inference().unwrap();
        assert_eq!(instance.dim(), (1, 1));
    }

    #[test]
    fn test_assembly_filters_by_kind() {
        let blocks = vec![
            block(BlockKind::Inference, vec![(Section::Heights, array![[1.0]])]),
            block(
                BlockKind::Training,
                vec![(Section::Heights, array![[2.0]]), (Section::Plants, array![[3.0]])],
            ),
        ];
        assert_eq!(assemble_training(&blocks).unwrap().len(), 1);
        assert_eq!(assemble_inference(&blocks).unwrap().len(), 1);
    }

    #[test]
    fn test_one_bad_block_rejects_the_request() {
        let blocks = vec![
            block(
                BlockKind::Training,
                vec![(Section::Heights, array![[2.0]]), (Section::Plants, array![[3.0]])],
            ),
            block(BlockKind::Training, vec![(Section::Plants, array![[3.0]])]),
        ];
        assert!(assemble_training(&blocks).is_err());
    }
}
