//! Path classification.
//!
//! Entity type, developmental stage and timepoint are recovered from ancestor
//! path segments rather than a fixed depth. Each tag is scanned for
//! independently, in path order, so a file that has no timepoint (promoter
//! and stage CSVs) still classifies by type.

use std::path::{Component, Path};
use thiserror::Error;

use crate::models::{DevStage, EntityType, Timepoint};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClassifyError {
    #[error("entity type not found in path: {0}")]
    EntityTypeNotFound(String),
    #[error("developmental stage not found in path: {0}")]
    DevStageNotFound(String),
    #[error("timepoint not found in path: {0}")]
    TimepointNotFound(String),
}

/// Everything the classifier could recover from one path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub entity_type: Option<EntityType>,
    pub dev_stage: Option<DevStage>,
    pub timepoint: Option<Timepoint>,
}

fn segments(path: &Path) -> impl Iterator<Item = &str> {
    path.components().filter_map(|c| match c {
        Component::Normal(s) => s.to_str(),
        _ => None,
    })
}

pub fn entity_type(path: &Path) -> Result<EntityType, ClassifyError> {
    segments(path)
        .find_map(EntityType::from_segment)
        .ok_or_else(|| ClassifyError::EntityTypeNotFound(path.display().to_string()))
}

pub fn dev_stage(path: &Path) -> Result<DevStage, ClassifyError> {
    segments(path)
        .find_map(DevStage::from_segment)
        .ok_or_else(|| ClassifyError::DevStageNotFound(path.display().to_string()))
}

/// First segment that parses as a non-negative integer.
pub fn timepoint(path: &Path) -> Result<Timepoint, ClassifyError> {
    segments(path)
        .find_map(|s| s.parse::<u32>().ok())
        .map(Timepoint::from)
        .ok_or_else(|| ClassifyError::TimepointNotFound(path.display().to_string()))
}

pub fn classify(path: &Path) -> Classification {
    Classification {
        entity_type: entity_type(path).ok(),
        dev_stage: dev_stage(path).ok(),
        timepoint: timepoint(path).ok(),
    }
}

/// Case-insensitive extension check. Accepted extensions may be given with or
/// without the leading dot.
pub fn has_extension(path: &Path, extensions: &[String]) -> bool {
    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
        return false;
    };
    extensions
        .iter()
        .any(|accepted| accepted.trim_start_matches('.').eq_ignore_ascii_case(ext))
}
