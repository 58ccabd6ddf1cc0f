//! Core data models used throughout NeuroSCAN ingestion.
//!
//! These types represent the entity vocabulary recovered from the ingestion
//! tree and the records handed to the store. Dependent records (contacts,
//! synapses, cphate nodes) carry the store ids of the neurons they reference,
//! resolved at parse time.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Developmental time marker. Always non-negative; stored as SQLite INTEGER.
pub type Timepoint = i64;

/// Entity type vocabulary, matched against path segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityType {
    Neurons,
    Contacts,
    Synapses,
    Cphate,
    NerveRing,
    Scale,
    Promoters,
    DevStages,
    Meta,
}

impl EntityType {
    pub const ALL: [EntityType; 9] = [
        EntityType::Neurons,
        EntityType::Contacts,
        EntityType::Synapses,
        EntityType::Cphate,
        EntityType::NerveRing,
        EntityType::Scale,
        EntityType::Promoters,
        EntityType::DevStages,
        EntityType::Meta,
    ];

    /// The exact directory name that tags this entity type.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Neurons => "neurons",
            EntityType::Contacts => "contacts",
            EntityType::Synapses => "synapses",
            EntityType::Cphate => "cphate",
            EntityType::NerveRing => "nerveRing",
            EntityType::Scale => "scale",
            EntityType::Promoters => "promoters",
            EntityType::DevStages => "dev_stages",
            EntityType::Meta => "meta",
        }
    }

    pub fn from_segment(segment: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == segment)
    }

    /// Tabular types are read as whole CSV files, one queue item per file.
    pub fn is_tabular(&self) -> bool {
        matches!(
            self,
            EntityType::Promoters | EntityType::DevStages | EntityType::Meta
        )
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntityType::from_segment(s).ok_or_else(|| {
            let valid: Vec<&str> = EntityType::ALL.iter().map(|t| t.as_str()).collect();
            format!(
                "unknown entity type '{}'. Valid types: {}",
                s,
                valid.join(", ")
            )
        })
    }
}

/// Named larval/adult stage bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DevStage {
    L1,
    L2,
    L3,
    L4,
    Adult,
}

impl DevStage {
    pub const ALL: [DevStage; 5] = [
        DevStage::L1,
        DevStage::L2,
        DevStage::L3,
        DevStage::L4,
        DevStage::Adult,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DevStage::L1 => "L1",
            DevStage::L2 => "L2",
            DevStage::L3 => "L3",
            DevStage::L4 => "L4",
            DevStage::Adult => "Adult",
        }
    }

    pub fn from_segment(segment: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.as_str() == segment)
    }
}

impl fmt::Display for DevStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// RGBA base colour of a scene file's first material.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Color(pub [f64; 4]);

impl Color {
    /// glTF default for a material without a base colour factor.
    pub const WHITE: Color = Color([1.0, 1.0, 1.0, 1.0]);

    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.0).unwrap_or_else(|_| "[1,1,1,1]".to_string())
    }

    pub fn from_json(s: &str) -> Option<Color> {
        serde_json::from_str::<[f64; 4]>(s).ok().map(Color)
    }
}

/// Neuron record built from one scene node.
#[derive(Debug, Clone, PartialEq)]
pub struct Neuron {
    pub uid: String,
    pub timepoint: Timepoint,
    pub filename: String,
    pub file_hash: String,
    pub dev_stage: DevStage,
    pub color: Color,
}

/// Contact between two neurons, both sides resolved to neuron ids.
#[derive(Debug, Clone, PartialEq)]
pub struct Contact {
    pub uid: String,
    pub timepoint: Timepoint,
    pub filename: String,
    pub file_hash: String,
    pub dev_stage: DevStage,
    pub color: Color,
    pub neuron_before_id: i64,
    pub neuron_after_id: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SynapseType {
    Chemical,
    Electrical,
    Undefined,
}

impl SynapseType {
    /// Marker order is the match order: the first marker found wins.
    pub const MARKERS: [SynapseType; 3] = [
        SynapseType::Chemical,
        SynapseType::Electrical,
        SynapseType::Undefined,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SynapseType::Chemical => "chemical",
            SynapseType::Electrical => "electrical",
            SynapseType::Undefined => "undefined",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SynapsePosition {
    Pre,
    Post,
}

impl SynapsePosition {
    pub fn as_str(&self) -> &'static str {
        match self {
            SynapsePosition::Pre => "pre",
            SynapsePosition::Post => "post",
        }
    }
}

/// Synapse with its pre-neuron and ordered post-neurons resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct Synapse {
    pub uid: String,
    pub timepoint: Timepoint,
    pub synapse_type: SynapseType,
    pub section: Option<String>,
    pub position: Option<SynapsePosition>,
    pub site: u32,
    pub filename: String,
    pub file_hash: String,
    pub dev_stage: DevStage,
    pub color: Color,
    pub pre_neuron_id: i64,
    pub post_neuron_ids: Vec<i64>,
}

/// Singleton-per-timepoint scene entities sharing one shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LandmarkKind {
    NerveRing,
    Scale,
}

impl LandmarkKind {
    pub fn table(&self) -> &'static str {
        match self {
            LandmarkKind::NerveRing => "nerve_rings",
            LandmarkKind::Scale => "scales",
        }
    }

    pub fn entity_type(&self) -> EntityType {
        match self {
            LandmarkKind::NerveRing => EntityType::NerveRing,
            LandmarkKind::Scale => EntityType::Scale,
        }
    }
}

/// A nerve ring or scale bar record.
#[derive(Debug, Clone, PartialEq)]
pub struct Landmark {
    pub kind: LandmarkKind,
    pub uid: String,
    pub timepoint: Timepoint,
    pub filename: String,
    pub file_hash: String,
    pub dev_stage: DevStage,
    pub color: Color,
}

/// One node of a cphate clustering tree.
#[derive(Debug, Clone, PartialEq)]
pub struct CphateNode {
    pub uid: String,
    pub filename: String,
    pub color: Color,
    pub cluster: u32,
    pub cluster_count: u32,
    pub iteration: u32,
    pub iteration_count: u32,
    pub serial: u32,
    /// Member neuron ids, in the order the node name lists them.
    pub neuron_ids: Vec<i64>,
}

/// Hierarchical clustering artifact keyed by timepoint.
#[derive(Debug, Clone, PartialEq)]
pub struct Cphate {
    pub uid: String,
    pub timepoint: Timepoint,
    pub dev_stage: Option<DevStage>,
    pub nodes: Vec<CphateNode>,
}

impl Cphate {
    pub fn uid_for(timepoint: Timepoint) -> String {
        format!("CPHATE {}", timepoint)
    }
}

/// Promoter row, keyed globally by UID.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Promoter {
    pub uid: String,
    pub wormbase: String,
    pub cellular_expression_pattern: String,
    pub timepoint_start: Timepoint,
    pub timepoint_end: Timepoint,
    pub cells_by_lineaging: String,
    pub expression_patterns: String,
    pub information: String,
    pub other_cells: String,
}

/// Developmental stage bounds and the timepoints it covers.
#[derive(Debug, Clone, PartialEq)]
pub struct DevelopmentalStage {
    pub uid: String,
    pub begin: Timepoint,
    pub end: Timepoint,
    pub order: i64,
    pub promoter_db: Option<bool>,
    pub timepoints: Vec<Timepoint>,
}

/// Parent row a measurement is written onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeasurementSubject {
    Neuron,
    Contact,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeasurementKind {
    SurfaceArea,
    Volume,
}

impl MeasurementKind {
    pub fn column(&self) -> &'static str {
        match self {
            MeasurementKind::SurfaceArea => "surface_area",
            MeasurementKind::Volume => "volume",
        }
    }
}

/// Scalar appended to an existing neuron or contact row.
#[derive(Debug, Clone, PartialEq)]
pub struct MetaMeasurement {
    pub subject: MeasurementSubject,
    pub kind: MeasurementKind,
    pub uid: String,
    pub timepoint: Timepoint,
    pub value: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_type_round_trips_through_segment_names() {
        for t in EntityType::ALL {
            assert_eq!(EntityType::from_segment(t.as_str()), Some(t));
        }
        assert_eq!(EntityType::from_segment("Neurons"), None);
        assert!("nerve_ring".parse::<EntityType>().is_err());
    }

    #[test]
    fn color_json_encoding() {
        let c = Color([0.5, 0.25, 1.0, 1.0]);
        assert_eq!(c.to_json(), "[0.5,0.25,1.0,1.0]");
        assert_eq!(Color::from_json(&c.to_json()), Some(c));
        assert_eq!(Color::from_json("[1,2]"), None);
    }
}
