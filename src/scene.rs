//! Scene file parsing.
//!
//! A scene file is a glTF document (`.gltf` JSON, or the `.glb` binary
//! container). One file fans out into one [`SceneNode`] per declared node:
//! the node name is the raw entity identifier, and every node shares the
//! file-level metadata (content hash, timepoint, stage, first material's
//! base colour).

use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::classify::{self, ClassifyError};
use crate::models::{Color, DevStage, Timepoint};

const GLB_MAGIC: &[u8; 4] = b"glTF";
const GLB_JSON_CHUNK: u32 = 0x4E4F_534A;

#[derive(Debug, Error)]
pub enum SceneError {
    #[error("failed to read scene file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid glTF JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid GLB container {path}: {reason}")]
    Glb { path: PathBuf, reason: String },
    #[error("scene file {0} declares no material")]
    NoMaterial(PathBuf),
    #[error(transparent)]
    Classify(#[from] ClassifyError),
}

/// One node of a scene file plus the file-level metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneNode {
    pub uid: String,
    pub filename: String,
    pub file_hash: String,
    pub timepoint: Timepoint,
    pub dev_stage: DevStage,
    pub color: Color,
}

#[derive(Debug, Deserialize)]
struct GltfDocument {
    #[serde(default)]
    materials: Vec<GltfMaterial>,
    #[serde(default)]
    nodes: Vec<GltfNode>,
}

#[derive(Debug, Deserialize)]
struct GltfMaterial {
    #[serde(rename = "pbrMetallicRoughness", default)]
    pbr: Option<GltfPbr>,
}

#[derive(Debug, Deserialize)]
struct GltfPbr {
    #[serde(rename = "baseColorFactor", default)]
    base_color_factor: Option<[f64; 4]>,
}

#[derive(Debug, Deserialize)]
struct GltfNode {
    #[serde(default)]
    name: Option<String>,
}

/// Parse a scene file into its nodes.
///
/// Timepoint and stage come from the path; both are required. The file
/// must declare at least one material.
pub fn parse_scene_file(path: &Path) -> Result<Vec<SceneNode>, SceneError> {
    let timepoint = classify::timepoint(path)?;
    let dev_stage = classify::dev_stage(path)?;

    let bytes = std::fs::read(path).map_err(|source| SceneError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let file_hash = hash_bytes(&bytes);

    let document = decode_document(path, &bytes)?;
    let color = first_material_color(&document).ok_or_else(|| SceneError::NoMaterial(path.to_path_buf()))?;

    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    tracing::debug!(
        path = %path.display(),
        nodes = document.nodes.len(),
        timepoint,
        "parsed scene file"
    );

    Ok(document
        .nodes
        .into_iter()
        .map(|node| SceneNode {
            uid: node.name.unwrap_or_default(),
            filename: filename.clone(),
            file_hash: file_hash.clone(),
            timepoint,
            dev_stage,
            color,
        })
        .collect())
}

/// Hex SHA-256 of the raw file bytes.
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

fn decode_document(path: &Path, bytes: &[u8]) -> Result<GltfDocument, SceneError> {
    let json = if bytes.starts_with(GLB_MAGIC) {
        glb_json_chunk(path, bytes)?
    } else {
        bytes
    };
    serde_json::from_slice(json).map_err(|source| SceneError::Json {
        path: path.to_path_buf(),
        source,
    })
}

/// Locate the JSON chunk of a GLB container (12-byte header, then chunks of
/// `length, type, data`; the JSON chunk comes first).
fn glb_json_chunk<'a>(path: &Path, bytes: &'a [u8]) -> Result<&'a [u8], SceneError> {
    let glb_err = |reason: &str| SceneError::Glb {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    };
    let read_u32 = |at: usize| -> Option<u32> {
        bytes
            .get(at..at + 4)
            .and_then(|b| b.try_into().ok())
            .map(u32::from_le_bytes)
    };

    let chunk_len = read_u32(12).ok_or_else(|| glb_err("truncated header"))? as usize;
    let chunk_type = read_u32(16).ok_or_else(|| glb_err("truncated header"))?;
    if chunk_type != GLB_JSON_CHUNK {
        return Err(glb_err("first chunk is not JSON"));
    }
    bytes
        .get(20..20 + chunk_len)
        .ok_or_else(|| glb_err("JSON chunk exceeds file length"))
}

fn first_material_color(document: &GltfDocument) -> Option<Color> {
    let material = document.materials.first()?;
    Some(
        material
            .pbr
            .as_ref()
            .and_then(|p| p.base_color_factor)
            .map(Color)
            .unwrap_or(Color::WHITE),
    )
}
