//! Single-pass directory walk that routes entries to per-type queues.
//!
//! Files are routed by the entity type found in their path, after the
//! type filter and the extension check for that type. Directories are only
//! routed for `cphate`: the first directory on a cphate path that yields a
//! timepoint is one unit of work, and the walk still descends below it so
//! other entity types nested there are found.

use anyhow::Result;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::classify;
use crate::models::EntityType;

const TABULAR_EXTENSIONS: &[&str] = &["csv"];

/// Which entries the walk accepts.
#[derive(Debug, Clone)]
pub struct WalkFilter {
    types: BTreeSet<EntityType>,
    scene_extensions: Vec<String>,
    exclude: GlobSet,
}

impl WalkFilter {
    pub fn new(
        types: impl IntoIterator<Item = EntityType>,
        scene_extensions: &[String],
        exclude_globs: &[String],
    ) -> Result<Self> {
        Ok(Self {
            types: types.into_iter().collect(),
            scene_extensions: scene_extensions.to_vec(),
            exclude: build_globset(exclude_globs)?,
        })
    }

    fn accepts_extension(&self, entity_type: EntityType, path: &Path) -> bool {
        if entity_type.is_tabular() {
            let tabular: Vec<String> = TABULAR_EXTENSIONS.iter().map(|e| e.to_string()).collect();
            classify::has_extension(path, &tabular)
        } else {
            classify::has_extension(path, &self.scene_extensions)
        }
    }
}

/// Where one walked entry goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routing {
    Queue(EntityType),
    /// Classified, but not selected or wrong extension.
    Filtered,
    /// A file whose path carries no entity type.
    Unclassified,
    /// Directories that are not cphate units.
    Descend,
}

/// Decide the routing of one entry.
pub fn route(path: &Path, is_dir: bool, filter: &WalkFilter) -> Routing {
    let entity_type = match classify::entity_type(path) {
        Ok(t) => t,
        Err(_) if is_dir => return Routing::Descend,
        Err(_) => return Routing::Unclassified,
    };

    if is_dir {
        if entity_type == EntityType::Cphate && is_cphate_root(path) {
            if filter.types.contains(&EntityType::Cphate) {
                return Routing::Queue(EntityType::Cphate);
            }
            return Routing::Filtered;
        }
        return Routing::Descend;
    }

    // Files below a cphate directory are read by the cphate worker.
    if entity_type == EntityType::Cphate {
        return Routing::Filtered;
    }
    if !filter.types.contains(&entity_type) || !filter.accepts_extension(entity_type, path) {
        return Routing::Filtered;
    }
    Routing::Queue(entity_type)
}

/// The first directory on the path that yields a timepoint.
fn is_cphate_root(dir: &Path) -> bool {
    if classify::timepoint(dir).is_err() {
        return false;
    }
    match dir.parent() {
        Some(parent) => classify::timepoint(parent).is_err(),
        None => true,
    }
}

#[derive(Debug, Default)]
pub struct WalkSummary {
    pub routed: u64,
    pub filtered: u64,
    pub unclassified: Vec<PathBuf>,
    /// Entries the walk could not read; the walk continues past them.
    pub errors: Vec<(PathBuf, String)>,
    /// Set when the sink refused an entry and the walk stopped early.
    pub aborted: bool,
}

/// Walk `root` in file-name order, handing every routed entry to `sink`.
/// The sink returns `false` to stop the walk.
pub fn walk<F>(root: &Path, filter: &WalkFilter, mut sink: F) -> WalkSummary
where
    F: FnMut(EntityType, PathBuf) -> bool,
{
    let mut summary = WalkSummary::default();

    for entry in WalkDir::new(root).follow_links(false).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let path = e
                    .path()
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| root.to_path_buf());
                tracing::warn!(path = %path.display(), error = %e, "unreadable entry, skipping");
                summary.errors.push((path, e.to_string()));
                continue;
            }
        };

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        if filter.exclude.is_match(relative) {
            continue;
        }

        match route(path, entry.file_type().is_dir(), filter) {
            Routing::Queue(entity_type) => {
                tracing::debug!(path = %path.display(), entity = %entity_type, "routed");
                summary.routed += 1;
                if !sink(entity_type, path.to_path_buf()) {
                    summary.aborted = true;
                    break;
                }
            }
            Routing::Filtered => summary.filtered += 1,
            Routing::Unclassified => {
                tracing::debug!(path = %path.display(), "no entity type in path, skipping");
                summary.unclassified.push(path.to_path_buf());
            }
            Routing::Descend => {}
        }
    }

    summary
}

/// Scene files below a cphate directory, in file-name order.
pub fn scene_files_under(dir: &Path, scene_extensions: &[String]) -> Vec<PathBuf> {
    WalkDir::new(dir)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::warn!(dir = %dir.display(), error = %e, "unreadable cphate entry");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| classify::has_extension(path, scene_extensions))
        .collect()
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
