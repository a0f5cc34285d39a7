//! Drives the per-tile pipeline over the study area grid.

use crate::config::Config;
use crate::ept::{EptMetadata, EptSource, NodeBatch};
use crate::error::{ConnectivityError, TileError};
use crate::hierarchy::HierarchyCache;
use crate::merge::merge;
use crate::quadtree::{max_depth_for_resolution, TreeWalker};
use crate::spatial_extent::SpatialExtent;
use crate::tiles::write_tile;
use log::{debug, info, warn};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuildError, ThreadPoolBuilder};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// One output unit of the batch.
#[derive(Clone, Debug, PartialEq)]
pub struct Tile {
    pub index: usize,
    pub name: String,
    pub extent: SpatialExtent,
    pub path: PathBuf,
}

/// Overlapping tiles over `study_area`, x outer and y inner, each clipped to the area.
pub fn tile_grid(study_area: &SpatialExtent, tile_size: f64, overlap: f64) -> Vec<SpatialExtent> {
    let step = tile_size - overlap;

    let mut extents = vec![];

    if step.is_nan() || step <= 0.0 {
        return extents;
    }

    let columns = ((study_area.x_max - study_area.x_min) / step).ceil() as usize;

    let rows = ((study_area.y_max - study_area.y_min) / step).ceil() as usize;

    // Origins are derived from the index so that rounding never accumulates.
    for i in 0..columns {
        let x = study_area.x_min + i as f64 * step;

        for j in 0..rows {
            let y = study_area.y_min + j as f64 * step;

            let tile = SpatialExtent::new(x, y, x + tile_size, y + tile_size);

            if let Some(clipped) = tile.intersection(study_area) {
                extents.push(clipped);
            }
        }
    }

    extents
}

pub fn tile_name(prefix: &str, index: usize) -> String {
    format!("{}_{:03}.laz", prefix, index + 1)
}

/// Whether an existing output can stand in for processing the tile again.
pub fn is_complete(path: &Path, min_bytes: u64) -> bool {
    match fs::metadata(path) {
        Ok(metadata) => metadata.is_file() && metadata.len() >= min_bytes,
        Err(_) => false,
    }
}

#[derive(Debug)]
pub struct TileReport {
    pub nodes: usize,
    pub points: u64,
    pub missing_pages: usize,
}

#[derive(Debug, Default)]
pub struct Summary {
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub failures: Vec<(String, String)>,
}

impl Summary {
    pub fn total(&self) -> usize {
        self.succeeded + self.skipped + self.failed
    }
}

/// State shared by every tile of one run once the archive has been reached.
pub struct Session {
    pub metadata: EptMetadata,
    pub hierarchy: HierarchyCache,
    pub max_depth: Option<u32>,
}

pub struct TileBatch {
    config: Config,
    source: EptSource,
    pool: ThreadPool,
}

impl TileBatch {
    pub fn new(config: Config, source: EptSource) -> Result<TileBatch, ThreadPoolBuildError> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(config.fetch_workers)
            .build()?;

        Ok(TileBatch {
            config,
            source,
            pool,
        })
    }

    pub fn tiles(&self) -> Vec<Tile> {
        tile_grid(&self.config.study_area, self.config.tile_size, self.config.overlap)
            .into_iter()
            .enumerate()
            .map(|(index, extent)| {
                let name = tile_name(&self.config.file_prefix, index);

                Tile {
                    index,
                    path: self.config.output_dir.join(&name),
                    name,
                    extent,
                }
            })
            .collect()
    }

    /// Connectivity preflight plus the per-run hierarchy cache.
    pub fn connect(&self) -> Result<Session, ConnectivityError> {
        let metadata = self.source.metadata()?;

        let max_depth = self
            .config
            .resolution
            .and_then(|resolution| max_depth_for_resolution(&metadata.bounds, metadata.span, resolution));

        info!(
            "connected to {} ({} points, bounds {:?}, max depth {:?})",
            self.source.base_url(),
            metadata.points,
            metadata.bounds,
            max_depth
        );

        Ok(Session {
            metadata,
            hierarchy: HierarchyCache::new(),
            max_depth,
        })
    }

    /// Processes every tile that has no finished output yet. The archive is only contacted
    /// when at least one tile is pending; a connectivity failure aborts the whole run.
    pub fn run(&self) -> Result<Summary, ConnectivityError> {
        let tiles = self.tiles();

        let total = tiles.len();

        let mut summary = Summary::default();

        let mut pending = vec![];

        for tile in tiles {
            if is_complete(&tile.path, self.config.min_existing_bytes) {
                info!("[{}/{}] skipping {} (exists)", tile.index + 1, total, tile.name);
                summary.skipped += 1;
            } else {
                pending.push(tile);
            }
        }

        if pending.is_empty() {
            return Ok(summary);
        }

        let session = self.connect()?;

        info!("{} of {} tiles to fetch", pending.len(), total);

        let started = Instant::now();

        for (done, tile) in pending.iter().enumerate() {
            let tile_started = Instant::now();

            match self.process_tile(&session, tile) {
                Ok(report) => {
                    let elapsed = tile_started.elapsed().as_secs_f64();

                    let remaining = pending.len() - (done + 1);

                    let eta_min = started.elapsed().as_secs_f64() / (done + 1) as f64 * remaining as f64 / 60.0;

                    info!(
                        "[{}/{}] {} done in {:.1}s: {} points from {} nodes{} | est. remaining {:.1} min",
                        tile.index + 1,
                        total,
                        tile.name,
                        elapsed,
                        report.points,
                        report.nodes,
                        if report.missing_pages > 0 { " (partial hierarchy)" } else { "" },
                        eta_min
                    );

                    summary.succeeded += 1;
                }
                Err(err) => {
                    warn!("[{}/{}] {} FAILED: {}", tile.index + 1, total, tile.name, err);

                    summary.failed += 1;

                    summary.failures.push((tile.name.clone(), err.to_string()));
                }
            }
        }

        info!(
            "finished in {:.2} min: {} written, {} skipped, {} failed ({} hierarchy pages loaded)",
            started.elapsed().as_secs_f64() / 60.0,
            summary.succeeded,
            summary.skipped,
            summary.failed,
            session.hierarchy.loaded_pages()
        );

        Ok(summary)
    }

    /// Walk, fetch, merge and write one tile.
    pub fn process_tile(&self, session: &Session, tile: &Tile) -> Result<TileReport, TileError> {
        let walk = TreeWalker::new(&session.metadata.bounds, &session.hierarchy, &self.source)
            .with_max_depth(session.max_depth)
            .walk(&tile.extent);

        if walk.is_partial() {
            warn!(
                "{}: {} hierarchy page(s) unavailable, result is partial",
                tile.name,
                walk.failed_pages.len()
            );
        }

        debug!(
            "{}: visited {} nodes, selected {}, {} hierarchy entries cached",
            tile.name,
            walk.visited,
            walk.selected.len(),
            session.hierarchy.entry_count()
        );

        if walk.selected.is_empty() {
            return Err(TileError::NoNodes);
        }

        let batches: Vec<NodeBatch> = self.pool.install(|| {
            walk.selected
                .par_iter()
                .map(|key| self.source.fetch_node(key))
                .collect::<Result<Vec<_>, _>>()
        })?;

        let merged = merge(batches, &tile.extent, self.config.ground_class)?;

        let points = write_tile(&tile.path, &merged.header, &merged.points)?;

        Ok(TileReport {
            nodes: walk.selected.len(),
            points,
            missing_pages: walk.failed_pages.len(),
        })
    }
}

#[derive(Debug, Default)]
pub struct AuditReport {
    pub valid: Vec<PathBuf>,
    pub undersized: Vec<PathBuf>,
}

/// Sorts the tile files in `dir` by whether they reach `min_bytes`.
pub fn audit_outputs(dir: &Path, prefix: &str, min_bytes: u64) -> io::Result<AuditReport> {
    let mut report = AuditReport::default();

    for entry in fs::read_dir(dir)? {
        let path = entry?.path();

        let is_tile = path
            .file_name()
            .and_then(|name| name.to_str())
            .map_or(false, |name| name.starts_with(prefix) && name.ends_with(".laz"));

        if !is_tile {
            continue;
        }

        if is_complete(&path, min_bytes) {
            report.valid.push(path);
        } else {
            report.undersized.push(path);
        }
    }

    report.valid.sort();
    report.undersized.sort();

    Ok(report)
}
