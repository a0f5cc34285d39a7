use crate::ept::EptSource;
use crate::error::HierarchyPageError;
use crate::hierarchy::{HierarchyCache, PAGED};
use crate::spatial_extent::{DatasetBounds, SpatialExtent};
use log::{debug, warn};
use std::fmt;
use std::str::FromStr;

/// Address of one hierarchy node. Only `x` and `y` are subdivided; `z` is passed through
/// to children unchanged.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeKey {
    pub depth: u32,
    pub x: u64,
    pub y: u64,
    pub z: u64,
}

impl NodeKey {
    pub const ROOT: NodeKey = NodeKey {
        depth: 0,
        x: 0,
        y: 0,
        z: 0,
    };

    pub fn new(depth: u32, x: u64, y: u64, z: u64) -> NodeKey {
        NodeKey { depth, x, y, z }
    }

    pub fn is_root(&self) -> bool {
        *self == NodeKey::ROOT
    }

    pub fn children(&self) -> [NodeKey; 4] {
        let depth = self.depth + 1;

        let x = self.x * 2;

        let y = self.y * 2;

        [
            NodeKey::new(depth, x, y, self.z),
            NodeKey::new(depth, x, y + 1, self.z),
            NodeKey::new(depth, x + 1, y, self.z),
            NodeKey::new(depth, x + 1, y + 1, self.z),
        ]
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}-{}", self.depth, self.x, self.y, self.z)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseNodeKeyError(pub String);

impl fmt::Display for ParseNodeKeyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "`{}` is not a D-X-Y-Z node key", self.0)
    }
}

impl std::error::Error for ParseNodeKeyError {}

impl FromStr for NodeKey {
    type Err = ParseNodeKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseNodeKeyError(s.to_string());

        let mut parts = s.split('-');

        let mut next = || parts.next().ok_or_else(invalid);

        let depth = next()?.parse::<u32>().map_err(|_| invalid())?;
        let x = next()?.parse::<u64>().map_err(|_| invalid())?;
        let y = next()?.parse::<u64>().map_err(|_| invalid())?;
        let z = next()?.parse::<u64>().map_err(|_| invalid())?;

        if parts.next().is_some() {
            return Err(invalid());
        }

        Ok(NodeKey { depth, x, y, z })
    }
}

/// World footprint of `key`: the dataset's x/y extents halved `depth` times and offset by
/// the key's x/y address. Each edge is computed from the dataset origin so that the four
/// children tile their parent exactly.
pub fn node_bounds(dataset: &DatasetBounds, key: &NodeKey) -> SpatialExtent {
    let divisor = 2f64.powi(key.depth as i32);

    let width = (dataset.x_max - dataset.x_min) / divisor;

    let height = (dataset.y_max - dataset.y_min) / divisor;

    SpatialExtent {
        x_min: dataset.x_min + width * key.x as f64,
        y_min: dataset.y_min + height * key.y as f64,
        x_max: dataset.x_min + width * (key.x + 1) as f64,
        y_max: dataset.y_min + height * (key.y + 1) as f64,
    }
}

/// Deepest level worth visiting for a target point spacing: the first depth whose node
/// spacing, `(width / span) / 2^depth`, is no coarser than `resolution`.
pub fn max_depth_for_resolution(dataset: &DatasetBounds, span: u64, resolution: f64) -> Option<u32> {
    if resolution.is_nan() || resolution <= 0.0 || span == 0 {
        return None;
    }

    let mut spacing = (dataset.x_max - dataset.x_min) / span as f64;

    let mut depth = 0;

    while spacing > resolution && depth < 64 {
        spacing /= 2.0;
        depth += 1;
    }

    Some(depth)
}

/// Result of one traversal: the selected keys in pre-order, plus the hierarchy pages that
/// could not be loaded (their subtrees contributed nothing).
#[derive(Debug, Default)]
pub struct Walk {
    pub selected: Vec<NodeKey>,
    pub failed_pages: Vec<HierarchyPageError>,
    pub visited: usize,
}

impl Walk {
    fn extend(&mut self, other: Walk) {
        self.selected.extend(other.selected);
        self.failed_pages.extend(other.failed_pages);
        self.visited += other.visited;
    }

    pub fn is_partial(&self) -> bool {
        !self.failed_pages.is_empty()
    }
}

pub struct TreeWalker<'a> {
    bounds: &'a DatasetBounds,
    hierarchy: &'a HierarchyCache,
    source: &'a EptSource,
    max_depth: Option<u32>,
}

impl<'a> TreeWalker<'a> {
    pub fn new(bounds: &'a DatasetBounds, hierarchy: &'a HierarchyCache, source: &'a EptSource) -> Self {
        TreeWalker {
            bounds,
            hierarchy,
            source,
            max_depth: None,
        }
    }

    pub fn with_max_depth(mut self, max_depth: Option<u32>) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Selects every node with points whose footprint overlaps `query`.
    pub fn walk(&self, query: &SpatialExtent) -> Walk {
        if !node_bounds(self.bounds, &NodeKey::ROOT).intersects(query) {
            debug!("query {:?} misses the dataset footprint", query);
            return Walk::default();
        }

        self.expand(NodeKey::ROOT, query)
    }

    fn visit(&self, key: NodeKey, query: &SpatialExtent) -> Walk {
        if let Some(max_depth) = self.max_depth {
            if key.depth > max_depth {
                return Walk::default();
            }
        }

        match self.hierarchy.get(&key) {
            None | Some(0) => return Walk::default(),
            Some(_) => {}
        }

        if !node_bounds(self.bounds, &key).intersects(query) {
            return Walk::default();
        }

        self.expand(key, query)
    }

    /// Loads the node's page if needed, selects it when it holds points and descends into
    /// its four children. The root is always descended into.
    fn expand(&self, key: NodeKey, query: &SpatialExtent) -> Walk {
        let mut walk = Walk {
            visited: 1,
            ..Walk::default()
        };

        let mut count = self.hierarchy.get(&key).unwrap_or(0);

        if count == PAGED {
            if let Err(err) = self.hierarchy.ensure_loaded(&key, self.source) {
                warn!("{}, skipping subtree", err);
                walk.failed_pages.push(err);
                return walk;
            }

            count = self.hierarchy.get(&key).unwrap_or(0);
        }

        if count > 0 {
            walk.selected.push(key);
        } else if count == 0 && !key.is_root() {
            return walk;
        }

        for child in key.children().iter() {
            walk.extend(self.visit(*child, query));
        }

        walk
    }
}
