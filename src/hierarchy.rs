use crate::ept::EptSource;
use crate::error::HierarchyPageError;
use crate::quadtree::NodeKey;
use log::debug;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};

/// Point count marking a node whose descendants live in a separate, not yet fetched page.
pub const PAGED: i64 = -1;

#[derive(Default)]
struct HierarchyState {
    entries: HashMap<NodeKey, i64>,
    loaded_pages: HashSet<NodeKey>,
}

/// Lazily grown map from node key to point count. Entries are only ever inserted, so the
/// cache can be shared between tiles and between fetch workers.
pub struct HierarchyCache {
    state: RwLock<HierarchyState>,
}

impl Default for HierarchyCache {
    fn default() -> Self {
        Self::new()
    }
}

impl HierarchyCache {
    /// The root always exists; its own page is fetched the first time it is needed.
    pub fn new() -> HierarchyCache {
        let mut state = HierarchyState::default();

        state.entries.insert(NodeKey::ROOT, PAGED);

        HierarchyCache {
            state: RwLock::new(state),
        }
    }

    pub fn get(&self, key: &NodeKey) -> Option<i64> {
        self.state.read().entries.get(key).copied()
    }

    pub fn entry_count(&self) -> usize {
        self.state.read().entries.len()
    }

    pub fn loaded_pages(&self) -> usize {
        self.state.read().loaded_pages.len()
    }

    /// Fetches and merges the page rooted at `key` when its entry is the paged sentinel.
    /// A failed page is not remembered, so a later traversal will request it again.
    pub fn ensure_loaded(&self, key: &NodeKey, source: &EptSource) -> Result<(), HierarchyPageError> {
        {
            let state = self.state.read();

            if state.loaded_pages.contains(key) || state.entries.get(key) != Some(&PAGED) {
                return Ok(());
            }
        }

        let page = source.hierarchy_page(key)?;

        debug!("hierarchy page {} holds {} entries", key, page.len());

        self.merge(key, page);

        Ok(())
    }

    fn merge(&self, key: &NodeKey, page: HashMap<NodeKey, i64>) {
        let mut state = self.state.write();

        state.entries.extend(page);

        state.loaded_pages.insert(*key);
    }
}
