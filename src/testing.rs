//! In-memory archive used by the unit tests.

use crate::ept::{EptSource, Timeouts, Transport};
use crate::error::TransportError;
use las::point::Classification;
use las::{Builder, Point, Transform, Vector, Vlr, Write, Writer};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const BASE_URL: &str = "http://archive.test/dataset";

/// Serves registered byte blobs by URL and counts every request, hit or miss.
#[derive(Default)]
pub struct MemoryTransport {
    resources: Mutex<HashMap<String, Vec<u8>>>,
    calls: AtomicUsize,
}

impl MemoryTransport {
    pub fn new() -> Arc<MemoryTransport> {
        Arc::new(MemoryTransport::default())
    }

    pub fn insert(&self, url: String, bytes: Vec<u8>) {
        self.resources.lock().insert(url, bytes);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn source(self: &Arc<Self>) -> EptSource {
        let timeouts = Timeouts {
            metadata: Duration::from_secs(1),
            node: Duration::from_secs(1),
        };

        EptSource::new(&format!("{}/ept.json", BASE_URL), self.clone(), timeouts)
    }
}

impl Transport for MemoryTransport {
    fn get(&self, url: &str, _timeout: Duration) -> Result<Vec<u8>, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        self.resources
            .lock()
            .get(url)
            .cloned()
            .ok_or_else(|| TransportError::Status {
                url: url.to_string(),
                status: 404,
            })
    }
}

pub fn hierarchy_json(entries: &[(&str, i64)]) -> Vec<u8> {
    let page: HashMap<&str, i64> = entries.iter().copied().collect();

    serde_json::to_vec(&page).unwrap()
}

/// Encodes `(x, y, z, classification)` tuples as a LAZ node with a 0.01 scale.
pub fn laz_node(points: &[(f64, f64, f64, u8)]) -> Vec<u8> {
    laz_node_with_vlrs(points, vec![])
}

pub fn laz_node_with_vlrs(points: &[(f64, f64, f64, u8)], vlrs: Vec<Vlr>) -> Vec<u8> {
    let dir = tempfile::tempdir().unwrap();

    let path = dir.path().join("node.laz");

    let mut builder = Builder::from((1, 4));

    builder.point_format.is_compressed = true;

    builder.vlrs = vlrs;

    let transform = Transform {
        scale: 0.01,
        offset: 0.0,
    };

    builder.transforms = Vector {
        x: transform,
        y: transform,
        z: transform,
    };

    let mut writer = Writer::from_path(&path, builder.into_header().unwrap()).unwrap();

    for &(x, y, z, classification) in points {
        writer
            .write(Point {
                x,
                y,
                z,
                classification: Classification::new(classification).unwrap(),
                ..Default::default()
            })
            .unwrap();
    }

    writer.close().unwrap();

    drop(writer);

    std::fs::read(&path).unwrap()
}

/// Rewrites the point count of a LAS 1.4 header, leaving the payload untouched.
pub fn with_point_count(mut bytes: Vec<u8>, count: u64) -> Vec<u8> {
    bytes[107..111].copy_from_slice(&0u32.to_le_bytes());

    bytes[247..255].copy_from_slice(&count.to_le_bytes());

    bytes
}
