//! Access to a remote Entwine Point Tile archive: metadata, hierarchy pages and LAZ nodes.

use crate::error::{ConnectivityError, HierarchyPageError, TileError, TransportError};
use crate::quadtree::NodeKey;
use crate::spatial_extent::DatasetBounds;
use las::{Header, Point, Read, Reader, Transform, Vector};
use log::{debug, warn};
use serde::Deserialize;
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const METADATA_FILE: &str = "ept.json";

const HIERARCHY_PREFIX: &str = "ept-hierarchy";

const DATA_PREFIX: &str = "ept-data";

/// Blocking byte fetcher. Implementations must be usable from several fetch workers.
pub trait Transport: Send + Sync {
    fn get(&self, url: &str, timeout: Duration) -> Result<Vec<u8>, TransportError>;
}

pub struct HttpTransport {
    client: reqwest::blocking::Client,
    max_retries: u32,
    backoff: Duration,
}

impl HttpTransport {
    pub fn new(max_retries: u32) -> Result<HttpTransport, TransportError> {
        let client = reqwest::blocking::Client::builder()
            .build()
            .map_err(TransportError::Client)?;

        Ok(HttpTransport {
            client,
            max_retries,
            backoff: Duration::from_millis(500),
        })
    }

    fn get_once(&self, url: &str, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        let request_error = |source: reqwest::Error| TransportError::Request {
            url: url.to_string(),
            source,
        };

        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .map_err(request_error)?;

        let status = response.status();

        if !status.is_success() {
            return Err(TransportError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let bytes = response.bytes().map_err(request_error)?;

        Ok(bytes.to_vec())
    }
}

impl Transport for HttpTransport {
    fn get(&self, url: &str, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        let mut attempt = 0;

        loop {
            match self.get_once(url, timeout) {
                Ok(bytes) => {
                    debug!("GET {} ({} bytes)", url, bytes.len());
                    return Ok(bytes);
                }
                Err(err) if attempt < self.max_retries => {
                    let delay = self.backoff * 2u32.pow(attempt);

                    warn!("{}, retrying in {:?}", err, delay);

                    thread::sleep(delay);

                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// The subset of `ept.json` this crate relies on.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EptMetadata {
    pub bounds: DatasetBounds,
    #[serde(default = "default_span")]
    pub span: u64,
    #[serde(default = "default_data_type")]
    pub data_type: String,
    #[serde(default)]
    pub points: u64,
}

fn default_span() -> u64 {
    128
}

fn default_data_type() -> String {
    "laszip".to_string()
}

#[derive(Clone, Copy, Debug)]
pub struct Timeouts {
    pub metadata: Duration,
    pub node: Duration,
}

/// One archive endpoint: URL layout plus the transport used to reach it.
#[derive(Clone)]
pub struct EptSource {
    base_url: String,
    transport: Arc<dyn Transport>,
    timeouts: Timeouts,
}

impl EptSource {
    /// Accepts either the `ept.json` URL or the directory that contains it.
    pub fn new(url: &str, transport: Arc<dyn Transport>, timeouts: Timeouts) -> EptSource {
        let base_url = url
            .trim_end_matches(METADATA_FILE)
            .trim_end_matches('/')
            .to_string();

        EptSource {
            base_url,
            transport,
            timeouts,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn metadata_url(&self) -> String {
        format!("{}/{}", self.base_url, METADATA_FILE)
    }

    pub fn hierarchy_url(&self, key: &NodeKey) -> String {
        format!("{}/{}/{}.json", self.base_url, HIERARCHY_PREFIX, key)
    }

    pub fn node_url(&self, key: &NodeKey) -> String {
        format!("{}/{}/{}.laz", self.base_url, DATA_PREFIX, key)
    }

    /// Connectivity preflight. Must succeed before any tile is attempted.
    pub fn metadata(&self) -> Result<EptMetadata, ConnectivityError> {
        let bytes = self
            .transport
            .get(&self.metadata_url(), self.timeouts.metadata)?;

        let metadata: EptMetadata = serde_json::from_slice(&bytes)?;

        if !metadata.bounds.is_valid() {
            return Err(ConnectivityError::InvalidBounds);
        }

        if metadata.data_type != "laszip" {
            return Err(ConnectivityError::UnsupportedDataType(metadata.data_type));
        }

        Ok(metadata)
    }

    pub fn hierarchy_page(&self, key: &NodeKey) -> Result<HashMap<NodeKey, i64>, HierarchyPageError> {
        let bytes = self
            .transport
            .get(&self.hierarchy_url(key), self.timeouts.metadata)
            .map_err(|source| HierarchyPageError::Fetch { key: *key, source })?;

        let raw: HashMap<String, i64> = serde_json::from_slice(&bytes)
            .map_err(|source| HierarchyPageError::Parse { key: *key, source })?;

        raw.into_iter()
            .map(|(entry, count)| match entry.parse::<NodeKey>() {
                Ok(node) => Ok((node, count)),
                Err(_) => Err(HierarchyPageError::InvalidKey { key: *key, entry }),
            })
            .collect()
    }

    pub fn fetch_node(&self, key: &NodeKey) -> Result<NodeBatch, TileError> {
        let bytes = self
            .transport
            .get(&self.node_url(key), self.timeouts.node)
            .map_err(|source| TileError::NodeFetch { key: *key, source })?;

        NodeBatch::decode(*key, bytes).map_err(|source| TileError::NodeDecode { key: *key, source })
    }
}

/// A point with its coordinates kept as scaled integers. All other LAS attributes ride
/// along in `attributes` untouched.
#[derive(Clone, Debug)]
pub struct PointRecord {
    pub x: i32,
    pub y: i32,
    pub z: i32,
    pub classification: u8,
    pub attributes: Point,
}

fn to_scaled(value: f64, transform: &Transform) -> i32 {
    ((value - transform.offset) / transform.scale).round() as i32
}

fn to_world(value: i32, transform: &Transform) -> f64 {
    transform.offset + transform.scale * value as f64
}

impl PointRecord {
    pub fn from_point(point: Point, transforms: &Vector<Transform>) -> PointRecord {
        PointRecord {
            x: to_scaled(point.x, &transforms.x),
            y: to_scaled(point.y, &transforms.y),
            z: to_scaled(point.z, &transforms.z),
            classification: u8::from(point.classification),
            attributes: point,
        }
    }

    pub fn world_xy(&self, transforms: &Vector<Transform>) -> (f64, f64) {
        (to_world(self.x, &transforms.x), to_world(self.y, &transforms.y))
    }

    /// Rebuilds a LAS point from the scaled integers under `transforms`.
    pub fn to_point(&self, transforms: &Vector<Transform>) -> Point {
        let mut point = self.attributes.clone();

        point.x = to_world(self.x, &transforms.x);
        point.y = to_world(self.y, &transforms.y);
        point.z = to_world(self.z, &transforms.z);
        point.extra_bytes.clear();

        point
    }
}

/// The decoded content of one node.
#[derive(Debug)]
pub struct NodeBatch {
    pub key: NodeKey,
    pub header: Header,
    pub points: Vec<PointRecord>,
}

impl NodeBatch {
    pub fn decode(key: NodeKey, bytes: Vec<u8>) -> las::Result<NodeBatch> {
        let available = bytes.len() as u64;

        let mut reader = Reader::new(Cursor::new(bytes))?;

        let header = reader.header().clone();

        let transforms = header.transforms().clone();

        // The declared count comes from the network; never reserve more records than the
        // payload could hold uncompressed.
        let record_length = u64::from(header.point_format().len()).max(1);

        let capacity = header.number_of_points().min(available / record_length);

        let mut points = Vec::with_capacity(capacity as usize);

        for point in reader.points() {
            points.push(PointRecord::from_point(point?, &transforms));
        }

        debug!("node {} decoded {} points", key, points.len());

        Ok(NodeBatch {
            key,
            header,
            points,
        })
    }
}
