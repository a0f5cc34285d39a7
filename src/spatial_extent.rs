use serde::Deserialize;

/// Axis-aligned rectangle in world units, used for query tiles, node footprints and the
/// study area.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
pub struct SpatialExtent {
    pub x_min: f64,
    pub y_min: f64,
    pub x_max: f64,
    pub y_max: f64,
}

impl Default for SpatialExtent {
    fn default() -> Self {
        Self {
            x_min: f64::MAX,
            y_min: f64::MAX,
            x_max: f64::MIN,
            y_max: f64::MIN,
        }
    }
}

impl SpatialExtent {
    pub fn new(x_min: f64, y_min: f64, x_max: f64, y_max: f64) -> Self {
        Self {
            x_min,
            y_min,
            x_max,
            y_max,
        }
    }

    pub fn is_empty(&self) -> bool {
        !(self.x_min < self.x_max && self.y_min < self.y_max)
    }

    /// Grows the extent so that it covers `(x, y)`.
    pub fn update(&mut self, x: f64, y: f64) {
        if x < self.x_min {
            self.x_min = x;
        }

        if x > self.x_max {
            self.x_max = x;
        }

        if y < self.y_min {
            self.y_min = y;
        }

        if y > self.y_max {
            self.y_max = y;
        }
    }

    /// Half-open overlap test: boxes that only share an edge do not intersect.
    pub fn intersects(&self, other: &SpatialExtent) -> bool {
        !(self.x_max <= other.x_min
            || other.x_max <= self.x_min
            || self.y_max <= other.y_min
            || other.y_max <= self.y_min)
    }

    /// Inclusive on every edge, so a point on a border shared by two tiles belongs to both.
    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.x_min && x <= self.x_max && y >= self.y_min && y <= self.y_max
    }

    pub fn intersection(&self, other: &SpatialExtent) -> Option<SpatialExtent> {
        let clipped = SpatialExtent {
            x_min: self.x_min.max(other.x_min),
            y_min: self.y_min.max(other.y_min),
            x_max: self.x_max.min(other.x_max),
            y_max: self.y_max.min(other.y_max),
        };

        if clipped.is_empty() {
            None
        } else {
            Some(clipped)
        }
    }
}

/// Full 3D extent of the archive as published in its metadata, stored in the
/// `[x_min, y_min, z_min, x_max, y_max, z_max]` order used on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
#[serde(from = "[f64; 6]")]
pub struct DatasetBounds {
    pub x_min: f64,
    pub y_min: f64,
    pub z_min: f64,
    pub x_max: f64,
    pub y_max: f64,
    pub z_max: f64,
}

impl From<[f64; 6]> for DatasetBounds {
    fn from(bounds: [f64; 6]) -> Self {
        Self {
            x_min: bounds[0],
            y_min: bounds[1],
            z_min: bounds[2],
            x_max: bounds[3],
            y_max: bounds[4],
            z_max: bounds[5],
        }
    }
}

impl DatasetBounds {
    pub fn footprint(&self) -> SpatialExtent {
        SpatialExtent::new(self.x_min, self.y_min, self.x_max, self.y_max)
    }

    pub fn is_valid(&self) -> bool {
        self.x_min < self.x_max && self.y_min < self.y_max && self.z_min <= self.z_max
    }
}
