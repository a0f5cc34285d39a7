use crate::spatial_extent::SpatialExtent;
use las::{Read, Reader};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

/// Classification breakdown and coordinate ranges of one LAS/LAZ file.
#[derive(Debug)]
pub struct ClassificationReport {
    pub total: u64,
    pub classes: BTreeMap<u8, u64>,
    pub extent: SpatialExtent,
    pub z_min: f64,
    pub z_max: f64,
}

impl Default for ClassificationReport {
    fn default() -> Self {
        Self {
            total: 0,
            classes: BTreeMap::new(),
            extent: SpatialExtent::default(),
            z_min: f64::MAX,
            z_max: f64::MIN,
        }
    }
}

impl ClassificationReport {
    pub fn from_path(path: &Path) -> las::Result<ClassificationReport> {
        let mut reader = Reader::from_path(path)?;

        let mut report = ClassificationReport::default();

        for point in reader.points() {
            let point = point?;

            report.add(u8::from(point.classification), point.x, point.y, point.z);
        }

        Ok(report)
    }

    pub fn add(&mut self, classification: u8, x: f64, y: f64, z: f64) {
        self.total += 1;

        *self.classes.entry(classification).or_insert(0) += 1;

        self.extent.update(x, y);

        self.z_min = self.z_min.min(z);
        self.z_max = self.z_max.max(z);
    }
}

impl fmt::Display for ClassificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Total points: {}", self.total)?;

        if self.total == 0 {
            return Ok(());
        }

        writeln!(f, "Classification breakdown:")?;

        for (class, count) in &self.classes {
            let pct = *count as f64 / self.total as f64 * 100.0;

            writeln!(f, "  Class {:3} : {:>10} points  ({:.1}%)", class, count, pct)?;
        }

        writeln!(f, "X range: {:.3} to {:.3}", self.extent.x_min, self.extent.x_max)?;
        writeln!(f, "Y range: {:.3} to {:.3}", self.extent.y_min, self.extent.y_max)?;
        write!(f, "Z range: {:.2} to {:.2}", self.z_min, self.z_max)
    }
}
