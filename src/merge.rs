use crate::ept::{NodeBatch, PointRecord};
use crate::error::TileError;
use crate::spatial_extent::SpatialExtent;
use las::Header;
use log::debug;

/// ASPRS classification code for bare-earth returns.
pub const GROUND_CLASS: u8 = 2;

/// Points of one tile ready to be written, under the header of the first node.
#[derive(Debug)]
pub struct MergedTile {
    pub header: Header,
    pub points: Vec<PointRecord>,
}

/// Concatenates `batches` in arrival order and keeps the points that fall inside `query`
/// (edges included) and carry `ground_class`. Coordinates of every batch are interpreted
/// with the first batch's scale and offset.
pub fn merge(batches: Vec<NodeBatch>, query: &SpatialExtent, ground_class: u8) -> Result<MergedTile, TileError> {
    let mut batches = batches.into_iter();

    let NodeBatch {
        key,
        header,
        points: first_points,
    } = batches.next().ok_or(TileError::NoNodes)?;

    debug!("node {} supplies the tile header", key);

    let transforms = header.transforms().clone();

    let points: Vec<PointRecord> = first_points
        .into_iter()
        .chain(batches.flat_map(|batch| {
            debug!("merging {} points of node {}", batch.points.len(), batch.key);

            batch.points
        }))
        .filter(|point| {
            let (x, y) = point.world_xy(&transforms);

            query.contains(x, y) && point.classification == ground_class
        })
        .collect();

    if points.is_empty() {
        return Err(TileError::NoQualifyingPoints);
    }

    Ok(MergedTile { header, points })
}

#[cfg(test)]
mod tests {
    use crate::ept::{NodeBatch, PointRecord};
    use crate::error::TileError;
    use crate::merge::{merge, GROUND_CLASS};
    use crate::quadtree::NodeKey;
    use crate::spatial_extent::SpatialExtent;
    use las::{Builder, Header, Point, Transform, Vector};

    fn header(scale: f64, offset: f64) -> Header {
        let mut builder = Builder::from((1, 4));

        let transform = Transform { scale, offset };

        builder.transforms = Vector {
            x: transform,
            y: transform,
            z: transform,
        };

        builder.into_header().unwrap()
    }

    fn record(x: i32, y: i32, classification: u8) -> PointRecord {
        PointRecord {
            x,
            y,
            z: 0,
            classification,
            attributes: Point::default(),
        }
    }

    fn batch(key: NodeKey, header: Header, points: Vec<PointRecord>) -> NodeBatch {
        NodeBatch { key, header, points }
    }

    #[test]
    fn keeps_ground_points_of_covered_batch_in_order() {
        let left = batch(
            NodeKey::new(1, 0, 0, 0),
            header(1.0, 0.0),
            vec![
                record(10, 10, 2),
                record(20, 5, 1),
                record(30, 40, 2),
                record(400, 40, 2),
                record(5, 90, 2),
            ],
        );

        let right = batch(
            NodeKey::new(1, 1, 0, 0),
            header(1.0, 0.0),
            vec![record(600, 10, 2), record(700, 20, 2), record(800, 30, 1)],
        );

        let merged = merge(vec![left, right], &SpatialExtent::new(0.0, 0.0, 500.0, 100.0), GROUND_CLASS).unwrap();

        let kept: Vec<(i32, i32)> = merged.points.iter().map(|p| (p.x, p.y)).collect();

        assert_eq!(kept, vec![(10, 10), (30, 40), (400, 40), (5, 90)]);
    }

    #[test]
    fn edges_are_inclusive() {
        let points = vec![record(0, 0, 2), record(500, 500, 2), record(501, 500, 2)];

        let merged = merge(
            vec![batch(NodeKey::ROOT, header(1.0, 0.0), points)],
            &SpatialExtent::new(0.0, 0.0, 500.0, 500.0),
            GROUND_CLASS,
        )
        .unwrap();

        assert_eq!(merged.points.len(), 2);
    }

    #[test]
    fn first_header_is_authoritative() {
        // The second node claims a different scale; its integers are still read with the
        // first node's transform.
        let first = batch(NodeKey::ROOT, header(0.5, 100.0), vec![record(10, 10, 2)]);

        let second = batch(NodeKey::new(1, 0, 0, 0), header(1.0, 0.0), vec![record(300, 300, 2)]);

        let merged = merge(
            vec![first, second],
            &SpatialExtent::new(100.0, 100.0, 200.0, 200.0),
            GROUND_CLASS,
        )
        .unwrap();

        assert_eq!(merged.points.len(), 1);

        assert_eq!(merged.points[0].x, 10);

        assert_eq!(merged.header.transforms().x.scale, 0.5);
    }

    #[test]
    fn no_survivors_is_an_error() {
        let points = vec![record(10, 10, 1), record(900, 900, 2)];

        let result = merge(
            vec![batch(NodeKey::ROOT, header(1.0, 0.0), points)],
            &SpatialExtent::new(0.0, 0.0, 500.0, 500.0),
            GROUND_CLASS,
        );

        assert!(matches!(result, Err(TileError::NoQualifyingPoints)));
    }

    #[test]
    fn no_batches_is_an_error() {
        let result = merge(Vec::new(), &SpatialExtent::new(0.0, 0.0, 1.0, 1.0), GROUND_CLASS);

        assert!(matches!(result, Err(TileError::NoNodes)));
    }
}
