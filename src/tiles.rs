use crate::ept::PointRecord;
use crate::error::WriteError;
use las::{Builder, Header, Vlr, Write, Writer};
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

const PARTIAL_SUFFIX: &str = "part";

/// Records the writer regenerates or that describe dimensions the output does not carry.
fn is_layout_vlr(vlr: &Vlr) -> bool {
    (vlr.user_id == "laszip encoded" && vlr.record_id == 22204)
        || (vlr.user_id == "LASF_Spec" && vlr.record_id == 4)
}

/// Header for an output tile: the source node's scale, offset, point layout and
/// georeferencing records, LAZ compressed, without extra bytes.
fn output_header(source: &Header) -> las::Result<Header> {
    let mut builder = Builder::from((1, 4));

    builder.vlrs = source.vlrs().iter().filter(|vlr| !is_layout_vlr(vlr)).cloned().collect();

    builder.evlrs = source.evlrs().iter().filter(|vlr| !is_layout_vlr(vlr)).cloned().collect();

    builder.has_wkt_crs = source.has_wkt_crs();

    builder.point_format = source.point_format().clone();

    builder.point_format.extra_bytes = 0;

    builder.point_format.is_compressed = true;

    builder.transforms = source.transforms().clone();

    builder.into_header()
}

pub fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();

    name.push(".");
    name.push(PARTIAL_SUFFIX);

    path.with_file_name(name)
}

/// Writes `points` to `path` as LAZ. The file is assembled beside the target and renamed
/// into place once complete; on failure nothing is left at either location.
pub fn write_tile(path: &Path, header: &Header, points: &[PointRecord]) -> Result<u64, WriteError> {
    let partial = partial_path(path);

    if let Err(err) = write_points(&partial, header, points) {
        let _ = fs::remove_file(&partial);

        return Err(err);
    }

    if let Err(source) = fs::rename(&partial, path) {
        let _ = fs::remove_file(&partial);

        return Err(WriteError::Io {
            path: path.to_path_buf(),
            source,
        });
    }

    Ok(points.len() as u64)
}

fn write_points(path: &Path, header: &Header, points: &[PointRecord]) -> Result<(), WriteError> {
    let las_error = |source: las::Error| WriteError::Las {
        path: path.to_path_buf(),
        source,
    };

    let header = output_header(header).map_err(las_error)?;

    let transforms = header.transforms().clone();

    let file = File::create(path).map_err(|source| WriteError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let mut writer = Writer::new(BufWriter::new(file), header).map_err(las_error)?;

    for record in points {
        writer.write(record.to_point(&transforms)).map_err(las_error)?;
    }

    writer.close().map_err(las_error)
}

#[cfg(test)]
mod tests {
    use crate::ept::{NodeBatch, PointRecord};
    use crate::quadtree::NodeKey;
    use crate::testing::{laz_node, laz_node_with_vlrs};
    use crate::tiles::{partial_path, write_tile};
    use las::{Read, Reader, Vlr};
    use std::path::Path;

    fn ground_batch() -> NodeBatch {
        let bytes = laz_node(&[(100.25, 200.5, 12.0, 2), (101.0, 201.75, 13.5, 2), (102.0, 202.0, 14.0, 2)]);

        NodeBatch::decode(NodeKey::ROOT, bytes).unwrap()
    }

    #[test]
    fn partial_path_sits_beside_target() {
        assert_eq!(
            partial_path(Path::new("/data/raw/ground_tile_001.laz")),
            Path::new("/data/raw/ground_tile_001.laz.part")
        );
    }

    #[test]
    fn written_tile_keeps_scaled_integers() {
        let dir = tempfile::tempdir().unwrap();

        let path = dir.path().join("ground_tile_001.laz");

        let batch = ground_batch();

        let written = write_tile(&path, &batch.header, &batch.points).unwrap();

        assert_eq!(written, 3);

        assert!(!partial_path(&path).exists());

        let mut reader = Reader::from_path(&path).unwrap();

        let transforms = reader.header().transforms().clone();

        assert_eq!(transforms.x.scale, batch.header.transforms().x.scale);

        assert_eq!(transforms.x.offset, batch.header.transforms().x.offset);

        let round_trip: Vec<PointRecord> = reader
            .points()
            .map(|point| PointRecord::from_point(point.unwrap(), &transforms))
            .collect();

        let original: Vec<(i32, i32, i32, u8)> =
            batch.points.iter().map(|p| (p.x, p.y, p.z, p.classification)).collect();

        let decoded: Vec<(i32, i32, i32, u8)> =
            round_trip.iter().map(|p| (p.x, p.y, p.z, p.classification)).collect();

        assert_eq!(decoded, original);
    }

    #[test]
    fn failed_write_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();

        let path = dir.path().join("missing").join("ground_tile_001.laz");

        let batch = ground_batch();

        assert!(write_tile(&path, &batch.header, &batch.points).is_err());

        assert!(!path.exists());

        assert!(!partial_path(&path).exists());
    }

    #[test]
    fn projection_records_survive() {
        let dir = tempfile::tempdir().unwrap();

        let path = dir.path().join("ground_tile_001.laz");

        let projection = Vlr {
            user_id: "LASF_Projection".to_string(),
            record_id: 2112,
            description: "OGC WKT".to_string(),
            data: b"PROJCS[\"WGS 84 / Pseudo-Mercator\"]".to_vec(),
        };

        let bytes = laz_node_with_vlrs(&[(1.0, 2.0, 3.0, 2)], vec![projection.clone()]);

        let batch = NodeBatch::decode(NodeKey::ROOT, bytes).unwrap();

        write_tile(&path, &batch.header, &batch.points).unwrap();

        let reader = Reader::from_path(&path).unwrap();

        let vlrs = reader.header().vlrs();

        let kept: Vec<&Vlr> = vlrs.iter().filter(|vlr| vlr.user_id == "LASF_Projection").collect();

        assert_eq!(kept.len(), 1);

        assert_eq!(kept[0].record_id, 2112);

        assert_eq!(kept[0].data, projection.data);

        assert_eq!(vlrs.iter().filter(|vlr| vlr.user_id == "laszip encoded").count(), 1);
    }
}
