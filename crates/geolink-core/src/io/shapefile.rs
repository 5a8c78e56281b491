//! ESRI Shapefile reading for polygon boundaries.
//!
//! Geometries come from the `.shp`, attributes from the `.dbf`, and the
//! reference system from the `.prj` sidecar when one is present.

use std::collections::HashMap;
use std::convert::TryInto;
use std::path::{Path, PathBuf};

use geo_types::{Geometry, MultiPolygon};
use serde_json::Value;
use shapefile::Shape;
use shapefile::dbase::FieldValue;

use crate::crs::Crs;
use crate::error::{FormatError, IoError, IoErrorExt, Result};
use crate::types::{PolygonDataset, PolygonFeature, Record};

const FORMAT: &str = "Shapefile";

/// Read a polygon shapefile from disk.
///
/// Null shapes become features without a geometry. Shapes that are not
/// polygons are kept the same way, with a warning, so feature indices still
/// follow the file. Without a `.prj` sidecar the data is assumed to be WGS 84.
///
/// # Errors
///
/// Returns an error if the `.shp` or `.dbf` is missing or unreadable, or if a
/// polygon's rings cannot be assembled.
pub fn read_shapefile(path: impl AsRef<Path>) -> Result<PolygonDataset> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(IoError::FileNotFound {
            path: path.to_path_buf(),
        }
        .into());
    }

    let mut reader = shapefile::Reader::from_path(path).with_read_context(FORMAT, path)?;
    let mut features = Vec::new();
    let mut skipped = 0usize;

    for (idx, result) in reader.iter_shapes_and_records().enumerate() {
        let (shape, record) = result.with_read_context(FORMAT, path)?;
        let geometry = match shape_to_geometry(shape, idx)? {
            Some(ShapeGeometry::Polygon(multi)) => Some(Geometry::MultiPolygon(multi)),
            Some(ShapeGeometry::Skipped) => {
                skipped += 1;
                None
            },
            None => None,
        };
        features.push(PolygonFeature {
            attributes: record_to_attributes(record),
            geometry,
        });
    }

    if skipped > 0 {
        log::warn!("Ignored {skipped} non-polygon shape(s) in {}", path.display());
    }

    let crs = match prj_path(path) {
        Some(prj) => {
            let wkt = std::fs::read_to_string(&prj).with_read_context(FORMAT, &prj)?;
            Crs::from_wkt(&wkt)
        },
        None => {
            log::warn!(
                "No .prj file next to {}; assuming {}",
                path.display(),
                Crs::Wgs84
            );
            Crs::Wgs84
        },
    };

    Ok(PolygonDataset::new(crs, features))
}

enum ShapeGeometry {
    Polygon(MultiPolygon<f64>),
    Skipped,
}

fn shape_to_geometry(shape: Shape, idx: usize) -> Result<Option<ShapeGeometry>> {
    let invalid = |message: String| FormatError::InvalidGeometry {
        format: FORMAT.to_string(),
        message,
        feature_id: Some(idx.to_string()),
    };

    let multi: MultiPolygon<f64> = match shape {
        Shape::NullShape => return Ok(None),
        Shape::Polygon(polygon) => polygon
            .try_into()
            .map_err(|e| invalid(format!("Failed to convert polygon: {e:?}")))?,
        Shape::PolygonM(polygon) => polygon
            .try_into()
            .map_err(|e| invalid(format!("Failed to convert polygonM: {e:?}")))?,
        Shape::PolygonZ(polygon) => polygon
            .try_into()
            .map_err(|e| invalid(format!("Failed to convert polygonZ: {e:?}")))?,
        _ => return Ok(Some(ShapeGeometry::Skipped)),
    };
    Ok(Some(ShapeGeometry::Polygon(multi)))
}

/// dBase fields as JSON, ordered by field name.
fn record_to_attributes(record: shapefile::dbase::Record) -> Record {
    let mut fields: Vec<(String, FieldValue)> = HashMap::from(record).into_iter().collect();
    fields.sort_by(|a, b| a.0.cmp(&b.0));
    fields
        .into_iter()
        .map(|(name, value)| (name, field_to_value(value)))
        .collect()
}

fn field_to_value(value: FieldValue) -> Value {
    match value {
        FieldValue::Character(text) => {
            text.map_or(Value::Null, |s| Value::String(s.trim_end().to_string()))
        },
        FieldValue::Memo(text) => Value::String(text),
        FieldValue::Numeric(number) => number.map_or(Value::Null, Value::from),
        FieldValue::Float(number) => number.map_or(Value::Null, |n| Value::from(f64::from(n))),
        FieldValue::Double(number) | FieldValue::Currency(number) => Value::from(number),
        FieldValue::Integer(number) => Value::from(number),
        FieldValue::Logical(flag) => flag.map_or(Value::Null, Value::Bool),
        FieldValue::Date(date) => date.map_or(Value::Null, |d| {
            Value::String(format!("{:04}-{:02}-{:02}", d.year(), d.month(), d.day()))
        }),
        other => Value::String(format!("{other:?}")),
    }
}

/// The `.prj` sidecar of `path`, in either letter case.
fn prj_path(path: &Path) -> Option<PathBuf> {
    ["prj", "PRJ"]
        .into_iter()
        .map(|ext| path.with_extension(ext))
        .find(|candidate| candidate.exists())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GeoLinkError;
    use crate::join::spatial_join;
    use crate::provider::JoinPredicate;
    use crate::types::{GeocodeMatch, PointDataset, PointRow};
    use shapefile::dbase::{FieldName, TableWriterBuilder};
    use shapefile::{Point, Polygon, PolygonRing, Writer};
    use tempfile::TempDir;

    const UTM_48S_WKT: &str = r#"PROJCS["WGS_1984_UTM_Zone_48S",GEOGCS["GCS_WGS_1984",DATUM["D_WGS_1984",SPHEROID["WGS_1984",6378137.0,298.257223563]],PRIMEM["Greenwich",0.0],UNIT["Degree",0.0174532925199433]],PROJECTION["Transverse_Mercator"],PARAMETER["False_Easting",500000.0],PARAMETER["False_Northing",10000000.0],PARAMETER["Central_Meridian",105.0],PARAMETER["Scale_Factor",0.9996],PARAMETER["Latitude_Of_Origin",0.0],UNIT["Meter",1.0]]"#;

    /// Clockwise square, the outer-ring orientation of the format.
    fn square(min_x: f64, min_y: f64, size: f64) -> Polygon {
        Polygon::new(PolygonRing::Outer(vec![
            Point::new(min_x, min_y),
            Point::new(min_x, min_y + size),
            Point::new(min_x + size, min_y + size),
            Point::new(min_x + size, min_y),
            Point::new(min_x, min_y),
        ]))
    }

    /// Writes `districts.shp` with a name and a population column.
    fn write_districts(dir: &Path, shapes: &[(&str, Option<f64>, Polygon)]) -> PathBuf {
        let path = dir.join("districts.shp");
        let table = TableWriterBuilder::new()
            .add_character_field(FieldName::try_from("name").unwrap(), 50)
            .add_numeric_field(FieldName::try_from("pop").unwrap(), 10, 0);
        let mut writer = Writer::from_path(&path, table).unwrap();
        for (name, pop, polygon) in shapes {
            let mut record = shapefile::dbase::Record::default();
            record.insert(
                "name".to_string(),
                FieldValue::Character(Some((*name).to_string())),
            );
            record.insert("pop".to_string(), FieldValue::Numeric(*pop));
            writer.write_shape_and_record(polygon, &record).unwrap();
        }
        path
    }

    #[test]
    fn test_read_polygons_and_attributes() {
        let temp_dir = TempDir::new().unwrap();
        let path = write_districts(
            temp_dir.path(),
            &[
                ("Menteng", Some(68000.0), square(0.0, 0.0, 1.0)),
                ("Gambir", None, square(2.0, 0.0, 1.0)),
            ],
        );

        let dataset = read_shapefile(&path).unwrap();
        assert_eq!(dataset.crs, Crs::Wgs84);
        assert_eq!(dataset.len(), 2);

        let first = &dataset.features[0];
        assert_eq!(first.attributes["name"], Value::from("Menteng"));
        assert_eq!(first.attributes["pop"], Value::from(68000.0));
        let keys: Vec<&str> = first.attributes.keys().map(String::as_str).collect();
        assert_eq!(keys, ["name", "pop"]);
        assert!(matches!(first.geometry, Some(Geometry::MultiPolygon(_))));

        assert_eq!(dataset.features[1].attributes["pop"], Value::Null);
    }

    #[test]
    fn test_prj_sidecar_sets_crs() {
        let temp_dir = TempDir::new().unwrap();
        let path = write_districts(
            temp_dir.path(),
            &[("west-java", Some(1.0), square(650_000.0, 9_250_000.0, 100_000.0))],
        );
        std::fs::write(temp_dir.path().join("districts.prj"), UTM_48S_WKT).unwrap();

        let dataset = crate::io::load_polygon_dataset(&path).unwrap();
        assert_eq!(dataset.crs, Crs::parse("EPSG:32748"));

        let points = PointDataset::new(
            Crs::Wgs84,
            vec![PointRow::found(
                Record::new(),
                &GeocodeMatch::new(106.8456, -6.2088, "Jakarta"),
            )],
        );
        let joined = spatial_join(&points, &dataset, JoinPredicate::Within).unwrap();
        assert_eq!(joined.matched_count(), 1);
        assert_eq!(joined.records()[0]["name"], Value::from("west-java"));
    }

    #[test]
    fn test_read_missing_file() {
        let err = read_shapefile("/nonexistent/districts.shp").unwrap_err();
        assert!(matches!(err, GeoLinkError::Io(IoError::FileNotFound { .. })));
    }

    #[test]
    fn test_missing_dbf_fails() {
        let temp_dir = TempDir::new().unwrap();
        let path = write_districts(temp_dir.path(), &[("A", None, square(0.0, 0.0, 1.0))]);
        std::fs::remove_file(temp_dir.path().join("districts.dbf")).unwrap();

        let err = read_shapefile(&path).unwrap_err();
        assert!(matches!(err, GeoLinkError::Io(IoError::Read { .. })));
    }
}
