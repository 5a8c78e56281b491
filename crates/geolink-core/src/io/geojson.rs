//! `GeoJSON` reading and writing for point, polygon and joined datasets.

use std::convert::TryInto;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use geo_types::Geometry;
use geojson::{
    Feature, FeatureCollection, GeoJson, Geometry as GeoJsonGeometry, JsonObject, JsonValue,
};
use serde_json::json;

use crate::crs::Crs;
use crate::error::{FormatError, GeoLinkError, IoError, IoErrorExt, Result};
use crate::types::{
    ADDRESS_COLUMN, GeocodeStatus, JoinedDataset, LATITUDE_COLUMN, LONGITUDE_COLUMN,
    POLYGON_GEOMETRY_COLUMN, PointDataset, PointRow, PolygonDataset, PolygonFeature, Record,
    STATUS_COLUMN,
};

const FORMAT: &str = "GeoJSON";

/// Parsed `GeoJSON` feature with materialized properties and geometry.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRecord {
    /// Feature properties in document order; `null` members are kept
    pub properties: JsonObject,
    /// Feature geometry, `None` for a `null` geometry
    pub geometry: Option<Geometry<f64>>,
}

/// All features of a `GeoJSON` document plus its declared reference system.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FeatureTable {
    /// Reference system from the legacy `crs` member, WGS 84 when absent
    pub crs: Crs,
    /// Features in document order
    pub features: Vec<FeatureRecord>,
}

/// Read a `GeoJSON` file from disk.
///
/// # Errors
///
/// Returns an error if the file is missing, unreadable, or not valid `GeoJSON`.
pub fn read_geojson(path: impl AsRef<Path>) -> Result<FeatureTable> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(IoError::FileNotFound {
            path: path.to_path_buf(),
        }
        .into());
    }
    let bytes = std::fs::read(path).with_read_context(FORMAT, path)?;
    parse_geojson_bytes(&bytes, path.display().to_string())
}

/// Parse raw bytes into a [`FeatureTable`].
///
/// Accepts a `FeatureCollection`, a single `Feature`, a bare geometry, or a
/// newline-delimited `GeoJSON` sequence.
///
/// # Errors
///
/// Returns [`FormatError::Parse`] if the bytes cannot be read either way, or
/// [`FormatError::InvalidGeometry`] if a geometry cannot be converted.
pub fn parse_geojson_bytes(bytes: &[u8], context: impl Into<String>) -> Result<FeatureTable> {
    let context = context.into();
    let reader = std::io::Cursor::new(bytes);

    match GeoJson::from_reader(reader) {
        Ok(geojson) => geojson_to_table(geojson),
        Err(primary_err) => {
            let primary_err_message = primary_err.to_string();
            match parse_geojson_sequence(bytes) {
                Ok(table) => Ok(table),
                Err(sequence_err) => Err(FormatError::Parse {
                    format: FORMAT.to_string(),
                    line: None,
                    message: format!(
                        "{context}: not a GeoJSON object ({primary_err_message}) \
                         nor a GeoJSON sequence ({sequence_err})"
                    ),
                }
                .into()),
            }
        },
    }
}

fn geojson_to_table(geojson: GeoJson) -> Result<FeatureTable> {
    match geojson {
        GeoJson::FeatureCollection(collection) => {
            let crs = declared_crs(collection.foreign_members.as_ref());
            let features = collection
                .features
                .into_iter()
                .enumerate()
                .map(|(idx, feature)| feature_to_record(feature, idx))
                .collect::<Result<Vec<_>>>()?;
            Ok(FeatureTable { crs, features })
        },
        GeoJson::Feature(feature) => {
            let crs = declared_crs(feature.foreign_members.as_ref());
            Ok(FeatureTable {
                crs,
                features: vec![feature_to_record(feature, 0)?],
            })
        },
        GeoJson::Geometry(geometry) => Ok(FeatureTable {
            crs: Crs::default(),
            features: vec![FeatureRecord {
                properties: JsonObject::new(),
                geometry: Some(convert_geometry(geometry, None)?),
            }],
        }),
    }
}

fn feature_to_record(feature: Feature, idx: usize) -> Result<FeatureRecord> {
    let geometry = match feature.geometry {
        Some(geometry) => Some(convert_geometry(geometry, Some(idx))?),
        None => None,
    };

    Ok(FeatureRecord {
        properties: feature.properties.unwrap_or_default(),
        geometry,
    })
}

fn convert_geometry(geometry: GeoJsonGeometry, feature: Option<usize>) -> Result<Geometry<f64>> {
    geometry.try_into().map_err(|err: geojson::Error| {
        GeoLinkError::from(FormatError::InvalidGeometry {
            format: FORMAT.to_string(),
            message: err.to_string(),
            feature_id: feature.map(|idx| idx.to_string()),
        })
    })
}

fn parse_geojson_sequence(bytes: &[u8]) -> Result<FeatureTable> {
    let mut table = FeatureTable::default();
    for (line_idx, raw_line) in bytes.split(|b| *b == b'\n').enumerate() {
        let parse_error = |message: String| FormatError::Parse {
            format: FORMAT.to_string(),
            line: Some(line_idx + 1),
            message,
        };

        let line = std::str::from_utf8(raw_line)
            .map_err(|err| parse_error(format!("line is not valid UTF-8: {err}")))?
            .trim();
        if line.is_empty() {
            continue;
        }

        let geojson = line
            .parse::<GeoJson>()
            .map_err(|err| parse_error(err.to_string()))?;
        let mut parsed = geojson_to_table(geojson)?;
        table.features.append(&mut parsed.features);
    }

    if table.features.is_empty() {
        return Err(FormatError::Parse {
            format: FORMAT.to_string(),
            line: None,
            message: "No GeoJSON features found".to_string(),
        }
        .into());
    }
    Ok(table)
}

/// Reads the legacy `crs` member (`{"type": "name", "properties": {"name": ...}}`).
///
/// RFC 7946 documents carry no such member and are WGS 84.
fn declared_crs(foreign_members: Option<&JsonObject>) -> Crs {
    foreign_members
        .and_then(|members| members.get("crs"))
        .and_then(|crs| crs.get("properties"))
        .and_then(|props| props.get("name"))
        .and_then(JsonValue::as_str)
        .map(Crs::parse)
        .unwrap_or_default()
}

fn crs_member(crs: &Crs) -> Option<JsonObject> {
    let name = match (crs, crs.epsg_code()) {
        (Crs::Wgs84, _) => return None,
        (_, Some(code)) => format!("urn:ogc:def:crs:EPSG::{code}"),
        (Crs::WebMercator | Crs::Other(_), None) => crs.as_str().to_string(),
    };
    let mut members = JsonObject::new();
    members.insert(
        "crs".to_string(),
        json!({"type": "name", "properties": {"name": name}}),
    );
    Some(members)
}

fn to_geojson_geometry(geometry: &Geometry<f64>) -> GeoJsonGeometry {
    GeoJsonGeometry::new(geojson::Value::from(geometry))
}

fn feature(properties: Record, geometry: Option<&Geometry<f64>>) -> Feature {
    Feature {
        bbox: None,
        geometry: geometry.map(to_geojson_geometry),
        id: None,
        properties: Some(properties),
        foreign_members: None,
    }
}

impl FeatureTable {
    /// Interprets the features as polygon boundaries.
    #[must_use]
    pub fn into_polygon_dataset(self) -> PolygonDataset {
        let features = self
            .features
            .into_iter()
            .map(|f| PolygonFeature {
                attributes: f.properties,
                geometry: f.geometry,
            })
            .collect();
        PolygonDataset::new(self.crs, features)
    }

    /// Interprets the features as geocoded points, as written by [`write_point_dataset`].
    ///
    /// The `longitude`, `latitude`, `address` and `geocode_status` properties are
    /// lifted back into their row fields. Features without a point geometry become
    /// rows without a geometry.
    #[must_use]
    pub fn into_point_dataset(self) -> PointDataset {
        let rows = self
            .features
            .into_iter()
            .map(|f| {
                let mut attributes = f.properties;
                let longitude = attributes
                    .shift_remove(LONGITUDE_COLUMN)
                    .and_then(|v| v.as_f64());
                let latitude = attributes
                    .shift_remove(LATITUDE_COLUMN)
                    .and_then(|v| v.as_f64());
                let address = attributes
                    .shift_remove(ADDRESS_COLUMN)
                    .and_then(|v| v.as_str().map(str::to_string));
                let status = attributes
                    .shift_remove(STATUS_COLUMN)
                    .and_then(|v| v.as_str().and_then(GeocodeStatus::from_label));

                let (longitude, latitude) = match f.geometry {
                    Some(Geometry::Point(p)) => (Some(p.x()), Some(p.y())),
                    _ => (longitude, latitude),
                };
                let status = status.unwrap_or(if longitude.is_some() && latitude.is_some() {
                    GeocodeStatus::Found
                } else {
                    GeocodeStatus::NotFound
                });
                PointRow::from_parts(attributes, longitude, latitude, address, status)
            })
            .collect();
        PointDataset::new(self.crs, rows)
    }
}

/// Build the `GeoJSON` feature collection for a point dataset.
///
/// Rows without a geometry are kept as features with a `null` geometry.
#[must_use]
pub fn point_dataset_to_collection(dataset: &PointDataset) -> FeatureCollection {
    let features = dataset
        .rows
        .iter()
        .map(|row| {
            let geometry = row.geometry.map(Geometry::Point);
            feature(row.to_record(), geometry.as_ref())
        })
        .collect();

    FeatureCollection {
        bbox: None,
        features,
        foreign_members: crs_member(&dataset.crs),
    }
}

/// Build the `GeoJSON` feature collection for a joined dataset.
///
/// The point is the feature geometry; the matched polygon is embedded as a
/// `GeoJSON` geometry object in the `polygon_geometry` property.
#[must_use]
pub fn joined_dataset_to_collection(dataset: &JoinedDataset) -> FeatureCollection {
    let features = dataset
        .rows
        .iter()
        .map(|row| {
            let mut properties = row.to_record(&dataset.polygon_columns);
            let polygon = row
                .polygon
                .as_ref()
                .and_then(|m| serde_json::to_value(to_geojson_geometry(&m.geometry)).ok())
                .unwrap_or(JsonValue::Null);
            properties.insert(POLYGON_GEOMETRY_COLUMN.to_string(), polygon);
            let geometry = row.point.geometry.map(Geometry::Point);
            feature(properties, geometry.as_ref())
        })
        .collect();

    FeatureCollection {
        bbox: None,
        features,
        foreign_members: crs_member(&dataset.crs),
    }
}

/// Write a point dataset as a `GeoJSON` `FeatureCollection`.
///
/// # Errors
///
/// Returns an [`IoError::Write`] if the file cannot be created or written.
pub fn write_point_dataset(path: impl AsRef<Path>, dataset: &PointDataset) -> Result<()> {
    write_collection(path.as_ref(), &point_dataset_to_collection(dataset))
}

/// Write a joined dataset as a `GeoJSON` `FeatureCollection`.
///
/// # Errors
///
/// Returns an [`IoError::Write`] if the file cannot be created or written.
pub fn write_joined_dataset(path: impl AsRef<Path>, dataset: &JoinedDataset) -> Result<()> {
    write_collection(path.as_ref(), &joined_dataset_to_collection(dataset))
}

fn write_collection(path: &Path, collection: &FeatureCollection) -> Result<()> {
    let file = File::create(path).with_write_context(FORMAT, path)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, collection).with_write_context(FORMAT, path)?;
    writer.flush().with_write_context(FORMAT, path)?;
    log::info!(
        "Wrote {} feature(s) to {}",
        collection.features.len(),
        path.display()
    );
    Ok(())
}

/// Decode a `GeoJSON` geometry object stored in a property value.
#[must_use]
pub fn geometry_from_property(value: &JsonValue) -> Option<Geometry<f64>> {
    if value.is_null() {
        return None;
    }
    let geometry: GeoJsonGeometry = serde_json::from_value(value.clone()).ok()?;
    geometry.try_into().ok()
}
