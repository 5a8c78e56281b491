//! Data types for geocoded, polygon and joined datasets.
//!
//! This module defines the in-memory tables that flow through the resolver:
//! location inputs, geocode results, point rows, polygon features, and the rows
//! produced by a spatial join.

use geo_types::{Geometry, Point};
use serde_json::{Map, Value};

use crate::crs::Crs;

/// A single table row: an ordered mapping of column name to value.
pub type Record = Map<String, Value>;

/// Column holding the place name when the input is a flat list of strings.
pub const LOCATION_COLUMN: &str = "location";
/// Column holding the geocoded longitude.
pub const LONGITUDE_COLUMN: &str = "longitude";
/// Column holding the geocoded latitude.
pub const LATITUDE_COLUMN: &str = "latitude";
/// Column holding the resolved address.
pub const ADDRESS_COLUMN: &str = "address";
/// Column holding the per-row geocode status.
pub const STATUS_COLUMN: &str = "geocode_status";
/// Column holding the index of the matched polygon feature.
pub const INDEX_RIGHT_COLUMN: &str = "index_right";
/// Column holding the matched polygon geometry.
pub const POLYGON_GEOMETRY_COLUMN: &str = "polygon_geometry";

/// One candidate returned by a geocoding provider.
#[derive(Debug, Clone, PartialEq)]
pub struct GeocodeMatch {
    /// Longitude in degrees (EPSG:4326)
    pub longitude: f64,
    /// Latitude in degrees (EPSG:4326)
    pub latitude: f64,
    /// Formatted address of the candidate
    pub address: String,
}

impl GeocodeMatch {
    /// Creates a new candidate.
    #[must_use]
    pub fn new(longitude: f64, latitude: f64, address: impl Into<String>) -> Self {
        Self {
            longitude,
            latitude,
            address: address.into(),
        }
    }
}

/// The answer to a single geocoding lookup that reached the service.
#[derive(Debug, Clone, PartialEq)]
pub enum GeocodeOutcome {
    /// The service returned one or more candidates.
    Found(Vec<GeocodeMatch>),
    /// The service answered but nothing matched.
    NotFound,
}

/// How a point row came to have (or lack) coordinates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeocodeStatus {
    /// Coordinates came from a geocode candidate.
    Found,
    /// The lookup completed without a match, or there was nothing to look up.
    NotFound,
    /// The lookup failed; the message describes why.
    Failed(String),
}

impl GeocodeStatus {
    /// Returns the status label written to the `geocode_status` column.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            GeocodeStatus::Found => "found",
            GeocodeStatus::NotFound => "not_found",
            GeocodeStatus::Failed(_) => "failed",
        }
    }

    /// Parse a status label, as written by [`GeocodeStatus::as_str`].
    #[must_use]
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "found" => Some(GeocodeStatus::Found),
            "not_found" => Some(GeocodeStatus::NotFound),
            "failed" => Some(GeocodeStatus::Failed(String::new())),
            _ => None,
        }
    }
}

/// Input accepted by [`crate::resolver::LocationResolver::geocode_locations`].
#[derive(Debug, Clone, PartialEq)]
pub enum LocationInput {
    /// A flat list of place names.
    List(Vec<String>),
    /// A table of records, one column of which holds the place name.
    Table(Vec<Record>),
}

impl From<Vec<String>> for LocationInput {
    fn from(names: Vec<String>) -> Self {
        LocationInput::List(names)
    }
}

impl From<Vec<&str>> for LocationInput {
    fn from(names: Vec<&str>) -> Self {
        LocationInput::List(names.into_iter().map(str::to_string).collect())
    }
}

impl From<Vec<Record>> for LocationInput {
    fn from(rows: Vec<Record>) -> Self {
        LocationInput::Table(rows)
    }
}

/// One row of a point dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct PointRow {
    /// The input record, unchanged
    pub attributes: Record,
    /// Geocoded longitude, if any
    pub longitude: Option<f64>,
    /// Geocoded latitude, if any
    pub latitude: Option<f64>,
    /// Resolved address, if any
    pub address: Option<String>,
    /// Outcome of the lookup for this row
    pub status: GeocodeStatus,
    /// Point geometry; present only when both coordinates are
    pub geometry: Option<Point<f64>>,
}

impl PointRow {
    /// Builds a row from a geocode candidate.
    #[must_use]
    pub fn found(attributes: Record, candidate: &GeocodeMatch) -> Self {
        Self::from_parts(
            attributes,
            Some(candidate.longitude),
            Some(candidate.latitude),
            Some(candidate.address.clone()),
            GeocodeStatus::Found,
        )
    }

    /// Builds a row with null coordinates and address.
    #[must_use]
    pub fn unresolved(attributes: Record, status: GeocodeStatus) -> Self {
        Self::from_parts(attributes, None, None, None, status)
    }

    /// Builds a row, deriving the geometry from the coordinates.
    #[must_use]
    pub fn from_parts(
        attributes: Record,
        longitude: Option<f64>,
        latitude: Option<f64>,
        address: Option<String>,
        status: GeocodeStatus,
    ) -> Self {
        let geometry = match (longitude, latitude) {
            (Some(x), Some(y)) if x.is_finite() && y.is_finite() => Some(Point::new(x, y)),
            _ => None,
        };
        Self {
            attributes,
            longitude,
            latitude,
            address,
            status,
            geometry,
        }
    }

    /// Returns the input record broadened with the geocode columns.
    #[must_use]
    pub fn to_record(&self) -> Record {
        let mut record = self.attributes.clone();
        record.insert(LONGITUDE_COLUMN.to_string(), number_or_null(self.longitude));
        record.insert(LATITUDE_COLUMN.to_string(), number_or_null(self.latitude));
        record.insert(
            ADDRESS_COLUMN.to_string(),
            self.address.clone().map_or(Value::Null, Value::String),
        );
        record.insert(
            STATUS_COLUMN.to_string(),
            Value::String(self.status.as_str().to_string()),
        );
        record
    }
}

/// A table of geocoded locations.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PointDataset {
    /// Reference system of the point geometries
    pub crs: Crs,
    /// Rows in input order
    pub rows: Vec<PointRow>,
}

impl PointDataset {
    /// Creates a dataset from rows in the given reference system.
    #[must_use]
    pub fn new(crs: Crs, rows: Vec<PointRow>) -> Self {
        Self { crs, rows }
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns `true` when the dataset has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Number of rows carrying a point geometry.
    #[must_use]
    pub fn located_count(&self) -> usize {
        self.rows.iter().filter(|r| r.geometry.is_some()).count()
    }
}

/// One feature of a polygon dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct PolygonFeature {
    /// Feature properties
    pub attributes: Record,
    /// Feature geometry, if any
    pub geometry: Option<Geometry<f64>>,
}

/// A table of polygon boundaries loaded from a vector file.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PolygonDataset {
    /// Reference system of the geometries
    pub crs: Crs,
    /// Features in file order
    pub features: Vec<PolygonFeature>,
}

impl PolygonDataset {
    /// Creates a dataset from features in the given reference system.
    #[must_use]
    pub fn new(crs: Crs, features: Vec<PolygonFeature>) -> Self {
        Self { crs, features }
    }

    /// Number of features.
    #[must_use]
    pub fn len(&self) -> usize {
        self.features.len()
    }

    /// Returns `true` when the dataset has no features.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

/// The polygon side of a joined row.
#[derive(Debug, Clone, PartialEq)]
pub struct PolygonMatch {
    /// Index of the feature in the polygon dataset
    pub index: usize,
    /// Feature properties
    pub attributes: Record,
    /// Feature geometry, in the point dataset's reference system
    pub geometry: Geometry<f64>,
}

/// One row of a joined dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinedRow {
    /// The point row (always carries a geometry)
    pub point: PointRow,
    /// The containing polygon, if one was found
    pub polygon: Option<PolygonMatch>,
}

impl JoinedRow {
    /// Flattens the row into one record, naming columns the way a left spatial
    /// join does: a column present on both sides gets `_left` / `_right` suffixes.
    ///
    /// Polygon columns are null when no containing polygon was found. The
    /// polygon geometry is not included; see [`POLYGON_GEOMETRY_COLUMN`].
    #[must_use]
    pub fn to_record(&self, polygon_columns: &[String]) -> Record {
        let left = self.point.to_record();
        let mut record = Record::new();

        for (key, value) in &left {
            if polygon_columns.iter().any(|c| c == key) {
                record.insert(format!("{key}_left"), value.clone());
            } else {
                record.insert(key.clone(), value.clone());
            }
        }

        record.insert(
            INDEX_RIGHT_COLUMN.to_string(),
            self.polygon
                .as_ref()
                .map_or(Value::Null, |m| Value::from(m.index)),
        );

        for column in polygon_columns {
            let value = self
                .polygon
                .as_ref()
                .and_then(|m| m.attributes.get(column))
                .cloned()
                .unwrap_or(Value::Null);
            if left.contains_key(column) {
                record.insert(format!("{column}_right"), value);
            } else {
                record.insert(column.clone(), value);
            }
        }

        record
    }
}

/// A point dataset left-joined against a polygon dataset.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct JoinedDataset {
    /// Reference system of both geometry columns
    pub crs: Crs,
    /// Union of polygon property names, in first-seen order
    pub polygon_columns: Vec<String>,
    /// Joined rows, ordered by point then polygon index
    pub rows: Vec<JoinedRow>,
}

impl JoinedDataset {
    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns `true` when the dataset has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Number of rows that found a containing polygon.
    #[must_use]
    pub fn matched_count(&self) -> usize {
        self.rows.iter().filter(|r| r.polygon.is_some()).count()
    }

    /// Flattened records for every row.
    #[must_use]
    pub fn records(&self) -> Vec<Record> {
        self.rows
            .iter()
            .map(|row| row.to_record(&self.polygon_columns))
            .collect()
    }
}

fn number_or_null(value: Option<f64>) -> Value {
    value.map_or(Value::Null, Value::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_point_row_geometry_requires_both_coordinates() {
        let row = PointRow::from_parts(
            Record::new(),
            Some(106.8),
            None,
            None,
            GeocodeStatus::NotFound,
        );
        assert!(row.geometry.is_none());

        let row = PointRow::found(Record::new(), &GeocodeMatch::new(106.8, -6.2, "Jakarta"));
        assert_eq!(row.geometry, Some(Point::new(106.8, -6.2)));
    }

    #[test]
    fn test_unresolved_record_has_null_columns() {
        let row = PointRow::unresolved(
            record(json!({"location": "ZZZNOWHERE123"})),
            GeocodeStatus::NotFound,
        );
        let rec = row.to_record();
        assert_eq!(rec["location"], json!("ZZZNOWHERE123"));
        assert_eq!(rec[LONGITUDE_COLUMN], Value::Null);
        assert_eq!(rec[LATITUDE_COLUMN], Value::Null);
        assert_eq!(rec[ADDRESS_COLUMN], Value::Null);
        assert_eq!(rec[STATUS_COLUMN], json!("not_found"));
    }

    #[test]
    fn test_joined_record_renames_collisions() {
        let point = PointRow::found(
            record(json!({"name": "Monas", "id": 7})),
            &GeocodeMatch::new(106.82, -6.17, "Monas, Jakarta"),
        );
        let row = JoinedRow {
            point,
            polygon: Some(PolygonMatch {
                index: 2,
                attributes: record(json!({"name": "Jakarta Pusat", "code": "31.71"})),
                geometry: Geometry::Point(Point::new(0.0, 0.0)),
            }),
        };
        let rec = row.to_record(&["name".to_string(), "code".to_string()]);

        assert_eq!(rec["name_left"], json!("Monas"));
        assert_eq!(rec["name_right"], json!("Jakarta Pusat"));
        assert_eq!(rec["code"], json!("31.71"));
        assert_eq!(rec["id"], json!(7));
        assert_eq!(rec[INDEX_RIGHT_COLUMN], json!(2));
        assert!(!rec.contains_key("name"));
    }

    #[test]
    fn test_joined_record_without_match_has_null_polygon_columns() {
        let row = JoinedRow {
            point: PointRow::found(record(json!({"id": 1})), &GeocodeMatch::new(0.0, 0.0, "x")),
            polygon: None,
        };
        let rec = row.to_record(&["code".to_string()]);
        assert_eq!(rec["code"], Value::Null);
        assert_eq!(rec[INDEX_RIGHT_COLUMN], Value::Null);
    }

    #[test]
    fn test_status_labels() {
        assert_eq!(GeocodeStatus::Found.as_str(), "found");
        assert_eq!(
            GeocodeStatus::from_label("not_found"),
            Some(GeocodeStatus::NotFound)
        );
        assert_eq!(GeocodeStatus::from_label("bogus"), None);
    }
}
