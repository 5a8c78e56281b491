//! Display utilities for formatting CLI output.
//!
//! This module provides table row structures and formatting functions
//! for presenting dataset information and geocoding results in a human-readable format.

use std::collections::{BTreeMap, BTreeSet};

use geo_types::Geometry;
use serde_json::Value;
use tabled::{Table, Tabled};

use geolink_core::io::geojson::FeatureTable;
use geolink_core::types::{GeocodeStatus, JoinedDataset, PointDataset};

/// Summary of a `GeoJSON` dataset as shown by the `info` command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetInfo {
    /// Path the dataset was read from.
    pub dataset: String,
    /// Coordinate reference system identifier.
    pub crs: String,
    /// Number of features.
    pub feature_count: usize,
    /// Number of features per geometry kind, including `None`.
    pub geometry_kinds: BTreeMap<String, usize>,
    /// Property names in first-seen order, with the JSON types observed for each.
    pub fields: Vec<FieldInfo>,
}

/// One property column of a dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldInfo {
    /// Property name.
    pub name: String,
    /// JSON types seen in non-null values, e.g. `string` or `number|string`.
    pub data_type: String,
    /// Number of features where the property is missing or `null`.
    pub null_count: usize,
}

/// Table row representation for displaying geometry kind counts.
#[derive(Tabled)]
pub struct GeometryRow {
    /// Geometry kind (e.g., `Point`, `MultiPolygon`).
    #[tabled(rename = "Geometry")]
    pub kind: String,
    /// Number of features with this kind.
    #[tabled(rename = "Count")]
    pub count: usize,
}

/// Table row representation for displaying field/column information.
#[derive(Tabled)]
pub struct FieldRow {
    /// Name of the field.
    #[tabled(rename = "Field")]
    pub name: String,
    /// Data type of the field.
    #[tabled(rename = "Type")]
    pub data_type: String,
    /// Number of missing or null values.
    #[tabled(rename = "Nulls")]
    pub nulls: usize,
}

/// Table row representation for a count summary.
#[derive(Tabled)]
pub struct CountRow {
    /// What is counted.
    #[tabled(rename = "Result")]
    pub label: String,
    /// How many.
    #[tabled(rename = "Rows")]
    pub count: usize,
}

/// Build the summary of a feature table.
#[must_use]
pub fn summarize(dataset: &str, table: &FeatureTable) -> DatasetInfo {
    let mut geometry_kinds = BTreeMap::new();
    let mut fields: Vec<(String, BTreeSet<&'static str>, usize)> = Vec::new();

    for feature in &table.features {
        let kind = feature.geometry.as_ref().map_or("None", geometry_kind);
        *geometry_kinds.entry(kind.to_string()).or_insert(0) += 1;

        for (key, value) in &feature.properties {
            let idx = match fields.iter().position(|(name, _, _)| name == key) {
                Some(idx) => idx,
                None => {
                    fields.push((key.clone(), BTreeSet::new(), 0));
                    fields.len() - 1
                },
            };
            match value_type(value) {
                Some(ty) => {
                    fields[idx].1.insert(ty);
                },
                None => fields[idx].2 += 1,
            }
        }
    }

    // Properties absent from a feature count as nulls too.
    let total = table.features.len();
    let fields = fields
        .into_iter()
        .map(|(name, types, nulls)| {
            let present = table
                .features
                .iter()
                .filter(|f| f.properties.contains_key(&name))
                .count();
            let data_type = if types.is_empty() {
                "null".to_string()
            } else {
                types.into_iter().collect::<Vec<_>>().join("|")
            };
            FieldInfo {
                name,
                data_type,
                null_count: nulls + (total - present),
            }
        })
        .collect();

    DatasetInfo {
        dataset: dataset.to_string(),
        crs: table.crs.to_string(),
        feature_count: total,
        geometry_kinds,
        fields,
    }
}

/// Display dataset information in a formatted table.
///
/// This function presents the feature count, CRS, geometry kinds and field schema
/// in a human-readable table format written to standard output.
///
/// # Arguments
///
/// * `info` - The dataset information to display
pub fn display_dataset_info(info: &DatasetInfo) {
    println!("\nDataset: {}", info.dataset);
    println!("CRS: {}", info.crs);
    println!("Features: {}", info.feature_count);

    if !info.geometry_kinds.is_empty() {
        println!("\n=== Geometry ===");

        let geo_rows: Vec<GeometryRow> = info
            .geometry_kinds
            .iter()
            .map(|(kind, count)| GeometryRow {
                kind: kind.clone(),
                count: *count,
            })
            .collect();

        let geo_table = Table::new(geo_rows).to_string();
        println!("{geo_table}");
    }

    if !info.fields.is_empty() {
        println!("\n=== Fields ===");

        let field_rows: Vec<FieldRow> = info
            .fields
            .iter()
            .map(|f| FieldRow {
                name: f.name.clone(),
                data_type: f.data_type.clone(),
                nulls: f.null_count,
            })
            .collect();

        let field_table = Table::new(field_rows).to_string();
        println!("{field_table}");
    }
}

/// Rows for the geocoding summary: one per status plus the located total.
#[must_use]
pub fn geocode_summary_rows(points: &PointDataset) -> Vec<CountRow> {
    let mut found = 0;
    let mut not_found = 0;
    let mut failed = 0;
    for row in &points.rows {
        match row.status {
            GeocodeStatus::Found => found += 1,
            GeocodeStatus::NotFound => not_found += 1,
            GeocodeStatus::Failed(_) => failed += 1,
        }
    }

    vec![
        CountRow {
            label: GeocodeStatus::Found.as_str().to_string(),
            count: found,
        },
        CountRow {
            label: GeocodeStatus::NotFound.as_str().to_string(),
            count: not_found,
        },
        CountRow {
            label: "failed".to_string(),
            count: failed,
        },
        CountRow {
            label: "total".to_string(),
            count: points.len(),
        },
    ]
}

/// Print the geocoding summary table.
pub fn display_geocode_summary(points: &PointDataset) {
    println!("{}", Table::new(geocode_summary_rows(points)));
}

/// Print the join summary table.
pub fn display_join_summary(joined: &JoinedDataset) {
    let rows = vec![
        CountRow {
            label: "matched".to_string(),
            count: joined.matched_count(),
        },
        CountRow {
            label: "unmatched".to_string(),
            count: joined.len() - joined.matched_count(),
        },
        CountRow {
            label: "total".to_string(),
            count: joined.len(),
        },
    ];
    println!("{}", Table::new(rows));
}

fn geometry_kind(geometry: &Geometry<f64>) -> &'static str {
    match geometry {
        Geometry::Point(_) => "Point",
        Geometry::Line(_) => "Line",
        Geometry::LineString(_) => "LineString",
        Geometry::Polygon(_) => "Polygon",
        Geometry::MultiPoint(_) => "MultiPoint",
        Geometry::MultiLineString(_) => "MultiLineString",
        Geometry::MultiPolygon(_) => "MultiPolygon",
        Geometry::GeometryCollection(_) => "GeometryCollection",
        Geometry::Rect(_) => "Rect",
        Geometry::Triangle(_) => "Triangle",
    }
}

fn value_type(value: &Value) -> Option<&'static str> {
    match value {
        Value::Null => None,
        Value::Bool(_) => Some("boolean"),
        Value::Number(_) => Some("number"),
        Value::String(_) => Some("string"),
        Value::Array(_) => Some("array"),
        Value::Object(_) => Some("object"),
    }
}
