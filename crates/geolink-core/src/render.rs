//! Interactive map rendering with Leaflet.
//!
//! Datasets are first turned into [`MapFeature`]s (markers for points, GeoJSON
//! overlays for everything else), then a [`MapRenderer`] lays them out. The
//! bundled [`LeafletRenderer`] produces a [`LeafletMap`]: a self-contained HTML
//! page with separate "Points" and "Polygons" layers and a layer control.

use std::collections::HashSet;
use std::path::Path;

use geo_types::{Geometry, Point};
use serde::Serialize;
use serde_json::Value;

use crate::crs::Crs;
use crate::error::{GeoLinkError, IoErrorExt, Result};
use crate::io::geojson::{FeatureTable, geometry_from_property};
use crate::provider::MapRenderer;
use crate::types::{
    INDEX_RIGHT_COLUMN, JoinedDataset, POLYGON_GEOMETRY_COLUMN, PointDataset, PolygonDataset,
    Record,
};

/// Name of the marker layer in the layer control.
pub const POINTS_LAYER: &str = "Points";
/// Name of the overlay layer in the layer control.
pub const POLYGONS_LAYER: &str = "Polygons";
/// Zoom level used when none is given.
pub const DEFAULT_ZOOM: u8 = 10;

const LEAFLET_VERSION: &str = "1.9.4";
const DATA_PLACEHOLDER: &str = "__GEOLINK_MAP_DATA__";
const TITLE_PLACEHOLDER: &str = "__GEOLINK_MAP_TITLE__";

const HTML_TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
<head>
  <meta charset="utf-8" />
  <meta name="viewport" content="width=device-width, initial-scale=1.0" />
  <title>__GEOLINK_MAP_TITLE__</title>
  <link rel="stylesheet" href="https://unpkg.com/leaflet@__LEAFLET_VERSION__/dist/leaflet.css" />
  <script src="https://unpkg.com/leaflet@__LEAFLET_VERSION__/dist/leaflet.js"></script>
  <style>html, body, #map { height: 100%; margin: 0; }</style>
</head>
<body>
  <div id="map"></div>
  <script>
    const data = __GEOLINK_MAP_DATA__;
    const map = L.map("map").setView(data.center, data.zoom);
    L.tileLayer("https://tile.openstreetmap.org/{z}/{x}/{y}.png", {
      maxZoom: 19,
      attribution: "&copy; OpenStreetMap contributors"
    }).addTo(map);

    const polygons = L.featureGroup();
    data.shapes.forEach((shape) => {
      const layer = L.geoJSON(shape.geometry);
      if (shape.popup) { layer.bindPopup(shape.popup); }
      layer.addTo(polygons);
    });

    const points = L.featureGroup();
    data.markers.forEach((marker) => {
      const layer = L.marker([marker.lat, marker.lon]);
      if (marker.popup) { layer.bindPopup(marker.popup); }
      layer.addTo(points);
    });

    polygons.addTo(map);
    points.addTo(map);
    const overlays = {};
    overlays[data.layers.points] = points;
    overlays[data.layers.polygons] = polygons;
    L.control.layers(null, overlays).addTo(map);
  </script>
</body>
</html>
"#;

/// What a feature contributes to the map.
#[derive(Debug, Clone, PartialEq)]
pub enum MapGeometry {
    /// A marker at a point (x = longitude, y = latitude).
    Marker(Point<f64>),
    /// A GeoJSON overlay (polygons and anything else that is not a point).
    Shape(Geometry<f64>),
}

/// A single drawable feature in EPSG:4326.
#[derive(Debug, Clone, PartialEq)]
pub struct MapFeature {
    /// Geometry to draw
    pub geometry: MapGeometry,
    /// Fields shown in the popup
    pub properties: Record,
    /// Features sharing a key are drawn once; joined rows share their polygon's index
    pub key: Option<usize>,
}

/// Options for [`MapRenderer::render`].
#[derive(Debug, Clone, PartialEq)]
pub struct MapOptions {
    /// Show only this field in popups instead of every field
    pub popup_field: Option<String>,
    /// Map center as (latitude, longitude); defaults to the mean of the markers
    pub center: Option<(f64, f64)>,
    /// Initial zoom level
    pub zoom: u8,
    /// Page title
    pub title: String,
}

impl Default for MapOptions {
    fn default() -> Self {
        Self {
            popup_field: None,
            center: None,
            zoom: DEFAULT_ZOOM,
            title: "GeoLink map".to_string(),
        }
    }
}

/// A point marker as embedded in the generated page.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarkerSpec {
    /// Latitude in degrees
    pub lat: f64,
    /// Longitude in degrees
    pub lon: f64,
    /// Popup text, if the popup field had a value
    pub popup: Option<String>,
}

/// A polygon shape as embedded in the generated page.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShapeSpec {
    /// `GeoJSON` geometry object
    pub geometry: Value,
    /// Popup text, if the popup field had a value
    pub popup: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct LayerNames {
    points: &'static str,
    polygons: &'static str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct MapData<'a> {
    center: [f64; 2],
    zoom: u8,
    layers: LayerNames,
    markers: &'a [MarkerSpec],
    shapes: &'a [ShapeSpec],
}

/// A rendered Leaflet map.
///
/// Persisting the map is left to the caller: [`LeafletMap::to_html`] returns the
/// page and [`LeafletMap::save`] writes it to a file.
#[derive(Debug, Clone, PartialEq)]
pub struct LeafletMap {
    /// Map center as (latitude, longitude)
    pub center: (f64, f64),
    /// Initial zoom level
    pub zoom: u8,
    /// Page title
    pub title: String,
    /// Markers in the "Points" layer
    pub markers: Vec<MarkerSpec>,
    /// Overlays in the "Polygons" layer
    pub shapes: Vec<ShapeSpec>,
}

impl LeafletMap {
    /// Renders the map as a standalone HTML page.
    ///
    /// # Errors
    ///
    /// Returns an error if the map data cannot be serialized.
    pub fn to_html(&self) -> Result<String> {
        let data = MapData {
            center: [self.center.0, self.center.1],
            zoom: self.zoom,
            layers: LayerNames {
                points: POINTS_LAYER,
                polygons: POLYGONS_LAYER,
            },
            markers: &self.markers,
            shapes: &self.shapes,
        };
        let json = serde_json::to_string(&data)
            .map_err(|e| GeoLinkError::Other(anyhow::anyhow!("Failed to encode map data: {e}")))?
            // Keep a "</script>" inside a popup from closing the script block.
            .replace("</", "<\\/");

        Ok(HTML_TEMPLATE
            .replace("__LEAFLET_VERSION__", LEAFLET_VERSION)
            .replace(TITLE_PLACEHOLDER, &escape_html(&self.title))
            .replace(DATA_PLACEHOLDER, &json))
    }

    /// Writes the HTML page to `path`.
    ///
    /// # Errors
    ///
    /// Returns an [`crate::error::IoError::Write`] if the file cannot be written.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        std::fs::write(path, self.to_html()?).with_write_context("HTML", path)?;
        log::info!("Saved map to {}", path.display());
        Ok(())
    }
}

/// The default [`MapRenderer`], producing a [`LeafletMap`].
#[derive(Debug, Clone, Copy, Default)]
pub struct LeafletRenderer;

impl MapRenderer for LeafletRenderer {
    type Map = LeafletMap;

    fn render(&self, features: &[MapFeature], options: &MapOptions) -> Result<LeafletMap> {
        let center = options
            .center
            .unwrap_or_else(|| default_center(features));

        let mut markers = Vec::new();
        let mut shapes = Vec::new();
        let mut drawn_keys = HashSet::new();

        for feature in features {
            let popup = build_popup(&feature.properties, options.popup_field.as_deref());
            match &feature.geometry {
                MapGeometry::Marker(point) => markers.push(MarkerSpec {
                    lat: point.y(),
                    lon: point.x(),
                    popup,
                }),
                MapGeometry::Shape(geometry) => {
                    if let Some(key) = feature.key
                        && !drawn_keys.insert(key)
                    {
                        continue;
                    }
                    let geometry = serde_json::to_value(geojson::Geometry::new(
                        geojson::Value::from(geometry),
                    ))
                    .map_err(|e| {
                        GeoLinkError::Other(anyhow::anyhow!("Failed to encode geometry: {e}"))
                    })?;
                    shapes.push(ShapeSpec { geometry, popup });
                },
            }
        }

        log::info!(
            "Rendered {} marker(s) and {} overlay(s) centered at ({:.5}, {:.5})",
            markers.len(),
            shapes.len(),
            center.0,
            center.1
        );

        Ok(LeafletMap {
            center,
            zoom: options.zoom,
            title: options.title.clone(),
            markers,
            shapes,
        })
    }
}

/// Mean (latitude, longitude) of all markers, or `(0, 0)` when there are none.
#[must_use]
pub fn default_center(features: &[MapFeature]) -> (f64, f64) {
    let (sum_x, sum_y, count) = features
        .iter()
        .filter_map(|f| match f.geometry {
            MapGeometry::Marker(p) if p.x().is_finite() && p.y().is_finite() => Some(p),
            _ => None,
        })
        .fold((0.0, 0.0, 0usize), |(sx, sy, n), p| {
            (sx + p.x(), sy + p.y(), n + 1)
        });

    if count == 0 {
        (0.0, 0.0)
    } else {
        #[allow(clippy::cast_precision_loss)]
        let n = count as f64;
        (sum_y / n, sum_x / n)
    }
}

/// Builds the popup HTML for one feature.
///
/// With `popup_field`, the popup is that field's value (no popup if the feature
/// lacks it). Without, it is a table of every non-geometry field.
fn build_popup(properties: &Record, popup_field: Option<&str>) -> Option<String> {
    if let Some(field) = popup_field {
        return properties
            .get(field)
            .filter(|v| !v.is_null())
            .map(|v| escape_html(&display_value(v)));
    }

    let rows: String = properties
        .iter()
        .filter(|(key, _)| key.as_str() != POLYGON_GEOMETRY_COLUMN)
        .map(|(key, value)| {
            format!(
                "<tr><th>{}</th><td>{}</td></tr>",
                escape_html(key),
                escape_html(&display_value(value))
            )
        })
        .collect();

    if rows.is_empty() {
        None
    } else {
        Some(format!("<table>{rows}</table>"))
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Conversion of a dataset into drawable features in EPSG:4326.
pub trait ToMapFeatures {
    /// Builds the features.
    ///
    /// # Errors
    ///
    /// Returns a [`crate::error::ProjectionError`] if the dataset cannot be
    /// brought into EPSG:4326.
    fn to_map_features(&self) -> Result<Vec<MapFeature>>;
}

impl ToMapFeatures for PointDataset {
    fn to_map_features(&self) -> Result<Vec<MapFeature>> {
        let mut features = Vec::new();
        for row in &self.rows {
            if let Some(point) = row.geometry {
                features.push(MapFeature {
                    geometry: MapGeometry::Marker(self.crs.transform_point(&Crs::Wgs84, point)?),
                    properties: row.to_record(),
                    key: None,
                });
            }
        }
        Ok(features)
    }
}

impl ToMapFeatures for PolygonDataset {
    fn to_map_features(&self) -> Result<Vec<MapFeature>> {
        let mut features = Vec::new();
        for (index, feature) in self.features.iter().enumerate() {
            if let Some(geometry) = &feature.geometry {
                push_geometry(
                    &mut features,
                    &self.crs,
                    geometry,
                    &feature.attributes,
                    Some(index),
                )?;
            }
        }
        Ok(features)
    }
}

impl ToMapFeatures for JoinedDataset {
    fn to_map_features(&self) -> Result<Vec<MapFeature>> {
        let mut features = Vec::new();
        for row in &self.rows {
            if let Some(point) = row.point.geometry {
                features.push(MapFeature {
                    geometry: MapGeometry::Marker(self.crs.transform_point(&Crs::Wgs84, point)?),
                    properties: row.to_record(&self.polygon_columns),
                    key: None,
                });
            }
            if let Some(polygon) = &row.polygon {
                push_geometry(
                    &mut features,
                    &self.crs,
                    &polygon.geometry,
                    &polygon.attributes,
                    Some(polygon.index),
                )?;
            }
        }
        Ok(features)
    }
}

impl ToMapFeatures for FeatureTable {
    /// Features read back from a file: the feature geometry is drawn, and a
    /// `polygon_geometry` property (as written for joined datasets) is drawn as
    /// an overlay keyed by `index_right`.
    fn to_map_features(&self) -> Result<Vec<MapFeature>> {
        let mut features = Vec::new();
        for record in &self.features {
            if let Some(geometry) = &record.geometry {
                push_geometry(&mut features, &self.crs, geometry, &record.properties, None)?;
            }
            if let Some(polygon) = record
                .properties
                .get(POLYGON_GEOMETRY_COLUMN)
                .and_then(geometry_from_property)
            {
                let key = record
                    .properties
                    .get(INDEX_RIGHT_COLUMN)
                    .and_then(Value::as_u64)
                    .and_then(|i| usize::try_from(i).ok());
                push_geometry(&mut features, &self.crs, &polygon, &record.properties, key)?;
            }
        }
        Ok(features)
    }
}

fn push_geometry(
    features: &mut Vec<MapFeature>,
    crs: &Crs,
    geometry: &Geometry<f64>,
    properties: &Record,
    key: Option<usize>,
) -> Result<()> {
    let geometry = crs.transform(&Crs::Wgs84, geometry)?;
    match geometry {
        Geometry::Point(point) => features.push(MapFeature {
            geometry: MapGeometry::Marker(point),
            properties: properties.clone(),
            key: None,
        }),
        Geometry::MultiPoint(points) => {
            for point in points {
                features.push(MapFeature {
                    geometry: MapGeometry::Marker(point),
                    properties: properties.clone(),
                    key: None,
                });
            }
        },
        shape => features.push(MapFeature {
            geometry: MapGeometry::Shape(shape),
            properties: properties.clone(),
            key,
        }),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{GeocodeMatch, GeocodeStatus, JoinedRow, PointRow, PolygonMatch};
    use geo_types::polygon;
    use serde_json::json;

    fn attrs(value: Value) -> Record {
        value.as_object().cloned().unwrap_or_default()
    }

    fn marker(x: f64, y: f64, props: Value) -> MapFeature {
        MapFeature {
            geometry: MapGeometry::Marker(Point::new(x, y)),
            properties: attrs(props),
            key: None,
        }
    }

    fn district() -> Geometry<f64> {
        polygon![(x: 0.0, y: 0.0), (x: 4.0, y: 0.0), (x: 4.0, y: 4.0), (x: 0.0, y: 4.0)].into()
    }

    #[test]
    fn test_default_center_is_mean_of_markers() {
        let features = vec![
            marker(100.0, -2.0, json!({})),
            marker(110.0, -8.0, json!({})),
            MapFeature {
                geometry: MapGeometry::Shape(district()),
                properties: Record::new(),
                key: None,
            },
        ];
        assert_eq!(default_center(&features), (-5.0, 105.0));
    }

    #[test]
    fn test_default_center_falls_back_to_origin() {
        assert_eq!(default_center(&[]), (0.0, 0.0));
    }

    #[test]
    fn test_popup_field_and_table() {
        let props = attrs(json!({"name": "Monas", "address": "Jl. <Medan> Merdeka", "pop": 3}));
        assert_eq!(
            build_popup(&props, Some("name")).as_deref(),
            Some("Monas")
        );
        assert_eq!(build_popup(&props, Some("missing")), None);

        let table = build_popup(&props, None).unwrap();
        assert!(table.starts_with("<table>"));
        assert!(table.contains("<tr><th>pop</th><td>3</td></tr>"));
        assert!(table.contains("Jl. &lt;Medan&gt; Merdeka"));
    }

    #[test]
    fn test_popup_skips_polygon_geometry_column() {
        let props = attrs(json!({"name": "x", "polygon_geometry": {"type": "Point"}}));
        let table = build_popup(&props, None).unwrap();
        assert!(!table.contains("polygon_geometry"));
    }

    #[test]
    fn test_render_layers_and_explicit_center() {
        let features = vec![marker(106.8, -6.2, json!({"name": "Jakarta"}))];
        let options = MapOptions {
            center: Some((1.0, 2.0)),
            zoom: 7,
            ..MapOptions::default()
        };
        let map = LeafletRenderer.render(&features, &options).unwrap();
        assert_eq!(map.center, (1.0, 2.0));
        assert_eq!(map.zoom, 7);
        assert_eq!(map.markers.len(), 1);

        let html = map.to_html().unwrap();
        assert!(html.contains("\"points\":\"Points\""));
        assert!(html.contains("\"polygons\":\"Polygons\""));
        assert!(html.contains("L.control.layers"));
        assert!(html.contains("leaflet@1.9.4"));
        assert!(!html.contains(DATA_PLACEHOLDER));
    }

    #[test]
    fn test_script_close_tag_is_neutralized() {
        let features = vec![marker(0.0, 0.0, json!({"note": "</script><b>x</b>"}))];
        let map = LeafletRenderer
            .render(&features, &MapOptions::default())
            .unwrap();
        let html = map.to_html().unwrap();
        assert_eq!(html.matches("</script>").count(), 2);
    }

    #[test]
    fn test_joined_dataset_draws_each_polygon_once() {
        let polygon = PolygonMatch {
            index: 0,
            attributes: attrs(json!({"district": "A"})),
            geometry: district(),
        };
        let row = |x: f64| JoinedRow {
            point: PointRow::found(Record::new(), &GeocodeMatch::new(x, 1.0, "p")),
            polygon: Some(polygon.clone()),
        };
        let joined = JoinedDataset {
            crs: Crs::Wgs84,
            polygon_columns: vec!["district".to_string()],
            rows: vec![row(1.0), row(2.0), row(3.0)],
        };

        let features = joined.to_map_features().unwrap();
        let map = LeafletRenderer
            .render(&features, &MapOptions::default())
            .unwrap();
        assert_eq!(map.markers.len(), 3);
        assert_eq!(map.shapes.len(), 1);
        assert_eq!(map.center, (1.0, 2.0));
    }

    #[test]
    fn test_point_dataset_skips_unresolved_rows() {
        let dataset = PointDataset::new(
            Crs::Wgs84,
            vec![
                PointRow::found(Record::new(), &GeocodeMatch::new(106.8, -6.2, "Jakarta")),
                PointRow::unresolved(Record::new(), GeocodeStatus::NotFound),
            ],
        );
        assert_eq!(dataset.to_map_features().unwrap().len(), 1);
    }

    #[test]
    fn test_mercator_points_are_shown_in_degrees() {
        let projected = Crs::Wgs84
            .transform_point(&Crs::WebMercator, Point::new(106.8456, -6.2088))
            .unwrap();
        let dataset = PointDataset::new(
            Crs::WebMercator,
            vec![PointRow::found(
                Record::new(),
                &GeocodeMatch::new(projected.x(), projected.y(), "Jakarta"),
            )],
        );
        let features = dataset.to_map_features().unwrap();
        let MapGeometry::Marker(p) = features[0].geometry else {
            panic!("expected marker");
        };
        assert!((p.x() - 106.8456).abs() < 1e-6);
    }

    #[test]
    fn test_feature_table_reads_embedded_polygon() {
        let polygon_json = serde_json::to_value(geojson::Geometry::new(geojson::Value::from(
            &district(),
        )))
        .unwrap();
        let mut properties = attrs(json!({"index_right": 4}));
        properties.insert(POLYGON_GEOMETRY_COLUMN.to_string(), polygon_json);

        let table = FeatureTable {
            crs: Crs::Wgs84,
            features: vec![crate::io::geojson::FeatureRecord {
                properties,
                geometry: Some(Geometry::Point(Point::new(1.0, 1.0))),
            }],
        };
        let features = table.to_map_features().unwrap();
        assert_eq!(features.len(), 2);
        assert!(matches!(features[0].geometry, MapGeometry::Marker(_)));
        assert_eq!(features[1].key, Some(4));
    }
}
