//! Readers and writers for the files the resolver consumes and produces.
//!
//! - [`geojson`]: polygon boundaries in, point and joined datasets out.
//! - [`shapefile`]: polygon boundaries in.
//! - [`csv`]: tabular location inputs and one-name-per-line text lists.

pub mod csv;
pub mod geojson;
pub mod shapefile;

use std::path::Path;

use crate::error::Result;
use crate::types::PolygonDataset;

/// Load a georeferenced vector file of polygon boundaries, as-is.
///
/// Files ending in `.shp` are read as shapefiles; anything else as `GeoJSON`.
///
/// # Errors
///
/// Returns an error if the file is missing or cannot be parsed.
pub fn load_polygon_dataset(path: impl AsRef<Path>) -> Result<PolygonDataset> {
    let path = path.as_ref();
    let dataset = if is_shapefile(path) {
        self::shapefile::read_shapefile(path)?
    } else {
        self::geojson::read_geojson(path)?.into_polygon_dataset()
    };
    log::info!(
        "Loaded {} polygon feature(s) from {} ({})",
        dataset.len(),
        path.display(),
        dataset.crs
    );
    Ok(dataset)
}

fn is_shapefile(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("shp"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crs::Crs;
    use tempfile::TempDir;

    #[test]
    fn test_extension_picks_reader() {
        assert!(is_shapefile(Path::new("districts.shp")));
        assert!(is_shapefile(Path::new("DISTRICTS.SHP")));
        assert!(!is_shapefile(Path::new("districts.geojson")));
        assert!(!is_shapefile(Path::new("shp")));
    }

    #[test]
    fn test_load_geojson_polygons() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("districts.geojson");
        std::fs::write(
            &path,
            r#"{"type": "FeatureCollection", "features": [
                {"type": "Feature", "properties": {"district": "A"},
                 "geometry": {"type": "Polygon", "coordinates": [[[0, 0], [1, 0], [1, 1], [0, 0]]]}}
            ]}"#,
        )
        .unwrap();

        let dataset = load_polygon_dataset(&path).unwrap();
        assert_eq!(dataset.crs, Crs::Wgs84);
        assert_eq!(dataset.len(), 1);
    }
}
