//! Left spatial join of points against polygons.
//!
//! Polygon envelopes are bulk-loaded into an R-tree; each point queries the tree
//! for candidate envelopes and every candidate is checked exactly with
//! [`geo::Contains`]. A point on a polygon boundary is not "within" it.

use geo::{BoundingRect, Contains};
use geo_types::{Geometry, Point};
use rstar::{AABB, RTree, RTreeObject};

use crate::error::{ConfigError, Result};
use crate::provider::{JoinPredicate, SpatialJoinProvider};
use crate::types::{
    INDEX_RIGHT_COLUMN, JoinedDataset, JoinedRow, PointDataset, PolygonDataset, PolygonMatch,
};

/// A polygon geometry stored in the R-tree, tagged with its feature index.
struct IndexedPolygon {
    index: usize,
    envelope: AABB<[f64; 2]>,
}

impl RTreeObject for IndexedPolygon {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

/// The default [`SpatialJoinProvider`], backed by `geo` predicates and an `rstar` index.
#[derive(Debug, Clone, Copy, Default)]
pub struct RTreeSpatialJoin;

impl SpatialJoinProvider for RTreeSpatialJoin {
    fn join(
        &self,
        points: &PointDataset,
        polygons: &PolygonDataset,
        predicate: JoinPredicate,
    ) -> Result<JoinedDataset> {
        spatial_join(points, polygons, predicate)
    }
}

/// Left-joins `points` against `polygons`.
///
/// Point rows without a geometry are dropped. Polygons are reprojected into the
/// point reference system when the two differ. Every point yields one row per
/// matching polygon, in ascending polygon order, or a single row without a
/// polygon when nothing matches.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidOption`] if either side already has an
/// `index_right` column, and a [`crate::error::ProjectionError`] if the polygons
/// cannot be reprojected into the point reference system.
pub fn spatial_join(
    points: &PointDataset,
    polygons: &PolygonDataset,
    predicate: JoinPredicate,
) -> Result<JoinedDataset> {
    check_reserved_columns(points, polygons)?;
    let geometries = reproject_polygons(points, polygons)?;

    let indexed: Vec<IndexedPolygon> = geometries
        .iter()
        .enumerate()
        .filter_map(|(index, geometry)| {
            let rect = geometry.as_ref()?.bounding_rect()?;
            Some(IndexedPolygon {
                index,
                envelope: AABB::from_corners(
                    [rect.min().x, rect.min().y],
                    [rect.max().x, rect.max().y],
                ),
            })
        })
        .collect();
    let tree = RTree::bulk_load(indexed);

    let mut rows = Vec::with_capacity(points.len());
    let mut dropped = 0usize;

    for point_row in &points.rows {
        let Some(point) = point_row.geometry else {
            dropped += 1;
            continue;
        };

        let mut candidates: Vec<usize> = tree
            .locate_in_envelope_intersecting(&AABB::from_point([point.x(), point.y()]))
            .map(|entry| entry.index)
            .collect();
        candidates.sort_unstable();

        let matches: Vec<usize> = candidates
            .into_iter()
            .filter(|&index| {
                geometries[index]
                    .as_ref()
                    .is_some_and(|geometry| satisfies(predicate, point, geometry))
            })
            .collect();

        if matches.is_empty() {
            rows.push(JoinedRow {
                point: point_row.clone(),
                polygon: None,
            });
            continue;
        }

        for index in matches {
            let Some(geometry) = geometries[index].clone() else {
                continue;
            };
            rows.push(JoinedRow {
                point: point_row.clone(),
                polygon: Some(PolygonMatch {
                    index,
                    attributes: polygons.features[index].attributes.clone(),
                    geometry,
                }),
            });
        }
    }

    if dropped > 0 {
        log::info!("Dropped {dropped} point row(s) without geometry before joining");
    }

    let joined = JoinedDataset {
        crs: points.crs.clone(),
        polygon_columns: polygon_columns(polygons),
        rows,
    };
    log::info!(
        "Joined {} point row(s) against {} polygon(s): {} row(s), {} matched",
        points.len() - dropped,
        polygons.len(),
        joined.len(),
        joined.matched_count()
    );
    Ok(joined)
}

/// `index_right` is written by the join itself and must not come from either input.
fn check_reserved_columns(points: &PointDataset, polygons: &PolygonDataset) -> Result<()> {
    let sides = [
        (
            "points",
            points
                .rows
                .iter()
                .any(|row| row.attributes.contains_key(INDEX_RIGHT_COLUMN)),
        ),
        (
            "polygons",
            polygons
                .features
                .iter()
                .any(|f| f.attributes.contains_key(INDEX_RIGHT_COLUMN)),
        ),
    ];
    match sides.into_iter().find(|(_, reserved)| *reserved) {
        Some((side, _)) => Err(ConfigError::InvalidOption {
            option: side.to_string(),
            message: format!(
                "column '{INDEX_RIGHT_COLUMN}' is reserved for the join result; rename it first"
            ),
        }
        .into()),
        None => Ok(()),
    }
}

fn reproject_polygons(
    points: &PointDataset,
    polygons: &PolygonDataset,
) -> Result<Vec<Option<Geometry<f64>>>> {
    if points.crs == polygons.crs {
        return Ok(polygons
            .features
            .iter()
            .map(|f| f.geometry.clone())
            .collect());
    }

    log::info!(
        "Reprojecting {} polygon(s) from {} to {}",
        polygons.len(),
        polygons.crs,
        points.crs
    );
    polygons
        .features
        .iter()
        .map(|f| {
            f.geometry
                .as_ref()
                .map(|g| polygons.crs.transform(&points.crs, g))
                .transpose()
                .map_err(Into::into)
        })
        .collect()
}

fn satisfies(predicate: JoinPredicate, point: Point<f64>, geometry: &Geometry<f64>) -> bool {
    match predicate {
        JoinPredicate::Within => match geometry {
            Geometry::Polygon(polygon) => polygon.contains(&point),
            Geometry::MultiPolygon(multi) => multi.contains(&point),
            Geometry::Rect(rect) => rect.to_polygon().contains(&point),
            Geometry::GeometryCollection(collection) => collection
                .iter()
                .any(|member| satisfies(predicate, point, member)),
            _ => false,
        },
    }
}

/// Union of property names across polygon features, in first-seen order.
fn polygon_columns(polygons: &PolygonDataset) -> Vec<String> {
    let mut columns: Vec<String> = Vec::new();
    for feature in &polygons.features {
        for key in feature.attributes.keys() {
            if !columns.contains(key) {
                columns.push(key.clone());
            }
        }
    }
    columns
}
