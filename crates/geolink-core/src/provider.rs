//! Narrow interfaces over the external services the resolver depends on.
//!
//! The resolver only sequences calls; the heavy lifting is delegated to a
//! geocoding provider, a spatial-join provider and a map renderer. Each sits
//! behind a trait here so the orchestration can run against fakes in tests.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::{GeocodeError, Result};
use crate::render::{MapFeature, MapOptions};
use crate::types::{GeocodeMatch, JoinedDataset, PointDataset, PolygonDataset};

/// A single geocoding request.
#[derive(Debug, Clone, PartialEq)]
pub struct GeocodeQuery {
    /// Free-text place description
    pub text: String,
    /// ISO 3166-1 alpha-2 codes restricting the search; empty means worldwide
    pub country_codes: Vec<String>,
    /// Ask for at most one candidate
    pub exactly_one: bool,
    /// Per-request timeout
    pub timeout: Duration,
}

/// Turns a free-text query into zero or more candidates.
///
/// An empty vector means the service answered and nothing matched. Transport,
/// service and parse failures are reported as [`GeocodeError`].
#[async_trait]
pub trait GeocodeProvider: Send + Sync {
    /// Short provider name used in log messages.
    fn name(&self) -> &str;

    /// Runs one lookup.
    async fn geocode(
        &self,
        query: &GeocodeQuery,
    ) -> std::result::Result<Vec<GeocodeMatch>, GeocodeError>;
}

/// Geometric predicate for a spatial join.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JoinPredicate {
    /// The left geometry lies in the interior of the right geometry.
    #[default]
    Within,
}

/// Relates a point dataset to a polygon dataset by a geometric predicate.
pub trait SpatialJoinProvider {
    /// Left-joins `points` against `polygons`.
    ///
    /// # Errors
    ///
    /// Returns an error when the two datasets cannot be brought into the same
    /// reference system.
    fn join(
        &self,
        points: &PointDataset,
        polygons: &PolygonDataset,
        predicate: JoinPredicate,
    ) -> Result<JoinedDataset>;
}

/// Draws map features into a renderable map artifact.
pub trait MapRenderer {
    /// The map artifact produced.
    type Map;

    /// Renders `features` using `options`.
    ///
    /// # Errors
    ///
    /// Returns an error when the features cannot be serialized for display.
    fn render(&self, features: &[MapFeature], options: &MapOptions) -> Result<Self::Map>;
}
