//! Location resolver: geocode, join, render.
//!
//! [`LocationResolver`] sequences the providers from [`crate::provider`]. It geocodes
//! one location at a time, in input order, and keeps no state between calls beyond
//! its configuration.
//!
//! # Examples
//!
//! ```no_run
//! use geolink_core::render::MapOptions;
//! use geolink_core::resolver::{LocationResolver, ResolverConfig};
//!
//! # async fn run() -> geolink_core::error::Result<()> {
//! let resolver = LocationResolver::new(ResolverConfig::new("id").with_user_agent("my-app"))?;
//! let points = resolver
//!     .geocode_locations(vec!["Jakarta", "Surabaya"], None, true)
//!     .await?;
//! let districts = resolver.load_polygons("districts.geojson")?;
//! let joined = resolver.spatial_join(&points, &districts)?;
//! resolver.render(&joined, &MapOptions::default())?.save("map.html")?;
//! # Ok(())
//! # }
//! ```

use std::path::Path;
use std::time::Duration;

use serde_json::Value;

use crate::crs::Crs;
use crate::error::{ConfigError, GeocodeError, Result};
use crate::io;
use crate::join::RTreeSpatialJoin;
use crate::nominatim::{DEFAULT_BASE_URL, NominatimGeocoder};
use crate::provider::{
    GeocodeProvider, GeocodeQuery, JoinPredicate, MapRenderer, SpatialJoinProvider,
};
use crate::render::{LeafletRenderer, MapOptions, ToMapFeatures};
use crate::types::{
    GeocodeOutcome, GeocodeStatus, JoinedDataset, LOCATION_COLUMN, LocationInput, PointDataset,
    PointRow, PolygonDataset, Record,
};

/// Client identifier sent to the geocoding service when none is configured.
pub const DEFAULT_USER_AGENT: &str = "geolink";
/// Per-request timeout used when none is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Settings fixed for the lifetime of a [`LocationResolver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolverConfig {
    /// Lower-case ISO 3166-1 alpha-2 codes restricting the search
    pub country_codes: Vec<String>,
    /// Client identifier sent as the HTTP user agent
    pub user_agent: String,
    /// Per-request timeout
    pub timeout: Duration,
    /// Base URL of the geocoding service
    pub base_url: String,
}

impl ResolverConfig {
    /// Creates a configuration restricted to `country_codes`.
    ///
    /// `country_codes` is a comma-separated list such as `"id"` or `"id,my"`;
    /// an empty string searches worldwide.
    #[must_use]
    pub fn new(country_codes: &str) -> Self {
        Self {
            country_codes: country_codes
                .split(',')
                .map(|c| c.trim().to_ascii_lowercase())
                .filter(|c| !c.is_empty())
                .collect(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout: DEFAULT_TIMEOUT,
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    /// Sets the client identifier.
    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Sets the per-request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Points the resolver at another service instance.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Checks the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidOption`] for an empty user agent, a zero
    /// timeout, or a country code that is not two ASCII letters.
    pub fn validate(&self) -> Result<()> {
        if self.user_agent.trim().is_empty() {
            return Err(ConfigError::InvalidOption {
                option: "user_agent".to_string(),
                message: "must not be empty".to_string(),
            }
            .into());
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::InvalidOption {
                option: "timeout".to_string(),
                message: "must be greater than zero".to_string(),
            }
            .into());
        }
        if let Some(bad) = self
            .country_codes
            .iter()
            .find(|c| c.len() != 2 || !c.chars().all(|ch| ch.is_ascii_alphabetic()))
        {
            return Err(ConfigError::InvalidOption {
                option: "country_code".to_string(),
                message: format!("'{bad}' is not an ISO 3166-1 alpha-2 code"),
            }
            .into());
        }
        Ok(())
    }
}

/// Geocodes locations, joins them against polygons and renders the result.
pub struct LocationResolver<R = LeafletRenderer> {
    config: ResolverConfig,
    geocoder: Box<dyn GeocodeProvider>,
    joiner: Box<dyn SpatialJoinProvider + Send + Sync>,
    renderer: R,
}

impl LocationResolver<LeafletRenderer> {
    /// Creates a resolver backed by Nominatim, the R-tree join and Leaflet.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the configuration is invalid.
    pub fn new(config: ResolverConfig) -> Result<Self> {
        config.validate()?;
        let geocoder = NominatimGeocoder::new(&config.base_url, &config.user_agent)?;
        Ok(Self {
            config,
            geocoder: Box::new(geocoder),
            joiner: Box::new(RTreeSpatialJoin),
            renderer: LeafletRenderer,
        })
    }
}

impl<R: MapRenderer> LocationResolver<R> {
    /// Creates a resolver over caller-supplied providers.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the configuration is invalid.
    pub fn with_providers(
        config: ResolverConfig,
        geocoder: Box<dyn GeocodeProvider>,
        joiner: Box<dyn SpatialJoinProvider + Send + Sync>,
        renderer: R,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            geocoder,
            joiner,
            renderer,
        })
    }

    /// The configuration this resolver was built with.
    #[must_use]
    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Geocodes a single location.
    ///
    /// Failures are logged and returned; an answered query without candidates
    /// is [`GeocodeOutcome::NotFound`].
    ///
    /// # Errors
    ///
    /// Returns the provider's [`GeocodeError`] on transport, service or parse failure.
    pub async fn geocode(
        &self,
        location: &str,
        exactly_one: bool,
    ) -> std::result::Result<GeocodeOutcome, GeocodeError> {
        let query = GeocodeQuery {
            text: location.to_string(),
            country_codes: self.config.country_codes.clone(),
            exactly_one,
            timeout: self.config.timeout,
        };

        match self.geocoder.geocode(&query).await {
            Ok(matches) if matches.is_empty() => Ok(GeocodeOutcome::NotFound),
            Ok(mut matches) => {
                if exactly_one {
                    matches.truncate(1);
                }
                Ok(GeocodeOutcome::Found(matches))
            },
            Err(err) => {
                log::warn!("Error geocoding {location} via {}: {err}", self.geocoder.name());
                Err(err)
            },
        }
    }

    /// Geocodes every input record, in order, into a point dataset.
    ///
    /// Each record yields one row per candidate. A record whose lookup finds
    /// nothing or fails yields one row with null coordinates and address, and
    /// the failure is recorded in the row's [`GeocodeStatus`].
    ///
    /// A list input is read as a `location` column; `location_field` is ignored.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingRequired`] when a table is given without
    /// `location_field`. Geocoding failures never produce an error.
    pub async fn geocode_locations(
        &self,
        input: impl Into<LocationInput>,
        location_field: Option<&str>,
        exactly_one: bool,
    ) -> Result<PointDataset> {
        let (records, field) = match input.into() {
            LocationInput::List(names) => {
                let records = names
                    .into_iter()
                    .map(|name| {
                        let mut record = Record::new();
                        record.insert(LOCATION_COLUMN.to_string(), Value::String(name));
                        record
                    })
                    .collect::<Vec<_>>();
                (records, LOCATION_COLUMN.to_string())
            },
            LocationInput::Table(records) => {
                let field = location_field.ok_or_else(|| ConfigError::MissingRequired {
                    option: "location_field".to_string(),
                })?;
                (records, field.to_string())
            },
        };

        let total = records.len();
        let mut rows = Vec::with_capacity(total);
        let (mut found, mut not_found, mut failed) = (0usize, 0usize, 0usize);

        for (idx, record) in records.into_iter().enumerate() {
            let Some(text) = location_text(record.get(&field)) else {
                log::debug!("[{}/{total}] no value in '{field}', skipping lookup", idx + 1);
                not_found += 1;
                rows.push(PointRow::unresolved(record, GeocodeStatus::NotFound));
                continue;
            };

            log::debug!("[{}/{total}] geocoding '{text}'", idx + 1);
            match self.geocode(&text, exactly_one).await {
                Ok(GeocodeOutcome::Found(matches)) => {
                    found += 1;
                    for candidate in &matches {
                        rows.push(PointRow::found(record.clone(), candidate));
                    }
                },
                Ok(GeocodeOutcome::NotFound) => {
                    not_found += 1;
                    rows.push(PointRow::unresolved(record, GeocodeStatus::NotFound));
                },
                Err(err) => {
                    failed += 1;
                    rows.push(PointRow::unresolved(
                        record,
                        GeocodeStatus::Failed(err.to_string()),
                    ));
                },
            }
        }

        log::info!(
            "Geocoded {total} location(s): {found} found, {not_found} not found, {failed} failed; {} row(s)",
            rows.len()
        );
        Ok(PointDataset::new(Crs::Wgs84, rows))
    }

    /// Loads a polygon dataset from a vector file, as-is.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing or cannot be parsed.
    pub fn load_polygons(&self, path: impl AsRef<Path>) -> Result<PolygonDataset> {
        io::load_polygon_dataset(path)
    }

    /// Left-joins `points` against `polygons` with the "within" predicate.
    ///
    /// # Errors
    ///
    /// Returns an error if the polygons cannot be reprojected into the point
    /// reference system.
    pub fn spatial_join(
        &self,
        points: &PointDataset,
        polygons: &PolygonDataset,
    ) -> Result<JoinedDataset> {
        self.joiner.join(points, polygons, JoinPredicate::Within)
    }

    /// Renders any dataset on a map.
    ///
    /// # Errors
    ///
    /// Returns an error if the dataset cannot be converted to EPSG:4326 or the
    /// renderer fails.
    pub fn render<D: ToMapFeatures>(&self, dataset: &D, options: &MapOptions) -> Result<R::Map> {
        let features = dataset.to_map_features()?;
        self.renderer.render(&features, options)
    }
}

/// Text to geocode for a location cell; `None` for null, missing or blank values.
fn location_text(value: Option<&Value>) -> Option<String> {
    let text = match value? {
        Value::Null => return None,
        Value::String(s) => s.trim().to_string(),
        other => other.to_string(),
    };
    (!text.is_empty()).then_some(text)
}
