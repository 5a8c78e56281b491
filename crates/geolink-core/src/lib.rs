//! `geolink-core` turns free-text place names into coordinates, relates those points to
//! polygon boundaries, and draws the result on an interactive map.
//!
//! This crate includes:
//! - **Resolver**: [`resolver::LocationResolver`] sequences geocoding, spatial joins and
//!   rendering over pluggable providers.
//! - **Providers**: the [`provider`] traits, with a Nominatim geocoder ([`nominatim`]),
//!   an R-tree spatial join ([`join`]) and a Leaflet renderer ([`render`]).
//! - **Data Structures**: point, polygon and joined datasets in [`types`], tagged with a
//!   coordinate reference system from [`crs`].
//! - **I/O**: GeoJSON and CSV readers and writers in [`io`].
//!
//! Errors are reported through [`error::GeoLinkError`]. The crate logs through the `log`
//! facade and never installs a logger itself.

pub mod crs;
pub mod error;
pub mod io;
pub mod join;
pub mod nominatim;
pub mod provider;
pub mod render;
pub mod resolver;
pub mod types;

pub use error::{GeoLinkError, Result};
pub use resolver::{LocationResolver, ResolverConfig};
