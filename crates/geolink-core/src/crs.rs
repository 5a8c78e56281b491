//! Coordinate reference system identifiers and the transforms between them.
//!
//! Identifiers are normalized on parse, so `EPSG:32748`, `epsg:32748` and
//! `urn:ogc:def:crs:EPSG::32748` name the same system. Geographic WGS 84
//! (`EPSG:4326`) and spherical Web Mercator (`EPSG:3857`) convert in closed form;
//! every other EPSG pair goes through `proj4rs` with definitions from
//! `crs-definitions`.

use std::fmt;

use geo::MapCoords;
use geo_types::{Coord, Geometry, Point};
use proj4rs::proj::Proj;

use crate::error::ProjectionError;

/// Equatorial radius used by spherical Web Mercator, in meters.
const EARTH_RADIUS: f64 = 6_378_137.0;

/// Latitude bound beyond which Web Mercator is undefined.
const MAX_MERCATOR_LAT: f64 = 85.051_128_779_806_59;

/// A coordinate reference system.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Crs {
    /// Geographic WGS 84, longitude/latitude in degrees.
    #[default]
    Wgs84,
    /// Spherical Web Mercator, meters.
    WebMercator,
    /// Any other system, as a canonical `AUTHORITY:CODE` identifier.
    Other(String),
}

impl Crs {
    /// Parse a CRS identifier as found in files and on the command line.
    ///
    /// Accepts `AUTH:CODE`, `AUTH::CODE`, OGC URNs, OGC HTTP URIs and bare EPSG
    /// numbers, in any case.
    ///
    /// # Examples
    ///
    /// ```
    /// use geolink_core::crs::Crs;
    ///
    /// assert_eq!(Crs::parse("EPSG:4326"), Crs::Wgs84);
    /// assert_eq!(Crs::parse("urn:ogc:def:crs:OGC:1.3:CRS84"), Crs::Wgs84);
    /// assert_eq!(Crs::parse("urn:ogc:def:crs:EPSG::3857"), Crs::WebMercator);
    /// assert_eq!(Crs::parse("EPSG:2154"), Crs::Other("EPSG:2154".to_string()));
    /// assert_eq!(Crs::parse("urn:ogc:def:crs:EPSG::2154"), Crs::parse("epsg:2154"));
    /// ```
    #[must_use]
    pub fn parse(identifier: &str) -> Self {
        let normalized = identifier.trim().to_ascii_uppercase();
        let (authority, code) = split_identifier(&normalized);

        let is_epsg = matches!(authority, None | Some("EPSG"));
        match code {
            "CRS84" | "WGS84" => Crs::Wgs84,
            "4326" if is_epsg => Crs::Wgs84,
            "3857" | "900913" | "102100" | "102113" => Crs::WebMercator,
            _ => match authority {
                Some(authority) => Crs::Other(format!("{authority}:{code}")),
                None if code.chars().all(|c| c.is_ascii_digit()) => {
                    Crs::Other(format!("EPSG:{code}"))
                },
                None => Crs::Other(normalized.clone()),
            },
        }
    }

    /// Derive the system from the WKT of a `.prj` sidecar file.
    ///
    /// The outermost `AUTHORITY["EPSG", ..]` (or WKT2 `ID["EPSG", ..]`) wins. ESRI-style
    /// WKT without an authority is recognized for WGS 84, Web Mercator and the WGS 84
    /// UTM zones; anything else keeps the projection name.
    #[must_use]
    pub fn from_wkt(wkt: &str) -> Self {
        if let Some(code) = wkt_authority_code(wkt) {
            return Crs::parse(&format!("EPSG:{code}"));
        }

        let Some(name) = wkt_name(wkt, "PROJCS[") else {
            return match wkt_name(wkt, "GEOGCS[") {
                Some(name) if is_wgs84_name(&name) => Crs::Wgs84,
                Some(name) => Crs::Other(name),
                None => Crs::Other(wkt.trim().to_string()),
            };
        };

        let upper = name.to_ascii_uppercase().replace(' ', "_");
        if upper.contains("WEB_MERCATOR") || upper.contains("PSEUDO_MERCATOR") {
            return Crs::WebMercator;
        }
        if let Some(zone) = upper
            .strip_prefix("WGS_1984_UTM_ZONE_")
            .or_else(|| upper.strip_prefix("WGS_84_/_UTM_ZONE_"))
            && let Some(code) = utm_epsg_code(zone)
        {
            return Crs::Other(format!("EPSG:{code}"));
        }
        Crs::Other(name)
    }

    /// Returns the canonical identifier for this system.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Crs::Wgs84 => "EPSG:4326",
            Crs::WebMercator => "EPSG:3857",
            Crs::Other(id) => id,
        }
    }

    /// The EPSG code of this system, if it has one.
    #[must_use]
    pub fn epsg_code(&self) -> Option<u16> {
        match self {
            Crs::Wgs84 => Some(4326),
            Crs::WebMercator => Some(3857),
            Crs::Other(id) => id.strip_prefix("EPSG:")?.parse().ok(),
        }
    }

    /// Transform a geometry from `self` into `target`.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Unsupported`] when either system has no known
    /// definition, and [`ProjectionError::Failed`] when a coordinate falls outside
    /// the domain of the projection.
    pub fn transform(
        &self,
        target: &Crs,
        geometry: &Geometry<f64>,
    ) -> Result<Geometry<f64>, ProjectionError> {
        let transformer = self.transformer(target)?;
        geometry.try_map_coords(|c| transformer.apply(c))
    }

    /// Transform a point from `self` into `target`.
    ///
    /// # Errors
    ///
    /// See [`Crs::transform`].
    pub fn transform_point(
        &self,
        target: &Crs,
        point: Point<f64>,
    ) -> Result<Point<f64>, ProjectionError> {
        let transformer = self.transformer(target)?;
        transformer.apply(point.0).map(Point::from)
    }

    fn transformer(&self, target: &Crs) -> Result<Transformer, ProjectionError> {
        let kind = match (self, target) {
            (from, to) if from == to => TransformKind::Identity,
            (Crs::Wgs84, Crs::WebMercator) => TransformKind::LonLatToMercator,
            (Crs::WebMercator, Crs::Wgs84) => TransformKind::MercatorToLonLat,
            (from, to) => {
                let unsupported = || ProjectionError::Unsupported {
                    from: from.as_str().to_string(),
                    to: to.as_str().to_string(),
                };
                let (source, source_degrees) = from.proj().ok_or_else(unsupported)?;
                let (dest, dest_degrees) = to.proj().ok_or_else(unsupported)?;
                TransformKind::Proj {
                    source,
                    source_degrees,
                    dest,
                    dest_degrees,
                }
            },
        };
        Ok(Transformer {
            from: self.as_str().to_string(),
            to: target.as_str().to_string(),
            kind,
        })
    }

    /// Build the projection for this system, and whether it works in degrees.
    fn proj(&self) -> Option<(Proj, bool)> {
        let definition = crs_definitions::from_code(self.epsg_code()?)?;
        let proj = Proj::from_proj_string(definition.proj4).ok()?;
        let degrees = definition.proj4.contains("+proj=longlat")
            || definition.proj4.contains("+proj=latlong");
        Some((proj, degrees))
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct Transformer {
    from: String,
    to: String,
    kind: TransformKind,
}

enum TransformKind {
    Identity,
    LonLatToMercator,
    MercatorToLonLat,
    Proj {
        source: Proj,
        source_degrees: bool,
        dest: Proj,
        dest_degrees: bool,
    },
}

impl Transformer {
    fn apply(&self, c: Coord<f64>) -> Result<Coord<f64>, ProjectionError> {
        match &self.kind {
            TransformKind::Identity => Ok(c),
            TransformKind::LonLatToMercator => Ok(lonlat_to_mercator(c)),
            TransformKind::MercatorToLonLat => Ok(mercator_to_lonlat(c)),
            TransformKind::Proj {
                source,
                source_degrees,
                dest,
                dest_degrees,
            } => {
                // proj4rs works in radians for geographic systems.
                let mut point = if *source_degrees {
                    (c.x.to_radians(), c.y.to_radians(), 0.0)
                } else {
                    (c.x, c.y, 0.0)
                };
                proj4rs::transform::transform(source, dest, &mut point).map_err(|e| {
                    ProjectionError::Failed {
                        from: self.from.clone(),
                        to: self.to.clone(),
                        message: e.to_string(),
                    }
                })?;
                let (x, y) = if *dest_degrees {
                    (point.0.to_degrees(), point.1.to_degrees())
                } else {
                    (point.0, point.1)
                };
                if x.is_finite() && y.is_finite() {
                    Ok(Coord { x, y })
                } else {
                    Err(ProjectionError::Failed {
                        from: self.from.clone(),
                        to: self.to.clone(),
                        message: format!("({}, {}) has no finite image", c.x, c.y),
                    })
                }
            },
        }
    }
}

/// Split an upper-cased identifier into its authority (if any) and code.
fn split_identifier(normalized: &str) -> (Option<&str>, &str) {
    // http://www.opengis.net/def/crs/EPSG/0/32748
    if normalized.starts_with("HTTP") {
        let parts: Vec<&str> = normalized.split('/').filter(|p| !p.is_empty()).collect();
        return match parts.as_slice() {
            [.., authority, _version, code] => (Some(*authority), *code),
            _ => (None, normalized),
        };
    }

    let parts: Vec<&str> = normalized.split(':').filter(|p| !p.is_empty()).collect();
    match parts.as_slice() {
        // URN:OGC:DEF:CRS:EPSG::32748 or URN:OGC:DEF:CRS:OGC:1.3:CRS84
        ["URN", "OGC", "DEF", "CRS", authority, .., code] => (Some(*authority), *code),
        [authority, .., code] => (Some(*authority), *code),
        [code] => (None, *code),
        [] => (None, normalized),
    }
}

/// The code of the last `AUTHORITY["EPSG","n"]` or `ID["EPSG",n]` in a WKT string.
fn wkt_authority_code(wkt: &str) -> Option<u16> {
    let upper = wkt.to_ascii_uppercase();
    let start = upper
        .match_indices("AUTHORITY[")
        .chain(upper.match_indices("ID["))
        // "ID[" must not be the tail of SPHEROID[ or ELLIPSOID[
        .filter(|(i, _)| *i == 0 || !upper.as_bytes()[i - 1].is_ascii_alphabetic())
        .map(|(i, tag)| i + tag.len())
        .max()?;
    let end = upper[start..].find(']').map_or(upper.len(), |end| start + end);
    let mut parts = upper[start..end]
        .split(',')
        .map(|p| p.trim().trim_matches('"'));
    if parts.next()? != "EPSG" {
        return None;
    }
    parts.next()?.parse().ok()
}

/// The quoted name that follows `tag` in a WKT string.
fn wkt_name(wkt: &str, tag: &str) -> Option<String> {
    let start = wkt.find(tag)? + tag.len();
    let rest = wkt[start..].trim_start().strip_prefix('"')?;
    let end = rest.find('"')?;
    Some(rest[..end].to_string())
}

fn is_wgs84_name(name: &str) -> bool {
    let upper = name.to_ascii_uppercase().replace(' ', "_");
    upper == "WGS_84" || upper == "GCS_WGS_1984" || upper == "WGS_1984"
}

/// EPSG code of a WGS 84 UTM zone such as `48S` or `33N`.
fn utm_epsg_code(zone: &str) -> Option<u16> {
    let (number, base) = if let Some(number) = zone.strip_suffix('N') {
        (number, 32600)
    } else {
        (zone.strip_suffix('S')?, 32700)
    };
    let number: u16 = number.parse().ok()?;
    (1..=60).contains(&number).then_some(base + number)
}

fn lonlat_to_mercator(c: Coord<f64>) -> Coord<f64> {
    let lat = c.y.clamp(-MAX_MERCATOR_LAT, MAX_MERCATOR_LAT);
    Coord {
        x: EARTH_RADIUS * c.x.to_radians(),
        y: EARTH_RADIUS * (std::f64::consts::FRAC_PI_4 + lat.to_radians() / 2.0).tan().ln(),
    }
}

fn mercator_to_lonlat(c: Coord<f64>) -> Coord<f64> {
    Coord {
        x: (c.x / EARTH_RADIUS).to_degrees(),
        y: (2.0 * (c.y / EARTH_RADIUS).exp().atan() - std::f64::consts::FRAC_PI_2).to_degrees(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo_types::{point, polygon};

    #[test]
    fn test_parse_aliases() {
        assert_eq!(Crs::parse("epsg:4326"), Crs::Wgs84);
        assert_eq!(Crs::parse(" EPSG:3857 "), Crs::WebMercator);
        assert_eq!(Crs::parse("EPSG:900913"), Crs::WebMercator);
        assert_eq!(Crs::parse("urn:ogc:def:crs:EPSG::4326"), Crs::Wgs84);
        assert_eq!(Crs::parse("ESRI:54009").as_str(), "ESRI:54009");
    }

    #[test]
    fn test_equivalent_spellings_are_equal() {
        let canonical = Crs::Other("EPSG:32748".to_string());
        for spelling in [
            "EPSG:32748",
            "epsg:32748",
            "EPSG::32748",
            "urn:ogc:def:crs:EPSG::32748",
            "urn:ogc:def:crs:EPSG:9.8.1:32748",
            "http://www.opengis.net/def/crs/EPSG/0/32748",
            "32748",
        ] {
            assert_eq!(Crs::parse(spelling), canonical, "{spelling}");
        }
        assert_eq!(canonical.epsg_code(), Some(32748));
        assert_eq!(Crs::parse("ESRI:54009").epsg_code(), None);
    }

    #[test]
    fn test_round_trip_through_mercator() {
        let jakarta = point!(x: 106.8456, y: -6.2088);
        let projected = Crs::Wgs84
            .transform_point(&Crs::WebMercator, jakarta)
            .unwrap();
        assert!((projected.x() - 11_893_997.8).abs() < 1.0);

        let back = Crs::WebMercator
            .transform_point(&Crs::Wgs84, projected)
            .unwrap();
        assert!((back.x() - jakarta.x()).abs() < 1e-9);
        assert!((back.y() - jakarta.y()).abs() < 1e-9);
    }

    #[test]
    fn test_utm_round_trip() {
        let utm = Crs::parse("EPSG:32748");
        let jakarta = point!(x: 106.8456, y: -6.2088);

        let projected = Crs::Wgs84.transform_point(&utm, jakarta).unwrap();
        assert!((projected.x() - 704_207.2).abs() < 1.0, "{projected:?}");
        assert!((projected.y() - 9_313_358.3).abs() < 1.0, "{projected:?}");

        let back = utm.transform_point(&Crs::Wgs84, projected).unwrap();
        assert!((back.x() - jakarta.x()).abs() < 1e-6);
        assert!((back.y() - jakarta.y()).abs() < 1e-6);
    }

    #[test]
    fn test_identity_keeps_geometry() {
        let square: Geometry<f64> =
            polygon![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0), (x: 1.0, y: 1.0), (x: 0.0, y: 1.0)]
                .into();
        let other = Crs::Other("EPSG:2154".to_string());
        assert_eq!(other.transform(&other, &square).unwrap(), square);
    }

    #[test]
    fn test_unknown_system_is_rejected() {
        let err = Crs::parse("ESRI:54009")
            .transform(&Crs::Wgs84, &Geometry::Point(point!(x: 1.0, y: 2.0)))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Reprojection from ESRI:54009 to EPSG:4326 is not supported"
        );
    }

    #[test]
    fn test_from_wkt_authority() {
        let wkt = r#"PROJCS["WGS 84 / UTM zone 48S",GEOGCS["WGS 84",DATUM["WGS_1984",SPHEROID["WGS 84",6378137,298.257223563,AUTHORITY["EPSG","7030"]],AUTHORITY["EPSG","6326"]],PRIMEM["Greenwich",0],UNIT["degree",0.0174532925199433],AUTHORITY["EPSG","4326"]],PROJECTION["Transverse_Mercator"],UNIT["metre",1],AUTHORITY["EPSG","32748"]]"#;
        assert_eq!(Crs::from_wkt(wkt), Crs::Other("EPSG:32748".to_string()));
    }

    #[test]
    fn test_from_wkt_esri_names() {
        let utm = r#"PROJCS["WGS_1984_UTM_Zone_48S",GEOGCS["GCS_WGS_1984",DATUM["D_WGS_1984",SPHEROID["WGS_1984",6378137.0,298.257223563]],PRIMEM["Greenwich",0.0],UNIT["Degree",0.0174532925199433]],PROJECTION["Transverse_Mercator"],PARAMETER["Central_Meridian",105.0],UNIT["Meter",1.0]]"#;
        assert_eq!(Crs::from_wkt(utm), Crs::Other("EPSG:32748".to_string()));

        let geographic = r#"GEOGCS["GCS_WGS_1984",DATUM["D_WGS_1984",SPHEROID["WGS_1984",6378137.0,298.257223563]],PRIMEM["Greenwich",0.0],UNIT["Degree",0.0174532925199433]]"#;
        assert_eq!(Crs::from_wkt(geographic), Crs::Wgs84);

        let mercator = r#"PROJCS["WGS_1984_Web_Mercator_Auxiliary_Sphere",GEOGCS["GCS_WGS_1984"]]"#;
        assert_eq!(Crs::from_wkt(mercator), Crs::WebMercator);
    }
}
